//! Session identity types

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque key of one live connection, minted by the transport on upgrade.
/// Never reused after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity snapshot of one connected charge point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Protocol-level identity, taken from the upgrade URL path.
    pub identifier: String,
    pub address: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(identifier: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            identifier: identifier.into(),
            address,
            connected_at: Utc::now(),
        }
    }

    pub fn token(&self) -> SessionToken {
        SessionToken {
            identifier: self.identifier.clone(),
            address: self.address,
        }
    }

    /// Identifier match, ignoring a leading `/` on either side.
    pub fn has_identifier(&self, identifier: &str) -> bool {
        self.identifier.trim_start_matches('/') == identifier.trim_start_matches('/')
    }
}

/// Point-in-time copy of the registry contents.
pub type SessionSnapshot = HashMap<SessionHandle, SessionInfo>;

// ── SessionToken ───────────────────────────────────────────────

/// Display form `"<identifier> (<address>)"` used by operator tooling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken {
    pub identifier: String,
    pub address: SocketAddr,
}

impl SessionToken {
    pub fn matches(&self, info: &SessionInfo) -> bool {
        info.identifier == self.identifier && info.address == self.address
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier, self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid session token '{token}': {reason}")]
pub struct InvalidToken {
    pub token: String,
    pub reason: &'static str,
}

impl FromStr for SessionToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvalidToken {
            token: s.to_string(),
            reason,
        };

        // Split on the last " (" so identifiers containing spaces still parse.
        let (identifier, rest) = s
            .trim()
            .rsplit_once(" (")
            .ok_or_else(|| invalid("expected '<identifier> (<address>)'"))?;
        let address = rest
            .strip_suffix(')')
            .ok_or_else(|| invalid("missing closing parenthesis"))?;

        if identifier.is_empty() {
            return Err(invalid("empty identifier"));
        }
        let address = address
            .parse::<SocketAddr>()
            .map_err(|_| invalid("address is not a socket address"))?;

        Ok(Self {
            identifier: identifier.to_string(),
            address,
        })
    }
}
