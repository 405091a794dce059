//! Connection admission: credential check before the WebSocket upgrade.
//!
//! OCPP 1.6 security profile 1: the charge point sends HTTP Basic auth,
//! `Authorization: Basic base64(<chargePointId>:<password>)`, and only the
//! password is compared.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionRejected {
    #[error("No credential presented")]
    MissingCredential,

    #[error("Credential does not match")]
    WrongCredential,
}

/// Accept-all when built with an empty credential.
#[derive(Clone, Default)]
pub struct AdmissionGate {
    expected: String,
}

impl AdmissionGate {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }

    pub fn open() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.expected.is_empty()
    }

    pub fn admit(&self, presented: Option<&str>) -> Result<(), AdmissionRejected> {
        if self.is_open() {
            return Ok(());
        }
        match presented {
            None => Err(AdmissionRejected::MissingCredential),
            Some(password) if password == self.expected => Ok(()),
            Some(_) => Err(AdmissionRejected::WrongCredential),
        }
    }

    /// Check the raw `Authorization` header value.
    pub fn admit_header(&self, authorization: Option<&str>) -> Result<(), AdmissionRejected> {
        let password = authorization.and_then(credential_from_authorization);
        self.admit(password.as_deref())
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Password half of a Basic `Authorization` header. Anything malformed
/// yields `None`.
pub fn credential_from_authorization(header: &str) -> Option<String> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (_, password) = decoded.split_once(':')?;
    Some(password.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
    }

    #[test]
    fn empty_credential_accepts_everyone() {
        let gate = AdmissionGate::open();
        assert!(gate.admit(None).is_ok());
        assert!(gate.admit(Some("anything")).is_ok());
    }

    #[test]
    fn configured_credential_is_enforced() {
        let gate = AdmissionGate::new("s3cret");
        assert_eq!(gate.admit(None), Err(AdmissionRejected::MissingCredential));
        assert_eq!(
            gate.admit(Some("guess")),
            Err(AdmissionRejected::WrongCredential)
        );
        assert!(gate.admit(Some("s3cret")).is_ok());
    }

    #[test]
    fn basic_header_password_extraction() {
        assert_eq!(
            credential_from_authorization(&basic("CP001", "s3cret")).as_deref(),
            Some("s3cret")
        );
        // passwords may contain ':'
        assert_eq!(
            credential_from_authorization(&basic("CP001", "a:b")).as_deref(),
            Some("a:b")
        );
        assert_eq!(credential_from_authorization("Bearer abc"), None);
        assert_eq!(credential_from_authorization("Basic !!!"), None);
        assert_eq!(credential_from_authorization("Basic"), None);
    }

    #[test]
    fn header_check() {
        let gate = AdmissionGate::new("s3cret");
        assert!(gate.admit_header(Some(&basic("CP001", "s3cret"))).is_ok());
        assert_eq!(
            gate.admit_header(Some("Basic !!!")),
            Err(AdmissionRejected::MissingCredential)
        );
    }
}
