//! OCPP-J message framing
//!
//! Every OCPP-J message is a JSON array whose first element is the
//! message type:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};
use thiserror::Error;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

// ── CallErrorCode ──────────────────────────────────────────────

/// Error codes a peer may put into a `CallError` frame (OCPP-J 1.6 §4.2.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    /// Spelled as in the OCPP 1.6 specification.
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
    /// Anything a non-conforming peer sends.
    Other(String),
}

impl CallErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
            Self::Other(code) => code,
        }
    }
}

impl FromStr for CallErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NotImplemented" => Self::NotImplemented,
            "NotSupported" => Self::NotSupported,
            "InternalError" => Self::InternalError,
            "ProtocolError" => Self::ProtocolError,
            "SecurityError" => Self::SecurityError,
            "FormationViolation" => Self::FormationViolation,
            "PropertyConstraintViolation" => Self::PropertyConstraintViolation,
            "OccurenceConstraintViolation" => Self::OccurenceConstraintViolation,
            "TypeConstraintViolation" => Self::TypeConstraintViolation,
            "GenericError" => Self::GenericError,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: CallErrorCode,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn call_result(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// A `CallError` with empty details.
    pub fn call_error(
        unique_id: impl Into<String>,
        error_code: CallErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: json!({}),
        }
    }

    /// Parse a text WebSocket message.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let arr = value.as_array().ok_or(FrameError::NotAnArray)?;

        let msg_type = arr
            .first()
            .ok_or(FrameError::EmptyArray)?
            .as_u64()
            .ok_or(FrameError::InvalidMessageType)?;

        let unique_id = |arr: &[Value]| -> Result<String, FrameError> {
            arr.get(1)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(FrameError::FieldType("uniqueId must be a string"))
        };

        match msg_type {
            MSG_TYPE_CALL => {
                require_len(arr, 4)?;
                let action = arr[2]
                    .as_str()
                    .ok_or(FrameError::FieldType("action must be a string"))?;
                Ok(Self::call(unique_id(arr)?, action, arr[3].clone()))
            }
            MSG_TYPE_CALL_RESULT => {
                require_len(arr, 3)?;
                Ok(Self::call_result(unique_id(arr)?, arr[2].clone()))
            }
            MSG_TYPE_CALL_ERROR => {
                require_len(arr, 4)?;
                let error_code = arr[2]
                    .as_str()
                    .ok_or(FrameError::FieldType("errorCode must be a string"))?;
                Ok(Self::CallError {
                    unique_id: unique_id(arr)?,
                    error_code: error_code.parse().unwrap_or(CallErrorCode::GenericError),
                    error_description: arr[3].as_str().unwrap_or_default().to_string(),
                    error_details: arr.get(4).cloned().unwrap_or_else(|| json!({})),
                })
            }
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    /// Serialize to the text sent over the socket.
    pub fn to_text(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => json!([MSG_TYPE_CALL, unique_id, action, payload]),
            Self::CallResult { unique_id, payload } => {
                json!([MSG_TYPE_CALL_RESULT, unique_id, payload])
            }
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => json!([
                MSG_TYPE_CALL_ERROR,
                unique_id,
                error_code.as_str(),
                error_description,
                error_details
            ]),
        };
        arr.to_string()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }
}

fn require_len(arr: &[Value], expected: usize) -> Result<(), FrameError> {
    if arr.len() < expected {
        return Err(FrameError::MissingFields {
            expected,
            got: arr.len(),
        });
    }
    Ok(())
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("OCPP message is not a JSON array")]
    NotAnArray,

    #[error("Empty OCPP message array")]
    EmptyArray,

    #[error("Message type is not a number")]
    InvalidMessageType,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),

    #[error("Expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },

    #[error("Field type mismatch: {0}")]
    FieldType(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargePointVendor":"Vendor","chargePointModel":"Model"}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendor");
            }
            other => panic!("Expected Call frame, got {:?}", other),
        }
    }

    #[test]
    fn parse_call_error_keeps_known_code() {
        let text = r#"[4,"abc123","NotImplemented","Action not supported",{}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::CallError {
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(error_code, CallErrorCode::NotImplemented);
                assert_eq!(error_description, "Action not supported");
            }
            other => panic!("Expected CallError frame, got {:?}", other),
        }
    }

    #[test]
    fn parse_call_error_with_vendor_code() {
        let text = r#"[4,"x","VendorSpecific","",{}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        assert!(matches!(
            frame,
            OcppFrame::CallError { error_code: CallErrorCode::Other(ref c), .. } if c == "VendorSpecific"
        ));
    }

    #[test]
    fn call_result_text_layout() {
        let frame = OcppFrame::call_result("id2", json!({"status": "Accepted"}));
        assert_eq!(frame.to_text(), r#"[3,"id2",{"status":"Accepted"}]"#);
    }

    #[test]
    fn rejects_non_array() {
        assert!(matches!(
            OcppFrame::parse(r#"{"a":1}"#),
            Err(FrameError::NotAnArray)
        ));
    }

    #[test]
    fn rejects_short_call() {
        assert!(matches!(
            OcppFrame::parse(r#"[2,"id","Heartbeat"]"#),
            Err(FrameError::MissingFields { expected: 4, got: 3 })
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(matches!(
            OcppFrame::parse(r#"[9,"id"]"#),
            Err(FrameError::UnknownMessageType(9))
        ));
    }
}
