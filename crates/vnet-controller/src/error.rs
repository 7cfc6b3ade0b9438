//! Error types for controller operations

use thiserror::Error;

use crate::address::{Address, NetworkId};
use crate::store::StoreError;

/// Outcome of a configuration request or administrative call.
///
/// This is the taxonomy surfaced to callers; the transport layer maps it
/// onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Request answered
    Ok,
    /// Throttled; nothing was mutated and nothing should be sent
    Ignore,
    /// Unknown network or member
    ObjectNotFound,
    /// Member is not authorized or its identity does not match the bound one
    AccessDenied,
    /// Signing failure, foreign network, or storage failure
    InternalServerError,
    /// Random network ID allocation exhausted its trials
    ServiceUnavailable,
}

impl ResultCode {
    /// Whether the requester should be sent an error
    pub fn is_error(self) -> bool {
        !matches!(self, ResultCode::Ok | ResultCode::Ignore)
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResultCode::Ok => "OK",
            ResultCode::Ignore => "IGNORE",
            ResultCode::ObjectNotFound => "OBJECT_NOT_FOUND",
            ResultCode::AccessDenied => "ACCESS_DENIED",
            ResultCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            ResultCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// Errors raised while decoding a rule description or a binary rule table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The `type` field names no known action or match
    #[error("Unknown rule type: {0}")]
    UnknownRuleType(String),

    /// Rule description is not a JSON object
    #[error("Rule description must be an object")]
    NotAnObject,

    /// A field is present but cannot be interpreted
    #[error("Invalid value for rule field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Binary rule table ended in the middle of a record
    #[error("Rule table truncated at offset {0}")]
    Truncated(usize),

    /// Binary record length does not match its type
    #[error("Rule record of type {kind:#04x} has length {len}, expected {expected}")]
    BadLength { kind: u8, len: usize, expected: usize },
}

/// Errors that can occur during controller operations
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Document store failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Rule codec failure
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Network record does not exist
    #[error("Network {0} not found")]
    NetworkNotFound(NetworkId),

    /// Member record does not exist
    #[error("Member {member} not found on network {network}")]
    MemberNotFound { network: NetworkId, member: Address },

    /// Member may not receive the network's config
    #[error("Member {member} is not authorized on network {network}")]
    AccessDenied { network: NetworkId, member: Address },

    /// Network ID prefix does not match the signing identity's address
    #[error("Network {network} is not served by controller {controller}")]
    ForeignNetwork {
        network: NetworkId,
        controller: Address,
    },

    /// Signing identity has no secret key
    #[error("Signing identity {0} has no secret key")]
    MissingSecretKey(Address),

    /// Signing the membership certificate failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Malformed identity string or key material
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Random network ID allocation gave up
    #[error("No free network ID found after {0} trials")]
    NetworkIdExhausted(u32),

    /// Administrative request payload is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ControllerError {
    /// Map onto the request result taxonomy
    pub fn result_code(&self) -> ResultCode {
        match self {
            ControllerError::NetworkNotFound(_) | ControllerError::MemberNotFound { .. } => {
                ResultCode::ObjectNotFound
            }
            ControllerError::AccessDenied { .. } => ResultCode::AccessDenied,
            ControllerError::NetworkIdExhausted(_) => ResultCode::ServiceUnavailable,
            _ => ResultCode::InternalServerError,
        }
    }
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_mapping() {
        let nwid = NetworkId::new(0x8056c2e21c000001);
        assert_eq!(
            ControllerError::NetworkNotFound(nwid).result_code(),
            ResultCode::ObjectNotFound
        );
        assert_eq!(
            ControllerError::NetworkIdExhausted(100_000).result_code(),
            ResultCode::ServiceUnavailable
        );
        assert_eq!(
            ControllerError::AccessDenied {
                network: nwid,
                member: Address::new(1),
            }
            .result_code(),
            ResultCode::AccessDenied
        );
        assert_eq!(
            ControllerError::Signing("no key".into()).result_code(),
            ResultCode::InternalServerError
        );
        assert_eq!(
            ControllerError::Store(StoreError::Database("closed".into())).result_code(),
            ResultCode::InternalServerError
        );
    }

    #[test]
    fn test_result_code_is_error() {
        assert!(!ResultCode::Ok.is_error());
        assert!(!ResultCode::Ignore.is_error());
        assert!(ResultCode::AccessDenied.is_error());
        assert_eq!(ResultCode::ObjectNotFound.to_string(), "OBJECT_NOT_FOUND");
    }
}
