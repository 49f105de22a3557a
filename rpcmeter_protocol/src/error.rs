use strum_macros::Display;
use thiserror::Error;

/// Validation-time errors. User-correctable and never the result of network I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must not be blank")]
    BlankField(&'static str),
    #[error("{0} must be a positive integer")]
    NonPositive(&'static str),
    #[error("unrecognized argument type `{0}`")]
    InvalidArgumentType(String),
    #[error("unknown configuration field `{0}`")]
    UnknownField(String),
    #[error("invalid value `{value}` for field `{field}`: {reason}")]
    InvalidField {
        field: String,
        value: String,
        reason: String,
    },
}

/// Registry discovery errors. Non-fatal to the session: the caller keeps its
/// current configuration and any previously cached provider lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("registry address must not be blank")]
    BlankAddress,
    #[error("malformed provider url `{url}`: {reason}")]
    MalformedUrl { url: String, reason: String },
    #[error("registry `{address}` unreachable: {reason}")]
    Unreachable { address: String, reason: String },
}

/// Argument materialization errors. Always fatal to the single dispatch that
/// produced them and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown argument type `{0}`")]
    UnknownType(String),
    #[error("cannot parse `{literal}` as {type_token}")]
    ParseFailure { type_token: String, literal: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DispatchErrorKind {
    ResolutionFailed,
    Timeout,
    RemoteException,
    ArgumentMismatch,
    TransportError,
    Cancelled,
}

/// Terminal failure of one invocation. `Timeout`, `RemoteException` and
/// `TransportError` are subject to cluster-policy retries; `ArgumentMismatch`
/// and `Cancelled` never are.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        DispatchError {
            kind,
            message: message.into(),
        }
    }
}
