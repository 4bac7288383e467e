//! Error taxonomy for boundary crossings
//!
//! Every failure the bridge can produce is a value of [`BridgeError`].
//! Binding and type errors are detected before any embedded invocation
//! happens; faults raised inside the embedded runtime are caught once, at the
//! dispatch boundary, and converted to [`BridgeError::EmbeddedException`].
//! No error crosses the runtime boundary as an uncatchable fault.

use thiserror::Error;

/// Errors produced at the host/embedded boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// Value shape not representable by the codec
    #[error("unsupported value shape: {0}")]
    UnsupportedType(String),

    /// A required parameter was left unbound
    #[error("missing required argument `{0}`")]
    MissingArgument(String),

    /// A keyword argument collided with an already-bound slot
    #[error("duplicate binding for argument `{0}`")]
    DuplicateBinding(String),

    /// Target name could not be resolved in the embedded namespace
    #[error("unknown target `{0}`")]
    UnknownTarget(String),

    /// Stale callback or instance handle
    #[error("handle expired")]
    HandleExpired,

    /// Borrowed buffer view used past the call that produced it
    #[error("buffer view used past its call")]
    ViewExpired,

    /// The embedded runtime raised during invocation
    #[error("embedded runtime raised {kind}: {message}")]
    EmbeddedException {
        /// Exception kind as reported by the embedded runtime
        kind: String,
        /// Raw message, preserved for diagnosis
        message: String,
        /// Optional traceback text
        traceback: Option<String>,
    },

    /// Value cannot cross a worker-process boundary
    #[error("value cannot cross a worker boundary: {0}")]
    NotSerializable(String),

    /// Call cancelled before it entered the embedded context
    #[error("call cancelled")]
    Cancelled,

    /// Deadline exceeded while the call was executing
    #[error("deadline exceeded")]
    Timeout,
}

impl BridgeError {
    /// Short kind tag, stable across formatting changes
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::UnsupportedType(_) => "UnsupportedType",
            BridgeError::MissingArgument(_) => "MissingArgument",
            BridgeError::DuplicateBinding(_) => "DuplicateBinding",
            BridgeError::UnknownTarget(_) => "UnknownTarget",
            BridgeError::HandleExpired => "HandleExpired",
            BridgeError::ViewExpired => "ViewExpired",
            BridgeError::EmbeddedException { .. } => "EmbeddedException",
            BridgeError::NotSerializable(_) => "NotSerializable",
            BridgeError::Cancelled => "Cancelled",
            BridgeError::Timeout => "Timeout",
        }
    }

    /// Build an embedded-exception error from kind and message
    pub fn raised(
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BridgeError::EmbeddedException {
            kind: kind.into(),
            message: message.into(),
            traceback: None,
        }
    }
}
