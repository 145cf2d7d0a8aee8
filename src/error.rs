//! Error types for btrfaas
//!
//! This module defines the error type shared by the chain codec, the executor,
//! the credential resolver, the security policy and the runner, and maps each
//! error onto the wire status carried by the `run` stream and onto the HTTP
//! status the gateway answers with.

use thiserror::Error;

/// Result type alias for btrfaas operations
pub type Result<T> = std::result::Result<T, BtrfaasError>;

/// Terminal status codes carried in a `STATUS` frame
///
/// The numeric values follow the gRPC status space so a runner written
/// against another transport can report the same outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    /// Stream finished, every chunk was processed
    Ok = 0,
    /// The peer abandoned the stream
    Cancelled = 1,
    /// Malformed frame, bad options or a protocol violation
    InvalidArgument = 3,
    /// Session or chunk deadline expired
    DeadlineExceeded = 4,
    /// Input exceeded the configured limit
    ResourceExhausted = 8,
    /// Unknown method
    Unimplemented = 12,
    /// The transformation failed
    Internal = 13,
    /// Runner is shutting down or over capacity
    Unavailable = 14,
}

impl StatusCode {
    /// Decode a status byte. Unknown values collapse to `Internal`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            8 => StatusCode::ResourceExhausted,
            12 => StatusCode::Unimplemented,
            14 => StatusCode::Unavailable,
            _ => StatusCode::Internal,
        }
    }

    /// Byte written on the wire
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Returns true for the success status
    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// Main error type for btrfaas
#[derive(Error, Debug)]
pub enum BtrfaasError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid function identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: String },

    #[error("Chain/options count mismatch: chain has {chain} steps, options has {options} entries")]
    ChainOptionsMismatch { chain: usize, options: usize },

    #[error("Chain is empty")]
    EmptyChain,

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Invalid chain expression: {0}")]
    InvalidExpression(String),

    #[error("Secret {name:?} unavailable: {reason}")]
    SecretUnavailable { name: String, reason: String },

    #[error("Security configuration error: {0}")]
    SecurityConfig(String),

    #[error("Chain step {step_index} ({function}) failed: {cause}")]
    ChainStepFailed {
        step_index: usize,
        function: String,
        cause: Box<BtrfaasError>,
    },

    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("Runner returned {status}: {message}")]
    Remote { status: StatusCode, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Input limit exceeded: {received} bytes received, limit is {limit}")]
    InputLimitExceeded { received: u64, limit: u64 },
}

impl BtrfaasError {
    // ========== Error Context Builders ==========

    /// Create a protocol error with operation context
    ///
    /// # Example
    /// ```ignore
    /// BtrfaasError::protocol("read frame", "unknown kind 0x09")
    /// // produces: "Stream protocol error: read frame: unknown kind 0x09"
    /// ```
    pub fn protocol(operation: &str, detail: impl Into<String>) -> Self {
        BtrfaasError::StreamProtocol(format!("{}: {}", operation, detail.into()))
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BtrfaasError::InvalidIdentifier {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a secret resolution error
    pub fn secret_unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BtrfaasError::SecretUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a security configuration error with context
    pub fn security(operation: &str, detail: impl Into<String>) -> Self {
        BtrfaasError::SecurityConfig(format!("{}: {}", operation, detail.into()))
    }

    /// Wrap a failure of one chain step
    pub fn step_failed(step_index: usize, function: impl Into<String>, cause: BtrfaasError) -> Self {
        BtrfaasError::ChainStepFailed {
            step_index,
            function: function.into(),
            cause: Box::new(cause),
        }
    }

    /// Create a remote status error from a runner's terminal status
    pub fn remote(status: StatusCode, message: impl Into<String>) -> Self {
        BtrfaasError::Remote {
            status,
            message: message.into(),
        }
    }

    /// Create a network error with context
    pub fn network(operation: &str, detail: impl Into<String>) -> Self {
        BtrfaasError::Network(format!("{}: {}", operation, detail.into()))
    }

    /// Index of the failed step, if this is a chain step failure
    pub fn step_index(&self) -> Option<usize> {
        match self {
            BtrfaasError::ChainStepFailed { step_index, .. } => Some(*step_index),
            _ => None,
        }
    }

    // ========== Status Conversion ==========

    /// Status reported on the `run` stream when a session ends with this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BtrfaasError::StreamProtocol(_)
            | BtrfaasError::InvalidOptions(_)
            | BtrfaasError::InvalidIdentifier { .. }
            | BtrfaasError::Serialization(_) => StatusCode::InvalidArgument,
            BtrfaasError::Timeout(_) => StatusCode::DeadlineExceeded,
            BtrfaasError::Cancelled(_) => StatusCode::Cancelled,
            BtrfaasError::InputLimitExceeded { .. } => StatusCode::ResourceExhausted,
            BtrfaasError::Remote { status, .. } => *status,
            BtrfaasError::Network(_) | BtrfaasError::Unavailable(_) => StatusCode::Unavailable,
            BtrfaasError::Unimplemented(_) => StatusCode::Unimplemented,
            BtrfaasError::ChainStepFailed { cause, .. } => cause.status_code(),
            _ => StatusCode::Internal,
        }
    }

    /// HTTP status the gateway answers with for this error
    pub fn http_status(&self) -> u16 {
        match self {
            BtrfaasError::InvalidIdentifier { .. }
            | BtrfaasError::ChainOptionsMismatch { .. }
            | BtrfaasError::EmptyChain
            | BtrfaasError::InvalidOptions(_)
            | BtrfaasError::InvalidExpression(_)
            | BtrfaasError::Serialization(_) => 400,
            BtrfaasError::Timeout(_) => 504,
            BtrfaasError::ChainStepFailed { cause, .. } => match cause.as_ref() {
                BtrfaasError::Timeout(_) => 504,
                _ => 502,
            },
            _ => 500,
        }
    }
}
