//! Error types for broker operations

use std::fmt;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur while talking to the message broker
#[derive(Debug)]
pub enum BrokerError {
    /// Connection or channel setup failed
    ConnectFailed(String),

    /// Registering a consumer failed
    ConsumeFailed(String),

    /// A publish was not accepted
    PublishFailed(String),

    /// Payload could not be serialized
    SerializationError(String),

    /// The broker connection is gone
    Closed(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectFailed(msg) => {
                write!(f, "failed to connect to the broker: {}", msg)
            }
            BrokerError::ConsumeFailed(msg) => {
                write!(f, "failed to register a consumer: {}", msg)
            }
            BrokerError::PublishFailed(msg) => write!(f, "publish failed: {}", msg),
            BrokerError::SerializationError(msg) => {
                write!(f, "payload serialization failed: {}", msg)
            }
            BrokerError::Closed(msg) => write!(f, "broker connection closed: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::SerializationError(err.to_string())
    }
}
