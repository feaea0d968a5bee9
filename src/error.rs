//! WolfCloud Error Types

use thiserror::Error;

/// Result type alias for WolfCloud operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfCloud error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to write configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Synchronized list errors
    #[error("Invalid list name: {0:?}")]
    InvalidListName(String),

    #[error("List {name} is registered with a different element type (expected {expected})")]
    ListTypeMismatch { name: String, expected: &'static str },

    #[error("List {0} has no announcer and cannot be registered on the manager")]
    NotAuthoritative(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(usize),

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Outbound channel closed")]
    ChannelClosed,

    #[error("Operation not supported on this node: {0}")]
    Unsupported(&'static str),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
