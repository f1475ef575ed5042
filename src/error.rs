//! Error types for the trainbox utilities

use thiserror::Error;

/// Main error type for trainbox operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parameter key set inconsistent with the set fixed at construction
    #[error("Parameter key mismatch: {0}")]
    KeyMismatch(String),

    /// Parameter shape inconsistent with the shape fixed at construction
    #[error("Parameter shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Operation invalid for the current mode
    #[error("Invalid state: {0}")]
    State(String),

    /// Step outside a schedule's domain
    #[error("Step outside schedule domain: {0}")]
    Domain(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for trainbox operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a key mismatch error
    pub fn key_mismatch(msg: impl Into<String>) -> Self {
        Self::KeyMismatch(msg.into())
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// Create an invalid state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a schedule domain error
    pub fn domain(msg: impl Into<String>) -> Self {
        Self::Domain(msg.into())
    }
}
