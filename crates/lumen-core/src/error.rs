//! Error types shared across the engine.

use thiserror::Error;

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// GPU device or context errors
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Shader module loading errors
    #[error("Shader error: {0}")]
    Shader(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;
