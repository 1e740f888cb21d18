use thiserror::Error;

/// Result type for production line operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while assembling or driving the production line
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The production line has already been started
    #[error("Production line is already running")]
    AlreadyRunning,

    /// An operation required a running production line
    #[error("Production line is not running")]
    NotRunning,

    /// A station reported an unrecoverable processing fault
    #[error("Station {station} fault: {message}")]
    StationFault { station: String, message: String },

    /// A worker thread did not stop within the shutdown grace period
    #[error("Worker {0} did not stop within the shutdown grace period")]
    ShutdownTimeout(String),

    /// Thread join error
    #[error("Thread join error: {0}")]
    ThreadError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Product wire-form encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
