use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanlineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Unknown image: {0}")]
    UnknownImage(String),

    #[error("Scanner timed out: {0}")]
    ScannerTimeout(String),

    #[error("Registry pull error: {0}")]
    RegistryPull(String),

    #[error("Scanner error: {0}")]
    Scanner(String),

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
