use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayrelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unreadable table {path}: {reason}")]
    UnreadableTable { path: String, reason: String },

    #[error("Webhook delivery failed: {0}")]
    Delivery(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PayrelayError>;
