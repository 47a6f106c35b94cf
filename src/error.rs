use thiserror::Error;

#[derive(Error, Debug)]
pub enum BreezeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Startup error: {0}")]
    StartupError(String),

    #[error("Certificate generation error: {0}")]
    RcgenError(#[from] rcgen::RcgenError),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Transfer declined by peer: {0}")]
    Declined(String),

    #[error("File size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Invalid transfer offer: {0}")]
    ValidationError(String),

    #[error("{0}")]
    GenericError(String),
}

impl From<&str> for BreezeError {
    fn from(error: &str) -> Self {
        Self::GenericError(error.to_string())
    }
}

// 添加reqwest错误的转换实现
impl From<reqwest::Error> for BreezeError {
    fn from(error: reqwest::Error) -> Self {
        Self::NetworkError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BreezeError>;
