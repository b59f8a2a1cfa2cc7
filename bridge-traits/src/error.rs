use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            BridgeError::OperationFailed(_) | BridgeError::Io(_) => true,
            BridgeError::NotAvailable(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
