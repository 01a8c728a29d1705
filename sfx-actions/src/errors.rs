use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Required identifiers are still missing after every fallback was tried.
    #[error("{0}")]
    Resolution(String),

    #[error("{action} failed ({status}): {body}")]
    Http {
        action: String,
        status: u16,
        body: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("Helper already installed in this document")]
    AlreadyInstalled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ActionError {
    /// HTTP status carried by a failed management call, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ActionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure reading one of the browser key-value storages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage access denied: {0}")]
    Denied(String),
}
