use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the inventory and its collaborators.
///
/// Collaborator failures (`Credentials`, `Discovery`, `Remote`, `Timeout`) pass
/// through the inventory untouched; nothing here retries.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("credential resolution failed: {0}")]
    Credentials(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("remote command on {host} failed: {message}")]
    Remote { host: String, message: String },

    #[error("remote command on {host} timed out after {after:?}")]
    Timeout { host: String, after: Duration },

    #[error("inventory task is no longer running")]
    InventoryClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AdminError {
    /// True for failures that originate in an external collaborator
    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            AdminError::Credentials(_)
                | AdminError::Discovery(_)
                | AdminError::Remote { .. }
                | AdminError::Timeout { .. }
                | AdminError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AdminError>;
