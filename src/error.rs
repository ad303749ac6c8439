use thiserror::Error;
use std::io;

use crate::protocol::status;

#[derive(Debug, Error)]
pub enum DeltaBoxError {
    #[error("SSH connection failed: {0}")]
    SshConnection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Remote command failed: {0}")]
    RemoteCommand(String),

    /// Failure status returned by the remote agent
    #[error("Remote status {code}: {message}")]
    RemoteStatus { code: u32, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Scan error: {0}")]
    Scan(#[from] ignore::Error),
}

/// Coarse classification used when a request fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Protocol,
    Algorithm,
    Transport,
}

impl DeltaBoxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeltaBoxError::Io(_) | DeltaBoxError::Scan(_) => ErrorKind::Io,
            DeltaBoxError::Protocol(_) | DeltaBoxError::Config(_) => ErrorKind::Protocol,
            DeltaBoxError::Algorithm(_) => ErrorKind::Algorithm,
            DeltaBoxError::SshConnection(_)
            | DeltaBoxError::Authentication(_)
            | DeltaBoxError::RemoteCommand(_)
            | DeltaBoxError::RemoteStatus { .. } => ErrorKind::Transport,
        }
    }

    /// SFTP status code reported to the peer for this error
    pub fn status_code(&self) -> u32 {
        match self {
            DeltaBoxError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => status::NO_SUCH_FILE,
                io::ErrorKind::PermissionDenied => status::PERMISSION_DENIED,
                _ => status::FAILURE,
            },
            DeltaBoxError::RemoteStatus { code, .. } => *code,
            DeltaBoxError::Protocol(_) => status::BAD_MESSAGE,
            _ => status::FAILURE,
        }
    }

    /// True for a remote "no such file" status
    pub fn is_not_found(&self) -> bool {
        match self {
            DeltaBoxError::RemoteStatus { code, .. } => *code == status::NO_SUCH_FILE,
            DeltaBoxError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
