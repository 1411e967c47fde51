use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    #[error("Snapshot blob not found for commit {0}")]
    BlobNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt history record: {0}")]
    InvalidTree(String),

    #[error("Remote transfer failed: {0}")]
    Transport(String),

    /// The remote answered and refused the request (bad token, expired or
    /// foreign grant, malformed request). Repeating it cannot succeed.
    #[error("Remote rejected the request: {0}")]
    Rejected(String),

    #[error("Commit {commit_id} has no usable snapshot: {reason}")]
    Integrity { commit_id: String, reason: String },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Remote project has no history yet")]
    RemoteEmpty,

    #[error("No remote configured (add a [remote] section to modelsnap.toml)")]
    NoRemote,
}

/// Coarse classification used by callers deciding between surfacing, repairing
/// and retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Io,
    Transport,
    Rejected,
    Integrity,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::InvalidTree(_) | Error::Config(_) | Error::NoRemote => {
                ErrorKind::Validation
            }
            Error::BranchNotFound(_)
            | Error::CommitNotFound(_)
            | Error::BlobNotFound(_)
            | Error::RemoteEmpty => ErrorKind::NotFound,
            Error::Io(_) | Error::Serialization(_) | Error::Watch(_) => ErrorKind::Io,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Rejected(_) => ErrorKind::Rejected,
            Error::Integrity { .. } => ErrorKind::Integrity,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    pub fn transport(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::Transport(format!("{context}: {err}"))
    }

    pub fn rejected(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::Rejected(format!("{context}: {err}"))
    }
}
