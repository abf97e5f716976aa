use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Store failure: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("{0}")]
    InvalidSelection(String),

    #[error("Backend build failed: {0}")]
    BackendBuild(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Compaction failed: {0}")]
    Compaction(String),

    #[error("Compaction failed: the summary was empty")]
    EmptySummary,

    #[error("Nothing to compact: no turn has run since the session was created")]
    NothingToCompact,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup failed: {0}")]
    Startup(String),
}

impl From<crate::runtime::RuntimeError> for Error {
    fn from(e: crate::runtime::RuntimeError) -> Self {
        match e {
            crate::runtime::RuntimeError::Build(msg) => Error::BackendBuild(msg),
            other => Error::Session(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
