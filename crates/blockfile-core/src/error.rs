use blockfile_store::BackendError;
use blockfile_types::{BlockId, FileKey, TypeError};
use thiserror::Error;

/// The four error categories callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Io,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(FileKey),

    #[error("file already exists: {0}")]
    AlreadyExists(FileKey),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend error: {0}")]
    Io(#[from] BackendError),

    /// A non-forced cache clear found entries that were never flushed.
    #[error("cache holds {dirty} unflushed entries; clearing requires force")]
    DirtyCache { dirty: usize },

    #[error("configuration error: {0}")]
    Config(String),

    /// Some files of a block could not be deleted. Deleted files stay
    /// deleted; retrying removes the rest.
    #[error("failed to delete {failed} of {total} files in block {block_id}: {source}")]
    BlockDelete {
        block_id: BlockId,
        failed: usize,
        total: usize,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidArgument(_) | Self::DirtyCache { .. } | Self::Config(_) => {
                ErrorKind::InvalidArgument
            }
            Self::Io(_) | Self::BlockDelete { .. } => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<TypeError> for StoreError {
    fn from(e: TypeError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
