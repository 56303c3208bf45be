use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransferError;

pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Other,
}

/// What a backend reports about one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub kind: FileKind,
    /// Byte length, when the backend knows it.
    pub size: Option<u64>,
}

impl FileMeta {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }
}

/// A file opened for reading together with its metadata.
pub struct OpenFile {
    pub reader: FileReader,
    pub meta: FileMeta,
}

/// File operations the transfer engine needs from either side of a copy.
///
/// Paths use `/` separators. `mkdir` creates exactly one level.
#[async_trait]
pub trait IoBackend: Send + Sync {
    /// Short label for logs, `local` or the remote endpoint name.
    fn name(&self) -> &str;

    async fn stat(&self, path: &str) -> Result<FileMeta, TransferError>;

    async fn mkdir(&self, path: &str) -> Result<(), TransferError>;

    /// Create or truncate `path` for writing.
    async fn create(&self, path: &str) -> Result<FileWriter, TransferError>;

    async fn open(&self, path: &str) -> Result<OpenFile, TransferError>;

    /// Entries of a directory sorted by name, without `.` and `..`.
    async fn list_dir(&self, path: &str) -> Result<Vec<FileMeta>, TransferError>;
}
