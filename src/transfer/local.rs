use std::fs::Metadata;

use async_trait::async_trait;
use tokio::fs;

use super::path::base_name;
use super::types::{FileKind, FileMeta, FileWriter, IoBackend, OpenFile};
use crate::error::TransferError;

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

fn meta_from(name: &str, metadata: &Metadata) -> FileMeta {
    let kind = if metadata.is_dir() {
        FileKind::Dir
    } else if metadata.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    };
    FileMeta {
        name: name.to_string(),
        kind,
        size: Some(metadata.len()),
    }
}

#[async_trait]
impl IoBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn stat(&self, path: &str) -> Result<FileMeta, TransferError> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|err| TransferError::io(path, err))?;
        Ok(meta_from(base_name(path), &metadata))
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransferError> {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(0o755);
        builder
            .create(path)
            .await
            .map_err(|err| TransferError::io(path, err))
    }

    async fn create(&self, path: &str) -> Result<FileWriter, TransferError> {
        let file = fs::File::create(path)
            .await
            .map_err(|err| TransferError::io(path, err))?;
        Ok(Box::new(file))
    }

    async fn open(&self, path: &str) -> Result<OpenFile, TransferError> {
        let file = fs::File::open(path)
            .await
            .map_err(|err| TransferError::io(path, err))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|err| TransferError::io(path, err))?;
        Ok(OpenFile {
            meta: meta_from(base_name(path), &metadata),
            reader: Box::new(file),
        })
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<FileMeta>, TransferError> {
        let mut entries = fs::read_dir(path)
            .await
            .map_err(|err| TransferError::io(path, err))?;

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| TransferError::io(path, err))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Follow symlinks so a linked directory is copied as one.
            let metadata = match fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(_) => entry
                    .metadata()
                    .await
                    .map_err(|err| TransferError::io(path, err))?,
            };
            items.push(meta_from(&name, &metadata));
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}
