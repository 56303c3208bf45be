use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::path::{base_name, join, parent, trim_end};
use super::progress::{report_progress, Progress, ProgressSink};
use super::types::{FileReader, FileWriter, IoBackend};
use crate::error::{FileFailure, TransferError};

pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub recursive: bool,
    pub chunk_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            chunk_size: COPY_BUFFER_SIZE,
        }
    }
}

/// Outcome of one or more transfers.
#[derive(Debug, Default)]
pub struct TransferReport {
    /// Destination paths written.
    pub copied: Vec<String>,
    pub failures: Vec<FileFailure>,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: TransferReport) {
        self.copied.extend(other.copied);
        self.failures.extend(other.failures);
    }
}

type EntryFuture<'a> = Pin<Box<dyn Future<Output = ()> + 'a>>;

/// Copies files and directory trees from one backend to another.
///
/// Upload and download are the same code with the backends swapped.
pub struct Transfer<'a> {
    source: &'a dyn IoBackend,
    dest: &'a dyn IoBackend,
    options: TransferOptions,
    progress: Arc<dyn ProgressSink>,
}

impl<'a> Transfer<'a> {
    pub fn new(
        source: &'a dyn IoBackend,
        dest: &'a dyn IoBackend,
        options: TransferOptions,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            source,
            dest,
            options,
            progress,
        }
    }

    /// Copy `source_path` to `dest_path`. A directory copies its contents
    /// into `dest_path`, subdirectories mirrored below it. Failures are
    /// collected per file and never stop the siblings.
    pub async fn run(&self, source_path: &str, dest_path: &str) -> TransferReport {
        info!(
            "Copying {}:{} -> {}:{}",
            self.source.name(),
            source_path,
            self.dest.name(),
            dest_path
        );
        let mut report = TransferReport::default();
        self.copy_entry(source_path, dest_path, None, &mut report).await;
        report
    }

    fn copy_entry<'s>(
        &'s self,
        source_path: &'s str,
        dest_root: &'s str,
        vpath: Option<String>,
        report: &'s mut TransferReport,
    ) -> EntryFuture<'s> {
        Box::pin(async move {
            let meta = match self.source.stat(source_path).await {
                Ok(meta) => meta,
                Err(err) => return self.fail(report, source_path, err),
            };

            if meta.is_dir() {
                self.copy_dir(source_path, dest_root, vpath, report).await;
                return;
            }

            let dest = match vpath.as_deref() {
                None | Some("") => trim_end(dest_root).to_string(),
                Some(sub) => join(dest_root, sub),
            };
            match self.copy_file(source_path, &dest).await {
                Ok(written) => report.copied.push(written),
                Err(failure) => self.record(report, failure),
            }
        })
    }

    async fn copy_dir(
        &self,
        source_path: &str,
        dest_root: &str,
        vpath: Option<String>,
        report: &mut TransferReport,
    ) {
        if !self.options.recursive {
            let path = source_path.to_string();
            return self.fail(report, source_path, TransferError::IsDirectory { path });
        }

        let entries = match self.source.list_dir(source_path).await {
            Ok(entries) => entries,
            Err(err) => return self.fail(report, source_path, err),
        };

        let child_vpath = match vpath {
            None => String::new(),
            Some(sub) => join(&sub, base_name(source_path)),
        };
        debug!("Entering {} ({} entries)", source_path, entries.len());

        for entry in entries {
            let child = join(source_path, &entry.name);
            self.copy_entry(&child, dest_root, Some(child_vpath.clone()), report)
                .await;
        }
    }

    async fn copy_file(&self, source_path: &str, requested: &str) -> Result<String, FileFailure> {
        let opened = self
            .source
            .open(source_path)
            .await
            .map_err(|err| FileFailure::new(source_path, err))?;

        let dest = self
            .resolve_destination(source_path, requested)
            .await
            .map_err(|err| FileFailure::new(requested, err))?;
        let mut writer = self
            .dest
            .create(&dest)
            .await
            .map_err(|err| FileFailure::new(dest.as_str(), err))?;

        let mut reader = opened.reader;
        let (progress, watcher) =
            watch::channel(Progress::start(base_name(source_path), opened.meta.size));
        let stop = CancellationToken::new();

        let copy = async {
            let result = self
                .copy_bytes(&mut reader, &mut writer, source_path, &dest, &progress)
                .await;
            stop.cancel();
            result
        };
        let (result, ()) = tokio::join!(
            copy,
            report_progress(self.progress.as_ref(), watcher, stop.clone())
        );
        let bytes = result?;

        writer
            .shutdown()
            .await
            .map_err(|err| FileFailure::new(dest.as_str(), TransferError::io(&dest, err)))?;

        let mut finished = progress.borrow().clone();
        finished.complete();
        self.progress.finish(&finished);
        debug!("Copied {} bytes to {}", bytes, dest);
        Ok(dest)
    }

    async fn copy_bytes(
        &self,
        reader: &mut FileReader,
        writer: &mut FileWriter,
        source_path: &str,
        dest: &str,
        progress: &watch::Sender<Progress>,
    ) -> Result<u64, FileFailure> {
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        let mut copied = 0u64;

        loop {
            let n = reader.read(&mut buf).await.map_err(|err| {
                FileFailure::new(source_path, TransferError::io(source_path, err))
            })?;
            if n == 0 {
                return Ok(copied);
            }

            writer
                .write_all(&buf[..n])
                .await
                .map_err(|err| FileFailure::new(dest, TransferError::io(dest, err)))?;
            copied += n as u64;
            progress.send_modify(|state| state.advance(copied));
        }
    }

    /// Final file name for a copy of `source_path` requested at `dest`:
    /// an existing directory gets the source name appended, an existing
    /// file is replaced, a missing path is either created as a directory
    /// (recursive) or used as the new file name when its parent exists.
    async fn resolve_destination(
        &self,
        source_path: &str,
        dest: &str,
    ) -> Result<String, TransferError> {
        match self.dest.stat(dest).await {
            Ok(meta) if meta.is_dir() => Ok(join(dest, base_name(source_path))),
            Ok(_) => Ok(dest.to_string()),
            Err(err) if err.is_not_found() => {
                if self.options.recursive {
                    self.create_dirs(dest).await?;
                    Ok(join(dest, base_name(source_path)))
                } else {
                    self.dest.stat(parent(dest)).await?;
                    Ok(dest.to_string())
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Create `path` and any missing ancestors, one level at a time.
    async fn create_dirs(&self, path: &str) -> Result<(), TransferError> {
        let mut missing = Vec::new();
        let mut current = trim_end(path).to_string();

        loop {
            match self.dest.stat(&current).await {
                Ok(meta) if meta.is_dir() => break,
                Ok(_) => return Err(TransferError::NotADirectory { path: current }),
                Err(err) if err.is_not_found() => {
                    let up = parent(&current).to_string();
                    let at_top = up == current;
                    missing.push(current);
                    if at_top {
                        break;
                    }
                    current = up;
                }
                Err(err) => return Err(err),
            }
        }

        for dir in missing.iter().rev() {
            self.dest.mkdir(dir).await?;
            debug!("Created directory {}:{}", self.dest.name(), dir);
        }
        Ok(())
    }

    fn fail(&self, report: &mut TransferReport, path: &str, err: TransferError) {
        self.record(report, FileFailure::new(path, err));
    }

    fn record(&self, report: &mut TransferReport, failure: FileFailure) {
        error!("{}", failure);
        self.progress.failed(&failure);
        report.failures.push(failure);
    }
}
