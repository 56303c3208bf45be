//! Wiring between the local standard streams and the remote channel, plus
//! the optional session transcript.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tasks::TaskHandle;
use crate::models::{Endpoint, LogMode};

const STDIN_BUFFER: usize = 4096;
const OUTPUT_QUEUE: usize = 64;

/// Expand a transcript filename template.
///
/// `%g` group, `%n` name, `%dt` date-time, `%d` date, `%u` user, `%a` alias.
/// Unknown sequences are kept as written.
pub fn format_log_filename(template: &str, endpoint: &Endpoint, now: DateTime<Local>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let (value, used) = if tail.starts_with("%dt") {
            (now.format("%Y-%m-%d-%H-%M-%S").to_string(), 3)
        } else if tail.starts_with("%d") {
            (now.format("%Y-%m-%d").to_string(), 2)
        } else if tail.starts_with("%g") {
            (endpoint.group.clone().unwrap_or_default(), 2)
        } else if tail.starts_with("%n") {
            (endpoint.name.clone(), 2)
        } else if tail.starts_with("%u") {
            (endpoint.user.clone(), 2)
        } else if tail.starts_with("%a") {
            (endpoint.alias.clone(), 2)
        } else {
            ("%".to_string(), 1)
        };
        out.push_str(&value);
        rest = &tail[used..];
    }
    out.push_str(rest);
    out
}

pub async fn open_transcript(path: &Path, mode: LogMode) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        LogMode::Append => options.append(true),
        LogMode::Overwrite => options.write(true).truncate(true),
    };
    options.open(path).await
}

/// Where remote standard output goes.
pub enum OutputSink {
    Direct(tokio::io::Stdout),
    Logged(mpsc::Sender<Vec<u8>>),
}

impl OutputSink {
    pub fn direct() -> Self {
        OutputSink::Direct(tokio::io::stdout())
    }

    /// Build the sink for `endpoint`. A transcript that cannot be opened is
    /// reported and the session falls back to direct output.
    pub async fn for_endpoint(endpoint: &Endpoint) -> (Self, Option<TaskHandle>) {
        if !endpoint.log.enable || endpoint.log.filename.trim().is_empty() {
            return (Self::direct(), None);
        }

        let path = PathBuf::from(format_log_filename(
            &endpoint.log.filename,
            endpoint,
            Local::now(),
        ));
        match open_transcript(&path, endpoint.log.mode).await {
            Ok(file) => {
                info!("Writing session transcript to {:?}", path);
                let (tx, rx) = mpsc::channel(OUTPUT_QUEUE);
                let task = TaskHandle::spawn("output", move |stop| {
                    run_transcript(rx, tokio::io::stdout(), file, stop)
                });
                (OutputSink::Logged(tx), Some(task))
            }
            Err(err) => {
                warn!("Cannot open transcript {:?}: {}", path, err);
                (Self::direct(), None)
            }
        }
    }

    /// Forward remote output. Once the transcript task is gone the sink
    /// switches to direct output and the chunk goes straight to the terminal.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if let OutputSink::Logged(chunks) = self {
            if chunks.send(data.to_vec()).await.is_ok() {
                return Ok(());
            }
            warn!("Transcript task ended, writing output directly");
            *self = Self::direct();
        }

        match self {
            OutputSink::Direct(stdout) => {
                stdout.write_all(data).await?;
                stdout.flush().await
            }
            OutputSink::Logged(_) => Ok(()),
        }
    }
}

/// Copy every chunk to the terminal and to the transcript file.
///
/// Ends when the sender is gone and the queue is drained, or on `stop`.
/// A failing transcript is reported once and dropped; the terminal keeps
/// receiving every chunk.
pub async fn run_transcript<O, F>(
    mut chunks: mpsc::Receiver<Vec<u8>>,
    mut terminal: O,
    mut transcript: F,
    stop: CancellationToken,
) where
    O: AsyncWrite + Unpin,
    F: AsyncWrite + Unpin,
{
    let mut terminal_ok = true;
    let mut transcript_ok = true;

    loop {
        let chunk = tokio::select! {
            biased;
            chunk = chunks.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
            _ = stop.cancelled() => break,
        };

        if terminal_ok {
            let written = match terminal.write_all(&chunk).await {
                Ok(()) => terminal.flush().await,
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                debug!("Terminal write failed: {}", err);
                terminal_ok = false;
            }
        }
        if transcript_ok {
            if let Err(err) = transcript.write_all(&chunk).await {
                warn!("Transcript write failed, logging stopped: {}", err);
                transcript_ok = false;
            }
        }
    }

    if transcript_ok {
        if let Err(err) = transcript.flush().await {
            warn!("Transcript flush failed: {}", err);
        }
    }
}

/// Read standard input on its own thread.
///
/// A blocking terminal read cannot be cancelled, so it stays off the
/// runtime; the thread ends at end of input or once the receiver is gone.
pub fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(OUTPUT_QUEUE);
    let spawned = std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; STDIN_BUFFER];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        debug!("stdin read failed: {}", err);
                        break;
                    }
                }
            }
        });

    if let Err(err) = spawned {
        warn!("Cannot start stdin reader: {}", err);
    }
    rx
}
