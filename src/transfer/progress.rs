use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::FileFailure;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const INFO_WIDTH: usize = 40;
const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Per-file copy state, updated after every chunk.
#[derive(Debug, Clone)]
pub struct Progress {
    pub name: String,
    pub bytes: u64,
    pub total: Option<u64>,
    pub started: Instant,
    /// Bytes per second as of the last chunk.
    pub speed: f64,
    pub done: bool,
}

impl Progress {
    pub fn start(name: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            name: name.into(),
            bytes: 0,
            total,
            started: Instant::now(),
            speed: 0.0,
            done: false,
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.bytes = bytes;
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.speed = bytes as f64 / secs;
        }
    }

    pub fn complete(&mut self) {
        self.done = true;
    }

    pub fn percent(&self) -> f64 {
        if self.done {
            return 100.0;
        }
        match self.total {
            Some(total) if total > 0 => self.bytes as f64 / total as f64 * 100.0,
            _ => 0.0,
        }
    }
}

/// Receives progress and failures while a copy runs.
pub trait ProgressSink: Send + Sync {
    /// Periodic snapshot of an unfinished file.
    fn update(&self, progress: &Progress);

    /// Called once per successfully copied file, at 100%.
    fn finish(&self, progress: &Progress);

    fn failed(&self, failure: &FileFailure);
}

/// Render `progress` through `sink` once per interval until `stop` fires.
/// Snapshots at 100% are left to [`ProgressSink::finish`].
pub async fn report_progress(
    sink: &dyn ProgressSink,
    progress: watch::Receiver<Progress>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = progress.borrow().clone();
        if !current.done && current.percent() < 100.0 {
            sink.update(&current);
        }
    }
}

/// Human readable size in 1024-based units with two decimals.
pub fn size_format(size: f64) -> String {
    if size.is_nan() || size <= 0.0 {
        return "0 B".to_string();
    }
    let exp = (size.ln() / 1024f64.ln()).floor().max(0.0) as usize;
    let exp = exp.min(SIZE_UNITS.len() - 1);
    let value = size / 1024f64.powi(exp as i32);
    format!("{:.2} {}", value, SIZE_UNITS[exp])
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

/// One progress line: the name on the left, the figures right-aligned to
/// `width` when the terminal width is known.
pub fn render_line(progress: &Progress, elapsed: Duration, width: Option<u16>) -> String {
    let info = format!(
        "{:.2}%  {:>10}/s  {}",
        progress.percent(),
        size_format(progress.speed),
        format_elapsed(elapsed)
    );
    let padding = width
        .map(|cols| (cols as usize).saturating_sub(progress.name.chars().count() + INFO_WIDTH))
        .unwrap_or(0);
    format!(
        "{}{}{:>width$}",
        progress.name,
        " ".repeat(padding),
        info,
        width = INFO_WIDTH
    )
}

/// Progress lines on stdout, redrawn in place.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    line_open: AtomicBool,
}

impl ConsoleSink {
    fn draw(&self, progress: &Progress) {
        let width = crossterm::terminal::size().ok().map(|(cols, _)| cols);
        let line = render_line(progress, progress.started.elapsed(), width);
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\r{}", line);
        let _ = stdout.flush();
    }
}

impl ProgressSink for ConsoleSink {
    fn update(&self, progress: &Progress) {
        self.draw(progress);
        self.line_open.store(true, Ordering::Relaxed);
    }

    fn finish(&self, progress: &Progress) {
        self.draw(progress);
        println!();
        self.line_open.store(false, Ordering::Relaxed);
    }

    fn failed(&self, failure: &FileFailure) {
        if self.line_open.swap(false, Ordering::Relaxed) {
            println!();
        }
        println!("{}", failure);
    }
}
