//! Local terminal handling: raw mode, size queries and the terminal type.

use std::io;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::warn;

pub const DEFAULT_TERM: &str = "xterm-256color";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

impl TermSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

/// Where the current terminal size comes from.
pub trait SizeSource: Send + Sync {
    fn size(&self) -> io::Result<TermSize>;
}

/// The terminal this process is attached to.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTerminal;

impl SizeSource for LocalTerminal {
    fn size(&self) -> io::Result<TermSize> {
        let (cols, rows) = crossterm::terminal::size()?;
        Ok(TermSize::new(rows, cols))
    }
}

/// Terminal type to request for the remote pty, from `$TERM`.
pub fn term_type() -> String {
    term_type_from(std::env::var("TERM").ok())
}

fn term_type_from(value: Option<String>) -> String {
    match value {
        Some(term) if !term.trim().is_empty() => term.trim().to_string(),
        _ => DEFAULT_TERM.to_string(),
    }
}

/// Keeps the local terminal in raw mode; the previous mode comes back on
/// `restore` or drop, whichever happens first.
#[derive(Debug)]
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self { active: true })
    }

    pub fn restore(mut self) {
        self.disable();
    }

    fn disable(&mut self) {
        if self.active {
            self.active = false;
            if let Err(err) = disable_raw_mode() {
                warn!("Failed to restore terminal mode: {}", err);
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.disable();
    }
}
