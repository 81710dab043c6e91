//! Single line of user-visible text showing either a startup phase or the latest prediction.
//!
use std::{
    io::Write,
    sync::Arc,
};

use tokio::{sync::watch, task::JoinHandle};

pub const SEARCHING: &str = "Searching for model...";
pub const RUNNING: &str = "Running inference...";

/// Shared handle to the status line. Clones update the same line.
#[derive(Clone)]
pub struct StatusLine {
    tx: Arc<watch::Sender<String>>,
}

impl StatusLine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the displayed text.
    pub fn set(&self, text: impl Into<String>) {
        self.tx.send_replace(text.into());
    }

    /// Currently displayed text.
    pub fn text(&self) -> String {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Redraw the status line in place on the terminal whenever it changes.
pub fn spawn_terminal_renderer(status: &StatusLine) -> JoinHandle<()> {
    let mut rx = status.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let text = rx.borrow_and_update().clone();
            let mut stdout = std::io::stdout().lock();
            // Clear the line before writing so shorter labels leave no residue
            if write!(stdout, "\r\x1b[2K{text}").and_then(|_| stdout.flush()).is_err() {
                break;
            }
        }
    })
}
