// src/progress.rs

//! Progress reporting across apply, vendor, and store operations
//!
//! The [`ProgressTracker`] trait decouples the engines from the output mode:
//! `CliProgress` renders indicatif bars, `LogProgress` emits tracing events
//! for non-interactive runs, `SilentProgress` is a no-op for tests and
//! scripted use. Implementations are thread-safe so workers can report from
//! the pool.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Thread-safe progress sink
pub trait ProgressTracker: Send + Sync {
    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Advance by `amount` units
    fn increment(&self, amount: u64);

    /// Set the expected total
    fn set_length(&self, length: u64);

    fn position(&self) -> u64;

    /// Finish successfully
    fn finish_with_message(&self, message: &str);

    /// Finish after a failure
    fn finish_with_error(&self, message: &str);
}

/// No-op tracker
#[derive(Debug, Default)]
pub struct SilentProgress {
    position: AtomicU64,
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.position.fetch_add(amount, Ordering::Relaxed);
    }

    fn set_length(&self, _length: u64) {}

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn finish_with_error(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

/// Tracker that logs through tracing, for non-TTY runs
#[derive(Debug, Default)]
pub struct LogProgress {
    position: AtomicU64,
    length: AtomicU64,
}

impl LogProgress {
    pub fn new(length: u64) -> Self {
        Self { position: AtomicU64::new(0), length: AtomicU64::new(length) }
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!(
            "[{}/{}] {}",
            self.position.load(Ordering::Relaxed),
            self.length.load(Ordering::Relaxed),
            message
        );
    }

    fn increment(&self, amount: u64) {
        self.position.fetch_add(amount, Ordering::Relaxed);
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, message: &str) {
        info!("{message}");
    }

    fn finish_with_error(&self, message: &str) {
        info!("failed: {message}");
    }
}

/// Visual progress bar over indicatif
pub struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub fn new(prefix: &str, length: u64) -> Self {
        let bar = ProgressBar::new(length);
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.set_prefix(prefix.to_string());
        Self { bar }
    }
}

impl ProgressTracker for CliProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}

/// Pick a tracker for the configured output mode
pub fn tracker_for(show_progress: bool, prefix: &str, length: u64) -> Box<dyn ProgressTracker> {
    if show_progress {
        Box::new(CliProgress::new(prefix, length))
    } else {
        Box::new(LogProgress::new(length))
    }
}
