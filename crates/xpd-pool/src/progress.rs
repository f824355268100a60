use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

/// Sink for unit progress, advanced once per completed item.
pub trait Progress: Sync {
    /// Advances the indicator by `delta` units.
    fn inc(&self, delta: u64);

    /// Marks the indicator as complete.
    fn finish(&self) {}
}

impl Progress for ProgressBar {
    fn inc(&self, delta: u64) {
        ProgressBar::inc(self, delta);
    }

    fn finish(&self) {
        ProgressBar::finish(self);
    }
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn inc(&self, _delta: u64) {}
}

/// Records every increment in call order.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    increments: Mutex<Vec<u64>>,
    finished: Mutex<bool>,
}

impl RecordingProgress {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments seen so far.
    pub fn increments(&self) -> Vec<u64> {
        self.increments
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Sum of all increments.
    pub fn position(&self) -> u64 {
        self.increments().iter().sum()
    }

    /// Whether [`Progress::finish`] was called.
    pub fn is_finished(&self) -> bool {
        self.finished.lock().map(|guard| *guard).unwrap_or(false)
    }
}

impl Progress for RecordingProgress {
    fn inc(&self, delta: u64) {
        if let Ok(mut guard) = self.increments.lock() {
            guard.push(delta);
        }
    }

    fn finish(&self) {
        if let Ok(mut guard) = self.finished.lock() {
            *guard = true;
        }
    }
}

/// Live terminal bar with elapsed time, ETA and rate.
///
/// Hidden automatically when stderr is not a terminal.
pub fn progress_bar(total: u64, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{prefix} {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise} < {eta}, {per_sec}]")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
    bar.set_style(style);
    bar.set_prefix(label.to_string());
    bar
}
