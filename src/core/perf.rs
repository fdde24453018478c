//! Coarse wall-clock timing for pipeline stages.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Records named stage durations when enabled; every call is a no-op
/// otherwise.
pub struct PerfTimer {
    enabled: bool,
    open: HashMap<String, Instant>,
    entries: Vec<(String, Duration)>,
}

impl PerfTimer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            open: HashMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn start(&mut self, label: &str) {
        if self.enabled {
            self.open.insert(label.to_string(), Instant::now());
        }
    }

    pub fn end(&mut self, label: &str) {
        if let Some(started) = self.open.remove(label) {
            self.entries.push((label.to_string(), started.elapsed()));
        }
    }

    /// Print collected timings to stderr, in completion order.
    pub fn report(&self) {
        if !self.enabled || self.entries.is_empty() {
            return;
        }
        eprintln!("\nTimings:");
        for (label, duration) in &self.entries {
            eprintln!("  {label}: {}ms", duration.as_millis());
        }
    }
}
