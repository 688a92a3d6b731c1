//! Progress tracking for scan operations
//!
//! A [`Progress`] is owned by the scan context and updated by the walker.
//! Callers read it with a snapshot query; the walker additionally forwards a
//! snapshot whenever [`Progress::update`] says enough time has passed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Progress shared between the context and background walks
pub type SharedProgress = Arc<Mutex<Progress>>;

/// Point-in-time copy of the progress counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Message type identifier ("p" for progress)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Current phase label
    pub phase: String,
    /// Items processed in this phase
    pub done: u64,
    /// Items expected in this phase, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Items per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// Estimated remaining time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
    /// Item processed at the last update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cur_item: Option<String>,
    /// Wall-clock start of the phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Elapsed time in milliseconds
    pub ms: u64,
}

impl ProgressSnapshot {
    /// Output to stderr as a JSON line
    pub fn print_to_stderr(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            eprintln!("{}", json);
            std::io::stderr().flush().ok();
        }
    }
}

/// Mutable per-phase progress counters
#[derive(Debug)]
pub struct Progress {
    interval: Duration,
    phase: String,
    started: Instant,
    started_at: Option<DateTime<Utc>>,
    done: u64,
    total: Option<u64>,
    last_update: Option<Instant>,
    rate: Option<f64>,
    eta: Option<Duration>,
    cur_item: Option<String>,
    seq: u64,
}

impl Progress {
    /// Create a progress tracker reporting at most once per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            phase: String::new(),
            started: Instant::now(),
            started_at: None,
            done: 0,
            total: None,
            last_update: None,
            rate: None,
            eta: None,
            cur_item: None,
            seq: 0,
        }
    }

    pub fn shared(interval: Duration) -> SharedProgress {
        Arc::new(Mutex::new(Self::new(interval)))
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Begin a new phase, resetting every counter
    pub fn start_phase(&mut self, label: impl Into<String>) {
        self.phase = label.into();
        self.started = Instant::now();
        self.started_at = Some(Utc::now());
        self.done = 0;
        self.total = None;
        self.last_update = None;
        self.rate = None;
        self.eta = None;
        self.cur_item = None;
    }

    /// Set the expected number of items in this phase
    pub fn set_total(&mut self, total: Option<u64>) {
        self.total = total;
    }

    /// Count one processed item
    ///
    /// Returns true if the interval has elapsed since the last update and the
    /// caller should display a snapshot. Rate and ETA are recomputed only then.
    pub fn update(&mut self, cur_item: &str) -> bool {
        self.done += 1;
        let now = Instant::now();
        let due = self
            .last_update
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true);
        if !due {
            return false;
        }

        let elapsed = now.duration_since(self.started).as_secs_f64();
        if elapsed > 0.0 {
            let rate = self.done as f64 / elapsed;
            self.rate = Some(rate);
            self.eta = match self.total {
                Some(total) if rate > 0.0 => {
                    let remaining = total.saturating_sub(self.done) as f64;
                    Some(Duration::from_secs_f64(remaining / rate))
                }
                _ => None,
            };
        }
        self.cur_item = Some(cur_item.to_string());
        self.last_update = Some(now);
        true
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    /// Copy the counters out
    pub fn snapshot(&mut self) -> ProgressSnapshot {
        self.seq += 1;
        ProgressSnapshot {
            msg_type: "p",
            seq: self.seq,
            phase: self.phase.clone(),
            done: self.done,
            total: self.total,
            rate: self.rate,
            eta_ms: self.eta.map(|d| d.as_millis() as u64),
            cur_item: self.cur_item.clone(),
            started_at: self.started_at,
            ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Lock shared progress, ignoring poisoning from a panicked probe thread
pub fn lock(progress: &SharedProgress) -> std::sync::MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}
