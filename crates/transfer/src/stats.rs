use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Maximum retained throughput samples.
pub const MAX_SAMPLES: usize = 10;

/// Minimum spacing between two samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

const MB: f64 = 1_000_000.0;
const KB: f64 = 1_000.0;

/// Coarse link quality derived from average speed and its stability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkQuality {
    /// No samples yet.
    #[default]
    Unknown,
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

impl NetworkQuality {
    /// Classifies from average bytes/second and coefficient of variation.
    pub fn classify(average: f64, cov: f64) -> Self {
        if average > 10.0 * MB && cov < 0.3 {
            Self::Excellent
        } else if average > 5.0 * MB && cov < 0.5 {
            Self::Good
        } else if average > MB && cov < 0.7 {
            Self::Fair
        } else if average > 100.0 * KB {
            Self::Poor
        } else {
            Self::VeryPoor
        }
    }
}

/// Point-in-time statistics copied into a transfer record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    /// Most recent sample, bytes/second.
    pub speed: f64,
    /// Mean of the retained samples, bytes/second.
    pub average_speed: f64,
    /// Highest sample seen, bytes/second.
    pub peak_speed: f64,
    /// Seconds remaining at the average speed.
    pub eta_secs: Option<f64>,
    pub quality: NetworkQuality,
}

/// Throughput estimator over a small ring of instantaneous samples.
///
/// Each sample is `bytes advanced / wall-clock delta` since the previous
/// sample; samples closer than [`SAMPLE_INTERVAL`] are skipped.
#[derive(Debug, Clone)]
pub struct ThroughputEstimator {
    samples: VecDeque<f64>,
    capacity: usize,
    min_interval: Duration,
    last: Option<(Instant, u64)>,
    current: f64,
    peak: f64,
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new(MAX_SAMPLES, SAMPLE_INTERVAL)
    }
}

impl ThroughputEstimator {
    /// Creates an estimator keeping at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, min_interval: Duration) -> Self {
        assert!(capacity > 0, "estimator capacity must be > 0");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_interval,
            last: None,
            current: 0.0,
            peak: 0.0,
        }
    }

    /// Records the running byte total at the current instant.
    pub fn record(&mut self, total_bytes: u64) -> bool {
        self.record_at(total_bytes, Instant::now())
    }

    /// Records the running byte total at `now`.
    ///
    /// Returns `true` if a new sample was taken.
    pub fn record_at(&mut self, total_bytes: u64, now: Instant) -> bool {
        let Some((then, then_bytes)) = self.last else {
            self.last = Some((now, total_bytes));
            return false;
        };

        let elapsed = now.saturating_duration_since(then);
        if elapsed < self.min_interval || elapsed.is_zero() {
            return false;
        }

        let advanced = total_bytes.saturating_sub(then_bytes);
        let speed = advanced as f64 / elapsed.as_secs_f64();

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(speed);
        self.current = speed;
        self.peak = self.peak.max(speed);
        self.last = Some((now, total_bytes));
        true
    }

    /// Restarts the time baseline without discarding samples.
    ///
    /// Used after a pause so idle time does not count as a slow sample.
    pub fn rebase(&mut self, total_bytes: u64, now: Instant) {
        self.last = Some((now, total_bytes));
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Arithmetic mean of the retained samples (0.0 with none).
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Population standard deviation divided by the mean.
    pub fn coefficient_of_variation(&self) -> f64 {
        let mean = self.average();
        if mean <= 0.0 {
            return 0.0;
        }
        let n = self.samples.len() as f64;
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f64>()
            / n;
        variance.sqrt() / mean
    }

    /// Time to move `remaining_bytes` at the average speed.
    ///
    /// Returns `None` while the average is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let average = self.average();
        if average <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / average))
    }

    pub fn quality(&self) -> NetworkQuality {
        if self.samples.is_empty() {
            return NetworkQuality::Unknown;
        }
        NetworkQuality::classify(self.average(), self.coefficient_of_variation())
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn snapshot(&self, remaining_bytes: u64) -> TransferStats {
        TransferStats {
            speed: self.current,
            average_speed: self.average(),
            peak_speed: self.peak,
            eta_secs: self.eta(remaining_bytes).map(|d| d.as_secs_f64()),
            quality: self.quality(),
        }
    }
}
