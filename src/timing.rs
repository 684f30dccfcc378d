//! Process-wide accumulator for probe overhead
//!
//! Every recorder update times itself and feeds the elapsed milliseconds
//! here. The numbers only describe how much time the probe added to the
//! target; they never influence call counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Snapshot of everything the accumulator has seen
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimingSummary {
    #[serde(rename = "Samples")]
    pub samples: u64,
    #[serde(rename = "Total (ms)")]
    pub total_ms: f64,
    #[serde(rename = "Min (ms)")]
    pub min_ms: f64,
    #[serde(rename = "Max (ms)")]
    pub max_ms: f64,
    #[serde(rename = "Mean (ms)")]
    pub mean_ms: f64,
}

/// Thread-safe sink for elapsed-time samples
///
/// Create one per analysis session and hand an `Arc` to each recorder.
/// Samples are folded in with atomics, so recorders on different target
/// threads never wait on each other here. Floating-point fields are stored
/// as their bit patterns.
#[derive(Debug)]
pub struct TimingAccumulator {
    samples: AtomicU64,
    total_bits: AtomicU64,
    min_bits: AtomicU64,
    max_bits: AtomicU64,
}

impl Default for TimingAccumulator {
    fn default() -> Self {
        Self {
            samples: AtomicU64::new(0),
            total_bits: AtomicU64::new(0f64.to_bits()),
            min_bits: AtomicU64::new(f64::INFINITY.to_bits()),
            max_bits: AtomicU64::new(0f64.to_bits()),
        }
    }
}

/// Replace the f64 stored in `cell` with `f(current)` until no other
/// thread got in between
fn update_f64(cell: &AtomicU64, f: impl Fn(f64) -> f64) {
    let _ = cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
        let current = f64::from_bits(bits);
        let next = f(current);
        (next.to_bits() != bits).then(|| next.to_bits())
    });
}

impl TimingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample. Negative and non-finite samples are dropped.
    pub fn increase(&self, elapsed_ms: f64) {
        if !elapsed_ms.is_finite() || elapsed_ms < 0.0 {
            return;
        }

        update_f64(&self.total_bits, |total| total + elapsed_ms);
        update_f64(&self.min_bits, |min| min.min(elapsed_ms));
        update_f64(&self.max_bits, |max| max.max(elapsed_ms));
        self.samples.fetch_add(1, Ordering::AcqRel);
    }

    /// Run `f`, record how long it took, and return its result
    ///
    /// # Example
    /// ```
    /// use ddsprobe::timing::TimingAccumulator;
    ///
    /// let acc = TimingAccumulator::new();
    /// let n = acc.measure(|| 2 + 2);
    /// assert_eq!(n, 4);
    /// assert_eq!(acc.summary().samples, 1);
    /// ```
    pub fn measure<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.increase(start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Current totals
    ///
    /// Fields are read one by one; a sample landing concurrently may be
    /// reflected in some of them only. Read after the target quiesces for
    /// exact numbers.
    pub fn summary(&self) -> TimingSummary {
        let samples = self.samples.load(Ordering::Acquire);
        if samples == 0 {
            return TimingSummary::default();
        }

        let total_ms = f64::from_bits(self.total_bits.load(Ordering::Acquire));
        let min_ms = f64::from_bits(self.min_bits.load(Ordering::Acquire));
        TimingSummary {
            samples,
            total_ms,
            min_ms: if min_ms.is_finite() { min_ms } else { 0.0 },
            max_ms: f64::from_bits(self.max_bits.load(Ordering::Acquire)),
            mean_ms: total_ms / samples as f64,
        }
    }
}
