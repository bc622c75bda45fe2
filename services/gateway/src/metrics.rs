//! Ingestion metrics.
//!
//! Counters are atomics because they are written from the ingestion loop and
//! every writer worker concurrently.  The latency aggregator sits behind its
//! own small lock; it is only touched once per report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Metrics {
    /// Frames that failed JSON parsing.
    pub unparseable_samples: AtomicU64,
    /// Frames lacking the `type` field.
    pub reports_missing_type: AtomicU64,
    /// Frames lacking the `dataType` field.
    pub reports_missing_data_type: AtomicU64,
    /// Frames with a `type` the router does not know.
    pub unroutable_reports: AtomicU64,
    /// Routable frames whose typed payload parse failed.
    pub payload_parse_failures: AtomicU64,
    /// Reports dropped for missing required identifier fields.
    pub reports_missing_identifiers: AtomicU64,
    /// Reports dropped because an identifier was not in the cache.
    pub reports_unmapped_identifiers: AtomicU64,
    /// Reports whose `dataType` is outside the writer's vocabulary.
    pub incompatible_reports: AtomicU64,
    pub documents_written: AtomicU64,
    pub write_failures: AtomicU64,
    pub keepalives_received: AtomicU64,
    pub session_restarts: AtomicU64,
    pub video_events_discarded: AtomicU64,
    latency: Mutex<LatencyWindow>,
}

impl Metrics {
    pub fn new(huge_differential_ms: f64) -> Self {
        Self {
            latency: Mutex::new(LatencyWindow::new(huge_differential_ms)),
            ..Self::default()
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Record the wall-clock differential between a report's own timestamp
    /// and its arrival.  Differentials above the configured threshold are
    /// counted separately and excluded from the aggregates.
    pub fn observe_latency(&self, differential_ms: f64) {
        if let Ok(mut window) = self.latency.lock() {
            window.observe(differential_ms);
        }
    }

    pub fn latency_snapshot(&self) -> LatencyWindow {
        self.latency
            .lock()
            .map(|w| w.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// One-line aggregate summary, logged at shutdown.
    pub fn summary(&self) -> String {
        let latency = self.latency_snapshot();
        format!(
            "written={} write_failures={} keepalives={} unparseable={} \
             missing_type={} missing_data_type={} unroutable={} unmapped={} \
             session_restarts={} latency[{}]",
            Self::get(&self.documents_written),
            Self::get(&self.write_failures),
            Self::get(&self.keepalives_received),
            Self::get(&self.unparseable_samples),
            Self::get(&self.reports_missing_type),
            Self::get(&self.reports_missing_data_type),
            Self::get(&self.unroutable_reports),
            Self::get(&self.reports_unmapped_identifiers),
            Self::get(&self.session_restarts),
            latency.summary(),
        )
    }
}

/// Min/max/average ingest latency with an outlier cutoff.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    threshold_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    sum_ms: f64,
    pub samples: u64,
    pub outliers: u64,
}

impl LatencyWindow {
    fn new(threshold_ms: f64) -> Self {
        Self {
            threshold_ms,
            min_ms: f64::INFINITY,
            max_ms: f64::NEG_INFINITY,
            sum_ms: 0.0,
            samples: 0,
            outliers: 0,
        }
    }

    fn observe(&mut self, differential_ms: f64) {
        if differential_ms > self.threshold_ms {
            self.outliers += 1;
            return;
        }
        self.min_ms = self.min_ms.min(differential_ms);
        self.max_ms = self.max_ms.max(differential_ms);
        self.sum_ms += differential_ms;
        self.samples += 1;
    }

    pub fn average_ms(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum_ms / self.samples as f64)
    }

    fn summary(&self) -> String {
        match self.average_ms() {
            Some(avg) => format!(
                "min={:.0}ms max={:.0}ms avg={:.0}ms samples={} outliers={}",
                self.min_ms, self.max_ms, avg, self.samples, self.outliers
            ),
            None => format!("samples=0 outliers={}", self.outliers),
        }
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(60_000.0)
    }
}
