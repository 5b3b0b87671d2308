// crates/authz-core/src/runtime/telemetry.rs
// ============================================================================
// Module: Authz Telemetry
// Description: Metric hooks for decision inspection.
// Purpose: Count inspections and record their latency without hard deps.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Every `inspect` call reports one [`InspectionMetric`]. The
//! [`AuthzMetrics`] trait keeps exporters pluggable; [`InMemoryMetrics`]
//! keeps counters and a fixed-bucket histogram for diagnostics pages and
//! tests.
//! Security posture: labels are limited to mode and result.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::core::mode::EnforcementMode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Counter name for inspections.
pub const INSPECTION_COUNTER: &str = "authz_debug_requests_total";
/// Histogram name for inspection latency.
pub const INSPECTION_LATENCY: &str = "authz_debug_latency_seconds";
/// Latency bucket upper bounds in microseconds (0.5 ms to 2 s).
pub const INSPECTION_LATENCY_BUCKETS_US: &[u64] =
    &[500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 200_000, 500_000, 1_000_000, 2_000_000];

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// Inspection result label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionResult {
    /// The request was allowed.
    Allowed,
    /// The request was denied.
    Denied,
}

impl InspectionResult {
    /// Returns the label for a decision.
    #[must_use]
    pub const fn from_allowed(allowed: bool) -> Self {
        if allowed { Self::Allowed } else { Self::Denied }
    }

    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
        }
    }
}

/// One inspection observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InspectionMetric {
    /// Mode in effect.
    pub mode: EnforcementMode,
    /// Decision result.
    pub result: InspectionResult,
    /// Evaluation latency.
    pub latency: Duration,
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Metrics sink for decision inspection.
pub trait AuthzMetrics: Send + Sync {
    /// Records one inspection.
    fn record_inspection(&self, metric: InspectionMetric);
}

/// No-op metrics sink.
///
/// # Invariants
/// - Metrics are intentionally discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl AuthzMetrics for NoopMetrics {
    fn record_inspection(&self, _metric: InspectionMetric) {}
}

/// Histogram snapshot for one label pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatencyHistogram {
    /// Cumulative-free bucket counts aligned with
    /// [`INSPECTION_LATENCY_BUCKETS_US`], plus one overflow bucket.
    pub buckets: Vec<u64>,
    /// Total observed latency in microseconds.
    pub sum_us: u128,
    /// Number of observations.
    pub count: u64,
}

impl LatencyHistogram {
    /// Records one latency observation.
    fn observe(&mut self, latency: Duration) {
        if self.buckets.is_empty() {
            self.buckets = vec![0; INSPECTION_LATENCY_BUCKETS_US.len() + 1];
        }
        let micros = latency.as_micros();
        let index = INSPECTION_LATENCY_BUCKETS_US
            .iter()
            .position(|bound| micros <= u128::from(*bound))
            .unwrap_or(INSPECTION_LATENCY_BUCKETS_US.len());
        self.buckets[index] += 1;
        self.sum_us += micros;
        self.count += 1;
    }
}

/// Metrics sink that keeps counters and histograms in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    /// Histograms keyed by `(mode, result)`.
    series: Mutex<BTreeMap<(&'static str, &'static str), LatencyHistogram>>,
}

impl InMemoryMetrics {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter value for a label pair.
    #[must_use]
    pub fn count(&self, mode: EnforcementMode, result: InspectionResult) -> u64 {
        self.histogram(mode, result).map_or(0, |histogram| histogram.count)
    }

    /// Returns a histogram snapshot for a label pair.
    #[must_use]
    pub fn histogram(
        &self,
        mode: EnforcementMode,
        result: InspectionResult,
    ) -> Option<LatencyHistogram> {
        let series = self.series.lock().ok()?;
        series.get(&(mode.as_str(), result.as_str())).cloned()
    }
}

impl AuthzMetrics for InMemoryMetrics {
    fn record_inspection(&self, metric: InspectionMetric) {
        if let Ok(mut series) = self.series.lock() {
            series
                .entry((metric.mode.as_str(), metric.result.as_str()))
                .or_default()
                .observe(metric.latency);
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_places_observations_in_bounded_buckets() {
        let metrics = InMemoryMetrics::new();
        for latency in [Duration::from_micros(400), Duration::from_millis(3), Duration::from_secs(5)] {
            metrics.record_inspection(InspectionMetric {
                mode: EnforcementMode::Enforce,
                result: InspectionResult::Denied,
                latency,
            });
        }
        let histogram =
            metrics.histogram(EnforcementMode::Enforce, InspectionResult::Denied).unwrap_or_default();
        assert_eq!(histogram.count, 3);
        assert_eq!(histogram.buckets[0], 1);
        assert_eq!(histogram.buckets[3], 1);
        assert_eq!(histogram.buckets[INSPECTION_LATENCY_BUCKETS_US.len()], 1);
        assert_eq!(metrics.count(EnforcementMode::Shadow, InspectionResult::Denied), 0);
    }
}
