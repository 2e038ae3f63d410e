//! Conversion metrics through the `metrics` facade.
//!
//! No recorder is installed here; applications that want the numbers install
//! an exporter of their choice before converting.

use std::sync::Once;

use metrics::{counter, describe_counter, describe_histogram, histogram};

static DESCRIBE: Once = Once::new();

/// Metrics recorder for conversions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionMetrics;

impl ConversionMetrics {
    /// Create a handle, registering metric descriptions on first use.
    pub fn new() -> Self {
        DESCRIBE.call_once(Self::register_metrics);
        Self
    }

    fn register_metrics() {
        describe_counter!(
            "kana_conversions_total",
            "Total number of conversion calls"
        );
        describe_counter!(
            "kana_conversions_failed",
            "Total number of conversion calls that returned an error"
        );
        describe_counter!(
            "kana_conversions_incomplete",
            "Total number of conversions that hit the step limit"
        );
        describe_histogram!(
            "kana_conversion_latency_ms",
            "Conversion latency in milliseconds"
        );
        describe_histogram!("kana_decode_steps", "Decoder steps per conversion");
    }

    /// Record a conversion call.
    pub fn conversion_started(&self, kind: &'static str) {
        counter!("kana_conversions_total", "model" => kind).increment(1);
    }

    /// Record a failed conversion.
    pub fn conversion_failed(&self, kind: &'static str) {
        counter!("kana_conversions_failed", "model" => kind).increment(1);
    }

    /// Record a truncated conversion.
    pub fn conversion_incomplete(&self, kind: &'static str) {
        counter!("kana_conversions_incomplete", "model" => kind).increment(1);
    }

    /// Record conversion latency.
    pub fn record_latency(&self, ms: f64) {
        histogram!("kana_conversion_latency_ms").record(ms);
    }

    /// Record decoder steps taken.
    pub fn record_decode_steps(&self, steps: usize) {
        histogram!("kana_decode_steps").record(steps as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // All calls are no-ops until a recorder is installed.
        let metrics = ConversionMetrics::new();
        metrics.conversion_started("c2k");
        metrics.conversion_failed("c2k");
        metrics.conversion_incomplete("p2k");
        metrics.record_latency(1.5);
        metrics.record_decode_steps(7);
    }
}
