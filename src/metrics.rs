//! Request and inference statistics for the predictor service.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const LATENCY_WINDOW: usize = 10_000;

/// Metrics collector shared by all handlers
pub struct ServiceMetrics {
    page_views: AtomicU64,
    random_fills: AtomicU64,
    submissions: AtomicU64,
    predictions: AtomicU64,
    validation_rejections: AtomicU64,
    encoding_errors: AtomicU64,
    inference_errors: AtomicU64,
    /// Number of times the model itself was invoked
    inference_calls: AtomicU64,
    /// Inference times (in microseconds)
    inference_times: RwLock<Vec<u64>>,
    /// Predicted efficiency distribution, 10 % buckets
    value_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            page_views: AtomicU64::new(0),
            random_fills: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
            encoding_errors: AtomicU64::new(0),
            inference_errors: AtomicU64::new(0),
            inference_calls: AtomicU64::new(0),
            inference_times: RwLock::new(Vec::with_capacity(1000)),
            value_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record_page_view(&self) {
        self.page_views.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_random_fill(&self) {
        self.random_fills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_call(&self) {
        self.inference_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_time(&self, elapsed: Duration) {
        if let Ok(mut times) = self.inference_times.write() {
            times.push(elapsed.as_micros() as u64);
            // Keep only the most recent window
            if times.len() > LATENCY_WINDOW {
                times.drain(0..LATENCY_WINDOW / 2);
            }
        }
    }

    pub fn record_prediction(&self, value: f64) {
        self.predictions.fetch_add(1, Ordering::Relaxed);

        let bucket = (value / 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.value_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn record_validation_rejection(&self) {
        self.validation_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encoding_error(&self) {
        self.encoding_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_error(&self) {
        self.inference_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Inference latency statistics over the current window
    pub fn latency_stats(&self) -> LatencyStats {
        let sorted = match self.inference_times.read() {
            Ok(times) if !times.is_empty() => {
                let mut sorted = times.clone();
                sorted.sort_unstable();
                sorted
            }
            _ => return LatencyStats::default(),
        };

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.5),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            page_views: self.page_views.load(Ordering::Relaxed),
            random_fills: self.random_fills.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
            encoding_errors: self.encoding_errors.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            latency: self.latency_stats(),
            value_distribution: self.value_buckets.read().map(|b| *b).unwrap_or_default(),
        }
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let s = self.snapshot();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║       REMOVAL EFFICIENCY PREDICTOR - METRICS SUMMARY         ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Page views: {:>8}  │  Random fills: {:>8}              ║",
            s.page_views, s.random_fills
        );
        info!(
            "║ Submissions: {:>7}  │  Predictions: {:>8}               ║",
            s.submissions, s.predictions
        );
        info!(
            "║ Rejected: validation={} encoding={} inference={}",
            s.validation_rejections, s.encoding_errors, s.inference_errors
        );
        info!(
            "║ Inference (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}",
            s.latency.mean_us, s.latency.p50_us, s.latency.p95_us, s.latency.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Predicted Efficiency Distribution:                           ║");
        let total: u64 = s.value_distribution.iter().sum();
        for (i, &count) in s.value_distribution.iter().enumerate() {
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:>3}-{:<3}%: {:>6} ({:>5.1}%) {}",
                i * 10,
                (i + 1) * 10,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Inference latency statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub page_views: u64,
    pub random_fills: u64,
    pub submissions: u64,
    pub predictions: u64,
    pub validation_rejections: u64,
    pub encoding_errors: u64,
    pub inference_errors: u64,
    pub inference_calls: u64,
    pub latency: LatencyStats,
    pub value_distribution: [u64; 10],
}

/// Periodically logs a metrics summary
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ServiceMetrics::new();

        metrics.record_submission();
        metrics.record_submission();
        metrics.record_validation_rejection();
        metrics.record_inference_call();
        metrics.record_prediction(87.5);

        let s = metrics.snapshot();
        assert_eq!(s.submissions, 2);
        assert_eq!(s.validation_rejections, 1);
        assert_eq!(s.inference_calls, 1);
        assert_eq!(s.predictions, 1);
        assert_eq!(s.value_distribution[8], 1);
    }

    #[test]
    fn test_value_buckets_are_clamped() {
        let metrics = ServiceMetrics::new();
        metrics.record_prediction(-3.0);
        metrics.record_prediction(100.0);
        metrics.record_prediction(250.0);

        let dist = metrics.snapshot().value_distribution;
        assert_eq!(dist[0], 1);
        assert_eq!(dist[9], 2);
    }

    #[test]
    fn test_latency_stats() {
        let metrics = ServiceMetrics::new();
        assert_eq!(metrics.latency_stats().count, 0);

        for us in [100, 200, 300, 400] {
            metrics.record_inference_time(Duration::from_micros(us));
        }
        let stats = metrics.latency_stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_us, 250);
        assert_eq!(stats.p50_us, 300);
        assert_eq!(stats.max_us, 400);
    }
}
