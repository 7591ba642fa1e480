//! Runtime metrics registry: in-process counters, gauges, and
//! histograms. Exposes a Prometheus text-format
//! export so operators get the usual `/metrics` scrape target without a
//! dedicated dependency: the render is a handful of lines of plain-text
//! formatting, not a wire protocol worth pulling in a crate for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A counter or gauge stored as bits of an `f64`, so it can live behind
/// an `AtomicU64` without a mutex.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        loop {
            let current = self.0.load(Ordering::Relaxed);
            let updated = (f64::from_bits(current) + delta).to_bits();
            if self
                .0
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}

#[derive(Debug, Default)]
struct Histogram {
    sample_count: AtomicU64,
    sum: AtomicF64,
    bucket_bounds: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
}

impl Histogram {
    fn new(bounds: Vec<f64>) -> Self {
        let bucket_counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            sample_count: AtomicU64::new(0),
            sum: AtomicF64::new(0.0),
            bucket_bounds: bounds,
            bucket_counts,
        }
    }

    fn observe(&self, value: f64) {
        self.sample_count.fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
        for (bound, count) in self.bucket_bounds.iter().zip(self.bucket_counts.iter()) {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Default millisecond-scale latency buckets, suitable for step/pipeline
/// duration histograms and timeout budgets.
fn default_latency_buckets() -> Vec<f64> {
    vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 5_000.0, 30_000.0]
}

/// Thread-safe registry of counters, gauges, and histograms. One instance
/// is shared across the orchestrator, rule engine, and audit manager.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, AtomicF64>>,
    gauges: RwLock<HashMap<String, AtomicF64>>,
    histograms: RwLock<HashMap<String, Histogram>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, name: &str, delta: f64) {
        let guard = self.counters.read().unwrap();
        if let Some(counter) = guard.get(name) {
            counter.add(delta);
            return;
        }
        drop(guard);
        let mut guard = self.counters.write().unwrap();
        guard.entry(name.to_string()).or_insert_with(|| AtomicF64::new(0.0)).add(delta);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        let guard = self.gauges.read().unwrap();
        if let Some(gauge) = guard.get(name) {
            gauge.store(value);
            return;
        }
        drop(guard);
        let mut guard = self.gauges.write().unwrap();
        guard.entry(name.to_string()).or_insert_with(|| AtomicF64::new(0.0)).store(value);
    }

    pub fn observe_histogram(&self, name: &str, value: f64) {
        let guard = self.histograms.read().unwrap();
        if let Some(histogram) = guard.get(name) {
            histogram.observe(value);
            return;
        }
        drop(guard);
        let mut guard = self.histograms.write().unwrap();
        guard
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(default_latency_buckets()))
            .observe(value);
    }

    #[must_use]
    pub fn counter_value(&self, name: &str) -> f64 {
        self.counters.read().unwrap().get(name).map_or(0.0, AtomicF64::load)
    }

    #[must_use]
    pub fn gauge_value(&self, name: &str) -> f64 {
        self.gauges.read().unwrap().get(name).map_or(0.0, AtomicF64::load)
    }

    /// Render all registered metrics in Prometheus exposition text format.
    #[must_use]
    pub fn render_prometheus_text(&self) -> String {
        let mut out = String::new();

        let counters = self.counters.read().unwrap();
        let mut names: Vec<_> = counters.keys().collect();
        names.sort();
        for name in names {
            let metric = sanitize_metric_name(name);
            out.push_str(&format!("# TYPE {metric} counter\n{metric} {}\n", counters[name].load()));
        }

        let gauges = self.gauges.read().unwrap();
        let mut names: Vec<_> = gauges.keys().collect();
        names.sort();
        for name in names {
            let metric = sanitize_metric_name(name);
            out.push_str(&format!("# TYPE {metric} gauge\n{metric} {}\n", gauges[name].load()));
        }

        let histograms = self.histograms.read().unwrap();
        let mut names: Vec<_> = histograms.keys().collect();
        names.sort();
        for name in names {
            let metric = sanitize_metric_name(name);
            let histogram = &histograms[name];
            out.push_str(&format!("# TYPE {metric} histogram\n"));
            let mut cumulative = 0u64;
            for (bound, count) in histogram.bucket_bounds.iter().zip(histogram.bucket_counts.iter()) {
                cumulative += count.load(Ordering::Relaxed);
                out.push_str(&format!("{metric}_bucket{{le=\"{bound}\"}} {cumulative}\n"));
            }
            let total = histogram.sample_count.load(Ordering::Relaxed);
            out.push_str(&format!("{metric}_bucket{{le=\"+Inf\"}} {total}\n"));
            out.push_str(&format!("{metric}_sum {}\n", histogram.sum.load()));
            out.push_str(&format!("{metric}_count {total}\n"));
        }

        out
    }
}

fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let registry = MetricsRegistry::new();
        registry.increment_counter("decisions_total", 1.0);
        registry.increment_counter("decisions_total", 2.0);
        assert_eq!(registry.counter_value("decisions_total"), 3.0);
    }

    #[test]
    fn gauge_overwrites() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("queue_depth", 4.0);
        registry.set_gauge("queue_depth", 9.0);
        assert_eq!(registry.gauge_value("queue_depth"), 9.0);
    }

    #[test]
    fn histogram_renders_buckets_and_count() {
        let registry = MetricsRegistry::new();
        registry.observe_histogram("step_duration_ms", 12.0);
        registry.observe_histogram("step_duration_ms", 600.0);
        let text = registry.render_prometheus_text();
        assert!(text.contains("step_duration_ms_count 2"));
        assert!(text.contains("step_duration_ms_bucket{le=\"+Inf\"} 2"));
    }

    #[test]
    fn sanitizes_dotted_names() {
        assert_eq!(sanitize_metric_name("agent.decisions.count"), "agent_decisions_count");
    }
}
