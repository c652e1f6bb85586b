use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::errors::FlowError;
use crate::core::types::EngineType;

/// Process-wide metrics collector.
///
/// Tracks per-engine call outcomes, translation cache performance,
/// pipeline step durations and run outcomes. Cheap to clone and safe to
/// share across tasks.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Per-engine provider calls
    engines: DashMap<EngineType, EngineCounters>,

    // Cache
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    cache_size: AtomicUsize,

    // Pipeline steps
    analysis_duration_ms: RwLock<Vec<u64>>,
    translation_duration_ms: RwLock<Vec<u64>>,
    rendering_duration_ms: RwLock<Vec<u64>>,

    // Run outcomes
    runs_started: AtomicUsize,
    runs_completed: AtomicUsize,
    runs_failed: AtomicUsize,
    runs_cancelled: AtomicUsize,
    runs_no_text: AtomicUsize,
    overlays_rendered: AtomicUsize,

    circuit_breaker_trips: AtomicUsize,

    start_time: Instant,
}

#[derive(Default)]
struct EngineCounters {
    calls: AtomicUsize,
    successes: AtomicUsize,
    failures: AtomicUsize,
    latency_ms: RwLock<Vec<u64>>,
}

/// Pipeline step a duration belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Analysis,
    Translation,
    Rendering,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                engines: DashMap::new(),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                cache_size: AtomicUsize::new(0),
                analysis_duration_ms: RwLock::new(Vec::new()),
                translation_duration_ms: RwLock::new(Vec::new()),
                rendering_duration_ms: RwLock::new(Vec::new()),
                runs_started: AtomicUsize::new(0),
                runs_completed: AtomicUsize::new(0),
                runs_failed: AtomicUsize::new(0),
                runs_cancelled: AtomicUsize::new(0),
                runs_no_text: AtomicUsize::new(0),
                overlays_rendered: AtomicUsize::new(0),
                circuit_breaker_trips: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // Provider calls
    pub fn record_engine_call(&self, engine: EngineType, success: bool, latency: Duration) {
        let counters = self.inner.engines.entry(engine).or_default();
        counters.calls.fetch_add(1, Ordering::Relaxed);
        if success {
            counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        counters.latency_ms.write().push(latency.as_millis() as u64);
    }

    // Cache
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_cache_size(&self, size: usize) {
        self.inner.cache_size.store(size, Ordering::Relaxed);
    }

    // Steps
    pub fn record_step_duration(&self, step: Step, duration: Duration) {
        let bucket = match step {
            Step::Analysis => &self.inner.analysis_duration_ms,
            Step::Translation => &self.inner.translation_duration_ms,
            Step::Rendering => &self.inner.rendering_duration_ms,
        };
        bucket.write().push(duration.as_millis() as u64);
    }

    // Runs
    pub fn record_run_started(&self) {
        self.inner.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self) {
        self.inner.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self, error: &FlowError) {
        match error {
            FlowError::Cancelled => &self.inner.runs_cancelled,
            FlowError::NoTextFound => &self.inner.runs_no_text,
            _ => &self.inner.runs_failed,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overlay_rendered(&self) {
        self.inner.overlays_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut engines: Vec<EngineSnapshot> = self
            .inner
            .engines
            .iter()
            .map(|entry| {
                let latency = entry.latency_ms.read();
                EngineSnapshot {
                    engine: *entry.key(),
                    calls: entry.calls.load(Ordering::Relaxed),
                    successes: entry.successes.load(Ordering::Relaxed),
                    failures: entry.failures.load(Ordering::Relaxed),
                    latency_avg_ms: avg(&latency),
                    latency_p95_ms: percentile(&latency, 0.95),
                }
            })
            .collect();
        engines.sort_by_key(|e| e.engine.as_str());

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            engines,
            cache_hits,
            cache_misses,
            cache_hit_rate,
            cache_size: self.inner.cache_size.load(Ordering::Relaxed),
            analysis_avg_ms: avg(&self.inner.analysis_duration_ms.read()),
            translation_avg_ms: avg(&self.inner.translation_duration_ms.read()),
            rendering_avg_ms: avg(&self.inner.rendering_duration_ms.read()),
            runs_started: self.inner.runs_started.load(Ordering::Relaxed),
            runs_completed: self.inner.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.inner.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: self.inner.runs_cancelled.load(Ordering::Relaxed),
            runs_no_text: self.inner.runs_no_text.load(Ordering::Relaxed),
            overlays_rendered: self.inner.overlays_rendered.load(Ordering::Relaxed),
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        out.push_str("# HELP engine_calls_total Provider calls per engine\n");
        out.push_str("# TYPE engine_calls_total counter\n");
        for e in &s.engines {
            let _ = writeln!(
                out,
                "engine_calls_total {{engine=\"{}\",outcome=\"success\"}} {}",
                e.engine, e.successes
            );
            let _ = writeln!(
                out,
                "engine_calls_total {{engine=\"{}\",outcome=\"failure\"}} {}",
                e.engine, e.failures
            );
        }

        out.push_str("\n# HELP engine_latency_avg_ms Average provider latency in milliseconds\n");
        out.push_str("# TYPE engine_latency_avg_ms gauge\n");
        for e in &s.engines {
            let _ = writeln!(
                out,
                "engine_latency_avg_ms {{engine=\"{}\"}} {}",
                e.engine, e.latency_avg_ms
            );
        }

        let _ = write!(
            out,
            r#"
# HELP cache_hit_rate Translation cache hit rate (0.0 to 1.0)
# TYPE cache_hit_rate gauge
cache_hit_rate {{}} {}

# HELP cache_size Current translation cache size
# TYPE cache_size gauge
cache_size {{}} {}

# HELP step_avg_duration_ms Average pipeline step duration in milliseconds
# TYPE step_avg_duration_ms gauge
step_avg_duration_ms {{step="analysis"}} {}
step_avg_duration_ms {{step="translation"}} {}
step_avg_duration_ms {{step="rendering"}} {}

# HELP runs_total Flow runs by outcome
# TYPE runs_total counter
runs_total {{outcome="started"}} {}
runs_total {{outcome="completed"}} {}
runs_total {{outcome="failed"}} {}
runs_total {{outcome="cancelled"}} {}
runs_total {{outcome="no_text"}} {}

# HELP overlays_rendered_total Overlays produced by the renderer
# TYPE overlays_rendered_total counter
overlays_rendered_total {{}} {}

# HELP circuit_breaker_trips_total Total engine circuit breaker trips
# TYPE circuit_breaker_trips_total counter
circuit_breaker_trips_total {{}} {}

# HELP uptime_seconds Process uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            s.cache_hit_rate,
            s.cache_size,
            s.analysis_avg_ms,
            s.translation_avg_ms,
            s.rendering_avg_ms,
            s.runs_started,
            s.runs_completed,
            s.runs_failed,
            s.runs_cancelled,
            s.runs_no_text,
            s.overlays_rendered,
            s.circuit_breaker_trips,
            s.uptime_seconds,
        );
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub engine: EngineType,
    pub calls: usize,
    pub successes: usize,
    pub failures: usize,
    pub latency_avg_ms: u64,
    pub latency_p95_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub engines: Vec<EngineSnapshot>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub analysis_avg_ms: u64,
    pub translation_avg_ms: u64,
    pub rendering_avg_ms: u64,
    pub runs_started: usize,
    pub runs_completed: usize,
    pub runs_failed: usize,
    pub runs_cancelled: usize,
    pub runs_no_text: usize,
    pub overlays_rendered: usize,
    pub circuit_breaker_trips: usize,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    pub fn engine(&self, engine: EngineType) -> Option<&EngineSnapshot> {
        self.engines.iter().find(|e| e.engine == engine)
    }
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
