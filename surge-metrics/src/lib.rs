mod aggregate;

pub use aggregate::{
    MetricKind, MetricSet, MetricSummary, MetricValue, MetricsSnapshot, TrendSnapshot, CHECKS,
    HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQ_TIMEOUTS, ITERATIONS,
};

use log::trace;
use prometheus::process_collector::ProcessCollector;
use prometheus::{Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

pub const DEFAULT_HISTOGRAM_BUCKET: [f64; 6] = [20f64, 50f64, 100f64, 300f64, 700f64, 1100f64];

#[macro_export]
macro_rules! log_error {
    ($result:expr) => {
        if let Err(e) = $result {
            use log::error;
            error!("{}", e.to_string());
        }
    };
}

/// Result of a single iteration's request. Created once, never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub timestamp: SystemTime,
    pub endpoint: String,
    pub status: Option<u16>,
    pub latency: Duration,
    pub success: bool,
    pub timed_out: bool,
}

impl RequestOutcome {
    /// Label used for per status prometheus series
    pub fn status_label(&self) -> String {
        match self.status {
            Some(status) => status.to_string(),
            None if self.timed_out => "timeout".to_string(),
            None => "error".to_string(),
        }
    }
}

pub struct MetricsFactory {
    registry: Registry,
    metrics: RwLock<HashMap<String, Arc<Metrics>>>,
}

impl Default for MetricsFactory {
    fn default() -> Self {
        let registry = Registry::default();
        let pc = ProcessCollector::for_self();
        let _ = registry.register(Box::new(pc));
        Self {
            registry,
            metrics: RwLock::default(),
        }
    }
}

impl MetricsFactory {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn metrics(&self, job_id: &str) -> prometheus::Result<Arc<Metrics>> {
        self.metrics_with_buckets(Vec::from(DEFAULT_HISTOGRAM_BUCKET), job_id)
            .await
    }

    pub async fn metrics_with_buckets(
        &self,
        buckets: Vec<f64>,
        job_id: &str,
    ) -> prometheus::Result<Arc<Metrics>> {
        {
            if let Some(m) = self.metrics.read().await.get(job_id) {
                return Ok(m.clone());
            }
        }

        let mut write_guard = self.metrics.write().await;
        //retry again to check if another task already created metrics
        if let Some(m) = write_guard.get(job_id) {
            return Ok(m.clone());
        }

        let exporter = Exporter::new(buckets, job_id)?;
        exporter.register(&self.registry)?;
        let metrics = Arc::new(Metrics {
            job_id: job_id.to_string(),
            aggregates: MetricSet::builtin(),
            exporter: Some(exporter),
        });
        write_guard.insert(String::from(job_id), metrics.clone());
        Ok(metrics)
    }

    pub async fn remove_metrics(&self, job_id: &str) {
        let metrics = { self.metrics.write().await.remove(job_id) };
        if let Some(exporter) = metrics.as_ref().and_then(|m| m.exporter.as_ref()) {
            exporter.unregister(&self.registry);
        }
    }
}

/// Prometheus side of a job's metrics
struct Exporter {
    upstream_request_count: IntCounter,
    upstream_request_status_count: IntCounterVec,
    upstream_response_time: HistogramVec,
    vu_active: Gauge,
    vu_target: Gauge,
}

impl Exporter {
    fn new(buckets: Vec<f64>, job_id: &str) -> prometheus::Result<Self> {
        let opts = HistogramOpts::new("upstream_response_time", "upstream response time");
        let mut opts = opts.const_label("job_id", job_id);
        opts.buckets = buckets;
        let upstream_response_time = HistogramVec::new(opts, &["status"])?;

        let opts = Opts::new(
            "upstream_request_status_count",
            "upstream request count per status",
        );
        let opts = opts.const_label("job_id", job_id);
        let upstream_request_status_count = IntCounterVec::new(opts, &["status"])?;

        let opts = Opts::new("upstream_request_count", "request sent to upstream");
        let opts = opts.const_label("job_id", job_id);
        let upstream_request_count = IntCounter::with_opts(opts)?;

        let opts = Opts::new("vu_active", "Number of running virtual users");
        let opts = opts.const_label("job_id", job_id);
        let vu_active = Gauge::with_opts(opts)?;

        let opts = Opts::new("vu_target", "Virtual users requested by the ramp");
        let opts = opts.const_label("job_id", job_id);
        let vu_target = Gauge::with_opts(opts)?;

        Ok(Self {
            upstream_request_count,
            upstream_request_status_count,
            upstream_response_time,
            vu_active,
            vu_target,
        })
    }

    fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.upstream_response_time.clone()))?;
        registry.register(Box::new(self.upstream_request_status_count.clone()))?;
        registry.register(Box::new(self.upstream_request_count.clone()))?;
        registry.register(Box::new(self.vu_active.clone()))?;
        registry.register(Box::new(self.vu_target.clone()))?;
        Ok(())
    }

    fn unregister(&self, registry: &Registry) {
        log_error!(registry.unregister(Box::new(self.upstream_response_time.clone())));
        log_error!(registry.unregister(Box::new(self.upstream_request_status_count.clone())));
        log_error!(registry.unregister(Box::new(self.upstream_request_count.clone())));
        log_error!(registry.unregister(Box::new(self.vu_active.clone())));
        log_error!(registry.unregister(Box::new(self.vu_target.clone())));
    }
}

/// Metrics of a single job: the aggregates thresholds are evaluated against, mirrored to
/// prometheus when created through a [`MetricsFactory`].
pub struct Metrics {
    job_id: String,
    aggregates: MetricSet,
    exporter: Option<Exporter>,
}

impl Metrics {
    /// Metrics that aren't exported anywhere, only aggregated
    pub fn detached(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            aggregates: MetricSet::builtin(),
            exporter: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn aggregates(&self) -> &MetricSet {
        &self.aggregates
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.aggregates.snapshot()
    }

    pub fn record(&self, outcome: &RequestOutcome) {
        trace!(
            "[record] - [{}] - {} - status: {:?}, latency: {:?}, timed out: {}",
            &self.job_id,
            &outcome.endpoint,
            outcome.status,
            outcome.latency,
            outcome.timed_out
        );
        let elapsed = outcome.latency.as_secs_f64() * 1000f64;
        self.aggregates.add(HTTP_REQS, 1);
        self.aggregates.mark(HTTP_REQ_FAILED, !outcome.success);
        self.aggregates.observe(HTTP_REQ_DURATION, elapsed);
        if outcome.timed_out {
            self.aggregates.add(HTTP_REQ_TIMEOUTS, 1);
        }
        if let Some(exporter) = &self.exporter {
            let status = outcome.status_label();
            exporter.upstream_request_count.inc();
            exporter
                .upstream_request_status_count
                .with_label_values(&[status.as_str()])
                .inc();
            exporter
                .upstream_response_time
                .with_label_values(&[status.as_str()])
                .observe(elapsed);
        }
    }

    pub fn check(&self, passed: bool) {
        self.aggregates.mark(CHECKS, passed);
    }

    pub fn iteration_completed(&self) {
        self.aggregates.add(ITERATIONS, 1);
    }

    pub fn vu_active(&self, count: usize) {
        if let Some(exporter) = &self.exporter {
            exporter.vu_active.set(count as f64);
        }
    }

    pub fn vu_target(&self, count: u32) {
        if let Some(exporter) = &self.exporter {
            exporter.vu_target.set(count as f64);
        }
    }
}

pub fn default_histogram_bucket() -> SmallVec<[f64; 6]> {
    smallvec::SmallVec::from(DEFAULT_HISTOGRAM_BUCKET)
}
