//! In-process metric aggregates read by thresholds.
//!
//! Every update is additive: counters and rates are plain atomic accumulations and trends only
//! ever append, so concurrent virtual users can record without coordinating with each other.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::{cmp, fmt};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_TIMEOUTS: &str = "http_req_timeouts";
pub const ITERATIONS: &str = "iterations";
pub const CHECKS: &str = "checks";

#[derive(Debug, Serialize, Copy, Clone, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Counter => "counter",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Aggregate {
    Counter(AtomicU64),
    Rate { hits: AtomicU64, total: AtomicU64 },
    Trend(Mutex<Vec<f64>>),
}

impl Aggregate {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Aggregate::Counter(AtomicU64::new(0)),
            MetricKind::Rate => Aggregate::Rate {
                hits: AtomicU64::new(0),
                total: AtomicU64::new(0),
            },
            MetricKind::Trend => Aggregate::Trend(Mutex::new(Vec::new())),
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            Aggregate::Counter(_) => MetricKind::Counter,
            Aggregate::Rate { .. } => MetricKind::Rate,
            Aggregate::Trend(_) => MetricKind::Trend,
        }
    }

    fn value(&self) -> MetricValue {
        match self {
            Aggregate::Counter(count) => MetricValue::Counter(count.load(Ordering::Acquire)),
            Aggregate::Rate { hits, total } => {
                // read total first, a concurrent writer bumps hits before total
                let total = total.load(Ordering::Acquire);
                let hits = hits.load(Ordering::Acquire);
                MetricValue::Rate {
                    hits: cmp::min(hits, total),
                    total,
                }
            }
            Aggregate::Trend(samples) => {
                MetricValue::Trend(TrendSnapshot::from_samples(samples.lock().clone()))
            }
        }
    }
}

/// Named set of aggregates for a single run. Names are fixed at construction, only values change.
#[derive(Debug)]
pub struct MetricSet {
    aggregates: BTreeMap<String, Aggregate>,
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MetricSet {
    pub fn builtin() -> Self {
        Self::with_metrics([
            (HTTP_REQS, MetricKind::Counter),
            (HTTP_REQ_FAILED, MetricKind::Rate),
            (HTTP_REQ_DURATION, MetricKind::Trend),
            (HTTP_REQ_TIMEOUTS, MetricKind::Counter),
            (ITERATIONS, MetricKind::Counter),
            (CHECKS, MetricKind::Rate),
        ])
    }

    pub fn with_metrics<'a>(metrics: impl IntoIterator<Item = (&'a str, MetricKind)>) -> Self {
        let aggregates = metrics
            .into_iter()
            .map(|(name, kind)| (name.to_string(), Aggregate::new(kind)))
            .collect();
        Self { aggregates }
    }

    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.aggregates.get(name).map(Aggregate::kind)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.aggregates.keys().map(String::as_str)
    }

    /// Add to a counter. Unknown names and kind mismatches are ignored.
    pub fn add(&self, name: &str, increment: u64) {
        if let Some(Aggregate::Counter(count)) = self.aggregates.get(name) {
            count.fetch_add(increment, Ordering::AcqRel);
        }
    }

    /// Record one observation into a rate; `hit` counts towards the numerator.
    pub fn mark(&self, name: &str, hit: bool) {
        if let Some(Aggregate::Rate { hits, total }) = self.aggregates.get(name) {
            if hit {
                hits.fetch_add(1, Ordering::AcqRel);
            }
            total.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn observe(&self, name: &str, value: f64) {
        if let Some(Aggregate::Trend(samples)) = self.aggregates.get(name) {
            samples.lock().push(value);
        }
    }

    pub fn value(&self, name: &str) -> Option<MetricValue> {
        self.aggregates.get(name).map(Aggregate::value)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let values = self
            .aggregates
            .iter()
            .map(|(name, aggregate)| (name.clone(), aggregate.value()))
            .collect();
        MetricsSnapshot { values }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Rate { hits: u64, total: u64 },
    Trend(TrendSnapshot),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Rate { .. } => MetricKind::Rate,
            MetricValue::Trend(_) => MetricKind::Trend,
        }
    }

    /// hits/total; a rate with no observation is 0
    pub fn rate(&self) -> Option<f64> {
        match self {
            MetricValue::Rate { total: 0, .. } => Some(0f64),
            MetricValue::Rate { hits, total } => Some(*hits as f64 / *total as f64),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            MetricValue::Counter(count) => Some(*count),
            _ => None,
        }
    }

    pub fn trend(&self) -> Option<&TrendSnapshot> {
        match self {
            MetricValue::Trend(trend) => Some(trend),
            _ => None,
        }
    }

    pub fn summary(&self) -> MetricSummary {
        match self {
            MetricValue::Counter(count) => MetricSummary::Counter { count: *count },
            MetricValue::Rate { hits, total } => MetricSummary::Rate {
                rate: self.rate().unwrap_or_default(),
                hits: *hits,
                total: *total,
            },
            MetricValue::Trend(trend) => MetricSummary::Trend {
                count: trend.len(),
                avg: trend.avg(),
                min: trend.min(),
                med: trend.med(),
                max: trend.max(),
                p90: trend.percentile(90f64),
                p95: trend.percentile(95f64),
            },
        }
    }
}

/// Copy of every sample of a trend, in the order they were recorded
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrendSnapshot {
    samples: Vec<f64>,
}

impl TrendSnapshot {
    pub fn from_samples(samples: Vec<f64>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`.
    ///
    /// Samples are ordered with a stable sort, equal values keep their insertion order.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() || !(0f64..=100f64).contains(&p) {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let rank = ((p / 100f64) * n as f64).ceil() as usize;
        let idx = rank.clamp(1, n) - 1;
        sorted.get(idx).copied()
    }

    pub fn med(&self) -> Option<f64> {
        self.percentile(50f64)
    }

    pub fn avg(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.samples.iter().copied().min_by(f64::total_cmp)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().max_by(f64::total_cmp)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetricSummary {
    Counter {
        count: u64,
    },
    Rate {
        rate: f64,
        hits: u64,
        total: u64,
    },
    Trend {
        count: usize,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
    },
}

/// Point-in-time copy of a [`MetricSet`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsSnapshot {
    values: BTreeMap<String, MetricValue>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricValue)> {
        self.values.iter()
    }

    pub fn summary(&self) -> BTreeMap<String, MetricSummary> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.summary()))
            .collect()
    }
}

impl FromIterator<(String, MetricValue)> for MetricsSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, MetricValue)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn percentile_nearest_rank() {
        let trend = TrendSnapshot::from_samples((1..=100).rev().map(f64::from).collect());
        assert_eq!(trend.percentile(95f64), Some(95f64));
        assert_eq!(trend.percentile(50f64), Some(50f64));
        assert_eq!(trend.percentile(100f64), Some(100f64));
        assert_eq!(trend.percentile(0f64), Some(1f64));
        assert_eq!(trend.percentile(101f64), None);

        let trend = TrendSnapshot::from_samples(vec![300f64, 100f64, 200f64]);
        assert_eq!(trend.med(), Some(200f64));
        assert_eq!(trend.percentile(95f64), Some(300f64));
        assert_eq!(trend.min(), Some(100f64));
        assert_eq!(trend.max(), Some(300f64));
        assert_eq!(trend.avg(), Some(200f64));
        assert_eq!(TrendSnapshot::default().percentile(50f64), None);
    }

    #[test]
    fn rate_without_observation_is_zero() {
        let set = MetricSet::builtin();
        assert_eq!(set.value(HTTP_REQ_FAILED).unwrap().rate(), Some(0f64));
        set.mark(HTTP_REQ_FAILED, true);
        set.mark(HTTP_REQ_FAILED, false);
        set.mark(HTTP_REQ_FAILED, false);
        set.mark(HTTP_REQ_FAILED, false);
        assert_eq!(set.value(HTTP_REQ_FAILED).unwrap().rate(), Some(0.25f64));
    }

    #[test]
    fn kind_mismatch_is_ignored() {
        let set = MetricSet::builtin();
        set.add(HTTP_REQ_DURATION, 5);
        set.observe(HTTP_REQS, 10f64);
        set.mark("unknown", true);
        assert_eq!(set.value(HTTP_REQS), Some(MetricValue::Counter(0)));
        assert_eq!(
            set.value(HTTP_REQ_DURATION),
            Some(MetricValue::Trend(TrendSnapshot::default()))
        );
        assert_eq!(set.kind("unknown"), None);
        assert_eq!(set.kind(CHECKS), Some(MetricKind::Rate));
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let set = Arc::new(MetricSet::builtin());
        let handles = (0..8)
            .map(|i| {
                let set = set.clone();
                std::thread::spawn(move || {
                    for j in 0..1000 {
                        set.add(HTTP_REQS, 1);
                        set.mark(HTTP_REQ_FAILED, j % 10 == 0);
                        set.observe(HTTP_REQ_DURATION, (i * 1000 + j) as f64);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = set.snapshot();
        assert_eq!(snapshot.get(HTTP_REQS).unwrap().count(), Some(8000));
        assert_eq!(
            snapshot.get(HTTP_REQ_FAILED),
            Some(&MetricValue::Rate {
                hits: 800,
                total: 8000
            })
        );
        assert_eq!(
            snapshot.get(HTTP_REQ_DURATION).unwrap().trend().unwrap().len(),
            8000
        );
    }
}
