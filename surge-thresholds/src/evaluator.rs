use crate::{Threshold, ThresholdError, Thresholds};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use surge_metrics::{MetricSet, MetricsSnapshot};

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdResult {
    /// Aggregated metric value, absent if the metric had no sample to aggregate
    pub observed: Option<f64>,
    pub passed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub abort_on_fail: bool,
}

/// Outcome of evaluating every threshold of a run against one snapshot
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub per_threshold: BTreeMap<String, ThresholdResult>,
    pub overall_pass: bool,
}

impl Verdict {
    pub fn failed(&self) -> impl Iterator<Item = &String> {
        self.per_threshold
            .iter()
            .filter(|(_, result)| !result.passed)
            .map(|(name, _)| name)
    }

    /// true if a failed threshold asks the run to stop
    pub fn should_abort(&self) -> bool {
        self.per_threshold
            .values()
            .any(|result| result.abort_on_fail && !result.passed)
    }
}

/// Thresholds validated against the metrics of a run
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    thresholds: Vec<Threshold>,
}

impl ThresholdEvaluator {
    /// Fails if a threshold names a metric the set doesn't have, or aggregates it in a way that
    /// doesn't fit the metric's kind (e.g. `p(95)` of a counter).
    pub fn new(thresholds: &Thresholds, metrics: &MetricSet) -> Result<Self, ThresholdError> {
        for threshold in thresholds.iter() {
            let kind = metrics
                .kind(&threshold.metric)
                .ok_or_else(|| ThresholdError::UnknownMetric(threshold.metric.clone()))?;
            if !threshold.aggregation.applies_to(kind) {
                return Err(ThresholdError::AggregationMismatch {
                    metric: threshold.metric.clone(),
                    aggregation: threshold.aggregation,
                    kind,
                });
            }
        }
        Ok(Self {
            thresholds: thresholds.iter().cloned().collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn has_abort_on_fail(&self) -> bool {
        self.thresholds.iter().any(|t| t.abort_on_fail)
    }

    /// Pure function of the snapshot, evaluating twice gives the same verdict.
    ///
    /// A threshold over a metric without samples passes, there is nothing to violate it.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Verdict {
        let mut per_threshold = BTreeMap::new();
        for threshold in self.thresholds.iter() {
            let observed = snapshot
                .get(&threshold.metric)
                .and_then(|value| threshold.aggregation.observe(value));
            let passed = observed.map(|v| threshold.check(v)).unwrap_or(true);
            debug!(
                "[evaluate] - {} - observed: {:?}, passed: {}",
                threshold, observed, passed
            );
            per_threshold.insert(
                threshold.to_string(),
                ThresholdResult {
                    observed,
                    passed,
                    abort_on_fail: threshold.abort_on_fail,
                },
            );
        }
        let overall_pass = per_threshold.values().all(|r| r.passed);
        if !overall_pass {
            info!(
                "[evaluate] - failed thresholds: {:?}",
                per_threshold
                    .iter()
                    .filter(|(_, r)| !r.passed)
                    .map(|(k, _)| k)
                    .collect::<Vec<_>>()
            );
        }
        Verdict {
            per_threshold,
            overall_pass,
        }
    }
}
