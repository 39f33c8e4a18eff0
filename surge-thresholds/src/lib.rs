#![warn(unused_lifetimes)]
#![forbid(unsafe_code)]

mod evaluator;

pub use evaluator::{ThresholdEvaluator, ThresholdResult, Verdict};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::fmt;
use strum::{EnumString, IntoStaticStr};
use surge_metrics::{MetricKind, MetricValue};

lazy_static! {
    static ref EXPRESSION: Regex = Regex::new(
        r"^\s*(count|rate|avg|min|max|med|p\(\s*(\d+(?:\.\d+)?)\s*\))\s*(<=|>=|==|<|>)\s*(-?\d+(?:\.\d+)?)\s*$"
    )
    .unwrap();
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThresholdError {
    #[error("invalid threshold expression '{expression}' for metric '{metric}'")]
    InvalidExpression { metric: String, expression: String },
    #[error("no threshold expression for metric '{0}'")]
    Empty(String),
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("threshold '{0}' is declared more than once")]
    Duplicate(String),
    #[error("'{aggregation}' can not be used with {kind} metric '{metric}'")]
    AggregationMismatch {
        metric: String,
        aggregation: Aggregation,
        kind: MetricKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
pub enum Comparator {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "==")]
    Eq,
}

impl Comparator {
    pub fn compare(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparator::Lt => observed < limit,
            Comparator::Le => observed <= limit,
            Comparator::Gt => observed > limit,
            Comparator::Ge => observed >= limit,
            Comparator::Eq => observed == limit,
        }
    }
}

impl Display for Comparator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let symbol: &'static str = self.into();
        f.write_str(symbol)
    }
}

/// What to read from a metric before comparing it with the limit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Count,
    Rate,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Aggregation {
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Count => kind == MetricKind::Counter,
            Aggregation::Rate => kind == MetricKind::Rate,
            _ => kind == MetricKind::Trend,
        }
    }

    /// `None` when the metric has nothing to aggregate yet, e.g. percentile of an empty trend
    pub fn observe(&self, value: &MetricValue) -> Option<f64> {
        match (self, value) {
            (Aggregation::Count, MetricValue::Counter(count)) => Some(*count as f64),
            (Aggregation::Rate, MetricValue::Rate { .. }) => value.rate(),
            (Aggregation::Avg, MetricValue::Trend(trend)) => trend.avg(),
            (Aggregation::Min, MetricValue::Trend(trend)) => trend.min(),
            (Aggregation::Max, MetricValue::Trend(trend)) => trend.max(),
            (Aggregation::Med, MetricValue::Trend(trend)) => trend.med(),
            (Aggregation::Percentile(p), MetricValue::Trend(trend)) => trend.percentile(*p),
            _ => None,
        }
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Count => f.write_str("count"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

/// A pass/fail condition over one metric, e.g. `http_req_failed: rate<0.01`
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub aggregation: Aggregation,
    pub comparator: Comparator,
    pub limit: f64,
    pub abort_on_fail: bool,
    expression: String,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdError> {
        let invalid = || ThresholdError::InvalidExpression {
            metric: metric.to_string(),
            expression: expression.to_string(),
        };
        let captures = EXPRESSION.captures(expression).ok_or_else(invalid)?;
        let aggregation = match (captures.get(1), captures.get(2)) {
            (_, Some(percentile)) => {
                let p = f64::from_str(percentile.as_str()).map_err(|_| invalid())?;
                if p > 100f64 {
                    return Err(invalid());
                }
                Aggregation::Percentile(p)
            }
            (Some(name), None) => match name.as_str() {
                "count" => Aggregation::Count,
                "rate" => Aggregation::Rate,
                "avg" => Aggregation::Avg,
                "min" => Aggregation::Min,
                "max" => Aggregation::Max,
                "med" => Aggregation::Med,
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        };
        let comparator = captures
            .get(3)
            .and_then(|c| Comparator::from_str(c.as_str()).ok())
            .ok_or_else(invalid)?;
        let limit = captures
            .get(4)
            .and_then(|l| f64::from_str(l.as_str()).ok())
            .ok_or_else(invalid)?;
        Ok(Threshold {
            metric: metric.to_string(),
            aggregation,
            comparator,
            limit,
            abort_on_fail: false,
            expression: expression.trim().to_string(),
        })
    }

    pub fn with_abort_on_fail(mut self, abort_on_fail: bool) -> Self {
        self.abort_on_fail = abort_on_fail;
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Compare an observed value with the limit
    pub fn check(&self, observed: f64) -> bool {
        self.comparator.compare(observed, self.limit)
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", &self.metric, &self.expression)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(untagged)]
enum ThresholdExpr {
    Plain(String),
    Object {
        threshold: String,
        #[serde(rename = "abortOnFail", default)]
        abort_on_fail: bool,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(untagged)]
enum ThresholdExprShadowType {
    One(ThresholdExpr),
    Many(Vec<ThresholdExpr>),
}

/// All thresholds of a profile, keyed by metric name in the configuration:
///
/// ```json
/// {
///   "http_req_failed": ["rate<0.01"],
///   "http_req_duration": [{"threshold": "p(95)<2000", "abortOnFail": true}]
/// }
/// ```
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
#[serde(try_from = "BTreeMap<String, ThresholdExprShadowType>")]
#[serde(into = "BTreeMap<String, ThresholdExprShadowType>")]
pub struct Thresholds {
    thresholds: Vec<Threshold>,
}

impl Thresholds {
    /// Thresholds are reported by `metric: expression`, so that pair must be unique
    pub fn new(thresholds: Vec<Threshold>) -> Result<Self, ThresholdError> {
        let mut seen = BTreeSet::new();
        for threshold in thresholds.iter() {
            let name = threshold.to_string();
            if !seen.insert(name.clone()) {
                return Err(ThresholdError::Duplicate(name));
            }
        }
        Ok(Self { thresholds })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

impl TryFrom<BTreeMap<String, ThresholdExprShadowType>> for Thresholds {
    type Error = ThresholdError;

    fn try_from(value: BTreeMap<String, ThresholdExprShadowType>) -> Result<Self, Self::Error> {
        let mut thresholds = vec![];
        for (metric, expressions) in value {
            let expressions = match expressions {
                ThresholdExprShadowType::One(expr) => vec![expr],
                ThresholdExprShadowType::Many(exprs) => exprs,
            };
            if expressions.is_empty() {
                return Err(ThresholdError::Empty(metric));
            }
            for expr in expressions {
                let threshold = match expr {
                    ThresholdExpr::Plain(expression) => Threshold::parse(&metric, &expression)?,
                    ThresholdExpr::Object {
                        threshold,
                        abort_on_fail,
                    } => Threshold::parse(&metric, &threshold)?.with_abort_on_fail(abort_on_fail),
                };
                thresholds.push(threshold);
            }
        }
        Thresholds::new(thresholds)
    }
}

impl From<Thresholds> for BTreeMap<String, ThresholdExprShadowType> {
    fn from(value: Thresholds) -> Self {
        let mut map: BTreeMap<String, Vec<ThresholdExpr>> = BTreeMap::new();
        for threshold in value.thresholds {
            let expr = if threshold.abort_on_fail {
                ThresholdExpr::Object {
                    threshold: threshold.expression,
                    abort_on_fail: true,
                }
            } else {
                ThresholdExpr::Plain(threshold.expression)
            };
            map.entry(threshold.metric).or_default().push(expr);
        }
        map.into_iter()
            .map(|(metric, exprs)| (metric, ThresholdExprShadowType::Many(exprs)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use crate::*;
    use test_case::test_case;

    #[test_case("rate<0.01", Aggregation::Rate, Comparator::Lt, 0.01 ; "rate")]
    #[test_case("p(95)<2000", Aggregation::Percentile(95f64), Comparator::Lt, 2000f64 ; "percentile")]
    #[test_case(" p( 99.9 ) <= 1500 ", Aggregation::Percentile(99.9), Comparator::Le, 1500f64 ; "spaces")]
    #[test_case("count>=10", Aggregation::Count, Comparator::Ge, 10f64 ; "count")]
    #[test_case("avg==0", Aggregation::Avg, Comparator::Eq, 0f64 ; "equal")]
    #[test_case("med>-1", Aggregation::Med, Comparator::Gt, -1f64 ; "negative")]
    fn parse_expression(expr: &str, aggregation: Aggregation, comparator: Comparator, limit: f64) {
        let threshold = Threshold::parse("metric", expr).unwrap();
        assert_eq!(threshold.aggregation, aggregation);
        assert_eq!(threshold.comparator, comparator);
        assert_eq!(threshold.limit, limit);
        assert!(!threshold.abort_on_fail);
    }

    #[test_case("rate" ; "no comparator")]
    #[test_case("rate<" ; "no limit")]
    #[test_case("p(101)<5" ; "percentile over 100")]
    #[test_case("p95<5" ; "percentile without parenthesis")]
    #[test_case("rate=<0.1" ; "unknown comparator")]
    #[test_case("sum<5" ; "unknown aggregation")]
    fn reject_expression(expr: &str) {
        assert!(matches!(
            Threshold::parse("metric", expr),
            Err(ThresholdError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn strict_less_than() {
        let threshold = Threshold::parse("http_req_failed", "rate<0.01").unwrap();
        assert!(threshold.check(0.0099));
        assert!(!threshold.check(0.01));
        assert!(!threshold.check(0.5));
    }

    #[test]
    fn deserialize_thresholds() {
        let json = r#"{
            "http_req_failed": ["rate<0.01"],
            "http_req_duration": [{"threshold": "p(95)<2000", "abortOnFail": true}, "avg<500"],
            "iterations": "count>0"
        }"#;
        let thresholds: Thresholds = serde_json::from_str(json).unwrap();
        assert_eq!(thresholds.len(), 4);
        let abort = thresholds
            .iter()
            .filter(|t| t.abort_on_fail)
            .map(|t| t.to_string())
            .collect::<Vec<_>>();
        assert_eq!(abort, vec!["http_req_duration: p(95)<2000".to_string()]);

        let value = serde_json::to_value(&thresholds).unwrap();
        let again: Thresholds = serde_json::from_value(value).unwrap();
        assert_eq!(again, thresholds);
    }

    #[test]
    fn deserialize_invalid_thresholds() {
        let result = serde_json::from_str::<Thresholds>(r#"{"http_req_failed": ["rate<<1"]}"#);
        assert!(result.is_err());
        let result = serde_json::from_str::<Thresholds>(r#"{"http_req_failed": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_thresholds() {
        let result = serde_json::from_str::<Thresholds>(
            r#"{"http_req_failed": ["rate<0.01", {"threshold": "rate<0.01", "abortOnFail": true}]}"#,
        );
        assert!(result.is_err());

        let result = Thresholds::new(vec![
            Threshold::parse("http_req_failed", "rate<0.01").unwrap(),
            Threshold::parse("http_req_failed", "rate<0.01")
                .unwrap()
                .with_abort_on_fail(true),
        ]);
        assert_eq!(
            result,
            Err(ThresholdError::Duplicate(
                "http_req_failed: rate<0.01".to_string()
            ))
        );

        // same metric, different limits
        let thresholds = Thresholds::new(vec![
            Threshold::parse("http_req_duration", "p(95)<2000").unwrap(),
            Threshold::parse("http_req_duration", "p(95)<1000").unwrap(),
        ])
        .unwrap();
        assert_eq!(thresholds.len(), 2);
    }
}
