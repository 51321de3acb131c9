//! Metric data model.
//!
//! A metric result is a set of [`MetricSeries`]: one time series per distinct
//! name and label combination, as returned by a single backend.

use super::BackendId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use validator::Validate;

/// Kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// A counter that only increases (e.g., request count).
    Counter,
    /// A gauge that can go up or down (e.g., memory usage).
    #[default]
    Gauge,
    /// A histogram for measuring distributions (e.g., request latency).
    Histogram,
    /// A pre-aggregated quantile summary.
    Summary,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Counter => write!(f, "counter"),
            Self::Gauge => write!(f, "gauge"),
            Self::Histogram => write!(f, "histogram"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

/// A single sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Sample timestamp.
    pub timestamp: DateTime<Utc>,
    /// Sample value.
    pub value: f64,
}

impl MetricPoint {
    /// Creates a point.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[derive(Deserialize)]
struct MetricSeriesRepr {
    name: String,
    #[serde(default)]
    kind: MetricKind,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    backend: BackendId,
    #[serde(default)]
    points: Vec<MetricPoint>,
}

impl From<MetricSeriesRepr> for MetricSeries {
    fn from(repr: MetricSeriesRepr) -> Self {
        let mut series = Self {
            name: repr.name,
            kind: repr.kind,
            unit: repr.unit,
            labels: repr.labels,
            backend: repr.backend,
            points: Vec::new(),
        };
        series.extend_points(repr.points);
        series
    }
}

/// A metric time series.
///
/// Points are sorted by timestamp ascending with no duplicate timestamps; when
/// two points share a timestamp the one supplied later wins.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use shared::models::{MetricKind, MetricPoint, MetricSeries};
///
/// let t0 = Utc::now();
/// let series = MetricSeries::new("http_requests_total", MetricKind::Counter)
///     .with_label("method", "GET")
///     .with_points(vec![
///         MetricPoint::new(t0 + Duration::seconds(10), 12.0),
///         MetricPoint::new(t0, 10.0),
///     ]);
///
/// assert_eq!(series.points()[0].value, 10.0);
/// assert!(series.validate_series().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(from = "MetricSeriesRepr")]
pub struct MetricSeries {
    /// The name of the metric (e.g., "`http_requests_total`").
    #[validate(length(min = 1, message = "Metric name cannot be empty"))]
    pub name: String,

    /// The kind of metric.
    pub kind: MetricKind,

    /// Optional unit of the metric (e.g., "bytes", "seconds").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Labels (dimensions) identifying the series.
    pub labels: BTreeMap<String, String>,

    /// Backend the series came from.
    pub backend: BackendId,

    points: Vec<MetricPoint>,
}

/// Errors that can occur during metric validation.
#[derive(Debug, Error)]
pub enum MetricValidationError {
    /// The metric name is empty.
    #[error("Metric name cannot be empty")]
    EmptyName,

    /// A label key is empty.
    #[error("Label key cannot be empty")]
    EmptyLabelKey,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl MetricSeries {
    /// Creates an empty series.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unit: None,
            labels: BTreeMap::new(),
            backend: BackendId::default(),
            points: Vec::new(),
        }
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the source backend.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<BackendId>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Adds points, keeping the series ordered.
    #[must_use]
    pub fn with_points(mut self, points: impl IntoIterator<Item = MetricPoint>) -> Self {
        self.extend_points(points);
        self
    }

    /// The points, ordered by timestamp.
    #[must_use]
    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    /// Adds points. A point whose timestamp already exists replaces the old one.
    pub fn extend_points(&mut self, points: impl IntoIterator<Item = MetricPoint>) {
        for point in points {
            match self
                .points
                .binary_search_by(|p| p.timestamp.cmp(&point.timestamp))
            {
                Ok(idx) => self.points[idx] = point,
                Err(idx) => self.points.insert(idx, point),
            }
        }
    }

    /// Keeps only points inside `[start, end]`.
    pub fn retain_range(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.points
            .retain(|p| p.timestamp >= start && p.timestamp <= end);
    }

    /// Most recent point.
    #[must_use]
    pub fn latest(&self) -> Option<&MetricPoint> {
        self.points.last()
    }

    /// Validates the series.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is empty
    /// - A label key is empty
    pub fn validate_series(&self) -> Result<(), MetricValidationError> {
        if self.name.is_empty() {
            return Err(MetricValidationError::EmptyName);
        }
        if self.labels.keys().any(String::is_empty) {
            return Err(MetricValidationError::EmptyLabelKey);
        }
        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_points_sorted() {
        let series = MetricSeries::new("cpu", MetricKind::Gauge).with_points(vec![
            MetricPoint::new(t0() + Duration::seconds(20), 3.0),
            MetricPoint::new(t0(), 1.0),
            MetricPoint::new(t0() + Duration::seconds(10), 2.0),
        ]);

        let values: Vec<f64> = series.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_duplicate_timestamp_later_wins() {
        let series = MetricSeries::new("cpu", MetricKind::Gauge).with_points(vec![
            MetricPoint::new(t0(), 1.0),
            MetricPoint::new(t0(), 5.0),
        ]);

        assert_eq!(series.points().len(), 1);
        assert_eq!(series.points()[0].value, 5.0);
    }

    #[test]
    fn test_deserialization_normalizes_points() {
        let json = r#"{
            "name": "mem",
            "kind": "gauge",
            "labels": {"host": "a"},
            "points": [
                {"timestamp": "2024-01-15T10:00:10Z", "value": 2.0},
                {"timestamp": "2024-01-15T10:00:00Z", "value": 1.0},
                {"timestamp": "2024-01-15T10:00:10Z", "value": 3.0}
            ]
        }"#;
        let series: MetricSeries = serde_json::from_str(json).unwrap();

        assert_eq!(series.points().len(), 2);
        assert_eq!(series.latest().unwrap().value, 3.0);
    }

    #[test]
    fn test_retain_range() {
        let mut series = MetricSeries::new("cpu", MetricKind::Gauge).with_points(vec![
            MetricPoint::new(t0(), 1.0),
            MetricPoint::new(t0() + Duration::minutes(10), 2.0),
        ]);
        series.retain_range(t0() - Duration::minutes(1), t0() + Duration::minutes(1));

        assert_eq!(series.points().len(), 1);
    }

    #[test]
    fn test_validation_empty_name() {
        let series = MetricSeries::new("", MetricKind::Counter);
        assert!(matches!(
            series.validate_series(),
            Err(MetricValidationError::EmptyName)
        ));
    }

    #[test]
    fn test_validation_empty_label_key() {
        let series = MetricSeries::new("cpu", MetricKind::Counter).with_label("", "x");
        assert!(matches!(
            series.validate_series(),
            Err(MetricValidationError::EmptyLabelKey)
        ));
    }

    #[test]
    fn test_metric_kind_display() {
        assert_eq!(MetricKind::Counter.to_string(), "counter");
        assert_eq!(MetricKind::Summary.to_string(), "summary");
    }
}
