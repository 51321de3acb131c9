//! Log data model.
//!
//! Defines the normalized `LogRecord` every backend's log results are
//! converted into.

use super::attribute::{AttributeValue, Attributes};
use super::BackendId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

/// Log severity.
///
/// Ordered from least to most severe, so `severity >= Severity::Warn` selects
/// warnings and worse.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Detailed trace information.
    Trace,
    /// Debug information.
    Debug,
    /// Informational messages.
    #[default]
    Info,
    /// Warning conditions.
    Warn,
    /// Error conditions.
    Error,
    /// Critical/fatal conditions.
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Error returned when parsing an unknown severity name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown severity '{0}'")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" | "information" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" | "critical" => Ok(Self::Fatal),
            other => Err(ParseSeverityError(other.to_string())),
        }
    }
}

/// A single log record.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use shared::models::{LogRecord, Severity};
///
/// let log = LogRecord::new(Utc::now(), Severity::Error, "Payment declined", "checkout")
///     .with_trace_id("4bf92f3577b34da6")
///     .with_attribute("order_id", "o-991");
///
/// assert!(log.validate_record().is_ok());
/// assert!(log.trace_id.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LogRecord {
    /// Timestamp when the log event occurred.
    pub timestamp: DateTime<Utc>,

    /// Severity of the record.
    #[serde(default)]
    pub severity: Severity,

    /// The log body.
    #[validate(length(min = 1, message = "Body cannot be empty"))]
    pub body: String,

    /// Name of the service that emitted the record.
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service: String,

    /// Additional key-value attributes.
    #[serde(default)]
    pub attributes: Attributes,

    /// Optional trace ID for correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Optional span ID for correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Backend the record came from.
    #[serde(default)]
    pub backend: BackendId,

    /// Identifier assigned by the backend, if it exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

/// Errors that can occur during log record validation.
#[derive(Debug, Error)]
pub enum LogValidationError {
    /// The body is empty.
    #[error("Log body cannot be empty")]
    EmptyBody,

    /// The service name is empty.
    #[error("Service name cannot be empty")]
    EmptyService,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl LogRecord {
    /// Creates a new log record.
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        severity: Severity,
        body: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            severity,
            body: body.into(),
            service: service.into(),
            attributes: Attributes::new(),
            trace_id: None,
            span_id: None,
            backend: BackendId::default(),
            record_id: None,
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the trace ID.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Sets the span ID.
    #[must_use]
    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    /// Sets the native record id.
    #[must_use]
    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Sets the source backend.
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<BackendId>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Validates the record.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The body is empty
    /// - The service name is empty
    pub fn validate_record(&self) -> Result<(), LogValidationError> {
        if self.body.is_empty() {
            return Err(LogValidationError::EmptyBody);
        }
        if self.service.is_empty() {
            return Err(LogValidationError::EmptyService);
        }
        self.validate()?;
        Ok(())
    }
}
