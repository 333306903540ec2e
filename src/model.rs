//! Data model for the staging pipeline.
//!
//! Raw producer lines are opaque UTF-8 text that should, but is not
//! guaranteed to, carry a structured JSON payload. Lines that fail to parse
//! are wrapped verbatim as a bare message so a bad producer never poisons a
//! batch. Workers later enrich validated payloads into records for the
//! durable store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log severity levels accepted by the durable store schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogType {
    /// Get all valid log types.
    pub fn all() -> &'static [LogType] {
        &[
            LogType::Debug,
            LogType::Info,
            LogType::Warning,
            LogType::Error,
            LogType::Critical,
        ]
    }

    /// Parse a producer-supplied log type string.
    ///
    /// Matching is exact on the lowercase wire form; anything else is not a
    /// member of the enum.
    pub fn parse(value: &str) -> Option<LogType> {
        match value {
            "debug" => Some(LogType::Debug),
            "info" => Some(LogType::Info),
            "warning" => Some(LogType::Warning),
            "error" => Some(LogType::Error),
            "critical" => Some(LogType::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogType::Debug => write!(f, "debug"),
            LogType::Info => write!(f, "info"),
            LogType::Warning => write!(f, "warning"),
            LogType::Error => write!(f, "error"),
            LogType::Critical => write!(f, "critical"),
        }
    }
}

/// Parsed-or-wrapped form of a raw producer line.
///
/// A structured line carries all four fields; a wrapped line carries only the
/// raw text as its message. Validation happens later, in the worker; the
/// drainer never rejects a line for its shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Name of the producing application, used for reference resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    /// Log message content
    pub message: String,

    /// Producer-asserted event time, as supplied on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Producer-supplied log type, validated against `LogType` later
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_type: Option<String>,
}

impl JobPayload {
    /// Attempt a structured parse of a raw line, wrapping the verbatim text
    /// as a bare message when the line is not a well-formed payload.
    ///
    /// This never fails: parse errors are not fatal to a batch.
    pub fn parse_or_wrap(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self::wrapped(raw))
    }

    /// Wrap an unparseable line, preserving the raw text verbatim.
    pub fn wrapped(raw: &str) -> Self {
        Self {
            app_name: None,
            message: raw.to_string(),
            timestamp: None,
            log_type: None,
        }
    }
}

/// Errors raised when an enriched record fails schema validation.
///
/// A validation failure is structural: retrying the same payload without
/// upstream correction reproduces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is absent from the payload
    MissingField(&'static str),

    /// Message is shorter than the configured minimum
    MessageTooShort { len: usize, min: usize },

    /// Log type is not a member of the `LogType` enum
    UnknownLogType(String),

    /// Timestamp could not be coerced to an RFC 3339 instant
    InvalidTimestamp(String),

    /// Resolved application identifier has an invalid format
    InvalidAppId(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(field) => {
                write!(f, "missing required field '{}'", field)
            }
            ValidationError::MessageTooShort { len, min } => {
                write!(f, "message length {} is below minimum {}", len, min)
            }
            ValidationError::UnknownLogType(value) => {
                write!(f, "unknown log type '{}'", value)
            }
            ValidationError::InvalidTimestamp(value) => {
                write!(f, "timestamp '{}' is not a valid RFC 3339 instant", value)
            }
            ValidationError::InvalidAppId(value) => {
                write!(f, "application id '{}' has an invalid format", value)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A validated log record ready for the durable store.
///
/// `timestamp` is the producer-asserted event time; `ingested_at` is the
/// pipeline-assigned processing time, stamped exactly once at successful
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedLogRecord {
    /// Resolved identifier of the owning application
    pub app_id: String,

    /// Name of the producing application
    pub app_name: String,

    /// Log message content
    pub message: String,

    /// Validated log severity
    pub log_type: LogType,

    /// Producer-asserted event time
    pub timestamp: DateTime<Utc>,

    /// Pipeline-assigned processing time
    pub ingested_at: DateTime<Utc>,
}

impl EnrichedLogRecord {
    /// Enrich a payload with its resolved application id and validate the
    /// result against the record schema.
    ///
    /// `ingested_at` is assigned here, at validation time, never earlier in
    /// the pipeline.
    pub fn enrich(
        payload: &JobPayload,
        app_id: &str,
        min_message_len: usize,
    ) -> Result<Self, ValidationError> {
        if app_id.is_empty()
            || !app_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidAppId(app_id.to_string()));
        }

        let app_name = match payload.app_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(ValidationError::MissingField("app_name")),
        };

        if payload.message.len() < min_message_len {
            return Err(ValidationError::MessageTooShort {
                len: payload.message.len(),
                min: min_message_len,
            });
        }

        let log_type = match payload.log_type.as_deref() {
            Some(value) => {
                LogType::parse(value).ok_or_else(|| ValidationError::UnknownLogType(value.to_string()))?
            }
            None => return Err(ValidationError::MissingField("log_type")),
        };

        let timestamp = match payload.timestamp.as_deref() {
            Some(value) => DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| ValidationError::InvalidTimestamp(value.to_string()))?,
            None => return Err(ValidationError::MissingField("timestamp")),
        };

        Ok(Self {
            app_id: app_id.to_string(),
            app_name,
            message: payload.message.clone(),
            log_type,
            timestamp,
            ingested_at: Utc::now(),
        })
    }
}
