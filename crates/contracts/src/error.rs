//! Layered error definitions
//!
//! Categorized by source: handle / frame / definition / config / sink

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum CaptureError {
    // ===== Handle Errors =====
    /// Handle is nil, disposed, or was issued by a session that has ended
    #[error("invalid {kind} handle '{id}': not present in the current simulation")]
    InvalidHandle { kind: &'static str, id: String },

    /// Sensor exists but is disabled
    #[error("sensor '{sensor}' is disabled")]
    SensorDisabled { sensor: String },

    // ===== Frame Errors =====
    /// Report made outside the frame the sensor was scheduled to capture
    #[error("stale operation on '{target}': {message}")]
    StaleOperation { target: String, message: String },

    /// A capture was already reported for this sensor in this frame
    #[error("capture already reported for sensor '{sensor}' at step {step}")]
    DuplicateCapture { sensor: String, step: u64 },

    /// Async slot already received its value
    #[error("async {kind} '{id}' has already been resolved")]
    AlreadyResolved { kind: &'static str, id: String },

    /// Frame index did not advance
    #[error("frame {frame} does not advance past frame {previous}")]
    NonMonotonicFrame { frame: u64, previous: u64 },

    // ===== Definition Errors =====
    /// Definition id re-registered with different content
    #[error("definition '{id}' is already registered with different content")]
    DuplicateDefinitionConflict { id: String },

    /// Definition id not registered in the current simulation
    #[error("definition '{id}' is not registered in the current simulation")]
    UnknownDefinition { id: String },

    /// Sensor definition rejected at registration
    #[error("invalid sensor definition at '{field}': {message}")]
    InvalidSensorDefinition { field: String, message: String },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl CaptureError {
    /// Create invalid handle error
    pub fn invalid_handle(kind: &'static str, id: impl ToString) -> Self {
        Self::InvalidHandle {
            kind,
            id: id.to_string(),
        }
    }

    /// Create stale operation error
    pub fn stale(target: impl ToString, message: impl Into<String>) -> Self {
        Self::StaleOperation {
            target: target.to_string(),
            message: message.into(),
        }
    }

    /// Create invalid sensor definition error
    pub fn invalid_sensor(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSensorDefinition {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// True for errors that mean the caller referenced something that no longer exists
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Self::InvalidHandle { .. })
    }
}
