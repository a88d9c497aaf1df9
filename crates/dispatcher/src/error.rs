//! Errors raised while wiring sinks

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Two sinks share one name, so their metrics cannot be told apart
    #[error("sink name '{0}' is configured more than once")]
    DuplicateSink(String),

    #[error("sink '{sink}' is missing required parameter '{param}'")]
    MissingParam { sink: String, param: &'static str },

    #[error("sink '{sink}' has invalid value '{value}' for parameter '{param}'")]
    InvalidParam {
        sink: String,
        param: &'static str,
        value: String,
    },

    #[error("sink '{sink}' cannot open {path:?}: {source}")]
    OpenOutput {
        sink: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DispatcherError {
    pub fn missing_param(sink: impl Into<String>, param: &'static str) -> Self {
        Self::MissingParam {
            sink: sink.into(),
            param,
        }
    }

    pub fn invalid_param(sink: impl Into<String>, param: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidParam {
            sink: sink.into(),
            param,
            value: value.into(),
        }
    }

    /// Name of the sink the error belongs to
    pub fn sink(&self) -> &str {
        match self {
            Self::DuplicateSink(sink)
            | Self::MissingParam { sink, .. }
            | Self::InvalidParam { sink, .. }
            | Self::OpenOutput { sink, .. } => sink,
        }
    }
}
