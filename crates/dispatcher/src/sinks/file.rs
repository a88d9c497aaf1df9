//! FileSink - appends events to a JSON Lines file

use contracts::{CaptureError, DataSink, DatasetEvent};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

use crate::error::DispatcherError;

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output file, one event per line
    pub path: PathBuf,

    /// Append to an existing file instead of truncating it
    pub append: bool,
}

impl FileSinkConfig {
    /// Create config from the params of sink `sink` (`path`, optional `append`)
    pub fn from_params(sink: &str, params: &HashMap<String, String>) -> Result<Self, DispatcherError> {
        let path = params
            .get("path")
            .map(PathBuf::from)
            .ok_or_else(|| DispatcherError::missing_param(sink, "path"))?;
        let append = match params.get("append").map(|value| value.to_ascii_lowercase()) {
            None => false,
            Some(value) if value == "true" => true,
            Some(value) if value == "false" => false,
            Some(value) => return Err(DispatcherError::invalid_param(sink, "append", value)),
        };

        Ok(Self { path, append })
    }
}

/// Sink that writes each event as a JSON line
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: Option<BufWriter<File>>,
    lines: u64,
}

impl FileSink {
    /// Create a new FileSink, creating parent directories as needed
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> Result<Self, DispatcherError> {
        let name = name.into();
        let file = Self::open(&config).map_err(|source| DispatcherError::OpenOutput {
            sink: name.clone(),
            path: config.path.clone(),
            source,
        })?;

        Ok(Self {
            name,
            config,
            writer: Some(BufWriter::new(file)),
            lines: 0,
        })
    }

    /// Create from the params of a configured sink
    pub fn from_params(name: &str, params: &HashMap<String, String>) -> Result<Self, DispatcherError> {
        let config = FileSinkConfig::from_params(name, params)?;
        Self::new(name, config)
    }

    fn open(config: &FileSinkConfig) -> io::Result<File> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(&config.path)
    }

    pub fn path(&self) -> &PathBuf {
        &self.config.path
    }

    fn write_line(&mut self, event: &DatasetEvent) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sink is closed"))?;
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    fn map_err(&self, e: io::Error) -> CaptureError {
        error!(sink = %self.name, path = %self.config.path.display(), error = %e, "Write failed");
        CaptureError::sink_write(&self.name, e.to_string())
    }
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, event),
        fields(sink = %self.name, event = event.kind())
    )]
    async fn write(&mut self, event: &DatasetEvent) -> Result<(), CaptureError> {
        self.write_line(event).map_err(|e| self.map_err(e))
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), CaptureError> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush().map_err(|e| self.map_err(e)),
            None => Ok(()),
        }
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), CaptureError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| self.map_err(e))?;
        }
        debug!(sink = %self.name, lines = self.lines, "FileSink closed");
        Ok(())
    }
}
