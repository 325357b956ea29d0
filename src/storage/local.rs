//! Local filesystem output.
//!
//! ## Layout
//!
//! ```text
//! {cwd}/
//! ├── resume.cfg        # checkpoint, rewritten atomically
//! └── <output file>     # one result per line (optional, stdout by default)
//! ```

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{DisplayOptions, ProbeResult};
use crate::storage::ResultSink;

/// Write bytes atomically (write to temp, then rename).
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read bytes, returning None if the file doesn't exist.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Remove a file, ignoring a missing one.
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// How each result is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// URL followed by bracketed metadata
    Line,
    /// One JSON object per line
    Json,
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-oriented sink writing to stdout or a file.
pub struct LineSink {
    display: DisplayOptions,
    format: OutputFormat,
    writer: Mutex<Writer>,
}

impl LineSink {
    pub fn new(writer: Writer, display: DisplayOptions, format: OutputFormat) -> Self {
        Self {
            display,
            format,
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout(display: DisplayOptions, format: OutputFormat) -> Self {
        Self::new(Box::new(tokio::io::stdout()), display, format)
    }

    /// Create (truncate) `path` and write results into it.
    pub async fn file(path: &Path, display: DisplayOptions, format: OutputFormat) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::new(Box::new(file), display, format))
    }

    fn render(&self, result: &ProbeResult) -> Result<Option<String>> {
        match self.format {
            OutputFormat::Line => Ok(result.render_line(&self.display)),
            OutputFormat::Json => {
                if !result.is_success() && !self.display.probe {
                    return Ok(None);
                }
                Ok(Some(serde_json::to_string(result)?))
            }
        }
    }
}

#[async_trait]
impl ResultSink for LineSink {
    async fn emit(&self, result: &ProbeResult) -> Result<()> {
        let Some(mut line) = self.render(result)? else {
            return Ok(());
        };
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        Ok(())
    }
}
