use crate::error::EmitError;
use chrono::{DateTime, Utc};
use recognizer_scanner::{CapturedRequest, CapturedResponse};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One line of the capture log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CaptureLine {
    Page {
        window: usize,
        url: String,
        timestamp: DateTime<Utc>,
    },
    Request {
        seq: u64,
        window: usize,
        asset: bool,
        request: CapturedRequest,
    },
    Response {
        seq: u64,
        window: usize,
        response: CapturedResponse,
    },
    PageEnd {
        window: usize,
    },
}

/// Append-only writer producing one JSON document per line.
pub struct JsonLinesWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: u64,
}

impl JsonLinesWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, EmitError> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| EmitError::io(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn append<T: Serialize>(&mut self, value: &T) -> Result<(), EmitError> {
        serde_json::to_writer(&mut self.writer, value).map_err(|source| {
            if source.is_io() {
                EmitError::io(&self.path, std::io::Error::other(source.to_string()))
            } else {
                EmitError::Serialize {
                    what: "line",
                    source,
                }
            }
        })?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| EmitError::io(&self.path, e))?;
        self.lines += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), EmitError> {
        self.writer.flush().map_err(|e| EmitError::io(&self.path, e))
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Streams a capture log back in. A truncated or malformed line (for
/// example the last line of a crashed run) is skipped.
pub struct CaptureLogReader {
    lines: Lines<BufReader<File>>,
    path: PathBuf,
}

pub fn read_capture_log(path: &Path) -> Result<CaptureLogReader, EmitError> {
    let file = File::open(path).map_err(|e| EmitError::io(path, e))?;
    Ok(CaptureLogReader {
        lines: BufReader::new(file).lines(),
        path: path.to_path_buf(),
    })
}

impl Iterator for CaptureLogReader {
    type Item = CaptureLine;

    fn next(&mut self) -> Option<CaptureLine> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    debug!("Stopped reading {}: {}", self.path.display(), e);
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(parsed) => return Some(parsed),
                Err(e) => debug!("Skipping malformed capture line in {}: {}", self.path.display(), e),
            }
        }
    }
}
