use recognizer_scanner::ScanError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal problems found before any crawling starts.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Invalid target URL '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Output directory {path} is not writable: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Browser session setup failed: {0}")]
    Session(#[from] ScanError),
}

/// The fixed stages of a page visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Navigate,
    Settle,
    Captcha,
    Technologies,
    StaticAnalysis,
    Forms,
    Secrets,
    Links,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Navigate => "navigate",
            Stage::Settle => "settle",
            Stage::Captcha => "captcha",
            Stage::Technologies => "technologies",
            Stage::StaticAnalysis => "static-analysis",
            Stage::Forms => "forms",
            Stage::Secrets => "secrets",
            Stage::Links => "links",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single visit stage. A failed [`Stage::Navigate`] is what the
/// circuit breaker counts; every other stage failure is local to the visit.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} timed out after {timeout:?}")]
    TimedOut { stage: Stage, timeout: Duration },

    #[error("{stage} failed: {source}")]
    Failed {
        stage: Stage,
        #[source]
        source: ScanError,
    },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::TimedOut { stage, .. } | StageError::Failed { stage, .. } => *stage,
        }
    }

    pub fn is_navigation(&self) -> bool {
        self.stage() == Stage::Navigate
    }
}

/// Failure to persist an artifact.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl EmitError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EmitError::Io {
            path: path.into(),
            source,
        }
    }
}
