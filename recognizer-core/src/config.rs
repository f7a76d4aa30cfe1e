// Run configuration, validated once and shared read-only for the whole run.

use crate::error::SetupError;
use recognizer_scanner::http_session::default_user_agent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_PAGES: usize = 100;
pub const DEFAULT_MAX_DEPTH: usize = 3;
pub const DEFAULT_OUTPUT_DIR: &str = "recognizer-out";
pub const DEFAULT_FAILURE_THRESHOLD: usize = 5;
pub const DEFAULT_MAX_SCRIPTS_PER_PAGE: usize = 20;
pub const DEFAULT_CAPTURE_BUFFER: usize = 1024;

/// Paths with these extensions are never queued for a visit.
pub const DEFAULT_BLOCKED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "bmp", "avif", "css", "woff", "woff2",
    "ttf", "otf", "eot", "mp3", "mp4", "webm", "avi", "mov", "wav", "ogg", "pdf", "zip", "gz",
    "tgz", "tar", "rar", "7z", "exe", "dmg", "iso", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Structured results document.
    Json,
    /// Line-delimited correlated request records.
    Jsonl,
    /// HTTP Archive covering the whole run.
    Har,
    /// One raw HTTP request text file per request.
    Raw,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "jsonl" | "ndjson" => Some(OutputFormat::Jsonl),
            "har" => Some(OutputFormat::Har),
            "raw" | "txt" => Some(OutputFormat::Raw),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Har => "har",
            OutputFormat::Raw => "raw",
        }
    }
}

/// How a page is allowed to settle after navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Wait for network idle, then a fixed grace period.
    Headless,
    /// Fixed short delay only; idle detection is unreliable with a visible session.
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleTiming {
    pub idle_timeout: Duration,
    pub grace: Duration,
    pub interactive_delay: Duration,
}

impl Default for SettleTiming {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            grace: Duration::from_millis(500),
            interactive_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeConfig {
    /// Only follow links whose host equals the target host.
    pub same_origin: bool,
    /// Wildcard such as `*.example.com`; when set, subdomains of the target
    /// host that match it are in scope too.
    pub subdomain_pattern: Option<String>,
    pub blocked_extensions: Vec<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            same_origin: true,
            subdomain_pattern: None,
            blocked_extensions: DEFAULT_BLOCKED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// Weights for picking the most interesting captured request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub post: i32,
    pub form_body: i32,
    pub json_body: i32,
    pub per_query_param: i32,
    pub max_query_params: usize,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            post: 5,
            form_body: 5,
            json_body: 4,
            per_query_param: 1,
            max_query_params: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: Url,
    pub max_pages: usize,
    pub max_depth: usize,
    pub output_dir: PathBuf,
    pub formats: BTreeSet<OutputFormat>,
    pub scope: ScopeConfig,
    pub delay: Duration,
    pub navigation_timeout: Duration,
    pub stage_timeout: Duration,
    pub mode: RunMode,
    pub settle: SettleTiming,
    pub workers: usize,
    pub technologies: bool,
    pub static_analysis: bool,
    pub forms: bool,
    pub secrets: bool,
    pub max_scripts_per_page: usize,
    pub failure_threshold: usize,
    pub scoring: ScoringWeights,
    pub capture_buffer: usize,
    pub user_agent: String,
    /// Show the terminal spinner while crawling.
    pub show_progress: bool,
}

/// Parse and check a crawl target: http(s) with a host.
pub fn parse_target(target: &str) -> Result<Url, SetupError> {
    let invalid = |reason: String| SetupError::InvalidTarget {
        url: target.to_string(),
        reason,
    };

    let url = Url::parse(target.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

impl RunConfig {
    pub fn new(target: &str) -> Result<Self, SetupError> {
        Ok(Self::for_url(parse_target(target)?))
    }

    pub fn for_url(target: Url) -> Self {
        Self {
            target,
            max_pages: DEFAULT_MAX_PAGES,
            max_depth: DEFAULT_MAX_DEPTH,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            formats: [OutputFormat::Json, OutputFormat::Jsonl].into_iter().collect(),
            scope: ScopeConfig::default(),
            delay: Duration::ZERO,
            navigation_timeout: Duration::from_secs(30),
            stage_timeout: Duration::from_secs(15),
            mode: RunMode::Headless,
            settle: SettleTiming::default(),
            workers: 1,
            technologies: true,
            static_analysis: false,
            forms: true,
            secrets: true,
            max_scripts_per_page: DEFAULT_MAX_SCRIPTS_PER_PAGE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            scoring: ScoringWeights::default(),
            capture_buffer: DEFAULT_CAPTURE_BUFFER,
            user_agent: default_user_agent(),
            show_progress: true,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_formats(mut self, formats: impl IntoIterator<Item = OutputFormat>) -> Self {
        self.formats = formats.into_iter().collect();
        self
    }

    pub fn with_scope(mut self, scope: ScopeConfig) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_settle(mut self, settle: SettleTiming) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_static_analysis(mut self, enabled: bool) -> Self {
        self.static_analysis = enabled;
        self
    }

    pub fn with_technologies(mut self, enabled: bool) -> Self {
        self.technologies = enabled;
        self
    }

    pub fn with_forms(mut self, enabled: bool) -> Self {
        self.forms = enabled;
        self
    }

    pub fn with_secrets(mut self, enabled: bool) -> Self {
        self.secrets = enabled;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringWeights) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn wants(&self, format: OutputFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        parse_target(self.target.as_str())?;

        if self.max_pages == 0 {
            return Err(SetupError::InvalidConfig(
                "max pages must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(SetupError::InvalidConfig(
                "at least one worker is required".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(SetupError::InvalidConfig(
                "failure threshold must be at least 1".to_string(),
            ));
        }
        if self.navigation_timeout.is_zero() {
            return Err(SetupError::InvalidConfig(
                "navigation timeout must be positive".to_string(),
            ));
        }
        if let Some(pattern) = &self.scope.subdomain_pattern
            && (pattern.trim().is_empty()
                || pattern.contains('/')
                || pattern.chars().any(char::is_whitespace))
        {
            return Err(SetupError::InvalidConfig(format!(
                "invalid subdomain pattern '{}'",
                pattern
            )));
        }
        Ok(())
    }

    /// Create the output directory and make sure we can write into it.
    pub fn prepare_output_dir(&self) -> Result<(), SetupError> {
        let dir = self.output_dir.as_path();
        let setup_err = |source| SetupError::OutputDir {
            path: dir.to_path_buf(),
            source,
        };

        fs::create_dir_all(dir).map_err(setup_err)?;
        let probe = dir.join(".write-probe");
        OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&probe)
            .map_err(setup_err)?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }

    pub fn artifact_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.output_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::new("https://example.com").unwrap();
        assert_eq!(config.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.max_scripts_per_page, 20);
        assert!(config.scope.same_origin);
        assert!(config.wants(OutputFormat::Json));
        assert!(config.wants(OutputFormat::Jsonl));
        assert!(!config.wants(OutputFormat::Har));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_targets() {
        assert!(matches!(
            RunConfig::new("not a url"),
            Err(SetupError::InvalidTarget { .. })
        ));
        assert!(matches!(
            RunConfig::new("ftp://example.com"),
            Err(SetupError::InvalidTarget { .. })
        ));
        assert!(matches!(
            RunConfig::new("file:///etc/passwd"),
            Err(SetupError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = RunConfig::new("https://example.com")
            .unwrap()
            .with_max_pages(0);
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));

        let config = RunConfig::new("https://example.com")
            .unwrap()
            .with_workers(0);
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_subdomain_pattern() {
        let scope = ScopeConfig {
            subdomain_pattern: Some("*.example.com/path".to_string()),
            ..ScopeConfig::default()
        };
        let config = RunConfig::new("https://example.com")
            .unwrap()
            .with_scope(scope);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("ndjson"), Some(OutputFormat::Jsonl));
        assert_eq!(OutputFormat::from_str("har"), Some(OutputFormat::Har));
        assert_eq!(OutputFormat::from_str("raw"), Some(OutputFormat::Raw));
        assert_eq!(OutputFormat::from_str("xml"), None);
    }

    #[test]
    fn test_prepare_output_dir_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a").join("b");
        let config = RunConfig::new("https://example.com")
            .unwrap()
            .with_output_dir(&out);
        config.prepare_output_dir().unwrap();
        assert!(out.is_dir());
        assert!(!out.join(".write-probe").exists());
    }

    #[test]
    fn test_prepare_output_dir_fails_on_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = RunConfig::new("https://example.com")
            .unwrap()
            .with_output_dir(file.path());
        assert!(matches!(
            config.prepare_output_dir(),
            Err(SetupError::OutputDir { .. })
        ));
    }
}
