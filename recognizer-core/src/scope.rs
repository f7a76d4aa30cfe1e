// Scope rules: which discovered URLs are eligible for a visit.

use crate::config::ScopeConfig;
use recognizer_scanner::links::path_extension;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

/// Normalized form used for dedup: scheme, host, port, path and query with
/// the fragment stripped. Returns `None` for anything that isn't http(s).
pub fn normalize_url(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url.trim()).ok()?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    parsed.host_str()?;
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Dedup key for endpoints: the path only, without query, fragment or
/// trailing slash. Relative paths are accepted as-is.
pub fn endpoint_key(endpoint: &str) -> String {
    let path = match Url::parse(endpoint) {
        Ok(u) => u.path().to_string(),
        Err(_) => endpoint
            .split(['?', '#'])
            .next()
            .unwrap_or(endpoint)
            .to_string(),
    };

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(&pattern.trim().to_ascii_lowercase()).replace(r"\*", "[^.]*");
    Regex::new(&format!("^{}$", escaped)).ok()
}

#[derive(Debug, Clone)]
pub struct Scope {
    base_host: String,
    same_origin: bool,
    subdomains: Option<Regex>,
    blocked_extensions: HashSet<String>,
}

impl Scope {
    pub fn new(start: &Url, config: &ScopeConfig) -> Self {
        Self {
            base_host: start.host_str().unwrap_or_default().to_ascii_lowercase(),
            same_origin: config.same_origin,
            subdomains: config.subdomain_pattern.as_deref().and_then(wildcard_regex),
            blocked_extensions: config
                .blocked_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn base_host(&self) -> &str {
        &self.base_host
    }

    /// Host rule only.
    pub fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if host == self.base_host {
            return true;
        }
        if let Some(pattern) = &self.subdomains
            && host.ends_with(&format!(".{}", self.base_host))
            && pattern.is_match(&host)
        {
            return true;
        }
        !self.same_origin
    }

    pub fn extension_blocked(&self, url: &Url) -> bool {
        path_extension(url.path())
            .map(|ext| self.blocked_extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Full check: http(s), host rule and extension rule.
    pub fn admits(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.host_allowed(host) && !self.extension_blocked(&parsed)
    }
}
