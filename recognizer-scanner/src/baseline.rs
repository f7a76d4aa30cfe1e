// Small built-in collaborators so the crawler is usable without plugging in
// external analyzers. Each one looks at a small set of signals.

use crate::analyzers::{
    EndpointAnalyzer, FormInteractor, RuntimeEndpointCollector, SecretScanner, TechnologyDetector,
};
use crate::error::Result;
use crate::links::{is_asset_url, same_origin};
use crate::result::{Endpoint, FormOutcome, Secret, Technology};
use crate::session::{BrowserSession, ObservedCall, PageContent};
use crate::traffic::header_value;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

pub const STATIC_SOURCE: &str = "static";
pub const RUNTIME_SOURCE: &str = "runtime";

static API_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["'`](/(?:api|graphql|rest|v[0-9]+)(?:/[A-Za-z0-9_\-.{}:]*)*)["'`]"#)
        .expect("valid endpoint regex")
});

static SECRET_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("aws_access_key_id", r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
        ("google_api_key", r"\bAIza[0-9A-Za-z_\-]{35}\b"),
        ("github_token", r"\bgh[pousr]_[0-9A-Za-z]{36}\b"),
        ("slack_token", r"\bxox[baprs]-[0-9A-Za-z\-]{10,48}\b"),
        ("private_key", r"-----BEGIN (?:RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid secret regex")))
    .collect()
});

/// Fingerprints from `Server`, `X-Powered-By` and `<meta name="generator">`.
#[derive(Debug, Default, Clone)]
pub struct HeaderTechnologyDetector;

impl HeaderTechnologyDetector {
    fn from_product(token: &str, source: &str) -> Option<Technology> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let mut parts = token.splitn(2, '/');
        let name = parts.next()?.trim();
        let version = parts
            .next()
            .and_then(|v| v.split_whitespace().next())
            .filter(|v| !v.is_empty());
        let tech = Technology::new(name, source);
        Some(match version {
            Some(v) => tech.with_version(v),
            None => tech,
        })
    }

    fn from_generator(content: &str) -> Option<Technology> {
        let content = content.trim();
        let (name, version) = match content.rsplit_once(' ') {
            Some((name, version)) if version.starts_with(|c: char| c.is_ascii_digit()) => {
                (name, Some(version))
            }
            _ => (content, None),
        };
        if name.is_empty() {
            return None;
        }
        let tech = Technology::new(name, "meta-generator");
        Some(match version {
            Some(v) => tech.with_version(v),
            None => tech,
        })
    }
}

impl TechnologyDetector for HeaderTechnologyDetector {
    fn detect(&self, page: &PageContent) -> Vec<Technology> {
        let mut found = Vec::new();

        if let Some(server) = header_value(&page.headers, "server") {
            found.extend(Self::from_product(server, "server-header"));
        }
        if let Some(powered) = header_value(&page.headers, "x-powered-by") {
            found.extend(
                powered
                    .split(',')
                    .filter_map(|p| Self::from_product(p, "x-powered-by")),
            );
        }

        if !page.html.is_empty() {
            let document = Html::parse_document(&page.html);
            if let Ok(selector) = Selector::parse(r#"meta[name="generator"]"#) {
                found.extend(
                    document
                        .select(&selector)
                        .filter_map(|m| m.value().attr("content"))
                        .filter_map(Self::from_generator),
                );
            }
        }

        found
    }
}

/// Quoted API-looking paths in page or script text.
#[derive(Debug, Default, Clone)]
pub struct InlinePathAnalyzer;

impl EndpointAnalyzer for InlinePathAnalyzer {
    fn analyze(&self, content: &str, _source: &str) -> Vec<Endpoint> {
        API_PATH
            .captures_iter(content)
            .filter_map(|c| c.get(1))
            .map(|m| Endpoint::new(m.as_str(), STATIC_SOURCE))
            .collect()
    }
}

/// Runtime endpoints are the same-origin, non-asset calls other than the
/// document itself.
#[derive(Debug, Default, Clone)]
pub struct ObservedCallCollector;

impl RuntimeEndpointCollector for ObservedCallCollector {
    fn collect(&self, page_url: &str, calls: &[ObservedCall]) -> Vec<Endpoint> {
        calls
            .iter()
            .filter(|call| call.url != page_url)
            .filter(|call| same_origin(page_url, &call.url))
            .filter(|call| !is_asset_url(&call.url))
            .map(|call| Endpoint::new(call.url.clone(), RUNTIME_SOURCE).with_method(call.method.clone()))
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
pub struct PatternSecretScanner;

impl SecretScanner for PatternSecretScanner {
    fn scan(&self, content: &str, source: &str) -> Vec<Secret> {
        let mut secrets = Vec::new();
        for (kind, pattern) in SECRET_PATTERNS.iter() {
            for m in pattern.find_iter(content) {
                secrets.push(Secret::new(*kind, m.as_str(), source));
            }
        }
        secrets
    }
}

/// Counts the user-editable fields of forms on the page. Never submits.
#[derive(Debug, Default, Clone)]
pub struct FormFieldInspector;

impl FormFieldInspector {
    pub fn count_fields(html: &str) -> usize {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse("form input, form select, form textarea") else {
            return 0;
        };
        document
            .select(&selector)
            .filter(|el| {
                !matches!(
                    el.value()
                        .attr("type")
                        .map(|t| t.to_ascii_lowercase())
                        .as_deref(),
                    Some("hidden" | "submit" | "button" | "reset" | "image")
                )
            })
            .count()
    }
}

#[async_trait]
impl FormInteractor for FormFieldInspector {
    async fn process_form(&self, session: &mut dyn BrowserSession) -> Result<FormOutcome> {
        let page = session.content().await?;
        Ok(FormOutcome {
            fields_processed: Self::count_fields(&page.html),
            submitted: false,
        })
    }
}
