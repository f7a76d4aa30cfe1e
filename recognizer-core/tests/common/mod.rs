// Scripted in-memory browser sessions for crawl tests

#![allow(dead_code)]

use async_trait::async_trait;
use recognizer_core::RunConfig;
use recognizer_core::config::SettleTiming;
use recognizer_scanner::error::Result;
use recognizer_scanner::{
    BrowserSession, CapturedRequest, CapturedResponse, ObservedCall, PageContent, ScanError,
    SessionFactory, TrafficTap,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub title: Option<String>,
    pub html: String,
    pub links: Vec<String>,
    /// Requests the page makes after loading; answered with 200 unless
    /// `unanswered` is set.
    pub requests: Vec<CapturedRequest>,
    pub unanswered: bool,
}

impl ScriptedPage {
    pub fn linking_to(links: &[&str]) -> Self {
        Self {
            links: links.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request: CapturedRequest) -> Self {
        self.requests.push(request);
        self
    }
}

/// Serves pages from a fixed map. Any URL not in the map fails navigation.
#[derive(Debug, Default)]
pub struct ScriptedSite {
    pages: Arc<HashMap<String, ScriptedPage>>,
    pub opened: AtomicUsize,
    pub navigations: Arc<AtomicUsize>,
}

impl ScriptedSite {
    pub fn new(pages: Vec<(&str, ScriptedPage)>) -> Self {
        Self {
            pages: Arc::new(
                pages
                    .into_iter()
                    .map(|(url, page)| (url.to_string(), page))
                    .collect(),
            ),
            opened: AtomicUsize::new(0),
            navigations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

pub struct ScriptedSession {
    pages: Arc<HashMap<String, ScriptedPage>>,
    navigations: Arc<AtomicUsize>,
    tap: TrafficTap,
    current: Option<(String, ScriptedPage)>,
    calls: Vec<ObservedCall>,
}

#[async_trait]
impl SessionFactory for ScriptedSite {
    type Session = ScriptedSession;

    async fn open(&self, tap: TrafficTap) -> Result<ScriptedSession> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            pages: self.pages.clone(),
            navigations: self.navigations.clone(),
            tap,
            current: None,
            calls: Vec::new(),
        })
    }
}

impl ScriptedSession {
    fn page(&self) -> Result<&(String, ScriptedPage)> {
        self.current.as_ref().ok_or(ScanError::NoPage)
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.navigations.fetch_add(1, Ordering::SeqCst);
        self.current = None;
        self.calls.clear();

        self.tap.request(CapturedRequest::new("GET", url)).await;
        let Some(page) = self.pages.get(url).cloned() else {
            return Err(ScanError::Navigation {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        };
        self.tap
            .response(CapturedResponse::new("GET", url, 200).with_header("Content-Type", "text/html"))
            .await;

        for request in &page.requests {
            self.tap.request(request.clone()).await;
            let status = if page.unanswered {
                None
            } else {
                self.tap
                    .response(CapturedResponse::new(&request.method, &request.url, 200))
                    .await;
                Some(200)
            };
            self.calls.push(ObservedCall {
                method: request.method.clone(),
                url: request.url.clone(),
                status,
                content_type: None,
            });
        }

        self.current = Some((url.to_string(), page));
        Ok(())
    }

    async fn wait_for_network_idle(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn current_requests(&self) -> Vec<ObservedCall> {
        self.calls.clone()
    }

    async fn title(&mut self) -> Result<Option<String>> {
        Ok(self.page()?.1.title.clone())
    }

    async fn content(&mut self) -> Result<PageContent> {
        let (url, page) = self.page()?;
        Ok(PageContent {
            url: url.clone(),
            status: Some(200),
            headers: Vec::new(),
            html: page.html.clone(),
        })
    }

    async fn script_sources(&mut self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn fetch_script(&mut self, url: &str) -> Result<String> {
        Err(ScanError::Other(format!("no script at {}", url)))
    }

    async fn extract_links(&mut self) -> Result<Vec<String>> {
        let (url, page) = self.page()?;
        let base = url::Url::parse(url).map_err(|e| ScanError::InvalidUrl(e.to_string()))?;
        Ok(page
            .links
            .iter()
            .filter_map(|href| base.join(href).ok())
            .map(|u| u.to_string())
            .collect())
    }
}

/// A config that doesn't wait between stages.
pub fn fast_config(target: &str, output_dir: &Path) -> RunConfig {
    RunConfig::new(target)
        .expect("valid target")
        .with_output_dir(output_dir)
        .with_settle(SettleTiming {
            idle_timeout: Duration::from_millis(10),
            grace: Duration::ZERO,
            interactive_delay: Duration::ZERO,
        })
        .with_progress(false)
}
