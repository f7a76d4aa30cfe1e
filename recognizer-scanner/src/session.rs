// The browser-session seam.
//
// A session renders (or fetches) one page at a time and reports the traffic
// it generates through its `TrafficTap`. The crawl core drives sessions
// only through this trait.

use crate::error::Result;
use crate::traffic::{Header, TrafficTap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An outbound call observed while the current page was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedCall {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// The loaded document as the session sees it.
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub url: String,
    pub status: Option<u16>,
    pub headers: Vec<Header>,
    pub html: String,
}

#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url`, failing on network errors or when `timeout` elapses.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until no requests are outstanding, or `timeout` elapses.
    async fn wait_for_network_idle(&mut self, timeout: Duration) -> Result<()>;

    /// Outbound calls observed since the last navigation.
    fn current_requests(&self) -> Vec<ObservedCall>;

    async fn title(&mut self) -> Result<Option<String>>;

    async fn content(&mut self) -> Result<PageContent>;

    /// Absolute `src` URLs of external scripts on the page.
    async fn script_sources(&mut self) -> Result<Vec<String>>;

    async fn fetch_script(&mut self, url: &str) -> Result<String>;

    /// Absolute http(s) URLs of links on the page.
    async fn extract_links(&mut self) -> Result<Vec<String>>;
}

/// Opens one session per crawl worker.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserSession + 'static;

    async fn open(&self, tap: TrafficTap) -> Result<Self::Session>;
}
