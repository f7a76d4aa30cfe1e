use crate::error::{Result, ScanError};
use crate::links::resolve_link;
use crate::session::{BrowserSession, ObservedCall, PageContent, SessionFactory};
use crate::traffic::{CapturedRequest, CapturedResponse, Header, TrafficTap, header_value};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, USER_AGENT};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

const DOCUMENT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn default_user_agent() -> String {
    format!("Recognizer/{}", env!("CARGO_PKG_VERSION"))
}

/// Builds plain-HTTP sessions that share one pooled client.
#[derive(Clone)]
pub struct HttpSessionFactory {
    client: Client,
    user_agent: String,
}

impl HttpSessionFactory {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(50) // Connection pooling
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    type Session = HttpSession;

    async fn open(&self, tap: TrafficTap) -> Result<HttpSession> {
        Ok(HttpSession {
            client: self.client.clone(),
            user_agent: self.user_agent.clone(),
            tap,
            page: None,
            calls: Vec::new(),
        })
    }
}

/// A session that fetches documents over HTTP without executing scripts.
///
/// Every fetch goes through the traffic tap, so the correlator sees the
/// document and script requests a browser would have made for them.
pub struct HttpSession {
    client: Client,
    user_agent: String,
    tap: TrafficTap,
    page: Option<PageContent>,
    calls: Vec<ObservedCall>,
}

struct Fetched {
    final_url: String,
    status: u16,
    headers: Vec<Header>,
    body: String,
}

fn to_headers(map: &HeaderMap) -> Vec<Header> {
    map.iter()
        .map(|(name, value)| {
            Header::new(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

impl HttpSession {
    async fn fetch(&mut self, url: &str, accept: &str, timeout: Duration) -> Result<Fetched> {
        let request = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, accept)
            .build()?;

        let request_url = request.url().to_string();
        let captured = CapturedRequest {
            method: request.method().as_str().to_string(),
            url: request_url.clone(),
            headers: to_headers(request.headers()),
            body: None,
            timestamp: Utc::now(),
        };
        let method = captured.method.clone();
        self.tap.request(captured).await;

        let client = &self.client;
        let tap = &self.tap;
        let exchange = async {
            let response = client.execute(request).await?;
            let status = response.status().as_u16();
            let headers = to_headers(response.headers());
            let final_url = response.url().to_string();

            tap.response(CapturedResponse {
                method: method.clone(),
                url: request_url.clone(),
                status,
                headers: headers.clone(),
                timestamp: Utc::now(),
            })
            .await;

            let body = response.text().await?;
            Ok::<_, ScanError>(Fetched {
                final_url,
                status,
                headers,
                body,
            })
        };

        let fetched = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScanError::Timeout {
                    url: url.to_string(),
                    timeout,
                });
            }
        };

        self.calls.push(ObservedCall {
            method,
            url: request_url,
            status: Some(fetched.status),
            content_type: header_value(&fetched.headers, "content-type").map(str::to_string),
        });

        Ok(fetched)
    }

    fn page(&self) -> Result<&PageContent> {
        self.page.as_ref().ok_or(ScanError::NoPage)
    }

    fn select_resolved(&self, selector: &str, attr: &str) -> Result<Vec<String>> {
        let page = self.page()?;
        let document = Html::parse_document(&page.html);
        let selector = Selector::parse(selector)
            .map_err(|e| ScanError::Other(format!("invalid selector: {:?}", e)))?;

        let mut seen = HashSet::new();
        let urls = document
            .select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .filter_map(|href| resolve_link(&page.url, href))
            .filter(|url| seen.insert(url.clone()))
            .collect();
        Ok(urls)
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.page = None;
        self.calls.clear();

        debug!("Fetching {}", url);
        let fetched = self.fetch(url, DOCUMENT_ACCEPT, timeout).await?;

        self.page = Some(PageContent {
            url: fetched.final_url,
            status: Some(fetched.status),
            headers: fetched.headers,
            html: fetched.body,
        });
        Ok(())
    }

    async fn wait_for_network_idle(&mut self, _timeout: Duration) -> Result<()> {
        // Nothing runs in the background of a plain fetch.
        Ok(())
    }

    fn current_requests(&self) -> Vec<ObservedCall> {
        self.calls.clone()
    }

    async fn title(&mut self) -> Result<Option<String>> {
        let page = self.page()?;
        let document = Html::parse_document(&page.html);
        let selector = Selector::parse("title")
            .map_err(|e| ScanError::Other(format!("invalid selector: {:?}", e)))?;
        Ok(document
            .select(&selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    async fn content(&mut self) -> Result<PageContent> {
        self.page().cloned()
    }

    async fn script_sources(&mut self) -> Result<Vec<String>> {
        self.select_resolved("script[src]", "src")
    }

    async fn fetch_script(&mut self, url: &str) -> Result<String> {
        let fetched = self.fetch(url, "*/*", SCRIPT_TIMEOUT).await?;
        Ok(fetched.body)
    }

    async fn extract_links(&mut self) -> Result<Vec<String>> {
        self.select_resolved("a[href], area[href]", "href")
    }
}
