// Captured traffic and the tap that carries it out of a browser session.
//
// Sessions never write traffic anywhere themselves. Every outbound request
// and every response they observe is pushed into a bounded channel, tagged
// with the window (worker slot) it belongs to, and the consumer on the other
// end decides what to keep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// A single header, kept in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Case-insensitive header lookup over an ordered header list.
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<Header>,
    /// Request body, decoded lossily as UTF-8.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: Vec<Header>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedResponse {
    pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into(),
            status,
            headers: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrafficEvent {
    /// A page visit is starting in this window.
    PageStart { url: String },
    Request(CapturedRequest),
    Response(CapturedResponse),
    /// The page in this window is done; anything still in flight is abandoned.
    PageEnd,
}

/// An event plus the window it was observed in.
#[derive(Debug, Clone, PartialEq)]
pub struct TapMessage {
    pub window: usize,
    pub event: TrafficEvent,
}

/// Sending half of the traffic channel.
///
/// Cloning is cheap. A tap created by [`TrafficTap::for_window`] tags all
/// of its events with that window id.
#[derive(Debug, Clone)]
pub struct TrafficTap {
    sender: mpsc::Sender<TapMessage>,
    window: usize,
}

/// Create a bounded traffic channel.
pub fn traffic_channel(capacity: usize) -> (TrafficTap, mpsc::Receiver<TapMessage>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (TrafficTap { sender, window: 0 }, receiver)
}

impl TrafficTap {
    pub fn for_window(&self, window: usize) -> Self {
        Self {
            sender: self.sender.clone(),
            window,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub async fn send(&self, event: TrafficEvent) {
        let message = TapMessage {
            window: self.window,
            event,
        };
        // The consumer going away only happens at shutdown.
        if self.sender.send(message).await.is_err() {
            debug!("Traffic consumer closed, dropping event for window {}", self.window);
        }
    }

    pub async fn page_start(&self, url: &str) {
        self.send(TrafficEvent::PageStart {
            url: url.to_string(),
        })
        .await;
    }

    pub async fn request(&self, request: CapturedRequest) {
        self.send(TrafficEvent::Request(request)).await;
    }

    pub async fn response(&self, response: CapturedResponse) {
        self.send(TrafficEvent::Response(response)).await;
    }

    pub async fn page_end(&self) {
        self.send(TrafficEvent::PageEnd).await;
    }
}
