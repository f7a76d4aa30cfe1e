// Analyzer, form and CAPTCHA interfaces consumed by the visit pipeline.
//
// Content analyzers never fail: an analyzer that cannot make sense of its
// input returns an empty list. Form interaction and CAPTCHA handling drive
// the session and can fail, which the pipeline records as a stage failure.

use crate::error::Result;
use crate::result::{Endpoint, FormOutcome, Secret, Technology};
use crate::session::{BrowserSession, ObservedCall, PageContent};
use async_trait::async_trait;

pub trait TechnologyDetector: Send + Sync {
    fn detect(&self, page: &PageContent) -> Vec<Technology>;
}

/// Static analysis of page or script text for endpoints.
pub trait EndpointAnalyzer: Send + Sync {
    fn analyze(&self, content: &str, source: &str) -> Vec<Endpoint>;
}

/// Runtime endpoint capture from the calls a page made.
pub trait RuntimeEndpointCollector: Send + Sync {
    fn collect(&self, page_url: &str, calls: &[ObservedCall]) -> Vec<Endpoint>;
}

pub trait SecretScanner: Send + Sync {
    fn scan(&self, content: &str, source: &str) -> Vec<Secret>;
}

#[async_trait]
pub trait FormInteractor: Send + Sync {
    async fn process_form(&self, session: &mut dyn BrowserSession) -> Result<FormOutcome>;
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Returns true when a challenge was found and handled.
    async fn solve(&self, session: &mut dyn BrowserSession) -> Result<bool>;
}
