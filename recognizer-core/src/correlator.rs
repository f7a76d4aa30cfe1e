// Pairs captured requests with their responses and streams them to disk.
//
// The correlator owns every traffic file written during the run. Requests
// are held only while they are in flight on an open page; once a page ends
// its unanswered requests are written out with no response and forgotten,
// so memory does not grow with traffic volume.

use crate::config::{OutputFormat, RunConfig, ScoringWeights};
use crate::emit::capture::{CaptureLine, JsonLinesWriter};
use crate::emit::{self, har, raw};
use crate::error::EmitError;
use chrono::Utc;
use recognizer_scanner::links::is_asset_url;
use recognizer_scanner::traffic::TapMessage;
use recognizer_scanner::{CapturedRequest, CapturedResponse, TrafficEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// A request paired with its response, if one arrived before the page ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub seq: u64,
    pub request: CapturedRequest,
    pub response: Option<CapturedResponse>,
    pub is_asset: bool,
    pub interest_score: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
}

/// How interesting a request is as a replay candidate. Higher is better.
pub fn interest_score(request: &CapturedRequest, weights: &ScoringWeights) -> i32 {
    let mut score = 0;

    if request.method.eq_ignore_ascii_case("POST") {
        score += weights.post;
    }

    if let Some(body) = request.body.as_deref().map(str::trim)
        && !body.is_empty()
    {
        if is_json_body(body) {
            score += weights.json_body;
        } else if is_form_body(request, body) {
            score += weights.form_body;
        }
    }

    let params = Url::parse(&request.url)
        .map(|u| u.query_pairs().count())
        .unwrap_or(0)
        .min(weights.max_query_params);
    score + weights.per_query_param * params as i32
}

fn is_json_body(body: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(body),
        Ok(serde_json::Value::Object(_)) | Ok(serde_json::Value::Array(_))
    )
}

fn is_form_body(request: &CapturedRequest, body: &str) -> bool {
    if let Some(ct) = request.header("content-type")
        && !ct
            .to_ascii_lowercase()
            .contains("application/x-www-form-urlencoded")
    {
        return false;
    }
    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, _)| !key.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub requests_observed: u64,
    pub asset_requests: u64,
    pub responses_matched: u64,
    /// Responses with no request in flight for them.
    pub unmatched_responses: u64,
    /// Non-asset requests still unanswered when their page ended.
    pub unanswered_requests: u64,
    pub records_emitted: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRequest {
    pub seq: u64,
    pub score: i32,
    pub request: CapturedRequest,
}

/// Where the correlator writes. `None` disables that output.
#[derive(Debug, Clone)]
pub struct CorrelatorOutputs {
    pub capture_log: PathBuf,
    pub records: Option<PathBuf>,
    pub har: Option<PathBuf>,
    pub raw_dir: Option<PathBuf>,
    pub best_request: PathBuf,
}

impl CorrelatorOutputs {
    pub fn from_config(config: &RunConfig) -> Self {
        let when = |format, name: &str| config.wants(format).then(|| config.artifact_path(name));
        Self {
            capture_log: config.artifact_path(emit::CAPTURE_LOG_FILE),
            records: when(OutputFormat::Jsonl, emit::RECORDS_FILE),
            har: when(OutputFormat::Har, emit::HAR_FILE),
            raw_dir: when(OutputFormat::Raw, emit::RAW_DIR),
            best_request: config.artifact_path(emit::BEST_REQUEST_FILE),
        }
    }
}

#[derive(Debug, Default)]
pub struct TrafficReport {
    pub stats: TrafficStats,
    pub best: Option<ScoredRequest>,
    pub artifacts: Vec<PathBuf>,
}

struct InFlight {
    seq: u64,
    request: CapturedRequest,
    is_asset: bool,
    score: i32,
}

#[derive(Default)]
struct Window {
    page: Option<String>,
    in_flight: HashMap<(String, String), VecDeque<InFlight>>,
}

impl Window {
    fn retained(&self) -> usize {
        self.in_flight.values().map(VecDeque::len).sum()
    }

    fn drain(&mut self) -> Vec<InFlight> {
        let mut abandoned: Vec<InFlight> = self
            .in_flight
            .drain()
            .flat_map(|(_, queue)| queue)
            .collect();
        abandoned.sort_by_key(|f| f.seq);
        abandoned
    }
}

pub struct TrafficCorrelator {
    outputs: CorrelatorOutputs,
    scoring: ScoringWeights,
    log: Option<JsonLinesWriter>,
    records: Option<JsonLinesWriter>,
    windows: HashMap<usize, Window>,
    next_seq: u64,
    stats: TrafficStats,
    best: Option<ScoredRequest>,
}

impl TrafficCorrelator {
    /// Opens the capture log (and the record stream when enabled). Failing
    /// to create either is a setup problem, not a best-effort write.
    pub fn new(outputs: CorrelatorOutputs, scoring: ScoringWeights) -> Result<Self, EmitError> {
        let log = JsonLinesWriter::create(&outputs.capture_log)?;
        let records = match &outputs.records {
            Some(path) => Some(JsonLinesWriter::create(path)?),
            None => None,
        };

        Ok(Self {
            outputs,
            scoring,
            log: Some(log),
            records,
            windows: HashMap::new(),
            next_seq: 1,
            stats: TrafficStats::default(),
            best: None,
        })
    }

    pub fn observe(&mut self, message: TapMessage) {
        let TapMessage { window, event } = message;
        match event {
            TrafficEvent::PageStart { url } => self.begin_page(window, url),
            TrafficEvent::Request(request) => self.observe_request(window, request),
            TrafficEvent::Response(response) => self.observe_response(window, response),
            TrafficEvent::PageEnd => self.end_page(window),
        }
    }

    pub fn begin_page(&mut self, window: usize, url: String) {
        if self.windows.contains_key(&window) {
            self.end_page(window);
        }

        self.write_log(&CaptureLine::Page {
            window,
            url: url.clone(),
            timestamp: Utc::now(),
        });
        self.windows.insert(
            window,
            Window {
                page: Some(url),
                in_flight: HashMap::new(),
            },
        );
    }

    pub fn observe_request(&mut self, window: usize, request: CapturedRequest) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let is_asset = is_asset_url(&request.url);
        self.stats.requests_observed += 1;
        if is_asset {
            self.stats.asset_requests += 1;
        }

        self.write_log(&CaptureLine::Request {
            seq,
            window,
            asset: is_asset,
            request: request.clone(),
        });

        let score = if is_asset {
            0
        } else {
            let score = interest_score(&request, &self.scoring);
            if self.best.as_ref().is_none_or(|best| score > best.score) {
                self.best = Some(ScoredRequest {
                    seq,
                    score,
                    request: request.clone(),
                });
            }
            score
        };

        let key = (request.method.to_uppercase(), request.url.clone());
        self.windows
            .entry(window)
            .or_default()
            .in_flight
            .entry(key)
            .or_default()
            .push_back(InFlight {
                seq,
                request,
                is_asset,
                score,
            });
    }

    pub fn observe_response(&mut self, window: usize, response: CapturedResponse) {
        let key = (response.method.to_uppercase(), response.url.clone());
        let Some(state) = self.windows.get_mut(&window) else {
            self.stats.unmatched_responses += 1;
            debug!("Dropping response for {} {}: no open page", key.0, key.1);
            return;
        };

        let matched = match state.in_flight.get_mut(&key) {
            Some(queue) => {
                let first = queue.pop_front();
                if queue.is_empty() {
                    state.in_flight.remove(&key);
                }
                first
            }
            None => None,
        };
        let Some(in_flight) = matched else {
            self.stats.unmatched_responses += 1;
            debug!("Dropping unmatched response for {} {}", key.0, key.1);
            return;
        };
        let page = state.page.clone();

        self.stats.responses_matched += 1;
        self.write_log(&CaptureLine::Response {
            seq: in_flight.seq,
            window,
            response: response.clone(),
        });
        if !in_flight.is_asset {
            self.emit_record(in_flight, Some(response), page);
        }
    }

    /// Close a page's traffic window. Requests still in flight are written
    /// with no response; asset requests are only dropped.
    pub fn end_page(&mut self, window: usize) {
        if let Some(mut state) = self.windows.remove(&window) {
            let page = state.page.clone();
            for in_flight in state.drain() {
                if in_flight.is_asset {
                    continue;
                }
                self.stats.unanswered_requests += 1;
                self.emit_record(in_flight, None, page.clone());
            }
        }

        self.write_log(&CaptureLine::PageEnd { window });
        self.flush_streams();
    }

    /// Requests currently held in memory awaiting a response.
    pub fn retained(&self) -> usize {
        self.windows.values().map(Window::retained).sum()
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    pub fn best(&self) -> Option<&ScoredRequest> {
        self.best.as_ref()
    }

    /// Final pass: close any open pages, pick the best request and build the
    /// batch outputs from the capture log.
    pub fn flush(mut self) -> TrafficReport {
        let mut open: Vec<usize> = self.windows.keys().copied().collect();
        open.sort_unstable();
        for window in open {
            self.end_page(window);
        }
        self.flush_streams();

        let mut artifacts = Vec::new();
        if self.log.take().is_some() {
            artifacts.push(self.outputs.capture_log.clone());
        }
        if self.records.take().is_some()
            && let Some(path) = &self.outputs.records
        {
            artifacts.push(path.clone());
        }

        if let Some(best) = &self.best {
            match raw::write_raw_request(&self.outputs.best_request, &best.request) {
                Ok(()) => {
                    info!(
                        "Best request: {} {} (score {})",
                        best.request.method, best.request.url, best.score
                    );
                    artifacts.push(self.outputs.best_request.clone());
                }
                Err(e) => warn!("{}", e),
            }
        }

        if let Some(path) = &self.outputs.har {
            match har::write_har(&self.outputs.capture_log, path) {
                Ok(entries) => {
                    debug!("Wrote {} HAR entries to {}", entries, path.display());
                    artifacts.push(path.clone());
                }
                Err(e) => warn!("{}", e),
            }
        }

        if let Some(dir) = &self.outputs.raw_dir {
            match raw::write_raw_requests(&self.outputs.capture_log, dir) {
                Ok(count) => {
                    debug!("Wrote {} raw requests to {}", count, dir.display());
                    artifacts.push(dir.clone());
                }
                Err(e) => warn!("{}", e),
            }
        }

        TrafficReport {
            stats: self.stats,
            best: self.best,
            artifacts,
        }
    }

    fn emit_record(
        &mut self,
        in_flight: InFlight,
        response: Option<CapturedResponse>,
        page: Option<String>,
    ) {
        let Some(writer) = self.records.as_mut() else {
            return;
        };
        let record = RequestRecord {
            seq: in_flight.seq,
            request: in_flight.request,
            response,
            is_asset: in_flight.is_asset,
            interest_score: in_flight.score,
            page,
        };
        match writer.append(&record) {
            Ok(()) => self.stats.records_emitted += 1,
            Err(e) => {
                warn!("{}; request records disabled for the rest of the run", e);
                self.records = None;
            }
        }
    }

    fn write_log(&mut self, line: &CaptureLine) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        if let Err(e) = log.append(line) {
            warn!("{}; capture log disabled for the rest of the run", e);
            self.log = None;
        }
    }

    fn flush_streams(&mut self) {
        if let Some(log) = self.log.as_mut()
            && let Err(e) = log.flush()
        {
            warn!("{}; capture log disabled for the rest of the run", e);
            self.log = None;
        }
        if let Some(records) = self.records.as_mut()
            && let Err(e) = records.flush()
        {
            warn!("{}; request records disabled for the rest of the run", e);
            self.records = None;
        }
    }
}

/// Drain the traffic channel on its own task. The task finishes once every
/// tap has been dropped, returning the flushed report.
pub fn spawn_correlator(
    mut correlator: TrafficCorrelator,
    mut receiver: mpsc::Receiver<TapMessage>,
) -> JoinHandle<TrafficReport> {
    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            correlator.observe(message);
        }

        match tokio::task::spawn_blocking(move || correlator.flush()).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Traffic flush failed: {}", e);
                TrafficReport::default()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::capture::read_capture_log;
    use recognizer_scanner::traffic::traffic_channel;
    use std::path::Path;

    fn outputs(dir: &Path, records: bool) -> CorrelatorOutputs {
        CorrelatorOutputs {
            capture_log: dir.join(emit::CAPTURE_LOG_FILE),
            records: records.then(|| dir.join(emit::RECORDS_FILE)),
            har: None,
            raw_dir: None,
            best_request: dir.join(emit::BEST_REQUEST_FILE),
        }
    }

    fn correlator(dir: &Path) -> TrafficCorrelator {
        TrafficCorrelator::new(outputs(dir, true), ScoringWeights::default()).unwrap()
    }

    fn read_records(path: &Path) -> Vec<RequestRecord> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_interest_scores() {
        let weights = ScoringWeights::default();

        let get = CapturedRequest::new("GET", "https://example.com/");
        assert_eq!(interest_score(&get, &weights), 0);

        let post_json = CapturedRequest::new("POST", "https://example.com/api")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"a":1}"#);
        assert_eq!(interest_score(&post_json, &weights), 9);

        let post_form = CapturedRequest::new("POST", "https://example.com/login")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("user=a&pass=b");
        assert_eq!(interest_score(&post_form, &weights), 10);

        let many_params = CapturedRequest::new("GET", "https://example.com/s?a=1&b=2&c=3&d=4&e=5");
        assert_eq!(interest_score(&many_params, &weights), 3);

        let plain_text = CapturedRequest::new("PUT", "https://example.com/note")
            .with_header("Content-Type", "text/plain")
            .with_body("a=b");
        assert_eq!(interest_score(&plain_text, &weights), 0);
    }

    #[test]
    fn test_every_request_is_logged_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = correlator(dir.path());

        c.begin_page(0, "https://example.com/".to_string());
        let urls = [
            "https://example.com/",
            "https://example.com/app.js",
            "https://example.com/api/items",
            "https://example.com/logo.png",
        ];
        for url in urls {
            c.observe_request(0, CapturedRequest::new("GET", url));
        }
        c.end_page(0);
        let report = c.flush();

        let logged: Vec<String> = read_capture_log(&dir.path().join(emit::CAPTURE_LOG_FILE))
            .unwrap()
            .filter_map(|line| match line {
                CaptureLine::Request { request, .. } => Some(request.url),
                _ => None,
            })
            .collect();
        assert_eq!(logged, urls);
        assert_eq!(report.stats.requests_observed, 4);
        assert_eq!(report.stats.asset_requests, 2);
    }

    #[test]
    fn test_post_json_is_selected_as_best_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = correlator(dir.path());

        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/"));
        c.observe_request(
            0,
            CapturedRequest::new("POST", "https://example.com/api")
                .with_header("Content-Type", "application/json")
                .with_body(r#"{"a":1}"#),
        );
        let report = c.flush();

        let best = report.best.unwrap();
        assert_eq!(best.request.method, "POST");
        assert_eq!(best.score, 9);

        let raw = std::fs::read_to_string(dir.path().join(emit::BEST_REQUEST_FILE)).unwrap();
        assert!(raw.starts_with("POST /api HTTP/1.1\r\n"));
        assert!(raw.ends_with(r#"{"a":1}"#));
    }

    #[test]
    fn test_ties_keep_the_first_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = correlator(dir.path());
        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/a?x=1"));
        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/b?y=1"));
        assert_eq!(c.best().unwrap().request.url, "https://example.com/a?x=1");
    }

    #[test]
    fn test_responses_are_paired_by_method_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = correlator(dir.path());

        c.begin_page(0, "https://example.com/".to_string());
        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/api"));
        c.observe_request(0, CapturedRequest::new("POST", "https://example.com/api"));
        c.observe_response(0, CapturedResponse::new("POST", "https://example.com/api", 201));
        c.observe_response(0, CapturedResponse::new("GET", "https://example.com/other", 200));
        c.end_page(0);
        let report = c.flush();

        assert_eq!(report.stats.responses_matched, 1);
        assert_eq!(report.stats.unmatched_responses, 1);
        assert_eq!(report.stats.unanswered_requests, 1);

        let records = read_records(&dir.path().join(emit::RECORDS_FILE));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].request.method, "POST");
        assert_eq!(records[0].response.as_ref().unwrap().status, 201);
        assert_eq!(records[0].page.as_deref(), Some("https://example.com/"));
        assert_eq!(records[1].request.method, "GET");
        assert!(records[1].response.is_none());
    }

    #[test]
    fn test_pairing_ignores_method_case() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = correlator(dir.path());

        c.begin_page(0, "https://example.com/".to_string());
        let mut request = CapturedRequest::new("POST", "https://example.com/login");
        request.method = "post".to_string();
        c.observe_request(0, request);
        c.observe_response(0, CapturedResponse::new("post", "https://example.com/login", 200));
        c.end_page(0);
        let report = c.flush();

        assert_eq!(report.stats.responses_matched, 1);
        assert_eq!(report.stats.unmatched_responses, 0);
        assert_eq!(report.stats.unanswered_requests, 0);

        let records = read_records(&dir.path().join(emit::RECORDS_FILE));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].response.as_ref().unwrap().status, 200);
    }

    #[test]
    fn test_windows_do_not_share_in_flight_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = correlator(dir.path());

        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/api"));
        c.observe_response(1, CapturedResponse::new("GET", "https://example.com/api", 200));
        assert_eq!(c.stats().unmatched_responses, 1);
        assert_eq!(c.retained(), 1);

        c.observe_response(0, CapturedResponse::new("GET", "https://example.com/api", 200));
        assert_eq!(c.retained(), 0);
        assert_eq!(c.stats().responses_matched, 1);
    }

    #[test]
    fn test_assets_are_logged_but_not_recorded_or_scored() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = correlator(dir.path());

        c.observe_request(
            0,
            CapturedRequest::new("POST", "https://example.com/upload/image.png?a=1&b=2")
                .with_body(r#"{"big":true}"#),
        );
        c.observe_response(
            0,
            CapturedResponse::new("POST", "https://example.com/upload/image.png?a=1&b=2", 200),
        );
        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/"));
        c.end_page(0);
        let report = c.flush();

        assert_eq!(report.best.unwrap().request.url, "https://example.com/");
        let records = read_records(&dir.path().join(emit::RECORDS_FILE));
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_asset);
        assert_eq!(report.stats.asset_requests, 1);
    }

    #[test]
    fn test_no_best_request_file_without_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = correlator(dir.path());
        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/site.css"));
        let report = c.flush();

        assert!(report.best.is_none());
        assert!(!dir.path().join(emit::BEST_REQUEST_FILE).exists());
    }

    #[test]
    fn test_memory_stays_bounded_over_many_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = TrafficCorrelator::new(outputs(dir.path(), true), ScoringWeights::default())
            .unwrap();

        for page in 0..100 {
            c.begin_page(0, format!("https://example.com/p{}", page));
            for i in 0..100 {
                let url = format!("https://example.com/api/{}/{}", page, i);
                c.observe_request(0, CapturedRequest::new("GET", &url));
                if i % 2 == 0 {
                    c.observe_response(0, CapturedResponse::new("GET", &url, 200));
                }
            }
            c.end_page(0);
            assert_eq!(c.retained(), 0);
        }

        let report = c.flush();
        assert_eq!(report.stats.requests_observed, 10_000);
        assert_eq!(report.stats.responses_matched, 5_000);
        assert_eq!(report.stats.unanswered_requests, 5_000);
        assert_eq!(report.stats.records_emitted, 10_000);
    }

    #[test]
    fn test_flush_builds_batch_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut outputs = outputs(dir.path(), false);
        outputs.har = Some(dir.path().join(emit::HAR_FILE));
        outputs.raw_dir = Some(dir.path().join(emit::RAW_DIR));
        let mut c = TrafficCorrelator::new(outputs, ScoringWeights::default()).unwrap();

        c.begin_page(0, "https://example.com/".to_string());
        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/"));
        c.observe_request(0, CapturedRequest::new("GET", "https://example.com/main.js"));
        // Page left open on purpose; flush closes it.
        let report = c.flush();

        assert!(report.artifacts.contains(&dir.path().join(emit::HAR_FILE)));
        assert!(!dir.path().join(emit::RECORDS_FILE).exists());
        let raw_files: Vec<_> = std::fs::read_dir(dir.path().join(emit::RAW_DIR))
            .unwrap()
            .collect();
        assert_eq!(raw_files.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_correlator_drains_channel() {
        let dir = tempfile::tempdir().unwrap();
        let c = correlator(dir.path());
        let (tap, rx) = traffic_channel(8);
        let handle = spawn_correlator(c, rx);

        let window = tap.for_window(3);
        window.page_start("https://example.com/").await;
        window
            .request(CapturedRequest::new("GET", "https://example.com/"))
            .await;
        window
            .response(CapturedResponse::new("GET", "https://example.com/", 200))
            .await;
        window.page_end().await;
        drop(window);
        drop(tap);

        let report = handle.await.unwrap();
        assert_eq!(report.stats.requests_observed, 1);
        assert_eq!(report.stats.responses_matched, 1);
        assert_eq!(report.stats.records_emitted, 1);
    }
}
