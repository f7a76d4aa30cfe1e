// HTTP Archive (HAR 1.2) output, streamed from the capture log.
//
// The archive is written in two passes over the log: the first collects
// the page list, the second writes entries as their request/response pairs
// complete. Only the traffic of pages still open is held in memory.

use crate::emit::capture::{CaptureLine, read_capture_log};
use crate::error::EmitError;
use recognizer_scanner::{CapturedRequest, CapturedResponse, Header};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use url::Url;

#[derive(Debug, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPage {
    pub started_date_time: String,
    pub id: String,
    pub title: String,
    pub page_timings: HarPageTimings,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPageTimings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_content_load: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_load: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pageref: Option<String>,
    pub started_date_time: String,
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: HarCache,
    pub timings: HarTimings,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<HarHeader>,
    pub query_string: Vec<HarHeader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub cookies: Vec<HarCookie>,
    pub headers: Vec<HarHeader>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarCookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HarCache {}

#[derive(Debug, Serialize, Deserialize)]
pub struct HarTimings {
    pub blocked: f64,
    pub dns: f64,
    pub connect: f64,
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

fn har_headers(headers: &[Header]) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|h| HarHeader {
            name: h.name.clone(),
            value: h.value.clone(),
        })
        .collect()
}

fn har_request(request: &CapturedRequest) -> HarRequest {
    let query_string = Url::parse(&request.url)
        .map(|u| {
            u.query_pairs()
                .map(|(name, value)| HarHeader {
                    name: name.into_owned(),
                    value: value.into_owned(),
                })
                .collect()
        })
        .unwrap_or_default();

    HarRequest {
        method: request.method.clone(),
        url: request.url.clone(),
        http_version: "HTTP/1.1".to_string(),
        cookies: Vec::new(),
        headers: har_headers(&request.headers),
        query_string,
        post_data: request.body.as_ref().map(|body| HarPostData {
            mime_type: request.header("content-type").unwrap_or_default().to_string(),
            text: body.clone(),
        }),
        headers_size: -1,
        body_size: request.body.as_ref().map(|b| b.len() as i64).unwrap_or(0),
    }
}

/// Build an entry; a request that never got a response gets status 0, the
/// way browsers export aborted requests.
pub fn har_entry(
    request: &CapturedRequest,
    response: Option<&CapturedResponse>,
    pageref: Option<String>,
) -> HarEntry {
    let elapsed = response
        .map(|r| {
            (r.timestamp - request.timestamp)
                .num_milliseconds()
                .max(0) as f64
        })
        .unwrap_or(0.0);

    let response = match response {
        Some(r) => HarResponse {
            status: r.status,
            status_text: String::new(),
            http_version: "HTTP/1.1".to_string(),
            cookies: Vec::new(),
            headers: har_headers(&r.headers),
            content: HarContent {
                size: -1,
                mime_type: r.header("content-type").unwrap_or_default().to_string(),
            },
            redirect_url: r.header("location").unwrap_or_default().to_string(),
            headers_size: -1,
            body_size: -1,
        },
        None => HarResponse {
            status: 0,
            status_text: String::new(),
            http_version: String::new(),
            cookies: Vec::new(),
            headers: Vec::new(),
            content: HarContent {
                size: 0,
                mime_type: String::new(),
            },
            redirect_url: String::new(),
            headers_size: -1,
            body_size: -1,
        },
    };

    HarEntry {
        pageref,
        started_date_time: request.timestamp.to_rfc3339(),
        time: elapsed,
        request: har_request(request),
        response,
        cache: HarCache::default(),
        timings: HarTimings {
            blocked: -1.0,
            dns: -1.0,
            connect: -1.0,
            send: 0.0,
            wait: elapsed,
            receive: 0.0,
        },
    }
}

fn page_id(index: usize) -> String {
    format!("page_{}", index)
}

fn collect_pages(log_path: &Path) -> Result<Vec<HarPage>, EmitError> {
    let mut pages = Vec::new();
    for line in read_capture_log(log_path)? {
        if let CaptureLine::Page { url, timestamp, .. } = line {
            pages.push(HarPage {
                started_date_time: timestamp.to_rfc3339(),
                id: page_id(pages.len()),
                title: url,
                page_timings: HarPageTimings {
                    on_content_load: None,
                    on_load: None,
                },
            });
        }
    }
    Ok(pages)
}

struct Pending {
    window: usize,
    pageref: Option<String>,
    request: CapturedRequest,
}

struct EntryStream<W: Write> {
    out: W,
    written: usize,
}

impl<W: Write> EntryStream<W> {
    fn push(&mut self, entry: &HarEntry) -> std::io::Result<()> {
        if self.written > 0 {
            self.out.write_all(b",")?;
        }
        serde_json::to_writer(&mut self.out, entry).map_err(std::io::Error::other)?;
        self.written += 1;
        Ok(())
    }
}

/// Write `out_path` from the capture log at `log_path`. Returns the number
/// of entries written.
pub fn write_har(log_path: &Path, out_path: &Path) -> Result<usize, EmitError> {
    let io_err = |e| EmitError::io(out_path, e);

    let pages = collect_pages(log_path)?;
    let file = File::create(out_path).map_err(io_err)?;
    let mut out = BufWriter::new(file);

    let creator = HarCreator {
        name: "Recognizer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    out.write_all(br#"{"log":{"version":"1.2","creator":"#)
        .map_err(io_err)?;
    serde_json::to_writer(&mut out, &creator).map_err(|source| EmitError::Serialize {
        what: "HAR creator",
        source,
    })?;
    out.write_all(br#","pages":"#).map_err(io_err)?;
    serde_json::to_writer(&mut out, &pages).map_err(|source| EmitError::Serialize {
        what: "HAR pages",
        source,
    })?;
    out.write_all(br#","entries":["#).map_err(io_err)?;

    let mut stream = EntryStream {
        out,
        written: 0,
    };
    let mut page_count = 0;
    let mut current_page: HashMap<usize, String> = HashMap::new();
    // Keyed by sequence number so abandoned requests come out in order.
    let mut pending: BTreeMap<u64, Pending> = BTreeMap::new();

    for line in read_capture_log(log_path)? {
        match line {
            CaptureLine::Page { window, .. } => {
                current_page.insert(window, page_id(page_count));
                page_count += 1;
            }
            CaptureLine::Request {
                seq,
                window,
                request,
                ..
            } => {
                pending.insert(
                    seq,
                    Pending {
                        window,
                        pageref: current_page.get(&window).cloned(),
                        request,
                    },
                );
            }
            CaptureLine::Response { seq, response, .. } => {
                if let Some(p) = pending.remove(&seq) {
                    stream
                        .push(&har_entry(&p.request, Some(&response), p.pageref))
                        .map_err(io_err)?;
                }
            }
            CaptureLine::PageEnd { window } => {
                let abandoned: Vec<u64> = pending
                    .iter()
                    .filter(|(_, p)| p.window == window)
                    .map(|(seq, _)| *seq)
                    .collect();
                for seq in abandoned {
                    if let Some(p) = pending.remove(&seq) {
                        stream
                            .push(&har_entry(&p.request, None, p.pageref))
                            .map_err(io_err)?;
                    }
                }
                current_page.remove(&window);
            }
        }
    }

    for (_, p) in std::mem::take(&mut pending) {
        stream
            .push(&har_entry(&p.request, None, p.pageref))
            .map_err(io_err)?;
    }

    let written = stream.written;
    let mut out = stream.out;
    out.write_all(b"]}}").map_err(io_err)?;
    out.flush().map_err(io_err)?;
    Ok(written)
}
