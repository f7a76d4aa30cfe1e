// Raw HTTP request text, the format replay tools such as `sqlmap -r` read.

use crate::emit::capture::{CaptureLine, read_capture_log};
use crate::error::EmitError;
use recognizer_scanner::CapturedRequest;
use std::fs;
use std::path::Path;
use tracing::warn;
use url::Url;

const MAX_SLUG_LEN: usize = 80;

/// Render a request as HTTP/1.1 text with CRLF line endings.
pub fn render_raw_request(request: &CapturedRequest) -> String {
    let (target, host) = match Url::parse(&request.url) {
        Ok(url) => {
            let mut target = url.path().to_string();
            if let Some(query) = url.query() {
                target.push('?');
                target.push_str(query);
            }
            let host = match (url.host_str(), url.port()) {
                (Some(h), Some(p)) => Some(format!("{}:{}", h, p)),
                (Some(h), None) => Some(h.to_string()),
                _ => None,
            };
            (target, host)
        }
        Err(_) => (request.url.clone(), None),
    };

    let mut out = format!("{} {} HTTP/1.1\r\n", request.method, target);
    if request.header("host").is_none()
        && let Some(host) = host
    {
        out.push_str(&format!("Host: {}\r\n", host));
    }
    for header in &request.headers {
        // HTTP/2 pseudo-headers have no HTTP/1.1 form.
        if header.name.starts_with(':') {
            continue;
        }
        out.push_str(&format!("{}: {}\r\n", header.name, header.value));
    }
    out.push_str("\r\n");
    if let Some(body) = &request.body {
        out.push_str(body);
    }
    out
}

/// File-name-safe slug for a request: host and path, squashed.
pub fn request_slug(request: &CapturedRequest) -> String {
    let source = match Url::parse(&request.url) {
        Ok(url) => format!("{}{}", url.host_str().unwrap_or(""), url.path()),
        Err(_) => request.url.clone(),
    };
    let mut slug = String::with_capacity(source.len());
    for c in source.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    slug.chars().take(MAX_SLUG_LEN).collect()
}

pub fn write_raw_request(path: &Path, request: &CapturedRequest) -> Result<(), EmitError> {
    fs::write(path, render_raw_request(request)).map_err(|e| EmitError::io(path, e))
}

/// One file per non-asset request, read back from the capture log.
pub fn write_raw_requests(log_path: &Path, dir: &Path) -> Result<usize, EmitError> {
    fs::create_dir_all(dir).map_err(|e| EmitError::io(dir, e))?;

    let mut written = 0;
    for line in read_capture_log(log_path)? {
        let CaptureLine::Request {
            seq,
            asset: false,
            request,
            ..
        } = line
        else {
            continue;
        };

        let name = format!(
            "{:06}_{}_{}.txt",
            seq,
            request.method,
            request_slug(&request)
        );
        let path = dir.join(name);
        match write_raw_request(&path, &request) {
            Ok(()) => written += 1,
            Err(e) => warn!("Skipping raw request {}: {}", seq, e),
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::capture::JsonLinesWriter;

    #[test]
    fn test_render_post_with_body() {
        let request = CapturedRequest::new("POST", "https://example.com:8443/api/login?next=%2Fhome")
            .with_header("Content-Type", "application/json")
            .with_header(":authority", "example.com")
            .with_body(r#"{"user":"a"}"#);

        let raw = render_raw_request(&request);
        assert_eq!(
            raw,
            "POST /api/login?next=%2Fhome HTTP/1.1\r\n\
             Host: example.com:8443\r\n\
             Content-Type: application/json\r\n\
             \r\n\
             {\"user\":\"a\"}"
        );
    }

    #[test]
    fn test_existing_host_header_is_not_duplicated() {
        let request =
            CapturedRequest::new("GET", "https://example.com/").with_header("Host", "example.com");
        let raw = render_raw_request(&request);
        assert_eq!(raw.matches("Host:").count(), 1);
        assert!(raw.starts_with("GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn test_slug() {
        let request = CapturedRequest::new("GET", "https://example.com/api/v1/users?id=1");
        assert_eq!(request_slug(&request), "example.com_api_v1_users");
    }

    #[test]
    fn test_raw_files_skip_assets() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("capture.log.jsonl");
        let mut writer = JsonLinesWriter::create(&log).unwrap();
        writer
            .append(&CaptureLine::Request {
                seq: 1,
                window: 0,
                asset: false,
                request: CapturedRequest::new("GET", "https://example.com/"),
            })
            .unwrap();
        writer
            .append(&CaptureLine::Request {
                seq: 2,
                window: 0,
                asset: true,
                request: CapturedRequest::new("GET", "https://example.com/app.js"),
            })
            .unwrap();
        writer.flush().unwrap();

        let out = dir.path().join("raw");
        assert_eq!(write_raw_requests(&log, &out).unwrap(), 1);
        let names: Vec<String> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["000001_GET_example.com.txt"]);
    }

    #[test]
    fn test_one_unwritable_file_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("capture.log.jsonl");
        let mut writer = JsonLinesWriter::create(&log).unwrap();
        for (seq, url) in [(1, "https://example.com/a"), (2, "https://example.com/b")] {
            writer
                .append(&CaptureLine::Request {
                    seq,
                    window: 0,
                    asset: false,
                    request: CapturedRequest::new("GET", url),
                })
                .unwrap();
        }
        writer.flush().unwrap();

        let out = dir.path().join("raw");
        // A directory squatting on the first file name makes that write fail.
        fs::create_dir_all(out.join("000001_GET_example.com_a.txt")).unwrap();

        assert_eq!(write_raw_requests(&log, &out).unwrap(), 1);
        assert!(out.join("000002_GET_example.com_b.txt").is_file());
    }
}
