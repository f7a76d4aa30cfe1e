// Output emission: incremental line-delimited writers during the run, and
// batch artifacts built at the end from the capture log and the aggregator.

pub mod capture;
pub mod har;
pub mod raw;
pub mod report;

pub const CAPTURE_LOG_FILE: &str = "capture.log.jsonl";
pub const RECORDS_FILE: &str = "requests.jsonl";
pub const HAR_FILE: &str = "traffic.har";
pub const RAW_DIR: &str = "raw";
pub const BEST_REQUEST_FILE: &str = "best_request.txt";
pub const RESULTS_FILE: &str = "results.json";
pub const SUMMARY_JSON_FILE: &str = "summary.json";
pub const SUMMARY_TEXT_FILE: &str = "summary.txt";
pub const ENDPOINTS_FILE: &str = "endpoints.txt";
pub const SECRETS_FILE: &str = "secrets.txt";
pub const URLS_FILE: &str = "urls.txt";
pub const TECHNOLOGIES_FILE: &str = "technologies.txt";
