// End-of-run reports, derived from the aggregator's in-memory state

use crate::aggregator::{PageResult, RunAggregator, RunSummary};
use crate::config::{OutputFormat, RunConfig};
use crate::correlator::{TrafficReport, TrafficStats};
use crate::emit;
use crate::error::EmitError;
use recognizer_scanner::{Endpoint, Secret, Technology};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DIVIDER: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Serialize)]
pub struct BestRequestInfo {
    pub method: String,
    pub url: String,
    pub score: i32,
}

/// Everything the structured results document carries.
#[derive(Debug, Serialize)]
pub struct ResultsDocument<'a> {
    pub summary: &'a RunSummary,
    pub pages: &'a [PageResult],
    pub endpoints: Vec<&'a Endpoint>,
    pub secrets: Vec<&'a Secret>,
    pub technologies: Vec<&'a Technology>,
    pub traffic: TrafficStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_request: Option<BestRequestInfo>,
}

impl<'a> ResultsDocument<'a> {
    pub fn new(
        summary: &'a RunSummary,
        aggregator: &'a RunAggregator,
        traffic: &TrafficReport,
    ) -> Self {
        let discoveries = aggregator.discoveries();
        Self {
            summary,
            pages: aggregator.pages(),
            endpoints: discoveries.endpoints().map(|(_, e)| e).collect(),
            secrets: discoveries.secrets().collect(),
            technologies: discoveries.technologies().collect(),
            traffic: traffic.stats,
            best_request: traffic.best.as_ref().map(|best| BestRequestInfo {
                method: best.request.method.clone(),
                url: best.request.url.clone(),
                score: best.score,
            }),
        }
    }
}

pub fn render_summary_text(summary: &RunSummary) -> String {
    let mut report = String::new();

    report.push_str(DIVIDER);
    report.push('\n');
    report.push_str("                         RECOGNIZER CRAWL SUMMARY\n");
    report.push_str(DIVIDER);
    report.push_str("\n\n");

    report.push_str(&format!("Run ID:       {}\n", summary.run_id));
    report.push_str(&format!("Target:       {}\n", summary.target));
    report.push_str(&format!(
        "Started:      {}\n",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push_str(&format!("Duration:     {:.1} seconds\n", summary.duration_secs));
    if summary.stopped_by_breaker {
        report.push_str("Stopped:      too many consecutive navigation failures\n");
    }
    report.push('\n');

    report.push_str(DIVIDER);
    report.push('\n');
    report.push_str("PAGES\n");
    report.push_str(DIVIDER);
    report.push_str("\n\n");
    report.push_str(&format!("  Visited:             {}\n", summary.pages_visited));
    report.push_str(&format!("  Navigation failures: {}\n", summary.navigation_failures));
    report.push_str(&format!("  Links found:         {}\n", summary.links_found));
    report.push_str(&format!("  Deepest level:       {}\n", summary.max_depth_reached));
    report.push_str(&format!("  Stage failures:      {}\n", summary.stage_failures));
    for (stage, count) in &summary.stage_failures_by_stage {
        report.push_str(&format!("    {:<18} {}\n", stage, count));
    }
    report.push('\n');

    report.push_str(DIVIDER);
    report.push('\n');
    report.push_str("TRAFFIC\n");
    report.push_str(DIVIDER);
    report.push_str("\n\n");
    report.push_str(&format!("  Requests observed:   {}\n", summary.requests_observed));
    report.push_str(&format!("  Asset requests:      {}\n", summary.asset_requests));
    report.push('\n');

    report.push_str(DIVIDER);
    report.push('\n');
    report.push_str("DISCOVERIES\n");
    report.push_str(DIVIDER);
    report.push_str("\n\n");
    report.push_str(&format!("  Endpoints:           {}\n", summary.endpoints));
    report.push_str(&format!("  Secrets:             {}\n", summary.secrets));
    report.push_str(&format!(
        "  Form fields:         {} ({} submitted)\n",
        summary.form_fields_processed, summary.forms_submitted
    ));
    if summary.technologies.is_empty() {
        report.push_str("  Technologies:        none\n");
    } else {
        report.push_str(&format!(
            "  Technologies:        {}\n",
            summary.technologies.join(", ")
        ));
    }
    report.push('\n');

    report.push_str(DIVIDER);
    report.push('\n');
    report.push_str("\nFor authorized security testing only.\n");

    report
}

fn endpoint_lines(aggregator: &RunAggregator) -> String {
    let mut out = String::new();
    for (_, endpoint) in aggregator.discoveries().endpoints() {
        match &endpoint.method {
            Some(method) => out.push_str(&format!("{} {}\n", method, endpoint.url)),
            None => out.push_str(&format!("{}\n", endpoint.url)),
        }
    }
    out
}

fn secret_lines(aggregator: &RunAggregator) -> String {
    aggregator
        .discoveries()
        .secrets()
        .map(|s| format!("[{}] {} ({})\n", s.kind, s.value, s.source))
        .collect()
}

fn url_lines(aggregator: &RunAggregator) -> String {
    aggregator
        .pages()
        .iter()
        .map(|p| format!("{}\n", p.url))
        .collect()
}

fn technology_lines(aggregator: &RunAggregator) -> String {
    aggregator
        .discoveries()
        .technologies()
        .map(|t| match &t.version {
            Some(v) => format!("{} {}\n", t.name, v),
            None => format!("{}\n", t.name),
        })
        .collect()
}

pub fn save_report(content: &str, path: &Path) -> Result<(), EmitError> {
    fs::write(path, content).map_err(|e| EmitError::io(path, e))
}

fn save_json<T: Serialize>(value: &T, what: &'static str, path: &Path) -> Result<(), EmitError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|source| EmitError::Serialize { what, source })?;
    save_report(&json, path)
}

/// Write the end-of-run artifacts. Each one is best-effort: a failure is
/// logged and the rest are still written. Returns the paths that made it
/// to disk.
pub fn finalize(
    aggregator: &RunAggregator,
    traffic: &TrafficReport,
    config: &RunConfig,
) -> Vec<PathBuf> {
    let summary = aggregator.summary();
    let mut written = Vec::new();

    let mut record = |path: PathBuf, result: Result<(), EmitError>| match result {
        Ok(()) => {
            debug!("Wrote {}", path.display());
            written.push(path);
        }
        Err(e) => warn!("{}", e),
    };

    let path = config.artifact_path(emit::SUMMARY_JSON_FILE);
    let result = save_json(&summary, "summary", &path);
    record(path, result);

    let path = config.artifact_path(emit::SUMMARY_TEXT_FILE);
    let result = save_report(&render_summary_text(&summary), &path);
    record(path, result);

    let lists = [
        (emit::ENDPOINTS_FILE, endpoint_lines(aggregator)),
        (emit::SECRETS_FILE, secret_lines(aggregator)),
        (emit::URLS_FILE, url_lines(aggregator)),
        (emit::TECHNOLOGIES_FILE, technology_lines(aggregator)),
    ];
    for (name, content) in lists {
        let path = config.artifact_path(name);
        let result = save_report(&content, &path);
        record(path, result);
    }

    if config.wants(OutputFormat::Json) {
        let path = config.artifact_path(emit::RESULTS_FILE);
        let document = ResultsDocument::new(&summary, aggregator, traffic);
        let result = save_json(&document, "results", &path);
        record(path, result);
    }

    written
}
