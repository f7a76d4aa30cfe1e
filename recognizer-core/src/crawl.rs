use crate::aggregator::{RunAggregator, RunSummary};
use crate::config::RunConfig;
use crate::correlator::{CorrelatorOutputs, TrafficCorrelator, TrafficReport, spawn_correlator};
use crate::emit::report::finalize;
use crate::error::{EmitError, SetupError};
use crate::frontier::{Frontier, FrontierLimits};
use crate::pipeline::{Collaborators, VisitOutcome, VisitPipeline};
use crate::scope::Scope;
use futures::FutureExt;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use recognizer_scanner::SessionFactory;
use recognizer_scanner::traffic::traffic_channel;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// What a finished run hands back to the caller.
#[derive(Debug)]
pub struct CrawlReport {
    pub summary: RunSummary,
    /// Pages dispatched for a visit, in dispatch order.
    pub visited: Vec<String>,
    /// Every artifact written under the output directory.
    pub artifacts: Vec<PathBuf>,
}

fn correlator_setup_error(error: EmitError) -> SetupError {
    match error {
        EmitError::Io { path, source } => SetupError::OutputDir { path, source },
        other => SetupError::InvalidConfig(other.to_string()),
    }
}

fn fold_outcome(aggregator: &mut RunAggregator, outcome: VisitOutcome) {
    let VisitOutcome {
        page,
        analysis,
        failures,
        ..
    } = outcome;

    for failure in &failures {
        aggregator.record_stage_failure(failure.stage());
    }
    let endpoints = aggregator.merge_endpoints(analysis.endpoints);
    let secrets = aggregator.merge_secrets(analysis.secrets);
    let technologies = aggregator.merge_technologies(analysis.technologies);
    if let Some(forms) = analysis.forms {
        aggregator.record_form(forms);
    }
    debug!(
        "{}: {} new endpoints, {} new secrets, {} new technologies",
        page.url, endpoints, secrets, technologies
    );
    aggregator.record_page(page);
}

/// Run a whole crawl: validate the config, visit pages with
/// `config.workers` concurrent sessions, then flush and finalize every
/// artifact. Only setup problems are returned as errors.
pub async fn execute_crawl<F>(
    config: RunConfig,
    factory: Arc<F>,
    collaborators: Collaborators,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<CrawlReport, SetupError>
where
    F: SessionFactory + 'static,
{
    config.validate()?;
    config.prepare_output_dir()?;

    let config = Arc::new(config);
    let scope = Scope::new(&config.target, &config.scope);
    let mut frontier = Frontier::new(
        scope.clone(),
        FrontierLimits {
            max_pages: config.max_pages,
            max_depth: config.max_depth,
            failure_threshold: config.failure_threshold,
        },
    );
    if !frontier.enqueue(config.target.as_str(), 0) {
        return Err(SetupError::InvalidTarget {
            url: config.target.to_string(),
            reason: "target is excluded by its own scope rules".to_string(),
        });
    }

    let correlator = TrafficCorrelator::new(CorrelatorOutputs::from_config(&config), config.scoring)
        .map_err(correlator_setup_error)?;
    let (tap, receiver) = traffic_channel(config.capture_buffer);

    // Open every session before the first visit so a broken browser
    // setup fails the run up front.
    let mut sessions = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        sessions.push(factory.open(tap.for_window(worker_id)).await?);
    }
    let correlator_handle = spawn_correlator(correlator, receiver);

    info!(
        "Crawling {} with {} worker(s), max {} pages, max depth {}",
        config.target, config.workers, config.max_pages, config.max_depth
    );

    let frontier = Arc::new(Mutex::new(frontier));
    let aggregator = Arc::new(Mutex::new(RunAggregator::new(&config.target)));
    let pipeline = Arc::new(VisitPipeline::new(
        config.clone(),
        Arc::new(scope),
        collaborators,
    ));

    let progress_bar = if config.show_progress {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };
    progress_bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress_bar.enable_steady_tick(Duration::from_millis(100));
    progress_bar.set_message("Starting crawl...");
    let processed_count = Arc::new(AtomicUsize::new(0));

    let mut worker_handles = Vec::new();
    for (worker_id, mut session) in sessions.into_iter().enumerate() {
        let frontier = frontier.clone();
        let aggregator = aggregator.clone();
        let pipeline = pipeline.clone();
        let tap = tap.for_window(worker_id);
        let progress_bar = progress_bar.clone();
        let processed_count = processed_count.clone();
        let progress_callback = progress_callback.clone();
        let delay = config.delay;

        let handle = tokio::spawn(async move {
            debug!("Worker {} started", worker_id);

            loop {
                let next = {
                    let mut frontier = frontier.lock().await;
                    if frontier.is_done() {
                        break;
                    }
                    frontier.next()
                };

                // Queue empty but a sibling is still visiting and may add links
                let Some(entry) = next else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                };

                tap.page_start(&entry.url).await;
                let result = AssertUnwindSafe(pipeline.visit(&mut session, &entry))
                    .catch_unwind()
                    .await;
                tap.page_end().await;

                match result {
                    Ok(Ok(outcome)) => {
                        {
                            let mut frontier = frontier.lock().await;
                            frontier.complete(true);
                            let accepted = outcome
                                .new_links
                                .iter()
                                .filter(|link| frontier.enqueue(link, entry.depth + 1))
                                .count();
                            debug!(
                                "[Worker {}] {} queued {} of {} links",
                                worker_id,
                                entry.url,
                                accepted,
                                outcome.new_links.len()
                            );
                        }
                        fold_outcome(&mut *aggregator.lock().await, outcome);
                    }
                    Ok(Err(e)) => {
                        warn!("Navigation failed for {}: {}", entry.url, e);
                        frontier.lock().await.complete(false);
                        aggregator.lock().await.record_navigation_failure();
                    }
                    // The visit still has to be completed or siblings wait on it forever.
                    Err(_) => {
                        error!("[Worker {}] visit of {} panicked", worker_id, entry.url);
                        frontier.lock().await.complete(false);
                        aggregator.lock().await.record_navigation_failure();
                    }
                }

                let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                progress_bar.set_message(format!("Crawling... {} pages processed", count));
                if let Some(ref callback) = progress_callback {
                    callback(format!("[{}] {}", count, entry.url));
                }

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            debug!("Worker {} finished", worker_id);
        });
        worker_handles.push(handle);
    }

    for result in join_all(worker_handles).await {
        if let Err(e) = result {
            warn!("Worker task failed: {}", e);
        }
    }
    // The correlator finishes once the last tap is gone.
    drop(tap);

    let traffic = match correlator_handle.await {
        Ok(report) => report,
        Err(e) => {
            warn!("Traffic correlator failed: {}", e);
            TrafficReport::default()
        }
    };

    let frontier = frontier.lock().await;
    let mut aggregator = aggregator.lock().await;
    aggregator.record_request(traffic.stats.requests_observed);
    aggregator.record_asset_request(traffic.stats.asset_requests);
    if frontier.is_tripped() {
        aggregator.record_breaker_tripped();
    }

    let mut artifacts = traffic.artifacts.clone();
    artifacts.extend(finalize(&aggregator, &traffic, &config));

    let summary = aggregator.summary();
    progress_bar.finish_with_message(format!(
        "Crawl complete! {} pages visited",
        summary.pages_visited
    ));

    Ok(CrawlReport {
        summary,
        visited: frontier.dequeued().to_vec(),
        artifacts,
    })
}
