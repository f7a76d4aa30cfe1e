// The fixed sequence of stages run against every visited page.
//
// Only navigation can fail a visit. Every later stage runs under its own
// timeout and a failure just leaves that stage's contribution out of the
// outcome, with the error kept in `VisitOutcome::failures`.

use crate::aggregator::PageResult;
use crate::config::{RunConfig, RunMode};
use crate::error::{Stage, StageError};
use crate::frontier::FrontierEntry;
use crate::scope::{Scope, normalize_url};
use chrono::Utc;
use recognizer_scanner::analyzers::{
    CaptchaSolver, EndpointAnalyzer, FormInteractor, RuntimeEndpointCollector, SecretScanner,
    TechnologyDetector,
};
use recognizer_scanner::baseline::{
    FormFieldInspector, HeaderTechnologyDetector, InlinePathAnalyzer, ObservedCallCollector,
    PatternSecretScanner,
};
use recognizer_scanner::links::same_origin;
use recognizer_scanner::{
    BrowserSession, Endpoint, FormOutcome, PageContent, ScanError, Secret, Technology,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The external analyzers a visit delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub technologies: Arc<dyn TechnologyDetector>,
    pub static_analyzer: Arc<dyn EndpointAnalyzer>,
    pub runtime_endpoints: Arc<dyn RuntimeEndpointCollector>,
    pub secrets: Arc<dyn SecretScanner>,
    pub forms: Arc<dyn FormInteractor>,
    /// No solver means the CAPTCHA stage is skipped.
    pub captcha: Option<Arc<dyn CaptchaSolver>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            technologies: Arc::new(HeaderTechnologyDetector),
            static_analyzer: Arc::new(InlinePathAnalyzer),
            runtime_endpoints: Arc::new(ObservedCallCollector),
            secrets: Arc::new(PatternSecretScanner),
            forms: Arc::new(FormFieldInspector),
            captcha: None,
        }
    }
}

impl Collaborators {
    pub fn with_captcha(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha = Some(solver);
        self
    }
}

/// What the analysis stages produced for one page, before dedup.
#[derive(Debug, Default)]
pub struct VisitAnalysis {
    pub technologies: Vec<Technology>,
    pub endpoints: Vec<Endpoint>,
    pub secrets: Vec<Secret>,
    pub forms: Option<FormOutcome>,
}

#[derive(Debug)]
pub struct VisitOutcome {
    pub page: PageResult,
    /// In-scope links, normalized and deduplicated, in page order.
    pub new_links: Vec<String>,
    pub analysis: VisitAnalysis,
    pub failures: Vec<StageError>,
}

async fn run_stage<T>(
    stage: Stage,
    timeout: Duration,
    fut: impl Future<Output = Result<T, ScanError>>,
) -> Result<T, StageError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(StageError::Failed { stage, source }),
        Err(_) => Err(StageError::TimedOut { stage, timeout }),
    }
}

enum Loaded<T> {
    NotYet,
    Ready(T),
    Failed,
}

impl<T> Loaded<T> {
    fn get(&self) -> Option<&T> {
        match self {
            Loaded::Ready(value) => Some(value),
            _ => None,
        }
    }
}

pub struct VisitPipeline {
    config: Arc<RunConfig>,
    scope: Arc<Scope>,
    collaborators: Collaborators,
}

impl VisitPipeline {
    pub fn new(config: Arc<RunConfig>, scope: Arc<Scope>, collaborators: Collaborators) -> Self {
        Self {
            config,
            scope,
            collaborators,
        }
    }

    /// Visit one page. `Err` means navigation itself failed.
    pub async fn visit<S: BrowserSession>(
        &self,
        session: &mut S,
        entry: &FrontierEntry,
    ) -> Result<VisitOutcome, StageError> {
        let config = &self.config;
        let stage_timeout = config.stage_timeout;

        run_stage(
            Stage::Navigate,
            config.navigation_timeout,
            session.navigate(&entry.url, config.navigation_timeout),
        )
        .await?;

        let mut failures = Vec::new();
        let mut analysis = VisitAnalysis::default();

        self.settle(session, &mut failures).await;

        if let Some(solver) = &self.collaborators.captcha {
            match run_stage(Stage::Captcha, stage_timeout, solver.solve(&mut *session)).await {
                Ok(true) => info!("Solved CAPTCHA on {}", entry.url),
                Ok(false) => {}
                Err(e) => failures.push(e),
            }
        }

        let title = match session.title().await {
            Ok(title) => title,
            Err(e) => {
                debug!("No title for {}: {}", entry.url, e);
                None
            }
        };

        let mut content = Loaded::NotYet;
        let mut scripts = Loaded::NotYet;

        if config.technologies {
            self.load_content(session, &mut content, Stage::Technologies, &mut failures)
                .await;
            if let Some(page) = content.get() {
                analysis.technologies = self.collaborators.technologies.detect(page);
            }
        }

        if config.static_analysis {
            self.load_content(session, &mut content, Stage::StaticAnalysis, &mut failures)
                .await;
            self.load_scripts(session, &entry.url, &mut scripts, Stage::StaticAnalysis, &mut failures)
                .await;

            let analyzer = &self.collaborators.static_analyzer;
            if let Some(page) = content.get() {
                analysis.endpoints.extend(analyzer.analyze(&page.html, &entry.url));
            }
            if let Some(bodies) = scripts.get() {
                for (src, body) in bodies {
                    analysis.endpoints.extend(analyzer.analyze(body, src));
                }
            }
        }

        if config.forms {
            match run_stage(
                Stage::Forms,
                stage_timeout,
                self.collaborators.forms.process_form(&mut *session),
            )
            .await
            {
                Ok(outcome) => analysis.forms = Some(outcome),
                Err(e) => failures.push(e),
            }
        }

        let calls = session.current_requests();
        analysis.endpoints.extend(
            self.collaborators
                .runtime_endpoints
                .collect(&entry.url, &calls),
        );

        if config.secrets {
            self.load_content(session, &mut content, Stage::Secrets, &mut failures)
                .await;
            self.load_scripts(session, &entry.url, &mut scripts, Stage::Secrets, &mut failures)
                .await;

            let scanner = &self.collaborators.secrets;
            if let Some(page) = content.get() {
                analysis.secrets.extend(scanner.scan(&page.html, &entry.url));
            }
            if let Some(bodies) = scripts.get() {
                for (src, body) in bodies {
                    analysis.secrets.extend(scanner.scan(body, src));
                }
            }
        }

        let (link_count, new_links) =
            match run_stage(Stage::Links, stage_timeout, session.extract_links()).await {
                Ok(links) => (links.len(), self.filter_links(links)),
                Err(e) => {
                    failures.push(e);
                    (0, Vec::new())
                }
            };

        for failure in &failures {
            warn!("{}: {}", entry.url, failure);
        }

        let page = PageResult {
            url: entry.url.clone(),
            depth: entry.depth,
            title,
            link_count,
            timestamp_ms: Utc::now().timestamp_millis(),
            status: content.get().and_then(|c| c.status),
        };

        Ok(VisitOutcome {
            page,
            new_links,
            analysis,
            failures,
        })
    }

    async fn settle<S: BrowserSession>(&self, session: &mut S, failures: &mut Vec<StageError>) {
        let settle = self.config.settle;
        match self.config.mode {
            RunMode::Headless => {
                match run_stage(
                    Stage::Settle,
                    settle.idle_timeout,
                    session.wait_for_network_idle(settle.idle_timeout),
                )
                .await
                {
                    Ok(()) => {}
                    // A page that never goes quiet is still worth analysing.
                    Err(StageError::TimedOut { .. }) => {
                        debug!("Network never went idle, continuing after grace period")
                    }
                    Err(e) => failures.push(e),
                }
                tokio::time::sleep(settle.grace).await;
            }
            RunMode::Interactive => tokio::time::sleep(settle.interactive_delay).await,
        }
    }

    async fn load_content<S: BrowserSession>(
        &self,
        session: &mut S,
        slot: &mut Loaded<PageContent>,
        stage: Stage,
        failures: &mut Vec<StageError>,
    ) {
        if !matches!(slot, Loaded::NotYet) {
            return;
        }
        *slot = match run_stage(stage, self.config.stage_timeout, session.content()).await {
            Ok(content) => Loaded::Ready(content),
            Err(e) => {
                failures.push(e);
                Loaded::Failed
            }
        };
    }

    /// Same-origin script bodies, fetched once per page and capped.
    async fn load_scripts<S: BrowserSession>(
        &self,
        session: &mut S,
        page_url: &str,
        slot: &mut Loaded<Vec<(String, String)>>,
        stage: Stage,
        failures: &mut Vec<StageError>,
    ) {
        if !matches!(slot, Loaded::NotYet) {
            return;
        }
        let timeout = self.config.stage_timeout;

        let sources = match run_stage(stage, timeout, session.script_sources()).await {
            Ok(sources) => sources,
            Err(e) => {
                failures.push(e);
                *slot = Loaded::Failed;
                return;
            }
        };

        let mut bodies = Vec::new();
        for src in sources
            .into_iter()
            .filter(|src| same_origin(page_url, src))
            .take(self.config.max_scripts_per_page)
        {
            match run_stage(stage, timeout, session.fetch_script(&src)).await {
                Ok(body) => bodies.push((src, body)),
                Err(e) => debug!("Skipping script {}: {}", src, e),
            }
        }
        *slot = Loaded::Ready(bodies);
    }

    fn filter_links(&self, links: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        links
            .into_iter()
            .filter(|link| self.scope.admits(link))
            .filter_map(|link| normalize_url(&link))
            .filter(|link| seen.insert(link.clone()))
            .collect()
    }
}
