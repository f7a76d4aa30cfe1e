use clap::ArgMatches;
use colored::Colorize;
use recognizer_core::config::{ScopeConfig, parse_target};
use recognizer_core::emit::report::render_summary_text;
use recognizer_core::{
    Collaborators, CrawlProgressCallback, OutputFormat, RunConfig, RunMode, SetupError,
    execute_crawl,
};
use recognizer_scanner::HttpSessionFactory;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Exit code for runs that never got off the ground.
pub const SETUP_FAILURE_EXIT_CODE: i32 = 2;

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.contains("://") {
        return Url::parse(line).ok().map(|_| line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    match Url::parse(&with_scheme) {
        Ok(url) if url.host_str().is_some() && !line.contains(char::is_whitespace) => {
            Some(with_scheme)
        }
        _ => None,
    }
}

/// Turn `--format` values into output formats, rejecting unknown names.
pub fn parse_formats<'a>(
    values: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<OutputFormat>, SetupError> {
    values
        .into_iter()
        .map(|value| {
            OutputFormat::from_str(value).ok_or_else(|| {
                SetupError::InvalidConfig(format!("unknown output format '{}'", value))
            })
        })
        .collect()
}

/// Build a run configuration from the `crawl` subcommand's arguments.
pub fn build_run_config(sub_matches: &ArgMatches) -> Result<RunConfig, SetupError> {
    let raw_url = sub_matches
        .get_one::<String>("url")
        .map(String::as_str)
        .unwrap_or_default();
    let target = parse_url_line(raw_url).ok_or_else(|| SetupError::InvalidTarget {
        url: raw_url.to_string(),
        reason: "not a URL".to_string(),
    })?;
    let mut config = RunConfig::for_url(parse_target(&target)?);

    if let Some(max_pages) = sub_matches.get_one::<usize>("max-pages") {
        config = config.with_max_pages(*max_pages);
    }
    if let Some(max_depth) = sub_matches.get_one::<usize>("max-depth") {
        config = config.with_max_depth(*max_depth);
    }
    if let Some(output) = sub_matches.get_one::<String>("output") {
        let expanded = shellexpand::tilde(output);
        config = config.with_output_dir(expanded.into_owned());
    }
    if let Some(formats) = sub_matches.get_many::<String>("format") {
        config = config.with_formats(parse_formats(formats.map(String::as_str))?);
    }

    let mut scope = ScopeConfig {
        same_origin: !sub_matches.get_flag("cross-origin"),
        subdomain_pattern: sub_matches.get_one::<String>("subdomains").cloned(),
        ..ScopeConfig::default()
    };
    if let Some(extensions) = sub_matches.get_many::<String>("block-ext") {
        for ext in extensions {
            let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            if !ext.is_empty() && !scope.blocked_extensions.contains(&ext) {
                scope.blocked_extensions.push(ext);
            }
        }
    }
    config = config.with_scope(scope);

    if let Some(delay) = sub_matches.get_one::<u64>("delay") {
        config = config.with_delay(Duration::from_millis(*delay));
    }
    if let Some(timeout) = sub_matches.get_one::<u64>("timeout") {
        config = config.with_navigation_timeout(Duration::from_secs(*timeout));
    }
    if let Some(threads) = sub_matches.get_one::<usize>("threads") {
        config = config.with_workers(*threads);
    }
    if sub_matches.get_flag("interactive") {
        config = config.with_mode(RunMode::Interactive);
    }
    if let Some(user_agent) = sub_matches.get_one::<String>("user-agent") {
        config = config.with_user_agent(user_agent.as_str());
    }

    Ok(config
        .with_static_analysis(sub_matches.get_flag("static-analysis"))
        .with_forms(!sub_matches.get_flag("no-forms"))
        .with_secrets(!sub_matches.get_flag("no-secrets")))
}

/// Pick the log filter: RUST_LOG wins, then -v/-vv, then warnings only.
pub fn log_filter(verbosity: u8, quiet: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    };
    EnvFilter::new(level)
}

pub fn init_tracing(verbosity: u8, quiet: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbosity, quiet))
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_run_config(config: &RunConfig) {
    println!("{}", "Crawl configuration".bright_blue().bold());
    println!("  {} {}", "Target:".bold(), config.target);
    println!("  {} {}", "Workers:".bold(), config.workers);
    println!(
        "  {} {} pages, depth {}",
        "Limits:".bold(),
        config.max_pages,
        config.max_depth
    );
    let scope = if !config.scope.same_origin {
        "any host".to_string()
    } else if let Some(pattern) = &config.scope.subdomain_pattern {
        format!("same host plus {}", pattern)
    } else {
        "same host".to_string()
    };
    println!("  {} {}", "Scope:".bold(), scope);
    let formats: Vec<&str> = config.formats.iter().map(OutputFormat::as_str).collect();
    println!("  {} {}", "Formats:".bold(), formats.join(", "));
    println!("  {} {}\n", "Output:".bold(), config.output_dir.display());
}

/// Run the `crawl` subcommand and return the process exit code.
pub async fn handle_crawl(sub_matches: &ArgMatches, quiet: bool) -> i32 {
    let config = match build_run_config(sub_matches) {
        Ok(config) => config.with_progress(!quiet),
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e.to_string().red());
            return SETUP_FAILURE_EXIT_CODE;
        }
    };

    if !quiet {
        print_run_config(&config);
    }

    let factory = match HttpSessionFactory::new(&config.user_agent, config.navigation_timeout) {
        Ok(factory) => Arc::new(factory),
        Err(e) => {
            eprintln!("{} {}", "✗".red(), SetupError::from(e).to_string().red());
            return SETUP_FAILURE_EXIT_CODE;
        }
    };

    let progress_callback: Option<CrawlProgressCallback> = if quiet {
        None
    } else {
        Some(Arc::new(|line: String| tracing::info!("visited {}", line)))
    };

    match execute_crawl(config, factory, Collaborators::default(), progress_callback).await {
        Ok(report) => {
            if !quiet {
                println!("\n{}", render_summary_text(&report.summary));
                println!("{}", "Artifacts".bright_blue().bold());
                for path in &report.artifacts {
                    println!("  {} {}", "✓".green(), path.display());
                }
            }
            0
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e.to_string().red());
            SETUP_FAILURE_EXIT_CODE
        }
    }
}
