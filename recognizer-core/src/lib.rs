// Crawl orchestration for Recognizer: the breadth-first frontier, the
// per-page visit pipeline, traffic correlation and the artifacts written
// at the end of a run.

use colored::Colorize;

pub mod aggregator;
pub mod config;
pub mod correlator;
pub mod crawl;
pub mod emit;
pub mod error;
pub mod frontier;
pub mod pipeline;
pub mod scope;

pub use aggregator::{PageResult, RunAggregator, RunSummary};
pub use config::{OutputFormat, RunConfig, RunMode, ScopeConfig};
pub use crawl::{CrawlProgressCallback, CrawlReport, execute_crawl};
pub use error::{EmitError, SetupError, Stage, StageError};
pub use pipeline::Collaborators;

const BANNER: &str = r#"
  ┌─┐┌─┐┌─┐┌─┐┌─┐┌┐┌┬┌─┐┌─┐┬─┐
  ├┬┘├┤ │  │ ││ ┬││││┌─┘├┤ ├┬┘
  ┴└─└─┘└─┘└─┘└─┘┘└┘┴└─┘└─┘┴└─"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_cyan().bold());
    println!(
        "  {} {}\n",
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_white(),
        "scoped crawling and traffic capture".bright_black()
    );
}
