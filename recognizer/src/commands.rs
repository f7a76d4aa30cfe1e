use crate::CLAP_STYLING;
use clap::{arg, command};

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("recognizer")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("recognizer")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" ... "Increase log verbosity (-v info, -vv debug)")
                .required(false)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl a target breadth-first, capturing every request the pages make and \
                writing the traffic and discoveries to an output directory.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The URL to start crawling from (http:// is assumed if missing)"),
                )
                .arg(
                    arg!(--"max-pages" <NUM>)
                        .required(false)
                        .help("Stop after this many page visits")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("100"),
                )
                .arg(
                    arg!(--"max-depth" <NUM>)
                        .required(false)
                        .help("How many links away from the start page to follow")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("3"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Directory to write artifacts to")
                        .default_value("./recognizer-out"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Output formats to write, repeatable: json, jsonl, har, raw")
                        .value_delimiter(',')
                        .action(clap::ArgAction::Append)
                        .value_parser(["json", "jsonl", "har", "raw"])
                        .default_values(["json", "jsonl"]),
                )
                .arg(
                    arg!(--"subdomains" <PATTERN>)
                        .required(false)
                        .help("Also follow subdomains matching a wildcard, e.g. '*.example.com'"),
                )
                .arg(
                    arg!(--"cross-origin")
                        .required(false)
                        .help("Follow links to any host (default: stay on the target host)")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"block-ext" <EXT>)
                        .required(false)
                        .help("Extra file extensions never to visit, comma separated")
                        .value_delimiter(',')
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"delay" <MILLISECONDS>)
                        .required(false)
                        .help("Pause between page visits")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Navigation timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("30"),
                )
                .arg(
                    arg!(-t --"threads" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of concurrent page visits.")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("1"),
                )
                .arg(
                    arg!(--"interactive")
                        .required(false)
                        .help("Use a fixed settle delay instead of waiting for network idle")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"static-analysis")
                        .required(false)
                        .help("Look for endpoints in page and script source")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"no-forms")
                        .required(false)
                        .help("Skip form inspection")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"no-secrets")
                        .required(false)
                        .help("Skip the secret scan of pages and scripts")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"user-agent" <UA>)
                        .required(false)
                        .help("User-Agent header to send"),
                ),
        )
}
