//! latency-doctor: reconstruct request and call timelines from a diagnostic
//! log and report where the time went.
//!
//! # Usage
//! ```text
//! latency-doctor /var/log/portal.log
//! tail -n 10000 /var/log/portal.log | latency-doctor -
//! ```
//!
//! The report goes to stdout; the tool's own diagnostics go to stderr. Flags
//! are not recognized and arguments past the first are ignored. The
//! exit status is always 0: unreadable or malformed input yields a partial
//! (possibly empty) report rather than a failure.

use std::fs::File;
use std::io::{self, BufReader, Write};

use clap::Parser;

use latency_doctor::analyzer::LogAnalyzer;
use latency_doctor::config::ObservabilityConfig;
use latency_doctor::observability::logging;

#[derive(Parser, Default)]
#[command(name = "latency-doctor")]
#[command(about = "Latency root-cause report from diagnostic logs", long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Log file to analyze; `-` or nothing reads standard input
    #[arg(allow_hyphen_values = true)]
    input: Option<String>,

    /// Anything after the first argument is ignored
    #[arg(allow_hyphen_values = true, trailing_var_arg = true, hide = true)]
    rest: Vec<String>,
}

fn main() {
    if let Err(e) = logging::init(&ObservabilityConfig::default()) {
        eprintln!("logging unavailable: {}", e);
    }

    let cli = Cli::try_parse().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Unusable arguments, reading standard input");
        Cli::default()
    });
    if !cli.rest.is_empty() {
        tracing::warn!(ignored = ?cli.rest, "Extra arguments ignored");
    }

    let mut analyzer = LogAnalyzer::new();
    let result = match cli.input.as_deref() {
        None | Some("-") => analyzer.analyze_reader(io::stdin().lock()),
        Some(path) => {
            File::open(path).and_then(|file| analyzer.analyze_reader(BufReader::new(file)))
        }
    };
    if let Err(e) = result {
        tracing::error!(
            input = cli.input.as_deref().unwrap_or("-"),
            error = %e,
            "Failed to read log input"
        );
    }

    let report = analyzer.report();
    let mut stdout = io::stdout().lock();
    if let Err(e) = write!(stdout, "{}", report).and_then(|_| stdout.flush()) {
        tracing::error!(error = %e, "Failed to write report");
    }
}
