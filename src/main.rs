//! Reverb - HTTP traffic replay, comparison, and capture

use clap::Parser;
use reverb::capture::{self, CaptureConfig};
use reverb::compare::VolatileConfig;
use reverb::error::{ExitCode, ReverbError};
use reverb::input::nginx::{NginxConverter, NginxFormat};
use reverb::input::{apply_filter, Filter};
use reverb::model::RunData;
use reverb::output;
use reverb::replay::{NullProgress, ProgressBar, ProgressSink, ReplayConfig, Replayer};
use reverb::rules;
use reverb::{NAME, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Reverb - HTTP traffic replay, comparison, and capture
#[derive(Parser)]
#[command(name = NAME)]
#[command(version = VERSION)]
#[command(about = "Replay captured HTTP traffic against one or more targets")]
#[command(
    long_about = "Reverb replays captured HTTP traffic against one or more targets \
    with bounded concurrency, compares responses with volatile-field masking, and \
    evaluates regression rules against the aggregated results.\n\n\
    A capture mode runs a recording reverse proxy that writes live traffic into \
    the same replayable JSON-Lines format."
)]
struct Cli {
    /// Targets to replay against (host:port, optionally with scheme)
    #[arg(value_name = "TARGET")]
    targets: Vec<String>,

    /// Path to the input log file
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Number of concurrent requests
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Timeout for one request (ms)
    #[arg(long, default_value_t = 5000)]
    timeout: u64,

    /// Delay between entries (ms)
    #[arg(long, default_value_t = 0)]
    delay: u64,

    /// Limit the number of entries to replay (0 = all)
    #[arg(long, default_value_t = 0)]
    limit: usize,

    /// Only replay entries with this method (e.g. GET)
    #[arg(long)]
    filter_method: Option<String>,

    /// Only replay entries whose path contains this substring
    #[arg(long)]
    filter_path: Option<String>,

    /// Parse the input file and print entries without sending requests
    #[arg(long)]
    dry_run: bool,

    /// Output the summary only
    #[arg(long)]
    summary_only: bool,

    /// Output results as JSON
    #[arg(long)]
    output_json: bool,

    /// Compare responses between targets
    #[arg(long)]
    compare: bool,

    /// Maximum requests per second (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    rate_limit: u32,

    /// Show the progress bar
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    progress: bool,

    /// Authorization header value (e.g. 'Bearer token123')
    #[arg(long)]
    auth: Option<String>,

    /// Custom header in 'Key: Value' form (repeatable)
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Generate an HTML report at this path
    #[arg(long)]
    html_report: Option<PathBuf>,

    /// Convert an nginx log to the input format, writing to this path
    #[arg(long)]
    parse_nginx: Option<PathBuf>,

    /// Nginx log format (combined or common)
    #[arg(long, default_value = "combined")]
    nginx_format: String,

    /// Mask common volatile fields (timestamps, IDs) in comparisons
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    ignore_volatile: bool,

    /// Additional JSON field to mask (repeatable)
    #[arg(long = "ignore-field")]
    ignore_fields: Vec<String>,

    /// Additional regex for fields to mask (repeatable)
    #[arg(long = "ignore-pattern")]
    ignore_patterns: Vec<String>,

    /// Report diffs even when only volatile fields differ
    #[arg(long)]
    show_volatile_diffs: bool,

    /// Run as a recording reverse proxy
    #[arg(long)]
    capture: bool,

    /// Capture mode listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Upstream base URL to proxy to (e.g. http://production.api.com)
    #[arg(long)]
    upstream: Option<String>,

    /// Capture output file path
    #[arg(long, default_value = "captured.jsonl")]
    output: PathBuf,

    /// Also stream capture records to stdout
    #[arg(long)]
    stream: bool,

    /// TLS certificate path (PEM)
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// TLS key path (PEM)
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Regression rules file (YAML)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Baseline run JSON for latency regression rules
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Log format (pretty, json, compact)
    #[arg(long, default_value = "compact")]
    log_format: String,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    e.print().ok();
                    std::process::exit(0);
                }
                _ => ExitCode::InvalidArgs,
            };
            e.print().ok();
            std::process::exit(code.code());
        }
    };

    init_logging(&cli.log_level, &cli.log_format);

    let code = run(cli).await;
    std::process::exit(code.code());
}

fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("reverb={}", level)));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn run(cli: Cli) -> ExitCode {
    if cli.parse_nginx.is_some() {
        return run_parse_nginx(&cli);
    }

    if cli.dry_run {
        return run_dry_run(&cli);
    }

    if cli.capture {
        return run_capture(cli).await;
    }

    run_replay(cli).await
}

fn run_parse_nginx(cli: &Cli) -> ExitCode {
    let Some(input_file) = &cli.input_file else {
        eprintln!("Error: --input-file is required");
        return ExitCode::InvalidArgs;
    };
    let output = cli.parse_nginx.as_ref().expect("checked by caller");

    let format = match cli.nginx_format.parse::<NginxFormat>() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::InvalidArgs;
        }
    };

    info!(input = ?input_file, output = ?output, "Converting nginx logs");

    match NginxConverter::new(format).convert(input_file, output) {
        Ok(stats) => {
            println!(
                "Parsed {} requests, skipped {} invalid lines",
                stats.parsed, stats.skipped
            );
            ExitCode::Ok
        }
        Err(e) => handle_error("Failed to parse nginx logs", &e),
    }
}

fn run_dry_run(cli: &Cli) -> ExitCode {
    let Some(input_file) = &cli.input_file else {
        eprintln!("Error: --input-file is required");
        return ExitCode::InvalidArgs;
    };

    match reverb::input::dry_run(input_file) {
        Ok(()) => ExitCode::Ok,
        Err(e) => handle_error("Dry run failed", &e),
    }
}

async fn run_capture(cli: Cli) -> ExitCode {
    let Some(upstream) = cli.upstream.clone().filter(|u| !u.trim().is_empty()) else {
        eprintln!("Error: --upstream is required in capture mode");
        return ExitCode::InvalidArgs;
    };

    let config = CaptureConfig {
        listen: cli.listen.clone(),
        upstream,
        output: cli.output.clone(),
        stream: cli.stream,
        tls_cert: cli.tls_cert.clone(),
        tls_key: cli.tls_key.clone(),
    };

    let shutdown = abort_on_ctrl_c();

    match capture::serve(config, shutdown).await {
        Ok(()) => ExitCode::Ok,
        Err(e) => handle_error("Failed to start reverse proxy", &e),
    }
}

async fn run_replay(cli: Cli) -> ExitCode {
    let Some(input_file) = &cli.input_file else {
        eprintln!("Error: --input-file is required");
        return ExitCode::InvalidArgs;
    };

    if cli.targets.is_empty() {
        eprintln!("Error: at least one target is required");
        return ExitCode::InvalidArgs;
    }

    let entries = match reverb::input::read_entries(input_file, cli.limit) {
        Ok(entries) => entries,
        Err(e) => return handle_error("Failed to read input file", &e),
    };

    let filter = Filter {
        method: cli.filter_method.clone(),
        path: cli.filter_path.clone(),
    };
    let entries = apply_filter(entries, &filter);

    let volatile = cli
        .ignore_volatile
        .then(|| VolatileConfig::from_flags(&cli.ignore_fields, &cli.ignore_patterns));

    let config = ReplayConfig {
        targets: cli.targets.clone(),
        concurrency: cli.concurrency,
        timeout: Duration::from_millis(cli.timeout),
        delay: Duration::from_millis(cli.delay),
        rate_limit: cli.rate_limit,
        compare: cli.compare,
        show_volatile_diffs: cli.show_volatile_diffs,
        auth: cli.auth.clone(),
        headers: cli.headers.clone(),
        tls: cli.tls_cert.is_some() && cli.tls_key.is_some(),
        volatile,
    };

    let replayer = match Replayer::new(config) {
        Ok(replayer) => replayer,
        Err(e) => return handle_error("Failed to build replayer", &e),
    };

    let progress: Arc<dyn ProgressSink> = if cli.progress && !cli.output_json {
        Arc::new(ProgressBar::new(entries.len()))
    } else {
        Arc::new(NullProgress)
    };

    let abort = abort_on_ctrl_c();
    let results = replayer.run(entries, progress, abort).await;

    let run = RunData {
        summary: reverb::aggregate::to_summary(reverb::aggregate::aggregate_results(&results)),
        results,
    };

    if let Some(report_path) = &cli.html_report {
        if let Err(e) = output::generate_html(
            &run.results,
            &input_file.to_string_lossy(),
            &cli.targets,
            cli.compare,
            report_path,
        ) {
            return handle_error("Failed to generate HTML report", &e);
        }
        info!(path = ?report_path, "HTML report written");
    }

    if cli.rules.is_some() {
        return run_rules(&cli, &run);
    }

    output_results(&cli, &run)
}

fn run_rules(cli: &Cli, current: &RunData) -> ExitCode {
    let rules_path = cli.rules.as_ref().expect("checked by caller");

    let config = match rules::parse_rules_file(rules_path) {
        Ok(config) => config,
        Err(e @ ReverbError::Config(_)) => {
            eprintln!("Invalid rules configuration: {}", e);
            return ExitCode::InvalidArgs;
        }
        Err(e) => return handle_error("Failed to load rules", &e),
    };

    let baseline = cli.baseline.as_ref().and_then(|path| {
        match rules::load_baseline(path) {
            Ok(baseline) => Some(baseline),
            Err(e) => {
                warn!("Failed to load baseline: {}", e);
                warn!("Latency rules will be skipped");
                None
            }
        }
    });

    let evaluation = rules::evaluate(&config, current, baseline.as_ref());

    if cli.output_json {
        if let Err(e) = output::print_rules_json(current, &evaluation) {
            return handle_error("Failed to encode JSON", &e);
        }
    } else {
        eprint!("{}", output::format_rule_result(&evaluation));
    }

    if evaluation.passed {
        ExitCode::Ok
    } else {
        ExitCode::Rules
    }
}

fn output_results(cli: &Cli, run: &RunData) -> ExitCode {
    if cli.output_json {
        if let Err(e) = output::print_json(run) {
            return handle_error("Failed to encode JSON", &e);
        }
    } else {
        if !cli.summary_only {
            output::print_results(&run.results, cli.compare);
        }
        output::print_summary(&run.results, cli.compare);
    }

    output::exit_for_results(&run.results, cli.compare)
}

/// Watch channel that flips on the first Ctrl-C.
fn abort_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            tx.send(true).ok();
        }
    });

    rx
}

fn handle_error(message: &str, err: &ReverbError) -> ExitCode {
    eprintln!("{}: {}", message, err);
    ExitCode::Runtime
}
