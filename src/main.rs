//! h2fetch main entry point
//!
//! This is the command-line interface for the multiplexed HTTP/2 fetcher.

use anyhow::Context;
use clap::Parser;
use h2fetch::config::{
    config_from_file, load_file_config, parse_header, validate, Config, DataSource, MAX_WINDOW_BITS,
};
use h2fetch::output::OutputSink;
use h2fetch::request::BodySource;
use h2fetch::Driver;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// h2fetch: fetch URIs over multiplexed HTTP/2 connections
///
/// URIs sharing an origin are fetched over one connection. Response bodies
/// go to standard output, diagnostics to standard error. The exit status is
/// the number of origins that did not complete every request.
#[derive(Parser, Debug)]
#[command(name = "h2fetch")]
#[command(version)]
#[command(about = "A multiplexed HTTP/2 fetcher", long_about = None)]
struct Cli {
    /// URIs to fetch
    #[arg(value_name = "URI", required = true)]
    uris: Vec<String>,

    /// Increase logging verbosity (-v frames, -vv headers, -vvv everything)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Discard response bodies
    #[arg(short = 'n', long)]
    null_out: bool,

    /// Save bodies under the remote file name (not implemented)
    #[arg(short = 'O', long)]
    remote_name: bool,

    /// Idle read/write timeout in seconds
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Initial stream window size as a power of two
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u8).range(0..=MAX_WINDOW_BITS as i64))]
    window_bits: Option<u8>,

    /// Also fetch same-origin stylesheets, images and scripts
    #[arg(short = 'a', long)]
    get_assets: bool,

    /// Print timing statistics after each origin
    #[arg(short, long)]
    stat: bool,

    /// Extra request header, `name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Client certificate (PEM)
    #[arg(long, value_name = "FILE")]
    cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, value_name = "FILE")]
    key: Option<PathBuf>,

    /// Use cleartext HTTP/2 even for https URIs
    #[arg(long)]
    no_tls: bool,

    /// POST the contents of FILE (`-` for standard input)
    #[arg(short, long, value_name = "FILE")]
    data: Option<String>,

    /// Request each URI N times, bypassing deduplication
    #[arg(short, long, value_name = "N")]
    multiply: Option<u32>,

    /// Path to a TOML file with defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = build_config(&cli)?;

    if config.remote_name {
        tracing::warn!("--remote-name is not implemented; bodies are not saved");
    }

    let body = match &config.data {
        Some(source) => Some(load_body(source)?),
        None => None,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let mut driver = Driver::new(&config);
    if let Some(body) = body {
        driver = driver.with_body(body);
    }

    let mut bodies = OutputSink::new(config.null_out);
    let mut stats = io::stdout();
    let report = runtime.block_on(driver.run(&cli.uris, &mut bodies, &mut stats));

    if report.failures > 0 {
        tracing::info!(
            "{} of {} origins did not complete",
            report.failures,
            report.sessions.len()
        );
    }
    Ok(report.exit_code())
}

/// Merges the optional defaults file with command-line flags
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let file = load_file_config(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            config_from_file(&file)?
        }
        None => Config::default(),
    };

    config.null_out |= cli.null_out;
    config.remote_name |= cli.remote_name;
    config.get_assets |= cli.get_assets;
    config.stat |= cli.stat;
    config.tls.disabled |= cli.no_tls;

    if let Some(secs) = cli.timeout {
        config.timeout = Some(Duration::from_secs(secs));
    }
    if let Some(bits) = cli.window_bits {
        config.window_bits = Some(bits);
    }
    if let Some(multiply) = cli.multiply {
        config.multiply = multiply;
    }
    if let Some(data) = &cli.data {
        config.data = Some(DataSource::from_arg(data));
    }
    if cli.cert.is_some() {
        config.tls.cert_file = cli.cert.clone();
    }
    if cli.key.is_some() {
        config.tls.key_file = cli.key.clone();
    }
    for raw in &cli.headers {
        let (name, value) = parse_header(raw)?;
        config.headers.insert(name, value);
    }

    validate(&config)?;
    Ok(config)
}

fn load_body(source: &DataSource) -> anyhow::Result<BodySource> {
    match source {
        DataSource::Stdin => {
            BodySource::from_reader(io::stdin().lock()).context("Failed to read request body from stdin")
        }
        DataSource::File(path) => BodySource::open(path)
            .with_context(|| format!("Failed to open request body {}", path.display())),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("h2fetch=info,warn"),
            1 => EnvFilter::new("h2fetch=debug,info"),
            2 => EnvFilter::new("h2fetch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}
