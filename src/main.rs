use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use stopwatch::config::{Config, ConfigError};
use stopwatch::event::codec;
use stopwatch::parser::{LogParser, ParserOptions};
use stopwatch::render::{OutputFormat, Renderer};
use stopwatch::sink::aggregated::collector::SortKey;
use stopwatch::sink::aggregated::exporter::{Exporter, WriterExporter};
use stopwatch::sink::aggregated::AggregatedSink;

/// Aggregates stopwatch measurement logs.
#[derive(Parser)]
#[command(name = "stopwatch", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Logging filter (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate a stopwatch log file and print per-tag statistics.
    Parse(ParseArgs),
    /// Aggregate measurement lines from stdin, printing each bucket as it closes.
    Aggregate(AggregateArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Args)]
struct ParseArgs {
    /// Log file to parse.
    file: PathBuf,

    /// Report malformed lines.
    #[arg(short, long)]
    verbose: bool,

    /// Sort key.
    #[arg(short, long, value_enum)]
    sort: Option<SortKey>,

    /// Reverse sort order.
    #[arg(short, long)]
    reverse: bool,

    /// Bucket width, e.g. 30s, 5m, 1h.
    #[arg(short, long)]
    interval: Option<String>,

    /// Output format.
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,
}

#[derive(Args)]
struct AggregateArgs {
    /// Bucket width, e.g. 30s, 5m, 1h.
    #[arg(short, long)]
    interval: Option<String>,

    /// Sort key.
    #[arg(short, long, value_enum)]
    sort: Option<SortKey>,

    /// Reverse sort order.
    #[arg(short, long)]
    reverse: bool,

    /// Output format.
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Version = &cli.command {
        println!("stopwatch {}", version::full());
        return Ok(());
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let log_level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;
    // Logs go to stderr so rendered output on stdout stays clean.
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    debug!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting stopwatch",
    );

    match cli.command {
        Command::Parse(args) => {
            apply_parse_args(&mut cfg, &args);
            cfg.validate()?;
            run_parse(&cfg, &args.file)
        }
        Command::Aggregate(args) => {
            apply_aggregate_args(&mut cfg, &args)?;
            cfg.validate()?;

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            let result = rt.block_on(run_aggregate(cfg));
            // The stdin reader may still be blocked in a read.
            rt.shutdown_background();
            result
        }
        Command::Version => Ok(()),
    }
}

fn apply_parse_args(cfg: &mut Config, args: &ParseArgs) {
    let parser = &mut cfg.parser;
    parser.verbose |= args.verbose;
    parser.reverse |= args.reverse;
    if let Some(sort) = args.sort {
        parser.sort = sort;
    }
    if let Some(interval) = &args.interval {
        parser.interval = Some(interval.clone());
    }
    if let Some(output) = args.output {
        parser.output = output;
    }
}

fn apply_aggregate_args(cfg: &mut Config, args: &AggregateArgs) -> Result<(), ConfigError> {
    let aggregator = &mut cfg.aggregator;
    aggregator.reverse |= args.reverse;
    if let Some(sort) = args.sort {
        aggregator.sort = sort;
    }
    if let Some(raw) = &args.interval {
        aggregator.set_interval(raw)?;
    }
    if let Some(output) = args.output {
        cfg.parser.output = output;
    }
    Ok(())
}

fn run_parse(cfg: &Config, file: &std::path::Path) -> Result<()> {
    let options = ParserOptions {
        verbose: cfg.parser.verbose,
        sort: cfg.parser.sort_spec(),
        interval: cfg.parser.interval()?,
    };

    let outcome = LogParser::new(options).parse_path(file)?;
    info!(
        file = %file.display(),
        lines = outcome.lines_read,
        measurements = outcome.measurements,
        skipped = outcome.skipped,
        buckets = outcome.buckets.len(),
        "parsed log"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    Renderer::new(cfg.parser.output)
        .render(&outcome.buckets, &mut out)
        .context("writing report")?;
    out.flush().context("writing report")
}

async fn run_aggregate(cfg: Config) -> Result<()> {
    let ctx = CancellationToken::new();

    let mut sink = AggregatedSink::new(cfg.aggregator.clone());
    sink.add_exporter(Exporter::Writer(WriterExporter::stdout(Renderer::new(
        cfg.parser.output,
    ))));
    sink.start(ctx.clone()).await?;
    let sink = Arc::new(sink);

    let reader_sink = Arc::clone(&sink);
    let reader = tokio::task::spawn_blocking(move || -> io::Result<usize> {
        let mut lines = 0usize;
        for line in io::stdin().lock().lines() {
            let line = line?;
            lines += 1;
            match codec::decode(&line) {
                Ok(Some(event)) => {
                    // Replayed input waits for queue space instead of dropping.
                    if reader_sink.submit_blocking(event).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(line_number = lines, error = %e, "skipping malformed line"),
            }
        }
        Ok(lines)
    });

    tokio::select! {
        result = reader => {
            let lines = result.context("stdin reader panicked")?.context("reading stdin")?;
            info!(lines, "end of input");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
    }

    let emitted = sink.flush().await;
    debug!(emitted, "final flush");
    sink.stop().await;
    ctx.cancel();

    let stats = sink.stats();
    info!(
        submitted = stats.submitted,
        dropped = stats.dropped,
        late = stats.late,
        invalid = stats.invalid,
        flushed_buckets = stats.flushed_buckets,
        "stopwatch stopped"
    );

    Ok(())
}
