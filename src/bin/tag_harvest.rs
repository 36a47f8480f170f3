use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use tag_harvester::app::{App, ProgressSink, RunOutcome, ScanResult};
use tag_harvester::booru::{ApiSource, HttpBooruClient};
use tag_harvester::cancel::CancellationToken;
use tag_harvester::config::{ConfigLoader, ConfigOverrides, OutputTarget, ResolvedConfig};
use tag_harvester::domain::{Layout, ScheduleMode};
use tag_harvester::error::HarvestError;
use tag_harvester::output::{JsonOutput, OutputMode, TracingSink};
use tag_harvester::store::{ArchiveStore, FolderStore, OutputStore};
use tag_harvester::tags::TagSource;

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "tag-harvest")]
#[command(about = "Resumable image harvester driven by a file of tag queries")]
#[command(version)]
struct Cli {
    /// Print the final report as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Harvest every tag in the tag file, resuming after failures")]
    Run(RunArgs),
    #[command(about = "Count the records already in the output store")]
    Scan(StoreArgs),
}

#[derive(Args, Clone)]
struct StoreArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    layout: Option<Layout>,

    /// Output directory (folders layout) or base directory (archive layout).
    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Tag file, one query per line.
    #[arg(long)]
    tags: Option<PathBuf>,

    #[arg(long)]
    source: Option<ApiSource>,

    #[arg(long)]
    start_line: Option<u64>,

    #[arg(long)]
    batch_width: Option<usize>,

    /// Accepted items per tag.
    #[arg(long)]
    quota: Option<usize>,

    /// Run every tag of a window in parallel.
    #[arg(long)]
    concurrent: bool,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    proxy: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<HarvestError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::Cancelled => EXIT_INTERRUPTED,
        HarvestError::Http(_)
        | HarvestError::ApiStatus { .. }
        | HarvestError::ApiParse(_)
        | HarvestError::AssetStatus { .. }
        | HarvestError::RetriesExhausted { .. } => 3,
        other if other.is_fatal() => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Run(args) => run_harvest(args, output_mode),
        Commands::Scan(args) => run_scan(args, output_mode),
    }
}

fn run_harvest(args: RunArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let overrides = ConfigOverrides {
        source: args.source,
        tags_file: args.tags,
        layout: args.store.layout,
        output_dir: args.store.output,
        timeout_secs: args.timeout,
        proxy: args.proxy,
        start_line: args.start_line,
        batch_width: args.batch_width,
        quota: args.quota,
        mode: args.concurrent.then_some(ScheduleMode::Concurrent),
    };
    let resolved = ConfigLoader::resolve(args.store.config.as_deref(), overrides)?;

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping at the next request boundary");
        handler_token.cancel();
    })
    .into_diagnostic()?;

    match resolved.output.clone() {
        OutputTarget::Folders { root } => {
            harvest_with_store(resolved, FolderStore::new(root), cancel, output_mode)
        }
        OutputTarget::Archive {
            archive,
            log,
            staging,
        } => harvest_with_store(
            resolved,
            ArchiveStore::new(archive, log, staging),
            cancel,
            output_mode,
        ),
    }
}

fn harvest_with_store<S: OutputStore>(
    resolved: ResolvedConfig,
    store: S,
    cancel: CancellationToken,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    tracing::info!(
        tags = %resolved.tags_file.display(),
        source = ?resolved.source,
        mode = ?resolved.run.mode,
        "starting harvest"
    );
    let client = HttpBooruClient::new(&resolved.client)?;
    let app = App::new(
        client,
        store,
        TagSource::new(resolved.tags_file),
        resolved.source,
        resolved.run,
        cancel,
    );
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &TracingSink,
    };
    let report = app.run(sink)?;
    if matches!(output_mode, OutputMode::Json) {
        JsonOutput::print_run(&report).into_diagnostic()?;
    }
    Ok(match report.outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Cancelled => ExitCode::from(EXIT_INTERRUPTED),
        RunOutcome::GaveUp => ExitCode::from(1),
    })
}

fn run_scan(args: StoreArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let overrides = ConfigOverrides {
        layout: args.layout,
        output_dir: args.output,
        ..ConfigOverrides::default()
    };
    let resolved = ConfigLoader::resolve(args.config.as_deref(), overrides)?;
    let records = match resolved.output {
        OutputTarget::Folders { root } => FolderStore::new(root).scan()?.len(),
        OutputTarget::Archive {
            archive,
            log,
            staging,
        } => ArchiveStore::new(archive, log, staging).scan()?.len(),
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_scan(&ScanResult { records }).into_diagnostic()?,
        OutputMode::Human => println!("{records} records already stored"),
    }
    Ok(ExitCode::SUCCESS)
}
