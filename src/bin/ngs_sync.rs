use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ngs_sync::classify::Selector;
use ngs_sync::config::{ConfigLoader, ResolvedConfig};
use ngs_sync::domain::{Category, EntryKind, LocalLayout, ProjectId};
use ngs_sync::engine::{ProgressSink, SyncEngine, SyncOptions};
use ngs_sync::error::SyncError;
use ngs_sync::http::{HttpDownloader, load_http_manifest};
use ngs_sync::ica::{IcaCliClient, IcaClient, IcaTransport, project_data_manifest};
use ngs_sync::manifest::load_upload_manifest;
use ngs_sync::output::{self, ConsoleProgress, JsonOutput, OutputMode};
use ngs_sync::report::SyncReport;
use ngs_sync::rsync::{RsyncClient, read_sample_ids};
use ngs_sync::s3::AwsCliStore;
use ngs_sync::tool::ToolRunner;

#[derive(Parser)]
#[command(name = "ngs-sync")]
#[command(about = "Resumable, parallel sync of sequencing data across ICA, S3, HTTP and rsync")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Config file (defaults to ./ngs-sync.json, then the user config dir)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "ICA projects")]
    Projects(ProjectsArgs),
    #[command(about = "ICA project data")]
    Data(DataArgs),
    #[command(about = "Upload local files to S3 and issue presigned links")]
    Upload(UploadArgs),
    #[command(about = "Pull per-sample analysis artifacts from the archive host over rsync")]
    Archive(ArchiveArgs),
    #[command(about = "Download files listed in an HTTP manifest")]
    Http(HttpArgs),
    #[command(about = "Check that external tools are installed")]
    Check,
}

#[derive(Args)]
struct ProjectsArgs {
    #[command(subcommand)]
    command: ProjectsCommand,
}

#[derive(Subcommand)]
enum ProjectsCommand {
    #[command(about = "List projects")]
    List,
}

#[derive(Args)]
struct DataArgs {
    #[command(subcommand)]
    command: DataCommand,
}

#[derive(Subcommand)]
enum DataCommand {
    #[command(about = "List project data")]
    List(DataListArgs),
    #[command(about = "Download FASTQ files under a project path")]
    Download(DataDownloadArgs),
}

#[derive(Args)]
struct DataListArgs {
    #[arg(long)]
    project_id: String,

    /// Only show data whose path starts with this prefix
    #[arg(long)]
    path: Option<String>,
}

#[derive(Args, Clone)]
struct TransferArgs {
    #[arg(long)]
    workers: Option<usize>,

    /// Per-transfer timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    dry_run: bool,

    /// Write a tab-separated report here
    #[arg(long)]
    report: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct DataDownloadArgs {
    #[arg(long)]
    project_id: String,

    #[arg(long)]
    path: String,

    #[arg(long)]
    output_dir: Utf8PathBuf,

    /// File name suffixes to select (defaults to the configured FASTQ suffixes)
    #[arg(long = "suffix")]
    suffixes: Vec<String>,

    /// Additional regex the file name must match
    #[arg(long)]
    pattern: Option<String>,

    #[command(flatten)]
    transfer: TransferArgs,
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long)]
    manifest: Utf8PathBuf,

    /// Presigned link validity in seconds
    #[arg(long)]
    expiry_secs: Option<u64>,

    #[command(flatten)]
    transfer: TransferArgs,
}

#[derive(Args)]
struct ArchiveArgs {
    /// One sample id per line; `#` lines are ignored
    #[arg(long)]
    samples: Utf8PathBuf,

    /// Artifact categories to pull (defaults to all archive categories)
    #[arg(long = "category", value_enum)]
    categories: Vec<Category>,

    #[command(flatten)]
    transfer: TransferArgs,
}

#[derive(Args)]
struct HttpArgs {
    #[arg(long)]
    manifest: Utf8PathBuf,

    #[arg(long)]
    output_dir: Utf8PathBuf,

    #[command(flatten)]
    transfer: TransferArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::Manifest(_)
        | SyncError::DuplicateIdentifier(_)
        | SyncError::DuplicateDestination(_)
        | SyncError::ManifestRead(_)
        | SyncError::Configuration(_)
        | SyncError::InvalidSelector(_)
        | SyncError::InvalidWorkers(_)
        | SyncError::ConfigRead(_)
        | SyncError::ConfigParse(_)
        | SyncError::InvalidProjectId(_)
        | SyncError::InvalidBucketName(_)
        | SyncError::InvalidSampleId(_) => 2,
        SyncError::Planning { .. }
        | SyncError::MissingTool(_)
        | SyncError::Tool { .. }
        | SyncError::Response { .. } => 3,
        SyncError::TransfersFailed { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Projects(args) => match args.command {
            ProjectsCommand::List => run_projects_list(output_mode),
        },
        Commands::Data(args) => match args.command {
            DataCommand::List(args) => run_data_list(args, output_mode),
            DataCommand::Download(args) => run_data_download(args, &config, output_mode),
        },
        Commands::Upload(args) => run_upload(args, &config, output_mode),
        Commands::Archive(args) => run_archive(args, &config, output_mode),
        Commands::Http(args) => run_http(args, &config, output_mode),
        Commands::Check => run_check(&config, output_mode),
    }
}

fn run_projects_list(output_mode: OutputMode) -> miette::Result<()> {
    let projects = IcaCliClient::new().list_projects()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_projects(&projects).into_diagnostic()?,
        OutputMode::Human => output::print_projects(&projects),
    }
    Ok(())
}

fn run_data_list(args: DataListArgs, output_mode: OutputMode) -> miette::Result<()> {
    let project: ProjectId = args.project_id.parse()?;
    let mut data = IcaCliClient::new().list_project_data(&project)?;
    if let Some(prefix) = args.path.as_deref() {
        data.retain(|item| item.path.starts_with(prefix));
    }
    match output_mode {
        OutputMode::Json => JsonOutput::print_project_data(&data).into_diagnostic()?,
        OutputMode::Human => output::print_project_data(&data),
    }
    Ok(())
}

fn run_data_download(
    args: DataDownloadArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let project: ProjectId = args.project_id.parse()?;
    let suffixes = if args.suffixes.is_empty() {
        config.fastq_suffixes.clone()
    } else {
        args.suffixes
    };
    let mut selector = Selector::path_prefix(args.path)
        .and(Selector::Kind(EntryKind::File))
        .and(Selector::name_suffix(&suffixes)?);
    if let Some(pattern) = args.pattern.as_deref() {
        selector = selector.and(Selector::name_pattern(pattern)?);
    }

    let options = sync_options(&args.transfer, config, None);
    let client = IcaCliClient::new().with_transfer_timeout(options.timeout);
    let data = client.list_project_data(&project)?;
    let manifest =
        project_data_manifest(data, &project, &LocalLayout::Flat(args.output_dir.clone()))?;

    let engine = SyncEngine::new(options)?;
    let report = engine.download(
        manifest,
        &selector,
        &args.output_dir,
        IcaTransport::new(client),
        progress_sink(output_mode),
    )?;
    finish(report, args.transfer.report.as_ref(), output_mode)
}

fn run_upload(
    args: UploadArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let manifest = load_upload_manifest(&args.manifest)?;
    let expiry = args.expiry_secs.map(Duration::from_secs);
    if expiry == Some(Duration::ZERO) {
        return Err(
            SyncError::Configuration("--expiry-secs must be positive".to_string()).into(),
        );
    }
    let options = sync_options(&args.transfer, config, expiry);
    let store = Arc::new(
        AwsCliStore::new(config.region.clone()).with_transfer_timeout(options.timeout),
    );

    let engine = SyncEngine::new(options)?;
    let report = engine.upload(manifest, &Selector::All, store, progress_sink(output_mode))?;
    finish(report, args.transfer.report.as_ref(), output_mode)
}

fn run_archive(
    args: ArchiveArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let rsync_config = config.rsync()?.clone();
    let categories = if args.categories.is_empty() {
        Category::ARCHIVE.to_vec()
    } else {
        args.categories
    };
    if let Some(category) = categories
        .iter()
        .find(|category| !Category::ARCHIVE.contains(*category))
    {
        return Err(SyncError::InvalidSelector(format!(
            "{category} is not an archive category"
        ))
        .into());
    }

    let samples = read_sample_ids(&args.samples)?;
    let options = sync_options(&args.transfer, config, None);
    let client = RsyncClient::new(rsync_config).with_transfer_timeout(options.timeout);
    let root = client.config().local_root.clone();
    let manifest = client.sample_manifest(&samples, &categories)?;

    let engine = SyncEngine::new(options)?;
    let report = engine.download(
        manifest,
        &Selector::All,
        &root,
        client,
        progress_sink(output_mode),
    )?;
    finish(report, args.transfer.report.as_ref(), output_mode)
}

fn run_http(
    args: HttpArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let manifest = load_http_manifest(&args.manifest, &args.output_dir)?;
    let options = sync_options(&args.transfer, config, None);
    let downloader = HttpDownloader::new(options.timeout)?;

    let engine = SyncEngine::new(options)?;
    let report = engine.download(
        manifest,
        &Selector::All,
        &args.output_dir,
        downloader,
        progress_sink(output_mode),
    )?;
    finish(report, args.transfer.report.as_ref(), output_mode)
}

fn run_check(config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let mut tools = vec![
        IcaCliClient::new().tool_info(),
        AwsCliStore::new(config.region.clone()).tool_info(),
    ];
    if let Some(rsync) = config.rsync.clone() {
        tools.push(RsyncClient::new(rsync).tool_info());
    } else {
        tools.push(ToolRunner::locate("rsync").info(&["--version"]));
    }
    match output_mode {
        OutputMode::Json => JsonOutput::print_tools(&tools).into_diagnostic()?,
        OutputMode::Human => output::print_tools(&tools),
    }
    if let Some(missing) = tools.iter().find(|tool| tool.path.is_none()) {
        return Err(SyncError::MissingTool(missing.name.clone()).into());
    }
    Ok(())
}

fn sync_options(
    transfer: &TransferArgs,
    config: &ResolvedConfig,
    expiry: Option<Duration>,
) -> SyncOptions {
    SyncOptions {
        workers: transfer.workers.unwrap_or(config.workers),
        dry_run: transfer.dry_run,
        timeout: transfer
            .timeout_secs
            .map(Duration::from_secs)
            .or(config.timeout),
        presign_expiry: expiry.unwrap_or(config.presign_expiry),
    }
}

fn progress_sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &ConsoleProgress,
    }
}

fn finish(
    report: SyncReport,
    tsv: Option<&Utf8PathBuf>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if let Some(path) = tsv {
        report.write_tsv(path)?;
        tracing::info!(path = %path, "wrote report");
    }
    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Human => output::print_summary(&report),
    }

    let summary = report.summary;
    if summary.failed > 0 {
        return Err(SyncError::TransfersFailed {
            failed: summary.failed,
            total: summary.total_candidates,
        }
        .into());
    }
    Ok(())
}
