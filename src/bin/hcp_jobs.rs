use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use hcp_pipeline_jobs::archive::Archive;
use hcp_pipeline_jobs::completion::{CheckMode, CompletionChecker};
use hcp_pipeline_jobs::config::{ConfigLoader, Context};
use hcp_pipeline_jobs::domain::{ProcessingStage, Registration, SubjectInfo};
use hcp_pipeline_jobs::driver::{
    BatchAction, BatchDriver, BatchOptions, BatchResult, expand_subject, run_statuses,
};
use hcp_pipeline_jobs::error::PipelineError;
use hcp_pipeline_jobs::output::{
    CheckItem, CheckResult, JsonOutput, OutputMode, RunningItem, RunningResult, StatusResult,
};
use hcp_pipeline_jobs::pipeline::Pipeline;
use hcp_pipeline_jobs::prereq::{ArchivePrereqs, PrereqChecker};
use hcp_pipeline_jobs::progress::{CollectingSink, LogSink, NoopSink, ProgressSink};
use hcp_pipeline_jobs::run_status::RunStatusChecker;
use hcp_pipeline_jobs::scheduler::PbsClient;
use hcp_pipeline_jobs::shadow::ShadowDispatcher;
use hcp_pipeline_jobs::status::{STATUS_HEADER, StatusReporter, write_status_file};
use hcp_pipeline_jobs::subject_list::{DEFAULT_SEPARATOR, TAB_SEPARATOR, parse_list};
use hcp_pipeline_jobs::submitter::SubmitOptions;

#[derive(Parser)]
#[command(name = "hcp-jobs")]
#[command(about = "Submit and track HCP processing pipelines on a PBS cluster")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    verbose: bool,

    /// JSON file with per-pipeline resource overrides.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Submit every eligible subject in a list")]
    Submit(SubmitArgs),
    #[command(about = "Check whether processing is complete")]
    Check(CheckArgs),
    #[command(about = "Write a tab-separated status report")]
    Status(StatusArgs),
    #[command(about = "Show which subjects are queued or running")]
    Running(ListArgs),
}

#[derive(Args, Clone)]
struct ListArgs {
    #[arg(long, value_enum)]
    pipeline: Pipeline,

    /// Subject file; relative names fall back to SUBJECT_FILES_DIR.
    #[arg(long)]
    subjects: String,

    /// Subject records are tab separated instead of colon separated.
    #[arg(long)]
    tab: bool,
}

#[derive(Args, Clone)]
struct SubmitArgs {
    #[command(flatten)]
    list: ListArgs,

    #[arg(long)]
    stage: Option<String>,

    #[arg(long)]
    reg_name: Option<String>,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    clean_output_first: bool,

    #[arg(long)]
    walltime: Option<u32>,

    #[arg(long)]
    vmem: Option<u32>,

    #[arg(long)]
    output_resource_suffix: Option<String>,

    #[arg(long)]
    setup_script: Option<Utf8PathBuf>,
}

#[derive(Args, Clone)]
struct CheckArgs {
    #[command(flatten)]
    list: ListArgs,

    #[arg(long)]
    reg_name: Option<String>,

    /// Report every missing file instead of stopping at the first.
    #[arg(long)]
    exhaustive: bool,
}

#[derive(Args, Clone)]
struct StatusArgs {
    #[command(flatten)]
    list: ListArgs,

    #[arg(long)]
    output: Utf8PathBuf,

    #[arg(long)]
    reg_name: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<PipelineError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &PipelineError) -> u8 {
    if error.is_configuration() || error.is_malformed_input() {
        return 2;
    }
    match error {
        PipelineError::Scheduler(_) | PipelineError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let ctx = ConfigLoader::from_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Submit(args) => run_submit(&ctx, args, output_mode, cli.verbose),
        Commands::Check(args) => run_check(&ctx, args, output_mode, cli.verbose),
        Commands::Status(args) => run_status(&ctx, args, output_mode),
        Commands::Running(args) => run_running(&ctx, args, output_mode),
    }
}

fn load_subjects(ctx: &Context, list: &ListArgs) -> Result<Vec<SubjectInfo>, PipelineError> {
    let path = ctx.resolve_subject_file(&list.subjects);
    let separator = if list.tab {
        TAB_SEPARATOR
    } else {
        DEFAULT_SEPARATOR
    };
    let subjects = parse_list(&path, separator)?;
    tracing::debug!(%path, count = subjects.len(), "loaded subject list");
    Ok(subjects)
}

fn parse_registration(value: Option<&str>) -> Result<Registration, PipelineError> {
    value
        .map(str::parse::<Registration>)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn run_submit(
    ctx: &Context,
    args: SubmitArgs,
    output_mode: OutputMode,
    verbose: bool,
) -> miette::Result<ExitCode> {
    let descriptor = args.list.pipeline.descriptor();
    let subjects = load_subjects(ctx, &args.list)?;
    let starting_stage = args
        .stage
        .as_deref()
        .map(str::parse::<ProcessingStage>)
        .transpose()?
        .unwrap_or(ProcessingStage::PrepareScripts);
    let options = BatchOptions {
        force: args.force,
        dry_run: args.dry_run,
        submit: SubmitOptions {
            setup_script: args.setup_script,
            walltime_limit_hours: args.walltime,
            vmem_limit_gbs: args.vmem,
            output_resource_suffix: args.output_resource_suffix,
            registration: parse_registration(args.reg_name.as_deref())?,
            clean_output_first: args.clean_output_first,
            starting_stage,
        },
    };

    let scheduler = PbsClient::new(ctx.control_host.clone())?;
    let dispatcher = ShadowDispatcher::new(&ctx.shadow)?;
    let mut driver = BatchDriver::new(ctx, &scheduler, descriptor, dispatcher);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text if verbose => &LogSink,
        OutputMode::Text => &NoopSink,
    };
    let result = driver.run(&subjects, &options, sink)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_batch(&result).into_diagnostic()?,
        OutputMode::Text => print_batch_summary(&result),
    }
    Ok(if result.failures() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn run_check(
    ctx: &Context,
    args: CheckArgs,
    output_mode: OutputMode,
    verbose: bool,
) -> miette::Result<ExitCode> {
    let descriptor = args.list.pipeline.descriptor();
    let subjects = load_subjects(ctx, &args.list)?;
    let archive = Archive::from_context(ctx);
    let mode = if args.exhaustive {
        CheckMode::Exhaustive
    } else {
        CheckMode::FirstMissing
    };
    let completion = CompletionChecker::new(&archive, descriptor)
        .with_registration(parse_registration(args.reg_name.as_deref())?)?
        .with_mode(mode);
    let prereqs = ArchivePrereqs::new(&archive, descriptor);

    let mut items = Vec::new();
    for subject in &subjects {
        for candidate in expand_subject(&archive, descriptor, &completion, subject)? {
            let sink = CollectingSink::new();
            let prereqs_met = prereqs.are_prereqs_met(&candidate, &sink)?;
            let report = if prereqs_met {
                Some(completion.check(&candidate, &sink)?)
            } else {
                None
            };
            let complete = report.as_ref().is_some_and(|report| report.is_complete());
            if verbose && output_mode == OutputMode::Text {
                for line in sink.lines() {
                    eprintln!("  {line}");
                }
            }
            items.push(CheckItem {
                subject: candidate.to_string(),
                scan: candidate.scan().map(str::to_string),
                prereqs_met,
                complete,
                report,
            });
        }
    }

    let result = CheckResult {
        pipeline: descriptor.name.to_string(),
        items,
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_check(&result).into_diagnostic()?,
        OutputMode::Text => {
            for item in &result.items {
                let verdict = if !item.prereqs_met {
                    "PREREQS NOT MET"
                } else if item.complete {
                    "COMPLETE"
                } else {
                    "INCOMPLETE"
                };
                println!("{}\t{verdict}", item.subject);
            }
        }
    }
    Ok(if result.all_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn run_status(
    ctx: &Context,
    args: StatusArgs,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let descriptor = args.list.pipeline.descriptor();
    let subjects = load_subjects(ctx, &args.list)?;
    let archive = Archive::from_context(ctx);
    let completion = CompletionChecker::new(&archive, descriptor)
        .with_registration(parse_registration(args.reg_name.as_deref())?)?;
    let rows = StatusReporter::new(&archive, descriptor, completion).rows(&subjects)?;
    write_status_file(&args.output, &rows)?;
    tracing::info!(output = %args.output, rows = rows.len(), "status report written");

    let result = StatusResult {
        pipeline: descriptor.name.to_string(),
        rows,
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_status(&result).into_diagnostic()?,
        OutputMode::Text => {
            println!("{STATUS_HEADER}");
            for row in &result.rows {
                println!("{}", row.to_line());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_running(ctx: &Context, args: ListArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let descriptor = args.pipeline.descriptor();
    let subjects = load_subjects(ctx, &args)?;
    let scheduler = PbsClient::new(ctx.control_host.clone())?;
    let checker = RunStatusChecker::for_pipeline(ctx, descriptor, &scheduler)?;
    let archive = Archive::from_context(ctx);

    let items = run_statuses(&archive, descriptor, &checker, &subjects)?
        .into_iter()
        .map(|(subject, status)| RunningItem {
            subject: subject.to_string(),
            status,
        })
        .collect();
    let result = RunningResult {
        pipeline: descriptor.name.to_string(),
        items,
    };
    match output_mode {
        OutputMode::Json => JsonOutput::print_running(&result).into_diagnostic()?,
        OutputMode::Text => {
            for item in &result.items {
                println!("{}\t{:?}", item.subject, item.status);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_batch_summary(result: &BatchResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}{} summary{reset}", result.pipeline);
    for item in &result.items {
        let color = match item.action {
            BatchAction::Submitted | BatchAction::WouldSubmit => green,
            BatchAction::Failed => red,
            _ => yellow,
        };
        println!("{color}{} ({}){reset}", item.subject, item.action.as_str());
        if let Some(server) = &item.server {
            println!("{color}   server: {server}{reset}");
        }
        if let Some(dir) = &item.working_dir {
            println!("{color}   working dir: {dir}{reset}");
        }
        if !item.job_ids.is_empty() {
            println!("{color}   jobs: {}{reset}", item.job_ids.join(" -> "));
        }
        if let Some(error) = &item.error {
            println!("{color}   error: {error}{reset}");
        }
    }
    if result.failures() > 0 {
        println!("{red}Errors: {}{reset}", result.failures());
    }
}
