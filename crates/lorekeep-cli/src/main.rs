#![forbid(unsafe_code)]

mod cmd;
mod output;
mod project;
mod reviewer;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "lk: autonomous lore-wiki content pipeline",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: pretty, text or json (default: FORMAT env, then TTY detection).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for --format json.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Pipeline",
        about = "Run one pipeline pass",
        long_about = "Scan, plan and work through repair, review and generation items within the run budget.",
        after_help = "EXAMPLES:\n    # Triggered by cron\n    lk run --authorization \"Bearer $CRON_SECRET\"\n\n    # Cap this run at two items\n    lk run --max-entries 2 --format json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        next_help_heading = "Pipeline",
        about = "Show agent state and queue health",
        after_help = "EXAMPLES:\n    # Overview\n    lk status\n\n    # Include the last five runs\n    lk status --history 5"
    )]
    Status(cmd::status::StatusArgs),

    #[command(next_help_heading = "Pipeline", about = "Pause scheduled runs")]
    Pause,

    #[command(next_help_heading = "Pipeline", about = "Resume scheduled runs")]
    Resume,

    #[command(
        next_help_heading = "Quality",
        about = "Score published entries",
        long_about = "Scan every published entry, sync the review queue and list the weakest entries.",
        after_help = "EXAMPLES:\n    # Scan and update the review queue\n    lk scan\n\n    # Look without touching the queue\n    lk scan --dry-run --limit 5"
    )]
    Scan(cmd::scan::ScanArgs),

    #[command(
        next_help_heading = "Quality",
        about = "Work with the review queue",
        after_help = "EXAMPLES:\n    # Most urgent first\n    lk reviews\n\n    # Draft an expansion now\n    lk reviews revise monsters/gorm.md --mode expand"
    )]
    Reviews(cmd::reviews::ReviewsArgs),

    #[command(
        next_help_heading = "Content",
        about = "Find new entities in the source library",
        after_help = "EXAMPLES:\n    # Scan up to ten sources with the heuristic only\n    lk discover --max-sources 10 --no-classifier"
    )]
    Discover(cmd::discover::DiscoverArgs),

    #[command(
        next_help_heading = "Content",
        about = "Inspect the discovery queue",
        after_help = "EXAMPLES:\n    # Queued entities\n    lk queue list --status queued\n\n    # Never generate an entity\n    lk queue reject silver-city\n\n    # Draft one entity now\n    lk queue generate silver-city"
    )]
    Queue(cmd::queue::QueueArgs),

    #[command(
        next_help_heading = "Content",
        about = "Review generated drafts",
        after_help = "EXAMPLES:\n    # Drafts waiting for a decision\n    lk pending\n\n    # Publish one\n    lk pending approve pending-abc --reviewer alice"
    )]
    Pending(cmd::pending::PendingArgs),

    #[command(
        next_help_heading = "Content",
        about = "Queue and run research tasks",
        after_help = "EXAMPLES:\n    # Queue a task\n    lk research add \"Twilight Order\" --type explore_topic --priority 8\n\n    # Work two tasks now\n    lk research run --max-tasks 2"
    )]
    Research(cmd::research::ResearchArgs),

    #[command(
        next_help_heading = "Audit",
        about = "Browse and review the changelog",
        after_help = "EXAMPLES:\n    # Recent changes\n    lk changelog\n\n    # Creates awaiting review since June\n    lk changelog list --type create --status pending_review --since 2024-06-01\n\n    # Markdown export\n    lk changelog export > CHANGELOG.md"
    )]
    Changelog(cmd::changelog::ChangelogArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Show or edit agent configuration",
        after_help = "EXAMPLES:\n    # Everything\n    lk config show\n\n    # One key\n    lk config set schedule.maxEntriesPerRun 3"
    )]
    Config(cmd::config::ConfigArgs),
}

/// Logs go to stderr so stdout stays parseable in json mode.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOREKEEP_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "lorekeep=debug,info"
        } else {
            "lorekeep=info,warn"
        })
    });

    let format = env::var("LOREKEEP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn dispatch(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let project_root = env::current_dir()?;
    match &cli.command {
        Commands::Run(args) => cmd::run::run_run(args, output, &project_root),
        Commands::Status(args) => cmd::status::run_status(args, output, &project_root),
        Commands::Pause => cmd::status::run_pause(output, &project_root),
        Commands::Resume => cmd::status::run_resume(output, &project_root),
        Commands::Scan(args) => cmd::scan::run_scan(args, output, &project_root),
        Commands::Reviews(args) => cmd::reviews::run_reviews(args, output, &project_root),
        Commands::Discover(args) => cmd::discover::run_discover(args, output, &project_root),
        Commands::Queue(args) => cmd::queue::run_queue(args, output, &project_root),
        Commands::Pending(args) => cmd::pending::run_pending(args, output, &project_root),
        Commands::Research(args) => cmd::research::run_research_cmd(args, output, &project_root),
        Commands::Changelog(args) => cmd::changelog::run_changelog(args, output, &project_root),
        Commands::Config(args) => cmd::config::run_config(args, output, &project_root),
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = cli.output_mode();
    if let Err(err) = dispatch(&cli, output) {
        render_error(output, &CliError::from(&err))?;
        std::process::exit(1);
    }
    Ok(())
}
