#![forbid(unsafe_code)]

mod actor;
mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use std::env;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "snaplog: append-only event log with snapshot archival",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Actor email recorded on new events and files.
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }

    fn actor_flag(&self) -> Option<&str> {
        self.actor.as_deref()
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Lifecycle",
        about = "Initialize a snaplog project",
        long_about = "Create .snaplog/ with a default config and an empty event store.",
        after_help = "EXAMPLES:\n    # Initialize a project in the current directory\n    snaplog init\n\n    # Archive to a shared directory\n    snaplog init --archive-dir /srv/archive"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Write",
        about = "Append an event",
        long_about = "Append an event whose payload maps categories to key/value objects.",
        after_help = "EXAMPLES:\n    # Set a post title\n    snaplog add-event '{\"post\": {\"title\": \"Hello\"}}'\n\n    # Read the payload from stdin\n    echo '{\"user\": {\"name\": \"X\"}}' | snaplog add-event -"
    )]
    AddEvent(cmd::event::AddEventArgs),

    #[command(
        next_help_heading = "Write",
        about = "Stage a file for the next sync",
        after_help = "EXAMPLES:\n    # Stage an image under its own name\n    snaplog add-file ./logo.png\n\n    # Stage under another name\n    snaplog add-file ./build/logo-v2.png --name logo.png"
    )]
    AddFile(cmd::file::AddFileArgs),

    #[command(
        next_help_heading = "Read",
        about = "List stored events",
        after_help = "EXAMPLES:\n    # All events not yet archived\n    snaplog events\n\n    # Events after id 40\n    snaplog events --since 40 --json"
    )]
    Events(cmd::event::EventsArgs),

    #[command(next_help_heading = "Read", about = "Show one stored event")]
    Event(cmd::event::ShowEventArgs),

    #[command(
        next_help_heading = "Read",
        about = "Print the current snapshot",
        after_help = "EXAMPLES:\n    # Whole snapshot as JSON\n    snaplog snapshot --json\n\n    # One category\n    snaplog snapshot --category post"
    )]
    Snapshot(cmd::snapshot::SnapshotArgs),

    #[command(
        next_help_heading = "Read",
        about = "List archived event pages",
        after_help = "EXAMPLES:\n    # Page index from the last checkpoint\n    snaplog pages\n\n    # Decode one page from the archive\n    snaplog pages --show 1700000000_1-1700000100_41"
    )]
    Pages(cmd::pages::PagesArgs),

    #[command(
        next_help_heading = "Read",
        about = "List archived files",
        long_about = "List the archive's file index: name, size, time added and content digest."
    )]
    Files,

    #[command(next_help_heading = "Read", about = "Show sync and backlog status")]
    Status,

    #[command(next_help_heading = "Sync", about = "Two-phase sync by hand")]
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },

    #[command(
        next_help_heading = "Sync",
        about = "Archive pending files and events",
        long_about = "Run one full archival cycle: start, upload, update snap.json, finish, pull."
    )]
    Publish,

    #[command(
        next_help_heading = "Sync",
        about = "Adopt the archived checkpoint",
        long_about = "Load snap.json from the archive, drop events it covers, and rebuild the snapshot."
    )]
    Pull,

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Send a backup if one is due",
        after_help = "EXAMPLES:\n    # Write due backups to .snaplog/outbox\n    snaplog backup"
    )]
    Backup(cmd::backup::BackupArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    snaplog completions bash"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

#[derive(Subcommand, Debug)]
enum SyncCommand {
    #[command(about = "Issue a sync token for everything pending")]
    Start,

    #[command(about = "Confirm the token's artifacts are archived and purge them")]
    Finish {
        /// Token printed by `snaplog sync start`.
        token: String,
    },

    #[command(about = "Release a token without purging")]
    Abort {
        token: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SNAPLOG_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "snaplog=debug,snaplog_core=debug,info"
        } else {
            "snaplog=info,snaplog_core=info,warn"
        })
    });

    let format = env::var("SNAPLOG_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

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

fn run(cli: &Cli) -> anyhow::Result<()> {
    let project_root = env::current_dir()?;
    let output = cli.output_mode();

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, output, &project_root),
        Commands::AddEvent(args) => {
            cmd::event::run_add_event(args, cli.actor_flag(), output, &project_root)
        }
        Commands::AddFile(args) => {
            cmd::file::run_add_file(args, cli.actor_flag(), output, &project_root)
        }
        Commands::Events(args) => cmd::event::run_events(args, output, &project_root),
        Commands::Event(args) => cmd::event::run_show_event(args, output, &project_root),
        Commands::Snapshot(args) => cmd::snapshot::run_snapshot(args, output, &project_root),
        Commands::Pages(args) => cmd::pages::run_pages(args, output, &project_root),
        Commands::Files => cmd::file::run_files(output, &project_root),
        Commands::Status => cmd::status::run_status(output, &project_root),
        Commands::Sync { command } => match command {
            SyncCommand::Start => cmd::sync::run_start(output, &project_root),
            SyncCommand::Finish { token } => cmd::sync::run_finish(token, output, &project_root),
            SyncCommand::Abort { token } => cmd::sync::run_abort(token, output, &project_root),
        },
        Commands::Publish => cmd::sync::run_publish(output, &project_root),
        Commands::Pull => cmd::sync::run_pull(output, &project_root),
        Commands::Backup(args) => cmd::backup::run_backup(args, output, &project_root),
        Commands::Completions(args) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args.shell, &mut command)
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        debug!("verbose mode enabled");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let error = CliError::from_anyhow(&err);
            if render_error(cli.output_mode(), &error).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
