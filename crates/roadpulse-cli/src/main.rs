#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, CommandError, OutputMode, render_error, resolve_output_mode};
use roadpulse_core::config::{EffectiveConfig, resolve_config};
use roadpulse_core::error::ErrorCode;
use roadpulse_core::session::{Actor, Session};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "rp: live traffic map, dashboard and karma leaderboard",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (overrides --json and FORMAT).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Act as this user id (overrides the user config actor).
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Output mode from flags alone, used when the config cannot be read.
    fn flag_output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, if self.json { "json" } else { "text" })
    }

    fn actor_flag(&self) -> Option<&str> {
        self.actor.as_deref()
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a roadpulse project",
        long_about = "Create .roadpulse/ with a default config and an empty local store.",
        after_help = "EXAMPLES:\n    # Initialize the current directory\n    rp init\n\n    # Rewrite the config template\n    rp init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Write",
        about = "Submit a traffic report",
        long_about = "Submit a report pinned at a location. Signed-in actors are awarded karma.",
        after_help = "EXAMPLES:\n    # Report a pothole\n    rp report --type pothole --location \"MG Road\" --lat 10.99 --lng 76.01\n\n    # Report as a specific user\n    rp --actor u1 report --type accident --lat 10.99 --lng 76.01 --json"
    )]
    Report(cmd::report::ReportArgs),

    #[command(
        next_help_heading = "Write",
        about = "Write or remove sample documents",
        long_about = "Seed the local store with traffic samples and leaderboard entries.",
        after_help = "EXAMPLES:\n    # Add a congested sample\n    rp sample traffic --lat 10.99 --lng 76.01 --level 85\n\n    # Add a leaderboard entry\n    rp sample leader --user u1 --name Asha --points 120\n\n    # Remove a sample\n    rp sample remove 3f9a0c"
    )]
    Sample(cmd::sample::SampleArgs),

    #[command(
        next_help_heading = "Views",
        about = "Show the live traffic map",
        long_about = "Render current traffic markers inside the configured time window.",
        after_help = "EXAMPLES:\n    # Show markers\n    rp --actor u1 map\n\n    # Machine-readable output\n    rp --actor u1 map --json"
    )]
    Map(cmd::map::MapArgs),

    #[command(
        next_help_heading = "Views",
        about = "Show the statistics dashboard",
        long_about = "Hourly congestion averages and report counts per type.",
        after_help = "EXAMPLES:\n    # Show the dashboard\n    rp dashboard\n\n    # Machine-readable output\n    rp dashboard --format json"
    )]
    Dashboard(cmd::dashboard::DashboardArgs),

    #[command(
        next_help_heading = "Views",
        about = "Show the karma leaderboard",
        long_about = "Top users by karma, plus a row for the signed-in actor when unranked.",
        after_help = "EXAMPLES:\n    # Top 10\n    rp leaderboard\n\n    # Top 3 for user u7\n    rp --actor u7 leaderboard --limit 3"
    )]
    Leaderboard(cmd::leaderboard::LeaderboardArgs),

    #[command(
        next_help_heading = "Views",
        about = "Show your karma panel",
        long_about = "Karma points, progress to the next milestone and achievements.",
        after_help = "EXAMPLES:\n    # Show karma for u1\n    rp --actor u1 karma"
    )]
    Karma(cmd::karma::KarmaArgs),

    #[command(
        next_help_heading = "Feeds",
        about = "Apply a change feed to the map",
        long_about = "Read a JSONL change feed, decode it with the schema of --collection and apply each batch through the synchronizer. Traffic samples also drive the map markers.",
        after_help = "EXAMPLES:\n    # Replay a feed file\n    rp replay feed.jsonl\n\n    # Replay stdin and persist into the store\n    cat feed.jsonl | rp replay - --into-store\n\n    # Replay a reports feed\n    rp replay reports.jsonl --collection reports"
    )]
    Replay(cmd::replay::ReplayArgs),

    #[command(
        next_help_heading = "Feeds",
        about = "Deterministic change-feed simulation",
        after_help = "EXAMPLES:\n    # Run 100 seeds\n    rp sim run --seeds 100\n\n    # Replay one seed\n    rp sim replay --seed 42"
    )]
    Sim(cmd::sim::SimArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    # Bash\n    rp completions bash > ~/.local/share/bash-completion/completions/rp"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ROADPULSE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "roadpulse=debug,info"
        } else {
            "roadpulse=info,warn"
        })
    });

    let format = env::var("ROADPULSE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

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

/// The signed-in actor: `--actor` wins, then the user config.
fn resolve_session(flag: Option<&str>, config: &EffectiveConfig) -> Session {
    let configured = config.user.actor.as_ref().map(|a| a.to_actor());
    let actor = match flag {
        Some(uid) => Some(
            configured
                .filter(|a| a.uid.as_str() == uid)
                .unwrap_or_else(|| Actor::new(uid)),
        ),
        None => configured,
    };
    actor.map_or_else(Session::signed_out, Session::signed_in)
}

fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

fn run(
    cli: Cli,
    output: OutputMode,
    project_root: PathBuf,
    loaded: anyhow::Result<EffectiveConfig>,
) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init(ref args) => return cmd::init::run_init(args, output, &project_root),
        Commands::Completions(ref args) => {
            let mut command = Cli::command();
            return cmd::completions::run_completions(args.shell, &mut command);
        }
        Commands::Sim(ref args) => return cmd::sim::run_sim(args, output),
        _ => {}
    }

    let config = loaded.map_err(|e| {
        e.context(CommandError::new(
            ErrorCode::ConfigParseError,
            "could not load configuration",
        ))
    })?;
    let ctx = cmd::Context {
        output,
        session: resolve_session(cli.actor_flag(), &config),
        now_us: now_us(),
        config,
        project_root,
    };

    match cli.command {
        Commands::Report(args) => cmd::report::run_report(args, &ctx),
        Commands::Sample(args) => cmd::sample::run_sample(args, &ctx),
        Commands::Map(args) => cmd::map::run_map(&args, &ctx),
        Commands::Dashboard(args) => cmd::dashboard::run_dashboard(&args, &ctx),
        Commands::Leaderboard(args) => cmd::leaderboard::run_leaderboard(&args, &ctx),
        Commands::Karma(args) => cmd::karma::run_karma(&args, &ctx),
        Commands::Replay(args) => cmd::replay::run_replay(&args, &ctx),
        Commands::Init(_) | Commands::Completions(_) | Commands::Sim(_) => Ok(()),
    }
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let loaded = resolve_config(&project_root, cli.json);
    let output = loaded.as_ref().map_or_else(
        |_| cli.flag_output_mode(),
        |config| resolve_output_mode(cli.format, &config.resolved_output),
    );

    if let Err(err) = run(cli, output, project_root, loaded) {
        tracing::debug!(
            error = ?err,
            kind = output::error_code_of(&err).map(ErrorCode::message),
            "command failed"
        );
        // Nothing left to report to if stderr itself is gone.
        let _ = render_error(output, &CliError::from(&err));
        std::process::exit(1);
    }
}
