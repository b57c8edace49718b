use clap::{Parser, Subcommand};
use std::path::PathBuf;
use warden_cli::cmd::{
    self, config::ConfigSubcommand, hook::HookSubcommand, issue::IssueSubcommand,
    rules::RulesSubcommand, session::SessionSubcommand,
};
use warden_cli::root;

#[derive(Parser)]
#[command(
    name = "warden",
    about = "Permission and continuation control for autonomous coding agents",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .warden/ or .git/)
    #[arg(long, global = true, env = "WARDEN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host hook entry points (JSON on stdin, JSON on stdout)
    Hook {
        #[command(subcommand)]
        subcommand: HookSubcommand,
    },

    /// Inspect and manage per-session workflow state
    Session {
        #[command(subcommand)]
        subcommand: SessionSubcommand,
    },

    /// Manage the issue -> session index
    Issue {
        #[command(subcommand)]
        subcommand: IssueSubcommand,
    },

    /// Inspect the permission rules
    Rules {
        #[command(subcommand)]
        subcommand: RulesSubcommand,
    },

    /// Show or validate the layered configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Launch one workflow run per issue, bounded by workers.max_active
    Dispatch {
        /// Issue ids to work on
        #[arg(required = true)]
        issues: Vec<String>,

        /// Workflow to start
        #[arg(long, default_value = "impl")]
        workflow: String,

        /// Override workers.max_active
        #[arg(long)]
        max_active: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();

    // stdout is reserved for command output; hooks print exactly one JSON object.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Hook { subcommand } => cmd::hook::run(&root, subcommand),
        Commands::Session { subcommand } => cmd::session::run(&root, subcommand, cli.json),
        Commands::Issue { subcommand } => cmd::issue::run(&root, subcommand, cli.json),
        Commands::Rules { subcommand } => cmd::rules::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Dispatch {
            issues,
            workflow,
            max_active,
        } => cmd::dispatch::run(&root, issues, &workflow, max_active, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
