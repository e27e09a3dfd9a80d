//! fabricsync: keep fabric resources consistent between Git, GUI drafts and
//! the live cluster.
//!
//! # Usage
//!
//! ```text
//! fabricsync init <fabric> (--repo <dir> | --github owner/repo [--branch b]) [--snapshot <dir> | --kube]
//! fabricsync fabric list
//! fabricsync fabric delete <fabric> [--remove-files]
//! fabricsync sync <fabric> [--direction github_to_gui|gui_to_github|bidirectional]
//! fabricsync sync --all
//! fabricsync status [--fabric <name>] [--json]
//! fabricsync diff <fabric> <kind/[namespace/]name> [--draft]
//! fabricsync draft <fabric> <kind/[namespace/]name> --file spec.yaml [--api-version v]
//! fabricsync observe <fabric>
//! fabricsync resolve <fabric> <kind/[namespace/]name> (--prefer git|gui | --merge spec.yaml)
//! fabricsync daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, diff::DiffArgs, draft::DraftArgs, fabric::FabricCommand,
    init::InitArgs, observe::ObserveArgs, resolve::ResolveArgs, status::StatusArgs,
    sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fabricsync",
    version,
    about = "GitOps sync for fabric custom resources",
    long_about = None,
)]
struct Cli {
    /// Log sync progress to stderr (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a fabric and its repository.
    Init(InitArgs),

    /// List or delete registered fabrics.
    Fabric {
        #[command(subcommand)]
        command: FabricCommand,
    },

    /// Sync resources between the repository and the GUI store.
    Sync(SyncArgs),

    /// Show drift, conflict and draft state per resource.
    Status(StatusArgs),

    /// Show a unified diff of a resource's desired spec against its actual or draft spec.
    Diff(DiffArgs),

    /// Stage a GUI edit (or create a resource) from a YAML spec file.
    Draft(DraftArgs),

    /// Read the live cluster once and record actual state.
    Observe(ObserveArgs),

    /// Resolve a detected conflict.
    Resolve(ResolveArgs),

    /// Run or talk to the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    // The daemon installs its own subscriber.
    if !matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start
        }
    ) {
        init_tracing(cli.verbose);
    }

    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Fabric { command } => commands::fabric::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Draft(args) => args.run(),
        Commands::Observe(args) => args.run(),
        Commands::Resolve(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
