use clap::{Parser, Subcommand};
use nphies_cli::cmd::{self, config::ConfigSubcommand, records::RecordsSubcommand};
use nphies_cli::root;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "nphies",
    about = "Poll the NPHIES exchange and reconcile inbound messages against local records",
    version,
    propagate_version = true
)]
struct Cli {
    /// Poller root (default: auto-detect from .nphies/)
    #[arg(long, global = true, env = "NPHIES_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the poller: config and database under .nphies/
    Init {
        /// Exchange URL polled for queued messages
        #[arg(long)]
        endpoint: Option<String>,
        /// Run scheduled polls every N seconds while serving
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Run one manual poll now
    Poll,

    /// Show poll and match totals
    Stats,

    /// List poll runs, newest first
    Logs {
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one poll run with its messages
    Log { id: i64 },

    /// Manage local business records
    Records {
        #[command(subcommand)]
        subcommand: RecordsSubcommand,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Start the HTTP dashboard API and the scheduler
    Serve {
        /// Port to listen on (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Finalize a run left in progress by a crashed process
    Recover,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init {
            endpoint,
            interval_secs,
        } => cmd::init::run(&root, endpoint.as_deref(), interval_secs),
        Commands::Poll => cmd::poll::run(&root, cli.json),
        Commands::Stats => cmd::stats::run(&root, cli.json),
        Commands::Logs { page, limit } => cmd::logs::run(&root, page, limit, cli.json),
        Commands::Log { id } => cmd::log::run(&root, id, cli.json),
        Commands::Records { subcommand } => cmd::records::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Recover => cmd::recover::run(&root, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
