use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use dagpool_server::config::{self, Config};
use dagpool_server::node::DagNodeConfig;
use dagpool_server::DagPoolService;

/// DagPool block storage daemon.
#[derive(Debug, Parser)]
#[clap(version)]
#[clap(propagate_version = true)]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a dag pool process.
    Daemon(DaemonOpts),
}

#[derive(Debug, Args)]
struct DaemonOpts {
    /// Socket address for the RPC front end.
    ///
    /// This overrides `listen` in the config.
    #[clap(short = 'l', long)]
    listen: Option<SocketAddr>,

    /// Directory to store data in.
    ///
    /// This overrides `data-dir` in the config.
    #[clap(long)]
    datadir: Option<PathBuf>,

    /// Path to the config file. May be given multiple times; each
    /// extra file may contribute `[[dag-node]]` definitions.
    #[clap(short = 'f', long)]
    config: Vec<PathBuf>,

    /// The root username.
    #[clap(long, env = "DAGPOOL_ROOT_USER")]
    root_user: Option<String>,

    /// The root password.
    #[clap(long, env = "DAGPOOL_ROOT_PASSWORD", hide_env_values = true)]
    root_password: Option<String>,

    /// Seconds between garbage collection cycles (0 disables).
    #[clap(long)]
    gc_period: Option<u64>,

    /// Default number of data shards for nodes declared on the
    /// command line.
    #[clap(short = 'k', long)]
    data_shards: Option<usize>,

    /// Default number of parity shards for nodes declared on the
    /// command line.
    #[clap(short = 'm', long)]
    parity_shards: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    dump_version();

    let opts = Opts::parse();
    match opts.command {
        Command::Daemon(daemon_opts) => run_daemon(daemon_opts).await,
    }
}

async fn run_daemon(opts: DaemonOpts) -> Result<()> {
    let config = build_config(&opts)?;

    tracing::info!("dagpool starting...");
    tracing::info!("listen {}", config.listen);

    let service = DagPoolService::new(config).await?;

    let token = CancellationToken::new();
    let tasks = tokio::spawn(dagpool_server::run_background_tasks(
        service.clone(),
        token.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown Server ...");

    token.cancel();
    tasks.await?;

    tracing::info!("Server exit");
    Ok(())
}

fn build_config(opts: &DaemonOpts) -> Result<Config> {
    let mut config = match opts.config.first() {
        Some(path) => config::load_config_from_path(path)?,
        None => {
            let mut config = Config::default();
            config::apply_env_overrides(&mut config);
            config
        }
    };

    // Additional config files only contribute DagNode definitions.
    for path in opts.config.iter().skip(1) {
        let extra = config::load_config_from_path(path)?;
        config.dag_nodes.extend(extra.dag_nodes);
    }

    if let Some(listen) = opts.listen {
        config.listen = listen;
    }
    if let Some(datadir) = &opts.datadir {
        config.data_dir = datadir.clone();
    }
    if let Some(root_user) = &opts.root_user {
        config.root_user = root_user.clone();
    }
    if let Some(root_password) = &opts.root_password {
        config.root_password = root_password.clone();
    }
    if let Some(gc_period) = opts.gc_period {
        config.garbage_collection.period_seconds = gc_period;
    }

    // -k/-m override the erasure parameters of config-declared nodes
    // that left them at zero.
    if let (Some(k), Some(m)) = (opts.data_shards, opts.parity_shards) {
        for node in &mut config.dag_nodes {
            apply_default_shards(node, k, m);
        }
    }

    std::fs::create_dir_all(&config.data_dir)?;

    Ok(config)
}

fn apply_default_shards(node: &mut DagNodeConfig, k: usize, m: usize) {
    if node.data_shards == 0 && node.parity_shards == 0 {
        node.data_shards = k;
        node.parity_shards = m;
    }
}

fn init_logging() {
    tracing_subscriber::fmt::init();
}

fn dump_version() {
    #[cfg(debug_assertions)]
    eprintln!("DagPool Server {} (debug)", env!("CARGO_PKG_VERSION"));

    #[cfg(not(debug_assertions))]
    eprintln!("DagPool Server {} (release)", env!("CARGO_PKG_VERSION"));
}
