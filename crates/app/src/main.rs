//! sluice - consensus-to-ledger node
//!
//! # Commands
//!
//! - **run**: start the node and wait for consensus decisions
//! - **new-db**: create a database holding the genesis ledger
//! - **info**: print the last closed ledger of a database
//! - **check-config**: load and validate a configuration file
//! - **sample-config**: print a configuration with every default filled in

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sluice_app::logging::{self, LogConfig, LogFormat};
use sluice_app::{maintenance, node, AppConfig, LocalHistory, Node};
use sluice_ledger::{ArchivedHeaders, NoopCloseHooks};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true)]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliLogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run,

    /// Create a new database holding the genesis ledger
    NewDb {
        /// Path to the database file (overrides config)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Print the last closed ledger
    Info,

    /// Load and validate the configuration
    CheckConfig,

    /// Print sample configuration
    SampleConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file_with_env(path)?,
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    config.validate()?;
    Ok(config)
}

fn log_config(cli: &Cli, config: &AppConfig) -> LogConfig {
    let mut log = config.logging.to_log_config();
    if cli.verbose {
        log = LogConfig {
            format: log.format,
            ansi_colors: log.ansi_colors,
            ..LogConfig::verbose()
        };
    }
    match cli.log_format {
        Some(CliLogFormat::Json) => {
            log.format = LogFormat::Json;
            log.ansi_colors = false;
        }
        Some(CliLogFormat::Text) => log.format = LogFormat::Text,
        None => {}
    }
    log
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::SampleConfig = cli.command {
        print!("{}", AppConfig::sample_config());
        return Ok(());
    }

    let config = load_config(cli.config.as_ref())?;
    logging::init(&log_config(&cli, &config))?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::NewDb { path } => {
            let mut config = config;
            if path.is_some() {
                config.ledger.database_path = path;
            }
            if config.ledger.database_path.is_none() {
                anyhow::bail!("new-db needs a database path");
            }
            let manager = node::open_ledger(&config, Arc::new(NoopCloseHooks))?;
            println!(
                "Database ready at ledger {}",
                manager.last_closed_ledger_seq()
            );
            Ok(())
        }
        Commands::Info => {
            let manager = node::open_ledger(&config, Arc::new(NoopCloseHooks))?;
            let header = manager
                .last_closed_ledger_header()
                .ok_or_else(|| anyhow::anyhow!("no last closed ledger"))?;
            println!("network id:        {}", config.network_id().0);
            println!("ledger:            {}", header.ledger_seq);
            if let Some(hash) = manager.last_closed_ledger_hash() {
                println!("hash:              {hash}");
            }
            println!("protocol version:  {}", header.ledger_version);
            println!("close time:        {}", header.scp_value.close_time.0);
            println!("base fee:          {}", header.base_fee);
            println!("base reserve:      {}", header.base_reserve);
            println!("max tx set size:   {}", header.max_tx_set_size);
            Ok(())
        }
        Commands::CheckConfig => {
            println!("Configuration is valid");
            Ok(())
        }
        Commands::SampleConfig => Ok(()),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retain = config.ledger.checkpoint_frequency * 2;
    let history = Arc::new(LocalHistory::new(retain));
    let (hooks, maintainer) =
        maintenance::channel(history, config.ledger.checkpoint_frequency, shutdown_rx);

    let manager = node::open_ledger(&config, Arc::new(hooks))?;
    let maintainer = maintainer.with_store(Arc::clone(manager.store()), retain);
    let maintainer = tokio::spawn(maintainer.run());
    let node = Node::from_config(&config, manager, Arc::new(ArchivedHeaders::new()));
    let handle = node.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = handle.shutdown();
        }
    });

    let result = node::terminate_on_fatal(node.run().await);
    let _ = shutdown_tx.send(true);
    let stats = maintainer.await?;
    info!(?stats, "Maintenance finished");
    result?;
    Ok(())
}
