//! Application layer of a sluice node.
//!
//! This crate wires the validator, the close state machine and history
//! maintenance into a running node:
//!
//! - [`config`]: TOML configuration with `SLUICE_*` environment overrides
//! - [`logging`]: global tracing subscriber setup
//! - [`node`]: the serialized event loop that turns externalized values
//!   into closed ledgers and drives catchup
//! - [`maintenance`]: the background task that performs post-close history
//!   work
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sluice_app::{maintenance, node, AppConfig, LocalHistory, Node};
//! use sluice_ledger::ArchivedHeaders;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AppConfig::from_file_with_env("sluice.toml")?;
//! config.validate()?;
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let (hooks, maintainer) = maintenance::channel(
//!     Arc::new(LocalHistory::new(128)),
//!     config.ledger.checkpoint_frequency,
//!     shutdown_rx,
//! );
//! tokio::spawn(maintainer.run());
//!
//! let manager = node::open_ledger(&config, Arc::new(hooks))?;
//! let node = Node::from_config(&config, manager, Arc::new(ArchivedHeaders::new()));
//! node::terminate_on_fatal(node.run().await)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod node;

pub use config::AppConfig;
pub use error::AppError;
pub use logging::{LogConfig, LogFormat};
pub use maintenance::{HistoryService, LocalHistory, MaintenanceHooks, Maintainer};
pub use node::{Node, NodeEvent, NodeHandle};
