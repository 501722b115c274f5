//! Process configuration for the serving binary.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use crate::persist::{PersistResult, StateStore, memory::MemoryStateStore, sqlite::SqliteStateStore};

/// Serving configuration, parsed from the command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "livestate", about = "Serve an observable, persisted state over HTTP")]
pub struct ServeConfig {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,
    /// SQLite file holding the state row.
    #[arg(long = "db-path", default_value = "livestate.db")]
    pub db_path: PathBuf,
    /// Keep the state in memory only.
    #[arg(long = "in-memory")]
    pub in_memory: bool,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[arg(long = "log-filter", default_value = "info")]
    pub log_filter: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            db_path: PathBuf::from("livestate.db"),
            in_memory: false,
            log_filter: "info".to_string(),
        }
    }
}

impl ServeConfig {
    /// Opens the configured store.
    pub fn open_store(&self) -> PersistResult<Box<dyn StateStore>> {
        if self.in_memory {
            return Ok(Box::new(MemoryStateStore::new()));
        }
        Ok(Box::new(SqliteStateStore::open(&self.db_path)?))
    }
}
