//! CLI definitions for the storage server daemon.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use mnode_storage::VERSION;

/// mnode storage server daemon
#[derive(Parser)]
#[command(name = "mnode-storage")]
#[command(author, version = VERSION, about, long_about = None)]
pub struct Cli {
    /// IP to bind the HTTPS listener to; binding to localhost is refused
    #[arg(long, default_value = "0.0.0.0")]
    pub ip: String,

    /// Port for the HTTPS onion request listener
    #[arg(long, default_value_t = 29090)]
    pub port: u16,

    /// Port for the message-bus listener
    #[arg(long = "bus-port", default_value_t = 29092)]
    pub bus_port: u16,

    /// Data directory for certificates and logs
    /// (defaults to ~/.mnode-storage, plus /testnet on testnet)
    #[arg(long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Run against the test network
    #[arg(long)]
    pub testnet: bool,

    /// Message-bus address of the local beldexd
    #[arg(long = "beldexd-rpc", default_value = "ipc://./beldexd.sock")]
    pub beldexd_rpc: String,

    /// X25519 pubkey (hex) granted access to stats endpoints; repeatable
    #[arg(long = "stats-access-key")]
    pub stats_access_keys: Vec<String>,

    /// Start even if the master-node registration looks stale
    #[arg(long = "force-start")]
    pub force_start: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long = "log-level", short = 'L', default_value = "info")]
    pub log_level: LogLevel,

    /// Legacy master node private key, hex (integration use; normally
    /// fetched from beldexd)
    #[arg(long = "beldexd-key")]
    pub beldexd_key: Option<String>,

    /// Ed25519 private key, hex (integration use)
    #[arg(long = "beldexd-ed25519-key")]
    pub beldexd_ed25519_key: Option<String>,

    /// X25519 private key, hex (integration use)
    #[arg(long = "beldexd-x25519-key")]
    pub beldexd_x25519_key: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}
