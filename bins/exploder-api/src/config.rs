//! Command-line and environment configuration.
//!
//! Every flag can also be set through an `EXPLODER_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use exploder_core::constants::{DEFAULT_MAX_PAGE_LIMIT, DEFAULT_PAGE_LIMIT};
use exploder_core::pagination::PageLimits;
use exploder_index::IndexerConfig;

/// Exploder: blockchain explorer API with a built-in chain indexer.
#[derive(Parser, Debug)]
#[command(name = "exploder-api", version, about = "Blockchain explorer API with a built-in chain indexer")]
pub struct Args {
    /// Data directory for the index database
    #[arg(long, env = "EXPLODER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long, env = "EXPLODER_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Upstream node JSON-RPC endpoint
    #[arg(long, env = "EXPLODER_RPC_ENDPOINT", default_value = "http://127.0.0.1:8332")]
    pub rpc_endpoint: String,

    /// Upstream RPC user
    #[arg(long, env = "EXPLODER_RPC_USER")]
    pub rpc_user: Option<String>,

    /// Upstream RPC password
    #[arg(long, env = "EXPLODER_RPC_PASSWORD", hide_env_values = true)]
    pub rpc_password: Option<String>,

    /// Price feed URL returning a JSON object
    #[arg(long, env = "EXPLODER_PRICE_URL")]
    pub price_url: Option<String>,

    /// Seconds a fetched price stays fresh
    #[arg(long, env = "EXPLODER_PRICE_TTL_SECS", default_value_t = 60)]
    pub price_ttl_secs: u64,

    /// Largest `limit` a caller may request
    #[arg(long, env = "EXPLODER_MAX_PAGE_LIMIT", default_value_t = DEFAULT_MAX_PAGE_LIMIT)]
    pub max_page_limit: u64,

    /// Seconds between sync cycles once caught up
    #[arg(long, env = "EXPLODER_POLL_SECS", default_value_t = 10)]
    pub poll_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "EXPLODER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, env = "EXPLODER_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Serve the existing index without syncing from upstream
    #[arg(long, env = "EXPLODER_NO_SYNC")]
    pub no_sync: bool,
}

/// Upstream JSON-RPC connection settings.
#[derive(Clone, Debug)]
pub struct RpcConfig {
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub rpc: RpcConfig,
    pub price_url: Option<String>,
    pub price_ttl: Duration,
    pub indexer: IndexerConfig,
    pub log_level: String,
    pub log_format: String,
    pub no_sync: bool,
}

impl Args {
    pub fn into_config(self) -> Config {
        let defaults = IndexerConfig::default();
        let indexer = IndexerConfig {
            data_dir: self.data_dir.unwrap_or_else(|| defaults.data_dir.clone()),
            page_limits: PageLimits {
                default_limit: DEFAULT_PAGE_LIMIT.min(self.max_page_limit),
                max_limit: self.max_page_limit,
            },
            poll_interval: Duration::from_secs(self.poll_secs),
            ..defaults
        };

        Config {
            bind_addr: self.bind_addr,
            rpc: RpcConfig {
                endpoint: self.rpc_endpoint,
                user: self.rpc_user,
                password: self.rpc_password,
                timeout: Duration::from_secs(10),
            },
            price_url: self.price_url.filter(|url| !url.is_empty()),
            price_ttl: Duration::from_secs(self.price_ttl_secs),
            indexer,
            log_level: self.log_level,
            log_format: self.log_format,
            no_sync: self.no_sync,
        }
    }
}
