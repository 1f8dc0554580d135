use clap::{Args, Parser, Subcommand};

/// Tapescan: read-side explorer for balances, UTXOs, token pools and
/// reconciled address history.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(flatten)]
    pub upstreams: UpstreamArgs,

    #[command(flatten)]
    pub pool: PoolArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Reconciled transaction history of an address, newest first.
    History {
        address: String,

        /// Zero-based page number.
        #[arg(long, default_value = "0")]
        page: usize,

        /// Entries per page.
        #[arg(long, default_value = "10")]
        size: usize,
    },

    /// Confirmed and unconfirmed balance of an address.
    Balance { address: String },

    /// Unspent outputs of an address.
    Utxos { address: String },

    /// Decoded state of a token pool from its pool NFT transaction.
    Pool { txid: String },
}

#[derive(Args)]
pub struct UpstreamArgs {
    /// Node JSON-RPC URL.
    #[arg(long, default_value = "http://127.0.0.1:8332", env = "TAPESCAN_NODE_URL")]
    pub node_url: String,

    /// Node RPC username.
    #[arg(long, env = "TAPESCAN_NODE_USER")]
    pub node_user: Option<String>,

    /// Node RPC password.
    #[arg(long, env = "TAPESCAN_NODE_PASS")]
    pub node_pass: Option<String>,

    /// Cap on outbound node requests per second.
    #[arg(long, env = "TAPESCAN_NODE_RPS")]
    pub node_requests_per_second: Option<u32>,

    /// Index server `host:port`.
    #[arg(long, default_value = "127.0.0.1:50001", env = "TAPESCAN_INDEX_ADDR")]
    pub index_addr: String,

    /// Largest index server response accepted, in bytes.
    #[arg(long, default_value = "16777216", env = "TAPESCAN_INDEX_MAX_RESPONSE")]
    pub index_max_response_bytes: usize,

    /// Per-call timeout, in seconds.
    #[arg(long, default_value = "30", env = "TAPESCAN_CALL_TIMEOUT")]
    pub call_timeout_secs: u64,
}

#[derive(Args)]
pub struct PoolArgs {
    /// Maximum open connections per upstream.
    #[arg(long, default_value = "16", env = "TAPESCAN_POOL_MAX_OPEN")]
    pub pool_max_open: usize,

    /// Maximum idle connections kept per upstream.
    #[arg(long, default_value = "4", env = "TAPESCAN_POOL_MAX_IDLE")]
    pub pool_max_idle: usize,

    /// Seconds an idle connection may stay unused before it is closed.
    #[arg(long, default_value = "90", env = "TAPESCAN_POOL_IDLE_TIMEOUT")]
    pub pool_idle_timeout_secs: u64,

    /// Seconds between idle eviction sweeps.
    #[arg(long, default_value = "30", env = "TAPESCAN_POOL_EVICTION_INTERVAL")]
    pub pool_eviction_interval_secs: u64,

    /// Seconds to wait for a free connection.
    #[arg(long, default_value = "10", env = "TAPESCAN_POOL_ACQUIRE_TIMEOUT")]
    pub pool_acquire_timeout_secs: u64,

    /// Milliseconds after a failed connect during which new connects fail fast.
    #[arg(long, default_value = "2000", env = "TAPESCAN_POOL_RETRY_WINDOW_MS")]
    pub pool_retry_window_ms: u64,
}

#[derive(Args)]
pub struct EngineArgs {
    /// Concurrent lookups per resolution round.
    #[arg(long, default_value = "8", env = "TAPESCAN_WORKERS")]
    pub workers: usize,

    /// Pending lookups queued ahead of the workers.
    #[arg(long, default_value = "64", env = "TAPESCAN_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Confirmed transactions kept in memory; 0 disables the cache.
    #[arg(long, default_value = "10000", env = "TAPESCAN_TX_CACHE")]
    pub tx_cache_capacity: usize,
}
