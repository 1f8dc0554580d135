mod cli;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};
use tokio_util::sync::CancellationToken;

use tapescan_core::cache::MemoryStore;
use tapescan_core::lookup::{address_balance, address_utxos, pool_state};
use tapescan_core::rpc::{IndexClient, IndexRpc, NodeClient, NodeRpc, RpcClient};
use tapescan_core::transport::{
    HttpConfig, HttpTransport, Pool, PoolConfig, SocketConfig, SocketTransport,
};
use tapescan_core::{HistoryReconciler, ReconcilerConfig};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    // Logs go to stderr so stdout carries only the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let pool_config = pool_config(&args.pool);
    let call_timeout = Duration::from_secs(args.upstreams.call_timeout_secs);
    let node = Arc::new(node_client(&args.upstreams, pool_config.clone(), call_timeout)?);
    let index = Arc::new(index_client(&args.upstreams, pool_config, call_timeout)?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let outcome = tokio::select! {
        outcome = run(&args, Arc::clone(&node), Arc::clone(&index), &cancel) => outcome,
        _ = cancel.cancelled() => Err(eyre!("interrupted")),
    };

    node.pool().close();
    index.pool().close();

    let value = outcome?;
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("encode result as JSON")?
    );
    Ok(())
}

async fn run(
    args: &Cli,
    node: Arc<NodeClient>,
    index: Arc<IndexClient>,
    cancel: &CancellationToken,
) -> eyre::Result<serde_json::Value> {
    let value = match &args.command {
        Command::History {
            address,
            page,
            size,
        } => {
            let config = ReconcilerConfig {
                workers: args.engine.workers,
                queue_capacity: args.engine.queue_capacity,
            };
            let mut engine = HistoryReconciler::new(
                node as Arc<dyn NodeRpc>,
                index as Arc<dyn IndexRpc>,
                config,
            );
            if let Some(capacity) = NonZeroUsize::new(args.engine.tx_cache_capacity) {
                engine = engine.with_store(Arc::new(MemoryStore::new(capacity)));
            }
            let history = engine
                .history(address, *page, *size, cancel)
                .await
                .wrap_err_with(|| format!("reconcile history of {address}"))?;
            if history.skipped > 0 {
                tracing::warn!(
                    skipped = history.skipped,
                    "some entries could not be resolved and were left out"
                );
            }
            serde_json::to_value(history)?
        }
        Command::Balance { address } => {
            let balance = address_balance(index.as_ref(), address)
                .await
                .wrap_err_with(|| format!("fetch balance of {address}"))?;
            serde_json::to_value(balance)?
        }
        Command::Utxos { address } => {
            let utxos = address_utxos(index.as_ref(), address)
                .await
                .wrap_err_with(|| format!("fetch unspent outputs of {address}"))?;
            serde_json::to_value(utxos)?
        }
        Command::Pool { txid } => {
            let state = pool_state(node.as_ref(), txid)
                .await
                .wrap_err_with(|| format!("decode pool state of {txid}"))?;
            serde_json::to_value(state)?
        }
    };
    Ok(value)
}

fn pool_config(args: &cli::PoolArgs) -> PoolConfig {
    PoolConfig {
        max_open: args.pool_max_open,
        max_idle: args.pool_max_idle,
        idle_timeout: Duration::from_secs(args.pool_idle_timeout_secs),
        eviction_interval: Duration::from_secs(args.pool_eviction_interval_secs),
        acquire_timeout: Duration::from_secs(args.pool_acquire_timeout_secs),
        connect_retry_window: Duration::from_millis(args.pool_retry_window_ms),
    }
}

fn node_client(
    args: &cli::UpstreamArgs,
    pool_config: PoolConfig,
    call_timeout: Duration,
) -> eyre::Result<NodeClient> {
    let transport = HttpTransport::new(HttpConfig {
        url: args.node_url.clone(),
        user: args.node_user.clone(),
        pass: args.node_pass.clone(),
        requests_per_second: args.node_requests_per_second,
        ..HttpConfig::default()
    })
    .wrap_err("configure node transport")?;
    let pool = Pool::new("node", transport, pool_config).wrap_err("configure node pool")?;
    tracing::debug!(url = %args.node_url, "node pool ready");
    Ok(RpcClient::new(pool, call_timeout))
}

fn index_client(
    args: &cli::UpstreamArgs,
    pool_config: PoolConfig,
    call_timeout: Duration,
) -> eyre::Result<IndexClient> {
    let transport = SocketTransport::new(SocketConfig {
        addr: args.index_addr.clone(),
        max_response_bytes: args.index_max_response_bytes,
        ..SocketConfig::default()
    });
    let pool = Pool::new("index", transport, pool_config).wrap_err("configure index pool")?;
    tracing::debug!(addr = %args.index_addr, "index pool ready");
    Ok(RpcClient::new(pool, call_timeout))
}
