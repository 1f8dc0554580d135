use std::env;
use std::sync::{Arc, Once};
use std::time::Duration;

use tapescan_core::history::{HistoryReconciler, ReconcilerConfig};
use tapescan_core::lookup::{address_balance, address_utxos};
use tapescan_core::rpc::{IndexClient, IndexRpc, NodeClient, NodeRpc, RpcClient};
use tapescan_core::transport::{
    HttpConfig, HttpTransport, Pool, PoolConfig, SocketConfig, SocketTransport,
};
use tokio_util::sync::CancellationToken;

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tapescan_core=debug")),
            )
            .with_target(true)
            .try_init();
    });
}

fn node_client() -> NodeClient {
    let url = env::var("TAPESCAN_TEST_NODE_URL").expect("TAPESCAN_TEST_NODE_URL must be set");
    let transport = HttpTransport::new(HttpConfig {
        url,
        user: env::var("TAPESCAN_TEST_NODE_USER").ok(),
        pass: env::var("TAPESCAN_TEST_NODE_PASS").ok(),
        ..HttpConfig::default()
    })
    .expect("node transport must construct");
    let pool = Pool::new("node", transport, PoolConfig::default()).expect("node pool");
    RpcClient::new(pool, Duration::from_secs(30))
}

fn index_client() -> IndexClient {
    let addr = env::var("TAPESCAN_TEST_INDEX_ADDR").expect("TAPESCAN_TEST_INDEX_ADDR must be set");
    let transport = SocketTransport::new(SocketConfig {
        addr,
        ..SocketConfig::default()
    });
    let pool = Pool::new("index", transport, PoolConfig::default()).expect("index pool");
    RpcClient::new(pool, Duration::from_secs(30))
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a reachable node and index server; set TAPESCAN_TEST_* variables"]
async fn live_history_balance_and_utxos_agree() {
    init_tracing();
    let address =
        env::var("TAPESCAN_TEST_ADDRESS").expect("TAPESCAN_TEST_ADDRESS must be set");

    let node = Arc::new(node_client());
    let index = Arc::new(index_client());

    let info = node
        .get_blockchain_info()
        .await
        .expect("get_blockchain_info must succeed");
    eprintln!("[itest] node on {} at height {}", info.chain, info.blocks);

    let engine = HistoryReconciler::new(
        Arc::clone(&node) as Arc<dyn NodeRpc>,
        Arc::clone(&index) as Arc<dyn IndexRpc>,
        ReconcilerConfig::default(),
    );
    let page = engine
        .history(&address, 0, 10, &CancellationToken::new())
        .await
        .expect("history page must resolve");
    eprintln!(
        "[itest] {} of {} history entries on page 0 ({} skipped)",
        page.history.len(),
        page.total,
        page.skipped
    );
    assert!(page.history.len() + page.skipped <= 10);
    for record in &page.history {
        assert!(!record.senders.is_empty());
        assert!(!record.recipients.is_empty());
    }

    let balance = address_balance(index.as_ref(), &address)
        .await
        .expect("balance must resolve");
    let utxos = address_utxos(index.as_ref(), &address)
        .await
        .expect("utxos must resolve");
    let utxo_total: u64 = utxos.iter().map(|u| u.value).sum();
    assert_eq!(
        i64::try_from(utxo_total).expect("fits"),
        balance.confirmed + balance.unconfirmed,
        "unspent outputs must add up to the reported balance"
    );

    node.pool().close();
    index.pool().close();
}
