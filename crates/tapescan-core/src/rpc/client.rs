use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{RpcError, TransportError};
use crate::transport::{ConnectionFactory, Pool, PooledConnection, RpcConnection};

use super::protocol::{parse_jsonrpc_error, parse_response_id, JsonRpcRequest};

// ==============================================================================
// Pooled JSON-RPC Client
// ==============================================================================

/// Issues JSON-RPC calls over connections leased from a [`Pool`].
///
/// Each call holds its lease only for the duration of one request/response
/// exchange, so concurrent calls on the same client proceed independently up
/// to the pool's `max_open`.
pub struct RpcClient<F: ConnectionFactory> {
    pool: Pool<F>,
    call_timeout: Duration,
    next_id: AtomicU64,
}

impl<F> RpcClient<F>
where
    F: ConnectionFactory,
    F::Connection: RpcConnection,
{
    pub fn new(pool: Pool<F>, call_timeout: Duration) -> Self {
        Self {
            pool,
            call_timeout,
            next_id: AtomicU64::new(initial_request_id()),
        }
    }

    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    /// Call `method` and decode its result into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, RpcError> {
        let raw = self.call_raw(method, &params).await?;
        serde_json::from_value(raw)
            .map_err(|e| RpcError::InvalidResponse(format!("decode {method} result: {e}")))
    }

    /// Call `method` and return its untyped result (`null` when absent).
    pub async fn call_raw(
        &self,
        method: &str,
        params: &[serde_json::Value],
    ) -> Result<serde_json::Value, RpcError> {
        let mut conn = self.pool.acquire().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            pool = self.pool.name(),
            "rpc call"
        );
        let request = JsonRpcRequest::new(id, method, params);

        let response = {
            let mut in_flight = InFlight {
                conn: &mut conn,
                settled: false,
            };
            let exchanged =
                tokio::time::timeout(self.call_timeout, in_flight.conn.exchange(&request)).await;
            let response = match exchanged {
                Err(_) => {
                    warn!(rpc.id = id, rpc.method = method, "rpc call timed out");
                    return Err(TransportError::Timeout(self.call_timeout).into());
                }
                Ok(Err(err)) => {
                    warn!(rpc.id = id, rpc.method = method, error = %err, "rpc transport failure");
                    return Err(err.into());
                }
                Ok(Ok(response)) => response,
            };
            if parse_response_id(&response.id) != Some(id) {
                return Err(TransportError::Protocol(format!(
                    "response id {} does not match request id {id}",
                    response.id
                ))
                .into());
            }
            in_flight.settled = true;
            response
        };
        drop(conn);

        if let Some(err) = response.error.filter(|err| !err.is_null()) {
            return Err(parse_jsonrpc_error(err));
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}

/// Invalidates the lease unless the exchange completed with a correlated
/// response. Covers early returns and the caller dropping the call future
/// while a response may still be in flight.
struct InFlight<'a, F: ConnectionFactory> {
    conn: &'a mut PooledConnection<F>,
    settled: bool,
}

impl<F: ConnectionFactory> Drop for InFlight<'_, F> {
    fn drop(&mut self) {
        if !self.settled {
            self.conn.mark_invalid();
        }
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::error::PoolError;
    use crate::rpc::protocol::JsonRpcResponse;
    use crate::transport::PoolConfig;

    /// Replies are produced from the request id so tests can force
    /// mismatches and errors.
    type Reply = Box<dyn Fn(u64) -> Result<serde_json::Value, TransportError> + Send>;

    #[derive(Clone, Default)]
    struct ScriptedFactory {
        replies: Arc<Mutex<VecDeque<Reply>>>,
        /// How long every exchange stalls before answering.
        latency: Duration,
    }

    impl ScriptedFactory {
        fn push(&self, reply: Reply) {
            self.replies.lock().expect("lock").push_back(reply);
        }
    }

    struct ScriptedConn {
        replies: Arc<Mutex<VecDeque<Reply>>>,
        latency: Duration,
    }

    #[async_trait]
    impl ConnectionFactory for ScriptedFactory {
        type Connection = ScriptedConn;

        async fn connect(&self) -> Result<ScriptedConn, TransportError> {
            Ok(ScriptedConn {
                replies: Arc::clone(&self.replies),
                latency: self.latency,
            })
        }

        async fn check(&self, _conn: &mut ScriptedConn) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[async_trait]
    impl RpcConnection for ScriptedConn {
        async fn exchange(
            &mut self,
            request: &JsonRpcRequest<'_>,
        ) -> Result<JsonRpcResponse, TransportError> {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let reply = self
                .replies
                .lock()
                .expect("lock")
                .pop_front()
                .expect("a scripted reply");
            let body = reply(request.id)?;
            Ok(serde_json::from_value(body).expect("scripted reply is a valid envelope"))
        }
    }

    fn client(factory: ScriptedFactory) -> RpcClient<ScriptedFactory> {
        let pool = Pool::new("scripted", factory, PoolConfig::default()).expect("pool");
        RpcClient::new(pool, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn call_decodes_typed_result_and_returns_connection() {
        let factory = ScriptedFactory::default();
        factory.push(Box::new(|id| Ok(serde_json::json!({"id": id, "result": 42, "error": null}))));
        let client = client(factory);

        let count: u64 = client.call("getblockcount", vec![]).await.expect("call");
        assert_eq!(count, 42);
        assert_eq!(client.pool().status().idle, 1);
    }

    #[tokio::test]
    async fn server_error_is_surfaced_and_connection_kept() {
        let factory = ScriptedFactory::default();
        factory.push(Box::new(|id| {
            Ok(serde_json::json!({"id": id, "result": null, "error": {"code": -8, "message": "bad param"}}))
        }));
        let client = client(factory);

        let err = client
            .call::<u64>("getblockhash", vec![serde_json::json!(-1)])
            .await
            .expect_err("server error");
        assert!(matches!(err, RpcError::ServerError { code: -8, .. }));
        assert_eq!(client.pool().status().idle, 1, "well-formed errors keep the connection");
    }

    #[tokio::test]
    async fn mismatched_response_id_invalidates_connection() {
        let factory = ScriptedFactory::default();
        factory.push(Box::new(|id| Ok(serde_json::json!({"id": id + 1, "result": 1}))));
        let client = client(factory);

        let err = client.call::<u64>("ping", vec![]).await.expect_err("mismatch");
        assert!(matches!(err, RpcError::Transport(TransportError::Protocol(_))));
        let status = client.pool().status();
        assert_eq!(status.idle, 0);
        assert_eq!(status.open, 0);
    }

    #[tokio::test]
    async fn transport_failure_invalidates_connection() {
        let factory = ScriptedFactory::default();
        factory.push(Box::new(|_| Err(TransportError::Protocol("reset".into()))));
        let client = client(factory);

        let err = client.call::<u64>("ping", vec![]).await.expect_err("transport");
        assert!(err.is_retryable());
        assert_eq!(client.pool().status().open, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn call_past_deadline_times_out_and_invalidates_connection() {
        let factory = ScriptedFactory {
            latency: Duration::from_secs(30),
            ..ScriptedFactory::default()
        };
        factory.push(Box::new(|id| Ok(serde_json::json!({"id": id, "result": 1}))));
        let client = client(factory);

        let err = client.call::<u64>("getblockcount", vec![]).await.expect_err("deadline");
        assert!(matches!(err, RpcError::Transport(TransportError::Timeout(d)) if d == Duration::from_secs(5)));
        assert!(err.is_retryable());
        let status = client.pool().status();
        assert_eq!(status.open, 0);
        assert_eq!(status.idle, 0);
    }

    #[tokio::test]
    async fn undecodable_result_is_invalid_response() {
        let factory = ScriptedFactory::default();
        factory.push(Box::new(|id| Ok(serde_json::json!({"id": id, "result": "not a number"}))));
        let client = client(factory);

        let err = client.call::<u64>("getblockcount", vec![]).await.expect_err("decode");
        assert!(matches!(err, RpcError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn closed_pool_fails_call() {
        let client = client(ScriptedFactory::default());
        client.pool().close();
        let err = client.call::<u64>("ping", vec![]).await.expect_err("closed");
        assert!(matches!(err, RpcError::Pool(PoolError::Closed)));
    }
}
