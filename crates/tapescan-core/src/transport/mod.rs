//! Bounded pools of reusable upstream connections.
//!
//! [`Pool`] owns the idle set, the open-connection counter and a background
//! eviction task. What a "connection" is, how it is opened and how it is
//! probed is supplied by a [`ConnectionFactory`]; the HTTP node transport and
//! the persistent-socket index transport are the two factories shipped here.

mod http;
mod socket;

pub use http::{HttpConfig, HttpConnection, HttpTransport};
pub use socket::{SocketConfig, SocketConnection, SocketTransport};

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CoreError, PoolError, TransportError};
use crate::rpc::protocol::{parse_response_id, JsonRpcRequest, JsonRpcResponse};

// ==============================================================================
// Connection Factory
// ==============================================================================

/// Capability set a transport supplies to the generic pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a fresh connection to the upstream.
    async fn connect(&self) -> Result<Self::Connection, TransportError>;

    /// Lightweight round-trip probe run on every idle connection before it
    /// is handed out again.
    async fn check(&self, conn: &mut Self::Connection) -> Result<(), TransportError>;

    /// Tear a connection down. The default simply drops it.
    fn disconnect(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// A connection able to carry one JSON-RPC request/response exchange at a
/// time. Callers serialize access through the pool lease; nothing is
/// pipelined.
#[async_trait]
pub trait RpcConnection: Send {
    async fn exchange(
        &mut self,
        request: &JsonRpcRequest<'_>,
    ) -> Result<JsonRpcResponse, TransportError>;
}

/// Request id carried by health-check pings.
const PING_ID: u64 = 0;

/// Accept a ping reply only when it echoes the ping id and carries no error.
fn check_ping_response(response: &JsonRpcResponse) -> Result<(), TransportError> {
    if parse_response_id(&response.id) != Some(PING_ID) {
        return Err(TransportError::Protocol(format!(
            "health ping answered with id {}",
            response.id
        )));
    }
    match &response.error {
        Some(err) if !err.is_null() => Err(TransportError::Protocol(format!(
            "health probe rejected: {err}"
        ))),
        _ => Ok(()),
    }
}

// ==============================================================================
// Configuration
// ==============================================================================

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on connections in existence (idle plus leased).
    pub max_open: usize,
    /// Upper bound on connections parked in the idle set.
    pub max_idle: usize,
    /// Idle connections unused for longer than this are closed by the evictor.
    pub idle_timeout: Duration,
    pub eviction_interval: Duration,
    /// Deadline applied by [`Pool::acquire`].
    pub acquire_timeout: Duration,
    /// After a failed connect, further connects within this window fail fast
    /// with the remembered error.
    pub connect_retry_window: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 16,
            max_idle: 4,
            idle_timeout: Duration::from_secs(90),
            eviction_interval: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            connect_retry_window: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<(), CoreError> {
        if self.max_open == 0 {
            return Err(CoreError::InvalidInput(
                "pool max_open must be at least 1".to_owned(),
            ));
        }
        if self.eviction_interval.is_zero() {
            return Err(CoreError::InvalidInput(
                "pool eviction interval must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of a pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub open: usize,
    pub max_open: usize,
    pub closed: bool,
}

// ==============================================================================
// Pool
// ==============================================================================

struct IdleConnection<C> {
    conn: C,
    idle_since: Instant,
}

struct PoolState<C> {
    /// Oldest first; `pop` hands out the most recently released connection.
    idle: Vec<IdleConnection<C>>,
    open: usize,
    closed: bool,
    last_connect_failure: Option<(Instant, String)>,
}

struct Shared<F: ConnectionFactory> {
    name: String,
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    released: Notify,
    shutdown: CancellationToken,
}

/// A bounded pool of connections produced by `F`.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct Pool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

enum Step<C> {
    Reuse(C),
    Open,
    Wait,
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool and start its eviction task. Must be called from within
    /// a tokio runtime.
    pub fn new(name: impl Into<String>, factory: F, config: PoolConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            name: name.into(),
            factory,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                closed: false,
                last_connect_failure: None,
            }),
            released: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        spawn_evictor(&shared);
        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Lease a connection, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection<F>, PoolError> {
        self.acquire_until(Instant::now() + self.shared.config.acquire_timeout)
            .await
    }

    /// Lease a connection, waiting until `deadline` for one to be released
    /// when the pool is at capacity.
    ///
    /// Dropping the returned future at any point leaves the pool consistent.
    pub async fn acquire_until(&self, deadline: Instant) -> Result<PooledConnection<F>, PoolError> {
        let shared = &self.shared;
        loop {
            let step = {
                let mut state = shared.lock_state();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(idle) = state.idle.pop() {
                    Step::Reuse(idle.conn)
                } else if state.open < shared.config.max_open {
                    if let Some((failed_at, message)) = &state.last_connect_failure {
                        if failed_at.elapsed() < shared.config.connect_retry_window {
                            return Err(PoolError::Connect(TransportError::Connect(
                                message.clone(),
                            )));
                        }
                    }
                    state.open += 1;
                    Step::Open
                } else {
                    Step::Wait
                }
            };

            match step {
                Step::Reuse(conn) => {
                    let mut lease = self.lease(conn);
                    match tokio::time::timeout_at(deadline, shared.factory.check(&mut *lease)).await {
                        Ok(Ok(())) => {
                            debug!(pool = %shared.name, "reusing idle connection");
                            return Ok(lease);
                        }
                        Ok(Err(err)) => {
                            warn!(pool = %shared.name, error = %err, "idle connection failed health check");
                            lease.mark_invalid();
                        }
                        Err(_) => {
                            warn!(pool = %shared.name, "health check outlived the acquire deadline");
                            lease.mark_invalid();
                            return Err(PoolError::Timeout);
                        }
                    }
                }
                Step::Open => {
                    let mut slot = OpenSlot {
                        shared,
                        armed: true,
                    };
                    let Ok(connected) = tokio::time::timeout_at(deadline, shared.factory.connect()).await
                    else {
                        debug!(pool = %shared.name, "connect outlived the acquire deadline");
                        return Err(PoolError::Timeout);
                    };
                    match connected {
                        Ok(conn) => {
                            slot.armed = false;
                            let open = {
                                let mut state = shared.lock_state();
                                state.last_connect_failure = None;
                                state.open
                            };
                            debug!(pool = %shared.name, pool.open = open, "opened connection");
                            return Ok(self.lease(conn));
                        }
                        Err(err) => {
                            warn!(pool = %shared.name, error = %err, "failed to open connection");
                            shared.lock_state().last_connect_failure =
                                Some((Instant::now(), err.to_string()));
                            drop(slot);
                            return Err(PoolError::Connect(err));
                        }
                    }
                }
                Step::Wait => {
                    let woke = tokio::time::timeout_at(deadline, async {
                        tokio::select! {
                            _ = shared.released.notified() => {}
                            _ = shared.shutdown.cancelled() => {}
                        }
                    })
                    .await;
                    if woke.is_err() {
                        debug!(pool = %shared.name, "acquire deadline elapsed");
                        return Err(PoolError::Timeout);
                    }
                }
            }
        }
    }

    /// Close the pool: stop the evictor, drop every idle connection and make
    /// every later acquire fail with [`PoolError::Closed`]. Leased
    /// connections are discarded when their lessees release them.
    pub fn close(&self) {
        let shared = &self.shared;
        let drained = {
            let mut state = shared.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained = std::mem::take(&mut state.idle);
            state.open -= drained.len();
            drained
        };
        shared.shutdown.cancel();
        let count = drained.len();
        for idle in drained {
            shared.factory.disconnect(idle.conn);
        }
        shared.released.notify_waiters();
        info!(pool = %shared.name, closed_idle = count, "connection pool closed");
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock_state();
        PoolStatus {
            idle: state.idle.len(),
            open: state.open,
            max_open: self.shared.config.max_open,
            closed: state.closed,
        }
    }

    fn lease(&self, conn: F::Connection) -> PooledConnection<F> {
        PooledConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
            invalid: false,
        }
    }
}

impl<F: ConnectionFactory> Shared<F> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, conn: F::Connection, invalid: bool) {
        let discarded = {
            let mut state = self.lock_state();
            if state.closed || invalid || state.idle.len() >= self.config.max_idle {
                state.open -= 1;
                Some(conn)
            } else {
                state.idle.push(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
                None
            }
        };
        if let Some(conn) = discarded {
            debug!(pool = %self.name, invalid, "discarding released connection");
            self.factory.disconnect(conn);
        }
        self.released.notify_one();
    }

    /// Close idle connections past the idle timeout, then trim the idle set
    /// down to `max_idle` starting from the oldest.
    fn evict(&self) -> usize {
        let expired = {
            let mut state = self.lock_state();
            let now = Instant::now();
            let timeout = self.config.idle_timeout;
            let (fresh, mut expired): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|idle| now.duration_since(idle.idle_since) < timeout);
            state.idle = fresh;
            let excess = state.idle.len().saturating_sub(self.config.max_idle);
            expired.extend(state.idle.drain(..excess));
            state.open -= expired.len();
            expired
        };
        let count = expired.len();
        for idle in expired {
            self.factory.disconnect(idle.conn);
        }
        if count > 0 {
            debug!(pool = %self.name, evicted = count, "evicted idle connections");
            self.released.notify_waiters();
        }
        count
    }
}

fn spawn_evictor<F: ConnectionFactory>(shared: &Arc<Shared<F>>) {
    let weak = Arc::downgrade(shared);
    let shutdown = shared.shutdown.clone();
    let period = shared.config.eviction_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(shared) = weak.upgrade() else {
                break;
            };
            shared.evict();
        }
    });
}

/// Gives back a reserved open slot if connecting never finishes.
struct OpenSlot<'a, F: ConnectionFactory> {
    shared: &'a Shared<F>,
    armed: bool,
}

impl<F: ConnectionFactory> Drop for OpenSlot<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock_state().open -= 1;
            self.shared.released.notify_one();
        }
    }
}

// ==============================================================================
// Lease
// ==============================================================================

/// A connection leased from a [`Pool`]. Returned to the pool on drop unless
/// it was marked invalid.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    shared: Arc<Shared<F>>,
    invalid: bool,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Flag the connection as unusable; it is closed instead of reused.
    pub fn mark_invalid(&mut self) {
        self.invalid = true;
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &F::Connection {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut F::Connection {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.invalid);
        }
    }
}

// ==============================================================================
// Tests
// ==============================================================================
