//! Stateless-HTTP transport for the blockchain node's JSON-RPC endpoint.
//!
//! Each pooled [`HttpConnection`] wraps its own `reqwest::Client` limited to a
//! single keep-alive connection, so one lease corresponds to one upstream
//! socket. Requests carry Basic authentication when credentials are set.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, Url};
use tracing::{debug, trace};

use crate::error::{CoreError, TransportError};
use crate::rpc::protocol::{JsonRpcRequest, JsonRpcResponse};

use super::{check_ping_response, ConnectionFactory, RpcConnection, PING_ID};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Method used as the health probe on idle node connections.
const PROBE_METHOD: &str = "ping";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub url: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Outbound request rate limit shared by every connection of the pool.
    pub requests_per_second: Option<u32>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".to_owned(),
            user: None,
            pass: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            requests_per_second: None,
        }
    }
}

// ==============================================================================
// Factory
// ==============================================================================

pub struct HttpTransport {
    url: String,
    auth: Option<(String, String)>,
    connect_timeout: Duration,
    request_timeout: Duration,
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, CoreError> {
        let url = parse_connection(&config.url)?;
        let auth = resolve_auth(config.user.as_deref(), config.pass.as_deref())?;
        let limiter = match config.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidInput("requests_per_second must be at least 1".to_owned())
                })?;
                Some(Arc::new(RateLimiter::direct(Quota::per_second(limit))))
            }
        };

        Ok(Self {
            url,
            auth,
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            limiter,
        })
    }
}

#[async_trait]
impl ConnectionFactory for HttpTransport {
    type Connection = HttpConnection;

    async fn connect(&self) -> Result<HttpConnection, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true)
            .build()?;

        Ok(HttpConnection {
            client,
            url: self.url.clone(),
            auth: self.auth.clone(),
            limiter: self.limiter.clone(),
        })
    }

    async fn check(&self, conn: &mut HttpConnection) -> Result<(), TransportError> {
        let request = JsonRpcRequest::new(PING_ID, PROBE_METHOD, &[]);
        let response = conn.exchange(&request).await?;
        check_ping_response(&response)
    }
}

// ==============================================================================
// Connection
// ==============================================================================

pub struct HttpConnection {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    limiter: Option<Arc<DirectRateLimiter>>,
}

#[async_trait]
impl RpcConnection for HttpConnection {
    async fn exchange(
        &mut self,
        request: &JsonRpcRequest<'_>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(request);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(rpc.id = request.id, rpc.method = request.method, %status, body_len = body.len(), "http rpc response");
        trace!(rpc.id = request.id, body = %body, "http rpc response body");

        // The node answers RPC-level errors with a non-2xx status and a JSON
        // body, so the status alone does not decide the outcome.
        serde_json::from_str(&body).map_err(|e| {
            TransportError::Protocol(format!(
                "decode JSON-RPC response (status {status}): {e}"
            ))
        })
    }
}

// ==============================================================================
// Connection Settings
// ==============================================================================

fn resolve_auth(
    user: Option<&str>,
    pass: Option<&str>,
) -> Result<Option<(String, String)>, CoreError> {
    match (user, pass) {
        (Some(u), Some(p)) => Ok(Some((u.to_owned(), p.to_owned()))),
        (Some(_), None) | (None, Some(_)) => Err(CoreError::InvalidInput(
            "both rpc user and rpc pass must be set together".to_owned(),
        )),
        (None, None) => Ok(None),
    }
}

fn parse_connection(connection: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(connection).map_err(|e| {
        CoreError::InvalidInput(format!(
            "invalid node url `{connection}`: expected HTTP(S) URL ({e})"
        ))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(connection.to_owned()),
        other => Err(CoreError::InvalidInput(format!(
            "unsupported connection scheme `{other}`; expected http or https"
        ))),
    }
}
