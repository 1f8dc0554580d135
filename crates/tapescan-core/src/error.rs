// ==============================================================================
// Transport Errors
// ==============================================================================

/// Failures talking to an upstream over a single connection.
///
/// Any of these leaves the connection in an unknown state, so the lease that
/// produced it is invalidated and never returned to the idle set.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("http failure: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },
}

// ==============================================================================
// Pool Errors
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool is closed")]
    Closed,

    /// Every connection was leased and none came back before the deadline.
    #[error("timed out waiting for a pooled connection")]
    Timeout,

    #[error("could not open upstream connection: {0}")]
    Connect(TransportError),
}

// ==============================================================================
// RPC Errors
// ==============================================================================

/// Outcome of a single JSON-RPC call that did not yield a typed result.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A well-formed response carrying `{"code", "message"}`.
    #[error("server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Transport failures and pool exhaustion may succeed on retry; an error
    /// the server returned deliberately will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pool(PoolError::Closed) => false,
            Self::Pool(_) | Self::Transport(_) => true,
            Self::ServerError { .. } | Self::InvalidResponse(_) => false,
        }
    }
}

// ==============================================================================
// Decode Errors
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid hex `{0}`")]
    InvalidHex(String),

    #[error("integer overflow decoding `{0}`")]
    Overflow(String),

    #[error("invalid decimal number `{0}`")]
    InvalidNumber(String),

    #[error("invalid address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("combined script `{0}` is not a 20-byte hash plus a type suffix")]
    InvalidCombinedScript(String),

    #[error("combined script `{0}` has no address form")]
    NoAddressForm(String),

    #[error("expected at least {expected} script fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field `{field}` must be {expected} hex characters, found {found}")]
    FieldWidth {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("script is not a {0}")]
    UnexpectedScript(&'static str),
}

// ==============================================================================
// Core Error
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("RPC communication failure: {0}")]
    Rpc(#[from] RpcError),

    #[error("decode failure: {0}")]
    Decode(#[from] DecodeError),

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    #[error("invalid transaction data: {0}")]
    InvalidTxData(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<PoolError> for CoreError {
    fn from(err: PoolError) -> Self {
        Self::Rpc(RpcError::Pool(err))
    }
}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        Self::Rpc(RpcError::Transport(err))
    }
}
