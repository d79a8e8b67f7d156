//! Unified error types for the arbitrage engine.

use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the engine.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading or validation error. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Market-data error (malformed or inconsistent book state).
    #[error("data error: {0}")]
    Data(#[from] DataError),

    /// Exchange gateway error.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Order lifecycle error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    Ws(#[from] WsError),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupted internal state. Tears the controller down.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Configuration errors. All of these abort startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment deserialization failed (missing/unknown/mistyped key).
    #[error("environment error: {0}")]
    Env(#[from] envy::Error),

    /// A recognized-prefix key that no setting claims.
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    /// A key parsed but its value is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Offending key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A configured arbitrage path failed validation.
    #[error("invalid path {name}: {reason}")]
    InvalidPath {
        /// Path key, e.g. `path1`.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Market-data errors. Recovered locally by dropping the pair and
/// resubscribing.
#[derive(Error, Debug)]
pub enum DataError {
    /// Best bid crossed best ask after an update.
    #[error("crossed book for {pair}: bid {best_bid} >= ask {best_ask}")]
    CrossedBook {
        /// Affected pair id.
        pair: String,
        /// Best bid observed.
        best_bid: Decimal,
        /// Best ask observed.
        best_ask: Decimal,
    },

    /// Feed checksum did not match the recomputed value.
    #[error("checksum mismatch for {pair}: feed {expected}, computed {computed}")]
    ChecksumMismatch {
        /// Affected pair id.
        pair: String,
        /// Checksum carried by the message.
        expected: i32,
        /// Checksum recomputed over the cached book.
        computed: i32,
    },

    /// Message could not be decoded into a book update.
    #[error("malformed feed message: {0}")]
    MalformedMessage(String),

    /// Delta arrived for a pair with no snapshot yet.
    #[error("update for {pair} before snapshot")]
    UpdateBeforeSnapshot {
        /// Affected pair id.
        pair: String,
    },
}

/// Exchange gateway errors (REST surface).
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Transport-level failure (timeout, connect, TLS).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        /// Endpoint path.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body (may be truncated).
        body: String,
    },

    /// Exchange-level error envelope (non-zero code).
    #[error("exchange rejected request: code={code} msg={message}")]
    Api {
        /// Exchange error code.
        code: String,
        /// Exchange error message.
        message: String,
    },

    /// A private endpoint was called without credentials (public-only mode).
    #[error("no API credentials configured")]
    MissingCredentials,

    /// Response body did not match the expected shape.
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Whether a bounded retry is worth attempting.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Http(e) => e.is_timeout() || e.is_connect(),
            ExchangeError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Order lifecycle errors. Abort the current execution only.
#[derive(Error, Debug)]
pub enum TradingError {
    /// Placement rejected or failed.
    #[error("order placement failed: {0}")]
    PlacementFailed(String),

    /// Order not filled within the per-leg timeout.
    #[error("order {order_id} not filled within timeout")]
    FillTimeout {
        /// The order ID that timed out.
        order_id: String,
    },

    /// Leg filled below the dust threshold at timeout.
    #[error("order {order_id} partially filled: {filled}/{requested}")]
    PartialFill {
        /// The order ID.
        order_id: String,
        /// Filled size at timeout.
        filled: Decimal,
        /// Requested size.
        requested: Decimal,
    },

    /// Cancellation failed.
    #[error("failed to cancel order {order_id}: {reason}")]
    CancelFailed {
        /// The order ID.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Status query failed.
    #[error("failed to query order {order_id}: {reason}")]
    StatusFailed {
        /// The order ID.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Start-asset balance below the stake plus headroom.
    #[error("insufficient {asset} balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Asset symbol.
        asset: String,
        /// Required amount.
        required: Decimal,
        /// Available amount.
        available: Decimal,
    },

    /// Opportunity expired before execution started.
    #[error("opportunity expired before execution")]
    OpportunityExpired,

    /// Invalid leg parameters (zero size after rounding, missing price).
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection could not be established.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("websocket closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// Subscription or outbound send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
