//! WebSocket depth feed: snapshot-then-delta fusion into the book cache.
//!
//! One feed task owns the per-pair delta state and is the cache's sole
//! writer. Reconnection uses exponential backoff; on disconnect every cached
//! book is invalidated until its next snapshot arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::arbitrage::path::Pair;
use crate::error::{DataError, WsError};
use crate::metrics;
use crate::orderbook::cache::BookCache;
use crate::orderbook::checksum::book_checksum;
use crate::orderbook::types::{OrderBook, PriceLevel};

/// Consecutive crossed updates on a pair before we resubscribe it.
const CROSSED_RESUBSCRIBE_THRESHOLD: u32 = 3;

/// One price level on the wire: `[price, size, ...]` as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct WsLevel(pub Vec<String>);

impl WsLevel {
    /// Parse the price field.
    pub fn price(&self) -> Option<Decimal> {
        self.0.first()?.parse().ok()
    }

    /// Parse the size field.
    pub fn size(&self) -> Option<Decimal> {
        self.0.get(1)?.parse().ok()
    }
}

/// Subscription argument: channel + instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsArg {
    /// Channel name; depth lives on `books`.
    pub channel: String,
    /// Instrument id, e.g. `BTC-USDT`.
    #[serde(rename = "instId")]
    pub inst_id: String,
}

/// Book payload carried by snapshot and update messages.
#[derive(Debug, Clone, Deserialize)]
pub struct WsBookData {
    /// Bid levels (price descending on snapshots).
    #[serde(default)]
    pub bids: Vec<WsLevel>,
    /// Ask levels (price ascending on snapshots).
    #[serde(default)]
    pub asks: Vec<WsLevel>,
    /// Exchange timestamp, milliseconds since the epoch.
    #[serde(default)]
    pub ts: Option<String>,
    /// Signed CRC32 over the top levels.
    #[serde(default)]
    pub checksum: Option<i64>,
}

/// Inbound frame shape.
#[derive(Debug, Clone, Deserialize)]
struct WsMessage {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    arg: Option<WsArg>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Option<Vec<WsBookData>>,
    #[serde(default)]
    msg: Option<String>,
}

/// Outbound subscribe/unsubscribe frame.
#[derive(Debug, Serialize)]
struct WsOp<'a> {
    op: &'a str,
    args: Vec<WsArg>,
}

/// Per-pair delta assembly state.
#[derive(Debug, Default)]
struct L2BookState {
    bids: HashMap<Decimal, Decimal>,
    asks: HashMap<Decimal, Decimal>,
    has_snapshot: bool,
}

impl L2BookState {
    fn apply_snapshot(&mut self, bids: &[WsLevel], asks: &[WsLevel]) {
        self.bids.clear();
        self.asks.clear();
        Self::apply_levels(&mut self.bids, bids);
        Self::apply_levels(&mut self.asks, asks);
        self.has_snapshot = true;
    }

    fn apply_update(&mut self, bids: &[WsLevel], asks: &[WsLevel]) {
        Self::apply_levels(&mut self.bids, bids);
        Self::apply_levels(&mut self.asks, asks);
    }

    fn apply_levels(side: &mut HashMap<Decimal, Decimal>, levels: &[WsLevel]) {
        for level in levels {
            let (Some(price), Some(size)) = (level.price(), level.size()) else {
                continue;
            };
            if size <= Decimal::ZERO {
                side.remove(&price);
            } else {
                side.insert(price, size);
            }
        }
    }

    /// Sorted level vectors: bids descending, asks ascending.
    fn to_levels(&self) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        let mut bids: Vec<PriceLevel> = self
            .bids
            .iter()
            .map(|(&price, &size)| PriceLevel { price, size })
            .collect();
        bids.sort_by(|a, b| b.price.cmp(&a.price));

        let mut asks: Vec<PriceLevel> = self
            .asks
            .iter()
            .map(|(&price, &size)| PriceLevel { price, size })
            .collect();
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        (bids, asks)
    }
}

/// Reconnection policy for the feed connection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// First backoff delay.
    pub initial_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Backoff multiplier per failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// The depth feed task: connects, subscribes, and folds snapshot/delta
/// messages into the shared cache.
pub struct BookFeed {
    cache: Arc<BookCache>,
    pairs: Vec<Pair>,
    ws_url: String,
    reconnect: ReconnectConfig,
    states: HashMap<String, L2BookState>,
    crossed_streak: HashMap<String, u32>,
    connected: Arc<AtomicBool>,
    reconnects: Arc<AtomicU64>,
}

impl BookFeed {
    /// Create a feed over `pairs` writing into `cache`.
    pub fn new(
        cache: Arc<BookCache>,
        pairs: Vec<Pair>,
        ws_url: String,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            cache,
            pairs,
            ws_url,
            reconnect,
            states: HashMap::new(),
            crossed_streak: HashMap::new(),
            connected: Arc::new(AtomicBool::new(false)),
            reconnects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle to the connection flag, for status reporting.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    /// Total reconnect attempts so far.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Apply one raw frame. Returns the instrument ids that need to be
    /// resubscribed (checksum failure, delta gap, persistently crossed).
    /// Malformed frames error out and are dropped by the caller.
    pub fn process_frame(
        &mut self,
        text: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<String>, DataError> {
        let message: WsMessage = serde_json::from_str(text)
            .map_err(|e| DataError::MalformedMessage(e.to_string()))?;

        if let Some(event) = &message.event {
            match event.as_str() {
                "error" => warn!(msg = ?message.msg, "feed subscription error"),
                other => debug!(event = other, "feed event"),
            }
            return Ok(Vec::new());
        }

        let (Some(arg), Some(action), Some(data)) =
            (&message.arg, &message.action, &message.data)
        else {
            return Ok(Vec::new());
        };
        if arg.channel != "books" {
            return Ok(Vec::new());
        }

        let mut resubscribe = Vec::new();
        for payload in data {
            match self.apply_book_data(&arg.inst_id, action, payload, now) {
                Ok(()) => {}
                Err(DataError::CrossedBook { pair, best_bid, best_ask }) => {
                    let streak = self.crossed_streak.entry(pair.clone()).or_insert(0);
                    *streak += 1;
                    warn!(
                        pair = %pair,
                        best_bid = %best_bid,
                        best_ask = %best_ask,
                        streak = *streak,
                        "crossed book, invalidated"
                    );
                    self.cache.invalidate(&pair);
                    if *streak >= CROSSED_RESUBSCRIBE_THRESHOLD {
                        self.states.remove(&pair);
                        self.crossed_streak.remove(&pair);
                        resubscribe.push(pair);
                    }
                }
                Err(err) => {
                    warn!(pair = %arg.inst_id, error = %err, "dropping pair pending snapshot");
                    self.cache.invalidate(&arg.inst_id);
                    self.states.remove(&arg.inst_id);
                    self.crossed_streak.remove(&arg.inst_id);
                    resubscribe.push(arg.inst_id.clone());
                }
            }
        }
        Ok(resubscribe)
    }

    fn apply_book_data(
        &mut self,
        inst_id: &str,
        action: &str,
        data: &WsBookData,
        now: OffsetDateTime,
    ) -> Result<(), DataError> {
        let state = self.states.entry(inst_id.to_string()).or_default();

        match action {
            "snapshot" => state.apply_snapshot(&data.bids, &data.asks),
            "update" => {
                if !state.has_snapshot {
                    return Err(DataError::UpdateBeforeSnapshot {
                        pair: inst_id.to_string(),
                    });
                }
                state.apply_update(&data.bids, &data.asks);
            }
            other => {
                return Err(DataError::MalformedMessage(format!(
                    "unknown action {other:?}"
                )))
            }
        }

        let (bids, asks) = state.to_levels();

        if let Some(expected) = data.checksum {
            let computed = book_checksum(&bids, &asks);
            if computed as i64 != expected {
                return Err(DataError::ChecksumMismatch {
                    pair: inst_id.to_string(),
                    expected: expected as i32,
                    computed,
                });
            }
        }

        let pair: Pair = inst_id
            .parse()
            .map_err(|_| DataError::MalformedMessage(format!("bad instrument id {inst_id:?}")))?;
        let updated_at = data
            .ts
            .as_deref()
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok())
            .unwrap_or(now);

        let book = OrderBook::new(pair, bids, asks, updated_at);
        if book.is_crossed() {
            let best_bid = book.best_bid().unwrap_or_default();
            let best_ask = book.best_ask().unwrap_or_default();
            return Err(DataError::CrossedBook {
                pair: inst_id.to_string(),
                best_bid,
                best_ask,
            });
        }

        self.crossed_streak.remove(inst_id);
        self.cache.store(book);
        Ok(())
    }

    /// Run until shutdown, reconnecting with backoff on any failure.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_stream(&mut shutdown).await {
                Ok(()) => break, // clean shutdown
                Err(e) => warn!(error = %e, attempt, "feed connection lost"),
            }

            self.connected.store(false, Ordering::SeqCst);
            self.cache.invalidate_all();
            self.states.clear();
            self.crossed_streak.clear();
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            metrics::inc_ws_reconnects();

            let delay = self.reconnect.next_delay(attempt);
            info!(delay_ms = delay.as_millis() as u64, "reconnecting feed");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            attempt = attempt.saturating_add(1);
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("feed stopped");
    }

    async fn connect_and_stream(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), WsError> {
        info!(url = %self.ws_url, pairs = self.pairs.len(), "connecting feed");
        let (stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let subscribe = subscribe_frame("subscribe", &self.pairs)
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        write
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        self.connected.store(true, Ordering::SeqCst);
        info!("subscribed to depth channels");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        metrics::inc_ws_messages_received();
                        match self.process_frame(&text, OffsetDateTime::now_utc()) {
                            Ok(resub) if !resub.is_empty() => {
                                self.resubscribe(&mut write, &resub).await?;
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "dropped malformed frame"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(WsError::ConnectionClosed {
                            code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(WsError::Tungstenite(e)),
                    None => {
                        return Err(WsError::ConnectionClosed {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn resubscribe<S>(&self, write: &mut S, inst_ids: &[String]) -> Result<(), WsError>
    where
        S: SinkExt<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let pairs: Vec<Pair> = inst_ids.iter().filter_map(|id| id.parse().ok()).collect();
        if pairs.is_empty() {
            return Ok(());
        }
        info!(pairs = ?inst_ids, "resubscribing");
        for op in ["unsubscribe", "subscribe"] {
            let frame =
                subscribe_frame(op, &pairs).map_err(|e| WsError::SendFailed(e.to_string()))?;
            write
                .send(Message::Text(frame))
                .await
                .map_err(|e| WsError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }
}

fn subscribe_frame(op: &str, pairs: &[Pair]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WsOp {
        op,
        args: pairs
            .iter()
            .map(|p| WsArg {
                channel: "books".to_string(),
                inst_id: p.id(),
            })
            .collect(),
    })
}
