//! REST gateway implementation.
//!
//! Private endpoints are signed with HMAC-SHA256 over
//! `timestamp + method + path + body`, base64 encoded. Without credentials
//! the client serves market data only and private calls fail with
//! [`ExchangeError::MissingCredentials`].

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::arbitrage::path::{Action, Pair};
use crate::config::{ApiCredentials, Config};
use crate::error::ExchangeError;
use crate::exchange::{ExchangeApi, OrderRequest, Ticker};
use crate::orderbook::types::{OrderBook, PriceLevel};
use crate::trading::order::{OrderState, OrderStatus};

type HmacSha256 = Hmac<Sha256>;

/// REST client for the exchange gateway.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
}

/// Standard response envelope: non-zero `code` means the request failed.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    #[serde(default)]
    details: Vec<BalanceDetail>,
}

#[derive(Debug, Deserialize)]
struct BalanceDetail {
    ccy: String,
    #[serde(rename = "availBal")]
    avail_bal: String,
}

#[derive(Debug, Deserialize)]
struct BookData {
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    asks: Vec<Vec<String>>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(rename = "bidPx")]
    bid_px: String,
    #[serde(rename = "askPx")]
    ask_px: String,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "tdMode")]
    td_mode: &'a str,
    #[serde(rename = "clOrdId")]
    cl_ord_id: &'a str,
    side: &'a str,
    #[serde(rename = "ordType")]
    ord_type: &'a str,
    sz: String,
    px: String,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderData {
    #[serde(rename = "ordId", default)]
    ord_id: String,
    #[serde(rename = "sCode", default)]
    s_code: String,
    #[serde(rename = "sMsg", default)]
    s_msg: String,
}

#[derive(Debug, Serialize)]
struct CancelOrderBody {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "ordId")]
    ord_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderStatusData {
    state: String,
    #[serde(rename = "accFillSz", default)]
    acc_fill_sz: String,
    #[serde(rename = "avgPx", default)]
    avg_px: String,
}

impl RestClient {
    /// Build a client from configuration.
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(std::time::Duration::from_millis(500))
            .tcp_nodelay(true)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .expect("failed to create HTTP client");

        Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            credentials: config.credentials.clone(),
        }
    }

    /// Whether the client can reach private endpoints.
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn sign(
        creds: &ApiCredentials,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(creds.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Parse(format!("bad secret key: {e}")))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    fn iso_timestamp() -> Result<String, ExchangeError> {
        let format = format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        );
        OffsetDateTime::now_utc()
            .format(&format)
            .map_err(|e| ExchangeError::Parse(format!("timestamp format: {e}")))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
        private: bool,
    ) -> Result<Vec<T>, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);

        if private {
            let creds = self
                .credentials
                .as_ref()
                .ok_or(ExchangeError::MissingCredentials)?;
            let timestamp = Self::iso_timestamp()?;
            let signature = Self::sign(
                creds,
                &timestamp,
                method.as_str(),
                path,
                body.as_deref().unwrap_or(""),
            )?;
            request = request
                .header("OK-ACCESS-KEY", &creds.api_key)
                .header("OK-ACCESS-SIGN", signature)
                .header("OK-ACCESS-TIMESTAMP", timestamp)
                .header("OK-ACCESS-PASSPHRASE", &creds.passphrase);
            if creds.sandbox {
                request = request.header("x-simulated-trading", "1");
            }
        }

        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(e.to_string()))?;
        if envelope.code != "0" {
            return Err(ExchangeError::Api {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope.data)
    }

    fn parse_decimal(field: &str, value: &str) -> Result<Decimal, ExchangeError> {
        value
            .parse()
            .map_err(|_| ExchangeError::Parse(format!("bad {field}: {value:?}")))
    }

    fn parse_levels(raw: &[Vec<String>]) -> Vec<PriceLevel> {
        raw.iter()
            .filter_map(|level| {
                let price: Decimal = level.first()?.parse().ok()?;
                let size: Decimal = level.get(1)?.parse().ok()?;
                (size > Decimal::ZERO).then_some(PriceLevel { price, size })
            })
            .collect()
    }

    fn parse_ts(ts: Option<&str>) -> OffsetDateTime {
        ts.and_then(|v| v.parse::<i64>().ok())
            .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok())
            .unwrap_or_else(OffsetDateTime::now_utc)
    }
}

#[async_trait]
impl ExchangeApi for RestClient {
    #[instrument(skip(self))]
    async fn get_balance(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let data: Vec<BalanceData> = self
            .request(reqwest::Method::GET, "/api/v5/account/balance", None, true)
            .await?;

        let mut balances = HashMap::new();
        for account in &data {
            for detail in &account.details {
                let amount = Self::parse_decimal("availBal", &detail.avail_bal)?;
                if amount > Decimal::ZERO {
                    balances.insert(detail.ccy.to_uppercase(), amount);
                }
            }
        }
        debug!(assets = balances.len(), "fetched balances");
        Ok(balances)
    }

    #[instrument(skip(self), fields(pair = %pair))]
    async fn get_order_book(&self, pair: &Pair, depth: u32) -> Result<OrderBook, ExchangeError> {
        let path = format!("/api/v5/market/books?instId={}&sz={}", pair.id(), depth);
        let data: Vec<BookData> = self
            .request(reqwest::Method::GET, &path, None, false)
            .await?;
        let book = data
            .first()
            .ok_or_else(|| ExchangeError::Parse("empty book response".to_string()))?;

        let mut bids = Self::parse_levels(&book.bids);
        let mut asks = Self::parse_levels(&book.asks);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        Ok(OrderBook::new(
            pair.clone(),
            bids,
            asks,
            Self::parse_ts(book.ts.as_deref()),
        ))
    }

    #[instrument(skip(self), fields(pair = %pair))]
    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError> {
        let path = format!("/api/v5/market/ticker?instId={}", pair.id());
        let data: Vec<TickerData> = self
            .request(reqwest::Method::GET, &path, None, false)
            .await?;
        let ticker = data
            .first()
            .ok_or_else(|| ExchangeError::Parse("empty ticker response".to_string()))?;

        Ok(Ticker {
            pair: pair.clone(),
            best_bid: Self::parse_decimal("bidPx", &ticker.bid_px)?,
            best_ask: Self::parse_decimal("askPx", &ticker.ask_px)?,
            ts: Self::parse_ts(ticker.ts.as_deref()),
        })
    }

    #[instrument(skip(self, request), fields(pair = %request.pair, side = %request.side))]
    async fn place_order(&self, request: &OrderRequest) -> Result<String, ExchangeError> {
        let body = serde_json::to_string(&PlaceOrderBody {
            inst_id: request.pair.id(),
            td_mode: "cash",
            cl_ord_id: &request.client_id,
            side: match request.side {
                Action::Buy => "buy",
                Action::Sell => "sell",
            },
            ord_type: request.order_type.as_str(),
            sz: request.size.to_string(),
            px: request.price.to_string(),
        })
        .map_err(|e| ExchangeError::Parse(e.to_string()))?;

        let data: Vec<PlaceOrderData> = self
            .request(reqwest::Method::POST, "/api/v5/trade/order", Some(body), true)
            .await?;
        let placed = data
            .first()
            .ok_or_else(|| ExchangeError::Parse("empty order response".to_string()))?;

        if !placed.s_code.is_empty() && placed.s_code != "0" {
            return Err(ExchangeError::Api {
                code: placed.s_code.clone(),
                message: placed.s_msg.clone(),
            });
        }
        if placed.ord_id.is_empty() {
            return Err(ExchangeError::Parse("no order id in response".to_string()));
        }
        Ok(placed.ord_id.clone())
    }

    #[instrument(skip(self), fields(pair = %pair, order_id = %order_id))]
    async fn cancel_order(&self, pair: &Pair, order_id: &str) -> Result<(), ExchangeError> {
        let body = serde_json::to_string(&CancelOrderBody {
            inst_id: pair.id(),
            ord_id: order_id.to_string(),
        })
        .map_err(|e| ExchangeError::Parse(e.to_string()))?;

        let _: Vec<serde_json::Value> = self
            .request(
                reqwest::Method::POST,
                "/api/v5/trade/cancel-order",
                Some(body),
                true,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(pair = %pair, order_id = %order_id))]
    async fn get_order_status(
        &self,
        pair: &Pair,
        order_id: &str,
    ) -> Result<OrderState, ExchangeError> {
        let path = format!(
            "/api/v5/trade/order?instId={}&ordId={}",
            pair.id(),
            order_id
        );
        let data: Vec<OrderStatusData> = self
            .request(reqwest::Method::GET, &path, None, true)
            .await?;
        let order = data
            .first()
            .ok_or_else(|| ExchangeError::Parse("empty order status response".to_string()))?;

        let status = order.state.parse::<OrderStatus>().ok();
        let filled_size = if order.acc_fill_sz.is_empty() {
            Decimal::ZERO
        } else {
            Self::parse_decimal("accFillSz", &order.acc_fill_sz)?
        };
        let avg_price = if order.avg_px.is_empty() {
            None
        } else {
            Some(Self::parse_decimal("avgPx", &order.avg_px)?)
        };

        Ok(OrderState {
            order_id: order_id.to_string(),
            status,
            filled_size,
            avg_price,
        })
    }
}
