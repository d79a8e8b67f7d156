//! Order placement and terminal-state polling.
//!
//! These helpers are generic over [`ExchangeApi`] so the executor runs
//! unchanged against the REST client and the mock.

use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::arbitrage::path::Pair;
use crate::error::TradingError;
use crate::exchange::{with_retry, ExchangeApi, OrderRequest};
use crate::metrics;
use crate::trading::order::OrderState;

/// Place an order, retrying transient transport failures.
pub async fn place_order<E: ExchangeApi + ?Sized>(
    client: &E,
    request: &OrderRequest,
    retries: u32,
    retry_delay: Duration,
) -> Result<String, TradingError> {
    request
        .validate()
        .map_err(TradingError::InvalidParams)?;

    debug!(
        pair = %request.pair,
        side = %request.side,
        size = %request.size,
        price = %request.price,
        "placing order"
    );

    let started = std::time::Instant::now();
    let order_id = with_retry(retries, retry_delay, || client.place_order(request))
        .await
        .map_err(|e| TradingError::PlacementFailed(e.to_string()))?;
    metrics::record_order_submit_latency(started);
    metrics::inc_orders_submitted();

    info!(
        order_id = %order_id,
        pair = %request.pair,
        side = %request.side,
        size = %request.size,
        price = %request.price,
        "order placed"
    );
    Ok(order_id)
}

/// Poll an order until it reaches a terminal state, fills the requested
/// size, or the timeout lapses. Returns the last state observed; the caller
/// decides what a non-terminal state at timeout means.
pub async fn wait_for_terminal<E: ExchangeApi + ?Sized>(
    client: &E,
    pair: &Pair,
    order_id: &str,
    requested_size: Decimal,
    timeout: Duration,
    poll_interval: Duration,
) -> OrderState {
    let started = tokio::time::Instant::now();
    let mut last = OrderState::unknown(order_id);

    loop {
        match client.get_order_status(pair, order_id).await {
            Ok(state) => {
                if state.filled_size >= requested_size || state.is_terminal() {
                    return state;
                }
                last = state;
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "order status poll failed");
            }
        }

        if started.elapsed() >= timeout {
            warn!(
                order_id = %order_id,
                filled = %last.filled_size,
                requested = %requested_size,
                "order polling timed out"
            );
            return last;
        }
        sleep(poll_interval).await;
    }
}

/// Cancel an order, logging failures without surfacing them. Used on
/// shutdown and abort paths where cancellation is best-effort.
pub async fn cancel_quietly<E: ExchangeApi + ?Sized>(client: &E, pair: &Pair, order_id: &str) {
    match client.cancel_order(pair, order_id).await {
        Ok(()) => info!(order_id = %order_id, "order cancelled"),
        Err(e) => warn!(order_id = %order_id, error = %e, "cancel failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::path::Action;
    use crate::exchange::{FillMode, MockExchange, OrderType};
    use rust_decimal_macros::dec;

    fn request(size: Decimal) -> OrderRequest {
        OrderRequest {
            pair: Pair::new("BTC", "USDT"),
            side: Action::Buy,
            order_type: OrderType::Limit,
            size,
            price: dec!(60000),
            client_id: "triarb-test-1".to_string(),
        }
    }

    #[tokio::test]
    async fn place_order_returns_exchange_id() {
        let client = MockExchange::new();
        let id = place_order(&client, &request(dec!(0.1)), 0, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(client.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn place_order_rejects_invalid_params() {
        let client = MockExchange::new();
        let result = place_order(&client, &request(dec!(0)), 0, Duration::from_millis(1)).await;
        assert!(matches!(result, Err(TradingError::InvalidParams(_))));
        assert!(client.placed_orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_filled_state_immediately() {
        let client = MockExchange::new();
        let req = request(dec!(0.1));
        let id = client.place_order(&req).await.unwrap();

        let state = wait_for_terminal(
            &client,
            &req.pair,
            &id,
            req.size,
            Duration::from_secs(3),
            Duration::from_millis(150),
        )
        .await;

        assert!(state.status.unwrap().is_filled());
        assert_eq!(state.filled_size, dec!(0.1));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_on_partial_fill() {
        let client = MockExchange::new();
        client.set_fill_mode(FillMode::Partial(dec!(0.4)));
        let req = request(dec!(1));
        let id = client.place_order(&req).await.unwrap();

        let state = wait_for_terminal(
            &client,
            &req.pair,
            &id,
            req.size,
            Duration::from_secs(3),
            Duration::from_millis(150),
        )
        .await;

        assert!(!state.is_terminal());
        assert_eq!(state.filled_size, dec!(0.4));
    }
}
