//! Engine metrics: scan/evaluation counters, order lifecycle counters, and
//! feed health.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

/// Evaluation ticks completed.
pub const METRIC_SCANS: &str = "triarb_scans_total";
/// Opportunities emitted by the evaluator.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "triarb_opportunities_detected_total";
/// Executions attempted.
pub const METRIC_EXECUTIONS: &str = "triarb_executions_total";
/// Executions that aborted or errored.
pub const METRIC_EXECUTIONS_FAILED: &str = "triarb_executions_failed_total";
/// Orders placed on the exchange.
pub const METRIC_ORDERS_SUBMITTED: &str = "triarb_orders_submitted_total";
/// Orders that filled to within tolerance.
pub const METRIC_ORDERS_FILLED: &str = "triarb_orders_filled_total";
/// Orders that timed out or were rejected.
pub const METRIC_ORDERS_FAILED: &str = "triarb_orders_failed_total";
/// Opportunities rejected by the risk gate.
pub const METRIC_RISK_REJECTIONS: &str = "triarb_risk_rejections_total";
/// Depth feed messages received.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "triarb_ws_messages_received_total";
/// Depth feed reconnections.
pub const METRIC_WS_RECONNECTS: &str = "triarb_ws_reconnects_total";
/// Evaluator latency per tick, milliseconds.
pub const METRIC_EVALUATION_LATENCY: &str = "triarb_evaluation_latency_ms";
/// Order submission latency, milliseconds.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "triarb_order_submit_latency_ms";

/// Register metric descriptions. Call once at startup.
pub fn init_metrics() {
    describe_counter!(METRIC_SCANS, "Evaluation ticks completed");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Arbitrage opportunities emitted by the evaluator"
    );
    describe_counter!(METRIC_EXECUTIONS, "Executions attempted");
    describe_counter!(METRIC_EXECUTIONS_FAILED, "Executions aborted or errored");
    describe_counter!(METRIC_ORDERS_SUBMITTED, "Orders placed on the exchange");
    describe_counter!(METRIC_ORDERS_FILLED, "Orders filled to within tolerance");
    describe_counter!(METRIC_ORDERS_FAILED, "Orders timed out or rejected");
    describe_counter!(METRIC_RISK_REJECTIONS, "Opportunities rejected by the risk gate");
    describe_counter!(METRIC_WS_MESSAGES_RECEIVED, "Depth feed messages received");
    describe_counter!(METRIC_WS_RECONNECTS, "Depth feed reconnections");
    describe_histogram!(METRIC_EVALUATION_LATENCY, "Evaluator latency per tick in ms");
    describe_histogram!(METRIC_ORDER_SUBMIT_LATENCY, "Order submission latency in ms");
    debug!("metrics initialized");
}

/// Count one evaluation tick.
pub fn inc_scans() {
    counter!(METRIC_SCANS).increment(1);
}

/// Count emitted opportunities.
pub fn inc_opportunities_detected(n: u64) {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(n);
}

/// Count one execution attempt.
pub fn inc_executions() {
    counter!(METRIC_EXECUTIONS).increment(1);
}

/// Count one aborted execution.
pub fn inc_executions_failed() {
    counter!(METRIC_EXECUTIONS_FAILED).increment(1);
}

/// Count one placed order.
pub fn inc_orders_submitted() {
    counter!(METRIC_ORDERS_SUBMITTED).increment(1);
}

/// Count one filled order.
pub fn inc_orders_filled() {
    counter!(METRIC_ORDERS_FILLED).increment(1);
}

/// Count one failed order.
pub fn inc_orders_failed() {
    counter!(METRIC_ORDERS_FAILED).increment(1);
}

/// Count one risk rejection.
pub fn inc_risk_rejections() {
    counter!(METRIC_RISK_REJECTIONS).increment(1);
}

/// Count one inbound feed message.
pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

/// Count one feed reconnect.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

/// Record evaluator latency for one tick.
pub fn record_evaluation_latency(start: Instant) {
    histogram!(METRIC_EVALUATION_LATENCY).record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Record order submission latency.
pub fn record_order_submit_latency(start: Instant) {
    histogram!(METRIC_ORDER_SUBMIT_LATENCY).record(start.elapsed().as_secs_f64() * 1000.0);
}
