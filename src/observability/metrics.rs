//! Metrics collection.
//!
//! # Metrics
//! - `approval_tasks_total` (counter): task transitions by status
//! - `approval_signing_attempts_total` (counter): signing attempts by outcome
//! - `approval_gas_check_errors_total` (counter): gas/nonce check errors by code
//! - `approval_prefetch_duration_seconds` (histogram): time until a task is ready
//! - `approval_payment_auto_switch_total` (counter): one-shot gas-account switches
//! - `pending_tx_store_size` (gauge): tracked in-flight transactions
//!
//! Only the `metrics` facade is used here; the host process installs a recorder.

use metrics::{counter, gauge, histogram};
use std::time::Instant;

pub fn record_task_transition(status: &'static str) {
    counter!("approval_tasks_total", "status" => status).increment(1);
}

pub fn record_signing_attempt(outcome: &'static str) {
    counter!("approval_signing_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_gas_check_error(code: u16) {
    counter!("approval_gas_check_errors_total", "code" => code.to_string()).increment(1);
}

pub fn record_prefetch_duration(start: Instant) {
    histogram!("approval_prefetch_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_auto_switch() {
    counter!("approval_payment_auto_switch_total").increment(1);
}

pub fn record_pending_store_size(size: usize) {
    gauge!("pending_tx_store_size").set(size as f64);
}
