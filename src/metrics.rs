//! Prometheus metrics for the bridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Block processing metrics
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "relayer_blocks_processed_total",
        "Total number of blocks covered by completed windows",
        &["chain"]
    ).unwrap();

    pub static ref CHECKPOINT: GaugeVec = register_gauge_vec!(
        "relayer_checkpoint_block",
        "Last fully processed block",
        &["chain"]
    ).unwrap();

    pub static ref SAFE_HEAD: GaugeVec = register_gauge_vec!(
        "relayer_safe_head_block",
        "Chain head minus confirmation depth",
        &["chain"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_DETECTED: CounterVec = register_counter_vec!(
        "relayer_events_detected_total",
        "Total number of bridge events decoded",
        &["chain", "kind"]
    ).unwrap();

    pub static ref DECODE_FAILURES: CounterVec = register_counter_vec!(
        "relayer_decode_failures_total",
        "Logs skipped because they could not be decoded",
        &["chain"]
    ).unwrap();

    pub static ref RELAYS: CounterVec = register_counter_vec!(
        "relayer_relays_total",
        "Relay attempts by outcome",
        &["source_chain", "outcome"]
    ).unwrap();

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_relay_latency_seconds",
        "Time from dispatch to destination confirmation",
        &["source_chain"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    pub static ref CYCLES_SKIPPED: CounterVec = register_counter_vec!(
        "relayer_cycles_skipped_total",
        "Poll ticks dropped because the previous cycle was still running",
        &["chain"]
    ).unwrap();

    pub static ref PIPELINE_HALTED: GaugeVec = register_gauge_vec!(
        "relayer_pipeline_halted",
        "1 if the chain's pipeline stopped dispatching after a fatal error",
        &["chain"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "relayer_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll",
        &["chain"]
    ).unwrap();
}

/// Record a completed window and the resulting checkpoint
pub fn record_blocks_processed(chain: &str, blocks: u64, checkpoint: u64) {
    BLOCKS_PROCESSED
        .with_label_values(&[chain])
        .inc_by(blocks as f64);
    CHECKPOINT.with_label_values(&[chain]).set(checkpoint as f64);
}

pub fn set_safe_head(chain: &str, block: u64) {
    SAFE_HEAD.with_label_values(&[chain]).set(block as f64);
}

pub fn record_event_detected(chain: &str, kind: &str) {
    EVENTS_DETECTED.with_label_values(&[chain, kind]).inc();
}

pub fn record_decode_failure(chain: &str) {
    DECODE_FAILURES.with_label_values(&[chain]).inc();
}

/// Record a relay outcome (`relayed`, `already_relayed`, `deferred`, ...)
pub fn record_relay(source_chain: &str, outcome: &str) {
    RELAYS.with_label_values(&[source_chain, outcome]).inc();
}

pub fn record_relay_latency(source_chain: &str, seconds: f64) {
    RELAY_LATENCY
        .with_label_values(&[source_chain])
        .observe(seconds);
}

/// Record an error
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}

pub fn record_cycles_skipped(chain: &str, ticks: u64) {
    CYCLES_SKIPPED
        .with_label_values(&[chain])
        .inc_by(ticks as f64);
}

pub fn set_pipeline_halted(chain: &str, halted: bool) {
    PIPELINE_HALTED
        .with_label_values(&[chain])
        .set(if halted { 1.0 } else { 0.0 });
}

/// Record last successful poll
pub fn record_successful_poll(chain: &str) {
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[chain])
        .set(chrono::Utc::now().timestamp() as f64);
}
