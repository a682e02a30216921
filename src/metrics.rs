//! Prometheus counters/gauges for the update pipeline (spec §2 ambient
//! row): one `lazy_static!` block per component, registered at first
//! use.

use prometheus::{IntCounter, IntCounterVec, IntGauge};

lazy_static::lazy_static! {
    pub static ref POLL_ATTEMPTS: IntCounter = register_int_counter!(opts!(
        "eos_updater_poll_attempts_total",
        "Total number of Poll cycles started."
    )).unwrap();

    pub static ref POLL_ERRORS: IntCounterVec = register_int_counter_vec!(
        "eos_updater_poll_errors_total",
        "Total number of Poll cycles that ended in Error, by error kind.",
        &["kind"]
    ).unwrap();

    pub static ref UPDATE_AVAILABLE: IntGauge = register_int_gauge!(opts!(
        "eos_updater_update_available",
        "1 if the last Poll found a newer commit, 0 otherwise."
    )).unwrap();

    pub static ref FETCH_ATTEMPTS: IntCounter = register_int_counter!(opts!(
        "eos_updater_fetch_attempts_total",
        "Total number of Fetch cycles started."
    )).unwrap();

    pub static ref FETCH_BYTES_DOWNLOADED: IntCounter = register_int_counter!(opts!(
        "eos_updater_fetch_bytes_downloaded_total",
        "Total bytes pulled across all Fetch cycles."
    )).unwrap();

    pub static ref APPLY_ATTEMPTS: IntCounter = register_int_counter!(opts!(
        "eos_updater_apply_attempts_total",
        "Total number of Apply cycles started."
    )).unwrap();

    pub static ref APPLY_SUCCESSES: IntCounter = register_int_counter!(opts!(
        "eos_updater_apply_successes_total",
        "Total number of deployments successfully written."
    )).unwrap();

    pub static ref LAST_CHECKPOINT_CROSSED: IntCounter = register_int_counter!(opts!(
        "eos_updater_checkpoints_crossed_total",
        "Total number of checkpoint crossings followed."
    )).unwrap();

    pub static ref CHECKPOINT_VETOED: IntCounterVec = register_int_counter_vec!(
        "eos_updater_checkpoint_vetoed_total",
        "Total number of checkpoint crossings refused by a gate, by reason.",
        &["reason"]
    ).unwrap();

    pub static ref FLATPAK_ACTIONS_APPLIED: IntCounterVec = register_int_counter_vec!(
        "eos_updater_flatpak_actions_applied_total",
        "Total number of flatpak ref actions applied, by kind.",
        &["kind"]
    ).unwrap();

    pub static ref REPO_SERVER_ACTIVE_REQUESTS: IntGauge = register_int_gauge!(opts!(
        "eos_repo_server_active_requests",
        "Number of in-flight HTTP requests being served."
    )).unwrap();

    pub static ref REPO_SERVER_BYTES_SERVED: IntCounter = register_int_counter!(opts!(
        "eos_repo_server_bytes_served_total",
        "Total bytes served across all object/summary responses."
    )).unwrap();
}

/// Register the kind label from an `UpdaterError` with `POLL_ERRORS`.
pub fn record_poll_error(kind: crate::error::UpdaterErrorKind) {
    POLL_ERRORS.with_label_values(&[kind.as_str()]).inc();
}
