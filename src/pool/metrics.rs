use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge,
};
use std::time::Duration;

lazy_static! {
    pub static ref IDLE_SESSIONS: IntGauge = register_int_gauge!(
        "sftpool_idle_sessions",
        "Number of sessions resting in the pool"
    )
    .expect("register sftpool_idle_sessions gauge");
    pub static ref BORROWED_SESSIONS: IntGauge = register_int_gauge!(
        "sftpool_borrowed_sessions",
        "Number of sessions currently borrowed"
    )
    .expect("register sftpool_borrowed_sessions gauge");
    pub static ref SESSIONS_CREATED: IntCounter = register_int_counter!(
        "sftpool_sessions_created_total",
        "Total sessions opened and authenticated"
    )
    .expect("register sftpool_sessions_created_total counter");
    pub static ref SESSION_CREATE_FAILURES: IntCounter = register_int_counter!(
        "sftpool_session_create_failures_total",
        "Total failed connect or authenticate attempts"
    )
    .expect("register sftpool_session_create_failures_total counter");
    pub static ref SESSIONS_DISCARDED: IntCounterVec = register_int_counter_vec!(
        "sftpool_sessions_discarded_total",
        "Total sessions closed by the pool, per reason",
        &["reason"]
    )
    .expect("register sftpool_sessions_discarded_total counter_vec");
    pub static ref BORROW_TIMEOUTS: IntCounter = register_int_counter!(
        "sftpool_borrow_timeouts_total",
        "Total borrows that gave up waiting for a session"
    )
    .expect("register sftpool_borrow_timeouts_total counter");
    pub static ref BORROW_WAIT: Histogram = register_histogram!(HistogramOpts::new(
        "sftpool_borrow_wait_seconds",
        "Time a borrow waited before obtaining a slot"
    )
    .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]))
    .expect("register sftpool_borrow_wait_seconds histogram");
}

#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics;

impl PoolMetrics {
    #[inline]
    pub fn record_occupancy(idle: usize, borrowed: usize) {
        IDLE_SESSIONS.set(idle as i64);
        BORROWED_SESSIONS.set(borrowed as i64);
    }

    #[inline]
    pub fn record_created() {
        SESSIONS_CREATED.inc();
    }

    #[inline]
    pub fn record_create_failure() {
        SESSION_CREATE_FAILURES.inc();
    }

    #[inline]
    pub fn record_discarded(reason: &str) {
        SESSIONS_DISCARDED.with_label_values(&[reason]).inc();
    }

    #[inline]
    pub fn record_borrow_timeout() {
        BORROW_TIMEOUTS.inc();
    }

    #[inline]
    pub fn record_borrow_wait(waited: Duration) {
        BORROW_WAIT.observe(waited.as_secs_f64());
    }
}
