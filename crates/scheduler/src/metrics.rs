//! Prometheus metrics for the scheduler.

use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_counter_vec, register_gauge_vec, register_histogram,
    CounterVec, GaugeVec, Histogram,
};

/// Fixed metrics namespace.
pub const SCHEDULER_SUBSYSTEM: &str = "gangway";

static JOB_SHARE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        prometheus::opts!("job_share", "Share for one job").namespace(SCHEDULER_SUBSYSTEM),
        &["job_ns", "job_id"]
    )
    .expect("job_share registration")
});

static JOB_RETRY_COUNTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        prometheus::opts!("job_retry_counts", "Number of retry counts for one job")
            .namespace(SCHEDULER_SUBSYSTEM),
        &["job_id"]
    )
    .expect("job_retry_counts registration")
});

static TASK_SCHEDULE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        prometheus::histogram_opts!(
            "task_schedule_duration",
            "Time taken from task creation to dispatch, in seconds",
            exponential_buckets(0.001, 2.0, 16).expect("buckets")
        )
        .namespace(SCHEDULER_SUBSYSTEM)
    )
    .expect("task_schedule_duration registration")
});

static E2E_SCHEDULING_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        prometheus::histogram_opts!(
            "e2e_scheduling_duration",
            "Wall time of one scheduling tick, in seconds",
            exponential_buckets(0.0001, 2.0, 16).expect("buckets")
        )
        .namespace(SCHEDULER_SUBSYSTEM)
    )
    .expect("e2e_scheduling_duration registration")
});

/// Record the fair share of one job.
pub fn update_job_share(job_ns: &str, job_id: &str, share: f64) {
    JOB_SHARE.with_label_values(&[job_ns, job_id]).set(share);
}

/// Drop the share series of a finished job.
pub fn delete_job_share(job_ns: &str, job_id: &str) {
    let _ = JOB_SHARE.remove_label_values(&[job_ns, job_id]);
}

/// Count one scheduling retry of a job.
pub fn register_job_retries(job_id: &str) {
    JOB_RETRY_COUNTS.with_label_values(&[job_id]).inc();
}

/// Record how long a task waited from creation to dispatch.
pub fn update_task_schedule_duration(seconds: f64) {
    TASK_SCHEDULE_DURATION.observe(seconds.max(0.0));
}

/// Record the wall time of a whole scheduling tick.
pub fn update_e2e_duration(seconds: f64) {
    E2E_SCHEDULING_DURATION.observe(seconds.max(0.0));
}
