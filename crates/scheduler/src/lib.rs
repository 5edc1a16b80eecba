//! The gangway scheduler: a session-per-tick gang scheduler.
//!
//! Each tick takes a consistent snapshot of the cluster from the cache,
//! opens a session that hosts the configured plugins, runs the ordered
//! action pipeline (enqueue, allocate, preempt, reclaim, backfill), and
//! closes the session, pushing status deltas back through the cache.

pub mod actions;
pub mod cache;
pub mod conf;
pub mod error;
pub mod framework;
pub mod metrics;
pub mod plugins;

pub use error::SchedulerError;

use crate::cache::SchedulerCache;
use crate::conf::{Configuration, Tier};
use crate::framework::Action;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Default scheduling interval between ticks.
pub const DEFAULT_SCHEDULE_PERIOD: Duration = Duration::from_secs(1);

/// The scheduler main loop: one tick, one snapshot, one session.
pub struct Scheduler {
    cache: Arc<SchedulerCache>,
    actions: Vec<Box<dyn Action>>,
    tiers: Vec<Tier>,
    configurations: Vec<Configuration>,
    schedule_period: Duration,
}

impl Scheduler {
    /// Build a scheduler from a YAML configuration string. Fails on unknown
    /// actions or malformed configuration.
    pub fn new(
        cache: Arc<SchedulerCache>,
        conf_str: &str,
        schedule_period: Duration,
    ) -> Result<Self, SchedulerError> {
        framework::register_default_plugins();

        let conf = conf::load_scheduler_conf(conf_str)?;
        let mut action_list = Vec::new();
        for name in conf.action_names() {
            action_list.push(actions::new_action(&name)?);
        }

        Ok(Scheduler {
            cache,
            actions: action_list,
            tiers: conf.tiers,
            configurations: conf.configurations,
            schedule_period,
        })
    }

    /// Run scheduling ticks until the stop channel flips.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        info!(period = ?self.schedule_period, "starting scheduler loop");
        let mut ticker = tokio::time::interval(self.schedule_period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_once().await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        info!("scheduler loop stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One scheduling tick: open a session, execute the action pipeline in
    /// order, close the session.
    pub async fn run_once(&mut self) {
        let start = std::time::Instant::now();
        debug!("start scheduling");

        let mut sess = framework::open_session(
            Arc::clone(&self.cache),
            self.tiers.clone(),
            self.configurations.clone(),
        );

        for action in &self.actions {
            action.initialize();
            action.execute(&mut sess);
            action.un_initialize();
        }

        framework::close_session(sess).await;

        metrics::update_e2e_duration(start.elapsed().as_secs_f64());
        debug!(elapsed = ?start.elapsed(), "end scheduling");
    }
}
