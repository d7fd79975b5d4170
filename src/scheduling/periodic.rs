use crate::{event, info, warn};
use async_trait::async_trait;
use std::time::Duration;
use strum_macros::Display;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

/// A unit of work executed once per period by a [`PeriodicScheduler`].
#[async_trait]
pub trait PeriodicTask: Send {
    fn name(&self) -> &'static str;
    async fn tick(&mut self);
}

/// How the scheduler catches up after a tick overran its period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DriftPolicy {
    /// Restart the schedule from the late tick.
    Delay,
    /// Drop missed ticks and stay on the original grid.
    Skip,
}

impl From<DriftPolicy> for MissedTickBehavior {
    fn from(value: DriftPolicy) -> Self {
        match value {
            DriftPolicy::Delay => MissedTickBehavior::Delay,
            DriftPolicy::Skip => MissedTickBehavior::Skip,
        }
    }
}

/// Timing record of one periodic task, returned when it is joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStats {
    pub name: &'static str,
    pub period: Duration,
    pub ticks: u64,
    /// Ticks whose execution took longer than the period.
    pub deadline_misses: u64,
    pub worst_tick: Duration,
}

impl TaskStats {
    fn new(name: &'static str, period: Duration) -> Self {
        Self { name, period, ticks: 0, deadline_misses: 0, worst_tick: Duration::ZERO }
    }

    /// Books one tick. Returns `true` if it missed its deadline.
    fn record(&mut self, elapsed: Duration) -> bool {
        self.ticks += 1;
        self.worst_tick = self.worst_tick.max(elapsed);
        if elapsed > self.period {
            self.deadline_misses += 1;
            return true;
        }
        false
    }
}

/// Runs a [`PeriodicTask`] at a fixed period until cancelled.
///
/// A started tick always runs to completion; cancellation is only observed
/// between ticks.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicScheduler {
    period: Duration,
    policy: DriftPolicy,
}

impl PeriodicScheduler {
    pub fn new(period: Duration, policy: DriftPolicy) -> Self { Self { period, policy } }

    pub fn period(&self) -> Duration { self.period }

    pub async fn run<T: PeriodicTask>(&self, mut task: T, c_tok: CancellationToken) -> TaskStats {
        let name = task.name();
        let mut stats = TaskStats::new(name, self.period);
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(self.policy.into());
        info!(
            "Task {name} started at {:.1}Hz ({} on overrun).",
            1.0 / self.period.as_secs_f64(),
            self.policy
        );
        loop {
            tokio::select! {
                biased;
                () = c_tok.cancelled() => break,
                _ = ticker.tick() => {
                    let start = Instant::now();
                    task.tick().await;
                    let elapsed = start.elapsed();
                    if stats.record(elapsed) {
                        if stats.deadline_misses == 1 {
                            warn!("Task {name} missed its deadline: {elapsed:?} > {:?}.", self.period);
                        } else {
                            event!("Task {name} deadline miss #{}: {elapsed:?}", stats.deadline_misses);
                        }
                    }
                }
            }
        }
        info!(
            "Task {name} stopped after {} ticks, {} deadline misses, worst tick {:?}.",
            stats.ticks,
            stats.deadline_misses,
            stats.worst_tick
        );
        stats
    }

    pub fn spawn<T: PeriodicTask + 'static>(self, task: T, c_tok: CancellationToken) -> JoinHandle<TaskStats> {
        tokio::spawn(async move { self.run(task, c_tok).await })
    }
}
