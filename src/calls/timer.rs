use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A spawned task that is aborted when the guard is dropped.
///
/// Holding one of these is what keeps a call's timer alive; every path that
/// clears the owning slot therefore stops the task.
#[derive(Debug)]
pub(crate) struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    /// Calls `on_tick` every `period`, first after one full period, until it
    /// returns false.
    pub(crate) fn every<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        Self::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !on_tick() {
                    break;
                }
            }
        })
    }

    /// Runs `on_fire` once after `delay`.
    pub(crate) fn after<F>(delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        })
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
