//! Process-wide background task scheduler.
//!
//! Tasks are registered explicitly at startup and stopped on graceful
//! shutdown. Each run executes independently; a failing run is logged and
//! the schedule continues. Tasks open their own short transactions per unit
//! of work, so a sweep never holds locks against interactive requests.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Registers a recurring task. The first run fires immediately, then on
    /// every interval tick.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, every: Duration, task: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = task().await {
                            error!("Scheduled task '{name}' failed: {e:#}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Scheduled task '{name}' stopped");
                        break;
                    }
                }
            }
        });
        self.handles.push(handle);
        info!("Scheduled task '{name}' every {every:?}");
    }

    /// Signals all tasks to stop and waits for them to wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_on_interval() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();

        let task_counter = counter.clone();
        scheduler.spawn("count", Duration::from_secs(10), move || {
            let task_counter = task_counter.clone();
            async move {
                task_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        // Immediate tick plus two interval ticks.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(counter.load(Ordering::SeqCst) >= 3);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticking() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();

        let task_counter = counter.clone();
        scheduler.spawn("count", Duration::from_secs(10), move || {
            let task_counter = task_counter.clone();
            async move {
                task_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        scheduler.shutdown().await;

        let at_shutdown = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), at_shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_run_does_not_kill_schedule() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();

        let task_counter = counter.clone();
        scheduler.spawn("flaky", Duration::from_secs(10), move || {
            let task_counter = task_counter.clone();
            async move {
                let run = task_counter.fetch_add(1, Ordering::SeqCst);
                if run == 0 {
                    anyhow::bail!("first run fails");
                }
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(counter.load(Ordering::SeqCst) >= 3);

        scheduler.shutdown().await;
    }
}
