//! Periodic driver for the monitor entry points.
//!
//! One task per entry point, each ticking on its own interval. A tick only
//! runs while the local member is leader, and the next tick of an entry
//! point never starts before the previous one has finished.

use crate::cluster::LocalCluster;
use crate::config::MonitorConfig;
use crate::monitor::VersionMonitor;
use crate::ports::{ClusterPort, StoragePort};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{self, JoinHandle};
use tokio::time::sleep;

pub trait LeadershipProbe: Send + Sync {
    fn is_leader(&self) -> bool;
}

impl LeadershipProbe for LocalCluster {
    fn is_leader(&self) -> bool {
        LocalCluster::is_leader(self)
    }
}

impl LeadershipProbe for AtomicBool {
    fn is_leader(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

type MonitorJob<C, S> = fn(&VersionMonitor<C, S>);

pub struct MonitorScheduler<C, S, L> {
    monitor: Arc<VersionMonitor<C, S>>,
    leadership: Arc<L>,
    cluster_version_interval: Duration,
    storage_version_interval: Duration,
    downgrade_interval: Duration,
}

impl<C, S, L> MonitorScheduler<C, S, L>
where
    C: ClusterPort + 'static,
    S: StoragePort + 'static,
    L: LeadershipProbe + 'static,
{
    pub fn new(
        monitor: Arc<VersionMonitor<C, S>>,
        leadership: Arc<L>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            monitor,
            leadership,
            cluster_version_interval: config.cluster_version_interval(),
            storage_version_interval: config.storage_version_interval(),
            downgrade_interval: config.downgrade_interval(),
        }
    }

    pub fn spawn(self) -> MonitorSchedulerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let ticks = Arc::new(TickCounters::default());
        let jobs: [(&'static str, Duration, MonitorJob<C, S>); 3] = [
            ("cluster_version", self.cluster_version_interval, |monitor| {
                monitor.update_cluster_version_if_needed();
            }),
            ("storage_version", self.storage_version_interval, |monitor| {
                if let Err(err) = monitor.update_storage_version_if_needed() {
                    debug!("event=monitor_tick job=storage_version outcome=retry error={}", err);
                }
            }),
            ("downgrade", self.downgrade_interval, |monitor| {
                monitor.cancel_downgrade_if_needed();
            }),
        ];
        let tasks = jobs
            .into_iter()
            .map(|(name, interval, job)| {
                let monitor = self.monitor.clone();
                let leadership = self.leadership.clone();
                let shutdown = shutdown.clone();
                let notify = notify.clone();
                let ticks = ticks.clone();
                tokio::spawn(async move {
                    loop {
                        // Registered before the flag check so a shutdown
                        // signalled in between still wakes this task.
                        let notified = notify.notified();
                        tokio::pin!(notified);
                        notified.as_mut().enable();
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        tokio::select! {
                            _ = sleep(interval) => {},
                            _ = &mut notified => {},
                        }
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        if !leadership.is_leader() {
                            continue;
                        }
                        let monitor = monitor.clone();
                        if let Err(err) = task::spawn_blocking(move || job(&monitor)).await {
                            warn!("event=monitor_tick job={} outcome=panicked error={}", name, err);
                        }
                        ticks.record(name);
                    }
                })
            })
            .collect();
        MonitorSchedulerHandle {
            shutdown,
            notify,
            ticks,
            tasks,
        }
    }
}

#[derive(Debug, Default)]
struct TickCounters {
    cluster_version: AtomicU64,
    storage_version: AtomicU64,
    downgrade: AtomicU64,
}

impl TickCounters {
    fn record(&self, name: &str) {
        let counter = match name {
            "cluster_version" => &self.cluster_version,
            "storage_version" => &self.storage_version,
            _ => &self.downgrade,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Completed ticks per entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSnapshot {
    pub cluster_version: u64,
    pub storage_version: u64,
    pub downgrade: u64,
}

pub struct MonitorSchedulerHandle {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    ticks: Arc<TickCounters>,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorSchedulerHandle {
    /// Runs every entry point now instead of waiting for its interval.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    pub fn ticks(&self) -> TickSnapshot {
        TickSnapshot {
            cluster_version: self.ticks.cluster_version.load(Ordering::SeqCst),
            storage_version: self.ticks.storage_version.load(Ordering::SeqCst),
            downgrade: self.ticks.downgrade.load(Ordering::SeqCst),
        }
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub async fn shutdown(mut self) {
        self.signal_shutdown();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!("event=monitor_scheduler_shutdown outcome=task_failed error={}", err);
            }
        }
    }
}
