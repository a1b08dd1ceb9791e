use crate::communication::messages::Envelope;
use crate::communication::transport::Mailbox;
use crate::config::{ConfigError, NetworkConfig, ObserverConfig};
use crate::monitoring::observer::{AggregateMetrics, Observer};
use crate::monitoring::report_log::log_report;
use crate::simulation_engine::intersection::IntersectionId;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Task wrapper around an [`Observer`]: records inbound snapshots and reports on its own period.
pub struct ObserverAgent {
    observer: Observer,
    report_period: Duration,
    mailbox: Mailbox,
    csv_path: Option<PathBuf>,
}

impl ObserverAgent {
    /// Observer that accepts snapshots only from the controllers in `roster`.
    pub fn new(
        config: ObserverConfig,
        snapshot_period: Duration,
        roster: impl IntoIterator<Item = IntersectionId>,
        mailbox: Mailbox,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if snapshot_period.is_zero() {
            return Err(ConfigError::Observer("snapshot period must be positive".into()));
        }
        config.stale_after(snapshot_period)?;
        Ok(Self {
            observer: Observer::new(config, snapshot_period, roster, Instant::now().into_std()),
            report_period: config.report_period(),
            mailbox,
            csv_path: None,
        })
    }

    /// Observer for `network`, judging staleness against its slowest snapshot period.
    pub fn for_network(network: &NetworkConfig, mailbox: Mailbox) -> Result<Self, ConfigError> {
        let snapshot_period = network
            .intersections
            .iter()
            .map(|i| i.periods.snapshot())
            .max()
            .ok_or(ConfigError::EmptyNetwork)?;
        let roster = network.intersections.iter().map(|i| i.id.clone());
        Self::new(network.observer, snapshot_period, roster, mailbox)
    }

    /// Appends every report to `path` as a CSV row.
    pub fn with_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_path = Some(path.into());
        self
    }

    pub fn spawn(self) -> ObserverHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (report_tx, report_rx) = watch::channel(None);
        let join = tokio::spawn(self.run(shutdown_rx, report_tx));
        ObserverHandle {
            shutdown: shutdown_tx,
            reports: report_rx,
            join,
        }
    }

    async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        reports: watch::Sender<Option<AggregateMetrics>>,
    ) -> Observer {
        let mut report = interval_at(Instant::now() + self.report_period, self.report_period);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("[Observer] Started, reporting every {:?}", self.report_period);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = report.tick() => {
                    let metrics = self.observer.report(Instant::now().into_std());
                    self.publish(&metrics);
                    reports.send_replace(Some(metrics));
                }
                Some(payload) = self.mailbox.recv() => self.handle_inbound(&payload),
            }
        }

        log::info!("[Observer] Stopped");
        self.observer
    }

    fn handle_inbound(&mut self, payload: &[u8]) {
        match Envelope::decode(payload) {
            Ok(Envelope::Snapshot(snapshot)) => {
                self.observer.record(snapshot, Instant::now().into_std());
            }
            Ok(other) => log::warn!("[Observer] Ignored unexpected {} message", other.kind()),
            Err(e) => log::warn!("[Observer] Dropped inbound payload: {}", e),
        }
    }

    fn publish(&self, metrics: &AggregateMetrics) {
        log::info!(
            "[Observer] Active: {} | Waiting: {} | Avg queue: {:.1} | Throughput: {:.2} veh/min | Processed: {}",
            metrics.active_controllers,
            metrics.total_waiting,
            metrics.average_queue,
            metrics.throughput_per_minute,
            metrics.total_processed
        );
        if let Some(path) = &self.csv_path {
            if let Err(e) = log_report(path, metrics) {
                log::warn!("[Observer] Could not write report to {}: {}", path.display(), e);
            }
        }
    }
}

pub struct ObserverHandle {
    shutdown: watch::Sender<bool>,
    reports: watch::Receiver<Option<AggregateMetrics>>,
    join: JoinHandle<Observer>,
}

impl ObserverHandle {
    pub fn latest_report(&self) -> Option<AggregateMetrics> {
        self.reports.borrow().clone()
    }

    /// Receiver that changes on every new report.
    pub fn subscribe(&self) -> watch::Receiver<Option<AggregateMetrics>> {
        self.reports.clone()
    }

    pub async fn shutdown(self) -> Result<Observer, JoinError> {
        let _ = self.shutdown.send(true);
        self.join.await
    }
}
