//! The enforcement facade.
//!
//! [`Enforcer`] owns the runtime half: it loads the transition table,
//! builds the monitor over it and drives the monitor from an event feed.
//! Loading happens in the constructor, so an `Enforcer` only exists once
//! the table is fully installed.

use std::path::Path;
use std::sync::Arc;

use sandman_monitor::{
    run_blocking_feed, run_event_loop, AutomatonMonitor, BlockingLines, LoadReport, LoopStats,
    MonitorStatus, ProcessKiller, SignalKiller,
};
use tokio::io::AsyncBufRead;
use tracing::info;

use crate::config::SandmanConfig;
use crate::Result;

/// Loaded policy plus the monitor enforcing it.
#[derive(Debug)]
pub struct Enforcer<K = SignalKiller> {
    monitor: Arc<AutomatonMonitor<K>>,
    report: LoadReport,
}

impl Enforcer<SignalKiller> {
    /// Loads the table named in the config; violations are killed with
    /// `SIGKILL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the table
    /// cannot be loaded.
    pub fn from_config(config: &SandmanConfig) -> Result<Self> {
        Self::with_killer(config, &config.monitor.table_path, SignalKiller)
    }
}

impl<K: ProcessKiller> Enforcer<K> {
    /// Loads the table at `table_path` with a custom killer.
    pub fn with_killer(config: &SandmanConfig, table_path: impl AsRef<Path>, killer: K) -> Result<Self> {
        config.validate()?;
        let (table, report) = config.table_loader().load(table_path)?;
        let monitor = AutomatonMonitor::new(table, killer, config.monitor_config());
        Ok(Self {
            monitor: Arc::new(monitor),
            report,
        })
    }

    /// What the loader installed and skipped.
    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    /// Shared handle to the monitor.
    pub fn monitor(&self) -> Arc<AutomatonMonitor<K>> {
        Arc::clone(&self.monitor)
    }

    /// Monitor counters.
    pub fn status(&self) -> MonitorStatus {
        self.monitor.status()
    }

    /// Attaches the monitor and enforces events from `feed` until it ends or
    /// `shutdown` resolves. The monitor is detached on return.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor is already attached or the feed
    /// fails.
    pub async fn run<R, S>(&self, feed: R, shutdown: S) -> Result<LoopStats>
    where
        R: AsyncBufRead + Unpin,
        S: std::future::Future<Output = ()>,
    {
        self.monitor.attach()?;
        let stats = run_event_loop(&*self.monitor, feed, shutdown).await?;
        self.stopped();
        Ok(stats)
    }

    /// Like [`run`](Self::run), over lines read on their own thread.
    ///
    /// Use this for standard input: shutdown does not wait for a pending
    /// read.
    pub async fn run_blocking<S>(&self, feed: BlockingLines, shutdown: S) -> Result<LoopStats>
    where
        S: std::future::Future<Output = ()>,
    {
        self.monitor.attach()?;
        let stats = run_blocking_feed(&*self.monitor, feed, shutdown).await?;
        self.stopped();
        Ok(stats)
    }

    fn stopped(&self) {
        let status = self.monitor.status();
        info!(
            "enforcement stopped: {} violations over {} events",
            status.violations, status.events
        );
    }
}
