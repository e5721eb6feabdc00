//! # Event Feed
//!
//! Drives an [`AutomatonMonitor`] from a line-oriented event stream:
//!
//! ```text
//! <pid> <input_id>    a probe fired in <pid>
//! exit <pid>          <pid> terminated
//! ```
//!
//! The loop runs until the feed ends or the shutdown future resolves, then
//! detaches the monitor. Malformed lines are logged and skipped.
//!
//! ## Blocking Sources
//!
//! Tokio reads its own stdin on the blocking pool, and runtime shutdown
//! waits for a pending read there. A quiet terminal or pipe would then keep
//! the process alive after shutdown was requested. [`BlockingLines`] reads
//! on a dedicated thread instead, which is abandoned at exit.

use std::future::Future;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::monitor::{AutomatonMonitor, Outcome};
use crate::signal::ProcessKiller;

/// Keyword of a process-exit line.
pub const EXIT_KEYWORD: &str = "exit";

/// One line of the event feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A probe fired.
    Call {
        /// Calling process.
        pid: u32,
        /// Correlation id carried by the probe.
        input: u32,
    },
    /// A process terminated.
    Exit {
        /// Terminated process.
        pid: u32,
    },
}

/// Why a feed line is not an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed event line: {0:?}")]
pub struct ParseEventError(pub String);

impl FromStr for MonitorEvent {
    type Err = ParseEventError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let malformed = || ParseEventError(line.trim().to_string());
        let mut fields = line.split_whitespace();
        let (Some(first), Some(second), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(malformed());
        };

        if first == EXIT_KEYWORD {
            let pid = second.parse().map_err(|_| malformed())?;
            return Ok(Self::Exit { pid });
        }
        let pid = first.parse().map_err(|_| malformed())?;
        let input = second.parse().map_err(|_| malformed())?;
        Ok(Self::Call { pid, input })
    }
}

/// Counters for one run of [`run_event_loop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    /// Probe events applied.
    pub calls: u64,
    /// Processes killed.
    pub kills: u64,
    /// Exit notifications.
    pub exits: u64,
    /// Lines skipped as malformed.
    pub malformed: u64,
}

/// Lines buffered between the reader thread and the event loop.
const FEED_BUFFER: usize = 256;

/// Lines of a blocking reader, read on a dedicated thread.
///
/// Lines are decoded lossily; a read error is delivered once and ends the
/// stream.
#[derive(Debug)]
pub struct BlockingLines {
    rx: mpsc::Receiver<io::Result<String>>,
}

impl BlockingLines {
    /// Starts reading `reader` on a new thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn<R>(reader: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        thread::Builder::new()
            .name("sandman-feed".into())
            .spawn(move || forward_lines(reader, &tx))?;
        Ok(Self { rx })
    }

    /// Reads standard input.
    pub fn stdin() -> io::Result<Self> {
        Self::spawn(io::BufReader::new(io::stdin()))
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.rx.recv().await.transpose()
    }
}

fn forward_lines<R: BufRead>(mut reader: R, tx: &mpsc::Sender<io::Result<String>>) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let line = match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => Ok(String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string()),
            Err(e) => Err(e),
        };
        let failed = line.is_err();
        // A closed receiver means the loop is gone.
        if tx.blocking_send(line).is_err() || failed {
            return;
        }
    }
}

/// Where the loop pulls lines from.
trait LineSource {
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

impl<R: AsyncBufRead + Unpin> LineSource for Lines<R> {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Lines::next_line(self).await
    }
}

impl LineSource for BlockingLines {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        BlockingLines::next_line(self).await
    }
}

/// Feeds events from `feed` into `monitor` until end of feed or `shutdown`.
///
/// The monitor must be attached; it is detached before returning.
///
/// # Errors
///
/// - [`MonitorError::NotAttached`] if the monitor is not attached
/// - [`MonitorError::EventFeed`] if reading the feed fails
pub async fn run_event_loop<K, R, S>(
    monitor: &AutomatonMonitor<K>,
    feed: R,
    shutdown: S,
) -> Result<LoopStats>
where
    K: ProcessKiller,
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    drive(monitor, feed.lines(), shutdown).await
}

/// [`run_event_loop`] over lines read on a dedicated thread.
///
/// # Errors
///
/// Same as [`run_event_loop`].
pub async fn run_blocking_feed<K, S>(
    monitor: &AutomatonMonitor<K>,
    feed: BlockingLines,
    shutdown: S,
) -> Result<LoopStats>
where
    K: ProcessKiller,
    S: Future<Output = ()>,
{
    drive(monitor, feed, shutdown).await
}

async fn drive<K, L, S>(monitor: &AutomatonMonitor<K>, mut lines: L, shutdown: S) -> Result<LoopStats>
where
    K: ProcessKiller,
    L: LineSource,
    S: Future<Output = ()>,
{
    if !monitor.is_attached() {
        return Err(MonitorError::NotAttached);
    }

    let mut stats = LoopStats::default();
    tokio::pin!(shutdown);

    let result = loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown requested");
                break Ok(());
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("event feed closed");
                break Ok(());
            }
            Err(e) => break Err(MonitorError::EventFeed(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<MonitorEvent>() {
            Ok(MonitorEvent::Call { pid, input }) => {
                stats.calls += 1;
                if let Outcome::Killed(_) = monitor.observe(pid, input) {
                    stats.kills += 1;
                }
            }
            Ok(MonitorEvent::Exit { pid }) => {
                stats.exits += 1;
                monitor.process_exited(pid);
            }
            Err(e) => {
                warn!("{}", e);
                stats.malformed += 1;
            }
        }
    };

    if monitor.is_attached() {
        monitor.detach()?;
    }
    result?;
    info!(
        "event loop finished: {} calls, {} kills, {} exits, {} malformed",
        stats.calls, stats.kills, stats.exits, stats.malformed
    );
    Ok(stats)
}
