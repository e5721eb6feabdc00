//! # Integration Tests
//!
//! Table loading and enforcement end to end, including the concurrent
//! and event-feed paths.

use std::io::{self, Cursor, Read, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use sandman_monitor::{
    run_blocking_feed, run_event_loop, AutomatonMonitor, BlockingLines, MonitorConfig, MonitorError, Outcome, ProcessKiller,
    ProcessState, TableLoader, TransitionTable, Violation, ViolationKind,
};
use tempfile::NamedTempFile;

/// Records kills instead of signalling.
#[derive(Debug, Default)]
struct RecordingKiller {
    killed: Mutex<Vec<u32>>,
}

impl RecordingKiller {
    fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }
}

impl ProcessKiller for RecordingKiller {
    fn kill(&self, pid: u32) -> io::Result<()> {
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }
}

const TABLE: &str = "0 5 1 0\n1 7 2 1\n";

fn load(text: &str) -> TransitionTable {
    TableLoader::new()
        .load_from_reader(Cursor::new(text))
        .unwrap()
        .0
}

fn monitor(table: TransitionTable) -> AutomatonMonitor<Arc<RecordingKiller>> {
    let monitor = AutomatonMonitor::new(table, Arc::new(RecordingKiller::default()), MonitorConfig::new());
    monitor.attach().unwrap();
    monitor
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn scenario_a_legal_sequence_reaches_final() {
    let killer = Arc::new(RecordingKiller::default());
    let monitor = AutomatonMonitor::new(load(TABLE), Arc::clone(&killer), MonitorConfig::new());
    monitor.attach().unwrap();

    assert!(!monitor.observe(100, 5).is_violation());
    assert_eq!(monitor.state_of(100), Some(ProcessState::At(1)));
    assert!(!monitor.observe(100, 7).is_violation());
    assert_eq!(monitor.state_of(100), Some(ProcessState::Final));
    assert!(killer.killed().is_empty());
}

#[test]
fn scenario_b_undefined_transition_kills() {
    let killer = Arc::new(RecordingKiller::default());
    let monitor = AutomatonMonitor::new(load(TABLE), Arc::clone(&killer), MonitorConfig::new());
    monitor.attach().unwrap();

    assert_eq!(
        monitor.observe(200, 9),
        Outcome::Killed(Violation {
            pid: 200,
            kind: ViolationKind::UndefinedTransition { state: 0, input: 9 },
            signal_delivered: true,
        })
    );
    assert_eq!(killer.killed(), vec![200]);
    assert_eq!(monitor.state_of(200), None);
}

#[test]
fn scenario_c_event_after_acceptance_kills() {
    let killer = Arc::new(RecordingKiller::default());
    let monitor = AutomatonMonitor::new(load(TABLE), Arc::clone(&killer), MonitorConfig::new());
    monitor.attach().unwrap();
    monitor.observe(100, 5);
    monitor.observe(100, 7);

    assert!(matches!(
        monitor.observe(100, 5),
        Outcome::Killed(Violation {
            kind: ViolationKind::AfterAcceptance { input: 5 },
            ..
        })
    ));
    assert_eq!(killer.killed(), vec![100]);
    assert_eq!(monitor.state_of(100), None);
}

#[test]
fn scenario_d_malformed_line_is_skipped() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "0 5 1 0").unwrap();
    writeln!(file, "abc def").unwrap();
    writeln!(file, "1 7 2 1").unwrap();

    let (table, report) = TableLoader::new().load(file.path()).unwrap();
    assert_eq!(report.installed, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].line, 2);
    assert_eq!(report.skipped[0].content, "abc def");
    assert!(table.lookup(1, 7).is_some());
}

#[test]
fn scenario_e_population_failure_aborts_load() {
    let mut file = NamedTempFile::new().unwrap();
    for line in ["0 1 1 0", "1 2 2 0", "2 3 3 0", "3 4 4 0", "4 5 5 1"] {
        writeln!(file, "{line}").unwrap();
    }

    let err = TableLoader::new()
        .with_capacity(2)
        .load(file.path())
        .unwrap_err();
    match err {
        MonitorError::Populate { line, source } => {
            assert_eq!(line, 3);
            assert_eq!(source.capacity, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

// =============================================================================
// FAIL-CLOSED AND LIFECYCLE
// =============================================================================

#[test]
fn test_empty_table_kills_first_event() {
    let monitor = monitor(load("# nothing allowed\n"));
    assert!(monitor.observe(1, 1).is_violation());
    assert_eq!(monitor.status().violations, 1);
}

#[test]
fn test_exit_clears_state_for_pid_reuse() {
    let monitor = monitor(load(TABLE));
    monitor.observe(300, 5);
    monitor.observe(300, 7);
    assert_eq!(monitor.process_exited(300), Some(ProcessState::Final));

    // A new process with the recycled pid starts over.
    assert!(!monitor.observe(300, 5).is_violation());
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn test_concurrent_processes_do_not_interfere() {
    // A chain 0 -1-> 1 -2-> ... -50-> 50 (final).
    let table: String = (0..50u32)
        .map(|s| format!("{} {} {} {}\n", s, s + 1, s + 1, u8::from(s == 49)))
        .collect();
    let monitor = Arc::new(monitor(load(&table)));

    let handles: Vec<_> = (1..=16u32)
        .map(|pid| {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                for input in 1..=50 {
                    assert!(!monitor.observe(pid, input).is_violation());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for pid in 1..=16 {
        assert_eq!(monitor.state_of(pid), Some(ProcessState::Final));
    }
    let status = monitor.status();
    assert_eq!(status.events, 16 * 50);
    assert_eq!(status.violations, 0);
    assert_eq!(status.tracked_processes, 16);
}

// =============================================================================
// EVENT LOOP
// =============================================================================

#[tokio::test]
async fn test_event_loop_drives_monitor() {
    let monitor = monitor(load(TABLE));
    let feed = "100 5\n200 9\nnot an event\n100 7\nexit 100\n\n";

    let stats = run_event_loop(&monitor, feed.as_bytes(), std::future::pending())
        .await
        .unwrap();

    assert_eq!(stats.calls, 3);
    assert_eq!(stats.kills, 1);
    assert_eq!(stats.exits, 1);
    assert_eq!(stats.malformed, 1);
    assert!(!monitor.is_attached());
    assert_eq!(monitor.state_of(100), None);
}

#[tokio::test]
async fn test_event_loop_stops_on_shutdown() {
    let monitor = monitor(load(TABLE));
    // Writer half stays open, so the feed never ends on its own.
    let (_writer, reader) = tokio::io::duplex(64);

    let stats = run_event_loop(&monitor, tokio::io::BufReader::new(reader), async {})
        .await
        .unwrap();
    assert_eq!(stats.calls, 0);
    assert!(!monitor.is_attached());
}

#[tokio::test]
async fn test_event_loop_requires_attach() {
    let monitor = AutomatonMonitor::new(load(TABLE), RecordingKiller::default(), MonitorConfig::new());
    let result = run_event_loop(&monitor, "1 5\n".as_bytes(), std::future::pending()).await;
    assert!(matches!(result, Err(MonitorError::NotAttached)));
}

/// A reader that blocks until chunks arrive, like a terminal nobody types into.
struct QuietReader {
    chunks: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for QuietReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.chunks.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

#[test]
fn test_blocking_feed_releases_runtime_while_writer_is_open() {
    let (writer, chunks) = mpsc::channel();
    let reader = io::BufReader::new(QuietReader {
        chunks,
        pending: Vec::new(),
    });
    writer.send(b"100 5\n".to_vec()).unwrap();

    let monitor = monitor(load(TABLE));
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let stats = runtime
        .block_on(async {
            let feed = BlockingLines::spawn(reader).unwrap();
            let shutdown = async {
                while monitor.state_of(100).is_none() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            };
            run_blocking_feed(&monitor, feed, shutdown).await
        })
        .unwrap();
    assert_eq!(stats.calls, 1);
    assert!(!monitor.is_attached());

    // The writer is still open, so the reader thread is parked in `read`.
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        drop(runtime);
        done_tx.send(()).unwrap();
    });
    assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    drop(writer);
}
