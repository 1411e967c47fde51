use crate::error::Result;
use chrono::{DateTime, Utc};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
const RAW_CHANNEL_CAPACITY: usize = 64;
const IDLE_TIMER: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeEvent {
    Modified {
        path: PathBuf,
        modified: DateTime<Utc>,
    },
    Deleted {
        path: PathBuf,
    },
    AccessError {
        path: PathBuf,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Watching,
}

struct ActiveWatch {
    watcher: RecommendedWatcher,
    watched_dir: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Reports changes made to a tracked file by other programs.
///
/// The parent directory is watched rather than the file itself, and raw
/// notifications are filtered down to the tracked name. A burst of raw
/// notifications collapses into one check after the debounce window.
pub struct ChangeMonitor {
    path: PathBuf,
    debounce: Duration,
    active: Option<ActiveWatch>,
}

impl ChangeMonitor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: DEFAULT_DEBOUNCE,
            active: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn state(&self) -> MonitorState {
        if self.active.is_some() {
            MonitorState::Watching
        } else {
            MonitorState::Idle
        }
    }

    /// Starts watching and returns the single receiver for change events.
    ///
    /// Must be called from within a tokio runtime. A missing file yields an
    /// immediate `AccessError` on the returned channel and the monitor stays
    /// idle.
    pub fn start(&mut self) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        self.stop();
        let (tx, rx) = mpsc::unbounded_channel();

        let last_seen = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Cannot watch {:?}: {}", self.path, e);
                let _ = tx.send(ChangeEvent::AccessError {
                    path: self.path.clone(),
                    message: e.to_string(),
                });
                return Ok(rx);
            }
        };

        let file_name = self.path.file_name().map(OsString::from);
        let watched_dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (raw_tx, raw_rx) = mpsc::channel::<()>(RAW_CHANNEL_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if is_relevant(&event, file_name.as_deref()) {
                        // One pending signal is enough to arm the timer.
                        let _ = raw_tx.try_send(());
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            },
            Config::default(),
        )?;
        watcher.watch(&watched_dir, RecursiveMode::NonRecursive)?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce_loop(
            self.path.clone(),
            self.debounce,
            last_seen,
            raw_rx,
            tx,
            cancel.clone(),
        ));

        info!("Change monitor started for {:?}", self.path);
        self.active = Some(ActiveWatch {
            watcher,
            watched_dir,
            cancel,
            task,
        });
        Ok(rx)
    }

    /// Releases the OS watch and ends the event stream. Safe to call anytime.
    pub fn stop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.cancel.cancel();
            let _ = active.watcher.unwatch(&active.watched_dir);
            active.task.abort();
            info!("Change monitor stopped for {:?}", self.path);
        }
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    let Some(file_name) = file_name else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}

/// Owns the one debounce timer. Each raw signal pushes the deadline out;
/// when it expires the file is checked once.
pub(crate) async fn debounce_loop(
    path: PathBuf,
    debounce: Duration,
    mut last_seen: SystemTime,
    mut raw_rx: mpsc::Receiver<()>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let timer = tokio::time::sleep(IDLE_TIMER);
    tokio::pin!(timer);
    let mut armed = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = raw_rx.recv() => match signal {
                Some(()) => {
                    timer.as_mut().reset(Instant::now() + debounce);
                    armed = true;
                }
                None => break,
            },
            _ = &mut timer, if armed => {
                armed = false;
                if let Some(event) = check_file(&path, &mut last_seen) {
                    debug!("Confirmed external change: {:?}", event);
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("Debounce loop for {:?} finished", path);
}

fn check_file(path: &Path, last_seen: &mut SystemTime) -> Option<ChangeEvent> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified());
    match modified {
        Ok(modified) if modified > *last_seen => {
            *last_seen = modified;
            Some(ChangeEvent::Modified {
                path: path.to_path_buf(),
                modified: DateTime::<Utc>::from(modified),
            })
        }
        Ok(_) => None,
        Err(e) if e.kind() == ErrorKind::NotFound => Some(ChangeEvent::Deleted {
            path: path.to_path_buf(),
        }),
        Err(e) => Some(ChangeEvent::AccessError {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    const TEST_DEBOUNCE: Duration = Duration::from_millis(100);

    fn bump_mtime(path: &Path, seconds: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(seconds))
            .unwrap();
    }

    fn spawn_loop(
        path: &Path,
    ) -> (
        mpsc::Sender<()>,
        mpsc::UnboundedReceiver<ChangeEvent>,
        CancellationToken,
    ) {
        let last_seen = fs::metadata(path).unwrap().modified().unwrap();
        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(debounce_loop(
            path.to_path_buf(),
            TEST_DEBOUNCE,
            last_seen,
            raw_rx,
            tx,
            cancel.clone(),
        ));
        (raw_tx, rx, cancel)
    }

    #[tokio::test]
    async fn test_burst_collapses_into_one_modified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.3dm");
        fs::write(&path, b"v1").unwrap();
        let (raw_tx, mut rx, cancel) = spawn_loop(&path);

        fs::write(&path, b"v2").unwrap();
        bump_mtime(&path, 5);
        for _ in 0..5 {
            raw_tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(TEST_DEBOUNCE * 4).await;

        assert!(matches!(rx.try_recv(), Ok(ChangeEvent::Modified { .. })));
        assert!(rx.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unchanged_mtime_is_not_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.3dm");
        fs::write(&path, b"v1").unwrap();
        let (raw_tx, mut rx, cancel) = spawn_loop(&path);

        raw_tx.send(()).await.unwrap();
        tokio::time::sleep(TEST_DEBOUNCE * 3).await;
        assert!(rx.try_recv().is_err());

        // A later, strictly newer write is reported once.
        bump_mtime(&path, 10);
        raw_tx.send(()).await.unwrap();
        tokio::time::sleep(TEST_DEBOUNCE * 3).await;
        assert!(matches!(rx.try_recv(), Ok(ChangeEvent::Modified { .. })));

        raw_tx.send(()).await.unwrap();
        tokio::time::sleep(TEST_DEBOUNCE * 3).await;
        assert!(rx.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_deleted_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.3dm");
        fs::write(&path, b"v1").unwrap();
        let (raw_tx, mut rx, cancel) = spawn_loop(&path);

        fs::remove_file(&path).unwrap();
        raw_tx.send(()).await.unwrap();
        tokio::time::sleep(TEST_DEBOUNCE * 3).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ChangeEvent::Deleted { path: path.clone() }
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_missing_file_stays_idle() {
        let dir = TempDir::new().unwrap();
        let mut monitor = ChangeMonitor::new(dir.path().join("missing.3dm"));

        let mut rx = monitor.start().unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(ChangeEvent::AccessError { .. })
        ));
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.3dm");
        fs::write(&path, b"v1").unwrap();
        let mut monitor = ChangeMonitor::new(&path).with_debounce(TEST_DEBOUNCE);

        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Idle);

        let _first = monitor.start().unwrap();
        assert_eq!(monitor.state(), MonitorState::Watching);
        let _second = monitor.start().unwrap();
        assert_eq!(monitor.state(), MonitorState::Watching);

        monitor.stop();
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_real_write_is_observed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.3dm");
        fs::write(&path, b"v1").unwrap();
        let mut monitor = ChangeMonitor::new(&path).with_debounce(TEST_DEBOUNCE);
        let mut rx = monitor.start().unwrap();

        fs::write(dir.path().join("unrelated.txt"), b"noise").unwrap();
        fs::write(&path, b"v2").unwrap();
        bump_mtime(&path, 5);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change event within timeout");
        assert!(matches!(event, Some(ChangeEvent::Modified { .. })));
        monitor.stop();
    }

    #[test]
    fn test_relevance_filter() {
        let name = OsString::from("model.3dm");
        let modify = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/work/model.3dm"));
        let other = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/work/other.3dm"));
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/work/model.3dm"));

        assert!(is_relevant(&modify, Some(name.as_os_str())));
        assert!(!is_relevant(&other, Some(name.as_os_str())));
        assert!(!is_relevant(&access, Some(name.as_os_str())));
    }
}
