use crate::constants::DEFAULT_TAIL_LINES;
use crate::reassemble::reassemble;
use crate::tail::read_tail;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("cannot read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("cannot watch {} for changes: {source}", .path.display())]
    Subscribe {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("watcher has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub line_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogUpdate {
    /// Replaces everything shown so far.
    Reset { lines: Vec<LogLine> },
    Append { lines: Vec<LogLine> },
}

impl LogUpdate {
    pub fn lines(&self) -> &[LogLine] {
        match self {
            LogUpdate::Reset { lines } | LogUpdate::Append { lines } => lines,
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, LogUpdate::Reset { .. })
    }
}

/// Item delivered on the watcher's channel.
///
/// Events arrive in the order the watcher produced them; there is exactly one
/// producer per watcher and the receiver is the only consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Update(LogUpdate),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Contents or size changed in place.
    Change,
    /// The path was created, removed or had another file renamed onto it.
    Rename,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub max_lines: usize,
    /// Subscribe to filesystem events. When off, notifications only arrive
    /// through [`FileTailWatcher::notify_change`] and
    /// [`FileTailWatcher::notify_rename`].
    pub follow_fs_events: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_TAIL_LINES,
            follow_fs_events: true,
        }
    }
}

enum Task {
    Notify(Notification),
    Shutdown,
}

/// Sending side of a watcher's task queue.
///
/// At most one `Rename` waits in the queue at a time: a rename that arrives
/// while another is still queued is dropped, since handling the first one
/// already reopens whatever the path points to by then.
#[derive(Clone)]
struct TaskQueue {
    tx: Sender<Task>,
    rename_pending: Arc<AtomicBool>,
}

impl TaskQueue {
    fn push(&self, notification: Notification) {
        if notification == Notification::Rename && self.rename_pending.swap(true, Ordering::SeqCst)
        {
            return;
        }
        let _ = self.tx.send(Task::Notify(notification));
    }

    fn shutdown(&self) {
        let _ = self.tx.send(Task::Shutdown);
    }
}

/// Follows a single file and reports its lines as [`LogUpdate`]s.
///
/// Notifications are queued and handled one at a time by a dedicated worker
/// thread, which is the only owner of the file handle and read position.
pub struct FileTailWatcher {
    options: WatchOptions,
    events: Option<Sender<WatchEvent>>,
    active: Option<ActiveWatch>,
}

struct ActiveWatch {
    path: PathBuf,
    queue: TaskQueue,
    disposed: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    fs_watcher: Option<RecommendedWatcher>,
}

impl FileTailWatcher {
    pub fn new(options: WatchOptions) -> (Self, Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel();
        let watcher = Self {
            options,
            events: Some(tx),
            active: None,
        };
        (watcher, rx)
    }

    /// Starts following `path`, replacing whatever was followed before.
    ///
    /// Emits an initial `Reset` with the file's tail before returning.
    pub fn watch_file(&mut self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let follow = self.options.follow_fs_events;
        self.watch_with(path.as_ref(), |path, queue| {
            if follow {
                subscribe(path, queue).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    fn watch_with<S>(&mut self, path: &Path, subscriber: S) -> Result<(), WatchError>
    where
        S: FnOnce(&Path, TaskQueue) -> Result<Option<RecommendedWatcher>, WatchError>,
    {
        self.stop();
        let events = self.events.clone().ok_or(WatchError::Disposed)?;

        let requested = path.to_path_buf();
        let file = File::open(&requested).map_err(|source| WatchError::Open {
            path: requested.clone(),
            source,
        })?;
        let path = std::fs::canonicalize(&requested).unwrap_or(requested);

        let disposed = Arc::new(AtomicBool::new(false));
        let mut state = WatcherState {
            path: path.clone(),
            file: Some(file),
            offset: 0,
            remainder: String::new(),
            pending: Vec::new(),
            line_counter: 0,
            max_lines: self.options.max_lines,
            events,
            disposed: Arc::clone(&disposed),
        };
        // The subscription must be live before the initial Reset goes out.
        let (queue_tx, queue_rx) = mpsc::channel();
        let queue = TaskQueue {
            tx: queue_tx,
            rename_pending: Arc::new(AtomicBool::new(false)),
        };
        let fs_watcher = subscriber(&path, queue.clone())?;

        state.reset().map_err(|source| WatchError::Read {
            path: path.clone(),
            source,
        })?;

        let rename_pending = Arc::clone(&queue.rename_pending);
        let worker = thread::spawn(move || state.run(queue_rx, rename_pending));
        info!(path = %path.display(), "watching file");

        self.active = Some(ActiveWatch {
            path,
            queue,
            disposed,
            worker: Some(worker),
            fs_watcher,
        });
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub fn is_watching(&self) -> bool {
        self.active.is_some()
    }

    pub fn notify_change(&self) {
        self.enqueue(Notification::Change);
    }

    pub fn notify_rename(&self) {
        self.enqueue(Notification::Rename);
    }

    fn enqueue(&self, notification: Notification) {
        if let Some(active) = &self.active {
            active.queue.push(notification);
        }
    }

    /// Stops following and releases the event channel. Blocks until the
    /// task currently being handled has finished.
    pub fn dispose(&mut self) {
        self.stop();
        self.events = None;
    }

    fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.disposed.store(true, Ordering::SeqCst);
        drop(active.fs_watcher.take());
        active.queue.shutdown();
        if let Some(worker) = active.worker.take() {
            if worker.join().is_err() {
                warn!(path = %active.path.display(), "watch worker panicked");
            }
        }
        debug!(path = %active.path.display(), "stopped watching");
    }
}

impl Drop for FileTailWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn subscribe(path: &Path, queue: TaskQueue) -> Result<RecommendedWatcher, WatchError> {
    let target = path.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !event.paths.iter().any(|p| p == &target) {
                return;
            }
            if let Some(notification) = classify_event(&event.kind) {
                queue.push(notification);
            }
        }
        Err(e) => warn!(error = %e, "filesystem notification error"),
    })
    .map_err(|source| WatchError::Subscribe {
        path: path.to_path_buf(),
        source,
    })?;

    // The directory is watched so that replacing the file is seen as well.
    let dir = path.parent().unwrap_or(path);
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|source| WatchError::Subscribe {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(watcher)
}

fn classify_event(kind: &EventKind) -> Option<Notification> {
    match kind {
        // Follows a `From` or `To` event for the same rename.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => None,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(Notification::Rename)
        }
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => Some(Notification::Change),
        EventKind::Access(_) => None,
    }
}

struct WatcherState {
    path: PathBuf,
    file: Option<File>,
    offset: u64,
    remainder: String,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last read.
    pending: Vec<u8>,
    line_counter: u64,
    max_lines: usize,
    events: Sender<WatchEvent>,
    disposed: Arc<AtomicBool>,
}

impl WatcherState {
    fn run(mut self, queue: Receiver<Task>, rename_pending: Arc<AtomicBool>) {
        while let Ok(task) = queue.recv() {
            let notification = match task {
                Task::Notify(n) => n,
                Task::Shutdown => break,
            };
            if self.disposed.load(Ordering::SeqCst) {
                break;
            }
            if notification == Notification::Rename {
                rename_pending.store(false, Ordering::SeqCst);
            }
            let result = match notification {
                Notification::Change => self.handle_change(),
                Notification::Rename => self.handle_rename(),
            };
            if let Err(e) = result {
                warn!(
                    path = %self.path.display(),
                    ?notification,
                    error = %e,
                    "skipping notification"
                );
            }
        }
    }

    fn handle_change(&mut self) -> io::Result<()> {
        let size = match &self.file {
            Some(file) => file.metadata()?.len(),
            None => return Ok(()),
        };

        if size < self.offset {
            info!(
                path = %self.path.display(),
                offset = self.offset,
                size,
                "file truncated, resetting"
            );
            return self.reset();
        }
        if size == self.offset {
            return Ok(());
        }

        let mut buf = Vec::new();
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(self.offset))?;
            file.by_ref().take(size - self.offset).read_to_end(&mut buf)?;
        }
        self.offset += buf.len() as u64;

        let chunk = self.decode(buf);
        let (texts, remainder) = reassemble(&chunk, &self.remainder);
        self.remainder = remainder;
        if texts.is_empty() {
            return Ok(());
        }

        let lines: Vec<LogLine> = texts
            .into_iter()
            .map(|text| {
                self.line_counter += 1;
                LogLine {
                    text,
                    line_number: self.line_counter,
                }
            })
            .collect();
        debug!(
            path = %self.path.display(),
            count = lines.len(),
            offset = self.offset,
            "appending lines"
        );
        self.emit(WatchEvent::Update(LogUpdate::Append { lines }));
        Ok(())
    }

    fn handle_rename(&mut self) -> io::Result<()> {
        self.file = None;
        self.clear_position();

        match File::open(&self.path) {
            Ok(file) => {
                info!(path = %self.path.display(), "file replaced, reopening");
                self.file = Some(file);
                self.reset()
            }
            Err(e) => {
                let message = format!("cannot reopen {}: {e}", self.path.display());
                self.emit(WatchEvent::Error(message));
                Err(e)
            }
        }
    }

    /// Rebuilds the view from the file's current contents.
    fn reset(&mut self) -> io::Result<()> {
        self.clear_position();
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let tail = read_tail(file, self.max_lines)?;
        self.offset = tail.end_offset;
        self.line_counter = tail.total_lines;
        self.emit(WatchEvent::Update(LogUpdate::Reset { lines: tail.lines }));
        Ok(())
    }

    fn clear_position(&mut self) {
        self.offset = 0;
        self.remainder.clear();
        self.pending.clear();
        self.line_counter = 0;
    }

    fn decode(&mut self, bytes: Vec<u8>) -> String {
        self.pending.extend_from_slice(&bytes);
        let mut data = std::mem::take(&mut self.pending);
        let keep = incomplete_suffix_len(&data);
        self.pending = data.split_off(data.len() - keep);
        String::from_utf8_lossy(&data).into_owned()
    }

    fn emit(&self, event: WatchEvent) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.events.send(event).is_err() {
            debug!(path = %self.path.display(), "event receiver dropped");
        }
    }
}

/// Length of a UTF-8 sequence cut off at the end of `bytes`, if any.
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_suffix() {
        let euro = "€".as_bytes();
        assert_eq!(incomplete_suffix_len(b"abc"), 0);
        assert_eq!(incomplete_suffix_len(&euro[..1]), 1);
        assert_eq!(incomplete_suffix_len(&euro[..2]), 2);
        assert_eq!(incomplete_suffix_len(euro), 0);
        assert_eq!(incomplete_suffix_len(b""), 0);
    }

    #[test]
    fn test_classify_event() {
        use notify::event::{AccessKind, CreateKind, DataChange};
        assert_eq!(
            classify_event(&EventKind::Create(CreateKind::File)),
            Some(Notification::Rename)
        );
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(Notification::Rename)
        );
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(Notification::Change)
        );
        assert_eq!(classify_event(&EventKind::Access(AccessKind::Any)), None);
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            None
        );
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(Notification::Rename)
        );
    }

    #[test]
    fn test_update_lines() {
        let update = LogUpdate::Append {
            lines: vec![LogLine {
                text: "a".into(),
                line_number: 4,
            }],
        };
        assert!(!update.is_reset());
        assert_eq!(update.lines()[0].line_number, 4);
    }

    #[test]
    fn test_failed_subscription_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "a\nb\n").unwrap();

        let (mut watcher, rx) = FileTailWatcher::new(WatchOptions::default());
        let err = watcher
            .watch_with(&path, |path, _| {
                Err(WatchError::Subscribe {
                    path: path.to_path_buf(),
                    source: notify::Error::generic("watch limit reached"),
                })
            })
            .unwrap_err();
        assert!(matches!(err, WatchError::Subscribe { .. }));
        assert!(!watcher.is_watching());
        assert!(matches!(rx.try_recv(), Err(mpsc::TryRecvError::Empty)));

        watcher.watch_file(&path).unwrap();
        assert!(matches!(rx.try_recv(), Ok(WatchEvent::Update(LogUpdate::Reset { .. }))));
    }

    #[test]
    fn test_rename_notifications_coalesce() {
        let (tx, rx) = mpsc::channel();
        let queue = TaskQueue {
            tx,
            rename_pending: Arc::new(AtomicBool::new(false)),
        };
        queue.push(Notification::Rename);
        queue.push(Notification::Change);
        queue.push(Notification::Rename);
        queue.push(Notification::Change);

        let queued: Vec<Notification> = rx
            .try_iter()
            .filter_map(|task| match task {
                Task::Notify(n) => Some(n),
                Task::Shutdown => None,
            })
            .collect();
        assert_eq!(
            queued,
            vec![Notification::Rename, Notification::Change, Notification::Change]
        );

        // Once the worker has picked the rename up, the next one is queued.
        queue.rename_pending.store(false, Ordering::SeqCst);
        queue.push(Notification::Rename);
        assert!(matches!(rx.try_recv(), Ok(Task::Notify(Notification::Rename))));
    }

    #[test]
    fn test_watch_missing_file_fails() {
        let (mut watcher, _rx) = FileTailWatcher::new(WatchOptions::default());
        let err = watcher
            .watch_file("/definitely/not/here.log")
            .unwrap_err();
        assert!(matches!(err, WatchError::Open { .. }));
        assert!(!watcher.is_watching());
    }
}
