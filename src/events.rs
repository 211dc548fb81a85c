use std::{
    fmt,
    path::PathBuf,
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, Mutex,
    },
};

use crate::entry::ImageEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn of(steps: isize) -> Direction {
        if steps < 0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

/// What happened to the current file when the folder was scanned again.
#[derive(Debug, Clone)]
pub enum Reconciliation {
    /// Still there, at the same position.
    Unchanged(Arc<ImageEntry>),
    /// Still there, at a new position.
    Moved {
        entry: Arc<ImageEntry>,
        from: usize,
        to: usize,
    },
    /// The current file is gone, the selection moved to the nearest file left.
    Removed {
        removed: PathBuf,
        moved_to: Arc<ImageEntry>,
    },
    /// The current file is gone and so is everything else.
    Cleared { removed: Option<PathBuf> },
}

impl Reconciliation {
    pub fn current(&self) -> Option<&Arc<ImageEntry>> {
        match self {
            Reconciliation::Unchanged(entry) => Some(entry),
            Reconciliation::Moved { entry, .. } => Some(entry),
            Reconciliation::Removed { moved_to, .. } => Some(moved_to),
            Reconciliation::Cleared { .. } => None,
        }
    }

    pub fn survived(&self) -> bool {
        matches!(
            self,
            Reconciliation::Unchanged(_) | Reconciliation::Moved { .. }
        )
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reconciliation::Unchanged(entry) => write!(f, "current file {} unchanged", entry.name()),
            Reconciliation::Moved { entry, from, to } => {
                write!(f, "current file {} moved from {} to {}", entry.name(), from + 1, to + 1)
            }
            Reconciliation::Removed { removed, moved_to } => write!(
                f,
                "current file {} removed, moved to {}",
                removed.display(),
                moved_to.name()
            ),
            Reconciliation::Cleared { .. } => write!(f, "folder is empty, no current file"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    FileChanged(Arc<ImageEntry>),
    FolderUpdated(Arc<[Arc<ImageEntry>]>),
    FileNotLoaded {
        entry: Arc<ImageEntry>,
        reason: String,
    },
    NoMoreFiles(Direction),
    CurrentReconciled(Reconciliation),
    ImageLoaded(Arc<ImageEntry>),
    ImageSaved {
        entry: Arc<ImageEntry>,
        path: PathBuf,
    },
    ScanFailed {
        dir: PathBuf,
        reason: String,
    },
}

/// Fans events out to every subscriber. Subscribers that dropped their
/// receiver are forgotten on the next publish.
#[derive(Default, Clone)]
pub struct Notifier {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if subscribers.is_empty() {
            return;
        }

        tracing::trace!("Publishing {event:?}");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
