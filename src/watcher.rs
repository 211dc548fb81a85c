use std::{
    path::{Path, PathBuf},
    sync::{
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread,
    time::Duration,
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::{error::Result, formats::FormatRegistry, worker::WorkerMessage};

/// Watches the open folder and reports a [`WorkerMessage::FolderChanged`]
/// once events stopped arriving for the debounce period. Dropping it stops
/// the watch.
pub struct FolderWatcher {
    dir: PathBuf,
    recursive: bool,
    _watcher: RecommendedWatcher,
}

impl FolderWatcher {
    pub fn new(
        dir: &Path,
        recursive: bool,
        debounce: Duration,
        formats: Arc<FormatRegistry>,
        msg_tx: Sender<WorkerMessage>,
    ) -> Result<FolderWatcher> {
        let (event_tx, event_rx) = channel();
        let mut watcher = notify::recommended_watcher(event_tx)?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(dir, mode)?;

        let watched_dir = dir.to_path_buf();
        thread::spawn(move || debounce_loop(event_rx, msg_tx, watched_dir, debounce, formats));

        tracing::info!("Watching {}", dir.display());

        Ok(FolderWatcher {
            dir: dir.to_path_buf(),
            recursive,
            _watcher: watcher,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_watching(&self, dir: &Path, recursive: bool) -> bool {
        self.dir == dir && self.recursive == recursive
    }
}

fn debounce_loop(
    event_rx: Receiver<notify::Result<Event>>,
    msg_tx: Sender<WorkerMessage>,
    dir: PathBuf,
    debounce: Duration,
    formats: Arc<FormatRegistry>,
) {
    //ends when the watcher is dropped and takes the sender with it
    while let Ok(event) = event_rx.recv() {
        if !is_relevant(&event, &formats) {
            continue;
        }

        //wait for the burst to end, a copy of many files is many events
        loop {
            match event_rx.recv_timeout(debounce) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        tracing::debug!("{} changed on disk", dir.display());
        if msg_tx.send(WorkerMessage::FolderChanged(dir.clone())).is_err() {
            return;
        }
    }
}

fn is_relevant(event: &notify::Result<Event>, formats: &FormatRegistry) -> bool {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            //a failed watch may have missed something, rescan to be safe
            tracing::warn!("File watcher error -> {e}");
            return true;
        }
    };

    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_) => {}
        _ => return false,
    }

    //folders have no extension, their removal takes images with them
    event
        .paths
        .iter()
        .any(|p| formats.is_readable(p) || p.extension().is_none())
}
