use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use crate::crawler::{self, ScanRequest, ScannedFile};
use crate::error::Result;
use crate::formats::FormatRegistry;

/// Why a scan was started, decides how its result is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOrigin {
    /// A folder was opened, select `select` (or the first file) once done.
    Open { select: Option<PathBuf> },
    /// The watcher saw the folder change.
    Watch,
    /// Someone asked for a fresh listing of the open folder.
    Refresh,
}

#[derive(Debug)]
pub enum Job {
    Scan {
        generation: u64,
        origin: ScanOrigin,
        request: ScanRequest,
    },
}

#[derive(Debug)]
pub enum WorkerMessage {
    ScanFinished {
        generation: u64,
        origin: ScanOrigin,
        request: ScanRequest,
        result: Result<Vec<ScannedFile>>,
    },
    /// Sent by the folder watcher after things settled down.
    FolderChanged(PathBuf),
}

/// Background thread running folder scans. Results are sent back as
/// [`WorkerMessage`]s, never applied from here.
pub struct Worker {
    job_tx: Sender<Job>,
    live_generation: Arc<AtomicU64>,
}

impl Worker {
    pub fn new(formats: Arc<FormatRegistry>, msg_tx: Sender<WorkerMessage>) -> Self {
        let (job_tx, job_rx) = channel();
        let live_generation = Arc::new(AtomicU64::new(0));

        let worker_generation = live_generation.clone();
        thread::spawn(move || {
            worker_loop(job_rx, msg_tx, formats, worker_generation);
        });

        Self {
            job_tx,
            live_generation,
        }
    }

    /// Starts a new generation. Scans of older generations stop early and
    /// their results are dropped.
    pub fn next_generation(&self) -> u64 {
        self.live_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn generation(&self) -> u64 {
        self.live_generation.load(Ordering::Acquire)
    }

    pub fn is_live(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    pub fn send_job(&self, job: Job) -> bool {
        match self.job_tx.send(job) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to send job to worker -> {e}");
                false
            }
        }
    }
}

fn worker_loop(
    job_rx: Receiver<Job>,
    msg_tx: Sender<WorkerMessage>,
    formats: Arc<FormatRegistry>,
    live_generation: Arc<AtomicU64>,
) {
    while let Ok(job) = job_rx.recv() {
        match job {
            Job::Scan {
                generation,
                origin,
                request,
            } => {
                let is_cancelled = || live_generation.load(Ordering::Acquire) != generation;
                if is_cancelled() {
                    tracing::debug!("Skipping stale scan of {}", request.dir.display());
                    continue;
                }

                tracing::debug!("Scanning {} ({origin:?})", request.dir.display());
                let result = match crawler::crawl_cancellable(&request, &formats, &is_cancelled) {
                    Ok(Some(files)) => Ok(files),
                    Ok(None) => continue,
                    Err(e) => Err(e),
                };

                let msg = WorkerMessage::ScanFinished {
                    generation,
                    origin,
                    request,
                    result,
                };

                if msg_tx.send(msg).is_err() {
                    //nobody is listening anymore
                    break;
                }
            }
        }
    }
}
