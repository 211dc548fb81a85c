use std::{
    collections::VecDeque,
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    crawler::{self, ScanRequest, ScannedFile},
    entry::{ImageEntry, LoadOutcome, SaveGuard},
    error::{Error, Result},
    events::{Direction, Event, Notifier, Reconciliation},
    filters::KeywordFilter,
    formats::{self, FormatRegistry},
    image::{self as img, DecodeOptions, ImageCodec, ImageRsCodec},
    manipulator::Manipulator,
    orientation::{self, Orientation},
    registry::ImageRegistry,
    sort::{self, SortKey, SortOrder},
    utils,
    watcher::FolderWatcher,
    worker::{Job, ScanOrigin, Worker, WorkerMessage},
};

/// What happens when navigation runs past the first or last file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrapPolicy {
    /// Continue on the other end of the folder.
    Wrap,
    /// Stay on the boundary file and report [`Event::NoMoreFiles`].
    Clamp,
}

#[derive(Debug, Clone, PartialEq)]
enum PendingNavigation {
    Advance { steps: isize, wrap: WrapPolicy },
    SetCurrent(PathBuf),
    At(usize),
    Last,
    Filter(KeywordFilter),
}

#[derive(Debug, Clone, Copy)]
struct InFlightScan {
    generation: u64,
    opening: bool,
}

/// A save running on its own thread.
pub struct SaveHandle {
    path: PathBuf,
    handle: JoinHandle<Result<()>>,
}

impl SaveHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn wait(self) -> Result<()> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Encode {
                path: self.path,
                cause: String::from("save thread panicked"),
            }),
        }
    }
}

/// Owns the open folder and the current selection.
///
/// Every change to the folder goes through `&mut self`. Background scans and
/// the folder watcher only post messages, they are applied by
/// [`Navigator::process_pending`] on whatever thread owns the navigator.
pub struct Navigator {
    config: Config,
    formats: Arc<FormatRegistry>,
    codec: Arc<dyn ImageCodec>,
    registry: ImageRegistry,
    dir: Option<PathBuf>,
    save_dir: Option<PathBuf>,
    recursive: bool,
    filter: KeywordFilter,
    sort_key: SortKey,
    sort_order: SortOrder,
    current: Option<usize>,
    //current image that isn't part of the folder listing
    detached: Option<Arc<ImageEntry>>,
    notifier: Notifier,
    worker: Worker,
    msg_tx: Sender<WorkerMessage>,
    msg_rx: Receiver<WorkerMessage>,
    in_flight: Option<InFlightScan>,
    pending: VecDeque<PendingNavigation>,
    watcher: Option<FolderWatcher>,
}

impl Navigator {
    pub fn new(config: Config) -> Navigator {
        Self::with_collaborators(config, FormatRegistry::global(), Arc::new(ImageRsCodec))
    }

    pub fn with_collaborators(
        config: Config,
        formats: Arc<FormatRegistry>,
        codec: Arc<dyn ImageCodec>,
    ) -> Navigator {
        let (msg_tx, msg_rx) = channel();
        let worker = Worker::new(formats.clone(), msg_tx.clone());

        Navigator {
            filter: config.filter.keyword_filter(),
            sort_key: config.sort.key,
            sort_order: config.sort.order,
            recursive: config.navigation.recursive,
            config,
            formats,
            codec,
            registry: ImageRegistry::new(),
            dir: None,
            save_dir: None,
            current: None,
            detached: None,
            notifier: Notifier::new(),
            worker,
            msg_tx,
            msg_rx,
            in_flight: None,
            pending: VecDeque::new(),
            watcher: None,
        }
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        self.notifier.subscribe()
    }

    fn publish(&self, event: Event) {
        self.notifier.publish(event);
    }

    //Folder loading

    /// Scans `path` and makes it the open folder. An empty folder is not an
    /// error. A failed scan leaves the previous folder in place.
    pub fn load_directory(&mut self, path: &Path, recursive: bool) -> Result<Arc<[Arc<ImageEntry>]>> {
        let dir = resolve_dir(path)?;

        //whatever was scanning is for a folder we are leaving
        self.worker.next_generation();
        self.in_flight = None;

        let request = self.open_request(&dir, recursive);
        let files = match crawler::crawl(&request, &self.formats) {
            Ok(files) => files,
            Err(e) => {
                self.replay_pending();
                return Err(e);
            }
        };
        self.open_scanned(request, files, None);
        self.replay_pending();

        Ok(self.entries())
    }

    /// Opens the folder of `path` and selects it if it's a file. A file the
    /// filters hide is still shown, outside of the folder listing.
    pub fn load_file(&mut self, path: &Path) -> Result<Option<Arc<ImageEntry>>> {
        let (dir, file) = crawler::resolve_start(path)?;

        let file = match file {
            Some(file) => file,
            None => {
                self.load_directory(&dir, self.recursive)?;
                return Ok(self.current());
            }
        };

        if self.registry.index_of(&file).is_none() {
            self.load_directory(&dir, self.recursive)?;
        }

        match self.registry.index_of(&file) {
            Some(index) => Ok(self.select(index)),
            None => {
                tracing::info!("{} is filtered out, showing it on its own", file.display());
                let entry = self.find_or_create(&file);
                self.show_detached(entry.clone());
                Ok(Some(entry))
            }
        }
    }

    /// Like [`Navigator::load_file`] but scans on the worker. Navigation
    /// issued before the scan is applied waits for it.
    pub fn open_async(&mut self, path: &Path, recursive: bool) -> Result<()> {
        let (dir, select) = crawler::resolve_start(path)?;

        let generation = self.worker.next_generation();
        let request = self.open_request(&dir, recursive);
        self.in_flight = Some(InFlightScan {
            generation,
            opening: true,
        });

        self.worker.send_job(Job::Scan {
            generation,
            origin: ScanOrigin::Open { select },
            request,
        });

        Ok(())
    }

    /// Re-reads the open folder in the background.
    pub fn refresh(&mut self) {
        self.request_rescan(ScanOrigin::Refresh);
    }

    /// Re-reads the open folder right away.
    pub fn refresh_now(&mut self) -> Result<()> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };

        if self.is_opening() {
            tracing::debug!("{} is being opened, not re-reading it", dir.display());
            return Ok(());
        }

        self.worker.next_generation();
        self.in_flight = None;

        let request = self.scan_request(&dir, self.recursive, self.filter.clone());
        let files = match crawler::crawl(&request, &self.formats) {
            Ok(files) => files,
            Err(e) => {
                self.replay_pending();
                return Err(e);
            }
        };
        self.reconcile(&files);
        self.replay_pending();
        Ok(())
    }

    fn request_rescan(&mut self, origin: ScanOrigin) {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => return,
        };

        //the folder being opened replaces this one anyway
        if self.is_opening() {
            return;
        }

        let generation = self.worker.next_generation();
        let request = self.scan_request(&dir, self.recursive, self.filter.clone());
        self.in_flight = Some(InFlightScan {
            generation,
            opening: false,
        });

        self.worker.send_job(Job::Scan {
            generation,
            origin,
            request,
        });
    }

    fn scan_request(&self, dir: &Path, recursive: bool, filter: KeywordFilter) -> ScanRequest {
        ScanRequest {
            dir: dir.to_path_buf(),
            recursive,
            filter,
            sort_key: self.sort_key,
            sort_order: self.sort_order,
        }
    }

    fn open_request(&self, dir: &Path, recursive: bool) -> ScanRequest {
        let mut filter = self.filter.clone();
        //folder keywords only make sense for the folder they were set on
        if self.dir.as_deref() != Some(dir) {
            filter.folder_keywords.clear();
        }

        self.scan_request(dir, recursive, filter)
    }

    fn open_scanned(&mut self, request: ScanRequest, files: Vec<ScannedFile>, select: Option<PathBuf>) {
        let ScanRequest {
            dir,
            recursive,
            filter,
            ..
        } = request;

        let dir_changed = self.dir.as_deref() != Some(dir.as_path());
        if dir_changed {
            self.registry.clear();
        }
        self.registry.replace_all(&files);

        //a save dir picked by the user survives folder changes
        if self.save_dir.is_none() || self.save_dir == self.dir {
            self.save_dir = Some(dir.clone());
        }

        tracing::info!(
            "Opened {} with {} images",
            dir.display(),
            self.registry.len()
        );

        self.dir = Some(dir);
        self.recursive = recursive;
        self.filter = filter;
        self.detached = None;
        self.current = match select.and_then(|path| self.registry.index_of(&path)) {
            Some(index) => Some(index),
            None if self.registry.is_empty() => None,
            None => Some(0),
        };

        self.update_watcher();
        self.load_window();

        self.publish(Event::FolderUpdated(self.entries()));
        if let Some(entry) = self.current() {
            self.publish(Event::FileChanged(entry));
        }
    }

    /// Applies a fresh listing of the open folder, keeping the current file
    /// selected or moving to the nearest one left.
    fn reconcile(&mut self, files: &[ScannedFile]) {
        let previous = self.registry.snapshot();
        let previous_index = self.current.filter(|&i| i < previous.len());

        self.registry.replace_all(files);
        let len = self.registry.len();

        let (index, reconciliation) = match previous_index {
            Some(from) => {
                let entry = previous[from].clone();
                match self.registry.index_of(entry.path()) {
                    Some(to) if to == from => (Some(to), Some(Reconciliation::Unchanged(entry))),
                    Some(to) => (Some(to), Some(Reconciliation::Moved { entry, from, to })),
                    None => match self.nearest_survivor(&previous, from) {
                        Some(to) => match self.registry.get(to) {
                            Some(moved_to) => (
                                Some(to),
                                Some(Reconciliation::Removed {
                                    removed: entry.path().to_path_buf(),
                                    moved_to,
                                }),
                            ),
                            None => (None, None),
                        },
                        None => (
                            None,
                            Some(Reconciliation::Cleared {
                                removed: Some(entry.path().to_path_buf()),
                            }),
                        ),
                    },
                }
            }
            None if len > 0 => (Some(0), None),
            None => (None, None),
        };

        let selection_changed = match &reconciliation {
            Some(r) => !r.survived(),
            None => index.is_some(),
        };

        self.current = index;
        self.load_window();
        self.publish(Event::FolderUpdated(self.entries()));

        //a detached image is unaffected by the folder listing
        let reconciliation = match &self.detached {
            Some(detached) => Some(Reconciliation::Unchanged(detached.clone())),
            None => reconciliation,
        };

        if let Some(reconciliation) = reconciliation {
            tracing::info!("Reconciled folder: {reconciliation}");
            self.publish(Event::CurrentReconciled(reconciliation));
        }

        if selection_changed && self.detached.is_none() {
            if let Some(entry) = self.current() {
                self.publish(Event::FileChanged(entry));
            }
        }
    }

    /// Where the selection goes when the current file disappeared: the next
    /// file that is still there, else the previous one.
    fn nearest_survivor(&self, previous: &[Arc<ImageEntry>], from: usize) -> Option<usize> {
        let len = self.registry.len();
        if len == 0 {
            return None;
        }

        previous[from + 1..]
            .iter()
            .chain(previous[..from].iter().rev())
            .find_map(|e| self.registry.index_of(e.path()))
            .or(Some(from.min(len - 1)))
    }

    //Queue

    /// Applies finished scans and folder changes and collects finished
    /// decodes. Returns how many queued messages were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.msg_rx.try_recv() {
            self.handle_message(msg);
            handled += 1;
        }

        self.poll_loads();
        handled
    }

    /// Blocks until a message arrives or `timeout` passes, then behaves like
    /// [`Navigator::process_pending`].
    pub fn wait_for_message(&mut self, timeout: Duration) -> bool {
        match self.msg_rx.recv_timeout(timeout) {
            Ok(msg) => {
                self.handle_message(msg);
                self.process_pending();
                true
            }
            Err(_) => {
                self.poll_loads();
                false
            }
        }
    }

    /// Blocks until no scan is running anymore. False on timeout.
    pub fn wait_for_scan(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.wait_for_message(remaining);
        }

        true
    }

    fn handle_message(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::FolderChanged(dir) => {
                if self.dir.as_deref() != Some(dir.as_path()) {
                    return;
                }

                self.request_rescan(ScanOrigin::Watch);
            }
            WorkerMessage::ScanFinished {
                generation,
                origin,
                request,
                result,
            } => {
                let expected = self.in_flight.map(|scan| scan.generation);
                if !self.worker.is_live(generation) || expected != Some(generation) {
                    tracing::debug!("Discarding stale scan of {}", request.dir.display());
                    return;
                }

                self.in_flight = None;
                let result = result.map(|files| self.in_current_order(&request, files));

                match (origin, result) {
                    (ScanOrigin::Open { select }, Ok(files)) => {
                        self.open_scanned(request, files, select)
                    }
                    (_, Ok(files)) => self.reconcile(&files),
                    (ScanOrigin::Watch, Err(e)) => {
                        //the next change on disk retries
                        tracing::warn!(
                            "Failure re-reading {} -> {e}, keeping the last listing",
                            request.dir.display()
                        );
                    }
                    (_, Err(e)) => {
                        tracing::warn!("Failure scanning {} -> {e}", request.dir.display());
                        self.publish(Event::ScanFailed {
                            dir: request.dir,
                            reason: e.to_string(),
                        });
                    }
                }

                self.replay_pending();
            }
        }
    }

    /// A scan sorts with the order that was active when it started, which
    /// may have changed since.
    fn in_current_order(
        &self,
        request: &ScanRequest,
        mut files: Vec<ScannedFile>,
    ) -> Vec<ScannedFile> {
        if (request.sort_key, request.sort_order) != (self.sort_key, self.sort_order) {
            sort::sort_in_place(&mut files, self.sort_key, self.sort_order);
        }

        files
    }

    fn is_opening(&self) -> bool {
        self.in_flight.is_some_and(|scan| scan.opening)
    }

    fn replay_pending(&mut self) {
        while self.in_flight.is_none() {
            let navigation = match self.pending.pop_front() {
                Some(navigation) => navigation,
                None => break,
            };

            tracing::debug!("Replaying {navigation:?}");
            match navigation {
                PendingNavigation::Advance { steps, wrap } => {
                    self.advance(steps, wrap);
                }
                PendingNavigation::SetCurrent(path) => {
                    if let Err(e) = self.set_current_file(&path) {
                        tracing::warn!("{e}");
                    }
                }
                PendingNavigation::At(index) => {
                    self.load_file_at(index);
                }
                PendingNavigation::Last => {
                    self.last_file();
                }
                PendingNavigation::Filter(filter) => {
                    if let Err(e) = self.set_filter(filter) {
                        tracing::warn!("{e}");
                    }
                }
            }
        }
    }

    fn queue_if_scanning(&mut self, navigation: PendingNavigation) -> bool {
        if self.in_flight.is_none() {
            return false;
        }

        tracing::debug!("Scan in progress, queueing {navigation:?}");
        self.pending.push_back(navigation);
        true
    }

    fn poll_loads(&self) {
        for entry in self.registry.iter().chain(self.detached.iter()) {
            match entry.finish_loading() {
                Some(LoadOutcome::Loaded) => self.publish(Event::ImageLoaded(entry.clone())),
                Some(LoadOutcome::Failed(reason)) => self.publish(Event::FileNotLoaded {
                    entry: entry.clone(),
                    reason,
                }),
                None => {}
            }
        }
    }

    //Navigation

    /// Moves the selection by `steps`, negative goes backward.
    ///
    /// `steps` is first reduced modulo the folder size. Returns the new
    /// current entry, or `None` when the folder is empty or the move was
    /// queued behind a running scan.
    pub fn advance(&mut self, steps: isize, wrap: WrapPolicy) -> Option<Arc<ImageEntry>> {
        if self.queue_if_scanning(PendingNavigation::Advance { steps, wrap }) {
            return None;
        }

        let len = self.registry.len();
        if len == 0 {
            self.publish(Event::NoMoreFiles(Direction::of(steps)));
            return self.detached.clone();
        }

        if self.config.navigation.should_wait && self.current().is_some_and(|e| e.is_loading()) {
            return self.current();
        }

        let from = self.current.unwrap_or(0) as isize;
        let target = from + steps % len as isize;

        let index = match wrap {
            WrapPolicy::Wrap => target.rem_euclid(len as isize) as usize,
            WrapPolicy::Clamp if target < 0 => {
                self.publish(Event::NoMoreFiles(Direction::Backward));
                0
            }
            WrapPolicy::Clamp if target >= len as isize => {
                self.publish(Event::NoMoreFiles(Direction::Forward));
                len - 1
            }
            WrapPolicy::Clamp => target as usize,
        };

        self.select(index)
    }

    pub fn next_file(&mut self) -> Option<Arc<ImageEntry>> {
        self.advance(1, self.config.navigation.wrap)
    }

    pub fn previous_file(&mut self) -> Option<Arc<ImageEntry>> {
        self.advance(-1, self.config.navigation.wrap)
    }

    pub fn first_file(&mut self) -> Option<Arc<ImageEntry>> {
        self.load_file_at(0)
    }

    pub fn last_file(&mut self) -> Option<Arc<ImageEntry>> {
        if self.queue_if_scanning(PendingNavigation::Last) {
            return None;
        }

        match self.registry.len() {
            0 => None,
            len => self.select(len - 1),
        }
    }

    /// Selects the file at `index`, out of range indexes leave the
    /// selection alone.
    pub fn load_file_at(&mut self, index: usize) -> Option<Arc<ImageEntry>> {
        if self.queue_if_scanning(PendingNavigation::At(index)) {
            return None;
        }

        if index >= self.registry.len() {
            tracing::debug!("No image at index {index}");
            return None;
        }

        self.select(index)
    }

    pub fn set_current_file(&mut self, path: &Path) -> Result<()> {
        if self.queue_if_scanning(PendingNavigation::SetCurrent(path.to_path_buf())) {
            return Ok(());
        }

        match self.registry.index_of(path) {
            Some(index) => {
                self.select(index);
                Ok(())
            }
            None => Err(Error::FileNotInFolder(path.to_path_buf())),
        }
    }

    /// The folder's entry for `path`, or a new entry outside the folder.
    pub fn find_or_create(&self, path: &Path) -> Arc<ImageEntry> {
        match self.registry.find(path) {
            Some(entry) => entry,
            None => Arc::new(ImageEntry::transient(&utils::resolve(path))),
        }
    }

    fn select(&mut self, index: usize) -> Option<Arc<ImageEntry>> {
        let entry = self.registry.get(index)?;
        let changed = self.detached.take().is_some() || self.current != Some(index);
        self.current = Some(index);
        self.load_window();

        if changed {
            self.publish(Event::FileChanged(entry.clone()));
        }

        Some(entry)
    }

    fn show_detached(&mut self, entry: Arc<ImageEntry>) {
        entry.load(self.config.decode.options(), self.codec.clone());
        self.detached = Some(entry.clone());
        self.publish(Event::FileChanged(entry));
    }

    //Sorting and filters

    pub fn set_sort(&mut self, key: SortKey, order: SortOrder) {
        self.sort_key = key;
        self.sort_order = order;

        let current = self.current.and_then(|i| self.registry.get(i));
        let entries: Vec<Arc<ImageEntry>> = self.registry.iter().cloned().collect();
        self.registry.reorder(sort::sort(&entries, key, order));
        self.current = current.and_then(|e| self.registry.index_of(e.path()));

        self.publish(Event::FolderUpdated(self.entries()));
    }

    /// Replaces the keyword filters and re-reads the open folder with them.
    /// While a scan runs the change waits for it.
    pub fn set_filter(&mut self, filter: KeywordFilter) -> Result<()> {
        filter.compile()?;
        if self.queue_if_scanning(PendingNavigation::Filter(filter.clone())) {
            return Ok(());
        }

        self.filter = filter;
        self.refresh_now()
    }

    pub fn set_watch(&mut self, enabled: bool) {
        self.config.watch.enabled = enabled;
        self.update_watcher();
    }

    fn update_watcher(&mut self) {
        if !self.config.watch.enabled {
            self.watcher = None;
            return;
        }

        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => return,
        };

        if self
            .watcher
            .as_ref()
            .is_some_and(|w| w.is_watching(&dir, self.recursive))
        {
            return;
        }

        self.watcher = None;
        match FolderWatcher::new(
            &dir,
            self.recursive,
            self.config.watch.debounce(),
            self.formats.clone(),
            self.msg_tx.clone(),
        ) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => tracing::warn!("Failure watching {} -> {e}", dir.display()),
        }
    }

    //Preloading

    /// Loads the current entry and its neighbours, unloads everything else.
    fn load_window(&self) {
        let options = self.config.decode.options();

        if let Some(detached) = &self.detached {
            detached.load(options, self.codec.clone());
        }

        let len = self.registry.len();
        let current = match self.current {
            Some(current) if current < len => current,
            _ => return,
        };

        let nr_loaded_images = self.config.navigation.nr_loaded_images;
        if !is_valid_for_preload(nr_loaded_images, len) {
            for entry in self.registry.iter() {
                entry.load(options, self.codec.clone());
            }
            return;
        }

        //Not many entries in this vec so it's not worth to use a hashset
        let mut indexes_to_load: Vec<usize> = vec![current];
        for i in 1..nr_loaded_images + 1 {
            indexes_to_load.push(get_vec_index_subtracted_by(len, current, i));
            indexes_to_load.push(get_vec_index_sum_by(len, current, i));
        }

        for (i, entry) in self.registry.iter().enumerate() {
            if indexes_to_load.contains(&i) {
                entry.load(options, self.codec.clone());
            } else {
                entry.unload();
            }
        }
    }

    pub fn reload_current(&self) {
        if let Some(entry) = self.current() {
            entry.reload(self.config.decode.options(), self.codec.clone());
        }
    }

    pub fn unload_current(&self) {
        if let Some(entry) = self.current() {
            entry.unload();
        }
    }

    //Editing and saving

    /// Stages pixels that have no file yet (a paste for instance) as the
    /// current image. It's saved as `name` in the save folder.
    pub fn set_image(&mut self, pixels: DynamicImage, name: &str) -> Arc<ImageEntry> {
        let base = self
            .save_dir
            .clone()
            .or_else(|| self.dir.clone())
            .or_else(|| env::current_dir().ok())
            .unwrap_or_default();

        let entry = Arc::new(ImageEntry::from_pixels(pixels, &base.join(name)));
        self.detached = Some(entry.clone());
        self.publish(Event::FileChanged(entry.clone()));
        entry
    }

    /// Runs `manipulator` on the current image and stages the result.
    pub fn apply_manipulator(&mut self, manipulator: &Manipulator) -> Result<Arc<ImageEntry>> {
        let entry = self
            .current()
            .ok_or_else(|| Error::Manipulation(String::from("no image to edit")))?;

        let pixels = full_pixels_of(&entry, self.config.decode.options(), self.codec.as_ref())?;
        let edited = manipulator.apply(&pixels)?;
        entry.stage_edit(edited);

        tracing::debug!("{} -> Applied {}", entry.name(), manipulator.name());
        self.publish(Event::ImageLoaded(entry.clone()));
        Ok(entry)
    }

    /// Shows the current image as if its file carried `to` as orientation
    /// and stages the result.
    pub fn set_orientation(&mut self, to: Orientation) -> Result<Arc<ImageEntry>> {
        let entry = self
            .current()
            .ok_or_else(|| Error::Manipulation(String::from("no image to orient")))?;

        let options = self.config.decode.options();
        let pixels = full_pixels_of(&entry, options, self.codec.as_ref())?;
        let from = match entry.edited_orientation() {
            Some(from) => from,
            None if options.auto_orient => file_orientation(&entry),
            None => Orientation::Normal,
        };

        let oriented = from.reorient(pixels.as_ref().clone(), to);
        entry.stage_orientation(oriented, to);

        tracing::debug!("{} -> Oriented {} to {}", entry.name(), from.label(), to.label());
        self.publish(Event::ImageLoaded(entry.clone()));
        Ok(entry)
    }

    /// Encodes `entry` as `format` into `target`. Only one save per entry
    /// may run at a time.
    pub fn save(
        &self,
        entry: &Arc<ImageEntry>,
        target: &Path,
        format: &str,
        compression: Option<u8>,
    ) -> Result<()> {
        let format = self.formats.writer_for(format)?;
        let guard = entry.begin_save()?;

        write_entry(
            &guard,
            target,
            format,
            compression,
            self.codec.as_ref(),
            self.config.decode.options(),
        )?;

        self.publish(Event::ImageSaved {
            entry: entry.clone(),
            path: target.to_path_buf(),
        });
        Ok(())
    }

    /// Same as [`Navigator::save`] on a separate thread. Format and
    /// concurrent save errors are still reported right away.
    pub fn save_async(
        &self,
        entry: &Arc<ImageEntry>,
        target: &Path,
        format: &str,
        compression: Option<u8>,
    ) -> Result<SaveHandle> {
        let format = self.formats.writer_for(format)?;
        let guard = entry.begin_save()?;

        let target = target.to_path_buf();
        let codec = self.codec.clone();
        let notifier = self.notifier.clone();
        let options = self.config.decode.options();
        let thread_target = target.clone();

        let handle = thread::spawn(move || {
            let result = write_entry(
                &guard,
                &thread_target,
                format,
                compression,
                codec.as_ref(),
                options,
            );

            match &result {
                Ok(_) => notifier.publish(Event::ImageSaved {
                    entry: guard.entry().clone(),
                    path: thread_target.clone(),
                }),
                Err(e) => tracing::warn!("{e}"),
            }

            result
        });

        Ok(SaveHandle {
            path: target,
            handle,
        })
    }

    /// Saves the current image into the save folder under its own name and
    /// format. Returns where it went.
    pub fn save_current(&self) -> Result<PathBuf> {
        let entry = self
            .current()
            .ok_or_else(|| Error::NotFound(self.dir.clone().unwrap_or_default()))?;

        let save_dir = self
            .save_dir
            .clone()
            .unwrap_or_else(|| entry.dir().to_path_buf());
        let target = save_dir.join(entry.name());
        let format = formats::extension_of(entry.path()).unwrap_or_else(|| String::from("png"));

        self.save(&entry, &target, &format, Some(self.config.save.compression))?;
        Ok(target)
    }

    /// Deletes the file behind `entry` and drops it from the folder. The
    /// selection moves to the next file when the current one is deleted.
    pub fn delete(&mut self, entry: &Arc<ImageEntry>) -> Result<()> {
        //a staged buffer has nothing on disk to delete
        if !(entry.is_transient() && !entry.exists_on_disk()) {
            fs::remove_file(entry.path()).map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::NotFound(entry.path().to_path_buf()),
                _ => Error::Io(e),
            })?;
        }

        tracing::info!("Deleted {}", entry.path().display());
        entry.unload();

        if self.detached.as_ref().is_some_and(|d| Arc::ptr_eq(d, entry)) {
            self.detached = None;
            self.load_window();
            if let Some(current) = self.current() {
                self.publish(Event::FileChanged(current));
            }
            return Ok(());
        }

        let index = match self.registry.index_of(entry.path()) {
            Some(index) => index,
            None => return Ok(()),
        };

        self.registry.remove(entry.path());
        let len = self.registry.len();
        let was_current = self.current == Some(index);

        self.current = match self.current {
            _ if len == 0 => None,
            Some(current) if current > index => Some(current - 1),
            Some(current) if current == index => Some(current.min(len - 1)),
            other => other,
        };

        self.load_window();
        self.publish(Event::FolderUpdated(self.entries()));
        if was_current {
            if let Some(current) = self.current() {
                self.publish(Event::FileChanged(current));
            }
        }

        Ok(())
    }

    pub fn delete_current(&mut self) -> Result<()> {
        match self.current() {
            Some(entry) => self.delete(&entry),
            None => Ok(()),
        }
    }

    pub fn set_save_dir(&mut self, dir: &Path) -> Result<()> {
        self.save_dir = Some(resolve_dir(dir)?);
        Ok(())
    }

    //Accessors

    pub fn current(&self) -> Option<Arc<ImageEntry>> {
        if let Some(detached) = &self.detached {
            return Some(detached.clone());
        }

        self.current.and_then(|i| self.registry.get(i))
    }

    /// Position of the current file in the folder, `None` when the current
    /// image is not part of the folder listing.
    pub fn current_index(&self) -> Option<usize> {
        match self.detached {
            Some(_) => None,
            None => self.current,
        }
    }

    pub fn entries(&self) -> Arc<[Arc<ImageEntry>]> {
        self.registry.snapshot()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn save_dir(&self) -> Option<&Path> {
        self.save_dir.as_deref()
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn filter(&self) -> &KeywordFilter {
        &self.filter
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    pub fn is_edited(&self) -> bool {
        self.current().is_some_and(|e| e.is_dirty())
    }

    pub fn is_scanning(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn resolve_dir(path: &Path) -> Result<PathBuf> {
    let dir = utils::absolute(path);
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound(dir));
    }

    Ok(utils::resolve(&dir))
}

/// Pixels to edit or save. A downscaled preview is swapped for a full
/// decode, staged edits are full size already.
fn full_pixels_of(
    entry: &ImageEntry,
    options: DecodeOptions,
    codec: &dyn ImageCodec,
) -> Result<Arc<DynamicImage>> {
    if let Some(edited) = entry.edited_image() {
        return Ok(edited);
    }

    match options.max_dimension {
        Some(_) => {
            let full = DecodeOptions {
                max_dimension: None,
                ..options
            };
            Ok(img::load(entry.path(), full, codec)?.pixels)
        }
        None => pixels_of(entry, options, codec),
    }
}

fn file_orientation(entry: &ImageEntry) -> Orientation {
    if let Some(o) = entry.orientation() {
        return o;
    }

    fs::read(entry.path())
        .ok()
        .and_then(|buffer| orientation::read_from(&buffer))
        .unwrap_or_default()
}

/// Pixels to work on: staged edits, the decoded image, or a fresh decode.
fn pixels_of(
    entry: &ImageEntry,
    options: DecodeOptions,
    codec: &dyn ImageCodec,
) -> Result<Arc<DynamicImage>> {
    if entry.is_loading() {
        entry.wait_loaded();
    }

    if let Some(pixels) = entry.image() {
        return Ok(pixels);
    }

    if let Some(cause) = entry.load_error() {
        return Err(Error::Decode {
            path: entry.path().to_path_buf(),
            cause,
        });
    }

    Ok(img::load(entry.path(), options, codec)?.pixels)
}

fn write_entry(
    guard: &SaveGuard,
    target: &Path,
    format: ImageFormat,
    compression: Option<u8>,
    codec: &dyn ImageCodec,
    options: DecodeOptions,
) -> Result<()> {
    let entry = guard.entry();

    let pixels = full_pixels_of(entry, options, codec)?;

    img::save(&pixels, target, format, compression, codec)?;

    let replaces_file = utils::resolve(target) == entry.path();
    entry.mark_saved(pixels, replaces_file);

    tracing::info!("Saved {} -> {}", entry.name(), target.display());
    Ok(())
}

pub fn is_valid_for_preload(preload_nr: usize, image_count: usize) -> bool {
    preload_nr.saturating_mul(2) <= image_count
}

fn get_vec_index_subtracted_by(vec_len: usize, current_index: usize, to_subtract: usize) -> usize {
    if current_index < to_subtract {
        vec_len - (to_subtract - current_index)
    } else {
        current_index - to_subtract
    }
}

fn get_vec_index_sum_by(vec_len: usize, current_index: usize, to_sum: usize) -> usize {
    let mut idx = current_index + to_sum;
    if idx >= vec_len {
        idx = to_sum - (vec_len - current_index);
    }

    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn folder(names: &[&str]) -> TempDir {
        let temp = tempdir().expect("failed to create temp dir");
        for name in names {
            fs::write(temp.path().join(name), b"not decoded in these tests")
                .expect("failed to write test file");
        }
        temp
    }

    fn navigator() -> Navigator {
        let mut config = Config::default();
        config.watch.enabled = false;
        Navigator::new(config)
    }

    fn current_name(nav: &Navigator) -> String {
        nav.current().map(|e| e.name().to_string()).unwrap_or_default()
    }

    #[test]
    fn preload_indexes_wrap_around() {
        assert_eq!(get_vec_index_subtracted_by(10, 0, 1), 9);
        assert_eq!(get_vec_index_subtracted_by(10, 5, 2), 3);
        assert_eq!(get_vec_index_sum_by(10, 9, 1), 0);
        assert_eq!(get_vec_index_sum_by(10, 8, 4), 2);
        assert!(is_valid_for_preload(4, 8));
        assert!(!is_valid_for_preload(4, 7));
        assert!(!is_valid_for_preload(usize::MAX, 7));
    }

    #[test]
    fn missing_directory_is_reported() {
        let temp = tempdir().expect("failed to create temp dir");
        let mut nav = navigator();
        let err = nav
            .load_directory(&temp.path().join("missing"), false)
            .unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound(_)));
        assert!(nav.dir().is_none());
    }

    #[test]
    fn empty_directory_is_not_an_error() {
        let temp = folder(&["notes.txt"]);
        let mut nav = navigator();
        let entries = nav.load_directory(temp.path(), false).expect("load failed");

        assert!(entries.is_empty());
        assert!(nav.current().is_none());
        assert!(nav.next_file().is_none());
    }

    #[test]
    fn steps_are_reduced_modulo_folder_size() {
        let temp = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut nav = navigator();
        nav.load_directory(temp.path(), false).expect("load failed");

        nav.advance(7, WrapPolicy::Clamp);
        assert_eq!(current_name(&nav), "b.jpg");

        nav.advance(-4, WrapPolicy::Wrap);
        assert_eq!(current_name(&nav), "a.jpg");
    }

    #[test]
    fn first_last_and_index() {
        let temp = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut nav = navigator();
        nav.load_directory(temp.path(), false).expect("load failed");

        assert_eq!(nav.last_file().map(|e| e.name().to_string()).as_deref(), Some("c.jpg"));
        assert_eq!(nav.first_file().map(|e| e.name().to_string()).as_deref(), Some("a.jpg"));
        assert!(nav.load_file_at(3).is_none());
        assert_eq!(nav.current_index(), Some(0));
        assert_eq!(nav.load_file_at(1).map(|e| e.name().to_string()).as_deref(), Some("b.jpg"));
    }

    #[test]
    fn set_sort_keeps_the_current_file() {
        let temp = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut nav = navigator();
        nav.load_directory(temp.path(), false).expect("load failed");
        nav.set_current_file(&temp.path().join("a.jpg"))
            .expect("a.jpg is in the folder");

        nav.set_sort(SortKey::Name, SortOrder::Descending);

        let names: Vec<String> = nav.entries().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, ["c.jpg", "b.jpg", "a.jpg"]);
        assert_eq!(current_name(&nav), "a.jpg");
        assert_eq!(nav.current_index(), Some(2));
    }

    #[test]
    fn filtered_out_file_is_shown_detached() {
        let temp = folder(&["a.jpg", "thumb_b.jpg"]);
        let mut config = Config::default();
        config.watch.enabled = false;
        config.filter.ignore_keywords = vec!["thumb".to_string()];
        let mut nav = Navigator::new(config);

        let entry = nav
            .load_file(&temp.path().join("thumb_b.jpg"))
            .expect("load failed")
            .expect("file should be shown");

        assert!(entry.is_transient());
        assert_eq!(nav.len(), 1);
        assert_eq!(nav.current_index(), None);

        //navigating goes back into the folder
        nav.next_file();
        assert_eq!(current_name(&nav), "a.jpg");
    }

    #[test]
    fn folder_keywords_are_dropped_with_the_folder() {
        let first = folder(&["a.jpg"]);
        let second = folder(&["b.jpg"]);
        let mut nav = navigator();
        nav.load_directory(first.path(), true).expect("load failed");

        let mut filter = nav.filter().clone();
        filter.folder_keywords = vec!["raw".to_string()];
        nav.set_filter(filter).expect("filter should compile");
        assert_eq!(nav.filter().folder_keywords.len(), 1);

        nav.load_directory(second.path(), true).expect("load failed");
        assert!(nav.filter().folder_keywords.is_empty());
    }

    #[test]
    fn delete_moves_to_next_file() {
        let temp = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut nav = navigator();
        nav.load_directory(temp.path(), false).expect("load failed");
        nav.load_file_at(1);

        nav.delete_current().expect("delete failed");
        assert!(!temp.path().join("b.jpg").exists());
        assert_eq!(current_name(&nav), "c.jpg");

        nav.delete_current().expect("delete failed");
        assert_eq!(current_name(&nav), "a.jpg");

        nav.delete_current().expect("delete failed");
        assert!(nav.current().is_none());
    }

    #[test]
    fn delete_of_vanished_file_is_not_found() {
        let temp = folder(&["a.jpg"]);
        let mut nav = navigator();
        nav.load_directory(temp.path(), false).expect("load failed");
        let entry = nav.current().expect("a.jpg is current");

        fs::remove_file(entry.path()).expect("failed to delete");
        assert!(matches!(nav.delete(&entry), Err(Error::NotFound(_))));
        assert_eq!(nav.len(), 1);
    }

    #[test]
    fn save_dir_must_exist() {
        let temp = tempdir().expect("failed to create temp dir");
        let mut nav = navigator();
        assert!(nav.set_save_dir(&temp.path().join("nope")).is_err());
        nav.set_save_dir(temp.path()).expect("temp dir exists");
        assert_eq!(nav.save_dir(), Some(utils::resolve(temp.path()).as_path()));
    }

    #[test]
    fn unknown_format_is_rejected_before_saving() {
        let nav = navigator();
        let entry = Arc::new(ImageEntry::from_pixels(
            DynamicImage::new_rgb8(1, 1),
            Path::new("/tmp/never.xyz"),
        ));

        let err = nav
            .save(&entry, Path::new("/tmp/never.xyz"), "xyz", None)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert!(entry.is_dirty());
    }
}
