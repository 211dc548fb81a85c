use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::SystemTime,
};

use image::DynamicImage;
use uuid::Uuid;

use crate::{
    crawler::ScannedFile,
    error::{Error, Result},
    image::{self as img, DecodeOptions, ImageCodec, LoadedImage},
    orientation::Orientation,
    sort::Sortable,
    utils,
};

pub enum LoadState {
    Unloaded,
    Loading(JoinHandle<Result<LoadedImage>>),
    Loaded(LoadedImage),
    ///Decoding failed, the reason is kept so the viewer can show it
    Unloadable(String),
}

/// What finishing a background decode produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default)]
struct FileStats {
    size: u64,
    modified: Option<SystemTime>,
}

struct EntryState {
    load: LoadState,
    edited: Option<Arc<DynamicImage>>,
    //orientation the edited pixels were turned to, relative to the raw file
    edited_orientation: Option<Orientation>,
    dirty: bool,
    stats: FileStats,
}

/// One image of a folder: its identity on disk and the pixels we hold for it.
///
/// Entries are shared as `Arc<ImageEntry>`; everything that changes lives
/// behind a mutex so readers never see a half updated entry.
pub struct ImageEntry {
    id: Uuid,
    path: PathBuf,
    name: String,
    dir: PathBuf,
    transient: bool,
    state: Mutex<EntryState>,
    saving: AtomicBool,
}

impl ImageEntry {
    pub fn new(path: &Path, size: u64, modified: Option<SystemTime>) -> ImageEntry {
        Self::build(path, FileStats { size, modified }, false)
    }

    pub fn from_scanned(file: &ScannedFile) -> ImageEntry {
        Self::new(&file.path, file.size, file.modified)
    }

    /// Entry that isn't part of a folder scan, e.g. a dropped file from
    /// somewhere else.
    pub fn transient(path: &Path) -> ImageEntry {
        let stats = match path.metadata() {
            Ok(m) => FileStats {
                size: m.len(),
                modified: m.modified().ok(),
            },
            Err(_) => FileStats::default(),
        };
        Self::build(path, stats, true)
    }

    /// Entry for pixels with no file behind them yet (pasted or generated).
    /// `path` is where a plain save will write it.
    pub fn from_pixels(pixels: DynamicImage, path: &Path) -> ImageEntry {
        let entry = Self::build(path, FileStats::default(), true);
        entry.stage_edit(pixels);
        entry
    }

    fn build(path: &Path, stats: FileStats, transient: bool) -> ImageEntry {
        ImageEntry {
            id: Uuid::new_v4(),
            path: path.to_path_buf(),
            name: utils::file_name(path),
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            transient,
            state: Mutex::new(EntryState {
                load: LoadState::Unloaded,
                edited: None,
                edited_orientation: None,
                dirty: false,
                stats,
            }),
            saving: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, EntryState> {
        //a panicking decode thread can't leave the state half written, keep going
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn exists_on_disk(&self) -> bool {
        self.path.is_file()
    }

    pub fn size(&self) -> u64 {
        self.state().stats.size
    }

    pub fn modified_time(&self) -> Option<SystemTime> {
        self.state().stats.modified
    }

    pub(crate) fn update_stats(&self, size: u64, modified: Option<SystemTime>) {
        let mut state = self.state();
        let changed = state.stats.size != size || state.stats.modified != modified;
        state.stats = FileStats { size, modified };

        //the file changed under us, the decoded pixels are stale
        if changed && matches!(state.load, LoadState::Loaded(_) | LoadState::Unloadable(_)) {
            tracing::debug!("{} -> Changed on disk, dropping decoded image", self.name);
            state.load = LoadState::Unloaded;
        }
    }

    /// Starts decoding on a background thread unless the image is loaded,
    /// loading or known to be broken.
    pub fn load(&self, options: DecodeOptions, codec: Arc<dyn ImageCodec>) {
        let mut state = self.state();
        if !matches!(state.load, LoadState::Unloaded) {
            return;
        }

        if self.transient && !self.path.is_file() {
            return;
        }

        tracing::debug!("{} -> Loading image", self.name);
        let path = self.path.clone();
        state.load = LoadState::Loading(thread::spawn(move || {
            img::load(&path, options, codec.as_ref())
        }));
    }

    /// Drops decoded pixels and forgets a pending decode. Staged edits are
    /// kept, they only go away with a save or [`ImageEntry::discard_edits`].
    pub fn unload(&self) {
        let mut state = self.state();
        if matches!(state.load, LoadState::Loaded(_) | LoadState::Loading(_)) {
            tracing::debug!("{} -> Unloading image", self.name);
        }

        state.load = LoadState::Unloaded;
    }

    /// Forgets everything including a failed decode so the next load retries.
    pub fn reload(&self, options: DecodeOptions, codec: Arc<dyn ImageCodec>) {
        self.unload();
        self.load(options, codec);
    }

    /// Collects a finished background decode. `None` while nothing finished.
    pub fn finish_loading(&self) -> Option<LoadOutcome> {
        let mut state = self.state();

        let handle = match std::mem::replace(&mut state.load, LoadState::Unloaded) {
            LoadState::Loading(handle) if handle.is_finished() => handle,
            other => {
                state.load = other;
                return None;
            }
        };

        Some(Self::store_result(&mut state, &self.name, handle))
    }

    /// Blocks until a pending decode is done.
    pub fn wait_loaded(&self) -> Option<LoadOutcome> {
        let handle = {
            let mut state = self.state();
            match std::mem::replace(&mut state.load, LoadState::Unloaded) {
                LoadState::Loading(handle) => handle,
                other => {
                    state.load = other;
                    return None;
                }
            }
        };

        //join without holding the lock, readers keep working meanwhile
        let result = handle.join();
        let mut state = self.state();
        Some(Self::store_joined(&mut state, &self.name, result))
    }

    fn store_result(
        state: &mut EntryState,
        name: &str,
        handle: JoinHandle<Result<LoadedImage>>,
    ) -> LoadOutcome {
        Self::store_joined(state, name, handle.join())
    }

    fn store_joined(
        state: &mut EntryState,
        name: &str,
        result: thread::Result<Result<LoadedImage>>,
    ) -> LoadOutcome {
        match result {
            Ok(Ok(loaded)) => {
                state.load = LoadState::Loaded(loaded);
                LoadOutcome::Loaded
            }
            Ok(Err(e)) => {
                tracing::warn!("{name} -> Failure loading image: {e}");
                state.load = LoadState::Unloadable(e.to_string());
                LoadOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::error!("{name} -> Failure joining load image thread");
                let reason = String::from("image decoder panicked");
                state.load = LoadState::Unloadable(reason.clone());
                LoadOutcome::Failed(reason)
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state().load, LoadState::Loading(_))
    }

    pub fn is_loaded(&self) -> bool {
        let state = self.state();
        state.edited.is_some() || matches!(state.load, LoadState::Loaded(_))
    }

    /// The decode failure, if the image could not be opened.
    pub fn load_error(&self) -> Option<String> {
        match &self.state().load {
            LoadState::Unloadable(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Pixels to display: staged edits win over the decoded file.
    pub fn image(&self) -> Option<Arc<DynamicImage>> {
        let state = self.state();
        if let Some(edited) = &state.edited {
            return Some(edited.clone());
        }

        match &state.load {
            LoadState::Loaded(loaded) => Some(loaded.pixels.clone()),
            _ => None,
        }
    }

    pub fn edited_image(&self) -> Option<Arc<DynamicImage>> {
        self.state().edited.clone()
    }

    pub fn orientation(&self) -> Option<Orientation> {
        match &self.state().load {
            LoadState::Loaded(loaded) => loaded.orientation,
            _ => None,
        }
    }

    pub fn stage_edit(&self, pixels: DynamicImage) {
        let mut state = self.state();
        state.edited = Some(Arc::new(pixels));
        state.dirty = true;
    }

    /// Stages pixels that were re-oriented to `orientation`. Later edits
    /// keep that orientation until they are saved over the file or dropped.
    pub fn stage_orientation(&self, pixels: DynamicImage, orientation: Orientation) {
        let mut state = self.state();
        state.edited = Some(Arc::new(pixels));
        state.edited_orientation = Some(orientation);
        state.dirty = true;
    }

    pub fn edited_orientation(&self) -> Option<Orientation> {
        self.state().edited_orientation
    }

    pub fn discard_edits(&self) {
        let mut state = self.state();
        state.edited = None;
        state.edited_orientation = None;
        state.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    /// A save of `saved` went through. When it overwrote the entry's own
    /// file the saved pixels become the decoded image, otherwise the edits
    /// stay staged but count as saved.
    pub(crate) fn mark_saved(&self, saved: Arc<DynamicImage>, replaces_file: bool) {
        let mut state = self.state();
        let still_current = state
            .edited
            .as_ref()
            .map_or(true, |edited| Arc::ptr_eq(edited, &saved));

        //edits staged while the save ran stay dirty
        if !still_current {
            return;
        }

        state.dirty = false;
        if replaces_file {
            state.edited = None;
            state.edited_orientation = None;
            state.load = LoadState::Loaded(LoadedImage {
                pixels: saved,
                orientation: None,
                format: ::image::ImageFormat::from_path(&self.path).ok(),
            });
        }
    }

    /// Claims the entry for a save. Only one save may run per entry.
    pub fn begin_save(self: &Arc<Self>) -> Result<SaveGuard> {
        if self
            .saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SaveInProgress(self.path.clone()));
        }

        Ok(SaveGuard {
            entry: self.clone(),
        })
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ImageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageEntry")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("transient", &self.transient)
            .finish()
    }
}

impl Sortable for Arc<ImageEntry> {
    fn path(&self) -> &Path {
        &self.path
    }

    fn file_name(&self) -> &str {
        &self.name
    }

    fn file_size(&self) -> u64 {
        self.size()
    }

    fn modified(&self) -> Option<SystemTime> {
        self.modified_time()
    }
}

/// Releases the entry's save slot when dropped.
#[derive(Debug)]
pub struct SaveGuard {
    entry: Arc<ImageEntry>,
}

impl SaveGuard {
    pub fn entry(&self) -> &Arc<ImageEntry> {
        &self.entry
    }
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.entry.saving.store(false, Ordering::Release);
    }
}
