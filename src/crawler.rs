use std::{
    fs,
    path::{Path, PathBuf},
    time::{Instant, SystemTime},
};

use walkdir::{DirEntry, WalkDir};

use crate::{
    error::{Error, Result},
    filters::KeywordFilter,
    formats::FormatRegistry,
    sort::{self, SortKey, SortOrder, Sortable},
    utils,
};

/// A matching file found by a scan, with what sorting needs from its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Sortable for ScannedFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn file_name(&self) -> &str {
        &self.name
    }

    fn file_size(&self) -> u64 {
        self.size
    }

    fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

/// Everything that decides which files a folder scan keeps and in what order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub dir: PathBuf,
    pub recursive: bool,
    pub filter: KeywordFilter,
    pub sort_key: SortKey,
    pub sort_order: SortOrder,
}

impl ScanRequest {
    pub fn new(dir: &Path) -> ScanRequest {
        ScanRequest {
            dir: dir.to_path_buf(),
            recursive: false,
            filter: KeywordFilter::default(),
            sort_key: SortKey::default(),
            sort_order: SortOrder::default(),
        }
    }
}

pub fn crawl(request: &ScanRequest, formats: &FormatRegistry) -> Result<Vec<ScannedFile>> {
    crawl_cancellable(request, formats, &|| false).map(|files| files.unwrap_or_default())
}

/// Scans, filters and sorts. Returns `Ok(None)` when `is_cancelled` fires
/// before the scan is done.
pub fn crawl_cancellable(
    request: &ScanRequest,
    formats: &FormatRegistry,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<Option<Vec<ScannedFile>>> {
    let now = Instant::now();

    if !request.dir.is_dir() {
        return Err(Error::DirectoryNotFound(request.dir.clone()));
    }

    let root = fs::canonicalize(&request.dir)
        .map_err(|_| Error::DirectoryNotFound(request.dir.clone()))?;
    let filter = request.filter.compile()?;

    let mut walker = WalkDir::new(&root).min_depth(1);
    if !request.recursive {
        walker = walker.max_depth(1);
    }

    let mut files: Vec<ScannedFile> = Vec::new();

    for entry in walker.into_iter().filter_entry(|e| !is_hidden_dir(e)) {
        if is_cancelled() {
            tracing::debug!("Scan of {} cancelled", root.display());
            return Ok(None);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                //unreadable subfolders shouldn't sink the whole scan
                if e.depth() == 0 {
                    return Err(Error::Io(e.into()));
                }
                tracing::warn!("Failure reading file info -> {e}");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !formats.is_readable(path) || !filter.accepts(path, &root) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Failure reading metadata of {} -> {e}", path.display());
                continue;
            }
        };

        files.push(ScannedFile {
            path: path.to_path_buf(),
            name: entry.file_name().to_string_lossy().to_string(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }

    sort::sort_in_place(&mut files, request.sort_key, request.sort_order);

    tracing::debug!(
        "{} -> Spent {}ms scanning {} files",
        root.display(),
        now.elapsed().as_millis(),
        files.len()
    );

    Ok(Some(files))
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && utils::is_dir_hidden(entry.path())
}

/// Resolves a user supplied path into the folder to scan and, if a file was
/// given, the file to select in it.
pub fn resolve_start(path: &Path) -> Result<(PathBuf, Option<PathBuf>)> {
    let path = utils::absolute(path);

    if path.is_dir() {
        return Ok((utils::resolve(&path), None));
    }

    if !path.is_file() {
        return Err(Error::NotFound(path));
    }

    let file = utils::resolve(&path);
    match file.parent() {
        Some(parent) => Ok((parent.to_path_buf(), Some(file.clone()))),
        None => Err(Error::DirectoryNotFound(file)),
    }
}
