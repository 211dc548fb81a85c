use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{crawler::ScannedFile, entry::ImageEntry, utils};

/// Ordered, deduplicated entries of one folder. Lookup by position and by
/// resolved path are both constant time.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    entries: Vec<Arc<ImageEntry>>,
    by_path: HashMap<PathBuf, usize>,
}

impl ImageRegistry {
    pub fn new() -> ImageRegistry {
        ImageRegistry::default()
    }

    /// Returns the entry for `path`, creating and appending it if it doesn't
    /// exist yet. Calling it twice gives back the same entry.
    pub fn upsert(&mut self, path: &Path) -> Arc<ImageEntry> {
        let path = utils::resolve(path);
        if let Some(&index) = self.by_path.get(&path) {
            return self.entries[index].clone();
        }

        let entry = Arc::new(ImageEntry::transient(&path));
        self.push(entry.clone());
        entry
    }

    fn push(&mut self, entry: Arc<ImageEntry>) {
        self.by_path
            .insert(entry.path().to_path_buf(), self.entries.len());
        self.entries.push(entry);
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        if let Some(&index) = self.by_path.get(path) {
            return Some(index);
        }

        self.by_path.get(&utils::resolve(path)).copied()
    }

    pub fn find(&self, path: &Path) -> Option<Arc<ImageEntry>> {
        self.index_of(path).map(|i| self.entries[i].clone())
    }

    pub fn get(&self, index: usize) -> Option<Arc<ImageEntry>> {
        self.entries.get(index).cloned()
    }

    /// Removes the entry for `path`, shifting later entries down by one.
    pub fn remove(&mut self, path: &Path) -> bool {
        let index = match self.index_of(path) {
            Some(i) => i,
            None => return false,
        };

        self.entries.remove(index);
        self.reindex();
        true
    }

    /// Replaces the content with a fresh scan. Entries for paths that were
    /// already present are kept so their decoded pixels survive.
    pub fn replace_all(&mut self, files: &[ScannedFile]) {
        let mut previous: HashMap<PathBuf, Arc<ImageEntry>> = self
            .entries
            .drain(..)
            .map(|e| (e.path().to_path_buf(), e))
            .collect();

        self.entries = files
            .iter()
            .map(|file| match previous.remove(&file.path) {
                Some(entry) => {
                    entry.update_stats(file.size, file.modified);
                    entry
                }
                None => Arc::new(ImageEntry::from_scanned(file)),
            })
            .collect();

        //a scan can in theory report a path twice through links, keep the first
        let mut seen = HashSet::with_capacity(self.entries.len());
        self.entries.retain(|e| seen.insert(e.path().to_path_buf()));

        for stale in previous.values() {
            stale.unload();
        }

        self.reindex();
    }

    /// Reorders the entries, `order` holds the new position of every entry.
    pub fn reorder(&mut self, order: Vec<Arc<ImageEntry>>) {
        debug_assert_eq!(order.len(), self.entries.len());
        self.entries = order;
        self.reindex();
    }

    pub fn clear(&mut self) {
        for entry in &self.entries {
            entry.unload();
        }
        self.entries.clear();
        self.reindex();
    }

    fn reindex(&mut self) {
        self.by_path = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.path().to_path_buf(), i))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ImageEntry>> {
        self.entries.iter()
    }

    /// Read only copy of the current order. Later changes never show up in
    /// a snapshot that was already handed out.
    pub fn snapshot(&self) -> Arc<[Arc<ImageEntry>]> {
        self.entries.clone().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn scanned(path: &Path, size: u64) -> ScannedFile {
        ScannedFile {
            path: path.to_path_buf(),
            name: utils::file_name(path),
            size,
            modified: None,
        }
    }

    #[test]
    fn upsert_twice_gives_one_entry() {
        let temp = tempdir().expect("failed to create temp dir");
        let path = temp.path().join("a.jpg");
        fs::write(&path, b"x").expect("failed to write");

        let mut registry = ImageRegistry::new();
        let first = registry.upsert(&path);
        let second = registry.upsert(&path);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.index_of(&path), Some(0));
    }

    #[test]
    fn upsert_resolves_relative_spellings() {
        let temp = tempdir().expect("failed to create temp dir");
        fs::create_dir(temp.path().join("sub")).expect("failed to create dir");
        let path = temp.path().join("a.jpg");
        fs::write(&path, b"x").expect("failed to write");

        let mut registry = ImageRegistry::new();
        registry.upsert(&path);
        registry.upsert(&temp.path().join("sub").join("..").join("a.jpg"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_shifts_indexes() {
        let mut registry = ImageRegistry::new();
        registry.replace_all(&[
            scanned(Path::new("/r/a.jpg"), 1),
            scanned(Path::new("/r/b.jpg"), 1),
            scanned(Path::new("/r/c.jpg"), 1),
        ]);

        assert!(registry.remove(Path::new("/r/b.jpg")));
        assert!(!registry.remove(Path::new("/r/b.jpg")));
        assert_eq!(registry.index_of(Path::new("/r/c.jpg")), Some(1));
        assert_eq!(registry.index_of(Path::new("/r/b.jpg")), None);
    }

    #[test]
    fn replace_all_keeps_surviving_entries() {
        let mut registry = ImageRegistry::new();
        registry.replace_all(&[
            scanned(Path::new("/r/a.jpg"), 1),
            scanned(Path::new("/r/b.jpg"), 1),
        ]);
        let a = registry.get(0).expect("entry a");

        registry.replace_all(&[
            scanned(Path::new("/r/0.jpg"), 1),
            scanned(Path::new("/r/a.jpg"), 1),
        ]);

        assert_eq!(registry.len(), 2);
        assert!(Arc::ptr_eq(&a, &registry.get(1).expect("entry a")));
        assert!(registry.find(Path::new("/r/b.jpg")).is_none());
    }

    #[test]
    fn snapshots_are_frozen() {
        let mut registry = ImageRegistry::new();
        registry.replace_all(&[scanned(Path::new("/r/a.jpg"), 1)]);
        let before = registry.snapshot();

        registry.replace_all(&[
            scanned(Path::new("/r/a.jpg"), 1),
            scanned(Path::new("/r/b.jpg"), 1),
        ]);

        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);
    }
}
