use std::{cmp::Ordering, path::Path, time::SystemTime};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    Name,
    DateModified,
    FileSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Anything that can be ordered in a folder listing.
pub trait Sortable {
    fn path(&self) -> &Path;
    fn file_name(&self) -> &str;
    fn file_size(&self) -> u64;
    fn modified(&self) -> Option<SystemTime>;
}

/// Returns the items ordered by `key`.
///
/// Ties are broken by name and finally by full path, so the result is a total
/// order and the same input always sorts the same way. `order` only flips the
/// primary key.
pub fn sort<T: Sortable + Clone>(items: &[T], key: SortKey, order: SortOrder) -> Vec<T> {
    let mut sorted = items.to_vec();
    sort_in_place(&mut sorted, key, order);
    sorted
}

pub fn sort_in_place<T: Sortable>(items: &mut [T], key: SortKey, order: SortOrder) {
    items.sort_by(|a, b| compare(a, b, key, order));
}

pub fn compare<T: Sortable>(a: &T, b: &T, key: SortKey, order: SortOrder) -> Ordering {
    let primary = match key {
        SortKey::Name => compare_names(a, b),
        SortKey::DateModified => modified_or_epoch(a).cmp(&modified_or_epoch(b)),
        SortKey::FileSize => a.file_size().cmp(&b.file_size()),
    };

    let primary = match order {
        SortOrder::Ascending => primary,
        SortOrder::Descending => primary.reverse(),
    };

    primary
        .then_with(|| compare_names(a, b))
        .then_with(|| a.path().cmp(b.path()))
}

fn compare_names<T: Sortable>(a: &T, b: &T) -> Ordering {
    a.file_name()
        .to_lowercase()
        .cmp(&b.file_name().to_lowercase())
}

fn modified_or_epoch<T: Sortable>(item: &T) -> SystemTime {
    item.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[derive(Clone, Debug)]
    struct File {
        path: PathBuf,
        name: String,
        size: u64,
        modified: Option<SystemTime>,
    }

    impl Sortable for File {
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

    fn file(dir: &str, name: &str, size: u64, secs: u64) -> File {
        File {
            path: PathBuf::from(dir).join(name),
            name: name.to_string(),
            size,
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    fn names(files: &[File]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn name_sort_ignores_case() {
        let files = vec![
            file("/d", "b.jpg", 1, 1),
            file("/d", "A.jpg", 1, 1),
            file("/d", "c.jpg", 1, 1),
        ];
        let sorted = sort(&files, SortKey::Name, SortOrder::Ascending);
        assert_eq!(names(&sorted), vec!["A.jpg", "b.jpg", "c.jpg"]);

        let sorted = sort(&files, SortKey::Name, SortOrder::Descending);
        assert_eq!(names(&sorted), vec!["c.jpg", "b.jpg", "A.jpg"]);
    }

    #[test]
    fn date_sort_breaks_ties_by_name() {
        let files = vec![
            file("/d", "z.jpg", 1, 10),
            file("/d", "b.jpg", 1, 20),
            file("/d", "a.jpg", 1, 20),
        ];
        let sorted = sort(&files, SortKey::DateModified, SortOrder::Ascending);
        assert_eq!(names(&sorted), vec!["z.jpg", "a.jpg", "b.jpg"]);

        //the tie-break stays ascending when the primary key is reversed
        let sorted = sort(&files, SortKey::DateModified, SortOrder::Descending);
        assert_eq!(names(&sorted), vec!["a.jpg", "b.jpg", "z.jpg"]);
    }

    #[test]
    fn size_sort() {
        let files = vec![
            file("/d", "big.jpg", 300, 1),
            file("/d", "small.jpg", 10, 1),
            file("/d", "mid.jpg", 100, 1),
        ];
        let sorted = sort(&files, SortKey::FileSize, SortOrder::Ascending);
        assert_eq!(names(&sorted), vec!["small.jpg", "mid.jpg", "big.jpg"]);
    }

    #[test]
    fn same_name_in_different_folders_is_still_total() {
        let files = vec![file("/d/2", "a.jpg", 1, 1), file("/d/1", "a.jpg", 1, 1)];
        let sorted = sort(&files, SortKey::Name, SortOrder::Ascending);
        assert_eq!(sorted[0].path, PathBuf::from("/d/1/a.jpg"));

        let again = sort(&sorted, SortKey::Name, SortOrder::Ascending);
        assert_eq!(again[0].path, sorted[0].path);
    }

    #[test]
    fn missing_dates_sort_first() {
        let mut undated = file("/d", "x.jpg", 1, 0);
        undated.modified = None;
        let files = vec![file("/d", "a.jpg", 1, 5), undated];
        let sorted = sort(&files, SortKey::DateModified, SortOrder::Ascending);
        assert_eq!(names(&sorted), vec!["x.jpg", "a.jpg"]);
    }
}
