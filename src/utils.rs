use std::{
    env, fs,
    path::{Path, PathBuf},
};

///Return true if directory starts with '.'
pub fn is_dir_hidden(path: &Path) -> bool {
    path.file_name()
        .unwrap_or_default()
        .to_str()
        .unwrap_or_default()
        .starts_with('.')
}

pub fn absolute(path: &Path) -> PathBuf {
    if path.has_root() {
        return path.to_path_buf();
    }

    match env::current_dir() {
        Ok(current_dir) => current_dir.join(path.strip_prefix(".").unwrap_or(path)),
        Err(_) => path.to_path_buf(),
    }
}

/// The identity of a file inside a folder state. Falls back to the absolute
/// path when the file is gone and can't be canonicalized anymore.
pub fn resolve(path: &Path) -> PathBuf {
    match fs::canonicalize(path) {
        Ok(path) => path,
        Err(_) => {
            //keep deleted files comparable with the entries we scanned earlier
            let absolute = absolute(path);
            match (absolute.parent(), absolute.file_name()) {
                (Some(parent), Some(name)) => match fs::canonicalize(parent) {
                    Ok(parent) => parent.join(name),
                    Err(_) => absolute,
                },
                _ => absolute,
            }
        }
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .to_string()
}
