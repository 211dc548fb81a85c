use std::path::{Component, Path};

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Keyword filters applied to scanned file names.
///
/// Keywords match anywhere in the name, ignore case and accept `*` and `?`
/// as wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordFilter {
    ///Files whose name contains any of these are dropped
    #[serde(default)]
    pub ignore_keywords: Vec<String>,
    ///When not empty, files must contain every one of these
    #[serde(default)]
    pub keywords: Vec<String>,
    ///Files inside folders matching any of these are dropped
    #[serde(default)]
    pub folder_keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn is_empty(&self) -> bool {
        self.ignore_keywords.is_empty() && self.keywords.is_empty() && self.folder_keywords.is_empty()
    }

    pub fn compile(&self) -> Result<CompiledFilter> {
        Ok(CompiledFilter {
            ignore: build_set(&self.ignore_keywords)?,
            keywords: self
                .keywords
                .iter()
                .filter(|k| !k.trim().is_empty())
                .map(|k| Regex::new(&keyword_pattern(k)).map_err(|e| Error::Config(e.to_string())))
                .collect::<Result<Vec<Regex>>>()?,
            folders: build_set(&self.folder_keywords)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    ignore: Option<RegexSet>,
    keywords: Vec<Regex>,
    folders: Option<RegexSet>,
}

impl CompiledFilter {
    /// `root` is the scanned directory, folder keywords only look at the
    /// folders below it.
    pub fn accepts(&self, path: &Path, root: &Path) -> bool {
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy();

        if let Some(ignore) = &self.ignore {
            if ignore.is_match(&name) {
                return false;
            }
        }

        if !self.keywords.iter().all(|k| k.is_match(&name)) {
            return false;
        }

        if let Some(folders) = &self.folders {
            let parent = path.parent().unwrap_or(Path::new(""));
            let relative = parent.strip_prefix(root).unwrap_or(parent);
            let in_filtered_folder = relative.components().any(|c| match c {
                Component::Normal(folder) => folders.is_match(&folder.to_string_lossy()),
                _ => false,
            });

            if in_filtered_folder {
                return false;
            }
        }

        true
    }
}

fn build_set(keywords: &[String]) -> Result<Option<RegexSet>> {
    let patterns: Vec<String> = keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| keyword_pattern(k))
        .collect();

    if patterns.is_empty() {
        return Ok(None);
    }

    RegexSet::new(patterns)
        .map(Some)
        .map_err(|e| Error::Config(e.to_string()))
}

fn keyword_pattern(keyword: &str) -> String {
    let escaped = regex::escape(keyword.trim())
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    format!("(?i){escaped}")
}
