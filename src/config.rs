use crate::{
    error::{Error, Result},
    filters::KeywordFilter,
    image::{DecodeOptions, DEFAULT_JPEG_QUALITY},
    navigator::WrapPolicy,
    sort::{SortKey, SortOrder},
    APPLICATION, ORGANIZATION, QUALIFIER,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Deserialize, Serialize, Default, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub sort: SortConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub save: SaveConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct NavigationConfig {
    ///Used by next/previous when the caller doesn't pick a policy
    #[serde(default = "default_wrap")]
    pub wrap: WrapPolicy,
    #[serde(default = "default_nr_loaded_images")]
    pub nr_loaded_images: usize,
    #[serde(default = "default_should_wait")]
    pub should_wait: bool,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct SortConfig {
    #[serde(default)]
    pub key: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct FilterConfig {
    #[serde(default = "default_keywords")]
    pub ignore_keywords: Vec<String>,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SaveConfig {
    ///0 keeps the most detail, 100 makes the smallest files
    #[serde(default = "default_compression")]
    pub compression: u8,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct WatchConfig {
    #[serde(default = "default_watch_enabled")]
    pub enabled: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DecodeConfig {
    #[serde(default = "default_max_dimension")]
    pub max_dimension: Option<u32>,
    #[serde(default = "default_auto_orient")]
    pub auto_orient: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        NavigationConfig {
            wrap: default_wrap(),
            nr_loaded_images: default_nr_loaded_images(),
            should_wait: default_should_wait(),
            recursive: default_recursive(),
        }
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        SaveConfig {
            compression: default_compression(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            enabled: default_watch_enabled(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        DecodeConfig {
            max_dimension: default_max_dimension(),
            auto_orient: default_auto_orient(),
        }
    }
}

impl FilterConfig {
    pub fn keyword_filter(&self) -> KeywordFilter {
        KeywordFilter {
            ignore_keywords: self.ignore_keywords.clone(),
            keywords: self.keywords.clone(),
            folder_keywords: vec![],
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl DecodeConfig {
    pub fn options(&self) -> DecodeOptions {
        DecodeOptions {
            max_dimension: self.max_dimension,
            auto_orient: self.auto_orient,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Self::fetch_cfg()
    }

    pub fn path() -> Option<PathBuf> {
        directories::ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Reads the user's config.json, anything wrong with it means defaults.
    pub fn fetch_cfg() -> Config {
        let cfg_path = match Self::path() {
            Some(path) => path,
            None => return Config::default(),
        };

        tracing::info!("Reading config -> {}", cfg_path.display());

        match Self::load_from_path(&cfg_path) {
            Ok(cfg) => {
                tracing::debug!("Using config: {cfg:?}");
                cfg
            }
            Err(e) => {
                tracing::warn!("{e}, using defaults");
                Config::default()
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Config> {
        let config_json = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failure reading config file -> {e}")))?;

        serde_json::from_str(&config_json)
            .map_err(|e| Error::Config(format!("failure parsing config json -> {e}")))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failure serializing config -> {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }
}

//Navigation
pub fn default_wrap() -> WrapPolicy {
    WrapPolicy::Wrap
}
pub fn default_nr_loaded_images() -> usize {
    4
}
pub fn default_should_wait() -> bool {
    false
}
pub fn default_recursive() -> bool {
    false
}

//Filter
pub fn default_keywords() -> Vec<String> {
    vec![]
}

//Save
pub fn default_compression() -> u8 {
    100 - DEFAULT_JPEG_QUALITY
}

//Watch
pub fn default_watch_enabled() -> bool {
    true
}
pub fn default_debounce_ms() -> u64 {
    500
}

//Decode
pub fn default_max_dimension() -> Option<u32> {
    None
}
pub fn default_auto_orient() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempdir().expect("failed to create temp dir");
        let path = temp.path().join("config.json");
        fs::write(
            &path,
            r#"{ "navigation": { "wrap": "Clamp" }, "sort": { "key": "FileSize" } }"#,
        )
        .expect("failed to write config");

        let cfg = Config::load_from_path(&path).expect("config should parse");
        assert_eq!(cfg.navigation.wrap, WrapPolicy::Clamp);
        assert_eq!(cfg.navigation.nr_loaded_images, 4);
        assert_eq!(cfg.sort.key, SortKey::FileSize);
        assert_eq!(cfg.sort.order, SortOrder::Ascending);
        assert!(cfg.watch.enabled);
        assert_eq!(cfg.save.compression, 10);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let temp = tempdir().expect("failed to create temp dir");
        let path = temp.path().join("config.json");
        fs::write(&path, "{ nope").expect("failed to write config");

        assert!(matches!(Config::load_from_path(&path), Err(Error::Config(_))));
        assert!(matches!(
            Config::load_from_path(&temp.path().join("missing.json")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn save_then_load_gives_the_same_config() {
        let temp = tempdir().expect("failed to create temp dir");
        let path = temp.path().join("nested").join("config.json");

        let mut cfg = Config::default();
        cfg.filter.ignore_keywords = vec!["thumb".to_string()];
        cfg.decode.max_dimension = Some(2048);
        cfg.save_to_path(&path).expect("save failed");

        assert_eq!(Config::load_from_path(&path).expect("load failed"), cfg);
    }

    #[test]
    fn filter_config_never_carries_folder_keywords() {
        let cfg = FilterConfig {
            ignore_keywords: vec!["a".into()],
            keywords: vec![],
        };
        assert!(cfg.keyword_filter().folder_keywords.is_empty());
    }
}
