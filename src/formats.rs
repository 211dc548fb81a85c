use std::{
    path::Path,
    sync::{Arc, OnceLock},
};

use image::ImageFormat;

use crate::error::{Error, Result};

/// One row of the format table. An extension may be readable, writable or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatEntry {
    pub extension: &'static str,
    pub format: ImageFormat,
    pub readable: bool,
    pub writable: bool,
}

impl FormatEntry {
    pub const fn new(
        extension: &'static str,
        format: ImageFormat,
        readable: bool,
        writable: bool,
    ) -> FormatEntry {
        FormatEntry {
            extension,
            format,
            readable,
            writable,
        }
    }
}

pub const DEFAULT_FORMATS: &[FormatEntry] = &[
    FormatEntry::new("jpg", ImageFormat::Jpeg, true, true),
    FormatEntry::new("jpeg", ImageFormat::Jpeg, true, true),
    FormatEntry::new("jpe", ImageFormat::Jpeg, true, false),
    FormatEntry::new("png", ImageFormat::Png, true, true),
    FormatEntry::new("webp", ImageFormat::WebP, true, true),
    FormatEntry::new("gif", ImageFormat::Gif, true, true),
    FormatEntry::new("bmp", ImageFormat::Bmp, true, true),
    FormatEntry::new("tif", ImageFormat::Tiff, true, true),
    FormatEntry::new("tiff", ImageFormat::Tiff, true, true),
    FormatEntry::new("ico", ImageFormat::Ico, true, true),
    FormatEntry::new("tga", ImageFormat::Tga, true, true),
    FormatEntry::new("ppm", ImageFormat::Pnm, true, true),
    FormatEntry::new("pgm", ImageFormat::Pnm, true, true),
    FormatEntry::new("pbm", ImageFormat::Pnm, true, true),
    FormatEntry::new("qoi", ImageFormat::Qoi, true, true),
    FormatEntry::new("hdr", ImageFormat::Hdr, true, false),
    FormatEntry::new("exr", ImageFormat::OpenExr, true, true),
    FormatEntry::new("dds", ImageFormat::Dds, true, false),
    //encoder only in the default image features
    FormatEntry::new("avif", ImageFormat::Avif, false, true),
];

static GLOBAL: OnceLock<Arc<FormatRegistry>> = OnceLock::new();

/// Immutable table of the formats we can open and save.
///
/// Built once at startup and handed to the navigator; nothing reads it as
/// ambient state.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    entries: Vec<FormatEntry>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        FormatRegistry::new(DEFAULT_FORMATS.to_vec())
    }
}

impl FormatRegistry {
    pub fn new(entries: Vec<FormatEntry>) -> FormatRegistry {
        FormatRegistry { entries }
    }

    pub fn global() -> Arc<FormatRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(FormatRegistry::default()))
            .clone()
    }

    pub fn lookup(&self, extension: &str) -> Option<&FormatEntry> {
        let extension = extension.trim_start_matches('.').to_lowercase();
        self.entries.iter().find(|e| e.extension == extension)
    }

    pub fn is_readable(&self, path: &Path) -> bool {
        match extension_of(path) {
            Some(ext) => self.lookup(&ext).is_some_and(|e| e.readable),
            None => false,
        }
    }

    /// Resolves the writer for a format name or extension ("png", ".JPG").
    pub fn writer_for(&self, format: &str) -> Result<ImageFormat> {
        match self.lookup(format) {
            Some(entry) if entry.writable => Ok(entry.format),
            _ => Err(Error::UnsupportedFormat(format.to_string())),
        }
    }

    pub fn readable_extensions(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|e| e.readable)
            .map(|e| e.extension)
            .collect()
    }

    pub fn writable_extensions(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|e| e.writable)
            .map(|e| e.extension)
            .collect()
    }
}

pub fn extension_of(path: &Path) -> Option<String> {
    Some(path.extension()?.to_str()?.to_lowercase())
}
