pub mod config;
pub mod crawler;
pub mod entry;
pub mod error;
pub mod events;
pub mod filters;
pub mod formats;
pub mod image;
pub mod manipulator;
pub mod navigator;
pub mod orientation;
pub mod registry;
pub mod sort;
pub mod utils;
pub mod watcher;
pub mod worker;

pub use config::Config;
pub use entry::ImageEntry;
pub use error::{Error, Result};
pub use events::{Direction, Event, Reconciliation};
pub use navigator::{Navigator, WrapPolicy};

pub const QUALIFIER: &str = "com";
pub const ORGANIZATION: &str = "avis-imgv";
pub const APPLICATION: &str = "avis-imgv";
