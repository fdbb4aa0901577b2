pub mod analyzer;
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod harmonic;
pub mod import;
pub mod models;
pub mod pairs;
pub mod scoring;
pub mod tempo;

/// Audio file extensions the analyzer can decode
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "wave", "flac"];

/// Application name for XDG paths
pub const APP_NAME: &str = "mixwheel";
