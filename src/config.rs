//! Engine configuration.
//!
//! A plain struct that `Engine::open` takes explicitly rather than a
//! module-level global, so no process-wide static engine state exists.

use std::path::PathBuf;

pub const PAGE_SIZE: usize = 4096;

/// Default size of the buffer pool, expressed as a frame count (2^14, per
/// the spec's default).
pub const DEFAULT_BUFFER_POOL_FRAMES: usize = 1 << 14;

pub const DEFAULT_LOG_BUFFER_BYTES: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_directory: PathBuf,
    pub log_directory: PathBuf,
    pub buffer_pool_frames: usize,
    pub log_buffer_bytes: usize,
    pub enable_logging: bool,
}

impl EngineConfig {
    /// Read overrides from the environment, falling back to defaults for
    /// anything unset. Recognizes `STRATUMDB_DATA_DIRECTORY`,
    /// `STRATUMDB_LOG_DIRECTORY`, `STRATUMDB_BUFFER_POOL_SIZE`,
    /// `STRATUMDB_LOG_BUFFER_SIZE`, `STRATUMDB_ENABLE_LOGGING`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("STRATUMDB_DATA_DIRECTORY") {
            cfg.data_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STRATUMDB_LOG_DIRECTORY") {
            cfg.log_directory = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STRATUMDB_BUFFER_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.buffer_pool_frames = n;
            }
        }
        if let Ok(v) = std::env::var("STRATUMDB_LOG_BUFFER_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.log_buffer_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("STRATUMDB_ENABLE_LOGGING") {
            cfg.enable_logging = v != "0" && v.to_lowercase() != "false";
        }

        cfg
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_directory.join("stratum.db")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_directory.join("stratum.wal")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("."),
            log_directory: PathBuf::from("."),
            buffer_pool_frames: DEFAULT_BUFFER_POOL_FRAMES,
            log_buffer_bytes: DEFAULT_LOG_BUFFER_BYTES,
            enable_logging: true,
        }
    }
}
