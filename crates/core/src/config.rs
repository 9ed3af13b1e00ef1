use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_CHUNK_SIZE_BYTES: u32 = 5 * 1024 * 1024;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_UPLOAD_FILENAME: &str = "pasted_blueprint.txt";

/// Knobs the upload flow depends on. Defaults match the server's expectations
/// for pasted text; tests shrink them to keep runs fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_filename")]
    pub filename: String,
}

fn default_chunk_size_bytes() -> u32 {
    DEFAULT_CHUNK_SIZE_BYTES
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_filename() -> String {
    DEFAULT_UPLOAD_FILENAME.to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size_bytes(),
            poll_interval_ms: default_poll_interval_ms(),
            filename: default_filename(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes == 0 {
            return Err(Error::InvalidConfig {
                message: "chunk_size_bytes must be > 0".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig {
                message: "poll_interval_ms must be > 0".to_string(),
            });
        }
        if self.filename.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "filename must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
