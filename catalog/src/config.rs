//! Configuration of the [ArchiveController](crate::controller::ArchiveController).
//!
//! Read from a TOML file; every key is optional. Flags given on the command
//! line take precedence over the file.
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Error;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_BLOB_SERVICE_ADDR: &str = "memory://";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Number of archives processed in parallel.
    pub workers: usize,
    /// Number of submissions that may wait for a worker before submitters
    /// are held back.
    pub queue_capacity: usize,
    /// Parent directory of all extraction scratch space.
    pub scratch_dir: PathBuf,
    /// Where to store file and archive contents, see
    /// [crate::blobservice::from_addr].
    pub blob_service_addr: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            scratch_dir: std::env::temp_dir().join("archive-catalog"),
            blob_service_addr: DEFAULT_BLOB_SERVICE_ADDR.to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub async fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&contents)
    }

    /// The number of workers to spawn, at least one.
    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }

    /// The capacity of the work queue, at least one.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
