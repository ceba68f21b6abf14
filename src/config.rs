//! Generation and service configuration
//!
//! Defaults are the reference values. A JSON file can override any subset of
//! fields; CLI flags are applied on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::noise_field::NoiseParams;

/// Parameters that fully determine a generated map (together with its seed)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Width and height of the tile grid
    pub grid_size: u32,
    /// Elevation scale; tiles are classified against `threshold * max_elevation`
    pub max_elevation: f64,
    /// Noise octave parameters
    pub noise: NoiseParams,
    /// Generate rows on the rayon pool. Output is identical either way.
    pub parallel: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            grid_size: 1024,
            max_elevation: 1024.0,
            noise: NoiseParams::default(),
            parallel: true,
        }
    }
}

/// Where the map worker runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkerHost {
    /// Child process running `map_generator worker`
    Process,
    /// Dedicated thread inside the server process
    Thread,
}

/// Server-side settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen: String,
    /// Root of the map cache; holds one subdirectory per render mode
    pub cache_dir: PathBuf,
    /// Upper bound on waiting for one job, in seconds. `None` or `0` waits forever.
    pub job_timeout_secs: Option<u64>,
    /// Serialize concurrent cache misses for the same key
    pub coalesce_misses: bool,
    pub worker: WorkerHost,
    pub map: MapConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3056".to_string(),
            cache_dir: PathBuf::from("cache/maps"),
            job_timeout_secs: Some(120),
            coalesce_misses: true,
            worker: WorkerHost::Process,
            map: MapConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
