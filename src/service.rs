//! Map service boundary
//!
//! What route handlers call. Wires worker → dispatcher → cache at startup and
//! exposes `get_map(seed, mode)`.

use std::io;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use serde::Serialize;
use tracing::info;

use crate::cache::{CacheStats, MapCache};
use crate::config::{ServiceConfig, WorkerHost};
use crate::dispatcher::JobDispatcher;
use crate::error::{DispatchError, MapError};
use crate::raster::RenderMode;
use crate::seeds::MapSeed;
use crate::terrain::{palette, BIOME_THRESHOLDS};
use crate::worker::{spawn_process, spawn_thread, WorkerLink};

/// RGB triple as it appears in map documents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

/// JSON form of a map: legend plus the image as a data URI
#[derive(Clone, Debug, Serialize)]
pub struct MapDocument {
    /// Milliseconds since the Unix epoch
    pub ts: i64,
    pub seed: String,
    pub heights: Vec<f64>,
    pub colors: Vec<Rgb>,
    pub map: String,
}

impl MapDocument {
    pub fn new(seed: &MapSeed, mode: RenderMode, png: &[u8]) -> Self {
        let colors = match mode {
            RenderMode::Color => palette().into_iter().map(Rgb::from).collect(),
            RenderMode::Elevation => vec![Rgb::from([0, 0, 0]), Rgb::from([255, 255, 255])],
        };
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            seed: seed.to_string(),
            heights: BIOME_THRESHOLDS.to_vec(),
            colors,
            map: png_data_uri(png),
        }
    }
}

/// `data:image/png;base64,...`
pub fn png_data_uri(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Entry point for map requests
pub struct MapService {
    cache: MapCache,
}

impl MapService {
    pub fn new(cache: MapCache) -> Self {
        Self { cache }
    }

    /// Spawn the configured worker and build the dispatcher and cache on top.
    ///
    /// `program` is the executable re-run as `worker` for [`WorkerHost::Process`].
    /// Must be called inside a tokio runtime.
    pub fn start(config: &ServiceConfig, program: &Path) -> io::Result<Self> {
        let link: WorkerLink = match config.worker {
            WorkerHost::Process => spawn_process(program, &config.map)?,
            WorkerHost::Thread => spawn_thread(config.map.clone())?,
        };
        let dispatcher = Arc::new(JobDispatcher::start(link, config.job_timeout()));
        info!(
            cache_dir = %config.cache_dir.display(),
            worker = ?config.worker,
            grid_size = config.map.grid_size,
            coalesce = config.coalesce_misses,
            "map service started"
        );
        Ok(Self::new(MapCache::new(&config.cache_dir, dispatcher, config.coalesce_misses)))
    }

    /// PNG bytes for `(seed, mode)`.
    pub async fn get_map(&self, seed: &str, mode: RenderMode) -> Result<Vec<u8>, MapError> {
        let seed = MapSeed::new(seed);
        Ok(self.cache.get_or_compute(&seed, mode).await?)
    }

    /// Map plus legend as a JSON-ready document.
    pub async fn get_map_document(&self, seed: &str, mode: RenderMode) -> Result<MapDocument, MapError> {
        let png = self.get_map(seed, mode).await?;
        Ok(MapDocument::new(&MapSeed::new(seed), mode, &png))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Resolves when the worker pipeline has failed for good.
    pub async fn wait_fatal(&self) -> DispatchError {
        self.cache.dispatcher().wait_fatal().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;

    fn thread_config(dir: &Path) -> ServiceConfig {
        ServiceConfig {
            cache_dir: dir.to_path_buf(),
            worker: WorkerHost::Thread,
            map: MapConfig { grid_size: 8, ..MapConfig::default() },
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(png_data_uri(&[0x89, b'P', b'N', b'G']), "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_document_legend_per_mode() {
        let seed = MapSeed::new("abc");
        let color = MapDocument::new(&seed, RenderMode::Color, b"png");
        assert_eq!(color.colors.len(), 7);
        assert_eq!(color.colors[0], Rgb { r: 0, g: 0, b: 128 });
        assert_eq!(color.heights, BIOME_THRESHOLDS.to_vec());

        let height = MapDocument::new(&seed, RenderMode::Elevation, b"png");
        assert_eq!(height.colors, vec![Rgb { r: 0, g: 0, b: 0 }, Rgb { r: 255, g: 255, b: 255 }]);

        let json = serde_json::to_value(&color).unwrap();
        assert_eq!(json["seed"], "abc");
        assert!(json["ts"].as_i64().unwrap() > 0);
        assert_eq!(json["colors"][6], serde_json::json!({"r": 255, "g": 255, "b": 255}));
    }

    #[tokio::test]
    async fn test_get_map_through_thread_worker() {
        let dir = tempfile::tempdir().unwrap();
        let service = MapService::start(&thread_config(dir.path()), Path::new("unused")).unwrap();

        let first = service.get_map("seed1", RenderMode::Color).await.unwrap();
        let second = service.get_map("seed1", RenderMode::Color).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(service.cache_stats().misses, 1);
        assert_eq!(service.cache_stats().hits, 1);

        let doc = service.get_map_document("seed1", RenderMode::Color).await.unwrap();
        assert_eq!(doc.map, png_data_uri(&first));
    }
}
