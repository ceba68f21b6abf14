//! Disk cache of rendered maps
//!
//! One PNG per `(seed, mode)` at `<root>/<mode>/<seed stem>.png`. A file that
//! exists is a hit and is returned as-is: no validation, no expiry. Misses go to
//! the job dispatcher and the result is persisted before it is returned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::fs;
use tracing::{debug, info};

use crate::dispatcher::JobDispatcher;
use crate::error::CacheError;
use crate::raster::RenderMode;
use crate::seeds::MapSeed;

/// File extension of cached maps
pub const MAP_EXTENSION: &str = "png";

/// Cache statistics for monitoring
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from disk
    pub hits: usize,
    /// Requests that went to the worker
    pub misses: usize,
    /// Maps written to disk
    pub writes: usize,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }

    /// Format as human-readable string
    pub fn summary(&self) -> String {
        format!(
            "Hits: {} | Misses: {} | Rate: {:.1}% | Writes: {}",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.writes
        )
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    writes: AtomicUsize,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Disk-backed map cache in front of a [`JobDispatcher`].
pub struct MapCache {
    root: PathBuf,
    dispatcher: Arc<JobDispatcher>,
    coalesce_misses: bool,
    in_flight: Mutex<HashMap<PathBuf, KeyLock>>,
    counters: Counters,
}

impl MapCache {
    /// With `coalesce_misses`, concurrent misses for one key wait on a per-key
    /// lock and re-check the disk, so the worker renders the map once. Without
    /// it, each miss dispatches its own job and the last write wins.
    pub fn new(root: impl Into<PathBuf>, dispatcher: Arc<JobDispatcher>, coalesce_misses: bool) -> Self {
        Self {
            root: root.into(),
            dispatcher,
            coalesce_misses,
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    /// Storage path for `(seed, mode)`
    pub fn path_for(&self, seed: &MapSeed, mode: RenderMode) -> PathBuf {
        self.root
            .join(mode.as_str())
            .join(format!("{}.{}", seed.file_stem(), MAP_EXTENSION))
    }

    /// Return the cached map, rendering and persisting it on a miss.
    pub async fn get_or_compute(&self, seed: &MapSeed, mode: RenderMode) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(seed, mode);

        if let Some(bytes) = self.read_hit(&path).await? {
            return Ok(bytes);
        }
        if !self.coalesce_misses {
            return self.compute(seed, mode, &path).await;
        }

        let release = KeyLockRelease { cache: self, path: &path, key_lock: self.key_lock(&path) };
        let _guard = release.key_lock.lock().await;
        // Another caller may have filled it while we waited
        match self.read_hit(&path).await? {
            Some(bytes) => Ok(bytes),
            None => self.compute(seed, mode, &path).await,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }

    async fn read_hit(&self, path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(path).await {
            Ok(bytes) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(path = %path.display(), "map cache hit");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(path, source)),
        }
    }

    async fn compute(&self, seed: &MapSeed, mode: RenderMode, path: &Path) -> Result<Vec<u8>, CacheError> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        info!(%seed, %mode, "map cache miss, dispatching");

        let bytes = self.dispatcher.dispatch(seed, mode).await?;
        self.persist(path, &bytes).await?;
        Ok(bytes)
    }

    /// Write through a temp file and rename so readers never see a partial map.
    async fn persist(&self, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| io_error(dir, e))?;
        }
        let tmp = path.with_extension(format!("{}.{:08x}.tmp", MAP_EXTENSION, rand::random::<u32>()));
        fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_error(path, e));
        }

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        debug!(path = %path.display(), bytes = bytes.len(), "map cached");
        Ok(())
    }

    fn key_lock(&self, path: &Path) -> KeyLock {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(path.to_path_buf()).or_default())
    }
}

/// Drops the per-key lock entry once nobody else holds it. Runs on every exit
/// from a coalesced miss, including a caller abandoning the future.
struct KeyLockRelease<'a> {
    cache: &'a MapCache,
    path: &'a Path,
    key_lock: KeyLock,
}

impl Drop for KeyLockRelease<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.cache.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's copy and ours left: nobody else is waiting
        if Arc::strong_count(&self.key_lock) == 2 {
            in_flight.remove(self.path);
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io { path: path.display().to_string(), source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::MapConfig;
    use crate::worker::{spawn_thread, WorkerLink};

    fn small_config() -> MapConfig {
        MapConfig { grid_size: 16, ..MapConfig::default() }
    }

    fn thread_cache(root: &Path, coalesce: bool) -> MapCache {
        let link = spawn_thread(small_config()).unwrap();
        let dispatcher = Arc::new(JobDispatcher::start(link, Some(Duration::from_secs(30))));
        MapCache::new(root, dispatcher, coalesce)
    }

    #[test]
    fn test_cache_stats_summary() {
        let stats = CacheStats { hits: 3, misses: 1, writes: 1 };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.summary(), "Hits: 3 | Misses: 1 | Rate: 75.0% | Writes: 1");
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (link, _end) = WorkerLink::pair();
        let cache = MapCache::new(dir.path(), Arc::new(JobDispatcher::start(link, None)), true);

        assert_eq!(
            cache.path_for(&MapSeed::new("seed1"), RenderMode::Color),
            dir.path().join("color").join("seed1.png")
        );
        assert_eq!(
            cache.path_for(&MapSeed::new("seed1"), RenderMode::Elevation),
            dir.path().join("elevation").join("seed1.png")
        );
        assert_eq!(
            cache.path_for(&MapSeed::new("../x"), RenderMode::Color),
            dir.path().join("color").join("%2E%2E%2Fx.png")
        );
    }

    #[tokio::test]
    async fn test_second_call_is_a_pure_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = thread_cache(dir.path(), true);
        let seed = MapSeed::new("abc");

        let first = cache.get_or_compute(&seed, RenderMode::Color).await.unwrap();
        assert_eq!(cache.dispatcher().jobs_dispatched(), 1);

        let second = cache.get_or_compute(&seed, RenderMode::Color).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.dispatcher().jobs_dispatched(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, writes: 1 });
    }

    #[tokio::test]
    async fn test_modes_are_cached_separately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = thread_cache(dir.path(), true);
        let seed = MapSeed::new("abc");

        let color = cache.get_or_compute(&seed, RenderMode::Color).await.unwrap();
        let height = cache.get_or_compute(&seed, RenderMode::Elevation).await.unwrap();
        assert_ne!(color, height);
        assert_eq!(cache.dispatcher().jobs_dispatched(), 2);
        assert!(cache.path_for(&seed, RenderMode::Elevation).exists());
    }

    #[tokio::test]
    async fn test_existing_file_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let cache = thread_cache(dir.path(), true);
        let seed = MapSeed::new("planted");
        let path = cache.path_for(&seed, RenderMode::Color);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not really a png").unwrap();

        let bytes = cache.get_or_compute(&seed, RenderMode::Color).await.unwrap();
        assert_eq!(bytes, b"not really a png");
        assert_eq!(cache.dispatcher().jobs_dispatched(), 0);
    }

    async fn concurrent_cold_requests(coalesce: bool) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(thread_cache(dir.path(), coalesce));
        let seed = MapSeed::new("seed1");

        let a = {
            let cache = Arc::clone(&cache);
            let seed = seed.clone();
            tokio::spawn(async move { cache.get_or_compute(&seed, RenderMode::Color).await })
        };
        let b = {
            let cache = Arc::clone(&cache);
            let seed = seed.clone();
            tokio::spawn(async move { cache.get_or_compute(&seed, RenderMode::Color).await })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a, b);
        let on_disk = std::fs::read(cache.path_for(&seed, RenderMode::Color)).unwrap();
        assert_eq!(on_disk, a);

        if coalesce {
            assert_eq!(cache.dispatcher().jobs_dispatched(), 1);
            assert!(cache.in_flight.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_concurrent_cold_requests_coalesced() {
        concurrent_cold_requests(true).await;
    }

    #[tokio::test]
    async fn test_concurrent_cold_requests_racing() {
        concurrent_cold_requests(false).await;
    }

    #[tokio::test]
    async fn test_long_seeds_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = thread_cache(dir.path(), true);
        let seeds = [
            MapSeed::new(" ".repeat(90)),
            MapSeed::new("a".repeat(211)),
            MapSeed::new("x".repeat(5000)),
        ];

        for seed in &seeds {
            let first = cache.get_or_compute(seed, RenderMode::Color).await.unwrap();
            let path = cache.path_for(seed, RenderMode::Color);
            assert!(path.file_name().unwrap().len() <= 255);
            assert_eq!(std::fs::read(&path).unwrap(), first);

            let second = cache.get_or_compute(seed, RenderMode::Color).await.unwrap();
            assert_eq!(first, second);
        }
        assert_eq!(cache.dispatcher().jobs_dispatched(), 3);
        assert_eq!(cache.stats().writes, 3);
    }

    #[tokio::test]
    async fn test_abandoned_miss_releases_key_lock() {
        let dir = tempfile::tempdir().unwrap();
        let (link, mut end) = WorkerLink::pair();
        let cache = Arc::new(MapCache::new(dir.path(), Arc::new(JobDispatcher::start(link, None)), true));
        let seed = MapSeed::new("abandoned");

        let spawn_request = |cache: Arc<MapCache>, seed: MapSeed| {
            tokio::spawn(async move { cache.get_or_compute(&seed, RenderMode::Color).await })
        };
        let holder = spawn_request(Arc::clone(&cache), seed.clone());
        // The holder has the key lock once its work message is out
        end.frames.recv().await.expect("work frame");
        let waiter = spawn_request(Arc::clone(&cache), seed.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.in_flight.lock().unwrap().len(), 1);

        holder.abort();
        waiter.abort();
        assert!(holder.await.unwrap_err().is_cancelled());
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the mode directory should be
        std::fs::write(dir.path().join("color"), b"").unwrap();
        let cache = thread_cache(dir.path(), true);

        let result = cache.get_or_compute(&MapSeed::new("abc"), RenderMode::Color).await;
        assert!(matches!(result, Err(CacheError::Io { .. })));
    }
}
