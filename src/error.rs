//! Error types for the map pipeline

use std::time::Duration;

use thiserror::Error;

use crate::protocol::JobId;

/// Terrain classification failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifyError {
    /// No biome threshold covered the elevation. Unreachable with clamped input.
    #[error("no biome threshold covers elevation {elevation} (max elevation {max_elevation})")]
    NoBiome { elevation: f64, max_elevation: f64 },
}

/// Raster encoding failed
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Tile lies outside the image
    #[error("tile ({x}, {y}) is outside a {grid_size}x{grid_size} grid")]
    TileOutOfBounds { x: u32, y: u32, grid_size: u32 },

    /// PNG encoder error
    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Generation inside the worker failed
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// A worker frame could not be read or written
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    /// Frame is not valid JSON for the message schema
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Well-formed message travelling in the wrong direction
    #[error("unexpected {0} message")]
    UnexpectedKind(&'static str),
}

/// Job dispatch errors.
///
/// Fatal variants (see [`DispatchError::is_fatal`]) poison the dispatcher: every
/// pending and future job fails with the same error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    /// Worker answered a job id that is not registered
    #[error("protocol violation: result for unknown job {0}")]
    UnknownJob(JobId),

    /// Worker sent something that does not decode
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Worker process exited or its channel closed
    #[error("map worker exited (code {code:?})")]
    WorkerExited { code: Option<i32> },

    /// Worker could not generate this job
    #[error("map worker failed job {job_id}: {reason}")]
    WorkerFailed { job_id: JobId, reason: String },

    /// No result within the configured bound
    #[error("job {job_id} timed out after {after:?}")]
    Timeout { job_id: JobId, after: Duration },
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::UnknownJob(_)
                | DispatchError::Protocol(_)
                | DispatchError::WorkerExited { .. }
        )
    }
}

/// Map cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or persisting a cache file failed
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors surfaced at the map service boundary
#[derive(Debug, Error)]
pub enum MapError {
    #[error("map generation timed out")]
    Timeout,

    #[error("map generation failed: {0}")]
    Generation(String),

    #[error("map storage failed: {0}")]
    Storage(String),
}

impl From<CacheError> for MapError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Io { .. } => MapError::Storage(e.to_string()),
            CacheError::Dispatch(DispatchError::Timeout { .. }) => MapError::Timeout,
            CacheError::Dispatch(d) => MapError::Generation(d.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_fatal_classification() {
        let id = JobId::from(Uuid::nil());
        assert!(DispatchError::UnknownJob(id).is_fatal());
        assert!(DispatchError::WorkerExited { code: Some(1) }.is_fatal());
        assert!(DispatchError::Protocol(ProtocolError::Malformed("x".into())).is_fatal());

        assert!(!DispatchError::Timeout { job_id: id, after: Duration::from_secs(1) }.is_fatal());
        assert!(!DispatchError::WorkerFailed { job_id: id, reason: "x".into() }.is_fatal());
    }

    #[test]
    fn test_cache_error_maps_to_service_error() {
        let id = JobId::from(Uuid::nil());
        let timeout = CacheError::Dispatch(DispatchError::Timeout {
            job_id: id,
            after: Duration::from_millis(5),
        });
        assert!(matches!(MapError::from(timeout), MapError::Timeout));

        let io = CacheError::Io {
            path: "cache/color/x.png".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(matches!(MapError::from(io), MapError::Storage(_)));

        let exited = CacheError::Dispatch(DispatchError::WorkerExited { code: Some(101) });
        assert!(matches!(MapError::from(exited), MapError::Generation(_)));
    }
}
