//! The process worker host, driven through the real binary.

use std::path::Path;
use std::time::Duration;

use map_generator::config::MapConfig;
use map_generator::dispatcher::JobDispatcher;
use map_generator::error::DispatchError;
use map_generator::raster::RenderMode;
use map_generator::seeds::MapSeed;
use map_generator::worker::{spawn_process, LinkEvent, MapWorker};

fn binary() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_map_generator"))
}

fn small_config() -> MapConfig {
    // Not the default size, so a worker that ignored --map-config would differ
    MapConfig { grid_size: 24, ..MapConfig::default() }
}

#[tokio::test]
async fn test_process_worker_matches_in_process_render() {
    let config = small_config();
    let link = spawn_process(binary(), &config).unwrap();
    let dispatcher = JobDispatcher::start(link, Some(Duration::from_secs(60)));
    let worker = MapWorker::new(config);

    for (seed, mode) in [("abc", RenderMode::Color), ("abc", RenderMode::Elevation), ("seed1", RenderMode::Color)] {
        let seed = MapSeed::new(seed);
        let image = dispatcher.dispatch(&seed, mode).await.unwrap();
        assert_eq!(image, worker.render(&seed, mode).unwrap(), "{} {}", seed, mode);
    }
    assert_eq!(dispatcher.jobs_dispatched(), 3);
    assert!(dispatcher.fatal_error().is_none());
}

#[tokio::test]
async fn test_process_worker_exits_on_bad_frame() {
    let mut link = spawn_process(binary(), &small_config()).unwrap();
    link.outbound.send("not a work message".to_string()).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(30), link.inbound.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(LinkEvent::Closed { code: Some(1) }));
}

#[tokio::test]
async fn test_process_worker_exit_is_fatal_to_dispatcher() {
    let link = spawn_process(binary(), &small_config()).unwrap();
    let raw = link.outbound.clone();
    let dispatcher = JobDispatcher::start(link, None);

    raw.send("{\"type\":\"bogus\"}".to_string()).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(30), dispatcher.wait_fatal())
        .await
        .unwrap();
    assert!(matches!(err, DispatchError::WorkerExited { code: Some(code) } if code != 0));

    let later = dispatcher.dispatch(&MapSeed::new("abc"), RenderMode::Color).await;
    assert!(matches!(later, Err(DispatchError::WorkerExited { .. })));
}
