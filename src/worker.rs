//! Map worker runtime
//!
//! The worker owns terrain generation and PNG encoding. It takes one work
//! message at a time, renders it, and answers with exactly one reply carrying
//! the same job id. It runs either as a child process speaking newline-framed
//! JSON over stdio, or on a dedicated thread speaking the same frames over
//! in-memory channels.

use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::MapConfig;
use crate::error::{GenerateError, ProtocolError};
use crate::noise_field::TerrainNoise;
use crate::protocol::{FailedMessage, ResultMessage, WorkMessage, WorkerReply};
use crate::raster::{encode_png, RenderMode};
use crate::seeds::MapSeed;
use crate::terrain::generate_map;

/// Exit code reported for a worker thread that panicked
const PANIC_EXIT_CODE: i32 = 101;

// =============================================================================
// RENDERING
// =============================================================================

/// Generates and encodes maps. Holds no state between jobs.
#[derive(Clone, Debug)]
pub struct MapWorker {
    config: MapConfig,
}

impl MapWorker {
    pub fn new(config: MapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Run generate → encode for one seed.
    pub fn render(&self, seed: &MapSeed, mode: RenderMode) -> Result<Vec<u8>, GenerateError> {
        let noise = TerrainNoise::from_seed(seed, self.config.noise);
        let tiles = generate_map(&noise, &self.config)?;
        Ok(encode_png(&tiles, self.config.grid_size, mode)?)
    }

    /// Render one work message into its reply.
    pub fn handle(&self, work: &WorkMessage) -> WorkerReply {
        let start = Instant::now();
        info!(job_id = %work.job_id, seed = %work.seed, mode = %work.mode(), "starting work");

        match self.render(&work.seed, work.mode()) {
            Ok(image) => {
                info!(
                    job_id = %work.job_id,
                    bytes = image.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "work complete"
                );
                WorkerReply::Result(ResultMessage { job_id: work.job_id, image })
            }
            Err(e) => {
                error!(job_id = %work.job_id, error = %e, "work failed");
                WorkerReply::Failed(FailedMessage { job_id: work.job_id, reason: e.to_string() })
            }
        }
    }

    /// Decode a work frame and produce the reply frame.
    pub fn handle_frame(&self, frame: &str) -> Result<String, ProtocolError> {
        let work = WorkMessage::from_frame(frame)?;
        self.handle(&work).to_frame()
    }
}

/// Worker loop failures
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Serve work frames from `input` until it closes, writing replies to `output`.
///
/// A frame that does not decode as work is fatal: the loop returns the error
/// so the hosting process exits non-zero.
pub fn serve_frames<R: BufRead, W: Write>(
    worker: &MapWorker,
    input: R,
    mut output: W,
) -> Result<(), WorkerError> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = worker.handle_frame(&line)?;
        output.write_all(reply.as_bytes())?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    debug!("work channel closed, worker stopping");
    Ok(())
}

/// Entry point of the `worker` subcommand.
pub fn run_stdio(config: MapConfig) -> Result<(), WorkerError> {
    info!(grid_size = config.grid_size, "map worker ready");
    let worker = MapWorker::new(config);
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_frames(&worker, stdin.lock(), stdout.lock())
}

// =============================================================================
// LINKS
// =============================================================================

/// Something the dispatcher hears from its worker
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    /// One reply frame
    Frame(String),
    /// The worker is gone
    Closed { code: Option<i32> },
}

/// Dispatcher side of a worker channel
#[derive(Debug)]
pub struct WorkerLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Worker side of a worker channel
#[derive(Debug)]
pub struct WorkerEnd {
    pub frames: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<LinkEvent>,
}

impl WorkerLink {
    /// Connected in-memory pair
    pub fn pair() -> (WorkerLink, WorkerEnd) {
        let (outbound, frames) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        (WorkerLink { outbound, inbound }, WorkerEnd { frames, events })
    }
}

/// Run the worker on a dedicated OS thread.
///
/// The thread stops when the dispatcher drops its sender. A panic while
/// rendering closes the link with exit code 101, like a crashed process.
pub fn spawn_thread(config: MapConfig) -> io::Result<WorkerLink> {
    let (link, mut end) = WorkerLink::pair();
    let worker = MapWorker::new(config);

    std::thread::Builder::new()
        .name("map-worker".to_string())
        .spawn(move || {
            while let Some(frame) = end.frames.blocking_recv() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.handle_frame(&frame)));
                let event = match outcome {
                    Ok(Ok(reply)) => LinkEvent::Frame(reply),
                    Ok(Err(e)) => {
                        error!(error = %e, "worker received a bad frame");
                        LinkEvent::Closed { code: Some(1) }
                    }
                    Err(_) => {
                        error!("worker thread panicked");
                        LinkEvent::Closed { code: Some(PANIC_EXIT_CODE) }
                    }
                };
                let closing = matches!(event, LinkEvent::Closed { .. });
                if end.events.send(event).is_err() || closing {
                    return;
                }
            }
            let _ = end.events.send(LinkEvent::Closed { code: Some(0) });
        })?;

    Ok(link)
}

/// Run the worker as a child process: `<program> worker --map-config <json>`.
///
/// Must be called inside a tokio runtime. The child is killed when the link's
/// reader task is dropped.
pub fn spawn_process(program: &Path, config: &MapConfig) -> io::Result<WorkerLink> {
    let config_json = serde_json::to_string(config)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut child = Command::new(program)
        .arg("worker")
        .arg("--map-config")
        .arg(config_json)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker stdout unavailable"))?;

    info!(pid = ?child.id(), program = %program.display(), "spawned map worker process");

    let (link, end) = WorkerLink::pair();
    let WorkerEnd { mut frames, events } = end;

    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let written = async {
                stdin.write_all(frame.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!(error = %e, "failed to write to map worker");
                break;
            }
        }
        debug!("worker writer stopped");
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if events.send(LinkEvent::Frame(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read from map worker");
                    break;
                }
            }
        }
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(error = %e, "failed to reap map worker");
                None
            }
        };
        let _ = events.send(LinkEvent::Closed { code });
    });

    Ok(link)
}
