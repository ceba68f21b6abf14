//! Job dispatcher
//!
//! Turns `(seed, mode)` requests into correlated work messages for the map
//! worker and resolves each caller when the reply carrying its job id comes
//! back. Replies may arrive in any order; only the job id matters.
//!
//! Job lifecycle: `Created → Sent → AwaitingResult → Resolved`. A job leaves the
//! table the moment its reply is taken, so it never outlives its one reply.
//!
//! A reply for a job id that is not in the table, an undecodable frame, or the
//! worker going away is fatal: every pending caller fails, every later dispatch
//! fails, and [`JobDispatcher::wait_fatal`] resolves so the host can exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::protocol::{JobId, WorkMessage, WorkerReply};
use crate::raster::RenderMode;
use crate::seeds::MapSeed;
use crate::worker::{LinkEvent, WorkerLink};

type Completion = oneshot::Sender<Result<Vec<u8>, DispatchError>>;

/// Where a job is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Registered, work message not yet handed to the link
    Created,
    /// Work message handed to the link
    Sent,
    /// Caller suspended on the reply
    AwaitingResult,
    /// Reply taken; the job is gone from the table
    Resolved,
}

struct Job {
    seed: MapSeed,
    mode: RenderMode,
    state: JobState,
    created: Instant,
    completion: Completion,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, Job>,
    fatal: Option<DispatchError>,
}

struct Shared {
    table: Mutex<JobTable>,
    fatal: watch::Sender<Option<DispatchError>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, job_id: JobId, state: JobState) {
        // Already resolved if the reply beat us here
        if let Some(job) = self.lock().jobs.get_mut(&job_id) {
            job.state = state;
        }
    }

    /// Hand a reply to the caller that owns its job id.
    fn resolve(&self, reply: WorkerReply) -> Result<(), DispatchError> {
        let job_id = reply.job_id();
        let mut job = self
            .lock()
            .jobs
            .remove(&job_id)
            .ok_or(DispatchError::UnknownJob(job_id))?;
        job.state = JobState::Resolved;

        let outcome = match reply {
            WorkerReply::Result(m) => {
                info!(
                    %job_id,
                    seed = %job.seed,
                    mode = %job.mode,
                    bytes = m.image.len(),
                    elapsed_ms = job.created.elapsed().as_millis() as u64,
                    "job resolved"
                );
                Ok(m.image)
            }
            WorkerReply::Failed(m) => {
                warn!(%job_id, seed = %job.seed, reason = %m.reason, "job failed in worker");
                Err(DispatchError::WorkerFailed { job_id, reason: m.reason })
            }
        };

        if job.completion.send(outcome).is_err() {
            debug!(%job_id, "caller went away before the result arrived");
        }
        Ok(())
    }

    /// Fail every pending job and refuse all future ones.
    fn poison(&self, err: DispatchError) {
        let pending: Vec<(JobId, Job)> = {
            let mut table = self.lock();
            if table.fatal.is_some() {
                return;
            }
            table.fatal = Some(err.clone());
            table.jobs.drain().collect()
        };

        error!(error = %err, pending = pending.len(), "job dispatcher failed");
        for (_, job) in pending {
            let _ = job.completion.send(Err(err.clone()));
        }
        self.fatal.send_replace(Some(err));
    }
}

/// Correlates map requests with worker replies.
pub struct JobDispatcher {
    outbound: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    job_timeout: Option<Duration>,
    dispatched: AtomicU64,
}

impl JobDispatcher {
    /// Attach to a worker link and start reading its replies.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(link: WorkerLink, job_timeout: Option<Duration>) -> Self {
        let (fatal, _) = watch::channel(None);
        let shared = Arc::new(Shared { table: Mutex::new(JobTable::default()), fatal });

        tokio::spawn(pump_replies(Arc::clone(&shared), link.inbound));

        Self {
            outbound: link.outbound,
            shared,
            job_timeout,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Render `seed` in `mode` on the worker and wait for the image.
    ///
    /// Every call is its own job with a fresh id, even for a seed that is
    /// already in flight. Dropping the returned future abandons the wait; the
    /// worker still finishes and the late reply is discarded.
    pub async fn dispatch(&self, seed: &MapSeed, mode: RenderMode) -> Result<Vec<u8>, DispatchError> {
        let job_id = JobId::new();
        let frame = WorkMessage { job_id, seed: seed.clone(), color: mode.is_color() }.to_frame()?;
        let (completion, reply) = oneshot::channel();

        {
            let mut table = self.shared.lock();
            if let Some(err) = &table.fatal {
                return Err(err.clone());
            }
            table.jobs.insert(
                job_id,
                Job {
                    seed: seed.clone(),
                    mode,
                    state: JobState::Created,
                    created: Instant::now(),
                    completion,
                },
            );
        }

        if self.outbound.send(frame).is_err() {
            let err = DispatchError::WorkerExited { code: None };
            self.shared.poison(err.clone());
            return Err(err);
        }
        self.shared.set_state(job_id, JobState::Sent);
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(%job_id, %seed, %mode, "job sent");

        self.shared.set_state(job_id, JobState::AwaitingResult);
        let received = match self.job_timeout {
            Some(after) => match tokio::time::timeout(after, reply).await {
                Ok(received) => received,
                Err(_) => {
                    // The job stays registered so the late reply is absorbed
                    warn!(%job_id, %seed, ?after, "job timed out");
                    return Err(DispatchError::Timeout { job_id, after });
                }
            },
            None => reply.await,
        };

        match received {
            Ok(outcome) => outcome,
            Err(_) => Err(self
                .fatal_error()
                .unwrap_or(DispatchError::WorkerExited { code: None })),
        }
    }

    /// Number of work messages handed to the worker so far
    pub fn jobs_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Jobs still waiting for a reply (including abandoned ones)
    pub fn pending_jobs(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    /// State of a job that is still in the table
    pub fn job_state(&self, job_id: JobId) -> Option<JobState> {
        self.shared.lock().jobs.get(&job_id).map(|job| job.state)
    }

    /// The fatal error, if the dispatcher has failed
    pub fn fatal_error(&self) -> Option<DispatchError> {
        self.shared.lock().fatal.clone()
    }

    /// Resolves once the dispatcher has failed.
    pub async fn wait_fatal(&self) -> DispatchError {
        let mut fatal = self.shared.fatal.subscribe();
        let err = match fatal.wait_for(Option::is_some).await {
            Ok(err) => err.clone(),
            Err(_) => None,
        };
        err.unwrap_or(DispatchError::WorkerExited { code: None })
    }
}

async fn pump_replies(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<LinkEvent>) {
    while let Some(event) = inbound.recv().await {
        let outcome = match event {
            LinkEvent::Frame(frame) => WorkerReply::from_frame(&frame)
                .map_err(DispatchError::from)
                .and_then(|reply| shared.resolve(reply)),
            LinkEvent::Closed { code } => Err(DispatchError::WorkerExited { code }),
        };
        if let Err(err) = outcome {
            shared.poison(err);
            return;
        }
    }
    shared.poison(DispatchError::WorkerExited { code: None });
}
