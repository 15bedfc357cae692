//! # Prognosticator: asynchronous per-object adaptive prediction
//!
//! One [`Prognosticator`] continuously predicts the future trajectory of one
//! tracked object on a dedicated worker thread, using the shared
//! [`Ephemeris`] as the field oracle.
//!
//! ## Protocol
//! -----------------
//! The worker cycles Idle → Computing → Publishing → Idle. Requests go
//! through a **single-slot** mailbox: a new request arriving while the
//! worker computes atomically replaces the pending one — at most one request
//! is retained, superseded ones are overwritten, never queued. Cancellation
//! is cooperative only: a superseded computation still runs to completion,
//! and its result is then discarded silently because the slot is occupied
//! again.
//!
//! Consumers read the last published prediction with
//! [`prognostication`](Prognosticator::prognostication), which never blocks
//! on the worker — only a short critical section guards the swap.
//!
//! ## Partial results
//! -----------------
//! If the adaptive integrator exhausts its step budget short of the
//! requested horizon, the partial trajectory computed so far is published
//! rather than discarded; the caller observes
//! [`Prognostication::reached`] < [`Prognostication::requested`] and may
//! retry with relaxed tolerances.
//!
//! Each request pins the ephemeris history with a [`Guard`] for the
//! duration of the computation, so forgetting cannot race the prediction.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::degrees_of_freedom::DegreesOfFreedom;
use crate::ephemeris::{AdaptiveStepParameters, Ephemeris, Guard};
use crate::integrators::AdaptiveOutcome;
use crate::orrery_errors::OrreryError;
use crate::time::Instant;
use crate::trajectories::DiscreteTrajectory;

/// A published prediction: a root trajectory of the probe, from the request
/// start to the reached horizon.
#[derive(Debug)]
pub struct Prognostication {
    pub trajectory: DiscreteTrajectory,
    /// Last instant actually computed.
    pub reached: Instant,
    /// Horizon the request asked for; `reached < requested` marks a partial
    /// result.
    pub requested: Instant,
}

struct Request {
    first_time: Instant,
    first_degrees_of_freedom: DegreesOfFreedom,
    horizon: Instant,
    parameters: AdaptiveStepParameters,
    // Held for the lifetime of the request so that the ephemeris cannot
    // forget the history the prediction starts from.
    _guard: Guard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrognosticatorStatus {
    Idle,
    Computing,
}

struct Inner {
    pending: Option<Request>,
    shutdown: bool,
    status: PrognosticatorStatus,
    published: Option<Arc<Prognostication>>,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Asynchronous per-object predictor over a shared ephemeris.
pub struct Prognosticator {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Prognosticator {
    /// Spawns the dedicated worker for one tracked object.
    pub fn new(name: &str, ephemeris: Arc<Mutex<Ephemeris>>) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                pending: None,
                shutdown: false,
                status: PrognosticatorStatus::Idle,
                published: None,
            }),
            wake: Condvar::new(),
        });
        let worker = {
            // The worker owns the only handle the predictor keeps on the
            // ephemeris.
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("prognosticator-{name}"))
                .spawn(move || worker_loop(&ephemeris, &shared))
                .expect("spawning a prognosticator worker failed")
        };
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Submits a prediction request, overwriting any pending one. The
    /// caller provides a [`Guard`] pinning the ephemeris history the
    /// prediction starts from; it is released when the request is consumed
    /// or superseded. Returns immediately; the result appears through
    /// [`prognostication`](Self::prognostication) once computed.
    pub fn request_prognostication(
        &self,
        guard: Guard,
        first_time: Instant,
        first_degrees_of_freedom: DegreesOfFreedom,
        horizon: Instant,
        parameters: AdaptiveStepParameters,
    ) {
        let mut inner = self.shared.lock();
        if inner.pending.replace(Request {
            first_time,
            first_degrees_of_freedom,
            horizon,
            parameters,
            _guard: guard,
        }).is_some() {
            log::debug!("prognostication request superseded before pickup");
        }
        self.shared.wake.notify_one();
    }

    /// Last published prediction, if any. Never blocks on the worker:
    /// consumers see the previous result until a newer one is swapped in.
    pub fn prognostication(&self) -> Option<Arc<Prognostication>> {
        self.shared.lock().published.clone()
    }

    pub fn status(&self) -> PrognosticatorStatus {
        self.shared.lock().status
    }
}

impl Drop for Prognosticator {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.lock();
            inner.shutdown = true;
            // Drop the pending request now so its guard is released even if
            // the worker never picks it up.
            inner.pending = None;
        }
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            // The worker abandons at its next checkpoint; no thread leak.
            let _ = worker.join();
        }
    }
}

fn worker_loop(ephemeris: &Arc<Mutex<Ephemeris>>, shared: &Arc<Shared>) {
    loop {
        let request = {
            let mut inner = shared.lock();
            loop {
                if inner.shutdown {
                    return;
                }
                if let Some(request) = inner.pending.take() {
                    inner.status = PrognosticatorStatus::Computing;
                    break request;
                }
                inner = shared
                    .wake
                    .wait(inner)
                    .unwrap_or_else(|poison| poison.into_inner());
            }
        };

        let (trajectory, reached, result) = compute(ephemeris, shared, &request);

        let mut inner = shared.lock();
        inner.status = PrognosticatorStatus::Idle;
        if inner.shutdown {
            return;
        }
        if inner.pending.is_some() {
            // Superseded while computing: the result is discarded silently.
            continue;
        }
        match result {
            Ok(AdaptiveOutcome::Abandoned) => {}
            Ok(AdaptiveOutcome::ReachedTarget) => {
                inner.published = Some(Arc::new(Prognostication {
                    trajectory,
                    reached,
                    requested: request.horizon,
                }));
            }
            Err(OrreryError::MaxStepsExceeded { reached: short, .. }) => {
                // Publish the partial result; the caller may retry with
                // relaxed tolerances.
                log::debug!(
                    "prognostication stopped at {short}, short of {}",
                    request.horizon
                );
                inner.published = Some(Arc::new(Prognostication {
                    trajectory,
                    reached,
                    requested: request.horizon,
                }));
            }
            Err(error) => {
                log::warn!("prognostication failed: {error}");
            }
        }
    }
}

fn compute(
    ephemeris: &Arc<Mutex<Ephemeris>>,
    shared: &Arc<Shared>,
    request: &Request,
) -> (DiscreteTrajectory, Instant, Result<AdaptiveOutcome, OrreryError>) {
    let mut trajectory = DiscreteTrajectory::new();
    let root = trajectory.root();
    if let Err(error) = trajectory.append(
        root,
        request.first_time,
        request.first_degrees_of_freedom,
    ) {
        return (trajectory, request.first_time, Err(error));
    }
    let should_abandon = || shared.lock().shutdown;
    let result = {
        let mut ephemeris = ephemeris
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        ephemeris.flow_with_adaptive_step(
            &mut trajectory,
            root,
            request.horizon,
            &request.parameters,
            &should_abandon,
        )
    };
    let reached = trajectory
        .t_max(root)
        .ok()
        .flatten()
        .unwrap_or(request.first_time);
    (trajectory, reached, result)
}
