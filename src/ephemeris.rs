//! # Ephemeris: the integration and query engine over one set of bodies
//!
//! An [`Ephemeris`] owns one root [`DiscreteTrajectory`] per massive body and
//! advances all of them together with a fixed-step symplectic integrator,
//! coupling every body's gravity (pairwise Newtonian terms plus the damped
//! geopotential of oblate bodies). It is the oracle other components query
//! for body state at a time.
//!
//! ## Lifecycle
//! -----------------
//! Created once with bodies, an initial state and an epoch; mutated only by
//! [`prolong`](Ephemeris::prolong) (the horizon monotonically increases) and
//! [`eventually_forget_before`](Ephemeris::eventually_forget_before) (the
//! retained history monotonically shrinks, bounded by live [`Guard`]s);
//! destroyed with its owning session.
//!
//! ## Determinism
//! -----------------
//! Step times lie on the fixed grid `epoch + k·step`, and integration always
//! resumes from the exact (non-interpolated) state of the last grid point.
//! Prolonging to `t₁` and then `t₂` therefore appends exactly the samples a
//! direct prolongation to `t₂` would, which is what makes century-scale runs
//! reproducible and cross-run error comparison meaningful.
//!
//! ## Concurrency
//! -----------------
//! The ephemeris is exclusively owned by its session; concurrent readers
//! need external synchronization (a [`Guard`] plus a mutex). The only
//! blocking ever done here is the short guard-registry critical section.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use hifitime::Duration;
use itertools::Itertools;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::body::Body;
use crate::degrees_of_freedom::DegreesOfFreedom;
use crate::geopotential::Geopotential;
use crate::integrators::{
    symplectic_integrator_by_name, AdaptiveIntegrator, AdaptiveOutcome, SymplecticIntegrator,
    SystemState,
};
use crate::orrery_errors::OrreryError;
use crate::time::Instant;
use crate::trajectories::{BranchId, DiscreteTrajectory, TrajectorySnapshot};

/// Tolerances governing the two accuracy/memory trade-offs of the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccuracyParameters {
    /// Maximum deviation of the compressed interpolant from raw samples,
    /// metres. Bounds the error introduced by downsampling.
    pub fitting_tolerance: f64,
    /// Relative acceleration below which geopotential harmonics are
    /// smoothly faded out with distance.
    pub geopotential_tolerance: f64,
}

/// Integrator and cadence of the bulk long-horizon integration.
#[derive(Clone)]
pub struct FixedStepParameters {
    pub integrator: Arc<dyn SymplecticIntegrator>,
    pub step: Duration,
}

impl std::fmt::Debug for FixedStepParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedStepParameters")
            .field("integrator", &self.integrator.name())
            .field("step", &self.step)
            .finish()
    }
}

/// Integrator and budget of a tolerance-driven prediction.
#[derive(Clone)]
pub struct AdaptiveStepParameters {
    pub integrator: Arc<dyn AdaptiveIntegrator>,
    pub max_steps: usize,
    /// Admissible local position error, metres.
    pub length_tolerance: f64,
    /// Admissible local velocity error, metres per second.
    pub speed_tolerance: f64,
}

impl std::fmt::Debug for AdaptiveStepParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveStepParameters")
            .field("integrator", &self.integrator.name())
            .field("max_steps", &self.max_steps)
            .field("length_tolerance", &self.length_tolerance)
            .field("speed_tolerance", &self.speed_tolerance)
            .finish()
    }
}

#[derive(Debug, Default)]
struct GuardRegistry {
    pins: Mutex<Vec<(u64, Instant)>>,
    next_id: AtomicU64,
}

impl GuardRegistry {
    fn min_pin(&self) -> Option<Instant> {
        let pins = self.pins.lock().unwrap_or_else(|poison| poison.into_inner());
        pins.iter()
            .map(|&(_, t)| t)
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// A live pin preventing the ephemeris from forgetting history at or after
/// the pinned instant. Released on drop, on every exit path.
#[derive(Debug)]
pub struct Guard {
    registry: Arc<GuardRegistry>,
    id: u64,
    time: Instant,
}

impl Guard {
    /// The pinned instant.
    pub fn time(&self) -> Instant {
        self.time
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let mut pins = self
            .registry
            .pins
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        pins.retain(|&(id, _)| id != self.id);
    }
}

/// The integration + query engine over one set of massive bodies.
pub struct Ephemeris {
    bodies: Vec<Arc<Body>>,
    indices_by_name: AHashMap<String, usize>,
    geopotentials: Vec<Option<Geopotential>>,
    trajectories: Vec<DiscreteTrajectory>,
    accuracy: AccuracyParameters,
    parameters: FixedStepParameters,
    /// Exact integrator state at the horizon; never interpolated.
    last_state: SystemState,
    guards: Arc<GuardRegistry>,
}

impl Ephemeris {
    /// Creates an ephemeris at `epoch` with the given bodies and initial
    /// state (one [`DegreesOfFreedom`] per body, same order).
    pub fn new(
        bodies: Vec<Arc<Body>>,
        initial_state: Vec<DegreesOfFreedom>,
        epoch: Instant,
        accuracy: AccuracyParameters,
        parameters: FixedStepParameters,
    ) -> Result<Self, OrreryError> {
        if bodies.len() != initial_state.len() {
            return Err(OrreryError::MismatchedInitialState {
                bodies: bodies.len(),
                states: initial_state.len(),
            });
        }
        if parameters.step <= Duration::ZERO {
            return Err(OrreryError::NonPositiveStep);
        }
        let geopotentials = bodies
            .iter()
            .map(|body| {
                body.is_oblate()
                    .then(|| Geopotential::new(body, accuracy.geopotential_tolerance))
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let indices_by_name = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| (body.name().to_string(), i))
            .collect();

        let mut trajectories = vec![DiscreteTrajectory::new(); bodies.len()];
        for (trajectory, dof) in trajectories.iter_mut().zip(&initial_state) {
            let root = trajectory.root();
            trajectory.append(root, epoch, *dof)?;
        }
        let last_state = SystemState {
            time: epoch,
            positions: initial_state.iter().map(|dof| dof.position).collect(),
            velocities: initial_state.iter().map(|dof| dof.velocity).collect(),
        };
        Ok(Self {
            bodies,
            indices_by_name,
            geopotentials,
            trajectories,
            accuracy,
            parameters,
            last_state,
            guards: Arc::new(GuardRegistry::default()),
        })
    }

    pub fn bodies(&self) -> &[Arc<Body>] {
        &self.bodies
    }

    /// Index of the body named `name`, if it exists.
    pub fn body_index(&self, name: &str) -> Option<usize> {
        self.indices_by_name.get(name).copied()
    }

    /// Earliest retained instant.
    pub fn t_min(&self) -> Instant {
        self.trajectories
            .iter()
            .filter_map(|trajectory| trajectory.t_min(trajectory.root()).ok().flatten())
            .next()
            .unwrap_or(self.last_state.time)
    }

    /// Latest computed instant (the horizon).
    pub fn t_max(&self) -> Instant {
        self.last_state.time
    }

    /// Mutual accelerations of all massive bodies at `t`: pairwise
    /// Newtonian terms plus the damped geopotential of oblate bodies,
    /// action and reaction included.
    fn massive_accelerations(
        &self,
        t: Instant,
        positions: &[Vector3<f64>],
        accelerations: &mut [Vector3<f64>],
    ) -> Result<(), OrreryError> {
        for a in accelerations.iter_mut() {
            *a = Vector3::zeros();
        }
        for (i, j) in (0..self.bodies.len()).tuple_combinations() {
            let displacement = positions[j] - positions[i];
            let r2 = displacement.norm_squared();
            let one_over_r3 = 1.0 / (r2 * r2.sqrt());
            let mu_i = self.bodies[i].gravitational_parameter();
            let mu_j = self.bodies[j].gravitational_parameter();
            accelerations[i] += mu_j * one_over_r3 * displacement;
            accelerations[j] -= mu_i * one_over_r3 * displacement;

            if let Some(geopotential) = &self.geopotentials[i] {
                let harmonic = geopotential.acceleration(t, &displacement);
                accelerations[j] += mu_i * harmonic;
                accelerations[i] -= mu_j * harmonic;
            }
            if let Some(geopotential) = &self.geopotentials[j] {
                let from_j = -displacement;
                let harmonic = geopotential.acceleration(t, &from_j);
                accelerations[i] += mu_j * harmonic;
                accelerations[j] -= mu_i * harmonic;
            }
        }
        Ok(())
    }

    /// Advances the horizon to at least `t`. A `t` at or before the current
    /// horizon is a no-op. Samples are appended at the configured step and
    /// the stores are re-downsampled with the fitting tolerance.
    pub fn prolong(&mut self, t: Instant) -> Result<(), OrreryError> {
        if t <= self.last_state.time {
            return Ok(());
        }
        let integrator = Arc::clone(&self.parameters.integrator);
        let step = self.parameters.step;
        let mut steps = 0usize;
        while self.last_state.time < t {
            let mut state = self.last_state.clone();
            let ode = |time: Instant,
                       positions: &[Vector3<f64>],
                       accelerations: &mut [Vector3<f64>]|
             -> Result<(), OrreryError> {
                self.massive_accelerations(time, positions, accelerations)
            };
            integrator.step(&ode, &mut state, step)?;
            self.last_state = state;
            for (index, trajectory) in self.trajectories.iter_mut().enumerate() {
                let root = trajectory.root();
                trajectory.append(
                    root,
                    self.last_state.time,
                    DegreesOfFreedom::new(
                        self.last_state.positions[index],
                        self.last_state.velocities[index],
                    ),
                )?;
            }
            steps += 1;
        }
        for trajectory in &mut self.trajectories {
            let root = trajectory.root();
            trajectory.downsample(root, self.accuracy.fitting_tolerance)?;
        }
        log::debug!(
            "prolonged to {} in {} step(s) of {}",
            self.last_state.time,
            steps,
            step
        );
        Ok(())
    }

    /// Position of `body` at `t`; requires `t_min() <= t <= t_max()`.
    pub fn evaluate_position(
        &self,
        body: usize,
        t: Instant,
    ) -> Result<Vector3<f64>, OrreryError> {
        let trajectory = &self.trajectories[body];
        trajectory.evaluate_position(trajectory.root(), t)
    }

    /// State of `body` at `t`; requires `t_min() <= t <= t_max()`.
    pub fn evaluate_degrees_of_freedom(
        &self,
        body: usize,
        t: Instant,
    ) -> Result<DegreesOfFreedom, OrreryError> {
        let trajectory = &self.trajectories[body];
        trajectory.evaluate_degrees_of_freedom(trajectory.root(), t)
    }

    /// Advisory request to drop history strictly before `t`. The request is
    /// clamped to live [`Guard`]s and never blocks; clamped requests simply
    /// forget less.
    pub fn eventually_forget_before(&mut self, t: Instant) {
        let mut bound = t;
        if let Some(pin) = self.guards.min_pin() {
            if pin < bound {
                log::debug!("forget before {t} deferred to {pin} by a live guard");
                bound = pin;
            }
        }
        for trajectory in &mut self.trajectories {
            trajectory.forget_before(bound);
        }
    }

    /// Returns a [`Guard`] pinned at the current `t_min()`. While it lives,
    /// no sample at or after the pin is forgotten.
    pub fn new_guard(&self) -> Guard {
        let time = self.t_min();
        let id = self.guards.next_id.fetch_add(1, Ordering::Relaxed);
        self.guards
            .pins
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push((id, time));
        Guard {
            registry: Arc::clone(&self.guards),
            id,
            time,
        }
    }

    /// Flows a massless probe through the field of the massive bodies with
    /// an adaptive-step integrator, appending every accepted step to
    /// `branch` of `trajectory` (which must hold the probe's starting
    /// state as its last sample).
    ///
    /// The ephemeris is prolonged to `target` first; probe accelerations at
    /// intermediate instants interpolate the stored trajectories.
    ///
    /// Return
    /// ----------
    /// * `Ok(ReachedTarget)` / `Ok(Abandoned)` per the cooperative
    ///   `should_abandon` callback;
    /// * `Err(OrreryError::MaxStepsExceeded)` with the partial trajectory
    ///   appended, so callers can keep the shorter horizon.
    pub fn flow_with_adaptive_step(
        &mut self,
        trajectory: &mut DiscreteTrajectory,
        branch: BranchId,
        target: Instant,
        parameters: &AdaptiveStepParameters,
        should_abandon: &dyn Fn() -> bool,
    ) -> Result<AdaptiveOutcome, OrreryError> {
        let start = trajectory
            .last(branch)?
            .ok_or(OrreryError::EmptyTrajectory)?;
        if target <= start.time {
            return Ok(AdaptiveOutcome::ReachedTarget);
        }
        self.prolong(target)?;

        let mut state = SystemState {
            time: start.time,
            positions: vec![start.degrees_of_freedom.position],
            velocities: vec![start.degrees_of_freedom.velocity],
        };
        let ode = |t: Instant,
                   positions: &[Vector3<f64>],
                   accelerations: &mut [Vector3<f64>]|
         -> Result<(), OrreryError> {
            let probe = positions[0];
            let mut acceleration = Vector3::zeros();
            for (index, body) in self.bodies.iter().enumerate() {
                let body_position = self.evaluate_position(index, t)?;
                let displacement = probe - body_position;
                let r2 = displacement.norm_squared();
                let one_over_r3 = 1.0 / (r2 * r2.sqrt());
                let mu = body.gravitational_parameter();
                acceleration -= mu * one_over_r3 * displacement;
                if let Some(geopotential) = &self.geopotentials[index] {
                    acceleration += mu * geopotential.acceleration(t, &displacement);
                }
            }
            accelerations[0] = acceleration;
            Ok(())
        };

        let mut append_error: Option<OrreryError> = None;
        let outcome = parameters.integrator.flow(
            &ode,
            &mut state,
            target,
            crate::integrators::StepTolerances {
                length_tolerance: parameters.length_tolerance,
                speed_tolerance: parameters.speed_tolerance,
            },
            parameters.max_steps,
            &mut |s: &SystemState| {
                if let Err(error) = trajectory.append(
                    branch,
                    s.time,
                    DegreesOfFreedom::new(s.positions[0], s.velocities[0]),
                ) {
                    append_error = Some(error);
                    return false;
                }
                !should_abandon()
            },
        );
        if let Some(error) = append_error {
            return Err(error);
        }
        outcome
    }

    /// Versioned snapshot of all retained state.
    pub fn snapshot(&self) -> EphemerisSnapshot {
        EphemerisSnapshot {
            version: 1,
            bodies: self.bodies.iter().map(|b| (**b).clone()).collect(),
            accuracy: self.accuracy,
            step_seconds: self.parameters.step.to_seconds(),
            integrator: self.parameters.integrator.name().to_string(),
            trajectories: self
                .trajectories
                .iter()
                .map(DiscreteTrajectory::snapshot)
                .collect(),
            time: self.last_state.time,
            positions: self.last_state.positions.clone(),
            velocities: self.last_state.velocities.clone(),
        }
    }

    /// Rebuilds an ephemeris from a [`snapshot`](Self::snapshot). Guards are
    /// live handles and do not survive serialization.
    pub fn from_snapshot(snapshot: EphemerisSnapshot) -> Result<Self, OrreryError> {
        if snapshot.version != 1 {
            return Err(OrreryError::UnsupportedSnapshotVersion(snapshot.version));
        }
        let bodies: Vec<Arc<Body>> = snapshot.bodies.into_iter().map(Arc::new).collect();
        let geopotentials = bodies
            .iter()
            .map(|body| {
                body.is_oblate()
                    .then(|| Geopotential::new(body, snapshot.accuracy.geopotential_tolerance))
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let indices_by_name = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| (body.name().to_string(), i))
            .collect();
        let trajectories = snapshot
            .trajectories
            .into_iter()
            .map(DiscreteTrajectory::from_snapshot)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            bodies,
            indices_by_name,
            geopotentials,
            trajectories,
            accuracy: snapshot.accuracy,
            parameters: FixedStepParameters {
                integrator: symplectic_integrator_by_name(&snapshot.integrator)?,
                step: Duration::from_seconds(snapshot.step_seconds),
            },
            last_state: SystemState {
                time: snapshot.time,
                positions: snapshot.positions,
                velocities: snapshot.velocities,
            },
            guards: Arc::new(GuardRegistry::default()),
        })
    }
}

/// Serialized form of an [`Ephemeris`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemerisSnapshot {
    version: u32,
    bodies: Vec<Body>,
    accuracy: AccuracyParameters,
    step_seconds: f64,
    integrator: String,
    trajectories: Vec<TrajectorySnapshot>,
    time: Instant,
    positions: Vec<Vector3<f64>>,
    velocities: Vec<Vector3<f64>>,
}
