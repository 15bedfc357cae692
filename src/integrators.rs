//! # Integration step contracts and reference integrators
//!
//! The engine consumes integrators through two abstract contracts:
//!
//! * [`SymplecticIntegrator`] — one deterministic fixed step of a
//!   kick/drift splitting, used for the bulk long-horizon integration of the
//!   massive bodies;
//! * [`AdaptiveIntegrator`] — tolerance-driven variable-step flow of a small
//!   system to a target instant, used for per-object predictions where
//!   bounded local error matters more than fixed cadence.
//!
//! Reference implementations are provided: Störmer–Verlet (order 2) and the
//! Forest–Ruth order-4 symplectic composition for the fixed-step contract,
//! and an embedded Dormand–Prince 5(4) pair for the adaptive one. Exact
//! parity with any external integrator library is a non-goal; what the engine
//! requires is that a given (integrator, step, state) triple always produces
//! the same result.

use std::fmt::Debug;

use hifitime::Duration;
use nalgebra::Vector3;

use crate::orrery_errors::OrreryError;
use crate::time::Instant;

/// Right-hand side of the second-order problem q̈ = a(t, q).
///
/// `accelerations` has the same length as `positions`; implementations must
/// overwrite every entry.
pub trait SecondOrderOde {
    fn accelerations(
        &self,
        t: Instant,
        positions: &[Vector3<f64>],
        accelerations: &mut [Vector3<f64>],
    ) -> Result<(), OrreryError>;
}

impl<F> SecondOrderOde for F
where
    F: Fn(Instant, &[Vector3<f64>], &mut [Vector3<f64>]) -> Result<(), OrreryError>,
{
    fn accelerations(
        &self,
        t: Instant,
        positions: &[Vector3<f64>],
        accelerations: &mut [Vector3<f64>],
    ) -> Result<(), OrreryError> {
        self(t, positions, accelerations)
    }
}

/// Positions and velocities of every integrated body at one instant.
#[derive(Debug, Clone)]
pub struct SystemState {
    pub time: Instant,
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
}

/// One deterministic fixed step.
pub trait SymplecticIntegrator: Send + Sync + Debug {
    /// Advances `state` by exactly `step`.
    fn step(
        &self,
        ode: &dyn SecondOrderOde,
        state: &mut SystemState,
        step: Duration,
    ) -> Result<(), OrreryError>;

    /// Stable identifier used by snapshots.
    fn name(&self) -> &'static str;
}

/// Resolves a snapshot integrator name back to a built-in integrator.
pub fn symplectic_integrator_by_name(
    name: &str,
) -> Result<std::sync::Arc<dyn SymplecticIntegrator>, OrreryError> {
    match name {
        "stormer_verlet" => Ok(std::sync::Arc::new(StormerVerlet)),
        "forest_ruth_1990_order_4" => Ok(std::sync::Arc::new(ForestRuth1990Order4)),
        other => Err(OrreryError::UnknownIntegrator(other.to_string())),
    }
}

/// Runs one drift/kick composition step: drift by `drifts[0]·h`, kick by
/// `kicks[0]·h`, drift by `drifts[1]·h`, … — `drifts` has one more entry
/// than `kicks`, and both sum to 1.
fn composition_step(
    drifts: &[f64],
    kicks: &[f64],
    ode: &dyn SecondOrderOde,
    state: &mut SystemState,
    step: Duration,
) -> Result<(), OrreryError> {
    let h = step.to_seconds();
    let t0 = state.time;
    let mut accelerations = vec![Vector3::zeros(); state.positions.len()];
    let mut elapsed = 0.0;
    for (i, &c) in drifts.iter().enumerate() {
        if c != 0.0 {
            let dt = c * h;
            for (q, v) in state.positions.iter_mut().zip(&state.velocities) {
                *q += dt * v;
            }
            elapsed += dt;
        }
        if let Some(&d) = kicks.get(i) {
            ode.accelerations(
                t0 + Duration::from_seconds(elapsed),
                &state.positions,
                &mut accelerations,
            )?;
            let dt = d * h;
            for (v, a) in state.velocities.iter_mut().zip(&accelerations) {
                *v += dt * a;
            }
        }
    }
    // The time advances by the exact Duration, not the accumulated floats.
    state.time = t0 + step;
    Ok(())
}

/// Störmer–Verlet (position form), second order, symplectic.
#[derive(Debug, Clone, Copy, Default)]
pub struct StormerVerlet;

impl SymplecticIntegrator for StormerVerlet {
    fn step(
        &self,
        ode: &dyn SecondOrderOde,
        state: &mut SystemState,
        step: Duration,
    ) -> Result<(), OrreryError> {
        composition_step(&[0.5, 0.5], &[1.0], ode, state, step)
    }

    fn name(&self) -> &'static str {
        "stormer_verlet"
    }
}

/// Forest & Ruth (1990), fourth-order symplectic composition.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForestRuth1990Order4;

impl SymplecticIntegrator for ForestRuth1990Order4 {
    fn step(
        &self,
        ode: &dyn SecondOrderOde,
        state: &mut SystemState,
        step: Duration,
    ) -> Result<(), OrreryError> {
        // θ = 1 / (2 − 2^{1/3}).
        let theta = 1.0 / (2.0 - 2.0_f64.cbrt());
        let drifts = [
            theta / 2.0,
            (1.0 - theta) / 2.0,
            (1.0 - theta) / 2.0,
            theta / 2.0,
        ];
        let kicks = [theta, 1.0 - 2.0 * theta, theta];
        composition_step(&drifts, &kicks, ode, state, step)
    }

    fn name(&self) -> &'static str {
        "forest_ruth_1990_order_4"
    }
}

/// Error tolerances of the adaptive flow, split by component kind.
#[derive(Debug, Clone, Copy)]
pub struct StepTolerances {
    /// Admissible local position error, metres.
    pub length_tolerance: f64,
    /// Admissible local velocity error, metres per second.
    pub speed_tolerance: f64,
}

/// Outcome of an adaptive flow that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveOutcome {
    ReachedTarget,
    /// The cooperative callback requested abandonment; the state holds the
    /// last accepted step.
    Abandoned,
}

/// Tolerance-driven flow to a target instant.
pub trait AdaptiveIntegrator: Send + Sync + Debug {
    /// Advances `state` to `target`, calling `on_step` after every accepted
    /// step. `on_step` returns `false` to abandon the flow cooperatively.
    ///
    /// Return
    /// ----------
    /// * `Ok(ReachedTarget)` when `state.time == target`;
    /// * `Ok(Abandoned)` when `on_step` requested abandonment;
    /// * `Err(OrreryError::MaxStepsExceeded)` when `max_steps` accepted steps
    ///   did not suffice — `state` holds the partial result.
    fn flow(
        &self,
        ode: &dyn SecondOrderOde,
        state: &mut SystemState,
        target: Instant,
        tolerances: StepTolerances,
        max_steps: usize,
        on_step: &mut dyn FnMut(&SystemState) -> bool,
    ) -> Result<AdaptiveOutcome, OrreryError>;

    fn name(&self) -> &'static str;
}

/// Embedded Dormand–Prince 5(4) pair with standard step-size control.
#[derive(Debug, Clone, Copy, Default)]
pub struct DormandPrince54;

// Dormand & Prince (1980) coefficients.
const A: [[f64; 6]; 6] = [
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];
const C: [f64; 6] = [1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const B5: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];
const B4: [f64; 7] = [
    5179.0 / 57600.0,
    0.0,
    7571.0 / 16695.0,
    393.0 / 640.0,
    -92097.0 / 339200.0,
    187.0 / 2100.0,
    1.0 / 40.0,
];

const SAFETY: f64 = 0.9;
const MIN_SCALE: f64 = 0.2;
const MAX_SCALE: f64 = 4.0;
/// Smallest admissible step, seconds. The controller never shrinks below
/// this, so a pathological tolerance cannot stall the loop.
const MIN_STEP: f64 = 1.0e-6;

impl AdaptiveIntegrator for DormandPrince54 {
    fn flow(
        &self,
        ode: &dyn SecondOrderOde,
        state: &mut SystemState,
        target: Instant,
        tolerances: StepTolerances,
        max_steps: usize,
        on_step: &mut dyn FnMut(&SystemState) -> bool,
    ) -> Result<AdaptiveOutcome, OrreryError> {
        let n = state.positions.len();
        let requested = target;
        let mut remaining = (target - state.time).to_seconds();
        if remaining <= 0.0 {
            return Ok(AdaptiveOutcome::ReachedTarget);
        }
        // Deterministic first trial step: a fixed fraction of the interval.
        let mut h = (remaining / 64.0).max(MIN_STEP);

        let mut kq: Vec<Vec<Vector3<f64>>> = vec![vec![Vector3::zeros(); n]; 7];
        let mut kv: Vec<Vec<Vector3<f64>>> = vec![vec![Vector3::zeros(); n]; 7];
        let mut stage_q = vec![Vector3::zeros(); n];
        let mut accelerations = vec![Vector3::zeros(); n];

        let mut accepted = 0usize;
        while remaining > 0.0 {
            if accepted >= max_steps {
                return Err(OrreryError::MaxStepsExceeded {
                    reached: state.time,
                    requested,
                });
            }
            h = h.min(remaining);

            // Stage 0 at the current state.
            ode.accelerations(state.time, &state.positions, &mut accelerations)?;
            for i in 0..n {
                kq[0][i] = state.velocities[i];
                kv[0][i] = accelerations[i];
            }
            // Stages 1..=6.
            for s in 1..7 {
                let mut stage_v = vec![Vector3::zeros(); n];
                for i in 0..n {
                    let mut dq = Vector3::zeros();
                    let mut dv = Vector3::zeros();
                    for (j, &a) in A[s - 1].iter().enumerate().take(s) {
                        if a != 0.0 {
                            dq += a * kq[j][i];
                            dv += a * kv[j][i];
                        }
                    }
                    stage_q[i] = state.positions[i] + h * dq;
                    stage_v[i] = state.velocities[i] + h * dv;
                }
                let t_stage = state.time + Duration::from_seconds(C[s - 1] * h);
                ode.accelerations(t_stage, &stage_q, &mut accelerations)?;
                for i in 0..n {
                    kq[s][i] = stage_v[i];
                    kv[s][i] = accelerations[i];
                }
            }

            // Fifth-order solution and embedded error estimate.
            let mut error_ratio: f64 = 0.0;
            let mut new_q = vec![Vector3::zeros(); n];
            let mut new_v = vec![Vector3::zeros(); n];
            for i in 0..n {
                let mut q5 = Vector3::zeros();
                let mut v5 = Vector3::zeros();
                let mut q_err = Vector3::zeros();
                let mut v_err = Vector3::zeros();
                for s in 0..7 {
                    q5 += B5[s] * kq[s][i];
                    v5 += B5[s] * kv[s][i];
                    q_err += (B5[s] - B4[s]) * kq[s][i];
                    v_err += (B5[s] - B4[s]) * kv[s][i];
                }
                new_q[i] = state.positions[i] + h * q5;
                new_v[i] = state.velocities[i] + h * v5;
                error_ratio = error_ratio
                    .max(h * q_err.norm() / tolerances.length_tolerance)
                    .max(h * v_err.norm() / tolerances.speed_tolerance);
            }

            if error_ratio <= 1.0 || h <= MIN_STEP {
                state.positions = new_q;
                state.velocities = new_v;
                state.time = state.time + Duration::from_seconds(h);
                remaining = (target - state.time).to_seconds();
                accepted += 1;
                if !on_step(state) {
                    return Ok(AdaptiveOutcome::Abandoned);
                }
            }

            // Standard fifth-order controller; the clamp bounds both panic
            // shrinking and overconfident growth.
            let scale = if error_ratio > 0.0 {
                (SAFETY * error_ratio.powf(-0.2)).clamp(MIN_SCALE, MAX_SCALE)
            } else {
                MAX_SCALE
            };
            h = (h * scale).max(MIN_STEP);
        }
        Ok(AdaptiveOutcome::ReachedTarget)
    }

    fn name(&self) -> &'static str {
        "dormand_prince_1980_order_5_4"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{instant_from_j2000_seconds, j2000};
    use approx::assert_relative_eq;
    use std::f64::consts::TAU;

    /// q̈ = −ω² q, the harmonic oscillator: period 2π/ω, conserved energy.
    fn oscillator(omega: f64) -> impl SecondOrderOde {
        move |_t: Instant, q: &[Vector3<f64>], a: &mut [Vector3<f64>]| {
            for (ai, qi) in a.iter_mut().zip(q) {
                *ai = -omega * omega * qi;
            }
            Ok(())
        }
    }

    fn oscillator_state() -> SystemState {
        SystemState {
            time: j2000(),
            positions: vec![Vector3::new(1.0, 0.0, 0.0)],
            velocities: vec![Vector3::zeros()],
        }
    }

    fn energy(state: &SystemState, omega: f64) -> f64 {
        0.5 * state.velocities[0].norm_squared()
            + 0.5 * omega * omega * state.positions[0].norm_squared()
    }

    #[test]
    fn stormer_verlet_conserves_energy() {
        let omega = 1.0;
        let ode = oscillator(omega);
        let mut state = oscillator_state();
        let e0 = energy(&state, omega);
        let step = Duration::from_seconds(0.01);
        for _ in 0..100_000 {
            StormerVerlet.step(&ode, &mut state, step).unwrap();
        }
        // Symplectic: bounded energy error over many periods, no drift.
        assert_relative_eq!(energy(&state, omega), e0, max_relative = 1.0e-3);
    }

    #[test]
    fn forest_ruth_is_higher_order_than_verlet() {
        let omega = 1.0;
        let ode = oscillator(omega);
        let step = Duration::from_seconds(TAU / 200.0);
        let steps = 200; // one period.

        let mut verlet = oscillator_state();
        let mut forest_ruth = oscillator_state();
        for _ in 0..steps {
            StormerVerlet.step(&ode, &mut verlet, step).unwrap();
            ForestRuth1990Order4
                .step(&ode, &mut forest_ruth, step)
                .unwrap();
        }
        let verlet_error = (verlet.positions[0] - Vector3::new(1.0, 0.0, 0.0)).norm();
        let forest_ruth_error =
            (forest_ruth.positions[0] - Vector3::new(1.0, 0.0, 0.0)).norm();
        assert!(forest_ruth_error < verlet_error / 100.0);
    }

    #[test]
    fn fixed_step_is_deterministic() {
        let ode = oscillator(1.0);
        let step = Duration::from_seconds(0.125);
        let run = || {
            let mut state = oscillator_state();
            for _ in 0..1000 {
                ForestRuth1990Order4.step(&ode, &mut state, step).unwrap();
            }
            state
        };
        let first = run();
        let second = run();
        assert_eq!(first.positions[0], second.positions[0]);
        assert_eq!(first.velocities[0], second.velocities[0]);
        assert_eq!(first.time, second.time);
    }

    #[test]
    fn dormand_prince_reaches_target_within_tolerance() {
        let omega = 1.0;
        let ode = oscillator(omega);
        let mut state = oscillator_state();
        let target = instant_from_j2000_seconds(TAU); // one period.
        let outcome = DormandPrince54
            .flow(
                &ode,
                &mut state,
                target,
                StepTolerances {
                    length_tolerance: 1.0e-10,
                    speed_tolerance: 1.0e-10,
                },
                100_000,
                &mut |_| true,
            )
            .unwrap();
        assert_eq!(outcome, AdaptiveOutcome::ReachedTarget);
        assert_eq!(state.time, target);
        assert_relative_eq!(state.positions[0].x, 1.0, epsilon = 1.0e-6);
        assert_relative_eq!(state.velocities[0].x, 0.0, epsilon = 1.0e-6);
    }

    #[test]
    fn dormand_prince_reports_exhaustion_with_partial_state() {
        let ode = oscillator(1.0);
        let mut state = oscillator_state();
        let target = instant_from_j2000_seconds(TAU);
        let result = DormandPrince54.flow(
            &ode,
            &mut state,
            target,
            StepTolerances {
                length_tolerance: 1.0e-12,
                speed_tolerance: 1.0e-12,
            },
            3,
            &mut |_| true,
        );
        match result {
            Err(OrreryError::MaxStepsExceeded { reached, requested }) => {
                assert!(reached > j2000());
                assert!(reached < target);
                assert_eq!(requested, target);
                assert_eq!(state.time, reached);
            }
            other => panic!("expected MaxStepsExceeded, got {other:?}"),
        }
    }

    #[test]
    fn dormand_prince_abandons_cooperatively() {
        let ode = oscillator(1.0);
        let mut state = oscillator_state();
        let target = instant_from_j2000_seconds(TAU);
        let mut calls = 0;
        let outcome = DormandPrince54
            .flow(
                &ode,
                &mut state,
                target,
                StepTolerances {
                    length_tolerance: 1.0e-9,
                    speed_tolerance: 1.0e-9,
                },
                100_000,
                &mut |_| {
                    calls += 1;
                    calls < 5
                },
            )
            .unwrap();
        assert_eq!(outcome, AdaptiveOutcome::Abandoned);
        assert_eq!(calls, 5);
        assert!(state.time < target);
    }
}
