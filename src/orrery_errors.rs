use hifitime::Epoch;
use thiserror::Error;

/// Crate-wide error type.
///
/// The variants fall into three families:
///
/// * **Argument errors** — contract violations by the caller (queries outside
///   the retained interval, out-of-order appends, unknown branch handles).
///   These are not recovered; callers are expected to track `t_min`/`t_max`
///   themselves.
/// * **Convergence errors** — the adaptive integrator exhausted its step
///   budget before reaching the target time. The variant carries the instant
///   actually reached so the partial trajectory remains usable.
/// * **Consistency errors** — internal invariant violations surfaced at
///   construction time (mismatched body/state counts, malformed harmonic
///   coefficient tables).
#[derive(Error, Debug)]
pub enum OrreryError {
    #[error("time {t} is outside the retained interval [{t_min}, {t_max}]")]
    TimeOutOfRange { t: Epoch, t_min: Epoch, t_max: Epoch },

    #[error("appended time {appended} is not after the last time {last} of the branch")]
    OutOfOrderAppend { last: Epoch, appended: Epoch },

    #[error("fork time {0} is not a retained sample of the trajectory")]
    ForkTimeNotInTrajectory(Epoch),

    #[error("branch handle {0} does not refer to a live branch")]
    BranchNotFound(usize),

    #[error("branch {0} has forks and cannot be deleted")]
    BranchHasForks(usize),

    #[error("the trajectory is empty")]
    EmptyTrajectory,

    #[error("adaptive integration exhausted its step budget at {reached}, short of {requested}")]
    MaxStepsExceeded { reached: Epoch, requested: Epoch },

    #[error("integration step must be strictly positive")]
    NonPositiveStep,

    #[error("expected {bodies} initial states, got {states}")]
    MismatchedInitialState { bodies: usize, states: usize },

    #[error("body {body}: harmonic coefficient row {row} has length {len}, expected {expected}")]
    MalformedHarmonicCoefficients {
        body: String,
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("body {body}: geopotential degree {degree} exceeds the supported maximum {max}")]
    UnsupportedGeopotentialDegree {
        body: String,
        degree: usize,
        max: usize,
    },

    #[error("geopotential tolerance must be strictly positive, got {0}")]
    NonPositiveGeopotentialTolerance(f64),

    #[error("body {0} carries no oblateness parameters")]
    BodyNotOblate(String),

    #[error("snapshot version {0} is not supported by this build")]
    UnsupportedSnapshotVersion(u32),

    #[error("snapshot names an integrator unknown to this build: {0}")]
    UnknownIntegrator(String),
}
