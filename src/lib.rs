//! # Orrery: an incremental, cache-bounded N-body trajectory engine
//!
//! Given a set of massive bodies and an initial state, `orrery` computes and
//! stores gravitational trajectories over time, serves position/velocity
//! queries at arbitrary past instants, and supports both a long-running bulk
//! fixed-step integration and many short-lived, cancellable, adaptive-step
//! predictions running concurrently.
//!
//! ## Components
//! -----------------
//! * [`trajectories`] – the forking, append-only trajectory store, the
//!   foundation for everything else.
//! * [`geopotential`] – Newtonian gravity corrections for oblate bodies,
//!   with smooth distance-based damping of each harmonic degree.
//! * [`ephemeris`] – orchestrates integration over the store with a
//!   pluggable symplectic integrator; owns prolongation, guards, and the
//!   forgetting policy.
//! * [`bundle`] – a concurrent task/join primitive to parallelize
//!   independent ephemeris operations.
//! * [`prognosticator`] – a per-tracked-object asynchronous predictor with
//!   a single-slot request mailbox and cooperative cancellation.
//!
//! ## Typical usage
//! -----------------
//! ```rust,no_run
//! use std::sync::Arc;
//! use hifitime::Duration;
//! use nalgebra::Vector3;
//! use orrery::body::Body;
//! use orrery::constants::{EARTH_GRAVITATIONAL_PARAMETER, SECONDS_PER_DAY};
//! use orrery::degrees_of_freedom::DegreesOfFreedom;
//! use orrery::ephemeris::{AccuracyParameters, Ephemeris, FixedStepParameters};
//! use orrery::integrators::ForestRuth1990Order4;
//! use orrery::time::{instant_from_j2000_seconds, j2000};
//!
//! let earth = Arc::new(Body::massive("Earth", EARTH_GRAVITATIONAL_PARAMETER));
//! let mut ephemeris = Ephemeris::new(
//!     vec![earth],
//!     vec![DegreesOfFreedom::new(Vector3::zeros(), Vector3::zeros())],
//!     j2000(),
//!     AccuracyParameters {
//!         fitting_tolerance: 1.0,
//!         geopotential_tolerance: 1.0e-9,
//!     },
//!     FixedStepParameters {
//!         integrator: Arc::new(ForestRuth1990Order4),
//!         step: Duration::from_seconds(60.0),
//!     },
//! )
//! .unwrap();
//! ephemeris.prolong(instant_from_j2000_seconds(SECONDS_PER_DAY)).unwrap();
//! ```

pub mod body;
pub mod bundle;
pub mod constants;
pub mod degrees_of_freedom;
pub mod ephemeris;
pub mod geopotential;
pub mod integrators;
pub mod orrery_errors;
pub mod prognosticator;
pub mod time;
pub mod trajectories;

pub use body::Body;
pub use bundle::Bundle;
pub use degrees_of_freedom::DegreesOfFreedom;
pub use ephemeris::{
    AccuracyParameters, AdaptiveStepParameters, Ephemeris, FixedStepParameters, Guard,
};
pub use geopotential::{Geopotential, HarmonicDamping};
pub use orrery_errors::OrreryError;
pub use prognosticator::{Prognosticator, Prognostication};
pub use time::Instant;
pub use trajectories::{BranchId, DiscreteTrajectory};
