//! # Trajectories: forking, append-only time series storage
//!
//! The central type is [`DiscreteTrajectory`], a fork tree of time-ordered
//! (instant, degrees-of-freedom) samples. A branch may be created at any
//! existing point of an ancestor without copying; descendants share the
//! ancestor prefix by reference.
//!
//! Modules
//! -----------------
//! * [`discrete_trajectory`](crate::trajectories::discrete_trajectory) – the
//!   fork-tree store: forking, appending, forgetting, Hermite evaluation,
//!   tolerance-driven downsampling, lazy branch-aware iteration, snapshots.
//!
//! Data Model
//! -----------------
//! * **Arena ownership:** the whole fork tree is owned by one
//!   [`DiscreteTrajectory`]; branches are referenced by stable [`BranchId`]
//!   handles; parent links are non-owning back references used only for
//!   prefix traversal.
//! * **Ordering:** within any branch, sample times strictly increase; a
//!   sample belongs to exactly one branch.
//! * **Forgetting:** only the root prefix may be forgotten, and never past a
//!   live fork point; the ephemeris layer additionally clamps to live
//!   guards.

pub mod discrete_trajectory;

pub use discrete_trajectory::{
    BranchId, DiscreteTrajectory, Sample, TrajectoryIterator, TrajectorySnapshot,
};
