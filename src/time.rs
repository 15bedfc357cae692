//! # Time scale of the engine
//!
//! The engine measures simulated time with [`hifitime::Epoch`], re-exported
//! here as [`Instant`]. Epochs are backed by integer nanoseconds, so stepping
//! by a fixed [`Duration`] is exact and reproducible across runs — a
//! requirement for deterministic long-horizon integration.
//!
//! All helpers below anchor at J2000 TT, the natural epoch for planetary
//! work.

use hifitime::{Duration, Epoch};

/// A point in simulated time.
pub type Instant = Epoch;

/// Returns the J2000 reference epoch (2000-01-01T12:00:00 TT).
pub fn j2000() -> Instant {
    Epoch::from_tt_duration(Duration::ZERO)
}

/// Returns the instant `seconds` after J2000 TT.
///
/// Arguments
/// -----------------
/// * `seconds`: offset from J2000, in SI seconds (may be negative).
pub fn instant_from_j2000_seconds(seconds: f64) -> Instant {
    j2000() + Duration::from_seconds(seconds)
}

/// Returns the signed offset of `t` from J2000 TT, in SI seconds.
pub fn seconds_since_j2000(t: Instant) -> f64 {
    (t - j2000()).to_seconds()
}
