//! # Constants and type definitions for Orrery
//!
//! This module centralizes the **physical constants**, **conversion factors**, and **common type
//! definitions** used throughout the `orrery` library.
//!
//! ## Overview
//!
//! - Gravitational parameters of a few well-known bodies (used by tests and demos)
//! - Unit conversions (days ↔ seconds, AU ↔ metres)
//! - Core type aliases used across the crate
//!
//! These definitions are used by all main modules, including the force model, the
//! ephemeris, and the trajectory store.

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// Newtonian constant of gravitation, m³ kg⁻¹ s⁻² (CODATA 2018)
pub const GRAVITATIONAL_CONSTANT: f64 = 6.674_30e-11;

/// Number of seconds in a Julian day
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Number of seconds in a Julian year (365.25 days)
pub const SECONDS_PER_JULIAN_YEAR: f64 = 365.25 * SECONDS_PER_DAY;

/// Astronomical Unit in metres (IAU 2012)
pub const ASTRONOMICAL_UNIT: f64 = 149_597_870_700.0;

/// Solar gravitational parameter, m³ s⁻² (IAU 2015 nominal)
pub const SUN_GRAVITATIONAL_PARAMETER: f64 = 1.327_124_4e20;

/// Terrestrial gravitational parameter, m³ s⁻² (IAU 2015 nominal)
pub const EARTH_GRAVITATIONAL_PARAMETER: f64 = 3.986_004_418e14;

/// Lunar gravitational parameter, m³ s⁻²
pub const MOON_GRAVITATIONAL_PARAMETER: f64 = 4.902_800_066e12;

/// Earth equatorial reference radius in metres (WGS84)
pub const EARTH_REFERENCE_RADIUS: f64 = 6_378_137.0;

/// Earth degree-2 zonal coefficient J₂ (unnormalized, EGM2008)
pub const EARTH_J2: f64 = 1.082_626_68e-3;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Gravitational parameter μ = G·M in m³ s⁻²
pub type GravitationalParameter = f64;
/// Length in metres
pub type Metre = f64;
/// Speed in metres per second
pub type MetrePerSecond = f64;

/// Highest spherical-harmonic degree supported by the geopotential model.
///
/// The process-wide Legendre bound table is sized for this degree; bodies
/// declaring a higher degree are rejected at construction.
pub const MAX_GEOPOTENTIAL_DEGREE: usize = 30;
