//! # Damped spherical-harmonic gravity field
//!
//! This module evaluates the non-spherical part of a body's gravity field:
//! a closed-form degree-2 zonal (J₂) term plus a general spherical-harmonics
//! summation for higher degrees and orders.
//!
//! ## Damping
//! -----------------
//! Every degree is attenuated by a [`HarmonicDamping`]: full strength inside
//! an inner threshold, zero beyond an outer threshold (three times the inner
//! one), blended in between by a cubic sigmoid whose value **and first
//! derivative** are continuous at both thresholds. Truncating a harmonic with
//! a discontinuous force would corrupt the long-term energy conservation of
//! the symplectic integrator; the sigmoid keeps the force C¹.
//!
//! Per-degree thresholds are derived from a single `geopotential_tolerance`:
//! the threshold of an individual harmonic (n, m) is the distance where its
//! acceleration, relative to the central term, drops to the tolerance,
//!
//! ```text
//! rₙₘ = R · ((max|Pₙₘ| · (n+1) · √(Cₙₘ² + Sₙₘ²)) / ε)^(1/n)
//! ```
//!
//! and the per-degree thresholds are made monotonic so that lower degrees
//! keep their effect out to farther distances than higher ones. The degree-2
//! sectoral terms get their own damping, bounded by the degree-3 threshold.
//!
//! ## Conventions
//! -----------------
//! Coefficients are unnormalized, geodesy sign convention (no Condon–Shortley
//! phase), `J₂ = −C₂₀`. Accelerations returned here are **reduced**: per unit
//! gravitational parameter of the attracting body, in s⁻² · m.

use nalgebra::{Unit, Vector3};
use once_cell::sync::Lazy;

use crate::body::Body;
use crate::constants::MAX_GEOPOTENTIAL_DEGREE;
use crate::orrery_errors::OrreryError;
use crate::time::{seconds_since_j2000, Instant};

/// Upper bounds of |Pₙₘ| over [−1, 1] for the unnormalized associated
/// Legendre functions, built once at first use by dense sampling.
static MAX_ABS_LEGENDRE: Lazy<Vec<Vec<f64>>> = Lazy::new(|| {
    let size = MAX_GEOPOTENTIAL_DEGREE + 1;
    let mut max_abs = vec![vec![0.0_f64; size]; size];
    const SAMPLES: usize = 4001;
    for i in 0..SAMPLES {
        let x = -1.0 + 2.0 * i as f64 / (SAMPLES - 1) as f64;
        let s = (1.0 - x * x).max(0.0).sqrt();
        // Pmm, then upward in n at fixed m.
        let mut pmm = 1.0;
        for m in 0..size {
            if m > 0 {
                pmm *= (2 * m - 1) as f64 * s;
            }
            let mut pn_2 = pmm; // P(m, m)
            max_abs[m][m] = max_abs[m][m].max(pn_2.abs());
            if m + 1 < size {
                let mut pn_1 = x * (2 * m + 1) as f64 * pmm; // P(m+1, m)
                max_abs[m + 1][m] = max_abs[m + 1][m].max(pn_1.abs());
                for n in m + 2..size {
                    let pn = ((2 * n - 1) as f64 * x * pn_1 - (n + m - 1) as f64 * pn_2)
                        / (n - m) as f64;
                    max_abs[n][m] = max_abs[n][m].max(pn.abs());
                    pn_2 = pn_1;
                    pn_1 = pn;
                }
            }
        }
    }
    max_abs
});

/// Smooth distance-based attenuation of one gravity-harmonic degree.
///
/// The sigmoid σ is the cubic with σ(s₀) = 1, σ′(s₀) = 0, σ(3 s₀) = 0,
/// σ′(3 s₀) = 0, evaluated between the thresholds only:
/// coefficients (0, 9/(4 s₀), −3/(2 s₀²), 1/(4 s₀³)) in increasing powers
/// of r.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicDamping {
    inner_threshold: f64,
    outer_threshold: f64,
    // c₁, c₂, c₃; c₀ = 0.
    sigmoid_coefficients: [f64; 3],
}

impl HarmonicDamping {
    pub fn new(inner_threshold: f64) -> Self {
        let s0 = inner_threshold;
        Self {
            inner_threshold: s0,
            outer_threshold: 3.0 * s0,
            sigmoid_coefficients: [
                9.0 / (4.0 * s0),
                -3.0 / (2.0 * s0 * s0),
                1.0 / (4.0 * s0 * s0 * s0),
            ],
        }
    }

    /// A damping that never attenuates (degrees 0 and 1).
    pub fn always_full() -> Self {
        Self {
            inner_threshold: f64::INFINITY,
            outer_threshold: f64::INFINITY,
            sigmoid_coefficients: [0.0; 3],
        }
    }

    pub fn inner_threshold(&self) -> f64 {
        self.inner_threshold
    }

    pub fn outer_threshold(&self) -> f64 {
        self.outer_threshold
    }

    /// Returns (σ, σ′) at distance `r`.
    pub fn sigmoid(&self, r: f64) -> (f64, f64) {
        if r <= self.inner_threshold {
            (1.0, 0.0)
        } else if r >= self.outer_threshold {
            (0.0, 0.0)
        } else {
            let [c1, c2, c3] = self.sigmoid_coefficients;
            let sigma = r * (c1 + r * (c2 + r * c3));
            let sigma_prime = c1 + r * (2.0 * c2 + r * 3.0 * c3);
            (sigma, sigma_prime)
        }
    }
}

/// The damped geopotential of one oblate body.
///
/// Owns the per-degree damping schedule derived from the construction
/// tolerance; evaluation is a pure function of (time, displacement).
#[derive(Debug, Clone)]
pub struct Geopotential {
    reference_radius: f64,
    degree: usize,
    cos: Vec<Vec<f64>>,
    sin: Vec<Vec<f64>>,
    is_zonal: bool,
    polar_axis: Unit<Vector3<f64>>,
    equatorial: Unit<Vector3<f64>>,
    biequatorial: Unit<Vector3<f64>>,
    rotation_period: Option<f64>,
    reference_angle: f64,
    /// Indexed by degree; entries 0 and 1 never attenuate.
    degree_damping: Vec<HarmonicDamping>,
    /// Damping of the degree-2 sectoral and tesseral terms.
    sectoral_damping: HarmonicDamping,
    j2_r2: f64,
}

/// Individual harmonic threshold, ordered for the monotonicity pass.
struct Threshold {
    r: f64,
    n: usize,
    m: usize,
}

impl Geopotential {
    /// Builds the damping schedule of `body` for the given tolerance.
    ///
    /// Arguments
    /// -----------------
    /// * `body`: must carry [`OblatenessParameters`](crate::body::OblatenessParameters).
    /// * `tolerance`: relative acceleration below which a harmonic may be
    ///   smoothly faded out; must be strictly positive.
    pub fn new(body: &Body, tolerance: f64) -> Result<Self, OrreryError> {
        if !(tolerance > 0.0) {
            return Err(OrreryError::NonPositiveGeopotentialTolerance(tolerance));
        }
        let oblateness = body
            .oblateness()
            .ok_or_else(|| OrreryError::BodyNotOblate(body.name().to_string()))?;
        let r_ref = oblateness.reference_radius;
        let degree = oblateness.degree;
        let max_abs = &*MAX_ABS_LEGENDRE;

        let mut thresholds: Vec<Threshold> = Vec::new();
        for n in 2..=degree {
            for m in 0..=n {
                let cnm = oblateness.cos[n][m];
                let snm = oblateness.sin[n][m];
                let r = if cnm == 0.0 && snm == 0.0 {
                    0.0
                } else {
                    r_ref
                        * ((max_abs[n][m] * (n + 1) as f64 * cnm.hypot(snm)) / tolerance)
                            .powf(1.0 / n as f64)
                };
                thresholds.push(Threshold { r, n, m });
            }
        }
        thresholds.push(Threshold { r: f64::INFINITY, n: 0, m: 0 });
        thresholds.push(Threshold { r: f64::INFINITY, n: 1, m: 0 });
        // Pop order of the original schedule: decreasing r, ties broken by
        // decreasing order then decreasing degree.
        thresholds.sort_by(|a, b| {
            b.r.partial_cmp(&a.r)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.m.cmp(&a.m))
                .then(b.n.cmp(&a.n))
        });

        let mut degree_damping: Vec<HarmonicDamping> = Vec::new();
        let mut sectoral_damping = HarmonicDamping::always_full();
        for threshold in &thresholds {
            if threshold.n == 2 && threshold.m == 2 {
                // Sectoral damping must not outlive the degree-3 damping.
                sectoral_damping = if degree_damping.len() > 3 {
                    HarmonicDamping::new(degree_damping[3].inner_threshold())
                } else {
                    damping_from_threshold(threshold.r)
                };
            }
            // Monotonicity: every degree k ≤ n that is still unset gets at
            // least the degree-n threshold.
            while threshold.n >= degree_damping.len() {
                degree_damping.push(damping_from_threshold(threshold.r));
            }
        }

        let polar_axis = body
            .rotation()
            .map(|r| r.polar_axis)
            .unwrap_or_else(|| Unit::new_unchecked(Vector3::z()));
        let (equatorial, biequatorial) = equatorial_basis(&polar_axis);

        Ok(Self {
            reference_radius: r_ref,
            degree,
            cos: oblateness.cos.clone(),
            sin: oblateness.sin.clone(),
            is_zonal: oblateness.is_zonal(),
            polar_axis,
            equatorial,
            biequatorial,
            rotation_period: body.rotation().map(|r| r.rotation_period),
            reference_angle: body.rotation().map(|r| r.reference_angle).unwrap_or(0.0),
            degree_damping,
            sectoral_damping,
            j2_r2: oblateness.j2() * r_ref * r_ref,
        })
    }

    pub fn degree_damping(&self) -> &[HarmonicDamping] {
        &self.degree_damping
    }

    pub fn sectoral_damping(&self) -> &HarmonicDamping {
        &self.sectoral_damping
    }

    /// The highest degree whose outer threshold still reaches `r_norm`.
    fn limiting_degree(&self, r_norm: f64) -> usize {
        let limit = self
            .degree_damping
            .partition_point(|damping| r_norm < damping.outer_threshold());
        limit.saturating_sub(1)
    }

    /// Reduced harmonic acceleration at displacement `r` from the body
    /// centre: the full field minus the central 1/r² term, per unit μ.
    ///
    /// NaN radii short-circuit to NaN so that an unordered comparison never
    /// reaches the threshold partition.
    pub fn acceleration(&self, t: Instant, r: &Vector3<f64>) -> Vector3<f64> {
        let r_norm = r.norm();
        if r_norm.is_nan() {
            return Vector3::repeat(f64::NAN);
        }
        let max_degree = self.limiting_degree(r_norm).min(self.degree);
        if max_degree < 2 {
            return Vector3::zeros();
        }

        let mut acceleration = self.degree2_zonal_acceleration(r, r_norm);
        if max_degree > 2 || !self.is_zonal {
            acceleration += self.general_acceleration(t, r, r_norm, max_degree);
        }
        acceleration
    }

    /// Closed-form damped J₂ acceleration (degree 2, order 0), per unit μ.
    fn degree2_zonal_acceleration(&self, r: &Vector3<f64>, r_norm: f64) -> Vector3<f64> {
        let (sigma, sigma_prime) = self.degree_damping[2].sigmoid(r_norm);
        if sigma == 0.0 && sigma_prime == 0.0 {
            return Vector3::zeros();
        }
        let axis = self.polar_axis.into_inner();
        let r2 = r_norm * r_norm;
        let one_over_r2 = 1.0 / r2;
        let one_over_r5 = one_over_r2 * one_over_r2 / r_norm;
        let z = axis.dot(r);
        let j2_over_r5 = self.j2_r2 * one_over_r5;
        let axis_effect = -3.0 * j2_over_r5 * z * axis;
        let radial_effect = j2_over_r5 * (-1.5 + 7.5 * z * z * one_over_r2) * r;
        let undamped = axis_effect + radial_effect;
        if sigma_prime == 0.0 {
            return undamped;
        }
        // ∇(σU) = σ∇U + U σ′ r̂, with U the degree-2 zonal potential per μ.
        let sin_beta = z / r_norm;
        let potential =
            -self.j2_r2 * (3.0 * sin_beta * sin_beta - 1.0) / (2.0 * r_norm * r2);
        sigma * undamped + sigma_prime * potential * (r / r_norm)
    }

    /// General damped spherical-harmonics summation over 2 ≤ n ≤ `max_degree`,
    /// skipping the (2, 0) term handled in closed form.
    fn general_acceleration(
        &self,
        t: Instant,
        r: &Vector3<f64>,
        r_norm: f64,
        max_degree: usize,
    ) -> Vector3<f64> {
        let z_hat = self.polar_axis.into_inner();
        let (x_hat, y_hat) = if self.is_zonal {
            (self.equatorial.into_inner(), self.biequatorial.into_inner())
        } else {
            self.surface_basis(t)
        };

        let x = r.dot(&x_hat);
        let y = r.dot(&y_hat);
        let z = r.dot(&z_hat);
        let one_over_r = 1.0 / r_norm;
        let r_hat = r * one_over_r;

        let r_equatorial = x.hypot(y);
        let (cos_lambda, sin_lambda) = if r_equatorial > 0.0 {
            (x / r_equatorial, y / r_equatorial)
        } else {
            (1.0, 0.0)
        };
        let cos_beta = r_equatorial * one_over_r;
        let sin_beta = z * one_over_r;

        // Local spherical basis: β̂ points towards increasing latitude, λ̂
        // towards increasing longitude.
        let beta_hat =
            (-sin_beta * cos_lambda) * x_hat - (sin_beta * sin_lambda) * y_hat + cos_beta * z_hat;
        let lambda_hat = cos_lambda * y_hat - sin_lambda * x_hat;

        // m-th derivatives of the Legendre polynomials at sin β, filled by
        // the doubly-recursive rule n·DᵐPₙ = (2n−1)(x·DᵐPₙ₋₁ + m·Dᵐ⁻¹Pₙ₋₁)
        // − (n−1)·DᵐPₙ₋₂.
        let size = max_degree + 2;
        let mut dmpn = vec![vec![0.0_f64; size]; size];
        dmpn[0][0] = 1.0;
        if size > 1 {
            dmpn[1][0] = sin_beta;
            dmpn[1][1] = 1.0;
        }
        for n in 2..size {
            for m in 0..=n {
                let prev = dmpn[n - 1][m];
                let prev_lower = if m > 0 { dmpn[n - 1][m - 1] } else { 0.0 };
                let prev2 = if m <= n - 2 { dmpn[n - 2][m] } else { 0.0 };
                dmpn[n][m] = ((2 * n - 1) as f64 * (sin_beta * prev + m as f64 * prev_lower)
                    - (n - 1) as f64 * prev2)
                    / n as f64;
            }
        }

        // cos mλ, sin mλ and cosᵐ β by recurrence.
        let mut cos_mlambda = vec![0.0_f64; size];
        let mut sin_mlambda = vec![0.0_f64; size];
        let mut cos_beta_to_the = vec![0.0_f64; size];
        cos_mlambda[0] = 1.0;
        sin_mlambda[0] = 0.0;
        cos_beta_to_the[0] = 1.0;
        for m in 1..size {
            cos_mlambda[m] = cos_mlambda[m - 1] * cos_lambda - sin_mlambda[m - 1] * sin_lambda;
            sin_mlambda[m] = sin_mlambda[m - 1] * cos_lambda + cos_mlambda[m - 1] * sin_lambda;
            cos_beta_to_the[m] = cos_beta_to_the[m - 1] * cos_beta;
        }

        let mut acceleration = Vector3::zeros();
        // ℜₙ = Rⁿ / rⁿ⁺¹, the radial factor of the potential per μ.
        let mut radial = self.reference_radius * one_over_r * one_over_r; // ℜ₁
        for n in 2..=max_degree {
            radial *= self.reference_radius * one_over_r;
            let radial_prime = -((n + 1) as f64) * radial * one_over_r;
            let (sigma_n, sigma_n_prime) = self.degree_damping[n].sigmoid(r_norm);
            let max_order = if self.is_zonal { 0 } else { n };
            for m in 0..=max_order {
                if n == 2 && m == 0 {
                    continue; // closed form.
                }
                let cnm = self.cos[n][m];
                let snm = self.sin[n][m];
                if cnm == 0.0 && snm == 0.0 {
                    continue;
                }
                let (sigma, sigma_prime) = if n == 2 {
                    self.sectoral_damping.sigmoid(r_norm)
                } else {
                    (sigma_n, sigma_n_prime)
                };
                if sigma == 0.0 && sigma_prime == 0.0 {
                    continue;
                }

                // 𝔅ₙₘ(β) = cosᵐβ · DᵐPₙ(sin β) and its derivative in β.
                let dm_pn = dmpn[n][m];
                let dm1_pn = if m + 1 <= n { dmpn[n][m + 1] } else { 0.0 };
                let b = cos_beta_to_the[m] * dm_pn;
                let db_dbeta = -(m as f64)
                    * sin_beta
                    * (if m >= 1 { cos_beta_to_the[m - 1] } else { 0.0 })
                    * dm_pn
                    + cos_beta_to_the[m] * cos_beta * dm1_pn;
                // 𝔏ₙₘ(λ) and (1/cos β)·d𝔏/dλ · 𝔅: the cos β in the
                // longitude gradient cancels against one power of cosᵐβ.
                let l = cnm * cos_mlambda[m] + snm * sin_mlambda[m];
                let l_prime = m as f64 * (snm * cos_mlambda[m] - cnm * sin_mlambda[m]);
                let b_over_cos_beta = if m >= 1 {
                    cos_beta_to_the[m - 1] * dm_pn
                } else {
                    0.0
                };

                let gradient = radial_prime * b * l * r_hat
                    + radial * one_over_r * db_dbeta * l * beta_hat
                    + radial * one_over_r * b_over_cos_beta * l_prime * lambda_hat;
                let term = if sigma_prime == 0.0 {
                    sigma * gradient
                } else {
                    sigma * gradient + sigma_prime * (radial * b * l) * r_hat
                };
                acceleration += term;
            }
        }
        acceleration
    }

    /// Body-fixed equatorial basis at `t`, rotated by the body spin.
    fn surface_basis(&self, t: Instant) -> (Vector3<f64>, Vector3<f64>) {
        let angle = match self.rotation_period {
            Some(period) if period != 0.0 => {
                self.reference_angle
                    + std::f64::consts::TAU * seconds_since_j2000(t) / period
            }
            _ => self.reference_angle,
        };
        let (sin, cos) = angle.sin_cos();
        let e1 = self.equatorial.into_inner();
        let e2 = self.biequatorial.into_inner();
        (cos * e1 + sin * e2, cos * e2 - sin * e1)
    }
}

fn damping_from_threshold(r: f64) -> HarmonicDamping {
    if r.is_infinite() {
        HarmonicDamping::always_full()
    } else {
        HarmonicDamping::new(r)
    }
}

/// Deterministic orthonormal pair perpendicular to `axis`.
fn equatorial_basis(axis: &Unit<Vector3<f64>>) -> (Unit<Vector3<f64>>, Unit<Vector3<f64>>) {
    let z = axis.into_inner();
    let seed = if z.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let e1 = Unit::new_normalize(seed - seed.dot(&z) * z);
    let e2 = Unit::new_normalize(z.cross(&e1));
    (e1, e2)
}
