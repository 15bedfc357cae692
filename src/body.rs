//! # Massive bodies as capability records
//!
//! A [`Body`] carries an identity and a gravitational parameter, plus two
//! optional capability records queried by presence:
//!
//! * [`RotationParameters`] — polar axis and rotation period, needed to
//!   orient a body-fixed frame;
//! * [`OblatenessParameters`] — reference radius and spherical-harmonic
//!   coefficient tables, needed by the geopotential force model.
//!
//! There is deliberately no massive → rotating → oblate type hierarchy: an
//! oblate body is simply a body where both records are present, and code that
//! needs a capability asks for it with [`Body::rotation`] /
//! [`Body::oblateness`].

use nalgebra::{Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::constants::{GravitationalParameter, Metre, MAX_GEOPOTENTIAL_DEGREE};
use crate::orrery_errors::OrreryError;

/// Orientation and spin of a rotating body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationParameters {
    /// Unit vector along the north polar axis, in the engine frame.
    pub polar_axis: Unit<Vector3<f64>>,
    /// Sidereal rotation period, seconds.
    pub rotation_period: f64,
    /// Rotation angle of the prime meridian at the engine epoch, radians.
    pub reference_angle: f64,
}

/// Spherical-harmonic description of a non-spherical gravity field.
///
/// The coefficient tables are **unnormalized** lower-triangular matrices
/// `cos[n][m]` (Cₙₘ) and `sin[n][m]` (Sₙₘ) for `0 ≤ m ≤ n ≤ degree`, with the
/// convention `C₀₀ = 1` and the degree-1 row zero (centre of mass at the
/// origin). `J₂ = −C₂₀`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OblatenessParameters {
    pub reference_radius: Metre,
    pub degree: usize,
    pub cos: Vec<Vec<f64>>,
    pub sin: Vec<Vec<f64>>,
}

impl OblatenessParameters {
    /// Builds a zonal-only field from `J₂` alone, the common case for bodies
    /// where higher harmonics are unknown or negligible.
    pub fn from_j2(reference_radius: Metre, j2: f64) -> Self {
        let mut cos = vec![vec![1.0], vec![0.0, 0.0], vec![0.0, 0.0, 0.0]];
        let sin = vec![vec![0.0], vec![0.0, 0.0], vec![0.0, 0.0, 0.0]];
        cos[2][0] = -j2;
        Self {
            reference_radius,
            degree: 2,
            cos,
            sin,
        }
    }

    pub fn j2(&self) -> f64 {
        -self.cos[2][0]
    }

    /// Whether the field has no tesseral or sectoral terms (Sₙₘ = Cₙₘ = 0 for
    /// all m > 0). Zonal fields do not need the body orientation.
    pub fn is_zonal(&self) -> bool {
        self.cos
            .iter()
            .zip(&self.sin)
            .all(|(c, s)| c.iter().skip(1).all(|&x| x == 0.0) && s.iter().skip(1).all(|&x| x == 0.0))
    }
}

/// A massive body: identity, gravitational parameter, optional capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    name: String,
    gravitational_parameter: GravitationalParameter,
    rotation: Option<RotationParameters>,
    oblateness: Option<OblatenessParameters>,
}

impl Body {
    /// Constructs a point-mass body.
    pub fn massive(name: impl Into<String>, gravitational_parameter: GravitationalParameter) -> Self {
        Self {
            name: name.into(),
            gravitational_parameter,
            rotation: None,
            oblateness: None,
        }
    }

    /// Attaches rotation parameters.
    pub fn with_rotation(mut self, rotation: RotationParameters) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Attaches an oblate gravity field, validating the coefficient tables.
    ///
    /// Return
    /// ----------
    /// * `Err(OrreryError::MalformedHarmonicCoefficients)` if a row of the
    ///   `cos`/`sin` tables does not have length `n + 1`;
    /// * `Err(OrreryError::UnsupportedGeopotentialDegree)` if `degree`
    ///   exceeds [`MAX_GEOPOTENTIAL_DEGREE`].
    pub fn with_oblateness(
        mut self,
        oblateness: OblatenessParameters,
    ) -> Result<Self, OrreryError> {
        if oblateness.degree > MAX_GEOPOTENTIAL_DEGREE {
            return Err(OrreryError::UnsupportedGeopotentialDegree {
                body: self.name.clone(),
                degree: oblateness.degree,
                max: MAX_GEOPOTENTIAL_DEGREE,
            });
        }
        for table in [&oblateness.cos, &oblateness.sin] {
            if table.len() != oblateness.degree + 1 {
                return Err(OrreryError::MalformedHarmonicCoefficients {
                    body: self.name.clone(),
                    row: table.len(),
                    len: table.len(),
                    expected: oblateness.degree + 1,
                });
            }
            for (n, row) in table.iter().enumerate() {
                if row.len() != n + 1 {
                    return Err(OrreryError::MalformedHarmonicCoefficients {
                        body: self.name.clone(),
                        row: n,
                        len: row.len(),
                        expected: n + 1,
                    });
                }
            }
        }
        self.oblateness = Some(oblateness);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gravitational_parameter(&self) -> GravitationalParameter {
        self.gravitational_parameter
    }

    pub fn rotation(&self) -> Option<&RotationParameters> {
        self.rotation.as_ref()
    }

    pub fn oblateness(&self) -> Option<&OblatenessParameters> {
        self.oblateness.as_ref()
    }

    pub fn is_oblate(&self) -> bool {
        self.oblateness.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{EARTH_GRAVITATIONAL_PARAMETER, EARTH_J2, EARTH_REFERENCE_RADIUS};

    #[test]
    fn j2_round_trip() {
        let oblateness = OblatenessParameters::from_j2(EARTH_REFERENCE_RADIUS, EARTH_J2);
        assert_eq!(oblateness.j2(), EARTH_J2);
        assert!(oblateness.is_zonal());
    }

    #[test]
    fn malformed_tables_are_rejected() {
        let mut oblateness = OblatenessParameters::from_j2(EARTH_REFERENCE_RADIUS, EARTH_J2);
        oblateness.cos[1].push(0.0);
        let result = Body::massive("Earth", EARTH_GRAVITATIONAL_PARAMETER)
            .with_oblateness(oblateness);
        assert!(matches!(
            result,
            Err(OrreryError::MalformedHarmonicCoefficients { .. })
        ));
    }

    #[test]
    fn excessive_degree_is_rejected() {
        let degree = MAX_GEOPOTENTIAL_DEGREE + 1;
        let oblateness = OblatenessParameters {
            reference_radius: EARTH_REFERENCE_RADIUS,
            degree,
            cos: (0..=degree).map(|n| vec![0.0; n + 1]).collect(),
            sin: (0..=degree).map(|n| vec![0.0; n + 1]).collect(),
        };
        let result = Body::massive("Earth", EARTH_GRAVITATIONAL_PARAMETER)
            .with_oblateness(oblateness);
        assert!(matches!(
            result,
            Err(OrreryError::UnsupportedGeopotentialDegree { .. })
        ));
    }
}
