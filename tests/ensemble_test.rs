//! Integrating a statistical ensemble of perturbed ephemerides through a
//! bundle, the intended bulk-parallel use of the engine.

use std::sync::{Arc, Mutex};

use hifitime::Duration;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use orrery::body::Body;
use orrery::bundle::Bundle;
use orrery::constants::EARTH_GRAVITATIONAL_PARAMETER;
use orrery::degrees_of_freedom::DegreesOfFreedom;
use orrery::ephemeris::{AccuracyParameters, Ephemeris, FixedStepParameters};
use orrery::integrators::ForestRuth1990Order4;
use orrery::time::{instant_from_j2000_seconds, j2000};

const ORBIT_RADIUS: f64 = 4.216_4e7;

/// Earth and a light satellite on a near-circular orbit, with the given
/// perturbation added to the satellite's initial velocity.
fn perturbed_two_body(velocity_perturbation: Vector3<f64>) -> Ephemeris {
    let speed = (EARTH_GRAVITATIONAL_PARAMETER / ORBIT_RADIUS).sqrt();
    let earth = Arc::new(Body::massive("Earth", EARTH_GRAVITATIONAL_PARAMETER));
    let satellite = Arc::new(Body::massive("Satellite", 1.0));
    Ephemeris::new(
        vec![earth, satellite],
        vec![
            DegreesOfFreedom::new(Vector3::zeros(), Vector3::zeros()),
            DegreesOfFreedom::new(
                Vector3::new(ORBIT_RADIUS, 0.0, 0.0),
                Vector3::new(0.0, speed, 0.0) + velocity_perturbation,
            ),
        ],
        j2000(),
        AccuracyParameters {
            fitting_tolerance: 1.0e-3,
            geopotential_tolerance: 1.0e-9,
        },
        FixedStepParameters {
            integrator: Arc::new(ForestRuth1990Order4),
            step: Duration::from_seconds(60.0),
        },
    )
    .unwrap()
}

#[test]
fn an_ensemble_of_perturbed_ephemerides_integrates_in_parallel() {
    let mut rng = StdRng::seed_from_u64(0x0e17);
    let target = instant_from_j2000_seconds(86_400.0);
    let final_positions = Arc::new(Mutex::new(Vec::new()));

    let bundle = Bundle::new(4);
    for _ in 0..8 {
        let perturbation = Vector3::new(
            rng.gen_range(-0.5..0.5),
            rng.gen_range(-0.5..0.5),
            rng.gen_range(-0.5..0.5),
        );
        let mut ephemeris = perturbed_two_body(perturbation);
        let final_positions = Arc::clone(&final_positions);
        bundle.add(move || {
            ephemeris.prolong(target)?;
            let satellite = ephemeris.body_index("Satellite").unwrap();
            let position = ephemeris.evaluate_position(satellite, target)?;
            final_positions.lock().unwrap().push(position);
            Ok(())
        });
    }
    bundle.join().unwrap();

    let final_positions = final_positions.lock().unwrap();
    assert_eq!(final_positions.len(), 8);
    for position in final_positions.iter() {
        assert!(position.iter().all(|c| c.is_finite()));
        // Nothing escaped or fell in.
        let radius = position.norm();
        assert!(radius > 0.5 * ORBIT_RADIUS && radius < 2.0 * ORBIT_RADIUS);
    }

    // A day of drift separates the perturbed members measurably.
    let spread = final_positions
        .iter()
        .flat_map(|a| final_positions.iter().map(move |b| (a - b).norm()))
        .fold(0.0_f64, f64::max);
    assert!(spread > 1.0e3, "ensemble failed to disperse: {spread} m");
}
