//! Tests of the asynchronous predictor: publication, supersession of a
//! burst of requests, partial results on step exhaustion, and clean
//! shutdown of the worker thread.

use std::sync::{Arc, Mutex};

use approx::assert_abs_diff_eq;
use hifitime::Duration;
use nalgebra::Vector3;

use orrery::body::Body;
use orrery::constants::EARTH_GRAVITATIONAL_PARAMETER;
use orrery::degrees_of_freedom::DegreesOfFreedom;
use orrery::ephemeris::{
    AccuracyParameters, AdaptiveStepParameters, Ephemeris, FixedStepParameters,
};
use orrery::integrators::{DormandPrince54, ForestRuth1990Order4};
use orrery::prognosticator::{Prognosticator, Prognostication};
use orrery::time::{instant_from_j2000_seconds, j2000, seconds_since_j2000};

const PROBE_RADIUS: f64 = 7.0e6;

/// A lone Earth at rest plus the initial state of a probe on a circular
/// low orbit around it.
fn leo_system() -> (Arc<Mutex<Ephemeris>>, DegreesOfFreedom) {
    let earth = Arc::new(Body::massive("Earth", EARTH_GRAVITATIONAL_PARAMETER));
    let ephemeris = Ephemeris::new(
        vec![earth],
        vec![DegreesOfFreedom::new(Vector3::zeros(), Vector3::zeros())],
        j2000(),
        AccuracyParameters {
            fitting_tolerance: 1.0e-3,
            geopotential_tolerance: 1.0e-9,
        },
        FixedStepParameters {
            integrator: Arc::new(ForestRuth1990Order4),
            step: Duration::from_seconds(3_600.0),
        },
    )
    .unwrap();
    let speed = (EARTH_GRAVITATIONAL_PARAMETER / PROBE_RADIUS).sqrt();
    let probe = DegreesOfFreedom::new(
        Vector3::new(PROBE_RADIUS, 0.0, 0.0),
        Vector3::new(0.0, speed, 0.0),
    );
    (Arc::new(Mutex::new(ephemeris)), probe)
}

fn adaptive_parameters() -> AdaptiveStepParameters {
    AdaptiveStepParameters {
        integrator: Arc::new(DormandPrince54),
        max_steps: 100_000,
        length_tolerance: 1.0,
        speed_tolerance: 1.0e-3,
    }
}

fn wait_for_publication(prognosticator: &Prognosticator) -> Arc<Prognostication> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
    loop {
        if let Some(published) = prognosticator.prognostication() {
            return published;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "no prognostication published in time"
        );
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

#[test]
fn a_prediction_is_published_and_evaluates() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (ephemeris, probe) = leo_system();
    let prognosticator = Prognosticator::new("probe", Arc::clone(&ephemeris));

    let horizon = instant_from_j2000_seconds(3_000.0);
    let guard = ephemeris.lock().unwrap().new_guard();
    prognosticator.request_prognostication(guard, j2000(), probe, horizon, adaptive_parameters());

    let published = wait_for_publication(&prognosticator);
    assert_eq!(published.requested, horizon);
    assert_eq!(published.reached, horizon);

    // A circular orbit keeps its radius.
    let root = published.trajectory.root();
    let midway = published
        .trajectory
        .evaluate_position(root, instant_from_j2000_seconds(1_500.0))
        .unwrap();
    assert_abs_diff_eq!(midway.norm(), PROBE_RADIUS, epsilon = 1.0e3);

    // The request's guard died with the request, so forgetting proceeds.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let mut locked = ephemeris.lock().unwrap();
        locked.eventually_forget_before(horizon);
        if seconds_since_j2000(locked.t_min()) > 0.0 {
            break;
        }
        drop(locked);
        assert!(
            std::time::Instant::now() < deadline,
            "request guard was never released"
        );
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

#[test]
fn a_burst_of_requests_publishes_only_the_last() {
    let (ephemeris, probe) = leo_system();
    let prognosticator = Prognosticator::new("probe", Arc::clone(&ephemeris));

    let horizons = [
        instant_from_j2000_seconds(1_000.0),
        instant_from_j2000_seconds(2_000.0),
        instant_from_j2000_seconds(3_000.0),
    ];
    {
        // Holding the ephemeris blocks any computation, so all three
        // requests land before the worker can publish anything.
        let locked = ephemeris.lock().unwrap();
        for &horizon in &horizons {
            prognosticator.request_prognostication(
                locked.new_guard(),
                j2000(),
                probe,
                horizon,
                adaptive_parameters(),
            );
        }
    }

    let first_observed = wait_for_publication(&prognosticator);
    assert_eq!(first_observed.requested, horizons[2]);
    assert_eq!(first_observed.reached, horizons[2]);

    // Superseded requests never surface later either.
    std::thread::sleep(std::time::Duration::from_millis(100));
    let still_published = prognosticator.prognostication().unwrap();
    assert_eq!(still_published.requested, horizons[2]);
}

#[test]
fn step_exhaustion_publishes_a_partial_result() {
    let (ephemeris, probe) = leo_system();
    let prognosticator = Prognosticator::new("probe", Arc::clone(&ephemeris));

    let horizon = instant_from_j2000_seconds(20_000.0);
    let parameters = AdaptiveStepParameters {
        integrator: Arc::new(DormandPrince54),
        max_steps: 5,
        length_tolerance: 1.0e-4,
        speed_tolerance: 1.0e-7,
    };
    let guard = ephemeris.lock().unwrap().new_guard();
    prognosticator.request_prognostication(guard, j2000(), probe, horizon, parameters);

    let published = wait_for_publication(&prognosticator);
    assert_eq!(published.requested, horizon);
    assert!(published.reached < horizon);
    assert!(published.reached > j2000());
    let root = published.trajectory.root();
    assert!(published.trajectory.len(root).unwrap() >= 2);
}

#[test]
fn dropping_the_prognosticator_joins_the_worker() {
    let (ephemeris, probe) = leo_system();
    let prognosticator = Prognosticator::new("probe", Arc::clone(&ephemeris));

    // Tight tolerances over a month: far too much work to finish, so the
    // drop below exercises cooperative abandonment.
    let horizon = instant_from_j2000_seconds(30.0 * 86_400.0);
    let parameters = AdaptiveStepParameters {
        integrator: Arc::new(DormandPrince54),
        max_steps: usize::MAX,
        length_tolerance: 1.0e-9,
        speed_tolerance: 1.0e-12,
    };
    let guard = ephemeris.lock().unwrap().new_guard();
    prognosticator.request_prognostication(guard, j2000(), probe, horizon, parameters);
    std::thread::sleep(std::time::Duration::from_millis(50));

    let begun = std::time::Instant::now();
    drop(prognosticator);
    assert!(
        begun.elapsed() < std::time::Duration::from_secs(30),
        "worker did not abandon promptly"
    );
}
