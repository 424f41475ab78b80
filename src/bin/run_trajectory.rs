use std::time::Duration;

use nalgebra::dmatrix;
use serde_json::json;
use spline_motion::{
    bus::memory::MemoryBus,
    cache::BusCache,
    executor::TrajectoryExecutor,
    spline::{compute_catmullrom_trajectory, CENTRIPETAL},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STEP_TIME: f64 = 0.01;

/// Plans a short reach-over motion and replays it against an in-memory
/// control bus, with a cache tailing the published setpoints.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // operational-space waypoints, one column per control point
    let waypoints = dmatrix![
        0.30, 0.45, 0.55, 0.40;
        -0.20, -0.05, 0.15, 0.25;
        0.25, 0.40, 0.35, 0.20
    ];
    let trajectory = compute_catmullrom_trajectory(4.0, &waypoints, STEP_TIME, CENTRIPETAL)
        .expect("waypoints are valid");
    info!(
        "solved trajectory: {} samples across {} dimensions, peak |v| {:.3}, peak |a| {:.3}",
        trajectory.sample_count(),
        trajectory.dim(),
        trajectory.velocities.amax(),
        trajectory.accelerations.amax(),
    );

    let bus = MemoryBus::new();
    let mut cache = BusCache::new(
        bus.clone(),
        Duration::from_millis(33),
        Vec::new(),
        vec!["panda::control::*".to_string()],
        10,
    );
    cache.start();

    let mut executor = TrajectoryExecutor::new(
        bus.clone(),
        "panda::control::primitive",
        json!("posori_task"),
        "panda::control::desired_position",
        "panda::control::desired_velocity",
    );
    let started = executor
        .start(
            trajectory.times.clone(),
            trajectory.positions.clone(),
            trajectory.velocities.clone(),
            STEP_TIME,
        )
        .expect("trajectory arrays are consistent");
    assert!(started, "no other trajectory is running");

    while executor.is_running() {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(pos) = cache.get("panda::control::desired_position") {
            info!("desired position {}", pos);
        }
    }
    info!("trajectory finished, final setpoints on the bus:");
    info!(
        "  position {}",
        bus.snapshot()
            .get("panda::control::desired_position")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<absent>".to_string())
    );

    executor.stop().await;
    cache.stop().await;
}
