//! Centripetal Catmull-Rom spline solver.
//!
//! Turns a sparse m x n waypoint matrix into a sampled, twice-differentiable
//! trajectory: per-segment cubics satisfying Hermite boundary conditions
//! (position and velocity at both endpoints), with segment durations
//! allocated from chord length raised to `alpha`. `alpha = 0.5`
//! (centripetal) avoids the loops and cusps that uniform or chordal
//! parametrizations produce on unevenly spaced waypoints.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use thiserror::Error;

/// Conventional `alpha` for the centripetal parametrization.
pub const CENTRIPETAL: f64 = 0.5;

#[derive(Debug, Error, PartialEq)]
pub enum SplineError {
    #[error("need at least 2 waypoints, got {got}")]
    TooFewWaypoints { got: usize },
    #[error("waypoint coordinates must be finite")]
    NonFiniteInput,
    #[error("final time must be positive, got {0}")]
    NonPositiveFinalTime(f64),
    #[error("step time must be positive, got {0}")]
    NonPositiveStepTime(f64),
    #[error("alpha must lie in [0, 1], got {0}")]
    AlphaOutOfRange(f64),
    #[error("all waypoints coincide, segment times cannot be allocated")]
    DegenerateWaypoints,
    #[error("segment {segment} has zero duration, its neighbors coincide")]
    DegenerateSegment { segment: usize },
}

/// A trajectory resampled at a fixed step over `[0, final_time)`.
///
/// Positions, velocities and accelerations are m x k matrices with one
/// column per time sample.
#[derive(Debug, Clone, Serialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub positions: DMatrix<f64>,
    pub velocities: DMatrix<f64>,
    pub accelerations: DMatrix<f64>,
}

impl Trajectory {
    pub fn dim(&self) -> usize {
        self.positions.nrows()
    }

    pub fn sample_count(&self) -> usize {
        self.times.len()
    }
}

/// One cubic piece `f(t) = a*t^3 + b*t^2 + c*t + d` per dimension,
/// coefficients expressed in absolute trajectory time.
struct CubicSegment {
    a: DVector<f64>,
    b: DVector<f64>,
    c: DVector<f64>,
    d: DVector<f64>,
}

/// Computes a Catmull-Rom spline trajectory through `control_points`
/// (m rows of space, one column per waypoint), taking `final_time`
/// seconds overall and resampled every `step_time` seconds.
///
/// Interior waypoint velocities are the central difference of their
/// neighbors over the allocated times; the first and last waypoint are
/// clamped to zero velocity. Coincident waypoints make the time
/// allocation non-increasing and fail fast rather than degrading to a
/// least-squares fit.
pub fn compute_catmullrom_trajectory(
    final_time: f64,
    control_points: &DMatrix<f64>,
    step_time: f64,
    alpha: f64,
) -> Result<Trajectory, SplineError> {
    let (m, n) = control_points.shape();
    if n < 2 {
        return Err(SplineError::TooFewWaypoints { got: n });
    }
    if control_points.iter().any(|x| !x.is_finite()) {
        return Err(SplineError::NonFiniteInput);
    }
    if !(final_time > 0.0) {
        return Err(SplineError::NonPositiveFinalTime(final_time));
    }
    if !(step_time > 0.0) {
        return Err(SplineError::NonPositiveStepTime(step_time));
    }
    if !(0.0..=1.0).contains(&alpha) {
        return Err(SplineError::AlphaOutOfRange(alpha));
    }

    let t = allocate_segment_times(final_time, control_points, alpha)?;
    let vel = clamped_velocities(control_points, &t);

    let mut segments = Vec::with_capacity(n - 1);
    for i in 0..n - 1 {
        segments.push(solve_segment(control_points, &vel, &t, i));
    }

    // resample over [0, final_time)
    let mut times = Vec::new();
    let mut k = 0usize;
    loop {
        let tk = k as f64 * step_time;
        if tk >= final_time {
            break;
        }
        times.push(tk);
        k += 1;
    }

    let mut positions = DMatrix::zeros(m, times.len());
    let mut velocities = DMatrix::zeros(m, times.len());
    let mut accelerations = DMatrix::zeros(m, times.len());

    // samples are visited in increasing time order, the segment cursor
    // only ever moves forward
    let mut segment = 0usize;
    for (j, &tj) in times.iter().enumerate() {
        while segment + 1 < n - 1 && tj > t[segment + 1] {
            segment += 1;
        }
        let CubicSegment { a, b, c, d } = &segments[segment];
        for r in 0..m {
            let (a, b, c, d) = (a[r], b[r], c[r], d[r]);
            positions[(r, j)] = ((a * tj + b) * tj + c) * tj + d;
            velocities[(r, j)] = (3.0 * a * tj + 2.0 * b) * tj + c;
            accelerations[(r, j)] = 6.0 * a * tj + 2.0 * b;
        }
    }

    Ok(Trajectory {
        times,
        positions,
        velocities,
        accelerations,
    })
}

/// Allocates a strictly increasing time for each waypoint: cumulative
/// chord length raised to `alpha`, rescaled to span `[0, final_time]`.
fn allocate_segment_times(
    final_time: f64,
    control_points: &DMatrix<f64>,
    alpha: f64,
) -> Result<Vec<f64>, SplineError> {
    let n = control_points.ncols();
    let mut t = vec![0.0; n];
    for i in 0..n - 1 {
        let chord = (control_points.column(i + 1) - control_points.column(i)).norm();
        t[i + 1] = t[i] + chord.powf(alpha);
    }
    let total = t[n - 1];
    if total == 0.0 {
        return Err(SplineError::DegenerateWaypoints);
    }
    for v in t.iter_mut() {
        *v *= final_time / total;
    }
    for i in 0..n - 1 {
        if t[i + 1] - t[i] <= 0.0 {
            return Err(SplineError::DegenerateSegment { segment: i });
        }
    }
    Ok(t)
}

/// Interior velocity constraint is `(P[i+1] - P[i-1]) / (t[i+1] - t[i-1])`,
/// start and end velocities are zero.
fn clamped_velocities(control_points: &DMatrix<f64>, t: &[f64]) -> DMatrix<f64> {
    let (m, n) = control_points.shape();
    let mut vel = DMatrix::zeros(m, n);
    for i in 1..n - 1 {
        let dv = (control_points.column(i + 1) - control_points.column(i - 1))
            / (t[i + 1] - t[i - 1]);
        vel.set_column(i, &dv);
    }
    vel
}

/// Closed-form Hermite cubic for segment `i`, one scalar solve per
/// dimension. With `u = t - t[i]` and `h = t[i+1] - t[i]`:
///
///   f(u) = p0 + v0*u + c2*u^2 + c3*u^3
///   c2 = 3d/h^2 - (2*v0 + v1)/h
///   c3 = -2d/h^3 + (v0 + v1)/h^2      where d = p1 - p0
///
/// which pins f(0) = p0, f(h) = p1, f'(0) = v0, f'(h) = v1. The local
/// coefficients are then shifted so samples evaluate against absolute
/// trajectory time.
fn solve_segment(
    control_points: &DMatrix<f64>,
    vel: &DMatrix<f64>,
    t: &[f64],
    i: usize,
) -> CubicSegment {
    let t0 = t[i];
    let h = t[i + 1] - t0;
    let p0 = control_points.column(i).clone_owned();
    let p1 = control_points.column(i + 1).clone_owned();
    let v0 = vel.column(i).clone_owned();
    let v1 = vel.column(i + 1).clone_owned();

    let delta = &p1 - &p0;
    let c2 = &delta * (3.0 / (h * h)) - (&v0 * 2.0 + &v1) / h;
    let c3 = &delta * (-2.0 / (h * h * h)) + (&v0 + &v1) / (h * h);

    let a = c3.clone();
    let b = &c2 - &c3 * (3.0 * t0);
    let c = &v0 - &c2 * (2.0 * t0) + &c3 * (3.0 * t0 * t0);
    let d = &p0 - &v0 * t0 + &c2 * (t0 * t0) - &c3 * (t0 * t0 * t0);
    CubicSegment { a, b, c, d }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;

    const EPSILON: f64 = 1e-9;
    const SAMPLE_EPSILON: f64 = 0.05;

    /// 2D L-shaped waypoint set with unit chords.
    fn elbow_points() -> DMatrix<f64> {
        dmatrix![
            0.0, 1.0, 1.0;
            0.0, 0.0, 1.0;
        ]
    }

    #[test]
    fn unit_chords_split_time_evenly() {
        let t = allocate_segment_times(3.0, &elbow_points(), CENTRIPETAL).expect("valid points");
        assert_eq!(t.len(), 3);
        assert!((t[0] - 0.0).abs() < EPSILON);
        assert!((t[1] - 1.5).abs() < EPSILON);
        assert!((t[2] - 3.0).abs() < EPSILON);
    }

    #[test]
    fn interior_velocity_is_central_difference() {
        let points = elbow_points();
        let t = allocate_segment_times(3.0, &points, CENTRIPETAL).expect("valid points");
        let vel = clamped_velocities(&points, &t);
        // ([1,1] - [0,0]) / (3 - 0)
        assert!((vel[(0, 1)] - 1.0 / 3.0).abs() < EPSILON);
        assert!((vel[(1, 1)] - 1.0 / 3.0).abs() < EPSILON);
        // clamped ends
        assert_eq!(vel.column(0).norm(), 0.0);
        assert_eq!(vel.column(2).norm(), 0.0);
    }

    #[test]
    fn trajectory_passes_through_waypoints() {
        let points = elbow_points();
        let t = allocate_segment_times(3.0, &points, CENTRIPETAL).expect("valid points");
        let traj =
            compute_catmullrom_trajectory(3.0, &points, 0.01, CENTRIPETAL).expect("valid input");

        assert_eq!(traj.dim(), 2);
        for (i, &ti) in t.iter().enumerate() {
            // nearest sample to the allocated waypoint time
            let j = ((ti / 0.01).round() as usize).min(traj.sample_count() - 1);
            let err = (traj.positions.column(j) - points.column(i)).norm();
            assert!(
                err < SAMPLE_EPSILON,
                "waypoint {i} missed by {err} at t = {ti}"
            );
        }
    }

    #[test]
    fn endpoint_velocities_are_zero() {
        let points = dmatrix![
            0.0, 0.3, 0.9, 0.4;
            0.0, 0.5, 0.2, 0.8;
            0.1, 0.0, 0.3, 0.3
        ];
        let traj =
            compute_catmullrom_trajectory(2.0, &points, 0.001, CENTRIPETAL).expect("valid input");
        assert_eq!(traj.velocities.column(0).norm(), 0.0);
        // last sample sits one step before the final waypoint, where the
        // clamped velocity has nearly decayed to zero
        let last = traj.sample_count() - 1;
        assert!(traj.velocities.column(last).norm() < SAMPLE_EPSILON);
    }

    #[test]
    fn sampling_covers_half_open_interval() {
        let points = elbow_points();
        let traj =
            compute_catmullrom_trajectory(3.0, &points, 0.01, CENTRIPETAL).expect("valid input");
        assert_eq!(traj.sample_count(), 300);
        assert_eq!(traj.times[0], 0.0);
        assert!(*traj.times.last().expect("non-empty") < 3.0);
        assert_eq!(traj.positions.ncols(), 300);
        assert_eq!(traj.velocities.ncols(), 300);
        assert_eq!(traj.accelerations.ncols(), 300);
    }

    #[test]
    fn velocity_and_acceleration_are_consistent_derivatives() {
        let points = dmatrix![
            0.0, 1.0, 2.0, 1.0;
            0.0, 2.0, 0.0, -1.0
        ];
        let step = 1e-4;
        let traj =
            compute_catmullrom_trajectory(2.0, &points, step, CENTRIPETAL).expect("valid input");
        // central finite differences of the sampled positions against the
        // analytic derivative columns, away from segment boundaries
        for j in (100..traj.sample_count() - 100).step_by(500) {
            let fd_vel = (traj.positions.column(j + 1) - traj.positions.column(j - 1))
                / (2.0 * step);
            assert!((fd_vel - traj.velocities.column(j)).norm() < 1e-3);
            let fd_acc = (traj.velocities.column(j + 1) - traj.velocities.column(j - 1))
                / (2.0 * step);
            assert!((fd_acc - traj.accelerations.column(j)).norm() < 1e-3);
        }
    }

    #[test]
    fn coincident_waypoints_fail_fast() {
        let points = dmatrix![
            0.5, 0.5, 0.5;
            -0.2, -0.2, -0.2
        ];
        let result = compute_catmullrom_trajectory(3.0, &points, 0.01, CENTRIPETAL);
        assert_eq!(result.err(), Some(SplineError::DegenerateWaypoints));
    }

    #[test]
    fn coincident_neighbors_fail_fast() {
        let points = dmatrix![
            0.0, 1.0, 1.0, 2.0;
            0.0, 0.0, 0.0, 0.0
        ];
        let result = compute_catmullrom_trajectory(3.0, &points, 0.01, CENTRIPETAL);
        assert_eq!(
            result.err(),
            Some(SplineError::DegenerateSegment { segment: 1 })
        );
    }

    #[test]
    fn rejects_invalid_inputs() {
        let points = elbow_points();
        let single = dmatrix![0.0; 0.0];
        assert_eq!(
            compute_catmullrom_trajectory(3.0, &single, 0.01, CENTRIPETAL).err(),
            Some(SplineError::TooFewWaypoints { got: 1 })
        );
        assert_eq!(
            compute_catmullrom_trajectory(0.0, &points, 0.01, CENTRIPETAL).err(),
            Some(SplineError::NonPositiveFinalTime(0.0))
        );
        assert_eq!(
            compute_catmullrom_trajectory(3.0, &points, -0.01, CENTRIPETAL).err(),
            Some(SplineError::NonPositiveStepTime(-0.01))
        );
        assert_eq!(
            compute_catmullrom_trajectory(3.0, &points, 0.01, 1.5).err(),
            Some(SplineError::AlphaOutOfRange(1.5))
        );
        let with_nan = dmatrix![0.0, f64::NAN; 0.0, 1.0];
        assert_eq!(
            compute_catmullrom_trajectory(3.0, &with_nan, 0.01, CENTRIPETAL).err(),
            Some(SplineError::NonFiniteInput)
        );
    }
}
