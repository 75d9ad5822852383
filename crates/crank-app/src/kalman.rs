//! Two-state Kalman filter estimating crank angle and angular velocity.
//!
//! The update step is modified for continuous rotation: the angle lives
//! on a circle, so it is re-normalized after every prediction and the
//! innovation uses the shortest arc between measurement and estimate.
//! Only 2x2 and 2x1 shapes appear, so the matrix arithmetic is written
//! out by hand.
//!
//! One task (the IMU ingest) calls [`Kalman::update`]; any number of
//! tasks may call [`Kalman::predict`] concurrently. Every access to the
//! shared state/covariance/timestamp triple happens under a single
//! critical section and is a handful of float operations, so contention
//! is negligible.

use core::f32::consts::PI;

use libm::fmodf;

use crate::sync::SharedCell;

const TAU: f32 = 2.0 * PI;

/// Row-major 2x2 matrix.
pub type Mat2 = [[f32; 2]; 2];

/// Initial covariance used at boot: large values let wildly inaccurate
/// initial guesses be forgotten as soon as real measurements arrive.
pub const BOOT_COVARIANCE: Mat2 = [[1e6, 1e6], [1e6, 1e6]];

/// A fused (angle, angular velocity) pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrankState {
    /// Radians, always in (-pi, pi].
    pub angle: f32,
    /// Radians per second.
    pub velocity: f32,
}

/// Result of a predict-only query.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Prediction {
    pub state: CrankState,
    pub covariance: Mat2,
}

struct Inner {
    x: CrankState,
    p: Mat2,
    q: Mat2,
    r: Mat2,
    last_time_us: u32,
}

pub struct Kalman {
    inner: SharedCell<Inner>,
}

impl Kalman {
    pub const fn new(q: Mat2, r: Mat2, x0: CrankState, p0: Mat2) -> Self {
        Self {
            inner: SharedCell::new(Inner {
                x: x0,
                p: p0,
                q,
                r,
                last_time_us: 0,
            }),
        }
    }

    /// Folds a new measurement into the estimate.
    ///
    /// `time_us` is the capture time in wrapping microseconds; the
    /// timestep is formed by unsigned subtraction so the 2^32 wrap never
    /// produces a negative interval. Non-finite measurements are rejected
    /// outright: neither the state nor the stored timestamp advances, so
    /// the next valid sample simply covers the gap.
    pub fn update(&self, measurement: CrankState, time_us: u32) {
        if !measurement.angle.is_finite() || !measurement.velocity.is_finite() {
            error!("discarding non-finite crank measurement");
            return;
        }

        self.inner.with_mut(|inner| {
            let dt = time_us.wrapping_sub(inner.last_time_us) as f32 * 1e-6;

            // Prediction step: x <- F x, P <- F P F' + Q.
            let x_pred = CrankState {
                angle: normalize_angle(inner.x.angle + dt * inner.x.velocity),
                velocity: inner.x.velocity,
            };
            let f = [[1.0, dt], [0.0, 1.0]];
            let p_pred = mat_add(mat_mul(f, mat_mul(inner.p, transpose(f))), inner.q);

            // Refinement step. The measurement maps straight onto the
            // state (H = I), so K = P (P + R)^-1.
            let k = mat_mul(p_pred, invert(mat_add(p_pred, inner.r)));
            let innovation = subtract_states(measurement, x_pred);
            inner.x = CrankState {
                angle: normalize_angle(
                    x_pred.angle
                        + k[0][0] * innovation.angle
                        + k[0][1] * innovation.velocity,
                ),
                velocity: x_pred.velocity
                    + k[1][0] * innovation.angle
                    + k[1][1] * innovation.velocity,
            };
            inner.p = mat_sub(p_pred, mat_mul(k, p_pred));
            inner.last_time_us = time_us;
        });
    }

    /// Extrapolates the estimate to `time_us` without touching the
    /// stored state. Two calls with the same time and no intervening
    /// update return identical results.
    pub fn predict(&self, time_us: u32) -> Prediction {
        self.inner.with(|inner| {
            let dt = time_us.wrapping_sub(inner.last_time_us) as f32 * 1e-6;
            let f = [[1.0, dt], [0.0, 1.0]];
            Prediction {
                state: CrankState {
                    angle: normalize_angle(inner.x.angle + dt * inner.x.velocity),
                    velocity: inner.x.velocity,
                },
                covariance: mat_add(
                    mat_mul(f, mat_mul(inner.p, transpose(f))),
                    inner.q,
                ),
            }
        })
    }

    /// The state as of the last update, without extrapolation.
    pub fn state(&self) -> CrankState {
        self.inner.with(|inner| inner.x)
    }

    /// Replaces the covariance tuning. Applied by the IMU task when it
    /// observes a configuration change.
    pub fn set_tuning(&self, q: Mat2, r: Mat2) {
        self.inner.with_mut(|inner| {
            inner.q = q;
            inner.r = r;
        });
    }

    /// Starts over from the given state estimate.
    pub fn reset(&self, x0: CrankState, p0: Mat2) {
        self.inner.with_mut(|inner| {
            inner.x = x0;
            inner.p = p0;
        });
    }
}

/// Maps any angle into (-pi, pi].
pub fn normalize_angle(mut angle: f32) -> f32 {
    if !(-TAU..=TAU).contains(&angle) {
        angle = fmodf(angle, TAU);
    }
    if angle > PI {
        angle -= TAU;
    } else if angle <= -PI {
        angle += TAU;
    }
    angle
}

/// Difference of two states where the angle takes the shortest arc
/// around the circle, so the magnitude never exceeds pi.
pub fn subtract_states(a: CrankState, b: CrankState) -> CrankState {
    let mut d = fmodf(a.angle - b.angle, TAU);
    if d < 0.0 {
        d += TAU;
    }
    if d > PI {
        d -= TAU;
    }
    CrankState { angle: d, velocity: a.velocity - b.velocity }
}

fn mat_mul(a: Mat2, b: Mat2) -> Mat2 {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}

fn mat_add(a: Mat2, b: Mat2) -> Mat2 {
    [
        [a[0][0] + b[0][0], a[0][1] + b[0][1]],
        [a[1][0] + b[1][0], a[1][1] + b[1][1]],
    ]
}

fn mat_sub(a: Mat2, b: Mat2) -> Mat2 {
    [
        [a[0][0] - b[0][0], a[0][1] - b[0][1]],
        [a[1][0] - b[1][0], a[1][1] - b[1][1]],
    ]
}

fn transpose(a: Mat2) -> Mat2 {
    [[a[0][0], a[1][0]], [a[0][1], a[1][1]]]
}

/// 2x2 inverse. The only matrix inverted is P + R, which is positive
/// definite for any sane tuning, so the determinant cannot vanish.
fn invert(a: Mat2) -> Mat2 {
    let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
    [
        [a[1][1] / det, -a[0][1] / det],
        [-a[1][0] / det, a[0][0] / det],
    ]
}
