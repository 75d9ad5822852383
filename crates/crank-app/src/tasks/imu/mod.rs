//! IMU ingest: scaling, centripetal correction, angle reconstruction,
//! filter update and rotation counting.

mod tasks;

pub use tasks::*;

use core::f32::consts::FRAC_PI_3;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::sync::SharedCell;

/// Standard gravity; the accelerometer reports g, the sums want SI.
pub const GRAVITY: f32 = 9.81;

/// Full-scale accelerometer range in g.
pub const IMU_ACCEL_RANGE_G: f32 = 4.0;

/// Full-scale gyroscope range in degrees per second.
pub const IMU_GYRO_RANGE_DPS: f32 = 1000.0;

/// Offsets of the IMU package from the crank axle in metres, per axis.
/// Zero until measured on the assembled crank.
pub const IMU_RADIUS_X_M: f32 = 0.0;
pub const IMU_RADIUS_Y_M: f32 = 0.0;

/// Most FIFO entries drained per wakeup.
pub const FIFO_BURST: usize = 16;

/// Carries the capture timestamp (wrapping microseconds) from the FIFO
/// watermark ISR to the ingest task. Repeated signals overwrite, which
/// is what we want: the FIFO holds the backlog, the time belongs to the
/// newest edge.
pub type SampleReadySignal = Signal<CriticalSectionRawMutex, u32>;

/// Rotation bookkeeping published by the ingest task and read by the
/// side tasks (count only) and the low-speed task (all of it).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RotationMeta {
    /// Completed forward rotations since boot. Never decreases.
    pub count: u32,
    /// When the latest rotation completed, wrapping microseconds.
    pub last_time_us: u32,
    /// How long the latest rotation took, microseconds.
    pub last_duration_us: u32,
}

pub struct RotationTracker {
    meta: SharedCell<RotationMeta>,
}

impl RotationTracker {
    pub const fn new() -> Self {
        Self { meta: SharedCell::new(RotationMeta { count: 0, last_time_us: 0, last_duration_us: 0 }) }
    }

    /// Registers a completed rotation at `time_us`.
    pub fn complete_at(&self, time_us: u32) {
        self.meta.with_mut(|meta| {
            meta.count += 1;
            meta.last_duration_us = time_us.wrapping_sub(meta.last_time_us);
            meta.last_time_us = time_us;
        });
    }

    pub fn count(&self) -> u32 {
        self.meta.with(|meta| meta.count)
    }

    pub fn snapshot(&self) -> RotationMeta {
        self.meta.get()
    }
}

/// Detects completed forward rotations from the filtered angle.
///
/// The circle is cut into three sectors; a crossing from sector 0 into 1
/// arms the detector and a later crossing from 2 back into 0 completes
/// the revolution. Backwards motion never produces the arming sequence,
/// so it cannot count.
#[derive(Debug, Default)]
pub(crate) struct RotationDetector {
    last_sector: u8,
    armed: bool,
}

/// Sector 0 covers [-pi, -pi/3), 1 covers [-pi/3, pi/3), 2 the rest.
fn sector(angle: f32) -> u8 {
    if angle < -FRAC_PI_3 {
        0
    } else if angle < FRAC_PI_3 {
        1
    } else {
        2
    }
}

impl RotationDetector {
    /// Feeds the next angle; true when this sample completes a rotation.
    pub fn observe(&mut self, angle: f32) -> bool {
        let current = sector(angle);

        if current == 1 && self.last_sector == 0 {
            self.armed = true;
        }

        let completed = self.armed && current == 0 && self.last_sector == 2;
        if completed {
            self.armed = false;
        }

        self.last_sector = current;
        completed
    }
}
