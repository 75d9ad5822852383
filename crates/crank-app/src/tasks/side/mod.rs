//! Per-side strain-gauge ingest: ADC reads, torque conversion, energy
//! accumulation and the per-rotation average power handoff.

mod tasks;

pub use tasks::*;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicBool, Ordering};

use crank_icd::INVALID_TEMPERATURE;

use crate::sync::SharedCell;

/// Carries the interrupt timestamp (wrapping microseconds) from the
/// data-ready ISR to the side task. The ISR detaches its own interrupt
/// before signalling; the task re-attaches after the read.
pub type DataReadySignal = Signal<CriticalSectionRawMutex, u32>;

/// State one side shares with the rest of the system.
pub struct SideShared {
    /// Average power over the previous rotation in W. Written by the
    /// side task before it raises its rendezvous bit; only read by the
    /// low-speed task after that bit, so the notification is the only
    /// ordering needed.
    pub average_power: SharedCell<f32>,
    /// Latest gauge temperature in Celsius, cached by housekeeping for
    /// the torque compensation. Starts at the sentinel, which disables
    /// compensation until the first successful read.
    pub last_temperature: SharedCell<f32>,
    calibration_requested: AtomicBool,
}

impl SideShared {
    pub const fn new() -> Self {
        Self {
            average_power: SharedCell::new(0.0),
            last_temperature: SharedCell::new(INVALID_TEMPERATURE),
            calibration_requested: AtomicBool::new(false),
        }
    }

    /// Arms a zero-offset averaging run; the side task picks it up at
    /// its next loop iteration.
    pub fn request_zero_offset(&self) {
        self.calibration_requested.store(true, Ordering::Release);
    }

    pub(crate) fn take_zero_offset_request(&self) -> bool {
        self.calibration_requested.swap(false, Ordering::AcqRel)
    }
}
