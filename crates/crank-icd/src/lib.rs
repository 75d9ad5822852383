#![cfg_attr(not(feature = "use-std"), no_std)]

//! Interface-control document for the crank power meter.
//!
//! Everything a consumer needs to talk to the firmware lives here: the
//! binary high-speed record layouts, the JSON payloads for the slow
//! topics, the configuration snapshot and the inbound commands. The
//! firmware crate and host-side tooling both depend on this crate, so it
//! stays free of hardware types.

mod config;
mod records;

pub use config::*;
pub use records::*;

/// Number of high-speed records concatenated into one published batch.
pub const HIGH_SPEED_BATCH: usize = 160;

/// Extra queue slots on top of the batch size so producers keep a little
/// headroom while a batch is being drained.
pub const HIGH_SPEED_RESERVE: usize = 32;

/// Raw ADC samples averaged by a zero-offset calibration run.
pub const OFFSET_COMPENSATION_SAMPLES: u32 = 200;

/// Stand-in for a temperature that could not be read. Finite so the
/// housekeeping JSON stays parseable.
pub const INVALID_TEMPERATURE: f32 = -1000.0;

/// One crank arm. Doubles as an index into per-side arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Key used for this side in JSON payloads and topic names.
    pub const fn label(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// Static identity published in the about-device payload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    pub name: heapless::String<32>,
    pub compiled: heapless::String<32>,
    pub sw_version: heapless::String<16>,
    pub hw_version: heapless::String<16>,
    pub mac: [u8; 6],
}

/// Commands a consumer may send back to the device. Names on the wire are
/// fixed by the deployed consumers: `set-configuration` carries a JSON
/// configuration payload, `perform-adc-zero-offset` is empty and arms the
/// averaging run on both sides.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetConfiguration(Config),
    PerformZeroOffset,
}
