//! Control-plane events, delivered to the supervisor task.
//!
//! The data paths never go through here; this channel only carries the
//! rare operator and consumer requests (configuration changes,
//! calibration, reboot), all of which are acted on by the top-level
//! state machine.

use crank_icd::Command;
use derive_more::From;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

pub const EVENT_CAPACITY: usize = 8;

pub type EventChannel = Channel<CriticalSectionRawMutex, Event, EVENT_CAPACITY>;

#[derive(Debug, Clone, PartialEq, From)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Inbound command from a transport or the serial console.
    #[from]
    Command(Command),
    /// Drop the stored configuration and return to defaults.
    FactoryReset,
    /// Restart the system, optionally staying in the bootloader.
    Reboot { bootloader: bool },
}
