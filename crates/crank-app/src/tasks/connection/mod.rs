//! Connection subsystem: bounded queues between the data producers and
//! the transport, the accept-data gate, and the lifecycle notifications.

mod tasks;
pub mod transport;

pub use tasks::*;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crank_icd::{
    HousekeepingRecord, ImuRecord, LowSpeedRecord, Side, SideRecord,
    HIGH_SPEED_BATCH, HIGH_SPEED_RESERVE,
};

use crate::sync::Notifier;

/// Notification bit that activates the connection.
pub const CONN_ENABLE: u32 = 1 << 0;
/// Notification bit that winds the connection down.
pub const CONN_DISABLE: u32 = 1 << 1;

/// High-speed queue depth: one full batch plus headroom for records
/// produced while the batch is being serialized.
pub const HIGH_SPEED_QUEUE: usize = HIGH_SPEED_BATCH + HIGH_SPEED_RESERVE;

type Csrm = CriticalSectionRawMutex;

/// Records dropped because a queue was full, per stream. Producers never
/// block; these counters are the only trace of backpressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DroppedCounts {
    pub housekeeping: u32,
    pub low_speed: u32,
    pub sides: [u32; 2],
    pub imu: u32,
}

pub struct Connection {
    accept_data: AtomicBool,
    pub(crate) notify: Notifier,
    housekeeping: Channel<Csrm, HousekeepingRecord, 1>,
    low_speed: Channel<Csrm, LowSpeedRecord, 1>,
    sides: [Channel<Csrm, SideRecord, HIGH_SPEED_QUEUE>; 2],
    imu: Channel<Csrm, ImuRecord, HIGH_SPEED_QUEUE>,
    dropped_housekeeping: AtomicU32,
    dropped_low_speed: AtomicU32,
    dropped_sides: [AtomicU32; 2],
    dropped_imu: AtomicU32,
}

impl Connection {
    pub const fn new() -> Self {
        Self {
            accept_data: AtomicBool::new(false),
            notify: Notifier::new(),
            housekeeping: Channel::new(),
            low_speed: Channel::new(),
            sides: [Channel::new(), Channel::new()],
            imu: Channel::new(),
            dropped_housekeeping: AtomicU32::new(0),
            dropped_low_speed: AtomicU32::new(0),
            dropped_sides: [AtomicU32::new(0), AtomicU32::new(0)],
            dropped_imu: AtomicU32::new(0),
        }
    }

    /// Asks the connection task to bring the transport up.
    pub fn enable(&self) {
        self.notify.notify(CONN_ENABLE);
    }

    /// Asks the connection task to wind down. Producers observe
    /// `accept_data` go false once the task reaches its shutdown state.
    pub fn disable(&self) {
        self.notify.notify(CONN_DISABLE);
    }

    pub fn accepts_data(&self) -> bool {
        self.accept_data.load(Ordering::Acquire)
    }

    pub fn set_accept_data(&self, accept: bool) {
        self.accept_data.store(accept, Ordering::Release);
    }

    pub fn add_housekeeping(&self, record: &HousekeepingRecord) {
        if !self.accepts_data() {
            return;
        }
        if self.housekeeping.try_send(*record).is_err() {
            self.dropped_housekeeping.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_low_speed(&self, record: &LowSpeedRecord) {
        if !self.accepts_data() {
            return;
        }
        if self.low_speed.try_send(*record).is_err() {
            self.dropped_low_speed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_side(&self, side: Side, record: &SideRecord) {
        if !self.accepts_data() {
            return;
        }
        if self.sides[side.index()].try_send(*record).is_err() {
            self.dropped_sides[side.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_imu(&self, record: &ImuRecord) {
        if !self.accepts_data() {
            return;
        }
        if self.imu.try_send(*record).is_err() {
            self.dropped_imu.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn try_take_housekeeping(&self) -> Option<HousekeepingRecord> {
        self.housekeeping.try_receive().ok()
    }

    pub fn try_take_low_speed(&self) -> Option<LowSpeedRecord> {
        self.low_speed.try_receive().ok()
    }

    pub fn try_take_side(&self, side: Side) -> Option<SideRecord> {
        self.sides[side.index()].try_receive().ok()
    }

    pub fn try_take_imu(&self) -> Option<ImuRecord> {
        self.imu.try_receive().ok()
    }

    pub fn side_queue_len(&self, side: Side) -> usize {
        self.sides[side.index()].len()
    }

    pub fn imu_queue_len(&self) -> usize {
        self.imu.len()
    }

    pub fn dropped(&self) -> DroppedCounts {
        DroppedCounts {
            housekeeping: self.dropped_housekeeping.load(Ordering::Relaxed),
            low_speed: self.dropped_low_speed.load(Ordering::Relaxed),
            sides: [
                self.dropped_sides[0].load(Ordering::Relaxed),
                self.dropped_sides[1].load(Ordering::Relaxed),
            ],
            imu: self.dropped_imu.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crank_icd::SampleHeader;

    fn side_record(t: u32) -> SideRecord {
        SideRecord::new(
            SampleHeader { timestamp_us: t, velocity: 1.0, position: 0.0 },
            42,
            1.0,
        )
    }

    #[test]
    fn records_are_refused_until_accepting() {
        let conn = Connection::new();
        conn.add_side(Side::Left, &side_record(1));
        conn.add_imu(&ImuRecord::default());
        conn.add_low_speed(&LowSpeedRecord::default());
        conn.add_housekeeping(&HousekeepingRecord::default());

        assert_eq!(conn.side_queue_len(Side::Left), 0);
        assert_eq!(conn.imu_queue_len(), 0);
        assert!(conn.try_take_low_speed().is_none());
        assert!(conn.try_take_housekeeping().is_none());
        // Refusal is not a drop.
        assert_eq!(conn.dropped(), DroppedCounts::default());
    }

    #[test]
    fn overflow_drops_and_counts_without_blocking() {
        let conn = Connection::new();
        conn.set_accept_data(true);

        for i in 0..(HIGH_SPEED_QUEUE as u32 + 5) {
            conn.add_side(Side::Right, &side_record(i));
        }

        assert_eq!(conn.side_queue_len(Side::Right), HIGH_SPEED_QUEUE);
        assert_eq!(conn.dropped().sides[Side::Right.index()], 5);
    }

    #[test]
    fn sides_queue_independently() {
        let conn = Connection::new();
        conn.set_accept_data(true);
        conn.add_side(Side::Left, &side_record(1));
        assert_eq!(conn.side_queue_len(Side::Left), 1);
        assert_eq!(conn.side_queue_len(Side::Right), 0);
    }
}
