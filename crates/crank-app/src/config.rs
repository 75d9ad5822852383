//! Live configuration snapshot handed out to the data-path tasks.
//!
//! Writers publish a whole new snapshot; readers copy it out at the top
//! of their loops. No same-sample coherence is promised, a task simply
//! observes the new values on its next pass. The epoch counter lets the
//! IMU task notice a change cheaply and re-tune the filter.

use crank_icd::{Config, Side};
use portable_atomic::{AtomicU32, Ordering};

use crate::sync::SharedCell;

pub struct ConfigStore {
    snapshot: SharedCell<Config>,
    epoch: AtomicU32,
}

impl ConfigStore {
    pub const fn new(config: Config) -> Self {
        Self { snapshot: SharedCell::new(config), epoch: AtomicU32::new(0) }
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> Config {
        self.snapshot.get()
    }

    /// Bumped on every publish; readers compare against a remembered
    /// value to detect changes.
    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Publishes a replacement snapshot.
    pub fn update(&self, config: Config) {
        self.snapshot.set(config);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// In-place edit of the snapshot, for single-field updates like a
    /// freshly calibrated zero offset.
    pub fn mutate(&self, f: impl FnOnce(&mut Config)) {
        self.snapshot.with_mut(f);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Stores the zero offset measured by a calibration run.
    pub fn set_strain_offset(&self, side: Side, offset: u32) {
        self.mutate(|config| config.strain_mut(side).offset = offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_replaces_snapshot_and_bumps_epoch() {
        let store = ConfigStore::new(Config::default());
        let before = store.epoch();

        let mut config = store.snapshot();
        config.imu_decimation = 8;
        store.update(config);

        assert_eq!(store.snapshot().imu_decimation, 8);
        assert_eq!(store.epoch(), before + 1);
    }

    #[test]
    fn strain_offset_lands_on_the_right_side() {
        let store = ConfigStore::new(Config::default());
        store.set_strain_offset(Side::Right, 6_252_516);
        let config = store.snapshot();
        assert_eq!(config.strain(Side::Right).offset, 6_252_516);
        assert_eq!(config.strain(Side::Left).offset, 0);
    }
}
