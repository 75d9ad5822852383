//! Persistent settings in a wear-levelled NOR-flash key/value map.
//!
//! A missing, truncated or undecodable blob never stops the boot: the
//! defaults are written back and used.

mod data;

pub use data::{StorageData, StorageKey};

use core::ops::Range;

use crank_icd::Config;
use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map::{MapConfig, MapStorage};
use sequential_storage::Error;

/// Scratch buffer size for map entries; comfortably above the encoded
/// configuration.
pub const SETTINGS_BUFFER: usize = 256;

pub struct SettingsManager<Flash: NorFlash, const N: usize> {
    map: MapStorage<u16, Flash, NoCache>,
    buffer: [u8; N],
}

impl<Flash: NorFlash, const N: usize> SettingsManager<Flash, N> {
    /// `range` is the flash region reserved for settings; the platform
    /// derives it from its partition layout.
    pub fn new(flash: Flash, range: Range<u32>) -> Self {
        let config = MapConfig::new(range);
        Self {
            map: MapStorage::new(flash, config, NoCache::new()),
            buffer: [0; N],
        }
    }

    /// Loads the stored configuration. Anything unusable (no blob, a
    /// stale layout, values that fail validation) is replaced with the
    /// defaults, which are written back so the next boot is clean.
    pub async fn load_or_default(&mut self) -> Config {
        let key = StorageKey::Config.into();
        match self.map.fetch_item::<StorageData>(&mut self.buffer, &key).await {
            Ok(Some(StorageData::Config(config))) if config.validate().is_ok() => {
                config
            }
            Ok(_) => {
                warn!("no stored configuration, writing defaults");
                self.reset_to_defaults().await
            }
            Err(_) => {
                warn!("stored configuration unreadable, writing defaults");
                self.reset_to_defaults().await
            }
        }
    }

    pub async fn save(&mut self, config: &Config) -> Result<(), Error<Flash::Error>> {
        let data = StorageData::Config(*config);
        self.map.store_item(&mut self.buffer, &data.key(), &data).await
    }

    async fn reset_to_defaults(&mut self) -> Config {
        let defaults = Config::default();
        if self.save(&defaults).await.is_err() {
            error!("could not persist default configuration");
        }
        defaults
    }
}
