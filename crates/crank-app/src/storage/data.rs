use crank_icd::Config;
use sequential_storage::map::SerializationError;
use serde::{Deserialize, Serialize};

/// Keys of the persistent map.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageKey {
    Config,
}

impl From<StorageKey> for u16 {
    fn from(key: StorageKey) -> u16 {
        match key {
            StorageKey::Config => 0x0001,
        }
    }
}

/// The data types stored in the map, corresponding to `StorageKey`.
/// Stored postcard-encoded; a blob that fails to decode (including one
/// left behind by an older layout) reads back as an error and the
/// caller falls back to defaults.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageData {
    Config(Config),
}

impl StorageData {
    pub fn key(&self) -> u16 {
        match self {
            StorageData::Config(_) => StorageKey::Config.into(),
        }
    }
}

impl<'a> sequential_storage::map::Value<'a> for StorageData {
    fn serialize_into(
        &self,
        buffer: &mut [u8],
    ) -> Result<usize, SerializationError> {
        postcard::to_slice(self, buffer)
            .map_err(|_| SerializationError::BufferTooSmall)
            .map(|slice| slice.len())
    }

    fn deserialize_from(buffer: &'a [u8]) -> Result<(Self, usize), SerializationError> {
        postcard::from_bytes(buffer)
            .map(|value| (value, buffer.len()))
            .map_err(|_| SerializationError::InvalidFormat)
    }
}
