//! Device configuration snapshot.
//!
//! The firmware holds exactly one live `Config` and hands out copies to
//! the data-path tasks, which re-read it at the top of their loops. The
//! JSON key names are fixed by the deployed consumers and the original
//! calibration tooling, hence the unusual `q(0,0)` style matrix keys.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::Side;

/// Upper bound on the serialized configuration, used to size buffers.
pub const CONFIG_JSON_MAX: usize = 640;

/// Which transport the connection subsystem should drive. The two are
/// mutually exclusive; switching requires a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportKind {
    Mqtt = 0,
    Ble = 1,
}

// On the wire the transport is a bare integer (`"connection": 0`).
impl Serialize for TransportKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for TransportKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KindVisitor;

        impl Visitor<'_> for KindVisitor {
            type Value = TransportKind;

            fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                f.write_str("0 (networked pub/sub) or 1 (low energy)")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                match value {
                    0 => Ok(TransportKind::Mqtt),
                    1 => Ok(TransportKind::Ble),
                    other => Err(E::custom(other)),
                }
            }
        }

        deserializer.deserialize_u64(KindVisitor)
    }
}

/// Calibration for one strain gauge channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StrainCalibration {
    /// Raw reading with no load applied.
    pub offset: u32,
    /// N*m per raw count.
    #[serde(rename = "coef")]
    pub coefficient: f32,
    /// Temperature the coefficient was measured at, Celsius.
    #[serde(rename = "temp-test")]
    pub temp_reference: f32,
    /// Fractional change of the coefficient per Kelvin.
    #[serde(rename = "temp-coef")]
    pub temp_coefficient: f32,
}

impl Default for StrainCalibration {
    fn default() -> Self {
        Self {
            offset: 0,
            coefficient: 1.0,
            temp_reference: 25.0,
            temp_coefficient: 0.0,
        }
    }
}

/// The complete snapshot consumed by the acquisition pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub connection: TransportKind,
    #[serde(rename = "q(0,0)")]
    pub q00: f32,
    #[serde(rename = "q(0,1)")]
    pub q01: f32,
    #[serde(rename = "q(1,0)")]
    pub q10: f32,
    #[serde(rename = "q(1,1)")]
    pub q11: f32,
    #[serde(rename = "r(0,0)")]
    pub r00: f32,
    #[serde(rename = "r(0,1)")]
    pub r01: f32,
    #[serde(rename = "r(1,0)")]
    pub r10: f32,
    #[serde(rename = "r(1,1)")]
    pub r11: f32,
    /// Send every Nth IMU record. 1 sends every sample.
    #[serde(rename = "imuHowOften")]
    pub imu_decimation: u8,
    /// Seconds without a forward rotation before entering sleep.
    /// 0 disables the timeout; 1..=20 is rejected as too twitchy.
    #[serde(rename = "sleep-timeout")]
    pub sleep_timeout_s: u16,
    #[serde(rename = "left-strain")]
    pub left_strain: StrainCalibration,
    #[serde(rename = "right-strain")]
    pub right_strain: StrainCalibration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: TransportKind::Mqtt,
            q00: 0.002,
            q01: 0.0,
            q10: 0.0,
            q11: 0.1,
            r00: 100.0,
            r01: 0.0,
            r10: 0.0,
            r11: 0.01,
            imu_decimation: 1,
            sleep_timeout_s: 300,
            left_strain: StrainCalibration::default(),
            right_strain: StrainCalibration::default(),
        }
    }
}

/// Why a configuration payload was rejected. Rejection is atomic: the
/// previous snapshot stays in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    Malformed,
    DecimationZero,
    SleepTimeoutTooShort,
    NonFiniteCovariance,
    NonFiniteCalibration,
}

impl Config {
    /// Environment covariance as a row-major 2x2 matrix.
    pub fn q_matrix(&self) -> [[f32; 2]; 2] {
        [[self.q00, self.q01], [self.q10, self.q11]]
    }

    /// Measurement covariance as a row-major 2x2 matrix.
    pub fn r_matrix(&self) -> [[f32; 2]; 2] {
        [[self.r00, self.r01], [self.r10, self.r11]]
    }

    pub fn strain(&self, side: Side) -> &StrainCalibration {
        match side {
            Side::Left => &self.left_strain,
            Side::Right => &self.right_strain,
        }
    }

    pub fn strain_mut(&mut self, side: Side) -> &mut StrainCalibration {
        match side {
            Side::Left => &mut self.left_strain,
            Side::Right => &mut self.right_strain,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.imu_decimation == 0 {
            return Err(ConfigError::DecimationZero);
        }
        if (1..=20).contains(&self.sleep_timeout_s) {
            return Err(ConfigError::SleepTimeoutTooShort);
        }
        let covariances = [
            self.q00, self.q01, self.q10, self.q11, self.r00, self.r01,
            self.r10, self.r11,
        ];
        if covariances.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::NonFiniteCovariance);
        }
        for side in Side::BOTH {
            let strain = self.strain(side);
            let values =
                [strain.coefficient, strain.temp_reference, strain.temp_coefficient];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ConfigError::NonFiniteCalibration);
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<heapless::String<CONFIG_JSON_MAX>, ConfigError> {
        serde_json_core::to_string(self).map_err(|_| ConfigError::Malformed)
    }

    /// Parses and validates a payload. Anything wrong leaves the caller's
    /// current configuration untouched.
    pub fn from_json(payload: &[u8]) -> Result<Self, ConfigError> {
        let (config, _) = serde_json_core::from_slice::<Config>(payload)
            .map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn json_round_trip() {
        let mut config = Config::default();
        config.connection = TransportKind::Ble;
        config.q11 = 0.25;
        config.imu_decimation = 4;
        config.right_strain.offset = 6_252_516;
        config.right_strain.coefficient = -3.2e-5;

        let json = config.to_json().unwrap();
        let decoded = Config::from_json(json.as_bytes()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn json_uses_consumer_key_names() {
        let json = Config::default().to_json().unwrap();
        for key in [
            "\"connection\":0",
            "\"q(0,0)\":",
            "\"r(1,1)\":",
            "\"imuHowOften\":1",
            "\"sleep-timeout\":300",
            "\"left-strain\":{\"offset\":0,\"coef\":",
            "\"temp-test\":",
            "\"temp-coef\":",
        ] {
            assert!(json.contains(key), "missing {} in {}", key, json);
        }
    }

    #[test]
    fn rejects_zero_decimation() {
        let mut config = Config::default();
        config.imu_decimation = 0;
        assert_eq!(config.validate(), Err(ConfigError::DecimationZero));
    }

    #[test]
    fn rejects_short_sleep_timeout_but_not_zero_or_long() {
        let mut config = Config::default();
        for invalid in [1u16, 10, 20] {
            config.sleep_timeout_s = invalid;
            assert_eq!(config.validate(), Err(ConfigError::SleepTimeoutTooShort));
        }
        for valid in [0u16, 21, 600] {
            config.sleep_timeout_s = valid;
            assert_eq!(config.validate(), Ok(()));
        }
    }

    #[test]
    fn rejects_non_finite_covariance() {
        let mut config = Config::default();
        config.r00 = f32::NAN;
        assert_eq!(config.validate(), Err(ConfigError::NonFiniteCovariance));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert_eq!(
            Config::from_json(b"{\"connection\":").unwrap_err(),
            ConfigError::Malformed
        );
        assert_eq!(
            Config::from_json(b"{\"connection\":7}").unwrap_err(),
            ConfigError::Malformed
        );
    }

    #[test]
    fn transport_kind_encodes_as_integer() {
        let mut config = Config::default();
        config.connection = TransportKind::Ble;
        let json = config.to_json().unwrap();
        assert!(json.contains("\"connection\":1"));
    }
}
