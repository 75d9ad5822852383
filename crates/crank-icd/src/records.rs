//! Record shapes and their wire layouts.
//!
//! High-speed records travel as fixed little-endian binary frames so a
//! batch is a plain concatenation. Slow records travel as JSON text with
//! key names fixed by the deployed consumers.

use core::f32::consts::PI;
use core::fmt::{self, Write};

use byteorder::{ByteOrder, LittleEndian};

use crate::{Config, DeviceInfo, Side};

pub const SAMPLE_HEADER_SIZE: usize = 12;
pub const IMU_RECORD_SIZE: usize = SAMPLE_HEADER_SIZE + 24;
pub const SIDE_RECORD_SIZE: usize = SAMPLE_HEADER_SIZE + 12;

/// Fields shared by every high-speed record: capture time and the
/// filtered crank state at that instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleHeader {
    /// Microseconds since boot, wrapping at 2^32.
    pub timestamp_us: u32,
    /// Angular velocity in rad/s.
    pub velocity: f32,
    /// Crank angle in radians, (-pi, pi].
    pub position: f32,
}

impl SampleHeader {
    /// Instantaneous cadence in revolutions per minute. Cyclists do not
    /// work in radians per second.
    pub fn cadence_rpm(&self) -> f32 {
        self.velocity * 60.0 / (2.0 * PI)
    }

    pub fn write_to(&self, buf: &mut [u8; SAMPLE_HEADER_SIZE]) {
        LittleEndian::write_u32(&mut buf[0..4], self.timestamp_us);
        LittleEndian::write_f32(&mut buf[4..8], self.velocity);
        LittleEndian::write_f32(&mut buf[8..12], self.position);
    }

    pub fn read_from(buf: &[u8; SAMPLE_HEADER_SIZE]) -> Self {
        Self {
            timestamp_us: LittleEndian::read_u32(&buf[0..4]),
            velocity: LittleEndian::read_f32(&buf[4..8]),
            position: LittleEndian::read_f32(&buf[8..12]),
        }
    }
}

/// One decimated IMU sample after filtering: the fused state plus the
/// scaled six-axis readings it was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuRecord {
    pub header: SampleHeader,
    /// Linear accelerations in m/s^2, x/y/z.
    pub accel: [f32; 3],
    /// Angular rates in rad/s, x/y/z.
    pub gyro: [f32; 3],
}

impl ImuRecord {
    pub fn to_bytes(&self) -> [u8; IMU_RECORD_SIZE] {
        let mut buf = [0u8; IMU_RECORD_SIZE];
        let (head, rest) = buf.split_at_mut(SAMPLE_HEADER_SIZE);
        self.header.write_to(head.try_into().unwrap());
        for (i, v) in self.accel.iter().chain(self.gyro.iter()).enumerate() {
            LittleEndian::write_f32(&mut rest[4 * i..4 * i + 4], *v);
        }
        buf
    }

    pub fn from_bytes(buf: &[u8; IMU_RECORD_SIZE]) -> Self {
        let mut values = [0f32; 6];
        LittleEndian::read_f32_into(&buf[SAMPLE_HEADER_SIZE..], &mut values);
        Self {
            header: SampleHeader::read_from(
                buf[..SAMPLE_HEADER_SIZE].try_into().unwrap(),
            ),
            accel: [values[0], values[1], values[2]],
            gyro: [values[3], values[4], values[5]],
        }
    }
}

/// One strain-gauge sample for a single side.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SideRecord {
    pub header: SampleHeader,
    /// Raw 24-bit ADC reading, widened to 32 bits.
    pub raw: u32,
    /// Torque in N*m after calibration and thermal compensation.
    pub torque: f32,
    /// Instantaneous power in W.
    pub power: f32,
}

impl SideRecord {
    /// Builds a record with the power derived from the velocity and
    /// torque it carries, so the emitted triple is always consistent.
    pub fn new(header: SampleHeader, raw: u32, torque: f32) -> Self {
        Self { header, raw, torque, power: torque * header.velocity }
    }

    pub fn to_bytes(&self) -> [u8; SIDE_RECORD_SIZE] {
        let mut buf = [0u8; SIDE_RECORD_SIZE];
        let (head, rest) = buf.split_at_mut(SAMPLE_HEADER_SIZE);
        self.header.write_to(head.try_into().unwrap());
        LittleEndian::write_u32(&mut rest[0..4], self.raw);
        LittleEndian::write_f32(&mut rest[4..8], self.torque);
        LittleEndian::write_f32(&mut rest[8..12], self.power);
        buf
    }

    pub fn from_bytes(buf: &[u8; SIDE_RECORD_SIZE]) -> Self {
        Self {
            header: SampleHeader::read_from(
                buf[..SAMPLE_HEADER_SIZE].try_into().unwrap(),
            ),
            raw: LittleEndian::read_u32(&buf[12..16]),
            torque: LittleEndian::read_f32(&buf[16..20]),
            power: LittleEndian::read_f32(&buf[20..24]),
        }
    }
}

/// Per-rotation summary, what a basic power meter head unit would show.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LowSpeedRecord {
    /// Completed forward rotations since boot.
    pub rotation_count: u32,
    /// Duration of the most recent rotation in microseconds.
    pub last_rotation_duration_us: u32,
    /// Time the most recent rotation completed, microseconds since boot.
    pub timestamp_us: u32,
    /// Average power over the last rotation in W, both sides summed.
    pub power: f32,
    /// Share of power attributed to the right side in percent.
    /// 0 = all left, 50 = balanced, 100 = all right.
    pub balance: f32,
}

impl LowSpeedRecord {
    /// Cadence of the last rotation in RPM, from its duration.
    pub fn cadence_rpm(&self) -> f32 {
        if self.last_rotation_duration_us != 0 {
            60e6 / self.last_rotation_duration_us as f32
        } else {
            0.0
        }
    }

    pub fn write_json<const N: usize>(
        &self,
        buf: &mut heapless::String<N>,
    ) -> fmt::Result {
        write!(
            buf,
            "{{\"timestamp\":{},\"cadence\":{:.1},\"rotations\":{},\"power\":{:.1},\"balance\":{:.1}}}",
            self.timestamp_us,
            self.cadence_rpm(),
            self.rotation_count,
            self.power,
            self.balance,
        )
    }
}

/// Slow health data gathered by the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HousekeepingRecord {
    /// Strain gauge temperatures in Celsius, indexed by [`Side`].
    /// [`crate::INVALID_TEMPERATURE`] when a sensor could not be read.
    pub temperatures: [f32; 2],
    /// IMU die temperature in Celsius.
    pub imu_temperature: f32,
    /// Battery voltage in mV.
    pub battery_mv: u32,
    /// Current zero offsets, indexed by [`Side`].
    pub offsets: [u32; 2],
}

impl HousekeepingRecord {
    pub fn write_json<const N: usize>(
        &self,
        buf: &mut heapless::String<N>,
    ) -> fmt::Result {
        write!(
            buf,
            "{{\"temps\":{{\"left\":{:.2},\"right\":{:.2},\"imu\":{:.2}}},\"battery\":{},\"left-offset\":{},\"right-offset\":{}}}",
            self.temperatures[Side::Left.index()],
            self.temperatures[Side::Right.index()],
            self.imu_temperature,
            self.battery_mv,
            self.offsets[Side::Left.index()],
            self.offsets[Side::Right.index()],
        )
    }
}

/// Builds the about-device payload published once per transport attach.
pub fn write_about_json<const N: usize>(
    info: &DeviceInfo,
    connect_time_ms: u64,
    config: &Config,
    buf: &mut heapless::String<N>,
) -> fmt::Result {
    let calibration = config.to_json().map_err(|_| fmt::Error)?;
    write!(
        buf,
        "{{\"name\":\"{}\",\"compiled\":\"{}\",\"sw_version\":\"{}\",\"hw_version\":\"{}\",\"connect-time\":{},\"calibration\":{},\"mac\":\"{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}\"}}",
        info.name,
        info.compiled,
        info.sw_version,
        info.hw_version,
        connect_time_ms,
        calibration,
        info.mac[0],
        info.mac[1],
        info.mac[2],
        info.mac[3],
        info.mac[4],
        info.mac[5],
    )
}
