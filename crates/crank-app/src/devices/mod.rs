//! Device traits the task loops are generic over, plus the adapters that
//! implement them for the real parts.
//!
//! The platform binary owns pin assignment, bus construction and
//! interrupt binding; it hands the finished devices to the task entry
//! points. Host tests hand in the doubles from [`mock`] instead.

pub mod mock;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::i2c::I2c;
use embassy_time::Timer;

use crank_icd::INVALID_TEMPERATURE;

use crate::fmt::Debug2Format;

/// One FIFO entry from the six-axis IMU, raw counts plus validity flags.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuFifoSample {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
    /// FIFO temperature byte; degrees C = raw / 2 + 25.
    pub temperature_raw: i8,
    pub accel_valid: bool,
    pub gyro_valid: bool,
}

impl ImuFifoSample {
    /// Die temperature in Celsius.
    pub fn temperature_celsius(&self) -> f32 {
        self.temperature_raw as f32 / 2.0 + 25.0
    }
}

/// Six-axis IMU with a watermarked FIFO.
#[allow(async_fn_in_trait)]
pub trait ImuSensor {
    type Error: core::fmt::Debug;

    /// Drains buffered samples into `buf`, returning how many were
    /// written. An error means the FIFO state is unusable (overrun);
    /// whatever remained is discarded by the device.
    async fn read_fifo(
        &mut self,
        buf: &mut [ImuFifoSample],
    ) -> Result<usize, Self::Error>;

    /// Starts continuous accel + gyro sampling with the FIFO interrupt.
    async fn start_sampling(&mut self) -> Result<(), Self::Error>;

    /// Stops sampling.
    async fn stop(&mut self) -> Result<(), Self::Error>;

    /// Reconfigures the part so motion fires the wake interrupt.
    async fn enable_wake_on_motion(&mut self) -> Result<(), Self::Error>;
}

/// One side's strain-gauge ADC. Reads are short blocking bit-bang
/// transfers done from the task woken by the data-ready interrupt.
pub trait StrainAdc {
    type Error: core::fmt::Debug;

    fn read(&mut self) -> Result<u32, Self::Error>;

    /// Read that also starts the ADC's internal offset calibration.
    fn read_starting_offset_calibration(&mut self) -> Result<u32, Self::Error>;

    /// Re-enables the data-ready interrupt; the ISR disables itself so
    /// the clocked-out bits are not mistaken for new conversions.
    fn rearm_interrupt(&mut self);
}

/// One side's temperature sensor.
#[allow(async_fn_in_trait)]
pub trait TempProbe {
    /// Runs a one-shot conversion and returns Celsius, or
    /// [`INVALID_TEMPERATURE`] when the sensor cannot be read. Takes the
    /// conversion time (about 12 ms) to complete.
    async fn sample(&mut self) -> f32;
}

/// Battery voltage sense.
#[allow(async_fn_in_trait)]
pub trait BatteryMonitor {
    async fn read_millivolts(&mut self) -> u32;
}

/// Gates the analog front end and the IMU power states across the
/// active/sleep transitions.
#[allow(async_fn_in_trait)]
pub trait PowerControl {
    /// Powers the strain bridges and ADCs, runs the ADC reset sequence
    /// and restarts sampling.
    async fn power_up(&mut self);

    /// Drops into the low-power configuration; on hardware this also
    /// arms the motion-wake interrupt.
    async fn power_down(&mut self);
}

/// Resets and terminal shutdown, reachable from the console and the
/// flat-battery state.
pub trait SystemControl {
    fn reboot(&mut self, bootloader: bool);

    /// Final power-off for a flat battery: disables every wake source.
    /// Only a battery swap (or the reset pin) brings the device back.
    fn flat_shutdown(&mut self);
}

/// The data-ready interrupt line for one ADC.
pub trait InterruptLine {
    fn enable(&mut self);
}

/// Bundles the ADS1232 driver with its interrupt line so the pair
/// satisfies [`StrainAdc`].
pub struct SideAdc<Dout, Sclk, Delay, Irq> {
    adc: ads1232::Ads1232<Dout, Sclk, Delay>,
    irq: Irq,
}

impl<E, Dout, Sclk, Delay, Irq> SideAdc<Dout, Sclk, Delay, Irq>
where
    Dout: InputPin<Error = E>,
    Sclk: OutputPin<Error = E>,
    Delay: DelayNs,
    Irq: InterruptLine,
{
    pub fn new(adc: ads1232::Ads1232<Dout, Sclk, Delay>, irq: Irq) -> Self {
        Self { adc, irq }
    }
}

impl<E, Dout, Sclk, Delay, Irq> StrainAdc for SideAdc<Dout, Sclk, Delay, Irq>
where
    E: core::fmt::Debug,
    Dout: InputPin<Error = E>,
    Sclk: OutputPin<Error = E>,
    Delay: DelayNs,
    Irq: InterruptLine,
{
    type Error = ads1232::Error<E>;

    fn read(&mut self) -> Result<u32, Self::Error> {
        self.adc.read()
    }

    fn read_starting_offset_calibration(&mut self) -> Result<u32, Self::Error> {
        self.adc.read_starting_offset_calibration()
    }

    fn rearm_interrupt(&mut self) {
        self.irq.enable();
    }
}

/// P3T1755 adapter: one-shot conversion with the datasheet wait baked
/// in, failures mapped onto the sentinel so housekeeping never stalls.
pub struct SideThermometer<I2C> {
    sensor: p3t1755::P3t1755<I2C>,
}

impl<E, I2C> SideThermometer<I2C>
where
    E: core::fmt::Debug,
    I2C: I2c<Error = E>,
{
    pub fn new(sensor: p3t1755::P3t1755<I2C>) -> Self {
        Self { sensor }
    }
}

impl<E, I2C> TempProbe for SideThermometer<I2C>
where
    E: core::fmt::Debug,
    I2C: I2c<Error = E>,
{
    async fn sample(&mut self) -> f32 {
        if let Err(e) = self.sensor.start_one_shot().await {
            error!("temperature conversion start failed: {:?}", Debug2Format(&e));
            return INVALID_TEMPERATURE;
        }
        Timer::after_millis(p3t1755::CONVERSION_TIME_MS).await;
        match self.sensor.read_temperature().await {
            Ok(celsius) => celsius,
            Err(e) => {
                error!("temperature read failed: {:?}", Debug2Format(&e));
                INVALID_TEMPERATURE
            }
        }
    }
}
