#![no_std]

//! Driver for the TI ADS1232, a 24-bit delta-sigma ADC for bridge
//! sensors, read over its two-wire serial interface (DOUT/DRDY + SCLK).
//!
//! The part has no register map. Conversions run continuously; DOUT
//! falling signals that a result is ready and the host clocks it out bit
//! by bit, MSB first. Clocking two extra bits after the result starts the
//! ADC's internal offset-calibration cycle, which the datasheet
//! recommends after power-up and after large temperature changes.
//!
//! The result must be read between DRDY falling and the start of the next
//! conversion, so callers normally wire DOUT to an edge interrupt and
//! read from the woken task.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

/// Number of data bits in one conversion result.
pub const RESULT_BITS: u8 = 24;
/// Extra clock pulses that arm the internal offset-calibration cycle.
const OFFSET_CAL_BITS: u8 = 2;
/// Half-period of the bit-bang clock. Well above the 100 ns minimum.
const CLOCK_HALF_PERIOD_NS: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// A GPIO operation failed.
    Pin(E),
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::Pin(e)
    }
}

pub struct Ads1232<Dout, Sclk, Delay> {
    dout: Dout,
    sclk: Sclk,
    delay: Delay,
}

impl<E, Dout, Sclk, Delay> Ads1232<Dout, Sclk, Delay>
where
    Dout: InputPin<Error = E>,
    Sclk: OutputPin<Error = E>,
    Delay: DelayNs,
{
    /// Takes ownership of the data and clock pins. SCLK must idle low;
    /// holding it high for more than 26 us would power the ADC down.
    pub fn new(dout: Dout, sclk: Sclk, delay: Delay) -> Self {
        Self { dout, sclk, delay }
    }

    /// A conversion result is ready while DOUT/DRDY is low.
    pub fn data_ready(&mut self) -> Result<bool, Error<E>> {
        Ok(self.dout.is_low()?)
    }

    /// Clocks out the 24-bit conversion result.
    pub fn read(&mut self) -> Result<u32, Error<E>> {
        self.clock_out(RESULT_BITS)
    }

    /// Clocks out the result with two extra pulses, starting the ADC's
    /// internal offset-calibration cycle. The extra bits are dropped.
    pub fn read_starting_offset_calibration(&mut self) -> Result<u32, Error<E>> {
        let raw = self.clock_out(RESULT_BITS + OFFSET_CAL_BITS)?;
        Ok(raw >> OFFSET_CAL_BITS)
    }

    fn clock_out(&mut self, bits: u8) -> Result<u32, Error<E>> {
        let mut raw = 0u32;
        for _ in 0..bits {
            self.sclk.set_high()?;
            self.delay.delay_ns(CLOCK_HALF_PERIOD_NS);
            raw = (raw << 1) | self.dout.is_high()? as u32;
            self.sclk.set_low()?;
            self.delay.delay_ns(CLOCK_HALF_PERIOD_NS);
        }
        Ok(raw)
    }

    /// Releases the pins.
    pub fn free(self) -> (Dout, Sclk) {
        (self.dout, self.sclk)
    }
}
