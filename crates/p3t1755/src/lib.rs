#![no_std]

//! Driver for the NXP P3T1755 digital temperature sensor.
//!
//! The sensor is kept shut down and woken for single conversions, which
//! keeps its supply current in the microamp range between reads. A
//! conversion typically takes 7.8 ms and at most 12 ms; callers start one
//! with [`P3t1755::start_one_shot`], wait, then fetch the result with
//! [`P3t1755::read_temperature`].
//!
//! The ALERT output doubles as a status LED on the power-meter boards, so
//! the polarity bit is exposed through [`P3t1755::set_alert_led`] and
//! re-applied on every configuration write.

use embedded_hal_async::i2c::I2c;

const PTR_TEMP: u8 = 0x00;
const PTR_CONF: u8 = 0x01;

const CONF_SD: u8 = 1 << 0;
const CONF_POL: u8 = 1 << 2;
const CONF_F0: u8 = 1 << 3;
const CONF_R0: u8 = 1 << 5;
const CONF_OS: u8 = 1 << 7;

/// Maximum one-shot conversion time in milliseconds.
pub const CONVERSION_TIME_MS: u64 = 12;

/// Degrees Celsius per LSB of the 16-bit temperature register.
const LSB_PER_DEGREE: f32 = 256.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// The underlying I2C transaction failed.
    I2c(E),
}

pub struct P3t1755<I2C> {
    i2c: I2C,
    address: u8,
    polarity: u8,
}

impl<E, I2C> P3t1755<I2C>
where
    I2C: I2c<Error = E>,
{
    /// The address is set by board jumpers, one per side.
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address, polarity: 0 }
    }

    /// Puts the sensor in shutdown with the default conversion time and
    /// fault queue. Call once at power-up.
    pub async fn init(&mut self) -> Result<(), Error<E>> {
        self.write_config(CONF_R0 | CONF_F0 | CONF_SD).await
    }

    /// Kicks off a single conversion. The result is valid after
    /// [`CONVERSION_TIME_MS`].
    pub async fn start_one_shot(&mut self) -> Result<(), Error<E>> {
        self.write_config(CONF_R0 | CONF_F0 | CONF_SD | CONF_OS).await
    }

    /// Reads the temperature register in Celsius. Returns whatever the
    /// last completed conversion produced.
    pub async fn read_temperature(&mut self) -> Result<f32, Error<E>> {
        let mut raw = [0u8; 2];
        self.i2c
            .write_read(self.address, &[PTR_TEMP], &mut raw)
            .await
            .map_err(Error::I2c)?;
        let counts = i16::from_be_bytes(raw);
        Ok(counts as f32 / LSB_PER_DEGREE)
    }

    /// Drives the ALERT pin as an LED by flipping the polarity bit.
    pub async fn set_alert_led(&mut self, on: bool) -> Result<(), Error<E>> {
        self.polarity = if on { CONF_POL } else { 0 };
        self.write_config(CONF_R0 | CONF_F0 | CONF_SD).await
    }

    async fn write_config(&mut self, bits: u8) -> Result<(), Error<E>> {
        self.i2c
            .write(self.address, &[PTR_CONF, bits | self.polarity])
            .await
            .map_err(Error::I2c)
    }

    pub fn free(self) -> I2C {
        self.i2c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    /// Minimal I2C fake: answers temperature reads with a canned register
    /// value and remembers the last configuration byte written.
    struct FakeBus {
        temp_register: [u8; 2],
        last_config: u8,
    }

    impl embedded_hal_async::i2c::ErrorType for FakeBus {
        type Error = Infallible;
    }

    impl I2c for FakeBus {
        async fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [embedded_hal_async::i2c::Operation<'_>],
        ) -> Result<(), Infallible> {
            use embedded_hal_async::i2c::Operation;
            let mut pointer = PTR_TEMP;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        pointer = bytes[0];
                        if pointer == PTR_CONF && bytes.len() > 1 {
                            self.last_config = bytes[1];
                        }
                    }
                    Operation::Read(buf) => {
                        if pointer == PTR_TEMP {
                            buf.copy_from_slice(&self.temp_register);
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn block_on<F: core::future::Future>(fut: F) -> F::Output {
        // The fake bus never yields, so a single poll completes.
        use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable =
            RawWakerVTable::new(clone, no_op, no_op, no_op);
        let waker =
            unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) };
        let mut context = Context::from_waker(&waker);
        let mut fut = core::pin::pin!(fut);
        match fut.as_mut().poll(&mut context) {
            Poll::Ready(value) => value,
            Poll::Pending => panic!("future stalled"),
        }
    }

    #[test]
    fn converts_register_counts_to_celsius() {
        // 0x1900 = 25.0 C, 0xE700 = -25.0 C.
        let mut sensor =
            P3t1755::new(FakeBus { temp_register: [0x19, 0x00], last_config: 0 }, 0x48);
        assert_eq!(block_on(sensor.read_temperature()).unwrap(), 25.0);

        let mut sensor =
            P3t1755::new(FakeBus { temp_register: [0xE7, 0x00], last_config: 0 }, 0x48);
        assert_eq!(block_on(sensor.read_temperature()).unwrap(), -25.0);
    }

    #[test]
    fn one_shot_sets_os_and_keeps_shutdown() {
        let mut sensor =
            P3t1755::new(FakeBus { temp_register: [0; 2], last_config: 0 }, 0x48);
        block_on(sensor.start_one_shot()).unwrap();
        let config = sensor.i2c.last_config;
        assert_ne!(config & CONF_OS, 0);
        assert_ne!(config & CONF_SD, 0);
    }

    #[test]
    fn alert_led_polarity_rides_along_on_config_writes() {
        let mut sensor =
            P3t1755::new(FakeBus { temp_register: [0; 2], last_config: 0 }, 0x48);
        block_on(sensor.set_alert_led(true)).unwrap();
        assert_ne!(sensor.i2c.last_config & CONF_POL, 0);
        block_on(sensor.start_one_shot()).unwrap();
        assert_ne!(sensor.i2c.last_config & CONF_POL, 0);
    }
}
