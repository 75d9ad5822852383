//! Host-side doubles for every device trait, used by the test suites.
//! Nothing here touches hardware; production builds simply never name
//! these types and the linker drops them.

use core::cell::RefCell;
use core::convert::Infallible;

use embedded_storage_async::nor_flash::{
    ErrorType as FlashErrorType, NorFlash, NorFlashError, NorFlashErrorKind,
    ReadNorFlash,
};

use crank_icd::Command;

use super::{
    BatteryMonitor, ImuFifoSample, ImuSensor, PowerControl, StrainAdc,
    SystemControl, TempProbe,
};
use crate::tasks::connection::transport::{HighSpeedStream, Transport};

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Scripted IMU: hands out queued FIFO samples, one batch per drain.
/// Interior mutability lets a test keep feeding samples while the
/// ingest task owns a `&MockImu` as its sensor.
pub struct MockImu {
    state: RefCell<MockImuState>,
}

struct MockImuState {
    queue: heapless::Deque<ImuFifoSample, 256>,
    fail_next_drain: bool,
    started: bool,
    wake_on_motion: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockImuError;

impl MockImu {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(MockImuState {
                queue: heapless::Deque::new(),
                fail_next_drain: false,
                started: false,
                wake_on_motion: false,
            }),
        }
    }

    pub fn push(&self, sample: ImuFifoSample) {
        self.state.borrow_mut().queue.push_back(sample).unwrap();
    }

    pub fn fail_next_drain(&self) {
        self.state.borrow_mut().fail_next_drain = true;
    }

    pub fn started(&self) -> bool {
        self.state.borrow().started
    }

    pub fn wake_on_motion(&self) -> bool {
        self.state.borrow().wake_on_motion
    }
}

impl ImuSensor for &MockImu {
    type Error = MockImuError;

    async fn read_fifo(
        &mut self,
        buf: &mut [ImuFifoSample],
    ) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_next_drain {
            state.fail_next_drain = false;
            state.queue.clear();
            return Err(MockImuError);
        }
        let mut n = 0;
        while n < buf.len() {
            match state.queue.pop_front() {
                Some(sample) => {
                    buf[n] = sample;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    async fn start_sampling(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().started = false;
        Ok(())
    }

    async fn enable_wake_on_motion(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().wake_on_motion = true;
        Ok(())
    }
}

/// Scripted ADC: queued readings with a constant fallback, and counters
/// for the interactions the side task is expected to make.
pub struct MockAdc {
    readings: heapless::Deque<u32, 512>,
    fallback: u32,
    pub rearms: u32,
    pub calibration_reads: u32,
}

impl MockAdc {
    pub fn new(fallback: u32) -> Self {
        Self {
            readings: heapless::Deque::new(),
            fallback,
            rearms: 0,
            calibration_reads: 0,
        }
    }

    pub fn script(&mut self, readings: &[u32]) {
        for &raw in readings {
            self.readings.push_back(raw).unwrap();
        }
    }

    fn next(&mut self) -> u32 {
        self.readings.pop_front().unwrap_or(self.fallback)
    }
}

impl StrainAdc for MockAdc {
    type Error = Infallible;

    fn read(&mut self) -> Result<u32, Self::Error> {
        Ok(self.next())
    }

    fn read_starting_offset_calibration(&mut self) -> Result<u32, Self::Error> {
        self.calibration_reads += 1;
        Ok(self.next())
    }

    fn rearm_interrupt(&mut self) {
        self.rearms += 1;
    }
}

/// Fixed-value thermometer.
pub struct MockProbe {
    value: f32,
}

impl MockProbe {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl TempProbe for MockProbe {
    async fn sample(&mut self) -> f32 {
        self.value
    }
}

/// Scripted battery: queued readings, then a constant fallback.
pub struct MockBattery {
    script: heapless::Deque<u32, 16>,
    fallback: u32,
}

impl MockBattery {
    pub fn new(fallback: u32) -> Self {
        Self { script: heapless::Deque::new(), fallback }
    }

    pub fn script(&mut self, readings: &[u32]) {
        for &mv in readings {
            self.script.push_back(mv).unwrap();
        }
    }
}

impl BatteryMonitor for MockBattery {
    async fn read_millivolts(&mut self) -> u32 {
        self.script.pop_front().unwrap_or(self.fallback)
    }
}

// ---------------------------------------------------------------------------
// Power and system control
// ---------------------------------------------------------------------------

pub struct MockPower {
    pub power_ups: u32,
    pub power_downs: u32,
}

impl MockPower {
    pub fn new() -> Self {
        Self { power_ups: 0, power_downs: 0 }
    }
}

impl PowerControl for MockPower {
    async fn power_up(&mut self) {
        self.power_ups += 1;
    }

    async fn power_down(&mut self) {
        self.power_downs += 1;
    }
}

pub struct MockSystem {
    pub reboots: u32,
    pub bootloader_reboots: u32,
    pub flat_shutdowns: u32,
}

impl MockSystem {
    pub fn new() -> Self {
        Self { reboots: 0, bootloader_reboots: 0, flat_shutdowns: 0 }
    }
}

impl SystemControl for MockSystem {
    fn reboot(&mut self, bootloader: bool) {
        if bootloader {
            self.bootloader_reboots += 1;
        } else {
            self.reboots += 1;
        }
    }

    fn flat_shutdown(&mut self) {
        self.flat_shutdowns += 1;
    }
}

// ---------------------------------------------------------------------------
// Flash
// ---------------------------------------------------------------------------

pub const MOCK_FLASH_SIZE: usize = 8192;

/// RAM-backed NOR flash with real NOR semantics: erase sets pages to
/// 0xFF, writes can only clear bits.
pub struct MockFlash {
    data: [u8; MOCK_FLASH_SIZE],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockFlashError;

impl NorFlashError for MockFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl MockFlash {
    pub fn new() -> Self {
        Self { data: [0xFF; MOCK_FLASH_SIZE] }
    }
}

impl FlashErrorType for MockFlash {
    type Error = MockFlashError;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.data.len() {
            return Err(MockFlashError);
        }
        bytes.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let (from, to) = (from as usize, to as usize);
        if to > self.data.len()
            || from % Self::ERASE_SIZE != 0
            || to % Self::ERASE_SIZE != 0
        {
            return Err(MockFlashError);
        }
        self.data[from..to].fill(0xFF);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        if start % Self::WRITE_SIZE != 0
            || bytes.len() % Self::WRITE_SIZE != 0
            || start + bytes.len() > self.data.len()
        {
            return Err(MockFlashError);
        }
        for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes)
        {
            *cell &= *byte;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Serial
// ---------------------------------------------------------------------------

/// Scripted console stream: serves the canned input one byte at a time,
/// then reports end-of-stream; captures everything written.
pub struct MockSerial {
    input: heapless::Deque<u8, 1024>,
    output: heapless::Vec<u8, 4096>,
}

impl MockSerial {
    pub fn new(input: &[u8]) -> Self {
        let mut queue = heapless::Deque::new();
        for &byte in input {
            queue.push_back(byte).unwrap();
        }
        Self { input: queue, output: heapless::Vec::new() }
    }

    pub fn written(&self) -> &[u8] {
        &self.output
    }
}

impl embedded_io_async::ErrorType for MockSerial {
    type Error = Infallible;
}

impl embedded_io_async::Read for MockSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self.input.pop_front() {
            Some(byte) if !buf.is_empty() => {
                buf[0] = byte;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

impl embedded_io_async::Write for MockSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let _ = self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Everything the mock transport saw, shared with the test through a
/// `RefCell` so it stays observable while the connection task owns the
/// transport itself.
pub struct TransportLog {
    pub connect_attempts: u32,
    /// Number of upcoming connect calls to fail.
    pub fail_connects: u32,
    pub link_up: bool,
    pub about_published: u32,
    pub housekeeping: heapless::Vec<heapless::String<192>, 4>,
    pub low_speed: heapless::Vec<heapless::String<128>, 8>,
    /// (stream, payload length) per published batch.
    pub batches: heapless::Vec<(HighSpeedStream, usize), 8>,
    pub last_batch: heapless::Vec<u8, 8192>,
    pub inbound: heapless::Deque<Command, 4>,
    pub shutdowns: u32,
}

impl TransportLog {
    pub fn new() -> Self {
        Self {
            connect_attempts: 0,
            fail_connects: 0,
            link_up: true,
            about_published: 0,
            housekeeping: heapless::Vec::new(),
            low_speed: heapless::Vec::new(),
            batches: heapless::Vec::new(),
            last_batch: heapless::Vec::new(),
            inbound: heapless::Deque::new(),
            shutdowns: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockTransportError;

pub struct MockTransport<'a> {
    pub log: &'a RefCell<TransportLog>,
}

impl Transport for MockTransport<'_> {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let mut log = self.log.borrow_mut();
        log.connect_attempts += 1;
        if log.fail_connects > 0 {
            log.fail_connects -= 1;
            return Err(MockTransportError);
        }
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.log.borrow().link_up
    }

    async fn publish_about(&mut self, _payload: &str) -> Result<(), Self::Error> {
        self.log.borrow_mut().about_published += 1;
        Ok(())
    }

    async fn publish_housekeeping(
        &mut self,
        payload: &str,
    ) -> Result<(), Self::Error> {
        let mut log = self.log.borrow_mut();
        let _ = log
            .housekeeping
            .push(heapless::String::try_from(payload).unwrap_or_default());
        Ok(())
    }

    async fn publish_low_speed(&mut self, payload: &str) -> Result<(), Self::Error> {
        let mut log = self.log.borrow_mut();
        let _ = log
            .low_speed
            .push(heapless::String::try_from(payload).unwrap_or_default());
        Ok(())
    }

    async fn publish_high_speed(
        &mut self,
        stream: HighSpeedStream,
        payload: &[u8],
    ) -> Result<(), Self::Error> {
        let mut log = self.log.borrow_mut();
        let _ = log.batches.push((stream, payload.len()));
        log.last_batch.clear();
        let _ = log.last_batch.extend_from_slice(payload);
        Ok(())
    }

    fn poll_command(&mut self) -> Option<Command> {
        self.log.borrow_mut().inbound.pop_front()
    }

    async fn shutdown(&mut self) {
        self.log.borrow_mut().shutdowns += 1;
    }
}
