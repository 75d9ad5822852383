use embassy_time::{with_timeout, Instant};

use crank_icd::{
    Config, SampleHeader, Side, SideRecord, StrainCalibration, INVALID_TEMPERATURE,
    OFFSET_COMPENSATION_SAMPLES,
};

use super::DataReadySignal;
use crate::devices::StrainAdc;
use crate::fmt::Debug2Format;
use crate::kalman::Prediction;
use crate::tasks::low_speed::side_bit;
use crate::CoreContext;

/// Converts a raw reading to torque. The bridge is close to linear; the
/// residual temperature dependence of the gauge factor is compensated to
/// first order against the calibration temperature. With no temperature
/// reading yet the thermal term is skipped.
fn calculate_torque(raw: u32, calibration: &StrainCalibration, temperature: f32) -> f32 {
    let difference = raw.wrapping_sub(calibration.offset) as i32;
    let mut torque = difference as f32 * calibration.coefficient;
    if temperature != INVALID_TEMPERATURE {
        torque *= 1.0
            - calibration.temp_coefficient
                * (temperature - calibration.temp_reference);
    }
    torque
}

/// Per-sample state for one side's ingest loop.
pub struct SideSampler<'a> {
    ctx: &'a CoreContext,
    side: Side,
    /// Energy accumulated this rotation segment, joules.
    energy: f32,
    last_sample_us: u32,
    segment_start_us: u32,
    last_rotation: u32,
    /// Remaining samples in a zero-offset averaging run; 0 in normal
    /// operation.
    offset_steps: u32,
    /// Running sum of the averaging run. Divided once at the end so a
    /// constant input yields its exact value.
    offset_sum: u64,
    /// One-shot: the next read also starts the ADC's internal offset
    /// calibration (armed at start-up and when an averaging run begins).
    adc_offset_calibration: bool,
}

impl<'a> SideSampler<'a> {
    pub fn new(ctx: &'a CoreContext, side: Side) -> Self {
        Self {
            ctx,
            side,
            energy: 0.0,
            last_sample_us: 0,
            segment_start_us: 0,
            last_rotation: 0,
            offset_steps: 0,
            offset_sum: 0,
            adc_offset_calibration: true,
        }
    }

    /// Starts a zero-offset averaging run. No load may be on the cranks.
    pub fn begin_zero_offset(&mut self) {
        self.offset_steps = OFFSET_COMPENSATION_SAMPLES;
        self.offset_sum = 0;
        self.adc_offset_calibration = true;
        info!("zero-offset averaging started");
    }

    /// Whether the next read should clock the extra calibration pulses.
    /// Clears itself, mirroring the ADC which leaves calibration mode on
    /// its own.
    pub fn take_adc_offset_calibration(&mut self) -> bool {
        let armed = self.adc_offset_calibration;
        self.adc_offset_calibration = false;
        armed
    }

    pub fn calibrating(&self) -> bool {
        self.offset_steps != 0
    }

    /// Handles one conversion made available at `timestamp_us` with the
    /// crank state predicted for that instant.
    pub fn process(
        &mut self,
        timestamp_us: u32,
        prediction: &Prediction,
        raw: u32,
        config: &Config,
    ) {
        if self.offset_steps != 0 {
            self.offset_sum += raw as u64;
            self.offset_steps -= 1;
            if self.offset_steps == 0 {
                let offset = (self.offset_sum / OFFSET_COMPENSATION_SAMPLES as u64) as u32;
                self.ctx.config.set_strain_offset(self.side, offset);
                info!("zero offset stored: {}", offset);
            }
            self.update_average_power(timestamp_us);
            return;
        }

        let torque = calculate_torque(
            raw,
            config.strain(self.side),
            self.ctx.side(self.side).last_temperature.get(),
        );
        let record = SideRecord::new(
            SampleHeader {
                timestamp_us,
                velocity: prediction.state.velocity,
                position: prediction.state.angle,
            },
            raw,
            torque,
        );
        self.ctx.connection.add_side(self.side, &record);

        // A rotation event most likely predates this reading, so close
        // the previous segment before this sample's energy lands.
        self.update_average_power(timestamp_us);

        let dt_us = timestamp_us.wrapping_sub(self.last_sample_us);
        self.energy += record.power * dt_us as f32 * 1e-6;
        self.last_sample_us = timestamp_us;
    }

    /// Publishes the segment's average power once the rotation counter
    /// moves, and raises this side's rendezvous bit. Also called on the
    /// sample timeout path so a dead sensor cannot stall the rendezvous.
    pub fn update_average_power(&mut self, now_us: u32) {
        let rotations = self.ctx.rotation.count();
        if rotations == self.last_rotation {
            return;
        }
        self.last_rotation = rotations;

        let span_s = now_us.wrapping_sub(self.segment_start_us) as f32 * 1e-6;
        let average = if span_s > 0.0 { self.energy / span_s } else { 0.0 };
        self.ctx.side(self.side).average_power.set(average);

        self.segment_start_us = now_us;
        self.energy = 0.0;

        self.ctx.low_speed_notify.notify(side_bit(self.side));
    }
}

/// Side ingest task body. The data-ready ISR detaches itself, stamps
/// `micros()` into the signal and yields; this loop does the rest.
///
/// Wrap it on hardware as:
///
/// ```ignore
/// #[embassy_executor::task(pool_size = 2)]
/// async fn side_task(
///     ctx: &'static CoreContext,
///     side: Side,
///     adc: SideAdc<...>,
/// ) {
///     run_side_task(ctx, side, adc, data_ready(side)).await;
/// }
/// ```
pub async fn run_side_task<A: StrainAdc>(
    ctx: &CoreContext,
    side: Side,
    mut adc: A,
    data_ready: &DataReadySignal,
) {
    info!("side task starting");
    let mut sampler = SideSampler::new(ctx, side);

    loop {
        let config = ctx.config.snapshot();
        if ctx.side(side).take_zero_offset_request() {
            sampler.begin_zero_offset();
        }

        match with_timeout(ctx.timings.side_sample_timeout, data_ready.wait()).await {
            Ok(timestamp_us) => {
                // The conversion sits in the ADC's buffer for many ms, so
                // there is no rush now that the ready time is captured.
                let prediction = ctx.kalman.predict(timestamp_us);
                let result = if sampler.take_adc_offset_calibration() {
                    adc.read_starting_offset_calibration()
                } else {
                    adc.read()
                };
                adc.rearm_interrupt();

                match result {
                    Ok(raw) => {
                        sampler.process(timestamp_us, &prediction, raw, &config)
                    }
                    Err(e) => error!("adc read failed: {:?}", Debug2Format(&e)),
                }
            }
            Err(_) => {
                // No conversion in time. Re-attach in case the sensor
                // recovers and keep the rendezvous moving with the
                // current time, which is as close as we can get.
                adc.rearm_interrupt();
                let now_us = Instant::now().as_micros() as u32;
                sampler.update_average_power(now_us);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crank_icd::Config;

    fn context() -> CoreContext {
        let ctx = CoreContext::new(Config::default());
        ctx.connection.set_accept_data(true);
        ctx
    }

    fn prediction(velocity: f32, angle: f32) -> Prediction {
        Prediction {
            state: crate::kalman::CrankState { angle, velocity },
            covariance: [[0.0; 2]; 2],
        }
    }

    #[test]
    fn torque_is_linear_in_raw_counts() {
        let calibration = StrainCalibration {
            offset: 1000,
            coefficient: 0.5,
            ..StrainCalibration::default()
        };
        assert_eq!(calculate_torque(3000, &calibration, 25.0), 1000.0);
        // Readings below the offset give negative torque.
        assert_eq!(calculate_torque(0, &calibration, 25.0), -500.0);
    }

    #[test]
    fn thermal_compensation_scales_with_temperature_delta() {
        let calibration = StrainCalibration {
            offset: 0,
            coefficient: 1.0,
            temp_reference: 25.0,
            temp_coefficient: 0.01,
        };
        let torque = calculate_torque(100, &calibration, 35.0);
        assert!((torque - 100.0 * (1.0 - 0.01 * 10.0)).abs() < 1e-3);
    }

    #[test]
    fn unknown_temperature_skips_compensation() {
        let calibration = StrainCalibration {
            offset: 0,
            coefficient: 1.0,
            temp_reference: 25.0,
            temp_coefficient: 0.5,
        };
        assert_eq!(calculate_torque(100, &calibration, INVALID_TEMPERATURE), 100.0);
    }

    #[test]
    fn emitted_record_carries_power_velocity_product() {
        let ctx = context();
        let mut sampler = SideSampler::new(&ctx, Side::Left);
        let config = ctx.config.snapshot();

        sampler.process(10_000, &prediction(4.0, 0.5), 250, &config);

        let record = ctx.connection.try_take_side(Side::Left).unwrap();
        assert_eq!(record.raw, 250);
        assert_eq!(record.power, record.torque * 4.0);
        assert_eq!(record.header.timestamp_us, 10_000);
    }

    #[test]
    fn zero_offset_run_stores_exact_average_and_mutes_records() {
        let ctx = context();
        let mut sampler = SideSampler::new(&ctx, Side::Left);
        let config = ctx.config.snapshot();

        sampler.begin_zero_offset();
        assert!(sampler.take_adc_offset_calibration());
        for i in 0..OFFSET_COMPENSATION_SAMPLES {
            sampler.process(10_000 + i * 1_000, &prediction(0.0, 0.0), 9_848_390, &config);
        }

        assert!(!sampler.calibrating());
        assert_eq!(ctx.config.snapshot().strain(Side::Left).offset, 9_848_390);
        // No high-speed records during the run.
        assert!(ctx.connection.try_take_side(Side::Left).is_none());

        // With coefficient 1.0 an equal reading now maps to exactly zero.
        let updated = ctx.config.snapshot();
        sampler.process(500_000, &prediction(1.0, 0.0), 9_848_390, &updated);
        let record = ctx.connection.try_take_side(Side::Left).unwrap();
        assert_eq!(record.torque, 0.0);
    }

    #[test]
    fn average_power_closes_segment_on_rotation() {
        let ctx = context();
        let mut sampler = SideSampler::new(&ctx, Side::Right);
        let mut config = ctx.config.snapshot();
        config.right_strain.coefficient = 1.0;
        ctx.config.update(config);
        let config = ctx.config.snapshot();

        // Constant 10 rad/s, torque 5 Nm, sampled every 10 ms for 1 s:
        // 50 W for one second.
        for i in 1..=100u32 {
            sampler.process(i * 10_000, &prediction(10.0, 0.0), 5, &config);
        }
        ctx.rotation.complete_at(1_000_000);
        sampler.update_average_power(1_000_000);

        let average = ctx.side(Side::Right).average_power.get();
        assert!((average - 50.0).abs() < 1.0, "average {}", average);
        assert_ne!(ctx.low_speed_notify.value() & side_bit(Side::Right), 0);
    }

    #[test]
    fn average_power_only_publishes_once_per_rotation() {
        let ctx = context();
        let mut sampler = SideSampler::new(&ctx, Side::Left);

        ctx.rotation.complete_at(500_000);
        sampler.update_average_power(500_000);
        ctx.low_speed_notify.clear();

        // Same rotation count again: no new notification.
        sampler.update_average_power(600_000);
        assert_eq!(ctx.low_speed_notify.value(), 0);
    }

    #[test]
    fn timestamps_on_emitted_records_are_monotonic() {
        let ctx = context();
        let mut sampler = SideSampler::new(&ctx, Side::Left);
        let config = ctx.config.snapshot();

        for i in 1..=20u32 {
            sampler.process(i * 7_000, &prediction(1.0, 0.0), 100, &config);
        }
        let mut last = 0;
        while let Some(record) = ctx.connection.try_take_side(Side::Left) {
            assert!(record.header.timestamp_us >= last);
            last = record.header.timestamp_us;
        }
        assert_eq!(last, 140_000);
    }
}
