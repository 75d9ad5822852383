//! Periodic health sampling: temperatures, battery, offsets, plus the
//! flat-battery and inactivity checks that drive the top-level state
//! machine.

use embassy_time::Instant;

use crank_icd::{HousekeepingRecord, Side};

use crate::devices::{BatteryMonitor, TempProbe};
use crate::CoreContext;

/// Below this battery voltage the cell is considered flat.
pub const FLAT_BATTERY_MV: u32 = 3000;

/// Consecutive under-threshold samples before the flat state is entered,
/// so one sag under load does not kill the session.
pub const FLAT_BATTERY_SAMPLES: u32 = 3;

/// What the supervisor loop should do after a housekeeping pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SupervisorVerdict {
    Continue,
    /// No forward rotation within the configured timeout.
    Sleep,
    /// The battery has been flat for several samples in a row.
    FlatBattery,
}

/// One housekeeping pass: samples every slow sensor, emits the record,
/// and evaluates the shutdown criteria. The temperature reads are
/// synchronous one-shot conversions (about 12 ms each); their results
/// are also cached for the torque compensation.
pub async fn run_housekeeping_cycle<T: TempProbe, B: BatteryMonitor>(
    ctx: &CoreContext,
    thermometers: &mut [T; 2],
    battery: &mut B,
    flat_streak: &mut u32,
) -> SupervisorVerdict {
    let mut record = HousekeepingRecord::default();

    for side in Side::BOTH {
        let celsius = thermometers[side.index()].sample().await;
        ctx.side(side).last_temperature.set(celsius);
        record.temperatures[side.index()] = celsius;
    }

    record.imu_temperature = ctx.imu_temperature.get();
    record.battery_mv = battery.read_millivolts().await;

    let config = ctx.config.snapshot();
    record.offsets = [
        config.strain(Side::Left).offset,
        config.strain(Side::Right).offset,
    ];

    ctx.connection.add_housekeeping(&record);

    if record.battery_mv < FLAT_BATTERY_MV {
        *flat_streak += 1;
        if *flat_streak >= FLAT_BATTERY_SAMPLES {
            warn!("battery flat at {} mV", record.battery_mv);
            return SupervisorVerdict::FlatBattery;
        }
    } else {
        *flat_streak = 0;
    }

    if config.sleep_timeout_s > 0 {
        let idle_us = (Instant::now().as_micros() as u32)
            .wrapping_sub(ctx.last_activity_us()) as u64;
        if idle_us > config.sleep_timeout_s as u64 * 1_000_000 {
            info!("no rotation for {} s, sleeping", config.sleep_timeout_s);
            return SupervisorVerdict::Sleep;
        }
    }

    SupervisorVerdict::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crank_icd::{Config, INVALID_TEMPERATURE};
    use embassy_futures::block_on;

    use crate::devices::mock::{MockBattery, MockProbe};

    fn context_with(sleep_timeout_s: u16) -> CoreContext {
        let mut config = Config::default();
        config.sleep_timeout_s = sleep_timeout_s;
        config.left_strain.offset = 111;
        config.right_strain.offset = 222;
        let ctx = CoreContext::new(config);
        ctx.connection.set_accept_data(true);
        ctx
    }

    #[test]
    fn record_gathers_all_slow_values() {
        let ctx = context_with(0);
        ctx.imu_temperature.set(31.5);
        let mut probes = [MockProbe::new(21.0), MockProbe::new(22.0)];
        let mut battery = MockBattery::new(3900);
        let mut streak = 0;

        let verdict = block_on(run_housekeeping_cycle(
            &ctx,
            &mut probes,
            &mut battery,
            &mut streak,
        ));

        assert_eq!(verdict, SupervisorVerdict::Continue);
        let record = ctx.connection.try_take_housekeeping().unwrap();
        assert_eq!(record.temperatures, [21.0, 22.0]);
        assert_eq!(record.imu_temperature, 31.5);
        assert_eq!(record.battery_mv, 3900);
        assert_eq!(record.offsets, [111, 222]);
        // Torque compensation sees the fresh readings.
        assert_eq!(ctx.side(Side::Left).last_temperature.get(), 21.0);
    }

    #[test]
    fn failed_probe_reports_sentinel_and_continues() {
        let ctx = context_with(0);
        let mut probes =
            [MockProbe::new(INVALID_TEMPERATURE), MockProbe::new(24.0)];
        let mut battery = MockBattery::new(4000);
        let mut streak = 0;

        let verdict = block_on(run_housekeeping_cycle(
            &ctx,
            &mut probes,
            &mut battery,
            &mut streak,
        ));

        assert_eq!(verdict, SupervisorVerdict::Continue);
        let record = ctx.connection.try_take_housekeeping().unwrap();
        assert_eq!(record.temperatures[0], INVALID_TEMPERATURE);
        assert_eq!(record.temperatures[1], 24.0);
    }

    #[test]
    fn flat_battery_needs_consecutive_samples() {
        let ctx = context_with(0);
        let mut probes = [MockProbe::new(25.0), MockProbe::new(25.0)];
        let mut streak = 0;

        for expected in [
            SupervisorVerdict::Continue,
            SupervisorVerdict::Continue,
            SupervisorVerdict::FlatBattery,
        ] {
            let mut battery = MockBattery::new(2700);
            let verdict = block_on(run_housekeeping_cycle(
                &ctx,
                &mut probes,
                &mut battery,
                &mut streak,
            ));
            assert_eq!(verdict, expected);
        }
    }

    #[test]
    fn healthy_sample_resets_the_flat_streak() {
        let ctx = context_with(0);
        let mut probes = [MockProbe::new(25.0), MockProbe::new(25.0)];
        let mut streak = 2;
        let mut battery = MockBattery::new(3600);

        let verdict = block_on(run_housekeeping_cycle(
            &ctx,
            &mut probes,
            &mut battery,
            &mut streak,
        ));
        assert_eq!(verdict, SupervisorVerdict::Continue);
        assert_eq!(streak, 0);
    }

    #[test]
    fn recent_rotation_defers_sleep() {
        let ctx = context_with(21);
        let mut probes = [MockProbe::new(25.0), MockProbe::new(25.0)];
        let mut battery = MockBattery::new(4000);
        let mut streak = 0;

        // A rotation "just now" keeps the meter awake.
        ctx.mark_activity(Instant::now().as_micros() as u32);
        let verdict = block_on(run_housekeeping_cycle(
            &ctx,
            &mut probes,
            &mut battery,
            &mut streak,
        ));
        assert_eq!(verdict, SupervisorVerdict::Continue);
    }

    #[test]
    fn long_idle_trips_the_sleep_timeout() {
        let ctx = context_with(21);
        let mut probes = [MockProbe::new(25.0), MockProbe::new(25.0)];
        let mut battery = MockBattery::new(4000);
        let mut streak = 0;

        let now = Instant::now().as_micros() as u32;
        ctx.mark_activity(now.wrapping_sub(25_000_000));
        let verdict = block_on(run_housekeeping_cycle(
            &ctx,
            &mut probes,
            &mut battery,
            &mut streak,
        ));
        assert_eq!(verdict, SupervisorVerdict::Sleep);
    }

    #[test]
    fn zero_timeout_disables_sleep() {
        let ctx = context_with(0);
        let mut probes = [MockProbe::new(25.0), MockProbe::new(25.0)];
        let mut battery = MockBattery::new(4000);
        let mut streak = 0;

        ctx.mark_activity(
            (Instant::now().as_micros() as u32).wrapping_sub(1_000_000_000),
        );
        let verdict = block_on(run_housekeeping_cycle(
            &ctx,
            &mut probes,
            &mut battery,
            &mut streak,
        ));
        assert_eq!(verdict, SupervisorVerdict::Continue);
    }
}
