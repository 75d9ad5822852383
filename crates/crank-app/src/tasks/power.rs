//! Top-level state machine: Active, Sleep and the terminal Flat state.
//!
//! Active runs the housekeeping supervisor and services control-plane
//! events; Sleep powers the analog front end down until the IMU reports
//! motion; Flat shuts everything off for good. Every exit from Active
//! disables the connection and gives producers one sample period to
//! stop enqueueing before hardware is gated.

use embassy_time::{with_timeout, Instant, Timer};

use crank_icd::{Command, Config};
use embedded_storage_async::nor_flash::NorFlash;

use crate::devices::{BatteryMonitor, PowerControl, SystemControl, TempProbe};
use crate::events::Event;
use crate::storage::SettingsManager;
use crate::tasks::housekeeping::{run_housekeeping_cycle, SupervisorVerdict};
use crate::CoreContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemState {
    Active,
    Sleep,
    /// Terminal: the task returns after entering it.
    Flat,
}

/// Everything the supervisor owns: the slow sensors and the power and
/// reset hooks.
pub struct SupervisorDevices<T, B, P, S> {
    pub thermometers: [T; 2],
    pub battery: B,
    pub power: P,
    pub system: S,
}

/// Supervisor task body. Returns only when the flat-battery state has
/// shut the system down.
pub async fn run_power_task<T, B, P, S, Flash, const N: usize>(
    ctx: &CoreContext,
    mut devices: SupervisorDevices<T, B, P, S>,
    settings: &mut SettingsManager<Flash, N>,
) where
    T: TempProbe,
    B: BatteryMonitor,
    P: PowerControl,
    S: SystemControl,
    Flash: NorFlash,
{
    let mut state = SystemState::Active;
    loop {
        info!("system state: {:?}", state);
        state = match state {
            SystemState::Active => {
                run_active_state(ctx, &mut devices, settings).await
            }
            SystemState::Sleep => run_sleep_state(ctx, &mut devices).await,
            SystemState::Flat => {
                run_flat_state(ctx, &mut devices).await;
                return;
            }
        };
    }
}

async fn run_active_state<T, B, P, S, Flash, const N: usize>(
    ctx: &CoreContext,
    devices: &mut SupervisorDevices<T, B, P, S>,
    settings: &mut SettingsManager<Flash, N>,
) -> SystemState
where
    T: TempProbe,
    B: BatteryMonitor,
    P: PowerControl,
    S: SystemControl,
    Flash: NorFlash,
{
    ctx.connection.enable();
    devices.power.power_up().await;

    let mut flat_streak = 0;
    loop {
        let verdict = run_housekeeping_cycle(
            ctx,
            &mut devices.thermometers,
            &mut devices.battery,
            &mut flat_streak,
        )
        .await;
        match verdict {
            SupervisorVerdict::FlatBattery => return SystemState::Flat,
            SupervisorVerdict::Sleep => return SystemState::Sleep,
            SupervisorVerdict::Continue => {}
        }

        // Service control-plane events until the next housekeeping slot.
        let deadline = Instant::now() + ctx.timings.housekeeping_period;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match with_timeout(remaining, ctx.events.receive()).await {
                Ok(event) => {
                    handle_event(ctx, settings, &mut devices.system, event).await
                }
                Err(_) => break,
            }
        }
    }
}

async fn handle_event<S: SystemControl, Flash: NorFlash, const N: usize>(
    ctx: &CoreContext,
    settings: &mut SettingsManager<Flash, N>,
    system: &mut S,
    event: Event,
) {
    match event {
        Event::Command(Command::SetConfiguration(config)) => {
            if let Err(e) = config.validate() {
                warn!("configuration rejected: {:?}", e);
                return;
            }
            ctx.config.update(config);
            match settings.save(&config).await {
                Ok(()) => info!("configuration updated"),
                Err(_) => warn!("configuration not persisted"),
            }
        }
        Event::Command(Command::PerformZeroOffset) => {
            info!("zero-offset compensation requested");
            ctx.request_zero_offset();
        }
        Event::FactoryReset => {
            let defaults = Config::default();
            ctx.config.update(defaults);
            if settings.save(&defaults).await.is_err() {
                warn!("factory defaults not persisted");
            }
        }
        Event::Reboot { bootloader } => {
            warn!("reboot requested, bootloader: {}", bootloader);
            ctx.connection.disable();
            Timer::after(ctx.timings.quiesce_delay).await;
            system.reboot(bootloader);
        }
    }
}

async fn run_sleep_state<T, B, P, S>(
    ctx: &CoreContext,
    devices: &mut SupervisorDevices<T, B, P, S>,
) -> SystemState
where
    P: PowerControl,
{
    ctx.connection.disable();
    Timer::after(ctx.timings.quiesce_delay).await;
    devices.power.power_down().await;

    ctx.motion_wake.reset();
    ctx.motion_wake.wait().await;
    info!("motion wake");
    // Give the rider a full inactivity window before sleeping again.
    ctx.mark_activity(Instant::now().as_micros() as u32);
    SystemState::Active
}

async fn run_flat_state<T, B, P, S>(
    ctx: &CoreContext,
    devices: &mut SupervisorDevices<T, B, P, S>,
) where
    P: PowerControl,
    S: SystemControl,
{
    ctx.connection.disable();
    Timer::after(ctx.timings.quiesce_delay).await;
    devices.power.power_down().await;
    devices.system.flat_shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_time::Duration;

    use crate::devices::mock::{
        MockBattery, MockFlash, MockPower, MockProbe, MockSystem,
    };
    use crate::storage::SETTINGS_BUFFER;
    use crate::Timings;

    fn fast_timings() -> Timings {
        Timings {
            housekeeping_period: Duration::from_millis(2),
            quiesce_delay: Duration::from_millis(1),
            ..Timings::default()
        }
    }

    fn devices(
        battery: MockBattery,
    ) -> SupervisorDevices<MockProbe, MockBattery, MockPower, MockSystem> {
        SupervisorDevices {
            thermometers: [MockProbe::new(25.0), MockProbe::new(25.0)],
            battery,
            power: MockPower::new(),
            system: MockSystem::new(),
        }
    }

    #[test]
    fn flat_battery_terminates_the_state_machine() {
        let ctx = CoreContext::with_timings(Config::default(), fast_timings());
        let mut settings =
            SettingsManager::<_, SETTINGS_BUFFER>::new(MockFlash::new(), 0..8192);

        let devices = devices(MockBattery::new(2500));
        block_on(async {
            run_power_task(&ctx, devices, &mut settings).await;
        });
        // Returning at all means the Flat state was reached.
    }

    #[test]
    fn sleep_then_motion_wake_then_flat() {
        let mut config = Config::default();
        config.sleep_timeout_s = 21;
        let ctx = CoreContext::with_timings(config, fast_timings());
        let mut settings =
            SettingsManager::<_, SETTINGS_BUFFER>::new(MockFlash::new(), 0..8192);

        // Healthy battery first (idle clock trips sleep), then flat
        // readings once motion wake re-enters Active.
        let mut battery = MockBattery::new(2500);
        battery.script(&[4000, 4000]);
        let devices = devices(battery);

        // Pre-arm the wake signal; the sleep state consumes it.
        ctx.mark_activity(
            (Instant::now().as_micros() as u32).wrapping_sub(30_000_000),
        );
        ctx.motion_wake.signal(());

        block_on(async {
            run_power_task(&ctx, devices, &mut settings).await;
        });
    }

    #[test]
    fn set_configuration_event_applies_and_persists() {
        let ctx = CoreContext::with_timings(Config::default(), fast_timings());
        let mut settings =
            SettingsManager::<_, SETTINGS_BUFFER>::new(MockFlash::new(), 0..8192);

        let mut config = Config::default();
        config.imu_decimation = 9;
        block_on(handle_event(
            &ctx,
            &mut settings,
            &mut MockSystem::new(),
            Event::Command(Command::SetConfiguration(config)),
        ));

        assert_eq!(ctx.config.snapshot().imu_decimation, 9);
        assert_eq!(block_on(settings.load_or_default()).imu_decimation, 9);
    }

    #[test]
    fn invalid_configuration_event_is_refused_atomically() {
        let ctx = CoreContext::with_timings(Config::default(), fast_timings());
        let mut settings =
            SettingsManager::<_, SETTINGS_BUFFER>::new(MockFlash::new(), 0..8192);

        let mut config = Config::default();
        config.sleep_timeout_s = 5;
        block_on(handle_event(
            &ctx,
            &mut settings,
            &mut MockSystem::new(),
            Event::Command(Command::SetConfiguration(config)),
        ));

        assert_eq!(ctx.config.snapshot().sleep_timeout_s, 300);
    }

    #[test]
    fn zero_offset_event_arms_both_sides() {
        let ctx = CoreContext::with_timings(Config::default(), fast_timings());
        let mut settings =
            SettingsManager::<_, SETTINGS_BUFFER>::new(MockFlash::new(), 0..8192);

        block_on(handle_event(
            &ctx,
            &mut settings,
            &mut MockSystem::new(),
            Event::Command(Command::PerformZeroOffset),
        ));

        assert!(ctx.side(crank_icd::Side::Left).take_zero_offset_request());
        assert!(ctx.side(crank_icd::Side::Right).take_zero_offset_request());
    }

    #[test]
    fn reboot_event_disables_connection_first() {
        let ctx = CoreContext::with_timings(Config::default(), fast_timings());
        let mut settings =
            SettingsManager::<_, SETTINGS_BUFFER>::new(MockFlash::new(), 0..8192);
        let mut system = MockSystem::new();

        block_on(handle_event(
            &ctx,
            &mut settings,
            &mut system,
            Event::Reboot { bootloader: true },
        ));

        assert_eq!(system.bootloader_reboots, 1);
        assert_ne!(
            ctx.connection.notify.value()
                & crate::tasks::connection::CONN_DISABLE,
            0
        );
    }
}
