#![cfg_attr(not(test), no_std)]

//! Acquisition and fusion core of the crank power meter.
//!
//! Two strain-gauge ADCs (one per pedal side) and a six-axis IMU feed a
//! small task graph:
//!
//! ```text
//! ADC irq ──▶ side task ×2 ──▶ side queues ─┐
//! IMU irq ──▶ imu task ──▶ Kalman state     ├──▶ connection ──▶ transport
//!               │          imu queue ───────┤
//!               └─ rotation events ─▶ low-speed task ─▶ low-speed queue
//! supervisor ──▶ housekeeping queue ────────┘
//! ```
//!
//! The IMU task owns the Kalman filter update; the side tasks query it
//! through the predict-only path to timestamp their torque samples with
//! angle and velocity. Rotation completions fan out to the side tasks
//! (energy segment cut) and the low-speed task (rendezvous of both
//! per-side averages).
//!
//! Task bodies are plain generic `async fn`s over the traits in
//! [`devices`]; a platform crate wraps them in executor tasks, binds the
//! interrupts and provides the transports. Spawn the IMU task on the
//! highest-priority executor, the side tasks below it, and everything
//! else (low-speed, connection, supervisor, console) at the base
//! priority. A minimal bring-up looks like:
//!
//! ```ignore
//! static CONTEXT: StaticCell<CoreContext> = StaticCell::new();
//! static IMU_READY: SampleReadySignal = Signal::new();
//!
//! let config = settings.load_or_default().await;
//! let ctx = CONTEXT.init(CoreContext::new(config));
//! spawner.must_spawn(imu_task(ctx, imu, &IMU_READY));
//! spawner.must_spawn(side_task_left(ctx, left_adc));
//! spawner.must_spawn(side_task_right(ctx, right_adc));
//! spawner.must_spawn(low_speed_task(ctx));
//! spawner.must_spawn(connection_task(ctx, transport, device_info));
//! spawner.must_spawn(console_task(ctx, uart));
//! spawner.must_spawn(power_task(ctx, devices, settings));
//! ```

#[macro_use]
mod fmt;

pub mod config;
pub mod console;
pub mod devices;
pub mod events;
pub mod kalman;
pub mod storage;
pub mod sync;
pub mod tasks;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;

use crank_icd::{Config, Side};

use config::ConfigStore;
use kalman::{CrankState, Kalman, BOOT_COVARIANCE};
use sync::{Notifier, SharedCell};
use tasks::connection::Connection;
use tasks::imu::RotationTracker;
use tasks::side::SideShared;

pub use events::{Event, EventChannel};

/// Every bounded wait in the core, adjustable in one place. The
/// defaults are the production values; tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Per-side wait for a conversion before the task assumes the
    /// sensor is dead for this cycle.
    pub side_sample_timeout: Duration,
    /// Low-speed wait for the two per-side rendezvous notifications.
    pub rendezvous_timeout: Duration,
    /// Disable check between connection publish cycles.
    pub disable_poll: Duration,
    /// Supervisor cycle period.
    pub housekeeping_period: Duration,
    /// Back-off between transport connect attempts.
    pub reconnect_delay: Duration,
    /// Grace period for producers to observe a disable before hardware
    /// is power-gated; one sample period is plenty.
    pub quiesce_delay: Duration,
    /// Console set-config input window.
    pub console_input_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            side_sample_timeout: Duration::from_millis(100),
            rendezvous_timeout: Duration::from_secs(3),
            disable_poll: Duration::from_millis(1),
            housekeeping_period: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            quiesce_delay: Duration::from_millis(10),
            console_input_timeout: Duration::from_secs(30),
        }
    }
}

/// Root of all shared state, passed by borrow to every task entry
/// point. The platform pins one instance in a `StaticCell`; host tests
/// keep it on the stack.
pub struct CoreContext {
    pub kalman: Kalman,
    pub rotation: RotationTracker,
    /// IMU die temperature cached for housekeeping, Celsius.
    pub imu_temperature: SharedCell<f32>,
    sides: [SideShared; 2],
    /// Rendezvous word: rotation bit from the IMU task, one bit per
    /// side from the side tasks.
    pub low_speed_notify: Notifier,
    pub connection: Connection,
    pub config: ConfigStore,
    /// Control-plane events from the transports and the console.
    pub events: EventChannel,
    /// Fired by the IMU wake interrupt while sleeping.
    pub motion_wake: Signal<CriticalSectionRawMutex, ()>,
    pub timings: Timings,
    last_activity_us: SharedCell<u32>,
}

impl CoreContext {
    pub fn new(config: Config) -> Self {
        Self::with_timings(config, Timings::default())
    }

    pub fn with_timings(config: Config, timings: Timings) -> Self {
        Self {
            kalman: Kalman::new(
                config.q_matrix(),
                config.r_matrix(),
                CrankState { angle: 0.0, velocity: 0.0 },
                BOOT_COVARIANCE,
            ),
            rotation: RotationTracker::new(),
            imu_temperature: SharedCell::new(0.0),
            sides: [SideShared::new(), SideShared::new()],
            low_speed_notify: Notifier::new(),
            connection: Connection::new(),
            config: ConfigStore::new(config),
            events: EventChannel::new(),
            motion_wake: Signal::new(),
            timings,
            last_activity_us: SharedCell::new(0),
        }
    }

    pub fn side(&self, side: Side) -> &SideShared {
        &self.sides[side.index()]
    }

    /// Arms the zero-offset averaging run on both sides.
    pub fn request_zero_offset(&self) {
        for side in &self.sides {
            side.request_zero_offset();
        }
    }

    /// Records rider activity for the inactivity timeout: rotation
    /// completions and motion wakes.
    pub fn mark_activity(&self, time_us: u32) {
        self.last_activity_us.set(time_us);
    }

    pub fn last_activity_us(&self) -> u32 {
        self.last_activity_us.get()
    }
}

pub mod prelude {
    pub use crate::config::ConfigStore;
    pub use crate::console::run_console;
    pub use crate::devices::{
        BatteryMonitor, ImuFifoSample, ImuSensor, InterruptLine, PowerControl,
        SideAdc, SideThermometer, StrainAdc, SystemControl, TempProbe,
    };
    pub use crate::events::{Event, EventChannel};
    pub use crate::kalman::{CrankState, Kalman, Prediction};
    pub use crate::storage::{SettingsManager, SETTINGS_BUFFER};
    pub use crate::sync::{Notifier, SharedCell};
    pub use crate::tasks::connection::transport::{
        EitherTransport, HighSpeedStream, Transport,
    };
    pub use crate::tasks::connection::{run_connection_task, Connection};
    pub use crate::tasks::housekeeping::run_housekeeping_cycle;
    pub use crate::tasks::imu::{
        run_imu_task, RotationMeta, RotationTracker, SampleReadySignal,
    };
    pub use crate::tasks::low_speed::run_low_speed_task;
    pub use crate::tasks::power::{run_power_task, SupervisorDevices};
    pub use crate::tasks::side::{run_side_task, DataReadySignal, SideShared};
    pub use crate::{CoreContext, Timings};
    pub use crank_icd::{self as icd, Command, Config, DeviceInfo, Side};
}
