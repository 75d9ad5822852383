use embassy_time::Timer;
use libm::atan2f;

use crank_icd::{ImuRecord, SampleHeader};

use super::{
    RotationDetector, SampleReadySignal, FIFO_BURST, GRAVITY, IMU_ACCEL_RANGE_G,
    IMU_GYRO_RANGE_DPS, IMU_RADIUS_X_M, IMU_RADIUS_Y_M,
};
use crate::devices::{ImuFifoSample, ImuSensor};
use crate::fmt::Debug2Format;
use crate::kalman::CrankState;
use crate::tasks::low_speed::ROTATION_BIT;
use crate::CoreContext;

/// Raw count to m/s^2.
fn scale_accel(raw: i16) -> f32 {
    raw as f32 / 32767.0 * IMU_ACCEL_RANGE_G * GRAVITY
}

/// Raw count to rad/s.
fn scale_gyro(raw: i16) -> f32 {
    raw as f32 / 32767.0 * IMU_GYRO_RANGE_DPS * core::f32::consts::PI / 180.0
}

/// Removes the centripetal term from a body-plane acceleration so
/// gravity dominates the signal. The IMU sits `radius` metres from the
/// axle along the axis in question and sees an extra r*w^2 while
/// rotating.
fn correct_centripetal(reading: f32, radius: f32, velocity: f32) -> f32 {
    reading + radius * velocity * velocity
}

/// Everything the ingest loop carries between samples.
pub struct ImuPipeline<'a> {
    ctx: &'a CoreContext,
    detector: RotationDetector,
    send_count: u8,
    decimation: u8,
    config_epoch: u32,
}

impl<'a> ImuPipeline<'a> {
    pub fn new(ctx: &'a CoreContext) -> Self {
        let config = ctx.config.snapshot();
        Self {
            ctx,
            detector: RotationDetector::default(),
            send_count: 0,
            decimation: config.imu_decimation.max(1),
            config_epoch: ctx.config.epoch(),
        }
    }

    /// Picks up configuration changes between FIFO drains: decimation
    /// factor and filter tuning.
    pub fn refresh_config(&mut self) {
        let epoch = self.ctx.config.epoch();
        if epoch != self.config_epoch {
            self.config_epoch = epoch;
            let config = self.ctx.config.snapshot();
            self.decimation = config.imu_decimation.max(1);
            self.ctx.kalman.set_tuning(config.q_matrix(), config.r_matrix());
            info!("imu pipeline reconfigured, decimation {}", self.decimation);
        }
    }

    /// Processes one FIFO entry captured at `t_capture`.
    pub fn process_sample(&mut self, sample: &ImuFifoSample, t_capture: u32) {
        if !sample.accel_valid || !sample.gyro_valid {
            error!("accel or gyro data invalid, sample dropped");
            return;
        }

        let omega = scale_gyro(sample.gyro[2]);
        let x_accel =
            correct_centripetal(scale_accel(sample.accel[0]), IMU_RADIUS_X_M, omega);
        let y_accel =
            correct_centripetal(scale_accel(sample.accel[1]), IMU_RADIUS_Y_M, omega);

        self.ctx.imu_temperature.set(sample.temperature_celsius());

        // The sensor is mounted with its z axis against the rotation
        // direction, so the reconstructed angle flips sign.
        let theta = atan2f(y_accel, x_accel);
        self.ctx
            .kalman
            .update(CrankState { angle: -theta, velocity: omega }, t_capture);

        let state = self.ctx.kalman.state();

        self.send_count += 1;
        if self.send_count >= self.decimation {
            self.send_count = 0;
            self.ctx.connection.add_imu(&ImuRecord {
                header: SampleHeader {
                    timestamp_us: t_capture,
                    velocity: state.velocity,
                    position: state.angle,
                },
                accel: [x_accel, y_accel, scale_accel(sample.accel[2])],
                gyro: [
                    scale_gyro(sample.gyro[0]),
                    scale_gyro(sample.gyro[1]),
                    omega,
                ],
            });
        }

        if self.detector.observe(state.angle) {
            self.ctx.rotation.complete_at(t_capture);
            self.ctx.mark_activity(t_capture);
            self.ctx.low_speed_notify.notify(ROTATION_BIT);
        }
    }
}

/// IMU ingest task body. The FIFO watermark ISR stores `micros()` into
/// the signal; this loop drains the FIFO and runs the pipeline for every
/// entry.
///
/// Wrap it on hardware as:
///
/// ```ignore
/// #[embassy_executor::task]
/// async fn imu_task(ctx: &'static CoreContext, imu: Icm42670<...>) {
///     run_imu_task(ctx, imu, &IMU_SAMPLE_READY).await;
/// }
/// ```
pub async fn run_imu_task<I: ImuSensor>(
    ctx: &CoreContext,
    mut imu: I,
    sample_ready: &SampleReadySignal,
) {
    for attempt in 0..5u8 {
        match imu.start_sampling().await {
            Ok(()) => break,
            Err(e) => {
                error!("imu start attempt {} failed: {:?}", attempt, Debug2Format(&e));
                Timer::after_millis(1000).await;
            }
        }
    }

    let mut pipeline = ImuPipeline::new(ctx);
    let mut buf = [ImuFifoSample::default(); FIFO_BURST];

    loop {
        let t_capture = sample_ready.wait().await;
        pipeline.refresh_config();
        match imu.read_fifo(&mut buf).await {
            Ok(n) => {
                for sample in &buf[..n] {
                    pipeline.process_sample(sample, t_capture);
                }
            }
            Err(e) => {
                // Overrun or bus trouble: the backlog is already gone,
                // resume with the next watermark.
                warn!("imu fifo drain failed: {:?}", Debug2Format(&e));
            }
        }
    }
}
