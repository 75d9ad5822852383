use embassy_time::{Instant, Timer};

use crank_icd::{
    write_about_json, DeviceInfo, Side, HIGH_SPEED_BATCH, IMU_RECORD_SIZE,
    SIDE_RECORD_SIZE,
};

use super::transport::{HighSpeedStream, Transport};
use super::{CONN_DISABLE, CONN_ENABLE};
use crate::events::Event;
use crate::fmt::Debug2Format;
use crate::CoreContext;

const SIDE_BATCH_BYTES: usize = HIGH_SPEED_BATCH * SIDE_RECORD_SIZE;
const IMU_BATCH_BYTES: usize = HIGH_SPEED_BATCH * IMU_RECORD_SIZE;

/// Connection lifecycle. `Connect` retries until the link is up or a
/// disable arrives; `Active` publishes until the link drops or a disable
/// arrives; `Shutdown` stops accepting data before releasing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ConnState {
    Disabled,
    Connect,
    Active,
    Shutdown,
}

/// Connection task body: drives the transport through the lifecycle and
/// drains every producer queue while active.
pub async fn run_connection_task<T: Transport>(
    ctx: &CoreContext,
    mut transport: T,
    info: &DeviceInfo,
) {
    let conn = &ctx.connection;
    let mut state = ConnState::Disabled;

    loop {
        info!("connection state: {:?}", state);
        state = match state {
            ConnState::Disabled => {
                conn.set_accept_data(false);
                conn.notify.wait_for(CONN_ENABLE).await;
                ConnState::Connect
            }
            ConnState::Connect => {
                conn.set_accept_data(false);
                if conn.notify.take(CONN_DISABLE) != 0 {
                    ConnState::Shutdown
                } else {
                    match transport.connect().await {
                        Ok(()) => ConnState::Active,
                        Err(e) => {
                            warn!("transport connect failed: {:?}", Debug2Format(&e));
                            Timer::after(ctx.timings.reconnect_delay).await;
                            ConnState::Connect
                        }
                    }
                }
            }
            ConnState::Active => run_active(ctx, &mut transport, info).await,
            ConnState::Shutdown => {
                // Data must stop flowing before resources go away.
                conn.set_accept_data(false);
                transport.shutdown().await;
                ConnState::Disabled
            }
        };
    }
}

async fn run_active<T: Transport>(
    ctx: &CoreContext,
    transport: &mut T,
    info: &DeviceInfo,
) -> ConnState {
    let conn = &ctx.connection;

    let mut about = heapless::String::<1024>::new();
    let config = ctx.config.snapshot();
    if write_about_json(info, Instant::now().as_millis(), &config, &mut about)
        .is_err()
    {
        error!("about payload did not fit");
    } else if let Err(e) = transport.publish_about(about.as_str()).await {
        warn!("about publish failed: {:?}", Debug2Format(&e));
        return ConnState::Connect;
    }

    conn.set_accept_data(true);

    loop {
        // The short bounded wait doubles as the loop's pacing.
        if conn.notify.poll(CONN_DISABLE, ctx.timings.disable_poll).await {
            return ConnState::Shutdown;
        }

        if !transport.is_connected() {
            return ConnState::Connect;
        }

        while let Some(command) = transport.poll_command() {
            if ctx.events.try_send(Event::Command(command)).is_err() {
                warn!("event queue full, inbound command dropped");
            }
        }

        if let Some(record) = conn.try_take_housekeeping() {
            let mut payload = heapless::String::<192>::new();
            if record.write_json(&mut payload).is_ok() {
                if let Err(e) = transport.publish_housekeeping(payload.as_str()).await
                {
                    warn!("housekeeping publish failed: {:?}", Debug2Format(&e));
                    return ConnState::Connect;
                }
            }
        }

        if let Some(record) = conn.try_take_low_speed() {
            let mut payload = heapless::String::<128>::new();
            if record.write_json(&mut payload).is_ok() {
                if let Err(e) = transport.publish_low_speed(payload.as_str()).await {
                    warn!("low-speed publish failed: {:?}", Debug2Format(&e));
                    return ConnState::Connect;
                }
            }
        }

        for side in Side::BOTH {
            while conn.side_queue_len(side) >= HIGH_SPEED_BATCH {
                let mut batch = heapless::Vec::<u8, SIDE_BATCH_BYTES>::new();
                for _ in 0..HIGH_SPEED_BATCH {
                    let Some(record) = conn.try_take_side(side) else { break };
                    let _ = batch.extend_from_slice(&record.to_bytes());
                }
                if let Err(e) = transport
                    .publish_high_speed(HighSpeedStream::Side(side), &batch)
                    .await
                {
                    warn!("side batch publish failed: {:?}", Debug2Format(&e));
                    return ConnState::Connect;
                }
            }
        }

        while conn.imu_queue_len() >= HIGH_SPEED_BATCH {
            let mut batch = heapless::Vec::<u8, IMU_BATCH_BYTES>::new();
            for _ in 0..HIGH_SPEED_BATCH {
                let Some(record) = conn.try_take_imu() else { break };
                let _ = batch.extend_from_slice(&record.to_bytes());
            }
            if let Err(e) =
                transport.publish_high_speed(HighSpeedStream::Imu, &batch).await
            {
                warn!("imu batch publish failed: {:?}", Debug2Format(&e));
                return ConnState::Connect;
            }
        }
    }
}
