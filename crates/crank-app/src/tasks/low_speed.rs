//! Rotation rendezvous: waits for both sides to report their average
//! power for a completed rotation, then publishes the per-rotation
//! summary record.

use crank_icd::{LowSpeedRecord, Side};

use crate::CoreContext;

/// Notification bit raised by the IMU task when a rotation completes.
pub const ROTATION_BIT: u32 = 1 << 0;

/// Notification bit raised by a side once its average power for the
/// rotation is published.
pub const fn side_bit(side: Side) -> u32 {
    2 << side.index()
}

const BOTH_SIDES: u32 = side_bit(Side::Left) | side_bit(Side::Right);

/// Accumulates notification bits until both side bits are present.
/// Returns false if any single wait runs into the timeout. Bits are
/// deliberately not cleared while accumulating; two notifications are
/// expected per rotation and they arrive in either order.
async fn wait_rendezvous(ctx: &CoreContext) -> bool {
    loop {
        if ctx.low_speed_notify.value() & BOTH_SIDES == BOTH_SIDES {
            return true;
        }
        if !ctx
            .low_speed_notify
            .wait_signal(ctx.timings.rendezvous_timeout)
            .await
        {
            return false;
        }
    }
}

/// Builds the summary record for the current rotation state.
///
/// On a completed rendezvous the side averages are fresh; otherwise the
/// last known rotation metadata is reported with zero power and a level
/// balance, so consumers still see a heartbeat while coasting.
fn compose_record(ctx: &CoreContext, rendezvous: bool) -> LowSpeedRecord {
    let meta = ctx.rotation.snapshot();
    let mut record = LowSpeedRecord {
        rotation_count: meta.count,
        last_rotation_duration_us: meta.last_duration_us,
        timestamp_us: meta.last_time_us,
        power: 0.0,
        balance: 50.0,
    };

    if rendezvous {
        let left = ctx.side(Side::Left).average_power.get();
        let right = ctx.side(Side::Right).average_power.get();
        let total = left + right;
        record.power = total;
        record.balance = if total > 0.0 { 100.0 * right / total } else { 50.0 };
    }

    record
}

/// Low-speed task body.
pub async fn run_low_speed_task(ctx: &CoreContext) {
    info!("low speed task started");
    loop {
        let rendezvous = wait_rendezvous(ctx).await;
        let record = compose_record(ctx, rendezvous);
        ctx.connection.add_low_speed(&record);
        ctx.low_speed_notify.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crank_icd::Config;
    use embassy_futures::block_on;
    use embassy_time::Duration;

    use crate::Timings;

    fn context() -> CoreContext {
        let timings = Timings {
            rendezvous_timeout: Duration::from_millis(5),
            ..Timings::default()
        };
        let ctx = CoreContext::with_timings(Config::default(), timings);
        ctx.connection.set_accept_data(true);
        ctx
    }

    #[test]
    fn rendezvous_needs_both_side_bits() {
        let ctx = context();
        ctx.low_speed_notify.notify(side_bit(Side::Left));
        assert!(!block_on(wait_rendezvous(&ctx)));

        ctx.low_speed_notify.notify(side_bit(Side::Right));
        assert!(block_on(wait_rendezvous(&ctx)));
    }

    #[test]
    fn rotation_bit_alone_is_not_a_rendezvous() {
        let ctx = context();
        ctx.low_speed_notify.notify(ROTATION_BIT);
        assert!(!block_on(wait_rendezvous(&ctx)));
    }

    #[test]
    fn completed_rendezvous_sums_power_and_attributes_balance() {
        let ctx = context();
        ctx.rotation.complete_at(2_000_000);
        ctx.side(Side::Left).average_power.set(90.0);
        ctx.side(Side::Right).average_power.set(110.0);

        let record = compose_record(&ctx, true);
        assert_eq!(record.power, 200.0);
        assert_eq!(record.balance, 55.0);
        assert_eq!(record.rotation_count, 1);
        assert_eq!(record.timestamp_us, 2_000_000);
    }

    #[test]
    fn timeout_reports_zero_power_level_balance() {
        let ctx = context();
        ctx.rotation.complete_at(1_000_000);
        ctx.side(Side::Left).average_power.set(150.0);

        let record = compose_record(&ctx, false);
        assert_eq!(record.power, 0.0);
        assert_eq!(record.balance, 50.0);
        // Metadata still reflects the last known rotation.
        assert_eq!(record.rotation_count, 1);
    }

    #[test]
    fn zero_total_power_reads_as_balanced() {
        let ctx = context();
        ctx.side(Side::Left).average_power.set(0.0);
        ctx.side(Side::Right).average_power.set(0.0);
        let record = compose_record(&ctx, true);
        assert_eq!(record.balance, 50.0);
    }

    #[test]
    fn rotation_counts_in_records_never_decrease() {
        let ctx = context();
        let mut previous = 0;
        for turn in 1..=5u32 {
            ctx.rotation.complete_at(turn * 900_000);
            let record = compose_record(&ctx, turn % 2 == 0);
            assert!(record.rotation_count >= previous);
            previous = record.rotation_count;
        }
    }
}
