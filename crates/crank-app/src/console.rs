//! Serial operator console.
//!
//! Single-character commands on the debug UART, kept deliberately dumb
//! so it works from any terminal program. Configuration updates arrive
//! as one JSON line (the same payload the pub/sub config topic takes)
//! and must complete within the input timeout.

use embassy_time::{with_timeout, Instant};
use embedded_io_async::{Read, Write};

use crank_icd::{Command, Config, CONFIG_JSON_MAX};

use crate::events::Event;
use crate::CoreContext;

const HELP_TEXT: &str = "Usage:\r\n\
  - 'g' prints the current config.\r\n\
  - 's' sets a new config (paste one JSON line).\r\n\
  - 'c' performs strain zero-offset compensation.\r\n\
  - 'f' resets the stored config to defaults.\r\n\
  - 'r' reboots.\r\n\
  - 'p' reboots into the bootloader.\r\n\
  - 'h' prints this help message.\r\n";

/// Console task body.
pub async fn run_console<Io: Read + Write>(ctx: &CoreContext, mut io: Io) {
    info!("console ready");
    let mut byte = [0u8; 1];
    loop {
        match io.read(&mut byte).await {
            // A closed stream would spin us otherwise.
            Ok(0) => return,
            Ok(_) => {}
            Err(_) => return,
        }

        match byte[0] {
            b'g' | b'G' => {
                if let Ok(json) = ctx.config.snapshot().to_json() {
                    let _ = io.write_all(json.as_bytes()).await;
                    let _ = io.write_all(b"\r\n").await;
                }
            }
            b's' | b'S' => {
                let _ = io.write_all(b"Paste the new config here:\r\n").await;
                match read_config_line(ctx, &mut io).await {
                    Some(Ok(config)) => {
                        send_event(ctx, Command::SetConfiguration(config).into())
                            .await;
                        let _ = io.write_all(b"Config accepted.\r\n").await;
                    }
                    Some(Err(())) => {
                        let _ = io.write_all(b"Config rejected.\r\n").await;
                    }
                    None => {
                        let _ = io.write_all(b"Timed out.\r\n").await;
                    }
                }
            }
            b'c' | b'C' => {
                send_event(ctx, Command::PerformZeroOffset.into()).await;
                let _ = io.write_all(b"Offset compensation started.\r\n").await;
            }
            b'f' | b'F' => {
                send_event(ctx, Event::FactoryReset).await;
                let _ = io.write_all(b"Config reset to defaults.\r\n").await;
            }
            b'r' | b'R' => {
                send_event(ctx, Event::Reboot { bootloader: false }).await;
            }
            b'p' | b'P' => {
                send_event(ctx, Event::Reboot { bootloader: true }).await;
            }
            b'\r' | b'\n' | b' ' => {}
            b'h' | b'H' | b'?' => {
                let _ = io.write_all(HELP_TEXT.as_bytes()).await;
            }
            other => {
                warn!("unrecognised console instruction {}", other);
                let _ = io.write_all(HELP_TEXT.as_bytes()).await;
            }
        }
    }
}

async fn send_event(ctx: &CoreContext, event: Event) {
    ctx.events.send(event).await;
}

/// Reads one newline-terminated JSON payload within the configured
/// input timeout. `None` on timeout, `Some(Err)` on malformed or
/// invalid configuration.
async fn read_config_line<Io: Read + Write>(
    ctx: &CoreContext,
    io: &mut Io,
) -> Option<Result<Config, ()>> {
    let deadline = Instant::now() + ctx.timings.console_input_timeout;
    let mut line = heapless::Vec::<u8, CONFIG_JSON_MAX>::new();
    let mut byte = [0u8; 1];

    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match with_timeout(remaining, io.read(&mut byte)).await {
            Err(_) => return None,
            Ok(Ok(0)) | Ok(Err(_)) => return Some(Err(())),
            Ok(Ok(_)) => {}
        }
        if byte[0] == b'\n' || byte[0] == b'\r' {
            if line.is_empty() {
                continue;
            }
            break;
        }
        if line.push(byte[0]).is_err() {
            return Some(Err(()));
        }
    }

    Some(Config::from_json(&line).map_err(|e| {
        warn!("console config rejected: {:?}", e);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    use crate::devices::mock::MockSerial;

    fn context() -> CoreContext {
        CoreContext::new(Config::default())
    }

    fn take_event(ctx: &CoreContext) -> Event {
        ctx.events.try_receive().expect("no event queued")
    }

    #[test]
    fn get_config_prints_json() {
        let ctx = context();
        let mut serial = MockSerial::new(b"g");
        block_on(run_console(&ctx, &mut serial));
        let written = serial.written();
        assert!(written.starts_with(b"{\"connection\":0"));
    }

    #[test]
    fn set_config_parses_a_json_line() {
        let ctx = context();
        let mut config = Config::default();
        config.imu_decimation = 3;
        let mut input = heapless::Vec::<u8, 1024>::new();
        input.extend_from_slice(b"s").unwrap();
        input.extend_from_slice(config.to_json().unwrap().as_bytes()).unwrap();
        input.extend_from_slice(b"\n").unwrap();

        let mut serial = MockSerial::new(&input);
        block_on(run_console(&ctx, &mut serial));

        match take_event(&ctx) {
            Event::Command(Command::SetConfiguration(received)) => {
                assert_eq!(received.imu_decimation, 3)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn malformed_config_line_is_rejected() {
        let ctx = context();
        let mut serial = MockSerial::new(b"s{\"connection\":\n");
        block_on(run_console(&ctx, &mut serial));
        assert!(ctx.events.try_receive().is_err());
        assert!(serial.written().ends_with(b"Config rejected.\r\n"));
    }

    #[test]
    fn calibrate_reset_and_reboot_commands_raise_events() {
        let ctx = context();
        let mut serial = MockSerial::new(b"cfrp");
        block_on(run_console(&ctx, &mut serial));

        assert_eq!(take_event(&ctx), Event::Command(Command::PerformZeroOffset));
        assert_eq!(take_event(&ctx), Event::FactoryReset);
        assert_eq!(take_event(&ctx), Event::Reboot { bootloader: false });
        assert_eq!(take_event(&ctx), Event::Reboot { bootloader: true });
    }

    #[test]
    fn unknown_command_prints_help() {
        let ctx = context();
        let mut serial = MockSerial::new(b"x");
        block_on(run_console(&ctx, &mut serial));
        let written = serial.written();
        assert!(core::str::from_utf8(written).unwrap().contains("Usage:"));
    }
}
