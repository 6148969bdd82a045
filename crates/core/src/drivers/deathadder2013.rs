//! DeathAdder 2013 Edition.
//!
//! Naga packet layout, but byte 88 carries a per-request footer instead of a
//! checksum. Every command is sent three times with a pause in between; the
//! firmware drops single commands now and then.

use super::naga::{exchange, NagaCommand, SensorMouse, SensorProtocol, SensorState, LED_LOGO, LED_SCROLL};
use crate::comm::{retry, RetryPolicy};
use crate::error::Result;
use crate::model::{Frequency, MouseType};
use crate::timing::EventSpacing;
use crate::usb::UsbContext;
use tracing::error;

const REPEATS: u32 = 3;
const REPEAT_DELAY_MS: u64 = 35;
const FW_RETRY: RetryPolicy = RetryPolicy::new(10, 150).on_any_error();

pub struct DeathAdder2013Protocol {
    spacing: EventSpacing,
}

impl DeathAdder2013Protocol {
    /// Send `cmd` `REPEATS` times. Returns the last reply.
    fn send(&mut self, ctx: &mut UsbContext, cmd: &NagaCommand) -> Result<[u8; super::naga::CMD_LEN]> {
        let packet = cmd.encode();
        let mut reply = packet;
        for _ in 0..REPEATS {
            reply = exchange(ctx, &mut self.spacing, &packet, 3)?;
            if reply[0] > 3 {
                error!(
                    command = format_args!("{:04X}", cmd.command),
                    request = format_args!("{:04X}", cmd.request),
                    status = format_args!("{:02X}", reply[0]),
                    "DeathAdder 2013 command failed"
                );
            }
            ctx.msleep(REPEAT_DELAY_MS);
        }
        Ok(reply)
    }
}

fn footer(mut cmd: NagaCommand, tail: u8) -> NagaCommand {
    cmd.tail = tail;
    cmd
}

impl SensorProtocol for DeathAdder2013Protocol {
    fn name(&self) -> &'static str {
        "DeathAdder 2013 Edition"
    }

    fn mouse_type(&self) -> MouseType {
        MouseType::DeathAdder
    }

    fn max_resolution(&self) -> u32 {
        5600
    }

    fn commit_on_init(&self) -> bool {
        false
    }

    /// Some units never answer the version query. That is not fatal; the
    /// version reads as zero.
    fn read_fw_version(&mut self, ctx: &mut UsbContext) -> Result<u16> {
        let clock = ctx.shared_clock();
        let query = footer(NagaCommand::new(0x0400, 0x8700), 0x83);
        let ver = retry(clock.as_ref(), FW_RETRY, "DeathAdder 2013 firmware version", |_| {
            let reply = self.send(ctx, &query)?;
            let ver = NagaCommand::fw_version_of(&reply);
            Ok((ver & 0xFF00 != 0).then_some(ver))
        });
        match ver {
            Ok(Some(v)) => Ok(v),
            Ok(None) | Err(_) => {
                error!("failed to read DeathAdder 2013 firmware version");
                Ok(0)
            }
        }
    }

    fn commit(&mut self, ctx: &mut UsbContext, s: &SensorState) -> Result<()> {
        let (x, y) = s.resolutions()?;
        let xres = ((x / 100 - 1) * 4) as u16;
        let yres = ((y / 100 - 1) * 4) as u16;
        self.send(
            ctx,
            &footer(NagaCommand::new(0x0300, 0x0104).values(xres | (yres << 8), 0), 0x06),
        )?;

        let scroll = s.led(LED_SCROLL);
        self.send(
            ctx,
            &footer(
                NagaCommand::new(0x0300, 0x0003).values(0x0101, scroll as u16),
                if scroll { 0x01 } else { 0x00 },
            ),
        )?;

        let logo = s.led(LED_LOGO);
        self.send(
            ctx,
            &footer(
                NagaCommand::new(0x0300, 0x0003).values(0x0401, logo as u16),
                if logo { 0x04 } else { 0x05 },
            ),
        )?;

        let freq = match s.freq {
            Frequency::Hz125 => 8,
            Frequency::Hz500 => 2,
            Frequency::Hz1000 => 1,
        };
        self.send(ctx, &NagaCommand::new(0x0100, 0x0500).values(freq, 0))?;
        Ok(())
    }
}

pub type DeathAdder2013 = SensorMouse<DeathAdder2013Protocol>;

impl SensorMouse<DeathAdder2013Protocol> {
    pub fn new() -> Self {
        Self::with_protocol(DeathAdder2013Protocol {
            spacing: EventSpacing::new(0),
        })
    }
}

impl Default for SensorMouse<DeathAdder2013Protocol> {
    fn default() -> Self {
        Self::new()
    }
}
