//! Taipan. Naga-family model, big-endian fields one byte further in.

use super::naga::{exchange, SensorMouse, SensorProtocol, SensorState, CMD_LEN, LED_LOGO, LED_SCROLL};
use crate::comm::{retry, RetryPolicy};
use crate::error::Result;
use crate::model::{Frequency, MouseType};
use crate::timing::EventSpacing;
use crate::usb::UsbContext;
use crate::util::{be16, put_be16, xor8_checksum};
use tracing::error;

const FW_RETRY: RetryPolicy = RetryPolicy::new(5, 100).on_any_error();
/// Reported when the firmware never answers the version query.
const FW_VERSION_UNKNOWN: u16 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaipanCommand {
    pub command: u16,
    pub request: u16,
    pub value0: u16,
    pub value1: u16,
}

impl TaipanCommand {
    fn new(command: u16, request: u16, value0: u16, value1: u16) -> Self {
        Self {
            command,
            request,
            value0,
            value1,
        }
    }

    pub fn encode(&self) -> [u8; CMD_LEN] {
        let mut buf = [0u8; CMD_LEN];
        put_be16(&mut buf, 5, self.command);
        put_be16(&mut buf, 7, self.request);
        put_be16(&mut buf, 9, self.value0);
        put_be16(&mut buf, 11, self.value1);
        buf[88] = xor8_checksum(&buf[2..88]);
        buf
    }

    pub fn decode(buf: &[u8; CMD_LEN]) -> (u8, Self) {
        (
            buf[0],
            Self::new(be16(buf, 5), be16(buf, 7), be16(buf, 9), be16(buf, 11)),
        )
    }
}

pub struct TaipanProtocol {
    spacing: EventSpacing,
}

impl TaipanProtocol {
    fn send(&mut self, ctx: &mut UsbContext, cmd: TaipanCommand) -> Result<TaipanCommand> {
        let reply = exchange(ctx, &mut self.spacing, &cmd.encode(), 1)?;
        let (status, reply) = TaipanCommand::decode(&reply);
        if status > 2 {
            error!(
                command = format_args!("{:04X}", cmd.command),
                request = format_args!("{:04X}", cmd.request),
                status = format_args!("{:02X}", status),
                "Taipan command failed"
            );
        }
        Ok(reply)
    }
}

impl SensorProtocol for TaipanProtocol {
    fn name(&self) -> &'static str {
        "Taipan"
    }

    fn mouse_type(&self) -> MouseType {
        MouseType::Taipan
    }

    fn max_resolution(&self) -> u32 {
        8200
    }

    fn commit_on_init(&self) -> bool {
        true
    }

    fn read_fw_version(&mut self, ctx: &mut UsbContext) -> Result<u16> {
        let clock = ctx.shared_clock();
        let ver = retry(clock.as_ref(), FW_RETRY, "Taipan firmware version", |_| {
            let ver = self.send(ctx, TaipanCommand::new(0, 0x8300, 0, 0))?.value0;
            Ok((ver & 0xFF00 != 0).then_some(ver))
        });
        match ver {
            Ok(Some(v)) => Ok(v),
            _ => {
                error!("failed to read Taipan firmware version");
                Ok(FW_VERSION_UNKNOWN)
            }
        }
    }

    fn commit(&mut self, ctx: &mut UsbContext, s: &SensorState) -> Result<()> {
        let (x, y) = s.resolutions()?;
        self.send(ctx, TaipanCommand::new(0x0704, 0x0500, x as u16, y as u16))?;
        self.send(
            ctx,
            TaipanCommand::new(0x0303, 0x0001, 0x0100 | s.led(LED_SCROLL) as u16, 0),
        )?;
        self.send(
            ctx,
            TaipanCommand::new(0x0303, 0x0001, 0x0400 | s.led(LED_LOGO) as u16, 0),
        )?;
        let freq: u16 = match s.freq {
            Frequency::Hz125 => 0x0008,
            Frequency::Hz500 => 0x0002,
            Frequency::Hz1000 => 0x0001,
        };
        self.send(ctx, TaipanCommand::new(0x0100, 0x0500 | freq, 0, 0))?;
        Ok(())
    }
}

pub type Taipan = SensorMouse<TaipanProtocol>;

impl SensorMouse<TaipanProtocol> {
    pub fn new() -> Self {
        Self::with_protocol(TaipanProtocol {
            spacing: EventSpacing::new(0),
        })
    }
}

impl Default for SensorMouse<TaipanProtocol> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MouseDriver;
    use crate::usb::mock::{context_for, MockDevice};

    fn device(fw: u16) -> MockDevice {
        MockDevice::new(4, 2, 0x1532, 0x0034).with_responder(move |xfer, writes| {
            let mut reply = writes.last().map(|w| w.data.clone()).unwrap_or_default();
            reply.resize(xfer.length, 0);
            reply[0] = 1;
            reply[9..11].copy_from_slice(&fw.to_be_bytes());
            reply
        })
    }

    fn decoded(dev: &MockDevice) -> Vec<TaipanCommand> {
        dev.writes()
            .iter()
            .map(|w| {
                let buf: [u8; CMD_LEN] = w.data.clone().try_into().unwrap();
                TaipanCommand::decode(&buf).1
            })
            .collect()
    }

    #[test]
    fn packet_layout_is_big_endian_with_checksum() {
        let buf = TaipanCommand::new(0x0704, 0x0500, 1000, 1800).encode();
        assert_eq!(&buf[5..13], &[0x07, 0x04, 0x05, 0x00, 0x03, 0xE8, 0x07, 0x08]);
        assert_eq!(buf[88], xor8_checksum(&buf[2..88]));
    }

    #[test]
    fn init_commits_defaults() {
        let dev = device(0x0101);
        let (_bus, mut ctx) = context_for(&dev);
        let mut t = Taipan::new();
        t.init(&mut ctx).unwrap();
        assert_eq!(t.fw_version(), Some(0x0101));
        assert_eq!(t.idstr(), "Mouse:Taipan:USB-004-002:1532-0034-0");
        assert_eq!(t.supported_dpimappings().len(), 82);
        let cmds = decoded(&dev);
        assert_eq!(cmds[0].request, 0x8300);
        assert_eq!(cmds[1], TaipanCommand::new(0x0704, 0x0500, 1000, 1000));
        assert_eq!(cmds[2], TaipanCommand::new(0x0303, 0x0001, 0x0101, 0));
        assert_eq!(cmds[3], TaipanCommand::new(0x0303, 0x0001, 0x0401, 0));
        assert_eq!(cmds[4], TaipanCommand::new(0x0100, 0x0501, 0, 0));
    }

    #[test]
    fn unanswered_version_query_falls_back() {
        let dev = device(0);
        let (_bus, mut ctx) = context_for(&dev);
        let mut t = Taipan::new();
        t.init(&mut ctx).unwrap();
        assert_eq!(t.fw_version(), Some(FW_VERSION_UNKNOWN));
    }

    #[test]
    fn version_query_is_retried_after_io_error() {
        let dev = device(0x0101);
        dev.fail_next_writes(1);
        let (_bus, mut ctx) = context_for(&dev);
        let mut t = Taipan::new();
        t.init(&mut ctx).unwrap();
        assert_eq!(t.fw_version(), Some(0x0101));
    }

    #[test]
    fn frequency_is_folded_into_request() {
        let dev = device(0x0101);
        let (_bus, mut ctx) = context_for(&dev);
        let mut t = Taipan::new();
        t.init(&mut ctx).unwrap();
        ctx.claim().unwrap();
        dev.clear_log();
        t.set_freq(&mut ctx, 0, Frequency::Hz125).unwrap();
        assert_eq!(decoded(&dev)[3].request, 0x0508);
        t.set_dpimapping(&mut ctx, 0, Some(0), 81).unwrap();
        assert_eq!(decoded(&dev)[4], TaipanCommand::new(0x0704, 0x0500, 8200, 1000));
    }
}
