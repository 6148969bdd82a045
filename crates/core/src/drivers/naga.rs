//! Naga, and the 90-byte command family it shares with the DeathAdder 2013
//! and the Taipan.
//!
//! All three expose the same model: one profile, X and Y axes with
//! independent mappings, two on/off LEDs and a scan frequency. They differ
//! only in packet layout and commit sequence, which is what
//! [`SensorProtocol`] captures.

use crate::comm::{retry, RetryPolicy};
use crate::driver::{axis_indices, check_freq, find_mapping, MouseDriver};
use crate::error::{Error, Result};
use crate::identity::usb_idstr;
use crate::model::{resolution_steps, Axis, DpiMapping, Frequency, Led, LedState, MouseType};
use crate::timing::EventSpacing;
use crate::usb::{
    UsbContext, REQTYPE_CLASS_IFACE_IN, REQTYPE_CLASS_IFACE_OUT, REQ_CLEAR_FEATURE,
    REQ_SET_CONFIGURATION,
};
use crate::util::{be16, put_le16, xor8_checksum};
use tracing::{debug, error};

pub const CMD_LEN: usize = 90;
const CMD_VALUE: u16 = 0x300;

pub const LED_SCROLL: u32 = 0;
pub const LED_LOGO: u32 = 1;

const AXIS_X: u32 = 0;
const AXIS_Y: u32 = 1;

/// In-memory device state shared by the family.
#[derive(Debug, Clone)]
pub struct SensorState {
    pub leds: [bool; 2],
    pub freq: Frequency,
    pub mappings: Vec<DpiMapping>,
    pub axes: Vec<Axis>,
    /// Selected mapping for X and Y.
    pub cur: [u32; 2],
}

impl SensorState {
    fn new(max_res: u32) -> Self {
        let mappings: Vec<DpiMapping> = resolution_steps(100, max_res)
            .into_iter()
            .enumerate()
            .map(|(i, res)| DpiMapping::single(i as u32, res))
            .collect();
        let default = mappings
            .iter()
            .find(|m| m.res[0] == 1000)
            .map(|m| m.nr)
            .unwrap_or(0);
        Self {
            leds: [true, true],
            freq: Frequency::Hz1000,
            mappings,
            axes: vec![
                Axis::new(AXIS_X, "X", true),
                Axis::new(AXIS_Y, "Y", true),
                Axis::new(2, "Scroll", false),
            ],
            cur: [default, default],
        }
    }

    /// Resolution currently selected on X and Y.
    pub fn resolutions(&self) -> Result<(u32, u32)> {
        Ok((
            find_mapping(&self.mappings, self.cur[0])?.res[0],
            find_mapping(&self.mappings, self.cur[1])?.res[0],
        ))
    }

    pub fn led(&self, id: u32) -> bool {
        self.leds[id as usize]
    }
}

/// Per-device half of a family member.
pub trait SensorProtocol: Send {
    /// Device name used in the identity string.
    fn name(&self) -> &'static str;
    fn mouse_type(&self) -> MouseType;
    fn max_resolution(&self) -> u32;
    /// Write the defaults to the hardware during init.
    fn commit_on_init(&self) -> bool;
    fn read_fw_version(&mut self, ctx: &mut UsbContext) -> Result<u16>;
    /// Reject firmware known not to work.
    fn check_firmware(&self, _fw: u16) -> Result<()> {
        Ok(())
    }
    fn commit(&mut self, ctx: &mut UsbContext, state: &SensorState) -> Result<()>;
}

/// A family member: protocol plus shared state.
pub struct SensorMouse<P: SensorProtocol> {
    proto: P,
    state: SensorState,
    idstr: String,
    fw_version: u16,
}

impl<P: SensorProtocol> SensorMouse<P> {
    pub(crate) fn with_protocol(proto: P) -> Self {
        let state = SensorState::new(proto.max_resolution());
        Self {
            proto,
            state,
            idstr: String::new(),
            fw_version: 0,
        }
    }

    pub fn state(&self) -> &SensorState {
        &self.state
    }

    /// Apply `change`, commit, and restore the old state on failure.
    fn update<F>(&mut self, ctx: &mut UsbContext, change: F) -> Result<()>
    where
        F: FnOnce(&mut SensorState) -> Result<()>,
    {
        ctx.ensure_claimed()?;
        let old = self.state.clone();
        change(&mut self.state)?;
        if let Err(e) = self.proto.commit(ctx, &self.state) {
            self.state = old;
            return Err(e);
        }
        Ok(())
    }

    fn init_claimed(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let fw = self.proto.read_fw_version(ctx)?;
        self.proto.check_firmware(fw)?;
        self.fw_version = fw;
        if self.proto.commit_on_init() {
            self.proto.commit(ctx, &self.state).map_err(|e| {
                error!(device = self.proto.name(), "failed to commit initial settings: {}", e);
                e
            })?;
        }
        self.idstr = usb_idstr(ctx, self.proto.name(), true, None);
        Ok(())
    }
}

impl<P: SensorProtocol> MouseDriver for SensorMouse<P> {
    fn init(&mut self, ctx: &mut UsbContext) -> Result<()> {
        ctx.add_used_interface(0, 0)?;
        ctx.claim_refcount().map_err(|e| {
            error!(device = self.proto.name(), "failed to claim device: {}", e);
            e
        })?;
        let res = self.init_claimed(ctx);
        ctx.release_refcount();
        res?;
        debug!(
            idstr = %self.idstr,
            fw = format_args!("{}.{:02}", self.fw_version >> 8, self.fw_version & 0xFF),
            "{} initialized",
            self.proto.name()
        );
        Ok(())
    }

    fn mouse_type(&self) -> MouseType {
        self.proto.mouse_type()
    }

    fn idstr(&self) -> &str {
        &self.idstr
    }

    fn fw_version(&self) -> Option<u16> {
        Some(self.fw_version)
    }

    fn commit(&mut self, ctx: &mut UsbContext, force: bool) -> Result<()> {
        ctx.ensure_claimed()?;
        if force {
            self.proto.commit(ctx, &self.state)?;
        }
        Ok(())
    }

    fn supported_axes(&self) -> Vec<Axis> {
        self.state.axes.clone()
    }

    fn supported_resolutions(&self) -> Vec<u32> {
        resolution_steps(100, self.proto.max_resolution())
    }

    fn supported_freqs(&self) -> Vec<Frequency> {
        Frequency::ALL.to_vec()
    }

    fn supported_dpimappings(&self) -> Vec<DpiMapping> {
        self.state.mappings.clone()
    }

    fn global_leds(&self) -> Vec<Led> {
        vec![
            Led::simple(LED_SCROLL, "Scrollwheel", self.state.led(LED_SCROLL)),
            Led::simple(LED_LOGO, "GlowingLogo", self.state.led(LED_LOGO)),
        ]
    }

    fn set_led_state(
        &mut self,
        ctx: &mut UsbContext,
        _profile: Option<u32>,
        led: u32,
        state: LedState,
    ) -> Result<()> {
        if led > LED_LOGO {
            return Err(Error::InvalidArgument(format!("no LED {led}")));
        }
        if state == LedState::Unknown {
            return Err(Error::InvalidArgument("LED state must be on or off".into()));
        }
        self.update(ctx, |s| {
            s.leds[led as usize] = state.is_on();
            Ok(())
        })
    }

    fn freq(&self, _profile: u32) -> Option<Frequency> {
        Some(self.state.freq)
    }

    fn set_freq(&mut self, ctx: &mut UsbContext, _profile: u32, freq: Frequency) -> Result<()> {
        check_freq(freq, Frequency::ALL)?;
        self.update(ctx, |s| {
            s.freq = freq;
            Ok(())
        })
    }

    fn dpimapping(&self, _profile: u32, axis: Option<u32>) -> Option<DpiMapping> {
        let slot = match axis.unwrap_or(AXIS_X) {
            AXIS_X => 0,
            AXIS_Y => 1,
            _ => return None,
        };
        find_mapping(&self.state.mappings, self.state.cur[slot]).ok().cloned()
    }

    fn set_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        _profile: u32,
        axis: Option<u32>,
        nr: u32,
    ) -> Result<()> {
        find_mapping(&self.state.mappings, nr)?;
        let slots = axis_indices(&self.state.axes[..2], axis)?;
        self.update(ctx, |s| {
            for i in slots {
                s.cur[i] = nr;
            }
            Ok(())
        })
    }
}

/// Naga command, little-endian fields at offset 4.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NagaCommand {
    pub status: u8,
    pub command: u16,
    pub request: u16,
    pub value0: u16,
    pub value1: u16,
    /// Byte 88. A checksum on the Naga, a request footer on the DeathAdder 2013.
    pub tail: u8,
}

impl NagaCommand {
    pub fn new(command: u16, request: u16) -> Self {
        Self {
            command,
            request,
            ..Self::default()
        }
    }

    pub fn values(mut self, value0: u16, value1: u16) -> Self {
        self.value0 = value0;
        self.value1 = value1;
        self
    }

    pub fn encode(&self) -> [u8; CMD_LEN] {
        let mut buf = [0u8; CMD_LEN];
        buf[0] = self.status;
        put_le16(&mut buf, 4, self.command);
        put_le16(&mut buf, 6, self.request);
        put_le16(&mut buf, 8, self.value0);
        put_le16(&mut buf, 10, self.value1);
        buf[88] = self.tail;
        buf
    }

    /// Checksummed encoding: xor8 of bytes 2..88 in byte 88.
    pub fn encode_checksummed(&self) -> [u8; CMD_LEN] {
        let mut buf = self.encode();
        buf[88] = xor8_checksum(&buf[2..88]);
        buf
    }

    /// The firmware version is stored big-endian in the value0 slot.
    pub fn fw_version_of(reply: &[u8; CMD_LEN]) -> u16 {
        be16(reply, 8)
    }
}

/// Write a command, read the reply back. Returns the reply.
pub(crate) fn exchange(
    ctx: &mut UsbContext,
    spacing: &mut EventSpacing,
    packet: &[u8; CMD_LEN],
    read_tries: u32,
) -> Result<[u8; CMD_LEN]> {
    spacing.enter(ctx.clock());
    let res = ctx.control_write(REQTYPE_CLASS_IFACE_OUT, REQ_SET_CONFIGURATION, CMD_VALUE, 0, packet);
    spacing.leave(ctx.clock());
    res?;

    let mut reply = [0u8; CMD_LEN];
    let mut last = Ok(());
    for _ in 0..read_tries.max(1) {
        spacing.enter(ctx.clock());
        last = ctx.control_read(REQTYPE_CLASS_IFACE_IN, REQ_CLEAR_FEATURE, CMD_VALUE, 0, &mut reply);
        spacing.leave(ctx.clock());
        if last.is_ok() {
            break;
        }
    }
    last?;
    Ok(reply)
}

const NAGA_FW_RETRY: RetryPolicy = RetryPolicy::new(5, 250).on_any_error();

pub struct NagaProtocol {
    product_id: u16,
    spacing: EventSpacing,
}

impl NagaProtocol {
    fn send(&mut self, ctx: &mut UsbContext, cmd: &NagaCommand) -> Result<[u8; CMD_LEN]> {
        let reply = exchange(ctx, &mut self.spacing, &cmd.encode_checksummed(), 3)?;
        if reply[0] > 2 {
            error!(
                command = format_args!("{:04X}", cmd.command),
                request = format_args!("{:04X}", cmd.request),
                status = format_args!("{:02X}", reply[0]),
                "Naga command failed"
            );
        }
        Ok(reply)
    }
}

fn naga_res_byte(res: u32) -> u16 {
    ((res / 100 - 1) * 4) as u16
}

fn naga_freq_code(freq: Frequency) -> u16 {
    match freq {
        Frequency::Hz125 => 8,
        Frequency::Hz500 => 2,
        Frequency::Hz1000 => 1,
    }
}

impl SensorProtocol for NagaProtocol {
    fn name(&self) -> &'static str {
        "Naga"
    }

    fn mouse_type(&self) -> MouseType {
        MouseType::Naga
    }

    fn max_resolution(&self) -> u32 {
        5600
    }

    fn commit_on_init(&self) -> bool {
        true
    }

    fn read_fw_version(&mut self, ctx: &mut UsbContext) -> Result<u16> {
        let clock = ctx.shared_clock();
        let ver = retry(clock.as_ref(), NAGA_FW_RETRY, "Naga firmware version", |_| {
            let reply = self.send(ctx, &NagaCommand::new(0x0200, 0x8100))?;
            let ver = NagaCommand::fw_version_of(&reply);
            Ok((ver & 0xFF00 != 0).then_some(ver))
        })?;
        ver.ok_or_else(|| {
            error!("failed to read Naga firmware version");
            Error::DeviceNotFound("Naga did not report a firmware version".into())
        })
    }

    fn check_firmware(&self, fw: u16) -> Result<()> {
        if self.product_id == 0x001F && fw < 0x0104 {
            error!(
                fw = format_args!("{}.{:02}", fw >> 8, fw & 0xFF),
                "this Naga firmware has known bugs, upgrade to 1.04 or later"
            );
            return Err(Error::DeviceNotFound(format!(
                "Naga firmware {}.{:02} is too old",
                fw >> 8,
                fw & 0xFF
            )));
        }
        Ok(())
    }

    fn commit(&mut self, ctx: &mut UsbContext, s: &SensorState) -> Result<()> {
        let (x, y) = s.resolutions()?;
        self.send(
            ctx,
            &NagaCommand::new(0x0300, 0x0104).values(naga_res_byte(x) | (naga_res_byte(y) << 8), 0),
        )?;
        self.send(
            ctx,
            &NagaCommand::new(0x0300, 0x0003).values(0x0101, s.led(LED_SCROLL) as u16),
        )?;
        self.send(
            ctx,
            &NagaCommand::new(0x0300, 0x0003).values(0x0401, s.led(LED_LOGO) as u16),
        )?;
        self.send(
            ctx,
            &NagaCommand::new(0x0100, 0x0500).values(naga_freq_code(s.freq), 0),
        )?;
        Ok(())
    }
}

pub type Naga = SensorMouse<NagaProtocol>;

impl SensorMouse<NagaProtocol> {
    pub fn new(product_id: u16) -> Self {
        Self::with_protocol(NagaProtocol {
            product_id,
            spacing: EventSpacing::new(25),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::usb::mock::ControlTransfer;

    /// Responder that echoes the last written command with `status` and
    /// `fw` in the value0 slot.
    pub fn echo_with_status(
        status: u8,
        fw: u16,
    ) -> impl FnMut(&ControlTransfer, &[ControlTransfer]) -> Vec<u8> + Send + 'static {
        move |xfer, writes| {
            let mut reply = writes
                .last()
                .map(|w| w.data.clone())
                .unwrap_or_else(|| vec![0; xfer.length]);
            reply.resize(xfer.length, 0);
            reply[0] = status;
            reply[8..10].copy_from_slice(&fw.to_be_bytes());
            reply
        }
    }

    /// Decoded (command, request, value0, value1) of each write.
    pub fn naga_writes(writes: &[ControlTransfer]) -> Vec<(u16, u16, u16, u16)> {
        writes
            .iter()
            .map(|w| {
                let d = &w.data;
                (
                    u16::from_le_bytes([d[4], d[5]]),
                    u16::from_le_bytes([d[6], d[7]]),
                    u16::from_le_bytes([d[8], d[9]]),
                    u16::from_le_bytes([d[10], d[11]]),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::usb::mock::{context_for, MockDevice};

    fn naga(pid: u16, fw: u16) -> (MockDevice, UsbContext, Naga) {
        let dev = MockDevice::new(2, 9, 0x1532, pid).with_responder(echo_with_status(2, fw));
        let (_bus, ctx) = context_for(&dev);
        (dev, ctx, Naga::new(pid))
    }

    #[test]
    fn command_checksum_covers_bytes_2_to_88() {
        let buf = NagaCommand::new(0x0300, 0x0104).values(0x2424, 0).encode_checksummed();
        assert_eq!(buf.len(), CMD_LEN);
        assert_eq!(xor8_checksum(&buf[2..89]), 0);
        assert_eq!(&buf[4..8], &[0x00, 0x03, 0x04, 0x01]);
    }

    #[test]
    fn init_commits_defaults() {
        let (dev, mut ctx, mut n) = naga(0x0040, 0x0105);
        n.init(&mut ctx).unwrap();
        assert_eq!(n.fw_version(), Some(0x0105));
        assert_eq!(n.idstr(), "Mouse:Naga:USB-002-009:1532-0040-0");
        let w = naga_writes(&dev.writes());
        // firmware query, then resolution, two LEDs, frequency
        assert_eq!(w[0].0, 0x0200);
        assert_eq!(w[1], (0x0300, 0x0104, 0x2424, 0));
        assert_eq!(w[2], (0x0300, 0x0003, 0x0101, 1));
        assert_eq!(w[3], (0x0300, 0x0003, 0x0401, 1));
        assert_eq!(w[4], (0x0100, 0x0500, 1, 0));
        assert_eq!(n.supported_dpimappings().len(), 56);
    }

    #[test]
    fn firmware_read_retries_then_fails() {
        let (_dev, mut ctx, mut n) = naga(0x0040, 0x0000);
        let err = n.init(&mut ctx).unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
        assert!(!ctx.is_claimed());
    }

    #[test]
    fn firmware_read_survives_io_errors_after_enumeration() {
        let (dev, mut ctx, mut n) = naga(0x0040, 0x0105);
        dev.fail_next_writes(2);
        n.init(&mut ctx).unwrap();
        assert_eq!(n.fw_version(), Some(0x0105));
    }

    #[test]
    fn old_firmware_on_001f_is_rejected() {
        let (_dev, mut ctx, mut n) = naga(0x001F, 0x0103);
        assert!(n.init(&mut ctx).is_err());
        let (_dev, mut ctx, mut n) = naga(0x001F, 0x0104);
        assert!(n.init(&mut ctx).is_ok());
    }

    #[test]
    fn independent_axes() {
        let (dev, mut ctx, mut n) = naga(0x0040, 0x0105);
        n.init(&mut ctx).unwrap();
        ctx.claim().unwrap();
        dev.clear_log();
        // 1800 DPI is mapping 17
        n.set_dpimapping(&mut ctx, 0, Some(AXIS_Y), 17).unwrap();
        assert_eq!(n.dpimapping(0, Some(AXIS_X)).unwrap().res[0], 1000);
        assert_eq!(n.dpimapping(0, Some(AXIS_Y)).unwrap().res[0], 1800);
        let w = naga_writes(&dev.writes());
        assert_eq!(w[0].2, 0x24 | (0x44 << 8));
        assert!(n.set_dpimapping(&mut ctx, 0, Some(2), 17).is_err());
    }

    #[test]
    fn failed_commit_rolls_back() {
        let (dev, mut ctx, mut n) = naga(0x0040, 0x0105);
        n.init(&mut ctx).unwrap();
        ctx.claim().unwrap();
        dev.set_fail_writes(true);
        assert!(n.set_freq(&mut ctx, 0, Frequency::Hz125).is_err());
        assert_eq!(n.freq(0), Some(Frequency::Hz1000));
        assert!(n.set_led_state(&mut ctx, None, LED_LOGO, LedState::Off).is_err());
        assert!(n.global_leds()[1].state.is_on());
    }

    #[test]
    fn packets_are_spaced() {
        let (_dev, mut ctx, mut n) = naga(0x0040, 0x0105);
        n.init(&mut ctx).unwrap();
        // 5 exchanges of write+read, every transfer after the first waits 25 ms
        assert_eq!(ctx.clock().now().as_millis(), 9 * 25);
    }
}
