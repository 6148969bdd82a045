//! Chroma-generation devices: DeathAdder Chroma, DeathAdder 3500,
//! Mamba Tournament Edition and Diamondback Chroma.
//!
//! One 90-byte command is written and the same buffer is read back with the
//! device's answer in place:
//!
//! ```text
//! [0] status  [1] magic 0xFF  [5] size  [6..8] request (BE)
//! [8..88] arguments  [88] checksum over size, request and `size` args
//! ```
//!
//! The firmware keeps no settings of its own; everything is pushed at init.

use super::naga::{exchange, CMD_LEN};
use crate::driver::{axis_indices, check_resolution, find_mapping, MouseDriver};
use crate::error::{Error, Result};
use crate::identity::usb_idstr;
use crate::model::{
    resolution_steps, Axis, Dimension, DpiMapping, Frequency, Led, LedMode, LedState, MouseType,
    RgbColor,
};
use crate::timing::EventSpacing;
use crate::usb::UsbContext;
use crate::util::{be16, put_be16, xor8_checksum};
use tracing::{debug, error};

const MAGIC: u8 = 0xFF;
const STATUS_SUCCESS: u8 = 0x02;
const PACKET_SPACING_MS: u64 = 35;
const ARGS_OFFSET: usize = 8;
const ARGS_LEN: usize = 80;
const SERIAL_LEN: usize = 0x16;
const RES_STEP: u32 = 100;
const MIN_RESOLUTION: u32 = 100;
/// Selected after init.
const DEFAULT_MAPPING: u32 = 1;

const REQ_INIT: u16 = 0x0004;
const REQ_SET_RESOLUTION: u16 = 0x0405;
const REQ_GET_FIRMWARE: u16 = 0x0087;
const REQ_GET_SERIAL: u16 = 0x0082;
const REQ_SET_FREQUENCY: u16 = 0x0005;
const REQ_LED_STATE: u16 = 0x0300;
const REQ_LED_COLOR: u16 = 0x0301;
const REQ_LED_MODE: u16 = 0x0302;
const REQ_BASIC_LED: u16 = 0x030A;

const INIT_ARG0: u8 = 0x03;
const LED_ARG0: u8 = 0x01;

const LED_ID_SCROLL: u8 = 0x01;
const LED_ID_LOGO: u8 = 0x04;

/// Which device is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaModel {
    DeathAdderChroma,
    DeathAdder3500,
    MambaTe,
    DiamondbackChroma,
}

impl ChromaModel {
    fn name(self) -> &'static str {
        match self {
            Self::DeathAdderChroma => "DeathAdder Chroma",
            Self::DeathAdder3500 => "DeathAdder 3500DPI",
            Self::MambaTe => "Mamba Tournament Edition",
            Self::DiamondbackChroma => "Diamondback Chroma",
        }
    }

    fn mouse_type(self) -> MouseType {
        match self {
            Self::DeathAdderChroma | Self::DeathAdder3500 => MouseType::DeathAdder,
            Self::MambaTe => MouseType::MambaTe,
            Self::DiamondbackChroma => MouseType::DiamondbackChroma,
        }
    }

    fn stages(self) -> &'static [u32] {
        match self {
            Self::DeathAdderChroma | Self::MambaTe => &[800, 1800, 3500, 5600, 10000],
            Self::DeathAdder3500 => &[800, 1800, 3500],
            Self::DiamondbackChroma => &[800, 1800, 3500, 5600, 10000, 16000],
        }
    }

    fn max_resolution(self) -> u32 {
        match self {
            Self::DiamondbackChroma => 16000,
            _ => 10000,
        }
    }

    fn resolution_arg0(self) -> u8 {
        match self {
            Self::DeathAdderChroma | Self::DeathAdder3500 => 0x00,
            Self::MambaTe | Self::DiamondbackChroma => 0x01,
        }
    }

    /// A single LED driven by one combined request.
    fn basic_led(self) -> bool {
        matches!(self, Self::MambaTe | Self::DiamondbackChroma)
    }

    fn led_modes(self) -> &'static [LedMode] {
        match self {
            Self::DeathAdderChroma => &[LedMode::Static, LedMode::Breathing, LedMode::Spectrum],
            Self::DeathAdder3500 => &[LedMode::Static, LedMode::Breathing],
            Self::MambaTe | Self::DiamondbackChroma => &[
                LedMode::Static,
                LedMode::Breathing,
                LedMode::Spectrum,
                LedMode::Wave,
                LedMode::Reaction,
            ],
        }
    }

    fn default_mode(self) -> LedMode {
        match self {
            Self::DeathAdderChroma => LedMode::Spectrum,
            _ => LedMode::Static,
        }
    }

    fn mode_code(self, mode: LedMode) -> u16 {
        if self.basic_led() {
            match mode {
                LedMode::Static => 0x0006,
                LedMode::Breathing => 0x0301,
                LedMode::Spectrum => 0x0400,
                LedMode::Wave => 0x0101,
                LedMode::Reaction => 0x0203,
            }
        } else {
            match mode {
                LedMode::Breathing => 0x02,
                LedMode::Spectrum => 0x04,
                _ => 0x00,
            }
        }
    }
}

/// One command buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromaCommand {
    pub status: u8,
    pub size: u8,
    pub request: u16,
    pub args: [u8; ARGS_LEN],
}

impl ChromaCommand {
    pub fn new(size: u8, request: u16) -> Self {
        Self {
            status: 0,
            size,
            request,
            args: [0; ARGS_LEN],
        }
    }

    pub fn with_args(mut self, args: &[u8]) -> Self {
        self.args[..args.len()].copy_from_slice(args);
        self
    }

    /// Store 16-bit argument `i`; these start at argument byte 1.
    pub fn with_value(mut self, i: usize, v: u16) -> Self {
        put_be16(&mut self.args, 1 + i * 2, v);
        self
    }

    pub fn value(&self, i: usize) -> u16 {
        be16(&self.args, 1 + i * 2)
    }

    pub fn encode(&self) -> [u8; CMD_LEN] {
        let mut buf = [0u8; CMD_LEN];
        buf[0] = self.status;
        buf[1] = MAGIC;
        buf[5] = self.size;
        put_be16(&mut buf, 6, self.request);
        buf[ARGS_OFFSET..ARGS_OFFSET + ARGS_LEN].copy_from_slice(&self.args);
        buf[88] = checksum(&buf);
        buf
    }

    pub fn decode(buf: &[u8; CMD_LEN]) -> Self {
        let mut args = [0u8; ARGS_LEN];
        args.copy_from_slice(&buf[ARGS_OFFSET..ARGS_OFFSET + ARGS_LEN]);
        Self {
            status: buf[0],
            size: buf[5],
            request: be16(buf, 6),
            args,
        }
    }
}

/// xor8 over the size byte, the request and `size` argument bytes.
pub fn checksum(buf: &[u8; CMD_LEN]) -> u8 {
    let end = (ARGS_OFFSET + usize::from(buf[5])).min(88);
    xor8_checksum(&buf[5..end])
}

#[derive(Debug, Clone)]
struct ChromaLed {
    wire_id: u8,
    name: &'static str,
    on: bool,
    mode: LedMode,
    color: RgbColor,
}

#[derive(Debug, Clone)]
struct State {
    mappings: Vec<DpiMapping>,
    cur_mapping: u32,
    freq: Frequency,
    leds: Vec<ChromaLed>,
}

pub struct Chroma {
    model: ChromaModel,
    idstr: String,
    fw_version: u16,
    serial: String,
    spacing: EventSpacing,
    axes: Vec<Axis>,
    s: State,
}

impl Chroma {
    pub fn new(model: ChromaModel) -> Self {
        let mappings = model
            .stages()
            .iter()
            .enumerate()
            .map(|(nr, &res)| DpiMapping::xy(nr as u32, res).changeable())
            .collect();
        let led = |wire_id, name| ChromaLed {
            wire_id,
            name,
            on: true,
            mode: model.default_mode(),
            color: RgbColor::new(0x00, 0xFF, 0x00),
        };
        let leds = if model.basic_led() {
            vec![led(0, "Basic")]
        } else {
            vec![led(LED_ID_SCROLL, "Scrollwheel"), led(LED_ID_LOGO, "GlowingLogo")]
        };
        Self {
            model,
            idstr: String::new(),
            fw_version: 0,
            serial: String::new(),
            spacing: EventSpacing::new(PACKET_SPACING_MS),
            axes: vec![Axis::new(0, "X/Y", true), Axis::new(1, "Scroll", false)],
            s: State {
                mappings,
                cur_mapping: DEFAULT_MAPPING,
                freq: Frequency::Hz500,
                leds,
            },
        }
    }

    fn send(&mut self, ctx: &mut UsbContext, cmd: &ChromaCommand) -> Result<ChromaCommand> {
        let buf = exchange(ctx, &mut self.spacing, &cmd.encode(), 1)?;
        let expected = checksum(&buf);
        if expected != buf[88] {
            error!(
                size = format_args!("{:02X}", cmd.size),
                request = format_args!("{:04X}", cmd.request),
                checksum = format_args!("{:02X}", buf[88]),
                expected = format_args!("{:02X}", expected),
                "{}: bad response checksum",
                self.model.name()
            );
            return Err(Error::Checksum {
                what: "chroma response",
                expected: u16::from(expected),
                actual: u16::from(buf[88]),
            });
        }
        let reply = ChromaCommand::decode(&buf);
        if reply.status != STATUS_SUCCESS {
            error!(
                size = format_args!("{:02X}", cmd.size),
                request = format_args!("{:04X}", cmd.request),
                status = format_args!("{:02X}", reply.status),
                "{}: command failed",
                self.model.name()
            );
        }
        Ok(reply)
    }

    fn send_init(&mut self, ctx: &mut UsbContext) -> Result<()> {
        self.send(ctx, &ChromaCommand::new(0x02, REQ_INIT).with_args(&[INIT_ARG0]))
            .map(drop)
    }

    fn send_resolution(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let m = find_mapping(&self.s.mappings, self.s.cur_mapping)?;
        let (x, y) = (m.res[Dimension::X.index()], m.res[Dimension::Y.index()]);
        let cmd = ChromaCommand::new(0x07, REQ_SET_RESOLUTION)
            .with_args(&[self.model.resolution_arg0()])
            .with_value(0, x as u16)
            .with_value(1, y as u16);
        self.send(ctx, &cmd).map(drop)
    }

    fn read_firmware(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let reply = self.send(ctx, &ChromaCommand::new(0x04, REQ_GET_FIRMWARE))?;
        self.fw_version = (u16::from(reply.args[0]) << 8) | reply.value(0);
        Ok(())
    }

    fn read_serial(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let reply = self.send(ctx, &ChromaCommand::new(SERIAL_LEN as u8, REQ_GET_SERIAL))?;
        let raw = &reply.args[..SERIAL_LEN];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(SERIAL_LEN);
        self.serial = String::from_utf8_lossy(&raw[..end]).into_owned();
        Ok(())
    }

    fn send_freq(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let code = (1000 / self.s.freq.as_hz()) as u8;
        self.send(ctx, &ChromaCommand::new(0x01, REQ_SET_FREQUENCY).with_args(&[code]))
            .map(drop)
    }

    /// The combined LED request of single-LED devices.
    fn basic_led_command(&self, led: &ChromaLed) -> ChromaCommand {
        let code = self.model.mode_code(led.mode);
        let c = led.color;
        let mut args = if led.mode == LedMode::Static {
            vec![code as u8, c.r, c.g, c.b]
        } else {
            vec![(code >> 8) as u8, code as u8, c.r, c.g, c.b]
        };
        let mask = if led.on { 0xFF } else { 0x00 };
        args[0] &= mask;
        args[1] &= mask;
        ChromaCommand::new(0x08, REQ_BASIC_LED).with_args(&args)
    }

    fn send_led_state(&mut self, ctx: &mut UsbContext, i: usize) -> Result<()> {
        let led = &self.s.leds[i];
        let cmd = if self.model.basic_led() {
            self.basic_led_command(led)
        } else {
            ChromaCommand::new(0x03, REQ_LED_STATE).with_args(&[LED_ARG0, led.wire_id, led.on as u8])
        };
        self.send(ctx, &cmd).map(drop)
    }

    fn send_led_mode(&mut self, ctx: &mut UsbContext, i: usize) -> Result<()> {
        let led = &self.s.leds[i];
        let cmd = if self.model.basic_led() {
            self.basic_led_command(led)
        } else {
            let code = self.model.mode_code(led.mode) as u8;
            ChromaCommand::new(0x03, REQ_LED_MODE).with_args(&[LED_ARG0, led.wire_id, code])
        };
        self.send(ctx, &cmd).map(drop)
    }

    fn send_led_color(&mut self, ctx: &mut UsbContext, i: usize) -> Result<()> {
        let led = &self.s.leds[i];
        let cmd = if self.model.basic_led() {
            self.basic_led_command(led)
        } else {
            let c = led.color;
            ChromaCommand::new(0x05, REQ_LED_COLOR)
                .with_args(&[LED_ARG0, led.wire_id, c.r, c.g, c.b])
        };
        self.send(ctx, &cmd).map(drop)
    }

    fn init_claimed(&mut self, ctx: &mut UsbContext) -> Result<()> {
        self.send_init(ctx)?;
        self.send_resolution(ctx)?;
        self.read_firmware(ctx)?;
        self.read_serial(ctx)?;
        self.send_freq(ctx)?;
        for i in 0..self.s.leds.len() {
            if !self.model.basic_led() {
                self.send_led_state(ctx, i)?;
            }
            self.send_led_mode(ctx, i)?;
            self.send_led_color(ctx, i)?;
        }
        Ok(())
    }

    /// Apply `change`, push it with `send` and undo it if sending fails.
    fn apply<C, S>(&mut self, ctx: &mut UsbContext, change: C, send: S) -> Result<()>
    where
        C: FnOnce(&mut State) -> Result<()>,
        S: FnOnce(&mut Self, &mut UsbContext) -> Result<()>,
    {
        ctx.ensure_claimed()?;
        let old = self.s.clone();
        change(&mut self.s)?;
        if let Err(e) = send(self, ctx) {
            self.s = old;
            return Err(e);
        }
        Ok(())
    }

    fn led_index(&self, led: u32) -> Result<usize> {
        let i = led as usize;
        if i >= self.s.leds.len() {
            return Err(Error::InvalidArgument(format!("no LED {led}")));
        }
        Ok(i)
    }
}

impl MouseDriver for Chroma {
    fn init(&mut self, ctx: &mut UsbContext) -> Result<()> {
        ctx.add_used_interface(0, 0)?;
        ctx.claim_refcount()?;
        let res = self.init_claimed(ctx);
        if res.is_ok() {
            let serial = self.serial.clone();
            self.idstr = usb_idstr(ctx, self.model.name(), false, Some(&serial));
        }
        ctx.release_refcount();
        res.map_err(|e| {
            error!("{}: initialization failed: {}", self.model.name(), e);
            e
        })?;
        debug!(
            idstr = %self.idstr,
            fw = format_args!("{}.{:02}", self.fw_version >> 8, self.fw_version & 0xFF),
            "{} initialized",
            self.model.name()
        );
        Ok(())
    }

    fn mouse_type(&self) -> MouseType {
        self.model.mouse_type()
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
            self.send_resolution(ctx)?;
            self.send_freq(ctx)?;
            for i in 0..self.s.leds.len() {
                if !self.model.basic_led() {
                    self.send_led_state(ctx, i)?;
                }
                self.send_led_mode(ctx, i)?;
                self.send_led_color(ctx, i)?;
            }
        }
        Ok(())
    }

    fn supported_axes(&self) -> Vec<Axis> {
        self.axes.clone()
    }

    fn supported_resolutions(&self) -> Vec<u32> {
        resolution_steps(RES_STEP, self.model.max_resolution())
    }

    fn supported_freqs(&self) -> Vec<Frequency> {
        vec![Frequency::Hz125, Frequency::Hz500, Frequency::Hz1000]
    }

    fn supported_dpimappings(&self) -> Vec<DpiMapping> {
        self.s.mappings.clone()
    }

    /// Resolution 0 selects the 1800 DPI default.
    fn change_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        nr: u32,
        dim: Dimension,
        res: u32,
    ) -> Result<()> {
        let idx = self
            .s
            .mappings
            .iter()
            .position(|m| m.nr == nr)
            .ok_or_else(|| Error::InvalidArgument(format!("no DPI mapping {nr}")))?;
        if !self.s.mappings[idx].uses(dim) {
            return Err(Error::InvalidArgument(format!("mapping {nr} has no dimension {dim:?}")));
        }
        let res = if res == 0 { 1800 } else { res };
        check_resolution(res, MIN_RESOLUTION, self.model.max_resolution())?;
        let current = nr == self.s.cur_mapping;
        self.apply(
            ctx,
            |s| {
                s.mappings[idx].res[dim.index()] = res;
                Ok(())
            },
            |m, ctx| if current { m.send_resolution(ctx) } else { Ok(()) },
        )
    }

    fn global_leds(&self) -> Vec<Led> {
        let modes = self.model.led_modes().to_vec();
        self.s
            .leds
            .iter()
            .enumerate()
            .map(|(i, l)| Led {
                id: i as u32,
                name: l.name,
                state: LedState::from_bool(l.on),
                mode: Some(l.mode),
                supported_modes: modes.clone(),
                color: Some(l.color),
            })
            .collect()
    }

    /// An unknown state turns the LED on.
    fn set_led_state(
        &mut self,
        ctx: &mut UsbContext,
        _profile: Option<u32>,
        led: u32,
        state: LedState,
    ) -> Result<()> {
        let i = self.led_index(led)?;
        let on = state != LedState::Off;
        self.apply(
            ctx,
            |s| {
                s.leds[i].on = on;
                Ok(())
            },
            |m, ctx| m.send_led_state(ctx, i),
        )
    }

    fn set_led_mode(
        &mut self,
        ctx: &mut UsbContext,
        _profile: Option<u32>,
        led: u32,
        mode: LedMode,
    ) -> Result<()> {
        let i = self.led_index(led)?;
        if !self.model.led_modes().contains(&mode) {
            return Err(Error::InvalidArgument(format!(
                "{} LEDs have no {mode} mode",
                self.model.name()
            )));
        }
        self.apply(
            ctx,
            |s| {
                s.leds[i].mode = mode;
                Ok(())
            },
            |m, ctx| m.send_led_mode(ctx, i),
        )
    }

    fn set_led_color(
        &mut self,
        ctx: &mut UsbContext,
        _profile: Option<u32>,
        led: u32,
        color: RgbColor,
    ) -> Result<()> {
        let i = self.led_index(led)?;
        if self.s.leds[i].mode == LedMode::Spectrum {
            return Err(Error::InvalidArgument("color cannot change in spectrum mode".into()));
        }
        self.apply(
            ctx,
            |s| {
                s.leds[i].color = color;
                Ok(())
            },
            |m, ctx| m.send_led_color(ctx, i),
        )
    }

    fn freq(&self, _profile: u32) -> Option<Frequency> {
        Some(self.s.freq)
    }

    fn set_freq(&mut self, ctx: &mut UsbContext, _profile: u32, freq: Frequency) -> Result<()> {
        self.apply(
            ctx,
            |s| {
                s.freq = freq;
                Ok(())
            },
            |m, ctx| m.send_freq(ctx),
        )
    }

    fn dpimapping(&self, _profile: u32, axis: Option<u32>) -> Option<DpiMapping> {
        if axis.is_some_and(|a| a > 0) {
            return None;
        }
        find_mapping(&self.s.mappings, self.s.cur_mapping).ok().cloned()
    }

    fn set_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        _profile: u32,
        axis: Option<u32>,
        nr: u32,
    ) -> Result<()> {
        axis_indices(&self.axes[..1], axis)?;
        find_mapping(&self.s.mappings, nr)?;
        self.apply(
            ctx,
            |s| {
                s.cur_mapping = nr;
                Ok(())
            },
            |m, ctx| m.send_resolution(ctx),
        )
    }
}
