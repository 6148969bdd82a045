//! The Synapse wire protocol, shared by several newer devices.
//!
//! Every exchange is request, reply, then an all-zero "null" request that
//! returns the firmware to idle. Requests are 90 bytes:
//!
//! ```text
//! [0] magic 0x01  [1] flags  [2] rw  [3] command  [4] request
//! [8..88] payload  [88..90] checksum (LE16)
//! ```
//!
//! A device built on this protocol has five profiles, each with its own five
//! changeable X/Y mappings, button map, LED states and LED colors. The scan
//! frequency is global.

use crate::buttonmapping::{
    self, function_by_button, mapping_by_physical_mut, Button, ButtonFunction, ButtonMapping,
};
use crate::driver::{check_freq, check_profile, check_resolution, find_mapping, MouseDriver};
use crate::error::{Error, Result};
use crate::identity::usb_idstr;
use crate::model::{
    resolution_steps, Axis, Dimension, DpiMapping, Frequency, Led, LedState, MouseType, RgbColor,
};
use crate::usb::{
    UsbContext, REQTYPE_CLASS_IFACE_IN, REQTYPE_CLASS_IFACE_OUT, REQ_CLEAR_FEATURE,
    REQ_SET_CONFIGURATION,
};
use crate::util::{put_le16, utf16_decode, utf16_encode, xor8_checksum};
use std::marker::PhantomData;
use tracing::{debug, error};

pub const REQUEST_LEN: usize = 90;
pub const PAYLOAD_LEN: usize = 80;
const PAYLOAD_OFFSET: usize = 8;

pub const REQ_MAGIC: u8 = 0x01;
pub const FLAG_TRANSOK: u8 = 0x02;
pub const RW_READ: u8 = 0x01;
pub const RW_WRITE: u8 = 0x00;

const REQUEST_VALUE: u16 = 0x300;
const TRANSFER_DELAY_MS: u64 = 5;

pub const NR_PROFILES: u32 = 5;
const NR_MAPPINGS: usize = 5;
const NR_LEDS: usize = 2;
const SERIAL_LEN: usize = 32;
const PROFNAME_CHARS: usize = 20;
const RES_STEP: u32 = 100;
const RES_MAX: u32 = 5600;

pub const CMD_DEVINFO: u8 = 0x02;
pub const CMD_GLOBCONFIG: u8 = 0x05;
pub const CMD_HWCONFIG: u8 = 0x06;
pub const CMD_PROFNAME: u8 = 0x22;

const HWCONFIG_LEN: usize = 72;
const HW_MAPPINGS: usize = 4;
const HW_BUTTONMAP: usize = 20;
const HW_BUTTONMAP_LEN: usize = 4 * NR_BUTTONS;
const HW_COLORS: usize = 64;
const BUTTONMAP_SPACING: usize = 2;
const LED_COLOR_PADDING: u8 = 0xFF;
/// Set in every hardware config write.
const LEDS_ALWAYS: u8 = 0x04;

const NR_BUTTONS: usize = 11;

const BUTTONS: [Button; NR_BUTTONS] = [
    Button::new(0x01, "Leftclick"),
    Button::new(0x02, "Rightclick"),
    Button::new(0x03, "Middleclick"),
    Button::new(0x04, "Leftside front"),
    Button::new(0x05, "Leftside rear"),
    Button::new(0x06, "Rightside front"),
    Button::new(0x07, "Rightside rear"),
    Button::new(0x08, "Top front"),
    Button::new(0x09, "Top rear"),
    Button::new(0x0A, "Scroll up"),
    Button::new(0x0B, "Scroll down"),
];

const FUNCTIONS: [ButtonFunction; 16] = [
    buttonmapping::LEFT,
    buttonmapping::RIGHT,
    buttonmapping::MIDDLE,
    buttonmapping::PROFDOWN,
    buttonmapping::PROFUP,
    buttonmapping::DPIUP,
    buttonmapping::DPIDOWN,
    buttonmapping::DPI1,
    buttonmapping::DPI2,
    buttonmapping::DPI3,
    buttonmapping::DPI4,
    buttonmapping::DPI5,
    buttonmapping::WIN5,
    buttonmapping::WIN4,
    buttonmapping::SCROLLUP,
    buttonmapping::SCROLLDWN,
];

/// One request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynapseRequest {
    pub magic: u8,
    pub flags: u8,
    pub rw: u8,
    pub command: u8,
    pub request: u8,
    pub payload: [u8; PAYLOAD_LEN],
}

impl SynapseRequest {
    pub fn new(rw: u8, command: u8, request: u8, payload: &[u8]) -> Self {
        let mut p = [0u8; PAYLOAD_LEN];
        let n = payload.len().min(PAYLOAD_LEN);
        p[..n].copy_from_slice(&payload[..n]);
        Self {
            magic: REQ_MAGIC,
            flags: 0,
            rw,
            command,
            request,
            payload: p,
        }
    }

    /// The idle request sent after every exchange.
    pub fn null() -> Self {
        Self::new(0, 0, 0, &[])
    }

    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut buf = [0u8; REQUEST_LEN];
        buf[0] = self.magic;
        buf[1] = self.flags;
        buf[2] = self.rw;
        buf[3] = self.command;
        buf[4] = self.request;
        buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN].copy_from_slice(&self.payload);
        let csum = checksum(&buf);
        put_le16(&mut buf, 88, csum);
        buf
    }

    pub fn decode(buf: &[u8; REQUEST_LEN]) -> Self {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_LEN]);
        Self {
            magic: buf[0],
            flags: buf[1],
            rw: buf[2],
            command: buf[3],
            request: buf[4],
            payload,
        }
    }
}

/// xor8 over bytes 2..88; bit 8 is set when TRANSOK is clear.
pub fn checksum(buf: &[u8; REQUEST_LEN]) -> u16 {
    let mut sum = u16::from(xor8_checksum(&buf[2..88]));
    if buf[1] & FLAG_TRANSOK == 0 {
        sum |= 0x100;
    }
    sum
}

fn send(ctx: &mut UsbContext, req: &SynapseRequest) -> Result<()> {
    ctx.control_write(
        REQTYPE_CLASS_IFACE_OUT,
        REQ_SET_CONFIGURATION,
        REQUEST_VALUE,
        0,
        &req.encode(),
    )?;
    ctx.msleep(TRANSFER_DELAY_MS);
    Ok(())
}

fn receive(ctx: &mut UsbContext) -> Result<SynapseRequest> {
    let mut buf = [0u8; REQUEST_LEN];
    ctx.control_read(REQTYPE_CLASS_IFACE_IN, REQ_CLEAR_FEATURE, REQUEST_VALUE, 0, &mut buf)?;
    ctx.msleep(TRANSFER_DELAY_MS);
    Ok(SynapseRequest::decode(&buf))
}

fn exchange(ctx: &mut UsbContext, req: &SynapseRequest) -> Result<SynapseRequest> {
    send(ctx, req)?;
    let reply = receive(ctx)?;
    send(ctx, &SynapseRequest::null())?;
    if reply.magic != REQ_MAGIC {
        error!(magic = format_args!("0x{:02X}", reply.magic), "synapse: invalid reply magic");
        return Err(Error::Protocol(format!("reply magic 0x{:02X}", reply.magic)));
    }
    if reply.rw != req.rw {
        error!(rw = reply.rw, "synapse: invalid rw flag in reply");
        return Err(Error::Protocol(format!("reply rw flag {}", reply.rw)));
    }
    if reply.command != req.command {
        error!(
            command = format_args!("0x{:02X}", reply.command),
            expected = format_args!("0x{:02X}", req.command),
            "synapse: reply to a different command"
        );
        return Err(Error::Protocol(format!(
            "reply command 0x{:02X}, expected 0x{:02X}",
            reply.command, req.command
        )));
    }
    Ok(reply)
}

/// Write request. The echo must carry the same command and request.
pub fn request_write(ctx: &mut UsbContext, command: u8, request: u8, payload: &[u8]) -> Result<()> {
    let req = SynapseRequest::new(RW_WRITE, command, request, payload);
    let reply = exchange(ctx, &req)?;
    if reply.request != request {
        error!(
            command = format_args!("0x{:02X}", command),
            request = format_args!("0x{:02X}", reply.request),
            "synapse: write echoed a different request"
        );
        return Err(Error::Protocol(format!(
            "write 0x{command:02X} echoed request 0x{:02X}",
            reply.request
        )));
    }
    Ok(())
}

/// Read request. `payload` seeds the request and receives the reply.
pub fn request_read(ctx: &mut UsbContext, command: u8, request: u8, payload: &mut [u8]) -> Result<()> {
    let req = SynapseRequest::new(RW_READ, command, request, payload);
    let reply = exchange(ctx, &req)?;
    if reply.flags & FLAG_TRANSOK == 0 {
        error!(command = format_args!("0x{:02X}", command), "synapse: TRANSOK flag not set");
        return Err(Error::Protocol(format!("read 0x{command:02X} not acknowledged")));
    }
    let n = payload.len().min(PAYLOAD_LEN);
    payload[..n].copy_from_slice(&reply.payload[..n]);
    Ok(())
}

fn freq_code(freq: Frequency) -> u8 {
    match freq {
        Frequency::Hz1000 => 1,
        Frequency::Hz500 => 2,
        Frequency::Hz125 => 8,
    }
}

fn freq_from_code(code: u8) -> Option<Frequency> {
    match code {
        1 => Some(Frequency::Hz1000),
        2 => Some(Frequency::Hz500),
        8 => Some(Frequency::Hz125),
        _ => None,
    }
}

fn dpival(res: u32) -> u8 {
    ((res / 100).saturating_sub(1) * 4) as u8
}

fn res_from_dpival(v: u8) -> u32 {
    (u32::from(v) / 4 + 1) * 100
}

/// Static description of a device on this protocol.
pub trait SynapseModel: Send + 'static {
    /// Device name used in the identity string.
    const NAME: &'static str;
    const MOUSE_TYPE: MouseType;
    const RGB_LEDS: bool;
    const LED_NAMES: [&'static str; NR_LEDS] = ["ScrollWheel", "GlowingLogo"];
}

#[derive(Debug, Clone)]
struct Settings {
    cur_profile: u32,
    freq: Frequency,
    leds: [[bool; NR_LEDS]; NR_PROFILES as usize],
    colors: [[RgbColor; NR_LEDS]; NR_PROFILES as usize],
    names: Vec<String>,
    /// `profile * NR_MAPPINGS + slot`.
    mappings: Vec<DpiMapping>,
    cur_mapping: [u32; NR_PROFILES as usize],
    buttons: Vec<Vec<ButtonMapping>>,
}

impl Settings {
    fn new() -> Self {
        let mut mappings = Vec::with_capacity(NR_PROFILES as usize * NR_MAPPINGS);
        for p in 0..NR_PROFILES {
            for slot in 0..NR_MAPPINGS as u32 {
                mappings.push(DpiMapping::xy(p * 10 + slot, 0).changeable().for_profile(p));
            }
        }
        let template: Vec<ButtonMapping> =
            BUTTONS.iter().map(|b| ButtonMapping::new(b.id, 0)).collect();
        Self {
            cur_profile: 0,
            freq: Frequency::Hz1000,
            leds: [[true; NR_LEDS]; NR_PROFILES as usize],
            colors: [[RgbColor::new(0, 0xFF, 0); NR_LEDS]; NR_PROFILES as usize],
            names: vec![String::new(); NR_PROFILES as usize],
            mappings,
            cur_mapping: [0, 10, 20, 30, 40],
            buttons: vec![template; NR_PROFILES as usize],
        }
    }

    fn mapping_index(&self, nr: u32) -> Result<usize> {
        self.mappings
            .iter()
            .position(|m| m.nr == nr)
            .ok_or_else(|| Error::InvalidArgument(format!("no DPI mapping {nr}")))
    }

    fn current(&self, profile: u32) -> Result<&DpiMapping> {
        find_mapping(&self.mappings, self.cur_mapping[profile as usize])
    }

    fn hwconfig(&self, profile: usize, rgb: bool) -> Result<[u8; HWCONFIG_LEN]> {
        let mut buf = [0u8; HWCONFIG_LEN];
        buf[0] = profile as u8 + 1;
        buf[1] = LEDS_ALWAYS;
        for (j, on) in self.leds[profile].iter().enumerate() {
            if *on {
                buf[1] |= 1 << j;
            }
        }
        buf[2] = (self.cur_mapping[profile] % 10) as u8 + 1;
        buf[3] = NR_MAPPINGS as u8;
        for j in 0..NR_MAPPINGS {
            let m = &self.mappings[profile * NR_MAPPINGS + j];
            buf[HW_MAPPINGS + j * 2] = dpival(m.res[Dimension::X.index()]);
            buf[HW_MAPPINGS + j * 2 + 1] = dpival(m.res[Dimension::Y.index()]);
        }
        buttonmapping::encode(
            &mut buf[HW_BUTTONMAP..HW_BUTTONMAP + HW_BUTTONMAP_LEN],
            &self.buttons[profile],
            BUTTONMAP_SPACING,
        )?;
        if rgb {
            for (j, c) in self.colors[profile].iter().enumerate() {
                let off = HW_COLORS + j * 4;
                buf[off..off + 4].copy_from_slice(&[c.r, c.g, c.b, LED_COLOR_PADDING]);
            }
        }
        Ok(buf)
    }
}

/// Driver for any device on the Synapse protocol.
pub struct Synapse<M: SynapseModel> {
    idstr: String,
    fw_version: u16,
    serial: String,
    axes: Vec<Axis>,
    s: Settings,
    model: PhantomData<M>,
}

impl<M: SynapseModel> Synapse<M> {
    pub(crate) fn with_model() -> Self {
        Self {
            idstr: String::new(),
            fw_version: 0,
            serial: String::new(),
            axes: vec![
                Axis::new(0, "X", false),
                Axis::new(1, "Y", false),
                Axis::new(2, "Scroll", false),
            ],
            s: Settings::new(),
            model: PhantomData,
        }
    }

    /// Serial number reported by the device.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn read_devinfo(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let mut devinfo = [0u8; SERIAL_LEN + 2];
        request_read(ctx, CMD_DEVINFO, 1, &mut devinfo)?;
        self.fw_version = u16::from_be_bytes([devinfo[SERIAL_LEN], devinfo[SERIAL_LEN + 1]]);
        let end = devinfo[..SERIAL_LEN].iter().position(|&b| b == 0).unwrap_or(SERIAL_LEN);
        self.serial = String::from_utf8_lossy(&devinfo[..end]).into_owned();
        Ok(())
    }

    fn read_config(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let mut glob = [0u8; 5];
        request_read(ctx, CMD_GLOBCONFIG, 1, &mut glob)?;
        if glob[0] < 1 || u32::from(glob[0]) > NR_PROFILES {
            error!(profile = glob[0], "synapse: invalid profile number");
            return Err(Error::Protocol(format!("invalid profile number {}", glob[0])));
        }
        self.s.cur_profile = u32::from(glob[0]) - 1;
        self.s.freq = freq_from_code(glob[1]).ok_or_else(|| {
            error!(freq = glob[1], "synapse: invalid frequency value");
            Error::Protocol(format!("invalid frequency code {}", glob[1]))
        })?;

        for i in 0..NR_PROFILES as usize {
            let mut name = [0u8; 1 + PROFNAME_CHARS * 2];
            name[0] = i as u8 + 1;
            request_read(ctx, CMD_PROFNAME, 1, &mut name)?;
            self.s.names[i] = utf16_decode(&name[1..]);
        }

        for i in 0..NR_PROFILES as usize {
            let mut hw = [0u8; HWCONFIG_LEN];
            hw[0] = i as u8 + 1;
            request_read(ctx, CMD_HWCONFIG, 1, &mut hw)?;
            self.parse_hwconfig(i, &hw)?;
        }
        Ok(())
    }

    fn parse_hwconfig(&mut self, i: usize, hw: &[u8; HWCONFIG_LEN]) -> Result<()> {
        if usize::from(hw[0]) != i + 1 {
            error!(got = hw[0], expected = i + 1, "synapse: hardware config for wrong profile");
            return Err(Error::Protocol(format!("hw config for profile {}", hw[0])));
        }
        for j in 0..NR_LEDS {
            self.s.leds[i][j] = hw[1] & (1 << j) != 0;
        }
        let (dpisel, nr) = (hw[2], hw[3]);
        if nr < 1 || usize::from(nr) > NR_MAPPINGS {
            error!(nr, "synapse: invalid number of DPI mappings");
            return Err(Error::Protocol(format!("invalid mapping count {nr}")));
        }
        if dpisel < 1 || dpisel > nr {
            error!(dpisel, "synapse: invalid DPI selection");
            return Err(Error::Protocol(format!("invalid DPI selection {dpisel}")));
        }
        self.s.cur_mapping[i] = i as u32 * 10 + u32::from(dpisel) - 1;
        for j in 0..NR_MAPPINGS {
            let (x, y) = if j < usize::from(nr) {
                (
                    res_from_dpival(hw[HW_MAPPINGS + j * 2]),
                    res_from_dpival(hw[HW_MAPPINGS + j * 2 + 1]),
                )
            } else {
                (RES_MAX, RES_MAX)
            };
            let m = &mut self.s.mappings[i * NR_MAPPINGS + j];
            m.res[Dimension::X.index()] = x;
            m.res[Dimension::Y.index()] = y;
        }
        buttonmapping::decode_into(
            &hw[HW_BUTTONMAP..HW_BUTTONMAP + HW_BUTTONMAP_LEN],
            &mut self.s.buttons[i],
            BUTTONMAP_SPACING,
        )?;
        for j in 0..NR_LEDS {
            let off = HW_COLORS + j * 4;
            self.s.colors[i][j] = RgbColor::new(hw[off], hw[off + 1], hw[off + 2]);
        }
        Ok(())
    }

    fn do_commit(ctx: &mut UsbContext, s: &Settings) -> Result<()> {
        for i in 0..NR_PROFILES as usize {
            request_write(ctx, CMD_HWCONFIG, 0x48, &s.hwconfig(i, M::RGB_LEDS)?)?;
        }
        for (i, name) in s.names.iter().enumerate() {
            let mut buf = vec![i as u8 + 1];
            buf.extend(utf16_encode(name, PROFNAME_CHARS));
            request_write(ctx, CMD_PROFNAME, 0x29, &buf)?;
        }
        let cur = s.current(s.cur_profile)?;
        let glob = [
            s.cur_profile as u8 + 1,
            freq_code(s.freq),
            (cur.nr % 10) as u8 + 1,
            dpival(cur.res[Dimension::X.index()]),
            dpival(cur.res[Dimension::Y.index()]),
        ];
        request_write(ctx, CMD_GLOBCONFIG, 5, &glob)
    }

    fn update<F>(&mut self, ctx: &mut UsbContext, change: F) -> Result<()>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        ctx.ensure_claimed()?;
        let mut next = self.s.clone();
        change(&mut next)?;
        Self::do_commit(ctx, &next)?;
        self.s = next;
        Ok(())
    }

    fn init_claimed(&mut self, ctx: &mut UsbContext) -> Result<()> {
        self.read_devinfo(ctx).map_err(|e| {
            error!("synapse: failed to get firmware version: {}", e);
            e
        })?;
        self.read_config(ctx).map_err(|e| {
            error!("synapse: failed to read the configuration from hardware: {}", e);
            e
        })?;
        Self::do_commit(ctx, &self.s).map_err(|e| {
            error!("synapse: failed to commit initial settings: {}", e);
            e
        })?;
        let serial = self.serial.clone();
        self.idstr = usb_idstr(ctx, M::NAME, true, Some(&serial));
        Ok(())
    }

    fn led_profile(&self, profile: Option<u32>) -> Result<usize> {
        let p = profile.unwrap_or(self.s.cur_profile);
        check_profile(p, NR_PROFILES)?;
        Ok(p as usize)
    }
}

impl<M: SynapseModel> MouseDriver for Synapse<M> {
    fn init(&mut self, ctx: &mut UsbContext) -> Result<()> {
        ctx.add_used_interface(0, 0)?;
        ctx.claim_refcount().map_err(|e| {
            error!("synapse: failed to initially claim the device: {}", e);
            e
        })?;
        let res = self.init_claimed(ctx);
        ctx.release_refcount();
        res?;
        debug!(
            idstr = %self.idstr,
            fw = format_args!("{}.{:02}", self.fw_version >> 8, self.fw_version & 0xFF),
            "{} initialized",
            M::NAME
        );
        Ok(())
    }

    fn mouse_type(&self) -> MouseType {
        M::MOUSE_TYPE
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
            Self::do_commit(ctx, &self.s)?;
        }
        Ok(())
    }

    fn nr_profiles(&self) -> u32 {
        NR_PROFILES
    }

    fn active_profile(&self) -> Option<u32> {
        Some(self.s.cur_profile)
    }

    fn set_active_profile(&mut self, ctx: &mut UsbContext, profile: u32) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        self.update(ctx, |s| {
            s.cur_profile = profile;
            Ok(())
        })
    }

    fn profile_name(&self, profile: u32) -> Option<String> {
        self.s.names.get(profile as usize).cloned()
    }

    fn set_profile_name(&mut self, ctx: &mut UsbContext, profile: u32, name: &str) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        let name: String = name.chars().filter(|c| *c != '\0').collect();
        let truncated = utf16_decode(&utf16_encode(&name, PROFNAME_CHARS));
        self.update(ctx, |s| {
            s.names[profile as usize] = truncated;
            Ok(())
        })
    }

    fn supported_axes(&self) -> Vec<Axis> {
        self.axes.clone()
    }

    fn supported_resolutions(&self) -> Vec<u32> {
        resolution_steps(RES_STEP, RES_MAX)
    }

    fn supported_freqs(&self) -> Vec<Frequency> {
        vec![Frequency::Hz1000, Frequency::Hz500, Frequency::Hz125]
    }

    fn supported_dpimappings(&self) -> Vec<DpiMapping> {
        self.s.mappings.clone()
    }

    fn change_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        nr: u32,
        dim: Dimension,
        res: u32,
    ) -> Result<()> {
        let idx = self.s.mapping_index(nr)?;
        if !self.s.mappings[idx].uses(dim) {
            return Err(Error::InvalidArgument(format!("mapping {nr} has no dimension {dim:?}")));
        }
        check_resolution(res, RES_STEP, RES_MAX)?;
        if res % RES_STEP != 0 {
            return Err(Error::InvalidArgument(format!(
                "resolution {res} is not a multiple of {RES_STEP}"
            )));
        }
        self.update(ctx, |s| {
            s.mappings[idx].res[dim.index()] = res;
            Ok(())
        })
    }

    fn supported_buttons(&self) -> Vec<Button> {
        BUTTONS.to_vec()
    }

    fn supported_button_functions(&self) -> Vec<ButtonFunction> {
        FUNCTIONS.to_vec()
    }

    fn profile_leds(&self, profile: u32) -> Vec<Led> {
        let Some(states) = self.s.leds.get(profile as usize) else {
            return Vec::new();
        };
        states
            .iter()
            .enumerate()
            .map(|(j, on)| {
                let mut led = Led::simple(j as u32, M::LED_NAMES[j], *on);
                if M::RGB_LEDS {
                    led.color = Some(self.s.colors[profile as usize][j]);
                }
                led
            })
            .collect()
    }

    fn set_led_state(
        &mut self,
        ctx: &mut UsbContext,
        profile: Option<u32>,
        led: u32,
        state: LedState,
    ) -> Result<()> {
        let p = self.led_profile(profile)?;
        if led as usize >= NR_LEDS {
            return Err(Error::InvalidArgument(format!("no LED {led}")));
        }
        if state == LedState::Unknown {
            return Err(Error::InvalidArgument("LED state must be on or off".into()));
        }
        self.update(ctx, |s| {
            s.leds[p][led as usize] = state.is_on();
            Ok(())
        })
    }

    fn set_led_color(
        &mut self,
        ctx: &mut UsbContext,
        profile: Option<u32>,
        led: u32,
        color: RgbColor,
    ) -> Result<()> {
        if !M::RGB_LEDS {
            return Err(Error::NotSupported("LED color"));
        }
        let p = self.led_profile(profile)?;
        if led as usize >= NR_LEDS {
            return Err(Error::InvalidArgument(format!("no LED {led}")));
        }
        self.update(ctx, |s| {
            s.colors[p][led as usize] = color;
            Ok(())
        })
    }

    /// The frequency is global; every profile reports the same value.
    fn freq(&self, profile: u32) -> Option<Frequency> {
        (profile < NR_PROFILES).then_some(self.s.freq)
    }

    fn set_freq(&mut self, ctx: &mut UsbContext, profile: u32, freq: Frequency) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        check_freq(freq, Frequency::ALL)?;
        self.update(ctx, |s| {
            s.freq = freq;
            Ok(())
        })
    }

    fn dpimapping(&self, profile: u32, _axis: Option<u32>) -> Option<DpiMapping> {
        if profile >= NR_PROFILES {
            return None;
        }
        self.s.current(profile).ok().cloned()
    }

    fn set_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        profile: u32,
        _axis: Option<u32>,
        nr: u32,
    ) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        let m = find_mapping(&self.s.mappings, nr)?;
        if !m.valid_for_profile(profile) || m.profile_mask == 0 {
            return Err(Error::InvalidArgument(format!(
                "mapping {nr} does not belong to profile {profile}"
            )));
        }
        self.update(ctx, |s| {
            s.cur_mapping[profile as usize] = nr;
            Ok(())
        })
    }

    fn button_function(&self, profile: u32, button: u8) -> Option<ButtonFunction> {
        let mappings = self.s.buttons.get(profile as usize)?;
        let button = BUTTONS.iter().find(|b| b.id == button)?;
        function_by_button(mappings, &FUNCTIONS, button).copied()
    }

    fn set_button_function(
        &mut self,
        ctx: &mut UsbContext,
        profile: u32,
        button: u8,
        function: u8,
    ) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        if !FUNCTIONS.iter().any(|f| f.id == function) {
            return Err(Error::InvalidArgument(format!("no button function 0x{function:02X}")));
        }
        self.update(ctx, |s| {
            let m = mapping_by_physical_mut(&mut s.buttons[profile as usize], button)
                .ok_or_else(|| Error::InvalidArgument(format!("no button 0x{button:02X}")))?;
            m.logical = function;
            Ok(())
        })
    }
}
