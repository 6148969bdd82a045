//! Lachesis (classic): five hardware profiles, a shared table of five
//! changeable DPI mappings, 11 remappable buttons.

use crate::buttonmapping::{
    self, function_by_button, mapping_by_physical_mut, Button, ButtonFunction, ButtonMapping,
};
use crate::driver::{check_freq, check_profile, check_resolution, find_mapping, MouseDriver};
use crate::error::{Error, Result};
use crate::identity::usb_idstr;
use crate::model::{Axis, Dimension, DpiMapping, Frequency, Led, LedState, MouseType};
use crate::usb::{
    UsbContext, REQTYPE_CLASS_IFACE_IN, REQTYPE_CLASS_IFACE_OUT, REQ_CLEAR_FEATURE,
    REQ_SET_CONFIGURATION,
};
use crate::util::{be16, le16, put_le16, xor16_checksum};
use tracing::{debug, error};

pub const NR_PROFILES: u32 = 5;
const NR_MAPPINGS: usize = 5;
const RES_STEP: u32 = 125;
const RES_MAX: u32 = 4000;

const LED_SCROLL: u32 = 0;
const LED_LOGO: u32 = 1;

const CMD_PROFCFG_WRITE: u16 = 0x01;
const CMD_STATUS: u16 = 0x02;
const CMD_PROFCFG_READ: u16 = 0x03;
const CMD_LEDS_WRITE: u16 = 0x04;
const CMD_LEDS_READ: u16 = 0x05;
const CMD_FW_VERSION: u16 = 0x06;
const CMD_SELECT_PROFILE: u16 = 0x08;
const CMD_CUR_PROFILE: u16 = 0x09;
const CMD_STARTUP: u16 = 0x0F;
const CMD_DPIMAP_READ: u16 = 0x10;
const CMD_DPIMAP_WRITE: u16 = 0x12;

const TRANSFER_DELAY_MS: u64 = 5;

pub const PROFCFG_LEN: usize = 0x18C;
const PROFCFG_MAGIC: u16 = 0x0002;
const BUTTONMAP_OFFSET: usize = 9;
const BUTTONMAP_SPACING: usize = 33;
const NR_BUTTONS: usize = 11;
const BUTTONMAP_LEN: usize = (2 + BUTTONMAP_SPACING) * NR_BUTTONS;

pub const DPIMAP_LEN: usize = 0x60;
const DPIMAP_MAGIC: u8 = 0x01;

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

/// This firmware numbers the profile and Windows buttons differently.
const FUNCTIONS: [ButtonFunction; 16] = [
    buttonmapping::LEFT,
    buttonmapping::RIGHT,
    buttonmapping::MIDDLE,
    ButtonFunction::new(0x1A, "Profile switch up"),
    ButtonFunction::new(0x1B, "Profile switch down"),
    buttonmapping::DPIUP,
    buttonmapping::DPIDOWN,
    buttonmapping::DPI1,
    buttonmapping::DPI2,
    buttonmapping::DPI3,
    buttonmapping::DPI4,
    buttonmapping::DPI5,
    ButtonFunction::new(0x0A, "Windows button 4"),
    ButtonFunction::new(0x0B, "Windows button 5"),
    buttonmapping::SCROLLUP,
    buttonmapping::SCROLLDWN,
];

fn freq_code(freq: Frequency) -> u8 {
    match freq {
        Frequency::Hz1000 => 1,
        Frequency::Hz500 => 2,
        Frequency::Hz125 => 3,
    }
}

fn freq_from_code(code: u8) -> Option<Frequency> {
    match code {
        1 => Some(Frequency::Hz1000),
        2 => Some(Frequency::Hz500),
        3 => Some(Frequency::Hz125),
        _ => None,
    }
}

/// One profile as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileConfig {
    /// 1-based.
    pub profile: u8,
    /// 1-based index into the DPI table.
    pub dpisel: u8,
    pub freq: u8,
    pub buttons: Vec<ButtonMapping>,
}

impl ProfileConfig {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; PROFCFG_LEN];
        put_le16(&mut buf, 0, PROFCFG_LEN as u16);
        put_le16(&mut buf, 2, PROFCFG_MAGIC);
        buf[4] = self.profile;
        buf[6] = self.dpisel;
        buf[7] = self.freq;
        buttonmapping::encode(
            &mut buf[BUTTONMAP_OFFSET..BUTTONMAP_OFFSET + BUTTONMAP_LEN],
            &self.buttons,
            BUTTONMAP_SPACING,
        )?;
        let csum = xor16_checksum(&buf[..PROFCFG_LEN - 2]);
        put_le16(&mut buf, PROFCFG_LEN - 2, csum);
        Ok(buf)
    }

    /// Parse a profile read from the device, filling `template` with the
    /// logical ids of its buttons.
    pub fn decode(buf: &[u8], template: &[ButtonMapping]) -> Result<Self> {
        if buf.len() < PROFCFG_LEN {
            return Err(Error::Decode(format!("profile config of {} bytes", buf.len())));
        }
        let mut buttons = template.to_vec();
        buttonmapping::decode_into(
            &buf[BUTTONMAP_OFFSET..BUTTONMAP_OFFSET + BUTTONMAP_LEN],
            &mut buttons,
            BUTTONMAP_SPACING,
        )?;
        debug!(
            magic = format_args!("0x{:04X}", le16(buf, 2)),
            profile = buf[4],
            freq = buf[7],
            dpisel = buf[6],
            "Lachesis profile config"
        );
        Ok(Self {
            profile: buf[4],
            dpisel: buf[6],
            freq: buf[7],
            buttons,
        })
    }
}

fn encode_dpimap(mappings: &[DpiMapping]) -> [u8; DPIMAP_LEN] {
    let mut buf = [0u8; DPIMAP_LEN];
    for (i, m) in mappings.iter().take(NR_MAPPINGS).enumerate() {
        let v = (m.res[0] / RES_STEP).saturating_sub(1) as u8;
        buf[i * 3] = DPIMAP_MAGIC;
        buf[i * 3 + 1] = v;
        buf[i * 3 + 2] = v;
    }
    buf
}

fn decode_dpimap(buf: &[u8; DPIMAP_LEN], mappings: &mut [DpiMapping]) {
    for (i, m) in mappings.iter_mut().take(NR_MAPPINGS).enumerate() {
        m.res[0] = (u32::from(buf[i * 3 + 1]) + 1) * RES_STEP;
    }
}

#[derive(Debug, Clone)]
struct Settings {
    leds: [bool; 2],
    cur_profile: u32,
    mappings: Vec<DpiMapping>,
    cur_mapping: [u32; NR_PROFILES as usize],
    freq: [Frequency; NR_PROFILES as usize],
    buttons: Vec<Vec<ButtonMapping>>,
}

impl Settings {
    fn new() -> Self {
        let template: Vec<ButtonMapping> =
            BUTTONS.iter().map(|b| ButtonMapping::new(b.id, 0)).collect();
        Self {
            leds: [true, true],
            cur_profile: 0,
            mappings: (0..NR_MAPPINGS as u32)
                .map(|nr| DpiMapping::single(nr, 0).changeable())
                .collect(),
            cur_mapping: [0; NR_PROFILES as usize],
            freq: [Frequency::Hz1000; NR_PROFILES as usize],
            buttons: vec![template; NR_PROFILES as usize],
        }
    }
}

pub struct Lachesis {
    idstr: String,
    fw_version: u16,
    axes: Vec<Axis>,
    s: Settings,
}

impl Lachesis {
    pub fn new() -> Self {
        Self {
            idstr: String::new(),
            fw_version: 0,
            axes: vec![
                Axis::new(0, "X", false),
                Axis::new(1, "Y", false),
                Axis::new(2, "Scroll", false),
            ],
            s: Settings::new(),
        }
    }

    fn write(ctx: &mut UsbContext, cmd: u16, data: &[u8]) -> Result<()> {
        ctx.control_write(REQTYPE_CLASS_IFACE_OUT, REQ_SET_CONFIGURATION, cmd, 0, data)?;
        ctx.msleep(TRANSFER_DELAY_MS);
        Ok(())
    }

    fn read(ctx: &mut UsbContext, cmd: u16, index: u16, buf: &mut [u8]) -> Result<()> {
        ctx.control_read(REQTYPE_CLASS_IFACE_IN, REQ_CLEAR_FEATURE, cmd, index, buf)?;
        ctx.msleep(TRANSFER_DELAY_MS);
        Ok(())
    }

    fn read_fw_version(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let mut buf = [0u8; 2];
        Self::read(ctx, CMD_FW_VERSION, 0, &mut buf)?;
        self.fw_version = be16(&buf, 0);
        Ok(())
    }

    fn read_config(&mut self, ctx: &mut UsbContext) -> Result<()> {
        Self::write(ctx, CMD_STARTUP, &[0x01])?;

        let mut value = [0u8; 1];
        Self::read(ctx, CMD_CUR_PROFILE, 0, &mut value)?;
        if value[0] < 1 || u32::from(value[0]) > NR_PROFILES {
            error!(profile = value[0], "Lachesis reported an invalid profile number");
            return Err(Error::Protocol(format!("invalid profile number {}", value[0])));
        }
        self.s.cur_profile = u32::from(value[0]) - 1;

        for i in 0..NR_PROFILES as usize {
            Self::write(ctx, CMD_SELECT_PROFILE, &[i as u8 + 1])?;
            let mut buf = vec![0u8; PROFCFG_LEN];
            Self::read(ctx, CMD_PROFCFG_READ, 1, &mut buf)?;
            let cfg = ProfileConfig::decode(&buf, &self.s.buttons[i])?;
            if cfg.dpisel < 1 || usize::from(cfg.dpisel) > NR_MAPPINGS {
                error!(profile = i + 1, dpisel = cfg.dpisel, "invalid DPI selection");
                return Err(Error::Protocol(format!("invalid DPI selection {}", cfg.dpisel)));
            }
            self.s.cur_mapping[i] = u32::from(cfg.dpisel) - 1;
            self.s.freq[i] = freq_from_code(cfg.freq).ok_or_else(|| {
                error!(profile = i + 1, freq = cfg.freq, "invalid frequency value");
                Error::Protocol(format!("invalid frequency code {}", cfg.freq))
            })?;
            self.s.buttons[i] = cfg.buttons;
        }
        Self::write(ctx, CMD_SELECT_PROFILE, &[self.s.cur_profile as u8 + 1])?;

        Self::read(ctx, CMD_LEDS_READ, 0, &mut value)?;
        self.s.leds[LED_LOGO as usize] = value[0] & 0x01 != 0;
        self.s.leds[LED_SCROLL as usize] = value[0] & 0x02 != 0;

        let mut dpimap = [0u8; DPIMAP_LEN];
        Self::read(ctx, CMD_DPIMAP_READ, 0, &mut dpimap)?;
        decode_dpimap(&dpimap, &mut self.s.mappings);
        Ok(())
    }

    fn do_commit(ctx: &mut UsbContext, s: &Settings) -> Result<()> {
        for i in 0..NR_PROFILES as usize {
            let cfg = ProfileConfig {
                profile: i as u8 + 1,
                dpisel: (s.cur_mapping[i] % 10) as u8 + 1,
                freq: freq_code(s.freq[i]),
                buttons: s.buttons[i].clone(),
            };
            Self::write(ctx, CMD_PROFCFG_WRITE, &cfg.encode()?)?;
            let mut status = [0u8; 1];
            Self::read(ctx, CMD_STATUS, 0, &mut status)?;
            if status[0] != 1 {
                error!(profile = i + 1, status = status[0], "failed to commit Lachesis profile");
                return Err(Error::Protocol(format!(
                    "profile {} commit status {}",
                    i + 1,
                    status[0]
                )));
            }
        }

        let mut leds = 0u8;
        if s.leds[LED_LOGO as usize] {
            leds |= 0x01;
        }
        if s.leds[LED_SCROLL as usize] {
            leds |= 0x02;
        }
        Self::write(ctx, CMD_LEDS_WRITE, &[leds])?;
        Self::write(ctx, CMD_SELECT_PROFILE, &[s.cur_profile as u8 + 1])?;
        Self::write(ctx, CMD_DPIMAP_WRITE, &encode_dpimap(&s.mappings))
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
        self.read_fw_version(ctx).map_err(|e| {
            error!("failed to get Lachesis firmware version: {}", e);
            e
        })?;
        self.read_config(ctx).map_err(|e| {
            error!("failed to read the Lachesis configuration: {}", e);
            e
        })?;
        self.idstr = usb_idstr(ctx, "Lachesis Classic", true, None);
        Self::do_commit(ctx, &self.s).map_err(|e| {
            error!("failed to commit initial Lachesis settings: {}", e);
            e
        })
    }
}

impl Default for Lachesis {
    fn default() -> Self {
        Self::new()
    }
}

impl MouseDriver for Lachesis {
    fn init(&mut self, ctx: &mut UsbContext) -> Result<()> {
        ctx.add_used_interface(0, 0)?;
        ctx.add_used_interface(1, 0)?;
        ctx.claim_refcount()?;
        let res = self.init_claimed(ctx);
        ctx.release_refcount();
        res?;
        debug!(
            idstr = %self.idstr,
            fw = format_args!("{}.{:02}", self.fw_version >> 8, self.fw_version & 0xFF),
            "Lachesis initialized"
        );
        Ok(())
    }

    fn mouse_type(&self) -> MouseType {
        MouseType::Lachesis
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

    fn supported_axes(&self) -> Vec<Axis> {
        self.axes.clone()
    }

    fn supported_resolutions(&self) -> Vec<u32> {
        crate::model::resolution_steps(RES_STEP, RES_MAX)
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
        let idx = self
            .s
            .mappings
            .iter()
            .position(|m| m.nr == nr)
            .ok_or_else(|| Error::InvalidArgument(format!("no DPI mapping {nr}")))?;
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

    fn global_leds(&self) -> Vec<Led> {
        vec![
            Led::simple(LED_SCROLL, "Scrollwheel", self.s.leds[LED_SCROLL as usize]),
            Led::simple(LED_LOGO, "GlowingLogo", self.s.leds[LED_LOGO as usize]),
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

    fn freq(&self, profile: u32) -> Option<Frequency> {
        self.s.freq.get(profile as usize).copied()
    }

    fn set_freq(&mut self, ctx: &mut UsbContext, profile: u32, freq: Frequency) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        check_freq(freq, Frequency::ALL)?;
        self.update(ctx, |s| {
            s.freq[profile as usize] = freq;
            Ok(())
        })
    }

    fn dpimapping(&self, profile: u32, _axis: Option<u32>) -> Option<DpiMapping> {
        let nr = *self.s.cur_mapping.get(profile as usize)?;
        find_mapping(&self.s.mappings, nr).ok().cloned()
    }

    fn set_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        profile: u32,
        _axis: Option<u32>,
        nr: u32,
    ) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        if find_mapping(&self.s.mappings, nr)?.profile_mask != 0 {
            return Err(Error::InvalidArgument(format!("mapping {nr} is profile bound")));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::{context_for, ControlTransfer, MockDevice};

    fn default_buttons() -> Vec<ButtonMapping> {
        BUTTONS.iter().map(|b| ButtonMapping::new(b.id, b.id)).collect()
    }

    /// Device that answers readbacks with profile N on dpisel N, 500 Hz,
    /// identity button map, both LEDs on and a 375/750/1500/2000/4000 table.
    fn device() -> MockDevice {
        device_with_status(1)
    }

    fn device_with_status(status: u8) -> MockDevice {
        MockDevice::new(2, 3, 0x1532, 0x000C).with_responder(move |xfer: &ControlTransfer, writes: &[ControlTransfer]| {
            match xfer.value {
                CMD_FW_VERSION => vec![0x01, 0x10],
                CMD_CUR_PROFILE => vec![2],
                CMD_PROFCFG_READ => {
                    let selected = writes
                        .iter()
                        .rev()
                        .find(|w| w.value == CMD_SELECT_PROFILE)
                        .map(|w| w.data[0])
                        .unwrap_or(1);
                    ProfileConfig {
                        profile: selected,
                        dpisel: selected,
                        freq: 2,
                        buttons: default_buttons(),
                    }
                    .encode()
                    .unwrap()
                }
                CMD_LEDS_READ => vec![0x03],
                CMD_DPIMAP_READ => {
                    let mut maps = vec![0u8; DPIMAP_LEN];
                    for (i, res) in [375u32, 750, 1500, 2000, 4000].iter().enumerate() {
                        maps[i * 3] = DPIMAP_MAGIC;
                        maps[i * 3 + 1] = (res / 125 - 1) as u8;
                        maps[i * 3 + 2] = (res / 125 - 1) as u8;
                    }
                    maps
                }
                CMD_STATUS => vec![status],
                _ => vec![0; xfer.length],
            }
        })
    }

    fn ready() -> (MockDevice, UsbContext, Lachesis) {
        let dev = device();
        let (_bus, mut ctx) = context_for(&dev);
        let mut l = Lachesis::new();
        l.init(&mut ctx).unwrap();
        ctx.claim().unwrap();
        dev.clear_log();
        (dev, ctx, l)
    }

    #[test]
    fn profile_config_packet_layout() {
        let cfg = ProfileConfig {
            profile: 3,
            dpisel: 2,
            freq: 1,
            buttons: default_buttons(),
        };
        let buf = cfg.encode().unwrap();
        assert_eq!(buf.len(), PROFCFG_LEN);
        assert_eq!(le16(&buf, 0), 0x18C);
        assert_eq!(le16(&buf, 2), PROFCFG_MAGIC);
        assert_eq!((buf[4], buf[6], buf[7]), (3, 2, 1));
        assert_eq!(&buf[9..11], &[0x01, 0x01]);
        assert_eq!(&buf[9 + 35..9 + 37], &[0x02, 0x02]);
        assert_eq!(xor16_checksum(&buf), 0);
        assert_eq!(ProfileConfig::decode(&buf, &default_buttons()).unwrap(), cfg);
    }

    #[test]
    fn dpimap_table_survives_write_and_readback() {
        let table: Vec<DpiMapping> = [125u32, 1000, 2250, 3875, 4000]
            .iter()
            .enumerate()
            .map(|(nr, res)| DpiMapping::single(nr as u32, *res).changeable())
            .collect();
        let buf = encode_dpimap(&table);
        assert_eq!(&buf[..6], &[DPIMAP_MAGIC, 0, 0, DPIMAP_MAGIC, 7, 7]);
        let mut read = Settings::new().mappings;
        decode_dpimap(&buf, &mut read);
        let res: Vec<u32> = read.iter().map(|m| m.res[0]).collect();
        assert_eq!(res, vec![125, 1000, 2250, 3875, 4000]);
    }

    #[test]
    fn init_reads_back_hardware_state() {
        let dev = device();
        let (_bus, mut ctx) = context_for(&dev);
        let mut l = Lachesis::new();
        l.init(&mut ctx).unwrap();
        assert_eq!(l.fw_version(), Some(0x0110));
        assert_eq!(l.idstr(), "Mouse:Lachesis Classic:USB-002-003:1532-000C-0");
        assert_eq!(l.active_profile(), Some(1));
        assert_eq!(l.dpimapping(0, None).unwrap().res[0], 375);
        assert_eq!(l.dpimapping(4, None).unwrap().res[0], 4000);
        assert_eq!(l.freq(3), Some(Frequency::Hz500));
        assert_eq!(l.button_function(0, 0x0A).unwrap().name, "Windows button 4");
        assert!(l.button_function(0, 0x04).is_none());
        assert!(!ctx.is_claimed());
    }

    #[test]
    fn commit_sequence() {
        let (dev, mut ctx, mut l) = ready();
        l.commit(&mut ctx, true).unwrap();
        let values: Vec<u16> = dev.writes().iter().map(|w| w.value).collect();
        assert_eq!(
            values,
            vec![1, 1, 1, 1, 1, CMD_LEDS_WRITE, CMD_SELECT_PROFILE, CMD_DPIMAP_WRITE]
        );
        let w = dev.writes();
        assert_eq!(w[5].data, vec![0x03]);
        assert_eq!(w[6].data, vec![2]);
        assert_eq!(&w[7].data[..6], &[0x01, 2, 2, 0x01, 5, 5]);
        assert_eq!(w[7].data.len(), DPIMAP_LEN);
    }

    #[test]
    fn rejected_profile_commit_fails_init() {
        let dev = device_with_status(0);
        let (_bus, mut ctx) = context_for(&dev);
        let mut l = Lachesis::new();
        assert!(matches!(l.init(&mut ctx), Err(Error::Protocol(_))));
        assert!(!ctx.is_claimed());
    }

    #[test]
    fn frequency_setter_commits() {
        let (dev, mut ctx, mut l) = ready();
        l.set_freq(&mut ctx, 0, Frequency::Hz125).unwrap();
        assert_eq!(l.freq(0), Some(Frequency::Hz125));
        assert_eq!(dev.writes()[0].data[7], 3);
    }

    #[test]
    fn failed_commit_rolls_back() {
        let (dev, mut ctx, mut l) = ready();
        dev.set_fail_writes(true);
        assert!(l.set_button_function(&mut ctx, 0, 0x01, 0x1A).is_err());
        assert_eq!(l.button_function(0, 0x01).unwrap().id, 0x01);
        assert!(l.change_dpimapping(&mut ctx, 0, Dimension::X, 1000).is_err());
        assert_eq!(l.supported_dpimappings()[0].res[0], 375);
    }

    #[test]
    fn dpi_changes_validate() {
        let (dev, mut ctx, mut l) = ready();
        assert!(l.change_dpimapping(&mut ctx, 0, Dimension::Y, 1000).is_err());
        assert!(l.change_dpimapping(&mut ctx, 0, Dimension::X, 1010).is_err());
        assert!(l.change_dpimapping(&mut ctx, 0, Dimension::X, 4125).is_err());
        l.change_dpimapping(&mut ctx, 0, Dimension::X, 1000).unwrap();
        let last = dev.writes().pop().unwrap();
        assert_eq!(&last.data[..3], &[0x01, 7, 7]);
    }

    #[test]
    fn button_remap_checks_ids() {
        let (_dev, mut ctx, mut l) = ready();
        assert!(l.set_button_function(&mut ctx, 0, 0x0C, 0x01).is_err());
        assert!(l.set_button_function(&mut ctx, 0, 0x01, 0x04).is_err());
        l.set_button_function(&mut ctx, 2, 0x0A, 0x0C).unwrap();
        assert_eq!(l.button_function(2, 0x0A).unwrap().name, "DPI mapping up");
        assert!(l.set_active_profile(&mut ctx, 5).is_err());
    }
}
