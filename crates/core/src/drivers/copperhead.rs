//! Copperhead and Boomslang Collector's Edition.
//!
//! Both keep five profiles in a 0x15C byte profile config packet that is
//! uploaded in six 64-byte chunks and verified by reading it back. The
//! Boomslang CE adds two switchable LEDs and a different button layout.

use crate::buttonmapping::{
    self, function_by_button, mapping_by_physical_mut, Button, ButtonFunction, ButtonMapping,
};
use crate::driver::{check_freq, check_profile, find_mapping, MouseDriver};
use crate::error::{Error, Result};
use crate::identity::usb_idstr;
use crate::model::{DpiMapping, Frequency, Led, LedState, MouseType};
use crate::usb::{
    UsbContext, REQTYPE_CLASS_OTHER_IN, REQTYPE_CLASS_OTHER_OUT, REQ_CLEAR_FEATURE,
    REQ_SET_CONFIGURATION,
};
use crate::util::{buffer_is_all_zero, le16, put_le16, xor16_checksum};
use tracing::{debug, error, warn};

pub const NR_PROFILES: u32 = 5;

pub const PROFCFG_LEN: usize = 0x15C;
const PROFCFG_MAGIC: u16 = 0x0002;
const CHUNK_LEN: usize = 64;
const NR_CHUNKS: usize = 6;
/// The reply starts at the `reply_len` field.
const REPLY_OFFSET: usize = 6;
const REPLY_PROFILENR: usize = 10;
const DPISEL: usize = 12;
const FREQ: usize = 13;
const BUTTONMAP_OFFSET: usize = 14;
const BUTTONMAP_SPACING: usize = 46;
const NR_BUTTONS: usize = 7;
const BUTTONMAP_LEN: usize = (2 + BUTTONMAP_SPACING) * NR_BUTTONS - 4;

const VALUE_PROFCFG: u16 = 0x01;
const VALUE_CONTROL: u16 = 0x02;
const INDEX_SELECT: u16 = 1;
const INDEX_LOAD: u16 = 3;
const INDEX_LEDS: u16 = 5;

const LED_SCROLL: u32 = 0;
const LED_GLOWPIPE: u32 = 1;

const COPPERHEAD_BUTTONS: [Button; NR_BUTTONS] = [
    Button::new(0x01, "Leftclick"),
    Button::new(0x02, "Rightclick"),
    Button::new(0x03, "Middleclick"),
    Button::new(0x04, "Leftside front"),
    Button::new(0x05, "Leftside rear"),
    Button::new(0x06, "Rightside front"),
    Button::new(0x07, "Rightside rear"),
];

const BOOMSLANG_BUTTONS: [Button; NR_BUTTONS] = [
    Button::new(0x01, "Leftclick"),
    Button::new(0x02, "Rightclick"),
    Button::new(0x03, "Middleclick"),
    Button::new(0x04, "Leftside button"),
    Button::new(0x05, "Rightside button"),
    Button::new(0x06, "Scroll up"),
    Button::new(0x07, "Scroll down"),
];

const WIN5: ButtonFunction = ButtonFunction::new(0x0A, "Windows Button 5");
const WIN4: ButtonFunction = ButtonFunction::new(0x0B, "Windows Button 4");
const DPIUP: ButtonFunction = ButtonFunction::new(0x0C, "DPI switch up");
const DPIDOWN: ButtonFunction = ButtonFunction::new(0x0D, "DPI switch down");
const SCROLLUP: ButtonFunction = ButtonFunction::new(0x30, "Scroll up");
const SCROLLDOWN: ButtonFunction = ButtonFunction::new(0x31, "Scroll down");

const COPPERHEAD_FUNCTIONS: [ButtonFunction; 7] = [
    buttonmapping::LEFT,
    buttonmapping::RIGHT,
    buttonmapping::MIDDLE,
    DPIUP,
    DPIDOWN,
    WIN5,
    WIN4,
];

const BOOMSLANG_FUNCTIONS: [ButtonFunction; 9] = [
    buttonmapping::LEFT,
    buttonmapping::RIGHT,
    buttonmapping::MIDDLE,
    DPIUP,
    DPIDOWN,
    WIN5,
    WIN4,
    SCROLLUP,
    SCROLLDOWN,
];

/// Which of the two devices is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Copperhead,
    BoomslangCe,
}

impl Model {
    fn name(self) -> &'static str {
        match self {
            Self::Copperhead => "Copperhead",
            Self::BoomslangCe => "Boomslang-CE",
        }
    }

    fn mouse_type(self) -> MouseType {
        match self {
            Self::Copperhead => MouseType::Copperhead,
            Self::BoomslangCe => MouseType::BoomslangCe,
        }
    }

    /// `(dpisel, resolution)`, in mapping order.
    fn dpi_table(self) -> &'static [(u8, u32)] {
        match self {
            Self::Copperhead => &[(4, 400), (3, 800), (2, 1600), (1, 2000)],
            Self::BoomslangCe => &[(4, 400), (3, 800), (2, 1800)],
        }
    }

    fn buttons(self) -> &'static [Button] {
        match self {
            Self::Copperhead => &COPPERHEAD_BUTTONS,
            Self::BoomslangCe => &BOOMSLANG_BUTTONS,
        }
    }

    fn functions(self) -> &'static [ButtonFunction] {
        match self {
            Self::Copperhead => &COPPERHEAD_FUNCTIONS,
            Self::BoomslangCe => &BOOMSLANG_FUNCTIONS,
        }
    }

    /// Factory button map in wire order.
    fn default_buttons(self) -> Vec<ButtonMapping> {
        match self {
            Self::Copperhead => vec![
                ButtonMapping::new(0x01, buttonmapping::func::LEFT),
                ButtonMapping::new(0x02, buttonmapping::func::RIGHT),
                ButtonMapping::new(0x03, buttonmapping::func::MIDDLE),
                ButtonMapping::new(0x04, WIN5.id),
                ButtonMapping::new(0x05, WIN4.id),
                ButtonMapping::new(0x06, DPIUP.id),
                ButtonMapping::new(0x07, DPIDOWN.id),
            ],
            // right side is stored before left side
            Self::BoomslangCe => vec![
                ButtonMapping::new(0x01, buttonmapping::func::LEFT),
                ButtonMapping::new(0x02, buttonmapping::func::RIGHT),
                ButtonMapping::new(0x03, buttonmapping::func::MIDDLE),
                ButtonMapping::new(0x05, WIN4.id),
                ButtonMapping::new(0x04, WIN5.id),
                ButtonMapping::new(0x06, SCROLLUP.id),
                ButtonMapping::new(0x07, SCROLLDOWN.id),
            ],
        }
    }

    fn has_leds(self) -> bool {
        self == Self::BoomslangCe
    }

    /// The Copperhead firmware always returns a clean, correctly ordered map.
    fn strict_buttonmap(self) -> bool {
        self == Self::Copperhead
    }
}

fn freq_code(freq: Frequency) -> u8 {
    match freq {
        Frequency::Hz125 => 3,
        Frequency::Hz500 => 2,
        Frequency::Hz1000 => 1,
    }
}

fn freq_from_code(code: u8) -> Option<Frequency> {
    match code {
        3 => Some(Frequency::Hz125),
        2 => Some(Frequency::Hz500),
        1 => Some(Frequency::Hz1000),
        _ => None,
    }
}

/// Build a profile config packet, zero-padded to the six-chunk upload size.
pub fn encode_profcfg(
    profile: u8,
    dpisel: u8,
    freq: u8,
    buttons: &[ButtonMapping],
) -> Result<[u8; CHUNK_LEN * NR_CHUNKS]> {
    let mut buf = [0u8; CHUNK_LEN * NR_CHUNKS];
    put_le16(&mut buf, 0, PROFCFG_LEN as u16);
    put_le16(&mut buf, 2, PROFCFG_MAGIC);
    put_le16(&mut buf, 4, u16::from(profile));
    put_le16(&mut buf, REPLY_PROFILENR, u16::from(profile));
    buf[DPISEL] = dpisel;
    buf[FREQ] = freq;
    buttonmapping::encode(
        &mut buf[BUTTONMAP_OFFSET..BUTTONMAP_OFFSET + BUTTONMAP_LEN],
        buttons,
        BUTTONMAP_SPACING,
    )?;
    let csum = xor16_checksum(&buf[..PROFCFG_LEN - 2]);
    put_le16(&mut buf, PROFCFG_LEN - 2, csum);
    Ok(buf)
}

#[derive(Debug, Clone)]
struct Settings {
    cur_profile: u32,
    cur_mapping: [u32; NR_PROFILES as usize],
    freq: [Frequency; NR_PROFILES as usize],
    /// Wire order.
    buttons: Vec<Vec<ButtonMapping>>,
    leds: [bool; 2],
}

/// Driver for the profile-config devices.
pub struct ProfCfgMouse {
    model: Model,
    idstr: String,
    mappings: Vec<DpiMapping>,
    s: Settings,
}

impl ProfCfgMouse {
    pub fn new(model: Model) -> Self {
        let mappings = model
            .dpi_table()
            .iter()
            .enumerate()
            .map(|(nr, &(_, res))| DpiMapping::single(nr as u32, res))
            .collect();
        Self {
            model,
            idstr: String::new(),
            mappings,
            s: Settings {
                cur_profile: 0,
                cur_mapping: [0; NR_PROFILES as usize],
                freq: [Frequency::Hz1000; NR_PROFILES as usize],
                buttons: vec![model.default_buttons(); NR_PROFILES as usize],
                leds: [true, true],
            },
        }
    }

    fn write(ctx: &mut UsbContext, value: u16, index: u16, data: &[u8]) -> Result<()> {
        ctx.control_write(REQTYPE_CLASS_OTHER_OUT, REQ_SET_CONFIGURATION, value, index, data)
    }

    fn read(ctx: &mut UsbContext, value: u16, buf: &mut [u8]) -> Result<()> {
        ctx.control_read(REQTYPE_CLASS_OTHER_IN, REQ_CLEAR_FEATURE, value, 0, buf)
    }

    /// Read the reply part of the selected profile's packet and check it.
    fn read_profcfg(ctx: &mut UsbContext) -> Result<[u8; PROFCFG_LEN]> {
        let mut buf = [0u8; PROFCFG_LEN];
        Self::read(ctx, VALUE_PROFCFG, &mut buf[REPLY_OFFSET..])?;
        let csum = xor16_checksum(&buf);
        if csum != 0 {
            return Err(Error::Checksum {
                what: "profile config",
                expected: 0,
                actual: csum,
            });
        }
        Ok(buf)
    }

    fn check_buttonmap(&self, raw: &[u8], decoded: &[ButtonMapping]) -> Result<()> {
        let expected = self.model.default_buttons();
        let order_ok = decoded
            .iter()
            .zip(&expected)
            .all(|(d, e)| d.physical == e.physical);
        let padding_ok = (0..NR_BUTTONS).all(|i| {
            let start = i * (2 + BUTTONMAP_SPACING) + 2;
            let end = (start + BUTTONMAP_SPACING).min(raw.len());
            buffer_is_all_zero(&raw[start..end])
        });
        if order_ok && padding_ok {
            return Ok(());
        }
        if self.model.strict_buttonmap() {
            error!(order_ok, padding_ok, "{}: invalid button map", self.model.name());
            return Err(Error::Decode("invalid button map".into()));
        }
        warn!(order_ok, padding_ok, "{}: unusual button map", self.model.name());
        Ok(())
    }

    fn read_config(&mut self, ctx: &mut UsbContext) -> Result<()> {
        let mut value = [0u8; 1];
        Self::read(ctx, VALUE_PROFCFG, &mut value)?;
        if value[0] < 1 || u32::from(value[0]) > NR_PROFILES {
            error!(profile = value[0], "{}: invalid profile number", self.model.name());
            return Err(Error::Protocol(format!("invalid profile number {}", value[0])));
        }
        self.s.cur_profile = u32::from(value[0]) - 1;

        for i in 0..NR_PROFILES as usize {
            Self::write(ctx, VALUE_CONTROL, INDEX_LOAD, &[i as u8 + 1])?;
            let buf = Self::read_profcfg(ctx)?;
            let profile = le16(&buf, REPLY_PROFILENR);
            if usize::from(profile) != i + 1 {
                error!(profile, expected = i + 1, "{}: profile config for wrong profile", self.model.name());
                return Err(Error::Protocol(format!("profile config for profile {profile}")));
            }
            let dpisel = buf[DPISEL];
            let nr = self
                .model
                .dpi_table()
                .iter()
                .position(|&(sel, _)| sel == dpisel)
                .ok_or_else(|| {
                    error!(dpisel, "{}: invalid DPI mapping selection", self.model.name());
                    Error::Protocol(format!("invalid DPI selection {dpisel}"))
                })?;
            self.s.cur_mapping[i] = nr as u32;
            self.s.freq[i] = freq_from_code(buf[FREQ]).ok_or_else(|| {
                error!(freq = buf[FREQ], "{}: invalid frequency selection", self.model.name());
                Error::Protocol(format!("invalid frequency code {}", buf[FREQ]))
            })?;
            let raw = &buf[BUTTONMAP_OFFSET..BUTTONMAP_OFFSET + BUTTONMAP_LEN];
            let buttons = buttonmapping::decode(raw, NR_BUTTONS, BUTTONMAP_SPACING)?;
            self.check_buttonmap(raw, &buttons)?;
            self.s.buttons[i] = buttons;
        }
        Ok(())
    }

    fn do_commit(&self, ctx: &mut UsbContext, s: &Settings) -> Result<()> {
        let table = self.model.dpi_table();
        for i in 0..NR_PROFILES as usize {
            let dpisel = table
                .get(s.cur_mapping[i] as usize)
                .map_or(table[0].0, |&(sel, _)| sel);
            let packet = encode_profcfg(i as u8 + 1, dpisel, freq_code(s.freq[i]), &s.buttons[i])?;
            for (j, chunk) in packet.chunks(CHUNK_LEN).enumerate() {
                Self::write(ctx, j as u16 + 1, 0, chunk)?;
            }
            if let Err(e) = Self::write(ctx, VALUE_CONTROL, INDEX_LOAD, &[i as u8 + 1]) {
                warn!(profile = i + 1, "{}: profile load request failed: {}", self.model.name(), e);
            }
            Self::read_profcfg(ctx).map_err(|e| {
                error!(profile = i + 1, "{}: profile commit readback failed: {}", self.model.name(), e);
                e
            })?;
        }

        Self::write(ctx, VALUE_CONTROL, INDEX_SELECT, &[s.cur_profile as u8 + 1])?;

        if self.model.has_leds() {
            let mut leds = 0u8;
            if s.leds[LED_SCROLL as usize] {
                leds |= 0x01;
            }
            if s.leds[LED_GLOWPIPE as usize] {
                leds |= 0x02;
            }
            Self::write(ctx, VALUE_CONTROL, INDEX_LEDS, &[leds])?;
        }
        Ok(())
    }

    fn update<F>(&mut self, ctx: &mut UsbContext, change: F) -> Result<()>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        ctx.ensure_claimed()?;
        let mut next = self.s.clone();
        change(&mut next)?;
        self.do_commit(ctx, &next)?;
        self.s = next;
        Ok(())
    }

    fn init_claimed(&mut self, ctx: &mut UsbContext) -> Result<()> {
        self.read_config(ctx).map_err(|e| {
            error!("{}: failed to read config from hardware: {}", self.model.name(), e);
            e
        })?;
        self.idstr = usb_idstr(ctx, self.model.name(), true, None);
        self.do_commit(ctx, &self.s).map_err(|e| {
            error!("{}: failed to commit initial config: {}", self.model.name(), e);
            e
        })
    }
}

impl MouseDriver for ProfCfgMouse {
    fn init(&mut self, ctx: &mut UsbContext) -> Result<()> {
        ctx.add_used_interface(0, 0)?;
        ctx.add_used_interface(1, 0)?;
        ctx.claim_refcount().map_err(|e| {
            error!("{}: failed to initially claim the device: {}", self.model.name(), e);
            e
        })?;
        let res = self.init_claimed(ctx);
        ctx.release_refcount();
        res?;
        debug!(idstr = %self.idstr, "{} initialized", self.model.name());
        Ok(())
    }

    fn mouse_type(&self) -> MouseType {
        self.model.mouse_type()
    }

    fn idstr(&self) -> &str {
        &self.idstr
    }

    /// The version query is unknown for these devices.
    fn fw_version(&self) -> Option<u16> {
        Some(0)
    }

    fn commit(&mut self, ctx: &mut UsbContext, force: bool) -> Result<()> {
        ctx.ensure_claimed()?;
        if force {
            self.do_commit(ctx, &self.s)?;
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

    fn supported_resolutions(&self) -> Vec<u32> {
        self.model.dpi_table().iter().map(|&(_, res)| res).collect()
    }

    fn supported_freqs(&self) -> Vec<Frequency> {
        vec![Frequency::Hz125, Frequency::Hz500, Frequency::Hz1000]
    }

    fn supported_dpimappings(&self) -> Vec<DpiMapping> {
        self.mappings.clone()
    }

    fn supported_buttons(&self) -> Vec<Button> {
        self.model.buttons().to_vec()
    }

    fn supported_button_functions(&self) -> Vec<ButtonFunction> {
        self.model.functions().to_vec()
    }

    fn global_leds(&self) -> Vec<Led> {
        if !self.model.has_leds() {
            return Vec::new();
        }
        vec![
            Led::simple(LED_SCROLL, "Scrollwheel", self.s.leds[LED_SCROLL as usize]),
            Led::simple(LED_GLOWPIPE, "GlowingPipe", self.s.leds[LED_GLOWPIPE as usize]),
        ]
    }

    fn set_led_state(
        &mut self,
        ctx: &mut UsbContext,
        _profile: Option<u32>,
        led: u32,
        state: LedState,
    ) -> Result<()> {
        if !self.model.has_leds() {
            return Err(Error::NotSupported("LEDs"));
        }
        if led > LED_GLOWPIPE {
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
        find_mapping(&self.mappings, nr).ok().cloned()
    }

    fn set_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        profile: u32,
        _axis: Option<u32>,
        nr: u32,
    ) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        find_mapping(&self.mappings, nr)?;
        self.update(ctx, |s| {
            s.cur_mapping[profile as usize] = nr;
            Ok(())
        })
    }

    fn button_function(&self, profile: u32, button: u8) -> Option<ButtonFunction> {
        let mappings = self.s.buttons.get(profile as usize)?;
        let button = self.model.buttons().iter().find(|b| b.id == button)?;
        function_by_button(mappings, self.model.functions(), button).copied()
    }

    fn set_button_function(
        &mut self,
        ctx: &mut UsbContext,
        profile: u32,
        button: u8,
        function: u8,
    ) -> Result<()> {
        check_profile(profile, NR_PROFILES)?;
        if !self.model.functions().iter().any(|f| f.id == function) {
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
