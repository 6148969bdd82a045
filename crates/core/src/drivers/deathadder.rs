//! DeathAdder (classic): one-byte commands per setting.

use crate::driver::{check_freq, find_mapping, MouseDriver};
use crate::error::{Error, Result};
use crate::identity::usb_idstr;
use crate::model::{DpiMapping, Frequency, Led, LedState, MouseType};
use crate::usb::{
    UsbContext, REQTYPE_CLASS_IFACE_IN, REQTYPE_CLASS_IFACE_OUT, REQ_CLEAR_FEATURE,
    REQ_SET_CONFIGURATION,
};
use crate::util::be16;
use tracing::{debug, error};

const CMD_FW_VERSION: u16 = 0x05;
const CMD_LEDS: u16 = 0x06;
const CMD_FREQ: u16 = 0x07;
const CMD_RES: u16 = 0x09;

const LED_SCROLL: u32 = 0;
const LED_LOGO: u32 = 1;

pub struct DeathAdder {
    product_id: u16,
    idstr: String,
    fw_version: u16,
    leds: [bool; 2],
    freq: Frequency,
    mappings: Vec<DpiMapping>,
    cur_mapping: u32,
}

impl DeathAdder {
    pub fn new(product_id: u16) -> Self {
        Self {
            product_id,
            idstr: String::new(),
            fw_version: 0,
            leds: [true, true],
            freq: Frequency::Hz1000,
            mappings: vec![
                DpiMapping::single(0, 450),
                DpiMapping::single(1, 900),
                DpiMapping::single(2, 1800),
            ],
            cur_mapping: 2,
        }
    }

    fn write(&self, ctx: &mut UsbContext, cmd: u16, value: u8) -> Result<()> {
        ctx.control_write(REQTYPE_CLASS_IFACE_OUT, REQ_SET_CONFIGURATION, cmd, 0, &[value])
    }

    fn read_fw_version(&self, ctx: &mut UsbContext) -> Result<u16> {
        let mut buf = [0u8; 2];
        ctx.control_read(REQTYPE_CLASS_IFACE_IN, REQ_CLEAR_FEATURE, CMD_FW_VERSION, 0, &mut buf)?;
        Ok(be16(&buf, 0))
    }

    fn commit_leds(&self, ctx: &mut UsbContext) -> Result<()> {
        let mut value = 0u8;
        if self.leds[LED_LOGO as usize] {
            value |= 0x01;
        }
        if self.leds[LED_SCROLL as usize] {
            value |= 0x02;
        }
        self.write(ctx, CMD_LEDS, value)
    }

    fn commit_freq(&self, ctx: &mut UsbContext) -> Result<()> {
        let value = match self.freq {
            Frequency::Hz125 => 3,
            Frequency::Hz500 => 2,
            Frequency::Hz1000 => 1,
        };
        self.write(ctx, CMD_FREQ, value)
    }

    fn commit_resolution(&self, ctx: &mut UsbContext) -> Result<()> {
        let value = match find_mapping(&self.mappings, self.cur_mapping)?.res[0] {
            450 => 3,
            900 => 2,
            1800 => 1,
            other => return Err(Error::InvalidArgument(format!("resolution {other}"))),
        };
        self.write(ctx, CMD_RES, value)
    }

    fn commit_all(&self, ctx: &mut UsbContext) -> Result<()> {
        self.commit_leds(ctx)?;
        self.commit_freq(ctx)?;
        self.commit_resolution(ctx)
    }
}

impl MouseDriver for DeathAdder {
    fn init(&mut self, ctx: &mut UsbContext) -> Result<()> {
        ctx.add_used_interface(0, 0)?;
        ctx.claim_refcount()?;
        let res = self.read_fw_version(ctx).and_then(|fw| {
            self.fw_version = fw;
            self.commit_all(ctx)
        });
        ctx.release_refcount();
        if let Err(e) = res {
            error!(product = format_args!("0x{:04X}", self.product_id), "DeathAdder init failed: {}", e);
            return Err(e);
        }
        self.idstr = usb_idstr(ctx, "DeathAdder", true, None);
        debug!(
            idstr = %self.idstr,
            fw = format_args!("{}.{:02}", self.fw_version >> 8, self.fw_version & 0xFF),
            "DeathAdder initialized"
        );
        Ok(())
    }

    fn mouse_type(&self) -> MouseType {
        MouseType::DeathAdder
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
            self.commit_all(ctx)?;
        }
        Ok(())
    }

    fn supported_resolutions(&self) -> Vec<u32> {
        vec![450, 900, 1800]
    }

    fn supported_freqs(&self) -> Vec<Frequency> {
        Frequency::ALL.to_vec()
    }

    fn supported_dpimappings(&self) -> Vec<DpiMapping> {
        self.mappings.clone()
    }

    fn global_leds(&self) -> Vec<Led> {
        vec![
            Led::simple(LED_SCROLL, "Scrollwheel", self.leds[LED_SCROLL as usize]),
            Led::simple(LED_LOGO, "GlowingLogo", self.leds[LED_LOGO as usize]),
        ]
    }

    fn set_led_state(
        &mut self,
        ctx: &mut UsbContext,
        _profile: Option<u32>,
        led: u32,
        state: LedState,
    ) -> Result<()> {
        ctx.ensure_claimed()?;
        let slot = match led {
            LED_SCROLL | LED_LOGO => led as usize,
            _ => return Err(Error::InvalidArgument(format!("no LED {led}"))),
        };
        if state == LedState::Unknown {
            return Err(Error::InvalidArgument("LED state must be on or off".into()));
        }
        let old = self.leds[slot];
        self.leds[slot] = state.is_on();
        if let Err(e) = self.commit_leds(ctx) {
            self.leds[slot] = old;
            return Err(e);
        }
        Ok(())
    }

    fn freq(&self, _profile: u32) -> Option<Frequency> {
        Some(self.freq)
    }

    fn set_freq(&mut self, ctx: &mut UsbContext, _profile: u32, freq: Frequency) -> Result<()> {
        ctx.ensure_claimed()?;
        check_freq(freq, Frequency::ALL)?;
        let old = self.freq;
        self.freq = freq;
        if let Err(e) = self.commit_freq(ctx) {
            self.freq = old;
            return Err(e);
        }
        Ok(())
    }

    fn dpimapping(&self, _profile: u32, _axis: Option<u32>) -> Option<DpiMapping> {
        find_mapping(&self.mappings, self.cur_mapping).ok().cloned()
    }

    fn set_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        _profile: u32,
        _axis: Option<u32>,
        nr: u32,
    ) -> Result<()> {
        ctx.ensure_claimed()?;
        find_mapping(&self.mappings, nr)?;
        let old = self.cur_mapping;
        self.cur_mapping = nr;
        if let Err(e) = self.commit_resolution(ctx) {
            self.cur_mapping = old;
            return Err(e);
        }
        Ok(())
    }
}
