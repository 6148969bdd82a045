//! The logical device: one enumerated, driver-bound mouse.
//!
//! [`Mouse`] owns the transport context, the boxed driver and, on
//! single-profile hardware, the profile emulation layer. Profile-scoped calls
//! are routed to the emulation when it is installed, everything else goes
//! straight to the driver.

use crate::buttonmapping::{Button, ButtonFunction};
use crate::driver::MouseDriver;
use crate::drivers::DriverKind;
use crate::error::{Error, Result};
use crate::model::{
    Axis, Dimension, DpiMapping, Frequency, Led, LedMode, LedState, MouseFlags, MouseType,
    RgbColor,
};
use crate::profile_emulation::ProfileEmulation;
use crate::usb::{UsbContext, UsbDeviceInfo};
use serde::Serialize;
use tracing::{debug, error};

/// Run `f` under one claim reference.
///
/// Dropping the last reference commits (non-forced) before the real release.
/// The release always happens; the first error wins.
pub(crate) fn with_claim<T, F>(driver: &mut dyn MouseDriver, ctx: &mut UsbContext, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn MouseDriver, &mut UsbContext) -> Result<T>,
{
    ctx.claim_refcount()?;
    let res = f(&mut *driver, &mut *ctx);
    let released = release_one(driver, ctx);
    let out = res?;
    released?;
    Ok(out)
}

fn release_one(driver: &mut dyn MouseDriver, ctx: &mut UsbContext) -> Result<()> {
    let res = if ctx.claim_count() == 1 {
        driver.commit(ctx, false)
    } else {
        Ok(())
    };
    ctx.release_refcount();
    res
}

pub struct Mouse {
    ctx: UsbContext,
    driver: Box<dyn MouseDriver>,
    emu: Option<ProfileEmulation>,
}

impl Mouse {
    /// Bind a driver of `kind` to the device behind `ctx` and run its init.
    ///
    /// A failing init releases everything claimed so far.
    pub fn new(ctx: UsbContext, kind: DriverKind) -> Result<Self> {
        let driver = kind.create(&ctx.device().descriptor);
        Self::with_driver(ctx, driver)
    }

    pub fn with_driver(mut ctx: UsbContext, mut driver: Box<dyn MouseDriver>) -> Result<Self> {
        if let Err(e) = driver.init(&mut ctx) {
            ctx.release_all();
            return Err(e);
        }
        debug!(idstr = %driver.idstr(), "allocated and initialized new mouse");
        Ok(Self {
            ctx,
            driver,
            emu: None,
        })
    }

    /// Fake [`NR_EMULATED_PROFILES`](crate::profile_emulation::NR_EMULATED_PROFILES)
    /// profiles on top of the single hardware one. The initial commit must
    /// succeed.
    pub fn enable_profile_emulation(&mut self) -> Result<()> {
        if self.emu.is_some() {
            return Ok(());
        }
        let emu = ProfileEmulation::install(self.driver.as_mut(), &mut self.ctx)?;
        self.emu = Some(emu);
        debug!(idstr = %self.idstr(), "profile emulation initialized");
        Ok(())
    }

    pub fn is_profile_emulated(&self) -> bool {
        self.emu.is_some()
    }

    pub fn idstr(&self) -> &str {
        self.driver.idstr()
    }

    pub fn mouse_type(&self) -> MouseType {
        self.driver.mouse_type()
    }

    pub fn flags(&self) -> MouseFlags {
        MouseFlags {
            profile_emulated: self.emu.is_some(),
            ..self.driver.flags()
        }
    }

    pub fn fw_version(&self) -> Option<u16> {
        self.driver.fw_version()
    }

    pub fn device(&self) -> &UsbDeviceInfo {
        self.ctx.device()
    }

    pub fn claim_count(&self) -> u32 {
        self.ctx.claim_count()
    }

    pub fn claim(&mut self) -> Result<()> {
        self.ctx.claim_refcount()
    }

    /// Drop one claim reference. The last one commits pending state first;
    /// a commit error is returned, but the release happens regardless.
    pub fn release(&mut self) -> Result<()> {
        release_one(self.driver.as_mut(), &mut self.ctx)
    }

    /// Drop every outstanding claim reference.
    pub fn release_all(&mut self) {
        while self.ctx.claim_count() > 0 {
            if let Err(e) = self.release() {
                error!(idstr = %self.idstr(), "commit on release failed: {}", e);
            }
        }
    }

    pub fn commit(&mut self, force: bool) -> Result<()> {
        self.driver.commit(&mut self.ctx, force)
    }

    pub fn flash_firmware(&mut self, image: &[u8]) -> Result<()> {
        self.driver.flash_firmware(&mut self.ctx, image)
    }

    pub fn nr_profiles(&self) -> u32 {
        match &self.emu {
            Some(emu) => emu.nr_profiles(),
            None => self.driver.nr_profiles(),
        }
    }

    /// Single-profile hardware always reports its only profile as active.
    pub fn active_profile(&self) -> Option<u32> {
        if let Some(emu) = &self.emu {
            return Some(emu.active_profile());
        }
        match self.driver.active_profile() {
            None if self.driver.nr_profiles() == 1 => Some(0),
            other => other,
        }
    }

    pub fn set_active_profile(&mut self, profile: u32) -> Result<()> {
        match &mut self.emu {
            Some(emu) => emu.set_active_profile(self.driver.as_mut(), &mut self.ctx, profile),
            None => self.driver.set_active_profile(&mut self.ctx, profile),
        }
    }

    pub fn profile_name(&self, profile: u32) -> Option<String> {
        match &self.emu {
            Some(_) => None,
            None => self.driver.profile_name(profile),
        }
    }

    pub fn set_profile_name(&mut self, profile: u32, name: &str) -> Result<()> {
        match &self.emu {
            Some(_) => Err(Error::NotSupported("profile names")),
            None => self.driver.set_profile_name(&mut self.ctx, profile, name),
        }
    }

    pub fn supported_axes(&self) -> Vec<Axis> {
        self.driver.supported_axes()
    }

    pub fn supported_resolutions(&self) -> Vec<u32> {
        self.driver.supported_resolutions()
    }

    pub fn supported_freqs(&self) -> Vec<Frequency> {
        self.driver.supported_freqs()
    }

    pub fn supported_dpimappings(&self) -> Vec<DpiMapping> {
        self.driver.supported_dpimappings()
    }

    pub fn change_dpimapping(&mut self, nr: u32, dim: Dimension, res: u32) -> Result<()> {
        self.driver.change_dpimapping(&mut self.ctx, nr, dim, res)
    }

    pub fn supported_buttons(&self) -> Vec<Button> {
        self.driver.supported_buttons()
    }

    pub fn supported_button_functions(&self) -> Vec<ButtonFunction> {
        self.driver.supported_button_functions()
    }

    pub fn global_leds(&self) -> Vec<Led> {
        self.driver.global_leds()
    }

    /// Emulated profiles carry no LEDs of their own.
    pub fn profile_leds(&self, profile: u32) -> Vec<Led> {
        match &self.emu {
            Some(_) => Vec::new(),
            None => self.driver.profile_leds(profile),
        }
    }

    pub fn set_led_state(&mut self, profile: Option<u32>, led: u32, state: LedState) -> Result<()> {
        let profile = self.hw_profile(profile);
        self.driver.set_led_state(&mut self.ctx, profile, led, state)
    }

    pub fn set_led_mode(&mut self, profile: Option<u32>, led: u32, mode: LedMode) -> Result<()> {
        let profile = self.hw_profile(profile);
        self.driver.set_led_mode(&mut self.ctx, profile, led, mode)
    }

    pub fn set_led_color(&mut self, profile: Option<u32>, led: u32, color: RgbColor) -> Result<()> {
        let profile = self.hw_profile(profile);
        self.driver.set_led_color(&mut self.ctx, profile, led, color)
    }

    pub fn freq(&self, profile: u32) -> Option<Frequency> {
        match &self.emu {
            Some(emu) => emu.freq(profile),
            None => self.driver.freq(profile),
        }
    }

    pub fn set_freq(&mut self, profile: u32, freq: Frequency) -> Result<()> {
        match &mut self.emu {
            Some(emu) => emu.set_freq(self.driver.as_mut(), &mut self.ctx, profile, freq),
            None => self.driver.set_freq(&mut self.ctx, profile, freq),
        }
    }

    pub fn dpimapping(&self, profile: u32, axis: Option<u32>) -> Option<DpiMapping> {
        match &self.emu {
            Some(emu) => emu.dpimapping(self.driver.as_ref(), profile, axis),
            None => self.driver.dpimapping(profile, axis),
        }
    }

    pub fn set_dpimapping(&mut self, profile: u32, axis: Option<u32>, nr: u32) -> Result<()> {
        match &mut self.emu {
            Some(emu) => emu.set_dpimapping(self.driver.as_mut(), &mut self.ctx, profile, axis, nr),
            None => self.driver.set_dpimapping(&mut self.ctx, profile, axis, nr),
        }
    }

    pub fn button_function(&self, profile: u32, button: u8) -> Option<ButtonFunction> {
        match &self.emu {
            Some(emu) => emu.button_function(self.driver.as_ref(), profile, button),
            None => self.driver.button_function(profile, button),
        }
    }

    pub fn set_button_function(&mut self, profile: u32, button: u8, function: u8) -> Result<()> {
        match &mut self.emu {
            Some(emu) => {
                emu.set_button_function(self.driver.as_mut(), &mut self.ctx, profile, button, function)
            }
            None => self.driver.set_button_function(&mut self.ctx, profile, button, function),
        }
    }

    /// Emulated profile numbers mean nothing to the hardware, which only has
    /// its single profile.
    fn hw_profile(&self, profile: Option<u32>) -> Option<u32> {
        match &self.emu {
            Some(_) => profile.map(|_| 0),
            None => profile,
        }
    }

    /// Snapshot of everything the mouse exposes.
    pub fn info(&self) -> MouseInfo {
        let active = self.active_profile();
        let axes = self.supported_axes();
        let buttons = self.supported_buttons();
        let profiles = (0..self.nr_profiles())
            .map(|nr| {
                let mut dpimappings = Vec::new();
                if axes.is_empty() {
                    if let Some(m) = self.dpimapping(nr, None) {
                        dpimappings.push(AxisMapping { axis: None, mapping: m.nr });
                    }
                } else {
                    for axis in &axes {
                        if let Some(m) = self.dpimapping(nr, Some(axis.id)) {
                            dpimappings.push(AxisMapping {
                                axis: Some(axis.id),
                                mapping: m.nr,
                            });
                        }
                    }
                }
                ProfileInfo {
                    nr,
                    name: self.profile_name(nr),
                    active: active == Some(nr),
                    freq: self.freq(nr),
                    dpimappings,
                    buttons: buttons
                        .iter()
                        .filter_map(|b| {
                            self.button_function(nr, b.id).map(|f| ButtonAssignment {
                                button: *b,
                                function: f,
                            })
                        })
                        .collect(),
                    leds: self.profile_leds(nr),
                }
            })
            .collect();
        MouseInfo {
            idstr: self.idstr().to_string(),
            mouse_type: self.mouse_type(),
            flags: self.flags(),
            fw_version: self
                .fw_version()
                .map(|v| format!("{}.{:02X}", v >> 8, v & 0xFF)),
            nr_profiles: self.nr_profiles(),
            active_profile: active,
            axes,
            resolutions: self.supported_resolutions(),
            freqs: self.supported_freqs(),
            dpimappings: self.supported_dpimappings(),
            buttons,
            button_functions: self.supported_button_functions(),
            leds: self.global_leds(),
            profiles,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AxisMapping {
    pub axis: Option<u32>,
    pub mapping: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ButtonAssignment {
    pub button: Button,
    pub function: ButtonFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileInfo {
    pub nr: u32,
    pub name: Option<String>,
    pub active: bool,
    pub freq: Option<Frequency>,
    pub dpimappings: Vec<AxisMapping>,
    pub buttons: Vec<ButtonAssignment>,
    pub leds: Vec<Led>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MouseInfo {
    pub idstr: String,
    pub mouse_type: MouseType,
    pub flags: MouseFlags,
    pub fw_version: Option<String>,
    pub nr_profiles: u32,
    pub active_profile: Option<u32>,
    pub axes: Vec<Axis>,
    pub resolutions: Vec<u32>,
    pub freqs: Vec<Frequency>,
    pub dpimappings: Vec<DpiMapping>,
    pub buttons: Vec<Button>,
    pub button_functions: Vec<ButtonFunction>,
    pub leds: Vec<Led>,
    pub profiles: Vec<ProfileInfo>,
}

#[cfg(test)]
pub(crate) mod mock {
    //! A scripted driver for exercising the generic layers.

    use super::*;
    use crate::buttonmapping;
    use std::sync::{Arc, Mutex};

    /// What the driver saw, shared with the test.
    #[derive(Debug, Default)]
    pub struct Log {
        pub calls: Vec<String>,
        pub commits: Vec<bool>,
        pub fail_sets: bool,
        pub fail_init: bool,
    }

    pub struct MockDriver {
        pub log: Arc<Mutex<Log>>,
        nr_profiles: u32,
        active: u32,
        freq: Frequency,
        mapping: u32,
        buttons: Vec<(u8, u8)>,
        led_on: bool,
    }

    pub const BUTTONS: [Button; 2] = [Button::new(1, "Left"), Button::new(2, "Right")];

    impl MockDriver {
        pub fn new(nr_profiles: u32) -> (Self, Arc<Mutex<Log>>) {
            let log = Arc::new(Mutex::new(Log::default()));
            let d = Self {
                log: Arc::clone(&log),
                nr_profiles,
                active: 0,
                freq: Frequency::Hz1000,
                mapping: 0,
                buttons: vec![(1, buttonmapping::func::LEFT), (2, buttonmapping::func::RIGHT)],
                led_on: true,
            };
            (d, log)
        }

        fn record(&self, ctx: &UsbContext, call: String) -> Result<()> {
            ctx.ensure_claimed()?;
            let mut log = self.log.lock().unwrap();
            if log.fail_sets {
                return Err(Error::Usb("mock: set failed".into()));
            }
            log.calls.push(call);
            Ok(())
        }
    }

    impl MouseDriver for MockDriver {
        fn init(&mut self, ctx: &mut UsbContext) -> Result<()> {
            ctx.add_used_interface(0, 0)?;
            if self.log.lock().unwrap().fail_init {
                return Err(Error::Protocol("mock: init failed".into()));
            }
            Ok(())
        }

        fn mouse_type(&self) -> MouseType {
            MouseType::DeathAdder
        }

        fn idstr(&self) -> &str {
            "Mouse:Mock:USB-001:1532-0016-0"
        }

        fn commit(&mut self, _ctx: &mut UsbContext, force: bool) -> Result<()> {
            self.log.lock().unwrap().commits.push(force);
            Ok(())
        }

        fn nr_profiles(&self) -> u32 {
            self.nr_profiles
        }

        fn active_profile(&self) -> Option<u32> {
            (self.nr_profiles > 1).then_some(self.active)
        }

        fn set_active_profile(&mut self, ctx: &mut UsbContext, profile: u32) -> Result<()> {
            self.record(ctx, format!("active {profile}"))?;
            self.active = profile;
            Ok(())
        }

        fn supported_axes(&self) -> Vec<Axis> {
            vec![Axis::new(0, "X/Y", false)]
        }

        fn supported_freqs(&self) -> Vec<Frequency> {
            Frequency::ALL.to_vec()
        }

        fn supported_dpimappings(&self) -> Vec<DpiMapping> {
            vec![DpiMapping::single(0, 400), DpiMapping::single(1, 800)]
        }

        fn supported_buttons(&self) -> Vec<Button> {
            BUTTONS.to_vec()
        }

        fn supported_button_functions(&self) -> Vec<ButtonFunction> {
            vec![buttonmapping::LEFT, buttonmapping::RIGHT, buttonmapping::MIDDLE]
        }

        fn global_leds(&self) -> Vec<Led> {
            vec![Led::simple(0, "Scrollwheel", self.led_on)]
        }

        fn set_led_state(
            &mut self,
            ctx: &mut UsbContext,
            profile: Option<u32>,
            led: u32,
            state: LedState,
        ) -> Result<()> {
            self.record(ctx, format!("led {profile:?} {led} {state:?}"))?;
            self.led_on = state.is_on();
            Ok(())
        }

        fn freq(&self, _profile: u32) -> Option<Frequency> {
            Some(self.freq)
        }

        fn set_freq(&mut self, ctx: &mut UsbContext, profile: u32, freq: Frequency) -> Result<()> {
            self.record(ctx, format!("freq {profile} {}", freq.as_hz()))?;
            self.freq = freq;
            Ok(())
        }

        fn dpimapping(&self, _profile: u32, axis: Option<u32>) -> Option<DpiMapping> {
            if axis.is_some_and(|a| a > 0) {
                return None;
            }
            self.supported_dpimappings().into_iter().find(|m| m.nr == self.mapping)
        }

        fn set_dpimapping(
            &mut self,
            ctx: &mut UsbContext,
            profile: u32,
            axis: Option<u32>,
            nr: u32,
        ) -> Result<()> {
            self.record(ctx, format!("dpi {profile} {axis:?} {nr}"))?;
            self.mapping = nr;
            Ok(())
        }

        fn button_function(&self, _profile: u32, button: u8) -> Option<ButtonFunction> {
            let (_, f) = self.buttons.iter().find(|(b, _)| *b == button)?;
            buttonmapping::function_by_id(&self.supported_button_functions(), *f).copied()
        }

        fn set_button_function(
            &mut self,
            ctx: &mut UsbContext,
            profile: u32,
            button: u8,
            function: u8,
        ) -> Result<()> {
            self.record(ctx, format!("button {profile} {button} {function}"))?;
            if let Some(slot) = self.buttons.iter_mut().find(|(b, _)| *b == button) {
                slot.1 = function;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::usb::mock::{context_for, MockDevice};

    fn mouse(nr_profiles: u32) -> (MockDevice, Mouse, std::sync::Arc<std::sync::Mutex<Log>>) {
        let dev = MockDevice::new(1, 5, 0x1532, 0x0016);
        let (_bus, ctx) = context_for(&dev);
        let (driver, log) = MockDriver::new(nr_profiles);
        let m = Mouse::with_driver(ctx, Box::new(driver)).unwrap();
        (dev, m, log)
    }

    #[test]
    fn nested_claims_commit_once_on_last_release() {
        let (dev, mut m, log) = mouse(1);
        m.claim().unwrap();
        m.claim().unwrap();
        m.claim().unwrap();
        m.release().unwrap();
        m.release().unwrap();
        assert!(log.lock().unwrap().commits.is_empty());
        assert_eq!(dev.state.lock().unwrap().releases, 0);
        m.release().unwrap();
        assert_eq!(log.lock().unwrap().commits, vec![false]);
        assert_eq!(dev.state.lock().unwrap().claims, 1);
        assert_eq!(dev.state.lock().unwrap().releases, 1);
    }

    #[test]
    fn failed_init_releases_the_device() {
        let dev = MockDevice::new(1, 5, 0x1532, 0x0016);
        let (_bus, ctx) = context_for(&dev);
        let (driver, log) = MockDriver::new(1);
        log.lock().unwrap().fail_init = true;
        assert!(Mouse::with_driver(ctx, Box::new(driver)).is_err());
    }

    #[test]
    fn single_profile_reports_profile_zero_active() {
        let (_dev, m, _log) = mouse(1);
        assert_eq!(m.active_profile(), Some(0));
        assert!(!m.flags().profile_emulated);
        let (_dev, m, _log) = mouse(3);
        assert_eq!(m.nr_profiles(), 3);
        assert_eq!(m.active_profile(), Some(0));
    }

    #[test]
    fn setters_require_a_claim() {
        let (_dev, mut m, _log) = mouse(1);
        assert!(m.set_freq(0, Frequency::Hz125).is_err());
        m.claim().unwrap();
        m.set_freq(0, Frequency::Hz125).unwrap();
        m.release().unwrap();
        assert_eq!(m.freq(0), Some(Frequency::Hz125));
    }

    #[test]
    fn info_snapshot_serializes() {
        let (_dev, m, _log) = mouse(1);
        let info = m.info();
        assert_eq!(info.profiles.len(), 1);
        assert!(info.profiles[0].active);
        assert_eq!(info.profiles[0].buttons.len(), 2);
        assert_eq!(info.profiles[0].dpimappings[0].mapping, 0);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"idstr\":\"Mouse:Mock:USB-001:1532-0016-0\""));
    }

    #[test]
    fn release_all_drops_every_reference() {
        let (dev, mut m, log) = mouse(1);
        m.claim().unwrap();
        m.claim().unwrap();
        m.release_all();
        assert_eq!(m.claim_count(), 0);
        assert_eq!(log.lock().unwrap().commits, vec![false]);
        assert_eq!(dev.state.lock().unwrap().releases, 1);
    }
}
