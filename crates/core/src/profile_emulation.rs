//! Software profiles for single-profile hardware.
//!
//! Each emulated profile stores a frequency, a DPI mapping per axis and a
//! function per button. Switching profiles pushes the stored values to the
//! one hardware profile through the driver's own setters.

use crate::buttonmapping::{function_by_id, ButtonFunction};
use crate::driver::MouseDriver;
use crate::error::{Error, Result};
use crate::model::{DpiMapping, Frequency};
use crate::mouse::with_claim;
use crate::usb::UsbContext;
use tracing::{debug, error};

pub const NR_EMULATED_PROFILES: u32 = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Slot {
    /// `None` when the hardware has no frequency setting.
    freq: Option<Frequency>,
    /// (axis, mapping nr); only axes the hardware reports a mapping for.
    mappings: Vec<(Option<u32>, u32)>,
    /// (button, function).
    buttons: Vec<(u8, u8)>,
}

pub struct ProfileEmulation {
    hw_profile: u32,
    slots: Vec<Slot>,
    active: u32,
}

impl ProfileEmulation {
    /// Seed every emulated profile from the current hardware profile.
    pub fn new(driver: &dyn MouseDriver) -> Self {
        let hw_profile = driver.active_profile().unwrap_or(0);
        let axes: Vec<Option<u32>> = match driver.supported_axes() {
            axes if axes.is_empty() => vec![None],
            axes => axes.iter().map(|a| Some(a.id)).collect(),
        };
        let seed = Slot {
            freq: driver.freq(hw_profile),
            mappings: axes
                .into_iter()
                .filter_map(|axis| driver.dpimapping(hw_profile, axis).map(|m| (axis, m.nr)))
                .collect(),
            buttons: driver
                .supported_buttons()
                .iter()
                .filter_map(|b| driver.button_function(hw_profile, b.id).map(|f| (b.id, f.id)))
                .collect(),
        };
        Self {
            hw_profile,
            slots: vec![seed; NR_EMULATED_PROFILES as usize],
            active: 0,
        }
    }

    /// Seed, then commit profile 0 to the hardware.
    pub fn install(driver: &mut dyn MouseDriver, ctx: &mut UsbContext) -> Result<Self> {
        let emu = Self::new(driver);
        emu.commit(driver, ctx)?;
        Ok(emu)
    }

    pub fn nr_profiles(&self) -> u32 {
        NR_EMULATED_PROFILES
    }

    pub fn active_profile(&self) -> u32 {
        self.active
    }

    /// Switching to the active profile is a no-op.
    pub fn set_active_profile(
        &mut self,
        driver: &mut dyn MouseDriver,
        ctx: &mut UsbContext,
        profile: u32,
    ) -> Result<()> {
        self.slot(profile)?;
        if profile == self.active {
            return Ok(());
        }
        let old = self.active;
        self.active = profile;
        if let Err(e) = self.commit(driver, ctx) {
            self.active = old;
            return Err(e);
        }
        Ok(())
    }

    pub fn freq(&self, profile: u32) -> Option<Frequency> {
        self.slots.get(profile as usize)?.freq
    }

    pub fn set_freq(
        &mut self,
        driver: &mut dyn MouseDriver,
        ctx: &mut UsbContext,
        profile: u32,
        freq: Frequency,
    ) -> Result<()> {
        if self.slot(profile)?.freq.is_none() {
            return Err(Error::NotSupported("scan frequency"));
        }
        if !driver.supported_freqs().contains(&freq) {
            return Err(Error::InvalidArgument(format!("unsupported frequency {freq}")));
        }
        self.update(driver, ctx, profile, |s| s.freq = Some(freq))
    }

    /// `axis` `None` reads the first axis.
    pub fn dpimapping(&self, driver: &dyn MouseDriver, profile: u32, axis: Option<u32>) -> Option<DpiMapping> {
        let slot = self.slots.get(profile as usize)?;
        let (_, nr) = match axis {
            None => slot.mappings.first()?,
            Some(_) => slot.mappings.iter().find(|(a, _)| *a == axis)?,
        };
        driver.supported_dpimappings().into_iter().find(|m| m.nr == *nr)
    }

    /// `axis` `None` sets every axis.
    pub fn set_dpimapping(
        &mut self,
        driver: &mut dyn MouseDriver,
        ctx: &mut UsbContext,
        profile: u32,
        axis: Option<u32>,
        nr: u32,
    ) -> Result<()> {
        let slot = self.slot(profile)?;
        if slot.mappings.is_empty() {
            return Err(Error::NotSupported("DPI mapping"));
        }
        if axis.is_some() && !slot.mappings.iter().any(|(a, _)| *a == axis) {
            return Err(Error::InvalidArgument(format!("no axis {}", axis.unwrap_or_default())));
        }
        if !driver.supported_dpimappings().iter().any(|m| m.nr == nr) {
            return Err(Error::InvalidArgument(format!("no DPI mapping {nr}")));
        }
        self.update(driver, ctx, profile, |s| {
            for (a, m) in s.mappings.iter_mut() {
                if axis.is_none() || *a == axis {
                    *m = nr;
                }
            }
        })
    }

    pub fn button_function(
        &self,
        driver: &dyn MouseDriver,
        profile: u32,
        button: u8,
    ) -> Option<ButtonFunction> {
        let slot = self.slots.get(profile as usize)?;
        let (_, f) = slot.buttons.iter().find(|(b, _)| *b == button)?;
        function_by_id(&driver.supported_button_functions(), *f).copied()
    }

    pub fn set_button_function(
        &mut self,
        driver: &mut dyn MouseDriver,
        ctx: &mut UsbContext,
        profile: u32,
        button: u8,
        function: u8,
    ) -> Result<()> {
        let slot = self.slot(profile)?;
        if slot.buttons.is_empty() {
            return Err(Error::NotSupported("button remapping"));
        }
        if !slot.buttons.iter().any(|(b, _)| *b == button) {
            return Err(Error::InvalidArgument(format!("no button {button}")));
        }
        if function_by_id(&driver.supported_button_functions(), function).is_none() {
            return Err(Error::InvalidArgument(format!("no button function {function}")));
        }
        self.update(driver, ctx, profile, |s| {
            for (b, f) in s.buttons.iter_mut() {
                if *b == button {
                    *f = function;
                }
            }
        })
    }

    fn slot(&self, profile: u32) -> Result<&Slot> {
        self.slots.get(profile as usize).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "profile {} out of range (0..{})",
                profile, NR_EMULATED_PROFILES
            ))
        })
    }

    /// Store a change; commit it when the profile is active, undoing the
    /// change if that fails.
    fn update<F>(&mut self, driver: &mut dyn MouseDriver, ctx: &mut UsbContext, profile: u32, change: F) -> Result<()>
    where
        F: FnOnce(&mut Slot),
    {
        let i = profile as usize;
        let old = self.slots[i].clone();
        change(&mut self.slots[i]);
        if profile != self.active {
            return Ok(());
        }
        if let Err(e) = self.commit(driver, ctx) {
            self.slots[i] = old;
            return Err(e);
        }
        Ok(())
    }

    fn commit(&self, driver: &mut dyn MouseDriver, ctx: &mut UsbContext) -> Result<()> {
        let slot = &self.slots[self.active as usize];
        let hw = self.hw_profile;
        let res = with_claim(driver, ctx, |d, ctx| {
            for &(axis, nr) in &slot.mappings {
                d.set_dpimapping(ctx, hw, axis, nr)?;
            }
            for &(button, function) in &slot.buttons {
                d.set_button_function(ctx, hw, button, function)?;
            }
            if let Some(freq) = slot.freq {
                d.set_freq(ctx, hw, freq)?;
            }
            Ok(())
        });
        match &res {
            Ok(()) => debug!(profile = self.active, "profile emulation: committed active profile"),
            Err(e) => error!(profile = self.active, "profile emulation: failed to commit settings: {}", e),
        }
        res
    }
}
