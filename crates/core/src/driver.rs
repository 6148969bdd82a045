//! The per-device driver interface.
//!
//! Every hardware family implements [`MouseDriver`]. A method left at its
//! default is an absent capability: getters return `None` or an empty list,
//! setters fail with [`Error::NotSupported`]. Generic code (the mouse
//! wrapper, profile emulation, config apply) checks for presence instead of
//! branching on the device type.
//!
//! Axis arguments are `Option<u32>`. `None` means the first axis for getters
//! and every axis for setters.
//!
//! Contract for every setter: fail with [`Error::Busy`] when the device is
//! not claimed, and restore the previous value when the hardware write fails.

use crate::buttonmapping::{Button, ButtonFunction};
use crate::error::{Error, Result};
use crate::model::{Axis, Dimension, DpiMapping, Frequency, Led, LedMode, LedState, MouseFlags, MouseType, RgbColor};
use crate::usb::UsbContext;

pub trait MouseDriver: Send {
    /// Discover the hardware state. Called once, before anything else.
    fn init(&mut self, ctx: &mut UsbContext) -> Result<()>;

    fn mouse_type(&self) -> MouseType;

    /// Identity string, valid after `init`.
    fn idstr(&self) -> &str;

    fn flags(&self) -> MouseFlags {
        MouseFlags::default()
    }

    /// Firmware version as `major << 8 | minor`.
    fn fw_version(&self) -> Option<u16> {
        None
    }

    /// Write pending state to the hardware. `force` writes everything.
    fn commit(&mut self, _ctx: &mut UsbContext, _force: bool) -> Result<()> {
        Ok(())
    }

    fn flash_firmware(&mut self, _ctx: &mut UsbContext, _image: &[u8]) -> Result<()> {
        Err(Error::NotSupported("firmware flashing"))
    }

    fn nr_profiles(&self) -> u32 {
        1
    }

    /// `None` when the hardware has no notion of an active profile.
    fn active_profile(&self) -> Option<u32> {
        None
    }

    fn set_active_profile(&mut self, _ctx: &mut UsbContext, _profile: u32) -> Result<()> {
        Err(Error::NotSupported("profile switching"))
    }

    fn profile_name(&self, _profile: u32) -> Option<String> {
        None
    }

    fn set_profile_name(&mut self, _ctx: &mut UsbContext, _profile: u32, _name: &str) -> Result<()> {
        Err(Error::NotSupported("profile names"))
    }

    fn supported_axes(&self) -> Vec<Axis> {
        Vec::new()
    }

    fn supported_resolutions(&self) -> Vec<u32> {
        Vec::new()
    }

    fn supported_freqs(&self) -> Vec<Frequency> {
        Vec::new()
    }

    fn supported_dpimappings(&self) -> Vec<DpiMapping> {
        Vec::new()
    }

    /// Change the resolution of a changeable mapping.
    fn change_dpimapping(
        &mut self,
        _ctx: &mut UsbContext,
        _nr: u32,
        _dim: Dimension,
        _res: u32,
    ) -> Result<()> {
        Err(Error::NotSupported("DPI mapping changes"))
    }

    fn supported_buttons(&self) -> Vec<Button> {
        Vec::new()
    }

    fn supported_button_functions(&self) -> Vec<ButtonFunction> {
        Vec::new()
    }

    /// LEDs not bound to a profile.
    fn global_leds(&self) -> Vec<Led> {
        Vec::new()
    }

    fn profile_leds(&self, _profile: u32) -> Vec<Led> {
        Vec::new()
    }

    /// `profile` is `None` for global LEDs.
    fn set_led_state(
        &mut self,
        _ctx: &mut UsbContext,
        _profile: Option<u32>,
        _led: u32,
        _state: LedState,
    ) -> Result<()> {
        Err(Error::NotSupported("LED state"))
    }

    fn set_led_mode(
        &mut self,
        _ctx: &mut UsbContext,
        _profile: Option<u32>,
        _led: u32,
        _mode: LedMode,
    ) -> Result<()> {
        Err(Error::NotSupported("LED mode"))
    }

    fn set_led_color(
        &mut self,
        _ctx: &mut UsbContext,
        _profile: Option<u32>,
        _led: u32,
        _color: RgbColor,
    ) -> Result<()> {
        Err(Error::NotSupported("LED color"))
    }

    fn freq(&self, _profile: u32) -> Option<Frequency> {
        None
    }

    fn set_freq(&mut self, _ctx: &mut UsbContext, _profile: u32, _freq: Frequency) -> Result<()> {
        Err(Error::NotSupported("scan frequency"))
    }

    fn dpimapping(&self, _profile: u32, _axis: Option<u32>) -> Option<DpiMapping> {
        None
    }

    fn set_dpimapping(
        &mut self,
        _ctx: &mut UsbContext,
        _profile: u32,
        _axis: Option<u32>,
        _nr: u32,
    ) -> Result<()> {
        Err(Error::NotSupported("DPI mapping"))
    }

    fn button_function(&self, _profile: u32, _button: u8) -> Option<ButtonFunction> {
        None
    }

    fn set_button_function(
        &mut self,
        _ctx: &mut UsbContext,
        _profile: u32,
        _button: u8,
        _function: u8,
    ) -> Result<()> {
        Err(Error::NotSupported("button remapping"))
    }
}

/// Reject a profile index outside `0..nr`.
pub(crate) fn check_profile(profile: u32, nr: u32) -> Result<()> {
    if profile >= nr {
        return Err(Error::OutOfRange {
            field: "profile",
            value: profile,
            min: 0,
            max: nr.saturating_sub(1),
        });
    }
    Ok(())
}

/// Find a mapping by number or fail with `InvalidArgument`.
pub(crate) fn find_mapping(mappings: &[DpiMapping], nr: u32) -> Result<&DpiMapping> {
    mappings
        .iter()
        .find(|m| m.nr == nr)
        .ok_or_else(|| Error::InvalidArgument(format!("no DPI mapping {nr}")))
}

/// Reject a resolution outside `min..=max`.
pub(crate) fn check_resolution(res: u32, min: u32, max: u32) -> Result<()> {
    if res < min || res > max {
        return Err(Error::OutOfRange {
            field: "resolution",
            value: res,
            min,
            max,
        });
    }
    Ok(())
}

/// Reject a frequency the device does not list.
pub(crate) fn check_freq(freq: Frequency, supported: &[Frequency]) -> Result<()> {
    if supported.contains(&freq) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("unsupported frequency {freq}")))
    }
}

/// Resolve an axis argument to indices into `axes`. `None` selects all.
pub(crate) fn axis_indices(axes: &[Axis], axis: Option<u32>) -> Result<Vec<usize>> {
    match axis {
        None => Ok((0..axes.len()).collect()),
        Some(id) => axes
            .iter()
            .position(|a| a.id == id)
            .map(|i| vec![i])
            .ok_or_else(|| Error::InvalidArgument(format!("no axis {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_bounds() {
        assert!(check_profile(4, 5).is_ok());
        assert!(matches!(
            check_profile(5, 5),
            Err(Error::OutOfRange { max: 4, .. })
        ));
    }

    #[test]
    fn axis_selection() {
        let axes = [Axis::new(0, "X", true), Axis::new(1, "Y", true)];
        assert_eq!(axis_indices(&axes, None).unwrap(), vec![0, 1]);
        assert_eq!(axis_indices(&axes, Some(1)).unwrap(), vec![1]);
        assert!(axis_indices(&axes, Some(7)).is_err());
    }

    #[test]
    fn resolution_and_frequency_checks() {
        assert!(check_resolution(100, 100, 5600).is_ok());
        assert!(check_resolution(5700, 100, 5600).is_err());
        assert!(check_freq(Frequency::Hz500, Frequency::ALL).is_ok());
        assert!(check_freq(Frequency::Hz125, &[Frequency::Hz1000]).is_err());
    }

    #[test]
    fn mapping_lookup() {
        let maps = vec![DpiMapping::single(0, 400), DpiMapping::single(3, 1800)];
        assert_eq!(find_mapping(&maps, 3).unwrap().res[0], 1800);
        assert!(find_mapping(&maps, 1).is_err());
    }
}
