//! Device capability model: frequencies, resolutions, axes, DPI mappings
//! and LEDs shared by every driver.

use serde::Serialize;

/// Scan frequencies supported by Razer mice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u16)]
pub enum Frequency {
    Hz125 = 125,
    Hz500 = 500,
    Hz1000 = 1000,
}

impl Frequency {
    /// Convert from raw Hz value.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            125 => Some(Self::Hz125),
            500 => Some(Self::Hz500),
            1000 => Some(Self::Hz1000),
            _ => None,
        }
    }

    /// Get the Hz value.
    pub fn as_hz(&self) -> u32 {
        *self as u32
    }

    /// Report interval in milliseconds (1000 / Hz).
    pub fn interval_ms(&self) -> u8 {
        (1000 / self.as_hz()) as u8
    }

    /// All frequencies, slowest first.
    pub const ALL: &'static [Frequency] = &[Frequency::Hz125, Frequency::Hz500, Frequency::Hz1000];
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz", self.as_hz())
    }
}

/// A resolution dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Dimension {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Dimension {
    pub const COUNT: usize = 3;

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn mask(&self) -> u32 {
        1 << self.index()
    }

    pub fn from_index(i: usize) -> Option<Self> {
        match i {
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            _ => None,
        }
    }
}

/// A physical sensor axis (or the scroll wheel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Axis {
    pub id: u32,
    pub name: &'static str,
    /// The axis can select its DPI mapping independently of the others.
    pub independent_dpimapping: bool,
}

impl Axis {
    pub const fn new(id: u32, name: &'static str, independent_dpimapping: bool) -> Self {
        Self {
            id,
            name,
            independent_dpimapping,
        }
    }
}

/// A named resolution slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DpiMapping {
    pub nr: u32,
    /// Resolution per dimension, 0 where unused.
    pub res: [u32; Dimension::COUNT],
    /// Bit per used [`Dimension`].
    pub dimension_mask: u32,
    /// Profiles this mapping is valid for; 0 means any profile.
    pub profile_mask: u64,
    /// The resolution can be modified with `change_dpimapping`.
    pub changeable: bool,
}

impl DpiMapping {
    /// Mapping that only uses dimension X.
    pub fn single(nr: u32, res: u32) -> Self {
        Self {
            nr,
            res: [res, 0, 0],
            dimension_mask: Dimension::X.mask(),
            profile_mask: 0,
            changeable: false,
        }
    }

    /// Mapping with the same resolution on X and Y.
    pub fn xy(nr: u32, res: u32) -> Self {
        Self {
            nr,
            res: [res, res, 0],
            dimension_mask: Dimension::X.mask() | Dimension::Y.mask(),
            profile_mask: 0,
            changeable: false,
        }
    }

    pub fn changeable(mut self) -> Self {
        self.changeable = true;
        self
    }

    pub fn for_profile(mut self, profile: u32) -> Self {
        self.profile_mask = 1u64 << profile;
        self
    }

    pub fn uses(&self, dim: Dimension) -> bool {
        self.dimension_mask & dim.mask() != 0
    }

    pub fn valid_for_profile(&self, profile: u32) -> bool {
        self.profile_mask == 0 || self.profile_mask & (1u64 << profile) != 0
    }
}

/// Find the first mapping whose resolution in `dim` equals `res`.
pub fn dpimapping_by_res(mappings: &[DpiMapping], dim: Dimension, res: u32) -> Option<&DpiMapping> {
    mappings.iter().find(|m| m.res[dim.index()] == res)
}

/// Resolutions from `step` to `max` inclusive, in `step` increments.
pub fn resolution_steps(step: u32, max: u32) -> Vec<u32> {
    (1..=max / step).map(|i| i * step).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LedState {
    Off,
    On,
    Unknown,
}

impl LedState {
    pub fn from_bool(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }
}

/// LED working mode. Each device supports a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LedMode {
    Static,
    Spectrum,
    Breathing,
    Wave,
    Reaction,
}

impl LedMode {
    /// Parse a mode name, case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.label().eq_ignore_ascii_case(name))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Spectrum => "spectrum",
            Self::Breathing => "breathing",
            Self::Wave => "wave",
            Self::Reaction => "reaction",
        }
    }

    pub const ALL: &'static [LedMode] = &[
        LedMode::Static,
        LedMode::Spectrum,
        LedMode::Breathing,
        LedMode::Wave,
        LedMode::Reaction,
    ];
}

impl std::fmt::Display for LedMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl std::fmt::Display for RgbColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Snapshot of one LED. Changes go through the owning mouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Led {
    pub id: u32,
    pub name: &'static str,
    pub state: LedState,
    /// Current mode, if the LED has modes at all.
    pub mode: Option<LedMode>,
    pub supported_modes: Vec<LedMode>,
    /// Current color, if the LED is RGB capable.
    pub color: Option<RgbColor>,
}

impl Led {
    /// A plain on/off LED.
    pub fn simple(id: u32, name: &'static str, on: bool) -> Self {
        Self {
            id,
            name,
            state: LedState::from_bool(on),
            mode: None,
            supported_modes: Vec::new(),
            color: None,
        }
    }
}

/// Mouse families known to the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MouseType {
    DeathAdder,
    Krait,
    Lachesis,
    Copperhead,
    Naga,
    BoomslangCe,
    Taipan,
    MambaTe,
    DiamondbackChroma,
}

impl MouseType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::DeathAdder => "DeathAdder",
            Self::Krait => "Krait",
            Self::Lachesis => "Lachesis",
            Self::Copperhead => "Copperhead",
            Self::Naga => "Naga",
            Self::BoomslangCe => "Boomslang CE",
            Self::Taipan => "Taipan",
            Self::MambaTe => "Mamba Tournament Edition",
            Self::DiamondbackChroma => "Diamondback Chroma",
        }
    }
}

impl std::fmt::Display for MouseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MouseFlags {
    /// Profiles are emulated in software on single-profile hardware.
    pub profile_emulated: bool,
    /// The running firmware is known to be outdated.
    pub suggest_fw_update: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_roundtrip_hz() {
        for f in Frequency::ALL {
            assert_eq!(Frequency::from_hz(f.as_hz()), Some(*f));
        }
        assert_eq!(Frequency::from_hz(250), None);
        assert_eq!(Frequency::Hz125.interval_ms(), 8);
        assert_eq!(Frequency::Hz500.interval_ms(), 2);
        assert_eq!(Frequency::Hz1000.to_string(), "1000 Hz");
    }

    #[test]
    fn led_mode_names() {
        assert_eq!(LedMode::from_name("Spectrum"), Some(LedMode::Spectrum));
        assert_eq!(LedMode::from_name("REACTION"), Some(LedMode::Reaction));
        assert_eq!(LedMode::from_name("rainbow"), None);
    }

    #[test]
    fn dpimapping_profile_mask() {
        let any = DpiMapping::single(0, 800);
        assert!(any.valid_for_profile(3));
        let second = DpiMapping::xy(12, 800).for_profile(1);
        assert!(second.valid_for_profile(1));
        assert!(!second.valid_for_profile(0));
        assert!(second.uses(Dimension::Y));
        assert!(!any.uses(Dimension::Y));
    }

    #[test]
    fn resolution_steps_are_inclusive() {
        let steps = resolution_steps(100, 5600);
        assert_eq!(steps.len(), 56);
        assert_eq!(steps[0], 100);
        assert_eq!(*steps.last().unwrap(), 5600);
        assert_eq!(resolution_steps(125, 4000).len(), 32);
    }

    #[test]
    fn lookup_mapping_by_resolution() {
        let maps = vec![DpiMapping::single(0, 400), DpiMapping::single(1, 1600)];
        assert_eq!(dpimapping_by_res(&maps, Dimension::X, 1600).map(|m| m.nr), Some(1));
        assert!(dpimapping_by_res(&maps, Dimension::Y, 1600).is_none());
    }

    #[test]
    fn color_display_is_hex() {
        assert_eq!(RgbColor::new(0, 255, 16).to_string(), "00FF10");
    }
}
