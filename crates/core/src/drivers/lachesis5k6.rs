//! Lachesis 5600 DPI. Synapse protocol, RGB LEDs.

use crate::model::MouseType;
use crate::synapse::{Synapse, SynapseModel};

pub struct Lachesis5600;

impl SynapseModel for Lachesis5600 {
    const NAME: &'static str = "Lachesis 5600 DPI";
    const MOUSE_TYPE: MouseType = MouseType::Lachesis;
    const RGB_LEDS: bool = true;
}

pub type Lachesis5k6 = Synapse<Lachesis5600>;

impl Synapse<Lachesis5600> {
    pub fn new() -> Self {
        Self::with_model()
    }
}

impl Default for Synapse<Lachesis5600> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MouseDriver;
    use crate::model::{LedState, RgbColor};
    use crate::synapse::fake;
    use crate::usb::mock::context_for;

    #[test]
    fn identity_uses_serial_from_device_info() {
        let dev = fake::device(3, 9, 0x001E);
        let (_bus, mut ctx) = context_for(&dev);
        let mut m = Lachesis5k6::new();
        m.init(&mut ctx).unwrap();
        assert_eq!(m.idstr(), "Mouse:Lachesis 5600 DPI:USB-003-009:1532-001E-LS5600");
        assert_eq!(m.mouse_type(), MouseType::Lachesis);
        assert_eq!(m.nr_profiles(), 5);
        assert_eq!(m.supported_resolutions().last(), Some(&5600));
    }

    #[test]
    fn leds_are_per_profile_with_color() {
        let dev = fake::device(3, 9, 0x001E);
        let (_bus, mut ctx) = context_for(&dev);
        let mut m = Lachesis5k6::new();
        m.init(&mut ctx).unwrap();
        ctx.claim().unwrap();
        m.set_led_state(&mut ctx, Some(2), 1, LedState::On).unwrap();
        m.set_led_color(&mut ctx, None, 0, RgbColor::new(0xFF, 0, 0)).unwrap();
        let leds = m.profile_leds(2);
        assert_eq!(leds[1].name, "GlowingLogo");
        assert!(leds[1].state.is_on());
        assert!(!m.profile_leds(3)[1].state.is_on());
        // no profile given: the active one (2nd)
        assert_eq!(m.profile_leds(1)[0].color, Some(RgbColor::new(0xFF, 0, 0)));
        assert!(m.global_leds().is_empty());
    }
}
