//! Integration tests: whole sessions against simulated devices.
//!
//! Scripted devices sit on a mock bus. The tests drive them through the
//! context, the mouse layer, configuration and the drivers together.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::context::{Context, Event};
    use crate::driver::MouseDriver;
    use crate::drivers::naga::test_support::{echo_with_status, naga_writes};
    use crate::drivers::naga::Naga;
    use crate::model::Frequency;
    use crate::reconnect::ReconnectGuard;
    use crate::synapse::fake;
    use crate::timing::mock::FakeClock;
    use crate::timing::Clock;
    use crate::usb::mock::{context_for, BusEvent, MockBus, MockDevice};
    use crate::usb::UsbBackend;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn session(emulate: bool) -> (Arc<MockBus>, Context) {
        let clock = FakeClock::new();
        let bus = MockBus::new(Arc::clone(&clock));
        let ctx = Context::with_backend(
            Arc::clone(&bus) as Arc<dyn UsbBackend>,
            clock as Arc<dyn Clock>,
            emulate,
        );
        (bus, ctx)
    }

    fn naga_device(bus: u8, address: u8) -> MockDevice {
        MockDevice::new(bus, address, 0x1532, 0x0040).with_responder(echo_with_status(2, 0x0105))
    }

    /// Test: a multi-profile mouse is adopted without emulation and gets its
    /// config section applied.
    #[test]
    fn synapse_mouse_session_with_config() {
        let (bus, mut ctx) = session(true);
        bus.plug(fake::device(1, 3, 0x001E));
        ctx.set_config(Some(
            Config::parse("[Mouse:Lachesis 5600 DPI:*:*]\nprofile=2\nfreq=2:500\n").unwrap(),
        ));
        ctx.rescan_mice().unwrap();

        let m = ctx.find_mouse("*:*:*:1532-001E-LS5600").unwrap();
        assert!(!m.flags().profile_emulated);
        assert_eq!(m.nr_profiles(), 5);
        assert_eq!(m.active_profile(), Some(1));
        assert_eq!(m.freq(1), Some(Frequency::Hz500));
        assert_eq!(m.claim_count(), 0);

        let json = serde_json::to_value(m.info()).unwrap();
        assert_eq!(json["nr_profiles"], 5);
        assert_eq!(json["profiles"][1]["active"], true);
        assert_eq!(json["profiles"].as_array().unwrap().len(), 5);
    }

    /// Test: switching emulated profiles pushes the stored state to the
    /// single hardware profile.
    #[test]
    fn naga_emulated_profile_switch() {
        let (bus, mut ctx) = session(true);
        let dev = naga_device(2, 9);
        bus.plug(dev.clone());
        ctx.rescan_mice().unwrap();

        let m = ctx.find_mouse("*:Naga:*:*").unwrap();
        assert!(m.flags().profile_emulated);
        assert_eq!(m.nr_profiles(), 20);

        let m = ctx.find_mouse_mut("*:Naga:*:*").unwrap();
        m.claim().unwrap();
        dev.clear_log();
        m.set_freq(4, Frequency::Hz125).unwrap();
        m.set_dpimapping(4, None, 17).unwrap();
        assert!(dev.writes().is_empty());

        m.set_active_profile(4).unwrap();
        let w = naga_writes(&dev.writes());
        assert!(w.contains(&(0x0100, 0x0500, 8, 0)));
        assert_eq!(m.dpimapping(4, Some(1)).unwrap().res[0], 1800);
        assert_eq!(m.freq(0), Some(Frequency::Hz1000));
        m.release().unwrap();
    }

    /// Test: a driver keeps working after its device re-enumerates.
    #[test]
    fn driver_survives_firmware_reconnect() {
        let dev = naga_device(2, 9);
        let (bus, mut ctx) = context_for(&dev);
        let mut n = Naga::new(0x0040);
        n.init(&mut ctx).unwrap();
        ctx.claim().unwrap();

        let now = bus.clock.now();
        bus.schedule(now + Duration::from_millis(100), BusEvent::Unplug { bus: 2, address: 9 });
        bus.schedule(now + Duration::from_millis(600), BusEvent::Plug(dev.reappear_at(10)));
        ReconnectGuard::init(&ctx).wait(&mut ctx, false).unwrap();
        assert_eq!(ctx.device().address, 10);

        dev.clear_log();
        n.set_freq(&mut ctx, 0, Frequency::Hz500).unwrap();
        assert_eq!(naga_writes(&dev.writes()).last(), Some(&(0x0100, 0x0500, 2, 0)));
    }

    /// Test: a replugged mouse is dropped and adopted again at its new address.
    #[test]
    fn replug_is_remove_then_add() {
        let (bus, mut ctx) = session(false);
        let dev = MockDevice::new(1, 4, 0x1532, 0x0003);
        bus.plug(dev.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        ctx.register_event_handler(Box::new(move |ev: &Event<'_>| {
            let line = match ev {
                Event::MouseAdded(m) => format!("add {}", m.device().address),
                Event::MouseRemoved(m) => format!("remove {}", m.device().address),
            };
            sink.lock().unwrap().push(line);
        }))
        .unwrap();

        ctx.rescan_mice().unwrap();
        bus.unplug(1, 4);
        bus.plug(dev.reappear_at(5));
        ctx.rescan_mice().unwrap();

        assert_eq!(*events.lock().unwrap(), vec!["add 4", "remove 4", "add 5"]);
        assert_eq!(ctx.mice()[0].idstr(), "Mouse:Krait:USB-001-005:1532-0003-0");
    }

    /// Test: identity globs pick devices by bus position.
    #[test]
    fn glob_selects_by_bus() {
        let (bus, mut ctx) = session(false);
        bus.plug(MockDevice::new(1, 4, 0x1532, 0x0003));
        bus.plug(naga_device(2, 9));
        ctx.rescan_mice().unwrap();
        assert_eq!(ctx.mice().len(), 2);
        assert_eq!(
            ctx.find_mouse("*:*:002:*").map(|m| m.idstr()),
            Some("Mouse:Naga:USB-002-009:1532-0040-0")
        );
        assert_eq!(
            ctx.find_mouse("mouse:*:USB-001:*").map(|m| m.idstr()),
            Some("Mouse:Krait:USB-001-004:1532-0003-0")
        );
        assert!(ctx.find_mouse("*:*:003:*").is_none());
    }

    /// Test: reconfig force-commits every adopted mouse.
    #[test]
    fn reconfig_pushes_every_mouse() {
        let (bus, mut ctx) = session(false);
        let krait = MockDevice::new(1, 4, 0x1532, 0x0003);
        let naga = naga_device(2, 9);
        bus.plug(krait.clone());
        bus.plug(naga.clone());
        ctx.rescan_mice().unwrap();
        krait.clear_log();
        naga.clear_log();

        ctx.reconfig_mice().unwrap();
        assert_eq!(krait.writes().len(), 1);
        let w = naga_writes(&naga.writes());
        assert!(w.contains(&(0x0100, 0x0500, 1, 0)));
        assert!(ctx.mice().iter().all(|m| m.claim_count() == 0));
    }
}
