//! Tracking a device across a firmware-triggered bus reset.
//!
//! Some firmware drops off the bus after a configuration write and comes
//! back at a new address. A [`ReconnectGuard`] snapshots the device before
//! the risky write, then follows it to its new address.

use crate::error::{Error, Result};
use crate::usb::{UsbContext, UsbDeviceInfo};
use std::time::Duration;
use tracing::{debug, error, info};

/// Sleep between two bus scans.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Deadline of each wait phase.
pub const PHASE_DEADLINE: Duration = Duration::from_millis(3000);
/// Number of addresses, starting at the next one, where the device may reappear.
pub const ADDRESS_WINDOW: u8 = 64;

/// Identity snapshot taken before an operation that resets the device.
#[derive(Debug, Clone)]
pub struct ReconnectGuard {
    old: UsbDeviceInfo,
}

impl ReconnectGuard {
    pub fn init(ctx: &UsbContext) -> Self {
        Self {
            old: ctx.device().clone(),
        }
    }

    fn is_old_device(&self, dev: &UsbDeviceInfo) -> bool {
        dev.bus == self.old.bus
            && dev.address == self.old.address
            && dev.descriptor == self.old.descriptor
    }

    /// Find the reappeared device, preferring the lowest address offset.
    fn find_new_device<'a>(&self, devs: &'a [UsbDeviceInfo]) -> Option<&'a UsbDeviceInfo> {
        let start = self.old.address.wrapping_add(1) & 0x7F;
        (0..ADDRESS_WINDOW).find_map(|j| {
            let address = start.wrapping_add(j) & 0x7F;
            devs.iter().find(|d| {
                d.bus == self.old.bus && d.address == address && d.descriptor == self.old.descriptor
            })
        })
    }

    /// Wait for the device to vanish and reappear, then point `ctx` at it.
    ///
    /// Unless `hub_reset` is set, the context is released first and claimed
    /// again afterwards. A device that never disconnects is logged and
    /// reclaimed. A device that never reappears is a [`Error::Busy`].
    pub fn wait(self, ctx: &mut UsbContext, hub_reset: bool) -> Result<()> {
        if !hub_reset {
            ctx.release();
        }
        let clock = ctx.shared_clock();
        let backend = std::sync::Arc::clone(ctx.backend());

        let deadline = clock.now() + PHASE_DEADLINE;
        let mut disappeared = false;
        loop {
            let devs = backend.scan()?;
            if !devs.iter().any(|d| self.is_old_device(d)) {
                disappeared = true;
                break;
            }
            if clock.now() > deadline {
                break;
            }
            clock.sleep(POLL_INTERVAL);
        }

        if disappeared {
            debug!(device = %self.old.location(), "device disconnected, waiting for reconnect");
            let deadline = clock.now() + PHASE_DEADLINE;
            loop {
                let devs = backend.scan()?;
                if let Some(new) = self.find_new_device(&devs) {
                    info!(
                        old = %self.old.location(),
                        new = %new.location(),
                        "device reconnected"
                    );
                    ctx.set_device(new.clone());
                    break;
                }
                if clock.now() > deadline {
                    error!(
                        device = %self.old.location(),
                        "device did not reconnect, it may need to be replugged"
                    );
                    return Err(Error::Busy(format!(
                        "{} did not reconnect",
                        self.old.location()
                    )));
                }
                clock.sleep(POLL_INTERVAL);
            }
        } else {
            error!(device = %self.old.location(), "device did not disconnect");
        }

        if !hub_reset {
            ctx.claim()?;
        }
        Ok(())
    }
}

/// Reset the root hub the device hangs off and follow the device back.
pub fn force_hub_reset(ctx: &mut UsbContext) -> Result<()> {
    let guard = ReconnectGuard::init(ctx);
    let bus = ctx.device().bus;
    let hub = ctx
        .backend()
        .scan()?
        .into_iter()
        .find(|d| d.bus == bus && d.address == 1)
        .ok_or_else(|| Error::DeviceNotFound(format!("root hub of bus {bus:03}")))?;

    let was_claimed = ctx.is_claimed();
    ctx.release();
    info!(bus, "resetting root hub");
    ctx.backend().open(&hub)?.reset().map_err(|e| {
        error!(bus, "hub reset failed: {}", e);
        e
    })?;
    guard.wait(ctx, true)?;
    if was_claimed {
        ctx.claim()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::Clock;
    use crate::usb::mock::*;

    fn claimed_device(address: u8) -> (MockDevice, std::sync::Arc<MockBus>, UsbContext) {
        let dev = MockDevice::new(2, address, 0x1532, 0x0040);
        let (bus, mut ctx) = context_for(&dev);
        ctx.add_used_interface(0, 0).unwrap();
        ctx.claim().unwrap();
        (dev, bus, ctx)
    }

    #[test]
    fn follows_device_to_next_address() {
        let (dev, bus, mut ctx) = claimed_device(9);
        bus.schedule(Duration::from_millis(120), BusEvent::Unplug { bus: 2, address: 9 });
        bus.schedule(Duration::from_millis(400), BusEvent::Plug(dev.reappear_at(10)));

        let guard = ReconnectGuard::init(&ctx);
        guard.wait(&mut ctx, false).unwrap();
        assert_eq!(ctx.device().address, 10);
        assert!(ctx.is_claimed());
    }

    #[test]
    fn address_wraps_in_seven_bits() {
        let (dev, bus, mut ctx) = claimed_device(127);
        bus.schedule(Duration::ZERO, BusEvent::Unplug { bus: 2, address: 127 });
        bus.schedule(Duration::from_millis(100), BusEvent::Plug(dev.reappear_at(0)));
        ReconnectGuard::init(&ctx).wait(&mut ctx, false).unwrap();
        assert_eq!(ctx.device().address, 0);
    }

    #[test]
    fn ignores_other_devices_and_other_buses() {
        let (dev, bus, mut ctx) = claimed_device(5);
        let mut elsewhere = dev.reappear_at(6);
        elsewhere.info.bus = 3;
        bus.schedule(Duration::ZERO, BusEvent::Unplug { bus: 2, address: 5 });
        bus.schedule(Duration::ZERO, BusEvent::Plug(elsewhere));
        bus.schedule(Duration::ZERO, BusEvent::Plug(MockDevice::new(2, 6, 0x046D, 0xC08B)));
        bus.schedule(Duration::from_millis(200), BusEvent::Plug(dev.reappear_at(8)));
        ReconnectGuard::init(&ctx).wait(&mut ctx, false).unwrap();
        assert_eq!((ctx.device().bus, ctx.device().address), (2, 8));
    }

    #[test]
    fn never_reappearing_is_busy_within_deadline() {
        let (_dev, bus, mut ctx) = claimed_device(9);
        bus.schedule(Duration::ZERO, BusEvent::Unplug { bus: 2, address: 9 });
        let start = bus.clock.now();
        let err = ReconnectGuard::init(&ctx).wait(&mut ctx, false).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
        assert!(bus.clock.now() - start <= PHASE_DEADLINE + POLL_INTERVAL);
    }

    #[test]
    fn never_disconnecting_reclaims_old_device() {
        let (dev, bus, mut ctx) = claimed_device(9);
        ReconnectGuard::init(&ctx).wait(&mut ctx, false).unwrap();
        assert_eq!(ctx.device().address, 9);
        assert!(ctx.is_claimed());
        assert!(bus.clock.now() > PHASE_DEADLINE);
        assert_eq!(dev.state.lock().unwrap().claims, 2);
    }

    #[test]
    fn hub_reset_resets_root_hub_and_reclaims() {
        let (dev, bus, mut ctx) = claimed_device(4);
        let hub = MockDevice::hub(2);
        bus.plug(hub.clone());
        bus.schedule(Duration::ZERO, BusEvent::Unplug { bus: 2, address: 4 });
        bus.schedule(Duration::from_millis(50), BusEvent::Plug(dev.reappear_at(5)));
        force_hub_reset(&mut ctx).unwrap();
        assert_eq!(hub.state.lock().unwrap().resets, 1);
        assert_eq!(ctx.device().address, 5);
        assert!(ctx.is_claimed());
    }

    #[test]
    fn hub_reset_without_hub_is_not_found() {
        let (_dev, _bus, mut ctx) = claimed_device(4);
        assert!(matches!(
            force_hub_reset(&mut ctx),
            Err(Error::DeviceNotFound(_))
        ));
    }
}
