//! USB transport context.
//!
//! [`UsbBackend`] and [`UsbHandle`] abstract libusb so that real devices and
//! the in-memory [`mock`] bus share one interface. [`UsbContext`] owns the
//! open handle of one physical device and implements the claim/release
//! sequence every driver depends on.

use crate::error::{Error, Result};
use crate::timing::Clock;
use crate::util::hex_dump;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Timeout for a single control transfer.
pub const USB_TIMEOUT: Duration = Duration::from_millis(3000);

/// Upper bound of interfaces a device may need claimed.
pub const MAX_INTERFACES: usize = 3;

const CLAIM_RETRIES: u32 = 10;
const CLAIM_RETRY_DELAY_MS: u64 = 100;

/// Class request, recipient interface, host to device.
pub const REQTYPE_CLASS_IFACE_OUT: u8 = 0x21;
/// Class request, recipient interface, device to host.
pub const REQTYPE_CLASS_IFACE_IN: u8 = 0xA1;
/// Class request, recipient other, host to device.
pub const REQTYPE_CLASS_OTHER_OUT: u8 = 0x23;
/// Class request, recipient other, device to host.
pub const REQTYPE_CLASS_OTHER_IN: u8 = 0xA3;

/// Standard SET_CONFIGURATION request code. Razer firmware reuses it as the
/// class request for command writes.
pub const REQ_SET_CONFIGURATION: u8 = 0x09;
/// Standard CLEAR_FEATURE request code. Razer firmware reuses it as the
/// class request for reply reads.
pub const REQ_CLEAR_FEATURE: u8 = 0x01;

/// The parts of a USB device descriptor that identify a device across a
/// bus reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size: u8,
    pub serial_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// Descriptor with only vendor and product set.
    pub fn with_ids(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            bcd_device: 0x0100,
            class: 0,
            subclass: 0,
            protocol: 0,
            max_packet_size: 8,
            serial_index: 0,
            num_configurations: 1,
        }
    }
}

/// One enumerated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub bus: u8,
    pub address: u8,
    pub descriptor: DeviceDescriptor,
}

impl UsbDeviceInfo {
    /// `BBB-AAA`, used in log output.
    pub fn location(&self) -> String {
        format!("{:03}-{:03}", self.bus, self.address)
    }
}

/// Bus enumeration and device opening.
pub trait UsbBackend: Send + Sync {
    /// Fresh snapshot of every device currently on the bus.
    fn scan(&self) -> Result<Vec<UsbDeviceInfo>>;
    fn open(&self, dev: &UsbDeviceInfo) -> Result<Box<dyn UsbHandle>>;
}

/// An open device.
pub trait UsbHandle: Send {
    fn kernel_driver_active(&mut self, iface: u8) -> Result<bool>;
    fn detach_kernel_driver(&mut self, iface: u8) -> Result<()>;
    fn attach_kernel_driver(&mut self, iface: u8) -> Result<()>;
    fn active_configuration(&mut self) -> Result<u8>;
    fn set_active_configuration(&mut self, config: u8) -> Result<()>;
    fn claim_interface(&mut self, iface: u8) -> Result<()>;
    fn release_interface(&mut self, iface: u8) -> Result<()>;
    fn set_alternate_setting(&mut self, iface: u8, alt: u8) -> Result<()>;
    /// Returns the number of bytes written.
    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize>;
    /// Returns the number of bytes read.
    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;
    fn read_string_ascii(&mut self, index: u8) -> Result<String>;
    fn reset(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UsedInterface {
    number: u8,
    alt_setting: u8,
}

/// Transport state of one physical device.
pub struct UsbContext {
    backend: Arc<dyn UsbBackend>,
    clock: Arc<dyn Clock>,
    device: UsbDeviceInfo,
    handle: Option<Box<dyn UsbHandle>>,
    interfaces: Vec<UsedInterface>,
    configuration: u8,
    claim_count: u32,
}

impl UsbContext {
    pub fn new(backend: Arc<dyn UsbBackend>, clock: Arc<dyn Clock>, device: UsbDeviceInfo) -> Self {
        Self {
            backend,
            clock,
            device,
            handle: None,
            interfaces: Vec::with_capacity(MAX_INTERFACES),
            configuration: 1,
            claim_count: 0,
        }
    }

    pub fn device(&self) -> &UsbDeviceInfo {
        &self.device
    }

    pub fn backend(&self) -> &Arc<dyn UsbBackend> {
        &self.backend
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn msleep(&self, ms: u64) {
        self.clock.sleep(Duration::from_millis(ms));
    }

    /// Point the context at a different device, e.g. after a bus reset.
    /// Any open handle refers to the old device and is dropped.
    pub fn set_device(&mut self, device: UsbDeviceInfo) {
        if self.handle.take().is_some() {
            debug!(
                old = %self.device.location(),
                new = %device.location(),
                "dropping stale handle"
            );
        }
        self.device = device;
    }

    /// Register an interface that must be claimed.
    pub fn add_used_interface(&mut self, number: u8, alt_setting: u8) -> Result<()> {
        if self.interfaces.len() >= MAX_INTERFACES {
            error!(
                device = %self.device.location(),
                iface = number,
                "USB interface table full"
            );
            return Err(Error::Capacity(format!(
                "cannot use more than {MAX_INTERFACES} interfaces"
            )));
        }
        self.interfaces.push(UsedInterface {
            number,
            alt_setting,
        });
        Ok(())
    }

    /// Configuration value selected on claim. Defaults to 1.
    pub fn set_configuration(&mut self, value: u8) {
        self.configuration = value;
    }

    pub fn is_claimed(&self) -> bool {
        self.handle.is_some()
    }

    pub fn claim_count(&self) -> u32 {
        self.claim_count
    }

    pub fn ensure_claimed(&self) -> Result<()> {
        if self.is_claimed() {
            Ok(())
        } else {
            Err(Error::not_claimed())
        }
    }

    /// Open the device and claim every registered interface.
    pub fn claim(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let mut handle = self.backend.open(&self.device).map_err(|e| {
            error!(device = %self.device.location(), "failed to open USB device: {}", e);
            match e {
                Error::PermissionDenied(_) => e,
                other => Error::DeviceNotFound(other.to_string()),
            }
        })?;

        for iface in &self.interfaces {
            let active = handle.kernel_driver_active(iface.number).unwrap_or_else(|e| {
                warn!(iface = iface.number, "kernel driver query failed, detaching anyway: {}", e);
                true
            });
            if active {
                handle.detach_kernel_driver(iface.number).map_err(|e| {
                    error!(iface = iface.number, "failed to detach kernel driver: {}", e);
                    Error::Busy(format!("kernel driver detach on interface {}: {e}", iface.number))
                })?;
            }
        }

        let mut tries = 0;
        loop {
            if tries >= CLAIM_RETRIES {
                error!(device = %self.device.location(), "failed to claim device");
                return Err(Error::Busy(format!(
                    "failed to claim {} after {CLAIM_RETRIES} tries",
                    self.device.location()
                )));
            }
            if tries > 0 {
                self.msleep(CLAIM_RETRY_DELAY_MS);
            }
            tries += 1;

            match handle.active_configuration() {
                Ok(c) if c == self.configuration => {}
                _ => {
                    if let Err(e) = handle.set_active_configuration(self.configuration) {
                        debug!(try_nr = tries, "set configuration failed: {}", e);
                        continue;
                    }
                }
            }

            let mut claimed = Vec::with_capacity(self.interfaces.len());
            let mut failed = false;
            for iface in &self.interfaces {
                if let Err(e) = handle.claim_interface(iface.number) {
                    debug!(iface = iface.number, try_nr = tries, "claim failed: {}", e);
                    failed = true;
                    break;
                }
                claimed.push(iface.number);
                if let Err(e) = handle.set_alternate_setting(iface.number, iface.alt_setting) {
                    warn!(
                        iface = iface.number,
                        alt = iface.alt_setting,
                        "failed to select alternate setting: {}",
                        e
                    );
                }
            }

            // Firmware may have switched the configuration under us.
            if !failed && handle.active_configuration().ok() != Some(self.configuration) {
                debug!(try_nr = tries, "configuration changed during claim");
                failed = true;
            }

            if failed {
                for nr in claimed.into_iter().rev() {
                    let _ = handle.release_interface(nr);
                }
                continue;
            }
            break;
        }

        debug!(device = %self.device.location(), "claimed");
        self.handle = Some(handle);
        Ok(())
    }

    /// Release every interface and reattach kernel drivers.
    pub fn release(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        for iface in self.interfaces.iter().rev() {
            if let Err(e) = handle.release_interface(iface.number) {
                error!(iface = iface.number, "failed to release interface: {}", e);
            }
        }
        for iface in self.interfaces.iter().rev() {
            let active = handle.kernel_driver_active(iface.number).unwrap_or_else(|e| {
                warn!(iface = iface.number, "kernel driver query failed, not reattaching: {}", e);
                true
            });
            if active {
                continue;
            }
            if let Err(e) = handle.attach_kernel_driver(iface.number) {
                error!(
                    device = %self.device.location(),
                    iface = iface.number,
                    "failed to reattach kernel driver, replug the device: {}",
                    e
                );
            }
        }
        debug!(device = %self.device.location(), "released");
    }

    /// Claim on the first reference only.
    pub fn claim_refcount(&mut self) -> Result<()> {
        if self.claim_count == 0 {
            self.claim()?;
        }
        self.claim_count += 1;
        Ok(())
    }

    /// Release on the last reference only.
    pub fn release_refcount(&mut self) {
        match self.claim_count {
            0 => warn!(device = %self.device.location(), "unbalanced release"),
            1 => {
                self.claim_count = 0;
                self.release();
            }
            _ => self.claim_count -= 1,
        }
    }

    /// Drop every outstanding claim reference.
    pub fn release_all(&mut self) {
        while self.claim_count > 0 {
            self.release_refcount();
        }
    }

    fn handle_mut(&mut self) -> Result<&mut Box<dyn UsbHandle>> {
        self.handle.as_mut().ok_or_else(Error::not_claimed)
    }

    /// Control OUT transfer that must move exactly `data.len()` bytes.
    pub fn control_write(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<()> {
        trace!(
            request = format_args!("0x{:02X}", request),
            value = format_args!("0x{:04X}", value),
            index,
            "USB write\n{}",
            hex_dump(data)
        );
        let handle = self.handle_mut()?;
        let n = handle
            .write_control(request_type, request, value, index, data, USB_TIMEOUT)
            .map_err(|e| {
                error!(
                    request = format_args!("0x{:02X}", request),
                    value = format_args!("0x{:04X}", value),
                    "USB write failed: {}",
                    e
                );
                e
            })?;
        if n != data.len() {
            error!(
                value = format_args!("0x{:04X}", value),
                expected = data.len(),
                actual = n,
                "short USB write"
            );
            return Err(Error::ShortTransfer {
                what: format!("write 0x{value:04X}"),
                expected: data.len(),
                actual: n,
            });
        }
        Ok(())
    }

    /// Control IN transfer that must fill `buf` completely.
    pub fn control_read(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<()> {
        let handle = self.handle_mut()?;
        let n = handle
            .read_control(request_type, request, value, index, buf, USB_TIMEOUT)
            .map_err(|e| {
                error!(
                    request = format_args!("0x{:02X}", request),
                    value = format_args!("0x{:04X}", value),
                    "USB read failed: {}",
                    e
                );
                e
            })?;
        if n != buf.len() {
            error!(
                value = format_args!("0x{:04X}", value),
                expected = buf.len(),
                actual = n,
                "short USB read"
            );
            return Err(Error::ShortTransfer {
                what: format!("read 0x{value:04X}"),
                expected: buf.len(),
                actual: n,
            });
        }
        trace!(
            request = format_args!("0x{:02X}", request),
            value = format_args!("0x{:04X}", value),
            "USB read\n{}",
            hex_dump(buf)
        );
        Ok(())
    }

    /// Read the serial number string descriptor. Requires a claim.
    pub fn read_serial(&mut self) -> Result<String> {
        let index = self.device.descriptor.serial_index;
        if index == 0 {
            return Ok(String::new());
        }
        self.handle_mut()?.read_string_ascii(index)
    }
}

impl Drop for UsbContext {
    fn drop(&mut self) {
        if self.is_claimed() {
            self.claim_count = 0;
            self.release();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    fn device() -> MockDevice {
        MockDevice::new(3, 14, 0x1532, 0x0016)
    }

    #[test]
    fn interface_table_is_bounded() {
        let dev = device();
        let (_bus, mut ctx) = context_for(&dev);
        for i in 0..MAX_INTERFACES as u8 {
            ctx.add_used_interface(i, 0).unwrap();
        }
        assert!(matches!(
            ctx.add_used_interface(9, 0),
            Err(Error::Capacity(_))
        ));
    }

    #[test]
    fn claim_detaches_kernel_driver_and_selects_configuration() {
        let dev = device();
        let (_bus, mut ctx) = context_for(&dev);
        ctx.add_used_interface(0, 0).unwrap();
        ctx.claim().unwrap();
        assert!(ctx.is_claimed());
        {
            let s = dev.state.lock().unwrap();
            assert_eq!(s.detaches, 1);
            assert_eq!(s.configuration, 1);
            assert_eq!(s.claims, 1);
        }
        ctx.release();
        let s = dev.state.lock().unwrap();
        assert_eq!(s.releases, 1);
        assert_eq!(s.attaches, 1);
        assert!(!ctx.is_claimed());
    }

    #[test]
    fn failed_kernel_driver_query_still_detaches() {
        let dev = device();
        dev.state.lock().unwrap().kernel_query_fails = true;
        let (_bus, mut ctx) = context_for(&dev);
        ctx.add_used_interface(0, 0).unwrap();
        ctx.claim().unwrap();
        assert_eq!(dev.state.lock().unwrap().detaches, 1);
    }

    #[test]
    fn claim_retries_busy_interface() {
        let dev = device();
        dev.state.lock().unwrap().fail_claims = 3;
        let (bus, mut ctx) = context_for(&dev);
        ctx.add_used_interface(0, 0).unwrap();
        ctx.claim().unwrap();
        assert_eq!(bus.clock.now(), Duration::from_millis(300));
    }

    #[test]
    fn claim_gives_up_after_bounded_tries() {
        let dev = device();
        dev.state.lock().unwrap().fail_claims = 100;
        let (_bus, mut ctx) = context_for(&dev);
        ctx.add_used_interface(0, 0).unwrap();
        assert!(matches!(ctx.claim(), Err(Error::Busy(_))));
        assert!(!ctx.is_claimed());
    }

    #[test]
    fn claim_of_missing_device_is_not_found() {
        let dev = device();
        let (bus, mut ctx) = context_for(&dev);
        bus.unplug(3, 14);
        assert!(matches!(ctx.claim(), Err(Error::DeviceNotFound(_))));
    }

    #[test]
    fn transfers_require_claim() {
        let dev = device();
        let (_bus, mut ctx) = context_for(&dev);
        let err = ctx
            .control_write(REQTYPE_CLASS_IFACE_OUT, REQ_SET_CONFIGURATION, 0x06, 0, &[1])
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[test]
    fn short_read_is_an_error() {
        let dev = device().with_responder(|_, _| vec![1, 2]);
        let (_bus, mut ctx) = context_for(&dev);
        ctx.claim().unwrap();
        let mut buf = [0u8; 4];
        let err = ctx
            .control_read(REQTYPE_CLASS_IFACE_IN, REQ_CLEAR_FEATURE, 0x05, 0, &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ShortTransfer {
                expected: 4,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn writes_are_recorded() {
        let dev = device();
        let (_bus, mut ctx) = context_for(&dev);
        ctx.claim().unwrap();
        ctx.control_write(REQTYPE_CLASS_IFACE_OUT, REQ_SET_CONFIGURATION, 0x07, 0, &[1])
            .unwrap();
        let w = dev.writes();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].value, 0x07);
        assert_eq!(w[0].data, vec![1]);
    }

    #[test]
    fn refcounted_claims_nest() {
        let dev = device();
        let (_bus, mut ctx) = context_for(&dev);
        ctx.add_used_interface(0, 0).unwrap();
        for _ in 0..3 {
            ctx.claim_refcount().unwrap();
        }
        ctx.release_refcount();
        ctx.release_refcount();
        assert!(ctx.is_claimed());
        ctx.release_refcount();
        assert!(!ctx.is_claimed());
        let s = dev.state.lock().unwrap();
        assert_eq!((s.claims, s.releases), (1, 1));
    }

    #[test]
    fn serial_is_read_from_string_descriptor() {
        let dev = device().with_serial("XYZ123");
        let (_bus, mut ctx) = context_for(&dev);
        ctx.claim().unwrap();
        assert_eq!(ctx.read_serial().unwrap(), "XYZ123");
    }
}
