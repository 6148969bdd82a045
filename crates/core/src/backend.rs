//! libusb backend via `rusb`.

use crate::error::{Error, Result};
use crate::usb::{DeviceDescriptor, UsbBackend, UsbDeviceInfo, UsbHandle};
use rusb::UsbContext as _;
use std::time::Duration;
use tracing::debug;

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::NoDevice | rusb::Error::NotFound => Error::DeviceNotFound(e.to_string()),
            rusb::Error::Busy => Error::Busy(e.to_string()),
            rusb::Error::Access => Error::PermissionDenied(e.to_string()),
            rusb::Error::Timeout => Error::Timeout(e.to_string()),
            other => Error::Usb(other.to_string()),
        }
    }
}

fn bcd_from_version(v: rusb::Version) -> u16 {
    let major = v.major() as u16;
    ((major / 10) << 12) | ((major % 10) << 8) | ((v.minor() as u16) << 4) | v.sub_minor() as u16
}

fn device_info(dev: &rusb::Device<rusb::Context>) -> Result<UsbDeviceInfo> {
    let desc = dev.device_descriptor()?;
    Ok(UsbDeviceInfo {
        bus: dev.bus_number(),
        address: dev.address(),
        descriptor: DeviceDescriptor {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            bcd_device: bcd_from_version(desc.device_version()),
            class: desc.class_code(),
            subclass: desc.sub_class_code(),
            protocol: desc.protocol_code(),
            max_packet_size: desc.max_packet_size(),
            serial_index: desc.serial_number_string_index().unwrap_or(0),
            num_configurations: desc.num_configurations(),
        },
    })
}

/// Real USB bus.
pub struct RusbBackend {
    context: rusb::Context,
}

impl RusbBackend {
    pub fn new() -> Result<Self> {
        let context = rusb::Context::new()?;
        debug!(hotplug = rusb::has_hotplug(), "libusb initialized");
        Ok(Self { context })
    }
}

impl UsbBackend for RusbBackend {
    fn scan(&self) -> Result<Vec<UsbDeviceInfo>> {
        let list = self.context.devices()?;
        let mut out = Vec::with_capacity(list.len());
        for dev in list.iter() {
            match device_info(&dev) {
                Ok(info) => out.push(info),
                Err(e) => debug!(
                    bus = dev.bus_number(),
                    address = dev.address(),
                    "skipping device without descriptor: {}",
                    e
                ),
            }
        }
        Ok(out)
    }

    fn open(&self, info: &UsbDeviceInfo) -> Result<Box<dyn UsbHandle>> {
        let dev = self
            .context
            .devices()?
            .iter()
            .find(|d| d.bus_number() == info.bus && d.address() == info.address)
            .ok_or_else(|| Error::DeviceNotFound(info.location()))?;
        let handle = dev.open()?;
        Ok(Box::new(RusbHandle { handle }))
    }
}

struct RusbHandle {
    handle: rusb::DeviceHandle<rusb::Context>,
}

impl UsbHandle for RusbHandle {
    fn kernel_driver_active(&mut self, iface: u8) -> Result<bool> {
        match self.handle.kernel_driver_active(iface) {
            Ok(active) => Ok(active),
            // Platforms without kernel driver support.
            Err(rusb::Error::NotSupported) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn detach_kernel_driver(&mut self, iface: u8) -> Result<()> {
        Ok(self.handle.detach_kernel_driver(iface)?)
    }

    fn attach_kernel_driver(&mut self, iface: u8) -> Result<()> {
        Ok(self.handle.attach_kernel_driver(iface)?)
    }

    fn active_configuration(&mut self) -> Result<u8> {
        Ok(self.handle.active_configuration()?)
    }

    fn set_active_configuration(&mut self, config: u8) -> Result<()> {
        Ok(self.handle.set_active_configuration(config)?)
    }

    fn claim_interface(&mut self, iface: u8) -> Result<()> {
        Ok(self.handle.claim_interface(iface)?)
    }

    fn release_interface(&mut self, iface: u8) -> Result<()> {
        Ok(self.handle.release_interface(iface)?)
    }

    fn set_alternate_setting(&mut self, iface: u8, alt: u8) -> Result<()> {
        Ok(self.handle.set_alternate_setting(iface, alt)?)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .write_control(request_type, request, value, index, data, timeout)?)
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .read_control(request_type, request, value, index, buf, timeout)?)
    }

    fn read_string_ascii(&mut self, index: u8) -> Result<String> {
        Ok(self.handle.read_string_descriptor_ascii(index)?)
    }

    fn reset(&mut self) -> Result<()> {
        Ok(self.handle.reset()?)
    }
}
