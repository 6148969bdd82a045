//! Library session: the USB backend, the list of adopted mice, the loaded
//! configuration and the event handler.

use crate::backend::RusbBackend;
use crate::config::{apply_initial_config, Config, DEFAULT_CONFIG_PATH};
use crate::drivers::{match_device, DriverKind};
use crate::error::{Error, Result};
use crate::identity::glob_match;
use crate::mouse::Mouse;
use crate::timing::{Clock, SystemClock};
use crate::usb::{UsbBackend, UsbContext, UsbDeviceInfo};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Device list change, delivered synchronously while the list changes.
pub enum Event<'a> {
    MouseAdded(&'a Mouse),
    MouseRemoved(&'a Mouse),
}

pub type EventHandler = Box<dyn FnMut(&Event<'_>) + Send>;

pub struct Context {
    backend: Arc<dyn UsbBackend>,
    clock: Arc<dyn Clock>,
    mice: Vec<Mouse>,
    config: Option<Config>,
    handler: Option<EventHandler>,
    profile_emulation: bool,
}

fn notify(handler: &mut Option<EventHandler>, event: Event<'_>) {
    if let Some(h) = handler.as_mut() {
        h(&event);
    }
}

fn same_position(m: &Mouse, dev: &UsbDeviceInfo) -> bool {
    m.device().bus == dev.bus && m.device().address == dev.address
}

impl Context {
    pub fn new(enable_profile_emulation: bool) -> Result<Self> {
        let backend = Arc::new(RusbBackend::new()?);
        Ok(Self::with_backend(backend, SystemClock::shared(), enable_profile_emulation))
    }

    pub fn with_backend(
        backend: Arc<dyn UsbBackend>,
        clock: Arc<dyn Clock>,
        enable_profile_emulation: bool,
    ) -> Self {
        Self {
            backend,
            clock,
            mice: Vec::new(),
            config: None,
            handler: None,
            profile_emulation: enable_profile_emulation,
        }
    }

    /// `None` loads the default file, an empty path clears the configuration.
    pub fn load_config(&mut self, path: Option<&str>) -> Result<()> {
        match path {
            Some("") => {
                self.config = None;
                debug!("configuration cleared");
            }
            other => {
                let path = other.unwrap_or(DEFAULT_CONFIG_PATH);
                self.config = Some(Config::load(Path::new(path))?);
            }
        }
        Ok(())
    }

    pub fn set_config(&mut self, config: Option<Config>) {
        self.config = config;
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    pub fn register_event_handler(&mut self, handler: EventHandler) -> Result<()> {
        if self.handler.is_some() {
            return Err(Error::AlreadyExists("event handler".into()));
        }
        self.handler = Some(handler);
        Ok(())
    }

    pub fn unregister_event_handler(&mut self) {
        self.handler = None;
    }

    pub fn mice(&self) -> &[Mouse] {
        &self.mice
    }

    pub fn mice_mut(&mut self) -> &mut [Mouse] {
        &mut self.mice
    }

    /// First mouse whose identity string matches `pattern`.
    pub fn find_mouse(&self, pattern: &str) -> Option<&Mouse> {
        self.mice.iter().find(|m| glob_match(pattern, m.idstr()))
    }

    pub fn find_mouse_mut(&mut self, pattern: &str) -> Option<&mut Mouse> {
        self.mice.iter_mut().find(|m| glob_match(pattern, m.idstr()))
    }

    /// Sync the mouse list with the bus. Known mice stay untouched, new
    /// ones are adopted, vanished ones are dropped.
    pub fn rescan_mice(&mut self) -> Result<&[Mouse]> {
        let devices = self.backend.scan()?;
        let mut present = vec![false; self.mice.len()];
        let mut added = Vec::new();
        for dev in devices {
            let Some(kind) = match_device(&dev.descriptor) else {
                continue;
            };
            if let Some(i) = self.mice.iter().position(|m| same_position(m, &dev)) {
                present[i] = true;
                continue;
            }
            let ctx = UsbContext::new(Arc::clone(&self.backend), Arc::clone(&self.clock), dev.clone());
            if let Some(m) = self.adopt(ctx, &dev, kind) {
                added.push(m);
            }
        }

        let mut i = 0;
        self.mice.retain_mut(|m| {
            let keep = present[i];
            i += 1;
            if !keep {
                info!(idstr = %m.idstr(), "mouse removed");
                notify(&mut self.handler, Event::MouseRemoved(m));
                m.release_all();
            }
            keep
        });
        for m in added {
            info!(idstr = %m.idstr(), "mouse added");
            notify(&mut self.handler, Event::MouseAdded(&m));
            self.mice.push(m);
        }
        Ok(&self.mice)
    }

    fn adopt(
        &self,
        ctx: UsbContext,
        dev: &UsbDeviceInfo,
        kind: DriverKind,
    ) -> Option<Mouse> {
        let mut m = match Mouse::new(ctx, kind) {
            Ok(m) => m,
            Err(e) => {
                error!(
                    device = %dev.location(),
                    vid = format_args!("0x{:04X}", dev.descriptor.vendor_id),
                    pid = format_args!("0x{:04X}", dev.descriptor.product_id),
                    "failed to initialize mouse: {}",
                    e
                );
                return None;
            }
        };
        if self.profile_emulation && m.nr_profiles() == 1 {
            if let Err(e) = m.enable_profile_emulation() {
                error!(idstr = %m.idstr(), "profile emulation failed, dropping mouse: {}", e);
                m.release_all();
                return None;
            }
        }
        if let Some(config) = &self.config {
            if let Err(e) = apply_initial_config(&mut m, config) {
                error!(idstr = %m.idstr(), "{}", e);
            }
        }
        Some(m)
    }

    /// Force-commit every mouse. Stops at the first failure.
    pub fn reconfig_mice(&mut self) -> Result<()> {
        for m in &mut self.mice {
            m.claim()?;
            let res = m.commit(true);
            let released = m.release();
            res?;
            released?;
        }
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for mut m in self.mice.drain(..) {
            m.release_all();
            notify(&mut self.handler, Event::MouseRemoved(&m));
        }
    }
}
