//! Krait: one resolution switch, nothing else.

use crate::driver::{find_mapping, MouseDriver};
use crate::error::{Error, Result};
use crate::identity::usb_idstr;
use crate::model::{DpiMapping, MouseType};
use crate::usb::{UsbContext, REQTYPE_CLASS_IFACE_OUT, REQ_SET_CONFIGURATION};
use tracing::debug;

pub struct Krait {
    idstr: String,
    mappings: Vec<DpiMapping>,
    cur_mapping: u32,
}

impl Krait {
    pub fn new() -> Self {
        Self {
            idstr: String::new(),
            mappings: vec![DpiMapping::single(0, 400), DpiMapping::single(1, 1600)],
            cur_mapping: 1,
        }
    }

    fn commit_mapping(&self, ctx: &mut UsbContext) -> Result<()> {
        let value: u8 = match find_mapping(&self.mappings, self.cur_mapping)?.res[0] {
            400 => 6,
            1600 => 4,
            other => return Err(Error::InvalidArgument(format!("resolution {other}"))),
        };
        ctx.control_write(REQTYPE_CLASS_IFACE_OUT, REQ_SET_CONFIGURATION, 0x02, 0, &[value])
    }
}

impl Default for Krait {
    fn default() -> Self {
        Self::new()
    }
}

impl MouseDriver for Krait {
    fn init(&mut self, ctx: &mut UsbContext) -> Result<()> {
        ctx.add_used_interface(0, 0)?;
        self.idstr = usb_idstr(ctx, "Krait", true, None);
        debug!(idstr = %self.idstr, "Krait initialized");
        Ok(())
    }

    fn mouse_type(&self) -> MouseType {
        MouseType::Krait
    }

    fn idstr(&self) -> &str {
        &self.idstr
    }

    fn commit(&mut self, ctx: &mut UsbContext, force: bool) -> Result<()> {
        ctx.ensure_claimed()?;
        if force {
            self.commit_mapping(ctx)?;
        }
        Ok(())
    }

    fn supported_resolutions(&self) -> Vec<u32> {
        vec![400, 1600]
    }

    fn supported_dpimappings(&self) -> Vec<DpiMapping> {
        self.mappings.clone()
    }

    fn dpimapping(&self, _profile: u32, _axis: Option<u32>) -> Option<DpiMapping> {
        find_mapping(&self.mappings, self.cur_mapping).ok().cloned()
    }

    fn set_dpimapping(
        &mut self,
        ctx: &mut UsbContext,
        _profile: u32,
        _axis: Option<u32>,
        nr: u32,
    ) -> Result<()> {
        ctx.ensure_claimed()?;
        find_mapping(&self.mappings, nr)?;
        let old = self.cur_mapping;
        self.cur_mapping = nr;
        if let Err(e) = self.commit_mapping(ctx) {
            self.cur_mapping = old;
            return Err(e);
        }
        Ok(())
    }
}
