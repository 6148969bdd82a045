//! Identity strings and config-section glob matching.
//!
//! An identity string is the stable key for one physical device:
//!
//! ```text
//! Mouse:DeathAdder:USB-003-014:1532-0016-0
//! ^type ^name      ^bus position ^vendor-product-serial
//! ```

use crate::usb::{UsbContext, UsbDeviceInfo};
use crate::util::ascii_sanitize;
use tracing::{debug, error};

pub const DEVTYPE_MOUSE: &str = "Mouse";
pub const BUSTYPE_USB: &str = "USB";

/// Serials longer than this are cut.
const MAX_SERIAL_LEN: usize = 63;

/// Build the identity string of a USB mouse.
///
/// `with_devnum` adds the device address to the bus position, for devices
/// whose serial does not tell two units apart. An empty serial becomes `0`.
pub fn gen_idstr(dev: &UsbDeviceInfo, devname: &str, with_devnum: bool, serial: &str) -> String {
    let mut serial = ascii_sanitize(serial);
    serial.truncate(MAX_SERIAL_LEN);
    if serial.is_empty() {
        serial.push('0');
    }
    let devid = format!(
        "{:04X}-{:04X}-{}",
        dev.descriptor.vendor_id, dev.descriptor.product_id, serial
    );
    let buspos = if with_devnum {
        format!("{:03}-{:03}", dev.bus, dev.address)
    } else {
        format!("{:03}", dev.bus)
    };
    format!("{DEVTYPE_MOUSE}:{devname}:{BUSTYPE_USB}-{buspos}:{devid}")
}

/// Identity string of the device behind `ctx`.
///
/// Without a driver-supplied serial, the serial string descriptor is read,
/// claiming the device for the duration if needed. Read failures fall back
/// to serial `0`.
pub fn usb_idstr(
    ctx: &mut UsbContext,
    devname: &str,
    with_devnum: bool,
    serial: Option<&str>,
) -> String {
    let serial = match serial {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => read_serial(ctx),
    };
    gen_idstr(ctx.device(), devname, with_devnum, &serial)
}

fn read_serial(ctx: &mut UsbContext) -> String {
    if ctx.device().descriptor.serial_index == 0 {
        return String::new();
    }
    if let Err(e) = ctx.claim_refcount() {
        error!("failed to claim device for serial fetching: {}", e);
        return String::new();
    }
    let serial = ctx.read_serial().unwrap_or_else(|e| {
        debug!("no serial number: {}", e);
        String::new()
    });
    ctx.release_refcount();
    serial
}

/// The four `:`-separated fields of an identity string or pattern.
pub fn split_idstr(s: &str) -> Option<[&str; 4]> {
    let mut it = s.split(':');
    let fields = [it.next()?, it.next()?, it.next()?, it.next()?];
    if it.next().is_some() {
        return None;
    }
    Some(fields)
}

/// Case-insensitive glob where `*` matches any run of characters.
pub fn glob(pattern: &str, s: &str) -> bool {
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let s: Vec<char> = s.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut pi, mut si) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while si < s.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, si));
            pi += 1;
        } else if pi < p.len() && p[pi] == s[si] {
            pi += 1;
            si += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            si = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Leading `-`-separated prefixes of an identity field, with and without a
/// leading alphabetic bus-type component.
fn field_prefixes(field: &str) -> Vec<String> {
    let parts: Vec<&str> = field.split('-').collect();
    let mut out: Vec<String> = (1..=parts.len()).map(|k| parts[..k].join("-")).collect();
    if parts.len() > 1 && parts[0].chars().all(|c| c.is_ascii_alphabetic()) {
        out.extend((2..=parts.len()).map(|k| parts[1..k].join("-")));
    }
    out
}

fn field_match(pattern: &str, field: &str) -> bool {
    glob(pattern, field) || field_prefixes(field).iter().any(|p| glob(pattern, p))
}

/// Match a config section name against an identity string.
///
/// Both must have exactly four fields. `mouse:*:003:*` matches every mouse
/// on bus 3, with or without the `USB-` bus-type tag and device address.
pub fn glob_match(pattern: &str, idstr: &str) -> bool {
    match (split_idstr(pattern), split_idstr(idstr)) {
        (Some(p), Some(id)) => p.iter().zip(id.iter()).all(|(p, f)| field_match(p, f)),
        _ => false,
    }
}
