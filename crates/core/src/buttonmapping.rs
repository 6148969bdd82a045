//! Physical-to-logical button mapping and its on-wire table format.
//!
//! Several protocols store the button map as a flat run of
//! `(physical, logical)` byte pairs, each followed by a fixed number of
//! unused spacing bytes. The spacing is device specific.
//!
//! Id 0 is reserved on both sides and never appears in a valid table.

use crate::error::{Error, Result};
use crate::util::buffer_is_all_zero;
use serde::Serialize;
use tracing::{error, warn};

/// Logical function ids shared by most devices.
pub mod func {
    pub const LEFT: u8 = 0x01;
    pub const RIGHT: u8 = 0x02;
    pub const MIDDLE: u8 = 0x03;
    pub const DBLCLICK: u8 = 0x04;
    pub const ADVANCED: u8 = 0x05;
    pub const MACRO: u8 = 0x06;
    pub const PROFDOWN: u8 = 0x0A;
    pub const PROFUP: u8 = 0x0B;
    pub const DPIUP: u8 = 0x0C;
    pub const DPIDOWN: u8 = 0x0D;
    pub const DPI1: u8 = 0x0E;
    pub const DPI2: u8 = 0x0F;
    pub const DPI3: u8 = 0x10;
    pub const DPI4: u8 = 0x11;
    pub const DPI5: u8 = 0x12;
    pub const WIN5: u8 = 0x1A;
    pub const WIN4: u8 = 0x1B;
    pub const SCROLLUP: u8 = 0x30;
    pub const SCROLLDWN: u8 = 0x31;
}

/// A physical control on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Button {
    pub id: u8,
    pub name: &'static str,
}

impl Button {
    pub const fn new(id: u8, name: &'static str) -> Self {
        Self { id, name }
    }
}

/// An assignable logical behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ButtonFunction {
    pub id: u8,
    pub name: &'static str,
}

impl ButtonFunction {
    pub const fn new(id: u8, name: &'static str) -> Self {
        Self { id, name }
    }
}

pub const LEFT: ButtonFunction = ButtonFunction::new(func::LEFT, "Leftclick");
pub const RIGHT: ButtonFunction = ButtonFunction::new(func::RIGHT, "Rightclick");
pub const MIDDLE: ButtonFunction = ButtonFunction::new(func::MIDDLE, "Middleclick");
pub const DBLCLICK: ButtonFunction = ButtonFunction::new(func::DBLCLICK, "Doubleclick");
pub const ADVANCED: ButtonFunction = ButtonFunction::new(func::ADVANCED, "Advanced");
pub const MACRO: ButtonFunction = ButtonFunction::new(func::MACRO, "Macro");
pub const PROFDOWN: ButtonFunction = ButtonFunction::new(func::PROFDOWN, "Profile switch down");
pub const PROFUP: ButtonFunction = ButtonFunction::new(func::PROFUP, "Profile switch up");
pub const DPIUP: ButtonFunction = ButtonFunction::new(func::DPIUP, "DPI mapping up");
pub const DPIDOWN: ButtonFunction = ButtonFunction::new(func::DPIDOWN, "DPI mapping down");
pub const DPI1: ButtonFunction = ButtonFunction::new(func::DPI1, "1st DPI mapping");
pub const DPI2: ButtonFunction = ButtonFunction::new(func::DPI2, "2nd DPI mapping");
pub const DPI3: ButtonFunction = ButtonFunction::new(func::DPI3, "3rd DPI mapping");
pub const DPI4: ButtonFunction = ButtonFunction::new(func::DPI4, "4th DPI mapping");
pub const DPI5: ButtonFunction = ButtonFunction::new(func::DPI5, "5th DPI mapping");
pub const WIN5: ButtonFunction = ButtonFunction::new(func::WIN5, "Windows button 5");
pub const WIN4: ButtonFunction = ButtonFunction::new(func::WIN4, "Windows button 4");
pub const SCROLLUP: ButtonFunction = ButtonFunction::new(func::SCROLLUP, "Scroll wheel up");
pub const SCROLLDWN: ButtonFunction = ButtonFunction::new(func::SCROLLDWN, "Scroll wheel down");

/// One wire entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ButtonMapping {
    pub physical: u8,
    pub logical: u8,
}

impl ButtonMapping {
    pub const fn new(physical: u8, logical: u8) -> Self {
        Self { physical, logical }
    }
}

/// Write `mappings` into `buf`, each pair followed by `spacing` bytes.
///
/// Spacing bytes are left untouched, so pass a zeroed buffer.
pub fn encode(buf: &mut [u8], mappings: &[ButtonMapping], spacing: usize) -> Result<()> {
    let mut ptr = 0;
    for m in mappings {
        if ptr + 2 > buf.len() {
            error!(
                len = buf.len(),
                count = mappings.len(),
                spacing,
                "button map does not fit"
            );
            return Err(Error::Capacity(format!(
                "button map of {} entries needs more than {} bytes",
                mappings.len(),
                buf.len()
            )));
        }
        buf[ptr] = m.physical;
        buf[ptr + 1] = m.logical;
        ptr += 2 + spacing;
    }
    Ok(())
}

/// Read `count` pairs from `raw` in wire order.
///
/// A zero id on either side is a decode error. Nonzero spacing bytes are
/// logged and otherwise ignored; some firmware leaves garbage there.
pub fn decode(raw: &[u8], count: usize, spacing: usize) -> Result<Vec<ButtonMapping>> {
    let mut out = Vec::with_capacity(count);
    let mut ptr = 0;
    for i in 0..count {
        if ptr + 2 > raw.len() {
            error!(len = raw.len(), count, "button map truncated");
            return Err(Error::Decode(format!(
                "button map holds {i} of {count} entries"
            )));
        }
        let m = ButtonMapping::new(raw[ptr], raw[ptr + 1]);
        if m.physical == 0 || m.logical == 0 {
            error!(
                entry = i,
                physical = format_args!("0x{:02X}", m.physical),
                logical = format_args!("0x{:02X}", m.logical),
                "invalid button mapping"
            );
            return Err(Error::Decode(format!(
                "button map entry {i} has a zero id ({:02X}:{:02X})",
                m.physical, m.logical
            )));
        }
        ptr += 2;
        let pad_end = (ptr + spacing).min(raw.len());
        if !buffer_is_all_zero(&raw[ptr..pad_end]) {
            warn!(
                entry = i,
                physical = format_args!("0x{:02X}", m.physical),
                "button map spacing contains nonzero data"
            );
        }
        ptr += spacing;
        out.push(m);
    }
    Ok(out)
}

/// Decode `raw` into `mappings`, matching entries by physical id.
///
/// Every physical id in `mappings` must receive a logical id, and the wire
/// may not name a button that is not in `mappings`.
pub fn decode_into(raw: &[u8], mappings: &mut [ButtonMapping], spacing: usize) -> Result<()> {
    let decoded = decode(raw, mappings.len(), spacing)?;
    let mut updated = mappings.to_vec();
    for m in updated.iter_mut() {
        m.logical = 0;
    }
    for d in decoded {
        let target = updated
            .iter_mut()
            .find(|m| m.physical == d.physical)
            .ok_or_else(|| {
                error!(physical = format_args!("0x{:02X}", d.physical), "unknown button in map");
                Error::Decode(format!("unknown physical button 0x{:02X}", d.physical))
            })?;
        target.logical = d.logical;
    }
    if let Some(missing) = updated.iter().find(|m| m.logical == 0) {
        return Err(Error::Decode(format!(
            "no mapping for physical button 0x{:02X}",
            missing.physical
        )));
    }
    mappings.copy_from_slice(&updated);
    Ok(())
}

pub fn function_by_id(functions: &[ButtonFunction], id: u8) -> Option<&ButtonFunction> {
    functions.iter().find(|f| f.id == id)
}

pub fn function_by_name<'a>(functions: &'a [ButtonFunction], name: &str) -> Option<&'a ButtonFunction> {
    functions.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

pub fn mapping_by_physical(mappings: &[ButtonMapping], physical: u8) -> Option<&ButtonMapping> {
    mappings.iter().find(|m| m.physical == physical)
}

pub fn mapping_by_physical_mut(
    mappings: &mut [ButtonMapping],
    physical: u8,
) -> Option<&mut ButtonMapping> {
    mappings.iter_mut().find(|m| m.physical == physical)
}

/// The function currently assigned to `button`.
pub fn function_by_button<'a>(
    mappings: &[ButtonMapping],
    functions: &'a [ButtonFunction],
    button: &Button,
) -> Option<&'a ButtonFunction> {
    let m = mapping_by_physical(mappings, button.id)?;
    function_by_id(functions, m.logical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ButtonMapping> {
        vec![
            ButtonMapping::new(0x01, func::LEFT),
            ButtonMapping::new(0x02, func::RIGHT),
            ButtonMapping::new(0x05, func::DPIUP),
        ]
    }

    #[test]
    fn encode_places_pairs_at_spacing() {
        let mut buf = vec![0u8; 3 * 5];
        encode(&mut buf, &sample(), 3).unwrap();
        assert_eq!(&buf[0..2], &[0x01, 0x01]);
        assert_eq!(&buf[5..7], &[0x02, 0x02]);
        assert_eq!(&buf[10..12], &[0x05, 0x0C]);
        assert!(buffer_is_all_zero(&buf[2..5]));
    }

    #[test]
    fn encode_rejects_small_buffer() {
        let mut buf = vec![0u8; 8];
        assert!(matches!(encode(&mut buf, &sample(), 3), Err(Error::Capacity(_))));
    }

    #[test]
    fn decode_reverses_encode() {
        let mut buf = vec![0u8; 3 * (2 + 33)];
        encode(&mut buf, &sample(), 33).unwrap();
        assert_eq!(decode(&buf, 3, 33).unwrap(), sample());
    }

    #[test]
    fn decode_tolerates_short_final_padding() {
        // last entry is followed by fewer spacing bytes than the others
        let mut buf = vec![0u8; 2 + 4 + 2 + 1];
        encode(&mut buf, &sample()[..2], 4).unwrap();
        assert_eq!(decode(&buf, 2, 4).unwrap(), sample()[..2].to_vec());
    }

    #[test]
    fn decode_rejects_zero_ids() {
        let buf = [0x01, 0x01, 0, 0x00, 0x02, 0];
        assert!(matches!(decode(&buf, 2, 1), Err(Error::Decode(_))));
        let buf = [0x00, 0x01, 0];
        assert!(matches!(decode(&buf, 1, 1), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_ignores_padding_garbage() {
        let mut buf = vec![0u8; 3 * 4];
        encode(&mut buf, &sample(), 2).unwrap();
        buf[2] = 0xAA;
        buf[7] = 0x55;
        assert_eq!(decode(&buf, 3, 2).unwrap(), sample());
    }

    #[test]
    fn decode_rejects_truncated_table() {
        let buf = [0x01, 0x01, 0, 0];
        assert!(matches!(decode(&buf, 2, 2), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_into_matches_physical_ids() {
        let buf = [0x02, 0x0E, 0x01, 0x0C];
        let mut maps = vec![ButtonMapping::new(0x01, 0), ButtonMapping::new(0x02, 0)];
        decode_into(&buf, &mut maps, 0).unwrap();
        assert_eq!(maps[0].logical, func::DPIUP);
        assert_eq!(maps[1].logical, func::DPI1);
    }

    #[test]
    fn decode_into_rejects_unknown_and_missing_buttons() {
        let mut maps = vec![ButtonMapping::new(0x01, 0), ButtonMapping::new(0x02, 0)];
        assert!(decode_into(&[0x01, 0x01, 0x09, 0x02], &mut maps, 0).is_err());
        assert!(decode_into(&[0x01, 0x01, 0x01, 0x02], &mut maps, 0).is_err());
    }

    #[test]
    fn failed_decode_leaves_table_untouched() {
        let mut maps = vec![ButtonMapping::new(0x01, func::LEFT), ButtonMapping::new(0x02, func::RIGHT)];
        let before = maps.clone();
        assert!(decode_into(&[0x01, 0x0E, 0x09, 0x0C], &mut maps, 0).is_err());
        assert_eq!(maps, before);
        assert!(decode_into(&[0x01, 0x0E, 0x01, 0x0C], &mut maps, 0).is_err());
        assert_eq!(maps, before);
    }

    #[test]
    fn function_lookups() {
        let funcs = [LEFT, RIGHT, DPI1, SCROLLDWN];
        assert_eq!(function_by_id(&funcs, func::DPI1).unwrap().name, "1st DPI mapping");
        assert_eq!(function_by_name(&funcs, "rightclick").unwrap().id, func::RIGHT);
        assert!(function_by_id(&funcs, func::MACRO).is_none());

        let maps = sample();
        let b = Button::new(0x02, "Rightclick");
        assert_eq!(function_by_button(&maps, &funcs, &b), Some(&RIGHT));
    }
}
