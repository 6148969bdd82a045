//! Checksums, endian helpers and string parsing shared by all drivers.

use crate::error::{Error, Result};
use crate::model::{LedMode, RgbColor};
use std::fmt::Write as _;

/// XOR of all bytes.
pub fn xor8_checksum(buf: &[u8]) -> u8 {
    buf.iter().fold(0u8, |sum, b| sum ^ b)
}

/// XOR of all little-endian 16-bit words.
///
/// An odd trailing byte is folded in as the low byte. Store the result
/// with [`put_le16`] to get the on-wire layout.
pub fn xor16_checksum(buf: &[u8]) -> u16 {
    buf.chunks(2).fold(0u16, |sum, pair| {
        let lo = pair[0] as u16;
        let hi = pair.get(1).copied().unwrap_or(0) as u16;
        sum ^ (lo | (hi << 8))
    })
}

/// True if every byte of the slice is zero (an empty slice counts).
pub fn buffer_is_all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

pub fn le16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub fn be16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

pub fn put_le16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_be16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Parse an integer the way `strtol(s, _, 0)` does: `0x` prefix for hex,
/// a leading `0` for octal, decimal otherwise. Trailing garbage is an error.
pub fn string_to_int(s: &str) -> Result<i64> {
    let t = s.trim();
    let (negative, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let parsed = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<i64>()
    };
    let value = parsed.map_err(|_| Error::InvalidArgument(format!("not an integer: {s:?}")))?;
    Ok(if negative { -value } else { value })
}

/// yes/true/on, no/false/off, or any integer (nonzero is true).
pub fn string_to_bool(s: &str) -> Result<bool> {
    let t = s.trim();
    if ["yes", "true", "on"].iter().any(|w| t.eq_ignore_ascii_case(w)) {
        return Ok(true);
    }
    if ["no", "false", "off"].iter().any(|w| t.eq_ignore_ascii_case(w)) {
        return Ok(false);
    }
    string_to_int(t)
        .map(|i| i != 0)
        .map_err(|_| Error::InvalidArgument(format!("not a boolean: {s:?}")))
}

pub fn string_to_mode(s: &str) -> Result<LedMode> {
    LedMode::from_name(s.trim())
        .ok_or_else(|| Error::InvalidArgument(format!("unknown LED mode: {s:?}")))
}

/// Parse a `RRGGBB` hex color. A `#` or `0x` prefix is accepted.
pub fn string_to_color(s: &str) -> Result<RgbColor> {
    let t = s.trim();
    let hex = t
        .strip_prefix('#')
        .or_else(|| t.strip_prefix("0x"))
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    let value = u32::from_str_radix(hex, 16)
        .map_err(|_| Error::InvalidArgument(format!("not a color: {s:?}")))?;
    if value > 0xFF_FFFF {
        return Err(Error::InvalidArgument(format!("color out of range: {s:?}")));
    }
    Ok(RgbColor {
        r: (value >> 16) as u8,
        g: (value >> 8) as u8,
        b: value as u8,
    })
}

/// Split `s` at `sep` into exactly `n` stripped fields.
///
/// The last field keeps any remaining separators. Missing fields come back
/// empty; the boolean is false when fewer than `n` fields were present.
pub fn split_tuple(s: &str, sep: char, n: usize) -> (Vec<String>, bool) {
    let mut fields: Vec<String> = s.splitn(n, sep).map(|f| f.trim().to_string()).collect();
    let complete = fields.len() == n;
    fields.resize(n, String::new());
    (fields, complete)
}

/// Encode `s` into a zero-terminated UTF-16LE field of `max_chars` units.
///
/// Input beyond `max_chars - 1` code units is truncated.
pub fn utf16_encode(s: &str, max_chars: usize) -> Vec<u8> {
    let mut out = vec![0u8; max_chars * 2];
    if max_chars == 0 {
        return out;
    }
    for (i, unit) in s.encode_utf16().take(max_chars - 1).enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decode a zero-terminated UTF-16LE field.
pub fn utf16_decode(buf: &[u8]) -> String {
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Replace every non-ASCII character with `?`.
pub fn ascii_sanitize(s: &str) -> String {
    s.chars().map(|c| if c.is_ascii() { c } else { '?' }).collect()
}

/// Hex dump in 16-byte rows for trace logging.
pub fn hex_dump(buf: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in buf.chunks(16).enumerate() {
        let _ = write!(out, "[{:04X}]:", row * 16);
        for b in chunk {
            let _ = write!(out, " {b:02X}");
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if (32..=126).contains(&b) {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor8_appended_checksum_cancels_out() {
        let mut buf = vec![0x12, 0x34, 0xAB, 0xFF, 0x00, 0x7E];
        let sum = xor8_checksum(&buf);
        buf.push(sum);
        assert_eq!(xor8_checksum(&buf), 0);
    }

    #[test]
    fn xor8_of_empty_buffer_is_zero() {
        assert_eq!(xor8_checksum(&[]), 0);
    }

    #[test]
    fn xor16_folds_little_endian_pairs() {
        assert_eq!(xor16_checksum(&[0x01, 0x02, 0x10, 0x20]), 0x2211);
        // odd tail byte lands in the low half
        assert_eq!(xor16_checksum(&[0x01, 0x02, 0x05]), 0x0204);
    }

    #[test]
    fn xor16_appended_checksum_cancels_out() {
        let mut buf = vec![0x8C, 0x01, 0x02, 0x00, 0x03, 0x00, 0x01, 0x01];
        let sum = xor16_checksum(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        assert_eq!(xor16_checksum(&buf), 0);
    }

    #[test]
    fn all_zero_detection() {
        assert!(buffer_is_all_zero(&[]));
        assert!(buffer_is_all_zero(&[0, 0, 0]));
        assert!(!buffer_is_all_zero(&[0, 1, 0]));
    }

    #[test]
    fn endian_helpers() {
        let mut buf = [0u8; 4];
        put_le16(&mut buf, 0, 0x1234);
        put_be16(&mut buf, 2, 0x1234);
        assert_eq!(buf, [0x34, 0x12, 0x12, 0x34]);
        assert_eq!(le16(&buf, 0), 0x1234);
        assert_eq!(be16(&buf, 2), 0x1234);
    }

    #[test]
    fn int_parsing_follows_strtol_prefixes() {
        assert_eq!(string_to_int("42").unwrap(), 42);
        assert_eq!(string_to_int(" 0x1F ").unwrap(), 31);
        assert_eq!(string_to_int("010").unwrap(), 8);
        assert_eq!(string_to_int("-3").unwrap(), -3);
        assert_eq!(string_to_int("0").unwrap(), 0);
        assert!(string_to_int("12abc").is_err());
        assert!(string_to_int("").is_err());
    }

    #[test]
    fn bool_parsing_accepts_words_and_numbers() {
        assert!(string_to_bool("Yes").unwrap());
        assert!(string_to_bool("on").unwrap());
        assert!(!string_to_bool("FALSE").unwrap());
        assert!(!string_to_bool("0").unwrap());
        assert!(string_to_bool("2").unwrap());
        assert!(string_to_bool("maybe").is_err());
    }

    #[test]
    fn color_parsing() {
        let c = string_to_color("00FF7f").unwrap();
        assert_eq!((c.r, c.g, c.b), (0x00, 0xFF, 0x7F));
        assert!(string_to_color("#102030").is_ok());
        assert!(string_to_color("zz").is_err());
        assert!(string_to_color("1000000").is_err());
    }

    #[test]
    fn split_tuple_pads_missing_fields() {
        let (f, complete) = split_tuple(" GlowingLogo : off ", ':', 3);
        assert_eq!(f, vec!["GlowingLogo", "off", ""]);
        assert!(!complete);

        let (f, complete) = split_tuple("2:Scrollwheel:on", ':', 3);
        assert_eq!(f, vec!["2", "Scrollwheel", "on"]);
        assert!(complete);
    }

    #[test]
    fn utf16_field_truncates_and_terminates() {
        let field = utf16_encode("Profile", 4);
        assert_eq!(field.len(), 8);
        assert_eq!(utf16_decode(&field), "Pro");
        assert_eq!(utf16_decode(&utf16_encode("Gaming", 20)), "Gaming");
    }

    #[test]
    fn ascii_sanitize_replaces_non_ascii() {
        assert_eq!(ascii_sanitize("AB\u{e9}1"), "AB?1");
    }

    #[test]
    fn hex_dump_formats_rows() {
        let dump = hex_dump(b"AB\x00");
        assert_eq!(dump, "[0000]: 41 42 00  |AB.|\n");
    }
}
