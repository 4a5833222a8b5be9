//! Percent-escaping for on-disk record names.
//!
//! Aliases, group ids, and uids become file names; bytes outside a safe
//! alphabet are percent-encoded so arbitrary UTF-8 names stay within
//! portable path rules.

use crate::error::{ProtoError, ProtoResult};

fn is_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')
}

/// Escapes `name` for use as a file name.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for &b in name.as_bytes() {
        if is_safe(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0'));
            out.push(char::from_digit((b & 0xF) as u32, 16).unwrap_or('0'));
        }
    }
    out
}

/// Reverses [`escape_name`]; used by startup recovery to map staged file
/// names back to record names.
pub fn unescape_name(escaped: &str) -> ProtoResult<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3).ok_or_else(|| ProtoError::EscapeBad {
                name: escaped.to_string(),
            })?;
            let hi = (hex[0] as char).to_digit(16);
            let lo = (hex[1] as char).to_digit(16);
            match (hi, lo) {
                (Some(h), Some(l)) => out.push((h as u8) << 4 | l as u8),
                _ => {
                    return Err(ProtoError::EscapeBad {
                        name: escaped.to_string(),
                    })
                }
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| ProtoError::EscapeBad {
        name: escaped.to_string(),
    })
}
