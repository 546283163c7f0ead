//! Region string parser
//!
//! ```text
//! region  := [driver ":"] locator*
//! region  := driver ":" ["//" option "/"] path      (filesystem drivers)
//! locator := "@" number | number | "+" number
//! number  := decimal | "0x" hex, optionally suffixed by k|K|m|M
//! ```
//!
//! `+` is the only length marker. The older `#` marker is rejected rather
//! than guessed at, since a bare number after it would otherwise silently
//! become a start address.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::{RegionDescriptor, OPEN_ENDED};
use crate::driver::{Registry, DEFAULT_DRIVER};
use crate::error::{Error, Result};

/// Parse a region string against a registry
///
/// The result is not yet open. Parsing is pure: the same text against an
/// unchanged registry always yields an equal descriptor.
pub fn parse(registry: &Registry, text: &str) -> Result<RegionDescriptor> {
    let (name, rest) = split_driver(text)?;
    let entry = registry.lookup(name.unwrap_or(DEFAULT_DRIVER))?;
    let typed_name = name.unwrap_or(DEFAULT_DRIVER);

    let mut d = RegionDescriptor::new(entry.driver.clone(), typed_name, 0, OPEN_ENDED);
    d.set_present(entry.is_present());

    if entry.info.is_fs_describing() {
        let (segments, root) = parse_path(rest)?;
        d.segments = segments;
        d.root = root;
    } else {
        let (start, length) = parse_locators(rest)?;
        d.start = start;
        d.length = length;
    }

    log::trace!("Parsed region '{}' as {:?}", text, d);
    Ok(d)
}

/// Split off a leading `driver:` prefix
fn split_driver(text: &str) -> Result<(Option<&str>, &str)> {
    let Some((name, rest)) = text.split_once(':') else {
        return Ok((None, text));
    };
    if name.is_empty() {
        return Err(Error::Param);
    }
    if name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        Ok((Some(name), rest))
    } else {
        Ok((None, text))
    }
}

fn parse_locators(text: &str) -> Result<(u64, u64)> {
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut length = OPEN_ENDED;
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'@' => {
                pos += 1;
                start = parse_number(bytes, &mut pos)?;
            }
            b'+' => {
                pos += 1;
                length = parse_number(bytes, &mut pos)?;
            }
            b'#' => {
                log::warn!("'#' is not a length marker, use '+' (in '{}')", text);
                return Err(Error::Param);
            }
            b'0'..=b'9' => {
                start = parse_number(bytes, &mut pos)?;
            }
            _ => pos += 1,
        }
    }

    Ok((start, length))
}

fn parse_path(text: &str) -> Result<(Vec<String>, usize)> {
    let mut segments = Vec::new();
    let mut root = 0;

    let path = match text.strip_prefix("//") {
        Some(rest) => {
            let (option, path) = rest.split_once('/').unwrap_or((rest, ""));
            if option.is_empty() {
                return Err(Error::Param);
            }
            segments.push(option.to_string());
            root = 1;
            path
        }
        None => text,
    };

    segments.extend(
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
    );
    Ok((segments, root))
}

/// Parse a whole string as one region number
///
/// Same syntax as the numbers inside region strings; surrounding
/// whitespace is ignored and anything else after the number is `Param`.
pub fn parse_count(text: &str) -> Result<u64> {
    let bytes = text.trim().as_bytes();
    let mut pos = 0;
    let value = parse_number(bytes, &mut pos)?;
    if pos != bytes.len() {
        return Err(Error::Param);
    }
    Ok(value)
}

/// Parse a number at `*pos`, advancing past it and any size suffix
///
/// Accepts decimal or `0x` hex, followed by an optional `k`/`K` (x1024)
/// or `m`/`M` (x1024*1024) multiplier.
pub fn parse_number(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut i = *pos;
    let hex = bytes.len() > i + 2
        && bytes[i] == b'0'
        && (bytes[i + 1] == b'x' || bytes[i + 1] == b'X')
        && bytes[i + 2].is_ascii_hexdigit();
    let radix = if hex {
        i += 2;
        16
    } else {
        10
    };

    let digits_start = i;
    let mut value: u64 = 0;
    while i < bytes.len() {
        let Some(digit) = (bytes[i] as char).to_digit(radix) else {
            break;
        };
        value = value
            .checked_mul(radix as u64)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or(Error::Param)?;
        i += 1;
    }
    if i == digits_start {
        return Err(Error::Param);
    }

    if i < bytes.len() {
        let multiplier = match bytes[i] {
            b'k' | b'K' => Some(1024),
            b'm' | b'M' => Some(1024 * 1024),
            _ => None,
        };
        if let Some(multiplier) = multiplier {
            value = value.checked_mul(multiplier).ok_or(Error::Param)?;
            i += 1;
        }
    }

    *pos = i;
    Ok(value)
}
