//! Transient variable and alias stores
//!
//! Runtime key/value pairs kept in a flat RAM buffer. Layout of a record:
//!
//! ```text
//! +-----------+-------+----+---------+----+---------+
//! | total u16 |  key  | \0 |  value  | \0 | padding |
//! +-----------+-------+----+---------+----+---------+
//! ```
//!
//! `total` is little-endian, includes the header and is a multiple of
//! [`VAR_ALIGN`]. Records are appended at the end of the buffer; removing a
//! key zeroes its first byte in place, and the space is only reclaimed when
//! the store is cleared.

use core::str;

use crate::error::{Error, Result};

/// Record alignment
pub const VAR_ALIGN: usize = 4;

const HEADER: usize = 2;

/// Append-only key/value buffer of `N` bytes
#[derive(Debug, Clone, Default)]
pub struct KeyValueStore<const N: usize> {
    buf: heapless::Vec<u8, N>,
}

/// Store for shell variables
pub type VariableStore = KeyValueStore<2048>;

/// Store for command aliases
pub type AliasStore = KeyValueStore<1024>;

struct Slot<'a> {
    offset: usize,
    key: &'a [u8],
    value: &'a [u8],
}

impl<const N: usize> KeyValueStore<N> {
    /// Create an empty store
    pub const fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
        }
    }

    /// Bytes in use, tombstoned records included
    pub fn used(&self) -> usize {
        self.buf.len()
    }

    /// Size of the backing buffer
    pub fn capacity(&self) -> usize {
        N
    }

    /// Drop every record and reclaim the whole buffer
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn slot_at(&self, offset: usize) -> Option<(Slot<'_>, usize)> {
        let header = self.buf.get(offset..offset + HEADER)?;
        let total = u16::from_le_bytes([header[0], header[1]]) as usize;
        if total < HEADER {
            return None;
        }
        let body = self.buf.get(offset + HEADER..offset + total)?;
        let mut parts = body.splitn(3, |&b| b == 0);
        let key = parts.next()?;
        let value = parts.next()?;
        Some((Slot { offset, key, value }, offset + total))
    }

    fn live_slots(&self) -> impl Iterator<Item = Slot<'_>> {
        let mut offset = 0;
        core::iter::from_fn(move || {
            let (slot, next) = self.slot_at(offset)?;
            offset = next;
            Some(slot)
        })
        .filter(|slot| slot.key.first().is_some_and(|&b| b != 0))
    }

    fn find(&self, key: &str) -> Option<Slot<'_>> {
        self.live_slots().find(|slot| slot.key == key.as_bytes())
    }

    /// Set `key` to `value`, replacing any previous value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Err(Error::Param);
        }
        if key.as_bytes().contains(&0) || value.as_bytes().contains(&0) {
            return Err(Error::Param);
        }

        let raw = HEADER + key.len() + 1 + value.len() + 1;
        let total = raw.div_ceil(VAR_ALIGN) * VAR_ALIGN;
        let total_u16 = u16::try_from(total).map_err(|_| Error::OutOfMemory)?;
        if total > N - self.buf.len() {
            log::debug!("No room for '{}' ({} bytes)", key, total);
            return Err(Error::OutOfMemory);
        }

        self.unset(key);

        let push = |buf: &mut heapless::Vec<u8, N>, bytes: &[u8]| {
            buf.extend_from_slice(bytes).map_err(|_| Error::OutOfMemory)
        };
        push(&mut self.buf, &total_u16.to_le_bytes())?;
        push(&mut self.buf, key.as_bytes())?;
        push(&mut self.buf, &[0])?;
        push(&mut self.buf, value.as_bytes())?;
        push(&mut self.buf, &[0])?;
        while self.buf.len() % VAR_ALIGN != 0 {
            push(&mut self.buf, &[0])?;
        }
        Ok(())
    }

    /// Remove `key`, returning whether it was present
    pub fn unset(&mut self, key: &str) -> bool {
        match self.find(key).map(|slot| slot.offset) {
            Some(offset) => {
                self.buf[offset + HEADER] = 0;
                true
            }
            None => false,
        }
    }

    /// Value of `key`
    pub fn lookup(&self, key: &str) -> Option<&str> {
        let slot = self.find(key)?;
        str::from_utf8(slot.value).ok()
    }

    /// Step a restartable enumeration of live records in storage order
    ///
    /// `cursor` is a byte offset into the store; start with 0.
    pub fn enumerate(&self, cursor: &mut usize) -> Option<(&str, &str)> {
        loop {
            let (slot, next) = self.slot_at(*cursor)?;
            *cursor = next;
            if slot.key.first().is_some_and(|&b| b != 0) {
                if let (Ok(key), Ok(value)) = (str::from_utf8(slot.key), str::from_utf8(slot.value))
                {
                    return Some((key, value));
                }
            }
        }
    }

    /// Iterate over live `(key, value)` pairs in storage order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut cursor = 0;
        core::iter::from_fn(move || self.enumerate(&mut cursor))
    }
}
