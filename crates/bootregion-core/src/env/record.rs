//! Environment record format
//!
//! The persistent environment is one flash byte stream of records:
//!
//! ```text
//! record     := marker value NUL
//! marker     := bit 7: 1 = live, 0 = tombstoned
//!               bits 6..0: key index
//! terminator := 0xFF (unprogrammed flash)
//! ```
//!
//! A live record is tombstoned by clearing bit 7 of its marker in place.
//! Programming only ever clears bits, so this needs no erase cycle.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Marker bit set on live records
pub const ENV_LIVE: u8 = 0x80;

/// Mask of the key index within a marker
pub const ENV_KEY_MASK: u8 = 0x7F;

/// Unprogrammed flash byte terminating the stream
pub const ENV_END: u8 = 0xFF;

/// Largest record written, marker and NUL included
pub const ENV_RECORD_MAX: usize = 256;

/// Number of key indices usable without a live marker reading as
/// [`ENV_END`]
pub const ENV_KEY_MAX: usize = ENV_KEY_MASK as usize;

/// Record marker byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker(u8);

impl Marker {
    /// Marker of a live record for a key index
    pub fn live(index: u8) -> Self {
        debug_assert!((index as usize) < ENV_KEY_MAX);
        Self(ENV_LIVE | (index & ENV_KEY_MASK))
    }

    /// Interpret a raw byte
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw byte
    pub fn byte(self) -> u8 {
        self.0
    }

    /// Key index this record belongs to
    pub fn key_index(self) -> u8 {
        self.0 & ENV_KEY_MASK
    }

    /// Check whether the record is live
    pub fn is_live(self) -> bool {
        self.0 & ENV_LIVE != 0
    }

    /// Same marker with the live bit cleared
    pub fn tombstoned(self) -> Self {
        Self(self.0 & !ENV_LIVE)
    }
}

/// One record in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    /// Offset of the marker byte
    pub offset: usize,
    /// Marker
    pub marker: Marker,
    /// Value bytes, without the NUL
    pub value: &'a [u8],
}

impl Record<'_> {
    /// Bytes occupied by the record
    pub fn size(&self) -> usize {
        self.value.len() + 2
    }

    /// Offset of the byte after the record
    pub fn end(&self) -> usize {
        self.offset + self.size()
    }
}

/// Encoded record ready to be programmed
pub type RecordBuf = heapless::Vec<u8, ENV_RECORD_MAX>;

/// Encode a live record, truncating the value to fit [`ENV_RECORD_MAX`]
///
/// Returns the record and whether the value was truncated.
pub fn encode_record(index: u8, value: &str) -> Result<(RecordBuf, bool)> {
    if value.as_bytes().contains(&0) {
        return Err(Error::Param);
    }

    let room = ENV_RECORD_MAX - 2;
    let mut cut = value.len().min(room);
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut buf = RecordBuf::new();
    buf.push(Marker::live(index).byte())
        .map_err(|_| Error::OutOfMemory)?;
    buf.extend_from_slice(&value.as_bytes()[..cut])
        .map_err(|_| Error::OutOfMemory)?;
    buf.push(0).map_err(|_| Error::OutOfMemory)?;
    Ok((buf, cut < value.len()))
}

/// RAM image of the flash-resident record stream
///
/// The image mirrors the backing region byte for byte. Writers program the
/// region first and then apply the same change here.
#[derive(Debug, Clone, Default)]
pub struct RecordLog {
    image: Vec<u8>,
}

impl RecordLog {
    /// Wrap a copy of the backing region
    pub fn from_image(image: Vec<u8>) -> Self {
        Self { image }
    }

    /// Raw image
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Capacity of the backing region
    pub fn capacity(&self) -> usize {
        self.image.len()
    }

    /// Read the record starting at `offset`
    ///
    /// Returns `None` at the terminator, at the end of the image, or at a
    /// record whose value runs off the end of the image.
    pub fn read_record_at(&self, offset: usize) -> Option<Record<'_>> {
        let marker = *self.image.get(offset)?;
        if marker == ENV_END {
            return None;
        }
        let rest = &self.image[offset + 1..];
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            log::warn!("Unterminated environment record at offset 0x{:x}", offset);
            return None;
        };
        Some(Record {
            offset,
            marker: Marker::from_byte(marker),
            value: &rest[..nul],
        })
    }

    /// Iterate over all records, live and tombstoned, in storage order
    pub fn records(&self) -> Records<'_> {
        Records {
            log: self,
            offset: 0,
        }
    }

    /// Offset from which every byte is unprogrammed
    ///
    /// This is past any torn record as well as past the parsed records, so
    /// an append never programs over bytes an interrupted write left behind.
    pub fn tail(&self) -> usize {
        self.image
            .iter()
            .rposition(|&b| b != ENV_END)
            .map_or(0, |last| last + 1)
    }

    /// Offset of a torn record left by an interrupted append
    ///
    /// Returns the offset where parsing stops while programmed bytes still
    /// follow it.
    pub fn torn(&self) -> Option<usize> {
        let parsed = self.records().last().map_or(0, |r| r.end());
        (self.tail() > parsed).then_some(parsed)
    }

    /// Bytes still available for appending
    pub fn free(&self) -> usize {
        self.capacity().saturating_sub(self.tail())
    }

    /// The live record for a key index, if any
    pub fn find_live(&self, index: u8) -> Option<Record<'_>> {
        self.records()
            .find(|r| r.marker.is_live() && r.marker.key_index() == index)
    }

    /// Apply a tombstone at `offset` to the image
    pub fn apply_tombstone(&mut self, offset: usize) {
        if let Some(byte) = self.image.get_mut(offset) {
            *byte &= !ENV_LIVE;
        }
    }

    /// Apply an appended record to the image
    pub fn apply_append(&mut self, offset: usize, record: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(record.len())
            .filter(|&end| end <= self.image.len())
            .ok_or(Error::OutOfMemory)?;
        for (dst, src) in self.image[offset..end].iter_mut().zip(record) {
            *dst &= *src;
        }
        Ok(())
    }

    /// Apply a bulk erase to the image
    pub fn apply_erase(&mut self) {
        self.image.fill(ENV_END);
    }
}

/// Iterator over records in storage order
pub struct Records<'a> {
    log: &'a RecordLog,
    offset: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.log.read_record_at(self.offset)?;
        self.offset = record.end();
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    fn log_with(records: &[(u8, &str, bool)], size: usize) -> RecordLog {
        let mut image = vec![ENV_END; size];
        let mut offset = 0;
        for &(index, value, live) in records {
            let (buf, _) = encode_record(index, value).unwrap();
            image[offset..offset + buf.len()].copy_from_slice(&buf);
            if !live {
                image[offset] &= !ENV_LIVE;
            }
            offset += buf.len();
        }
        RecordLog::from_image(image)
    }

    #[test]
    fn test_marker_bits() {
        let m = Marker::live(5);
        assert_eq!(m.byte(), 0x85);
        assert!(m.is_live());
        assert_eq!(m.key_index(), 5);
        let t = m.tombstoned();
        assert_eq!(t.byte(), 0x05);
        assert!(!t.is_live());
        assert_eq!(t.key_index(), 5);
    }

    #[test]
    fn test_encode_record() {
        let (buf, truncated) = encode_record(3, "ttyS0").unwrap();
        assert_eq!(&buf[..], b"\x83ttyS0\0");
        assert!(!truncated);
        assert_eq!(encode_record(3, "a\0b").err(), Some(Error::Param));
    }

    #[test]
    fn test_encode_truncates() {
        let long = "x".repeat(ENV_RECORD_MAX * 2);
        let (buf, truncated) = encode_record(1, &long).unwrap();
        assert!(truncated);
        assert_eq!(buf.len(), ENV_RECORD_MAX);
        assert_eq!(buf[ENV_RECORD_MAX - 1], 0);
    }

    #[test]
    fn test_encode_truncates_on_char_boundary() {
        let long = "é".repeat(ENV_RECORD_MAX);
        let (buf, truncated) = encode_record(1, &long).unwrap();
        assert!(truncated);
        assert!(core::str::from_utf8(&buf[1..buf.len() - 1]).is_ok());
    }

    #[test]
    fn test_records_and_tail() {
        let log = log_with(&[(0, "one", false), (1, "two", true), (0, "three", true)], 64);
        let records: std::vec::Vec<_> = log.records().collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].value, b"two");
        assert_eq!(log.tail(), 5 + 5 + 7);
        assert_eq!(log.find_live(0).unwrap().value, b"three");
        assert_eq!(log.find_live(2), None);
    }

    #[test]
    fn test_empty_log() {
        let log = RecordLog::from_image(vec![ENV_END; 32]);
        assert_eq!(log.records().count(), 0);
        assert_eq!(log.tail(), 0);
        assert_eq!(log.free(), 32);
    }

    #[test]
    fn test_unterminated_record_stops() {
        let mut image = vec![0x81, b'a', b'b'];
        image.extend_from_slice(&[b'c'; 4]);
        let log = RecordLog::from_image(image);
        assert_eq!(log.records().count(), 0);
        assert_eq!(log.tail(), 7);
        assert_eq!(log.free(), 0);
    }

    #[test]
    fn test_torn_record_after_live_ones() {
        let mut log = log_with(&[(0, "one", true)], 32);
        assert_eq!(log.torn(), None);

        log.apply_append(5, &[0x82, b't', b'o']).unwrap();
        assert_eq!(log.records().count(), 1);
        assert_eq!(log.torn(), Some(5));
        assert_eq!(log.tail(), 8);
    }

    #[test]
    fn test_apply_tombstone() {
        let mut log = log_with(&[(4, "v", true)], 16);
        log.apply_tombstone(0);
        assert!(log.find_live(4).is_none());
        assert_eq!(log.records().count(), 1);
    }
}
