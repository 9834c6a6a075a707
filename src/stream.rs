//! Growable big-endian byte stream with a movable cursor.
//!
//! Every read or write comes in two flavours: the plain form works at the
//! cursor and advances it by the value's width, the `_at` form works at an
//! explicit offset, leaves the cursor's byte index alone and clears the bit
//! and nibble sub-cursors. Writes never fail; they grow the buffer with zero
//! bytes instead.

use std::ops::{Bound, RangeBounds};

use crate::error::{Error, Result, Warning};
use crate::hex::{self, PatchToken, PatternToken};

/// Position of a [`ByteStream`]: a byte index plus the sub-byte cursors used
/// by [`ByteStream::read_bit`] and [`ByteStream::read_nibble`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub index: usize,
    /// 0..=7, counted from the most significant bit.
    pub bit: u8,
    /// 0 for the high nibble, 1 for the low one.
    pub nibble: u8,
}

impl Cursor {
    pub fn at(index: usize) -> Self {
        Cursor { index, bit: 0, nibble: 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ByteStream {
    data: Vec<u8>,
    cursor: Cursor,
    states: Vec<Cursor>,
    warnings: Vec<Warning>,
}

impl ByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(data: impl Into<Vec<u8>>) -> Self {
        ByteStream { data: data.into(), ..Self::default() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_eof(&self) -> bool {
        self.cursor.index >= self.data.len()
    }

    pub fn index(&self) -> usize {
        self.cursor.index
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Moves to an absolute byte offset and clears both sub-byte cursors.
    pub fn set_index(&mut self, pos: usize) {
        self.cursor = Cursor::at(pos);
    }

    pub fn set_index_at_end(&mut self) {
        self.set_index(self.data.len());
    }

    pub fn advance_index_by(&mut self, count: usize) {
        self.set_index(self.cursor.index.saturating_add(count));
    }

    pub fn save_state(&mut self) {
        self.states.push(self.cursor);
    }

    pub fn restore_state(&mut self) -> Result<()> {
        self.cursor = self.states.pop().ok_or(Error::Scope)?;
        Ok(())
    }

    /// Number of saved states still waiting for a [`restore_state`](Self::restore_state).
    pub fn state_depth(&self) -> usize {
        self.states.len()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn warn(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    fn ensure(&self, offset: usize, need: usize) -> Result<()> {
        if offset.checked_add(need).map_or(true, |end| end > self.data.len()) {
            return Err(Error::OutOfBounds { offset, need, have: self.data.len().saturating_sub(offset) });
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self, pos: Option<usize>) -> Result<[u8; N]> {
        let offset = match pos {
            Some(p) => p,
            None => self.cursor.index,
        };
        self.ensure(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[offset..offset + N]);
        match pos {
            Some(_) => self.clear_sub_cursors(),
            None => self.cursor.index += N,
        }
        Ok(out)
    }

    fn put(&mut self, bytes: &[u8], pos: Option<usize>) -> usize {
        let offset = match pos {
            Some(p) => {
                self.clear_sub_cursors();
                p
            }
            None => {
                let p = self.cursor.index;
                self.cursor.index += bytes.len();
                p
            }
        };
        self.enlarge(offset + bytes.len());
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        offset
    }

    fn clear_sub_cursors(&mut self) {
        self.cursor.bit = 0;
        self.cursor.nibble = 0;
    }

    /// Grows the buffer with zero bytes to at least `size` bytes. Never shrinks.
    pub fn enlarge(&mut self, size: usize) {
        if size > self.data.len() {
            self.data.resize(size, 0);
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>(None)?[0])
    }

    pub fn read_u8_at(&mut self, pos: usize) -> Result<u8> {
        Ok(self.take::<1>(Some(pos))?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.take(None)?))
    }

    pub fn read_i8_at(&mut self, pos: usize) -> Result<i8> {
        Ok(i8::from_be_bytes(self.take(Some(pos))?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(None)?))
    }

    pub fn read_u16_at(&mut self, pos: usize) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(Some(pos))?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take(None)?))
    }

    pub fn read_i16_at(&mut self, pos: usize) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take(Some(pos))?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(None)?))
    }

    pub fn read_u32_at(&mut self, pos: usize) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(Some(pos))?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(None)?))
    }

    pub fn read_i32_at(&mut self, pos: usize) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(Some(pos))?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        let offset = self.cursor.index;
        self.ensure(offset, len)?;
        self.cursor.index += len;
        Ok(&self.data[offset..offset + len])
    }

    pub fn peek_bytes(&self, pos: usize, len: usize) -> Result<&[u8]> {
        self.ensure(pos, len)?;
        Ok(&self.data[pos..pos + len])
    }

    /// Copies `size` bytes into a new stream without moving the cursor.
    pub fn extract(&self, size: usize, pos: Option<usize>) -> Result<ByteStream> {
        let pos = pos.unwrap_or(self.cursor.index);
        Ok(ByteStream::load(self.peek_bytes(pos, size)?.to_vec()))
    }

    pub fn write_u8(&mut self, value: u8) -> usize {
        self.put(&[value], None)
    }

    pub fn write_u8_at(&mut self, value: u8, pos: usize) -> usize {
        self.put(&[value], Some(pos))
    }

    pub fn write_i8(&mut self, value: i8) -> usize {
        self.put(&value.to_be_bytes(), None)
    }

    pub fn write_i8_at(&mut self, value: i8, pos: usize) -> usize {
        self.put(&value.to_be_bytes(), Some(pos))
    }

    pub fn write_u16(&mut self, value: u16) -> usize {
        self.put(&value.to_be_bytes(), None)
    }

    pub fn write_u16_at(&mut self, value: u16, pos: usize) -> usize {
        self.put(&value.to_be_bytes(), Some(pos))
    }

    pub fn write_i16(&mut self, value: i16) -> usize {
        self.put(&value.to_be_bytes(), None)
    }

    pub fn write_i16_at(&mut self, value: i16, pos: usize) -> usize {
        self.put(&value.to_be_bytes(), Some(pos))
    }

    pub fn write_u32(&mut self, value: u32) -> usize {
        self.put(&value.to_be_bytes(), None)
    }

    pub fn write_u32_at(&mut self, value: u32, pos: usize) -> usize {
        self.put(&value.to_be_bytes(), Some(pos))
    }

    pub fn write_i32(&mut self, value: i32) -> usize {
        self.put(&value.to_be_bytes(), None)
    }

    pub fn write_i32_at(&mut self, value: i32, pos: usize) -> usize {
        self.put(&value.to_be_bytes(), Some(pos))
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.put(bytes, None)
    }

    pub fn write_bytes_at(&mut self, bytes: &[u8], pos: usize) -> usize {
        self.put(bytes, Some(pos))
    }

    /// Copies `start..end` over the bytes at `dest`.
    pub fn copy(&mut self, start: usize, end: usize, dest: usize) -> Result<()> {
        let chunk = self.peek_bytes(start, end.saturating_sub(start))?.to_vec();
        self.write_bytes_at(&chunk, dest);
        Ok(())
    }

    /// Writes `fill` at the cursor until it is a multiple of `n`.
    pub fn align(&mut self, n: usize, fill: u8) -> usize {
        while n > 0 && self.cursor.index % n != 0 {
            self.write_u8(fill);
        }
        self.cursor.index
    }

    /// Reads one bit, most significant first. The byte index moves on after the eighth.
    pub fn read_bit(&mut self) -> Result<u8> {
        let index = self.cursor.index;
        self.ensure(index, 1)?;
        let value = (self.data[index] >> (7 - self.cursor.bit)) & 1;
        self.cursor.bit += 1;
        if self.cursor.bit == 8 {
            self.cursor.index += 1;
            self.cursor.bit = 0;
        }
        Ok(value)
    }

    /// Assembles `n` bits (at most 32) into an integer, first bit read is the most significant.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 32, "read_bits supports at most 32 bits");
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Ok(value)
    }

    pub fn read_nibble(&mut self) -> Result<u8> {
        let index = self.cursor.index;
        self.ensure(index, 1)?;
        let value = (self.data[index] >> (4 - 4 * self.cursor.nibble)) & 0x0F;
        self.cursor.nibble += 1;
        if self.cursor.nibble == 2 {
            self.cursor.index += 1;
            self.cursor.nibble = 0;
        }
        Ok(value)
    }

    /// Scans forward for `value`. Without `pos` the scan starts at the cursor,
    /// which is moved onto the match.
    pub fn find_byte(&mut self, value: u8, pos: Option<usize>) -> Option<usize> {
        let start = pos.unwrap_or(self.cursor.index);
        let found = self.data.get(start..)?.iter().position(|&b| b == value)? + start;
        if pos.is_none() {
            self.set_index(found);
        }
        Some(found)
    }

    /// Every offset in `range` where the hex `pattern` matches, `**` matching any byte.
    /// A match must fit inside the buffer.
    pub fn find(&self, pattern: &str, range: impl RangeBounds<usize>) -> Result<Vec<usize>> {
        let tokens = hex::parse_pattern(pattern)?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => self.data.len(),
        };
        let last = match self.data.len().checked_sub(tokens.len()) {
            Some(last) => last,
            None => return Ok(Vec::new()),
        };
        let matches = (start..end.min(last + 1))
            .filter(|&offset| {
                tokens.iter().zip(&self.data[offset..]).all(|(token, &byte)| match token {
                    PatternToken::Any => true,
                    PatternToken::Byte(b) => *b == byte,
                })
            })
            .collect();
        Ok(matches)
    }

    /// Offsets where the bytes equal `template` shifted by one common delta.
    /// `None` slots are ignored; the delta is taken from the first `Some` slot.
    pub fn find_relative(&self, template: &[Option<u8>]) -> Vec<usize> {
        let Some(anchor) = template.iter().position(Option::is_some) else {
            return Vec::new();
        };
        if template.len() > self.data.len() {
            return Vec::new();
        }
        (0..=self.data.len() - template.len())
            .filter(|&offset| {
                let window = &self.data[offset..offset + template.len()];
                let delta = i32::from(window[anchor]) - template[anchor].map_or(0, i32::from);
                template
                    .iter()
                    .zip(window)
                    .all(|(slot, &byte)| slot.map_or(true, |t| i32::from(t) + delta == i32::from(byte)))
            })
            .collect()
    }

    /// Applies a hex patch at `pos` (or at the cursor, which then moves past it).
    /// Existing bytes are read before anything is written. Returns the start offset.
    pub fn write_hex_patch(&mut self, patch: &str, pos: Option<usize>) -> Result<usize> {
        let tokens = hex::parse_patch(patch)?;
        let start = pos.unwrap_or(self.cursor.index);
        let mut source = start;
        let mut bytes = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            let byte = match token {
                PatchToken::Byte(b) => *b,
                PatchToken::Keep => self.peek_bytes(start + i, 1)?[0],
                PatchToken::Copy => {
                    let b = self.peek_bytes(source, 1)?[0];
                    source += 1;
                    b
                }
            };
            bytes.push(byte);
        }
        Ok(self.put(&bytes, pos))
    }

    /// Writes `patch` at every match of `pattern`, returning the matched offsets.
    pub fn replace(&mut self, pattern: &str, patch: &str) -> Result<Vec<usize>> {
        let offsets = self.find(pattern, ..)?;
        for &offset in &offsets {
            self.write_hex_patch(patch, Some(offset))?;
        }
        Ok(offsets)
    }
}

impl std::fmt::Display for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let start = self.cursor.index.min(self.data.len());
        let end = (start + 0x1000).min(self.data.len());
        write!(f, "ByteStream ; length = {:x} ; index = {:x}\ndata = ...", self.data.len(), self.cursor.index)?;
        for byte in &self.data[start..end] {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}
