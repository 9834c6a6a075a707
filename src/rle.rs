//! PackBits run-length decoding.

use crate::error::{Error, Result};
use crate::stream::ByteStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpacked {
    /// `width * height` bytes, row-major.
    pub data: Vec<u8>,
    /// Bytes consumed, including the per-row length table.
    pub consumed: usize,
}

/// Decodes one PackBits channel starting at the cursor.
///
/// The stream begins with a 2-byte length per scanline; those lengths are
/// skipped, not checked. The packed runs are then read as one continuous
/// stream until `width * height` bytes are produced. The cursor is restored
/// afterwards so the caller can advance by its own declared length.
pub fn decode(stream: &mut ByteStream, width: usize, height: usize) -> Result<Unpacked> {
    stream.save_state();
    let result = unpack(stream, width, height);
    stream.restore_state()?;
    result
}

fn unpack(stream: &mut ByteStream, width: usize, height: usize) -> Result<Unpacked> {
    let start = stream.index();
    let size = width
        .checked_mul(height)
        .ok_or_else(|| Error::format(start, format!("{width}x{height} channel does not fit in memory")))?;
    stream.advance_index_by(height.saturating_mul(2));
    // One control byte and one value expand to at most 128 bytes.
    let remaining = stream.len().saturating_sub(stream.index());
    let mut data = Vec::with_capacity(size.min(remaining.saturating_mul(64)));
    while data.len() < size {
        let control = stream.read_i8()?;
        if control == -128 {
            continue;
        }
        // c >= 0: c + 1 literals; c < 0: one byte repeated 1 - c times.
        let count = usize::from(control.unsigned_abs()) + 1;
        if data.len() + count > size {
            return Err(Error::format(stream.index() - 1, format!("packbits run of {count} overruns {size}-byte channel")));
        }
        if control >= 0 {
            data.extend_from_slice(stream.read_bytes(count)?);
        } else {
            let value = stream.read_u8()?;
            data.resize(data.len() + count, value);
        }
    }
    log::trace!("packbits channel {width}x{height} at {start:#x}: {} bytes", stream.index() - start);
    Ok(Unpacked { data, consumed: stream.index() - start })
}
