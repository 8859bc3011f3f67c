// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-the-wire encoding for variable-length datums (`spec.md` §4.1:
//! "variable-length values are stored with full or short header,
//! preferring short whenever the length fits").
//!
//! Short header: one byte, high bit set, low 7 bits = payload length
//! (0..=127). Full header: 4 bytes little-endian, high bit of the first
//! byte clear, value = total length (header + payload) as a 31-bit
//! unsigned integer.

use crate::attr::AttributeDescriptor;
use crate::error::{Error, Result};
use crate::coding::DecodeError;

const SHORT_HEADER_MAX_PAYLOAD: usize = 0x7F;

/// Appends `payload` to `out` using the shortest header that fits.
pub fn encode_varlena(payload: &[u8], out: &mut Vec<u8>) {
    if payload.len() <= SHORT_HEADER_MAX_PAYLOAD {
        #[allow(clippy::cast_possible_truncation)]
        out.push(0x80 | payload.len() as u8);
        out.extend_from_slice(payload);
    } else {
        let total = payload.len() + 4;
        assert!(total < (1 << 31), "varlena datum too large");
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }
}

/// Returns the total on-wire length (header + payload) of the varlena
/// value starting at `bytes[0]`.
///
/// # Errors
///
/// Returns [`Error::Decode`] if `bytes` is too short to hold a header.
pub fn varlena_total_len(bytes: &[u8]) -> Result<usize> {
    let &b0 = bytes
        .first()
        .ok_or_else(|| Error::Decode(DecodeError::InvalidTag(("varlena header", 0))))?;

    if b0 & 0x80 != 0 {
        Ok(1 + (b0 & 0x7F) as usize)
    } else {
        let header = bytes
            .get(0..4)
            .ok_or_else(|| Error::Decode(DecodeError::InvalidTag(("varlena full header", b0))))?;
        let total = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        Ok(total as usize)
    }
}

/// Returns the payload slice (without its header) of the varlena value
/// starting at `bytes[0]`.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the header is malformed or the declared
/// length runs past the end of `bytes`.
pub fn varlena_payload(bytes: &[u8]) -> Result<&[u8]> {
    let &b0 = bytes
        .first()
        .ok_or_else(|| Error::Decode(DecodeError::InvalidTag(("varlena header", 0))))?;

    let (start, total) = if b0 & 0x80 != 0 {
        (1, 1 + (b0 & 0x7F) as usize)
    } else {
        (4, varlena_total_len(bytes)?)
    };

    bytes
        .get(start..total)
        .ok_or_else(|| Error::Decode(DecodeError::InvalidTag(("varlena payload", b0))))
}

/// Returns the on-wire byte length of a single stored element for `attr`,
/// given the element's starting bytes (only consulted for varlena
/// attributes; fixed-width attributes never look at `bytes`).
///
/// # Errors
///
/// Returns [`Error::Decode`] if `attr` is varlena and `bytes` does not
/// hold a valid header.
pub fn element_len(attr: &AttributeDescriptor, bytes: &[u8]) -> Result<usize> {
    if attr.is_varlena() {
        varlena_total_len(bytes)
    } else {
        Ok(attr.attlen.max(0) as usize)
    }
}

/// `array_slice_length(attlen, attbyval, isnull, ptr, n)` from `spec.md`
/// §4.1: the byte length of the first `n` elements starting at `data`.
///
/// For fixed-width attributes this is `n * attlen` (pure multiplication,
/// no need to walk the data). For varlena attributes each element's
/// header must be read in turn since elements are not fixed width.
///
/// # Errors
///
/// Returns [`Error::Decode`] if `isnull` is `false` and walking varlena
/// headers runs past the end of `data` before `n` elements are found.
pub fn array_slice_length(
    attr: &AttributeDescriptor,
    isnull: bool,
    data: &[u8],
    n: usize,
) -> Result<usize> {
    if isnull || n == 0 {
        return Ok(0);
    }

    if !attr.is_varlena() {
        return Ok(n * attr.attlen.max(0) as usize);
    }

    let mut offset = 0;
    for _ in 0..n {
        let elem = data
            .get(offset..)
            .ok_or_else(|| Error::Decode(DecodeError::InvalidTag(("array slice", 0))))?;
        offset += element_len(attr, elem)?;
    }
    Ok(offset)
}
