// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The 48-bit logical tuple identifier.
//!
//! A [`ZSTid`] is the only key type the core engine knows about (`spec.md`
//! §1: "the only key type is a 48-bit TID"). It is logical: a tuple keeps
//! the same TID for its whole lifetime even if the physical item backing
//! it is relocated to a different leaf by recompression or a page split.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Bitmask covering the 48 significant bits of a [`ZSTid`].
const TID_MASK: u64 = (1u64 << 48) - 1;

/// A 48-bit logical tuple identifier, totally ordered.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ZSTid(u64);

/// Reserved value meaning "no TID" / an uninitialized slot.
pub const INVALID_ZS_TID: ZSTid = ZSTid(0);

/// The smallest TID any tuple may be assigned.
pub const MIN_ZS_TID: ZSTid = ZSTid(1);

/// The largest TID any tuple may be assigned.
pub const MAX_ZS_TID: ZSTid = ZSTid(TID_MASK - 1);

/// One past [`MAX_ZS_TID`]; used as the exclusive `hikey` of the rightmost
/// leaf in a tree, never assigned to a tuple.
pub const MAX_PLUS_ONE_ZS_TID: ZSTid = ZSTid(TID_MASK);

impl ZSTid {
    /// Constructs a TID from a raw integer, masking to the 48-bit domain.
    ///
    /// # Panics
    ///
    /// Panics if `value` has any bit set above bit 47.
    #[must_use]
    pub fn new(value: u64) -> Self {
        assert!(value & !TID_MASK == 0, "TID exceeds 48-bit domain");
        Self(value)
    }

    /// Returns the raw 48-bit value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns `true` for the reserved "no TID" sentinel.
    #[must_use]
    pub fn is_invalid(self) -> bool {
        self == INVALID_ZS_TID
    }

    /// Adds `delta` to this TID, returning `None` on overflow past
    /// [`MAX_PLUS_ONE_ZS_TID`] (a resource-exhaustion condition at the
    /// caller, per `spec.md` §8 "allocating past it fails with a resource
    /// error").
    #[must_use]
    pub fn checked_add(self, delta: u64) -> Option<Self> {
        let next = self.0.checked_add(delta)?;
        if next > TID_MASK {
            None
        } else {
            Some(Self(next))
        }
    }

    /// Returns the number of TIDs in the inclusive range `[self, other]`,
    /// i.e. `other - self + 1`.
    ///
    /// # Panics
    ///
    /// Panics if `other < self`.
    #[must_use]
    pub fn range_len(self, other: Self) -> u64 {
        assert!(other >= self, "range_len requires other >= self");
        other.0 - self.0 + 1
    }
}

impl std::fmt::Debug for ZSTid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZSTid({})", self.0)
    }
}

impl std::fmt::Display for ZSTid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ZSTid {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<ZSTid> for u64 {
    fn from(value: ZSTid) -> Self {
        value.0
    }
}

impl Encode for ZSTid {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        // Stored as a fixed 6-byte big-endian value so every on-disk
        // occurrence of a TID has the same width, regardless of how many
        // of the 48 bits are actually in use.
        let bytes = self.0.to_be_bytes();
        writer.write_all(&bytes[2..])?;
        Ok(())
    }
}

impl Decode for ZSTid {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf[2..])?;
        Ok(Self(u64::from_be_bytes(buf)))
    }
}

/// Convenience used by code that still wants a plain big-endian u64 field
/// (e.g. the page trailer's `lokey`/`hikey`, which are full 64-bit fields
/// per `spec.md` §6, even though only 48 bits are ever non-zero).
pub(crate) fn write_tid_as_u64<W: Write>(tid: ZSTid, writer: &mut W) -> std::io::Result<()> {
    writer.write_u64::<BigEndian>(tid.0)
}

pub(crate) fn read_tid_as_u64<R: Read>(reader: &mut R) -> std::io::Result<ZSTid> {
    Ok(ZSTid(reader.read_u64::<BigEndian>()? & TID_MASK))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn reserved_values() {
        assert!(INVALID_ZS_TID.is_invalid());
        assert_eq!(MIN_ZS_TID.value(), 1);
        assert_eq!(MAX_ZS_TID.value(), (1u64 << 48) - 2);
        assert_eq!(MAX_PLUS_ONE_ZS_TID.value(), (1u64 << 48) - 1);
    }

    #[test]
    fn ordering_is_total() {
        assert!(MIN_ZS_TID < MAX_ZS_TID);
        assert!(MAX_ZS_TID < MAX_PLUS_ONE_ZS_TID);
    }

    #[test]
    fn checked_add_saturates_at_domain_edge() {
        assert_eq!(MAX_ZS_TID.checked_add(1), Some(MAX_PLUS_ONE_ZS_TID));
        assert_eq!(MAX_PLUS_ONE_ZS_TID.checked_add(1), None);
    }

    #[test]
    fn range_len_is_inclusive() {
        let a = ZSTid::new(10);
        let b = ZSTid::new(12);
        assert_eq!(a.range_len(b), 3);
        assert_eq!(a.range_len(a), 1);
    }

    #[test]
    #[should_panic(expected = "48-bit domain")]
    fn new_rejects_oversized_value() {
        let _ = ZSTid::new(1u64 << 48);
    }

    #[test]
    fn encode_decode_round_trip() {
        let tid = ZSTid::new(123_456_789);
        let bytes = tid.encode_into_vec();
        assert_eq!(bytes.len(), 6);
        let decoded = ZSTid::decode_from(&mut std::io::Cursor::new(&bytes)).unwrap();
        assert_eq!(tid, decoded);
    }
}
