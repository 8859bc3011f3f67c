// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The leaf item model (`spec.md` §2 module 2, §3, §4.1).
//!
//! A leaf item is one of three tagged variants sharing a common
//! `{tid, size, flags}` prefix: [`SingleItem`] (one tuple), [`ArrayItem`]
//! (a run of tuples sharing an undo pointer), and [`CompressedItem`] (an
//! opaque, separately-compressed run of plain items). No virtual dispatch
//! is used (`spec.md` §9): [`Item`] is a plain tagged union and every
//! call site matches on it directly.

use crate::attr::AttributeDescriptor;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::error::{Error, Result};
use crate::slice::Slice;
use crate::tid::{read_tid_as_u64, write_tid_as_u64, ZSTid};
use crate::undo::UndoPtr;
use crate::varlena::{array_slice_length, element_len, encode_varlena};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Item flag bits (`spec.md` §6 "Item flag bits", bit-exact).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemFlags(u16);

impl ItemFlags {
    /// This item is a [`CompressedItem`] wrapping a run of plain items.
    pub const COMPRESSED: ItemFlags = ItemFlags(0x01);
    /// This item is an [`ArrayItem`].
    pub const ARRAY: ItemFlags = ItemFlags(0x02);
    /// The tuple(s) represented by this item are SQL NULL.
    pub const NULL: ItemFlags = ItemFlags(0x04);
    /// The tuple has been deleted but may still be visible to some
    /// snapshot.
    pub const DELETED: ItemFlags = ItemFlags(0x08);
    /// The tuple has been superseded by an update but may still be
    /// visible to some snapshot.
    pub const UPDATED: ItemFlags = ItemFlags(0x10);
    /// The tuple is invisible to every snapshot; eligible for pruning.
    pub const DEAD: ItemFlags = ItemFlags(0x20);

    /// The empty flag set.
    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    /// `true` if every bit set in `flag` is also set in `self`.
    #[must_use]
    pub fn contains(self, flag: ItemFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Returns `self` with `flag`'s bits set.
    #[must_use]
    pub fn with(self, flag: ItemFlags) -> Self {
        Self(self.0 | flag.0)
    }

    /// Returns `self` with `flag`'s bits cleared.
    #[must_use]
    pub fn without(self, flag: ItemFlags) -> Self {
        Self(self.0 & !flag.0)
    }

    /// Raw bit pattern.
    #[must_use]
    pub fn bits(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for ItemFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

/// Common on-disk prefix shared by every item variant: `{tid, size,
/// flags}` (`spec.md` §3). `size` is the item's total encoded length,
/// including this prefix, so a reader can skip an item without decoding
/// its variant-specific body.
#[derive(Copy, Clone, Debug)]
struct ItemHeader {
    tid: ZSTid,
    size: u32,
    flags: ItemFlags,
}

const HEADER_LEN: usize = 8 + 4 + 2;

impl ItemHeader {
    fn encode_into<W: Write>(self, writer: &mut W) -> std::io::Result<()> {
        write_tid_as_u64(self.tid, writer)?;
        // NOTE: write_tid_as_u64 writes a full 8-byte field; keep the
        // header width stable by only ever going through this helper.
        writer.write_u32::<LittleEndian>(self.size)?;
        writer.write_u16::<LittleEndian>(self.flags.bits())?;
        Ok(())
    }

    fn decode_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let tid = read_tid_as_u64(reader)?;
        let size = reader.read_u32::<LittleEndian>()?;
        let flags = ItemFlags(reader.read_u16::<LittleEndian>()?);
        Ok(Self { tid, size, flags })
    }
}

/// A single tuple: `{tid, size, flags, undo_ptr, payload}`.
#[derive(Clone, Debug)]
pub struct SingleItem {
    pub tid: ZSTid,
    pub flags: ItemFlags,
    pub undo_ptr: UndoPtr,
    pub payload: Slice,
}

impl SingleItem {
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.flags.contains(ItemFlags::NULL)
    }
}

/// A run of `nelements` tuples with consecutive TIDs `tid, tid+1, ...`,
/// sharing one undo pointer and one null-ness.
#[derive(Clone, Debug)]
pub struct ArrayItem {
    pub tid: ZSTid,
    pub flags: ItemFlags,
    pub undo_ptr: UndoPtr,
    pub nelements: u32,
    pub payload: Slice,
}

impl ArrayItem {
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.flags.contains(ItemFlags::NULL)
    }

    /// `item_lasttid` for an array: `tid + nelements - 1`.
    #[must_use]
    pub fn last_tid(&self) -> ZSTid {
        self.tid
            .checked_add(u64::from(self.nelements) - 1)
            .expect("array does not cross TID domain boundary")
    }

    /// Splits this array at `cutoff` (an index relative to `tid`),
    /// returning the byte offset in `payload` where element `cutoff`
    /// begins. Used by [`crate::mutation`] to slice an array around a
    /// replaced/deleted element without touching the other elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `attr` is varlena and `payload` is
    /// shorter than the headers for `cutoff` elements imply.
    pub fn byte_offset_of(&self, attr: &AttributeDescriptor, cutoff: usize) -> Result<usize> {
        array_slice_length(attr, self.is_null(), &self.payload, cutoff)
    }

    /// Returns the raw bytes of element `index` (relative to `tid`),
    /// used by the scan's array cursor (`spec.md` §4.4) to unpack one
    /// tuple at a time out of a run that shares a single undo pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] on a malformed varlena payload.
    pub fn element_bytes(&self, attr: &AttributeDescriptor, index: usize) -> Result<Slice> {
        let start = self.byte_offset_of(attr, index)?;
        let end = self.byte_offset_of(attr, index + 1)?;
        Ok(Slice::from(&self.payload[start..end]))
    }

    /// Returns the sub-array covering elements `[start, end)` (relative
    /// to `tid`), or `None` if the range is empty. A single-element
    /// result is returned as a [`SingleItem`], matching `spec.md` §8's
    /// "Boundary behaviors": "A replacement whose TID is the first or
    /// last element of an Array preserves the other side as an Array (or
    /// Single if length 1)".
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] on a malformed varlena payload.
    pub fn slice(
        &self,
        attr: &AttributeDescriptor,
        start: usize,
        end: usize,
    ) -> Result<Option<Item>> {
        assert!(end <= self.nelements as usize, "slice out of bounds");
        if start >= end {
            return Ok(None);
        }

        let byte_start = self.byte_offset_of(attr, start)?;
        let byte_end = self.byte_offset_of(attr, end)?;
        let payload = Slice::from(&self.payload[byte_start..byte_end]);
        let new_tid = self
            .tid
            .checked_add(start as u64)
            .ok_or(Error::TidSpaceExhausted)?;
        let count = end - start;

        if count == 1 {
            Ok(Some(Item::Single(SingleItem {
                tid: new_tid,
                flags: self.flags.without(ItemFlags::ARRAY),
                undo_ptr: self.undo_ptr,
                payload,
            })))
        } else {
            #[allow(clippy::cast_possible_truncation)]
            Ok(Some(Item::Array(ArrayItem {
                tid: new_tid,
                flags: self.flags,
                undo_ptr: self.undo_ptr,
                nelements: count as u32,
                payload,
            })))
        }
    }
}

/// An opaque container wrapping the concatenated byte image of a run of
/// plain (Single/Array) items, produced by [`crate::compression`].
/// Containers never nest (`spec.md` §3).
#[derive(Clone, Debug)]
pub struct CompressedItem {
    pub first_tid: ZSTid,
    pub flags: ItemFlags,
    pub uncompressed_size: u32,
    pub last_tid: ZSTid,
    pub compressed_bytes: Slice,
}

/// The tagged union of leaf item variants.
#[derive(Clone, Debug)]
pub enum Item {
    Single(SingleItem),
    Array(ArrayItem),
    Compressed(CompressedItem),
}

impl Item {
    /// `first_tid(I)` from `spec.md` §4.1.
    #[must_use]
    pub fn first_tid(&self) -> ZSTid {
        match self {
            Self::Single(i) => i.tid,
            Self::Array(i) => i.tid,
            Self::Compressed(i) => i.first_tid,
        }
    }

    /// `item_lasttid(I)` from `spec.md` §4.1.
    #[must_use]
    pub fn last_tid(&self) -> ZSTid {
        match self {
            Self::Single(i) => i.tid,
            Self::Array(i) => i.last_tid(),
            Self::Compressed(i) => i.last_tid,
        }
    }

    #[must_use]
    pub fn flags(&self) -> ItemFlags {
        match self {
            Self::Single(i) => i.flags,
            Self::Array(i) => i.flags,
            Self::Compressed(i) => i.flags,
        }
    }

    #[must_use]
    pub fn undo_ptr(&self) -> Option<UndoPtr> {
        match self {
            Self::Single(i) => Some(i.undo_ptr),
            Self::Array(i) => Some(i.undo_ptr),
            Self::Compressed(_) => None,
        }
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Does this item's TID range cover `tid`?
    #[must_use]
    pub fn covers(&self, tid: ZSTid) -> bool {
        self.first_tid() <= tid && tid <= self.last_tid()
    }
}

/// `create_item(attlen, attbyval, tid, undo_ptr, nelements, datums,
/// isnull)` from `spec.md` §4.1: builds a [`SingleItem`] when
/// `nelements == 1` and an [`ArrayItem`] otherwise. Each value is
/// marshalled per `attr`: by-value types are stored in their fixed
/// width, variable-length values use a varlena header (short header
/// preferred whenever the length fits).
///
/// `datums` must have exactly `nelements` entries; either all are `None`
/// (meaning `isnull`) or all are `Some` (arrays never mix nulls,
/// `spec.md` §4.1 edge case).
///
/// # Errors
///
/// Returns [`Error::Decode`] if `datums` is inconsistent with `isnull`,
/// or [`Error::TidSpaceExhausted`] if the array would cross the TID
/// domain boundary.
pub fn create_item(
    attr: &AttributeDescriptor,
    tid: ZSTid,
    undo_ptr: UndoPtr,
    nelements: usize,
    datums: &[Option<&[u8]>],
    isnull: bool,
) -> Result<Item> {
    if datums.len() != nelements {
        return Err(Error::Decode(DecodeError::InvalidItemInput(
            "datums must match nelements",
        )));
    }
    if !datums.iter().all(|d| d.is_none() == isnull) {
        return Err(Error::Decode(DecodeError::InvalidItemInput(
            "arrays must never mix nulls (spec.md 4.1)",
        )));
    }

    let mut payload = Vec::new();
    if !isnull {
        for datum in datums.iter().flatten() {
            if attr.is_varlena() {
                encode_varlena(datum, &mut payload);
            } else {
                if datum.len() != attr.attlen.max(0) as usize {
                    return Err(Error::Decode(DecodeError::InvalidItemInput(
                        "fixed-width datum has wrong length",
                    )));
                }
                payload.extend_from_slice(datum);
            }
        }
    }

    let mut flags = ItemFlags::empty();
    if isnull {
        flags = flags.with(ItemFlags::NULL);
    }

    if nelements == 1 {
        Ok(Item::Single(SingleItem {
            tid,
            flags,
            undo_ptr,
            payload: Slice::from(payload),
        }))
    } else {
        flags = flags.with(ItemFlags::ARRAY);
        #[allow(clippy::cast_possible_truncation)]
        let nelements = nelements as u32;
        let _ = tid
            .checked_add(u64::from(nelements.saturating_sub(1)))
            .ok_or(Error::TidSpaceExhausted)?;
        Ok(Item::Array(ArrayItem {
            tid,
            flags,
            undo_ptr,
            nelements,
            payload: Slice::from(payload),
        }))
    }
}

/// Returns the byte length of a single stored element, used when callers
/// need to step through an array's payload one element at a time.
pub fn single_element_len(attr: &AttributeDescriptor, bytes: &[u8]) -> Result<usize> {
    element_len(attr, bytes)
}

impl Encode for Item {
    fn encode_into<W: Write>(&self, writer: &mut W) -> std::result::Result<(), EncodeError> {
        match self {
            Self::Single(item) => {
                let size = HEADER_LEN + 8 + item.payload.len();
                #[allow(clippy::cast_possible_truncation)]
                let header = ItemHeader {
                    tid: item.tid,
                    size: size as u32,
                    flags: item.flags,
                };
                header.encode_into(writer)?;
                writer.write_u64::<LittleEndian>(item.undo_ptr.raw())?;
                writer.write_all(&item.payload)?;
            }
            Self::Array(item) => {
                let size = HEADER_LEN + 8 + 4 + item.payload.len();
                #[allow(clippy::cast_possible_truncation)]
                let header = ItemHeader {
                    tid: item.tid,
                    size: size as u32,
                    flags: item.flags.with(ItemFlags::ARRAY),
                };
                header.encode_into(writer)?;
                writer.write_u64::<LittleEndian>(item.undo_ptr.raw())?;
                writer.write_u32::<LittleEndian>(item.nelements)?;
                writer.write_all(&item.payload)?;
            }
            Self::Compressed(item) => {
                let size = HEADER_LEN + 4 + 8 + item.compressed_bytes.len();
                #[allow(clippy::cast_possible_truncation)]
                let header = ItemHeader {
                    tid: item.first_tid,
                    size: size as u32,
                    flags: item.flags.with(ItemFlags::COMPRESSED),
                };
                header.encode_into(writer)?;
                writer.write_u32::<LittleEndian>(item.uncompressed_size)?;
                write_tid_as_u64(item.last_tid, writer)?;
                writer.write_all(&item.compressed_bytes)?;
            }
        }
        Ok(())
    }
}

impl Decode for Item {
    fn decode_from<R: Read>(reader: &mut R) -> std::result::Result<Self, DecodeError> {
        let header = ItemHeader::decode_from(reader)?;
        let body_len = (header.size as usize)
            .checked_sub(HEADER_LEN)
            .ok_or(DecodeError::InvalidTag(("item size underflows header", 0)))?;

        if header.flags.contains(ItemFlags::COMPRESSED) {
            let uncompressed_size = reader.read_u32::<LittleEndian>()?;
            let last_tid = read_tid_as_u64(reader)?;
            let remaining = body_len
                .checked_sub(4 + 8)
                .ok_or(DecodeError::InvalidTag(("compressed item too short", 0)))?;
            let mut bytes = vec![0u8; remaining];
            reader.read_exact(&mut bytes)?;
            Ok(Self::Compressed(CompressedItem {
                first_tid: header.tid,
                flags: header.flags,
                uncompressed_size,
                last_tid,
                compressed_bytes: Slice::from(bytes),
            }))
        } else if header.flags.contains(ItemFlags::ARRAY) {
            let undo_ptr = UndoPtr::new(reader.read_u64::<LittleEndian>()?);
            let nelements = reader.read_u32::<LittleEndian>()?;
            let remaining = body_len
                .checked_sub(8 + 4)
                .ok_or(DecodeError::InvalidTag(("array item too short", 0)))?;
            let mut payload = vec![0u8; remaining];
            reader.read_exact(&mut payload)?;
            Ok(Self::Array(ArrayItem {
                tid: header.tid,
                flags: header.flags,
                undo_ptr,
                nelements,
                payload: Slice::from(payload),
            }))
        } else {
            let undo_ptr = UndoPtr::new(reader.read_u64::<LittleEndian>()?);
            let remaining = body_len
                .checked_sub(8)
                .ok_or(DecodeError::InvalidTag(("single item too short", 0)))?;
            let mut payload = vec![0u8; remaining];
            reader.read_exact(&mut payload)?;
            Ok(Self::Single(SingleItem {
                tid: header.tid,
                flags: header.flags,
                undo_ptr,
                payload: Slice::from(payload),
            }))
        }
    }
}
