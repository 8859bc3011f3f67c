// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The page model (`spec.md` §2 module 3, §3, §6).
//!
//! A page is a fixed-size physical unit carrying an opaque trailer
//! (attribute number, level, key range, right sibling, flags) plus either
//! a dense array of `(tid, childblk)` downlinks (an internal page) or a
//! sorted, disjoint run of [`Item`]s (a leaf page, level 0).
//!
//! Per `spec.md` §9 ("Cyclic references... store block numbers, not
//! pointers"), every cross-page reference here is a [`BlockId`]; all
//! traversal goes through [`crate::collab::BufferManager`].

use crate::config::{PAGE_ID_BTREE, PAGE_SIZE, TRAILER_SIZE, USABLE_PAGE_SIZE};
use crate::coding::{Decode, Encode};
use crate::error::{Error, Result};
use crate::item::Item;
use crate::tid::{MAX_PLUS_ONE_ZS_TID, ZSTid};

/// A physical block number. `u32::MAX` is reserved as
/// [`BlockId::INVALID`], meaning "no block" (e.g. the rightmost page's
/// right sibling).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    /// Sentinel meaning "no block" (`spec.md` "right-sibling block number
    /// (`InvalidBlockNumber` for rightmost)").
    pub const INVALID: BlockId = BlockId(u32::MAX);

    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_invalid() {
            write!(f, "<invalid>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Page flag bits (`spec.md` §6, bit-exact).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageFlags(u16);

impl PageFlags {
    /// "A split completed at this level but the parent does not yet
    /// contain the downlink" (`spec.md` §4.6).
    pub const FOLLOW_RIGHT: PageFlags = PageFlags(0x01);

    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn contains(self, flag: PageFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[must_use]
    pub fn with(self, flag: PageFlags) -> Self {
        Self(self.0 | flag.0)
    }

    #[must_use]
    pub fn without(self, flag: PageFlags) -> Self {
        Self(self.0 & !flag.0)
    }

    #[must_use]
    pub fn bits(self) -> u16 {
        self.0
    }
}

/// The opaque page trailer. Field order and width are bit-exact per
/// `spec.md` §6: `{attno:u16, flags:u16, next:u32, lokey:u64, hikey:u64,
/// level:u16, page_id:u16}`, native endianness (not portable across
/// machines, per spec).
#[derive(Copy, Clone, Debug)]
pub struct Trailer {
    pub attno: u16,
    pub flags: PageFlags,
    pub next: BlockId,
    pub lokey: ZSTid,
    pub hikey: ZSTid,
    pub level: u16,
    pub page_id: u16,
}

impl Trailer {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    #[must_use]
    pub fn is_rightmost(&self) -> bool {
        self.hikey == MAX_PLUS_ONE_ZS_TID
    }

    /// Writes the trailer's fixed fields in native-endian byte order,
    /// exactly as `spec.md` §6 specifies.
    fn write_native(&self, buf: &mut [u8]) {
        assert!(buf.len() >= TRAILER_SIZE);
        let mut off = 0;
        buf[off..off + 2].copy_from_slice(&self.attno.to_ne_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.flags.bits().to_ne_bytes());
        off += 2;
        buf[off..off + 4].copy_from_slice(&self.next.raw().to_ne_bytes());
        off += 4;
        buf[off..off + 8].copy_from_slice(&self.lokey.value().to_ne_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.hikey.value().to_ne_bytes());
        off += 8;
        buf[off..off + 2].copy_from_slice(&self.level.to_ne_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.page_id.to_ne_bytes());
    }

    fn read_native(buf: &[u8]) -> Result<Self> {
        if buf.len() < TRAILER_SIZE {
            return Err(Error::Decode(crate::coding::DecodeError::InvalidTag((
                "trailer truncated",
                0,
            ))));
        }
        let mut off = 0;
        let attno = u16::from_ne_bytes(buf[off..off + 2].try_into().unwrap());
        off += 2;
        let flags = PageFlags(u16::from_ne_bytes(buf[off..off + 2].try_into().unwrap()));
        off += 2;
        let next = BlockId(u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap()));
        off += 4;
        let lokey = ZSTid::new(u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap()));
        off += 8;
        let hikey = ZSTid::new(u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap()));
        off += 8;
        let level = u16::from_ne_bytes(buf[off..off + 2].try_into().unwrap());
        off += 2;
        let page_id = u16::from_ne_bytes(buf[off..off + 2].try_into().unwrap());

        if page_id != PAGE_ID_BTREE {
            return Err(Error::UnexpectedPageId(page_id));
        }

        Ok(Self {
            attno,
            flags,
            next,
            lokey,
            hikey,
            level,
            page_id,
        })
    }
}

/// One `(tid, childblk)` downlink on an internal page.
#[derive(Copy, Clone, Debug)]
pub struct InternalEntry {
    pub tid: ZSTid,
    pub child: BlockId,
}

/// The level-specific contents of a page.
#[derive(Clone, Debug)]
pub enum PageBody {
    /// Level 0: a sorted, disjoint run of items (`spec.md` §3 invariants).
    Leaf(Vec<Item>),
    /// Level > 0: a sorted, dense array of downlinks (`spec.md` §3
    /// "Internal page").
    Internal(Vec<InternalEntry>),
}

/// A page: trailer plus body. The in-memory representation is the fully
/// decoded logical form (every algorithm in this crate, per `spec.md`
/// §4.5, operates on "a virtual list of plain items", not raw bytes);
/// [`Page::encode_into_bytes`]/[`Page::decode_from_bytes`] round-trip it
/// to the fixed-size physical image the buffer manager actually holds.
#[derive(Clone, Debug)]
pub struct Page {
    pub trailer: Trailer,
    pub body: PageBody,
}

impl Page {
    #[must_use]
    pub fn new_leaf(attno: u16, lokey: ZSTid, hikey: ZSTid, items: Vec<Item>) -> Self {
        Self {
            trailer: Trailer {
                attno,
                flags: PageFlags::empty(),
                next: BlockId::INVALID,
                lokey,
                hikey,
                level: 0,
                page_id: PAGE_ID_BTREE,
            },
            body: PageBody::Leaf(items),
        }
    }

    #[must_use]
    pub fn new_internal(
        attno: u16,
        level: u16,
        lokey: ZSTid,
        hikey: ZSTid,
        entries: Vec<InternalEntry>,
    ) -> Self {
        assert!(level > 0, "internal pages have level > 0");
        Self {
            trailer: Trailer {
                attno,
                flags: PageFlags::empty(),
                next: BlockId::INVALID,
                lokey,
                hikey,
                level,
                page_id: PAGE_ID_BTREE,
            },
            body: PageBody::Internal(entries),
        }
    }

    #[must_use]
    pub fn items(&self) -> &[Item] {
        match &self.body {
            PageBody::Leaf(items) => items,
            PageBody::Internal(_) => &[],
        }
    }

    #[must_use]
    pub fn items_mut(&mut self) -> Option<&mut Vec<Item>> {
        match &mut self.body {
            PageBody::Leaf(items) => Some(items),
            PageBody::Internal(_) => None,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[InternalEntry] {
        match &self.body {
            PageBody::Internal(entries) => entries,
            PageBody::Leaf(_) => &[],
        }
    }

    /// Total encoded size of the body's contents, not counting the slot
    /// array or trailer — i.e. the bytes actually occupied by item/entry
    /// payloads. Used by [`crate::compression`] and [`crate::mutation`]
    /// to compute the remaining free-space budget for a page.
    #[must_use]
    pub fn body_encoded_len(&self) -> usize {
        match &self.body {
            PageBody::Leaf(items) => items.iter().map(|i| i.encode_into_vec().len()).sum(),
            PageBody::Internal(entries) => entries.len() * INTERNAL_ENTRY_SIZE,
        }
    }

    /// Bytes left on this page for more item/entry content, after
    /// accounting for the trailer and the slot array.
    #[must_use]
    pub fn free_space(&self) -> usize {
        let slot_count = match &self.body {
            PageBody::Leaf(items) => items.len(),
            PageBody::Internal(entries) => entries.len(),
        };
        let slot_array_bytes = 2 + slot_count * 4;
        USABLE_PAGE_SIZE.saturating_sub(slot_array_bytes + self.body_encoded_len())
    }

    /// Encodes this page into a fixed `PAGE_SIZE` physical image:
    /// trailer, then a `u16` slot count and `count` `u32` byte offsets
    /// (the "generic slot array" of `spec.md` §3), then item/entry bodies
    /// packed back-to-back in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferAllocationFailed`] if the encoded page
    /// would exceed `PAGE_SIZE`.
    pub fn encode_into_bytes(&self) -> Result<Box<[u8; PAGE_SIZE]>> {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        self.trailer.write_native(&mut buf[..TRAILER_SIZE]);

        let mut bodies: Vec<Vec<u8>> = Vec::new();
        match &self.body {
            PageBody::Leaf(items) => {
                for item in items {
                    bodies.push(item.encode_into_vec());
                }
            }
            PageBody::Internal(entries) => {
                for entry in entries {
                    let mut b = Vec::with_capacity(INTERNAL_ENTRY_SIZE);
                    b.extend_from_slice(&entry.tid.value().to_le_bytes());
                    b.extend_from_slice(&entry.child.raw().to_le_bytes());
                    bodies.push(b);
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let slot_count = bodies.len() as u16;
        let slot_array_start = TRAILER_SIZE;
        let slot_array_len = 2 + bodies.len() * 4;
        let mut data_offset = slot_array_start + slot_array_len;

        if data_offset > PAGE_SIZE {
            return Err(Error::BufferAllocationFailed);
        }

        buf[slot_array_start..slot_array_start + 2].copy_from_slice(&slot_count.to_le_bytes());

        let mut offsets = Vec::with_capacity(bodies.len());
        for body in &bodies {
            offsets.push(data_offset);
            data_offset += body.len();
        }

        if data_offset > PAGE_SIZE {
            return Err(Error::BufferAllocationFailed);
        }

        for (i, &offset) in offsets.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let off_bytes = (offset as u32).to_le_bytes();
            let pos = slot_array_start + 2 + i * 4;
            buf[pos..pos + 4].copy_from_slice(&off_bytes);
        }

        for (body, &offset) in bodies.iter().zip(&offsets) {
            buf[offset..offset + body.len()].copy_from_slice(body);
        }

        Ok(buf)
    }

    /// Decodes a physical page image produced by [`Page::encode_into_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedPageId`] if the trailer's `page_id`
    /// does not match [`PAGE_ID_BTREE`], or [`Error::Decode`] on a
    /// truncated/corrupt image.
    pub fn decode_from_bytes(buf: &[u8]) -> Result<Self> {
        let trailer = Trailer::read_native(&buf[..TRAILER_SIZE])?;

        let slot_array_start = TRAILER_SIZE;
        let slot_count =
            u16::from_le_bytes(buf[slot_array_start..slot_array_start + 2].try_into().unwrap())
                as usize;

        let mut offsets = Vec::with_capacity(slot_count);
        for i in 0..slot_count {
            let pos = slot_array_start + 2 + i * 4;
            let off = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
            offsets.push(off);
        }

        if trailer.is_leaf() {
            let mut items = Vec::with_capacity(slot_count);
            for &off in &offsets {
                let mut cursor = std::io::Cursor::new(&buf[off..]);
                items.push(Item::decode_from(&mut cursor)?);
            }
            Ok(Self {
                trailer,
                body: PageBody::Leaf(items),
            })
        } else {
            let mut entries = Vec::with_capacity(slot_count);
            for &off in &offsets {
                let tid = ZSTid::new(u64::from_le_bytes(
                    buf[off..off + 8].try_into().unwrap(),
                ));
                let child = BlockId::new(u32::from_le_bytes(
                    buf[off + 8..off + 12].try_into().unwrap(),
                ));
                entries.push(InternalEntry { tid, child });
            }
            Ok(Self {
                trailer,
                body: PageBody::Internal(entries),
            })
        }
    }
}

const INTERNAL_ENTRY_SIZE: usize = 8 + 4;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttributeDescriptor;
    use crate::item::create_item;
    use crate::tid::MIN_ZS_TID;
    use crate::undo::UndoPtr;
    use test_log::test;

    fn attr() -> AttributeDescriptor {
        AttributeDescriptor {
            attno: 1,
            attlen: 4,
            attbyval: true,
        }
    }

    #[test]
    fn leaf_page_round_trips_through_bytes() {
        let attr = attr();
        let mut items = Vec::new();
        for i in 0..10u64 {
            let v = (i as i32).to_le_bytes();
            items.push(
                create_item(
                    &attr,
                    ZSTid::new(MIN_ZS_TID.value() + i),
                    UndoPtr::new(i),
                    1,
                    &[Some(&v)],
                    false,
                )
                .unwrap(),
            );
        }

        let page = Page::new_leaf(1, MIN_ZS_TID, MAX_PLUS_ONE_ZS_TID, items);
        let bytes = page.encode_into_bytes().unwrap();
        let decoded = Page::decode_from_bytes(bytes.as_ref()).unwrap();

        assert_eq!(decoded.trailer.attno, 1);
        assert!(decoded.trailer.is_leaf());
        assert_eq!(decoded.items().len(), 10);
        assert_eq!(decoded.items()[0].first_tid(), MIN_ZS_TID);
    }

    #[test]
    fn internal_page_round_trips_through_bytes() {
        let entries = vec![
            InternalEntry {
                tid: ZSTid::new(1),
                child: BlockId::new(10),
            },
            InternalEntry {
                tid: ZSTid::new(100),
                child: BlockId::new(20),
            },
        ];
        let page = Page::new_internal(1, 1, ZSTid::new(1), MAX_PLUS_ONE_ZS_TID, entries);
        let bytes = page.encode_into_bytes().unwrap();
        let decoded = Page::decode_from_bytes(bytes.as_ref()).unwrap();

        assert!(!decoded.trailer.is_leaf());
        assert_eq!(decoded.entries().len(), 2);
        assert_eq!(decoded.entries()[1].child, BlockId::new(20));
    }

    #[test]
    fn rightmost_leaf_has_max_plus_one_hikey() {
        let page = Page::new_leaf(1, MIN_ZS_TID, MAX_PLUS_ONE_ZS_TID, vec![]);
        assert!(page.trailer.is_rightmost());
    }

    #[test]
    fn follow_right_flag_round_trips() {
        let mut page = Page::new_leaf(1, MIN_ZS_TID, ZSTid::new(50), vec![]);
        page.trailer.flags = page.trailer.flags.with(PageFlags::FOLLOW_RIGHT);
        let bytes = page.encode_into_bytes().unwrap();
        let decoded = Page::decode_from_bytes(bytes.as_ref()).unwrap();
        assert!(decoded.trailer.flags.contains(PageFlags::FOLLOW_RIGHT));
    }
}
