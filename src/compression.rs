// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Packing a run of plain (Single/Array) items into one opaque
//! [`CompressedItem`], and unpacking it back.
//!
//! Two integer side-tables travel alongside the compressed item bytes:
//! each item's element span (for locating the item covering a given TID
//! without decompressing the whole run) and each item's encoded byte
//! length (for random-access decoding of one item once its index is
//! known). Both side-tables are narrow, monotonic-ish integer sequences,
//! so they are packed with the Simple-8b codec before the whole blob
//! (side-tables plus concatenated item bytes) goes through a general
//! byte compressor. Containers never nest: every item handed to
//! [`Compressor::add`] must already be `Single` or `Array`.

use crate::coding::{Decode, Encode};
use crate::error::{Error, Result};
use crate::item::{CompressedItem, Item, ItemFlags};
use crate::simple8b;
use crate::tid::ZSTid;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

#[cfg(feature = "lz4")]
fn block_compress(raw: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress_prepend_size(raw)
}

#[cfg(feature = "lz4")]
fn block_decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::block::decompress_size_prepended(bytes)
        .map_err(|_| Error::Decode(crate::coding::DecodeError::InvalidTag(("lz4 block", 0))))
}

#[cfg(not(feature = "lz4"))]
fn block_compress(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 4);
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    out.extend_from_slice(raw);
    out
}

#[cfg(not(feature = "lz4"))]
fn block_decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < 4 {
        return Err(Error::Decode(crate::coding::DecodeError::InvalidTag((
            "raw block too short",
            0,
        ))));
    }
    Ok(bytes[4..].to_vec())
}

fn write_word_table<W: Write>(words: &[u64], writer: &mut W) -> std::io::Result<()> {
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32::<LittleEndian>(words.len() as u32)?;
    for &w in words {
        writer.write_u64::<LittleEndian>(w)?;
    }
    Ok(())
}

fn read_word_table<R: Read>(reader: &mut R) -> std::io::Result<Vec<u64>> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut words = Vec::with_capacity(len);
    for _ in 0..len {
        words.push(reader.read_u64::<LittleEndian>()?);
    }
    Ok(words)
}

/// Accumulates a run of plain items in ascending, non-overlapping TID
/// order and packs them into one [`CompressedItem`] on [`Compressor::finish`].
///
/// Tracks a byte `budget` per `spec.md` §4.2 (`begin(budget)` / `add(item)
/// -> bool`): [`Compressor::add`] provisionally appends the item, checks
/// whether the container's *estimated* on-disk size (the raw,
/// uncompressed item bytes accumulated so far -- compression can only
/// shrink from there, so this is a conservative but cheap bound) still
/// fits `budget`, and rolls the append back if not, leaving the
/// compressor exactly as it was before the call.
pub struct Compressor {
    items: Vec<Item>,
    raw_len: usize,
    budget: usize,
}

impl Compressor {
    /// Resets the compressor with a target byte bound. Use `usize::MAX`
    /// for an unconditional run (e.g. recompressing a container that is
    /// already known to fit, such as [`compress_run`]'s callers).
    #[must_use]
    pub fn begin(budget: usize) -> Self {
        Self {
            items: Vec::new(),
            raw_len: 0,
            budget,
        }
    }

    /// Attempts to append `item` to the run. Returns `Ok(true)` if it was
    /// added, `Ok(false)` if it would have exceeded `budget` (the caller
    /// must flush and start a new container, per `spec.md` §4.2).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NestedCompressedItem`] if `item` is itself a
    /// [`CompressedItem`], or [`Error::Decode`] if it does not sort
    /// strictly after the previously added item.
    pub fn add(&mut self, item: Item) -> Result<bool> {
        if item.is_compressed() {
            return Err(Error::NestedCompressedItem);
        }
        if let Some(prev) = self.items.last() {
            if item.first_tid() <= prev.last_tid() {
                return Err(Error::Decode(crate::coding::DecodeError::InvalidTag((
                    "items passed to Compressor must be strictly ascending",
                    0,
                ))));
            }
        }

        let item_len = item.encode_into_vec().len();
        if self.raw_len + item_len > self.budget {
            // Per `spec.md` §4.2: "Failure to compress even a single item
            // within budget is a legal outcome" -- even the first item in
            // an empty run can be rejected, leaving the caller to store
            // it uncompressed instead.
            return Ok(false);
        }

        self.raw_len += item_len;
        self.items.push(item);
        Ok(true)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Packs the accumulated run into a [`CompressedItem`].
    ///
    /// # Errors
    ///
    /// Returns an error if no items were added, or if the side-tables'
    /// values do not fit the codec's domain (`spec.md` never produces
    /// such values in practice, since spans and item sizes are always
    /// well within 60 bits).
    pub fn finish(self) -> Result<CompressedItem> {
        let first = self
            .items
            .first()
            .ok_or_else(|| Error::Decode(crate::coding::DecodeError::InvalidTag(("empty run", 0))))?;
        let first_tid = first.first_tid();
        let last_tid = self.items.last().unwrap().last_tid();

        let spans: Vec<u64> = self
            .items
            .iter()
            .map(|i| i.last_tid().value() - i.first_tid().value() + 1)
            .collect();

        let mut encoded_items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            encoded_items.push(item.encode_into_vec());
        }
        let sizes: Vec<u64> = encoded_items.iter().map(|b| b.len() as u64).collect();

        simple8b::validate_domain(&spans)?;
        simple8b::validate_domain(&sizes)?;
        let span_words = simple8b::encode(&spans);
        let size_words = simple8b::encode(&sizes);

        let mut raw = Vec::new();
        for bytes in &encoded_items {
            raw.extend_from_slice(bytes);
        }
        let uncompressed_size = raw.len();

        let mut buf = Vec::new();
        #[allow(clippy::cast_possible_truncation)]
        buf.write_u32::<LittleEndian>(self.items.len() as u32)?;
        write_word_table(&span_words, &mut buf)?;
        write_word_table(&size_words, &mut buf)?;
        buf.write_all(&block_compress(&raw))?;

        Ok(CompressedItem {
            first_tid,
            flags: ItemFlags::empty(),
            #[allow(clippy::cast_possible_truncation)]
            uncompressed_size: uncompressed_size as u32,
            last_tid,
            compressed_bytes: buf.into(),
        })
    }
}

/// Unpacks a [`CompressedItem`] produced by [`Compressor::finish`] back
/// into its plain items, on demand.
pub struct Decompressor {
    spans: Vec<u64>,
    offsets: Vec<usize>,
    raw: Vec<u8>,
}

impl Decompressor {
    /// Parses the side-tables and inflates the item bytes, but does not
    /// decode any item yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `item`'s compressed bytes are
    /// truncated or corrupt.
    pub fn init(item: &CompressedItem) -> Result<Self> {
        let mut cursor = Cursor::new(&item.compressed_bytes[..]);
        let n_items = cursor.read_u32::<LittleEndian>()? as usize;
        let span_words = read_word_table(&mut cursor)?;
        let size_words = read_word_table(&mut cursor)?;

        let spans = simple8b::decode(&span_words, n_items);
        let sizes = simple8b::decode(&size_words, n_items);

        let tail_start = cursor.position() as usize;
        let raw = block_decompress(&item.compressed_bytes[tail_start..])?;

        let mut offsets = Vec::with_capacity(n_items);
        let mut pos = 0usize;
        for &size in &sizes {
            offsets.push(pos);
            pos += size as usize;
        }

        Ok(Self {
            spans,
            offsets,
            raw,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Decodes the item at `index` (0-based, in the run's ascending
    /// order).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `index` is out of range or the item
    /// bytes at that offset are corrupt.
    pub fn read_item(&self, index: usize) -> Result<Item> {
        let start = *self
            .offsets
            .get(index)
            .ok_or_else(|| Error::Decode(crate::coding::DecodeError::InvalidTag(("item index", 0))))?;
        let mut cursor = Cursor::new(&self.raw[start..]);
        Ok(Item::decode_from(&mut cursor)?)
    }

    /// Decodes items `range` in one pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if any item in `range` is corrupt, or
    /// if `range` runs past the end of the container.
    pub fn chunk(&self, range: std::ops::Range<usize>) -> Result<Vec<Item>> {
        range.map(|i| self.read_item(i)).collect()
    }

    /// Decodes every item in the run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if any item is corrupt.
    pub fn items(&self) -> Result<Vec<Item>> {
        self.chunk(0..self.len())
    }

    /// Finds the index of the item whose range covers `tid`, or `None`
    /// if `tid` falls in a gap or past the end of the run.
    #[must_use]
    pub fn find_covering(&self, first_tid: ZSTid, tid: ZSTid) -> Option<usize> {
        let mut cursor = first_tid.value();
        for (i, &span) in self.spans.iter().enumerate() {
            let end = cursor + span - 1;
            if tid.value() >= cursor && tid.value() <= end {
                return Some(i);
            }
            if tid.value() < cursor {
                return None;
            }
            cursor = end + 1;
        }
        None
    }
}

/// Packs `items` (already sorted, disjoint, ascending) into a single
/// [`CompressedItem`]. Convenience wrapper around [`Compressor`] for
/// callers that already have the whole run in hand.
///
/// # Errors
///
/// See [`Compressor::add`] and [`Compressor::finish`].
pub fn compress_run(items: &[Item]) -> Result<CompressedItem> {
    let mut compressor = Compressor::begin(usize::MAX);
    for item in items {
        compressor.add(item.clone())?;
    }
    compressor.finish()
}

/// Unpacks every item out of `item`. Convenience wrapper around
/// [`Decompressor`] for callers that want the whole run at once.
///
/// # Errors
///
/// See [`Decompressor::init`] and [`Decompressor::items`].
pub fn decompress_run(item: &CompressedItem) -> Result<Vec<Item>> {
    Decompressor::init(item)?.items()
}

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

    fn make_items(n: u64) -> Vec<Item> {
        let attr = attr();
        (0..n)
            .map(|i| {
                let v = (i as i32).to_le_bytes();
                create_item(
                    &attr,
                    ZSTid::new(MIN_ZS_TID.value() + i),
                    UndoPtr::new(i),
                    1,
                    &[Some(&v)],
                    false,
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn round_trips_a_run_of_items() {
        let items = make_items(200);
        let compressed = compress_run(&items).unwrap();
        assert_eq!(compressed.first_tid, items[0].first_tid());
        assert_eq!(compressed.last_tid, items[199].last_tid());

        let decompressed = decompress_run(&compressed).unwrap();
        assert_eq!(decompressed.len(), 200);
        for (original, back) in items.iter().zip(&decompressed) {
            assert_eq!(original.first_tid(), back.first_tid());
        }
    }

    #[test]
    fn random_access_read_item_matches_full_decode() {
        let items = make_items(50);
        let compressed = compress_run(&items).unwrap();
        let decompressor = Decompressor::init(&compressed).unwrap();

        for i in [0, 10, 49] {
            let item = decompressor.read_item(i).unwrap();
            assert_eq!(item.first_tid(), items[i].first_tid());
        }
    }

    #[test]
    fn find_covering_locates_item_by_tid() {
        let items = make_items(20);
        let compressed = compress_run(&items).unwrap();
        let decompressor = Decompressor::init(&compressed).unwrap();

        let idx = decompressor
            .find_covering(compressed.first_tid, ZSTid::new(MIN_ZS_TID.value() + 5))
            .unwrap();
        assert_eq!(idx, 5);

        assert!(decompressor
            .find_covering(compressed.first_tid, ZSTid::new(MIN_ZS_TID.value() + 999))
            .is_none());
    }

    #[test]
    fn rejects_out_of_order_items() {
        let items = make_items(3);
        let mut compressor = Compressor::begin(usize::MAX);
        compressor.add(items[1].clone()).unwrap();
        assert!(compressor.add(items[0].clone()).is_err());
    }

    #[test]
    fn rejects_nesting_a_compressed_item() {
        let items = make_items(3);
        let compressed = compress_run(&items).unwrap();
        let mut compressor = Compressor::begin(usize::MAX);
        assert!(compressor.add(Item::Compressed(compressed)).is_err());
    }

    #[test]
    fn add_rejects_item_that_would_exceed_budget() {
        let items = make_items(5);
        let one_item_len = items[0].encode_into_vec().len();
        let mut compressor = Compressor::begin(one_item_len);

        assert!(compressor.add(items[0].clone()).unwrap());
        // A second item of the same size has no room left in the budget.
        assert!(!compressor.add(items[1].clone()).unwrap());
        assert_eq!(compressor.len(), 1);
    }

    #[test]
    fn add_rejects_single_oversized_item_even_when_empty() {
        let items = make_items(1);
        let too_small_budget = items[0].encode_into_vec().len() - 1;
        let mut compressor = Compressor::begin(too_small_budget);
        assert!(!compressor.add(items[0].clone()).unwrap());
        assert!(compressor.is_empty());
    }

    #[test]
    fn compresses_bulk_inserted_run_smaller_than_raw() {
        let items = make_items(500);
        let raw_len: usize = items.iter().map(|i| i.encode_into_vec().len()).sum();
        let compressed = compress_run(&items).unwrap();
        assert!(compressed.compressed_bytes.len() < raw_len);
    }
}
