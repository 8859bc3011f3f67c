// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The leaf mutation engine (`spec.md` §4.5): rewriting a leaf's item list
//! after an insert, delete, or update, and repacking the result into one
//! or more fresh leaf images under a byte budget.
//!
//! Every caller funnels through the same four steps:
//!
//! 1. *Normalize* -- [`replace_item`]/[`insert_into_leaf`] build a flat,
//!    ascending list of plain/compressed items reflecting the edit. An
//!    edit that lands inside an existing [`crate::item::CompressedItem`]
//!    decompresses just that one container; every other item on the page,
//!    compressed or not, passes through untouched.
//! 2. *Pack* -- [`pack_leaf_images`] streams the normalized list through a
//!    [`PackState`], which runs items through a [`Compressor`] up to
//!    [`USABLE_PAGE_SIZE`](crate::config::USABLE_PAGE_SIZE) per page,
//!    opening a new page whenever the current one is full, producing one
//!    or more [`LeafImage`]s (`spec.md` §4.5 Step B). A [`PruneContext`],
//!    if supplied, drops or tombstones dead items along the way.
//! 3. *Commit* -- [`commit_images`] writes the images back: the first
//!    reuses the original block, the rest are freshly allocated and
//!    chained via `trailer.next`/`FOLLOW_RIGHT`, written right-to-left so
//!    the chain is always navigable (`spec.md` §4.5 Step C, mirroring
//!    [`crate::structure::split_leaf`]'s write order).
//! 4. *Propagate* -- the caller (`spec.md` §4.5 Step D, [`crate::tree`])
//!    feeds the extra images' `(BlockId, ZSTid)` downlinks to
//!    [`crate::structure::insert_downlink`] in order.

use crate::attr::AttributeDescriptor;
use crate::binary_search::partition_point;
use crate::buffer::PageGuard;
use crate::collab::{BufferManager, VisibilityOracle, Wal};
use crate::compression::{decompress_run, Compressor};
use crate::config::USABLE_PAGE_SIZE;
use crate::error::{Error, Result};
use crate::item::{ArrayItem, Item, ItemFlags, SingleItem};
use crate::mvcc::is_prunable;
use crate::page::{BlockId, Page, PageFlags};
use crate::tid::ZSTid;
use crate::undo::{UndoPtr, DEAD_UNDO_PTR};

/// The slot-array pointer every item on a page costs in addition to its
/// own encoded bytes (`spec.md` §3's "generic slot array").
const SLOT_PTR_SIZE: usize = 4;

/// Finds the index into `items` (sorted, disjoint, by `first_tid`) of
/// the item whose range covers `tid`, if any.
#[must_use]
pub fn locate_covering_index(items: &[Item], tid: ZSTid) -> Option<usize> {
    let idx = partition_point(items, |i| i.first_tid() <= tid);
    let slot = idx.checked_sub(1)?;
    items.get(slot).filter(|i| i.covers(tid)).map(|_| slot)
}

/// The result of applying a mutation closure to the single plain item
/// covering a TID: the pieces that should replace it (possibly zero, for
/// a full removal of a singleton).
pub type ReplacementPieces = Vec<Item>;

/// What a mutation needs to know about the store's undo horizon in order
/// to prune dead items while repacking a leaf (`spec.md` §4.7).
pub struct PruneContext<'a> {
    pub oracle: &'a dyn VisibilityOracle,
    pub oldest_retained: UndoPtr,
}

/// Either drops `item` (already [`ItemFlags::DEAD`] and prunable) or
/// tombstones it (`DELETED`/`UPDATED` and prunable: gains `DEAD` and its
/// undo pointer is replaced by [`DEAD_UNDO_PTR`], ready for physical
/// removal on the leaf's next repacking), or passes it through
/// unchanged.
fn prune_or_mark(item: Item, ctx: &PruneContext<'_>) -> Option<Item> {
    let Some(undo_ptr) = item.undo_ptr() else {
        return Some(item); // a Compressed container: nothing to inspect here.
    };
    if !is_prunable(ctx.oracle, item.flags(), undo_ptr, ctx.oldest_retained) {
        return Some(item);
    }
    if item.flags().contains(ItemFlags::DEAD) {
        return None;
    }
    Some(match item {
        Item::Single(s) => Item::Single(SingleItem {
            flags: s.flags.with(ItemFlags::DEAD),
            undo_ptr: DEAD_UNDO_PTR,
            ..s
        }),
        Item::Array(a) => Item::Array(ArrayItem {
            flags: a.flags.with(ItemFlags::DEAD),
            undo_ptr: DEAD_UNDO_PTR,
            ..a
        }),
        compressed @ Item::Compressed(_) => compressed,
    })
}

/// One rewritten leaf's worth of items plus the key range it should carry.
struct LeafImage {
    lokey: ZSTid,
    hikey: ZSTid,
    items: Vec<Item>,
}

/// Packs a normalized item list into one or more [`LeafImage`]s, each
/// bounded by [`USABLE_PAGE_SIZE`]. Plain items are streamed through a
/// [`Compressor`]; a container already on the page passes straight
/// through without being re-encoded.
struct PackState {
    images: Vec<LeafImage>,
    current_lokey: ZSTid,
    current_items: Vec<Item>,
    current_used: usize,
    pending: Compressor,
}

impl PackState {
    fn new(lokey: ZSTid) -> Self {
        Self {
            images: Vec::new(),
            current_lokey: lokey,
            current_items: Vec::new(),
            current_used: 2, // the slot-count u16 prefix (spec.md §3).
            pending: Compressor::begin(0),
        }
    }

    fn remaining(&self) -> usize {
        USABLE_PAGE_SIZE.saturating_sub(self.current_used)
    }

    fn start_new_page(&mut self, next_lokey: ZSTid) {
        let items = std::mem::take(&mut self.current_items);
        self.images.push(LeafImage {
            lokey: self.current_lokey,
            hikey: next_lokey,
            items,
        });
        self.current_lokey = next_lokey;
        self.current_used = 2;
    }

    /// Finishes whatever run is pending into a [`Item::Compressed`] and
    /// places it on the current page. A no-op if nothing is pending.
    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let finished = std::mem::replace(&mut self.pending, Compressor::begin(0));
        let container = Item::Compressed(finished.finish()?);
        self.place(container);
        Ok(())
    }

    fn place(&mut self, item: Item) {
        self.current_used += item.encode_into_vec().len() + SLOT_PTR_SIZE;
        self.current_items.push(item);
    }

    /// Places `item` directly, uncompressed -- the fallback for an item
    /// that does not even fit alone inside a fresh [`Compressor`] batch.
    fn push_plain_uncompressed(&mut self, item: Item) {
        self.place(item);
    }

    /// Streams a plain (Single/Array) item through the pending
    /// [`Compressor`] run, flushing and/or opening new pages as needed.
    fn push_plain(&mut self, item: Item) -> Result<()> {
        if self.pending.is_empty() {
            let budget = self.remaining().saturating_sub(SLOT_PTR_SIZE);
            self.pending = Compressor::begin(budget);
        }
        if self.pending.add(item.clone())? {
            return Ok(());
        }

        let batch_was_non_empty = !self.pending.is_empty();
        self.flush_pending()?;
        if batch_was_non_empty {
            // Retry against a fresh compressor sized to what's left on
            // this same page now that the prior batch has landed.
            return self.push_plain(item);
        }

        if self.current_items.is_empty() {
            // Doesn't fit even alone on an otherwise-empty page: an
            // oversized item is still bounded by
            // `config::MAX_DATUM_SIZE`, so storing it raw always fits.
            self.push_plain_uncompressed(item);
            Ok(())
        } else {
            self.start_new_page(item.first_tid());
            self.push_plain(item)
        }
    }

    /// Places an already-compressed container that is passing through
    /// this repacking unchanged.
    fn push_compressed(&mut self, item: Item) -> Result<()> {
        self.flush_pending()?;
        let len = item.encode_into_vec().len() + SLOT_PTR_SIZE;
        if len > self.remaining() && !self.current_items.is_empty() {
            self.start_new_page(item.first_tid());
        }
        self.place(item);
        Ok(())
    }

    fn finish(mut self, hikey: ZSTid) -> Result<Vec<LeafImage>> {
        self.flush_pending()?;
        self.images.push(LeafImage {
            lokey: self.current_lokey,
            hikey,
            items: self.current_items,
        });
        Ok(self.images)
    }
}

/// Drives a [`PackState`] over `items` (already sorted, disjoint,
/// ascending -- the normalized edit), pruning dead items per `prune` if
/// given.
///
/// # Errors
///
/// Propagates [`Compressor`]/encode errors.
fn pack_leaf_images(
    items: Vec<Item>,
    lokey: ZSTid,
    hikey: ZSTid,
    prune: Option<&PruneContext<'_>>,
) -> Result<Vec<LeafImage>> {
    let mut state = PackState::new(lokey);
    for item in items {
        let item = match prune {
            Some(ctx) => match prune_or_mark(item, ctx) {
                Some(item) => item,
                None => continue,
            },
            None => item,
        };
        if item.is_compressed() {
            state.push_compressed(item)?;
        } else {
            state.push_plain(item)?;
        }
    }
    state.finish(hikey)
}

/// Writes `images` back to storage: the first reuses `leaf_block`, the
/// rest are freshly allocated and chained via `trailer.next`, written
/// right-to-left (`spec.md` §4.5 Step C) so a reader following
/// `FOLLOW_RIGHT` never meets an unwritten page. Returns the
/// `(BlockId, lokey)` of every image after the first, for the caller to
/// install as downlinks in the parent.
///
/// # Errors
///
/// Propagates buffer manager, WAL, and encode errors.
fn commit_images<B: BufferManager, W: Wal>(
    buffers: &B,
    wal: &W,
    leaf_block: BlockId,
    attno: u16,
    old_next: BlockId,
    images: Vec<LeafImage>,
) -> Result<Vec<(BlockId, ZSTid)>> {
    // `spec.md` §4.5 Step C / §7: every page this call touches is dirtied
    // and WAL'd as one atomic unit, or none are.
    wal.start_crit()?;
    let result = (|| -> Result<Vec<(BlockId, ZSTid)>> {
        if images.len() == 1 {
            let image = images.into_iter().next().expect("len checked above");
            let mut guard = PageGuard::acquire(buffers, leaf_block)?;
            let page = guard.page_mut();
            page.trailer.lokey = image.lokey;
            page.trailer.hikey = image.hikey;
            *page
                .items_mut()
                .expect("commit_images only ever rewrites a leaf") = image.items;
            guard.flush_with_wal(wal)?;
            return Ok(Vec::new());
        }

        let mut blocks = Vec::with_capacity(images.len());
        blocks.push(leaf_block);
        for _ in 1..images.len() {
            blocks.push(buffers.allocate()?);
        }

        let last_index = images.len() - 1;
        let mut downlinks = Vec::with_capacity(last_index);

        for (i, image) in images.into_iter().enumerate().rev() {
            let mut page = Page::new_leaf(attno, image.lokey, image.hikey, image.items);
            page.trailer.next = if i == last_index {
                old_next
            } else {
                blocks[i + 1]
            };
            if i != last_index {
                page.trailer.flags = page.trailer.flags.with(PageFlags::FOLLOW_RIGHT);
            }

            if i == 0 {
                let mut guard = PageGuard::acquire(buffers, blocks[i])?;
                *guard.page_mut() = page;
                guard.flush_with_wal(wal)?;
            } else {
                wal.log_page_image(blocks[i], &page)?;
                buffers.write_page(blocks[i], &page)?;
                downlinks.push((blocks[i], image.lokey));
            }
        }
        downlinks.reverse();
        Ok(downlinks)
    })();
    wal.end_crit()?;
    result
}

/// Inserts `new_item` at the end of `leaf_block`'s item list and repacks
/// the leaf, splitting it into a chain of pages if it no longer fits in
/// one. Used once an ordinary insert finds no room on the target leaf
/// (`spec.md` §4.5); the new item's TID is always greater than everything
/// already there, so no decompression is needed to place it.
///
/// # Errors
///
/// Propagates buffer manager, WAL, and compression errors.
pub fn insert_into_leaf<B: BufferManager, W: Wal>(
    buffers: &B,
    wal: &W,
    leaf_block: BlockId,
    new_item: Item,
) -> Result<Vec<(BlockId, ZSTid)>> {
    let (attno, lokey, hikey, old_next, mut items) = {
        let guard = PageGuard::acquire(buffers, leaf_block)?;
        let page = guard.page();
        (
            page.trailer.attno,
            page.trailer.lokey,
            page.trailer.hikey,
            page.trailer.next,
            page.items().to_vec(),
        )
    };
    items.push(new_item);

    let images = pack_leaf_images(items, lokey, hikey, None)?;
    commit_images(buffers, wal, leaf_block, attno, old_next, images)
}

/// Locates the item covering `tid` on `leaf_block` (reaching inside a
/// [`crate::item::CompressedItem`] if necessary), applies `mutate` to the
/// one plain item that actually covers `tid`, and repacks the leaf with
/// the result spliced in, optionally pruning dead items along the way.
///
/// # Errors
///
/// Returns [`Error::OldItemNotFound`] if no item covers `tid`, or
/// propagates decompression/recompression/buffer errors.
pub fn replace_item<B, W, F>(
    buffers: &B,
    wal: &W,
    leaf_block: BlockId,
    tid: ZSTid,
    mutate: F,
    prune: Option<PruneContext<'_>>,
) -> Result<Vec<(BlockId, ZSTid)>>
where
    B: BufferManager,
    W: Wal,
    F: FnOnce(&Item) -> Result<ReplacementPieces>,
{
    let (attno, lokey, hikey, old_next, items) = {
        let guard = PageGuard::acquire(buffers, leaf_block)?;
        let page = guard.page();
        (
            page.trailer.attno,
            page.trailer.lokey,
            page.trailer.hikey,
            page.trailer.next,
            page.items().to_vec(),
        )
    };

    let slot = locate_covering_index(&items, tid).ok_or(Error::OldItemNotFound(tid))?;
    let mut normalized = Vec::with_capacity(items.len() + 2);
    normalized.extend_from_slice(&items[..slot]);

    if let Item::Compressed(container) = &items[slot] {
        let run = decompress_run(container)?;
        let sub = locate_covering_index(&run, tid).ok_or(Error::OldItemNotFound(tid))?;
        normalized.extend_from_slice(&run[..sub]);
        normalized.extend(mutate(&run[sub])?);
        normalized.extend_from_slice(&run[sub + 1..]);
    } else {
        normalized.extend(mutate(&items[slot])?);
    }
    normalized.extend_from_slice(&items[slot + 1..]);

    let images = pack_leaf_images(normalized, lokey, hikey, prune.as_ref())?;
    commit_images(buffers, wal, leaf_block, attno, old_next, images)
}

/// Marks the item covering `tid` as deleted: sets [`ItemFlags::DELETED`]
/// and chains its undo pointer to `new_undo`, leaving the tuple itself in
/// place for any snapshot that can still see it. Returns the extra pages'
/// downlinks if repacking the leaf required a split.
///
/// # Errors
///
/// See [`replace_item`].
pub fn mark_deleted<B: BufferManager, W: Wal>(
    buffers: &B,
    wal: &W,
    leaf_block: BlockId,
    tid: ZSTid,
    attr: &AttributeDescriptor,
    new_undo: UndoPtr,
    prune: Option<PruneContext<'_>>,
) -> Result<Vec<(BlockId, ZSTid)>> {
    replace_item(
        buffers,
        wal,
        leaf_block,
        tid,
        |item| retag(item, tid, ItemFlags::DELETED, new_undo, attr),
        prune,
    )
}

/// Marks the item covering `tid` as superseded by an update, chaining its
/// undo pointer to `new_undo`. The replacement tuple itself is inserted
/// separately by the caller (it may land on a different leaf entirely,
/// per `spec.md` §4.4's "update is delete-then-insert"). Returns the
/// extra pages' downlinks if repacking the leaf required a split.
///
/// # Errors
///
/// See [`replace_item`].
pub fn mark_updated<B: BufferManager, W: Wal>(
    buffers: &B,
    wal: &W,
    leaf_block: BlockId,
    tid: ZSTid,
    attr: &AttributeDescriptor,
    new_undo: UndoPtr,
    prune: Option<PruneContext<'_>>,
) -> Result<Vec<(BlockId, ZSTid)>> {
    replace_item(
        buffers,
        wal,
        leaf_block,
        tid,
        |item| retag(item, tid, ItemFlags::UPDATED, new_undo, attr),
        prune,
    )
}

/// Rewrites the sub-item at `tid` with `flag` set and its undo pointer
/// replaced by `new_undo`. For a [`crate::item::SingleItem`] this returns
/// one piece; for an [`crate::item::ArrayItem`] the target element is
/// split out to its own [`SingleItem`] (since a retagged element needs
/// its own undo pointer, which the array's one-pointer-per-run
/// representation cannot express), returning up to three pieces: the
/// untouched left slice, the retagged element, and the untouched right
/// slice -- matching `spec.md` §8's "a replacement whose TID is the
/// first or last element of an Array preserves the other side as an
/// Array (or Single if length 1)".
fn retag(
    item: &Item,
    tid: ZSTid,
    flag: ItemFlags,
    new_undo: UndoPtr,
    attr: &AttributeDescriptor,
) -> Result<ReplacementPieces> {
    match item {
        Item::Single(single) => Ok(vec![Item::Single(SingleItem {
            tid: single.tid,
            flags: single.flags.with(flag),
            undo_ptr: new_undo,
            payload: single.payload.clone(),
        })]),
        Item::Array(array) => {
            let index = (tid.value() - array.tid.value()) as usize;

            let mut pieces = Vec::with_capacity(3);
            if let Some(left) = array.slice(attr, 0, index)? {
                pieces.push(left);
            }

            pieces.push(Item::Single(SingleItem {
                tid,
                flags: array.flags.without(ItemFlags::ARRAY).with(flag),
                undo_ptr: new_undo,
                payload: array.element_bytes(attr, index)?,
            }));

            if let Some(right) = array.slice(attr, index + 1, array.nelements as usize)? {
                pieces.push(right);
            }

            Ok(pieces)
        }
        Item::Compressed(_) => unreachable!("retag only ever sees a plain sub-item"),
    }
}
