// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tree descent: finding the leaf (or, for internal maintenance, the
//! level-`target` page) that covers a given TID, using Lehman-Yao
//! right-links to stay correct in the face of a concurrent split that
//! has not yet been reflected in the parent.
//!
//! The rule at every level is the same: if the current page's `hikey` is
//! not past `tid`, the page we want has already split and its right half
//! is one `next` hop away -- follow it before considering the page's own
//! contents. Only once `tid < hikey` (or the page is rightmost) do we
//! trust what is actually stored here.

use crate::binary_search::partition_point;
use crate::buffer::PageGuard;
use crate::collab::BufferManager;
use crate::error::{Error, Result};
use crate::page::BlockId;
use crate::tid::ZSTid;

/// Walks right from `start` while `tid` is past the page's `hikey`,
/// returning the block of the page that actually covers `tid` at
/// whatever level `start` was on. A single step suffices in the common
/// case; more than one only happens when multiple splits raced ahead of
/// a reader paused between hops.
///
/// # Errors
///
/// Returns [`Error::FellOffRightEnd`] if a page's `next` link is invalid
/// before `tid` is covered (a corrupt right-link chain), or propagates
/// I/O errors from the buffer manager.
pub fn move_right_to_cover<B: BufferManager>(
    buffers: &B,
    start: BlockId,
    attno: u16,
    tid: ZSTid,
) -> Result<BlockId> {
    let mut current = start;
    loop {
        let guard = PageGuard::acquire(buffers, current)?;
        let page = guard.page();
        debug_assert_eq!(page.trailer.attno, attno, "descended into the wrong attribute's tree");
        if !page.trailer.is_rightmost() && tid >= page.trailer.hikey {
            if page.trailer.next.is_invalid() {
                return Err(Error::FellOffRightEnd(tid));
            }
            current = page.trailer.next;
            continue;
        }
        return Ok(current);
    }
}

/// Descends from `root` to the leaf covering `tid`.
///
/// # Errors
///
/// Returns [`Error::FellOffRightEnd`] if the right-link chain is broken,
/// or propagates I/O errors from the buffer manager.
pub fn descend_to_leaf<B: BufferManager>(
    buffers: &B,
    root: BlockId,
    attno: u16,
    tid: ZSTid,
) -> Result<BlockId> {
    let mut current = root;

    loop {
        current = move_right_to_cover(buffers, current, attno, tid)?;
        let guard = PageGuard::acquire(buffers, current)?;
        let page = guard.page();

        if page.trailer.is_leaf() {
            return Ok(current);
        }

        let entries = page.entries();
        let idx = partition_point(entries, |e| e.tid <= tid);
        let slot = idx.checked_sub(1).unwrap_or(0);
        current = entries
            .get(slot)
            .map(|e| e.child)
            .ok_or(Error::MissingDownlink {
                child: BlockId::INVALID,
            })?;
    }
}

/// Descends from `root` to the page at `target_level` covering `tid`,
/// used by [`crate::structure::find_parent`] to re-locate an internal
/// page whose downlink needs inserting after a split.
///
/// # Errors
///
/// Returns [`Error::FellOffRightEnd`] if the right-link chain is broken,
/// or [`Error::LevelMismatch`] if `target_level` is never reached before
/// hitting a leaf, or propagates I/O errors from the buffer manager.
pub fn descend_to_level<B: BufferManager>(
    buffers: &B,
    root: BlockId,
    attno: u16,
    tid: ZSTid,
    target_level: u16,
) -> Result<BlockId> {
    let mut current = root;

    loop {
        current = move_right_to_cover(buffers, current, attno, tid)?;
        let guard = PageGuard::acquire(buffers, current)?;
        let page = guard.page();

        if page.trailer.level == target_level {
            return Ok(current);
        }
        if page.trailer.is_leaf() {
            return Err(Error::LevelMismatch {
                expected: target_level,
                found: 0,
            });
        }

        let entries = page.entries();
        let idx = partition_point(entries, |e| e.tid <= tid);
        let slot = idx.checked_sub(1).unwrap_or(0);
        current = entries
            .get(slot)
            .map(|e| e.child)
            .ok_or(Error::MissingDownlink {
                child: BlockId::INVALID,
            })?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::InMemory;
    use crate::page::{InternalEntry, Page};
    use crate::tid::{MAX_PLUS_ONE_ZS_TID, MIN_ZS_TID};
    use test_log::test;

    fn leaf(store: &InMemory, attno: u16, lo: u64, hi: ZSTid) -> BlockId {
        let block = store.allocate().unwrap();
        store
            .write_page(
                block,
                &Page::new_leaf(attno, ZSTid::new(lo), hi, vec![]),
            )
            .unwrap();
        block
    }

    #[test]
    fn descends_through_two_levels() {
        let store = InMemory::new();
        let left = leaf(&store, 1, 1, ZSTid::new(100));
        let right = leaf(&store, 1, 100, MAX_PLUS_ONE_ZS_TID);

        let root = store.allocate().unwrap();
        store
            .write_page(
                root,
                &Page::new_internal(
                    1,
                    1,
                    MIN_ZS_TID,
                    MAX_PLUS_ONE_ZS_TID,
                    vec![
                        InternalEntry {
                            tid: MIN_ZS_TID,
                            child: left,
                        },
                        InternalEntry {
                            tid: ZSTid::new(100),
                            child: right,
                        },
                    ],
                ),
            )
            .unwrap();

        assert_eq!(
            descend_to_leaf(&store, root, 1, ZSTid::new(50)).unwrap(),
            left
        );
        assert_eq!(
            descend_to_leaf(&store, root, 1, ZSTid::new(150)).unwrap(),
            right
        );
    }

    #[test]
    fn follows_right_link_past_a_stale_downlink() {
        let store = InMemory::new();
        // Simulate a leaf that already split: `left` now only covers
        // [1, 50) and points right to a sibling the parent doesn't know
        // about yet.
        let new_right = leaf(&store, 1, 50, MAX_PLUS_ONE_ZS_TID);
        let stale_left_block = store.allocate().unwrap();
        let mut stale_left = Page::new_leaf(1, MIN_ZS_TID, ZSTid::new(50), vec![]);
        stale_left.trailer.next = new_right;
        store.write_page(stale_left_block, &stale_left).unwrap();

        let root = store.allocate().unwrap();
        store
            .write_page(
                root,
                &Page::new_internal(
                    1,
                    1,
                    MIN_ZS_TID,
                    MAX_PLUS_ONE_ZS_TID,
                    vec![InternalEntry {
                        tid: MIN_ZS_TID,
                        child: stale_left_block,
                    }],
                ),
            )
            .unwrap();

        let found = descend_to_leaf(&store, root, 1, ZSTid::new(75)).unwrap();
        assert_eq!(found, new_right);
    }
}
