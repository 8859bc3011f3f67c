// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tree shape changes: splitting a leaf or internal page when it runs
//! out of room, propagating the resulting downlink up to the parent
//! (recursively splitting internal pages as needed), and growing a new
//! root when the split reaches the top.
//!
//! Every split here follows the same two-phase commit order: the new
//! right sibling is written first (nothing points at it yet, so a crash
//! midway leaves it an orphan, not a dangling reference), then the
//! left/original page is updated to shrink its `hikey` and point `next`
//! at the new sibling. Only after that does the downlink get inserted
//! into the parent -- until then the tree is still fully navigable via
//! the right-link chain (`spec.md` §4.6's "incomplete split").

use crate::buffer::PageGuard;
use crate::collab::{BufferManager, MetapageStore, Wal};
use crate::config::INTERNAL_SPLIT_RIGHT_FRACTION;
use crate::descent::descend_to_level;
use crate::error::{Error, Result};
use crate::item::Item;
use crate::page::{BlockId, InternalEntry, Page, PageFlags};
use crate::tid::ZSTid;

/// The outcome of a split: both halves' blocks and the downlink the
/// caller must now insert into the parent (or, if there was no parent,
/// use to build a new root).
#[derive(Copy, Clone, Debug)]
pub struct SplitOutcome {
    pub left: BlockId,
    pub right: BlockId,
    pub right_lokey: ZSTid,
}

/// Splits `leaf_block`'s items roughly in half by item count, after
/// first inserting `new_item` into its sorted position. Used when an
/// insert finds no room on the target leaf.
///
/// Sets [`PageFlags::FOLLOW_RIGHT`] on the left page: the parent does not
/// yet contain a downlink to `right`, so any reader/writer that reaches
/// the left page by descent and needs more than its own `hikey` must
/// notice the flag and finish the split (`spec.md` §4.6). The caller
/// clears it again once [`insert_downlink`] (or [`new_root`]) installs
/// that downlink.
///
/// # Errors
///
/// Propagates buffer manager and WAL errors.
pub fn split_leaf<B: BufferManager, W: Wal>(
    buffers: &B,
    wal: &W,
    leaf_block: BlockId,
    new_item: Item,
) -> Result<SplitOutcome> {
    wal.start_crit()?;
    let result = (|| -> Result<SplitOutcome> {
        let mut guard = PageGuard::acquire(buffers, leaf_block)?;
        let page = guard.page_mut();
        let items = page.items_mut().expect("split_leaf called on an internal page");

        let pos = items.partition_point(|i| i.first_tid() < new_item.first_tid());
        items.insert(pos, new_item);

        let split_at = items.len() / 2;
        let right_items = items.split_off(split_at);
        let right_lokey = right_items
            .first()
            .expect("split always leaves at least one item on each side")
            .first_tid();

        let old_hikey = page.trailer.hikey;
        let old_next = page.trailer.next;
        let attno = page.trailer.attno;

        let right_block = buffers.allocate()?;
        let mut right_page = Page::new_leaf(attno, right_lokey, old_hikey, right_items);
        right_page.trailer.next = old_next;
        wal.log_page_image(right_block, &right_page)?;
        buffers.write_page(right_block, &right_page)?;

        page.trailer.hikey = right_lokey;
        page.trailer.next = right_block;
        page.trailer.flags = page.trailer.flags.with(PageFlags::FOLLOW_RIGHT);
        guard.flush_with_wal(wal)?;

        Ok(SplitOutcome {
            left: leaf_block,
            right: right_block,
            right_lokey,
        })
    })();
    wal.end_crit()?;
    result
}

/// Splits `page_block`'s downlinks using the tuned 90/10 ratio
/// (`spec.md` §4.5 Step D, §9: "a tuning choice, not a correctness
/// requirement"), after first inserting `new_entry` into its sorted
/// position.
///
/// # Errors
///
/// Propagates buffer manager errors.
pub fn split_internal_page<B: BufferManager, W: Wal>(
    buffers: &B,
    wal: &W,
    page_block: BlockId,
    new_entry: InternalEntry,
) -> Result<SplitOutcome> {
    wal.start_crit()?;
    let result = (|| -> Result<SplitOutcome> {
        let mut guard = PageGuard::acquire(buffers, page_block)?;
        let page = guard.page_mut();
        let Page {
            trailer,
            body: crate::page::PageBody::Internal(entries),
        } = page
        else {
            panic!("split_internal_page called on a leaf page")
        };

        let pos = entries.partition_point(|e| e.tid < new_entry.tid);
        entries.insert(pos, new_entry);

        #[allow(clippy::cast_possible_truncation)]
        let right_count =
            ((entries.len() as f32) * INTERNAL_SPLIT_RIGHT_FRACTION).ceil() as usize;
        let right_count = right_count.clamp(1, entries.len() - 1);
        let split_at = entries.len() - right_count;

        let right_entries = entries.split_off(split_at);
        let right_lokey = right_entries
            .first()
            .expect("right side always has at least one entry")
            .tid;

        let old_hikey = trailer.hikey;
        let old_next = trailer.next;
        let attno = trailer.attno;
        let level = trailer.level;

        let right_block = buffers.allocate()?;
        let mut right_page =
            Page::new_internal(attno, level, right_lokey, old_hikey, right_entries);
        right_page.trailer.next = old_next;
        wal.log_page_image(right_block, &right_page)?;
        buffers.write_page(right_block, &right_page)?;

        trailer.hikey = right_lokey;
        trailer.next = right_block;
        trailer.flags = trailer.flags.with(PageFlags::FOLLOW_RIGHT);
        guard.flush_with_wal(wal)?;

        Ok(SplitOutcome {
            left: page_block,
            right: right_block,
            right_lokey,
        })
    })();
    wal.end_crit()?;
    result
}

/// Finds the internal page at `level + 1` that should hold the downlink
/// to a page at `level` starting at `lokey`.
///
/// # Errors
///
/// Propagates descent errors.
pub fn find_parent<B: BufferManager>(
    buffers: &B,
    root: BlockId,
    attno: u16,
    lokey: ZSTid,
    level: u16,
) -> Result<BlockId> {
    descend_to_level(buffers, root, attno, lokey, level + 1)
}

/// Clears [`PageFlags::FOLLOW_RIGHT`] on `block` now that its downlink has
/// been installed in its parent (`spec.md` §4.6: the flag is "the sole
/// durable signal that repair is needed").
///
/// # Errors
///
/// Propagates buffer manager and WAL errors.
fn clear_follow_right<B: BufferManager, W: Wal>(buffers: &B, wal: &W, block: BlockId) -> Result<()> {
    wal.start_crit()?;
    let result = (|| -> Result<()> {
        let mut guard = PageGuard::acquire(buffers, block)?;
        if guard.page().trailer.flags.contains(PageFlags::FOLLOW_RIGHT) {
            guard.page_mut().trailer.flags =
                guard.page().trailer.flags.without(PageFlags::FOLLOW_RIGHT);
            guard.flush_with_wal(wal)?;
        }
        Ok(())
    })();
    wal.end_crit()?;
    result
}

/// Inserts `entry` into `parent_block`'s downlink array, splitting the
/// parent (and recursively propagating the resulting new downlink
/// further up, via `find_parent`) if it does not fit. Once `entry` (the
/// downlink to `left_child`'s new right sibling) is durably installed,
/// clears `left_child`'s [`PageFlags::FOLLOW_RIGHT`] flag -- the whole
/// point of the call, from `left_child`'s perspective (`spec.md` §4.5
/// Step D).
///
/// # Errors
///
/// Propagates buffer manager and descent errors.
pub fn insert_downlink<B, M, W>(
    buffers: &B,
    wal: &W,
    metapages: &M,
    root: BlockId,
    attno: u16,
    parent_block: BlockId,
    left_child: BlockId,
    entry: InternalEntry,
) -> Result<()>
where
    B: BufferManager,
    M: MetapageStore,
    W: Wal,
{
    const REQUIRED_FREE_SPACE: usize = 8 + 4 + 4; // InternalEntry (8+4) plus a slot-array pointer.

    wal.start_crit()?;
    let result = (|| -> Result<()> {
        let mut guard = PageGuard::acquire(buffers, parent_block)?;
        if guard.page().free_space() >= REQUIRED_FREE_SPACE {
            let page = guard.page_mut();
            let crate::page::PageBody::Internal(entries) = &mut page.body else {
                return Err(Error::LevelMismatch {
                    expected: 1,
                    found: 0,
                });
            };
            let pos = entries.partition_point(|e| e.tid < entry.tid);
            entries.insert(pos, entry);
            guard.flush_with_wal(wal)?;
            return clear_follow_right(buffers, wal, left_child);
        }
        drop(guard);

        let outcome = split_internal_page(buffers, wal, parent_block, entry)?;
        clear_follow_right(buffers, wal, left_child)?;

        let level = {
            let guard = PageGuard::acquire(buffers, outcome.left)?;
            guard.page().trailer.level
        };

        let new_downlink = InternalEntry {
            tid: outcome.right_lokey,
            child: outcome.right,
        };

        if outcome.left == root {
            new_root(buffers, wal, metapages, attno, outcome.left, level, new_downlink)
        } else {
            let grandparent = find_parent(buffers, root, attno, outcome.right_lokey, level)?;
            insert_downlink(
                buffers,
                wal,
                metapages,
                root,
                attno,
                grandparent,
                outcome.left,
                new_downlink,
            )
        }
    })();
    wal.end_crit()?;
    result
}

/// Builds a fresh root one level above `left`, with two downlinks
/// (`left` and `right_entry`), and installs it as `attno`'s new root via
/// a compare-and-swap against the tree's current root.
///
/// # Errors
///
/// Returns an error if the CAS fails and the page allocated for the
/// would-be new root cannot be reconciled -- in this engine's single-
/// writer-per-attribute model that should never race, so any failure
/// here indicates a genuinely concurrent root split, which is left
/// unhandled (see `DESIGN.md`).
pub fn new_root<B, M, W>(
    buffers: &B,
    wal: &W,
    metapages: &M,
    attno: u16,
    left: BlockId,
    left_level: u16,
    right_entry: InternalEntry,
) -> Result<()>
where
    B: BufferManager,
    M: MetapageStore,
    W: Wal,
{
    wal.start_crit()?;
    let result = (|| -> Result<()> {
        let left_lokey = {
            let guard = PageGuard::acquire(buffers, left)?;
            guard.page().trailer.lokey
        };

        let new_root_block = buffers.allocate()?;
        let entries = vec![
            InternalEntry {
                tid: left_lokey,
                child: left,
            },
            right_entry,
        ];
        let page = Page::new_internal(
            attno,
            left_level + 1,
            left_lokey,
            crate::tid::MAX_PLUS_ONE_ZS_TID,
            entries,
        );
        wal.log_page_image(new_root_block, &page)?;
        buffers.write_page(new_root_block, &page)?;

        let old_root = metapages.root_block(attno)?;
        if !metapages.set_root_block(attno, old_root, new_root_block)? {
            return Err(Error::MissingDownlink { child: left });
        }

        clear_follow_right(buffers, wal, left)
    })();
    wal.end_crit()?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttributeDescriptor;
    use crate::item::create_item;
    use crate::mock::InMemory;
    use crate::tid::{MAX_PLUS_ONE_ZS_TID, MIN_ZS_TID};
    use crate::undo::UndoPtr;
    use test_log::test;

    fn attr() -> AttributeDescriptor {
        AttributeDescriptor {
            attno: 1,
            attlen: 4,
            attbyval: true,
        }
    }

    fn make_item(tid: u64) -> Item {
        let attr = attr();
        let v = (tid as i32).to_le_bytes();
        create_item(&attr, ZSTid::new(tid), UndoPtr::new(tid), 1, &[Some(&v)], false).unwrap()
    }

    #[test]
    fn split_leaf_divides_items_and_links_siblings() {
        let store = InMemory::new();
        let items: Vec<Item> = (1..=10).map(make_item).collect();
        let block = store
            .insert_leaf(1, Page::new_leaf(1, MIN_ZS_TID, MAX_PLUS_ONE_ZS_TID, items))
            .unwrap();

        let outcome = split_leaf(&store, &store, block, make_item(11)).unwrap();
        assert_eq!(outcome.left, block);

        let left = store.read_page(outcome.left).unwrap();
        let right = store.read_page(outcome.right).unwrap();

        assert_eq!(left.trailer.next, outcome.right);
        assert_eq!(left.trailer.hikey, outcome.right_lokey);
        assert!(left.trailer.flags.contains(PageFlags::FOLLOW_RIGHT));
        assert_eq!(left.items().len() + right.items().len(), 11);
        assert!(left
            .items()
            .iter()
            .all(|i| i.first_tid() < outcome.right_lokey));
        assert!(right
            .items()
            .iter()
            .all(|i| i.first_tid() >= outcome.right_lokey));

        let logged = store.wal_log();
        assert!(logged.iter().any(|(b, _)| *b == outcome.right));
        assert!(logged.iter().any(|(b, _)| *b == outcome.left));
        assert_eq!(store.wal_crit_depth(), 0);
    }

    #[test]
    fn insert_downlink_fits_without_splitting() {
        let store = InMemory::new();

        let child_a = store
            .insert_leaf(
                1,
                Page::new_leaf(1, MIN_ZS_TID, ZSTid::new(1000), vec![]),
            )
            .unwrap();
        {
            let mut page = store.read_page(child_a).unwrap();
            page.trailer.flags = page.trailer.flags.with(PageFlags::FOLLOW_RIGHT);
            store.write_page(child_a, &page).unwrap();
        }
        let child_b = store.allocate().unwrap();
        store
            .write_page(
                child_b,
                &Page::new_leaf(1, ZSTid::new(1000), MAX_PLUS_ONE_ZS_TID, vec![]),
            )
            .unwrap();

        let parent = store
            .insert_leaf(
                1,
                Page::new_internal(
                    1,
                    1,
                    MIN_ZS_TID,
                    MAX_PLUS_ONE_ZS_TID,
                    vec![InternalEntry {
                        tid: MIN_ZS_TID,
                        child: child_a,
                    }],
                ),
            )
            .unwrap();

        let meta = InMemory::new();
        meta.register_attribute(attr());
        insert_downlink(
            &store,
            &store,
            &meta,
            parent,
            1,
            parent,
            child_a,
            InternalEntry {
                tid: ZSTid::new(1000),
                child: child_b,
            },
        )
        .unwrap();

        let page = store.read_page(parent).unwrap();
        assert_eq!(page.entries().len(), 2);

        let left = store.read_page(child_a).unwrap();
        assert!(!left.trailer.flags.contains(PageFlags::FOLLOW_RIGHT));
        assert_eq!(store.wal_crit_depth(), 0);
    }

    #[test]
    fn insert_downlink_that_splits_the_parent_closes_every_critical_section() {
        let store = InMemory::new();
        let meta = InMemory::new();
        meta.register_attribute(attr());

        // Fill a parent internal page densely enough that one more entry
        // forces `split_internal_page`: each `InternalEntry` plus its slot
        // pointer costs 16 bytes, and `USABLE_PAGE_SIZE` is 8164, so 510
        // entries leave only 2 bytes free -- below `REQUIRED_FREE_SPACE`.
        let mut entries = Vec::new();
        let mut leaf_blocks = Vec::new();
        for i in 0..510u64 {
            let lokey = ZSTid::new(1 + i * 10);
            let leaf = store.allocate().unwrap();
            store
                .write_page(leaf, &Page::new_leaf(1, lokey, ZSTid::new(1 + (i + 1) * 10), vec![]))
                .unwrap();
            leaf_blocks.push(leaf);
            entries.push(InternalEntry { tid: lokey, child: leaf });
        }
        let parent = store
            .insert_leaf(
                1,
                Page::new_internal(1, 1, MIN_ZS_TID, MAX_PLUS_ONE_ZS_TID, entries),
            )
            .unwrap();
        let left_child = leaf_blocks[0];
        {
            let mut page = store.read_page(left_child).unwrap();
            page.trailer.flags = page.trailer.flags.with(PageFlags::FOLLOW_RIGHT);
            store.write_page(left_child, &page).unwrap();
        }

        let new_leaf = store.allocate().unwrap();
        store
            .write_page(new_leaf, &Page::new_leaf(1, ZSTid::new(5), MAX_PLUS_ONE_ZS_TID, vec![]))
            .unwrap();

        insert_downlink(
            &store,
            &store,
            &meta,
            parent,
            1,
            parent,
            left_child,
            InternalEntry {
                tid: ZSTid::new(5),
                child: new_leaf,
            },
        )
        .unwrap();

        assert_eq!(store.wal_crit_depth(), 0);
    }
}
