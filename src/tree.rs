// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! [`AttributeTree`]: the façade tying descent, leaf mutation, tree-shape
//! changes and MVCC glue together into the five operations a host actually
//! calls -- insert, delete, update, point lookup, and range scan -- against
//! one attribute's B+tree.
//!
//! Every method here takes the collaborators it needs as borrowed trait
//! objects-by-generic, does exactly one undo-log append per logical
//! operation, and flushes through the WAL before releasing any page it
//! touches -- directly, or indirectly inside a split
//! ([`crate::structure::split_leaf`] and friends), which also take a
//! `Wal` handle for the same reason.

use crate::attr::AttributeDescriptor;
use crate::buffer::PageGuard;
use crate::collab::{BufferManager, MetapageStore, UndoLog, VisibilityOracle, Wal};
use crate::compression::Decompressor;
use crate::descent::descend_to_leaf;
use crate::error::{Error, Result};
use crate::item::{create_item, Item, ItemFlags};
use crate::mutation::{locate_covering_index, mark_deleted, mark_updated, PruneContext};
use crate::mvcc::{Snapshot, UpdateOutcome, WaitPolicy};
use crate::page::{BlockId, InternalEntry};
use crate::scan::Scan;
use crate::slice::Slice;
use crate::structure::{find_parent, insert_downlink, new_root, split_leaf};
use crate::tid::{ZSTid, MAX_ZS_TID};
use crate::undo::{Cid, UndoPtr, UndoRecord, Xid, DEAD_UNDO_PTR};

/// A handle for one attribute's tree, scoped to the collaborators needed
/// to operate on it.
pub struct AttributeTree<'b, B, M, U, W>
where
    B: BufferManager,
    M: MetapageStore,
    U: UndoLog,
    W: Wal,
{
    buffers: &'b B,
    metapages: &'b M,
    undo: &'b U,
    wal: &'b W,
    attno: u16,
}

impl<'b, B, M, U, W> AttributeTree<'b, B, M, U, W>
where
    B: BufferManager,
    M: MetapageStore,
    U: UndoLog,
    W: Wal,
{
    #[must_use]
    pub fn new(buffers: &'b B, metapages: &'b M, undo: &'b U, wal: &'b W, attno: u16) -> Self {
        Self {
            buffers,
            metapages,
            undo,
            wal,
            attno,
        }
    }

    fn root(&self) -> Result<BlockId> {
        self.metapages.root_block(self.attno)
    }

    fn attribute(&self) -> Result<AttributeDescriptor> {
        self.metapages.attribute(self.attno)
    }

    /// Reads the single tuple covering `tid` on `leaf_block`, reaching
    /// inside a compressed container and narrowing an [`Item::Array`]
    /// run down to its one covered element if necessary (so the result
    /// always describes exactly one TID, never a whole run). Does not
    /// mutate anything; used by [`Self::delete`]/[`Self::update`]/
    /// [`Self::point_lookup`] to inspect flags and the undo pointer
    /// before deciding what to do.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TupleNotFound`] if no item covers `tid`.
    fn read_item_at(&self, leaf_block: BlockId, tid: ZSTid) -> Result<Item> {
        let guard = PageGuard::acquire(self.buffers, leaf_block)?;
        let items = guard.page().items();
        let slot = locate_covering_index(items, tid).ok_or(Error::TupleNotFound(tid))?;
        let item = match &items[slot] {
            Item::Compressed(container) => {
                let decompressor = Decompressor::init(container)?;
                let idx = decompressor
                    .find_covering(container.first_tid, tid)
                    .ok_or(Error::TupleNotFound(tid))?;
                decompressor.read_item(idx)?
            }
            other => other.clone(),
        };
        drop(guard);
        self.narrow_to_tid(item, tid)
    }

    /// Narrows an [`Item::Array`] down to the single element covering
    /// `tid`, via [`crate::item::ArrayItem::slice`] (a one-element slice
    /// always comes back as an [`Item::Single`], per `spec.md` §8).
    /// Single/Compressed items pass through unchanged (a Compressed item
    /// should never reach here -- [`Self::read_item_at`] always
    /// decompresses first).
    fn narrow_to_tid(&self, item: Item, tid: ZSTid) -> Result<Item> {
        match item {
            Item::Array(array) => {
                let attr = self.attribute()?;
                let index = (tid.value() - array.tid.value()) as usize;
                array
                    .slice(&attr, index, index + 1)?
                    .ok_or(Error::TupleNotFound(tid))
            }
            other => Ok(other),
        }
    }

    /// `true` if `item` already carries a flag that makes it the target of
    /// a completed delete or update.
    fn already_superseded(item: &Item) -> bool {
        item.flags().contains(ItemFlags::DELETED) || item.flags().contains(ItemFlags::UPDATED)
    }

    /// Resolves the conflict case shared by [`Self::delete`] and
    /// [`Self::update`]: the target tuple is already flagged
    /// `DELETED`/`UPDATED`. If that change is itself visible to `snapshot`,
    /// this caller is racing a transaction whose outcome it can already
    /// see, so there is nothing left to apply; otherwise the change was
    /// made by a transaction not yet visible, meaning the caller is
    /// genuinely blocked on it.
    fn resolve_conflict(
        item: &Item,
        snapshot: Snapshot,
        oracle: &dyn VisibilityOracle,
        wait_policy: WaitPolicy,
        tid: ZSTid,
    ) -> Result<UpdateOutcome> {
        let undo_ptr = item.undo_ptr().unwrap_or(DEAD_UNDO_PTR);
        if oracle.is_visible(item.flags(), undo_ptr, snapshot) {
            return Ok(UpdateOutcome::AlreadyModified);
        }
        match wait_policy {
            WaitPolicy::Skip => Ok(UpdateOutcome::Skipped),
            WaitPolicy::NoWait | WaitPolicy::Block => Err(Error::WouldBlock(tid)),
        }
    }

    /// Appends `nelements` tuples to the attribute's rightmost leaf,
    /// assigning them a contiguous run of fresh TIDs, and returns the
    /// first TID assigned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TidSpaceExhausted`] if no room remains in the TID
    /// domain, or propagates buffer/undo/WAL errors.
    pub fn insert(
        &self,
        xid: Xid,
        cid: Cid,
        nelements: usize,
        datums: &[Option<&[u8]>],
        isnull: bool,
    ) -> Result<ZSTid> {
        let attr = self.attribute()?;
        let root = self.root()?;
        let leaf_block = descend_to_leaf(self.buffers, root, self.attno, MAX_ZS_TID)?;

        let mut guard = PageGuard::acquire(self.buffers, leaf_block)?;
        let next_tid = match guard.page().items().last() {
            Some(item) => item
                .last_tid()
                .checked_add(1)
                .ok_or(Error::TidSpaceExhausted)?,
            None => guard.page().trailer.lokey,
        };
        let last_tid = next_tid
            .checked_add((nelements as u64).saturating_sub(1))
            .ok_or(Error::TidSpaceExhausted)?;

        let undo_ptr = self.undo.append(UndoRecord::Insert {
            attno: self.attno,
            xid,
            cid,
            first_tid: next_tid,
            last_tid,
        })?;
        let item = create_item(&attr, next_tid, undo_ptr, nelements, datums, isnull)?;

        const SLOT_POINTER_SIZE: usize = 4;
        let required = item.encode_into_vec().len() + SLOT_POINTER_SIZE;

        if guard.page().free_space() >= required {
            guard
                .page_mut()
                .items_mut()
                .expect("rightmost descent always lands on a leaf")
                .push(item);
            guard.flush_with_wal(self.wal)?;
        } else {
            drop(guard);
            self.split_and_insert_leaf(leaf_block, item)?;
        }

        Ok(next_tid)
    }

    /// Splits `leaf_block` to make room for `item`, then propagates the
    /// resulting downlink up the tree, mirroring
    /// [`crate::structure::insert_downlink`]'s split-and-recurse pattern
    /// one level down (a leaf has no stored level, so `0` is used when
    /// locating its parent).
    fn split_and_insert_leaf(&self, leaf_block: BlockId, item: Item) -> Result<()> {
        let outcome = split_leaf(self.buffers, self.wal, leaf_block, item)?;
        let new_downlink = InternalEntry {
            tid: outcome.right_lokey,
            child: outcome.right,
        };

        let root = self.root()?;
        if outcome.left == root {
            new_root(
                self.buffers,
                self.wal,
                self.metapages,
                self.attno,
                outcome.left,
                0,
                new_downlink,
            )
        } else {
            let parent = find_parent(self.buffers, root, self.attno, outcome.right_lokey, 0)?;
            insert_downlink(
                self.buffers,
                self.wal,
                self.metapages,
                root,
                self.attno,
                parent,
                outcome.left,
                new_downlink,
            )
        }
    }

    /// Propagates the downlinks produced by a leaf repacking
    /// ([`mark_deleted`]/[`mark_updated`]/[`crate::mutation::replace_item`])
    /// into the parent, one at a time, exactly as `spec.md` §4.5 Step D
    /// describes: each extra page gets its own `insert_downlink` call, in
    /// ascending order, clearing `FOLLOW_RIGHT` on the page to its left as
    /// it goes.
    fn propagate_downlinks(&self, leaf_block: BlockId, downlinks: Vec<(BlockId, ZSTid)>) -> Result<()> {
        let mut left = leaf_block;
        for (right_block, right_lokey) in downlinks {
            let new_downlink = InternalEntry {
                tid: right_lokey,
                child: right_block,
            };
            let root = self.root()?;
            if left == root {
                new_root(
                    self.buffers,
                    self.wal,
                    self.metapages,
                    self.attno,
                    left,
                    0,
                    new_downlink,
                )?;
            } else {
                let parent = find_parent(self.buffers, root, self.attno, right_lokey, 0)?;
                insert_downlink(
                    self.buffers,
                    self.wal,
                    self.metapages,
                    root,
                    self.attno,
                    parent,
                    left,
                    new_downlink,
                )?;
            }
            left = right_block;
        }
        Ok(())
    }

    /// Marks the tuple at `tid` deleted, chaining its undo history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TupleNotFound`] if `tid` does not exist, or
    /// [`Error::WouldBlock`] under [`WaitPolicy::NoWait`]/[`WaitPolicy::Block`]
    /// against an as-yet-invisible conflicting change.
    pub fn delete(
        &self,
        xid: Xid,
        cid: Cid,
        tid: ZSTid,
        snapshot: Snapshot,
        oracle: &dyn VisibilityOracle,
        wait_policy: WaitPolicy,
    ) -> Result<UpdateOutcome> {
        let attr = self.attribute()?;
        let root = self.root()?;
        let leaf_block = descend_to_leaf(self.buffers, root, self.attno, tid)?;

        let existing = self.read_item_at(leaf_block, tid)?;
        if Self::already_superseded(&existing) {
            return Self::resolve_conflict(&existing, snapshot, oracle, wait_policy, tid);
        }

        let prev_undo = existing.undo_ptr().unwrap_or(DEAD_UNDO_PTR);
        let new_undo = self.undo.append(UndoRecord::Delete {
            attno: self.attno,
            xid,
            cid,
            tid,
            prev_undo,
        })?;
        let prune = PruneContext {
            oracle,
            oldest_retained: self.undo.oldest_retained(),
        };
        let downlinks = mark_deleted(
            self.buffers,
            self.wal,
            leaf_block,
            tid,
            &attr,
            new_undo,
            Some(prune),
        )?;
        self.propagate_downlinks(leaf_block, downlinks)?;
        Ok(UpdateOutcome::Applied)
    }

    /// Updates the tuple at `old_tid`: marks it `UPDATED` and inserts the
    /// replacement values as a brand-new tuple (update is delete-then-insert,
    /// so the new version gets a fresh TID and may land on a different
    /// leaf entirely). Returns the new TID alongside the outcome.
    ///
    /// # Errors
    ///
    /// See [`Self::delete`] and [`Self::insert`].
    pub fn update(
        &self,
        xid: Xid,
        cid: Cid,
        old_tid: ZSTid,
        snapshot: Snapshot,
        oracle: &dyn VisibilityOracle,
        wait_policy: WaitPolicy,
        nelements: usize,
        datums: &[Option<&[u8]>],
        isnull: bool,
    ) -> Result<(UpdateOutcome, Option<ZSTid>)> {
        let attr = self.attribute()?;
        let root = self.root()?;
        let leaf_block = descend_to_leaf(self.buffers, root, self.attno, old_tid)?;

        let existing = self.read_item_at(leaf_block, old_tid)?;
        if Self::already_superseded(&existing) {
            let outcome = Self::resolve_conflict(&existing, snapshot, oracle, wait_policy, old_tid)?;
            return Ok((outcome, None));
        }

        let new_tid = self.insert(xid, cid, nelements, datums, isnull)?;

        // `self.insert` just appended to the attribute's rightmost leaf and
        // may have split it. If `old_tid` lived there, it has since moved to
        // the new right sibling, so `leaf_block` above can no longer be
        // trusted -- re-descend for `old_tid`'s current leaf before marking
        // it updated.
        let leaf_block = descend_to_leaf(self.buffers, self.root()?, self.attno, old_tid)?;

        let prev_undo = existing.undo_ptr().unwrap_or(DEAD_UNDO_PTR);
        let new_undo = self.undo.append(UndoRecord::Update {
            attno: self.attno,
            xid,
            cid,
            old_tid,
            new_tid,
            prev_undo,
        })?;
        let prune = PruneContext {
            oracle,
            oldest_retained: self.undo.oldest_retained(),
        };
        let downlinks = mark_updated(
            self.buffers,
            self.wal,
            leaf_block,
            old_tid,
            &attr,
            new_undo,
            Some(prune),
        )?;
        self.propagate_downlinks(leaf_block, downlinks)?;

        Ok((UpdateOutcome::Applied, Some(new_tid)))
    }

    /// Looks up the tuple at `tid`, returning `None` if it does not exist
    /// or is not visible to `snapshot`.
    ///
    /// # Errors
    ///
    /// Propagates descent and buffer manager errors.
    pub fn point_lookup(
        &self,
        tid: ZSTid,
        snapshot: Snapshot,
        oracle: &dyn VisibilityOracle,
    ) -> Result<Option<Item>> {
        let root = self.root()?;
        let leaf_block = descend_to_leaf(self.buffers, root, self.attno, tid)?;

        let item = match self.read_item_at(leaf_block, tid) {
            Ok(item) => item,
            Err(Error::TupleNotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        };

        let undo_ptr = item.undo_ptr().unwrap_or(DEAD_UNDO_PTR);
        Ok(oracle
            .is_visible(item.flags(), undo_ptr, snapshot)
            .then_some(item))
    }

    /// Starts a forward range scan over `[lo, hi)`, yielding one
    /// `(tid, datum)` pair per live, visible tuple -- `spec.md` §4.4's
    /// "transparently handling array unpacking": an [`Item::Array`] run
    /// is split back out into its individual TIDs here rather than
    /// handed to the caller as a whole run.
    ///
    /// # Errors
    ///
    /// Propagates descent and buffer manager errors.
    pub fn scan(
        &self,
        lo: ZSTid,
        hi: ZSTid,
        snapshot: Snapshot,
        oracle: &'b dyn VisibilityOracle,
    ) -> Result<VisibleScan<'b, B>> {
        let root = self.root()?;
        let start = descend_to_leaf(self.buffers, root, self.attno, lo)?;
        let inner = Scan::new(self.buffers, start, lo, hi)?;
        let attr = self.attribute()?;
        Ok(VisibleScan {
            inner,
            snapshot,
            oracle,
            attr,
            array_cursor: None,
        })
    }
}

/// One element still pending out of an [`Item::Array`] run that passed
/// visibility as a whole (`spec.md` §4.4: "an item is visibility-atomic
/// even when it covers a run of TIDs").
struct ArrayCursor {
    array: crate::item::ArrayItem,
    next_index: u32,
}

/// A [`Scan`] filtered down to tuples visible to one snapshot, with
/// [`Item::Array`] runs unpacked into individual `(tid, datum)` pairs in
/// TID order (`spec.md` §4.4).
pub struct VisibleScan<'b, B: BufferManager> {
    inner: Scan<'b, B>,
    snapshot: Snapshot,
    oracle: &'b dyn VisibilityOracle,
    attr: AttributeDescriptor,
    array_cursor: Option<ArrayCursor>,
}

impl<B: BufferManager> VisibleScan<'_, B> {
    /// Emits the next element of a live array cursor, if any remain.
    fn next_from_cursor(&mut self) -> Option<Result<(ZSTid, Option<Slice>)>> {
        let cursor = self.array_cursor.as_mut()?;
        if cursor.next_index >= cursor.array.nelements {
            self.array_cursor = None;
            return None;
        }
        let index = cursor.next_index as usize;
        cursor.next_index += 1;
        let tid = cursor
            .array
            .tid
            .checked_add(index as u64)
            .expect("array does not cross TID domain boundary");
        if cursor.array.is_null() {
            return Some(Ok((tid, None)));
        }
        match cursor.array.element_bytes(&self.attr, index) {
            Ok(bytes) => Some(Ok((tid, Some(bytes)))),
            Err(error) => Some(Err(error)),
        }
    }
}

impl<B: BufferManager> Iterator for VisibleScan<'_, B> {
    type Item = Result<(ZSTid, Option<Slice>)>;

    fn next(&mut self) -> Option<Result<(ZSTid, Option<Slice>)>> {
        loop {
            if let Some(next) = self.next_from_cursor() {
                return Some(next);
            }

            let item = match self.inner.next()? {
                Ok(item) => item,
                Err(error) => return Some(Err(error)),
            };
            let undo_ptr = item.undo_ptr().unwrap_or(DEAD_UNDO_PTR);
            if !self.oracle.is_visible(item.flags(), undo_ptr, self.snapshot) {
                continue;
            }
            match item {
                Item::Single(single) => {
                    let datum = (!single.is_null()).then(|| single.payload.clone());
                    return Some(Ok((single.tid, datum)));
                }
                Item::Array(array) => {
                    self.array_cursor = Some(ArrayCursor {
                        array,
                        next_index: 0,
                    });
                }
                Item::Compressed(_) => {
                    unreachable!("crate::scan::Scan always flattens compressed containers")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{AlwaysVisible, InMemory};
    use crate::page::Page;
    use crate::tid::{MAX_PLUS_ONE_ZS_TID, MIN_ZS_TID};
    use test_log::test;

    fn attr() -> AttributeDescriptor {
        AttributeDescriptor {
            attno: 1,
            attlen: 4,
            attbyval: true,
        }
    }

    fn new_tree(store: &InMemory) -> AttributeTree<'_, InMemory, InMemory, InMemory, InMemory> {
        store.register_attribute(attr());
        store
            .insert_leaf(1, Page::new_leaf(1, MIN_ZS_TID, MAX_PLUS_ONE_ZS_TID, vec![]))
            .unwrap();
        AttributeTree::new(store, store, store, store, 1)
    }

    #[test]
    fn insert_assigns_increasing_tids() {
        let store = InMemory::new();
        let tree = new_tree(&store);

        let v1 = 10i32.to_le_bytes();
        let v2 = 20i32.to_le_bytes();
        let first = tree.insert(1, 0, 1, &[Some(&v1)], false).unwrap();
        let second = tree.insert(1, 0, 1, &[Some(&v2)], false).unwrap();

        assert_eq!(first, MIN_ZS_TID);
        assert_eq!(second.value(), MIN_ZS_TID.value() + 1);
    }

    #[test]
    fn insert_then_point_lookup_round_trips() {
        let store = InMemory::new();
        let tree = new_tree(&store);
        let v = 42i32.to_le_bytes();
        let tid = tree.insert(1, 0, 1, &[Some(&v)], false).unwrap();

        let found = tree.point_lookup(tid, 0, &AlwaysVisible).unwrap().unwrap();
        match found {
            Item::Single(s) => assert_eq!(&s.payload[..], &v),
            _ => panic!("expected Single"),
        }
    }

    #[test]
    fn bulk_insert_past_one_leaf_triggers_split_and_scan_sees_everything() {
        let store = InMemory::new();
        let tree = new_tree(&store);

        for i in 0..400i32 {
            let v = i.to_le_bytes();
            tree.insert(1, 0, 1, &[Some(&v)], false).unwrap();
        }

        let scanned: Vec<_> = tree
            .scan(MIN_ZS_TID, MAX_PLUS_ONE_ZS_TID, 0, &AlwaysVisible)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(scanned.len(), 400);
        let tids: Vec<u64> = scanned.iter().map(|(tid, _)| tid.value()).collect();
        assert!(tids.windows(2).all(|w| w[0] < w[1]));
        for (i, (_, datum)) in scanned.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let expected = (i as i32).to_le_bytes();
            assert_eq!(datum.as_deref(), Some(&expected[..]));
        }
    }

    #[test]
    fn deleted_tuple_is_invisible_under_a_pessimistic_oracle() {
        struct NeverVisible;
        impl VisibilityOracle for NeverVisible {
            fn is_visible(&self, _flags: ItemFlags, _undo_ptr: UndoPtr, _snapshot: Snapshot) -> bool {
                false
            }
            fn is_prunable(&self, _undo_ptr: UndoPtr, _oldest_retained: UndoPtr) -> bool {
                true
            }
        }

        let store = InMemory::new();
        let tree = new_tree(&store);
        let v = 1i32.to_le_bytes();
        let tid = tree.insert(1, 0, 1, &[Some(&v)], false).unwrap();

        let outcome = tree
            .delete(2, 0, tid, 0, &AlwaysVisible, WaitPolicy::NoWait)
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);

        assert!(tree
            .point_lookup(tid, 0, &NeverVisible)
            .unwrap()
            .is_none());
    }

    #[test]
    fn update_marks_old_and_inserts_new() {
        let store = InMemory::new();
        let tree = new_tree(&store);
        let old_v = 1i32.to_le_bytes();
        let new_v = 2i32.to_le_bytes();
        let old_tid = tree.insert(1, 0, 1, &[Some(&old_v)], false).unwrap();

        let (outcome, new_tid) = tree
            .update(
                2,
                0,
                old_tid,
                0,
                &AlwaysVisible,
                WaitPolicy::NoWait,
                1,
                &[Some(&new_v)],
                false,
            )
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
        let new_tid = new_tid.unwrap();
        assert_ne!(new_tid, old_tid);

        let old_item = tree.read_item_at(
            descend_to_leaf(&store, tree.root().unwrap(), 1, old_tid).unwrap(),
            old_tid,
        );
        assert!(old_item.unwrap().flags().contains(ItemFlags::UPDATED));
    }

    #[test]
    fn update_whose_old_tid_sits_on_a_splitting_rightmost_leaf_still_finds_it() {
        let store = InMemory::new();
        let tree = new_tree(&store);

        // Each fixed 4-byte `Single` item costs 26 bytes of payload plus a
        // 4-byte slot pointer, 30 bytes total (`item.rs` `Encode for Item`).
        // Fill the rightmost leaf until less than one more item's worth of
        // free space remains, so `old_tid` -- the last row inserted -- sits
        // on the very leaf the update's internal insert is about to split.
        const ITEM_COST: usize = 30;
        let mut old_tid = MIN_ZS_TID;
        let mut i = 0i32;
        loop {
            let v = i.to_le_bytes();
            old_tid = tree.insert(1, 0, 1, &[Some(&v)], false).unwrap();
            let leaf = descend_to_leaf(&store, tree.root().unwrap(), 1, MAX_ZS_TID).unwrap();
            let free = store.read_page(leaf).unwrap().free_space();
            i += 1;
            if free < ITEM_COST {
                break;
            }
            assert!(i < 1000, "leaf never approached capacity");
        }

        let old_leaf_before_update =
            descend_to_leaf(&store, tree.root().unwrap(), 1, old_tid).unwrap();

        let new_v = 999i32.to_le_bytes();
        let (outcome, new_tid) = tree
            .update(
                2,
                0,
                old_tid,
                0,
                &AlwaysVisible,
                WaitPolicy::NoWait,
                1,
                &[Some(&new_v)],
                false,
            )
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
        let new_tid = new_tid.unwrap();
        assert_ne!(new_tid, old_tid);

        // The leaf `old_tid` lives on after the update differs from the one
        // it lived on going in -- proof the insert actually split it.
        let old_leaf_after_update =
            descend_to_leaf(&store, tree.root().unwrap(), 1, old_tid).unwrap();
        assert_ne!(old_leaf_before_update, old_leaf_after_update);

        let old_item = tree
            .read_item_at(old_leaf_after_update, old_tid)
            .unwrap();
        assert!(old_item.flags().contains(ItemFlags::UPDATED));

        let found = tree.point_lookup(new_tid, 0, &AlwaysVisible).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn delete_of_already_deleted_tuple_reports_already_modified() {
        let store = InMemory::new();
        let tree = new_tree(&store);
        let v = 1i32.to_le_bytes();
        let tid = tree.insert(1, 0, 1, &[Some(&v)], false).unwrap();

        tree.delete(2, 0, tid, 0, &AlwaysVisible, WaitPolicy::NoWait)
            .unwrap();
        let second = tree
            .delete(3, 0, tid, 0, &AlwaysVisible, WaitPolicy::NoWait)
            .unwrap();
        assert_eq!(second, UpdateOutcome::AlreadyModified);
    }
}
