// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! In-memory stand-ins for every collaborator trait in [`crate::collab`],
//! used by this crate's own test suite and by downstream callers writing
//! their own tests against [`crate::tree::AttributeTree`] without a real
//! host.

use crate::attr::AttributeDescriptor;
use crate::collab::{BufferManager, MetapageStore, UndoLog, VisibilityOracle, Wal};
use crate::error::{Error, Result};
use crate::item::ItemFlags;
use crate::mvcc::Snapshot;
use crate::page::{BlockId, Page};
use crate::undo::{UndoPtr, UndoRecord};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// A single-process, in-memory implementation of every collaborator
/// trait. Pages live in a `RwLock<FxHashMap<..>>`; undo records in a
/// `Mutex<Vec<..>>`; the "oldest retained" horizon and attribute
/// descriptors are set explicitly by the test rather than derived from a
/// real transaction manager.
pub struct InMemory {
    pages: RwLock<FxHashMap<BlockId, Page>>,
    next_block: AtomicU32,
    attributes: RwLock<FxHashMap<u16, AttributeDescriptor>>,
    roots: RwLock<FxHashMap<u16, BlockId>>,
    undo: Mutex<Vec<UndoRecord>>,
    next_undo: AtomicU64,
    oldest_retained: AtomicU64,
    wal: Mutex<Vec<(BlockId, Page)>>,
    crit_depth: AtomicU32,
}

impl InMemory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(FxHashMap::default()),
            next_block: AtomicU32::new(0),
            attributes: RwLock::new(FxHashMap::default()),
            roots: RwLock::new(FxHashMap::default()),
            undo: Mutex::new(Vec::new()),
            next_undo: AtomicU64::new(1),
            oldest_retained: AtomicU64::new(0),
            wal: Mutex::new(Vec::new()),
            crit_depth: AtomicU32::new(0),
        }
    }

    /// Registers `attr` as the descriptor for its `attno`.
    pub fn register_attribute(&self, attr: AttributeDescriptor) {
        self.attributes.write().unwrap().insert(attr.attno, attr);
    }

    /// Inserts `page` as the initial (and, at this point, only) page of
    /// `attno`'s tree, returning its freshly allocated block and
    /// recording it as the root.
    ///
    /// # Errors
    ///
    /// Propagates [`BufferManager::allocate`] failures.
    pub fn insert_leaf(&self, attno: u16, page: Page) -> Result<BlockId> {
        let block = self.allocate()?;
        self.pages.write().unwrap().insert(block, page);
        self.roots.write().unwrap().insert(attno, block);
        Ok(block)
    }

    /// Lowers the pruning horizon so undo pointers below `ptr` are
    /// reported prunable by [`VisibilityOracle::is_prunable`].
    pub fn advance_oldest_retained(&self, ptr: UndoPtr) {
        self.oldest_retained.store(ptr.raw(), Ordering::SeqCst);
    }

    /// Every page write logged through [`Wal::log_page_image`] so far, in
    /// order. Exposed for tests asserting WAL-before-write ordering.
    #[must_use]
    pub fn wal_log(&self) -> Vec<(BlockId, Page)> {
        self.wal.lock().unwrap().clone()
    }

    /// Current WAL critical-section nesting depth. Exposed for tests
    /// asserting that every multi-page commit closes every section it
    /// opens.
    #[must_use]
    pub fn wal_crit_depth(&self) -> u32 {
        self.crit_depth.load(Ordering::SeqCst)
    }
}

impl Default for InMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MetapageStore for InMemory {
    fn attribute(&self, attno: u16) -> Result<AttributeDescriptor> {
        self.attributes
            .read()
            .unwrap()
            .get(&attno)
            .copied()
            .ok_or(Error::MissingDownlink {
                child: BlockId::INVALID,
            })
    }

    fn root_block(&self, attno: u16) -> Result<BlockId> {
        self.roots
            .read()
            .unwrap()
            .get(&attno)
            .copied()
            .ok_or(Error::MissingDownlink {
                child: BlockId::INVALID,
            })
    }

    fn set_root_block(&self, attno: u16, expected: BlockId, new: BlockId) -> Result<bool> {
        let mut roots = self.roots.write().unwrap();
        match roots.get(&attno).copied() {
            Some(current) if current == expected => {
                roots.insert(attno, new);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::MissingDownlink {
                child: BlockId::INVALID,
            }),
        }
    }
}

impl BufferManager for InMemory {
    fn read_page(&self, block: BlockId) -> Result<Page> {
        self.pages
            .read()
            .unwrap()
            .get(&block)
            .cloned()
            .ok_or(Error::MissingDownlink { child: block })
    }

    fn write_page(&self, block: BlockId, page: &Page) -> Result<()> {
        self.pages.write().unwrap().insert(block, page.clone());
        Ok(())
    }

    fn allocate(&self) -> Result<BlockId> {
        let raw = self.next_block.fetch_add(1, Ordering::SeqCst);
        if raw == u32::MAX {
            return Err(Error::BufferAllocationFailed);
        }
        Ok(BlockId::new(raw))
    }
}

impl UndoLog for InMemory {
    fn append(&self, record: UndoRecord) -> Result<UndoPtr> {
        let raw = self.next_undo.fetch_add(1, Ordering::SeqCst);
        self.undo.lock().unwrap().push(record);
        Ok(UndoPtr::new(raw))
    }

    fn oldest_retained(&self) -> UndoPtr {
        UndoPtr::new(self.oldest_retained.load(Ordering::SeqCst))
    }
}

impl Wal for InMemory {
    fn start_crit(&self) -> Result<()> {
        self.crit_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn log_page_image(&self, block: BlockId, page: &Page) -> Result<()> {
        self.wal.lock().unwrap().push((block, page.clone()));
        Ok(())
    }

    fn end_crit(&self) -> Result<()> {
        self.crit_depth.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A visibility oracle under which every version is visible to every
/// snapshot and nothing is prunable below `oldest_retained`, approximating
/// "no concurrent transactions" for single-threaded tests.
pub struct AlwaysVisible;

impl VisibilityOracle for AlwaysVisible {
    fn is_visible(&self, _flags: ItemFlags, _undo_ptr: UndoPtr, _snapshot: Snapshot) -> bool {
        true
    }

    fn is_prunable(&self, undo_ptr: UndoPtr, oldest_retained: UndoPtr) -> bool {
        undo_ptr.raw() < oldest_retained.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tid::{MAX_PLUS_ONE_ZS_TID, MIN_ZS_TID};
    use test_log::test;

    #[test]
    fn root_cas_rejects_stale_expected() {
        let store = InMemory::new();
        let block = store
            .insert_leaf(1, Page::new_leaf(1, MIN_ZS_TID, MAX_PLUS_ONE_ZS_TID, vec![]))
            .unwrap();
        let other = store.allocate().unwrap();

        assert!(!store.set_root_block(1, other, other).unwrap());
        assert!(store.set_root_block(1, block, other).unwrap());
        assert_eq!(store.root_block(1).unwrap(), other);
    }

    #[test]
    fn undo_append_returns_increasing_pointers() {
        let store = InMemory::new();
        let a = store
            .append(UndoRecord::TupleLock {
                attno: 1,
                xid: 1,
                cid: 0,
                tid: MIN_ZS_TID,
                mode: crate::undo::TupleLockMode::Shared,
                prev_undo: crate::undo::DEAD_UNDO_PTR,
            })
            .unwrap();
        let b = store
            .append(UndoRecord::TupleLock {
                attno: 1,
                xid: 1,
                cid: 1,
                tid: MIN_ZS_TID,
                mode: crate::undo::TupleLockMode::Shared,
                prev_undo: a,
            })
            .unwrap();
        assert!(b.raw() > a.raw());
    }
}
