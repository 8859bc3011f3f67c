// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Collaborator interfaces: the boundary between this crate's tree
//! algorithms and the host system's storage, logging and concurrency
//! control facilities. Every trait here is deliberately thin -- the real
//! implementations (shared buffer pool, write-ahead log, MVCC undo
//! chain, transaction manager) live outside this crate. [`crate::mock`]
//! provides in-memory stand-ins of all five for this crate's own tests.

use crate::attr::AttributeDescriptor;
use crate::error::Result;
use crate::item::ItemFlags;
use crate::mvcc::Snapshot;
use crate::page::{BlockId, Page};
use crate::undo::{UndoPtr, UndoRecord};

/// Looks up per-attribute metadata: the attribute's type descriptor and
/// the current root block of its tree. Root changes (a new root created
/// by a root split) go through a compare-and-swap so a stale reader
/// doesn't clobber a concurrent split.
pub trait MetapageStore: Send + Sync {
    /// Returns the stored type descriptor for `attno`.
    ///
    /// # Errors
    ///
    /// Returns an error if `attno` names an attribute this store does
    /// not know about.
    fn attribute(&self, attno: u16) -> Result<AttributeDescriptor>;

    /// Returns the current root block of `attno`'s tree.
    ///
    /// # Errors
    ///
    /// Returns an error if `attno`'s tree has not been created.
    fn root_block(&self, attno: u16) -> Result<BlockId>;

    /// Atomically replaces `attno`'s root block with `new`, provided it
    /// is still `expected`. Returns `false` (no error) on a stale CAS so
    /// the caller can re-read and retry.
    ///
    /// # Errors
    ///
    /// Returns an error if `attno`'s tree has not been created.
    fn set_root_block(&self, attno: u16, expected: BlockId, new: BlockId) -> Result<bool>;
}

/// The shared page cache. Every page access in this crate goes through
/// here, never through a raw file handle -- [`crate::buffer::PageGuard`]
/// wraps [`BufferManager::read_page`]/[`BufferManager::write_page`] into
/// a scoped, RAII-released borrow so algorithms never have to remember
/// to write back a page they modified.
pub trait BufferManager: Send + Sync {
    /// Reads the current image of `block`.
    ///
    /// # Errors
    ///
    /// Returns an error if `block` does not exist or the read fails.
    fn read_page(&self, block: BlockId) -> Result<Page>;

    /// Writes `page` back as the new image of `block`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_page(&self, block: BlockId, page: &Page) -> Result<()>;

    /// Allocates a fresh block, typically for a split's new right
    /// sibling or a new root.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::BufferAllocationFailed`] if no
    /// block is available.
    fn allocate(&self) -> Result<BlockId>;
}

/// The undo log: an append-only history of per-tuple mutations,
/// consulted by the visibility oracle and walked backwards by readers
/// who need an older version than what is currently stored.
pub trait UndoLog: Send + Sync {
    /// Appends `record`, returning a pointer to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot accept more records.
    fn append(&self, record: UndoRecord) -> Result<UndoPtr>;

    /// The oldest undo pointer any live snapshot might still need. Dead
    /// items whose undo pointer predates this may be pruned.
    fn oldest_retained(&self) -> UndoPtr;
}

/// The write-ahead log. This crate never reasons about recovery itself;
/// callers are expected to call [`Wal::log_page_image`] for a page before
/// releasing the [`crate::buffer::PageGuard`] that modified it, so the
/// log entry always precedes the buffer write it describes.
///
/// `spec.md` §6/§7: every page edit performed by `recompress_replace`
/// (this crate's [`crate::mutation::replace_item`]/[`crate::mutation::commit_images`]),
/// [`crate::structure::insert_downlink`], [`crate::structure::split_internal_page`],
/// and [`crate::structure::new_root`] must occur between a `start_crit`/`end_crit`
/// pair, so that either every page touched by one of those operations is
/// dirtied and WAL'd, or none is (`spec.md` §5: "one WAL record per
/// modified page"; §7: "either the critical section completes ... or none
/// do"). Critical sections nest: each `start_crit` call opens one level,
/// each `end_crit` closes one, and only the outermost pair bounds the
/// durable unit -- this lets an operation that internally calls another
/// bracketed operation (e.g. `insert_downlink` calling `split_internal_page`)
/// compose into a single wider critical section instead of several
/// disjoint ones.
pub trait Wal: Send + Sync {
    /// Opens one level of WAL critical section.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::WalFailed`] if the log cannot open
    /// a new critical section.
    fn start_crit(&self) -> Result<()>;

    /// Logs that `block`'s image is about to become `page`, inside the
    /// critical section opened by the innermost unmatched
    /// [`Wal::start_crit`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::WalFailed`] if the log write fails.
    fn log_page_image(&self, block: BlockId, page: &Page) -> Result<()>;

    /// Closes one level of WAL critical section opened by
    /// [`Wal::start_crit`]. The outermost call durably commits every page
    /// image logged since its matching `start_crit`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::WalFailed`] if the log cannot close
    /// or flush.
    fn end_crit(&self) -> Result<()>;
}

/// MVCC visibility, delegated entirely to the host's snapshot/transaction
/// manager. This crate never interprets a [`Snapshot`] or an
/// [`crate::undo::Xid`] beyond passing them through.
pub trait VisibilityOracle: Send + Sync {
    /// `true` if the item -- identified by its current `flags` and the
    /// transaction recorded at `undo_ptr` -- is visible to `snapshot`.
    ///
    /// `flags` matters as much as `undo_ptr` here: a plain item's
    /// `undo_ptr` is its creator, so visibility is "was the insert
    /// visible". A [`ItemFlags::DELETED`] or [`ItemFlags::UPDATED`]
    /// item's `undo_ptr` is instead the deleting/updating transaction,
    /// so the oracle must invert the sense of the check -- the row is
    /// visible only while that removal is *not* visible to `snapshot`.
    fn is_visible(&self, flags: ItemFlags, undo_ptr: UndoPtr, snapshot: Snapshot) -> bool;

    /// `true` if no live or future snapshot can ever need the version
    /// behind `undo_ptr` -- the item may be pruned to [`crate::undo::DEAD_UNDO_PTR`].
    fn is_prunable(&self, undo_ptr: UndoPtr, oldest_retained: UndoPtr) -> bool;
}
