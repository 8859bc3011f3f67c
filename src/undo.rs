// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Undo-pointer and undo-record types shared between the item model
//! (`spec.md` §3/§4.1, which stamps every item with an undo pointer) and
//! the [`crate::collab::UndoLog`] collaborator interface (`spec.md` §6).
//!
//! The undo log itself lives entirely outside this crate; this module
//! only defines the types the core passes across that boundary.

use crate::tid::ZSTid;

/// A stable reference into the host's undo log, identifying the history
/// entry that produced the current state of an item.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UndoPtr(u64);

/// Reserved sentinel meaning "no undo history" (an item inserted by a
/// transaction whose outcome is already known to every snapshot, or a
/// freshly dead-pruned placeholder).
pub const DEAD_UNDO_PTR: UndoPtr = UndoPtr(u64::MAX);

impl UndoPtr {
    /// Wraps a raw undo-log offset.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw undo-log offset.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Returns `true` for [`DEAD_UNDO_PTR`].
    #[must_use]
    pub fn is_dead(self) -> bool {
        self == DEAD_UNDO_PTR
    }
}

impl Default for UndoPtr {
    fn default() -> Self {
        DEAD_UNDO_PTR
    }
}

/// Transaction id, as handed through from the host.
pub type Xid = u64;

/// Command id within a transaction, as handed through from the host.
pub type Cid = u32;

/// Lock mode for [`UndoRecord::TupleLock`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TupleLockMode {
    /// Shared lock: concurrent shared lockers are compatible.
    Shared,
    /// Exclusive lock: no concurrent locker of any mode is compatible.
    Exclusive,
}

/// The undo-record kinds the core appends, per `spec.md` §6.
#[derive(Clone, Debug)]
pub enum UndoRecord {
    /// Records the insertion of `[first_tid, last_tid]` on attribute
    /// `attno` by `xid`/`cid`.
    Insert {
        attno: u16,
        xid: Xid,
        cid: Cid,
        first_tid: ZSTid,
        last_tid: ZSTid,
    },

    /// Records the deletion of `tid`, chaining to `prev_undo` if the item
    /// already carried undo history.
    Delete {
        attno: u16,
        xid: Xid,
        cid: Cid,
        tid: ZSTid,
        prev_undo: UndoPtr,
    },

    /// Records replacing `old_tid` with `new_tid` as part of an update.
    Update {
        attno: u16,
        xid: Xid,
        cid: Cid,
        old_tid: ZSTid,
        new_tid: ZSTid,
        prev_undo: UndoPtr,
    },

    /// Records a tuple lock acquired without modifying the tuple.
    TupleLock {
        attno: u16,
        xid: Xid,
        cid: Cid,
        tid: ZSTid,
        mode: TupleLockMode,
        prev_undo: UndoPtr,
    },
}
