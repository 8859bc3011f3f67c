// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! MVCC glue: the snapshot type passed through to the visibility oracle,
//! the outcomes a write operation can report back to the host instead of
//! erroring out, and the dead-item pruning rule.
//!
//! Versioning itself -- what "visible" means, how a snapshot is built --
//! is entirely the host's business through [`crate::collab::VisibilityOracle`].
//! This module only defines the shapes that cross that boundary.

use crate::collab::VisibilityOracle;
use crate::item::ItemFlags;
use crate::undo::UndoPtr;

/// An opaque snapshot handle, passed through unmodified to
/// [`VisibilityOracle::is_visible`].
pub type Snapshot = u64;

/// How a write operation should behave when it finds the target tuple
/// locked by a concurrent, not-yet-committed transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Fail immediately with
    /// [`crate::error::Error::WouldBlock`].
    NoWait,
    /// Report [`UpdateOutcome::Skipped`] and move on without erroring.
    Skip,
    /// Wait for the blocking transaction to finish. Not implemented by
    /// this engine; callers that select this policy get
    /// [`crate::error::Error::WouldBlock`], same as `NoWait` (an
    /// unresolved design question -- see `DESIGN.md`).
    Block,
}

/// The result of attempting to delete or update a tuple, distinguishing
/// "nothing happened because of a concurrent writer" from a hard error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The mutation was applied.
    Applied,
    /// The target tuple was already deleted/updated by a transaction not
    /// visible to the caller's snapshot.
    AlreadyModified,
    /// [`WaitPolicy::Skip`] (or an unimplemented [`WaitPolicy::Block`])
    /// caused the caller to back off instead of applying the mutation.
    Skipped,
}

/// Applies the dead-item pruning rule: an item flagged `DELETED` or
/// `UPDATED` becomes eligible for pruning (its undo pointer may be
/// replaced with [`crate::undo::DEAD_UNDO_PTR`] and, if every item on a
/// run shares that fate, the run physically removed) once no retained
/// snapshot can still need the version it superseded.
#[must_use]
pub fn is_prunable(
    oracle: &dyn VisibilityOracle,
    flags: ItemFlags,
    undo_ptr: UndoPtr,
    oldest_retained: UndoPtr,
) -> bool {
    if flags.contains(ItemFlags::DEAD) {
        return true;
    }
    if !flags.contains(ItemFlags::DELETED) && !flags.contains(ItemFlags::UPDATED) {
        return false;
    }
    oracle.is_prunable(undo_ptr, oldest_retained)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysPrunable;
    impl VisibilityOracle for AlwaysPrunable {
        fn is_visible(&self, _flags: ItemFlags, _undo_ptr: UndoPtr, _snapshot: Snapshot) -> bool {
            true
        }
        fn is_prunable(&self, _undo_ptr: UndoPtr, _oldest_retained: UndoPtr) -> bool {
            true
        }
    }

    #[test]
    fn live_item_is_never_prunable() {
        let oracle = AlwaysPrunable;
        assert!(!is_prunable(
            &oracle,
            ItemFlags::empty(),
            UndoPtr::new(1),
            UndoPtr::new(5)
        ));
    }

    #[test]
    fn dead_flag_is_always_prunable() {
        let oracle = AlwaysPrunable;
        assert!(is_prunable(
            &oracle,
            ItemFlags::DEAD,
            UndoPtr::new(1),
            UndoPtr::new(5)
        ));
    }

    #[test]
    fn deleted_item_defers_to_oracle() {
        let oracle = AlwaysPrunable;
        assert!(is_prunable(
            &oracle,
            ItemFlags::DELETED,
            UndoPtr::new(1),
            UndoPtr::new(5)
        ));
    }
}
