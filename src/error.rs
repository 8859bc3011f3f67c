// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Error taxonomy for the core engine (`spec.md` §7).
//!
//! Every variant here is non-recoverable from within the core: the host
//! transaction aborts. Recoverable update-conflict outcomes are *not*
//! `Error` variants; see [`crate::mvcc::UpdateOutcome`].

use crate::coding::{DecodeError, EncodeError};
use crate::page::BlockId;
use crate::tid::ZSTid;

/// Represents errors that can occur in the attribute-tree engine.
#[derive(Debug)]
pub enum Error {
    /// I/O error surfaced by a collaborator (buffer manager, WAL, undo log).
    Io(std::io::Error),

    /// Serialization failed.
    Encode(EncodeError),

    /// Deserialization failed.
    Decode(DecodeError),

    /// A page carried an unexpected `page_id` discriminator.
    UnexpectedPageId(u16),

    /// Descent reached a page whose `level` did not match what the caller
    /// expected (e.g. hit a leaf while still expecting an internal page).
    LevelMismatch {
        /// The level the caller expected to find.
        expected: u16,
        /// The level actually stamped on the page.
        found: u16,
    },

    /// A page's right-sibling link pointed back at itself.
    SelfReferentialRightLink(BlockId),

    /// Could not find the downlink to `child` while re-finding a parent
    /// for `insert_downlink`.
    MissingDownlink {
        /// The child block whose downlink should have existed.
        child: BlockId,
    },

    /// A compressed container was found nested inside another one.
    NestedCompressedItem,

    /// `replace_item` was called with an `old_tid` that does not cover any
    /// item on the target leaf.
    OldItemNotFound(ZSTid),

    /// Descent fell off the end of the right-sibling chain while looking
    /// for a key that should exist somewhere in the tree.
    FellOffRightEnd(ZSTid),

    /// The page allocator could not supply a new page.
    BufferAllocationFailed,

    /// No TID remains in the 48-bit domain to allocate to a new tuple.
    TidSpaceExhausted,

    /// The write-ahead log collaborator reported a failure.
    WalFailed,

    /// `delete`/`update`/`lock` could not find the target tuple at all
    /// (distinct from `OldItemNotFound`, which is a page-local corruption;
    /// this is the host-visible "tuple concurrently updated" case).
    TupleNotFound(ZSTid),

    /// A caller blocked on a conflicting tuple lock under
    /// [`crate::mvcc::WaitPolicy::Block`], which this engine does not
    /// implement (`spec.md` §9 open question: tuple-lock wait/retry is
    /// unimplemented). The host should retry with a different policy or
    /// its own wait queue.
    WouldBlock(ZSTid),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZedStoreError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Attribute-tree result.
pub type Result<T> = std::result::Result<T, Error>;
