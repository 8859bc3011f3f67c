// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A compressed, column-oriented, MVCC-aware B+tree storage engine keyed by
//! 48-bit tuple identifiers.
//!
//! ##### About
//!
//! Each table column gets its own [`tree::AttributeTree`]: a Lehman-Yao
//! B+tree whose leaves hold runs of items addressed by [`tid::ZSTid`]
//! rather than by column value. Items come in three shapes -- a single
//! tuple ([`item::SingleItem`]), a run of same-flag tuples sharing one undo
//! pointer ([`item::ArrayItem`]), and a compressed container wrapping a run
//! of either ([`item::CompressedItem`]) -- and visibility is decided by
//! chasing an [`undo::UndoPtr`] out to the host's undo log rather than by
//! storing MVCC bookkeeping inline.
//!
//! This crate does not implement a buffer pool, a WAL, an undo log, or a
//! lock manager: those are host responsibilities, expressed here as the
//! [`collab`] traits ([`collab::BufferManager`], [`collab::MetapageStore`],
//! [`collab::UndoLog`], [`collab::Wal`], [`collab::VisibilityOracle`]). An
//! in-memory reference implementation of all five lives in [`mock`], used
//! throughout this crate's own tests.
//!
//! # Example usage
//!
//! ```
//! use zedstore::attr::AttributeDescriptor;
//! use zedstore::mock::{AlwaysVisible, InMemory};
//! use zedstore::tree::AttributeTree;
//!
//! let buffers = InMemory::new();
//! let attr = AttributeDescriptor { attno: 1, attlen: 4, attbyval: true };
//! buffers.register_attribute(attr);
//! buffers.insert_leaf(1, zedstore::page::Page::new_leaf(
//!     1, zedstore::tid::MIN_ZS_TID, zedstore::tid::MAX_PLUS_ONE_ZS_TID, vec![],
//! ))?;
//!
//! let tree = AttributeTree::new(&buffers, &buffers, &buffers, &buffers, 1);
//!
//! let one = 1i32.to_le_bytes();
//! let tid = tree.insert(1, 0, 1, &[Some(&one)], false)?;
//!
//! let oracle = AlwaysVisible;
//! let found = tree.point_lookup(tid, 1, &oracle)?;
//! assert!(found.is_some());
//! # Ok::<(), zedstore::error::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

pub mod attr;
mod binary_search;
pub mod buffer;
pub mod coding;
pub mod collab;
pub mod compression;
pub mod config;
pub mod descent;
pub mod error;
pub mod item;
#[doc(hidden)]
pub mod mock;
pub mod mutation;
pub mod mvcc;
pub mod page;
pub mod scan;
mod simple8b;
pub mod slice;
pub mod structure;
pub mod tid;
pub mod tree;
pub mod undo;
mod varlena;

pub use {
    attr::AttributeDescriptor,
    collab::{BufferManager, MetapageStore, UndoLog, VisibilityOracle, Wal},
    error::{Error, Result},
    item::Item,
    mvcc::{Snapshot, UpdateOutcome, WaitPolicy},
    scan::Scan,
    slice::Slice,
    tid::ZSTid,
    tree::{AttributeTree, VisibleScan},
    undo::{Cid, UndoPtr, UndoRecord, Xid},
};
