// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Forward range scan over the leaf chain.
//!
//! A [`Scan`] walks `trailer.next` links starting from whatever leaf the
//! caller already descended to, flattening any [`crate::item::CompressedItem`]
//! it meets along the way so callers never see a container, only plain
//! items. It does not filter by visibility -- that is layered on top by
//! [`crate::tree::AttributeTree::scan`], which is where a [`crate::collab::VisibilityOracle`]
//! and a [`crate::mvcc::Snapshot`] are available.

use crate::buffer::PageGuard;
use crate::collab::BufferManager;
use crate::compression::decompress_run;
use crate::error::Result;
use crate::item::Item;
use crate::page::BlockId;
use crate::tid::ZSTid;
use std::collections::VecDeque;

/// Iterates plain items in ascending TID order over `[lo, hi)`, starting
/// from a leaf the caller has already descended to.
pub struct Scan<'b, B: BufferManager> {
    buffers: &'b B,
    lo: ZSTid,
    hi: ZSTid,
    pending: VecDeque<Item>,
    next_block: Option<BlockId>,
}

impl<'b, B: BufferManager> Scan<'b, B> {
    /// Starts a scan from `start_leaf`, covering `[lo, hi)`.
    ///
    /// # Errors
    ///
    /// Propagates buffer manager and decompression errors encountered
    /// while loading the first leaf.
    pub fn new(buffers: &'b B, start_leaf: BlockId, lo: ZSTid, hi: ZSTid) -> Result<Self> {
        let mut scan = Self {
            buffers,
            lo,
            hi,
            pending: VecDeque::new(),
            next_block: Some(start_leaf),
        };
        scan.fill()?;
        Ok(scan)
    }

    /// Loads leaves into `pending` until either it has something to
    /// yield or the scan has run out of leaves / passed `hi`.
    fn fill(&mut self) -> Result<()> {
        while self.pending.is_empty() {
            let Some(block) = self.next_block else {
                return Ok(());
            };

            let guard = PageGuard::acquire(self.buffers, block)?;
            let page = guard.page();
            debug_assert!(page.trailer.is_leaf(), "Scan only walks leaf pages");

            let mut hit_upper_bound = false;
            for item in page.items() {
                if item.first_tid() >= self.hi {
                    hit_upper_bound = true;
                    break;
                }
                if item.last_tid() < self.lo {
                    continue;
                }

                if let Item::Compressed(container) = item {
                    for sub in decompress_run(container)? {
                        if sub.first_tid() < self.hi && sub.last_tid() >= self.lo {
                            self.pending.push_back(sub);
                        }
                    }
                } else {
                    self.pending.push_back(item.clone());
                }
            }

            self.next_block = if hit_upper_bound
                || page.trailer.is_rightmost()
                || page.trailer.hikey >= self.hi
                || page.trailer.next.is_invalid()
            {
                None
            } else {
                Some(page.trailer.next)
            };
        }
        Ok(())
    }
}

impl<B: BufferManager> Iterator for Scan<'_, B> {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Result<Item>> {
        if self.pending.is_empty() {
            if let Err(error) = self.fill() {
                return Some(Err(error));
            }
        }
        self.pending.pop_front().map(Ok)
    }
}
