// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Scoped page acquisition. [`PageGuard`] replaces manual pin/unpin
//! bookkeeping: a page is read once on acquisition, mutated in place
//! through [`PageGuard::page_mut`], and written back automatically when
//! the guard drops, if it was ever mutated. Callers that need the write
//! logged first should call [`PageGuard::flush_with_wal`] before the
//! guard goes out of scope; an un-flushed dirty guard still writes back
//! on drop (logging the failure, if any) as a safety net, not as the
//! intended path for production callers with a real WAL.

use crate::collab::{BufferManager, Wal};
use crate::error::Result;
use crate::page::{BlockId, Page};

/// A page pinned for the duration of this guard's lifetime. Dropping it
/// writes the page back if it was mutated through [`PageGuard::page_mut`].
pub struct PageGuard<'b, B: BufferManager> {
    manager: &'b B,
    block: BlockId,
    page: Page,
    dirty: bool,
}

impl<'b, B: BufferManager> PageGuard<'b, B> {
    /// Reads `block` through `manager` and returns a guard over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub fn acquire(manager: &'b B, block: BlockId) -> Result<Self> {
        let page = manager.read_page(block)?;
        Ok(Self {
            manager,
            block,
            page,
            dirty: false,
        })
    }

    /// Wraps an already-read page without a fresh `read_page` call, for
    /// callers that just allocated `block` and have its initial image in
    /// hand (e.g. a split's new right sibling).
    #[must_use]
    pub fn adopt(manager: &'b B, block: BlockId, page: Page) -> Self {
        Self {
            manager,
            block,
            page,
            dirty: true,
        }
    }

    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Borrows the page mutably, marking the guard dirty so it is
    /// written back on drop (or on an explicit [`PageGuard::flush_with_wal`]).
    pub fn page_mut(&mut self) -> &mut Page {
        self.dirty = true;
        &mut self.page
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Logs the current page image to `wal`, then writes it back through
    /// the buffer manager immediately, clearing the dirty flag so `Drop`
    /// does not write it again. Brackets the log-then-write pair in its
    /// own WAL critical section ([`Wal::start_crit`]/[`Wal::end_crit`])
    /// so a single-page flush is always atomic on its own; a caller
    /// committing several pages as one logical operation (a leaf split,
    /// `insert_downlink`, ...) should open its own outer critical section
    /// around every [`PageGuard::flush_with_wal`] call it makes -- the
    /// sections nest, so the outer one is what actually bounds the
    /// durable unit.
    ///
    /// # Errors
    ///
    /// Returns an error if either the WAL or the buffer write fails.
    pub fn flush_with_wal(&mut self, wal: &dyn Wal) -> Result<()> {
        wal.start_crit()?;
        let write_result = wal
            .log_page_image(self.block, &self.page)
            .and_then(|()| self.manager.write_page(self.block, &self.page));
        wal.end_crit()?;
        write_result?;
        self.dirty = false;
        Ok(())
    }
}

impl<B: BufferManager> Drop for PageGuard<'_, B> {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(error) = self.manager.write_page(self.block, &self.page) {
                log::error!("failed to write back page {}: {error}", self.block);
            }
        }
    }
}
