use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use zedstore::item::ItemFlags;
use zedstore::mock::InMemory;
use zedstore::page::Page;
use zedstore::tid::{MAX_PLUS_ONE_ZS_TID, MIN_ZS_TID};
use zedstore::{
    AttributeDescriptor, AttributeTree, Cid, Snapshot, UndoLog, UndoPtr, UndoRecord,
    VisibilityOracle, Xid,
};

/// A fixed-width 4-byte integer attribute, as every scenario table uses.
#[must_use]
pub fn int_attr(attno: u16) -> AttributeDescriptor {
    AttributeDescriptor {
        attno,
        attlen: 4,
        attbyval: true,
    }
}

pub type IntTree<'a> = AttributeTree<'a, InMemory, InMemory, TrackingUndo<'a>, InMemory>;

/// Registers `attno` as a 4-byte integer column with a fresh, empty root
/// leaf, and hands back a tree handle for it sharing `store`/`undo` with
/// every other column of the same table.
#[must_use]
pub fn new_int_tree<'a>(
    store: &'a InMemory,
    undo: &'a TrackingUndo<'a>,
    attno: u16,
) -> IntTree<'a> {
    store.register_attribute(int_attr(attno));
    store
        .insert_leaf(
            attno,
            Page::new_leaf(attno, MIN_ZS_TID, MAX_PLUS_ONE_ZS_TID, vec![]),
        )
        .expect("fresh attribute always gets its root leaf");
    AttributeTree::new(store, store, undo, store, attno)
}

/// Encodes `v` the way every scenario stores an `int4` datum.
#[must_use]
pub fn encode(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

/// Decodes a datum read back from the tree.
#[must_use]
pub fn decode(bytes: &[u8]) -> i32 {
    i32::from_le_bytes(bytes.try_into().expect("int4 datum is always 4 bytes"))
}

/// An [`UndoLog`] that records which transaction produced each undo
/// pointer, so a test oracle can later decide that transaction's
/// changes never happened -- the only way this crate's collaborator
/// boundary lets a test simulate an aborted transaction, since the
/// tree itself never interprets an [`Xid`] beyond passing it through.
pub struct TrackingUndo<'a> {
    inner: &'a InMemory,
    xid_of: Mutex<HashMap<u64, Xid>>,
}

impl<'a> TrackingUndo<'a> {
    #[must_use]
    pub fn new(inner: &'a InMemory) -> Self {
        Self {
            inner,
            xid_of: Mutex::new(HashMap::new()),
        }
    }

    fn xid_at(&self, undo_ptr: UndoPtr) -> Option<Xid> {
        self.xid_of.lock().unwrap().get(&undo_ptr.raw()).copied()
    }
}

impl UndoLog for TrackingUndo<'_> {
    fn append(&self, record: UndoRecord) -> zedstore::Result<UndoPtr> {
        let xid = match record {
            UndoRecord::Insert { xid, .. }
            | UndoRecord::Delete { xid, .. }
            | UndoRecord::Update { xid, .. }
            | UndoRecord::TupleLock { xid, .. } => xid,
        };
        let ptr = self.inner.append(record)?;
        self.xid_of.lock().unwrap().insert(ptr.raw(), xid);
        Ok(ptr)
    }

    fn oldest_retained(&self) -> UndoPtr {
        self.inner.oldest_retained()
    }
}

/// A visibility oracle for a single reader with no concurrent
/// transactions in flight: every transaction it has ever heard of
/// (via [`TrackingUndo`]) has either committed or been explicitly
/// marked aborted with [`Self::abort`]. A plain item is visible
/// unless its inserting transaction aborted; a `DELETED`/`UPDATED`/
/// `DEAD` item is visible only while the superseding transaction has
/// *not* committed, i.e. is exactly the transactions marked aborted.
pub struct CommittedUnlessAborted<'a> {
    undo: &'a TrackingUndo<'a>,
    aborted: Mutex<HashSet<Xid>>,
}

impl<'a> CommittedUnlessAborted<'a> {
    #[must_use]
    pub fn new(undo: &'a TrackingUndo<'a>) -> Self {
        Self {
            undo,
            aborted: Mutex::new(HashSet::new()),
        }
    }

    /// Marks `xid` as aborted: none of its changes become visible to
    /// any future [`VisibilityOracle::is_visible`] call against this
    /// oracle, from here on.
    pub fn abort(&self, xid: Xid) {
        self.aborted.lock().unwrap().insert(xid);
    }

    fn committed(&self, undo_ptr: UndoPtr) -> bool {
        match self.undo.xid_at(undo_ptr) {
            Some(xid) => !self.aborted.lock().unwrap().contains(&xid),
            None => true,
        }
    }
}

impl VisibilityOracle for CommittedUnlessAborted<'_> {
    fn is_visible(&self, flags: ItemFlags, undo_ptr: UndoPtr, _snapshot: Snapshot) -> bool {
        let superseded = flags.contains(ItemFlags::DELETED)
            || flags.contains(ItemFlags::UPDATED)
            || flags.contains(ItemFlags::DEAD);
        if superseded {
            !self.committed(undo_ptr)
        } else {
            self.committed(undo_ptr)
        }
    }

    fn is_prunable(&self, _undo_ptr: UndoPtr, _oldest_retained: UndoPtr) -> bool {
        false
    }
}

/// A visibility oracle for a single writer with no concurrency at all:
/// a tuple is visible precisely while nothing newer has superseded it.
/// Used by every scenario that is not specifically exercising abort
/// semantics -- visibility is entirely the host's business, and this
/// is the simplest host that still gives a useful "current state of
/// the table" view.
pub struct LatestVisible;

impl VisibilityOracle for LatestVisible {
    fn is_visible(&self, flags: ItemFlags, _undo_ptr: UndoPtr, _snapshot: Snapshot) -> bool {
        !flags.contains(ItemFlags::DELETED)
            && !flags.contains(ItemFlags::UPDATED)
            && !flags.contains(ItemFlags::DEAD)
    }

    fn is_prunable(&self, undo_ptr: UndoPtr, oldest_retained: UndoPtr) -> bool {
        undo_ptr.raw() < oldest_retained.raw()
    }
}

pub const XID: Xid = 7;
pub const CID: Cid = 0;
