// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Attribute descriptors (`spec.md` §3: "Attribute").
//!
//! The core never invents attribute metadata; it is always handed an
//! [`AttributeDescriptor`] looked up through [`crate::collab::MetapageStore`]
//! and assumes it is consistent for the lifetime of the tree.

/// `attlen` value meaning "variable-length, self-describing header".
pub const ATTLEN_VARLENA: i16 = -1;

/// Fixed descriptors for one column's attribute tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AttributeDescriptor {
    /// Small positive integer identifying the attribute/column.
    pub attno: u16,

    /// Positive = fixed width in bytes. [`ATTLEN_VARLENA`] = variable
    /// length with a self-describing length header.
    pub attlen: i16,

    /// `true` if values are stored inline (by value), `false` if stored
    /// by pointer/reference at the host level (this only affects how the
    /// host hands datums to the core; on the wire, every datum is stored
    /// inline per `spec.md` §4.1).
    pub attbyval: bool,
}

impl AttributeDescriptor {
    /// `true` if this attribute is variable-length.
    #[must_use]
    pub fn is_varlena(&self) -> bool {
        self.attlen == ATTLEN_VARLENA
    }
}
