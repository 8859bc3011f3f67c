// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Serialization primitives shared by every on-disk type in this crate
//! (TIDs, item headers, page trailers, compressed containers).

use std::io::{Read, Write};

/// Error during serialization.
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error writing to the target buffer.
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EncodeError({})",
            match self {
                Self::Io(e) => e.to_string(),
            }
        )
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
        }
    }
}

/// Error during deserialization.
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error reading from the source buffer.
    Io(std::io::Error),

    /// An enum tag byte did not match any known variant of the named type.
    InvalidTag((&'static str, u8)),

    /// A nested compressed container was found inside another compressed
    /// container. `spec.md` §4.5 Step A: "nesting is a hard error".
    NestedContainer,

    /// A caller handed [`crate::item::create_item`] a `datums`/`isnull`
    /// combination that does not describe a well-formed item: a length
    /// mismatch against `nelements`, a null mixed in among non-null
    /// elements, or a fixed-width datum whose byte length does not match
    /// the attribute's `attlen`.
    InvalidItemInput(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DecodeError({})",
            match self {
                Self::Io(e) => e.to_string(),
                Self::InvalidTag((ty, tag)) => format!("invalid tag {tag} for {ty}"),
                Self::NestedContainer => "nested compressed container".to_string(),
                Self::InvalidItemInput(reason) => reason.to_string(),
            }
        )
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Trait to serialize a value into a byte stream.
pub trait Encode {
    /// Serializes into `writer`.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into a freshly allocated vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        self.encode_into(&mut v).expect("in-memory write cannot fail");
        v
    }
}

/// Trait to deserialize a value from a byte stream.
pub trait Decode {
    /// Deserializes from `reader`.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}
