//! Identifier newtypes and the crate-wide error type.

#![forbid(unsafe_code)]

use std::fmt;

/// Identifier of a fixed-size record slot within one store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecordId(pub u64);

/// Identifier of one block in a dynamic (variable-length) store.
///
/// Block id 0 is reserved as the "no block" sentinel and is never allocated.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockId(pub u64);

/// Identifier of a node entity record.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

/// Label token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);

/// Relationship type token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RelTypeId(pub u32);

/// Property key token identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PropId(pub u32);

/// Transaction identifier as recorded in the log.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct TxId(pub u64);

/// Errors produced by the record layer.
#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    /// Underlying file I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// An on-disk structure failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A dynamic-record chain could not be walked to a terminal block.
    #[error("broken chain: {0}")]
    BrokenChain(&'static str),
    /// A schema command's before/after images form no known transition.
    #[error("invalid schema transition: {0}")]
    InvalidSchemaTransition(&'static str),
    /// An identifier space has no ids left to hand out.
    #[error("id space exhausted: {0}")]
    IdExhausted(&'static str),
    /// Caller supplied an argument the store cannot act on.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The requested record does not exist or is not in use.
    #[error("not found")]
    NotFound,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TesseraError>;

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<LabelId> for u32 {
    fn from(value: LabelId) -> Self {
        value.0
    }
}

impl From<u32> for RelTypeId {
    fn from(value: u32) -> Self {
        RelTypeId(value)
    }
}

impl From<RelTypeId> for u32 {
    fn from(value: RelTypeId) -> Self {
        value.0
    }
}

impl From<u32> for PropId {
    fn from(value: u32) -> Self {
        PropId(value)
    }
}

impl From<PropId> for u32 {
    fn from(value: PropId) -> Self {
        value.0
    }
}

/// Token id types that can back a [`crate::storage::TokenStore`].
pub trait TokenKey: Copy + Eq + std::hash::Hash + fmt::Debug {
    /// Wraps a raw stored token id.
    fn from_raw(raw: u32) -> Self;
    /// Unwraps to the raw stored token id.
    fn raw(self) -> u32;
}

impl TokenKey for LabelId {
    fn from_raw(raw: u32) -> Self {
        LabelId(raw)
    }

    fn raw(self) -> u32 {
        self.0
    }
}

impl TokenKey for RelTypeId {
    fn from_raw(raw: u32) -> Self {
        RelTypeId(raw)
    }

    fn raw(self) -> u32 {
        self.0
    }
}

impl TokenKey for PropId {
    fn from_raw(raw: u32) -> Self {
        PropId(raw)
    }

    fn raw(self) -> u32 {
        self.0
    }
}
