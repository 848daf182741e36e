//! Persistent record stores.
//!
//! Implements the fixed-slot record store abstraction, its variable-length
//! companion, and the token and schema stores built on them.

/// Variable-length payloads as chains of fixed-size blocks.
pub mod dynamic;

/// Generic fixed-slot record store.
pub mod fixed;

/// Store-wide metadata contract.
pub mod meta;

/// Record structs and slot codecs.
pub mod record;

/// Schema records over serialized rule payloads.
pub mod schema_store;

/// The full store set of one engine instance.
pub mod stores;

/// Token id to name mapping.
pub mod token;

pub use dynamic::{DynamicStore, DynamicStoreOptions};
pub use fixed::RecordStore;
pub use meta::{MetaStore, MetadataTracker};
pub use record::{
    DynamicRecord, NodeRecord, PropValue, PropertyRecord, RecordFormat, SchemaRecord, TokenRecord,
};
pub use schema_store::SchemaStore;
pub use stores::{StoreOptions, Stores};
pub use token::TokenStore;
