//! Tessera: the persistent record layer of an embedded property-graph
//! database.
//!
//! Fixed-slot record stores, their variable-length companion store, the
//! token and schema stores built on top, and the transaction-log command
//! pipeline that mutates all of them and fans schema changes out to the
//! index-lifecycle, label-scan, and schema-cache collaborators.

#![warn(missing_docs)]

pub mod primitives;
pub mod schema;
pub mod storage;
pub mod tx;
pub mod types;
