//! Low-level building blocks shared by the record stores.

/// Identifier allocation contract and the default free-list implementation.
pub mod ids;

/// Positioned file I/O.
pub mod io;

/// Fixed-page slot-addressed storage.
pub mod pager;

/// Batching queue coordinating concurrent update producers with one listener.
pub mod worksync;
