//! Schema descriptor model, persisted rules, and the rule cache.

/// Per-instance schema rule cache.
pub mod cache;

/// Descriptor variants and predicates.
pub mod descriptor;

/// Index and constraint rules plus their payload codec.
pub mod rule;

pub use cache::SchemaCache;
pub use descriptor::{
    ConfigValue, EntityKind, IndexConfig, IndexType, PropertySchemaType, SchemaDescriptor,
    TokenNameLookup,
};
pub use rule::{ConstraintKind, ConstraintRule, IndexRule, SchemaRule};
