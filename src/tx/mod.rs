//! Transaction-log commands and the batched applier pipeline.

/// Applier chain and schema transition semantics.
pub mod apply;

/// Command representation and wire codec.
pub mod command;

/// Update values and listener contracts for side-effect fan-out.
pub mod updates;

pub use apply::{
    apply_transaction, classify_schema_transition, CommandApplier, IndexApplier, SchemaTransition,
    StoreApplier, TransactionToApply,
};
pub use command::{
    decode_commands, encode_commands, Command, NodeCommand, PropertyCommand, SchemaCommand,
    TokenCommand,
};
pub use updates::{
    IndexEntryUpdate, IndexLifecycle, IndexUpdatesWork, LabelScanListener, LabelUpdate,
    LabelUpdatesWork,
};
