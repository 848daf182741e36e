//! In-memory schema rule cache.
//!
//! Scoped to one store-engine instance: initialized when the stores open,
//! cleared when they close. Refreshed by the applier pipeline on every
//! successful schema-rule apply so readers never re-scan the schema store.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::schema::descriptor::SchemaDescriptor;
use crate::schema::rule::SchemaRule;
use crate::types::{PropId, RecordId};

#[derive(Default)]
struct CacheState {
    rules: FxHashMap<u64, SchemaRule>,
}

/// Rule cache keyed by schema record id.
#[derive(Default)]
pub struct SchemaCache {
    state: RwLock<CacheState>,
}

impl SchemaCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cache contents with `rules`.
    pub fn load(&self, rules: impl IntoIterator<Item = SchemaRule>) {
        let mut state = self.state.write();
        state.rules.clear();
        for rule in rules {
            state.rules.insert(rule.id().0, rule);
        }
    }

    /// Adds or replaces one rule.
    pub fn add(&self, rule: SchemaRule) {
        self.state.write().rules.insert(rule.id().0, rule);
    }

    /// Removes the rule stored under `id`.
    pub fn remove(&self, id: RecordId) {
        self.state.write().rules.remove(&id.0);
    }

    /// Drops every cached rule.
    pub fn clear(&self) {
        self.state.write().rules.clear();
    }

    /// Looks up the rule stored under `id`.
    pub fn rule(&self, id: RecordId) -> Option<SchemaRule> {
        self.state.read().rules.get(&id.0).cloned()
    }

    /// All cached rules, in unspecified order.
    pub fn rules(&self) -> Vec<SchemaRule> {
        self.state.read().rules.values().cloned().collect()
    }

    /// Number of cached rules.
    pub fn len(&self) -> usize {
        self.state.read().rules.len()
    }

    /// Whether the cache holds no rules.
    pub fn is_empty(&self) -> bool {
        self.state.read().rules.is_empty()
    }

    /// Finds an index rule semantically equal to `descriptor`, if any.
    pub fn index_matching(&self, descriptor: &SchemaDescriptor) -> Option<SchemaRule> {
        let state = self.state.read();
        state
            .rules
            .values()
            .find(|rule| !rule.is_constraint() && rule.descriptor() == descriptor)
            .cloned()
    }

    /// Whether any index rule covers the given property key.
    pub fn has_index_on_property(&self, prop: PropId) -> bool {
        let state = self.state.read();
        state
            .rules
            .values()
            .any(|rule| !rule.is_constraint() && rule.descriptor().has_property(prop))
    }
}
