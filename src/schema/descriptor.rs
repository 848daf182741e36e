//! Schema descriptors: which entity tokens and property tokens an index or
//! constraint governs.
//!
//! Descriptors are a closed set of variants rather than a type hierarchy;
//! conversions such as [`SchemaDescriptor::as_label`] are fallible
//! variant-downcasts. Semantic identity deliberately excludes the index type
//! and configuration: two descriptors denote "the same schema" even under
//! different index implementations. Identity never involves the record id,
//! so it is stable across process restarts.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::types::{LabelId, PropId, RelTypeId, Result, TesseraError};

/// Kind of entity a descriptor governs.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum EntityKind {
    /// Node entities.
    Node,
    /// Relationship entities.
    Relationship,
}

/// How a descriptor's property list is matched against an entity.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PropertySchemaType {
    /// All listed properties must be present (ordinary indexes).
    CompleteAllTokens,
    /// Any one listed property suffices (multi-token fulltext).
    PartialAnyToken,
}

/// Index implementation tag. Excluded from descriptor identity.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum IndexType {
    /// Ordered range index.
    Range,
    /// Fulltext index.
    Fulltext,
}

/// Opaque configuration value attached to an index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigValue {
    /// Boolean setting.
    Bool(bool),
    /// Integer setting.
    Int(i64),
    /// Text setting.
    Text(String),
}

/// Opaque key-value index configuration. Excluded from descriptor identity.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexConfig(BTreeMap<String, ConfigValue>);

impl IndexConfig {
    /// An empty configuration.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets a configuration entry, returning the updated configuration.
    pub fn with(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Looks up a configuration entry.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the configuration is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Inline capacity for descriptor property lists.
pub type PropList = SmallVec<[PropId; 4]>;

/// Label-based descriptor; always node-typed.
#[derive(Clone, Debug)]
pub struct LabelSchema {
    /// Governing label.
    pub label: LabelId,
    /// Ordered property keys.
    pub props: PropList,
    /// Index implementation tag.
    pub index_type: IndexType,
    /// Opaque index settings.
    pub config: IndexConfig,
}

/// Relationship-type-based descriptor; always relationship-typed.
#[derive(Clone, Debug)]
pub struct RelTypeSchema {
    /// Governing relationship type.
    pub rel_type: RelTypeId,
    /// Ordered property keys.
    pub props: PropList,
    /// Index implementation tag.
    pub index_type: IndexType,
    /// Opaque index settings.
    pub config: IndexConfig,
}

/// Fulltext descriptor: one or more entity tokens, any-token property match.
#[derive(Clone, Debug)]
pub struct FulltextSchema {
    /// Kind of entity the tokens belong to.
    pub entity: EntityKind,
    /// Sorted governing entity tokens.
    pub tokens: SmallVec<[u32; 2]>,
    /// Ordered property keys.
    pub props: PropList,
    /// Opaque index settings.
    pub config: IndexConfig,
}

/// A schema descriptor variant.
#[derive(Clone, Debug)]
pub enum SchemaDescriptor {
    /// Label-based, node-typed.
    Label(LabelSchema),
    /// Relationship-type-based.
    RelType(RelTypeSchema),
    /// Fulltext over one or more tokens.
    Fulltext(FulltextSchema),
}

impl SchemaDescriptor {
    /// A label descriptor with a range index type and empty configuration.
    pub fn for_label(label: LabelId, props: &[PropId]) -> Self {
        SchemaDescriptor::Label(LabelSchema {
            label,
            props: props.into(),
            index_type: IndexType::Range,
            config: IndexConfig::empty(),
        })
    }

    /// A relationship-type descriptor with a range index type.
    pub fn for_rel_type(rel_type: RelTypeId, props: &[PropId]) -> Self {
        SchemaDescriptor::RelType(RelTypeSchema {
            rel_type,
            props: props.into(),
            index_type: IndexType::Range,
            config: IndexConfig::empty(),
        })
    }

    /// A fulltext descriptor over the given tokens; tokens are sorted.
    pub fn fulltext(entity: EntityKind, tokens: &[u32], props: &[PropId]) -> Self {
        let mut sorted: SmallVec<[u32; 2]> = tokens.into();
        sorted.sort_unstable();
        sorted.dedup();
        SchemaDescriptor::Fulltext(FulltextSchema {
            entity,
            tokens: sorted,
            props: props.into(),
            config: IndexConfig::empty(),
        })
    }

    /// Kind of entity this descriptor governs.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            SchemaDescriptor::Label(_) => EntityKind::Node,
            SchemaDescriptor::RelType(_) => EntityKind::Relationship,
            SchemaDescriptor::Fulltext(s) => s.entity,
        }
    }

    /// How the property list is matched.
    pub fn property_schema_type(&self) -> PropertySchemaType {
        match self {
            SchemaDescriptor::Label(_) | SchemaDescriptor::RelType(_) => {
                PropertySchemaType::CompleteAllTokens
            }
            SchemaDescriptor::Fulltext(_) => PropertySchemaType::PartialAnyToken,
        }
    }

    /// Governing entity token ids.
    pub fn entity_tokens(&self) -> SmallVec<[u32; 2]> {
        match self {
            SchemaDescriptor::Label(s) => SmallVec::from_slice(&[s.label.0]),
            SchemaDescriptor::RelType(s) => SmallVec::from_slice(&[s.rel_type.0]),
            SchemaDescriptor::Fulltext(s) => s.tokens.clone(),
        }
    }

    /// Ordered property key ids.
    pub fn property_ids(&self) -> &[PropId] {
        match self {
            SchemaDescriptor::Label(s) => &s.props,
            SchemaDescriptor::RelType(s) => &s.props,
            SchemaDescriptor::Fulltext(s) => &s.props,
        }
    }

    /// Index implementation tag.
    pub fn index_type(&self) -> IndexType {
        match self {
            SchemaDescriptor::Label(s) => s.index_type,
            SchemaDescriptor::RelType(s) => s.index_type,
            SchemaDescriptor::Fulltext(_) => IndexType::Fulltext,
        }
    }

    /// Opaque index configuration.
    pub fn config(&self) -> &IndexConfig {
        match self {
            SchemaDescriptor::Label(s) => &s.config,
            SchemaDescriptor::RelType(s) => &s.config,
            SchemaDescriptor::Fulltext(s) => &s.config,
        }
    }

    /// True iff `token` is among the descriptor's entity tokens.
    pub fn affects_token(&self, token: u32) -> bool {
        match self {
            SchemaDescriptor::Label(s) => s.label.0 == token,
            SchemaDescriptor::RelType(s) => s.rel_type.0 == token,
            SchemaDescriptor::Fulltext(s) => s.tokens.contains(&token),
        }
    }

    /// True iff `prop` is among the descriptor's property keys.
    pub fn has_property(&self, prop: PropId) -> bool {
        self.property_ids().contains(&prop)
    }

    /// Downcast to the label variant.
    pub fn as_label(&self) -> Result<&LabelSchema> {
        match self {
            SchemaDescriptor::Label(s) => Ok(s),
            _ => Err(TesseraError::Invalid("descriptor is not label-based")),
        }
    }

    /// Downcast to the relationship-type variant.
    pub fn as_rel_type(&self) -> Result<&RelTypeSchema> {
        match self {
            SchemaDescriptor::RelType(s) => Ok(s),
            _ => Err(TesseraError::Invalid("descriptor is not relationship-type-based")),
        }
    }

    /// Downcast to the fulltext variant.
    pub fn as_fulltext(&self) -> Result<&FulltextSchema> {
        match self {
            SchemaDescriptor::Fulltext(s) => Ok(s),
            _ => Err(TesseraError::Invalid("descriptor is not fulltext")),
        }
    }

    /// Human-readable description with token names resolved through `lookup`.
    pub fn user_description(&self, lookup: &dyn TokenNameLookup) -> String {
        let props = |props: &[PropId]| {
            props
                .iter()
                .map(|p| lookup.property_key_name(*p))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            SchemaDescriptor::Label(s) => {
                format!(":{}({})", lookup.label_name(s.label), props(&s.props))
            }
            SchemaDescriptor::RelType(s) => {
                format!(
                    "-[:{}({})]-",
                    lookup.relationship_type_name(s.rel_type),
                    props(&s.props)
                )
            }
            SchemaDescriptor::Fulltext(s) => {
                let tokens = s
                    .tokens
                    .iter()
                    .map(|&t| match s.entity {
                        EntityKind::Node => lookup.label_name(LabelId(t)),
                        EntityKind::Relationship => lookup.relationship_type_name(RelTypeId(t)),
                    })
                    .collect::<Vec<_>>()
                    .join("|");
                format!("fulltext(:{}({}))", tokens, props(&s.props))
            }
        }
    }

    fn sorted_tokens(&self) -> SmallVec<[u32; 2]> {
        let mut tokens = self.entity_tokens();
        tokens.sort_unstable();
        tokens
    }
}

impl PartialEq for SchemaDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.entity_kind() == other.entity_kind()
            && self.property_schema_type() == other.property_schema_type()
            && self.sorted_tokens() == other.sorted_tokens()
            && self.property_ids() == other.property_ids()
    }
}

impl Eq for SchemaDescriptor {}

impl Hash for SchemaDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_kind().hash(state);
        self.property_schema_type().hash(state);
        self.sorted_tokens().hash(state);
        self.property_ids().hash(state);
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_description(&IdNameLookup))
    }
}

/// Resolves token ids to user-facing names for diagnostics.
pub trait TokenNameLookup {
    /// Name of a label token.
    fn label_name(&self, id: LabelId) -> String;
    /// Name of a relationship type token.
    fn relationship_type_name(&self, id: RelTypeId) -> String;
    /// Name of a property key token.
    fn property_key_name(&self, id: PropId) -> String;
}

/// Fallback lookup that renders raw ids.
pub struct IdNameLookup;

impl TokenNameLookup for IdNameLookup {
    fn label_name(&self, id: LabelId) -> String {
        format!("label[{}]", id.0)
    }

    fn relationship_type_name(&self, id: RelTypeId) -> String {
        format!("type[{}]", id.0)
    }

    fn property_key_name(&self, id: PropId) -> String {
        format!("property[{}]", id.0)
    }
}
