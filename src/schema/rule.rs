//! Schema rules and their serialized payload format.
//!
//! A rule is the persisted description of an index or constraint. Its bytes
//! live in the schema store's dynamic companion; the same codec is reused by
//! log commands so that a drop command still carries the dropped rule.

use smallvec::SmallVec;

use crate::schema::descriptor::{
    ConfigValue, EntityKind, FulltextSchema, IndexConfig, IndexType, LabelSchema, PropList,
    RelTypeSchema, SchemaDescriptor,
};
use crate::types::{LabelId, PropId, RecordId, RelTypeId, Result, TesseraError};

const RULE_FORMAT_VERSION: u8 = 1;

const KIND_INDEX: u8 = 1;
const KIND_CONSTRAINT: u8 = 2;

const VARIANT_LABEL: u8 = 1;
const VARIANT_REL_TYPE: u8 = 2;
const VARIANT_FULLTEXT: u8 = 3;

/// Kind of constraint a constraint rule enforces.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ConstraintKind {
    /// Property values must be unique per entity token.
    Unique,
    /// The property must exist.
    Exists,
}

/// Persisted index definition.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexRule {
    /// Schema record id this rule is stored under.
    pub id: RecordId,
    /// User-facing rule name.
    pub name: String,
    /// What the index governs.
    pub descriptor: SchemaDescriptor,
}

/// Persisted constraint definition.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintRule {
    /// Schema record id this rule is stored under.
    pub id: RecordId,
    /// User-facing rule name.
    pub name: String,
    /// Kind of constraint.
    pub kind: ConstraintKind,
    /// What the constraint governs.
    pub descriptor: SchemaDescriptor,
    /// Backing index rule for uniqueness constraints.
    pub owned_index: Option<RecordId>,
}

/// A persisted schema rule: index or constraint.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaRule {
    /// Index definition.
    Index(IndexRule),
    /// Constraint definition.
    Constraint(ConstraintRule),
}

impl SchemaRule {
    /// Schema record id the rule is stored under.
    pub fn id(&self) -> RecordId {
        match self {
            SchemaRule::Index(r) => r.id,
            SchemaRule::Constraint(r) => r.id,
        }
    }

    /// User-facing rule name.
    pub fn name(&self) -> &str {
        match self {
            SchemaRule::Index(r) => &r.name,
            SchemaRule::Constraint(r) => &r.name,
        }
    }

    /// The descriptor the rule wraps.
    pub fn descriptor(&self) -> &SchemaDescriptor {
        match self {
            SchemaRule::Index(r) => &r.descriptor,
            SchemaRule::Constraint(r) => &r.descriptor,
        }
    }

    /// Whether this is a constraint rule.
    pub fn is_constraint(&self) -> bool {
        matches!(self, SchemaRule::Constraint(_))
    }

    /// Serializes the rule into `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(RULE_FORMAT_VERSION);
        match self {
            SchemaRule::Index(rule) => {
                out.push(KIND_INDEX);
                out.extend_from_slice(&rule.id.0.to_be_bytes());
                put_str(out, &rule.name);
                encode_descriptor(&rule.descriptor, out);
            }
            SchemaRule::Constraint(rule) => {
                out.push(KIND_CONSTRAINT);
                out.extend_from_slice(&rule.id.0.to_be_bytes());
                put_str(out, &rule.name);
                out.push(match rule.kind {
                    ConstraintKind::Unique => 1,
                    ConstraintKind::Exists => 2,
                });
                match rule.owned_index {
                    Some(owned) => {
                        out.push(1);
                        out.extend_from_slice(&owned.0.to_be_bytes());
                    }
                    None => {
                        out.push(0);
                        out.extend_from_slice(&0u64.to_be_bytes());
                    }
                }
                encode_descriptor(&rule.descriptor, out);
            }
        }
    }

    /// Serializes the rule into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decodes a rule payload.
    pub fn decode(src: &[u8]) -> Result<SchemaRule> {
        let mut reader = Reader::new(src);
        if reader.u8()? != RULE_FORMAT_VERSION {
            return Err(TesseraError::Corruption("unsupported schema rule version"));
        }
        let kind = reader.u8()?;
        let id = RecordId(reader.u64()?);
        let name = reader.str()?;
        let rule = match kind {
            KIND_INDEX => SchemaRule::Index(IndexRule {
                id,
                name,
                descriptor: decode_descriptor(&mut reader)?,
            }),
            KIND_CONSTRAINT => {
                let ckind = match reader.u8()? {
                    1 => ConstraintKind::Unique,
                    2 => ConstraintKind::Exists,
                    _ => return Err(TesseraError::Corruption("unknown constraint kind")),
                };
                let has_owned = match reader.u8()? {
                    0 => false,
                    1 => true,
                    _ => return Err(TesseraError::Corruption("invalid owned index marker")),
                };
                let owned_raw = reader.u64()?;
                if !has_owned && owned_raw != 0 {
                    return Err(TesseraError::Corruption("owned index id without marker"));
                }
                SchemaRule::Constraint(ConstraintRule {
                    id,
                    name,
                    kind: ckind,
                    descriptor: decode_descriptor(&mut reader)?,
                    owned_index: has_owned.then_some(RecordId(owned_raw)),
                })
            }
            _ => return Err(TesseraError::Corruption("unknown schema rule kind")),
        };
        reader.finish()?;
        Ok(rule)
    }
}

fn encode_descriptor(descriptor: &SchemaDescriptor, out: &mut Vec<u8>) {
    match descriptor {
        SchemaDescriptor::Label(s) => {
            out.push(VARIANT_LABEL);
            out.push(encode_index_type(s.index_type));
            out.extend_from_slice(&s.label.0.to_be_bytes());
            put_props(out, &s.props);
            put_config(out, &s.config);
        }
        SchemaDescriptor::RelType(s) => {
            out.push(VARIANT_REL_TYPE);
            out.push(encode_index_type(s.index_type));
            out.extend_from_slice(&s.rel_type.0.to_be_bytes());
            put_props(out, &s.props);
            put_config(out, &s.config);
        }
        SchemaDescriptor::Fulltext(s) => {
            out.push(VARIANT_FULLTEXT);
            out.push(match s.entity {
                EntityKind::Node => 1,
                EntityKind::Relationship => 2,
            });
            out.extend_from_slice(&(s.tokens.len() as u16).to_be_bytes());
            for token in &s.tokens {
                out.extend_from_slice(&token.to_be_bytes());
            }
            put_props(out, &s.props);
            put_config(out, &s.config);
        }
    }
}

fn decode_descriptor(reader: &mut Reader<'_>) -> Result<SchemaDescriptor> {
    match reader.u8()? {
        VARIANT_LABEL => {
            let index_type = decode_index_type(reader.u8()?)?;
            let label = LabelId(reader.u32()?);
            let props = get_props(reader)?;
            let config = get_config(reader)?;
            Ok(SchemaDescriptor::Label(LabelSchema {
                label,
                props,
                index_type,
                config,
            }))
        }
        VARIANT_REL_TYPE => {
            let index_type = decode_index_type(reader.u8()?)?;
            let rel_type = RelTypeId(reader.u32()?);
            let props = get_props(reader)?;
            let config = get_config(reader)?;
            Ok(SchemaDescriptor::RelType(RelTypeSchema {
                rel_type,
                props,
                index_type,
                config,
            }))
        }
        VARIANT_FULLTEXT => {
            let entity = match reader.u8()? {
                1 => EntityKind::Node,
                2 => EntityKind::Relationship,
                _ => return Err(TesseraError::Corruption("unknown entity kind")),
            };
            let count = reader.u16()? as usize;
            let mut tokens: SmallVec<[u32; 2]> = SmallVec::with_capacity(count);
            for _ in 0..count {
                tokens.push(reader.u32()?);
            }
            if tokens.windows(2).any(|w| w[0] >= w[1]) {
                return Err(TesseraError::Corruption("fulltext tokens not sorted"));
            }
            let props = get_props(reader)?;
            let config = get_config(reader)?;
            Ok(SchemaDescriptor::Fulltext(FulltextSchema {
                entity,
                tokens,
                props,
                config,
            }))
        }
        _ => Err(TesseraError::Corruption("unknown descriptor variant")),
    }
}

fn encode_index_type(index_type: IndexType) -> u8 {
    match index_type {
        IndexType::Range => 1,
        IndexType::Fulltext => 2,
    }
}

fn decode_index_type(byte: u8) -> Result<IndexType> {
    match byte {
        1 => Ok(IndexType::Range),
        2 => Ok(IndexType::Fulltext),
        _ => Err(TesseraError::Corruption("unknown index type tag")),
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn put_props(out: &mut Vec<u8>, props: &[PropId]) {
    out.extend_from_slice(&(props.len() as u16).to_be_bytes());
    for prop in props {
        out.extend_from_slice(&prop.0.to_be_bytes());
    }
}

fn get_props(reader: &mut Reader<'_>) -> Result<PropList> {
    let count = reader.u16()? as usize;
    let mut props = PropList::with_capacity(count);
    for _ in 0..count {
        props.push(PropId(reader.u32()?));
    }
    Ok(props)
}

fn put_config(out: &mut Vec<u8>, config: &IndexConfig) {
    out.extend_from_slice(&(config.len() as u16).to_be_bytes());
    for (key, value) in config.iter() {
        put_str(out, key);
        match value {
            ConfigValue::Bool(v) => {
                out.push(1);
                out.push(*v as u8);
            }
            ConfigValue::Int(v) => {
                out.push(2);
                out.extend_from_slice(&v.to_be_bytes());
            }
            ConfigValue::Text(v) => {
                out.push(3);
                put_str(out, v);
            }
        }
    }
}

fn get_config(reader: &mut Reader<'_>) -> Result<IndexConfig> {
    let count = reader.u16()? as usize;
    let mut config = IndexConfig::empty();
    for _ in 0..count {
        let key = reader.str()?;
        let value = match reader.u8()? {
            1 => match reader.u8()? {
                0 => ConfigValue::Bool(false),
                1 => ConfigValue::Bool(true),
                _ => return Err(TesseraError::Corruption("boolean config out of range")),
            },
            2 => ConfigValue::Int(reader.u64()? as i64),
            3 => ConfigValue::Text(reader.str()?),
            _ => return Err(TesseraError::Corruption("unknown config value tag")),
        };
        config = config.with(key, value);
    }
    Ok(config)
}

struct Reader<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.src.len() {
            return Err(TesseraError::Corruption("schema rule payload truncated"));
        }
        let slice = &self.src[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("slice has 4 bytes")))
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("slice has 8 bytes")))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TesseraError::Corruption("schema rule string not valid UTF-8"))
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.src.len() {
            return Err(TesseraError::Corruption("schema rule payload has trailing bytes"));
        }
        Ok(())
    }
}
