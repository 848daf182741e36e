//! Record structs and their fixed-slot codecs.
//!
//! Every fixed record keeps its flags in byte 0 with `IN_USE` as bit 0, so a
//! store can test liveness without decoding the full slot. Decoding validates
//! structure strictly: unknown flag bits, non-zero reserved bytes, or a
//! pointer flag disagreeing with its pointer field are corruption, not data.

use smallvec::SmallVec;

use crate::types::{BlockId, LabelId, NodeId, PropId, RecordId, Result, TesseraError};

/// Bit 0 of every record's flags byte.
pub const FLAG_IN_USE: u8 = 0x01;

const TOKEN_FLAG_INTERNAL: u8 = 0x02;
const TOKEN_FLAG_HAS_NAME: u8 = 0x04;
const SCHEMA_FLAG_CONSTRAINT: u8 = 0x02;
const SCHEMA_FLAG_HAS_PAYLOAD: u8 = 0x04;

/// Returns whether the raw slot bytes are marked in use.
pub fn slot_in_use(src: &[u8]) -> bool {
    !src.is_empty() && src[0] & FLAG_IN_USE != 0
}

/// Codec binding a record struct to its fixed slot layout.
pub trait RecordFormat {
    /// The decoded record type.
    type Record: Clone + std::fmt::Debug;
    /// Width of one slot in bytes.
    const SLOT_SIZE: usize;
    /// Id carried by the record.
    fn id_of(record: &Self::Record) -> RecordId;
    /// Whether the record is marked in use.
    fn in_use(record: &Self::Record) -> bool;
    /// Encodes into a slot buffer of exactly [`Self::SLOT_SIZE`] bytes.
    fn encode(record: &Self::Record, dst: &mut [u8]) -> Result<()>;
    /// Decodes a slot buffer, validating structure.
    fn decode(id: RecordId, src: &[u8]) -> Result<Self::Record>;
}

fn check_width(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() != expected {
        return Err(TesseraError::Invalid("record slot width mismatch"));
    }
    Ok(())
}

/// Token record: maps a small integer id to a name chain.
///
/// Internal tokens are created by the engine itself and may carry no name;
/// that state is an explicit flag, never inferred from the pointer value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenRecord {
    /// Record id; doubles as the token id.
    pub id: RecordId,
    /// Liveness flag.
    pub in_use: bool,
    /// Set for engine-created placeholder tokens.
    pub internal: bool,
    /// Head of the name chain in the companion dynamic store.
    pub name_block: Option<BlockId>,
}

impl TokenRecord {
    /// An unused record image for the given id.
    pub fn unused(id: RecordId) -> Self {
        Self {
            id,
            in_use: false,
            internal: false,
            name_block: None,
        }
    }
}

/// Slot codec for [`TokenRecord`].
pub struct TokenRecordFormat;

impl RecordFormat for TokenRecordFormat {
    type Record = TokenRecord;
    const SLOT_SIZE: usize = 16;

    fn id_of(record: &TokenRecord) -> RecordId {
        record.id
    }

    fn in_use(record: &TokenRecord) -> bool {
        record.in_use
    }

    fn encode(record: &TokenRecord, dst: &mut [u8]) -> Result<()> {
        check_width(dst, Self::SLOT_SIZE)?;
        dst.fill(0);
        if !record.in_use {
            return Ok(());
        }
        let mut flags = FLAG_IN_USE;
        if record.internal {
            flags |= TOKEN_FLAG_INTERNAL;
        }
        if record.name_block.is_some() {
            flags |= TOKEN_FLAG_HAS_NAME;
        }
        dst[0] = flags;
        dst[8..16].copy_from_slice(&record.name_block.map_or(0, |b| b.0).to_be_bytes());
        Ok(())
    }

    fn decode(id: RecordId, src: &[u8]) -> Result<TokenRecord> {
        check_width(src, Self::SLOT_SIZE)?;
        let flags = src[0];
        if flags & FLAG_IN_USE == 0 {
            if src.iter().any(|&b| b != 0) {
                return Err(TesseraError::Corruption("unused token slot not zeroed"));
            }
            return Ok(TokenRecord::unused(id));
        }
        if flags & !(FLAG_IN_USE | TOKEN_FLAG_INTERNAL | TOKEN_FLAG_HAS_NAME) != 0 {
            return Err(TesseraError::Corruption("unknown token record flags"));
        }
        if src[1..8] != [0; 7] {
            return Err(TesseraError::Corruption("token record reserved bytes non-zero"));
        }
        let name_raw = u64::from_be_bytes(src[8..16].try_into().expect("slice has 8 bytes"));
        let has_name = flags & TOKEN_FLAG_HAS_NAME != 0;
        if has_name && name_raw == 0 {
            return Err(TesseraError::Corruption("token name flag set without chain"));
        }
        if !has_name && name_raw != 0 {
            return Err(TesseraError::Corruption("token name chain without flag"));
        }
        Ok(TokenRecord {
            id,
            in_use: true,
            internal: flags & TOKEN_FLAG_INTERNAL != 0,
            name_block: has_name.then_some(BlockId(name_raw)),
        })
    }
}

/// Schema record: points at the serialized rule payload chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchemaRecord {
    /// Record id; doubles as the schema rule id.
    pub id: RecordId,
    /// Liveness flag.
    pub in_use: bool,
    /// Set when the rule describes a constraint.
    pub constraint: bool,
    /// Transient marker for records produced by the currently-applying
    /// transaction. Never persisted; cleared on commit.
    pub created: bool,
    /// Head of the payload chain in the companion dynamic store.
    pub payload_block: Option<BlockId>,
}

impl SchemaRecord {
    /// An unused record image for the given id.
    pub fn unused(id: RecordId) -> Self {
        Self {
            id,
            in_use: false,
            constraint: false,
            created: false,
            payload_block: None,
        }
    }

    /// An in-use image pointing at `payload_block`.
    pub fn in_use(id: RecordId, payload_block: BlockId) -> Self {
        Self {
            id,
            in_use: true,
            constraint: false,
            created: false,
            payload_block: Some(payload_block),
        }
    }

    /// Returns a copy with the transient created marker set.
    pub fn with_created(mut self) -> Self {
        self.created = true;
        self
    }

    /// Returns a copy with the constraint flag set.
    pub fn with_constraint(mut self) -> Self {
        self.constraint = true;
        self
    }
}

/// Slot codec for [`SchemaRecord`]. The `created` marker is not part of the
/// on-disk image.
pub struct SchemaRecordFormat;

impl RecordFormat for SchemaRecordFormat {
    type Record = SchemaRecord;
    const SLOT_SIZE: usize = 16;

    fn id_of(record: &SchemaRecord) -> RecordId {
        record.id
    }

    fn in_use(record: &SchemaRecord) -> bool {
        record.in_use
    }

    fn encode(record: &SchemaRecord, dst: &mut [u8]) -> Result<()> {
        check_width(dst, Self::SLOT_SIZE)?;
        dst.fill(0);
        if !record.in_use {
            return Ok(());
        }
        let mut flags = FLAG_IN_USE;
        if record.constraint {
            flags |= SCHEMA_FLAG_CONSTRAINT;
        }
        if record.payload_block.is_some() {
            flags |= SCHEMA_FLAG_HAS_PAYLOAD;
        }
        dst[0] = flags;
        dst[8..16].copy_from_slice(&record.payload_block.map_or(0, |b| b.0).to_be_bytes());
        Ok(())
    }

    fn decode(id: RecordId, src: &[u8]) -> Result<SchemaRecord> {
        check_width(src, Self::SLOT_SIZE)?;
        let flags = src[0];
        if flags & FLAG_IN_USE == 0 {
            if src.iter().any(|&b| b != 0) {
                return Err(TesseraError::Corruption("unused schema slot not zeroed"));
            }
            return Ok(SchemaRecord::unused(id));
        }
        if flags & !(FLAG_IN_USE | SCHEMA_FLAG_CONSTRAINT | SCHEMA_FLAG_HAS_PAYLOAD) != 0 {
            return Err(TesseraError::Corruption("unknown schema record flags"));
        }
        if src[1..8] != [0; 7] {
            return Err(TesseraError::Corruption("schema record reserved bytes non-zero"));
        }
        let payload_raw = u64::from_be_bytes(src[8..16].try_into().expect("slice has 8 bytes"));
        let has_payload = flags & SCHEMA_FLAG_HAS_PAYLOAD != 0;
        if has_payload && payload_raw == 0 {
            return Err(TesseraError::Corruption("schema payload flag set without chain"));
        }
        if !has_payload && payload_raw != 0 {
            return Err(TesseraError::Corruption("schema payload chain without flag"));
        }
        Ok(SchemaRecord {
            id,
            in_use: true,
            constraint: flags & SCHEMA_FLAG_CONSTRAINT != 0,
            created: false,
            payload_block: has_payload.then_some(BlockId(payload_raw)),
        })
    }
}

/// Maximum number of inline label ids per node record.
pub const NODE_INLINE_LABELS: usize = 5;

/// Node entity record with inline sorted label ids.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRecord {
    /// Record id.
    pub id: RecordId,
    /// Liveness flag.
    pub in_use: bool,
    /// Sorted, duplicate-free label ids.
    pub labels: SmallVec<[LabelId; NODE_INLINE_LABELS]>,
}

impl NodeRecord {
    /// An unused record image for the given id.
    pub fn unused(id: RecordId) -> Self {
        Self {
            id,
            in_use: false,
            labels: SmallVec::new(),
        }
    }

    /// An in-use image with the given labels, sorted and deduplicated.
    pub fn with_labels(id: RecordId, labels: &[LabelId]) -> Self {
        let mut sorted: SmallVec<[LabelId; NODE_INLINE_LABELS]> = labels.into();
        sorted.sort_unstable();
        sorted.dedup();
        Self {
            id,
            in_use: true,
            labels: sorted,
        }
    }

    /// The node id this record describes.
    pub fn node_id(&self) -> NodeId {
        NodeId(self.id.0)
    }
}

/// Slot codec for [`NodeRecord`].
pub struct NodeRecordFormat;

impl RecordFormat for NodeRecordFormat {
    type Record = NodeRecord;
    const SLOT_SIZE: usize = 24;

    fn id_of(record: &NodeRecord) -> RecordId {
        record.id
    }

    fn in_use(record: &NodeRecord) -> bool {
        record.in_use
    }

    fn encode(record: &NodeRecord, dst: &mut [u8]) -> Result<()> {
        check_width(dst, Self::SLOT_SIZE)?;
        dst.fill(0);
        if !record.in_use {
            return Ok(());
        }
        if record.labels.len() > NODE_INLINE_LABELS {
            return Err(TesseraError::Invalid("too many inline labels"));
        }
        if record.labels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TesseraError::Invalid("node labels must be sorted and unique"));
        }
        dst[0] = FLAG_IN_USE;
        dst[1] = record.labels.len() as u8;
        for (i, label) in record.labels.iter().enumerate() {
            let at = 4 + i * 4;
            dst[at..at + 4].copy_from_slice(&label.0.to_be_bytes());
        }
        Ok(())
    }

    fn decode(id: RecordId, src: &[u8]) -> Result<NodeRecord> {
        check_width(src, Self::SLOT_SIZE)?;
        let flags = src[0];
        if flags & FLAG_IN_USE == 0 {
            if src.iter().any(|&b| b != 0) {
                return Err(TesseraError::Corruption("unused node slot not zeroed"));
            }
            return Ok(NodeRecord::unused(id));
        }
        if flags != FLAG_IN_USE {
            return Err(TesseraError::Corruption("unknown node record flags"));
        }
        let count = src[1] as usize;
        if count > NODE_INLINE_LABELS {
            return Err(TesseraError::Corruption("node label count out of range"));
        }
        if src[2..4] != [0; 2] {
            return Err(TesseraError::Corruption("node record reserved bytes non-zero"));
        }
        let mut labels: SmallVec<[LabelId; NODE_INLINE_LABELS]> = SmallVec::new();
        for i in 0..NODE_INLINE_LABELS {
            let at = 4 + i * 4;
            let raw = u32::from_be_bytes(src[at..at + 4].try_into().expect("slice has 4 bytes"));
            if i < count {
                labels.push(LabelId(raw));
            } else if raw != 0 {
                return Err(TesseraError::Corruption("node label slot beyond count non-zero"));
            }
        }
        if labels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TesseraError::Corruption("node labels not sorted"));
        }
        Ok(NodeRecord {
            id,
            in_use: true,
            labels,
        })
    }
}

/// Inline scalar property value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PropValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
}

impl PropValue {
    fn type_tag(self) -> u8 {
        match self {
            PropValue::Bool(_) => 1,
            PropValue::Int(_) => 2,
            PropValue::Float(_) => 3,
        }
    }

    fn bits(self) -> u64 {
        match self {
            PropValue::Bool(v) => v as u64,
            PropValue::Int(v) => v as u64,
            PropValue::Float(v) => v.to_bits(),
        }
    }

    fn from_parts(tag: u8, bits: u64) -> Result<Self> {
        match tag {
            1 => match bits {
                0 => Ok(PropValue::Bool(false)),
                1 => Ok(PropValue::Bool(true)),
                _ => Err(TesseraError::Corruption("boolean property bits out of range")),
            },
            2 => Ok(PropValue::Int(bits as i64)),
            3 => Ok(PropValue::Float(f64::from_bits(bits))),
            _ => Err(TesseraError::Corruption("unknown property value type tag")),
        }
    }
}

/// Property record: one key/value pair owned by a node.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyRecord {
    /// Record id.
    pub id: RecordId,
    /// Liveness flag.
    pub in_use: bool,
    /// Owning node.
    pub node: NodeId,
    /// Property key token.
    pub key: PropId,
    /// Inline value; meaningful only while in use.
    pub value: PropValue,
}

impl PropertyRecord {
    /// An unused record image for the given id.
    pub fn unused(id: RecordId) -> Self {
        Self {
            id,
            in_use: false,
            node: NodeId(0),
            key: PropId(0),
            value: PropValue::Int(0),
        }
    }

    /// An in-use image for `(node, key) = value`.
    pub fn new(id: RecordId, node: NodeId, key: PropId, value: PropValue) -> Self {
        Self {
            id,
            in_use: true,
            node,
            key,
            value,
        }
    }
}

/// Slot codec for [`PropertyRecord`].
pub struct PropertyRecordFormat;

impl RecordFormat for PropertyRecordFormat {
    type Record = PropertyRecord;
    const SLOT_SIZE: usize = 24;

    fn id_of(record: &PropertyRecord) -> RecordId {
        record.id
    }

    fn in_use(record: &PropertyRecord) -> bool {
        record.in_use
    }

    fn encode(record: &PropertyRecord, dst: &mut [u8]) -> Result<()> {
        check_width(dst, Self::SLOT_SIZE)?;
        dst.fill(0);
        if !record.in_use {
            return Ok(());
        }
        dst[0] = FLAG_IN_USE;
        dst[1] = record.value.type_tag();
        dst[4..8].copy_from_slice(&record.key.0.to_be_bytes());
        dst[8..16].copy_from_slice(&record.node.0.to_be_bytes());
        dst[16..24].copy_from_slice(&record.value.bits().to_be_bytes());
        Ok(())
    }

    fn decode(id: RecordId, src: &[u8]) -> Result<PropertyRecord> {
        check_width(src, Self::SLOT_SIZE)?;
        let flags = src[0];
        if flags & FLAG_IN_USE == 0 {
            if src.iter().any(|&b| b != 0) {
                return Err(TesseraError::Corruption("unused property slot not zeroed"));
            }
            return Ok(PropertyRecord::unused(id));
        }
        if flags != FLAG_IN_USE {
            return Err(TesseraError::Corruption("unknown property record flags"));
        }
        if src[2..4] != [0; 2] {
            return Err(TesseraError::Corruption("property record reserved bytes non-zero"));
        }
        let key = u32::from_be_bytes(src[4..8].try_into().expect("slice has 4 bytes"));
        let node = u64::from_be_bytes(src[8..16].try_into().expect("slice has 8 bytes"));
        let bits = u64::from_be_bytes(src[16..24].try_into().expect("slice has 8 bytes"));
        Ok(PropertyRecord {
            id,
            in_use: true,
            node: NodeId(node),
            key: PropId(key),
            value: PropValue::from_parts(src[1], bits)?,
        })
    }
}

/// One block image of a dynamic-store chain.
///
/// Commands carry these so replay can rebuild a chain without consulting
/// prior store state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DynamicRecord {
    /// Block id.
    pub id: BlockId,
    /// Liveness flag.
    pub in_use: bool,
    /// Whether this is the final block of its chain.
    pub last: bool,
    /// Next block in the chain; must be the zero sentinel on last blocks.
    pub next: BlockId,
    /// Payload slice held by this block.
    pub payload: Vec<u8>,
}

impl DynamicRecord {
    /// Validates internal consistency of the block image.
    pub fn check(&self) -> Result<()> {
        if self.in_use && self.id.0 == 0 {
            return Err(TesseraError::Corruption("dynamic block id zero"));
        }
        if self.last && self.next.0 != 0 {
            return Err(TesseraError::Corruption("last dynamic block has next pointer"));
        }
        if self.in_use && !self.last && self.next.0 == 0 {
            return Err(TesseraError::Corruption("non-last dynamic block lacks next pointer"));
        }
        Ok(())
    }
}
