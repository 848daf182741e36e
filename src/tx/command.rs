//! Transaction log commands.
//!
//! A command carries the before and after images of one record, plus, for
//! schema commands, the parsed rule and the payload block images. Commands
//! are transient: built per transaction, serialized to the log, consumed by
//! appliers, then discarded. They hold no references into the stores.
//!
//! The wire form is self-describing: a kind byte, the record id, the before
//! image, then the after image, then kind-specific trailers. A schema
//! command always carries the full rule payload — on a drop that is the rule
//! that existed before, so replay can still hand downstream appliers the
//! descriptor being dropped rather than an empty shell.

use crate::schema::rule::SchemaRule;
use crate::storage::record::{
    DynamicRecord, NodeRecord, NodeRecordFormat, PropertyRecord, PropertyRecordFormat,
    RecordFormat, SchemaRecord, SchemaRecordFormat, TokenRecord, TokenRecordFormat,
};
use crate::types::{BlockId, RecordId, Result, TesseraError};

const KIND_LABEL_TOKEN: u8 = 1;
const KIND_PROP_KEY_TOKEN: u8 = 2;
const KIND_REL_TYPE_TOKEN: u8 = 3;
const KIND_SCHEMA: u8 = 4;
const KIND_NODE: u8 = 5;
const KIND_PROPERTY: u8 = 6;

const DYN_FLAG_IN_USE: u8 = 0x01;
const DYN_FLAG_LAST: u8 = 0x02;

// the created marker is transaction state, not store state; the slot codec
// drops it, so the wire form carries it alongside the images
const CREATED_BEFORE: u8 = 0x01;
const CREATED_AFTER: u8 = 0x02;

/// Before/after images of one token record plus its name block images.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenCommand {
    /// Image before the transaction.
    pub before: TokenRecord,
    /// Image after the transaction.
    pub after: TokenRecord,
    /// Name chain blocks written by the transaction.
    pub name_records: Vec<DynamicRecord>,
}

impl TokenCommand {
    /// Builds a command, checking that both images share one id.
    pub fn new(
        before: TokenRecord,
        after: TokenRecord,
        name_records: Vec<DynamicRecord>,
    ) -> Result<Self> {
        if before.id != after.id {
            return Err(TesseraError::Invalid("command images must share one id"));
        }
        Ok(Self {
            before,
            after,
            name_records,
        })
    }
}

/// Before/after images of one schema record, the rule valid for the
/// after-image (or, on a drop, the rule that existed before), and the
/// payload block images written by the transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaCommand {
    /// Image before the transaction.
    pub before: SchemaRecord,
    /// Image after the transaction.
    pub after: SchemaRecord,
    /// The parsed rule this command concerns.
    pub rule: SchemaRule,
    /// Payload chain blocks written by the transaction; empty on drops.
    pub payload_records: Vec<DynamicRecord>,
}

impl SchemaCommand {
    /// Builds a command, checking id consistency across images and rule.
    pub fn new(
        before: SchemaRecord,
        after: SchemaRecord,
        rule: SchemaRule,
        payload_records: Vec<DynamicRecord>,
    ) -> Result<Self> {
        if before.id != after.id {
            return Err(TesseraError::Invalid("command images must share one id"));
        }
        if rule.id() != after.id {
            return Err(TesseraError::Invalid("schema rule id must match the record id"));
        }
        Ok(Self {
            before,
            after,
            rule,
            payload_records,
        })
    }
}

/// Before/after images of one node record.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeCommand {
    /// Image before the transaction.
    pub before: NodeRecord,
    /// Image after the transaction.
    pub after: NodeRecord,
}

impl NodeCommand {
    /// Builds a command, checking that both images share one id.
    pub fn new(before: NodeRecord, after: NodeRecord) -> Result<Self> {
        if before.id != after.id {
            return Err(TesseraError::Invalid("command images must share one id"));
        }
        Ok(Self { before, after })
    }
}

/// Before/after images of one property record.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyCommand {
    /// Image before the transaction.
    pub before: PropertyRecord,
    /// Image after the transaction.
    pub after: PropertyRecord,
}

impl PropertyCommand {
    /// Builds a command, checking that both images share one id.
    pub fn new(before: PropertyRecord, after: PropertyRecord) -> Result<Self> {
        if before.id != after.id {
            return Err(TesseraError::Invalid("command images must share one id"));
        }
        Ok(Self { before, after })
    }
}

/// One decoded log command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Label token mutation.
    LabelToken(TokenCommand),
    /// Property key token mutation.
    PropertyKeyToken(TokenCommand),
    /// Relationship type token mutation.
    RelTypeToken(TokenCommand),
    /// Schema rule mutation.
    Schema(SchemaCommand),
    /// Node record mutation.
    Node(NodeCommand),
    /// Property record mutation.
    Property(PropertyCommand),
}

impl Command {
    /// Id of the record this command mutates.
    pub fn id(&self) -> RecordId {
        match self {
            Command::LabelToken(c) | Command::PropertyKeyToken(c) | Command::RelTypeToken(c) => {
                c.after.id
            }
            Command::Schema(c) => c.after.id,
            Command::Node(c) => c.after.id,
            Command::Property(c) => c.after.id,
        }
    }

    /// Serializes the command onto `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Command::LabelToken(c) => encode_token(KIND_LABEL_TOKEN, c, out),
            Command::PropertyKeyToken(c) => encode_token(KIND_PROP_KEY_TOKEN, c, out),
            Command::RelTypeToken(c) => encode_token(KIND_REL_TYPE_TOKEN, c, out),
            Command::Schema(c) => encode_schema(c, out),
            Command::Node(c) => {
                out.push(KIND_NODE);
                out.extend_from_slice(&c.after.id.0.to_be_bytes());
                put_image::<NodeRecordFormat>(&c.before, out)?;
                put_image::<NodeRecordFormat>(&c.after, out)?;
                Ok(())
            }
            Command::Property(c) => {
                out.push(KIND_PROPERTY);
                out.extend_from_slice(&c.after.id.0.to_be_bytes());
                put_image::<PropertyRecordFormat>(&c.before, out)?;
                put_image::<PropertyRecordFormat>(&c.after, out)?;
                Ok(())
            }
        }
    }

    /// Serializes the command into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Decodes one command from the front of `src`, returning it along with
    /// the number of bytes consumed.
    pub fn decode(src: &[u8]) -> Result<(Command, usize)> {
        let mut reader = Reader::new(src);
        let kind = reader.u8()?;
        let id = RecordId(reader.u64()?);
        let command = match kind {
            KIND_LABEL_TOKEN => Command::LabelToken(decode_token(id, &mut reader)?),
            KIND_PROP_KEY_TOKEN => Command::PropertyKeyToken(decode_token(id, &mut reader)?),
            KIND_REL_TYPE_TOKEN => Command::RelTypeToken(decode_token(id, &mut reader)?),
            KIND_SCHEMA => {
                let mut before = get_image::<SchemaRecordFormat>(id, &mut reader)?;
                let mut after = get_image::<SchemaRecordFormat>(id, &mut reader)?;
                let created = reader.u8()?;
                if created & !(CREATED_BEFORE | CREATED_AFTER) != 0 {
                    return Err(TesseraError::Corruption("unknown created marker bits"));
                }
                before.created = created & CREATED_BEFORE != 0;
                after.created = created & CREATED_AFTER != 0;
                let count = reader.u16()? as usize;
                let mut payload_records = Vec::with_capacity(count);
                for _ in 0..count {
                    payload_records.push(get_dynamic(&mut reader)?);
                }
                let rule_len = reader.u32()? as usize;
                let rule = SchemaRule::decode(reader.take(rule_len)?)?;
                Command::Schema(SchemaCommand::new(before, after, rule, payload_records)?)
            }
            KIND_NODE => {
                let before = get_image::<NodeRecordFormat>(id, &mut reader)?;
                let after = get_image::<NodeRecordFormat>(id, &mut reader)?;
                Command::Node(NodeCommand::new(before, after)?)
            }
            KIND_PROPERTY => {
                let before = get_image::<PropertyRecordFormat>(id, &mut reader)?;
                let after = get_image::<PropertyRecordFormat>(id, &mut reader)?;
                Command::Property(PropertyCommand::new(before, after)?)
            }
            _ => return Err(TesseraError::Corruption("unknown command kind")),
        };
        Ok((command, reader.pos))
    }
}

/// Serializes a whole transaction's command list.
pub fn encode_commands(commands: &[Command]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&(commands.len() as u32).to_be_bytes());
    for command in commands {
        command.encode(&mut out)?;
    }
    Ok(out)
}

/// Decodes a whole transaction's command list.
pub fn decode_commands(src: &[u8]) -> Result<Vec<Command>> {
    if src.len() < 4 {
        return Err(TesseraError::Corruption("command list truncated"));
    }
    let count = u32::from_be_bytes(src[..4].try_into().expect("slice has 4 bytes")) as usize;
    let mut commands = Vec::with_capacity(count);
    let mut pos = 4;
    for _ in 0..count {
        let (command, used) = Command::decode(&src[pos..])?;
        commands.push(command);
        pos += used;
    }
    if pos != src.len() {
        return Err(TesseraError::Corruption("command list has trailing bytes"));
    }
    Ok(commands)
}

fn encode_token(kind: u8, command: &TokenCommand, out: &mut Vec<u8>) -> Result<()> {
    out.push(kind);
    out.extend_from_slice(&command.after.id.0.to_be_bytes());
    put_image::<TokenRecordFormat>(&command.before, out)?;
    put_image::<TokenRecordFormat>(&command.after, out)?;
    put_dynamic_list(&command.name_records, out)
}

fn encode_schema(command: &SchemaCommand, out: &mut Vec<u8>) -> Result<()> {
    out.push(KIND_SCHEMA);
    out.extend_from_slice(&command.after.id.0.to_be_bytes());
    put_image::<SchemaRecordFormat>(&command.before, out)?;
    put_image::<SchemaRecordFormat>(&command.after, out)?;
    let mut created = 0u8;
    if command.before.created {
        created |= CREATED_BEFORE;
    }
    if command.after.created {
        created |= CREATED_AFTER;
    }
    out.push(created);
    put_dynamic_list(&command.payload_records, out)?;
    let rule_bytes = command.rule.to_bytes();
    out.extend_from_slice(&(rule_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&rule_bytes);
    Ok(())
}

fn decode_token(id: RecordId, reader: &mut Reader<'_>) -> Result<TokenCommand> {
    let before = get_image::<TokenRecordFormat>(id, reader)?;
    let after = get_image::<TokenRecordFormat>(id, reader)?;
    let count = reader.u16()? as usize;
    let mut name_records = Vec::with_capacity(count);
    for _ in 0..count {
        name_records.push(get_dynamic(reader)?);
    }
    TokenCommand::new(before, after, name_records)
}

fn put_image<F: RecordFormat>(record: &F::Record, out: &mut Vec<u8>) -> Result<()> {
    let mut buf = vec![0u8; F::SLOT_SIZE];
    F::encode(record, &mut buf)?;
    out.extend_from_slice(&buf);
    Ok(())
}

fn get_image<F: RecordFormat>(id: RecordId, reader: &mut Reader<'_>) -> Result<F::Record> {
    let bytes = reader.take(F::SLOT_SIZE)?;
    F::decode(id, bytes)
}

fn put_dynamic_list(records: &[DynamicRecord], out: &mut Vec<u8>) -> Result<()> {
    if records.len() > u16::MAX as usize {
        return Err(TesseraError::Invalid("too many dynamic records in command"));
    }
    out.extend_from_slice(&(records.len() as u16).to_be_bytes());
    for record in records {
        record.check()?;
        out.extend_from_slice(&record.id.0.to_be_bytes());
        let mut flags = 0u8;
        if record.in_use {
            flags |= DYN_FLAG_IN_USE;
        }
        if record.last {
            flags |= DYN_FLAG_LAST;
        }
        out.push(flags);
        out.extend_from_slice(&record.next.0.to_be_bytes());
        out.extend_from_slice(&(record.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&record.payload);
    }
    Ok(())
}

fn get_dynamic(reader: &mut Reader<'_>) -> Result<DynamicRecord> {
    let id = BlockId(reader.u64()?);
    let flags = reader.u8()?;
    if flags & !(DYN_FLAG_IN_USE | DYN_FLAG_LAST) != 0 {
        return Err(TesseraError::Corruption("unknown dynamic record flags"));
    }
    let next = BlockId(reader.u64()?);
    let len = reader.u16()? as usize;
    let payload = reader.take(len)?.to_vec();
    let record = DynamicRecord {
        id,
        in_use: flags & DYN_FLAG_IN_USE != 0,
        last: flags & DYN_FLAG_LAST != 0,
        next,
        payload,
    };
    record.check()?;
    Ok(record)
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
            return Err(TesseraError::Corruption("command truncated"));
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
}
