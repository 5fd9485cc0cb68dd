//! Binary story format
//!
//! All integers are little-endian. Layout:
//!
//! ```text
//! magic "INKB" | u32 version
//! strings:       u32 count, { u32 len, utf8 bytes }
//! lists:         u32 count, { u32 name, u32 flags, { u32 name, i32 value } }
//! list literals: u32 count, { u32 origins, { u16 list }, u32 items, { u16 list, u16 flag } }
//! globals:       u32 count, { u32 name, value }
//! containers:    u32 count, { u32 name | u32::MAX, u32 start, u32 end, u8 flags }
//! instructions:  u32 count, { u8 command, u8 flag, u32 payload }
//! ```
//!
//! A value is a kind byte followed by its payload (none and bool carry one
//! byte or nothing, everything else four bytes).

use crate::error::{InkError, Result};
use crate::types::command::{Command, Instruction};
use crate::types::list::ListItemId;

pub const MAGIC: &[u8; 4] = b"INKB";
pub const FORMAT_VERSION: u32 = 1;
pub const NO_NAME: u32 = u32::MAX;

/// Container flag bits.
pub mod container_flags {
    pub const TRACK_VISITS: u8 = 1 << 0;
    pub const TRACK_TURNS: u8 = 1 << 1;
    /// Knot or stitch: entering it resets knot tags.
    pub const KNOT: u8 = 1 << 2;
    /// Callable ink function, also used as external fallback.
    pub const FUNCTION: u8 = 1 << 3;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawList {
    pub name: u32,
    pub flags: Vec<(u32, i32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawListLiteral {
    pub origins: Vec<u16>,
    pub items: Vec<ListItemId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    None,
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(u32),
    List(u32),
    Divert(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawContainer {
    pub name: u32,
    pub start: u32,
    pub end: u32,
    pub flags: u8,
}

/// Undecoded tables, exactly as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStory {
    pub strings: Vec<String>,
    pub lists: Vec<RawList>,
    pub list_literals: Vec<RawListLiteral>,
    pub globals: Vec<(u32, RawValue)>,
    pub containers: Vec<RawContainer>,
    pub instructions: Vec<Instruction>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.bytes.len());
        let Some(end) = end else {
            return Err(InkError::invalid_format(format!(
                "unexpected end of data at offset {}",
                self.pos
            )));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    /// Reads a count and sanity-checks it against the remaining bytes.
    fn count(&mut self, min_item_len: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        let remaining = self.bytes.len() - self.pos;
        if count.saturating_mul(min_item_len) > remaining {
            return Err(InkError::invalid_format(format!(
                "table of {count} entries exceeds remaining {remaining} bytes"
            )));
        }
        Ok(count)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.count(1)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| InkError::invalid_format(format!("invalid utf-8 in string table: {e}")))
    }

    fn value(&mut self) -> Result<RawValue> {
        Ok(match self.u8()? {
            0 => RawValue::None,
            1 => RawValue::Bool(self.u8()? != 0),
            2 => RawValue::Int(self.i32()?),
            3 => RawValue::Float(f32::from_bits(self.u32()?)),
            4 => RawValue::Str(self.u32()?),
            5 => RawValue::List(self.u32()?),
            6 => RawValue::Divert(self.u32()?),
            kind => {
                return Err(InkError::invalid_format(format!("unknown value kind {kind}")));
            }
        })
    }
}

/// Parses the header and raw tables. Cross references are checked later.
pub fn decode(bytes: &[u8]) -> Result<RawStory> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(4).ok() != Some(MAGIC.as_slice()) {
        return Err(InkError::invalid_format("missing INKB magic"));
    }
    let version = reader.u32()?;
    if version > FORMAT_VERSION {
        return Err(InkError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    if version == 0 {
        return Err(InkError::invalid_format("format version 0 is not valid"));
    }

    let mut story = RawStory::default();

    let count = reader.count(4)?;
    for _ in 0..count {
        story.strings.push(reader.string()?);
    }

    let count = reader.count(8)?;
    for _ in 0..count {
        let name = reader.u32()?;
        let flag_count = reader.count(8)?;
        let mut flags = Vec::with_capacity(flag_count);
        for _ in 0..flag_count {
            let flag_name = reader.u32()?;
            let value = reader.i32()?;
            flags.push((flag_name, value));
        }
        story.lists.push(RawList { name, flags });
    }

    let count = reader.count(8)?;
    for _ in 0..count {
        let origin_count = reader.count(2)?;
        let mut origins = Vec::with_capacity(origin_count);
        for _ in 0..origin_count {
            origins.push(reader.u16()?);
        }
        let item_count = reader.count(4)?;
        let mut items = Vec::with_capacity(item_count);
        for _ in 0..item_count {
            let list = reader.u16()?;
            let flag = reader.u16()?;
            items.push(ListItemId { list, flag });
        }
        story.list_literals.push(RawListLiteral { origins, items });
    }

    let count = reader.count(5)?;
    for _ in 0..count {
        let name = reader.u32()?;
        let value = reader.value()?;
        story.globals.push((name, value));
    }

    let count = reader.count(13)?;
    for _ in 0..count {
        story.containers.push(RawContainer {
            name: reader.u32()?,
            start: reader.u32()?,
            end: reader.u32()?,
            flags: reader.u8()?,
        });
    }

    let count = reader.count(Instruction::ENCODED_LEN)?;
    for index in 0..count {
        let byte = reader.u8()?;
        let command = Command::try_from(byte).map_err(|byte| {
            InkError::invalid_format(format!("unknown command {byte} at instruction {index}"))
        })?;
        let flag = reader.u8()?;
        let payload = reader.u32()?;
        story.instructions.push(Instruction::new(command, flag, payload));
    }

    if reader.pos != bytes.len() {
        return Err(InkError::invalid_format(format!(
            "{} trailing bytes after instruction table",
            bytes.len() - reader.pos
        )));
    }
    Ok(story)
}

#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn len(&mut self, len: usize) {
        self.u32(len as u32);
    }

    fn value(&mut self, value: RawValue) {
        match value {
            RawValue::None => self.u8(0),
            RawValue::Bool(b) => {
                self.u8(1);
                self.u8(b as u8);
            }
            RawValue::Int(i) => {
                self.u8(2);
                self.u32(i as u32);
            }
            RawValue::Float(f) => {
                self.u8(3);
                self.u32(f.to_bits());
            }
            RawValue::Str(s) => {
                self.u8(4);
                self.u32(s);
            }
            RawValue::List(l) => {
                self.u8(5);
                self.u32(l);
            }
            RawValue::Divert(d) => {
                self.u8(6);
                self.u32(d);
            }
        }
    }
}

pub fn encode(story: &RawStory) -> Vec<u8> {
    let mut w = Writer::default();
    w.bytes.extend_from_slice(MAGIC);
    w.u32(FORMAT_VERSION);

    w.len(story.strings.len());
    for string in &story.strings {
        w.len(string.len());
        w.bytes.extend_from_slice(string.as_bytes());
    }

    w.len(story.lists.len());
    for list in &story.lists {
        w.u32(list.name);
        w.len(list.flags.len());
        for (flag_name, value) in &list.flags {
            w.u32(*flag_name);
            w.u32(*value as u32);
        }
    }

    w.len(story.list_literals.len());
    for literal in &story.list_literals {
        w.len(literal.origins.len());
        for origin in &literal.origins {
            w.u16(*origin);
        }
        w.len(literal.items.len());
        for item in &literal.items {
            w.u16(item.list);
            w.u16(item.flag);
        }
    }

    w.len(story.globals.len());
    for (name, value) in &story.globals {
        w.u32(*name);
        w.value(*value);
    }

    w.len(story.containers.len());
    for container in &story.containers {
        w.u32(container.name);
        w.u32(container.start);
        w.u32(container.end);
        w.u8(container.flags);
    }

    w.len(story.instructions.len());
    for instruction in &story.instructions {
        w.u8(instruction.command as u8);
        w.u8(instruction.flag);
        w.u32(instruction.payload);
    }
    w.bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_magic() {
        match decode(b"NOPE\x01\x00\x00\x00") {
            Err(InkError::InvalidStoryFormat { .. }) => {}
            other => panic!("Expected InvalidStoryFormat, got {other:?}"),
        }
    }

    #[test]
    fn rejects_newer_versions() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        match decode(&bytes) {
            Err(InkError::UnsupportedVersion { found, supported }) => {
                assert_eq!(found, FORMAT_VERSION + 1);
                assert_eq!(supported, FORMAT_VERSION);
            }
            other => panic!("Expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_tables() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(InkError::InvalidStoryFormat { .. })));
    }

    #[test]
    fn encodes_what_it_decodes() {
        let story = RawStory {
            strings: vec!["hello".to_string(), "x".to_string()],
            globals: vec![(1, RawValue::Int(3))],
            instructions: vec![
                Instruction::new(Command::Str, 0, 0),
                Instruction::new(Command::Done, 0, 0),
            ],
            ..RawStory::default()
        };
        let decoded = decode(&encode(&story)).unwrap();
        assert_eq!(decoded, story);
    }
}
