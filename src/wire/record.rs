//! The 22-byte record message header, field entries, and op entries described in §6.
//! `info3` bit layout follows the teacher's `bitflags!`-based wire flag modeling
//! (`cmap::conn::wire::reply::ResponseFlags`).

use bitflags::bitflags;

use crate::error::{Error, Result};

pub const RECORD_HEADER_LEN: usize = 22;

bitflags! {
    /// The `info3` byte at offset 3 of the record header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Info3: u8 {
        /// Ends a multi-record response.
        const LAST = 0b0000_0001;
        /// Per-partition terminator, meaningful only for scan/query.
        const PARTITION_DONE = 0b0000_0010;
    }
}

/// A parsed 22-byte record message header.
#[derive(Clone, Copy, Debug)]
pub struct RecordHeader {
    pub result_code: u8,
    pub generation: u32,
    pub expiration: u32,
    pub info3: Info3,
    pub field_count: u16,
    pub op_count: u16,
}

impl RecordHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(Error::internal(format!(
                "record header requires {RECORD_HEADER_LEN} bytes, got {}",
                buf.len()
            )));
        }
        Ok(Self {
            info3: Info3::from_bits_truncate(buf[3]),
            result_code: buf[5],
            generation: u32::from_be_bytes(buf[6..10].try_into().unwrap()),
            expiration: u32::from_be_bytes(buf[10..14].try_into().unwrap()),
            field_count: u16::from_be_bytes(buf[18..20].try_into().unwrap()),
            op_count: u16::from_be_bytes(buf[20..22].try_into().unwrap()),
        })
    }

    pub fn is_last(&self) -> bool {
        self.info3.contains(Info3::LAST)
    }

    pub fn is_partition_done(&self) -> bool {
        self.info3.contains(Info3::PARTITION_DONE)
    }

    /// When `is_partition_done`, the `generation` field is overloaded to carry the
    /// partition id per §4.8.
    pub fn partition_id(&self) -> u16 {
        (self.generation & 0xffff) as u16
    }
}

/// Field entry types the core inspects (§6); others round-trip opaque.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    DigestRipe,
    Namespace,
    Table,
    RecordVersion,
    MrtDeadline,
    Other(u8),
}

impl FieldType {
    fn from_u8(b: u8) -> Self {
        match b {
            0x04 => FieldType::DigestRipe,
            0x00 => FieldType::Namespace,
            0x01 => FieldType::Table,
            0x12 => FieldType::RecordVersion,
            0x1a => FieldType::MrtDeadline,
            other => FieldType::Other(other),
        }
    }
}

/// A single `len(4 BE) | type(1) | payload(len-1)` field entry.
#[derive(Clone, Debug)]
pub struct FieldEntry<'a> {
    pub field_type: FieldType,
    pub payload: &'a [u8],
}

/// Walks the `field_count` field entries at the front of `buf`, returning the entries
/// and the offset of the first byte after them.
pub fn parse_fields(buf: &[u8], field_count: u16) -> Result<(Vec<FieldEntry<'_>>, usize)> {
    let mut offset = 0usize;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        if offset + 4 > buf.len() {
            return Err(Error::internal("truncated field entry length"));
        }
        let len = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;
        if len == 0 || offset + len > buf.len() {
            return Err(Error::internal("truncated field entry payload"));
        }
        let field_type = FieldType::from_u8(buf[offset]);
        let payload = &buf[offset + 1..offset + len];
        fields.push(FieldEntry {
            field_type,
            payload,
        });
        offset += len;
    }
    Ok((fields, offset))
}

/// A single op entry inside a record, per §6's layout.
#[derive(Clone, Debug)]
pub struct OpEntry<'a> {
    pub op_type: u8,
    pub particle_type: u8,
    pub version: u8,
    pub name: &'a str,
    pub particle: &'a [u8],
}

/// Walks `op_count` op entries starting at `buf[offset..]`, returning the entries and
/// the total bytes consumed.
pub fn parse_ops(buf: &[u8], op_count: u16) -> Result<(Vec<OpEntry<'_>>, usize)> {
    let mut offset = 0usize;
    let mut ops = Vec::with_capacity(op_count as usize);
    for _ in 0..op_count {
        if offset + 4 > buf.len() {
            return Err(Error::internal("truncated op entry size"));
        }
        let op_size = u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        let entry_start = offset + 4;
        if op_size < 4 || entry_start + op_size > buf.len() {
            return Err(Error::internal("truncated op entry body"));
        }
        let op_type = buf[entry_start];
        let particle_type = buf[entry_start + 1];
        let version = buf[entry_start + 2];
        let name_size = buf[entry_start + 3] as usize;
        let name_start = entry_start + 4;
        if name_start + name_size > entry_start + op_size {
            return Err(Error::internal("op name exceeds op size"));
        }
        let name = std::str::from_utf8(&buf[name_start..name_start + name_size])
            .map_err(|_| Error::internal("op name is not valid utf-8"))?;
        let particle_start = name_start + name_size;
        let particle_len = op_size - 4 - name_size;
        let particle = &buf[particle_start..particle_start + particle_len];
        ops.push(OpEntry {
            op_type,
            particle_type,
            version,
            name,
            particle,
        });
        offset = entry_start + op_size;
    }
    Ok((ops, offset))
}
