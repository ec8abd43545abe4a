//! Type descriptors and the shared descriptor table.
//!
//! Every type in a document is a node in a type tree.  Nodes live in one
//! insertion-ordered, deduplicated **flat pool**; "top-level" indices are a
//! second addressing scheme that resolves through exactly one indirection
//! to a flat slot.  The table is owned by the document and threaded by
//! mutable reference into every consumer (variants, link objects, the heap
//! engine); it is append-only for the duration of a pass.
//!
//! # Wire form
//! An inline type descriptor is size-prefixed:
//!
//! ```text
//! u16 size | u8 kind | u8 flags | kind-specific payload | [label pstring]
//! ```
//!
//! Container kinds nest full descriptors; parsing appends the nested
//! descriptors to the flat pool and the parent stores their flat indices.

use crate::error::{FormatError, Result};
use crate::field::{self, BeCursor, Limits};
use byteorder::{BigEndian, WriteBytesExt};

// ── Kind codes ────────────────────────────────────────────────────────────────

/// Descriptor kind byte.  Representative subset of the full catalogue; the
/// codes are frozen wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TdKind {
    Void,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    FloatExt,
    ComplexExt,
    Boolean,
    String,
    Path,
    Tag,
    Array,
    Cluster,
    Variant,
    Refnum,
    TypeDef,
}

impl TdKind {
    pub fn code(self) -> u8 {
        match self {
            TdKind::Void       => 0x00,
            TdKind::Int8       => 0x01,
            TdKind::Int16      => 0x02,
            TdKind::Int32      => 0x03,
            TdKind::Int64      => 0x04,
            TdKind::UInt8      => 0x05,
            TdKind::UInt16     => 0x06,
            TdKind::UInt32     => 0x07,
            TdKind::UInt64     => 0x08,
            TdKind::Float32    => 0x09,
            TdKind::Float64    => 0x0A,
            TdKind::FloatExt   => 0x0B,
            TdKind::ComplexExt => 0x0E,
            TdKind::Boolean    => 0x21,
            TdKind::String     => 0x30,
            TdKind::Path       => 0x32,
            TdKind::Tag        => 0x37,
            TdKind::Array      => 0x40,
            TdKind::Cluster    => 0x50,
            TdKind::Variant    => 0x53,
            TdKind::Refnum     => 0x70,
            TdKind::TypeDef    => 0x7F,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => TdKind::Void,
            0x01 => TdKind::Int8,
            0x02 => TdKind::Int16,
            0x03 => TdKind::Int32,
            0x04 => TdKind::Int64,
            0x05 => TdKind::UInt8,
            0x06 => TdKind::UInt16,
            0x07 => TdKind::UInt32,
            0x08 => TdKind::UInt64,
            0x09 => TdKind::Float32,
            0x0A => TdKind::Float64,
            0x0B => TdKind::FloatExt,
            0x0E => TdKind::ComplexExt,
            0x21 => TdKind::Boolean,
            0x30 => TdKind::String,
            0x32 => TdKind::Path,
            0x37 => TdKind::Tag,
            0x40 => TdKind::Array,
            0x50 => TdKind::Cluster,
            0x53 => TdKind::Variant,
            0x70 => TdKind::Refnum,
            0x7F => TdKind::TypeDef,
            _    => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            TdKind::Void       => "Void",
            TdKind::Int8       => "Int8",
            TdKind::Int16      => "Int16",
            TdKind::Int32      => "Int32",
            TdKind::Int64      => "Int64",
            TdKind::UInt8      => "UInt8",
            TdKind::UInt16     => "UInt16",
            TdKind::UInt32     => "UInt32",
            TdKind::UInt64     => "UInt64",
            TdKind::Float32    => "Float32",
            TdKind::Float64    => "Float64",
            TdKind::FloatExt   => "FloatExt",
            TdKind::ComplexExt => "ComplexExt",
            TdKind::Boolean    => "Boolean",
            TdKind::String     => "String",
            TdKind::Path       => "Path",
            TdKind::Tag        => "Tag",
            TdKind::Array      => "Array",
            TdKind::Cluster    => "Cluster",
            TdKind::Variant    => "Variant",
            TdKind::Refnum     => "Refnum",
            TdKind::TypeDef    => "TypeDef",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        [
            TdKind::Void, TdKind::Int8, TdKind::Int16, TdKind::Int32, TdKind::Int64,
            TdKind::UInt8, TdKind::UInt16, TdKind::UInt32, TdKind::UInt64,
            TdKind::Float32, TdKind::Float64, TdKind::FloatExt, TdKind::ComplexExt,
            TdKind::Boolean, TdKind::String, TdKind::Path, TdKind::Tag,
            TdKind::Array, TdKind::Cluster, TdKind::Variant, TdKind::Refnum,
            TdKind::TypeDef,
        ]
        .into_iter()
        .find(|k| k.name() == s)
    }

    /// True for numeric kinds (used by the DCO shape matcher).
    pub fn is_numeric(self) -> bool {
        matches!(self,
            TdKind::Int8 | TdKind::Int16 | TdKind::Int32 | TdKind::Int64
            | TdKind::UInt8 | TdKind::UInt16 | TdKind::UInt32 | TdKind::UInt64
            | TdKind::Float32 | TdKind::Float64 | TdKind::FloatExt | TdKind::ComplexExt)
    }
}

// ── TypeDesc ──────────────────────────────────────────────────────────────────

const FLAG_HAS_LABEL: u8 = 0x04;

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TdPayload {
    #[default]
    None,
    /// Declared maximum byte length; 0xFFFFFFFF = unbounded.
    String { max_len: u32 },
    /// Per-dimension sizes; 0xFFFFFFFF = variable.
    Array { dims: Vec<u32> },
    Refnum { ref_kind: u16 },
    TypeDef { def_flags: u32, name: Vec<u8> },
}

/// One node of the type tree.  `children` are flat-pool indices; two
/// descriptors that are structurally and label identical compare equal and
/// share one flat slot when dedup is requested.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeDesc {
    pub kind:     TdKind,
    pub flags:    u8,
    pub label:    Option<Vec<u8>>,
    pub children: Vec<usize>,
    pub payload:  TdPayload,
}

impl Default for TdKind {
    fn default() -> Self { TdKind::Void }
}

impl TypeDesc {
    pub fn simple(kind: TdKind) -> Self {
        TypeDesc { kind, ..Default::default() }
    }

    pub fn labeled(kind: TdKind, label: &str) -> Self {
        TypeDesc { kind, label: Some(label.as_bytes().to_vec()), ..Default::default() }
    }

    /// Parse one size-prefixed descriptor; nested descriptors are appended
    /// to `table` and referenced by flat index.
    pub fn parse(
        cursor: &mut BeCursor<'_>,
        table:  &mut TypeDescTable,
        limits: &Limits,
        depth:  usize,
    ) -> Result<TypeDesc> {
        if depth == 0 {
            return Err(FormatError::RecursionLimit { kind: "TypeDesc", limit: limits.max_depth });
        }
        let declared = cursor.read_u16("size")? as usize;
        if declared < 4 {
            return Err(cursor.malformed("size", format!("declared size {declared} below the 4-byte header")));
        }
        let code = cursor.read_u8("kind")?;
        let kind = TdKind::from_code(code)
            .ok_or_else(|| cursor.malformed("kind", format!("unknown type kind {code:#04x}")))?;
        let flags = cursor.read_u8("flags")?;

        let mut td = TypeDesc { kind, flags: flags & !FLAG_HAS_LABEL, ..Default::default() };
        match kind {
            TdKind::String | TdKind::Tag => {
                td.payload = TdPayload::String { max_len: cursor.read_u32("max_len")? };
            }
            TdKind::Array => {
                let ndims = cursor.read_u16("ndims")? as usize;
                cursor.check_count(ndims, limits, "ndims")?;
                let mut dims = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dims.push(cursor.read_u32("dim")?);
                }
                td.payload = TdPayload::Array { dims };
                let elem = TypeDesc::parse(cursor, table, limits, depth - 1)?;
                td.children.push(table.append_flat(elem, true));
            }
            TdKind::Cluster => {
                let count = cursor.read_u16("member_count")? as usize;
                cursor.check_count(count, limits, "member_count")?;
                for _ in 0..count {
                    let member = TypeDesc::parse(cursor, table, limits, depth - 1)?;
                    td.children.push(table.append_flat(member, true));
                }
            }
            TdKind::Refnum => {
                td.payload = TdPayload::Refnum { ref_kind: cursor.read_u16("ref_kind")? };
            }
            TdKind::TypeDef => {
                let def_flags = cursor.read_u32("def_flags")?;
                let name = cursor.read_lstring(limits, "name")?;
                td.payload = TdPayload::TypeDef { def_flags, name };
                let inner = TypeDesc::parse(cursor, table, limits, depth - 1)?;
                td.children.push(table.append_flat(inner, true));
            }
            _ => {}
        }
        if flags & FLAG_HAS_LABEL != 0 {
            td.label = Some(cursor.read_pstring(1, limits, "label")?);
        }
        Ok(td)
    }

    /// Serialize this descriptor (nested descriptors inline, via `table`).
    pub fn serialize(&self, table: &TypeDescTable, out: &mut Vec<u8>) -> Result<()> {
        let size = self.wire_size(table)?;
        out.write_u16::<BigEndian>(size as u16).expect("vec write");
        out.push(self.kind.code());
        let mut flags = self.flags & !FLAG_HAS_LABEL;
        if self.label.is_some() {
            flags |= FLAG_HAS_LABEL;
        }
        out.push(flags);
        match &self.payload {
            TdPayload::None => {}
            TdPayload::String { max_len } => {
                out.write_u32::<BigEndian>(*max_len).expect("vec write");
            }
            TdPayload::Array { dims } => {
                out.write_u16::<BigEndian>(dims.len() as u16).expect("vec write");
                for d in dims {
                    out.write_u32::<BigEndian>(*d).expect("vec write");
                }
            }
            TdPayload::Refnum { ref_kind } => {
                out.write_u16::<BigEndian>(*ref_kind).expect("vec write");
            }
            TdPayload::TypeDef { def_flags, name } => {
                out.write_u32::<BigEndian>(*def_flags).expect("vec write");
                field::write_lstring(out, name);
            }
        }
        for &child in &self.children {
            table.resolve_flat(child)?.serialize(table, out)?;
        }
        if let Some(label) = &self.label {
            field::write_pstring(out, label, 1);
        }
        Ok(())
    }

    /// Total encoded size including nested descriptors.
    pub fn wire_size(&self, table: &TypeDescTable) -> Result<usize> {
        let mut size = 4;
        size += match &self.payload {
            TdPayload::None => 0,
            TdPayload::String { .. } => 4,
            TdPayload::Array { dims } => 2 + 4 * dims.len(),
            TdPayload::Refnum { .. } => 2,
            TdPayload::TypeDef { name, .. } => 4 + field::lstring_size(name.len()),
        };
        for &child in &self.children {
            size += table.resolve_flat(child)?.wire_size(table)?;
        }
        if let Some(label) = &self.label {
            size += field::pstring_size(label.len(), 1);
        }
        Ok(size)
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

/// Range of flat-pool slots claimed by one consumer: base shift + count.
/// Contiguity between two consumers' ranges must never be assumed without
/// the unused-range algebra in `heap` — corrupted files interleave claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRange {
    pub shift: usize,
    pub count: usize,
}

impl TableRange {
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        self.shift..self.shift + self.count
    }
    pub fn contains(&self, idx: usize) -> bool {
        idx >= self.shift && idx < self.shift + self.count
    }
}

/// The central descriptor registry: deduplicated flat pool + top-level
/// indirection.  Append-only during a pass; flat indices are stable once
/// assigned.
#[derive(Debug, Clone, Default)]
pub struct TypeDescTable {
    flat: Vec<TypeDesc>,
    top:  Vec<usize>,
}

impl TypeDescTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flat_len(&self) -> usize { self.flat.len() }
    pub fn top_len(&self) -> usize { self.top.len() }

    /// Append a descriptor to the flat pool.  With `dedup`, a structurally
    /// and label identical existing entry is reused instead.
    pub fn append_flat(&mut self, td: TypeDesc, dedup: bool) -> usize {
        if dedup {
            if let Some(idx) = self.flat.iter().position(|t| *t == td) {
                return idx;
            }
        }
        self.flat.push(td);
        self.flat.len() - 1
    }

    /// Register a top-level index pointing at `flat_idx`.  Returns the new
    /// top-level index.
    pub fn add_top_level(&mut self, flat_idx: usize) -> usize {
        self.top.push(flat_idx);
        self.top.len() - 1
    }

    pub fn resolve_flat(&self, flat_idx: usize) -> Result<&TypeDesc> {
        self.flat.get(flat_idx).ok_or(FormatError::MalformedField {
            record: "TypeDescTable",
            field:  "flat_index",
            offset: flat_idx,
            reason: format!("flat index {flat_idx} out of range ({} entries)", self.flat.len()),
        })
    }

    /// Resolve a top-level index through its single indirection.
    pub fn resolve_top(&self, top_idx: usize) -> Result<&TypeDesc> {
        self.resolve_flat(self.flat_index_of_top(top_idx)?)
    }

    pub fn flat_index_of_top(&self, top_idx: usize) -> Result<usize> {
        self.top.get(top_idx).copied().ok_or(FormatError::MalformedField {
            record: "TypeDescTable",
            field:  "top_index",
            offset: top_idx,
            reason: format!("top-level index {top_idx} out of range ({} entries)", self.top.len()),
        })
    }

    pub fn flat_entries(&self) -> &[TypeDesc] {
        &self.flat
    }

    pub fn top_entries(&self) -> &[usize] {
        &self.top
    }
}
