//! Variant containers: the self-describing value records.
//!
//! A variant carries its own 32-bit BCD version word, independent of the
//! file version.  The word selects one of three layout branches:
//!
//! | Variant version | Type storage |
//! |-----------------|--------------|
//! | below 4.0       | unsupported, fatal |
//! | 4.0 to 8.0      | one inline descriptor, fill always present |
//! | 8.0 to 8.6 (or consolidated mode off) | counted inline descriptors + fill flag + fill-type index |
//! | 8.6 and later, consolidated mode on | variable-width index into the shared table |
//!
//! Attributes are (name, variant) pairs and recurse unconditionally in
//! every branch; the recursion is bounded only by the explicit depth
//! budget, never by the version word.  Fill bytes are kept raw at parse
//! time and type references are validated in late fixup, once every
//! section contributing to the shared table has loaded.

use byteorder::{BigEndian, WriteBytesExt};

use crate::document::Document;
use crate::error::{FormatError, Result};
use crate::field::{self, BeCursor};
use crate::record::BinRecord;
use crate::tree::Element;
use crate::typedesc::TypeDesc;

const fn ver_code(major: u32, minor: u32) -> u32 {
    // Two-digit BCD major, one-digit minor, rest zero.
    ((major / 10) << 28) | ((major % 10) << 24) | (minor << 20)
}

const VER_4_0: u32 = ver_code(4, 0);
const VER_8_0: u32 = ver_code(8, 0);
const VER_8_6: u32 = ver_code(8, 6);

/// How this variant's fill type is referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantTypeRef {
    /// No fill, no type (counted-inline branch with the fill flag clear).
    None,
    /// Single inline descriptor, pre-8.0 branch.  Flat-pool index.
    Inline { flat: usize },
    /// Index into this variant's own inline descriptor list.
    IndexedInline { index: u16 },
    /// Top-level index into the shared table, consolidated branch.
    Shared { top_index: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantAttr {
    pub name:  Vec<u8>,
    pub value: LvVariant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LvVariant {
    /// The variant's own version word, BCD.  Preserved exactly.
    pub version:      u32,
    /// Flat-pool indices of inline descriptors (pre-consolidated branches).
    pub inline_types: Vec<usize>,
    pub type_ref:     VariantTypeRef,
    /// Raw fill bytes.  Interpreted against the type only by consumers;
    /// the reference itself is validated in late fixup.
    pub fill:         Option<Vec<u8>>,
    pub attrs:        Vec<VariantAttr>,
}

impl Default for LvVariant {
    fn default() -> Self {
        LvVariant {
            version:      VER_8_6,
            inline_types: Vec::new(),
            type_ref:     VariantTypeRef::None,
            fill:         None,
            attrs:        Vec::new(),
        }
    }
}

impl LvVariant {
    /// Parse with an explicit depth budget.  `BinRecord::parse` enters here
    /// with the document's configured maximum.
    pub fn parse_at_depth(
        &mut self,
        doc:    &mut Document,
        cursor: &mut BeCursor<'_>,
        depth:  usize,
    ) -> Result<()> {
        if depth == 0 {
            return Err(FormatError::RecursionLimit {
                kind:  "Variant",
                limit: doc.limits.max_depth,
            });
        }
        *self = LvVariant::default();
        self.version = cursor.read_u32("version")?;
        if self.version < VER_4_0 {
            return Err(FormatError::UnsupportedVersion {
                kind:    "Variant",
                version: format!("0x{:08x}", self.version),
            });
        }

        if self.version >= VER_8_6 && doc.consolidated_types {
            let top_index = cursor.read_var1("type_index")?;
            self.type_ref = VariantTypeRef::Shared { top_index };
            self.fill = Some(cursor.read_lstring(&doc.limits, "fill")?);
        } else if self.version >= VER_8_0 {
            let count = cursor.read_u16("type_count")? as usize;
            cursor.check_count(count, &doc.limits, "type_count")?;
            for _ in 0..count {
                let td = TypeDesc::parse(cursor, &mut doc.table, &doc.limits, depth)?;
                self.inline_types.push(doc.table.append_flat(td, true));
            }
            let has_fill = cursor.read_u8("has_fill")? != 0;
            if has_fill {
                let index = cursor.read_u16("fill_type_index")?;
                if index as usize >= self.inline_types.len() {
                    return Err(cursor.malformed(
                        "fill_type_index",
                        format!("index {index} out of {} inline types", self.inline_types.len()),
                    ));
                }
                self.type_ref = VariantTypeRef::IndexedInline { index };
                self.fill = Some(cursor.read_lstring(&doc.limits, "fill")?);
            }
        } else {
            let td = TypeDesc::parse(cursor, &mut doc.table, &doc.limits, depth)?;
            let flat = doc.table.append_flat(td, true);
            self.inline_types.push(flat);
            self.type_ref = VariantTypeRef::Inline { flat };
            self.fill = Some(cursor.read_lstring(&doc.limits, "fill")?);
        }

        let attr_count = cursor.read_u32("attr_count")? as usize;
        cursor.check_count(attr_count, &doc.limits, "attr_count")?;
        for _ in 0..attr_count {
            let name = cursor.read_lstring(&doc.limits, "attr_name")?;
            let mut value = LvVariant::default();
            value.parse_at_depth(doc, cursor, depth - 1)?;
            self.attrs.push(VariantAttr { name, value });
        }
        Ok(())
    }

    fn serialize_into(&self, doc: &Document, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<BigEndian>(self.version).expect("vec write");
        if self.version >= VER_8_6 && doc.consolidated_types {
            let top_index = match self.type_ref {
                VariantTypeRef::Shared { top_index } => top_index,
                ref other => {
                    return Err(FormatError::MalformedField {
                        record: "Variant",
                        field:  "type_ref",
                        offset: out.len(),
                        reason: format!("consolidated variant holds {other:?}"),
                    });
                }
            };
            field::write_var1(out, top_index)?;
            field::write_lstring(out, self.fill.as_deref().unwrap_or(&[]));
        } else if self.version >= VER_8_0 {
            out.write_u16::<BigEndian>(self.inline_types.len() as u16).expect("vec write");
            for &flat in &self.inline_types {
                doc.table.resolve_flat(flat)?.serialize(&doc.table, out)?;
            }
            match self.type_ref {
                VariantTypeRef::IndexedInline { index } => {
                    out.push(1);
                    out.write_u16::<BigEndian>(index).expect("vec write");
                    field::write_lstring(out, self.fill.as_deref().unwrap_or(&[]));
                }
                VariantTypeRef::None => out.push(0),
                ref other => {
                    return Err(FormatError::MalformedField {
                        record: "Variant",
                        field:  "type_ref",
                        offset: out.len(),
                        reason: format!("counted-inline variant holds {other:?}"),
                    });
                }
            }
        } else {
            let flat = match self.type_ref {
                VariantTypeRef::Inline { flat } => flat,
                ref other => {
                    return Err(FormatError::MalformedField {
                        record: "Variant",
                        field:  "type_ref",
                        offset: out.len(),
                        reason: format!("pre-8.0 variant holds {other:?}"),
                    });
                }
            };
            doc.table.resolve_flat(flat)?.serialize(&doc.table, out)?;
            field::write_lstring(out, self.fill.as_deref().unwrap_or(&[]));
        }

        out.write_u32::<BigEndian>(self.attrs.len() as u32).expect("vec write");
        for attr in &self.attrs {
            field::write_lstring(out, &attr.name);
            attr.value.serialize_into(doc, out)?;
        }
        Ok(())
    }

    fn size_of(&self, doc: &Document) -> Result<usize> {
        let mut size = 4;
        if self.version >= VER_8_6 && doc.consolidated_types {
            let top_index = match self.type_ref {
                VariantTypeRef::Shared { top_index } => top_index,
                _ => 0,
            };
            size += field::var1_size(top_index);
            size += field::lstring_size(self.fill.as_deref().map_or(0, <[u8]>::len));
        } else if self.version >= VER_8_0 {
            size += 2;
            for &flat in &self.inline_types {
                size += doc.table.resolve_flat(flat)?.wire_size(&doc.table)?;
            }
            size += 1;
            if matches!(self.type_ref, VariantTypeRef::IndexedInline { .. }) {
                size += 2;
                size += field::lstring_size(self.fill.as_deref().map_or(0, <[u8]>::len));
            }
        } else {
            if let VariantTypeRef::Inline { flat } = self.type_ref {
                size += doc.table.resolve_flat(flat)?.wire_size(&doc.table)?;
            }
            size += field::lstring_size(self.fill.as_deref().map_or(0, <[u8]>::len));
        }
        size += 4;
        for attr in &self.attrs {
            size += field::lstring_size(attr.name.len());
            size += attr.value.size_of(doc)?;
        }
        Ok(size)
    }

    fn fixup_at_depth(&mut self, doc: &Document, depth: usize) -> Result<()> {
        if depth == 0 {
            return Err(FormatError::RecursionLimit {
                kind:  "Variant",
                limit: doc.limits.max_depth,
            });
        }
        match self.type_ref {
            VariantTypeRef::None => {}
            VariantTypeRef::Inline { flat } => {
                doc.table.resolve_flat(flat)?;
            }
            VariantTypeRef::IndexedInline { index } => {
                let flat = *self.inline_types.get(index as usize).ok_or(
                    FormatError::MalformedField {
                        record: "Variant",
                        field:  "fill_type_index",
                        offset: 0,
                        reason: format!("index {index} out of {} inline types", self.inline_types.len()),
                    },
                )?;
                doc.table.resolve_flat(flat)?;
            }
            VariantTypeRef::Shared { top_index } => {
                doc.table.resolve_top(top_index as usize)?;
            }
        }
        for attr in &mut self.attrs {
            attr.value.fixup_at_depth(doc, depth - 1)?;
        }
        Ok(())
    }

    fn tree_at_depth(&self, doc: &Document, depth: usize) -> Result<Element> {
        if depth == 0 {
            return Err(FormatError::RecursionLimit {
                kind:  "Variant",
                limit: doc.limits.max_depth,
            });
        }
        let mut e = Element::new("Variant");
        e.set_attr("version", format!("0x{:08x}", self.version));
        match self.type_ref {
            VariantTypeRef::None => {}
            VariantTypeRef::Inline { flat } => {
                e.set_attr("inline_type", flat.to_string());
            }
            VariantTypeRef::IndexedInline { index } => {
                e.set_attr("fill_type_index", index.to_string());
            }
            VariantTypeRef::Shared { top_index } => {
                e.set_attr("type_index", top_index.to_string());
            }
        }
        for &flat in &self.inline_types {
            let mut t = Element::new("InlineType");
            t.set_attr("flat_index", flat.to_string());
            e.push(t);
        }
        if let Some(fill) = &self.fill {
            let mut f = Element::new("Fill");
            f.text = hex::encode(fill);
            e.push(f);
        }
        for attr in &self.attrs {
            let mut a = Element::new("Attribute");
            a.set_attr("name", String::from_utf8_lossy(&attr.name));
            a.push(attr.value.tree_at_depth(doc, depth - 1)?);
            e.push(a);
        }
        Ok(e)
    }

    fn from_tree_at_depth(&mut self, doc: &mut Document, elem: &Element, depth: usize) -> Result<()> {
        if depth == 0 {
            return Err(FormatError::RecursionLimit {
                kind:  "Variant",
                limit: doc.limits.max_depth,
            });
        }
        *self = LvVariant::default();
        self.version = elem.attr_u32("version")?;
        for t in elem.children_named("InlineType") {
            self.inline_types.push(t.attr_u32("flat_index")? as usize);
        }
        self.type_ref = if let Some(top) = elem.attr_u32_opt("type_index")? {
            VariantTypeRef::Shared { top_index: top }
        } else if let Some(index) = elem.attr_u32_opt("fill_type_index")? {
            VariantTypeRef::IndexedInline { index: index as u16 }
        } else if let Some(flat) = elem.attr_u32_opt("inline_type")? {
            VariantTypeRef::Inline { flat: flat as usize }
        } else {
            VariantTypeRef::None
        };
        if let Some(f) = elem.child("Fill") {
            let raw = hex::decode(f.text.trim()).map_err(|e| FormatError::Tree {
                elem:   "Fill".to_string(),
                reason: format!("bad hex payload: {e}"),
            })?;
            self.fill = Some(raw);
        }
        for a in elem.children_named("Attribute") {
            let name = a.attr("name").unwrap_or_default().as_bytes().to_vec();
            let mut value = LvVariant::default();
            value.from_tree_at_depth(doc, a.require_child("Variant")?, depth - 1)?;
            self.attrs.push(VariantAttr { name, value });
        }
        Ok(())
    }
}

impl BinRecord for LvVariant {
    fn kind(&self) -> &'static str {
        "Variant"
    }

    fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        let depth = doc.limits.max_depth;
        self.parse_at_depth(doc, cursor, depth)
    }

    fn serialize(&self, doc: &Document, _avoid_recompute: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.serialize_into(doc, &mut out)?;
        Ok(out)
    }

    fn expected_size(&self, doc: &Document) -> Result<usize> {
        self.size_of(doc)
    }

    fn import_tree(&mut self, doc: &mut Document, elem: &Element) -> Result<()> {
        let depth = doc.limits.max_depth;
        self.from_tree_at_depth(doc, elem, depth)
    }

    fn export_tree(&self, doc: &Document) -> Result<Element> {
        self.tree_at_depth(doc, doc.limits.max_depth)
    }

    fn late_fixup(&mut self, doc: &mut Document) -> Result<()> {
        let depth = doc.limits.max_depth;
        self.fixup_at_depth(doc, depth)
    }

    fn check_sanity(&self) -> bool {
        match self.type_ref {
            VariantTypeRef::IndexedInline { index } => (index as usize) < self.inline_types.len(),
            _ => true,
        }
    }
}

// ── OLE variants ──────────────────────────────────────────────────────────────

/// OLE `VARTYPE` codes this codec understands.
pub const VT_EMPTY: u16 = 0x0000;
pub const VT_NULL:  u16 = 0x0001;
pub const VT_I2:    u16 = 0x0002;
pub const VT_I4:    u16 = 0x0003;
pub const VT_R4:    u16 = 0x0004;
pub const VT_R8:    u16 = 0x0005;
pub const VT_DATE:  u16 = 0x0007;
pub const VT_BSTR:  u16 = 0x0008;
pub const VT_BOOL:  u16 = 0x000B;
pub const VT_I1:    u16 = 0x0010;
pub const VT_UI1:   u16 = 0x0011;
pub const VT_UI2:   u16 = 0x0012;
pub const VT_UI4:   u16 = 0x0013;
pub const VT_I8:    u16 = 0x0014;
pub const VT_UI8:   u16 = 0x0015;
pub const VT_ARRAY: u16 = 0x2000;

fn vt_scalar_size(vt: u16) -> Option<usize> {
    match vt {
        VT_EMPTY | VT_NULL => Some(0),
        VT_I1 | VT_UI1 => Some(1),
        VT_I2 | VT_UI2 | VT_BOOL => Some(2),
        VT_I4 | VT_UI4 | VT_R4 => Some(4),
        VT_R8 | VT_DATE | VT_I8 | VT_UI8 => Some(8),
        _ => None,
    }
}

/// An embedded OLE variant: a `VARTYPE` tag, optional array dimensions,
/// and either raw scalar bytes, a length-prefixed string, or recursively
/// parsed array elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OleVariant {
    pub vt:       u16,
    pub dims:     Vec<u32>,
    /// Scalar payload or BSTR bytes; empty for arrays.
    pub scalar:   Vec<u8>,
    pub elements: Vec<OleVariant>,
}

impl Default for OleVariant {
    fn default() -> Self {
        OleVariant { vt: VT_EMPTY, dims: Vec::new(), scalar: Vec::new(), elements: Vec::new() }
    }
}

impl OleVariant {
    pub fn parse_at_depth(
        &mut self,
        doc:    &mut Document,
        cursor: &mut BeCursor<'_>,
        depth:  usize,
    ) -> Result<()> {
        if depth == 0 {
            return Err(FormatError::RecursionLimit {
                kind:  "OleVariant",
                limit: doc.limits.max_depth,
            });
        }
        *self = OleVariant::default();
        self.vt = cursor.read_u16("vt")?;
        if self.vt & VT_ARRAY != 0 {
            let ndims = cursor.read_u16("ndims")? as usize;
            cursor.check_count(ndims, &doc.limits, "ndims")?;
            let mut total = 1usize;
            for _ in 0..ndims {
                let dim = cursor.read_u32("dim")?;
                total = total.saturating_mul(dim as usize);
                self.dims.push(dim);
            }
            cursor.check_count(total, &doc.limits, "elements")?;
            for _ in 0..total {
                let mut elem = OleVariant::default();
                elem.parse_at_depth(doc, cursor, depth - 1)?;
                self.elements.push(elem);
            }
        } else if self.vt == VT_BSTR {
            self.scalar = cursor.read_lstring(&doc.limits, "bstr")?;
        } else {
            let size = vt_scalar_size(self.vt).ok_or_else(|| {
                cursor.malformed("vt", format!("unknown OLE type 0x{:04x}", self.vt))
            })?;
            self.scalar = cursor.take(size, "scalar")?.to_vec();
        }
        Ok(())
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.write_u16::<BigEndian>(self.vt).expect("vec write");
        if self.vt & VT_ARRAY != 0 {
            out.write_u16::<BigEndian>(self.dims.len() as u16).expect("vec write");
            for &dim in &self.dims {
                out.write_u32::<BigEndian>(dim).expect("vec write");
            }
            for elem in &self.elements {
                elem.serialize_into(out);
            }
        } else if self.vt == VT_BSTR {
            field::write_lstring(out, &self.scalar);
        } else {
            out.extend_from_slice(&self.scalar);
        }
    }

    fn size_of(&self) -> usize {
        if self.vt & VT_ARRAY != 0 {
            4 + 4 * self.dims.len() + self.elements.iter().map(OleVariant::size_of).sum::<usize>()
        } else if self.vt == VT_BSTR {
            2 + field::lstring_size(self.scalar.len())
        } else {
            2 + self.scalar.len()
        }
    }
}

impl BinRecord for OleVariant {
    fn kind(&self) -> &'static str {
        "OleVariant"
    }

    fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        let depth = doc.limits.max_depth;
        self.parse_at_depth(doc, cursor, depth)
    }

    fn serialize(&self, _doc: &Document, _avoid_recompute: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.serialize_into(&mut out);
        Ok(out)
    }

    fn expected_size(&self, _doc: &Document) -> Result<usize> {
        Ok(self.size_of())
    }

    fn import_tree(&mut self, _doc: &mut Document, elem: &Element) -> Result<()> {
        *self = OleVariant::default();
        self.vt = elem.attr_u32("vt")? as u16;
        for d in elem.children_named("Dim") {
            self.dims.push(d.attr_u32("size")?);
        }
        if let Some(s) = elem.child("Scalar") {
            self.scalar = hex::decode(s.text.trim()).map_err(|e| FormatError::Tree {
                elem:   "Scalar".to_string(),
                reason: format!("bad hex payload: {e}"),
            })?;
        }
        for child in elem.children_named("OleVariant") {
            let mut nested = OleVariant::default();
            nested.import_tree(_doc, child)?;
            self.elements.push(nested);
        }
        Ok(())
    }

    fn export_tree(&self, doc: &Document) -> Result<Element> {
        let mut e = Element::new("OleVariant");
        e.set_attr("vt", format!("0x{:04x}", self.vt));
        for &dim in &self.dims {
            let mut d = Element::new("Dim");
            d.set_attr("size", dim.to_string());
            e.push(d);
        }
        if !self.scalar.is_empty() {
            let mut s = Element::new("Scalar");
            s.text = hex::encode(&self.scalar);
            e.push(s);
        }
        for elem in &self.elements {
            e.push(elem.export_tree(doc)?);
        }
        Ok(e)
    }

    fn check_sanity(&self) -> bool {
        if self.vt & VT_ARRAY != 0 {
            let total: usize = self.dims.iter().map(|&d| d as usize).product();
            self.elements.len() == total
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_codes() {
        assert_eq!(VER_4_0, 0x0400_0000);
        assert_eq!(VER_8_0, 0x0800_0000);
        assert_eq!(VER_8_6, 0x0860_0000);
        assert_eq!(ver_code(14, 0), 0x1400_0000);
    }

    #[test]
    fn scalar_sizes() {
        assert_eq!(vt_scalar_size(VT_EMPTY), Some(0));
        assert_eq!(vt_scalar_size(VT_R8), Some(8));
        assert_eq!(vt_scalar_size(0x1234), None);
    }
}
