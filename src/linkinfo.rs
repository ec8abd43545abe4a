//! Reusable version-gated field groups ("info blocks").
//!
//! Concrete link-object kinds compose these by value — each kind holds one
//! instance of every block it needs as a named field; nothing is inherited.
//! All gates test the **document** format version, never the record's own
//! version word.  Each block resolves its layout once per record from a
//! single match, then parses straight through; gates are not re-checked
//! per field.
//!
//! Every block owns a `clear()` so records can re-initialize in place
//! before re-parsing.

use byteorder::{BigEndian, WriteBytesExt};
use uuid::Uuid;

use crate::document::Document;
use crate::error::{FormatError, Result};
use crate::field::{self, BeCursor};
use crate::path::PathRecord;
use crate::record::BinRecord;
use crate::tree::Element;

// ── Basic link-save info ──────────────────────────────────────────────────────

/// Qualified name + path reference + optional flag word (8.6+).
/// The qualified-name block is 2-aligned: the u16 count leads it and the
/// component list is padded back out to 2 before the path starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicLinkSaveInfo {
    pub qualified_name: Vec<Vec<u8>>,
    pub path:           PathRecord,
    pub flag_word:      Option<u32>,
}

impl BasicLinkSaveInfo {
    pub fn clear(&mut self) {
        *self = BasicLinkSaveInfo::default();
    }

    fn qname_size(&self) -> usize {
        let raw = 2 + self.qualified_name.iter().map(|n| 1 + n.len()).sum::<usize>();
        raw + field::pad_len(raw, 2)
    }

    pub fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        self.clear();
        let start = cursor.pos();
        let count = cursor.read_u16("qualified_name")? as usize;
        cursor.check_count(count, &doc.limits, "qualified_name")?;
        for _ in 0..count {
            self.qualified_name.push(cursor.read_pstring(1, &doc.limits, "qualified_name")?);
        }
        // Pad the name block back to 2 relative to its own start.
        if (cursor.pos() - start) % 2 != 0 {
            cursor.take(1, "qualified_name_pad")?;
        }
        self.path.parse(doc, cursor)?;
        if doc.version.at_least(8, 6) {
            self.flag_word = Some(cursor.read_u32("flag_word")?);
        }
        Ok(())
    }

    pub fn serialize(&self, doc: &Document, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        out.write_u16::<BigEndian>(self.qualified_name.len() as u16).expect("vec write");
        for n in &self.qualified_name {
            field::write_pstring(out, n, 1);
        }
        if (out.len() - start) % 2 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&self.path.serialize(doc, false)?);
        if doc.version.at_least(8, 6) {
            out.write_u32::<BigEndian>(self.flag_word.unwrap_or(0)).expect("vec write");
        }
        Ok(())
    }

    pub fn size(&self, doc: &Document) -> Result<usize> {
        let mut size = self.qname_size() + self.path.expected_size(doc)?;
        if doc.version.at_least(8, 6) {
            size += 4;
        }
        Ok(size)
    }

    pub fn export_tree(&self, doc: &Document) -> Result<Element> {
        let mut e = Element::new("BasicLinkSaveInfo");
        if let Some(fw) = self.flag_word {
            e.set_attr("flag_word", format!("0x{fw:08x}"));
        }
        let mut qn = Element::new("QualifiedName");
        for n in &self.qualified_name {
            let mut name = Element::new("Name");
            name.text = String::from_utf8_lossy(n).into_owned();
            qn.push(name);
        }
        e.push(qn);
        e.push(self.path.export_tree(doc)?);
        Ok(e)
    }

    pub fn import_tree(&mut self, doc: &mut Document, elem: &Element) -> Result<()> {
        self.clear();
        self.flag_word = elem.attr_u32_opt("flag_word")?;
        if let Some(qn) = elem.child("QualifiedName") {
            for name in qn.children_named("Name") {
                self.qualified_name.push(name.text.as_bytes().to_vec());
            }
        }
        self.path.import_tree(doc, elem.require_child("Path")?)?;
        Ok(())
    }
}

// ── VI-link reference info ────────────────────────────────────────────────────

/// Layout resolved once per record from the document version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViLinkLayout {
    /// 14.0+: one packed flag byte.
    Packed,
    /// Legacy: three separate fields.
    Legacy,
}

impl ViLinkLayout {
    fn select(doc: &Document) -> Self {
        if doc.version.at_least(14, 0) { ViLinkLayout::Packed } else { ViLinkLayout::Legacy }
    }
}

/// Either one packed flag byte (14.0+) or three legacy fields; the two
/// forms are mutually exclusive by version gate.  The meaning of several
/// bits in `packed` is not reverse engineered; they are carried raw.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VILinkRefInfo {
    pub packed:   u8,
    pub flag_a:   u16,
    pub flag_b:   u16,
    pub ref_kind: u32,
}

impl VILinkRefInfo {
    pub fn clear(&mut self) {
        *self = VILinkRefInfo::default();
    }

    pub fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        self.clear();
        match ViLinkLayout::select(doc) {
            ViLinkLayout::Packed => {
                self.packed = cursor.read_u8("packed")?;
            }
            ViLinkLayout::Legacy => {
                self.flag_a = cursor.read_u16("flag_a")?;
                self.flag_b = cursor.read_u16("flag_b")?;
                self.ref_kind = cursor.read_u32("ref_kind")?;
            }
        }
        Ok(())
    }

    pub fn serialize(&self, doc: &Document, out: &mut Vec<u8>) -> Result<()> {
        match ViLinkLayout::select(doc) {
            ViLinkLayout::Packed => out.push(self.packed),
            ViLinkLayout::Legacy => {
                out.write_u16::<BigEndian>(self.flag_a).expect("vec write");
                out.write_u16::<BigEndian>(self.flag_b).expect("vec write");
                out.write_u32::<BigEndian>(self.ref_kind).expect("vec write");
            }
        }
        Ok(())
    }

    pub fn size(&self, doc: &Document) -> usize {
        match ViLinkLayout::select(doc) {
            ViLinkLayout::Packed => 1,
            ViLinkLayout::Legacy => 8,
        }
    }

    pub fn export_tree(&self, doc: &Document) -> Element {
        let mut e = Element::new("VILinkRefInfo");
        match ViLinkLayout::select(doc) {
            ViLinkLayout::Packed => e.set_attr("packed", format!("0x{:02x}", self.packed)),
            ViLinkLayout::Legacy => {
                e.set_attr("flag_a", format!("0x{:04x}", self.flag_a));
                e.set_attr("flag_b", format!("0x{:04x}", self.flag_b));
                e.set_attr("ref_kind", self.ref_kind.to_string());
            }
        }
        e
    }

    pub fn import_tree(&mut self, doc: &Document, elem: &Element) -> Result<()> {
        self.clear();
        match ViLinkLayout::select(doc) {
            ViLinkLayout::Packed => {
                self.packed = elem.attr_u32("packed")? as u8;
            }
            ViLinkLayout::Legacy => {
                self.flag_a = elem.attr_u32("flag_a")? as u16;
                self.flag_b = elem.attr_u32("flag_b")? as u16;
                self.ref_kind = elem.attr_u32("ref_kind")?;
            }
        }
        Ok(())
    }
}

// ── Typed link-save info ──────────────────────────────────────────────────────

/// Basic info + a type reference + VI-link info + optional flags.
///
/// 8.6+ files reference the shared table by top-level index (var1); older
/// files store the descriptor inline and a legacy offset list instead.
/// The index is only *validated* during late fixup — at first-parse time
/// the consolidated table may not be fully populated yet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypedLinkSaveInfo {
    pub basic:          BasicLinkSaveInfo,
    pub td_top_index:   Option<u32>,
    pub inline_td_flat: Option<usize>,
    pub vi_link:        VILinkRefInfo,
    pub flags:          Option<u32>,
    pub legacy_offsets: OffsetListInfo,
}

impl TypedLinkSaveInfo {
    pub fn clear(&mut self) {
        *self = TypedLinkSaveInfo::default();
    }

    pub fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        self.clear();
        self.basic.parse(doc, cursor)?;
        if doc.version.at_least(8, 6) {
            self.td_top_index = Some(cursor.read_var1("td_top_index")?);
            self.vi_link.parse(doc, cursor)?;
            if doc.version.at_least(12, 0) {
                self.flags = Some(cursor.read_u32("flags")?);
            }
        } else {
            let limits = doc.limits;
            let td = crate::typedesc::TypeDesc::parse(cursor, &mut doc.table, &limits, limits.max_depth)?;
            self.inline_td_flat = Some(doc.table.append_flat(td, true));
            self.vi_link.parse(doc, cursor)?;
            self.legacy_offsets.parse(doc, cursor)?;
        }
        Ok(())
    }

    pub fn serialize(&self, doc: &Document, out: &mut Vec<u8>) -> Result<()> {
        self.basic.serialize(doc, out)?;
        if doc.version.at_least(8, 6) {
            field::write_var1(out, self.td_top_index.unwrap_or(0))?;
            self.vi_link.serialize(doc, out)?;
            if doc.version.at_least(12, 0) {
                out.write_u32::<BigEndian>(self.flags.unwrap_or(0)).expect("vec write");
            }
        } else {
            let flat = self.inline_td_flat.ok_or(FormatError::MalformedField {
                record: "TypedLinkSaveInfo",
                field:  "inline_td",
                offset: out.len(),
                reason: "pre-8.6 serialization requires an inline type descriptor".to_string(),
            })?;
            doc.table.resolve_flat(flat)?.serialize(&doc.table, out)?;
            self.vi_link.serialize(doc, out)?;
            self.legacy_offsets.serialize(doc, out)?;
        }
        Ok(())
    }

    pub fn size(&self, doc: &Document) -> Result<usize> {
        let mut size = self.basic.size(doc)?;
        if doc.version.at_least(8, 6) {
            size += field::var1_size(self.td_top_index.unwrap_or(0));
            size += self.vi_link.size(doc);
            if doc.version.at_least(12, 0) {
                size += 4;
            }
        } else {
            let flat = self.inline_td_flat.ok_or(FormatError::MalformedField {
                record: "TypedLinkSaveInfo",
                field:  "inline_td",
                offset: 0,
                reason: "pre-8.6 sizing requires an inline type descriptor".to_string(),
            })?;
            size += doc.table.resolve_flat(flat)?.wire_size(&doc.table)?;
            size += self.vi_link.size(doc);
            size += self.legacy_offsets.size();
        }
        Ok(size)
    }

    /// Validate the table reference once the shared table is populated.
    pub fn late_fixup(&mut self, doc: &mut Document) -> Result<()> {
        if let Some(top) = self.td_top_index {
            doc.table.resolve_top(top as usize)?;
        }
        Ok(())
    }

    pub fn export_tree(&self, doc: &Document) -> Result<Element> {
        let mut e = Element::new("TypedLinkSaveInfo");
        if let Some(top) = self.td_top_index {
            e.set_attr("td_top_index", top.to_string());
        }
        if let Some(flat) = self.inline_td_flat {
            e.set_attr("inline_td_flat", flat.to_string());
        }
        if let Some(flags) = self.flags {
            e.set_attr("flags", format!("0x{flags:08x}"));
        }
        e.push(self.basic.export_tree(doc)?);
        e.push(self.vi_link.export_tree(doc));
        if !doc.version.at_least(8, 6) {
            e.push(self.legacy_offsets.export_tree());
        }
        Ok(e)
    }

    pub fn import_tree(&mut self, doc: &mut Document, elem: &Element) -> Result<()> {
        self.clear();
        self.td_top_index = elem.attr_u32_opt("td_top_index")?;
        self.inline_td_flat = elem.attr_u32_opt("inline_td_flat")?.map(|v| v as usize);
        self.flags = elem.attr_u32_opt("flags")?;
        self.basic.import_tree(doc, elem.require_child("BasicLinkSaveInfo")?)?;
        self.vi_link.import_tree(doc, elem.require_child("VILinkRefInfo")?)?;
        if let Some(off) = elem.child("OffsetList") {
            self.legacy_offsets.import_tree(doc, off)?;
        }
        Ok(())
    }
}

// ── Offset list ───────────────────────────────────────────────────────────────

/// Count-prefixed list of 4-byte offsets, reused verbatim by several kinds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OffsetListInfo {
    pub offsets: Vec<u32>,
}

impl OffsetListInfo {
    pub fn clear(&mut self) {
        self.offsets.clear();
    }

    pub fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        self.clear();
        let count = cursor.read_u32("count")? as usize;
        cursor.check_count(count, &doc.limits, "offsets")?;
        for _ in 0..count {
            self.offsets.push(cursor.read_u32("offset")?);
        }
        Ok(())
    }

    pub fn serialize(&self, _doc: &Document, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<BigEndian>(self.offsets.len() as u32).expect("vec write");
        for off in &self.offsets {
            out.write_u32::<BigEndian>(*off).expect("vec write");
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        4 + 4 * self.offsets.len()
    }

    pub fn export_tree(&self) -> Element {
        let mut e = Element::new("OffsetList");
        for off in &self.offsets {
            let mut o = Element::new("Offset");
            o.text = format!("0x{off:08x}");
            e.push(o);
        }
        e
    }

    pub fn import_tree(&mut self, _doc: &Document, elem: &Element) -> Result<()> {
        self.clear();
        for o in elem.children_named("Offset") {
            let v = o.text.trim();
            let parsed = if let Some(hexpart) = v.strip_prefix("0x") {
                u32::from_str_radix(hexpart, 16)
            } else {
                v.parse()
            };
            self.offsets.push(parsed.map_err(|e| FormatError::Tree {
                elem:   "Offset".to_string(),
                reason: e.to_string(),
            })?);
        }
        Ok(())
    }
}

// ── UD class API link cache ───────────────────────────────────────────────────

/// Library version + flags (width is version gated) + GUID/flag pair +
/// a length-prefixed content blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UdClassApiCache {
    pub lib_version: u32,
    pub flags:       u16,
    pub guid:        Uuid,
    pub guid_flags:  u32,
    pub content:     Vec<u8>,
}

impl UdClassApiCache {
    pub fn clear(&mut self) {
        *self = UdClassApiCache::default();
    }

    pub fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        self.clear();
        self.lib_version = cursor.read_u32("lib_version")?;
        self.flags = if doc.version.at_least(12, 0) {
            cursor.read_u16("flags")?
        } else {
            cursor.read_u8("flags")? as u16
        };
        let raw = cursor.take(16, "guid")?;
        self.guid = Uuid::from_slice(raw).expect("16-byte slice");
        self.guid_flags = cursor.read_u32("guid_flags")?;
        self.content = cursor.read_lstring(&doc.limits, "content")?;
        Ok(())
    }

    pub fn serialize(&self, doc: &Document, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<BigEndian>(self.lib_version).expect("vec write");
        if doc.version.at_least(12, 0) {
            out.write_u16::<BigEndian>(self.flags).expect("vec write");
        } else {
            out.push(self.flags as u8);
        }
        out.extend_from_slice(self.guid.as_bytes());
        out.write_u32::<BigEndian>(self.guid_flags).expect("vec write");
        field::write_lstring(out, &self.content);
        Ok(())
    }

    pub fn size(&self, doc: &Document) -> usize {
        let flags_width = if doc.version.at_least(12, 0) { 2 } else { 1 };
        4 + flags_width + 16 + 4 + field::lstring_size(self.content.len())
    }

    pub fn export_tree(&self) -> Element {
        let mut e = Element::new("UdClassApiCache");
        e.set_attr("lib_version", self.lib_version.to_string());
        e.set_attr("flags", format!("0x{:04x}", self.flags));
        e.set_attr("guid", self.guid.to_string());
        e.set_attr("guid_flags", format!("0x{:08x}", self.guid_flags));
        let mut content = Element::new("Content");
        content.text = hex::encode(&self.content);
        e.push(content);
        e
    }

    pub fn import_tree(&mut self, _doc: &Document, elem: &Element) -> Result<()> {
        self.clear();
        self.lib_version = elem.attr_u32("lib_version")?;
        self.flags = elem.attr_u32("flags")? as u16;
        let guid_text = elem.attr("guid").unwrap_or_default();
        self.guid = Uuid::parse_str(guid_text).map_err(|e| FormatError::Tree {
            elem:   elem.tag.clone(),
            reason: format!("guid: {e}"),
        })?;
        self.guid_flags = elem.attr_u32("guid_flags")?;
        if let Some(content) = elem.child("Content") {
            self.content = hex::decode(content.text.trim()).map_err(|e| FormatError::Tree {
                elem:   "Content".to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

// ── GI link info ──────────────────────────────────────────────────────────────

/// Five fixed-width properties.  No version gating.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GiLinkInfo {
    pub props: [u32; 5],
}

impl GiLinkInfo {
    pub fn clear(&mut self) {
        self.props = [0; 5];
    }

    pub fn parse(&mut self, cursor: &mut BeCursor<'_>) -> Result<()> {
        for p in self.props.iter_mut() {
            *p = cursor.read_u32("prop")?;
        }
        Ok(())
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        for p in &self.props {
            out.write_u32::<BigEndian>(*p).expect("vec write");
        }
    }

    pub fn size(&self) -> usize {
        20
    }

    pub fn export_tree(&self) -> Element {
        let mut e = Element::new("GiLinkInfo");
        for (i, p) in self.props.iter().enumerate() {
            e.set_attr(&format!("prop{i}"), p.to_string());
        }
        e
    }

    pub fn import_tree(&mut self, elem: &Element) -> Result<()> {
        for (i, p) in self.props.iter_mut().enumerate() {
            *p = elem.attr_u32(&format!("prop{i}"))?;
        }
        Ok(())
    }
}
