//! Filesystem-path records.
//!
//! Two historical encodings share one abstract surface (ordered text
//! components + a 4-byte flavor tag).  The sub-identity word read right
//! after the record identity selects the variant:
//!
//! | Sub-identity | Variant | Component encoding |
//! |--------------|---------|--------------------|
//! | `0x00000000` | zero-style | u16 count, then 1-byte-length components |
//! | anything else | typed | the word is a type tag; u16 count, then 2-byte-length components |
//!
//! Zero-style has a historical quirk: an all-zero 8-byte body (sub-identity
//! plus four more zero bytes, no count word) is accepted as an explicitly
//! empty path.  The quirk is preserved on re-serialize so such files round
//! trip byte-for-byte.

use byteorder::{BigEndian, WriteBytesExt};
use log::warn;

use crate::document::Document;
use crate::error::{FormatError, Result};
use crate::field::BeCursor;
use crate::record::BinRecord;
use crate::tree::{self, Element};

pub const PATH_FLAVOR_ABS: [u8; 4] = *b"PTH0";
pub const PATH_FLAVOR_REL: [u8; 4] = *b"PTH1";
pub const PATH_FLAVOR_UNC: [u8; 4] = *b"PTH2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStyle {
    /// Count-prefixed 1-byte-length components.  `legacy_empty` marks the
    /// all-zero 8-byte body form.
    Zero { legacy_empty: bool },
    /// Type tag + 2-byte-length components.
    Typed { type_tag: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    pub flavor:     [u8; 4],
    pub style:      PathStyle,
    pub components: Vec<Vec<u8>>,
}

impl Default for PathRecord {
    fn default() -> Self {
        PathRecord {
            flavor:     PATH_FLAVOR_ABS,
            style:      PathStyle::Zero { legacy_empty: false },
            components: Vec::new(),
        }
    }
}

impl PathRecord {
    fn body_size(&self) -> usize {
        match &self.style {
            PathStyle::Zero { legacy_empty: true } => 8,
            PathStyle::Zero { legacy_empty: false } => {
                6 + self.components.iter().map(|c| 1 + c.len()).sum::<usize>()
            }
            PathStyle::Typed { .. } => {
                6 + self.components.iter().map(|c| 2 + c.len()).sum::<usize>()
            }
        }
    }
}

impl BinRecord for PathRecord {
    fn kind(&self) -> &'static str {
        "Path"
    }

    fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        *self = PathRecord::default();
        self.flavor = cursor.read_ident("flavor")?;
        let declared = cursor.read_u32("size")? as usize;
        if declared < 4 {
            return Err(cursor.malformed("size", format!("declared size {declared} below the 4-byte minimum")));
        }
        let body = cursor.take(declared, "body")?;
        let mut body = BeCursor::new(body, "Path");

        let sub_ident = body.read_u32("sub_ident")?;
        if sub_ident == 0 {
            // Historical quirk: exactly four more zero bytes, no count word.
            if body.remaining() == 4 {
                let tail = body.take(4, "legacy_empty")?;
                if tail != [0, 0, 0, 0] {
                    return Err(body.malformed("legacy_empty", format!("unexpected 4-byte tail {tail:02x?}")));
                }
                self.style = PathStyle::Zero { legacy_empty: true };
                return Ok(());
            }
            self.style = PathStyle::Zero { legacy_empty: false };
            let count = body.read_u16("count")? as usize;
            body.check_count(count, &doc.limits, "count")?;
            for _ in 0..count {
                let len = body.read_u8("component")? as usize;
                self.components.push(body.take(len, "component")?.to_vec());
            }
        } else {
            self.style = PathStyle::Typed { type_tag: sub_ident };
            let count = body.read_u16("count")? as usize;
            body.check_count(count, &doc.limits, "count")?;
            for _ in 0..count {
                let len = body.read_u16("component")? as usize;
                self.components.push(body.take(len, "component")?.to_vec());
            }
        }
        if !body.is_empty() {
            warn!("Path {}: declared size {declared} leaves {} trailing bytes",
                tree::ident_to_text(&self.flavor), body.remaining());
        }
        Ok(())
    }

    fn serialize(&self, _doc: &Document, _avoid_recompute: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + self.body_size());
        out.extend_from_slice(&self.flavor);
        out.write_u32::<BigEndian>(self.body_size() as u32).expect("vec write");
        match &self.style {
            PathStyle::Zero { legacy_empty: true } => {
                if !self.components.is_empty() {
                    return Err(FormatError::MalformedField {
                        record: "Path",
                        field:  "components",
                        offset: 0,
                        reason: "legacy empty form cannot carry components".to_string(),
                    });
                }
                out.extend_from_slice(&[0u8; 8]);
            }
            PathStyle::Zero { legacy_empty: false } => {
                out.write_u32::<BigEndian>(0).expect("vec write");
                out.write_u16::<BigEndian>(self.components.len() as u16).expect("vec write");
                for c in &self.components {
                    out.push(c.len() as u8);
                    out.extend_from_slice(c);
                }
            }
            PathStyle::Typed { type_tag } => {
                out.write_u32::<BigEndian>(*type_tag).expect("vec write");
                out.write_u16::<BigEndian>(self.components.len() as u16).expect("vec write");
                for c in &self.components {
                    out.write_u16::<BigEndian>(c.len() as u16).expect("vec write");
                    out.extend_from_slice(c);
                }
            }
        }
        Ok(out)
    }

    fn expected_size(&self, _doc: &Document) -> Result<usize> {
        Ok(8 + self.body_size())
    }

    fn import_tree(&mut self, _doc: &mut Document, elem: &Element) -> Result<()> {
        *self = PathRecord::default();
        let flavor_text = elem.attr("flavor").ok_or_else(|| FormatError::Tree {
            elem:   elem.tag.clone(),
            reason: "missing attribute \"flavor\"".to_string(),
        })?;
        self.flavor = tree::ident_from_text(flavor_text)?;
        self.style = match elem.attr("style") {
            Some("zero") | None => PathStyle::Zero {
                legacy_empty: elem.attr("legacy_empty") == Some("1"),
            },
            Some("typed") => PathStyle::Typed { type_tag: elem.attr_u32("type_tag")? },
            Some(other) => {
                return Err(FormatError::Tree {
                    elem:   elem.tag.clone(),
                    reason: format!("unknown path style {other:?}"),
                });
            }
        };
        for c in elem.children_named("Component") {
            self.components.push(c.text.as_bytes().to_vec());
        }
        Ok(())
    }

    fn export_tree(&self, _doc: &Document) -> Result<Element> {
        let mut e = Element::new("Path");
        e.set_attr("flavor", tree::ident_to_text(&self.flavor));
        match &self.style {
            PathStyle::Zero { legacy_empty } => {
                e.set_attr("style", "zero");
                if *legacy_empty {
                    e.set_attr("legacy_empty", "1");
                }
            }
            PathStyle::Typed { type_tag } => {
                e.set_attr("style", "typed");
                e.set_attr("type_tag", format!("0x{type_tag:08x}"));
            }
        }
        for c in &self.components {
            let mut comp = Element::new("Component");
            comp.text = String::from_utf8_lossy(c).into_owned();
            e.push(comp);
        }
        Ok(e)
    }

    fn check_sanity(&self) -> bool {
        match &self.style {
            PathStyle::Zero { legacy_empty: true } => self.components.is_empty(),
            PathStyle::Zero { legacy_empty: false } => {
                self.components.iter().all(|c| c.len() <= 0xFF)
            }
            PathStyle::Typed { .. } => self.components.iter().all(|c| c.len() <= 0xFFFF),
        }
    }
}
