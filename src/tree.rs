//! Mirror-tree document model.
//!
//! Binary records are mirrored losslessly into an XML-shaped tree for
//! inspection and hand editing: element tag = record/field kind name,
//! attributes = scalar fields (decimal, `0x..` hex, or parenthesized tuple
//! text), children = nested records in document order.
//!
//! # Escaping
//! Element text escapes control bytes 0–31 except tab and newline as
//! `&#xNN;` references; attribute text additionally escapes tab and
//! newline (attributes must stay single-line).  The XML metacharacters
//! `& < >` (and `"` in attributes) are always escaped.
//!
//! The parser below covers exactly the subset the serializer emits plus
//! declarations and comments, which is all a hand-edited mirror file can
//! legitimately contain.

use crate::error::{FormatError, Result};

// ── Element ───────────────────────────────────────────────────────────────────

/// One node of the mirror tree: ordered attributes, ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub tag:      String,
    pub attrs:    Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text:     String,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Element { tag: tag.to_string(), ..Default::default() }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Set or replace an attribute, preserving insertion order.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Required attribute, parsed as decimal or `0x..` hex.
    pub fn attr_u32(&self, name: &str) -> Result<u32> {
        let raw = self.attr(name).ok_or_else(|| FormatError::Tree {
            elem:   self.tag.clone(),
            reason: format!("missing attribute {name:?}"),
        })?;
        parse_u32(raw).map_err(|reason| FormatError::Tree {
            elem: self.tag.clone(),
            reason: format!("attribute {name:?}: {reason}"),
        })
    }

    pub fn attr_i32(&self, name: &str) -> Result<i32> {
        let v = self.attr_u32(name)?;
        Ok(v as i32)
    }

    /// Optional attribute with the same number grammar.
    pub fn attr_u32_opt(&self, name: &str) -> Result<Option<u32>> {
        match self.attr(name) {
            None => Ok(None),
            Some(_) => self.attr_u32(name).map(Some),
        }
    }

    pub fn require_child(&self, tag: &str) -> Result<&Element> {
        self.child(tag).ok_or_else(|| FormatError::Tree {
            elem:   self.tag.clone(),
            reason: format!("missing child <{tag}>"),
        })
    }
}

fn parse_u32(raw: &str) -> std::result::Result<u32, String> {
    let raw = raw.trim();
    if let Some(hexpart) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u32::from_str_radix(hexpart, 16).map_err(|e| e.to_string())
    } else if let Some(neg) = raw.strip_prefix('-') {
        neg.parse::<u32>().map(|v| v.wrapping_neg()).map_err(|e| e.to_string())
    } else {
        raw.parse::<u32>().map_err(|e| e.to_string())
    }
}

// ── Escaping ──────────────────────────────────────────────────────────────────

/// Escape element text: `& < >` plus control bytes 0–31 except tab/newline.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\t' | '\n' => out.push(c),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("&#x{:02X};", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape attribute text: like [`escape_text`] but tab/newline escape too.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("&#x{:02X};", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let end = rest.find(';').ok_or("unterminated entity")?;
        let entity = &rest[1..end];
        match entity {
            "amp"  => out.push('&'),
            "lt"   => out.push('<'),
            "gt"   => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            e if e.starts_with("#x") || e.starts_with("#X") => {
                let code = u32::from_str_radix(&e[2..], 16).map_err(|e| e.to_string())?;
                out.push(char::from_u32(code).ok_or("bad char ref")?);
            }
            e if e.starts_with('#') => {
                let code: u32 = e[1..].parse().map_err(|_| "bad char ref")?;
                out.push(char::from_u32(code).ok_or("bad char ref")?);
            }
            other => return Err(format!("unknown entity &{other};")),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// ── Serializer ────────────────────────────────────────────────────────────────

/// Serialize a tree to UTF-8 with two-space indentation.
pub fn serialize(root: &Element) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    write_elem(&mut out, root, 0);
    out
}

fn write_elem(out: &mut String, e: &Element, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&e.tag);
    for (k, v) in &e.attrs {
        out.push_str(&format!(" {}=\"{}\"", k, escape_attr(v)));
    }
    if e.children.is_empty() && e.text.is_empty() {
        out.push_str(" />\n");
        return;
    }
    out.push('>');
    if e.children.is_empty() {
        out.push_str(&escape_text(&e.text));
        out.push_str(&format!("</{}>\n", e.tag));
        return;
    }
    out.push('\n');
    if !e.text.is_empty() {
        out.push_str(&"  ".repeat(depth + 1));
        out.push_str(&escape_text(&e.text));
        out.push('\n');
    }
    for c in &e.children {
        write_elem(out, c, depth + 1);
    }
    out.push_str(&indent);
    out.push_str(&format!("</{}>\n", e.tag));
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

/// Parse a mirror document into its root element.
pub fn parse(src: &str) -> Result<Element> {
    let mut p = Parser { src, pos: 0 };
    p.skip_misc();
    let root = p.parse_element()?;
    p.skip_misc();
    if p.pos < p.src.len() {
        return Err(p.err("trailing content after root element"));
    }
    Ok(root)
}

impl<'a> Parser<'a> {
    fn err(&self, reason: &str) -> FormatError {
        FormatError::Tree {
            elem:   format!("offset {}", self.pos),
            reason: reason.to_string(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        while self.rest().starts_with(|c: char| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Skip whitespace, `<?..?>` declarations, and `<!--..-->` comments.
    fn skip_misc(&mut self) {
        loop {
            self.skip_ws();
            if self.rest().starts_with("<?") {
                match self.rest().find("?>") {
                    Some(i) => self.pos += i + 2,
                    None => { self.pos = self.src.len(); return; }
                }
            } else if self.rest().starts_with("<!--") {
                match self.rest().find("-->") {
                    Some(i) => self.pos += i + 3,
                    None => { self.pos = self.src.len(); return; }
                }
            } else {
                return;
            }
        }
    }

    fn take_name(&mut self) -> Result<String> {
        let start = self.pos;
        while self.rest().starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err("expected a name"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn parse_element(&mut self) -> Result<Element> {
        if !self.rest().starts_with('<') {
            return Err(self.err("expected '<'"));
        }
        self.pos += 1;
        let tag = self.take_name()?;
        let mut elem = Element::new(&tag);

        loop {
            self.skip_ws();
            if self.rest().starts_with("/>") {
                self.pos += 2;
                return Ok(elem);
            }
            if self.rest().starts_with('>') {
                self.pos += 1;
                break;
            }
            let name = self.take_name()?;
            self.skip_ws();
            if !self.rest().starts_with('=') {
                return Err(self.err("expected '=' after attribute name"));
            }
            self.pos += 1;
            self.skip_ws();
            if !self.rest().starts_with('"') {
                return Err(self.err("expected '\"'"));
            }
            self.pos += 1;
            let end = self.rest().find('"').ok_or_else(|| self.err("unterminated attribute"))?;
            let raw = &self.src[self.pos..self.pos + end];
            self.pos += end + 1;
            let value = unescape(raw).map_err(|e| self.err(&e))?;
            elem.attrs.push((name, value));
        }

        // Content: interleaved text and children until the closing tag.
        let mut text = String::new();
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(self.err("unexpected end of document"));
            }
            if rest.starts_with("</") {
                self.pos += 2;
                let close = self.take_name()?;
                if close != tag {
                    return Err(self.err(&format!("mismatched </{close}>, expected </{tag}>")));
                }
                self.skip_ws();
                if !self.rest().starts_with('>') {
                    return Err(self.err("expected '>'"));
                }
                self.pos += 1;
                let trimmed = text.trim();
                elem.text = unescape(trimmed).map_err(|e| self.err(&e))?;
                return Ok(elem);
            }
            if rest.starts_with("<!--") {
                self.skip_misc();
                continue;
            }
            if rest.starts_with('<') {
                let child = self.parse_element()?;
                elem.children.push(child);
                continue;
            }
            let next = rest.find('<').unwrap_or(rest.len());
            text.push_str(&rest[..next]);
            self.pos += next;
        }
    }
}

// ── Attribute formatting helpers ─────────────────────────────────────────────

/// Format a 4-byte identity tag for an attribute: printable ASCII stays as
/// text, anything else becomes hex.
pub fn ident_to_text(ident: &[u8; 4]) -> String {
    if ident.iter().all(|b| (0x20..0x7F).contains(b)) {
        String::from_utf8_lossy(ident).into_owned()
    } else {
        format!("0x{}", hex::encode(ident))
    }
}

/// Parse the form produced by [`ident_to_text`].
pub fn ident_from_text(text: &str) -> Result<[u8; 4]> {
    let bad = |reason: String| FormatError::Tree {
        elem:   "ident".to_string(),
        reason,
    };
    if let Some(hexpart) = text.strip_prefix("0x") {
        let bytes = hex::decode(hexpart).map_err(|e| bad(e.to_string()))?;
        let arr: [u8; 4] = bytes.try_into()
            .map_err(|_| bad("identity must be 4 bytes".to_string()))?;
        return Ok(arr);
    }
    let bytes = text.as_bytes();
    if bytes.len() != 4 {
        return Err(bad(format!("identity {text:?} must be 4 ASCII bytes")));
    }
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}
