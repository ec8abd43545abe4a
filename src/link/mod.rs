//! Link-object registry: tagged dispatch over 4-byte identity codes.
//!
//! # Identity rules
//! Every link object begins with a frozen 4-byte identity.  Identity plus,
//! for a few kinds, the identity of the containing list selects the
//! concrete payload layout.  Classification is first-match-wins over the
//! ordered rule table below; context rules (list + identity) sort before
//! bare identity rules so an ambiguous code resolves through its list.
//!
//! An unrecognized identity is fatal — there is no per-record length
//! framing, so nothing after an unknown record can be located.  Catalogued
//! identities whose payload layout is not reverse engineered yet classify
//! successfully but fail loudly at parse time for the same reason:
//! silently truncating one record corrupts every record that follows it in
//! the section.
//!
//! Record kinds are an open set: each kind is self-contained, composed
//! from the reusable blocks in `linkinfo`, and new kinds are added by
//! appending a rule and a payload variant without touching existing ones.

use byteorder::{BigEndian, WriteBytesExt};

use crate::document::Document;
use crate::error::{FormatError, Result};
use crate::field::{self, BeCursor};
use crate::linkinfo::{
    BasicLinkSaveInfo, GiLinkInfo, OffsetListInfo, TypedLinkSaveInfo, UdClassApiCache,
};
use crate::path::PathRecord;
use crate::record::BinRecord;
use crate::tree::{self, Element};

// ── List identities ───────────────────────────────────────────────────────────

/// Containing-list identities that participate in two-key classification.
pub const LIST_VI_LINKS:   [u8; 4] = *b"LVIN";
pub const LIST_CC_LINKS:   [u8; 4] = *b"LVCC";
pub const LIST_HEAP_LINKS: [u8; 4] = *b"DSTM";

// ── Kinds ─────────────────────────────────────────────────────────────────────

/// Every catalogued record kind.  `Unimplemented` carries the catalogue
/// name of a kind whose identity is known but whose payload layout is only
/// partially reverse engineered; parsing one is a fatal stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkObjKind {
    HeapToVi,
    HeapToCcSymbol,
    HeapToFile,
    HeapToFileNoWarn,
    HeapToRcFile,
    VrtPathToFile,
    HeapToXCtlFace,
    HeapToXNode,
    XNodeToXInterface,
    XNodeToExtFuncRte,
    ViToVi,
    ViToLib,
    ViToMsFile,
    UdClassDdoToApi,
    UdClassHeapToApi,
    DdoToTypeDef,
    HeapToPolySymbol,
    ViToPolyVi,
    ViToGInterface,
    GiToGInterface,
    Unimplemented(&'static str),
}

impl LinkObjKind {
    pub fn name(self) -> &'static str {
        match self {
            LinkObjKind::HeapToVi          => "HeapToVi",
            LinkObjKind::HeapToCcSymbol    => "HeapToCcSymbol",
            LinkObjKind::HeapToFile        => "HeapToFile",
            LinkObjKind::HeapToFileNoWarn  => "HeapToFileNoWarn",
            LinkObjKind::HeapToRcFile      => "HeapToRcFile",
            LinkObjKind::VrtPathToFile     => "VrtPathToFile",
            LinkObjKind::HeapToXCtlFace    => "HeapToXCtlFace",
            LinkObjKind::HeapToXNode       => "HeapToXNode",
            LinkObjKind::XNodeToXInterface => "XNodeToXInterface",
            LinkObjKind::XNodeToExtFuncRte => "XNodeToExtFuncRte",
            LinkObjKind::ViToVi            => "ViToVi",
            LinkObjKind::ViToLib           => "ViToLib",
            LinkObjKind::ViToMsFile        => "ViToMsFile",
            LinkObjKind::UdClassDdoToApi   => "UdClassDdoToApi",
            LinkObjKind::UdClassHeapToApi  => "UdClassHeapToApi",
            LinkObjKind::DdoToTypeDef      => "DdoToTypeDef",
            LinkObjKind::HeapToPolySymbol  => "HeapToPolySymbol",
            LinkObjKind::ViToPolyVi        => "ViToPolyVi",
            LinkObjKind::ViToGInterface    => "ViToGInterface",
            LinkObjKind::GiToGInterface    => "GiToGInterface",
            LinkObjKind::Unimplemented(name) => name,
        }
    }
}

/// One classification rule: optional containing-list key + identity.
struct Rule {
    list:  Option<[u8; 4]>,
    ident: [u8; 4],
    kind:  LinkObjKind,
}

const fn rule(list: Option<[u8; 4]>, ident: &[u8; 4], kind: LinkObjKind) -> Rule {
    Rule { list, ident: *ident, kind }
}

/// Ordered rule table.  Context rules first — `LINK` is legitimately
/// ambiguous and resolves through its containing list.
static RULES: &[Rule] = &[
    // Two-key rules for ambiguous identities.
    rule(Some(LIST_VI_LINKS),   b"LINK", LinkObjKind::ViToVi),
    rule(Some(LIST_HEAP_LINKS), b"LINK", LinkObjKind::HeapToVi),
    rule(Some(LIST_CC_LINKS),   b"SYMB", LinkObjKind::HeapToCcSymbol),
    rule(Some(LIST_HEAP_LINKS), b"SYMB", LinkObjKind::HeapToPolySymbol),
    // Bare identity rules.
    rule(None, b"H2VI", LinkObjKind::HeapToVi),
    rule(None, b"H2CC", LinkObjKind::HeapToCcSymbol),
    rule(None, b"H2FL", LinkObjKind::HeapToFile),
    rule(None, b"H2FN", LinkObjKind::HeapToFileNoWarn),
    rule(None, b"H2RC", LinkObjKind::HeapToRcFile),
    rule(None, b"VPTF", LinkObjKind::VrtPathToFile),
    rule(None, b"H2XF", LinkObjKind::HeapToXCtlFace),
    rule(None, b"H2XN", LinkObjKind::HeapToXNode),
    rule(None, b"XNXI", LinkObjKind::XNodeToXInterface),
    rule(None, b"XNEF", LinkObjKind::XNodeToExtFuncRte),
    rule(None, b"V2VI", LinkObjKind::ViToVi),
    rule(None, b"V2LB", LinkObjKind::ViToLib),
    rule(None, b"V2MS", LinkObjKind::ViToMsFile),
    rule(None, b"UDDA", LinkObjKind::UdClassDdoToApi),
    rule(None, b"UDHA", LinkObjKind::UdClassHeapToApi),
    rule(None, b"DDTD", LinkObjKind::DdoToTypeDef),
    rule(None, b"H2PS", LinkObjKind::HeapToPolySymbol),
    rule(None, b"V2PV", LinkObjKind::ViToPolyVi),
    rule(None, b"V2GI", LinkObjKind::ViToGInterface),
    rule(None, b"GIGI", LinkObjKind::GiToGInterface),
    // Catalogued identities with partially reverse-engineered payloads.
    rule(None, b"HOVI", LinkObjKind::Unimplemented("HeapToOverrideVi")),
    rule(None, b"HMVI", LinkObjKind::Unimplemented("HeapToMemberVi")),
    rule(None, b"H2PR", LinkObjKind::Unimplemented("HeapToProgRes")),
    rule(None, b"H2QB", LinkObjKind::Unimplemented("HeapToQbSymbol")),
    rule(None, b"H2AB", LinkObjKind::Unimplemented("HeapToAbility")),
    rule(None, b"H2CN", LinkObjKind::Unimplemented("HeapToContainer")),
    rule(None, b"H2MX", LinkObjKind::Unimplemented("HeapToMathScript")),
    rule(None, b"H2DL", LinkObjKind::Unimplemented("HeapToDynLib")),
    rule(None, b"V2CC", LinkObjKind::Unimplemented("ViToCcSymbol")),
    rule(None, b"V2FL", LinkObjKind::Unimplemented("ViToFile")),
    rule(None, b"V2FN", LinkObjKind::Unimplemented("ViToFileNoWarn")),
    rule(None, b"V2RC", LinkObjKind::Unimplemented("ViToRcFile")),
    rule(None, b"V2AB", LinkObjKind::Unimplemented("ViToAbility")),
    rule(None, b"V2PR", LinkObjKind::Unimplemented("ViToProgRes")),
    rule(None, b"V2XN", LinkObjKind::Unimplemented("ViToXNode")),
    rule(None, b"V2XF", LinkObjKind::Unimplemented("ViToXCtlFace")),
    rule(None, b"V2DL", LinkObjKind::Unimplemented("ViToDynLib")),
    rule(None, b"V2MB", LinkObjKind::Unimplemented("ViToMemberVi")),
    rule(None, b"V2OV", LinkObjKind::Unimplemented("ViToOverrideVi")),
    rule(None, b"XN2F", LinkObjKind::Unimplemented("XNodeToFile")),
    rule(None, b"XN2V", LinkObjKind::Unimplemented("XNodeToVi")),
    rule(None, b"UDPI", LinkObjKind::Unimplemented("UdClassPrivDataIface")),
    rule(None, b"UDPR", LinkObjKind::Unimplemented("UdClassPropertyRef")),
    rule(None, b"DD2V", LinkObjKind::Unimplemented("DdoToVi")),
    rule(None, b"DD2F", LinkObjKind::Unimplemented("DdoToFile")),
    rule(None, b"ST2V", LinkObjKind::Unimplemented("StaticViRefToVi")),
    rule(None, b"AX2I", LinkObjKind::Unimplemented("ActiveXToTypeLib")),
    rule(None, b"NET2", LinkObjKind::Unimplemented("DotNetToAssembly")),
    rule(None, b"OMRC", LinkObjKind::Unimplemented("OmRcToResource")),
    rule(None, b"PRB2", LinkObjKind::Unimplemented("ProbeToVi")),
];

/// Map `(containing-list identity, identity)` to a record kind.
///
/// First-match-wins over [`RULES`]; unknown combinations are fatal.
pub fn classify(list_ident: [u8; 4], ident: [u8; 4]) -> Result<LinkObjKind> {
    for r in RULES {
        if r.ident != ident {
            continue;
        }
        match r.list {
            Some(list) if list != list_ident => continue,
            _ => return Ok(r.kind),
        }
    }
    Err(FormatError::UnknownIdentity {
        list_ident: tree::ident_to_text(&list_ident),
        ident:      tree::ident_to_text(&ident),
    })
}

/// Identity written on the wire for a concrete kind.  The ambiguous
/// two-key kinds keep their context identity when they were created from
/// one; this is the default identity used for records built from scratch.
pub fn default_ident(kind: LinkObjKind) -> [u8; 4] {
    match kind {
        LinkObjKind::HeapToVi          => *b"H2VI",
        LinkObjKind::HeapToCcSymbol    => *b"H2CC",
        LinkObjKind::HeapToFile        => *b"H2FL",
        LinkObjKind::HeapToFileNoWarn  => *b"H2FN",
        LinkObjKind::HeapToRcFile      => *b"H2RC",
        LinkObjKind::VrtPathToFile     => *b"VPTF",
        LinkObjKind::HeapToXCtlFace    => *b"H2XF",
        LinkObjKind::HeapToXNode       => *b"H2XN",
        LinkObjKind::XNodeToXInterface => *b"XNXI",
        LinkObjKind::XNodeToExtFuncRte => *b"XNEF",
        LinkObjKind::ViToVi            => *b"V2VI",
        LinkObjKind::ViToLib           => *b"V2LB",
        LinkObjKind::ViToMsFile        => *b"V2MS",
        LinkObjKind::UdClassDdoToApi   => *b"UDDA",
        LinkObjKind::UdClassHeapToApi  => *b"UDHA",
        LinkObjKind::DdoToTypeDef      => *b"DDTD",
        LinkObjKind::HeapToPolySymbol  => *b"H2PS",
        LinkObjKind::ViToPolyVi        => *b"V2PV",
        LinkObjKind::ViToGInterface    => *b"V2GI",
        LinkObjKind::GiToGInterface    => *b"GIGI",
        LinkObjKind::Unimplemented(_)  => *b"\0\0\0\0",
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Concrete payload per kind, composed from `linkinfo` blocks by value.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkPayload {
    HeapToVi { typed: TypedLinkSaveInfo, heap_uid: u32 },
    HeapToCcSymbol { basic: BasicLinkSaveInfo, symbol: Vec<u8> },
    HeapToFile { basic: BasicLinkSaveInfo, file_flags: u32 },
    HeapToFileNoWarn { basic: BasicLinkSaveInfo },
    HeapToRcFile { basic: BasicLinkSaveInfo, offsets: OffsetListInfo },
    VrtPathToFile { path: PathRecord, flags: u32 },
    HeapToXCtlFace { typed: TypedLinkSaveInfo, gi: GiLinkInfo },
    HeapToXNode { basic: BasicLinkSaveInfo, gi: GiLinkInfo },
    XNodeToXInterface { basic: BasicLinkSaveInfo, iface_version: u32 },
    XNodeToExtFuncRte { basic: BasicLinkSaveInfo, func_name: Vec<u8> },
    ViToVi { typed: TypedLinkSaveInfo },
    ViToLib { basic: BasicLinkSaveInfo, lib_flags: u32 },
    ViToMsFile { basic: BasicLinkSaveInfo, offsets: OffsetListInfo },
    UdClassDdoToApi { cache: UdClassApiCache, typed: TypedLinkSaveInfo },
    UdClassHeapToApi { cache: UdClassApiCache, basic: BasicLinkSaveInfo },
    DdoToTypeDef { typed: TypedLinkSaveInfo, dd_index: u32 },
    HeapToPolySymbol { basic: BasicLinkSaveInfo, symbol: Vec<u8>, poly_index: u32 },
    ViToPolyVi { typed: TypedLinkSaveInfo, offsets: OffsetListInfo },
    ViToGInterface { basic: BasicLinkSaveInfo, gi: GiLinkInfo },
    GiToGInterface { gi: GiLinkInfo, basic: BasicLinkSaveInfo },
}

// ── LinkObject ────────────────────────────────────────────────────────────────

/// One parsed link object.  Created by the registry factory from either a
/// binary cursor or a mirror-tree subtree; mutated only during late fixup;
/// dropped with its owning document.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkObject {
    pub list_ident: [u8; 4],
    pub ident:      [u8; 4],
    pub payload:    LinkPayload,
}

impl LinkObject {
    /// Factory: classify and parse one object from the cursor.
    pub fn parse_from(list_ident: [u8; 4], doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<Self> {
        let ident = cursor.read_ident("ident")?;
        let kind = classify(list_ident, ident)?;
        let payload = Self::parse_payload(kind, ident, doc, cursor)?;
        Ok(LinkObject { list_ident, ident, payload })
    }

    fn parse_payload(
        kind:   LinkObjKind,
        ident:  [u8; 4],
        doc:    &mut Document,
        cursor: &mut BeCursor<'_>,
    ) -> Result<LinkPayload> {
        Ok(match kind {
            LinkObjKind::HeapToVi => {
                let mut typed = TypedLinkSaveInfo::default();
                typed.parse(doc, cursor)?;
                let heap_uid = cursor.read_u32("heap_uid")?;
                LinkPayload::HeapToVi { typed, heap_uid }
            }
            LinkObjKind::HeapToCcSymbol => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let symbol = cursor.read_lstring(&doc.limits, "symbol")?;
                LinkPayload::HeapToCcSymbol { basic, symbol }
            }
            LinkObjKind::HeapToFile => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let file_flags = cursor.read_u32("file_flags")?;
                LinkPayload::HeapToFile { basic, file_flags }
            }
            LinkObjKind::HeapToFileNoWarn => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                LinkPayload::HeapToFileNoWarn { basic }
            }
            LinkObjKind::HeapToRcFile => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let mut offsets = OffsetListInfo::default();
                offsets.parse(doc, cursor)?;
                LinkPayload::HeapToRcFile { basic, offsets }
            }
            LinkObjKind::VrtPathToFile => {
                let mut path = PathRecord::default();
                path.parse(doc, cursor)?;
                let flags = cursor.read_u32("flags")?;
                LinkPayload::VrtPathToFile { path, flags }
            }
            LinkObjKind::HeapToXCtlFace => {
                let mut typed = TypedLinkSaveInfo::default();
                typed.parse(doc, cursor)?;
                let mut gi = GiLinkInfo::default();
                gi.parse(cursor)?;
                LinkPayload::HeapToXCtlFace { typed, gi }
            }
            LinkObjKind::HeapToXNode => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let mut gi = GiLinkInfo::default();
                gi.parse(cursor)?;
                LinkPayload::HeapToXNode { basic, gi }
            }
            LinkObjKind::XNodeToXInterface => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let iface_version = cursor.read_u32("iface_version")?;
                LinkPayload::XNodeToXInterface { basic, iface_version }
            }
            LinkObjKind::XNodeToExtFuncRte => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let func_name = cursor.read_lstring(&doc.limits, "func_name")?;
                LinkPayload::XNodeToExtFuncRte { basic, func_name }
            }
            LinkObjKind::ViToVi => {
                let mut typed = TypedLinkSaveInfo::default();
                typed.parse(doc, cursor)?;
                LinkPayload::ViToVi { typed }
            }
            LinkObjKind::ViToLib => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let lib_flags = cursor.read_u32("lib_flags")?;
                LinkPayload::ViToLib { basic, lib_flags }
            }
            LinkObjKind::ViToMsFile => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let mut offsets = OffsetListInfo::default();
                offsets.parse(doc, cursor)?;
                LinkPayload::ViToMsFile { basic, offsets }
            }
            LinkObjKind::UdClassDdoToApi => {
                let mut cache = UdClassApiCache::default();
                cache.parse(doc, cursor)?;
                let mut typed = TypedLinkSaveInfo::default();
                typed.parse(doc, cursor)?;
                LinkPayload::UdClassDdoToApi { cache, typed }
            }
            LinkObjKind::UdClassHeapToApi => {
                let mut cache = UdClassApiCache::default();
                cache.parse(doc, cursor)?;
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                LinkPayload::UdClassHeapToApi { cache, basic }
            }
            LinkObjKind::DdoToTypeDef => {
                let mut typed = TypedLinkSaveInfo::default();
                typed.parse(doc, cursor)?;
                let dd_index = cursor.read_var1("dd_index")?;
                LinkPayload::DdoToTypeDef { typed, dd_index }
            }
            LinkObjKind::HeapToPolySymbol => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let symbol = cursor.read_pstring(2, &doc.limits, "symbol")?;
                let poly_index = cursor.read_u32("poly_index")?;
                LinkPayload::HeapToPolySymbol { basic, symbol, poly_index }
            }
            LinkObjKind::ViToPolyVi => {
                let mut typed = TypedLinkSaveInfo::default();
                typed.parse(doc, cursor)?;
                let mut offsets = OffsetListInfo::default();
                offsets.parse(doc, cursor)?;
                LinkPayload::ViToPolyVi { typed, offsets }
            }
            LinkObjKind::ViToGInterface => {
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                let mut gi = GiLinkInfo::default();
                gi.parse(cursor)?;
                LinkPayload::ViToGInterface { basic, gi }
            }
            LinkObjKind::GiToGInterface => {
                let mut gi = GiLinkInfo::default();
                gi.parse(cursor)?;
                let mut basic = BasicLinkSaveInfo::default();
                basic.parse(doc, cursor)?;
                LinkPayload::GiToGInterface { gi, basic }
            }
            LinkObjKind::Unimplemented(name) => {
                return Err(FormatError::NotImplemented {
                    kind:  name,
                    ident: tree::ident_to_text(&ident),
                });
            }
        })
    }

    pub fn kind_of(&self) -> LinkObjKind {
        match &self.payload {
            LinkPayload::HeapToVi { .. }          => LinkObjKind::HeapToVi,
            LinkPayload::HeapToCcSymbol { .. }    => LinkObjKind::HeapToCcSymbol,
            LinkPayload::HeapToFile { .. }        => LinkObjKind::HeapToFile,
            LinkPayload::HeapToFileNoWarn { .. }  => LinkObjKind::HeapToFileNoWarn,
            LinkPayload::HeapToRcFile { .. }      => LinkObjKind::HeapToRcFile,
            LinkPayload::VrtPathToFile { .. }     => LinkObjKind::VrtPathToFile,
            LinkPayload::HeapToXCtlFace { .. }    => LinkObjKind::HeapToXCtlFace,
            LinkPayload::HeapToXNode { .. }       => LinkObjKind::HeapToXNode,
            LinkPayload::XNodeToXInterface { .. } => LinkObjKind::XNodeToXInterface,
            LinkPayload::XNodeToExtFuncRte { .. } => LinkObjKind::XNodeToExtFuncRte,
            LinkPayload::ViToVi { .. }            => LinkObjKind::ViToVi,
            LinkPayload::ViToLib { .. }           => LinkObjKind::ViToLib,
            LinkPayload::ViToMsFile { .. }        => LinkObjKind::ViToMsFile,
            LinkPayload::UdClassDdoToApi { .. }   => LinkObjKind::UdClassDdoToApi,
            LinkPayload::UdClassHeapToApi { .. }  => LinkObjKind::UdClassHeapToApi,
            LinkPayload::DdoToTypeDef { .. }      => LinkObjKind::DdoToTypeDef,
            LinkPayload::HeapToPolySymbol { .. }  => LinkObjKind::HeapToPolySymbol,
            LinkPayload::ViToPolyVi { .. }        => LinkObjKind::ViToPolyVi,
            LinkPayload::ViToGInterface { .. }    => LinkObjKind::ViToGInterface,
            LinkPayload::GiToGInterface { .. }    => LinkObjKind::GiToGInterface,
        }
    }
}

impl BinRecord for LinkObject {
    fn kind(&self) -> &'static str {
        self.kind_of().name()
    }

    fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        *self = LinkObject::parse_from(self.list_ident, doc, cursor)?;
        Ok(())
    }

    fn serialize(&self, doc: &Document, _avoid_recompute: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.ident);
        match &self.payload {
            LinkPayload::HeapToVi { typed, heap_uid } => {
                typed.serialize(doc, &mut out)?;
                out.write_u32::<BigEndian>(*heap_uid).expect("vec write");
            }
            LinkPayload::HeapToCcSymbol { basic, symbol } => {
                basic.serialize(doc, &mut out)?;
                field::write_lstring(&mut out, symbol);
            }
            LinkPayload::HeapToFile { basic, file_flags } => {
                basic.serialize(doc, &mut out)?;
                out.write_u32::<BigEndian>(*file_flags).expect("vec write");
            }
            LinkPayload::HeapToFileNoWarn { basic } => {
                basic.serialize(doc, &mut out)?;
            }
            LinkPayload::HeapToRcFile { basic, offsets } => {
                basic.serialize(doc, &mut out)?;
                offsets.serialize(doc, &mut out)?;
            }
            LinkPayload::VrtPathToFile { path, flags } => {
                out.extend_from_slice(&path.serialize(doc, false)?);
                out.write_u32::<BigEndian>(*flags).expect("vec write");
            }
            LinkPayload::HeapToXCtlFace { typed, gi } => {
                typed.serialize(doc, &mut out)?;
                gi.serialize(&mut out);
            }
            LinkPayload::HeapToXNode { basic, gi } => {
                basic.serialize(doc, &mut out)?;
                gi.serialize(&mut out);
            }
            LinkPayload::XNodeToXInterface { basic, iface_version } => {
                basic.serialize(doc, &mut out)?;
                out.write_u32::<BigEndian>(*iface_version).expect("vec write");
            }
            LinkPayload::XNodeToExtFuncRte { basic, func_name } => {
                basic.serialize(doc, &mut out)?;
                field::write_lstring(&mut out, func_name);
            }
            LinkPayload::ViToVi { typed } => {
                typed.serialize(doc, &mut out)?;
            }
            LinkPayload::ViToLib { basic, lib_flags } => {
                basic.serialize(doc, &mut out)?;
                out.write_u32::<BigEndian>(*lib_flags).expect("vec write");
            }
            LinkPayload::ViToMsFile { basic, offsets } => {
                basic.serialize(doc, &mut out)?;
                offsets.serialize(doc, &mut out)?;
            }
            LinkPayload::UdClassDdoToApi { cache, typed } => {
                cache.serialize(doc, &mut out)?;
                typed.serialize(doc, &mut out)?;
            }
            LinkPayload::UdClassHeapToApi { cache, basic } => {
                cache.serialize(doc, &mut out)?;
                basic.serialize(doc, &mut out)?;
            }
            LinkPayload::DdoToTypeDef { typed, dd_index } => {
                typed.serialize(doc, &mut out)?;
                field::write_var1(&mut out, *dd_index)?;
            }
            LinkPayload::HeapToPolySymbol { basic, symbol, poly_index } => {
                basic.serialize(doc, &mut out)?;
                field::write_pstring(&mut out, symbol, 2);
                out.write_u32::<BigEndian>(*poly_index).expect("vec write");
            }
            LinkPayload::ViToPolyVi { typed, offsets } => {
                typed.serialize(doc, &mut out)?;
                offsets.serialize(doc, &mut out)?;
            }
            LinkPayload::ViToGInterface { basic, gi } => {
                basic.serialize(doc, &mut out)?;
                gi.serialize(&mut out);
            }
            LinkPayload::GiToGInterface { gi, basic } => {
                gi.serialize(&mut out);
                basic.serialize(doc, &mut out)?;
            }
        }
        Ok(out)
    }

    fn expected_size(&self, doc: &Document) -> Result<usize> {
        let payload = match &self.payload {
            LinkPayload::HeapToVi { typed, .. } => typed.size(doc)? + 4,
            LinkPayload::HeapToCcSymbol { basic, symbol } => {
                basic.size(doc)? + field::lstring_size(symbol.len())
            }
            LinkPayload::HeapToFile { basic, .. } => basic.size(doc)? + 4,
            LinkPayload::HeapToFileNoWarn { basic } => basic.size(doc)?,
            LinkPayload::HeapToRcFile { basic, offsets } => basic.size(doc)? + offsets.size(),
            LinkPayload::VrtPathToFile { path, .. } => path.expected_size(doc)? + 4,
            LinkPayload::HeapToXCtlFace { typed, gi } => typed.size(doc)? + gi.size(),
            LinkPayload::HeapToXNode { basic, gi } => basic.size(doc)? + gi.size(),
            LinkPayload::XNodeToXInterface { basic, .. } => basic.size(doc)? + 4,
            LinkPayload::XNodeToExtFuncRte { basic, func_name } => {
                basic.size(doc)? + field::lstring_size(func_name.len())
            }
            LinkPayload::ViToVi { typed } => typed.size(doc)?,
            LinkPayload::ViToLib { basic, .. } => basic.size(doc)? + 4,
            LinkPayload::ViToMsFile { basic, offsets } => basic.size(doc)? + offsets.size(),
            LinkPayload::UdClassDdoToApi { cache, typed } => cache.size(doc) + typed.size(doc)?,
            LinkPayload::UdClassHeapToApi { cache, basic } => cache.size(doc) + basic.size(doc)?,
            LinkPayload::DdoToTypeDef { typed, dd_index } => {
                typed.size(doc)? + field::var1_size(*dd_index)
            }
            LinkPayload::HeapToPolySymbol { basic, symbol, .. } => {
                basic.size(doc)? + field::pstring_size(symbol.len(), 2) + 4
            }
            LinkPayload::ViToPolyVi { typed, offsets } => typed.size(doc)? + offsets.size(),
            LinkPayload::ViToGInterface { basic, gi } => basic.size(doc)? + gi.size(),
            LinkPayload::GiToGInterface { gi, basic } => gi.size() + basic.size(doc)?,
        };
        Ok(4 + payload)
    }

    fn import_tree(&mut self, doc: &mut Document, elem: &Element) -> Result<()> {
        let ident_text = elem.attr("ident").ok_or_else(|| FormatError::Tree {
            elem:   elem.tag.clone(),
            reason: "missing attribute \"ident\"".to_string(),
        })?;
        let ident = tree::ident_from_text(ident_text)?;
        let kind = classify(self.list_ident, ident)?;
        self.ident = ident;
        self.payload = Self::import_payload(kind, ident, doc, elem)?;
        Ok(())
    }

    fn export_tree(&self, doc: &Document) -> Result<Element> {
        let mut e = Element::new("LinkObject");
        e.set_attr("ident", tree::ident_to_text(&self.ident));
        e.set_attr("kind", self.kind());
        match &self.payload {
            LinkPayload::HeapToVi { typed, heap_uid } => {
                e.set_attr("heap_uid", heap_uid.to_string());
                e.push(typed.export_tree(doc)?);
            }
            LinkPayload::HeapToCcSymbol { basic, symbol } => {
                e.set_attr("symbol", String::from_utf8_lossy(symbol));
                e.push(basic.export_tree(doc)?);
            }
            LinkPayload::HeapToFile { basic, file_flags } => {
                e.set_attr("file_flags", format!("0x{file_flags:08x}"));
                e.push(basic.export_tree(doc)?);
            }
            LinkPayload::HeapToFileNoWarn { basic } => {
                e.push(basic.export_tree(doc)?);
            }
            LinkPayload::HeapToRcFile { basic, offsets } => {
                e.push(basic.export_tree(doc)?);
                e.push(offsets.export_tree());
            }
            LinkPayload::VrtPathToFile { path, flags } => {
                e.set_attr("flags", format!("0x{flags:08x}"));
                e.push(path.export_tree(doc)?);
            }
            LinkPayload::HeapToXCtlFace { typed, gi } => {
                e.push(typed.export_tree(doc)?);
                e.push(gi.export_tree());
            }
            LinkPayload::HeapToXNode { basic, gi } => {
                e.push(basic.export_tree(doc)?);
                e.push(gi.export_tree());
            }
            LinkPayload::XNodeToXInterface { basic, iface_version } => {
                e.set_attr("iface_version", iface_version.to_string());
                e.push(basic.export_tree(doc)?);
            }
            LinkPayload::XNodeToExtFuncRte { basic, func_name } => {
                e.set_attr("func_name", String::from_utf8_lossy(func_name));
                e.push(basic.export_tree(doc)?);
            }
            LinkPayload::ViToVi { typed } => {
                e.push(typed.export_tree(doc)?);
            }
            LinkPayload::ViToLib { basic, lib_flags } => {
                e.set_attr("lib_flags", format!("0x{lib_flags:08x}"));
                e.push(basic.export_tree(doc)?);
            }
            LinkPayload::ViToMsFile { basic, offsets } => {
                e.push(basic.export_tree(doc)?);
                e.push(offsets.export_tree());
            }
            LinkPayload::UdClassDdoToApi { cache, typed } => {
                e.push(cache.export_tree());
                e.push(typed.export_tree(doc)?);
            }
            LinkPayload::UdClassHeapToApi { cache, basic } => {
                e.push(cache.export_tree());
                e.push(basic.export_tree(doc)?);
            }
            LinkPayload::DdoToTypeDef { typed, dd_index } => {
                e.set_attr("dd_index", dd_index.to_string());
                e.push(typed.export_tree(doc)?);
            }
            LinkPayload::HeapToPolySymbol { basic, symbol, poly_index } => {
                e.set_attr("symbol", String::from_utf8_lossy(symbol));
                e.set_attr("poly_index", poly_index.to_string());
                e.push(basic.export_tree(doc)?);
            }
            LinkPayload::ViToPolyVi { typed, offsets } => {
                e.push(typed.export_tree(doc)?);
                e.push(offsets.export_tree());
            }
            LinkPayload::ViToGInterface { basic, gi } => {
                e.push(basic.export_tree(doc)?);
                e.push(gi.export_tree());
            }
            LinkPayload::GiToGInterface { gi, basic } => {
                e.push(gi.export_tree());
                e.push(basic.export_tree(doc)?);
            }
        }
        Ok(e)
    }

    fn late_fixup(&mut self, doc: &mut Document) -> Result<()> {
        match &mut self.payload {
            LinkPayload::HeapToVi { typed, .. }
            | LinkPayload::HeapToXCtlFace { typed, .. }
            | LinkPayload::ViToVi { typed }
            | LinkPayload::UdClassDdoToApi { typed, .. }
            | LinkPayload::DdoToTypeDef { typed, .. }
            | LinkPayload::ViToPolyVi { typed, .. } => typed.late_fixup(doc),
            _ => Ok(()),
        }
    }

    fn check_sanity(&self) -> bool {
        match &self.payload {
            LinkPayload::HeapToCcSymbol { symbol, .. } => !symbol.is_empty(),
            LinkPayload::HeapToPolySymbol { symbol, .. } => !symbol.is_empty(),
            LinkPayload::VrtPathToFile { path, .. } => path.check_sanity(),
            _ => true,
        }
    }
}

impl LinkObject {
    fn import_payload(
        kind:  LinkObjKind,
        ident: [u8; 4],
        doc:   &mut Document,
        elem:  &Element,
    ) -> Result<LinkPayload> {
        let typed = |doc: &mut Document| -> Result<TypedLinkSaveInfo> {
            let mut t = TypedLinkSaveInfo::default();
            t.import_tree(doc, elem.require_child("TypedLinkSaveInfo")?)?;
            Ok(t)
        };
        let basic = |doc: &mut Document| -> Result<BasicLinkSaveInfo> {
            let mut b = BasicLinkSaveInfo::default();
            b.import_tree(doc, elem.require_child("BasicLinkSaveInfo")?)?;
            Ok(b)
        };
        let offsets = |doc: &Document| -> Result<OffsetListInfo> {
            let mut o = OffsetListInfo::default();
            o.import_tree(doc, elem.require_child("OffsetList")?)?;
            Ok(o)
        };
        let gi = || -> Result<GiLinkInfo> {
            let mut g = GiLinkInfo::default();
            g.import_tree(elem.require_child("GiLinkInfo")?)?;
            Ok(g)
        };
        let cache = |doc: &Document| -> Result<UdClassApiCache> {
            let mut c = UdClassApiCache::default();
            c.import_tree(doc, elem.require_child("UdClassApiCache")?)?;
            Ok(c)
        };
        let attr_bytes = |name: &str| -> Vec<u8> {
            elem.attr(name).unwrap_or_default().as_bytes().to_vec()
        };

        Ok(match kind {
            LinkObjKind::HeapToVi => LinkPayload::HeapToVi {
                typed: typed(doc)?,
                heap_uid: elem.attr_u32("heap_uid")?,
            },
            LinkObjKind::HeapToCcSymbol => LinkPayload::HeapToCcSymbol {
                basic: basic(doc)?,
                symbol: attr_bytes("symbol"),
            },
            LinkObjKind::HeapToFile => LinkPayload::HeapToFile {
                basic: basic(doc)?,
                file_flags: elem.attr_u32("file_flags")?,
            },
            LinkObjKind::HeapToFileNoWarn => LinkPayload::HeapToFileNoWarn { basic: basic(doc)? },
            LinkObjKind::HeapToRcFile => LinkPayload::HeapToRcFile {
                basic: basic(doc)?,
                offsets: offsets(doc)?,
            },
            LinkObjKind::VrtPathToFile => {
                let mut path = PathRecord::default();
                path.import_tree(doc, elem.require_child("Path")?)?;
                LinkPayload::VrtPathToFile { path, flags: elem.attr_u32("flags")? }
            }
            LinkObjKind::HeapToXCtlFace => LinkPayload::HeapToXCtlFace {
                typed: typed(doc)?,
                gi: gi()?,
            },
            LinkObjKind::HeapToXNode => LinkPayload::HeapToXNode {
                basic: basic(doc)?,
                gi: gi()?,
            },
            LinkObjKind::XNodeToXInterface => LinkPayload::XNodeToXInterface {
                basic: basic(doc)?,
                iface_version: elem.attr_u32("iface_version")?,
            },
            LinkObjKind::XNodeToExtFuncRte => LinkPayload::XNodeToExtFuncRte {
                basic: basic(doc)?,
                func_name: attr_bytes("func_name"),
            },
            LinkObjKind::ViToVi => LinkPayload::ViToVi { typed: typed(doc)? },
            LinkObjKind::ViToLib => LinkPayload::ViToLib {
                basic: basic(doc)?,
                lib_flags: elem.attr_u32("lib_flags")?,
            },
            LinkObjKind::ViToMsFile => LinkPayload::ViToMsFile {
                basic: basic(doc)?,
                offsets: offsets(doc)?,
            },
            LinkObjKind::UdClassDdoToApi => LinkPayload::UdClassDdoToApi {
                cache: cache(doc)?,
                typed: typed(doc)?,
            },
            LinkObjKind::UdClassHeapToApi => LinkPayload::UdClassHeapToApi {
                cache: cache(doc)?,
                basic: basic(doc)?,
            },
            LinkObjKind::DdoToTypeDef => LinkPayload::DdoToTypeDef {
                typed: typed(doc)?,
                dd_index: elem.attr_u32("dd_index")?,
            },
            LinkObjKind::HeapToPolySymbol => LinkPayload::HeapToPolySymbol {
                basic: basic(doc)?,
                symbol: attr_bytes("symbol"),
                poly_index: elem.attr_u32("poly_index")?,
            },
            LinkObjKind::ViToPolyVi => LinkPayload::ViToPolyVi {
                typed: typed(doc)?,
                offsets: offsets(doc)?,
            },
            LinkObjKind::ViToGInterface => LinkPayload::ViToGInterface {
                basic: basic(doc)?,
                gi: gi()?,
            },
            LinkObjKind::GiToGInterface => LinkPayload::GiToGInterface {
                gi: gi()?,
                basic: basic(doc)?,
            },
            LinkObjKind::Unimplemented(name) => {
                return Err(FormatError::NotImplemented {
                    kind:  name,
                    ident: tree::ident_to_text(&ident),
                });
            }
        })
    }
}

// ── LinkObjList ───────────────────────────────────────────────────────────────

/// A named list of link objects.  The list identity is threaded into
/// classification so ambiguous member identities resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkObjList {
    pub ident:   [u8; 4],
    pub objects: Vec<LinkObject>,
}

impl LinkObjList {
    pub fn new(ident: [u8; 4]) -> Self {
        LinkObjList { ident, objects: Vec::new() }
    }
}

impl BinRecord for LinkObjList {
    fn kind(&self) -> &'static str {
        "LinkObjList"
    }

    fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()> {
        self.ident = cursor.read_ident("ident")?;
        let count = cursor.read_u32("count")? as usize;
        cursor.check_count(count, &doc.limits, "count")?;
        self.objects.clear();
        for _ in 0..count {
            self.objects.push(LinkObject::parse_from(self.ident, doc, cursor)?);
        }
        Ok(())
    }

    fn serialize(&self, doc: &Document, avoid_recompute: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.ident);
        out.write_u32::<BigEndian>(self.objects.len() as u32).expect("vec write");
        for obj in &self.objects {
            out.extend_from_slice(&obj.serialize(doc, avoid_recompute)?);
        }
        Ok(out)
    }

    fn expected_size(&self, doc: &Document) -> Result<usize> {
        let mut size = 8;
        for obj in &self.objects {
            size += obj.expected_size(doc)?;
        }
        Ok(size)
    }

    fn import_tree(&mut self, doc: &mut Document, elem: &Element) -> Result<()> {
        let ident_text = elem.attr("ident").ok_or_else(|| FormatError::Tree {
            elem:   elem.tag.clone(),
            reason: "missing attribute \"ident\"".to_string(),
        })?;
        self.ident = tree::ident_from_text(ident_text)?;
        self.objects.clear();
        for child in elem.children_named("LinkObject") {
            let mut obj = LinkObject {
                list_ident: self.ident,
                ident:      [0; 4],
                payload:    LinkPayload::HeapToFileNoWarn { basic: BasicLinkSaveInfo::default() },
            };
            obj.import_tree(doc, child)?;
            self.objects.push(obj);
        }
        Ok(())
    }

    fn export_tree(&self, doc: &Document) -> Result<Element> {
        let mut e = Element::new("LinkObjList");
        e.set_attr("ident", tree::ident_to_text(&self.ident));
        for obj in &self.objects {
            e.push(obj.export_tree(doc)?);
        }
        Ok(e)
    }

    fn late_fixup(&mut self, doc: &mut Document) -> Result<()> {
        for obj in &mut self.objects {
            obj.late_fixup(doc)?;
        }
        Ok(())
    }

    fn check_sanity(&self) -> bool {
        self.objects.iter().all(|o| o.check_sanity())
    }
}
