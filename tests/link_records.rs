use rsrcfix::error::FormatError;
use rsrcfix::field::BeCursor;
use rsrcfix::link::{
    classify, LinkObjKind, LinkObjList, LinkObject, LinkPayload, LIST_CC_LINKS, LIST_HEAP_LINKS,
    LIST_VI_LINKS,
};
use rsrcfix::linkinfo::{
    BasicLinkSaveInfo, GiLinkInfo, OffsetListInfo, TypedLinkSaveInfo, UdClassApiCache,
    VILinkRefInfo,
};
use rsrcfix::path::{PathRecord, PathStyle, PATH_FLAVOR_REL};
use rsrcfix::typedesc::{TdKind, TypeDesc};
use rsrcfix::{BinRecord, Document, LvVersion};
use uuid::Uuid;

fn doc_at(major: u32, minor: u32) -> Document {
    Document::new(LvVersion::new(major, minor))
}

fn sample_basic(doc: &Document) -> BasicLinkSaveInfo {
    BasicLinkSaveInfo {
        qualified_name: vec![b"MyLib.lvlib".to_vec(), b"Sub.vi".to_vec()],
        path: PathRecord {
            flavor:     PATH_FLAVOR_REL,
            style:      PathStyle::Zero { legacy_empty: false },
            components: vec![b"dir".to_vec(), b"Sub.vi".to_vec()],
        },
        flag_word: doc.version.at_least(8, 6).then_some(0x11),
    }
}

fn sample_typed(doc: &mut Document) -> TypedLinkSaveInfo {
    // Only the fields of the active wire layout survive a round trip.
    let vi_link = if doc.version.at_least(14, 0) {
        VILinkRefInfo { packed: 0x42, ..VILinkRefInfo::default() }
    } else {
        VILinkRefInfo { flag_a: 3, flag_b: 9, ref_kind: 7, ..VILinkRefInfo::default() }
    };
    let mut typed = TypedLinkSaveInfo {
        basic: sample_basic(doc),
        vi_link,
        ..TypedLinkSaveInfo::default()
    };
    if doc.version.at_least(8, 6) {
        let flat = doc.table.append_flat(TypeDesc::simple(TdKind::Int32), true);
        typed.td_top_index = Some(doc.table.add_top_level(flat) as u32);
        if doc.version.at_least(12, 0) {
            typed.flags = Some(0xA5);
        }
    } else {
        typed.inline_td_flat =
            Some(doc.table.append_flat(TypeDesc::simple(TdKind::Float64), true));
        typed.legacy_offsets = OffsetListInfo { offsets: vec![0x10, 0x20] };
    }
    typed
}

fn round_trip(doc: &mut Document, obj: &LinkObject) {
    let bytes = obj.serialize(doc, false).unwrap();
    assert_eq!(bytes.len(), obj.expected_size(doc).unwrap(), "size lockstep for {}", obj.kind());
    let mut cursor = BeCursor::new(&bytes, "test");
    let back = LinkObject::parse_from(obj.list_ident, doc, &mut cursor).unwrap();
    assert!(cursor.is_empty(), "{} left trailing bytes", obj.kind());
    assert_eq!(&back, obj);

    // And again through the mirror tree.
    let elem = obj.export_tree(doc).unwrap();
    let mut from_tree = back;
    from_tree.import_tree(doc, &elem).unwrap();
    assert_eq!(&from_tree, obj);
}

// ── Classification ────────────────────────────────────────────────────────────

#[test]
fn classify_bare_identities() {
    assert_eq!(classify(LIST_VI_LINKS, *b"V2VI").unwrap(), LinkObjKind::ViToVi);
    assert_eq!(classify(LIST_HEAP_LINKS, *b"H2FL").unwrap(), LinkObjKind::HeapToFile);
    assert_eq!(classify(LIST_CC_LINKS, *b"GIGI").unwrap(), LinkObjKind::GiToGInterface);
}

#[test]
fn classify_ambiguous_identity_by_list() {
    assert_eq!(classify(LIST_VI_LINKS, *b"LINK").unwrap(), LinkObjKind::ViToVi);
    assert_eq!(classify(LIST_HEAP_LINKS, *b"LINK").unwrap(), LinkObjKind::HeapToVi);
    // Same identity in a list no rule names is unknown, not a fallback.
    assert!(matches!(
        classify(LIST_CC_LINKS, *b"LINK"),
        Err(FormatError::UnknownIdentity { .. })
    ));
}

#[test]
fn classify_unknown_identity_is_fatal() {
    let err = classify(LIST_VI_LINKS, *b"ZZZZ").unwrap_err();
    assert!(matches!(err, FormatError::UnknownIdentity { .. }));
    assert!(err.to_string().contains("ZZZZ"));
}

#[test]
fn not_implemented_kind_fails_at_parse() {
    let mut doc = doc_at(14, 0);
    let bytes = *b"HOVI";
    let mut cursor = BeCursor::new(&bytes, "test");
    let err = LinkObject::parse_from(LIST_VI_LINKS, &mut doc, &mut cursor).unwrap_err();
    match err {
        FormatError::NotImplemented { kind, .. } => assert_eq!(kind, "HeapToOverrideVi"),
        other => panic!("expected NotImplemented, got {other}"),
    }
}

// ── Per-kind round trips ──────────────────────────────────────────────────────

#[test]
fn heap_to_vi_round_trips() {
    let mut doc = doc_at(14, 0);
    let typed = sample_typed(&mut doc);
    let obj = LinkObject {
        list_ident: LIST_HEAP_LINKS,
        ident:      *b"H2VI",
        payload:    LinkPayload::HeapToVi { typed, heap_uid: 42 },
    };
    round_trip(&mut doc, &obj);
}

#[test]
fn vi_to_vi_round_trips_pre_consolidated() {
    let mut doc = doc_at(8, 0);
    let typed = sample_typed(&mut doc);
    let obj = LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"V2VI",
        payload:    LinkPayload::ViToVi { typed },
    };
    round_trip(&mut doc, &obj);
}

#[test]
fn file_kinds_round_trip() {
    let mut doc = doc_at(12, 0);
    let basic = sample_basic(&doc);
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_HEAP_LINKS,
        ident:      *b"H2FL",
        payload:    LinkPayload::HeapToFile { basic: basic.clone(), file_flags: 0x81 },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_HEAP_LINKS,
        ident:      *b"H2FN",
        payload:    LinkPayload::HeapToFileNoWarn { basic: basic.clone() },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_HEAP_LINKS,
        ident:      *b"H2RC",
        payload:    LinkPayload::HeapToRcFile {
            basic,
            offsets: OffsetListInfo { offsets: vec![4, 8, 12] },
        },
    });
}

#[test]
fn symbol_kinds_round_trip() {
    let mut doc = doc_at(14, 0);
    let basic = sample_basic(&doc);
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_CC_LINKS,
        ident:      *b"H2CC",
        payload:    LinkPayload::HeapToCcSymbol { basic: basic.clone(), symbol: b"AddOne".to_vec() },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_HEAP_LINKS,
        ident:      *b"H2PS",
        payload:    LinkPayload::HeapToPolySymbol {
            basic,
            symbol: b"Resize".to_vec(),
            poly_index: 3,
        },
    });
}

#[test]
fn path_kind_round_trips() {
    let mut doc = doc_at(14, 0);
    let obj = LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"VPTF",
        payload:    LinkPayload::VrtPathToFile {
            path: PathRecord {
                flavor:     PATH_FLAVOR_REL,
                style:      PathStyle::Typed { type_tag: 0x0001_0000 },
                components: vec![b"data".to_vec(), b"cfg.bin".to_vec()],
            },
            flags: 0x2,
        },
    };
    round_trip(&mut doc, &obj);
}

#[test]
fn gi_and_xnode_kinds_round_trip() {
    let mut doc = doc_at(14, 0);
    let basic = sample_basic(&doc);
    let gi = GiLinkInfo { props: [1, 2, 3, 4, 5] };
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"V2GI",
        payload:    LinkPayload::ViToGInterface { basic: basic.clone(), gi: gi.clone() },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"GIGI",
        payload:    LinkPayload::GiToGInterface { gi: gi.clone(), basic: basic.clone() },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_HEAP_LINKS,
        ident:      *b"H2XN",
        payload:    LinkPayload::HeapToXNode { basic: basic.clone(), gi },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"XNXI",
        payload:    LinkPayload::XNodeToXInterface { basic: basic.clone(), iface_version: 9 },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"XNEF",
        payload:    LinkPayload::XNodeToExtFuncRte { basic, func_name: b"rt_hook".to_vec() },
    });
}

#[test]
fn ud_class_kinds_round_trip() {
    let mut doc = doc_at(14, 0);
    let cache = UdClassApiCache {
        lib_version: 3,
        flags:       0x101,
        guid:        Uuid::from_bytes([7; 16]),
        guid_flags:  0xFEED,
        content:     vec![1, 2, 3, 4],
    };
    let typed = sample_typed(&mut doc);
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"UDDA",
        payload:    LinkPayload::UdClassDdoToApi { cache: cache.clone(), typed },
    });
    let basic = sample_basic(&doc);
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"UDHA",
        payload:    LinkPayload::UdClassHeapToApi { cache, basic },
    });
}

#[test]
fn remaining_kinds_round_trip() {
    let mut doc = doc_at(14, 0);
    let basic = sample_basic(&doc);
    let typed = sample_typed(&mut doc);
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"V2LB",
        payload:    LinkPayload::ViToLib { basic: basic.clone(), lib_flags: 1 },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"V2MS",
        payload:    LinkPayload::ViToMsFile {
            basic,
            offsets: OffsetListInfo { offsets: vec![100] },
        },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"DDTD",
        payload:    LinkPayload::DdoToTypeDef { typed: typed.clone(), dd_index: 0x9000 },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"V2PV",
        payload:    LinkPayload::ViToPolyVi {
            typed: typed.clone(),
            offsets: OffsetListInfo { offsets: vec![] },
        },
    });
    round_trip(&mut doc, &LinkObject {
        list_ident: LIST_HEAP_LINKS,
        ident:      *b"H2XF",
        payload:    LinkPayload::HeapToXCtlFace { typed, gi: GiLinkInfo { props: [9; 5] } },
    });
}

// ── Version gates, both sides ─────────────────────────────────────────────────

#[test]
fn basic_flag_word_gated_at_8_6() {
    let old = doc_at(8, 0);
    let new = doc_at(8, 6);
    let mut info = sample_basic(&old);
    info.flag_word = None;
    let base = info.size(&old).unwrap();
    assert_eq!(info.size(&new).unwrap(), base + 4);
}

#[test]
fn vi_link_layout_switches_at_14() {
    let legacy = doc_at(13, 0);
    let packed = doc_at(14, 0);
    let info = VILinkRefInfo { flag_a: 2, flag_b: 3, ref_kind: 4, ..VILinkRefInfo::default() };
    assert_eq!(info.size(&legacy), 8);
    assert_eq!(info.size(&packed), 1);

    let mut out = Vec::new();
    info.serialize(&legacy, &mut out).unwrap();
    assert_eq!(out.len(), 8);
    let mut doc = doc_at(13, 0);
    let mut back = VILinkRefInfo::default();
    back.parse(&mut doc, &mut BeCursor::new(&out, "test")).unwrap();
    assert_eq!(back, info);
}

#[test]
fn ud_cache_flags_width_gated_at_12() {
    let narrow = doc_at(11, 0);
    let wide = doc_at(12, 0);
    let cache = UdClassApiCache { content: vec![0; 8], ..UdClassApiCache::default() };
    assert_eq!(cache.size(&wide), cache.size(&narrow) + 1);

    // Pre-12 only one flag byte fits on the wire.
    let mut doc = doc_at(11, 0);
    let src = UdClassApiCache { flags: 0x7F, ..UdClassApiCache::default() };
    let mut out = Vec::new();
    src.serialize(&doc, &mut out).unwrap();
    let mut back = UdClassApiCache::default();
    back.parse(&mut doc, &mut BeCursor::new(&out, "test")).unwrap();
    assert_eq!(back.flags, 0x7F);
}

#[test]
fn typed_info_late_fixup_rejects_bad_index() {
    let mut doc = doc_at(14, 0);
    let mut typed = sample_typed(&mut doc);
    typed.late_fixup(&mut doc).unwrap();
    typed.td_top_index = Some(999);
    assert!(typed.late_fixup(&mut doc).is_err());
}

// ── Lists ─────────────────────────────────────────────────────────────────────

#[test]
fn link_obj_list_round_trips() {
    let mut doc = doc_at(14, 0);
    let typed = sample_typed(&mut doc);
    let mut list = LinkObjList::new(LIST_VI_LINKS);
    list.objects.push(LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"LINK", // ambiguous, resolved by the list identity
        payload:    LinkPayload::ViToVi { typed },
    });
    list.objects.push(LinkObject {
        list_ident: LIST_VI_LINKS,
        ident:      *b"V2LB",
        payload:    LinkPayload::ViToLib { basic: sample_basic(&doc), lib_flags: 0 },
    });

    let bytes = list.serialize(&doc, false).unwrap();
    assert_eq!(bytes.len(), list.expected_size(&doc).unwrap());
    let mut back = LinkObjList::new([0; 4]);
    back.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap();
    assert_eq!(back, list);
    assert_eq!(back.objects[0].kind(), "ViToVi");

    let elem = list.export_tree(&doc).unwrap();
    let mut from_tree = LinkObjList::new([0; 4]);
    from_tree.import_tree(&mut doc, &elem).unwrap();
    assert_eq!(from_tree, list);
}

#[test]
fn list_aborts_on_first_unknown_member() {
    let mut doc = doc_at(14, 0);
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"LVIN");
    bytes.extend_from_slice(&2u32.to_be_bytes());
    bytes.extend_from_slice(b"ZZZZ"); // unknown, nothing after it is reachable
    bytes.extend_from_slice(b"V2LB");
    let mut list = LinkObjList::new([0; 4]);
    let err = list.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap_err();
    assert!(matches!(err, FormatError::UnknownIdentity { .. }));
}
