use rsrcfix::error::FormatError;
use rsrcfix::field::BeCursor;
use rsrcfix::path::{PathRecord, PathStyle, PATH_FLAVOR_ABS, PATH_FLAVOR_UNC};
use rsrcfix::typedesc::{TdKind, TypeDesc};
use rsrcfix::variant::{LvVariant, OleVariant, VariantAttr, VariantTypeRef, VT_ARRAY, VT_BSTR, VT_I4};
use rsrcfix::{BinRecord, Document, LvVersion};

fn doc_at(major: u32, minor: u32) -> Document {
    Document::new(LvVersion::new(major, minor))
}

fn round_trip_variant(doc: &mut Document, v: &LvVariant) {
    let bytes = v.serialize(doc, false).unwrap();
    assert_eq!(bytes.len(), v.expected_size(doc).unwrap(), "size lockstep");
    let mut back = LvVariant::default();
    let mut cursor = BeCursor::new(&bytes, "test");
    back.parse(doc, &mut cursor).unwrap();
    assert!(cursor.is_empty());
    assert_eq!(&back, v);
}

// ── Variant version branches ──────────────────────────────────────────────────

#[test]
fn consolidated_branch_references_shared_table() {
    let mut doc = doc_at(14, 0);
    assert!(doc.consolidated_types);
    let flat = doc.table.append_flat(TypeDesc::simple(TdKind::Int32), true);
    let top = doc.table.add_top_level(flat) as u32;

    let mut v = LvVariant::default(); // defaults to the 8.6 version word
    v.type_ref = VariantTypeRef::Shared { top_index: top };
    v.fill = Some(vec![0, 0, 0, 7]);
    round_trip_variant(&mut doc, &v);

    let mut checked = v.clone();
    checked.late_fixup(&mut doc).unwrap();
    checked.type_ref = VariantTypeRef::Shared { top_index: 99 };
    assert!(checked.late_fixup(&mut doc).is_err());
}

#[test]
fn counted_inline_branch_with_fill() {
    let mut doc = doc_at(8, 0);
    assert!(!doc.consolidated_types);
    let int32 = doc.table.append_flat(TypeDesc::simple(TdKind::Int32), true);
    let boolean = doc.table.append_flat(TypeDesc::simple(TdKind::Boolean), true);

    let v = LvVariant {
        version:      0x0800_0000,
        inline_types: vec![int32, boolean],
        type_ref:     VariantTypeRef::IndexedInline { index: 0 },
        fill:         Some(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        attrs:        Vec::new(),
    };
    round_trip_variant(&mut doc, &v);
}

#[test]
fn counted_inline_branch_without_fill() {
    let mut doc = doc_at(8, 0);
    let v = LvVariant {
        version:      0x0800_0000,
        inline_types: Vec::new(),
        type_ref:     VariantTypeRef::None,
        fill:         None,
        attrs:        Vec::new(),
    };
    round_trip_variant(&mut doc, &v);
}

#[test]
fn single_inline_branch_pre_8() {
    let mut doc = doc_at(8, 0);
    let flat = doc.table.append_flat(TypeDesc::simple(TdKind::Float64), true);
    let v = LvVariant {
        version:      0x0400_0000,
        inline_types: vec![flat],
        type_ref:     VariantTypeRef::Inline { flat },
        fill:         Some(vec![0; 8]),
        attrs:        Vec::new(),
    };
    round_trip_variant(&mut doc, &v);
}

#[test]
fn pre_4_version_is_fatal() {
    let mut doc = doc_at(14, 0);
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x0300_0000u32.to_be_bytes());
    let mut v = LvVariant::default();
    let err = v.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap_err();
    assert!(matches!(err, FormatError::UnsupportedVersion { .. }));
}

#[test]
fn attributes_recurse_and_round_trip() {
    let mut doc = doc_at(14, 0);
    let flat = doc.table.append_flat(TypeDesc::simple(TdKind::Int32), true);
    let top = doc.table.add_top_level(flat) as u32;

    let leaf = LvVariant {
        type_ref: VariantTypeRef::Shared { top_index: top },
        fill: Some(vec![1, 2, 3, 4]),
        ..LvVariant::default()
    };
    let v = LvVariant {
        type_ref: VariantTypeRef::Shared { top_index: top },
        fill: Some(vec![9, 9, 9, 9]),
        attrs: vec![
            VariantAttr { name: b"unit".to_vec(), value: leaf.clone() },
            VariantAttr { name: b"scale".to_vec(), value: leaf },
        ],
        ..LvVariant::default()
    };
    round_trip_variant(&mut doc, &v);

    // Tree mirror carries attributes too.
    let elem = v.export_tree(&doc).unwrap();
    let mut from_tree = LvVariant::default();
    from_tree.import_tree(&mut doc, &elem).unwrap();
    assert_eq!(from_tree, v);
}

#[test]
fn attribute_recursion_hits_depth_budget() {
    let mut doc = doc_at(14, 0);
    doc.limits.max_depth = 3;
    let mut v = LvVariant {
        type_ref: VariantTypeRef::Shared { top_index: 0 },
        fill: Some(Vec::new()),
        ..LvVariant::default()
    };
    for _ in 0..4 {
        v = LvVariant {
            type_ref: VariantTypeRef::Shared { top_index: 0 },
            fill: Some(Vec::new()),
            attrs: vec![VariantAttr { name: b"n".to_vec(), value: v }],
            ..LvVariant::default()
        };
    }
    let bytes = v.serialize(&doc, false).unwrap();
    let mut back = LvVariant::default();
    let err = back.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap_err();
    assert!(matches!(err, FormatError::RecursionLimit { kind: "Variant", .. }));
}

// ── OLE variants ──────────────────────────────────────────────────────────────

#[test]
fn ole_scalar_and_bstr_round_trip() {
    let mut doc = doc_at(14, 0);
    for v in [
        OleVariant { vt: VT_I4, scalar: vec![0, 0, 1, 0], ..OleVariant::default() },
        OleVariant { vt: VT_BSTR, scalar: b"text".to_vec(), ..OleVariant::default() },
    ] {
        let bytes = v.serialize(&doc, false).unwrap();
        assert_eq!(bytes.len(), v.expected_size(&doc).unwrap());
        let mut back = OleVariant::default();
        back.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap();
        assert_eq!(back, v);
    }
}

#[test]
fn ole_array_recurses_per_element() {
    let mut doc = doc_at(14, 0);
    let elem = OleVariant { vt: VT_I4, scalar: vec![0, 0, 0, 5], ..OleVariant::default() };
    let v = OleVariant {
        vt:       VT_ARRAY | VT_I4,
        dims:     vec![2, 3],
        scalar:   Vec::new(),
        elements: vec![elem; 6],
    };
    assert!(v.check_sanity());
    let bytes = v.serialize(&doc, false).unwrap();
    let mut back = OleVariant::default();
    back.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap();
    assert_eq!(back, v);
}

#[test]
fn ole_unknown_vartype_is_malformed() {
    let mut doc = doc_at(14, 0);
    let bytes = 0x1234u16.to_be_bytes();
    let mut v = OleVariant::default();
    assert!(v.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).is_err());
}

// ── Paths ─────────────────────────────────────────────────────────────────────

#[test]
fn zero_style_path_round_trips() {
    let mut doc = doc_at(14, 0);
    let p = PathRecord {
        flavor:     PATH_FLAVOR_ABS,
        style:      PathStyle::Zero { legacy_empty: false },
        components: vec![b"home".to_vec(), b"proj".to_vec(), b"Main.vi".to_vec()],
    };
    let bytes = p.serialize(&doc, false).unwrap();
    assert_eq!(bytes.len(), p.expected_size(&doc).unwrap());
    let mut back = PathRecord::default();
    back.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap();
    assert_eq!(back, p);
}

#[test]
fn typed_style_path_round_trips() {
    let mut doc = doc_at(14, 0);
    let p = PathRecord {
        flavor:     PATH_FLAVOR_UNC,
        style:      PathStyle::Typed { type_tag: 0x0000_0001 },
        components: vec![b"server".to_vec(), b"share".to_vec()],
    };
    let bytes = p.serialize(&doc, false).unwrap();
    let mut back = PathRecord::default();
    back.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap();
    assert_eq!(back, p);
}

#[test]
fn all_zero_body_is_the_legacy_empty_form() {
    let mut doc = doc_at(14, 0);
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"PTH0");
    bytes.extend_from_slice(&8u32.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 8]);

    let mut p = PathRecord::default();
    p.parse(&mut doc, &mut BeCursor::new(&bytes, "test")).unwrap();
    assert_eq!(p.style, PathStyle::Zero { legacy_empty: true });
    assert!(p.components.is_empty());

    // The quirk survives re-serialization byte for byte.
    assert_eq!(p.serialize(&doc, false).unwrap(), bytes);
}

#[test]
fn legacy_empty_with_components_fails_serialize() {
    let doc = doc_at(14, 0);
    let p = PathRecord {
        flavor:     PATH_FLAVOR_ABS,
        style:      PathStyle::Zero { legacy_empty: true },
        components: vec![b"x".to_vec()],
    };
    assert!(!p.check_sanity());
    assert!(p.serialize(&doc, false).is_err());
}

#[test]
fn path_tree_round_trips_both_styles() {
    let mut doc = doc_at(14, 0);
    for p in [
        PathRecord {
            flavor:     PATH_FLAVOR_ABS,
            style:      PathStyle::Zero { legacy_empty: true },
            components: Vec::new(),
        },
        PathRecord {
            flavor:     PATH_FLAVOR_UNC,
            style:      PathStyle::Typed { type_tag: 7 },
            components: vec![b"a".to_vec(), b"b".to_vec()],
        },
    ] {
        let elem = p.export_tree(&doc).unwrap();
        let mut back = PathRecord::default();
        back.import_tree(&mut doc, &elem).unwrap();
        assert_eq!(back, p);
    }
}
