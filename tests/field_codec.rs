use proptest::prelude::*;
use rsrcfix::field::{self, BeCursor, Limits, QuadFloat};
use rsrcfix::version::{LvVersion, Stage};

fn cursor(buf: &[u8]) -> BeCursor<'_> {
    BeCursor::new(buf, "test")
}

// ── var1 ──────────────────────────────────────────────────────────────────────

#[test]
fn var1_short_and_long_boundaries() {
    for (value, encoded_len) in [(0u32, 2), (1, 2), (0x7FFF, 2), (0x8000, 4), (0x7FFF_FFFF, 4)] {
        let mut buf = Vec::new();
        field::write_var1(&mut buf, value).unwrap();
        assert_eq!(buf.len(), encoded_len, "value {value:#x}");
        assert_eq!(field::var1_size(value), encoded_len);
        assert_eq!(cursor(&buf).read_var1("v").unwrap(), value);
    }
}

#[test]
fn var1_rejects_above_31_bits() {
    let mut buf = Vec::new();
    assert!(field::write_var1(&mut buf, 0x8000_0000).is_err());
}

// ── var2s ─────────────────────────────────────────────────────────────────────

#[test]
fn var2s_sentinel_forces_long_form() {
    for (value, encoded_len) in [(0i32, 2), (0x7FFF, 2), (-0x7FFF, 2), (-0x8000, 6), (0x8000, 6)] {
        let mut buf = Vec::new();
        field::write_var2s(&mut buf, value);
        assert_eq!(buf.len(), encoded_len, "value {value:#x}");
        assert_eq!(field::var2s_size(value), encoded_len);
        assert_eq!(cursor(&buf).read_var2s("v").unwrap(), value);
    }
}

// ── var1b ─────────────────────────────────────────────────────────────────────

#[test]
fn var1b_escape_bytes() {
    for (value, encoded_len) in [(0u32, 1), (253, 1), (254, 3), (0xFFFF, 3), (0x10000, 5)] {
        let mut buf = Vec::new();
        field::write_var1b(&mut buf, value);
        assert_eq!(buf.len(), encoded_len, "value {value}");
        assert_eq!(field::var1b_size(value), encoded_len);
        assert_eq!(cursor(&buf).read_var1b("v").unwrap(), value);
    }
}

#[test]
fn var1b_signed_shrunk_short_range() {
    // 0x80/0x81 are escapes, so -127 and -128 already need the i16 form.
    for (value, encoded_len) in
        [(0i32, 1), (127, 1), (-126, 1), (-127, 3), (-128, 3), (0x7FFF, 3), (0x8000, 5), (-0x8001, 5)]
    {
        let mut buf = Vec::new();
        field::write_var1b_signed(&mut buf, value);
        assert_eq!(buf.len(), encoded_len, "value {value}");
        assert_eq!(field::var1b_signed_size(value), encoded_len);
        assert_eq!(cursor(&buf).read_var1b_signed("v").unwrap(), value);
    }
}

proptest! {
    #[test]
    fn var1_round_trips(v in 0u32..=0x7FFF_FFFF) {
        let mut buf = Vec::new();
        field::write_var1(&mut buf, v).unwrap();
        prop_assert_eq!(cursor(&buf).read_var1("v").unwrap(), v);
        prop_assert_eq!(buf.len(), field::var1_size(v));
    }

    #[test]
    fn var2s_round_trips(v in any::<i32>()) {
        let mut buf = Vec::new();
        field::write_var2s(&mut buf, v);
        prop_assert_eq!(cursor(&buf).read_var2s("v").unwrap(), v);
    }

    #[test]
    fn var1b_signed_round_trips(v in any::<i32>()) {
        let mut buf = Vec::new();
        field::write_var1b_signed(&mut buf, v);
        prop_assert_eq!(cursor(&buf).read_var1b_signed("v").unwrap(), v);
    }
}

// ── Strings ───────────────────────────────────────────────────────────────────

#[test]
fn pstring_pads_length_byte_included() {
    let limits = Limits::default();
    // 1 length byte + 3 data bytes = 4, already 2-aligned: no pad.
    let mut buf = Vec::new();
    field::write_pstring(&mut buf, b"abc", 2);
    assert_eq!(buf.len(), 4);
    // 1 + 4 = 5, 2-aligned needs one pad byte.
    let mut buf = Vec::new();
    field::write_pstring(&mut buf, b"abcd", 2);
    assert_eq!(buf.len(), 6);
    assert_eq!(buf[5], 0);
    assert_eq!(field::pstring_size(4, 2), 6);
    assert_eq!(cursor(&buf).read_pstring(2, &limits, "s").unwrap(), b"abcd");
}

#[test]
fn lstring_has_no_padding() {
    let limits = Limits::default();
    let mut buf = Vec::new();
    field::write_lstring(&mut buf, b"hello");
    assert_eq!(buf.len(), 9);
    assert_eq!(field::lstring_size(5), 9);
    assert_eq!(cursor(&buf).read_lstring(&limits, "s").unwrap(), b"hello");
}

#[test]
fn string_over_cap_is_rejected() {
    let limits = Limits { max_string: 4, ..Limits::default() };
    let mut buf = Vec::new();
    field::write_lstring(&mut buf, b"too long");
    assert!(cursor(&buf).read_lstring(&limits, "s").is_err());
}

#[test]
fn short_read_reports_offset() {
    let mut c = cursor(&[0x12, 0x34]);
    assert_eq!(c.read_u16("ok").unwrap(), 0x1234);
    let err = c.read_u32("missing").unwrap_err();
    assert!(err.to_string().contains("missing"));
}

// ── Quad float ────────────────────────────────────────────────────────────────

#[test]
fn quad_bytes_round_trip_exactly() {
    let cases: [[u8; 16]; 5] = [
        [0; 16],                                                       // +0
        [0x3F, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],       // 1.0
        [0xC0, 0x00, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],    // -2.5
        [0x7F, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],       // +inf
        [0x7F, 0xFF, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01], // nan payload
    ];
    for bytes in cases {
        let q = QuadFloat::from_be_bytes(bytes);
        assert_eq!(q.to_be_bytes(), bytes);
    }
}

#[test]
fn quad_text_mirror_is_lossless() {
    let cases: [[u8; 16]; 6] = [
        [0; 16],
        [0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],           // -0
        [0x3F, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],        // 1.0
        [0x40, 0x00, 0x92, 0x1F, 0xB5, 0x44, 0x42, 0xD1, 0x84, 0x69, 0x89, 0x8C, 0xC5, 0x17, 0x01, 0xB8], // pi
        [0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01],     // min subnormal
        [0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],        // -inf
    ];
    for bytes in cases {
        let q = QuadFloat::from_be_bytes(bytes);
        let text = q.to_text();
        let back = QuadFloat::from_text(&text).unwrap();
        assert_eq!(back, q, "text form {text}");
    }
}

#[test]
fn quad_nan_payload_survives_text() {
    let q = QuadFloat { sign: true, biased_exp: 0x7FFF, fraction: 0xDEAD_BEEF };
    let back = QuadFloat::from_text(&q.to_text()).unwrap();
    assert_eq!(back, q);
    assert!(back.is_nan());
}

#[test]
fn quad_from_f64_matches_simple_values() {
    let one = QuadFloat::from_f64(1.0);
    assert_eq!(one.biased_exp, 16383);
    assert_eq!(one.fraction, 0);
    let half = QuadFloat::from_f64(0.5);
    assert_eq!(half.biased_exp, 16382);
    assert!((QuadFloat::from_f64(3.25).to_f64() - 3.25).abs() < 1e-12);
}

// ── Version codec ─────────────────────────────────────────────────────────────

#[test]
fn version_new_layout_round_trip() {
    let v = LvVersion { major: 14, minor: 0, bugfix: 1, stage: Stage::Release, build: 123, flags: 0 };
    let code = v.encode(true).unwrap();
    assert_eq!(code >> 24, 0x14); // BCD major
    let back = LvVersion::decode(code, true).unwrap();
    assert_eq!(back.major, 14);
    assert_eq!(back.minor, 0);
    assert_eq!(back.bugfix, 1);
    assert_eq!(back.stage, Stage::Release);
    assert_eq!(back.build, 123);
}

#[test]
fn version_old_layout_round_trip() {
    let v = LvVersion { major: 7, minor: 1, bugfix: 0, stage: Stage::Beta, build: 45, flags: 0 };
    let code = v.encode(false).unwrap();
    let back = LvVersion::decode(code, false).unwrap();
    assert_eq!(back, v);
}

#[test]
fn version_at_least_gates() {
    let v = LvVersion::new(8, 6);
    assert!(v.at_least(8, 6));
    assert!(v.at_least(8, 0));
    assert!(v.at_least(4, 0));
    assert!(!v.at_least(12, 0));
    assert!(!v.at_least(8, 7));
}
