//! Field-level codecs shared by every record.
//!
//! # Endianness
//! All binary I/O is strictly big-endian.  No runtime negotiation is ever
//! performed; see `record.rs` for the record-level framing rules.
//!
//! # Variable-width integers
//! Three historical escape schemes coexist in the format:
//!
//! | Scheme | First unit | Escape | Extended form |
//! |--------|-----------|--------|---------------|
//! | `var1`  | u16 | bit 15 set | low 15 bits + next u16 = 31-bit value |
//! | `var2s` | i16 | value == -0x8000 | next 4 bytes i32 |
//! | `var1b` | u8/i8 | 254/255 (unsigned), 0x80/0x81 (signed) | next u16 / u32 (or i16 / i32) |
//!
//! Writers always emit the shortest representation, which is what makes
//! `decode(encode(x)) == x` and byte-for-byte round trips hold.
//!
//! # Failure policy
//! Every read that would overrun the buffer, or that exceeds a [`Limits`]
//! ceiling, returns a distinct `MalformedField` error naming the field and
//! the byte offset.  No codec at this layer recovers; recovery is a
//! container-level decision.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::{FormatError, Result};

// ── Safety limits ─────────────────────────────────────────────────────────────

/// Allocation ceilings for list-like fields.  A corrupted length field must
/// never cause unbounded allocation; these caps are the only resource bound
/// the pipeline enforces.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum element count for any count-prefixed list.
    pub max_list:   usize,
    /// Maximum byte length for any length-prefixed string or blob.
    pub max_string: usize,
    /// Maximum nesting depth for self-recursive containers.
    pub max_depth:  usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_list:   0x1_0000,
            max_string: 0x100_0000,
            max_depth:  32,
        }
    }
}

/// Bytes of padding needed to bring `len` up to a multiple of `align`.
#[inline]
pub fn pad_len(len: usize, align: usize) -> usize {
    if align <= 1 { return 0; }
    (align - len % align) % align
}

// ── Read cursor ───────────────────────────────────────────────────────────────

/// Bounds-checked big-endian read cursor over a record's byte slice.
///
/// The cursor carries the record kind name so overrun errors can say which
/// record and field failed, and at which offset.
pub struct BeCursor<'a> {
    buf:    &'a [u8],
    pos:    usize,
    record: &'static str,
}

impl<'a> BeCursor<'a> {
    pub fn new(buf: &'a [u8], record: &'static str) -> Self {
        Self { buf, pos: 0, record }
    }

    pub fn pos(&self) -> usize { self.pos }
    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }
    pub fn is_empty(&self) -> bool { self.remaining() == 0 }

    /// Rename the record context (used when a sub-block parses from the
    /// parent's cursor).
    pub fn with_record(&mut self, record: &'static str) -> &mut Self {
        self.record = record;
        self
    }

    fn overrun(&self, field: &'static str, need: usize) -> FormatError {
        FormatError::MalformedField {
            record: self.record,
            field,
            offset: self.pos,
            reason: format!("need {need} bytes, {} remain", self.remaining()),
        }
    }

    pub fn malformed(&self, field: &'static str, reason: String) -> FormatError {
        FormatError::MalformedField {
            record: self.record,
            field,
            offset: self.pos,
            reason,
        }
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.overrun(field, n));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Skip forward to the next multiple of `align` (relative to buffer start).
    pub fn align_to(&mut self, align: usize, field: &'static str) -> Result<()> {
        let pad = pad_len(self.pos, align);
        self.take(pad, field)?;
        Ok(())
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }
    pub fn read_i8(&mut self, field: &'static str) -> Result<i8> {
        Ok(self.take(1, field)?[0] as i8)
    }
    pub fn read_u16(&mut self, field: &'static str) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2, field)?))
    }
    pub fn read_i16(&mut self, field: &'static str) -> Result<i16> {
        Ok(BigEndian::read_i16(self.take(2, field)?))
    }
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4, field)?))
    }
    pub fn read_i32(&mut self, field: &'static str) -> Result<i32> {
        Ok(BigEndian::read_i32(self.take(4, field)?))
    }
    pub fn read_u64(&mut self, field: &'static str) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8, field)?))
    }
    pub fn read_i64(&mut self, field: &'static str) -> Result<i64> {
        Ok(BigEndian::read_i64(self.take(8, field)?))
    }

    /// 4-byte identity tag (record/list/flavor codes).
    pub fn read_ident(&mut self, field: &'static str) -> Result<[u8; 4]> {
        let s = self.take(4, field)?;
        Ok([s[0], s[1], s[2], s[3]])
    }

    // ── Variable-width integers ──────────────────────────────────────────────

    /// `var1`: u16, top bit escapes to a 31-bit value.
    pub fn read_var1(&mut self, field: &'static str) -> Result<u32> {
        let hi = self.read_u16(field)?;
        if hi & 0x8000 == 0 {
            return Ok(hi as u32);
        }
        let lo = self.read_u16(field)?;
        Ok(((hi as u32 & 0x7FFF) << 16) | lo as u32)
    }

    /// `var2s`: i16, sentinel -0x8000 escapes to i32.
    pub fn read_var2s(&mut self, field: &'static str) -> Result<i32> {
        let v = self.read_i16(field)?;
        if v != -0x8000 {
            return Ok(v as i32);
        }
        self.read_i32(field)
    }

    /// `var1b` unsigned: u8, 254/255 escape to u16/u32.
    pub fn read_var1b(&mut self, field: &'static str) -> Result<u32> {
        match self.read_u8(field)? {
            254 => Ok(self.read_u16(field)? as u32),
            255 => self.read_u32(field),
            v   => Ok(v as u32),
        }
    }

    /// `var1b` signed: i8, 0x80/0x81 escape to i16/i32.
    pub fn read_var1b_signed(&mut self, field: &'static str) -> Result<i32> {
        match self.read_u8(field)? {
            0x80 => Ok(self.read_i16(field)? as i32),
            0x81 => self.read_i32(field),
            v    => Ok(v as i8 as i32),
        }
    }

    // ── Strings ──────────────────────────────────────────────────────────────

    /// Short string: 1-byte length, bytes, then padding so the whole field
    /// (length byte included) is a multiple of `align`.
    pub fn read_pstring(&mut self, align: usize, limits: &Limits, field: &'static str) -> Result<Vec<u8>> {
        let len = self.read_u8(field)? as usize;
        if len > limits.max_string {
            return Err(FormatError::TooManyElements {
                record: self.record, field, count: len, cap: limits.max_string,
            });
        }
        let data = self.take(len, field)?.to_vec();
        let pad = pad_len(1 + len, align);
        self.take(pad, field)?;
        Ok(data)
    }

    /// Long string: 4-byte length + bytes, no trailing pad (callers align).
    pub fn read_lstring(&mut self, limits: &Limits, field: &'static str) -> Result<Vec<u8>> {
        let len = self.read_u32(field)? as usize;
        if len > limits.max_string {
            return Err(FormatError::TooManyElements {
                record: self.record, field, count: len, cap: limits.max_string,
            });
        }
        Ok(self.take(len, field)?.to_vec())
    }

    /// Validate a count-prefixed list length against the cap.
    pub fn check_count(&self, count: usize, limits: &Limits, field: &'static str) -> Result<()> {
        if count > limits.max_list {
            return Err(FormatError::TooManyElements {
                record: self.record, field, count, cap: limits.max_list,
            });
        }
        Ok(())
    }
}

// ── Write helpers ─────────────────────────────────────────────────────────────

/// Shortest `var1` encoding.  Fails above the 31-bit ceiling.
pub fn write_var1(out: &mut Vec<u8>, v: u32) -> Result<()> {
    if v <= 0x7FFF {
        out.write_u16::<BigEndian>(v as u16).expect("vec write");
    } else if v <= 0x7FFF_FFFF {
        out.write_u16::<BigEndian>(0x8000 | (v >> 16) as u16).expect("vec write");
        out.write_u16::<BigEndian>((v & 0xFFFF) as u16).expect("vec write");
    } else {
        return Err(FormatError::MalformedField {
            record: "var1",
            field:  "value",
            offset: out.len(),
            reason: format!("{v:#x} exceeds the 31-bit var1 ceiling"),
        });
    }
    Ok(())
}

/// Encoded size of a `var1` value.
pub fn var1_size(v: u32) -> usize {
    if v <= 0x7FFF { 2 } else { 4 }
}

/// Shortest `var2s` encoding.  -0x8000 itself needs the escape (it is the
/// sentinel), so the short form covers -0x7FFF..=0x7FFF only.
pub fn write_var2s(out: &mut Vec<u8>, v: i32) {
    if (-0x7FFF..=0x7FFF).contains(&v) {
        out.write_i16::<BigEndian>(v as i16).expect("vec write");
    } else {
        out.write_i16::<BigEndian>(-0x8000).expect("vec write");
        out.write_i32::<BigEndian>(v).expect("vec write");
    }
}

pub fn var2s_size(v: i32) -> usize {
    if (-0x7FFF..=0x7FFF).contains(&v) { 2 } else { 6 }
}

/// Shortest unsigned `var1b` encoding.
pub fn write_var1b(out: &mut Vec<u8>, v: u32) {
    if v < 254 {
        out.push(v as u8);
    } else if v <= 0xFFFF {
        out.push(254);
        out.write_u16::<BigEndian>(v as u16).expect("vec write");
    } else {
        out.push(255);
        out.write_u32::<BigEndian>(v).expect("vec write");
    }
}

pub fn var1b_size(v: u32) -> usize {
    if v < 254 { 1 } else if v <= 0xFFFF { 3 } else { 5 }
}

/// Shortest signed `var1b` encoding.  0x80 and 0x81 are the escape bytes,
/// so the i8 range shrinks to -126..=127 on the negative side.
pub fn write_var1b_signed(out: &mut Vec<u8>, v: i32) {
    if (-126..=127).contains(&v) {
        out.push(v as i8 as u8);
    } else if (-0x8000..=0x7FFF).contains(&v) {
        out.push(0x80);
        out.write_i16::<BigEndian>(v as i16).expect("vec write");
    } else {
        out.push(0x81);
        out.write_i32::<BigEndian>(v).expect("vec write");
    }
}

pub fn var1b_signed_size(v: i32) -> usize {
    if (-126..=127).contains(&v) { 1 } else if (-0x8000..=0x7FFF).contains(&v) { 3 } else { 5 }
}

/// Write a short string (1-byte length + bytes + pad to `align`).
pub fn write_pstring(out: &mut Vec<u8>, data: &[u8], align: usize) {
    out.push(data.len() as u8);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(0u8).take(pad_len(1 + data.len(), align)));
}

pub fn pstring_size(len: usize, align: usize) -> usize {
    1 + len + pad_len(1 + len, align)
}

/// Write a long string (4-byte length + bytes).
pub fn write_lstring(out: &mut Vec<u8>, data: &[u8]) {
    out.write_u32::<BigEndian>(data.len() as u32).expect("vec write");
    out.extend_from_slice(data);
}

pub fn lstring_size(len: usize) -> usize {
    4 + len
}

/// Pad `out` to a multiple of `align`.
pub fn write_pad(out: &mut Vec<u8>, align: usize) {
    out.extend(std::iter::repeat(0u8).take(pad_len(out.len(), align)));
}

// ── 128-bit extended float ────────────────────────────────────────────────────

/// IEEE binary128 layout: 1 sign bit, 15 exponent bits, 112 fraction bits.
/// Kept as raw bit fields so decode→encode is exact for every input,
/// including NaN payloads and subnormals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadFloat {
    pub sign:       bool,
    /// Biased exponent, 0..=0x7FFF.  0 = zero/subnormal, 0x7FFF = inf/nan.
    pub biased_exp: u16,
    /// 112 fraction bits (implicit leading 1 not stored).
    pub fraction:   u128,
}

pub const QUAD_EXP_BIAS: i32     = 16383;
pub const QUAD_EXP_SPECIAL: u16  = 0x7FFF;
const QUAD_FRACTION_BITS: u32    = 112;
const QUAD_FRACTION_MASK: u128   = (1u128 << QUAD_FRACTION_BITS) - 1;

impl QuadFloat {
    pub const ZERO: QuadFloat = QuadFloat { sign: false, biased_exp: 0, fraction: 0 };

    pub fn from_be_bytes(b: [u8; 16]) -> Self {
        let bits = u128::from_be_bytes(b);
        QuadFloat {
            sign:       bits >> 127 != 0,
            biased_exp: ((bits >> QUAD_FRACTION_BITS) & 0x7FFF) as u16,
            fraction:   bits & QUAD_FRACTION_MASK,
        }
    }

    pub fn to_be_bytes(self) -> [u8; 16] {
        let bits = ((self.sign as u128) << 127)
            | ((self.biased_exp as u128) << QUAD_FRACTION_BITS)
            | (self.fraction & QUAD_FRACTION_MASK);
        bits.to_be_bytes()
    }

    pub fn is_zero(self) -> bool {
        self.biased_exp == 0 && self.fraction == 0
    }
    pub fn is_inf(self) -> bool {
        self.biased_exp == QUAD_EXP_SPECIAL && self.fraction == 0
    }
    pub fn is_nan(self) -> bool {
        self.biased_exp == QUAD_EXP_SPECIAL && self.fraction != 0
    }

    /// Approximate f64 value, for diagnostics only.  Never used for
    /// round-tripping — the bit fields are authoritative.
    pub fn to_f64(self) -> f64 {
        let sign = if self.sign { -1.0 } else { 1.0 };
        if self.is_nan() { return f64::NAN; }
        if self.is_inf() { return sign * f64::INFINITY; }
        if self.is_zero() { return sign * 0.0; }
        let (mantissa, exp) = if self.biased_exp == 0 {
            (self.fraction as f64 / (1u128 << QUAD_FRACTION_BITS >> 16) as f64 / 65536.0,
             1 - QUAD_EXP_BIAS)
        } else {
            (1.0 + self.fraction as f64 / (1u128 << (QUAD_FRACTION_BITS - 16)) as f64 / 65536.0,
             self.biased_exp as i32 - QUAD_EXP_BIAS)
        };
        sign * mantissa * 2f64.powi(exp)
    }

    /// Build from an f64 using a frexp-style normalization loop.  Used when
    /// the mirror tree carries a hand-edited decimal value; lossy beyond
    /// f64 precision (the exact hex form below is the lossless mirror).
    pub fn from_f64(v: f64) -> Self {
        if v.is_nan() {
            return QuadFloat { sign: false, biased_exp: QUAD_EXP_SPECIAL, fraction: 1 << (QUAD_FRACTION_BITS - 1) };
        }
        let sign = v.is_sign_negative();
        let mut m = v.abs();
        if m == 0.0 {
            return QuadFloat { sign, biased_exp: 0, fraction: 0 };
        }
        if m.is_infinite() {
            return QuadFloat { sign, biased_exp: QUAD_EXP_SPECIAL, fraction: 0 };
        }
        // Normalize m into [1, 2).
        let mut exp: i32 = 0;
        while m >= 2.0 { m /= 2.0; exp += 1; }
        while m < 1.0  { m *= 2.0; exp -= 1; }
        // Extract 112 fraction bits by repeated doubling.
        let mut frac: u128 = 0;
        m -= 1.0;
        for _ in 0..QUAD_FRACTION_BITS {
            m *= 2.0;
            frac <<= 1;
            if m >= 1.0 {
                frac |= 1;
                m -= 1.0;
            }
        }
        QuadFloat { sign, biased_exp: (exp + QUAD_EXP_BIAS) as u16, fraction: frac }
    }

    /// Exact textual mirror: hex significand + binary exponent.
    /// `0x1.<28 hex digits>p<exp>` for normals, `0x0.<digits>p-16382` for
    /// subnormals, `0`/`inf`/`nan` specials.  Lossless by construction.
    pub fn to_text(self) -> String {
        let s = if self.sign { "-" } else { "" };
        if self.is_nan() { return format!("{s}nan:{:#x}", self.fraction); }
        if self.is_inf() { return format!("{s}inf"); }
        if self.is_zero() { return format!("{s}0"); }
        if self.biased_exp == 0 {
            format!("{s}0x0.{:028x}p-16382", self.fraction)
        } else {
            format!("{s}0x1.{:028x}p{}", self.fraction, self.biased_exp as i32 - QUAD_EXP_BIAS)
        }
    }

    /// Parse the exact mirror form produced by [`QuadFloat::to_text`].
    /// Falls back to f64 decimal parsing for hand-edited values.
    pub fn from_text(text: &str) -> Result<Self> {
        let bad = |reason: &str| FormatError::MalformedField {
            record: "QuadFloat",
            field:  "text",
            offset: 0,
            reason: format!("{reason}: {text:?}"),
        };
        let (sign, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None       => (false, text),
        };
        if body == "0"   { return Ok(QuadFloat { sign, biased_exp: 0, fraction: 0 }); }
        if body == "inf" { return Ok(QuadFloat { sign, biased_exp: QUAD_EXP_SPECIAL, fraction: 0 }); }
        if let Some(payload) = body.strip_prefix("nan:") {
            let frac = u128::from_str_radix(payload.trim_start_matches("0x"), 16)
                .map_err(|e| bad(&e.to_string()))?;
            return Ok(QuadFloat { sign, biased_exp: QUAD_EXP_SPECIAL, fraction: frac.max(1) });
        }
        if let Some(rest) = body.strip_prefix("0x") {
            let (lead, rest) = rest.split_once('.').ok_or_else(|| bad("missing '.'"))?;
            let (frac_hex, exp_str) = rest.split_once('p').ok_or_else(|| bad("missing 'p'"))?;
            let fraction = u128::from_str_radix(frac_hex, 16).map_err(|e| bad(&e.to_string()))?;
            let exp: i32 = exp_str.parse().map_err(|_| bad("bad exponent"))?;
            return match lead {
                "0" => Ok(QuadFloat { sign, biased_exp: 0, fraction }),
                "1" => Ok(QuadFloat { sign, biased_exp: (exp + QUAD_EXP_BIAS) as u16, fraction }),
                _   => Err(bad("leading digit must be 0 or 1")),
            };
        }
        // Plain decimal from a hand edit.
        let v: f64 = text.parse().map_err(|_| bad("not a number"))?;
        Ok(QuadFloat::from_f64(v))
    }
}
