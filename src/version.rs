//! 32-bit version code pack/unpack.
//!
//! Two encodings exist on disk.  Files written before the 8.0 format
//! revision pack the stage into three bits above a 13-bit binary build
//! number; 8.0+ files keep the same bit positions but store the build
//! number BCD-packed.  Major/minor/bugfix are BCD in both layouts.
//!
//! | Bits | Field |
//! |------|-------|
//! | 31..24 | major (two BCD digits) |
//! | 23..20 | minor (one BCD digit) |
//! | 19..16 | bugfix (one BCD digit) |
//! | 15..13 | stage (1=dev 2=alpha 3=beta 4=release) |
//! | 12..0  | build (binary pre-8.0, BCD 8.0+) |

use crate::error::{FormatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    Development,
    Alpha,
    Beta,
    #[default]
    Release,
}

impl Stage {
    fn code(self) -> u32 {
        match self {
            Stage::Development => 1,
            Stage::Alpha       => 2,
            Stage::Beta        => 3,
            Stage::Release     => 4,
        }
    }

    fn from_code(c: u32) -> Result<Self> {
        match c {
            1 => Ok(Stage::Development),
            2 => Ok(Stage::Alpha),
            3 => Ok(Stage::Beta),
            4 => Ok(Stage::Release),
            other => Err(FormatError::MalformedField {
                record: "LvVersion",
                field:  "stage",
                offset: 0,
                reason: format!("stage code {other} out of range 1..=4"),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Development => "development",
            Stage::Alpha       => "alpha",
            Stage::Beta        => "beta",
            Stage::Release     => "release",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "development" => Some(Stage::Development),
            "alpha"       => Some(Stage::Alpha),
            "beta"        => Some(Stage::Beta),
            "release"     => Some(Stage::Release),
            _             => None,
        }
    }
}

/// Decoded document/record format version.  `flags` carries bits that some
/// sections store alongside the packed code; zero for plain version words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LvVersion {
    pub major:  u32,
    pub minor:  u32,
    pub bugfix: u32,
    pub stage:  Stage,
    pub build:  u32,
    pub flags:  u32,
}

fn to_bcd(v: u32, digits: u32) -> Result<u32> {
    let mut out = 0u32;
    let mut rem = v;
    for d in 0..digits {
        out |= (rem % 10) << (4 * d);
        rem /= 10;
    }
    if rem != 0 {
        return Err(FormatError::MalformedField {
            record: "LvVersion",
            field:  "bcd",
            offset: 0,
            reason: format!("{v} does not fit in {digits} BCD digits"),
        });
    }
    Ok(out)
}

fn from_bcd(v: u32, digits: u32) -> u32 {
    let mut out = 0u32;
    for d in (0..digits).rev() {
        out = out * 10 + ((v >> (4 * d)) & 0xF);
    }
    out
}

impl LvVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        LvVersion { major, minor, ..Default::default() }
    }

    /// True when this version is >= `major.minor` (the gate used by every
    /// version-conditional layout in `linkinfo` and `variant`).
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    /// Pack into the 32-bit wire code.  `new_layout` selects the 8.0+ BCD
    /// build encoding.
    pub fn encode(&self, new_layout: bool) -> Result<u32> {
        let build = if new_layout {
            let bcd = to_bcd(self.build, 4)?;
            if bcd > 0x1FFF {
                return Err(FormatError::MalformedField {
                    record: "LvVersion",
                    field:  "build",
                    offset: 0,
                    reason: format!("build {} does not fit the 13-bit BCD field", self.build),
                });
            }
            bcd
        } else {
            if self.build > 0x1FFF {
                return Err(FormatError::MalformedField {
                    record: "LvVersion",
                    field:  "build",
                    offset: 0,
                    reason: format!("build {} exceeds the 13-bit pre-8.0 field", self.build),
                });
            }
            self.build
        };
        Ok((to_bcd(self.major, 2)? << 24)
            | (to_bcd(self.minor, 1)? << 20)
            | (to_bcd(self.bugfix, 1)? << 16)
            | (self.stage.code() << 13)
            | (build & 0x1FFF))
    }

    /// Unpack a 32-bit wire code.
    pub fn decode(code: u32, new_layout: bool) -> Result<Self> {
        let raw_build = code & 0x1FFF;
        let build = if new_layout { from_bcd(raw_build, 4) } else { raw_build };
        Ok(LvVersion {
            major:  from_bcd(code >> 24, 2),
            minor:  from_bcd((code >> 20) & 0xF, 1),
            bugfix: from_bcd((code >> 16) & 0xF, 1),
            stage:  Stage::from_code((code >> 13) & 0x7)?,
            build,
            flags:  0,
        })
    }
}

impl std::fmt::Display for LvVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}{}{}", self.major, self.minor, self.bugfix,
            match self.stage { Stage::Release => String::new(), s => format!("-{}", s.name()) },
            if self.build != 0 { format!("+{}", self.build) } else { String::new() })
    }
}
