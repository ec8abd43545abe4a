//! Per-document ambient state.
//!
//! Exactly one `Document` exists per load-fix-save pass.  It owns the
//! shared type-descriptor table and is threaded `&mut` into every parse and
//! late-fixup call — there is no module-level singleton and no cross-
//! document sharing.  The table is append-only while records parse; only
//! the final repair pass mutates destructively, and only on the tree.

use crate::field::Limits;
use crate::typedesc::TypeDescTable;
use crate::version::LvVersion;

#[derive(Debug, Clone)]
pub struct Document {
    /// Format version of the containing file — the gate for every
    /// version-conditional layout, including ones inside records that carry
    /// their own (separate) version words.
    pub version: LvVersion,
    /// Consolidated-type mode: variants reference the shared flat pool
    /// instead of carrying inline descriptors.  Defaults on for 8.6+.
    pub consolidated_types: bool,
    pub limits: Limits,
    pub table:  TypeDescTable,
}

impl Document {
    pub fn new(version: LvVersion) -> Self {
        Document {
            consolidated_types: version.at_least(8, 6),
            version,
            limits: Limits::default(),
            table:  TypeDescTable::new(),
        }
    }

    /// The 8.0 format revision switched the version-word build encoding.
    pub fn new_version_layout(&self) -> bool {
        self.version.at_least(8, 0)
    }
}
