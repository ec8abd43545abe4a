//! The common contract every structured record implements.
//!
//! A record must keep `expected_size` in exact lockstep with `serialize`:
//! callers cross-check serialized output against the expected size without
//! materializing it, and the format has no self-describing framing above
//! the record level — one wrong size desynchronizes every sibling record.

use log::warn;

use crate::document::Document;
use crate::error::{FormatError, Result};
use crate::field::BeCursor;
use crate::tree::Element;

pub trait BinRecord {
    /// Record kind name, used in error messages and as the tree tag.
    fn kind(&self) -> &'static str;

    /// Parse from the cursor, consuming exactly as many bytes as the
    /// record declares.
    fn parse(&mut self, doc: &mut Document, cursor: &mut BeCursor<'_>) -> Result<()>;

    /// Serialize to bytes.  `avoid_recompute` skips dependent-size
    /// recomputation when the caller knows cached sizes are current.
    fn serialize(&self, doc: &Document, avoid_recompute: bool) -> Result<Vec<u8>>;

    /// Size `serialize` would produce, without materializing it.
    fn expected_size(&self, doc: &Document) -> Result<usize>;

    /// Rebuild the record from its mirror-tree element.
    fn import_tree(&mut self, doc: &mut Document, elem: &Element) -> Result<()>;

    /// Export the record as a mirror-tree element.
    fn export_tree(&self, doc: &Document) -> Result<Element>;

    /// Invoked once all sibling sections are loaded, for fields that
    /// resolve through the shared type table.
    fn late_fixup(&mut self, _doc: &mut Document) -> Result<()> {
        Ok(())
    }

    /// Non-fatal structural self-check.
    fn check_sanity(&self) -> bool {
        true
    }
}

/// Reconcile a record's declared size with the bytes actually consumed.
///
/// A mismatch is the one recoverable parse error: it is logged with both
/// sizes and the declared size stays authoritative for skipping forward.
/// Returns the error value so callers that cannot recover may propagate it.
pub fn reconcile_size(record: &'static str, declared: usize, consumed: usize) -> Option<FormatError> {
    if declared == consumed {
        return None;
    }
    warn!("{record}: declared size {declared} but consumed {consumed}; trusting declared size");
    Some(FormatError::SizeMismatch { record, declared, consumed })
}
