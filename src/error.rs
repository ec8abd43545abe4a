//! Crate-wide error taxonomy.
//!
//! Four classes of failure exist in this format, and they are handled very
//! differently (see the repair pipeline in `heap`):
//!
//! | Class | Variants | Handling |
//! |-------|----------|----------|
//! | Fatal | `UnsupportedVersion`, `UnknownIdentity`, `NotImplemented` | abort the record and its container |
//! | Malformed input | `MalformedField`, `RecursionLimit`, `TooManyElements` | abort the record |
//! | Recoverable | `SizeMismatch` | logged as a warning; declared size wins |
//! | Environment | `Io`, `Tree` | propagate |
//!
//! A record that fails fatally desynchronizes every sibling that follows it
//! in the same section, so parsers MUST NOT continue past a fatal error with
//! a guessed offset.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormatError {
    /// The record's format version predates the oldest supported branch.
    #[error("{kind}: unsupported format version {version}")]
    UnsupportedVersion { kind: &'static str, version: String },

    /// Identity code (plus containing-list identity) matched no known record
    /// kind.  Decoding MUST NOT continue — there is no length framing to
    /// skip an unknown record safely.
    #[error("unknown link identity {ident} in list {list_ident}")]
    UnknownIdentity { list_ident: String, ident: String },

    /// The identity is catalogued but its payload layout is not reverse
    /// engineered yet.  Fails loudly: silently truncating this record would
    /// corrupt every record after it in the section.
    #[error("{kind}: layout for identity {ident} not implemented")]
    NotImplemented { kind: &'static str, ident: String },

    /// A field read overran its declared length or failed a structural check.
    #[error("{record}.{field} malformed at offset {offset}: {reason}")]
    MalformedField {
        record: &'static str,
        field:  &'static str,
        offset: usize,
        reason: String,
    },

    /// Self-recursive container exceeded the configured depth budget.
    #[error("{kind}: recursion deeper than {limit} levels")]
    RecursionLimit { kind: &'static str, limit: usize },

    /// A length-prefixed list declared more elements than the safety ceiling.
    #[error("{record}.{field}: {count} elements exceeds cap {cap}")]
    TooManyElements {
        record: &'static str,
        field:  &'static str,
        count:  usize,
        cap:    usize,
    },

    /// Declared record size disagrees with bytes actually consumed.
    /// Recoverable: callers log it and trust the declared size for skipping.
    #[error("{record}: declared size {declared} but consumed {consumed}")]
    SizeMismatch {
        record:   &'static str,
        declared: usize,
        consumed: usize,
    },

    /// Mirror-tree structure did not match what the record expects.
    #[error("tree element <{elem}>: {reason}")]
    Tree { elem: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FormatError>;

impl FormatError {
    /// True for errors the repair pipeline may log-and-continue past.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FormatError::SizeMismatch { .. })
    }
}
