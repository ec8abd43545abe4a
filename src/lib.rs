pub mod error;
pub mod field;
pub mod version;
pub mod tree;
pub mod record;
pub mod document;
pub mod typedesc;
pub mod path;
pub mod linkinfo;
pub mod link;
pub mod variant;
pub mod heap;

pub use document::Document;
pub use error::{FormatError, Result};
pub use field::{BeCursor, Limits, QuadFloat};
pub use link::{classify, LinkObjKind, LinkObjList, LinkObject};
pub use record::BinRecord;
pub use typedesc::{TableRange, TypeDesc, TypeDescTable};
pub use version::LvVersion;
