//! The registry dump format.
//!
//! A dump is a depth-first XML serialisation of a registry subtree:
//!
//! ```text
//! <resource name="proj" isCollection="true">
//!   <version>12</version>
//!   <lastModified>1700000000000</lastModified>
//!   <children>
//!     <resource name="a.txt" isCollection="false">
//!       <version>9</version>
//!       <mediaType>text/plain</mediaType>
//!       <content>YWxwaGE=</content>
//!     </resource>
//!   </children>
//! </resource>
//! ```
//!
//! [`DumpReader`] is a forward-only cursor over such a stream and
//! [`DumpWriter`] produces one. Meta files use the same element grammar.

mod reader;
mod writer;

pub use reader::{ChildrenBlock, DumpReader, Token};
pub use writer::DumpWriter;

pub(crate) const RESOURCE: &str = "resource";
pub(crate) const CHILDREN: &str = "children";
pub(crate) const CONTENT: &str = "content";
pub(crate) const VERSION: &str = "version";
pub(crate) const LAST_MODIFIED: &str = "lastModified";
pub(crate) const NAME_ATTR: &str = "name";
pub(crate) const IS_COLLECTION_ATTR: &str = "isCollection";
