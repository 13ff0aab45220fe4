//! Parsing and serialization of the inner KeePass XML document.
//!
//! The outer KDBX container (see [`crate::format`]) is responsible for
//! authenticating, decrypting and (de)compressing the payload; this module
//! only concerns itself with turning that payload into (and back out of)
//! the in-memory [`Group`]/[`Entry`] tree.
//!
//! Protected fields (passwords, ...) are additionally obfuscated with a
//! stream cipher independent of the outer encryption. That cipher's
//! keystream must be consumed in exactly the document order the protected
//! fields appear in, which is why this module walks the XML with a
//! `quick_xml` event reader/writer instead of deriving `serde::Deserialize`.

pub(crate) mod dump;
pub(crate) mod parse;
mod times;

use crate::db::{DeletedObjects, Group, Meta};

/// Everything parsed out of the `<KeePassFile>` document.
pub(crate) struct DatabaseContent {
    pub root: RootContent,
    pub meta: Meta,
}

/// The contents of the `<Root>` element.
pub(crate) struct RootContent {
    pub group: Group,
    pub deleted_objects: DeletedObjects,
}
