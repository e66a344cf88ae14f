//! # StashDB Codec
//!
//! Structured-document encoding for StashDB.
//!
//! Values are stored as JSON documents:
//! - integers and floats are kept apart (`2.0` never becomes `2`)
//! - `None` encodes as an explicit `null`
//! - every stored value is itself a complete JSON document, which lets the
//!   snapshot format embed values verbatim
//!
//! ## Usage
//!
//! ```
//! use stashdb_codec::{from_json, to_json};
//!
//! let bytes = to_json(&("tag", 3, Some(1.5))).unwrap();
//! assert_eq!(bytes, br#"["tag",3,1.5]"#);
//!
//! let back: (String, i32, Option<f64>) = from_json(&bytes).unwrap();
//! assert_eq!(back, ("tag".to_string(), 3, Some(1.5)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod json;

pub use error::{CodecError, CodecResult};
pub use json::{from_json, to_json, to_json_pretty, validate_document};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    proptest! {
        #[test]
        fn encoded_values_are_documents(
            map in proptest::collection::btree_map(".*", any::<i64>(), 0..8),
            text in ".*",
            flag in any::<bool>(),
        ) {
            validate_document(&to_json(&map).unwrap()).unwrap();
            validate_document(&to_json(&text).unwrap()).unwrap();
            validate_document(&to_json(&flag).unwrap()).unwrap();

            let back: BTreeMap<String, i64> = from_json(&to_json(&map).unwrap()).unwrap();
            prop_assert_eq!(back, map);
        }
    }
}
