//! JSON walker: projects a document into a flat `path -> value` map and
//! rebuilds it with masked leaves.
//!
//! Paths are lower-cased, slash-separated, with `[n]` suffixes for array
//! indices (`/objlist[1]/uid[0]`). A string leaf that looks like JSON is
//! re-parsed; on success the walker recurses into it under the same path
//! and stores the re-serialized form, which is how nested JSON-in-string
//! payloads get masked in place.
//!
//! Numbers pass through untouched and are serialized from their original
//! digits, so large identifiers never lose precision.

use std::collections::BTreeMap;

use memchr::memchr;
use serde_json::Value;

use crate::api::{DetectResult, KVItem};
use crate::engine::Engine;
use crate::errors::DlpError;

impl Engine {
    /// Detects over the flattened document. Returns the findings and the
    /// path map with each detected leaf already replaced by its masked
    /// form, ready for the de-identify walk.
    pub(crate) fn detect_json_impl(
        &self,
        json: &str,
    ) -> Result<(Vec<DetectResult>, BTreeMap<String, String>), DlpError> {
        let mut value: Value = serde_json::from_str(json)?;
        let mut leaves = BTreeMap::new();
        self.dfs_json(String::new(), &mut value, &mut leaves, false);

        let items: Vec<KVItem> = leaves
            .iter()
            .map(|(path, leaf)| KVItem {
                key: path.clone(),
                value: leaf.clone(),
                start: 0,
                end: 0,
            })
            .collect();
        let results = self.detect_items(&items);

        for res in &results {
            if let Some(current) = leaves.get(&res.key) {
                if let Ok(masked) = self.de_identify_by_result(current, std::slice::from_ref(res)) {
                    leaves.insert(res.key.clone(), masked);
                }
            }
        }
        Ok((results, leaves))
    }

    /// Depth-first traversal. In detect mode, records `path -> leaf` into
    /// `leaves`; in de-identify mode, substitutes leaves present in it.
    pub(crate) fn dfs_json(
        &self,
        path: String,
        node: &mut Value,
        leaves: &mut BTreeMap<String, String>,
        de_identify: bool,
    ) {
        match node {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    let child_path = format!("{}/{}", path, key.to_lowercase());
                    self.dfs_json(child_path, child, leaves, de_identify);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter_mut().enumerate() {
                    let child_path = if path.is_empty() {
                        format!("/[{index}]")
                    } else {
                        format!("{path}[{index}]")
                    };
                    self.dfs_json(child_path, child, leaves, de_identify);
                }
            }
            Value::String(text) => {
                if looks_like_json(text) {
                    if let Ok(mut nested) = serde_json::from_str::<Value>(text) {
                        self.dfs_json(path, &mut nested, leaves, de_identify);
                        *node = match serde_json::to_string(&nested) {
                            Ok(serialized) => Value::String(serialized),
                            Err(_) => nested,
                        };
                        return;
                    }
                }
                if de_identify {
                    if let Some(masked) = leaves.get(&path) {
                        *node = Value::String(masked.clone());
                    }
                } else {
                    leaves.insert(path, text.clone());
                }
            }
            _ => {}
        }
    }
}

/// Cheap shape probe: both braces or both brackets present.
fn looks_like_json(text: &str) -> bool {
    let bytes = text.as_bytes();
    let maybe_object = memchr(b'{', bytes).is_some() && memchr(b'}', bytes).is_some();
    let maybe_array = memchr(b'[', bytes).is_some() && memchr(b']', bytes).is_some();
    maybe_object || maybe_array
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_probe() {
        assert!(looks_like_json(r#"{"a":1}"#));
        assert!(looks_like_json(r#"["a"]"#));
        assert!(looks_like_json("text { with } braces"));
        assert!(!looks_like_json("plain text"));
        assert!(!looks_like_json("half { open"));
    }
}
