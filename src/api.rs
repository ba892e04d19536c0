//! Public data types for reporting findings, plus the engine's hard caps.
//!
//! Types here are intentionally behavior-free; the engine performs all
//! validation and enforcement. Serialized field names are stable and
//! snake_case so result lists can be persisted and replayed through
//! [`Engine::de_identify_json_by_result`](crate::Engine::de_identify_json_by_result).
//!
//! # Invariants
//! - `byte_start..byte_end` is a half-open byte range; for `VALUE` results
//!   from raw text it indexes the scanned input, for `KV` results it indexes
//!   the value addressed by `key`.
//! - `text` is the exact matched substring of the (normalized) input.
//! - `mask_text` depends only on the firing rule, `text`, and possibly the
//!   rule's info type.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Hard cap on scanned text length in bytes (1 MiB).
pub const MAX_INPUT: usize = 1024 * 1024;

/// Hard cap on map entries per call.
pub const MAX_ITEM: usize = 1024 * 4;

/// Hard cap on key/value entries accepted by the log processor.
pub const MAX_LOG_ITEM: usize = 16;

/// Maximum struct-masking recursion depth, root level included.
pub const MAX_CALL_DEPTH: usize = 5;

/// Marker appended to log output when a cap truncated it.
pub const LIMIT_MARKER: &str = "<--[DLP] Log Limit Exceeded-->";

/// Locates a finding either by raw-text offset or by logical path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultType {
    /// Offsets index the scanned text directly.
    #[default]
    Value,
    /// Offsets index the value addressed by `key` (map key or JSON path).
    Kv,
}

impl ResultType {
    /// Returns true for the `VALUE` kind.
    #[inline]
    pub fn is_value(self) -> bool {
        matches!(self, Self::Value)
    }

    /// Returns true for the `KV` kind.
    #[inline]
    pub fn is_kv(self) -> bool {
        matches!(self, Self::Kv)
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Value => "VALUE",
            Self::Kv => "KV",
        })
    }
}

/// A single sensitive-information finding.
///
/// Rule metadata (`info_type` through `ext_info`) is copied verbatim from
/// the firing rule so downstream consumers never need the configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectResult {
    /// Id of the rule that produced this finding.
    pub rule_id: u32,
    /// The exact matched substring.
    pub text: String,
    /// The redacted form; populated by the mask worker bound to the rule.
    pub mask_text: String,
    /// How `byte_start`/`byte_end` are to be interpreted.
    pub result_type: ResultType,
    /// Empty for plain `VALUE` results; the map key or JSON path otherwise.
    /// Inline key/value tokens extracted from raw text also record their key
    /// here even though their offsets index the text directly.
    pub key: String,
    /// Match start, inclusive.
    pub byte_start: usize,
    /// Match end, exclusive.
    pub byte_end: usize,
    /// Rule metadata: machine-readable category (`PHONE`, `EMAIL`, ...).
    pub info_type: String,
    /// Rule metadata: English display name.
    pub en_name: String,
    /// Rule metadata: Chinese display name.
    pub cn_name: String,
    /// Rule metadata: owning rule group, often empty.
    pub group_name: String,
    /// Rule metadata: sensitivity level (`L1`..`L4`).
    pub level: String,
    /// Rule metadata: free-form extension fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ext_info: BTreeMap<String, String>,
}

/// A key/value pair with the value's original byte position.
///
/// Produced either from map input (`start == end == 0`) or by the inline
/// token scanner, where `start..end` locates the value inside the line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KVItem {
    pub key: String,
    pub value: String,
    pub start: usize,
    pub end: usize,
}

/// Converts masked bytes back into a string, tolerating windows that split a
/// multi-byte sequence.
pub(crate) fn into_string_lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}
