//! Configuration model: the YAML document that declares rules and mask rules.
//!
//! Deserialization is lenient (absent sections default to empty) so rulesets
//! stay forward-compatible; `verify` enforces the few invariants that would
//! otherwise surface as confusing runtime behavior.
//!
//! # Invariants
//! - `rule_id` is positive and unique across the document.
//! - Mask rule names are non-empty; duplicates are resolved at load time
//!   (first wins, later ones are logged and skipped).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::DlpError;

/// The embedded default ruleset.
pub const DEFAULT_CONF: &str = include_str!("../conf/default.yml");

/// Root of a configuration document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DlpConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub mask_rules: Vec<MaskRuleConfig>,
}

/// Engine-wide knobs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub mode: Mode,
    /// Log-processor text cap in bytes; `0` keeps the built-in default.
    #[serde(default)]
    pub max_log_input: u32,
    /// In log-only mode, regex-based rules above this id are skipped.
    #[serde(default)]
    pub max_regex_rule_id: u32,
    /// Rules removed from the active set regardless of `enable_rules`.
    #[serde(default)]
    pub disable_rules: Vec<u32>,
    /// When non-empty, the active set is the intersection with the loaded rules.
    #[serde(default)]
    pub enable_rules: Vec<u32>,
}

/// Verbosity of load-time diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Debug,
    #[default]
    Release,
}

/// One detection rule. Metadata fields are copied verbatim into every finding.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    pub rule_id: u32,
    #[serde(default)]
    pub info_type: String,
    #[serde(default)]
    pub en_name: String,
    #[serde(default)]
    pub cn_name: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub ext_info: BTreeMap<String, String>,
    /// Name of the mask rule applied to this rule's findings.
    #[serde(default)]
    pub mask: String,
    #[serde(default)]
    pub detect: DetectConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

/// Detection patterns. A rule with any key pattern is a key/value rule.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Regexes matched against the (stripped) key.
    #[serde(default)]
    pub k_reg: Vec<String>,
    /// Exact key words, matched case-insensitively.
    #[serde(default)]
    pub k_dict: Vec<String>,
    /// Regexes matched against value bytes.
    #[serde(default)]
    pub v_reg: Vec<String>,
    /// Literal words located in value bytes.
    #[serde(default)]
    pub v_dict: Vec<String>,
}

/// Blacklist that suppresses raw matches.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub b_reg: Vec<String>,
    #[serde(default)]
    pub b_dict: Vec<String>,
    /// Supported: `MASKED` drops matches that already contain `*` or `#`.
    #[serde(default)]
    pub b_algo: Vec<String>,
}

/// Context and algorithmic validation; all configured checks must accept.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VerifyConfig {
    #[serde(default)]
    pub c_reg: Vec<String>,
    #[serde(default)]
    pub c_dict: Vec<String>,
    /// Supported: `IDCARD`, `ABAROUTING`, `CREDITCARD`, `BITCOIN`, `DOMAIN`.
    #[serde(default)]
    pub v_algo: Vec<String>,
}

/// One mask rule. `offset`/`padding`/`length` only apply to `CHAR` mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaskRuleConfig {
    pub rule_name: String,
    pub mask_type: MaskType,
    /// Replacement payload (`REPLACE`), algorithm selector (`ALGO`), or the
    /// substitute character (`CHAR`, first byte; defaults to `*`).
    #[serde(default)]
    pub value: String,
    /// Window start; `-1` means the start of the text.
    #[serde(default = "minus_one")]
    pub offset: i32,
    /// Bytes preserved at the far end of the window; `-1` means none.
    #[serde(default = "minus_one")]
    pub padding: i32,
    /// Maximum bytes visited; `0` means unbounded.
    #[serde(default)]
    pub length: i32,
    /// Mask from the right end toward the left.
    #[serde(default)]
    pub reverse: bool,
    /// Bytes excluded from substitution.
    #[serde(default)]
    pub ignore_char_set: String,
    /// Character classes appended to `ignore_char_set` at load time.
    #[serde(default)]
    pub ignore_kind: Vec<IgnoreKind>,
}

fn minus_one() -> i32 {
    -1
}

/// The four masking strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaskType {
    Char,
    Tag,
    Replace,
    Algo,
}

/// Named character classes for `CHAR`-mode ignore sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IgnoreKind {
    Numeric,
    AlphaLowerCase,
    AlphaUpperCase,
    Whitespace,
    Punctuation,
}

impl IgnoreKind {
    /// The characters this kind expands into.
    pub fn char_set(self) -> &'static str {
        match self {
            Self::Numeric => "0123456789",
            Self::AlphaLowerCase => "abcdefghijklmnopqrstuvwxyz",
            Self::AlphaUpperCase => "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
            Self::Whitespace => " \t\n\x0B\x0C\r",
            Self::Punctuation => "!\"#$%&'()*+,-./:;<=>?@[]^_`{|}~",
        }
    }
}

impl DlpConfig {
    /// Parses and verifies a YAML document.
    pub fn from_str(doc: &str) -> Result<Self, DlpError> {
        if doc.trim().is_empty() {
            return Err(DlpError::ConfEmpty);
        }
        let conf: Self = serde_yaml::from_str(doc)?;
        conf.verify()?;
        Ok(conf)
    }

    /// Reads and parses a YAML document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DlpError> {
        let doc = fs::read_to_string(path)?;
        Self::from_str(&doc)
    }

    /// The embedded default ruleset, parsed.
    pub fn default_conf() -> Result<Self, DlpError> {
        Self::from_str(DEFAULT_CONF)
    }

    fn verify(&self) -> Result<(), DlpError> {
        let mut seen = std::collections::BTreeSet::new();
        for rule in &self.rules {
            if rule.rule_id == 0 {
                return Err(DlpError::ConfVerifyFailed {
                    detail: format!("rule {:?} has rule_id 0", rule.info_type),
                });
            }
            if !seen.insert(rule.rule_id) {
                return Err(DlpError::ConfVerifyFailed {
                    detail: format!("duplicate rule_id {}", rule.rule_id),
                });
            }
        }
        for mask in &self.mask_rules {
            if mask.rule_name.is_empty() {
                return Err(DlpError::ConfVerifyFailed {
                    detail: "mask rule with empty rule_name".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_conf_parses_and_verifies() {
        let conf = DlpConfig::default_conf().unwrap();
        assert!(!conf.rules.is_empty());
        assert!(!conf.mask_rules.is_empty());
        assert!(conf.rules.iter().any(|r| r.info_type == "PHONE"));
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(matches!(
            DlpConfig::from_str("  \n"),
            Err(DlpError::ConfEmpty)
        ));
    }

    #[test]
    fn duplicate_rule_ids_fail_verification() {
        let doc = "
rules:
  - rule_id: 7
    info_type: A
  - rule_id: 7
    info_type: B
";
        assert!(matches!(
            DlpConfig::from_str(doc),
            Err(DlpError::ConfVerifyFailed { .. })
        ));
    }

    #[test]
    fn mask_rule_defaults_apply() {
        let doc = "
mask_rules:
  - rule_name: M
    mask_type: CHAR
";
        let conf = DlpConfig::from_str(doc).unwrap();
        let mask = &conf.mask_rules[0];
        assert_eq!(mask.offset, -1);
        assert_eq!(mask.padding, -1);
        assert_eq!(mask.length, 0);
        assert!(!mask.reverse);
    }
}
