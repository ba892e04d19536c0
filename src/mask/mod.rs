//! Mask workers: transform matched text into its redacted form.
//!
//! One worker exists per mask rule, plus DIY workers registered at runtime.
//! `CHAR` substitutes bytes inside a configurable window, `TAG` emits the
//! rule's info type, `REPLACE` emits a fixed payload, and `ALGO` delegates
//! to a named algorithm (see [`algo`]).
//!
//! # Invariants
//! - Workers never fail the scan: the engine falls back to the original
//!   text when a worker returns an error.
//! - `CHAR` windows are byte-indexed and never touch bytes in the expanded
//!   ignore set.

mod algo;

use crate::api::{into_string_lossy, DetectResult};
use crate::config::{MaskRuleConfig, MaskType};
use crate::engine::Engine;
use crate::errors::DlpError;

/// Boxed DIY masking function.
pub(crate) type DiyMaskFn = Box<dyn Fn(&str) -> Result<String, DlpError> + Send + Sync>;

/// A mask worker: either a configured rule or a caller-registered function.
/// Workers are addressed by name through the engine's worker map.
pub(crate) enum MaskWorker {
    Rule(RuleWorker),
    Diy(DiyMaskFn),
}

impl MaskWorker {
    /// Masks free-standing text, outside any detection context.
    pub(crate) fn mask(&self, input: &str, engine: &Engine) -> Result<String, DlpError> {
        match self {
            Self::Rule(worker) => worker.mask(input, engine),
            Self::Diy(func) => func(input),
        }
    }

    /// Populates `mask_text` for a finding. `TAG` workers use the finding's
    /// info type directly instead of re-detecting.
    pub(crate) fn mask_result(
        &self,
        res: &mut DetectResult,
        engine: &Engine,
    ) -> Result<(), DlpError> {
        match self {
            Self::Rule(worker) if worker.rule.mask_type == MaskType::Tag => {
                res.mask_text = tag_text(&res.info_type);
                Ok(())
            }
            _ => {
                res.mask_text = self.mask(&res.text, engine)?;
                Ok(())
            }
        }
    }
}

/// A worker compiled from a mask rule.
pub(crate) struct RuleWorker {
    rule: MaskRuleConfig,
}

impl RuleWorker {
    /// Builds the worker, expanding `ignore_kind` into `ignore_char_set`.
    pub(crate) fn new(rule: &MaskRuleConfig) -> Self {
        let mut rule = rule.clone();
        for kind in &rule.ignore_kind {
            rule.ignore_char_set.push_str(kind.char_set());
        }
        Self { rule }
    }

    fn mask(&self, input: &str, engine: &Engine) -> Result<String, DlpError> {
        match self.rule.mask_type {
            MaskType::Char => Ok(self.mask_char(input)),
            MaskType::Tag => Ok(self.mask_text_tag(input, engine)),
            MaskType::Replace => Ok(self.rule.value.clone()),
            MaskType::Algo => self.mask_algo(input, engine),
        }
    }

    /// Byte substitution inside `[offset, len - padding)`, or the mirrored
    /// window when `reverse` is set. `length` caps visited positions, and
    /// visiting counts ignored bytes too.
    fn mask_char(&self, input: &str) -> String {
        let ch = self.rule.value.as_bytes().first().copied().unwrap_or(b'*');
        let ignore = self.rule.ignore_char_set.as_bytes();
        let length = self.rule.length;
        let mut out = input.as_bytes().to_vec();
        let sz = out.len() as i64;

        if !self.rule.reverse {
            let st = if self.rule.offset >= 0 {
                i64::from(self.rule.offset)
            } else {
                0
            };
            let ed = if self.rule.padding >= 0 {
                sz - i64::from(self.rule.padding)
            } else {
                sz
            };
            let mut cnt = 0i32;
            let mut i = st;
            while i < ed && i < sz {
                if length > 0 && cnt >= length {
                    break;
                }
                let idx = i as usize;
                if !ignore.contains(&out[idx]) {
                    out[idx] = ch;
                }
                cnt += 1;
                i += 1;
            }
        } else {
            let ed = if self.rule.offset >= 0 {
                sz - 1 - i64::from(self.rule.offset)
            } else {
                sz - 1
            };
            let st = if self.rule.padding >= 0 {
                i64::from(self.rule.padding)
            } else {
                0
            };
            let mut cnt = 0i32;
            let mut i = ed.min(sz - 1);
            while i >= st && i >= 0 {
                if length > 0 && cnt >= length {
                    break;
                }
                let idx = i as usize;
                if !ignore.contains(&out[idx]) {
                    out[idx] = ch;
                }
                cnt += 1;
                i -= 1;
            }
        }
        into_string_lossy(out)
    }

    /// Direct `TAG` masking has no detection context, so detect first and
    /// take the leading finding's info type.
    fn mask_text_tag(&self, input: &str, engine: &Engine) -> String {
        match engine.detect(input) {
            Ok(results) if !results.is_empty() => tag_text(&results[0].info_type),
            _ => tag_text("UNKNOWN"),
        }
    }
}

fn tag_text(info_type: &str) -> String {
    format!("<{info_type}>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreKind;

    fn char_rule(offset: i32, padding: i32, length: i32, reverse: bool) -> MaskRuleConfig {
        MaskRuleConfig {
            rule_name: "T".to_string(),
            mask_type: MaskType::Char,
            value: String::new(),
            offset,
            padding,
            length,
            reverse,
            ignore_char_set: String::new(),
            ignore_kind: Vec::new(),
        }
    }

    fn mask_char(rule: MaskRuleConfig, input: &str) -> String {
        RuleWorker::new(&rule).mask_char(input)
    }

    #[test]
    fn char_window_with_offset_and_padding() {
        assert_eq!(mask_char(char_rule(3, 2, 0, false), "18612341234"), "186******34");
        assert_eq!(mask_char(char_rule(2, 2, 0, false), "18612341234"), "18*******34");
        assert_eq!(mask_char(char_rule(1, -1, 0, false), "10086"), "1****");
    }

    #[test]
    fn char_defaults_mask_everything() {
        assert_eq!(mask_char(char_rule(-1, -1, 0, false), "secret"), "******");
        assert_eq!(mask_char(char_rule(-1, -1, 0, false), ""), "");
    }

    #[test]
    fn char_length_caps_visited_positions() {
        assert_eq!(mask_char(char_rule(0, -1, 3, false), "abcdef"), "***def");
    }

    #[test]
    fn char_reverse_masks_from_the_right() {
        assert_eq!(mask_char(char_rule(0, -1, 4, true), "abcdefgh"), "abcd****");
        // offset counts from the right end in reverse mode
        assert_eq!(mask_char(char_rule(2, -1, 0, true), "abcdefgh"), "******gh");
        // padding keeps a left prefix
        assert_eq!(mask_char(char_rule(0, 3, 0, true), "abcdefgh"), "abc*****");
    }

    #[test]
    fn char_out_of_range_windows_are_inert() {
        assert_eq!(mask_char(char_rule(10, -1, 0, false), "abc"), "abc");
        assert_eq!(mask_char(char_rule(0, 10, 0, false), "abc"), "abc");
        assert_eq!(mask_char(char_rule(10, -1, 0, true), "abc"), "abc");
    }

    #[test]
    fn char_respects_ignore_sets() {
        let mut rule = char_rule(1, -1, 0, false);
        rule.ignore_char_set = "@".to_string();
        assert_eq!(mask_char(rule, "abcd@abcd.com"), "a***@********");

        let mut rule = char_rule(9, -1, 0, false);
        rule.ignore_kind = vec![IgnoreKind::Punctuation];
        assert_eq!(mask_char(rule, "06-06-06-aa-bb-cc"), "06-06-06-**-**-**");
    }

    #[test]
    fn char_substitute_comes_from_value() {
        let mut rule = char_rule(0, -1, 0, false);
        rule.value = "#".to_string();
        assert_eq!(mask_char(rule, "abc"), "###");
    }

    #[test]
    fn char_multibyte_text_masks_per_byte() {
        // Three bytes per character, one substitute byte each.
        assert_eq!(mask_char(char_rule(3, -1, 0, false), "张真人"), "张******");
    }
}
