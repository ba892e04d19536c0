//! Per-rule detector: compiled patterns, dictionaries, and the filter stage.
//!
//! One detector is built per rule and owned by the engine. Detection is
//! two-sided: `detect_bytes` scans raw value bytes, `detect_list` scans
//! key/value pairs and routes each pair through the rule's key patterns
//! before value detection runs.
//!
//! # Invariants
//! - Emitted offsets are half-open byte ranges into the scanned buffer; for
//!   key/value pairs they are shifted by the pair's stored start so they
//!   index the enclosing line when the pair was extracted from text.
//! - Every emitted result has passed the filter stage and, when configured,
//!   context and algorithm verification.
//! - Patterns that fail to compile are logged and skipped at build time; the
//!   rest of the rule stays active.

mod verify;

use ahash::AHashSet;
use memchr::memmem;
use regex::bytes::Regex;

use crate::api::{DetectResult, KVItem, ResultType};
use crate::config::RuleConfig;
use crate::errors::DlpError;

pub(crate) use verify::{decode_term_list, utf8_width, VerifyAlgo};

/// Whether a rule keys off pair keys or scans values directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RuleType {
    Value,
    Kv,
}

/// A compiled detection rule.
pub(crate) struct Detector {
    rule: RuleConfig,
    rule_type: RuleType,
    k_reg: Vec<Regex>,
    /// Lowered key words; lookups lower the candidate key.
    k_dict: AHashSet<String>,
    v_reg: Vec<Regex>,
    v_dict: Vec<String>,
    b_reg: Vec<Regex>,
    b_dict: Vec<String>,
    /// `b_algo` contains `MASKED`.
    b_masked: bool,
    c_reg: Vec<Regex>,
    /// Lowered context words.
    c_dict: Vec<String>,
    v_algo: Vec<VerifyAlgo>,
}

impl Detector {
    pub(crate) fn new(rule: &RuleConfig) -> Self {
        let k_reg = compile_patterns(&rule.detect.k_reg);
        let k_dict: AHashSet<String> = rule
            .detect
            .k_dict
            .iter()
            .map(|w| w.to_lowercase())
            .collect();
        let rule_type = if k_reg.is_empty() && k_dict.is_empty() {
            RuleType::Value
        } else {
            RuleType::Kv
        };
        Self {
            rule_type,
            k_reg,
            k_dict,
            v_reg: compile_patterns(&rule.detect.v_reg),
            v_dict: rule.detect.v_dict.clone(),
            b_reg: compile_patterns(&rule.filter.b_reg),
            b_dict: rule.filter.b_dict.clone(),
            b_masked: rule.filter.b_algo.iter().any(|a| a == "MASKED"),
            c_reg: compile_patterns(&rule.verify.c_reg),
            c_dict: rule.verify.c_dict.iter().map(|w| w.to_lowercase()).collect(),
            v_algo: VerifyAlgo::parse_all(rule.rule_id, &rule.verify.v_algo),
            rule: rule.clone(),
        }
    }

    #[inline]
    pub(crate) fn rule_id(&self) -> u32 {
        self.rule.rule_id
    }

    #[inline]
    pub(crate) fn mask_rule_name(&self) -> &str {
        &self.rule.mask
    }

    #[inline]
    pub(crate) fn is_value(&self) -> bool {
        self.rule_type == RuleType::Value
    }

    #[inline]
    pub(crate) fn is_kv(&self) -> bool {
        self.rule_type == RuleType::Kv
    }

    /// True when the rule needs the regex engine at scan time. Used by the
    /// log-only throughput cut.
    #[inline]
    pub(crate) fn use_regex(&self) -> bool {
        !self.k_reg.is_empty() || !self.v_reg.is_empty()
    }

    /// Scans raw bytes with the rule's value patterns, then filters and
    /// verifies the collected matches.
    ///
    /// Address rules stop after the first regex that yields any hit: the
    /// alternative patterns describe the same addresses at different
    /// granularities and would otherwise stack overlapping matches.
    pub(crate) fn detect_bytes(&self, input: &[u8]) -> Vec<DetectResult> {
        let mut results = Vec::new();
        if self.rule.info_type == "ADDRESS" {
            for re in &self.v_reg {
                let batch = self.regex_detect(re, input);
                if !batch.is_empty() {
                    results = batch;
                    break;
                }
            }
        } else {
            for re in &self.v_reg {
                results.extend(self.regex_detect(re, input));
            }
        }
        for word in &self.v_dict {
            results.extend(self.dict_detect(word.as_bytes(), input));
        }
        let results = self.filter(results);
        self.verify(input, results)
    }

    /// Runs key/value detection over a pair list.
    pub(crate) fn detect_list(&self, items: &[KVItem]) -> Vec<DetectResult> {
        let mut results = Vec::new();
        for item in items {
            self.do_detect_kv(item, &mut results);
        }
        results
    }

    fn do_detect_kv(&self, item: &KVItem, results: &mut Vec<DetectResult>) {
        if self.is_kv() {
            if !self.key_hit(&item.key) {
                return;
            }
            if self.v_reg.is_empty() && self.v_dict.is_empty() {
                // No value patterns: the whole value is the finding. It still
                // runs through filter and verify with the value as context.
                let mut res = self.new_result();
                res.text = item.value.clone();
                res.result_type = ResultType::Kv;
                res.key = item.key.clone();
                res.byte_start = 0;
                res.byte_end = item.value.len();
                let kept = self.filter(vec![res]);
                let kept = self.verify(item.value.as_bytes(), kept);
                for mut res in kept {
                    res.byte_start += item.start;
                    res.byte_end += item.start;
                    results.push(res);
                }
            } else {
                for mut res in self.detect_bytes(item.value.as_bytes()) {
                    res.result_type = ResultType::Kv;
                    res.key = item.key.clone();
                    res.byte_start += item.start;
                    res.byte_end += item.start;
                    results.push(res);
                }
            }
        } else {
            for mut res in self.detect_bytes(item.value.as_bytes()) {
                res.result_type = ResultType::Value;
                res.key = item.key.clone();
                res.byte_start += item.start;
                res.byte_end += item.start;
                results.push(res);
            }
        }
    }

    /// Key rules check: dictionary first, then key regexes.
    fn key_hit(&self, key: &str) -> bool {
        let (last_key, was_extracted) = last_key_of(key);
        if self.k_dict.contains(&last_key.to_lowercase()) {
            return true;
        }
        if was_extracted && self.k_dict.contains(&key.to_lowercase()) {
            return true;
        }
        self.k_reg.iter().any(|re| re.is_match(last_key.as_bytes()))
    }

    fn regex_detect(&self, re: &Regex, input: &[u8]) -> Vec<DetectResult> {
        re.find_iter(input)
            .map(|m| self.value_result(input, m.start(), m.end()))
            .collect()
    }

    /// Locates non-overlapping literal occurrences, advancing past each hit.
    fn dict_detect(&self, word: &[u8], input: &[u8]) -> Vec<DetectResult> {
        let mut results = Vec::new();
        if word.is_empty() {
            return results;
        }
        let mut from = 0;
        while let Some(pos) = memmem::find(&input[from..], word) {
            let start = from + pos;
            let end = start + word.len();
            results.push(self.value_result(input, start, end));
            from = end;
        }
        results
    }

    fn value_result(&self, input: &[u8], start: usize, end: usize) -> DetectResult {
        let mut res = self.new_result();
        res.text = String::from_utf8_lossy(&input[start..end]).into_owned();
        res.result_type = ResultType::Value;
        res.byte_start = start;
        res.byte_end = end;
        res
    }

    fn new_result(&self) -> DetectResult {
        DetectResult {
            rule_id: self.rule.rule_id,
            info_type: self.rule.info_type.clone(),
            en_name: self.rule.en_name.clone(),
            cn_name: self.rule.cn_name.clone(),
            group_name: self.rule.group_name.clone(),
            level: self.rule.level.clone(),
            ext_info: self.rule.ext_info.clone(),
            ..DetectResult::default()
        }
    }

    /// Blacklist stage: exact words, regexes, and the already-masked probe.
    fn filter(&self, results: Vec<DetectResult>) -> Vec<DetectResult> {
        results
            .into_iter()
            .filter(|res| {
                if self.b_dict.iter().any(|word| *word == res.text) {
                    return false;
                }
                if self.b_reg.iter().any(|re| re.is_match(res.text.as_bytes())) {
                    return false;
                }
                if self.b_masked && verify::is_masked(&res.text) {
                    return false;
                }
                true
            })
            .collect()
    }
}

/// Compiles a pattern list, logging and skipping anything the regex engine
/// rejects.
fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    let mut out = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        match Regex::new(pattern) {
            Ok(re) => out.push(re),
            Err(err) => {
                let err = DlpError::RegexCompileFailed {
                    pattern: pattern.clone(),
                    detail: err.to_string(),
                };
                tracing::warn!(error = %err, "skipping unusable pattern");
            }
        }
    }
    out
}

/// Extracts the last path segment from a key such as `/objlist[1]/uid[0]`.
///
/// Returns the segment and whether any stripping occurred.
pub(crate) fn last_key_of(path: &str) -> (&str, bool) {
    if path.is_empty() {
        return (path, false);
    }
    if path.ends_with(']') {
        let end = path.rfind('[').unwrap_or(path.len() - 1);
        let start = path.rfind('/').map(|p| p + 1).unwrap_or(0);
        if start <= end {
            return (&path[start..end], true);
        }
        return (path, true);
    }
    match path.rfind('/') {
        Some(pos) => (&path[pos + 1..], true),
        None => (path, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectConfig;

    fn rule_with(detect: DetectConfig) -> RuleConfig {
        RuleConfig {
            rule_id: 1,
            info_type: "TEST".to_string(),
            detect,
            ..RuleConfig::default()
        }
    }

    #[test]
    fn last_key_strips_paths_and_indices() {
        assert_eq!(last_key_of("uid"), ("uid", false));
        assert_eq!(last_key_of("/a/b"), ("b", true));
        assert_eq!(last_key_of("/objlist[1]/uid[0]"), ("uid", true));
        assert_eq!(last_key_of("uid[3]"), ("uid", true));
        assert_eq!(last_key_of(""), ("", false));
    }

    #[test]
    fn rule_type_follows_key_patterns() {
        let det = Detector::new(&rule_with(DetectConfig {
            v_reg: vec![r"\d+".to_string()],
            ..DetectConfig::default()
        }));
        assert!(det.is_value());

        let det = Detector::new(&rule_with(DetectConfig {
            k_dict: vec!["uid".to_string()],
            ..DetectConfig::default()
        }));
        assert!(det.is_kv());
    }

    #[test]
    fn dict_detection_advances_past_hits() {
        let det = Detector::new(&rule_with(DetectConfig {
            v_dict: vec!["aa".to_string()],
            ..DetectConfig::default()
        }));
        let results = det.detect_bytes(b"aaaa aa");
        let spans: Vec<(usize, usize)> = results
            .iter()
            .map(|r| (r.byte_start, r.byte_end))
            .collect();
        assert_eq!(spans, vec![(0, 2), (2, 4), (5, 7)]);
    }

    #[test]
    fn key_hit_is_case_insensitive() {
        let det = Detector::new(&rule_with(DetectConfig {
            k_dict: vec!["UID".to_string()],
            ..DetectConfig::default()
        }));
        let items = vec![KVItem {
            key: "Uid".to_string(),
            value: "10086".to_string(),
            ..KVItem::default()
        }];
        assert_eq!(det.detect_list(&items).len(), 1);
    }

    #[test]
    fn key_regexes_match_the_stripped_key() {
        let det = Detector::new(&rule_with(DetectConfig {
            k_reg: vec!["^user_[0-9]+$".to_string()],
            ..DetectConfig::default()
        }));
        let hit = vec![KVItem {
            key: "/accounts/user_42".to_string(),
            value: "secret".to_string(),
            ..KVItem::default()
        }];
        assert_eq!(det.detect_list(&hit).len(), 1);

        let miss = vec![KVItem {
            key: "/accounts/user_x".to_string(),
            value: "secret".to_string(),
            ..KVItem::default()
        }];
        assert!(det.detect_list(&miss).is_empty());
    }

    #[test]
    fn whole_value_results_carry_value_spans() {
        let det = Detector::new(&rule_with(DetectConfig {
            k_dict: vec!["uid".to_string()],
            ..DetectConfig::default()
        }));
        let items = vec![KVItem {
            key: "uid".to_string(),
            value: "10086".to_string(),
            start: 7,
            end: 12,
        }];
        let results = det.detect_list(&items);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "10086");
        assert_eq!(results[0].byte_start, 7);
        assert_eq!(results[0].byte_end, 12);
        assert!(results[0].result_type.is_kv());
    }

    #[test]
    fn masked_filter_drops_already_masked_text() {
        let mut rule = rule_with(DetectConfig {
            v_reg: vec![r"\S+".to_string()],
            ..DetectConfig::default()
        });
        rule.filter.b_algo = vec!["MASKED".to_string()];
        let det = Detector::new(&rule);
        assert!(det.detect_bytes(b"186******34").is_empty());
        assert!(!det.detect_bytes(b"18612341234").is_empty());
    }

    #[test]
    fn blacklist_dict_is_byte_exact() {
        let mut rule = rule_with(DetectConfig {
            v_reg: vec![r"\d+".to_string()],
            ..DetectConfig::default()
        });
        rule.filter.b_dict = vec!["10086".to_string()];
        let det = Detector::new(&rule);
        assert!(det.detect_bytes(b"10086").is_empty());
        assert_eq!(det.detect_bytes(b"10087").len(), 1);
    }

    #[test]
    fn bad_patterns_are_skipped_not_fatal() {
        let det = Detector::new(&rule_with(DetectConfig {
            v_reg: vec!["(unclosed".to_string(), r"\d+".to_string()],
            ..DetectConfig::default()
        }));
        assert_eq!(det.detect_bytes(b"42").len(), 1);
    }
}
