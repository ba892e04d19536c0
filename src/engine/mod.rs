//! Engine: lifecycle, configuration, and the public detect/de-identify
//! surface.
//!
//! The engine owns one compiled [`Detector`] per active rule and one
//! [`MaskWorker`] per mask rule. Rules and workers are immutable between
//! reconfigurations, so every scanning operation takes `&self`; anything
//! that mutates the rule set takes `&mut self` and therefore cannot race a
//! scan.
//!
//! # Lifecycle
//! `new` -> `configured` (apply_config*) -> optionally `log_only`
//! (new_log_processor) -> `closed` (close). Calls before configuration fail
//! with `NotConfigured`; calls after `close` fail with `ProcessAfterClose`;
//! text APIs in log-only mode fail with `OnlyForLog`.
//!
//! # Panic discipline
//! Scanning work runs inside a recovery wrapper: a panic is logged and
//! surfaced as a neutral error, leaving the engine usable. `NotConfigured`
//! is checked before entering the wrapper so it always propagates.

mod json_walk;
mod log_processor;
mod scan;
mod struct_mask;
#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use ahash::AHashMap;

use crate::api::{DetectResult, KVItem, MAX_INPUT, MAX_ITEM};
use crate::config::{DlpConfig, Mode, DEFAULT_CONF};
use crate::detector::Detector;
use crate::errors::DlpError;
use crate::mask::{DiyMaskFn, MaskWorker, RuleWorker};

pub use log_processor::LogProcessor;
pub use struct_mask::{FieldVisitor, MaskTagged};

/// The detection and masking engine. One instance per thread; see the
/// crate docs for the concurrency contract.
pub struct Engine {
    conf: Option<DlpConfig>,
    /// Active rules, keyed and iterated by rule id for deterministic output.
    detectors: BTreeMap<u32, Detector>,
    maskers: AHashMap<String, MaskWorker>,
    max_log_input: usize,
    max_regex_rule_id: u32,
    is_configured: bool,
    is_closed: bool,
    is_for_log: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an unconfigured engine. Do not call inside a loop; engines
    /// are built once and reused.
    pub fn new() -> Self {
        Self {
            conf: None,
            detectors: BTreeMap::new(),
            maskers: AHashMap::new(),
            max_log_input: 1024,
            max_regex_rule_id: 0,
            is_configured: false,
            is_closed: false,
            is_for_log: false,
        }
    }

    /// The crate version string.
    pub fn version(&self) -> &'static str {
        crate::VERSION
    }

    /// The embedded default configuration document.
    pub fn default_config() -> &'static str {
        DEFAULT_CONF
    }

    // ---- configuration ----

    /// Applies a configuration document. May be called again to reconfigure;
    /// previously registered DIY maskers survive.
    pub fn apply_config(&mut self, doc: &str) -> Result<(), DlpError> {
        if self.is_closed {
            return Err(DlpError::ProcessAfterClose);
        }
        let conf = DlpConfig::from_str(doc)?;
        self.install_config(conf)
    }

    /// Loads and applies a configuration file.
    pub fn apply_config_file(&mut self, path: impl AsRef<Path>) -> Result<(), DlpError> {
        if self.is_closed {
            return Err(DlpError::ProcessAfterClose);
        }
        let conf = DlpConfig::from_file(path)?;
        self.install_config(conf)
    }

    /// Applies the embedded default ruleset.
    pub fn apply_config_default(&mut self) -> Result<(), DlpError> {
        self.apply_config(DEFAULT_CONF)
    }

    fn install_config(&mut self, conf: DlpConfig) -> Result<(), DlpError> {
        if conf.global.max_log_input > 0 {
            self.max_log_input = conf.global.max_log_input as usize;
        }
        self.max_regex_rule_id = conf.global.max_regex_rule_id;
        self.conf = Some(conf);
        self.reload_detectors();
        self.load_mask_workers();
        self.is_configured = true;
        Ok(())
    }

    /// Rebuilds the detector map from the stored config, honoring
    /// `enable_rules` and `disable_rules`.
    fn reload_detectors(&mut self) {
        let Some(conf) = self.conf.as_ref() else {
            return;
        };
        let mut detectors = BTreeMap::new();
        for rule in &conf.rules {
            let det = Detector::new(rule);
            detectors.insert(det.rule_id(), det);
        }
        if !conf.global.enable_rules.is_empty() {
            let enabled: std::collections::BTreeSet<u32> =
                conf.global.enable_rules.iter().copied().collect();
            detectors.retain(|id, _| enabled.contains(id));
        }
        for id in &conf.global.disable_rules {
            detectors.remove(id);
        }
        if conf.global.mode == Mode::Debug {
            tracing::debug!(rules = detectors.len(), "detector set loaded");
        }
        self.detectors = detectors;
    }

    /// Builds mask workers, keeping existing workers (including DIY ones)
    /// and skipping duplicate names.
    fn load_mask_workers(&mut self) {
        let Some(conf) = self.conf.as_ref() else {
            return;
        };
        let mut added = Vec::new();
        for rule in &conf.mask_rules {
            if self.maskers.contains_key(&rule.rule_name) {
                tracing::warn!(
                    name = %rule.rule_name,
                    "duplicate mask rule name, keeping the earlier worker"
                );
                continue;
            }
            added.push((rule.rule_name.clone(), MaskWorker::Rule(RuleWorker::new(rule))));
        }
        for (name, worker) in added {
            self.maskers.insert(name, worker);
        }
    }

    /// Removes every active rule. Detection still runs but finds nothing;
    /// intended as a benchmarking baseline.
    pub fn disable_all_rules(&mut self) -> Result<(), DlpError> {
        self.ensure_ready()?;
        self.detectors.clear();
        Ok(())
    }

    /// Replaces the disabled-rule list and re-resolves the active set.
    pub fn apply_disable_rules(&mut self, rule_ids: &[u32]) -> Result<(), DlpError> {
        self.ensure_ready()?;
        if let Some(conf) = self.conf.as_mut() {
            conf.global.disable_rules = rule_ids.to_vec();
        }
        self.reload_detectors();
        Ok(())
    }

    /// Closes the engine. Every later operation fails with
    /// `ProcessAfterClose`.
    pub fn close(&mut self) {
        self.detectors.clear();
        self.maskers.clear();
        self.conf = None;
        self.is_closed = true;
    }

    // ---- detection ----

    /// Finds sensitive information in plain text.
    pub fn detect(&self, input: &str) -> Result<Vec<DetectResult>, DlpError> {
        self.ensure_text_api()?;
        self.check_input_len(input)?;
        recovered(|| Ok(self.detect_impl(input)))
    }

    /// Finds sensitive information in a key/value map.
    pub fn detect_map(
        &self,
        input: &HashMap<String, String>,
    ) -> Result<Vec<DetectResult>, DlpError> {
        self.ensure_ready()?;
        self.check_item_count(input.len())?;
        recovered(|| Ok(self.detect_map_impl(input)))
    }

    /// Finds sensitive information in every string leaf of a JSON document.
    /// Result keys are lower-cased, slash-separated paths with `[n]` array
    /// suffixes.
    pub fn detect_json(&self, json: &str) -> Result<Vec<DetectResult>, DlpError> {
        self.ensure_ready()?;
        recovered(|| self.detect_json_impl(json).map(|(results, _)| results))
    }

    // ---- de-identification ----

    /// Detects, then returns the masked text along with the findings.
    pub fn de_identify(&self, input: &str) -> Result<(String, Vec<DetectResult>), DlpError> {
        self.ensure_text_api()?;
        self.check_input_len(input)?;
        recovered(|| self.de_identify_impl(input))
    }

    /// Detects, then returns the map with masked values and the findings.
    pub fn de_identify_map(
        &self,
        input: &HashMap<String, String>,
    ) -> Result<(HashMap<String, String>, Vec<DetectResult>), DlpError> {
        self.ensure_ready()?;
        self.check_item_count(input.len())?;
        recovered(|| Ok(self.de_identify_map_impl(input)))
    }

    /// Detects, then returns the re-serialized JSON with masked leaves and
    /// the findings.
    pub fn de_identify_json(&self, json: &str) -> Result<(String, Vec<DetectResult>), DlpError> {
        self.ensure_ready()?;
        recovered(|| {
            let (results, mut masked_by_path) = self.detect_json_impl(json)?;
            let mut value: serde_json::Value = serde_json::from_str(json)?;
            self.dfs_json(String::new(), &mut value, &mut masked_by_path, true);
            Ok((serde_json::to_string(&value)?, results))
        })
    }

    /// Applies a previously obtained result list to a JSON document. Paths
    /// with no matching leaf are inert.
    pub fn de_identify_json_by_result(
        &self,
        json: &str,
        results: &[DetectResult],
    ) -> Result<String, DlpError> {
        self.ensure_ready()?;
        recovered(|| {
            let mut value: serde_json::Value = serde_json::from_str(json)?;
            let mut masked_by_path: BTreeMap<String, String> = results
                .iter()
                .map(|res| (res.key.clone(), res.mask_text.clone()))
                .collect();
            self.dfs_json(String::new(), &mut value, &mut masked_by_path, true);
            Ok(serde_json::to_string(&value)?)
        })
    }

    // ---- masking ----

    /// Masks text directly with the named worker.
    pub fn mask(&self, input: &str, method: &str) -> Result<String, DlpError> {
        self.ensure_ready()?;
        self.check_input_len(input)?;
        let Some(worker) = self.maskers.get(method) else {
            return Err(DlpError::MaskWorkerNotfound {
                name: method.to_string(),
            });
        };
        recovered(|| worker.mask(input, self))
    }

    /// Registers a DIY mask worker under `name`.
    pub fn register_masker<F>(&mut self, name: &str, mask_fn: F) -> Result<(), DlpError>
    where
        F: Fn(&str) -> Result<String, DlpError> + Send + Sync + 'static,
    {
        self.ensure_ready()?;
        if self.maskers.contains_key(name) {
            return Err(DlpError::MaskNameConflict {
                name: name.to_string(),
            });
        }
        self.maskers
            .insert(name.to_string(), MaskWorker::Diy(Box::new(mask_fn) as DiyMaskFn));
        Ok(())
    }

    // ---- log processing ----

    /// Switches the engine into log-only mode and returns the processor.
    /// Afterwards the plain-text detect/de-identify APIs are rejected.
    pub fn new_log_processor(&mut self) -> Result<LogProcessor<'_>, DlpError> {
        self.ensure_ready()?;
        self.is_for_log = true;
        Ok(LogProcessor::new(self))
    }

    // ---- shared internals ----

    pub(crate) fn max_log_input(&self) -> usize {
        self.max_log_input
    }

    pub(crate) fn masker(&self, name: &str) -> Option<&MaskWorker> {
        self.maskers.get(name)
    }

    fn ensure_ready(&self) -> Result<(), DlpError> {
        if !self.is_configured {
            return Err(DlpError::NotConfigured);
        }
        if self.is_closed {
            return Err(DlpError::ProcessAfterClose);
        }
        Ok(())
    }

    fn ensure_text_api(&self) -> Result<(), DlpError> {
        self.ensure_ready()?;
        if self.is_for_log {
            return Err(DlpError::OnlyForLog);
        }
        Ok(())
    }

    fn check_input_len(&self, input: &str) -> Result<(), DlpError> {
        if input.len() > MAX_INPUT {
            return Err(DlpError::MaxInputLimit {
                len: input.len(),
                limit: MAX_INPUT,
            });
        }
        Ok(())
    }

    fn check_item_count(&self, count: usize) -> Result<(), DlpError> {
        if count > MAX_ITEM {
            return Err(DlpError::MaxInputItems {
                count,
                limit: MAX_ITEM,
            });
        }
        Ok(())
    }

    pub(crate) fn de_identify_impl(
        &self,
        input: &str,
    ) -> Result<(String, Vec<DetectResult>), DlpError> {
        let results = self.detect_impl(input);
        let output = self.de_identify_by_result(input, &results)?;
        Ok((output, results))
    }

    pub(crate) fn de_identify_map_impl(
        &self,
        input: &HashMap<String, String>,
    ) -> (HashMap<String, String>, Vec<DetectResult>) {
        let results = self.detect_map_impl(input);
        if results.is_empty() {
            return (input.clone(), results);
        }
        let mut output = input.clone();
        for res in &results {
            if let Some(current) = output.get(&res.key) {
                if let Ok(masked) = self.de_identify_by_result(current, std::slice::from_ref(res)) {
                    output.insert(res.key.clone(), masked);
                }
            }
        }
        (output, results)
    }

    fn detect_map_impl(&self, input: &HashMap<String, String>) -> Vec<DetectResult> {
        let mut items: Vec<KVItem> = input
            .iter()
            .map(|(key, value)| KVItem {
                key: key.clone(),
                value: value.clone(),
                start: 0,
                end: 0,
            })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        self.detect_items(&items)
    }

    /// Shared tail of the map and JSON paths: run every detector over the
    /// pair list, merge, and attach masked text.
    pub(crate) fn detect_items(&self, items: &[KVItem]) -> Vec<DetectResult> {
        let mut results = Vec::new();
        for det in self.detectors.values() {
            results.extend(det.detect_list(items));
        }
        let mut results = scan::merge_results(results, Vec::new());
        self.mask_results(&mut results);
        results
    }

    /// Fills `mask_text` through the worker bound to each firing rule. A
    /// missing binding or worker failure falls back to the original text.
    pub(crate) fn mask_results(&self, results: &mut [DetectResult]) {
        for res in results {
            let Some(det) = self.detectors.get(&res.rule_id) else {
                res.mask_text = res.text.clone();
                continue;
            };
            let mask_name = det.mask_rule_name();
            match self.maskers.get(mask_name) {
                Some(worker) => {
                    if worker.mask_result(res, self).is_err() {
                        res.mask_text = res.text.clone();
                    }
                }
                None => {
                    if !mask_name.is_empty() {
                        let err = DlpError::MaskRuleNotfound {
                            name: mask_name.to_string(),
                        };
                        tracing::warn!(rule_id = res.rule_id, error = %err, "mask binding unresolved");
                    }
                    res.mask_text = res.text.clone();
                }
            }
        }
    }

    /// Splices `mask_text` over each matched span. Results must be in scan
    /// order; bounds are validated because callers may pass stored lists.
    pub(crate) fn de_identify_by_result(
        &self,
        input: &str,
        results: &[DetectResult],
    ) -> Result<String, DlpError> {
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len() + 8);
        let mut pos = 0usize;
        for res in results {
            if res.byte_start > res.byte_end || res.byte_end > bytes.len() {
                return Err(DlpError::PositionError {
                    start: res.byte_start,
                    end: res.byte_end,
                    len: bytes.len(),
                });
            }
            if pos < res.byte_start {
                out.extend_from_slice(&bytes[pos..res.byte_start]);
            }
            out.extend_from_slice(res.mask_text.as_bytes());
            pos = res.byte_end;
        }
        if pos < bytes.len() {
            out.extend_from_slice(&bytes[pos..]);
        }
        Ok(crate::api::into_string_lossy(out))
    }

    pub(crate) fn detectors(&self) -> impl Iterator<Item = &Detector> + '_ {
        self.detectors.values()
    }

    pub(crate) fn skip_for_log(&self, det: &Detector) -> bool {
        self.is_for_log && det.rule_id() > self.max_regex_rule_id && det.use_regex()
    }
}

/// Runs `f`, converting a panic into a neutral error so one poisoned call
/// cannot take the engine down.
fn recovered<T>(f: impl FnOnce() -> Result<T, DlpError>) -> Result<T, DlpError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = panic_detail(&payload);
            tracing::error!(%detail, "recovered from panic inside engine call");
            Err(DlpError::Panic { detail })
        }
    }
}

fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
