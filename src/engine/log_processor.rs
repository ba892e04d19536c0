//! Log processor: bounded de-identification for log records.
//!
//! Built by [`Engine::new_log_processor`], which also flips the engine into
//! log-only mode. The processor borrows the engine, so the borrow checker
//! keeps reconfiguration away while log processing is wired up.
//!
//! Two caps apply: the message is truncated to the configured byte budget
//! (on a char boundary) and the key/value list to [`MAX_LOG_ITEM`] entries.
//! Both truncations append the limit marker so the cut is visible.

use std::collections::HashMap;

use crate::api::{LIMIT_MARKER, MAX_LOG_ITEM};
use crate::engine::Engine;

/// Marker key paired with the limit marker when the KV list is truncated.
const KV_LIMIT_KEY: &str = "<--[DLP Error]-->";

/// De-identifies log records through a log-only engine.
pub struct LogProcessor<'e> {
    engine: &'e Engine,
}

impl<'e> LogProcessor<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// De-identifies a log message and its key/value pairs. Never fails:
    /// anything the engine rejects passes through unmasked.
    pub fn process(
        &self,
        raw_log: &str,
        kvs: &[(String, String)],
    ) -> (String, Vec<(String, String)>) {
        let engine = self.engine;

        let budget = engine.max_log_input();
        let mut text = raw_log;
        let mut text_cut = false;
        if text.len() >= budget {
            let mut end = budget.min(text.len());
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            text = &text[..end];
            text_cut = true;
        }
        let mut output = match engine.de_identify_impl(text) {
            Ok((masked, _)) => masked,
            Err(_) => text.to_string(),
        };
        if text_cut {
            output.push_str(LIMIT_MARKER);
        }

        let mut pairs = kvs;
        let mut kv_cut = false;
        if pairs.len() >= MAX_LOG_ITEM {
            pairs = &pairs[..MAX_LOG_ITEM];
            kv_cut = true;
        }
        let mut masked_pairs = Vec::with_capacity(pairs.len() + 1);
        if !pairs.is_empty() {
            let map: HashMap<String, String> = pairs.iter().cloned().collect();
            let (masked_map, _) = engine.de_identify_map_impl(&map);
            for (key, _) in pairs {
                let value = masked_map.get(key).cloned().unwrap_or_default();
                // Values can embed free text; run the line scanner over them
                // as well so `k:v` fragments inside values are caught.
                let value = match engine.de_identify_impl(&value) {
                    Ok((masked, _)) => masked,
                    Err(_) => value,
                };
                masked_pairs.push((key.clone(), value));
            }
        }
        if kv_cut {
            masked_pairs.push((KV_LIMIT_KEY.to_string(), LIMIT_MARKER.to_string()));
        }
        (output, masked_pairs)
    }
}
