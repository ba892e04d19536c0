//! `ALGO`-mode masking: hashing, encoding, and the address rewriter.
//!
//! The address algorithm keeps an entry prefix (everything up to the last
//! matched entry term), stars the spans between mid-level terms, then stars
//! every remaining digit. When nothing changes, the last three characters
//! are starred so the output never equals the input.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest, Md5};
use once_cell::sync::Lazy;

use super::RuleWorker;
use crate::detector::decode_term_list;
use crate::engine::Engine;
use crate::errors::DlpError;

/// Street-level entry terms (街道, 路, ...), base64-embedded.
const ENTER_TERMS_B64: &str = "6KGX6YGTfOi3r3zooZd86YeMfOadkXzplYd85bGvfOe7hAo=";

/// Mid-level terms (社区, 小区, 号, ...), base64-embedded.
const MID_TERMS_B64: &str =
    "56S+5Yy6fOWwj+WMunzlpKfljqZ85bm/5Zy6fOWPt+alvHzljZXlhYN85Y+3fOWxgnzlrqR85oi3Cg==";

static ENTER_TERMS: Lazy<Vec<String>> = Lazy::new(|| decode_term_list(ENTER_TERMS_B64, true));
static MID_TERMS: Lazy<Vec<String>> = Lazy::new(|| decode_term_list(MID_TERMS_B64, true));

impl RuleWorker {
    /// Dispatches on the rule's `value`; unknown selectors fail with
    /// `MaskNotSupport`.
    pub(super) fn mask_algo(&self, input: &str, engine: &Engine) -> Result<String, DlpError> {
        match self.rule.value.as_str() {
            "BASE64" => Ok(BASE64.encode(input.as_bytes())),
            "MD5" => {
                let mut hasher = Md5::new();
                hasher.update(input.as_bytes());
                Ok(hex_lower(&hasher.finalize()))
            }
            "CRC32" => Ok(format!("{:08x}", crc32fast::hash(input.as_bytes()))),
            "ADDRESS" => Ok(mask_address(input)),
            "NUMBER" => Ok(mask_number(input)),
            "DEIDENTIFY" => engine.de_identify(input).map(|(out, _)| out),
            _ => Err(DlpError::MaskNotSupport {
                rule: self.rule.rule_name.clone(),
                value: self.rule.value.clone(),
            }),
        }
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Replaces every ASCII digit with `*`.
pub(super) fn mask_number(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_ascii_digit() { '*' } else { c })
        .collect()
}

/// Address rewriter; see the module docs for the pass structure.
pub(super) fn mask_address(input: &str) -> String {
    let mut st = 0;
    if let Some((pos, id)) = index_sub_list(input, 0, &ENTER_TERMS, true) {
        st = pos + ENTER_TERMS[id].len();
    }

    let mut out = String::with_capacity(input.len());
    out.push_str(&input[..st]);
    let sz = input.len();
    while st < sz {
        let Some((pos, id)) = index_sub_list(input, st, &MID_TERMS, false) else {
            break;
        };
        let term = &MID_TERMS[id];
        for _ in 0..pos - st {
            out.push('*');
        }
        out.push_str(term);
        st = pos + term.len();
    }
    out.push_str(&input[st..]);

    let mut out = mask_number(&out);
    if out == input {
        // Nothing matched: star the last three characters, one star per byte.
        let mut tail_bytes = 0;
        for ch in out.chars().rev().take(3) {
            tail_bytes += ch.len_utf8();
        }
        out.truncate(out.len() - tail_bytes);
        for _ in 0..tail_bytes {
            out.push('*');
        }
    }
    out
}

/// Finds an occurrence of any term at or after `st`. With `want_last`, the
/// rightmost first-occurrence across terms wins; otherwise the first listed
/// term found is returned immediately.
fn index_sub_list(
    input: &str,
    st: usize,
    terms: &[String],
    want_last: bool,
) -> Option<(usize, usize)> {
    let hay = &input[st..];
    let mut best: Option<(usize, usize)> = None;
    for (id, term) in terms.iter().enumerate() {
        if term.is_empty() {
            continue;
        }
        let Some(pos) = hay.find(term.as_str()) else {
            continue;
        };
        let loc = st + pos;
        match best {
            None => {
                best = Some((loc, id));
                if !want_last {
                    return best;
                }
            }
            Some((bp, _)) if want_last && loc >= bp => best = Some((loc, id)),
            _ => {}
        }
    }
    best
}
