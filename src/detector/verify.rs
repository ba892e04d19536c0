//! Verification stage: context windows and algorithmic validators.
//!
//! Context verification looks at a ±32-byte window around the match and
//! requires a configured word or regex to appear there; algorithm
//! verification runs checksum-style validators over the matched text.
//! Both must accept when configured.
//!
//! # Invariants
//! - Word hits must be whole words: the adjacent character on each side is
//!   absent, multi-byte (CJK is always a boundary), or not an ASCII letter.
//! - Validators never index outside the matched text; malformed or
//!   wrong-length inputs are rejected, not truncated.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use memchr::{memchr2, memmem};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use super::Detector;
use crate::api::DetectResult;

/// Context window radius in bytes on each side of a match.
const CONTEXT_RANGE: usize = 32;

/// Characters that mark text as already masked.
#[inline]
pub(crate) fn is_masked(text: &str) -> bool {
    memchr2(b'*', b'#', text.as_bytes()).is_some()
}

/// Algorithmic validators selectable from a rule's `v_algo` list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VerifyAlgo {
    IdCard,
    AbaRouting,
    CreditCard,
    Bitcoin,
    Domain,
}

impl VerifyAlgo {
    /// Parses the configured names, logging and dropping unknown entries.
    pub(crate) fn parse_all(rule_id: u32, names: &[String]) -> Vec<Self> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            match name.as_str() {
                "IDCARD" => out.push(Self::IdCard),
                "ABAROUTING" => out.push(Self::AbaRouting),
                "CREDITCARD" => out.push(Self::CreditCard),
                "BITCOIN" => out.push(Self::Bitcoin),
                "DOMAIN" => out.push(Self::Domain),
                other => {
                    tracing::warn!(rule_id, algo = other, "unknown verify algorithm; dropped");
                }
            }
        }
        out
    }

    fn accepts(self, text: &str) -> bool {
        match self {
            Self::IdCard => verify_id_card(text),
            Self::AbaRouting => verify_aba_routing(text),
            Self::CreditCard => verify_credit_card(text),
            Self::Bitcoin => verify_bitcoin(text),
            Self::Domain => verify_domain(text),
        }
    }
}

impl Detector {
    /// Applies context and algorithm verification to collected matches.
    pub(super) fn verify(
        &self,
        input: &[u8],
        results: Vec<DetectResult>,
    ) -> Vec<DetectResult> {
        if results.is_empty() {
            return results;
        }
        let mut keep = vec![true; results.len()];
        if !self.c_dict.is_empty() || !self.c_reg.is_empty() {
            for (i, res) in results.iter().enumerate() {
                if !self.verify_by_context(input, res) {
                    keep[i] = false;
                }
            }
        }
        if !self.v_algo.is_empty() {
            for (i, res) in results.iter().enumerate() {
                if keep[i] {
                    for algo in &self.v_algo {
                        if !algo.accepts(&res.text) {
                            keep[i] = false;
                        }
                    }
                }
            }
        }
        let mut iter = keep.into_iter();
        results.into_iter().filter(|_| iter.next().unwrap()).collect()
    }

    fn verify_by_context(&self, input: &[u8], res: &DetectResult) -> bool {
        let start = res.byte_start.saturating_sub(CONTEXT_RANGE);
        let end = res.byte_end.saturating_add(CONTEXT_RANGE).min(input.len());
        if start >= end {
            return false;
        }
        let window: Vec<u8> = input[start..end]
            .iter()
            .map(|b| b.to_ascii_lowercase())
            .collect();
        for word in &self.c_dict {
            if word.is_empty() {
                continue;
            }
            for pos in memmem::find_iter(&window, word.as_bytes()) {
                if is_whole_word(&window, word.as_bytes(), pos) {
                    return true;
                }
            }
        }
        self.c_reg.iter().any(|re| re.is_match(&window))
    }
}

/// Whole-word probe: the characters flanking `window[pos..pos+word.len()]`
/// must be absent, multi-byte, or non-letter ASCII.
fn is_whole_word(window: &[u8], word: &[u8], pos: usize) -> bool {
    let left = decode_last_char(&window[..pos]);
    let right = decode_first_char(&window[pos + word.len()..]);
    if matches!(left, Some((_, width)) if width > 1) {
        return true;
    }
    if matches!(right, Some((_, width)) if width > 1) {
        return true;
    }
    let left_ok = left.map_or(true, |(ch, _)| !ch.is_ascii_alphabetic());
    let right_ok = right.map_or(true, |(ch, _)| !ch.is_ascii_alphabetic());
    left_ok && right_ok
}

fn decode_first_char(bytes: &[u8]) -> Option<(char, usize)> {
    if bytes.is_empty() {
        return None;
    }
    let width = utf8_width(bytes[0]).min(bytes.len());
    match std::str::from_utf8(&bytes[..width]) {
        Ok(s) => s.chars().next().map(|ch| (ch, ch.len_utf8())),
        Err(_) => Some((char::REPLACEMENT_CHARACTER, 1)),
    }
}

fn decode_last_char(bytes: &[u8]) -> Option<(char, usize)> {
    if bytes.is_empty() {
        return None;
    }
    // Walk back at most four bytes to the last UTF-8 start byte.
    let mut start = bytes.len() - 1;
    let floor = bytes.len().saturating_sub(4);
    while start > floor && bytes[start] & 0xC0 == 0x80 {
        start -= 1;
    }
    match std::str::from_utf8(&bytes[start..]) {
        Ok(s) => s.chars().next_back().map(|ch| (ch, ch.len_utf8())),
        Err(_) => Some((char::REPLACEMENT_CHARACTER, 1)),
    }
}

/// Width of a UTF-8 sequence from its leading byte; `1` for continuation
/// bytes so malformed input advances instead of looping.
pub(crate) fn utf8_width(lead: u8) -> usize {
    match lead {
        b if b & 0x80 == 0x00 => 1,
        b if b & 0xE0 == 0xC0 => 2,
        b if b & 0xF0 == 0xE0 => 3,
        b if b & 0xF8 == 0xF0 => 4,
        _ => 1,
    }
}

/// 18-character resident id: ISO 7064:1983 MOD 11-2 check character.
fn verify_id_card(text: &str) -> bool {
    const WEIGHT: [u32; 17] = [7, 9, 10, 5, 8, 4, 2, 1, 6, 3, 7, 9, 10, 5, 8, 4, 2];
    const CHECK: [u8; 11] = [b'1', b'0', b'X', b'9', b'8', b'7', b'6', b'5', b'4', b'3', b'2'];
    let bytes = text.as_bytes();
    if bytes.len() != 18 {
        return false;
    }
    let mut sum = 0u32;
    for (i, &w) in WEIGHT.iter().enumerate() {
        if !bytes[i].is_ascii_digit() {
            return false;
        }
        sum += w * u32::from(bytes[i] - b'0');
    }
    CHECK[(sum % 11) as usize] == bytes[17]
}

/// 9-digit ABA routing number: 3-7-1 weighted sum mod 10.
fn verify_aba_routing(text: &str) -> bool {
    const WEIGHT: [u32; 9] = [3, 7, 1, 3, 7, 1, 3, 7, 1];
    let digits: Vec<u8> = text.bytes().filter(|&b| b != b'-').collect();
    if digits.len() != 9 || !digits.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .zip(WEIGHT)
        .map(|(&d, w)| u32::from(d - b'0') * w)
        .sum();
    sum % 10 == 0
}

/// 13 to 19 digit card number: Luhn check after stripping dashes.
fn verify_credit_card(text: &str) -> bool {
    let digits: Vec<u8> = text.bytes().filter(|&b| b != b'-').collect();
    if !(13..=19).contains(&digits.len()) || !digits.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let mut sum = 0u32;
    let mut alternate = false;
    for &b in digits.iter().rev() {
        let mut d = u32::from(b - b'0');
        if alternate {
            d *= 2;
            if d > 9 {
                d = d % 10 + 1;
            }
        }
        alternate = !alternate;
        sum += d;
    }
    sum % 10 == 0
}

/// Base58 Bitcoin address: 25 decoded bytes, version 0, and the trailing
/// four bytes equal the double-SHA256 checksum of the first 21.
fn verify_bitcoin(text: &str) -> bool {
    let Some(addr) = base58_decode_25(text.as_bytes()) else {
        return false;
    };
    if addr[0] != 0 {
        return false;
    }
    let digest = Sha256::digest(Sha256::digest(&addr[..21]));
    addr[21..] == digest[..4]
}

/// Decodes base58 into exactly 25 big-endian bytes; rejects bad characters
/// and overflow.
fn base58_decode_25(input: &[u8]) -> Option<[u8; 25]> {
    const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    let mut out = [0u8; 25];
    for &b in input {
        let mut carry = ALPHABET.iter().position(|&a| a == b)? as u32;
        for cell in out.iter_mut().rev() {
            carry += 58 * u32::from(*cell);
            *cell = (carry % 256) as u8;
            carry /= 256;
        }
        if carry > 0 {
            return None;
        }
    }
    Some(out)
}

/// ICANN-era top-level domains, `|`-separated and base64-embedded.
const TLD_SUFFIXES_B64: &str = "LmJpenwuY29tfC5vcmd8Lm5ldHwuZWR1fC5nb3Z8LmludHwubWlsfC5hcnBhfC5pbmZvfC5wcm98LmNvb3B8LmFlcm98Lm5\
hbWV8LmlkdnwuY2N8LnR2fC50ZWNofC5tb2JpfC5hY3wuYWR8LmFlfC5hZnwuYWd8LmFpfC5hbHwuYW18LmFvfC5hcXwuYXJ8LmFzfC5hdHw\
uYXV8LmF3fC5heHwuYXp8LmJhfC5iYnwuYmR8LmJlfC5iZnwuYmd8LmJofC5iaXwuYmp8LmJtfC5ibnwuYm98LmJxfC5icnwuYnN8LmJ0fC5\
id3wuYnl8LmJ6fC5jYXwuY2R8LmNmfC5jZ3wuY2h8LmNpfC5ja3wuY2x8LmNtfC5jbnwuY298LmNyfC5jdXwuY3d8LmN4fC5jeXwuY3p8LmR\
lfC5kanwuZGt8LmRtfC5kb3wuZHp8LmVjfC5lZXwuZWd8LmVofC5lcnwuZXN8LmV0fC5ldXwuZml8LmZqfC5ma3wuZm18LmZvfC5mcnwuZ2F\
8LmdkfC5nZXwuZ2Z8LmdnfC5naHwuZ2l8Z2x8LmdtfC5nbnwuZ3B8LmdxfC5ncnwuZ3N8Lmd0fC5ndXwuZ3d8LmhrfC5obXwuaG58LmhyfC5\
odHwuaHV8LmlkfC5pZXwuaWx8LmltfC5pbnwuaW98LmlxfC5pcnwuaXN8Lml0fC5qZXwuam18LmpvfC5qcHwua2V8LmtnfC5raHwua3J8Lmt\
3fC5reXwua3p8LmxhfC5sYnwubGN8LmxpfC5sa3wubHJ8LmxzfC5sdHwubHV8Lmx2fC5seXwubWF8Lm1jfC5tZHwubWV8Lm1nfC5taHwubWt\
8Lm1sfC5tbXwubW58Lm1vfC5tcHwubXF8Lm1yfC5tc3wubXR8Lm11fC5tdnwubXd8Lm14fC5teXwubXp8Lm5hfC5uY3wubmV8Lm5mfC5uZ3w\
ubml8Lm5sfC5ub3wubnB8Lm5yfC5udXwubnp8Lm9tfC5wYXwucGV8LnBmfC5wZ3wucGh8LnBrfC5wbHwucG18LnBufC5wcnwucHN8LnB0fC5\
wd3wucHl8LnFhfC5yZXwucm98LnJzfC5ydXwucnd8LnNhfC5zYnwuc2N8LnNkfC5zZXwuc2d8LnNofC5zaXwuc2t8LnNsfC5zbXwuc258LnN\
vfC5zcnwuc3Z8LnN4fC5zeXwuc3p8LnRjfC50ZHwudGZ8LnRnfC50aHwudGp8LnRrfC50bHwudG18LnRufC50b3wudHJ8LnR0fC50dnwudHd\
8LnR6fHVhfC51Z3wudWt8LnVzfC51eXwudXp8LnZhfC52Y3wudmV8LnZnfC52aXwudm58LnZ1fC53Znwud3N8LnllfC55dHwuemF8LnptfC5\
6dw==";

static TLD_SUFFIXES: Lazy<Vec<String>> = Lazy::new(|| decode_term_list(TLD_SUFFIXES_B64, false));

/// Decodes a base64-embedded, `|`-separated term list.
pub(crate) fn decode_term_list(encoded: &str, trim: bool) -> Vec<String> {
    let Ok(decoded) = BASE64.decode(encoded) else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(&decoded).into_owned();
    let text = if trim { text.trim().to_string() } else { text };
    text.split('|').map(str::to_string).collect()
}

fn verify_domain(text: &str) -> bool {
    TLD_SUFFIXES.iter().any(|tld| text.ends_with(tld.as_str()))
}
