//! Line scanner: preprocessing, inline key/value extraction, and the
//! merge/de-duplication of result streams.
//!
//! Input is processed as newline-delimited blocks (the trailing partial
//! block included). Each block is normalized in place, scanned with value
//! rules over its bytes and key/value rules over extracted `k:v` tokens,
//! and the two streams are merged. Block-relative offsets are then shifted
//! by the block's position in the input.
//!
//! # Invariants
//! - Both normalization passes preserve byte length, so offsets into the
//!   normalized block index the original input as well.
//! - Merged output is ordered by `(byte_start, byte_end, rule_id)` with no
//!   exact duplicates and no strictly containing pair sharing a key.

use crate::api::{DetectResult, KVItem};
use crate::detector::utf8_width;
use crate::engine::Engine;

/// Token separators for inline key/value extraction.
const CUTTER: &[u8] = b" /\r\n\\[](){}:=\"',";

impl Engine {
    /// Scans plain text block by block; results come back masked and in
    /// global offsets.
    pub(crate) fn detect_impl(&self, input: &str) -> Vec<DetectResult> {
        let mut results = Vec::new();
        let mut pos = 0usize;
        for block in input.as_bytes().split_inclusive(|&b| b == b'\n') {
            let mut line = block.to_vec();
            unquote_escape_chars(&mut line);
            replace_wide_chars(&mut line);
            let mut line_results = self.detect_block(&line);
            if pos > 0 {
                for res in &mut line_results {
                    res.byte_start += pos;
                    res.byte_end += pos;
                }
            }
            results.extend(line_results);
            pos += line.len();
        }
        self.mask_results(&mut results);
        results
    }

    /// Value detection plus inline key/value detection for one block.
    fn detect_block(&self, line: &[u8]) -> Vec<DetectResult> {
        let byte_results = self.detect_bytes_rules(line);
        let kv_list = extract_kv_list(line);
        let kv_results = self.detect_kv_rules(&kv_list);
        merge_results(byte_results, kv_results)
    }

    fn detect_bytes_rules(&self, line: &[u8]) -> Vec<DetectResult> {
        let mut results = Vec::new();
        for det in self.detectors() {
            if !det.is_value() || self.skip_for_log(det) {
                continue;
            }
            results.extend(det.detect_bytes(line));
        }
        results
    }

    /// Key/value rules over extracted tokens. These findings locate text by
    /// raw offset, so they are reported as `VALUE` results that carry the
    /// extracted key.
    fn detect_kv_rules(&self, kv_list: &[KVItem]) -> Vec<DetectResult> {
        let mut results = Vec::new();
        if kv_list.is_empty() {
            return results;
        }
        for det in self.detectors() {
            if !det.is_kv() || self.skip_for_log(det) {
                continue;
            }
            let mut batch = det.detect_list(kv_list);
            for res in &mut batch {
                res.result_type = crate::api::ResultType::Value;
            }
            results.extend(batch);
        }
        results
    }
}

/// Rewrites two-byte escape sequences in place: the backslash becomes a
/// space and the escape char becomes the decoded byte (a space when the
/// escape is unknown). Length never changes, keeping offsets stable.
pub(crate) fn unquote_escape_chars(line: &mut [u8]) {
    let mut i = 0;
    while i < line.len() {
        if line[i] != b'\\' {
            i += 1;
            continue;
        }
        if i + 1 >= line.len() {
            break;
        }
        let decoded = match line[i + 1] {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0C,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0B,
            b'\\' => b'\\',
            b'"' => b'"',
            b'\'' => b'\'',
            _ => b' ',
        };
        line[i] = b' ';
        line[i + 1] = decoded;
        i += 2;
    }
}

/// ASCII replacement for a full-width punctuation rune, padded to the same
/// three-byte width. The padding keeps token boundaries intact; the colon
/// variant leads with two spaces so a Chinese `：=` sequence reads `  :=`.
fn wide_char_ascii(ch: char) -> Option<&'static str> {
    Some(match ch {
        '【' => "  [",
        '】' => "]  ",
        '：' => "  :",
        '「' => "  {",
        '」' => "}  ",
        '（' => "  (",
        '）' => ")  ",
        '《' => "  <",
        '》' => ">  ",
        '。' => ".  ",
        '？' => "?  ",
        '！' => "!  ",
        '，' => ",  ",
        '、' => ",  ",
        '；' => ";  ",
        _ => return None,
    })
}

/// Folds the mapped full-width runes into ASCII in place, preserving width.
pub(crate) fn replace_wide_chars(line: &mut [u8]) {
    let mut i = 0;
    while i < line.len() {
        let lead = line[i];
        if lead & 0x80 == 0 {
            i += 1;
            continue;
        }
        let width = utf8_width(lead);
        if i + width > line.len() {
            break;
        }
        if width == 3 {
            if let Ok(s) = std::str::from_utf8(&line[i..i + width]) {
                if let Some(ch) = s.chars().next() {
                    if let Some(replacement) = wide_char_ascii(ch) {
                        line[i..i + width].copy_from_slice(replacement.as_bytes());
                    }
                }
            }
        }
        i += width;
    }
}

#[inline]
fn is_cutter(b: u8) -> bool {
    CUTTER.contains(&b)
}

#[inline]
fn is_delimiter(ch: char) -> bool {
    ch == ':' || ch == '=' || ch == '：'
}

fn decode_char(line: &[u8], at: usize) -> Option<(char, usize)> {
    if at >= line.len() {
        return None;
    }
    let width = utf8_width(line[at]).min(line.len() - at);
    let s = std::str::from_utf8(&line[at..at + width]).ok()?;
    let ch = s.chars().next()?;
    Some((ch, ch.len_utf8()))
}

/// Single-pass scanner for `k:v`, `k=v`, and `k:=v` fragments embedded in
/// free text. Keys are lower-cased; values keep their byte span so matches
/// inside them can be located in the line.
pub(crate) fn extract_kv_list(line: &[u8]) -> Vec<KVItem> {
    let mut list = Vec::new();
    let mut i = 0;
    while i < line.len() {
        let Some((ch, width)) = decode_char(line, i) else {
            break;
        };
        if i + 1 < line.len() && is_delimiter(ch) {
            let mut value_from = i + width;
            if i + 2 < line.len() {
                if let Some((next, next_width)) = decode_char(line, i + width) {
                    if next == '=' {
                        value_from = i + width + next_width;
                    }
                }
            }
            let (key, _) = last_token(line, i);
            let (value, value_span) = first_token(line, value_from);
            if !key.is_empty() && !value.is_empty() {
                list.push(KVItem {
                    key: key.to_lowercase(),
                    value: value.to_string(),
                    start: value_span.0,
                    end: value_span.1,
                });
            }
        }
        i += width;
    }
    list
}

/// First cutter-delimited token at or after `offset`, with its byte span.
fn first_token(line: &[u8], offset: usize) -> (&str, (usize, usize)) {
    let empty = ("", (0, 0));
    if offset >= line.len() {
        return empty;
    }
    let Some(start) = (offset..line.len()).find(|&i| !is_cutter(line[i])) else {
        return empty;
    };
    let end = (start + 1..line.len())
        .find(|&i| is_cutter(line[i]))
        .unwrap_or(line.len());
    match std::str::from_utf8(&line[start..end]) {
        Ok(token) => (token, (start, end)),
        Err(_) => empty,
    }
}

/// Last cutter-delimited token strictly before `offset`, with its byte span.
fn last_token(line: &[u8], offset: usize) -> (&str, (usize, usize)) {
    let empty = ("", (0, 0));
    if offset == 0 || offset > line.len() {
        return empty;
    }
    let Some(last) = (0..offset).rev().find(|&i| !is_cutter(line[i])) else {
        return empty;
    };
    let end = last + 1;
    let start = (0..end).rev().find(|&i| is_cutter(line[i])).map_or(0, |i| i + 1);
    match std::str::from_utf8(&line[start..end]) {
        Ok(token) => (token, (start, end)),
        Err(_) => empty,
    }
}

fn same_position(a: &DetectResult, b: &DetectResult) -> bool {
    a.byte_start == b.byte_start && a.byte_end == b.byte_end && a.key == b.key
}

/// Whether `outer` covers `inner`. Containment requires an identical key;
/// results with different keys are independent.
fn covers(outer: &DetectResult, inner: &DetectResult) -> bool {
    outer.key == inner.key
        && outer.byte_start <= inner.byte_start
        && inner.byte_end <= outer.byte_end
}

/// Combines two result streams: sort by `(byte_start, byte_end, rule_id)`,
/// drop the earlier of two exactly equal results, and drop any result
/// strictly contained by another with the same key.
pub(crate) fn merge_results(
    a: Vec<DetectResult>,
    b: Vec<DetectResult>,
) -> Vec<DetectResult> {
    let mut total = a;
    total.extend(b);
    if total.is_empty() {
        return total;
    }
    total.sort_by(|x, y| {
        (x.byte_start, x.byte_end, x.rule_id).cmp(&(y.byte_start, y.byte_end, y.rule_id))
    });
    let sz = total.len();
    let mut keep = vec![true; sz];
    for i in 0..sz {
        if !keep[i] {
            continue;
        }
        for j in i + 1..sz {
            if !keep[j] {
                continue;
            }
            if same_position(&total[i], &total[j]) {
                keep[i] = false;
                break;
            }
            if covers(&total[i], &total[j]) {
                keep[j] = false;
            }
            if covers(&total[j], &total[i]) {
                keep[i] = false;
            }
        }
    }
    let mut keep = keep.into_iter();
    total.retain(|_| keep.next().unwrap());
    total
}
