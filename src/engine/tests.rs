//! Engine tests: preprocessing, token extraction, merge behavior, JSON
//! traversal, lifecycle, and the struct-masking visitor.

use super::scan::{extract_kv_list, merge_results, replace_wide_chars, unquote_escape_chars};
use super::*;
use crate::api::{LIMIT_MARKER, MAX_CALL_DEPTH};
use crate::errors::DlpError;
use proptest::prelude::*;

fn default_engine() -> Engine {
    let mut engine = Engine::new();
    engine.apply_config_default().unwrap();
    engine
}

fn result_at(start: usize, end: usize, rule_id: u32, key: &str) -> DetectResult {
    DetectResult {
        rule_id,
        byte_start: start,
        byte_end: end,
        key: key.to_string(),
        ..DetectResult::default()
    }
}

// ---- preprocessing ----

#[test]
fn escape_unquoting_rewrites_known_and_unknown_escapes() {
    let mut line = b"a\\nb".to_vec();
    unquote_escape_chars(&mut line);
    assert_eq!(line, vec![b'a', b' ', b'\n', b'b']);

    let mut line = b"\\z".to_vec();
    unquote_escape_chars(&mut line);
    assert_eq!(line, vec![b' ', b' ']);

    // A trailing lone backslash stays put.
    let mut line = b"ab\\".to_vec();
    unquote_escape_chars(&mut line);
    assert_eq!(line, vec![b'a', b'b', b'\\']);
}

#[test]
fn wide_chars_fold_to_ascii_with_identical_width() {
    let mut line = "收件人：张".as_bytes().to_vec();
    let before = line.len();
    replace_wide_chars(&mut line);
    assert_eq!(line.len(), before);
    assert_eq!(line, "收件人  :张".as_bytes());

    let mut line = "【标】".as_bytes().to_vec();
    replace_wide_chars(&mut line);
    assert_eq!(line, "  [标]  ".as_bytes());
}

#[test]
fn wide_colon_keeps_assignment_shape() {
    let mut line = "k：=v".as_bytes().to_vec();
    replace_wide_chars(&mut line);
    assert_eq!(line, b"k  :=v");
}

// ---- inline key/value extraction ----

#[test]
fn kv_extraction_locates_value_spans() {
    let items = extract_kv_list(b"uid:10086");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].key, "uid");
    assert_eq!(items[0].value, "10086");
    assert_eq!((items[0].start, items[0].end), (4, 9));
}

#[test]
fn kv_extraction_handles_colon_equals() {
    // Both the ':' and the '=' positions emit the pair; the merge stage
    // collapses the resulting duplicate findings.
    let items = extract_kv_list(b"port:=8080 rest");
    assert_eq!(items.len(), 2);
    for item in &items {
        assert_eq!(item.key, "port");
        assert_eq!(item.value, "8080");
        assert_eq!((item.start, item.end), (6, 10));
    }
}

#[test]
fn kv_extraction_lowercases_keys_and_skips_empty_sides() {
    let items = extract_kv_list(b"UID:10086");
    assert_eq!(items[0].key, "uid");

    assert!(extract_kv_list(b": lonely").is_empty());
    assert!(extract_kv_list(b"tail: ").is_empty());
    // Delimiter as the very last byte is ignored.
    assert!(extract_kv_list(b"key:").is_empty());
}

#[test]
fn kv_extraction_splits_on_cutters() {
    let items = extract_kv_list(b"log info:[ uid:10086, phone:x]");
    let pairs: Vec<(&str, &str)> = items
        .iter()
        .map(|i| (i.key.as_str(), i.value.as_str()))
        .collect();
    assert_eq!(pairs, vec![("info", "uid"), ("uid", "10086"), ("phone", "x")]);
}

// ---- merge & de-duplication ----

#[test]
fn merge_sorts_by_start_end_rule() {
    let merged = merge_results(
        vec![result_at(10, 20, 2, ""), result_at(0, 5, 9, "")],
        vec![result_at(0, 5, 3, "k")],
    );
    let order: Vec<(usize, usize, u32)> = merged
        .iter()
        .map(|r| (r.byte_start, r.byte_end, r.rule_id))
        .collect();
    assert_eq!(order, vec![(0, 5, 3), (0, 5, 9), (10, 20, 2)]);
}

#[test]
fn merge_drops_exact_duplicates_keeping_the_later() {
    let merged = merge_results(
        vec![result_at(0, 5, 1, "k"), result_at(0, 5, 7, "k")],
        Vec::new(),
    );
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].rule_id, 7);
}

#[test]
fn merge_drops_contained_spans_with_identical_keys() {
    let merged = merge_results(
        vec![result_at(0, 10, 1, ""), result_at(2, 6, 2, "")],
        Vec::new(),
    );
    assert_eq!(merged.len(), 1);
    assert_eq!((merged[0].byte_start, merged[0].byte_end), (0, 10));
}

#[test]
fn merge_keeps_contained_spans_with_different_keys() {
    let merged = merge_results(
        vec![result_at(0, 10, 1, "a"), result_at(2, 6, 2, "b")],
        Vec::new(),
    );
    assert_eq!(merged.len(), 2);
}

proptest! {
    #[test]
    fn merge_output_is_ordered_and_minimal(
        specs in proptest::collection::vec(
            (0usize..40, 1usize..16, 1u32..6, 0usize..3),
            0..24,
        )
    ) {
        const KEYS: [&str; 3] = ["", "k1", "k2"];
        let input: Vec<DetectResult> = specs
            .iter()
            .map(|&(start, len, rule, key)| result_at(start, start + len, rule, KEYS[key]))
            .collect();
        let merged = merge_results(input, Vec::new());

        for pair in merged.windows(2) {
            let a = (pair[0].byte_start, pair[0].byte_end, pair[0].rule_id);
            let b = (pair[1].byte_start, pair[1].byte_end, pair[1].rule_id);
            prop_assert!(a <= b);
        }
        for i in 0..merged.len() {
            for j in 0..merged.len() {
                if i == j || merged[i].key != merged[j].key {
                    continue;
                }
                prop_assert!(
                    !(merged[i].byte_start == merged[j].byte_start
                        && merged[i].byte_end == merged[j].byte_end),
                    "duplicate position survived the merge"
                );
                if i != j {
                    let covers = merged[i].byte_start <= merged[j].byte_start
                        && merged[j].byte_end <= merged[i].byte_end;
                    prop_assert!(!covers, "contained span survived the merge");
                }
            }
        }
    }
}

// ---- text scanning through the engine ----

#[test]
fn inline_kv_tokens_fire_kv_rules_with_text_offsets() {
    let engine = default_engine();
    let results = engine.detect("log info:[ uid:10086 ]").unwrap();
    assert_eq!(results.len(), 1);
    let res = &results[0];
    assert_eq!(res.rule_id, 36);
    assert_eq!(res.key, "uid");
    assert_eq!(res.text, "10086");
    assert_eq!((res.byte_start, res.byte_end), (15, 20));
    assert!(res.result_type.is_value());
    assert_eq!(res.mask_text, "1****");
}

#[test]
fn detect_results_echo_the_matched_input_slice() {
    let engine = default_engine();
    let input = "reach me at abcd@abcd.com or 18612341234";
    for res in engine.detect(input).unwrap() {
        assert_eq!(res.text, &input[res.byte_start..res.byte_end]);
    }
}

#[test]
fn address_rules_keep_only_the_first_matching_pattern_batch() {
    let engine = default_engine();
    let results = engine
        .detect("你家住在哪里啊? 我家住在北京市海淀区北三环西路43号,")
        .unwrap();
    let address: Vec<&DetectResult> = results.iter().filter(|r| r.info_type == "ADDRESS").collect();
    assert_eq!(address.len(), 1);
    assert_eq!(address[0].text, "我家住在北京市海淀区北三环西路43号");
    assert_eq!(address[0].mask_text, "我家住在北京市海淀区北三环西路**号");
}

#[test]
fn context_gated_rule_needs_its_context_word() {
    let engine = default_engine();
    let hit = engine.detect("aba routing number 021000021").unwrap();
    assert!(hit.iter().any(|r| r.info_type == "ABA"));
    let miss = engine.detect("some order number 021000021").unwrap();
    assert!(!miss.iter().any(|r| r.info_type == "ABA"));
}

#[test]
fn checksum_rules_end_to_end() {
    let engine = default_engine();

    let results = engine.detect("卡号 6222020200112230").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].info_type, "BANK");
    assert_eq!(results[0].mask_text, "************2230");

    // Same shape, broken Luhn digit.
    assert!(engine.detect("卡号 6222020200112231").unwrap().is_empty());

    let results = engine.detect("110225196403026127").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].info_type, "IDCARD");

    let results = engine
        .detect("wallet 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].info_type, "BITCOIN");
    assert_eq!(results[0].mask_text, "<BITCOIN>");
}

// ---- JSON ----

#[test]
fn json_numbers_round_trip_losslessly() {
    let engine = default_engine();
    let json = r#"{"id":123456789012345678901234567890,"uid":"10086"}"#;
    let (out, results) = engine.de_identify_json(json).unwrap();
    assert_eq!(out, r#"{"id":123456789012345678901234567890,"uid":"1****"}"#);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "/uid");
}

#[test]
fn json_paths_are_lowercased_with_array_suffixes() {
    let engine = default_engine();
    let results = engine
        .detect_json(r#"{"Outer":{"UID":["10086","10087"]}}"#)
        .unwrap();
    let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["/outer/uid[0]", "/outer/uid[1]"]);
}

#[test]
fn top_level_json_array_paths() {
    let engine = default_engine();
    let results = engine.detect_json(r#"[{"uid":"10086"}]"#).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key, "/[0]/uid");
}

#[test]
fn malformed_json_is_reported() {
    let engine = default_engine();
    assert!(matches!(
        engine.detect_json("{\"uid\": oops}"),
        Err(DlpError::Json(_))
    ));
}

// ---- de-identification plumbing ----

#[test]
fn splicing_validates_stored_result_bounds() {
    let engine = default_engine();
    let bogus = DetectResult {
        byte_start: 2,
        byte_end: 99,
        mask_text: "*".to_string(),
        ..DetectResult::default()
    };
    assert!(matches!(
        engine.de_identify_by_result("abc", std::slice::from_ref(&bogus)),
        Err(DlpError::PositionError { .. })
    ));
}

// ---- log processing ----

#[test]
fn log_processor_truncates_text_and_kv_list() {
    let mut engine = default_engine();
    let long_log = format!("call me at 18612341234 {}", "x".repeat(2048));
    let mut kvs: Vec<(String, String)> = (0..20)
        .map(|i| (format!("k{i}"), "nothing".to_string()))
        .collect();
    kvs[0] = ("uid".to_string(), "10086".to_string());

    let processor = engine.new_log_processor().unwrap();
    let (out, masked_kvs) = processor.process(&long_log, &kvs);
    assert!(out.starts_with("call me at 186******34"));
    assert!(out.ends_with(LIMIT_MARKER));
    assert!(out.len() < long_log.len());

    assert_eq!(masked_kvs.len(), crate::api::MAX_LOG_ITEM + 1);
    assert_eq!(masked_kvs[0], ("uid".to_string(), "1****".to_string()));
    assert_eq!(masked_kvs.last().unwrap().1, LIMIT_MARKER);
    drop(processor);

    // The engine is log-only from here on.
    assert!(matches!(engine.detect("x"), Err(DlpError::OnlyForLog)));
    assert!(matches!(engine.de_identify("x"), Err(DlpError::OnlyForLog)));
}

#[test]
fn log_mode_skips_high_id_regex_rules() {
    let doc = r#"
global:
  max_regex_rule_id: 1
rules:
  - rule_id: 1
    info_type: PHONE
    mask: M
    detect:
      v_reg: ['1[3-9]\d{9}']
  - rule_id: 50
    info_type: MACADDR
    detect:
      v_reg: ['(?:[0-9a-fA-F]{2}-){5}[0-9a-fA-F]{2}']
mask_rules:
  - rule_name: M
    mask_type: CHAR
    offset: 3
    padding: 2
"#;
    let mut engine = Engine::new();
    engine.apply_config(doc).unwrap();
    let processor = engine.new_log_processor().unwrap();
    let (out, _) = processor.process("18612341234 06-06-06-aa-bb-cc", &[]);
    // Rule 1 still runs, rule 50 is cut for throughput.
    assert_eq!(out, "186******34 06-06-06-aa-bb-cc");
}

// ---- struct masking ----

struct Contact {
    email: String,
    phones: Vec<String>,
    backup: Option<Box<Contact>>,
}

impl MaskTagged for Contact {
    fn mask_fields(&mut self, visitor: &mut FieldVisitor<'_>) {
        visitor.string("EMAIL", &mut self.email);
        visitor.strings("CHINAPHONE", &mut self.phones);
        visitor.nested(&mut self.backup);
    }
}

fn contact_chain(depth: usize) -> Contact {
    let mut node = Contact {
        email: "abcd@abcd.com".to_string(),
        phones: vec!["18612341234".to_string(), String::new()],
        backup: None,
    };
    for _ in 0..depth {
        node = Contact {
            email: "abcd@abcd.com".to_string(),
            phones: Vec::new(),
            backup: Some(Box::new(node)),
        };
    }
    node
}

#[test]
fn struct_masking_walks_tagged_fields() {
    let engine = default_engine();
    let mut contact = contact_chain(1);
    engine.mask_struct(&mut contact).unwrap();
    assert_eq!(contact.email, "a***@********");
    let backup = contact.backup.as_ref().unwrap();
    assert_eq!(backup.email, "a***@********");
    assert_eq!(backup.phones[0], "186******34");
    assert_eq!(backup.phones[1], "");
}

#[test]
fn struct_masking_stops_at_the_depth_cap() {
    let engine = default_engine();
    let mut chain = contact_chain(MAX_CALL_DEPTH + 2);
    engine.mask_struct(&mut chain).unwrap();

    let mut level = 0;
    let mut node = &chain;
    loop {
        if level < MAX_CALL_DEPTH {
            assert_eq!(node.email, "a***@********", "level {level} should be masked");
        } else {
            assert_eq!(node.email, "abcd@abcd.com", "level {level} should be untouched");
        }
        match &node.backup {
            Some(next) => {
                node = next;
                level += 1;
            }
            None => break,
        }
    }
}

#[test]
fn struct_masking_skips_unknown_workers() {
    struct Odd {
        value: String,
    }
    impl MaskTagged for Odd {
        fn mask_fields(&mut self, visitor: &mut FieldVisitor<'_>) {
            visitor.string("NO_SUCH_WORKER", &mut self.value);
        }
    }
    let engine = default_engine();
    let mut odd = Odd {
        value: "18612341234".to_string(),
    };
    engine.mask_struct(&mut odd).unwrap();
    assert_eq!(odd.value, "18612341234");
}

// ---- lifecycle & limits ----

#[test]
fn unconfigured_engine_rejects_every_operation() {
    let engine = Engine::new();
    assert!(matches!(engine.detect("x"), Err(DlpError::NotConfigured)));
    assert!(matches!(
        engine.mask("x", "CHINAPHONE"),
        Err(DlpError::NotConfigured)
    ));
    assert!(engine
        .detect("x")
        .unwrap_err()
        .is_critical());
}

#[test]
fn closed_engine_rejects_every_operation() {
    let mut engine = default_engine();
    engine.close();
    assert!(matches!(engine.detect("x"), Err(DlpError::ProcessAfterClose)));
    assert!(matches!(
        engine.apply_config_default(),
        Err(DlpError::ProcessAfterClose)
    ));
}

#[test]
fn input_caps_are_enforced() {
    let engine = default_engine();
    let oversized = "a".repeat(MAX_INPUT + 1);
    assert!(matches!(
        engine.detect(&oversized),
        Err(DlpError::MaxInputLimit { .. })
    ));
    assert!(matches!(
        engine.mask(&oversized, "CHINAPHONE"),
        Err(DlpError::MaxInputLimit { .. })
    ));

    let big_map: HashMap<String, String> = (0..=MAX_ITEM)
        .map(|i| (format!("k{i}"), String::new()))
        .collect();
    assert!(matches!(
        engine.detect_map(&big_map),
        Err(DlpError::MaxInputItems { .. })
    ));
}

#[test]
fn unknown_mask_worker_is_an_error() {
    let engine = default_engine();
    assert!(matches!(
        engine.mask("text", "NO_SUCH_RULE"),
        Err(DlpError::MaskWorkerNotfound { .. })
    ));
}

#[test]
fn unsupported_mask_algorithm_is_reported() {
    let doc = r#"
rules: []
mask_rules:
  - rule_name: BROKEN
    mask_type: ALGO
    value: ROT13
"#;
    let mut engine = Engine::new();
    engine.apply_config(doc).unwrap();
    assert!(matches!(
        engine.mask("text", "BROKEN"),
        Err(DlpError::MaskNotSupport { .. })
    ));
}

#[test]
fn tag_mask_without_context_detects_first() {
    let engine = default_engine();
    assert_eq!(engine.mask("18612341234", "TAG_PII").unwrap(), "<PHONE>");
    assert_eq!(engine.mask("no pii here", "TAG_PII").unwrap(), "<UNKNOWN>");
}

#[test]
fn disable_and_enable_rules_shrink_the_active_set() {
    let mut engine = default_engine();
    assert!(!engine.detect("18612341234").unwrap().is_empty());

    engine.apply_disable_rules(&[1]).unwrap();
    assert!(engine.detect("18612341234").unwrap().is_empty());
    assert!(!engine.detect("abcd@abcd.com").unwrap().is_empty());

    engine.disable_all_rules().unwrap();
    assert!(engine.detect("abcd@abcd.com").unwrap().is_empty());

    let doc = r#"
global:
  enable_rules: [2]
rules:
  - rule_id: 1
    info_type: PHONE
    detect:
      v_reg: ['1[3-9]\d{9}']
  - rule_id: 2
    info_type: EMAIL
    detect:
      v_reg: ['[A-Za-z0-9_.+-]+@[A-Za-z0-9][A-Za-z0-9-]*\.[A-Za-z0-9-.]+']
mask_rules: []
"#;
    let mut engine = Engine::new();
    engine.apply_config(doc).unwrap();
    assert!(engine.detect("18612341234").unwrap().is_empty());
    assert_eq!(engine.detect("abcd@abcd.com").unwrap().len(), 1);
}

#[test]
fn reconfiguring_keeps_diy_maskers() {
    let mut engine = default_engine();
    engine
        .register_masker("STARS", |_| Ok("***".to_string()))
        .unwrap();
    engine.apply_config_default().unwrap();
    assert_eq!(engine.mask("anything", "STARS").unwrap(), "***");
    assert!(matches!(
        engine.register_masker("STARS", |input| Ok(input.to_string())),
        Err(DlpError::MaskNameConflict { .. })
    ));
    // DIY names collide with loaded mask rules too.
    assert!(matches!(
        engine.register_masker("CHINAPHONE", |input| Ok(input.to_string())),
        Err(DlpError::MaskNameConflict { .. })
    ));
}
