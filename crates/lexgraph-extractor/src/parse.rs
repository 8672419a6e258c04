//! Structural extraction of relation records from model output
//!
//! Model output is free text that usually, but not always, contains a JSON
//! array of relation objects. Instead of parsing the whole text, the scan
//! finds balanced-brace objects whose top-level keys include `relation`,
//! `entity1`, `entity2` and `additional_info`, and ignores everything
//! around them: prose, code fences, wrapper objects and a truncated tail.

use lexgraph_core::{LexError, RelationRecord, Result};

const REQUIRED_KEYS: [&str; 4] = ["relation", "entity1", "entity2", "additional_info"];

/// Find every relation-shaped object in `text`, in order of appearance
pub fn find_relation_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut objects = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = balanced_object_end(text, i) {
                let candidate = &text[i..end];
                if is_relation_object(candidate) {
                    objects.push(candidate);
                    i = end;
                    continue;
                }
            }
        }
        i += 1;
    }

    objects
}

/// Byte index just past the `}` that closes the object opened at `start`.
///
/// Braces inside JSON strings are ignored. Returns `None` when the object
/// never closes.
pub fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Keys of the outermost object in `object`, as raw (still escaped) text
pub fn top_level_keys(object: &str) -> Vec<&str> {
    let bytes = object.as_bytes();
    let mut keys = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut string_start = 0;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => {
                    in_string = false;
                    if depth == 1 && followed_by_colon(&bytes[i + 1..]) {
                        keys.push(&object[string_start..i]);
                    }
                }
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                string_start = i + 1;
            }
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    keys
}

fn followed_by_colon(rest: &[u8]) -> bool {
    rest.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b':')
}

fn is_relation_object(object: &str) -> bool {
    let keys = top_level_keys(object);
    REQUIRED_KEYS.iter().all(|required| keys.contains(required))
}

/// Parse every relation object in `text` into records.
///
/// Objects that match the key shape but do not deserialize (an entity given
/// as a bare string, say) are skipped with a warning. Fails with
/// `MalformedOutput`, carrying the full raw text, only when no record at
/// all can be recovered.
pub fn parse_relation_records(text: &str) -> Result<Vec<RelationRecord>> {
    let objects = find_relation_objects(text);
    if objects.is_empty() {
        return Err(LexError::MalformedOutput {
            message: "no relation objects found in model output".to_string(),
            raw: text.to_string(),
        });
    }

    let mut records = Vec::with_capacity(objects.len());
    let mut last_error = None;
    for object in &objects {
        match serde_json::from_str::<RelationRecord>(object) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(error = %e, object = %object, "Skipping invalid relation object");
                last_error = Some(e);
            }
        }
    }

    if records.is_empty() {
        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        return Err(LexError::MalformedOutput {
            message: format!("relation objects are not valid JSON: {reason}"),
            raw: text.to_string(),
        });
    }

    tracing::debug!(
        objects = objects.len(),
        records = records.len(),
        "Parsed relation objects"
    );
    Ok(records)
}

/// Drop self-relations and records with empty required fields
pub fn retain_well_formed(records: Vec<RelationRecord>) -> Vec<RelationRecord> {
    records
        .into_iter()
        .filter(|record| {
            if !record.is_complete() {
                tracing::warn!(relation = %record.relation, "Dropping incomplete relation record");
                return false;
            }
            if record.is_self_loop() {
                tracing::warn!(
                    relation = %record.relation,
                    entity = %record.entity1.name(),
                    "Dropping self-relation"
                );
                return false;
            }
            true
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{"relation": "CONTRACTED_WITH", "entity1": {"entity": "<PETITIONER>Carmichael</PETITIONER>", "type": "PETITIONER"}, "entity2": {"entity": "OneSteel", "type": "ORG"}, "additional_info": {"description": "Carmichael engaged OneSteel"}}"#;

    #[test]
    fn test_balanced_object_end_ignores_braces_in_strings() {
        let text = r#"{"a": "} not the end {", "b": {"c": 1}} tail"#;
        let end = balanced_object_end(text, 0).unwrap();
        assert_eq!(&text[end..], " tail");
        assert_eq!(balanced_object_end(r#"{"open": {"#, 0), None);
        assert_eq!(balanced_object_end("x{}", 0), None);
    }

    #[test]
    fn test_top_level_keys() {
        let keys = top_level_keys(r#"{"a": {"inner": 1}, "b\"q": [ {"c": 2} ], "d": "e: f"}"#);
        assert_eq!(keys, vec!["a", r#"b\"q"#, "d"]);
    }

    #[test]
    fn test_finds_objects_among_prose() {
        let text = format!("Sure! Here you go:\n```json\n[{RECORD},\n{RECORD}]\n```\nHope this helps {{:)}}");
        let objects = find_relation_objects(&text);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0], RECORD);
    }

    #[test]
    fn test_accepts_reordered_keys_and_nested_info() {
        let text = r#"[{"additional_info": {"description": "Heard the appeal", "source": {"para": 6}},
            "entity2": {"entity": "Supreme Court", "type": "COURT"},
            "relation": "HEARD_BY",
            "entity1": {"entity": "Writ Petition 528", "type": "CASE_NUMBER"}}]"#;
        let records = parse_relation_records(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].relation, "HEARD_BY");
        assert_eq!(records[0].additional_info.extra["source"]["para"], 6);
    }

    #[test]
    fn test_descends_into_wrapper_object() {
        let text = format!(r#"{{"relations": [{RECORD}]}}"#);
        assert_eq!(find_relation_objects(&text), vec![RECORD]);
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let text = format!(r#"[{RECORD}, {{"relation": "SHIPPED_TO", "entity1": {{"entity": "Why"#);
        let records = parse_relation_records(&text).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_no_objects_is_malformed() {
        let err = parse_relation_records("I am unable to find relations.").unwrap_err();
        assert_eq!(err.raw_output(), Some("I am unable to find relations."));
    }

    #[test]
    fn test_shape_match_with_bad_types_is_malformed() {
        let text = r#"[{"relation": 5, "entity1": {}, "entity2": {}, "additional_info": {}}]"#;
        let err = parse_relation_records(text).unwrap_err();
        assert!(matches!(err, LexError::MalformedOutput { .. }));
        assert_eq!(err.raw_output(), Some(text));
    }

    #[test]
    fn test_invalid_object_is_skipped_among_valid_ones() {
        let bad = r#"{"relation": "HEARD_BY", "entity1": "Supreme Court", "entity2": {"entity": "Writ Petition 528", "type": "CASE_NUMBER"}, "additional_info": {"description": "Heard the appeal"}}"#;
        let text = format!("[{RECORD},\n{bad},\n{RECORD}]");

        let records = parse_relation_records(&text).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.relation == "CONTRACTED_WITH"));
    }

    #[test]
    fn test_retain_well_formed_drops_self_loops_and_gaps() {
        let good: RelationRecord = serde_json::from_str(RECORD).unwrap();
        let mut self_loop = good.clone();
        self_loop.entity2.entity = "Carmichael".to_string();
        let mut blank = good.clone();
        blank.relation = " ".to_string();

        let kept = retain_well_formed(vec![good.clone(), self_loop, blank]);
        assert_eq!(kept, vec![good]);
    }
}
