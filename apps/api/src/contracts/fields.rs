//! Field-name aliases for generated candidates.
//!
//! Generators name the same concept many ways; every alias list is resolved
//! once here so validators only see one shape.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::contracts::ContractError;
use crate::items::model::{Correction, ItemType, OptionStatus};
use crate::items::text::{label_str_to_slot, label_to_slot, marker};

pub const QUESTION: &[&str] = &["question", "prompt", "instruction", "questionText"];
pub const OPTIONS: &[&str] = &["options", "choices", "optionList"];
pub const ANSWER: &[&str] = &[
    "correctAnswer",
    "answer",
    "correct",
    "correctAnswers",
    "answers",
    "answerIndices",
    "correctOption",
];
pub const EXPLANATION: &[&str] = &["explanation", "rationale", "analysis", "solution"];
pub const SOURCE_LABEL: &[&str] = &["sourceLabel", "source", "sourceName"];
pub const PASSAGE: &[&str] = &["passage", "mainText", "text", "passageText"];
pub const TARGET_EXPRESSION: &[&str] = &["targetExpression", "target", "targetPhrase"];
pub const FAMILY: &[&str] = &["questionFamily", "family", "blankFamily"];
pub const STRATEGY: &[&str] = &["strategy", "blankStrategy", "paraphraseStrategy"];
pub const VARIANT: &[&str] = &["variantTag", "variant"];
pub const REASON_MAPS: &[&str] = &[
    "optionReasons",
    "distractorReasons",
    "optionRationales",
    "optionComments",
];
pub const TAG_MAPS: &[&str] = &["distractorTags", "optionTags", "optionDefects", "fallacies"];
pub const CORRECTIONS: &[&str] = &["corrections", "correction"];
pub const KEYWORDS: &[&str] = &["keywords", "keyPhrases"];
/// Informational keys copied into item metadata untouched.
pub const PASSTHROUGH: &[&str] = &["grammarPoint", "trapPattern", "titlePattern", "topicType"];

pub const OPTION_LABEL: &[&str] = &["label", "symbol", "id", "choice", "marker", "key"];
pub const OPTION_TEXT: &[&str] = &[
    "text", "value", "phrase", "segment", "snippet", "title", "option", "content",
];
pub const OPTION_REASON: &[&str] = &["reason", "rationale", "comment", "explanation", "note"];
pub const OPTION_TAG: &[&str] = &[
    "fallacy", "trap", "tag", "defect", "errorType", "trapType", "category", "flaw",
];
pub const OPTION_STATUS: &[&str] = &["status", "role", "correctness", "verdict"];

const CORRECT_WORDS: &[&str] = &["correct", "right", "valid", "정답", "적절", "옳음"];
const INCORRECT_WORDS: &[&str] = &[
    "incorrect", "wrong", "error", "trap", "invalid", "오답", "어색", "부적절", "틀림", "distractor",
];

fn enumerator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:([①②③④⑤])|[(\[]?([1-5A-E])[)\].:])\s*").expect("enumerator regex")
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Lookup helpers
// ────────────────────────────────────────────────────────────────────────────

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// First alias carrying a non-empty value.
pub fn lookup<'a>(object: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| object.get(*key))
        .find(|v| !is_blank(v))
}

/// Same as [`lookup`], falling back to a nested `notes` object.
pub fn lookup_with_notes<'a>(object: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    lookup(object, aliases).or_else(|| object.get("notes").and_then(|n| lookup(n, aliases)))
}

/// Trimmed string form of a scalar value.
pub fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn lookup_text(object: &Value, aliases: &[&str]) -> Option<String> {
    lookup(object, aliases).and_then(text_of)
}

/// Zero-based slots named by an answer value: a number, a label string, a
/// comma list (`"2,4"`), or an array of any of those.
pub fn answer_slots(value: &Value) -> Vec<usize> {
    let mut slots: Vec<usize> = match value {
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::Object(_) => lookup(item, OPTION_LABEL)
                    .and_then(label_to_slot)
                    .into_iter()
                    .collect::<Vec<_>>(),
                other => answer_slots(other),
            })
            .collect(),
        Value::String(s) => s
            .split([',', '/', ' '])
            .filter(|part| !part.trim().is_empty())
            .filter_map(label_str_to_slot)
            .collect(),
        other => label_to_slot(other).into_iter().collect(),
    };
    slots.sort_unstable();
    slots.dedup();
    slots
}

pub fn parse_status(value: &Value) -> Option<OptionStatus> {
    let raw = text_of(value)?.to_lowercase();
    // "incorrect" contains "correct", so the negative list goes first.
    if INCORRECT_WORDS.iter().any(|w| raw.contains(w)) {
        Some(OptionStatus::Incorrect)
    } else if CORRECT_WORDS.iter().any(|w| raw.contains(w)) {
        Some(OptionStatus::Correct)
    } else {
        None
    }
}

/// Per-slot strings from an object keyed by label, an ordered array of
/// strings, or an array of `{label, reason}` objects.
pub fn slot_map(value: &Value, value_aliases: &[&str]) -> BTreeMap<usize, String> {
    let mut map = BTreeMap::new();
    match value {
        Value::Object(entries) => {
            for (key, v) in entries {
                let text = text_of(v).or_else(|| lookup_text(v, value_aliases));
                if let (Some(slot), Some(text)) = (label_str_to_slot(key), text) {
                    map.insert(slot, text);
                }
            }
        }
        Value::Array(entries) => {
            for (index, v) in entries.iter().enumerate() {
                let (slot, text) = match v {
                    Value::Object(_) => (
                        lookup(v, OPTION_LABEL).and_then(label_to_slot),
                        lookup_text(v, value_aliases),
                    ),
                    other => (Some(index), text_of(other)),
                };
                if let (Some(slot), Some(text)) = (slot.filter(|s| *s < 5), text) {
                    map.insert(slot, text);
                }
            }
        }
        _ => {}
    }
    map
}

/// Converts a slot map to the marker-keyed form stored in metadata.
pub fn by_marker(map: &BTreeMap<usize, String>) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(slot, text)| Some((marker(*slot)?.to_string(), text.clone())))
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Options
// ────────────────────────────────────────────────────────────────────────────

/// One option entry as the generator wrote it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOption {
    pub label: Option<Value>,
    pub text: String,
    pub reason: Option<String>,
    pub tag: Option<String>,
    pub status: Option<OptionStatus>,
    pub is_answer: Option<bool>,
}

impl RawOption {
    pub fn from_value(entry: &Value) -> Option<Self> {
        match entry {
            Value::String(s) => {
                let (label, text) = split_enumerator(s);
                Some(Self {
                    label,
                    text,
                    ..Self::default()
                })
                .filter(|o| !o.text.is_empty())
            }
            Value::Object(_) => {
                let raw_text = lookup_text(entry, OPTION_TEXT)?;
                let (embedded, text) = split_enumerator(&raw_text);
                let status = lookup(entry, OPTION_STATUS)
                    .and_then(parse_status)
                    .or_else(|| match entry.get("isCorrect") {
                        Some(Value::Bool(b)) => Some(if *b {
                            OptionStatus::Correct
                        } else {
                            OptionStatus::Incorrect
                        }),
                        _ => None,
                    })
                    .or_else(|| match entry.get("isWrong") {
                        Some(Value::Bool(b)) => Some(if *b {
                            OptionStatus::Incorrect
                        } else {
                            OptionStatus::Correct
                        }),
                        _ => None,
                    });
                Some(Self {
                    label: lookup(entry, OPTION_LABEL).cloned().or(embedded),
                    text,
                    reason: lookup_text(entry, OPTION_REASON),
                    tag: lookup_text(entry, OPTION_TAG),
                    status,
                    is_answer: entry.get("isAnswer").and_then(Value::as_bool),
                })
                .filter(|o| !o.text.is_empty())
            }
            _ => None,
        }
    }
}

/// Splits a leading enumerator (`③`, `1.`, `(B)`) off an option string.
fn split_enumerator(raw: &str) -> (Option<Value>, String) {
    let trimmed = raw.trim();
    match enumerator_re().captures(trimmed) {
        Some(caps) => {
            let label = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| Value::String(m.as_str().to_string()));
            (label, trimmed[caps[0].len()..].trim().to_string())
        }
        None => (None, trimmed.to_string()),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Resolved candidate
// ────────────────────────────────────────────────────────────────────────────

/// A candidate with every alias resolved.
#[derive(Debug, Clone, Default)]
pub struct CandidateFields {
    pub question: Option<String>,
    pub options: Vec<Value>,
    pub answer: Vec<usize>,
    pub explanation: Option<String>,
    pub source_label: Option<String>,
    pub passage: Option<String>,
    pub target_expression: Option<String>,
    /// Char offsets into the original passage.
    pub target_span: Option<(usize, usize)>,
    pub family: Option<String>,
    pub strategy: Option<String>,
    pub variant_tag: Option<String>,
    pub type_hint: Option<String>,
    pub reasons: BTreeMap<usize, String>,
    pub tags: BTreeMap<usize, String>,
    pub corrections: Vec<Correction>,
    pub keywords: Vec<String>,
    pub passthrough: Map<String, Value>,
}

impl CandidateFields {
    pub fn resolve(kind: ItemType, candidate: &Value) -> Result<Self, ContractError> {
        if !candidate.is_object() {
            return Err(ContractError::PayloadMissing(kind));
        }
        let options = lookup(candidate, OPTIONS)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut reasons = BTreeMap::new();
        for key in REASON_MAPS.iter().rev() {
            if let Some(value) = candidate.get(*key) {
                reasons.extend(slot_map(value, OPTION_REASON));
            }
        }
        let mut tags = BTreeMap::new();
        for key in TAG_MAPS.iter().rev() {
            if let Some(value) = candidate.get(*key) {
                tags.extend(slot_map(value, OPTION_TAG));
            }
        }

        let target_span = candidate.get("targetSpan").and_then(|span| {
            let start = span.get("start")?.as_u64()? as usize;
            let end = span.get("end")?.as_u64()? as usize;
            (end > start).then_some((start, end))
        });

        let passthrough = PASSTHROUGH
            .iter()
            .filter_map(|key| {
                candidate
                    .get(*key)
                    .filter(|v| !is_blank(v))
                    .map(|v| (key.to_string(), v.clone()))
            })
            .collect();

        Ok(Self {
            question: lookup_text(candidate, QUESTION),
            options,
            answer: lookup(candidate, ANSWER).map(answer_slots).unwrap_or_default(),
            explanation: lookup_text(candidate, EXPLANATION),
            source_label: lookup_with_notes(candidate, SOURCE_LABEL).and_then(text_of),
            passage: lookup_text(candidate, PASSAGE),
            target_expression: lookup_with_notes(candidate, TARGET_EXPRESSION).and_then(text_of),
            target_span,
            family: lookup_with_notes(candidate, FAMILY).and_then(text_of),
            strategy: lookup_with_notes(candidate, STRATEGY).and_then(text_of),
            variant_tag: lookup_text(candidate, VARIANT),
            type_hint: lookup_text(candidate, &["type", "problemType"]),
            reasons,
            tags,
            corrections: parse_corrections(candidate),
            keywords: parse_keywords(candidate),
            passthrough,
        })
    }
}

fn parse_corrections(candidate: &Value) -> Vec<Correction> {
    let entries: Vec<&Value> = match lookup(candidate, CORRECTIONS) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => return Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let replacement = lookup_text(entry, &["replacement", "correct", "fix", "corrected"])?;
            Some(Correction {
                marker: lookup(entry, OPTION_LABEL)
                    .and_then(label_to_slot)
                    .and_then(marker)
                    .map(str::to_string),
                original: lookup_text(entry, &["original", "incorrect", "from"]).unwrap_or_default(),
                replacement,
            })
        })
        .collect()
}

fn parse_keywords(candidate: &Value) -> Vec<String> {
    match lookup(candidate, KEYWORDS) {
        Some(Value::Array(items)) => items.iter().filter_map(text_of).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_skips_empty_aliases() {
        let candidate = json!({"question": "  ", "prompt": "다음 글의 제목으로 가장 적절한 것은?"});
        assert_eq!(
            lookup_text(&candidate, QUESTION).as_deref(),
            Some("다음 글의 제목으로 가장 적절한 것은?")
        );
    }

    #[test]
    fn test_answer_slot_shapes() {
        assert_eq!(answer_slots(&json!(3)), vec![2]);
        assert_eq!(answer_slots(&json!("②")), vec![1]);
        assert_eq!(answer_slots(&json!("4,2")), vec![1, 3]);
        assert_eq!(answer_slots(&json!([5, "①"])), vec![0, 4]);
        assert_eq!(answer_slots(&json!([{"label": "C"}])), vec![2]);
        assert!(answer_slots(&json!("none")).is_empty());
    }

    #[test]
    fn test_status_keywords() {
        assert_eq!(parse_status(&json!("incorrect")), Some(OptionStatus::Incorrect));
        assert_eq!(parse_status(&json!("Correct")), Some(OptionStatus::Correct));
        assert_eq!(parse_status(&json!("오답")), Some(OptionStatus::Incorrect));
        assert_eq!(parse_status(&json!("distractor")), Some(OptionStatus::Incorrect));
        assert_eq!(parse_status(&json!("maybe")), None);
    }

    #[test]
    fn test_raw_option_from_string_and_object() {
        let from_string = RawOption::from_value(&json!("③ a quiet revolution")).unwrap();
        assert_eq!(from_string.label, Some(json!("③")));
        assert_eq!(from_string.text, "a quiet revolution");

        let from_object = RawOption::from_value(&json!({
            "symbol": "B",
            "snippet": "has been",
            "rationale": "수일치 오류입니다",
            "isCorrect": false
        }))
        .unwrap();
        assert_eq!(from_object.label, Some(json!("B")));
        assert_eq!(from_object.text, "has been");
        assert_eq!(from_object.status, Some(OptionStatus::Incorrect));
        assert_eq!(from_object.reason.as_deref(), Some("수일치 오류입니다"));

        assert!(RawOption::from_value(&json!("   ")).is_none());
        assert!(RawOption::from_value(&json!(42)).is_none());
    }

    #[test]
    fn test_slot_maps_from_object_and_array() {
        let from_object = slot_map(&json!({"①": "a", "3": "c"}), OPTION_REASON);
        assert_eq!(from_object.get(&0).map(String::as_str), Some("a"));
        assert_eq!(from_object.get(&2).map(String::as_str), Some("c"));

        let from_array = slot_map(
            &json!([{"label": "⑤", "reason": "e"}, {"label": "②", "comment": "b"}]),
            OPTION_REASON,
        );
        assert_eq!(from_array.len(), 2);
        assert_eq!(from_array.get(&4).map(String::as_str), Some("e"));
    }

    #[test]
    fn test_resolve_reads_notes_and_corrections() {
        let candidate = json!({
            "question": "q",
            "choices": ["a", "b"],
            "answer": "2",
            "notes": {"targetExpression": "the long run", "family": "C-3"},
            "correction": {"label": "④", "original": "decrease", "replacement": "increase"},
            "grammarPoint": "tense"
        });
        let fields = CandidateFields::resolve(ItemType::Blank, &candidate).unwrap();
        assert_eq!(fields.options.len(), 2);
        assert_eq!(fields.answer, vec![1]);
        assert_eq!(fields.target_expression.as_deref(), Some("the long run"));
        assert_eq!(fields.family.as_deref(), Some("C-3"));
        assert_eq!(fields.corrections[0].marker.as_deref(), Some("④"));
        assert_eq!(fields.passthrough["grammarPoint"], "tense");

        assert!(CandidateFields::resolve(ItemType::Blank, &json!([1, 2])).is_err());
    }
}
