#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::exposure::ExposureRecord;
use crate::items::text::{marker, normalize_whitespace, strip_leading_marker, strip_tags};

pub const OPTION_COUNT: usize = 5;

// ────────────────────────────────────────────────────────────────────────────
// Item type
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Blank,
    Vocabulary,
    Grammar,
    GrammarMulti,
    Title,
    #[serde(alias = "theme")]
    Topic,
}

impl ItemType {
    pub const ALL: [ItemType; 6] = [
        ItemType::Blank,
        ItemType::Vocabulary,
        ItemType::Grammar,
        ItemType::GrammarMulti,
        ItemType::Title,
        ItemType::Topic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Blank => "blank",
            ItemType::Vocabulary => "vocabulary",
            ItemType::Grammar => "grammar",
            ItemType::GrammarMulti => "grammar_multi",
            ItemType::Title => "title",
            ItemType::Topic => "topic",
        }
    }

    /// Parses a stored or requested type tag. `theme` is a legacy alias of `topic`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "blank" => Some(ItemType::Blank),
            "vocabulary" => Some(ItemType::Vocabulary),
            "grammar" => Some(ItemType::Grammar),
            "grammar_multi" => Some(ItemType::GrammarMulti),
            "title" => Some(ItemType::Title),
            "topic" | "theme" => Some(ItemType::Topic),
            _ => None,
        }
    }

    /// Types whose passage carries five underlined spans matching the options.
    pub fn uses_emphasis(&self) -> bool {
        matches!(
            self,
            ItemType::Vocabulary | ItemType::Grammar | ItemType::GrammarMulti
        )
    }

    pub fn is_multi_answer(&self) -> bool {
        matches!(self, ItemType::GrammarMulti)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Metadata
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionStatus {
    Correct,
    Incorrect,
}

/// Who produced an item. Rows carrying any other tag are never served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratorTag {
    Model,
    ModelPreview,
    Fallback,
}

/// Byte range of the target expression inside the original passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub baseline: String,
    pub has_baseline: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retirement {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Item metadata. Keys not modelled here survive a load/save cycle in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_tag: Option<String>,
    /// Per-option defect tags keyed by ordinal marker.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub option_tags: BTreeMap<String, String>,
    /// Per-option rationales keyed by ordinal marker.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub option_reasons: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_statuses: Option<Vec<OptionStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_span: Option<TargetSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blank_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blank_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_passage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_passage_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_sentence_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections: Vec<Correction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired: Option<Retirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_by: Option<Uuid>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ────────────────────────────────────────────────────────────────────────────
// Item
// ────────────────────────────────────────────────────────────────────────────

/// A canonical five-option item.
///
/// `answer` holds 1-based option indices, sorted and unique. Single-answer
/// types carry exactly one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub question: String,
    pub passage: String,
    pub options: Vec<String>,
    pub answer: Vec<u8>,
    pub explanation: String,
    pub difficulty: String,
    pub source_label: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub metadata: ItemMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<ExposureRecord>,
}

fn default_active() -> bool {
    true
}

impl Item {
    /// First answer index (1-based).
    pub fn primary_answer(&self) -> Option<u8> {
        self.answer.first().copied()
    }

    /// Comma-joined answer as stored, e.g. `"2"` or `"2,4"`.
    pub fn answer_string(&self) -> String {
        self.answer
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Option text without its ordinal marker.
    pub fn option_body(&self, slot: usize) -> Option<&str> {
        self.options.get(slot).map(|o| strip_leading_marker(o))
    }

    /// Structural checks shared by every item type.
    pub fn has_valid_shape(&self) -> bool {
        if self.options.len() != OPTION_COUNT || self.question.trim().is_empty() {
            return false;
        }
        let markers_ok = self.options.iter().enumerate().all(|(slot, option)| {
            marker(slot).is_some_and(|m| option.starts_with(m))
                && !strip_leading_marker(option).trim().is_empty()
        });
        let answers_ok = !self.answer.is_empty()
            && self.answer.iter().all(|a| (1..=OPTION_COUNT as u8).contains(a))
            && self.answer.windows(2).all(|w| w[0] < w[1]);
        let count_ok = if self.item_type.is_multi_answer() {
            self.answer.len() >= 2
        } else {
            self.answer.len() == 1
        };
        markers_ok && answers_ok && count_ok
    }

    /// Shuffles the option order, recomputing the answer and per-option
    /// metadata in the same step. Emphasis types keep passage order and are left as is.
    pub fn shuffle_options<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.item_type.uses_emphasis() || self.options.len() != OPTION_COUNT {
            return;
        }
        let mut order: Vec<usize> = (0..OPTION_COUNT).collect();
        order.shuffle(rng);
        self.apply_order(&order);
    }

    /// Reorders options so that new slot `i` holds old slot `order[i]`.
    pub fn apply_order(&mut self, order: &[usize]) {
        if order.len() != self.options.len() {
            return;
        }
        let bodies: Vec<String> = order
            .iter()
            .map(|&old| strip_leading_marker(&self.options[old]).to_string())
            .collect();
        self.options = bodies
            .iter()
            .enumerate()
            .map(|(slot, body)| format!("{} {}", marker(slot).unwrap_or_default(), body))
            .collect();

        let new_slot_of = |old: usize| order.iter().position(|&o| o == old);
        let mut answer: Vec<u8> = self
            .answer
            .iter()
            .filter_map(|&a| new_slot_of(a as usize - 1).map(|s| s as u8 + 1))
            .collect();
        answer.sort_unstable();
        self.answer = answer;

        let remap = |map: &BTreeMap<String, String>| -> BTreeMap<String, String> {
            map.iter()
                .filter_map(|(key, value)| {
                    let old = crate::items::text::label_str_to_slot(key)?;
                    let new = new_slot_of(old)?;
                    Some((marker(new)?.to_string(), value.clone()))
                })
                .collect()
        };
        self.metadata.option_tags = remap(&self.metadata.option_tags);
        self.metadata.option_reasons = remap(&self.metadata.option_reasons);
        if let Some(statuses) = &self.metadata.option_statuses {
            if statuses.len() == order.len() {
                self.metadata.option_statuses =
                    Some(order.iter().map(|&old| statuses[old]).collect());
            }
        }
    }

    /// Normalized content key used to drop duplicates within a batch.
    pub fn content_signature(&self) -> String {
        let squash = |s: &str| normalize_whitespace(&strip_tags(s)).to_lowercase();
        let mut signature = format!("{}|{}", self.item_type, squash(&self.passage));
        for option in &self.options {
            signature.push('|');
            signature.push_str(&squash(strip_leading_marker(option)));
        }
        signature
    }
}

/// Parses a stored answer string (`"3"`, `"2,4"`, `"[1, 3]"`) into sorted 1-based indices.
pub fn parse_answer(raw: &str) -> Option<Vec<u8>> {
    let mut answers = Vec::new();
    for part in raw
        .trim_matches(|c| c == '[' || c == ']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
    {
        let value: u8 = part.trim().parse().ok()?;
        if !(1..=OPTION_COUNT as u8).contains(&value) {
            return None;
        }
        answers.push(value);
    }
    answers.sort_unstable();
    answers.dedup();
    if answers.is_empty() {
        None
    } else {
        Some(answers)
    }
}
