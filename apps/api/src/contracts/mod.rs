//! Item contracts: turn an arbitrary generated candidate into a canonical
//! [`Item`] or fail with a diagnostic that names the broken rule.
//!
//! Error messages carry keywords that the generation loop maps to correction
//! directives for the next attempt.

pub mod blank;
pub mod emphasized;
pub mod fields;
pub mod grammar;
pub mod headline;
pub mod options;
pub mod vocabulary;

use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::contracts::fields::CandidateFields;
use crate::items::model::{Item, ItemType};
use crate::items::source_label::{ensure_source_label, has_source_prefix};

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("{0} payload missing")]
    PayloadMissing(ItemType),

    #[error("unexpected {0} question")]
    UnexpectedQuestion(ItemType),

    #[error("{0} options missing")]
    OptionsMissing(ItemType),

    #[error("duplicate option labels detected")]
    DuplicateLabel,

    #[error("{0} options must contain 5 entries")]
    OptionCount(ItemType),

    #[error("{kind} option {slot} {rule}")]
    Option {
        kind: ItemType,
        slot: usize,
        rule: String,
    },

    #[error("{0} options must be unique")]
    DuplicateOption(ItemType),

    #[error("{kind} answer {rule}")]
    Answer { kind: ItemType, rule: String },

    #[error("{kind} explanation {rule}")]
    Explanation { kind: ItemType, rule: String },

    #[error("{kind} passage {rule}")]
    Passage { kind: ItemType, rule: String },

    #[error("{kind} option reasons {rule}")]
    Reasons { kind: ItemType, rule: String },

    #[error("{kind} {rule}")]
    Rule { kind: ItemType, rule: String },
}

impl ContractError {
    /// `slot` is zero-based; messages show it one-based.
    pub fn option(kind: ItemType, slot: usize, rule: impl Into<String>) -> Self {
        Self::Option {
            kind,
            slot: slot + 1,
            rule: rule.into(),
        }
    }

    pub fn answer(kind: ItemType, rule: impl Into<String>) -> Self {
        Self::Answer {
            kind,
            rule: rule.into(),
        }
    }

    pub fn explanation(kind: ItemType, rule: impl Into<String>) -> Self {
        Self::Explanation {
            kind,
            rule: rule.into(),
        }
    }

    pub fn passage(kind: ItemType, rule: impl Into<String>) -> Self {
        Self::Passage {
            kind,
            rule: rule.into(),
        }
    }

    pub fn reasons(kind: ItemType, rule: impl Into<String>) -> Self {
        Self::Reasons {
            kind,
            rule: rule.into(),
        }
    }

    pub fn rule(kind: ItemType, rule: impl Into<String>) -> Self {
        Self::Rule {
            kind,
            rule: rule.into(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validation context
// ────────────────────────────────────────────────────────────────────────────

/// Which spans a vocabulary item asks the learner to pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnswerMode {
    /// Pick the misused expression.
    #[default]
    Incorrect,
    /// Pick the expression used appropriately.
    Correct,
}

/// Everything a validator needs besides the candidate itself.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext<'a> {
    /// The untouched source passage.
    pub passage: &'a str,
    pub doc_title: Option<&'a str>,
    pub document_code: Option<&'a str>,
    /// Provenance label supplied by ingestion for this passage.
    pub source_label: Option<&'a str>,
    /// Slot (1-based) the single-answer grammar item should use.
    pub desired_answer: Option<u8>,
    pub variant_tag: Option<&'a str>,
    /// Forces the vocabulary answer mode instead of inferring it from the question.
    pub answer_mode: Option<AnswerMode>,
    /// Compare emphasised spans against the original passage.
    pub enforce_original: bool,
}

impl<'a> ValidationContext<'a> {
    pub fn new(passage: &'a str) -> Self {
        Self {
            passage,
            enforce_original: true,
            ..Self::default()
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Entry points
// ────────────────────────────────────────────────────────────────────────────

/// Validates a candidate and produces the canonical item for `kind`.
///
/// The RNG is only used to shuffle cloze options.
pub fn normalize<R: Rng + ?Sized>(
    kind: ItemType,
    candidate: &Value,
    ctx: &ValidationContext<'_>,
    rng: &mut R,
) -> Result<Item, ContractError> {
    let fields = CandidateFields::resolve(kind, candidate)?;
    let mut item = match kind {
        ItemType::Blank => blank::normalize(&fields, ctx, rng)?,
        ItemType::Vocabulary => vocabulary::normalize(&fields, ctx)?,
        ItemType::Grammar | ItemType::GrammarMulti => grammar::normalize(kind, &fields, ctx)?,
        ItemType::Title | ItemType::Topic => headline::normalize(kind, &fields, ctx)?,
    };

    item.source_label = ensure_source_label(
        fields.source_label.as_deref().or(ctx.source_label),
        ctx.doc_title,
    );
    let metadata = &mut item.metadata;
    metadata.source_label = Some(item.source_label.clone());
    metadata.document_title = ctx.doc_title.map(str::to_string);
    metadata.document_code = ctx.document_code.map(str::to_string);
    metadata.variant_tag = ctx
        .variant_tag
        .map(str::to_string)
        .or_else(|| fields.variant_tag.clone());
    if metadata.keywords.is_empty() {
        metadata.keywords = fields.keywords.clone();
    }
    for (key, value) in &fields.passthrough {
        metadata.extra.entry(key.clone()).or_insert(value.clone());
    }

    if !item.has_valid_shape() {
        return Err(ContractError::OptionCount(kind));
    }
    Ok(item)
}

/// Re-checks a stored item against its type's contract.
pub fn check_item(item: &Item) -> Result<(), ContractError> {
    let kind = item.item_type;
    if !item.has_valid_shape() {
        return Err(ContractError::OptionCount(kind));
    }
    if !has_source_prefix(&item.source_label) {
        return Err(ContractError::rule(kind, "source label missing prefix"));
    }
    match kind {
        ItemType::Blank => blank::check(item),
        ItemType::Vocabulary => vocabulary::check(item),
        ItemType::Grammar | ItemType::GrammarMulti => grammar::check(item),
        ItemType::Title | ItemType::Topic => headline::check(item),
    }
}

/// Acceptance predicate for cached items: anything that no longer satisfies
/// its contract is excluded from serving and export.
pub fn accept_cached(item: &Item) -> bool {
    match check_item(item) {
        Ok(()) => true,
        Err(e) => {
            debug!(item_id = ?item.id, "cached item rejected: {e}");
            false
        }
    }
}

/// Shared explanation rule: Korean text with minimum length and sentence count.
pub(crate) fn check_explanation(
    kind: ItemType,
    explanation: &str,
    min_chars: usize,
    min_sentences: usize,
) -> Result<(), ContractError> {
    use crate::items::text::{char_len, contains_hangul, count_sentences};

    if explanation.trim().is_empty() {
        return Err(ContractError::explanation(kind, "missing"));
    }
    if !contains_hangul(explanation) {
        return Err(ContractError::explanation(kind, "must be written in Korean"));
    }
    let chars = char_len(explanation.trim());
    if chars < min_chars {
        return Err(ContractError::explanation(
            kind,
            format!("too short ({chars} chars, minimum {min_chars})"),
        ));
    }
    if count_sentences(explanation) < min_sentences {
        return Err(ContractError::explanation(
            kind,
            format!("needs at least {min_sentences} sentences"),
        ));
    }
    Ok(())
}
