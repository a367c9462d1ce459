//! Cloze items: one expression of the original passage is replaced by a
//! placeholder and the learner picks the English phrase that fits.

use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;

use crate::contracts::fields::{by_marker, CandidateFields, RawOption};
use crate::contracts::options::{assign_slots, attach_candidate_maps, flagged_answers, slots_with_status};
use crate::contracts::{check_explanation, ContractError, ValidationContext};
use crate::items::model::{Item, ItemMetadata, ItemType, OptionStatus, TargetSpan};
use crate::items::text::{
    char_len, count_sentences, count_words, has_digit, is_english_phrase, marker,
    normalize_whitespace, question_key, spell_out_digits, straighten_quotes, strip_tags,
};
use crate::locator::SegmentLocator;

pub const GENERAL_QUESTION: &str = "다음 빈칸에 들어갈 말로 가장 적절한 것은?";
pub const DEFINITION_QUESTION: &str = "다음 글의 빈칸에 들어갈 단어의 영어 풀이로 가장 적절한 것은?";
pub const PLACEHOLDER: &str = "____";

pub const FAMILIES: [&str; 4] = ["C-1", "C-2", "C-3", "C-4"];
const DEFINITION_FAMILY: &str = "C-2";
pub const STRATEGIES: [&str; 4] = ["paraphrasing", "compression", "generalization", "minimal-change"];
const DEFAULT_STRATEGY: &str = "paraphrasing";

const MIN_PASSAGE_CHARS: usize = 150;
const MIN_SENTENCES: usize = 2;
const MIN_OPTION_WORDS: usize = 3;
const MAX_OPTION_WORDS: usize = 18;
/// Cached passages shorter than the recorded original by more than this are truncated.
const TRUNCATION_TOLERANCE: usize = 80;

const KIND: ItemType = ItemType::Blank;

fn noun_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:to\s+|[a-z]+ing\b)").expect("noun phrase regex"))
}

/// Option text as stored: straight quotes, digits spelled out, collapsed spaces.
fn clean_option(text: &str) -> String {
    normalize_whitespace(&spell_out_digits(&straighten_quotes(&strip_tags(text))))
}

fn check_option(slot: usize, text: &str) -> Result<(), ContractError> {
    if text.is_empty() {
        return Err(ContractError::option(KIND, slot, "missing text"));
    }
    if has_digit(text) {
        return Err(ContractError::option(KIND, slot, "must not contain numerals"));
    }
    if !is_english_phrase(text) {
        return Err(ContractError::option(KIND, slot, "must be an English phrase"));
    }
    let words = count_words(text);
    if !(MIN_OPTION_WORDS..=MAX_OPTION_WORDS).contains(&words) {
        return Err(ContractError::option(
            KIND,
            slot,
            format!("must be {MIN_OPTION_WORDS}-{MAX_OPTION_WORDS} words (found {words})"),
        ));
    }
    if noun_phrase_re().is_match(text) {
        return Err(ContractError::option(KIND, slot, "must start with a noun phrase"));
    }
    Ok(())
}

fn check_passage(passage: &str) -> Result<(), ContractError> {
    let placeholders = passage.matches(PLACEHOLDER).count();
    if placeholders != 1 {
        return Err(ContractError::passage(
            KIND,
            format!("placeholder count must be 1 (found {placeholders})"),
        ));
    }
    let chars = char_len(passage);
    if chars < MIN_PASSAGE_CHARS {
        return Err(ContractError::passage(
            KIND,
            format!("text too short ({chars} chars, minimum {MIN_PASSAGE_CHARS})"),
        ));
    }
    if count_sentences(passage) < MIN_SENTENCES {
        return Err(ContractError::passage(
            KIND,
            format!("needs at least {MIN_SENTENCES} sentences"),
        ));
    }
    Ok(())
}

fn resolve_question(fields: &CandidateFields) -> Result<(&'static str, bool), ContractError> {
    let key = fields
        .question
        .as_deref()
        .map(question_key)
        .unwrap_or_else(|| question_key(GENERAL_QUESTION));
    if key == question_key(GENERAL_QUESTION) {
        Ok((GENERAL_QUESTION, false))
    } else if key == question_key(DEFINITION_QUESTION) {
        Ok((DEFINITION_QUESTION, true))
    } else {
        Err(ContractError::UnexpectedQuestion(KIND))
    }
}

fn resolve_family(fields: &CandidateFields, is_definition: bool) -> Result<String, ContractError> {
    let family = match &fields.family {
        Some(raw) => {
            let family = raw.trim().to_ascii_uppercase();
            if !FAMILIES.contains(&family.as_str()) {
                return Err(ContractError::rule(KIND, format!("invalid blank family {raw}")));
            }
            family
        }
        None if is_definition => DEFINITION_FAMILY.to_string(),
        None => FAMILIES[0].to_string(),
    };
    if (family == DEFINITION_FAMILY) != is_definition {
        return Err(ContractError::rule(KIND, "question-family mismatch"));
    }
    Ok(family)
}

fn resolve_strategy(fields: &CandidateFields) -> Result<String, ContractError> {
    match &fields.strategy {
        Some(raw) => {
            let strategy = raw.trim().to_ascii_lowercase().replace([' ', '_'], "-");
            if STRATEGIES.contains(&strategy.as_str()) {
                Ok(strategy)
            } else {
                Err(ContractError::rule(KIND, format!("invalid blank strategy {raw}")))
            }
        }
        None => Ok(DEFAULT_STRATEGY.to_string()),
    }
}

fn resolve_answer(
    fields: &CandidateFields,
    options: &[RawOption],
    bodies: &[String],
) -> Result<usize, ContractError> {
    let flagged = flagged_answers(options);
    match flagged.as_slice() {
        [slot] => return Ok(*slot),
        [] => {}
        _ => return Err(ContractError::answer(KIND, "must name exactly one option")),
    }
    if let [slot] = slots_with_status(options, OptionStatus::Correct).as_slice() {
        return Ok(*slot);
    }
    let target = fields.target_expression.as_deref().map(clean_option);
    target
        .and_then(|t| bodies.iter().position(|b| b.eq_ignore_ascii_case(&t)))
        .ok_or_else(|| ContractError::answer(KIND, "could not be resolved"))
}

/// Target candidates in priority order: the declared char span of the
/// original passage, then the declared expression, or the correct option when
/// no expression was declared.
fn target_candidates(fields: &CandidateFields, answer_text: &str, original: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some((start, end)) = fields.target_span {
        let slice: String = original.chars().skip(start).take(end - start).collect();
        if !slice.trim().is_empty() {
            candidates.push(slice);
        }
    }
    match &fields.target_expression {
        Some(target) => candidates.push(target.clone()),
        None => candidates.push(answer_text.to_string()),
    }
    candidates
}

pub fn normalize<R: Rng + ?Sized>(
    fields: &CandidateFields,
    ctx: &ValidationContext<'_>,
    rng: &mut R,
) -> Result<Item, ContractError> {
    let (question, is_definition) = resolve_question(fields)?;
    let family = resolve_family(fields, is_definition)?;
    let strategy = resolve_strategy(fields)?;

    let original = normalize_whitespace(&strip_tags(ctx.passage));
    if original.is_empty() {
        return Err(ContractError::passage(KIND, "requires original passage context"));
    }
    if original.contains(PLACEHOLDER) {
        return Err(ContractError::passage(KIND, "original already contains a placeholder"));
    }

    let mut options = assign_slots(KIND, &fields.options)?;
    attach_candidate_maps(&mut options, fields);
    let bodies: Vec<String> = options.iter().map(|o| clean_option(&o.text)).collect();
    for (slot, body) in bodies.iter().enumerate() {
        check_option(slot, body)?;
    }
    let unique: std::collections::HashSet<String> =
        bodies.iter().map(|b| b.to_lowercase()).collect();
    if unique.len() != bodies.len() {
        return Err(ContractError::DuplicateOption(KIND));
    }
    let answer = resolve_answer(fields, &options, &bodies)?;

    let mut locator = SegmentLocator::new(&original);
    let span = target_candidates(fields, &bodies[answer], ctx.passage)
        .iter()
        .find_map(|candidate| locator.locate(candidate).ok())
        .ok_or_else(|| ContractError::rule(KIND, "target expression not found in original passage"))?;
    let target_expression = original[span.start..span.end].to_string();
    let passage = format!(
        "{}{PLACEHOLDER}{}",
        &original[..span.start],
        &original[span.end..]
    );
    check_passage(&passage)?;

    let explanation = fields.explanation.clone().unwrap_or_default();
    check_explanation(KIND, &explanation, 1, 0)?;

    let tags = options
        .iter()
        .enumerate()
        .filter_map(|(slot, o)| Some((slot, o.tag.clone()?)))
        .collect();
    let reasons = options
        .iter()
        .enumerate()
        .filter(|(slot, _)| *slot != answer)
        .filter_map(|(slot, o)| Some((slot, o.reason.clone()?)))
        .collect();

    let metadata = ItemMetadata {
        target_expression: Some(target_expression),
        target_span: Some(TargetSpan {
            start: span.start,
            end: span.end,
        }),
        blank_family: Some(family),
        blank_strategy: Some(strategy),
        original_passage_length: Some(char_len(&original)),
        original_sentence_count: Some(count_sentences(&original)),
        option_tags: by_marker(&tags),
        option_reasons: by_marker(&reasons),
        ..ItemMetadata::default()
    };

    let mut item = Item {
        id: None,
        item_type: KIND,
        question: question.to_string(),
        passage,
        options: bodies
            .iter()
            .enumerate()
            .map(|(slot, body)| format!("{} {body}", marker(slot).unwrap_or_default()))
            .collect(),
        answer: vec![answer as u8 + 1],
        explanation: explanation.trim().to_string(),
        difficulty: "advanced".to_string(),
        source_label: String::new(),
        is_active: true,
        metadata,
        exposure: None,
    };
    item.shuffle_options(rng);
    Ok(item)
}

/// Contract re-check for stored cloze items.
pub fn check(item: &Item) -> Result<(), ContractError> {
    let key = question_key(&item.question);
    if key != question_key(GENERAL_QUESTION) && key != question_key(DEFINITION_QUESTION) {
        return Err(ContractError::UnexpectedQuestion(KIND));
    }
    check_passage(&item.passage)?;
    if let Some(original) = item.metadata.original_passage_length {
        let current = char_len(&item.passage);
        if current + TRUNCATION_TOLERANCE < original {
            return Err(ContractError::passage(KIND, "truncated"));
        }
    }
    for slot in 0..item.options.len() {
        check_option(slot, item.option_body(slot).unwrap_or_default())?;
    }
    check_explanation(KIND, &item.explanation, 1, 0)
}
