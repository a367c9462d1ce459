//! Vocabulary-in-context items: five underlined expressions, one of which is
//! misused (or, in correct mode, the only one used appropriately).

use std::collections::{BTreeMap, HashSet};

use crate::contracts::emphasized::{appears_in, arrange, render_options};
use crate::contracts::fields::{by_marker, CandidateFields};
use crate::contracts::options::{assign_slots, attach_candidate_maps, flagged_answers, slots_with_status};
use crate::contracts::{check_explanation, AnswerMode, ContractError, ValidationContext};
use crate::items::emphasis::{has_inline_markers, strip_emphasis, underlined_segments};
use crate::items::model::{Item, ItemMetadata, ItemType, OptionStatus, OPTION_COUNT};
use crate::items::text::{
    char_len, count_sentences, count_words, marker, normalize_whitespace, question_key, strip_tags,
};

pub const BASE_QUESTION: &str = "다음 글의 밑줄 친 부분 중, 문맥상 낱말의 쓰임이 적절하지 않은 것은?";
pub const CORRECT_QUESTION: &str = "다음 글의 밑줄 친 부분 중, 문맥상 낱말의 쓰임이 적절한 것은?";
const INCORRECT_VARIANTS: &[&str] = &[
    BASE_QUESTION,
    "다음 글의 밑줄 친 ①~⑤ 중 문맥상 낱말의 쓰임이 적절하지 않은 것은?",
];
const CORRECT_VARIANTS: &[&str] = &[
    CORRECT_QUESTION,
    "다음 글의 밑줄 친 부분 중, 문맥상 낱말의 쓰임이 적절한 것을 고르시오.",
];

const MIN_EXPLANATION_CHARS: usize = 150;
const MIN_EXPLANATION_SENTENCES: usize = 3;
const MIN_OPTION_WORDS: usize = 2;
const MAX_OPTION_WORDS: usize = 14;
const TRUNCATION_TOLERANCE: usize = 60;

const KIND: ItemType = ItemType::Vocabulary;

fn matches_any(key: &str, variants: &[&str]) -> bool {
    variants.iter().any(|v| question_key(v) == key)
}

fn resolve_mode(
    fields: &CandidateFields,
    ctx: &ValidationContext<'_>,
) -> Result<(AnswerMode, &'static str), ContractError> {
    let inferred = match fields.question.as_deref().map(question_key) {
        None => ctx.answer_mode.unwrap_or_default(),
        Some(key) if matches_any(&key, INCORRECT_VARIANTS) => AnswerMode::Incorrect,
        Some(key) if matches_any(&key, CORRECT_VARIANTS) => AnswerMode::Correct,
        Some(_) => return Err(ContractError::UnexpectedQuestion(KIND)),
    };
    if ctx.answer_mode.is_some_and(|forced| forced != inferred) {
        return Err(ContractError::UnexpectedQuestion(KIND));
    }
    let question = match inferred {
        AnswerMode::Incorrect => BASE_QUESTION,
        AnswerMode::Correct => CORRECT_QUESTION,
    };
    Ok((inferred, question))
}

fn check_segments(segments: &[String]) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (slot, segment) in segments.iter().enumerate() {
        let words = count_words(segment);
        if !(MIN_OPTION_WORDS..=MAX_OPTION_WORDS).contains(&words) {
            return Err(ContractError::option(
                KIND,
                slot,
                format!("must be {MIN_OPTION_WORDS}-{MAX_OPTION_WORDS} words (found {words})"),
            ));
        }
        if !seen.insert(segment.to_lowercase()) {
            return Err(ContractError::DuplicateOption(KIND));
        }
    }
    Ok(())
}

fn check_not_truncated(passage: &str, original_chars: usize) -> Result<(), ContractError> {
    let current = char_len(&normalize_whitespace(&strip_emphasis(passage)));
    if current + TRUNCATION_TOLERANCE < original_chars {
        return Err(ContractError::passage(
            KIND,
            format!("truncated ({current} chars, original {original_chars})"),
        ));
    }
    Ok(())
}

pub fn normalize(
    fields: &CandidateFields,
    ctx: &ValidationContext<'_>,
) -> Result<Item, ContractError> {
    let (mode, question) = resolve_mode(fields, ctx)?;
    let original = normalize_whitespace(&strip_tags(ctx.passage));
    let passage = fields
        .passage
        .clone()
        .or_else(|| (!ctx.passage.trim().is_empty()).then(|| ctx.passage.to_string()))
        .ok_or_else(|| ContractError::passage(KIND, "missing"))?;

    let mut options = assign_slots(KIND, &fields.options)?;
    attach_candidate_maps(&mut options, fields);
    let arranged = arrange(KIND, &passage, options)?;
    if !original.is_empty() {
        check_not_truncated(&arranged.passage, char_len(&original))?;
    }
    check_segments(&arranged.segments)?;

    let target_status = match mode {
        AnswerMode::Incorrect => OptionStatus::Incorrect,
        AnswerMode::Correct => OptionStatus::Correct,
    };
    let flagged = flagged_answers(&arranged.options);
    let by_status = slots_with_status(&arranged.options, target_status);
    if !flagged.is_empty() && !by_status.is_empty() && flagged != by_status {
        return Err(ContractError::answer(KIND, "conflicts with option statuses"));
    }
    let answers = if flagged.is_empty() { by_status } else { flagged };
    if answers.len() != 1 {
        return Err(ContractError::answer(
            KIND,
            format!("count mismatch (expected 1, found {})", answers.len()),
        ));
    }
    let answer = answers[0];

    let misused = |slot: usize| match mode {
        AnswerMode::Incorrect => slot == answer,
        AnswerMode::Correct => slot != answer,
    };
    if ctx.enforce_original && !original.is_empty() {
        for (slot, segment) in arranged.segments.iter().enumerate() {
            let in_original = appears_in(&original, segment);
            let glyph = marker(slot).unwrap_or_default();
            if misused(slot) && in_original {
                return Err(ContractError::rule(
                    KIND,
                    format!("incorrect segment unchanged from original ({glyph})"),
                ));
            }
            if !misused(slot) && !in_original {
                return Err(ContractError::rule(
                    KIND,
                    format!("correct segment diverges from original ({glyph})"),
                ));
            }
        }
    }

    let explanation = fields.explanation.clone().unwrap_or_default();
    check_explanation(KIND, &explanation, MIN_EXPLANATION_CHARS, MIN_EXPLANATION_SENTENCES)?;

    if arranged.options[answer].reason.is_none() {
        return Err(ContractError::reasons(
            KIND,
            format!("missing for answer option {}", marker(answer).unwrap_or_default()),
        ));
    }

    let reasons: BTreeMap<usize, String> = arranged
        .options
        .iter()
        .enumerate()
        .filter_map(|(slot, o)| Some((slot, o.reason.clone()?)))
        .collect();
    let tags: BTreeMap<usize, String> = arranged
        .options
        .iter()
        .enumerate()
        .filter_map(|(slot, o)| Some((slot, o.tag.clone()?)))
        .collect();
    let statuses = (0..OPTION_COUNT)
        .map(|slot| {
            if misused(slot) {
                OptionStatus::Incorrect
            } else {
                OptionStatus::Correct
            }
        })
        .collect();

    let metadata = ItemMetadata {
        option_reasons: by_marker(&reasons),
        option_tags: by_marker(&tags),
        option_statuses: Some(statuses),
        corrections: fields.corrections.clone(),
        original_passage_length: (!original.is_empty()).then(|| char_len(&original)),
        original_sentence_count: (!original.is_empty()).then(|| count_sentences(&original)),
        ..ItemMetadata::default()
    };

    Ok(Item {
        id: None,
        item_type: KIND,
        question: question.to_string(),
        passage: arranged.passage,
        options: render_options(&arranged.options),
        answer: vec![answer as u8 + 1],
        explanation: explanation.trim().to_string(),
        difficulty: "advanced".to_string(),
        source_label: String::new(),
        is_active: true,
        metadata,
        exposure: None,
    })
}

/// Contract re-check for stored vocabulary items.
pub fn check(item: &Item) -> Result<(), ContractError> {
    let key = question_key(&item.question);
    if !matches_any(&key, INCORRECT_VARIANTS) && !matches_any(&key, CORRECT_VARIANTS) {
        return Err(ContractError::UnexpectedQuestion(KIND));
    }
    let spans = underlined_segments(&item.passage);
    if spans.len() != OPTION_COUNT || !has_inline_markers(&item.passage) {
        return Err(ContractError::passage(
            KIND,
            format!("underline count mismatch (found {})", spans.len()),
        ));
    }
    let option_segments: Vec<String> = (0..OPTION_COUNT)
        .map(|slot| {
            underlined_segments(item.option_body(slot).unwrap_or_default())
                .into_iter()
                .next()
                .unwrap_or_default()
        })
        .collect();
    if spans
        .iter()
        .zip(&option_segments)
        .any(|(span, option)| !span.eq_ignore_ascii_case(option))
    {
        return Err(ContractError::rule(KIND, "option underline mismatch"));
    }
    check_segments(&option_segments)?;
    if let Some(original) = item.metadata.original_passage_length {
        check_not_truncated(&item.passage, original)?;
    }
    check_explanation(
        KIND,
        &item.explanation,
        MIN_EXPLANATION_CHARS,
        MIN_EXPLANATION_SENTENCES,
    )?;
    for answer in &item.answer {
        let glyph = marker(*answer as usize - 1).unwrap_or_default();
        if !item.metadata.option_reasons.contains_key(glyph) {
            return Err(ContractError::reasons(
                KIND,
                format!("missing for answer option {glyph}"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{check_item, normalize as normalize_candidate};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::{json, Value};

    const ORIGINAL: &str = "Early humans learned to preserve food long before refrigeration existed. \
        They dried meat in the sun, packed fish in salt, and stored grain in cool caves. \
        These methods slowed the growth of bacteria and allowed communities to survive \
        harsh winters. Over time, such practices spread across continents and shaped \
        regional cuisines that we still enjoy today.";

    fn explanation() -> String {
        "③의 accelerated the growth는 문맥상 적절하지 않습니다. 건조와 염장은 세균의 증식을 늦추는 방법이므로 \
         slowed the growth가 되어야 글의 흐름과 맞습니다. 나머지 밑줄 친 표현은 모두 음식 보존의 역사라는 \
         글의 주제와 자연스럽게 어울립니다. 따라서 정답은 ③입니다."
            .to_string()
    }

    fn candidate() -> Value {
        let passage = ORIGINAL.replace("slowed the growth", "accelerated the growth");
        json!({
            "question": BASE_QUESTION,
            "passage": passage,
            "options": [
                {"label": "①", "text": "preserve food"},
                {"label": "②", "text": "dried meat"},
                {"label": "③", "text": "accelerated the growth", "status": "incorrect",
                 "reason": "세균 증식을 늦춘다는 흐름과 반대됩니다."},
                {"label": "④", "text": "survive harsh winters"},
                {"label": "⑤", "text": "regional cuisines"}
            ],
            "correctAnswer": 3,
            "explanation": explanation(),
            "corrections": [{"label": "③", "original": "accelerated", "replacement": "slowed"}]
        })
    }

    fn run(candidate: &Value) -> Result<Item, ContractError> {
        let ctx = ValidationContext::new(ORIGINAL);
        normalize_candidate(ItemType::Vocabulary, candidate, &ctx, &mut StdRng::seed_from_u64(2))
    }

    #[test]
    fn test_spans_are_rebuilt_from_plain_options() {
        let item = run(&candidate()).unwrap();
        assert_eq!(underlined_segments(&item.passage).len(), 5);
        assert!(item.passage.contains("③<u>accelerated the growth</u>"));
        assert_eq!(item.options[2], "③ <u>accelerated the growth</u>");
        assert_eq!(item.answer, vec![3]);
        assert_eq!(item.metadata.corrections[0].replacement, "slowed");
        assert!(check_item(&item).is_ok());
    }

    #[test]
    fn test_unchanged_misused_span_fails() {
        let mut c = candidate();
        c["passage"] = json!(ORIGINAL);
        c["options"][2]["text"] = json!("slowed the growth");
        assert!(run(&c)
            .unwrap_err()
            .to_string()
            .contains("incorrect segment unchanged from original"));
    }

    #[test]
    fn test_truncated_passage_fails() {
        let mut c = candidate();
        c["passage"] = json!(
            "Early humans learned to preserve food. They dried meat and accelerated the growth \
             so they could survive harsh winters with regional cuisines."
        );
        assert!(run(&c).unwrap_err().to_string().contains("truncated"));
    }

    #[test]
    fn test_single_word_spans_are_too_short() {
        let mut c = candidate();
        c["options"][1]["text"] = json!("meat");
        assert_eq!(
            run(&c).unwrap_err().to_string(),
            "vocabulary option 2 must be 2-14 words (found 1)"
        );
    }

    #[test]
    fn test_answer_needs_rationale() {
        let mut c = candidate();
        c["options"][2]
            .as_object_mut()
            .unwrap()
            .remove("reason");
        assert!(run(&c)
            .unwrap_err()
            .to_string()
            .contains("option reasons missing for answer option ③"));
    }

    #[test]
    fn test_correct_mode_question_is_inferred() {
        let mut c = candidate();
        c["question"] = json!(CORRECT_QUESTION);
        // In correct mode the single answer must be the faithful span; here the
        // other four are copied from the original, so validation rejects it.
        assert!(run(&c).is_err());
    }
}
