//! Grammar items: five underlined spans, one (or, for the multi variant,
//! several) of which is ungrammatical.

use std::collections::BTreeMap;

use crate::contracts::emphasized::{appears_in, arrange, render_options};
use crate::contracts::fields::{by_marker, CandidateFields};
use crate::contracts::options::{assign_slots, attach_candidate_maps, flagged_answers, slots_with_status};
use crate::contracts::{check_explanation, ContractError, ValidationContext};
use crate::items::emphasis::{has_inline_markers, strip_emphasis, underlined_segments};
use crate::items::model::{Item, ItemMetadata, ItemType, OptionStatus, OPTION_COUNT};
use crate::items::text::{
    char_len, contains_hangul, count_sentences, marker, normalize_whitespace, question_key,
    strip_tags,
};

pub const SINGLE_QUESTION: &str = "다음 글의 밑줄 친 부분 중, 어법상 틀린 것은?";
pub const MULTI_QUESTION: &str = "다음 글의 밑줄 친 부분 중, 어법상 틀린 것을 모두 고르시오.";

const MIN_EXPLANATION_CHARS: usize = 120;
const MIN_EXPLANATION_SENTENCES: usize = 3;
/// Looser thresholds applied when re-checking stored items.
const CACHED_MIN_EXPLANATION_CHARS: usize = 60;
const CACHED_MIN_EXPLANATION_SENTENCES: usize = 2;
const MIN_REASON_CHARS: usize = 6;
const TRUNCATION_TOLERANCE: usize = 60;
const MAX_MULTI_ANSWERS: usize = 4;

const ERROR_KEYWORDS: &[&str] = &[
    "오류", "틀리", "틀린", "잘못", "어긋", "일치하지", "수일치", "부적절", "비문법",
];
const CONFIRM_KEYWORDS: &[&str] = &["맞", "옳", "적절", "정상", "문법적", "알맞", "정답"];

fn question_for(kind: ItemType) -> &'static str {
    if kind.is_multi_answer() {
        MULTI_QUESTION
    } else {
        SINGLE_QUESTION
    }
}

fn check_reason(
    kind: ItemType,
    slot: usize,
    reason: Option<&str>,
    status: OptionStatus,
) -> Result<(), ContractError> {
    let glyph = marker(slot).unwrap_or_default();
    let reason = reason.map(str::trim).unwrap_or_default();
    if reason.is_empty() {
        return Err(ContractError::reasons(kind, format!("missing for option {glyph}")));
    }
    if !contains_hangul(reason) {
        return Err(ContractError::reasons(
            kind,
            format!("must be Korean for option {glyph}"),
        ));
    }
    if char_len(reason) < MIN_REASON_CHARS {
        return Err(ContractError::reasons(
            kind,
            format!("too short for option {glyph}"),
        ));
    }
    let keywords = match status {
        OptionStatus::Incorrect => ERROR_KEYWORDS,
        OptionStatus::Correct => CONFIRM_KEYWORDS,
    };
    if !keywords.iter().any(|k| reason.contains(k)) {
        let expectation = match status {
            OptionStatus::Incorrect => "must name the error",
            OptionStatus::Correct => "must confirm correctness",
        };
        return Err(ContractError::reasons(
            kind,
            format!("for option {glyph} {expectation}"),
        ));
    }
    Ok(())
}

fn check_not_truncated(
    kind: ItemType,
    passage: &str,
    original_chars: usize,
) -> Result<(), ContractError> {
    let current = char_len(&normalize_whitespace(&strip_emphasis(passage)));
    if current + TRUNCATION_TOLERANCE < original_chars {
        return Err(ContractError::passage(
            kind,
            format!("truncated ({current} chars, original {original_chars})"),
        ));
    }
    Ok(())
}

fn check_answer_count(kind: ItemType, count: usize) -> Result<(), ContractError> {
    let ok = if kind.is_multi_answer() {
        (2..=MAX_MULTI_ANSWERS).contains(&count)
    } else {
        count == 1
    };
    if ok {
        return Ok(());
    }
    let expected = if kind.is_multi_answer() {
        "2-4"
    } else {
        "1"
    };
    Err(ContractError::answer(
        kind,
        format!("count mismatch (expected {expected}, found {count})"),
    ))
}

pub fn normalize(
    kind: ItemType,
    fields: &CandidateFields,
    ctx: &ValidationContext<'_>,
) -> Result<Item, ContractError> {
    let question = question_for(kind);
    if let Some(raw) = &fields.question {
        if question_key(raw) != question_key(question) {
            return Err(ContractError::UnexpectedQuestion(kind));
        }
    }

    let original = normalize_whitespace(&strip_tags(ctx.passage));
    let passage = fields
        .passage
        .clone()
        .or_else(|| (!ctx.passage.trim().is_empty()).then(|| ctx.passage.to_string()))
        .ok_or_else(|| ContractError::passage(kind, "missing"))?;

    let mut options = assign_slots(kind, &fields.options)?;
    attach_candidate_maps(&mut options, fields);
    let arranged = arrange(kind, &passage, options)?;
    if !original.is_empty() {
        check_not_truncated(kind, &arranged.passage, char_len(&original))?;
    }

    let flagged = flagged_answers(&arranged.options);
    let by_status = slots_with_status(&arranged.options, OptionStatus::Incorrect);
    if !flagged.is_empty() && !by_status.is_empty() && flagged != by_status {
        return Err(ContractError::answer(kind, "conflicts with option statuses"));
    }
    let answers = if flagged.is_empty() { by_status } else { flagged };
    check_answer_count(kind, answers.len())?;

    if !kind.is_multi_answer() {
        if let Some(desired) = ctx.desired_answer {
            let Some(expected) = usize::from(desired).checked_sub(1).and_then(marker) else {
                return Err(ContractError::answer(
                    kind,
                    format!("requested slot {desired} is out of range"),
                ));
            };
            if answers[0] + 1 != usize::from(desired) {
                return Err(ContractError::answer(
                    kind,
                    format!(
                        "index mismatch (expected {expected}, got {})",
                        marker(answers[0]).unwrap_or_default()
                    ),
                ));
            }
        }
    }

    let statuses: Vec<OptionStatus> = (0..OPTION_COUNT)
        .map(|slot| {
            if answers.contains(&slot) {
                OptionStatus::Incorrect
            } else {
                OptionStatus::Correct
            }
        })
        .collect();

    if ctx.enforce_original && !original.is_empty() {
        for (slot, segment) in arranged.segments.iter().enumerate() {
            let glyph = marker(slot).unwrap_or_default();
            let in_original = appears_in(&original, segment);
            match statuses[slot] {
                OptionStatus::Incorrect if in_original => {
                    return Err(ContractError::rule(
                        kind,
                        format!("incorrect segment unchanged from original ({glyph})"),
                    ))
                }
                OptionStatus::Correct if !in_original => {
                    return Err(ContractError::rule(
                        kind,
                        format!("correct segment diverges from original ({glyph})"),
                    ))
                }
                _ => {}
            }
        }
    }

    for (slot, option) in arranged.options.iter().enumerate() {
        check_reason(kind, slot, option.reason.as_deref(), statuses[slot])?;
    }

    let explanation = fields.explanation.clone().unwrap_or_default();
    check_explanation(
        kind,
        &explanation,
        MIN_EXPLANATION_CHARS,
        MIN_EXPLANATION_SENTENCES,
    )?;

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

    let metadata = ItemMetadata {
        option_reasons: by_marker(&reasons),
        option_tags: by_marker(&tags),
        option_statuses: Some(statuses),
        original_passage_length: (!original.is_empty()).then(|| char_len(&original)),
        original_sentence_count: (!original.is_empty()).then(|| count_sentences(&original)),
        ..ItemMetadata::default()
    };

    Ok(Item {
        id: None,
        item_type: kind,
        question: question.to_string(),
        passage: arranged.passage,
        options: render_options(&arranged.options),
        answer: answers.iter().map(|slot| *slot as u8 + 1).collect(),
        explanation: explanation.trim().to_string(),
        difficulty: "advanced".to_string(),
        source_label: String::new(),
        is_active: true,
        metadata,
        exposure: None,
    })
}

/// Contract re-check for stored grammar items.
pub fn check(item: &Item) -> Result<(), ContractError> {
    let kind = item.item_type;
    if question_key(&item.question) != question_key(question_for(kind)) {
        return Err(ContractError::UnexpectedQuestion(kind));
    }
    let spans = underlined_segments(&item.passage);
    if spans.len() != OPTION_COUNT || !has_inline_markers(&item.passage) {
        return Err(ContractError::passage(
            kind,
            format!("underline count mismatch (found {})", spans.len()),
        ));
    }
    let mismatch = (0..OPTION_COUNT).any(|slot| {
        let option = item.option_body(slot).unwrap_or_default();
        underlined_segments(option).first() != spans.get(slot)
    });
    if mismatch {
        return Err(ContractError::rule(kind, "option underline mismatch"));
    }
    check_answer_count(kind, item.answer.len())?;
    check_explanation(
        kind,
        &item.explanation,
        CACHED_MIN_EXPLANATION_CHARS,
        CACHED_MIN_EXPLANATION_SENTENCES,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{check_item, normalize as normalize_candidate};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::{json, Value};

    const ORIGINAL: &str = "Scientists have long studied how migrating birds find their way. \
        Many species rely on the magnetic field of the earth, which they sense through special \
        cells. Young birds learn their routes by following older members of the flock. Some \
        even use the stars to guide them at night across entire oceans.";

    fn explanation() -> String {
        "③은 주어 they가 복수이므로 동사 sense가 되어야 하며 senses는 수일치 오류입니다. \
         나머지 밑줄 친 부분은 시제와 전치사, to부정사의 쓰임이 모두 어법상 적절합니다. \
         특히 by following은 전치사 뒤에 동명사가 온 올바른 형태이고 to guide는 목적을 나타냅니다. \
         따라서 어법상 틀린 것은 ③입니다."
            .to_string()
    }

    fn candidate() -> Value {
        let passage = ORIGINAL.replace("they sense", "they senses");
        json!({
            "question": SINGLE_QUESTION,
            "passage": passage,
            "options": [
                {"text": "have long studied", "status": "correct",
                 "reason": "현재완료 시제로 어법상 맞습니다."},
                {"text": "rely on", "status": "correct",
                 "reason": "자동사 rely 뒤 전치사 on이 적절합니다."},
                {"text": "they senses", "status": "incorrect",
                 "reason": "복수 주어와 수일치 오류가 있습니다."},
                {"text": "by following", "status": "correct",
                 "reason": "전치사 뒤 동명사로 옳은 형태입니다."},
                {"text": "to guide", "status": "correct",
                 "reason": "목적을 나타내는 to부정사로 적절합니다."}
            ],
            "correctAnswer": 3,
            "explanation": explanation(),
            "grammarPoint": "subject-verb agreement"
        })
    }

    fn run_with(candidate: &Value, ctx: &ValidationContext<'_>) -> Result<Item, ContractError> {
        normalize_candidate(ItemType::Grammar, candidate, ctx, &mut StdRng::seed_from_u64(4))
    }

    fn run(candidate: &Value) -> Result<Item, ContractError> {
        run_with(candidate, &ValidationContext::new(ORIGINAL))
    }

    #[test]
    fn test_plain_options_rebuild_five_marked_spans() {
        let item = run(&candidate()).unwrap();
        let spans = underlined_segments(&item.passage);
        assert_eq!(
            spans,
            vec!["have long studied", "rely on", "they senses", "by following", "to guide"]
        );
        for (slot, glyph) in ["①", "②", "③", "④", "⑤"].iter().enumerate() {
            assert!(item.passage.contains(&format!("{glyph}<u>{}</u>", spans[slot])));
        }
        assert_eq!(item.answer, vec![3]);
        assert_eq!(
            item.metadata.extra.get("grammarPoint").and_then(|v| v.as_str()),
            Some("subject-verb agreement")
        );
        assert!(check_item(&item).is_ok());
    }

    #[test]
    fn test_incorrect_span_identical_to_original_fails() {
        let mut c = candidate();
        c["passage"] = json!(ORIGINAL);
        c["options"][2]["text"] = json!("they sense");
        let err = run(&c).unwrap_err();
        assert_eq!(
            err.to_string(),
            "grammar incorrect segment unchanged from original (③)"
        );
    }

    #[test]
    fn test_desired_answer_slot_is_enforced() {
        let mut ctx = ValidationContext::new(ORIGINAL);
        ctx.desired_answer = Some(2);
        let err = run_with(&candidate(), &ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "grammar answer index mismatch (expected ②, got ③)"
        );
    }

    #[test]
    fn test_out_of_range_desired_answer_is_rejected() {
        let mut ctx = ValidationContext::new(ORIGINAL);
        for slot in [0, 6] {
            ctx.desired_answer = Some(slot);
            let err = run_with(&candidate(), &ctx).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("grammar answer requested slot {slot} is out of range")
            );
        }
    }

    #[test]
    fn test_reason_keywords_are_required() {
        let mut c = candidate();
        c["options"][2]["reason"] = json!("이 부분을 다시 살펴보세요.");
        assert!(run(&c)
            .unwrap_err()
            .to_string()
            .contains("option reasons for option ③ must name the error"));
    }

    #[test]
    fn test_status_conflict_is_rejected() {
        let mut c = candidate();
        c["correctAnswer"] = json!(2);
        assert_eq!(
            run(&c).unwrap_err().to_string(),
            "grammar answer conflicts with option statuses"
        );
    }

    #[test]
    fn test_short_explanation_fails() {
        let mut c = candidate();
        c["explanation"] = json!("③이 틀렸습니다.");
        assert!(run(&c)
            .unwrap_err()
            .to_string()
            .starts_with("grammar explanation too short"));
    }

    #[test]
    fn test_multi_requires_two_answers() {
        let mut c = candidate();
        c["question"] = json!(MULTI_QUESTION);
        let ctx = ValidationContext::new(ORIGINAL);
        let err = normalize_candidate(
            ItemType::GrammarMulti,
            &c,
            &ctx,
            &mut StdRng::seed_from_u64(4),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "grammar_multi answer count mismatch (expected 2-4, found 1)"
        );
    }

    #[test]
    fn test_wrong_question_is_rejected() {
        let mut c = candidate();
        c["question"] = json!("다음 글의 제목으로 가장 적절한 것은?");
        assert_eq!(
            run(&c).unwrap_err(),
            ContractError::UnexpectedQuestion(ItemType::Grammar)
        );
    }
}
