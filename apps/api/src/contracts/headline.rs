//! Title and topic items: pick the English heading that best fits the passage.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::contracts::fields::{by_marker, CandidateFields};
use crate::contracts::options::{assign_slots, attach_candidate_maps, flagged_answers, slots_with_status};
use crate::contracts::{check_explanation, ContractError, ValidationContext};
use crate::items::model::{Item, ItemMetadata, ItemType, OptionStatus};
use crate::items::text::{
    char_len, count_sentences, count_words, has_digit, marker, normalize_whitespace, question_key,
    straighten_quotes, strip_tags,
};

pub const TITLE_QUESTION: &str = "다음 글의 제목으로 가장 적절한 것은?";
pub const TOPIC_QUESTION: &str = "다음 글의 주제로 가장 적절한 것은?";
const TOPIC_VARIANTS: &[&str] = &[TOPIC_QUESTION, "다음 글의 주제로 가장 적절한 것을 고르시오."];

const MIN_OPTION_WORDS: usize = 6;
const MAX_OPTION_WORDS: usize = 14;
const MIN_TITLE_EXPLANATION_CHARS: usize = 70;
const MIN_TOPIC_EXPLANATION_CHARS: usize = 75;
const MIN_EXPLANATION_SENTENCES: usize = 2;

fn allowed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^[A-Za-z][A-Za-z\s.,'"()/:;&\-]*$"#).expect("headline regex"))
}

fn enumerator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:option\s+)?(?:[①②③④⑤]|\(?[1-5a-e][).:])\s*")
            .expect("enumerator regex")
    })
}

fn variants(kind: ItemType) -> &'static [&'static str] {
    match kind {
        ItemType::Topic => TOPIC_VARIANTS,
        _ => &[TITLE_QUESTION],
    }
}

fn min_explanation_chars(kind: ItemType) -> usize {
    match kind {
        ItemType::Topic => MIN_TOPIC_EXPLANATION_CHARS,
        _ => MIN_TITLE_EXPLANATION_CHARS,
    }
}

/// Straight quotes, no enumerator prefix, collapsed whitespace.
pub fn sanitize_option(text: &str) -> String {
    let cleaned = normalize_whitespace(&straighten_quotes(&strip_tags(text)));
    enumerator_re().replace(&cleaned, "").trim().to_string()
}

fn check_option(kind: ItemType, slot: usize, text: &str) -> Result<(), ContractError> {
    if text.is_empty() {
        return Err(ContractError::option(kind, slot, "missing text"));
    }
    if !text.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(ContractError::option(kind, slot, "must start with a letter"));
    }
    if has_digit(text) {
        return Err(ContractError::option(kind, slot, "must not contain numerals"));
    }
    if text.ends_with(['!', '?']) {
        return Err(ContractError::option(kind, slot, "must not end with ! or ?"));
    }
    if !allowed_re().is_match(text) {
        return Err(ContractError::option(kind, slot, "contains disallowed characters"));
    }
    let words = count_words(text);
    if !(MIN_OPTION_WORDS..=MAX_OPTION_WORDS).contains(&words) {
        return Err(ContractError::option(
            kind,
            slot,
            format!("must be {MIN_OPTION_WORDS}-{MAX_OPTION_WORDS} words (found {words})"),
        ));
    }
    Ok(())
}

fn check_options(kind: ItemType, bodies: &[String]) -> Result<(), ContractError> {
    for (slot, body) in bodies.iter().enumerate() {
        check_option(kind, slot, body)?;
    }
    let unique: HashSet<String> = bodies.iter().map(|b| b.to_lowercase()).collect();
    if unique.len() != bodies.len() {
        return Err(ContractError::DuplicateOption(kind));
    }
    Ok(())
}

pub fn normalize(
    kind: ItemType,
    fields: &CandidateFields,
    ctx: &ValidationContext<'_>,
) -> Result<Item, ContractError> {
    let canonical = variants(kind)[0];
    if let Some(raw) = &fields.question {
        let key = question_key(raw);
        if !variants(kind).iter().any(|v| question_key(v) == key) {
            return Err(ContractError::UnexpectedQuestion(kind));
        }
    }

    let passage = normalize_whitespace(ctx.passage);
    if passage.is_empty() {
        return Err(ContractError::passage(kind, "requires original passage context"));
    }

    let mut options = assign_slots(kind, &fields.options)?;
    attach_candidate_maps(&mut options, fields);
    let bodies: Vec<String> = options.iter().map(|o| sanitize_option(&o.text)).collect();
    check_options(kind, &bodies)?;

    if fields.answer.len() > 1 {
        return Err(ContractError::answer(kind, "must name exactly one option"));
    }
    let flagged = flagged_answers(&options);
    let answer = match flagged.as_slice() {
        [slot] => *slot,
        _ => match slots_with_status(&options, OptionStatus::Correct).as_slice() {
            [slot] => *slot,
            _ => return Err(ContractError::answer(kind, "invalid correctAnswer")),
        },
    };

    let explanation = fields.explanation.clone().unwrap_or_default();
    check_explanation(
        kind,
        &explanation,
        min_explanation_chars(kind),
        MIN_EXPLANATION_SENTENCES,
    )?;

    let tags: BTreeMap<usize, String> = options
        .iter()
        .enumerate()
        .filter(|(slot, _)| *slot != answer)
        .filter_map(|(slot, o)| Some((slot, o.tag.clone()?)))
        .collect();
    let reasons: BTreeMap<usize, String> = options
        .iter()
        .enumerate()
        .filter_map(|(slot, o)| Some((slot, o.reason.clone()?)))
        .collect();

    let metadata = ItemMetadata {
        option_tags: by_marker(&tags),
        option_reasons: by_marker(&reasons),
        original_passage_length: Some(char_len(&passage)),
        original_sentence_count: Some(count_sentences(&passage)),
        ..ItemMetadata::default()
    };

    Ok(Item {
        id: None,
        item_type: kind,
        question: canonical.to_string(),
        passage,
        options: bodies
            .iter()
            .enumerate()
            .map(|(slot, body)| format!("{} {body}", marker(slot).unwrap_or_default()))
            .collect(),
        answer: vec![answer as u8 + 1],
        explanation: explanation.trim().to_string(),
        difficulty: "intermediate".to_string(),
        source_label: String::new(),
        is_active: true,
        metadata,
        exposure: None,
    })
}

/// Contract re-check for stored title/topic items.
pub fn check(item: &Item) -> Result<(), ContractError> {
    let kind = item.item_type;
    let key = question_key(&item.question);
    if !variants(kind).iter().any(|v| question_key(v) == key) {
        return Err(ContractError::UnexpectedQuestion(kind));
    }
    let bodies: Vec<String> = (0..item.options.len())
        .map(|slot| sanitize_option(item.option_body(slot).unwrap_or_default()))
        .collect();
    check_options(kind, &bodies)?;
    check_explanation(
        kind,
        &item.explanation,
        min_explanation_chars(kind),
        MIN_EXPLANATION_SENTENCES,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{check_item, normalize as normalize_candidate};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::{json, Value};

    const PASSAGE: &str = "Cities that plant more trees see cooler summers, cleaner air and \
        calmer residents. Urban planners now treat green space as infrastructure rather than \
        decoration.";

    fn candidate() -> Value {
        json!({
            "question": "다음 글의 제목으로 가장 적절한 것은?",
            "options": [
                "① Why Trees Are Becoming Essential Urban Infrastructure",
                "② The Hidden Costs of Maintaining City Parks Every Year",
                "③ How Air Pollution Spreads Between Neighboring Countries Quickly",
                "④ A Brief History of Decorative Gardens in Europe",
                "⑤ Why Residents Prefer Quiet Suburbs Over Busy Cities"
            ],
            "correctAnswer": "①",
            "explanation": "글은 도시의 나무가 기온과 공기 질을 개선하여 녹지가 기반 시설로 취급된다고 설명합니다. \
                따라서 나무가 필수적인 도시 기반 시설이 되고 있다는 ①이 제목으로 가장 적절합니다.",
            "distractorTags": {"②": "off-focus", "③": "scope-shift", "④": "too-narrow", "⑤": "opposite"}
        })
    }

    fn run(kind: ItemType, candidate: &Value) -> Result<Item, ContractError> {
        let ctx = ValidationContext::new(PASSAGE);
        normalize_candidate(kind, candidate, &ctx, &mut StdRng::seed_from_u64(3))
    }

    #[test]
    fn test_title_candidate_normalizes() {
        let item = run(ItemType::Title, &candidate()).unwrap();
        assert_eq!(item.answer, vec![1]);
        assert_eq!(
            item.options[0],
            "① Why Trees Are Becoming Essential Urban Infrastructure"
        );
        assert_eq!(item.metadata.option_tags.len(), 4);
        assert_eq!(item.metadata.option_tags.get("⑤").unwrap(), "opposite");
        assert!(check_item(&item).is_ok());
    }

    #[test]
    fn test_enumerators_are_stripped() {
        assert_eq!(sanitize_option("Option B: Green Cities"), "Green Cities");
        assert_eq!(sanitize_option("3. Green Cities"), "Green Cities");
        assert_eq!(sanitize_option("(a) Green Cities"), "Green Cities");
        assert_eq!(sanitize_option("Apples and Oranges"), "Apples and Oranges");
    }

    #[test]
    fn test_option_rules() {
        let cases = [
            ("Trees in 2024 and the Cities That Need Them", "numerals"),
            ("Do Cities Really Need More Trees This Year?", "! or ?"),
            ("Trees", "6-14 words"),
            ("Trees, Cities — and the Air We Share Together", "disallowed"),
        ];
        for (text, keyword) in cases {
            let mut c = candidate();
            c["options"][3] = json!(text);
            let err = run(ItemType::Title, &c).unwrap_err().to_string();
            assert!(err.contains(keyword), "{text}: {err}");
        }
    }

    #[test]
    fn test_duplicate_options_fail() {
        let mut c = candidate();
        c["options"][4] = json!("why trees are becoming essential urban infrastructure");
        assert_eq!(
            run(ItemType::Title, &c).unwrap_err(),
            ContractError::DuplicateOption(ItemType::Title)
        );
    }

    #[test]
    fn test_invalid_answer() {
        let mut c = candidate();
        c["correctAnswer"] = json!("F");
        assert_eq!(
            run(ItemType::Title, &c).unwrap_err().to_string(),
            "title answer invalid correctAnswer"
        );
    }

    #[test]
    fn test_topic_accepts_theme_variant_question() {
        let mut c = candidate();
        c["question"] = json!("다음 글의 주제로 가장 적절한 것을 고르시오.");
        c["explanation"] = json!(
            "이 글은 도시에 나무를 심는 것이 여름 기온을 낮추고 공기를 깨끗하게 한다고 설명합니다. \
             그래서 도시 계획가들이 녹지를 장식이 아닌 기반 시설로 본다는 것이 글의 주제입니다."
        );
        let item = run(ItemType::Topic, &c).unwrap();
        assert_eq!(item.question, TOPIC_QUESTION);
        assert!(check_item(&item).is_ok());
        assert!(run(ItemType::Title, &c).is_err());
    }
}
