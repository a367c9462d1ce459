// All LLM prompt templates for item generation.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::contracts::{blank, grammar, headline, vocabulary};
use crate::generation::directives::DirectiveSet;
use crate::items::model::ItemType;
use crate::items::text::marker;
use crate::llm_client::prompts::FIDELITY_INSTRUCTION;

/// Item prompt template. Replace every `{x}` before sending.
pub const ITEM_PROMPT_TEMPLATE: &str = r#"Create one English reading item of type "{item_type}" for Korean high-school learners.

SOURCE: {doc_label}
VARIANT TAG: {variant_tag}

PASSAGE:
"""
{passage}
"""

AUTHORING MANUAL (excerpt):
{manual}

RULES:
{rules}
{fidelity}

Return a JSON object with this EXACT shape:
{blueprint}
{slot_hint}{directives}"#;

/// Repair prompt template. Replace every `{x}` before sending.
pub const REPAIR_PROMPT_TEMPLATE: &str = r#"The following output for a "{item_type}" item could not be used.

PROBLEM: {failure}

RAW OUTPUT:
"""
{raw}
"""

Rewrite it as one valid JSON object with this shape, keeping the original content:
{blueprint}"#;

const BLANK_BLUEPRINT: &str = r#"{
  "question": "{question}",
  "questionFamily": "C-1",
  "strategy": "paraphrasing",
  "targetExpression": "exact phrase copied from the passage",
  "options": [
    {"label": "①", "text": "english noun phrase", "fallacy": "opposite"},
    {"label": "②", "text": "english noun phrase", "fallacy": "too-narrow"},
    {"label": "③", "text": "english noun phrase (answer)"},
    {"label": "④", "text": "english noun phrase", "fallacy": "off-focus"},
    {"label": "⑤", "text": "english noun phrase", "fallacy": "scope-shift"}
  ],
  "correctAnswer": 3,
  "distractorReasons": {"①": "한국어 근거", "②": "한국어 근거", "④": "한국어 근거", "⑤": "한국어 근거"},
  "explanation": "한국어 해설",
  "sourceLabel": "출처│기관 시험명 연도 회차"
}"#;

const BLANK_RULES: &str = "\
- Pick one expression of 3-18 words from the passage as targetExpression; copy it exactly.
- Options are English noun phrases of 3-18 words with no digits; never start with \"to\" or an -ing word.
- The answer paraphrases the target expression; distractors are plausible but wrong.
- Allowed questionFamily values: C-1, C-2 (definition question only), C-3, C-4.
- Allowed strategy values: paraphrasing, compression, generalization, minimal-change.";

const VOCABULARY_BLUEPRINT: &str = r#"{
  "question": "{question}",
  "passage": "full passage with five <u>underlined</u> expressions",
  "options": [
    {"label": "①", "text": "underlined expression", "status": "correct"},
    {"label": "②", "text": "underlined expression", "status": "correct"},
    {"label": "③", "text": "underlined expression", "status": "incorrect", "reason": "한국어 근거"},
    {"label": "④", "text": "underlined expression", "status": "correct"},
    {"label": "⑤", "text": "underlined expression", "status": "correct"}
  ],
  "correctAnswer": 3,
  "corrections": [{"label": "③", "original": "word in the passage", "replacement": "fitting word"}],
  "explanation": "한국어 해설 (세 문장 이상)",
  "sourceLabel": "출처│기관 시험명 연도 회차"
}"#;

const VOCABULARY_RULES: &str = "\
- Underline exactly five expressions of 2-14 words with <u>...</u>; options repeat them in order.
- Replace exactly one expression with a contextually wrong word; keep the other four identical to the original.
- The answer option needs a Korean reason; the explanation is Korean, at least 150 characters and three sentences.";

const GRAMMAR_BLUEPRINT: &str = r#"{
  "question": "{question}",
  "passage": "full passage with five <u>underlined</u> segments",
  "options": [
    {"label": "①", "text": "segment", "status": "correct", "reason": "한국어 근거 (어법상 맞음)"},
    {"label": "②", "text": "segment", "status": "correct", "reason": "한국어 근거 (어법상 맞음)"},
    {"label": "③", "text": "segment", "status": "incorrect", "reason": "한국어 오류 설명 (수일치 오류)"},
    {"label": "④", "text": "segment", "status": "correct", "reason": "한국어 근거 (어법상 맞음)"},
    {"label": "⑤", "text": "segment", "status": "correct", "reason": "한국어 근거 (어법상 맞음)"}
  ],
  "correctAnswer": {answer},
  "explanation": "한국어 해설 (세 문장 이상)",
  "grammarPoint": "subject-verb agreement",
  "sourceLabel": "출처│기관 시험명 연도 회차"
}"#;

const GRAMMAR_RULES: &str = "\
- Underline exactly five segments with <u>...</u>; options repeat them in passage order.
- Introduce a grammar error into the answer segment(s) only; every other segment must match the original letter for letter.
- Every option needs a Korean reason that names the error or confirms the usage.
- The explanation is Korean, at least 120 characters and three sentences.";

const GRAMMAR_MULTI_RULES: &str = "\
- Introduce grammar errors into two to four segments and list all of them in correctAnswer.";

const HEADLINE_BLUEPRINT: &str = r#"{
  "question": "{question}",
  "options": [
    {"label": "①", "text": "English phrase of 6-14 words", "tag": "too-narrow"},
    {"label": "②", "text": "English phrase of 6-14 words (answer)"},
    {"label": "③", "text": "English phrase of 6-14 words", "tag": "off-focus"},
    {"label": "④", "text": "English phrase of 6-14 words", "tag": "opposite"},
    {"label": "⑤", "text": "English phrase of 6-14 words", "tag": "scope-shift"}
  ],
  "correctAnswer": 2,
  "explanation": "한국어 해설 (두 문장 이상)",
  "keywords": ["key", "ideas"],
  "sourceLabel": "출처│기관 시험명 연도 회차"
}"#;

const HEADLINE_RULES: &str = "\
- Options are English phrases of 6-14 words that start with a letter, with no digits and no closing ! or ?.
- Exactly one option captures the whole passage; distractors are too narrow, off-focus, opposite or shifted in scope.
- All five options are distinct.";

/// Everything one item prompt needs.
pub struct PromptInput<'a> {
    pub kind: ItemType,
    pub passage: &'a str,
    pub doc_title: Option<&'a str>,
    pub manual: &'a str,
    pub variant_tag: &'a str,
    /// Requested 1-based answer slot, grammar only.
    pub desired_slot: Option<u8>,
    pub directives: &'a DirectiveSet,
    pub last_failure: Option<&'a str>,
}

/// Canonical question for a type; the first phrasing its validator accepts.
pub fn canonical_question(kind: ItemType) -> &'static str {
    match kind {
        ItemType::Blank => blank::GENERAL_QUESTION,
        ItemType::Vocabulary => vocabulary::BASE_QUESTION,
        ItemType::Grammar => grammar::SINGLE_QUESTION,
        ItemType::GrammarMulti => grammar::MULTI_QUESTION,
        ItemType::Title => headline::TITLE_QUESTION,
        ItemType::Topic => headline::TOPIC_QUESTION,
    }
}

pub fn blueprint(kind: ItemType, desired_slot: Option<u8>) -> String {
    let template = match kind {
        ItemType::Blank => BLANK_BLUEPRINT,
        ItemType::Vocabulary => VOCABULARY_BLUEPRINT,
        ItemType::Grammar | ItemType::GrammarMulti => GRAMMAR_BLUEPRINT,
        ItemType::Title | ItemType::Topic => HEADLINE_BLUEPRINT,
    };
    let answer = match kind {
        ItemType::GrammarMulti => "[2, 4]".to_string(),
        _ => desired_slot.unwrap_or(3).to_string(),
    };
    template
        .replace("{question}", canonical_question(kind))
        .replace("{answer}", &answer)
}

fn rules(kind: ItemType) -> String {
    match kind {
        ItemType::Blank => BLANK_RULES.to_string(),
        ItemType::Vocabulary => VOCABULARY_RULES.to_string(),
        ItemType::Grammar => GRAMMAR_RULES.to_string(),
        ItemType::GrammarMulti => format!("{GRAMMAR_RULES}\n{GRAMMAR_MULTI_RULES}"),
        ItemType::Title | ItemType::Topic => HEADLINE_RULES.to_string(),
    }
}

pub fn build_item_prompt(input: &PromptInput<'_>) -> String {
    let slot_hint = match (input.kind, input.desired_slot.and_then(|s| (s as usize).checked_sub(1).and_then(marker))) {
        (ItemType::Grammar, Some(glyph)) => {
            format!("\nPlace the single grammar error in option {glyph} (correctAnswer = the index of {glyph}).\n")
        }
        _ => String::new(),
    };

    let mut directives = String::new();
    if !input.directives.is_empty() || input.last_failure.is_some() {
        directives.push_str("\nCORRECTIONS FROM EARLIER ATTEMPTS:\n");
        for directive in input.directives.iter() {
            directives.push_str(directive);
            directives.push('\n');
        }
        if let Some(failure) = input.last_failure {
            directives.push_str(&format!("- The previous attempt failed because: {failure}\n"));
            directives.push_str("- Fix that problem before anything else.\n");
        }
    }

    let manual = if input.manual.trim().is_empty() {
        "(none)"
    } else {
        input.manual.trim()
    };

    ITEM_PROMPT_TEMPLATE
        .replace("{item_type}", input.kind.as_str())
        .replace("{doc_label}", input.doc_title.unwrap_or("untitled document"))
        .replace("{variant_tag}", input.variant_tag)
        .replace("{manual}", manual)
        .replace("{rules}", &rules(input.kind))
        .replace("{fidelity}", FIDELITY_INSTRUCTION)
        .replace("{blueprint}", &blueprint(input.kind, input.desired_slot))
        .replace("{slot_hint}", &slot_hint)
        .replace("{directives}", &directives)
        // Last, so braces inside the passage are never treated as placeholders.
        .replace("{passage}", input.passage)
}

pub fn build_repair_prompt(kind: ItemType, raw: &str, failure: &str) -> String {
    REPAIR_PROMPT_TEMPLATE
        .replace("{item_type}", kind.as_str())
        .replace("{failure}", failure)
        .replace("{blueprint}", &blueprint(kind, None))
        .replace("{raw}", raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(kind: ItemType, directives: &'a DirectiveSet) -> PromptInput<'a> {
        PromptInput {
            kind,
            passage: "Bees {dance} to share directions.",
            doc_title: Some("Mock Exam"),
            manual: "",
            variant_tag: "G-1",
            desired_slot: Some(2),
            directives,
            last_failure: None,
        }
    }

    #[test]
    fn test_prompt_embeds_passage_and_blueprint() {
        let directives = DirectiveSet::new();
        let prompt = build_item_prompt(&input(ItemType::Title, &directives));
        assert!(prompt.contains("Bees {dance} to share directions."));
        assert!(prompt.contains(headline::TITLE_QUESTION));
        assert!(prompt.contains("(none)"));
        assert!(!prompt.contains("CORRECTIONS"));
        assert!(!prompt.contains("Place the single grammar error"));
    }

    #[test]
    fn test_grammar_slot_hint() {
        let directives = DirectiveSet::new();
        let prompt = build_item_prompt(&input(ItemType::Grammar, &directives));
        assert!(prompt.contains("Place the single grammar error in option ②"));
        assert!(prompt.contains("\"correctAnswer\": 2,"));
    }

    #[test]
    fn test_directives_and_last_failure_are_injected() {
        let mut directives = DirectiveSet::new();
        directives.insert("- Underline exactly five segments.");
        let mut prompt_input = input(ItemType::Vocabulary, &directives);
        prompt_input.last_failure = Some("vocabulary passage underline count mismatch (found 4)");
        let prompt = build_item_prompt(&prompt_input);
        assert!(prompt.contains("CORRECTIONS FROM EARLIER ATTEMPTS"));
        assert!(prompt.contains("- Underline exactly five segments."));
        assert!(prompt.contains("failed because: vocabulary passage underline count mismatch"));
    }

    #[test]
    fn test_repair_prompt() {
        let prompt = build_repair_prompt(ItemType::Blank, "{\"question\": ", "unparseable response");
        assert!(prompt.contains("PROBLEM: unparseable response"));
        assert!(prompt.contains(blank::GENERAL_QUESTION));
        assert!(prompt.contains("{\"question\": "));
    }
}
