//! Correction directives derived from failure reasons.
//!
//! Each failed attempt's diagnostic is matched against a keyword table; the
//! resulting instructions accumulate in a [`DirectiveSet`] and are injected
//! into every later prompt of the same request.

use std::sync::OnceLock;

use regex::Regex;

/// Insertion-ordered, deduplicated list of instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSet {
    items: Vec<String>,
}

impl DirectiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the directive was already present.
    pub fn insert(&mut self, directive: impl Into<String>) -> bool {
        let directive = directive.into();
        if directive.trim().is_empty() || self.items.contains(&directive) {
            return false;
        }
        self.items.push(directive);
        true
    }

    pub fn extend<I, S>(&mut self, directives: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for directive in directives {
            self.insert(directive);
        }
    }

    /// Adds every directive derived from `failure`.
    pub fn absorb(&mut self, failure: &str) {
        self.extend(derive_directives(failure));
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// (any of these lowercase keywords, directive)
const KEYWORD_DIRECTIVES: &[(&[&str], &str)] = &[
    (
        &["underline", "밑줄"],
        "- Underline exactly five segments with <u>...</u> in the passage, and make each option repeat its underlined segment.",
    ),
    (
        &["must contain 5 entries", "duplicate option labels", "options missing"],
        "- Provide exactly five options labelled with the circled digits ①-⑤.",
    ),
    (
        &["words (found"],
        "- Keep every option within the required word count.",
    ),
    (
        &["reason"],
        "- Fill the \"reason\" field for every option (including the answer) with a concise Korean sentence.",
    ),
    (
        &["korean"],
        "- Keep the explanation and option reasons entirely in Korean.",
    ),
    (
        &["answer count mismatch", "conflicts with option statuses", "must name exactly one"],
        "- Make correctAnswer and every option status agree on the exact number of answers requested.",
    ),
    (
        &["invalid correctanswer", "could not be resolved"],
        "- Set correctAnswer to the circled digit of the single best option.",
    ),
    (
        &["index mismatch"],
        "- Put the answer in the requested option slot.",
    ),
    (
        &["unexpected"],
        "- Use the fixed Korean question text for this item type, word for word.",
    ),
    (
        &["truncated", "requires original passage", "text too short"],
        "- Return the full original passage verbatim; do not summarise or delete sentences.",
    ),
    (
        &["not found", "located"],
        "- Copy each underlined snippet exactly as it appears in the passage (no paraphrasing or trimming).",
    ),
    (
        &["unchanged from original"],
        "- Every segment marked as the answer must visibly differ from the original wording; keep all other segments identical to the original.",
    ),
    (
        &["diverges from original"],
        "- Segments that are not answers must match the original passage letter for letter.",
    ),
    (
        &["placeholder"],
        "- Replace exactly one expression of the passage with a single ____ placeholder.",
    ),
    (
        &["target expression"],
        "- Set targetExpression to a phrase copied verbatim from the original passage.",
    ),
    (
        &["numerals", "digits"],
        "- Spell out numbers in words inside options.",
    ),
    (
        &["must be unique"],
        "- Make all five options distinct from each other.",
    ),
    (
        &["disallowed characters", "must start with a letter", "must not end with", "english phrase"],
        "- Write options as plain English phrases using letters and basic punctuation only.",
    ),
    (
        &["noun phrase", "to-infinitive", "gerund"],
        "- Start cloze options with a noun phrase, never with \"to\" or an -ing word.",
    ),
    (
        &["family", "strategy"],
        "- Use one of the listed question families and strategies exactly as spelled.",
    ),
    (
        &["explanation", "too short"],
        "- Write the explanation in at least three Korean sentences covering the main idea, the answer's evidence and the flaws of at least two distractors.",
    ),
    (
        &["unparseable", "empty response", "payload missing"],
        "- Respond with one complete JSON object that follows the blueprint.",
    ),
];

fn missing_snippet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)" not found"#).expect("snippet regex"))
}

/// Maps a failure reason to correction instructions, in table order.
pub fn derive_directives(failure: &str) -> Vec<String> {
    if failure.trim().is_empty() {
        return Vec::new();
    }
    let message = failure.to_lowercase();
    let mut directives: Vec<String> = KEYWORD_DIRECTIVES
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| message.contains(k)))
        .map(|(_, directive)| directive.to_string())
        .collect();

    for caps in missing_snippet_re().captures_iter(failure) {
        let snippet = caps[1].trim();
        if snippet.is_empty() {
            continue;
        }
        let directive = format!(
            "- Use the exact phrase \"{snippet}\" in both the passage and the matching option; do not replace or modify this wording."
        );
        if !directives.contains(&directive) {
            directives.push(directive);
        }
    }
    directives
}
