//! Lexical helpers shared by the locator, the contract validators and the
//! repository's acceptance gate. Everything here is pure string work.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Ordinal markers that prefix the five options, in slot order.
pub const ORDINAL_MARKERS: [&str; 5] = ["①", "②", "③", "④", "⑤"];

const CIRCLED_GLYPHS: &str = "①②③④⑤⑥⑦⑧⑨⑩";

/// Characters ignored when comparing question phrasings.
const QUESTION_PUNCTUATION: &[char] = &[
    '.', ',', '?', ':', ';', '!', '。', '？', '！', '．', '：', '；', '，', '／',
];

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag regex"))
}

fn sentence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?](?:\s|$)").expect("sentence regex"))
}

fn english_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^[A-Za-z][A-Za-z\s.,'"()\-]*$"#).expect("phrase regex"))
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("digits regex"))
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*]+?)\*\*").expect("bold regex"))
}

fn italic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*([^*\s][^*]*?)\*").expect("italic regex"))
}

/// Returns the ordinal marker for a zero-based slot, if it is one of the five.
pub fn marker(slot: usize) -> Option<&'static str> {
    ORDINAL_MARKERS.get(slot).copied()
}

/// True when the text carries at least one Hangul syllable.
pub fn contains_hangul(text: &str) -> bool {
    text.chars().any(|c| ('\u{AC00}'..='\u{D7A3}').contains(&c))
}

pub fn strip_tags(text: &str) -> String {
    tag_re().replace_all(text, "").into_owned()
}

/// Collapses every whitespace run to a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comparison key for question phrasings: whitespace and punctuation removed.
pub fn question_key(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !QUESTION_PUNCTUATION.contains(c))
        .collect()
}

/// Counts sentence terminators (`.`, `!`, `?`) followed by whitespace or end of text.
pub fn count_sentences(text: &str) -> usize {
    sentence_end_re().find_iter(text.trim()).count()
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Replaces typographic quotes with their ASCII forms.
pub fn straighten_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '‘' | '’' | '‚' | '‛' | '′' => '\'',
            '“' | '”' | '„' | '‟' | '″' => '"',
            other => other,
        })
        .collect()
}

/// Alphabetic English phrase: letters, spaces and light punctuation only.
pub fn is_english_phrase(text: &str) -> bool {
    english_phrase_re().is_match(&straighten_quotes(text.trim()))
}

pub fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

const ONES: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];
const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

fn number_to_words(n: u32) -> Option<String> {
    match n {
        0..=19 => Some(ONES[n as usize].to_string()),
        20..=99 => {
            let tens = TENS[(n / 10) as usize];
            Some(match n % 10 {
                0 => tens.to_string(),
                ones => format!("{tens}-{}", ONES[ones as usize]),
            })
        }
        100..=999 => {
            let head = format!("{} hundred", ONES[(n / 100) as usize]);
            Some(match n % 100 {
                0 => head,
                rest => format!("{head} {}", number_to_words(rest)?),
            })
        }
        _ => None,
    }
}

/// Spells out every digit run between 0 and 999. Larger numbers are left as digits.
pub fn spell_out_digits(text: &str) -> String {
    digits_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            caps[0]
                .parse::<u32>()
                .ok()
                .and_then(number_to_words)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Converts markdown emphasis (`**x**`, `*x*`) into `<u>x</u>`.
pub fn markdown_to_underline(text: &str) -> String {
    let bold = bold_re().replace_all(text, "<u>$1</u>");
    italic_re().replace_all(&bold, "<u>$1</u>").into_owned()
}

/// Strips one leading circled glyph and the whitespace after it.
pub fn strip_leading_marker(text: &str) -> &str {
    let trimmed = text.trim_start();
    match trimmed.chars().next() {
        Some(c) if CIRCLED_GLYPHS.contains(c) => trimmed[c.len_utf8()..].trim_start(),
        _ => trimmed,
    }
}

fn glyph_to_slot(c: char) -> Option<usize> {
    ORDINAL_MARKERS
        .iter()
        .position(|m| m.starts_with(c))
}

/// Resolves an option label to a zero-based slot.
///
/// Accepts a circled glyph, a digit 1–5 (numeric or string), a letter A–E, or a
/// longer label with a circled glyph embedded in it.
pub fn label_to_slot(label: &Value) -> Option<usize> {
    match label {
        Value::Number(n) => n
            .as_u64()
            .filter(|v| (1..=5).contains(v))
            .map(|v| v as usize - 1),
        Value::String(s) => label_str_to_slot(s),
        _ => None,
    }
}

pub fn label_str_to_slot(label: &str) -> Option<usize> {
    let trimmed = label.trim().trim_end_matches(['.', ')', ':']).trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    if chars.next().is_none() {
        if let Some(slot) = glyph_to_slot(first) {
            return Some(slot);
        }
        return match first {
            '1'..='5' => Some(first as usize - '1' as usize),
            'A'..='E' => Some(first as usize - 'A' as usize),
            'a'..='e' => Some(first as usize - 'a' as usize),
            _ => None,
        };
    }
    trimmed.chars().find_map(glyph_to_slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_question_key_ignores_spacing_and_punctuation() {
        assert_eq!(
            question_key("다음 글의 제목으로 가장 적절한 것은?"),
            question_key("다음 글의  제목으로 가장 적절한 것은")
        );
    }

    #[test]
    fn test_count_sentences() {
        assert_eq!(count_sentences("One. Two! Three?"), 3);
        assert_eq!(count_sentences("Version 2.0 is out"), 0);
        assert_eq!(count_sentences("첫 문장입니다. 두 번째 문장입니다."), 2);
    }

    #[test]
    fn test_spell_out_digits() {
        assert_eq!(spell_out_digits("3 reasons"), "three reasons");
        assert_eq!(spell_out_digits("42 steps"), "forty-two steps");
        assert_eq!(spell_out_digits("105 days"), "one hundred five days");
        assert_eq!(spell_out_digits("2024 plans"), "2024 plans");
    }

    #[test]
    fn test_english_phrase_rules() {
        assert!(is_english_phrase("the persistence of old habits"));
        assert!(is_english_phrase("a “so-called” expert’s view"));
        assert!(!is_english_phrase("습관의 지속"));
        assert!(!is_english_phrase("3 old habits"));
    }

    #[test]
    fn test_label_to_slot_variants() {
        assert_eq!(label_to_slot(&json!("③")), Some(2));
        assert_eq!(label_to_slot(&json!(4)), Some(3));
        assert_eq!(label_to_slot(&json!("5")), Some(4));
        assert_eq!(label_to_slot(&json!("B")), Some(1));
        assert_eq!(label_to_slot(&json!("b)")), Some(1));
        assert_eq!(label_to_slot(&json!("option ②")), Some(1));
        assert_eq!(label_to_slot(&json!(6)), None);
        assert_eq!(label_to_slot(&json!("F")), None);
        assert_eq!(label_to_slot(&json!(null)), None);
    }

    #[test]
    fn test_markdown_to_underline() {
        assert_eq!(
            markdown_to_underline("a **bold** and *soft* word"),
            "a <u>bold</u> and <u>soft</u> word"
        );
    }

    #[test]
    fn test_strip_leading_marker() {
        assert_eq!(strip_leading_marker("① <u>went</u>"), "<u>went</u>");
        assert_eq!(strip_leading_marker("plain"), "plain");
    }

    #[test]
    fn test_contains_hangul() {
        assert!(contains_hangul("정답은 ③입니다"));
        assert!(!contains_hangul("The answer is three"));
    }
}
