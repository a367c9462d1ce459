//! Shared arrangement for span-emphasis items (vocabulary, grammar): five
//! underlined passage spans, option `i` naming span `i`.

use crate::contracts::fields::RawOption;
use crate::contracts::ContractError;
use crate::items::emphasis::{
    ensure_underlined, underline_count, underlined_segments, with_inline_markers,
};
use crate::items::model::ItemType;
use crate::items::text::{marker, markdown_to_underline, normalize_whitespace};
use crate::locator::rebuild_emphasis;

#[derive(Debug, Clone)]
pub struct Arranged {
    /// Passage with `①<u>…</u>` … `⑤<u>…</u>`.
    pub passage: String,
    /// Options in passage order, text replaced by the passage span.
    pub options: Vec<RawOption>,
    pub segments: Vec<String>,
    pub rebuilt: bool,
}

fn same_segment(a: &str, b: &str) -> bool {
    normalize_whitespace(a).to_lowercase() == normalize_whitespace(b).to_lowercase()
}

/// Aligns option segments with the passage spans, rebuilding the spans with
/// the segment locator when the markup is missing or drifted.
pub fn arrange(
    kind: ItemType,
    passage: &str,
    options: Vec<RawOption>,
) -> Result<Arranged, ContractError> {
    let passage = markdown_to_underline(passage);
    let mut segments = Vec::with_capacity(options.len());
    for (slot, option) in options.iter().enumerate() {
        let text = ensure_underlined(&markdown_to_underline(&option.text));
        match underlined_segments(&text).as_slice() {
            [segment] if !segment.is_empty() => segments.push(segment.clone()),
            _ => {
                return Err(ContractError::option(
                    kind,
                    slot,
                    "must contain exactly one underlined segment",
                ))
            }
        }
    }

    let existing = underlined_segments(&passage);
    let aligned = existing.len() == segments.len()
        && existing
            .iter()
            .zip(&segments)
            .all(|(span, segment)| same_segment(span, segment));
    if aligned && existing.len() == 5 {
        return Ok(Arranged {
            passage: with_inline_markers(&passage),
            options: with_segment_text(options, &existing),
            segments: existing,
            rebuilt: false,
        });
    }

    let mut notes = Vec::new();
    let Some(rebuilt) = rebuild_emphasis(&passage, &segments, &mut notes) else {
        let detail = if notes.is_empty() {
            String::new()
        } else {
            format!(": {}", notes.join("; "))
        };
        return Err(ContractError::passage(
            kind,
            format!(
                "underline count mismatch (found {}){detail}",
                underline_count(&passage)
            ),
        ));
    };

    let mut slots: Vec<Option<RawOption>> = options.into_iter().map(Some).collect();
    let reordered: Vec<RawOption> = rebuilt
        .order
        .iter()
        .filter_map(|&index| slots.get_mut(index).and_then(Option::take))
        .collect();
    Ok(Arranged {
        passage: rebuilt.passage,
        options: with_segment_text(reordered, &rebuilt.segments),
        segments: rebuilt.segments,
        rebuilt: true,
    })
}

fn with_segment_text(options: Vec<RawOption>, segments: &[String]) -> Vec<RawOption> {
    options
        .into_iter()
        .zip(segments)
        .map(|(mut option, segment)| {
            option.text = normalize_whitespace(segment);
            option
        })
        .collect()
}

/// `① <u>segment</u>` strings for the arranged options.
pub fn render_options(options: &[RawOption]) -> Vec<String> {
    options
        .iter()
        .enumerate()
        .map(|(slot, option)| {
            format!(
                "{} <u>{}</u>",
                marker(slot).unwrap_or_default(),
                option.text
            )
        })
        .collect()
}

/// True when `segment` appears in `original` as whole words, ignoring case
/// and whitespace differences.
pub fn appears_in(original: &str, segment: &str) -> bool {
    let haystack = normalize_whitespace(original).to_lowercase();
    let needle = normalize_whitespace(segment).to_lowercase();
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(&needle).any(|(index, _)| {
        let before = haystack[..index].chars().next_back();
        let after = haystack[index + needle.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric()) && !after.is_some_and(|c| c.is_alphanumeric())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(text: &str) -> RawOption {
        RawOption {
            text: text.to_string(),
            ..RawOption::default()
        }
    }

    const PASSAGE: &str = "Plants <u>need</u> light. Roots <u>absorb</u> water. \
        Leaves <u>release</u> oxygen. Stems <u>carry</u> sap. Seeds <u>spread</u> widely.";

    #[test]
    fn test_aligned_markup_gets_inline_markers() {
        let options = ["need", "absorb", "release", "carry", "spread"]
            .iter()
            .map(|t| raw(&format!("<u>{t}</u>")))
            .collect();
        let arranged = arrange(ItemType::Grammar, PASSAGE, options).unwrap();
        assert!(!arranged.rebuilt);
        assert!(arranged.passage.contains("Plants ①<u>need</u>"));
        assert!(arranged.passage.contains("Seeds ⑤<u>spread</u>"));
        assert_eq!(render_options(&arranged.options)[2], "③ <u>release</u>");
    }

    #[test]
    fn test_out_of_order_options_are_rebuilt_in_passage_order() {
        let mut options: Vec<RawOption> = ["carry", "need", "absorb", "release", "spread"]
            .iter()
            .map(|t| raw(t))
            .collect();
        options[0].reason = Some("first given".to_string());
        let arranged = arrange(ItemType::Grammar, PASSAGE, options).unwrap();
        assert!(arranged.rebuilt);
        assert_eq!(
            arranged.segments,
            vec!["need", "absorb", "release", "carry", "spread"]
        );
        assert_eq!(arranged.options[3].reason.as_deref(), Some("first given"));
    }

    #[test]
    fn test_unlocatable_segment_reports_underline_mismatch() {
        let options = ["need", "absorb", "release", "carry", "photosynthesis"]
            .iter()
            .map(|t| raw(t))
            .collect();
        let err = arrange(ItemType::Vocabulary, PASSAGE, options).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("vocabulary passage underline count mismatch (found 5)"));
        assert!(message.contains("\"photosynthesis\" not found"));
    }

    #[test]
    fn test_option_with_two_spans_is_rejected() {
        let mut options: Vec<RawOption> = ["need", "absorb", "release", "carry", "spread"]
            .iter()
            .map(|t| raw(t))
            .collect();
        options[1].text = "<u>a</u> and <u>b</u>".to_string();
        assert!(matches!(
            arrange(ItemType::Grammar, PASSAGE, options),
            Err(ContractError::Option { slot: 2, .. })
        ));
    }

    #[test]
    fn test_appears_in_uses_word_boundaries() {
        assert!(appears_in("He has gone home.", "has  gone"));
        assert!(!appears_in("He has gone home.", "as gone"));
        assert!(!appears_in("He has gone home.", "have gone"));
    }
}
