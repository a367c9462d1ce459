//! Segment locator: finds where a short, possibly noisy phrase sits inside a
//! passage.
//!
//! Matching runs over a normalized projection of the passage (no whitespace,
//! hyphens or light punctuation, lowercased) that keeps a map back to byte
//! offsets in the original text. Hits are widened to whole words, and one
//! locator session never hands out overlapping ranges.

use thiserror::Error;
use tracing::debug;

use crate::items::emphasis::strip_emphasis;
use crate::items::text::{marker, normalize_whitespace, strip_tags};

const HYPHENS: &[char] = &['-', '‐', '‑', '‒', '–', '—', '−'];
const IGNORED_PUNCTUATION: &[char] = &[
    ',', '.', '!', '?', ';', ':', '"', '\'', '‘', '’', '“', '”', '…', '\u{00A0}',
];
const TRAILING_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '"', '\'', '’', '”'];
const MIN_SUFFIX_NEEDLE: usize = 4;
const MAX_SUFFIX_LETTERS: usize = 3;
const MAX_WORD_WINDOW: usize = 6;

/// Byte range into the passage the locator was built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    #[error("segment empty after normalization")]
    Empty,

    #[error("segment \"{0}\" not found in passage")]
    NotFound(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Normalized projection
// ────────────────────────────────────────────────────────────────────────────

fn is_skipped(c: char) -> bool {
    c.is_whitespace() || HYPHENS.contains(&c) || IGNORED_PUNCTUATION.contains(&c)
}

struct Projection {
    chars: Vec<char>,
    /// Byte range in the source text of each projected char.
    map: Vec<(usize, usize)>,
}

impl Projection {
    fn of(text: &str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut map = Vec::with_capacity(text.len());
        for (i, c) in text.char_indices() {
            if is_skipped(c) {
                continue;
            }
            for lower in c.to_lowercase() {
                chars.push(lower);
                map.push((i, i + c.len_utf8()));
            }
        }
        Self { chars, map }
    }

    fn len(&self) -> usize {
        self.chars.len()
    }

    fn find(&self, needle: &[char], from: usize) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.len() {
            return None;
        }
        (from..=self.len() - needle.len()).find(|&i| self.chars[i..i + needle.len()] == *needle)
    }

    /// Retries with the last 1–3 letters of the needle dropped so an
    /// inflected form in the passage still matches (`postponing` → `postpone`).
    fn find_stem(&self, needle: &[char], from: usize) -> Option<(usize, usize)> {
        (1..=MAX_SUFFIX_LETTERS)
            .take_while(|&k| needle.len() >= MIN_SUFFIX_NEEDLE + k)
            .take_while(|&k| needle[needle.len() - k].is_ascii_lowercase())
            .find_map(|k| {
                let stem = &needle[..needle.len() - k];
                self.find(stem, from).map(|i| (i, stem.len()))
            })
    }

    /// Projection index of the first char starting at or after `byte`.
    fn index_at_byte(&self, byte: usize) -> usize {
        self.map.partition_point(|&(start, _)| start < byte)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Locator session
// ────────────────────────────────────────────────────────────────────────────

/// One left-to-right locating pass over a passage.
pub struct SegmentLocator<'a> {
    passage: &'a str,
    projection: Projection,
    lower: String,
    claimed: Vec<Span>,
    cursor: usize,
    notes: Vec<String>,
}

impl<'a> SegmentLocator<'a> {
    pub fn new(passage: &'a str) -> Self {
        Self {
            passage,
            projection: Projection::of(passage),
            lower: passage.to_ascii_lowercase(),
            claimed: Vec::new(),
            cursor: 0,
            notes: Vec::new(),
        }
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn slice(&self, span: Span) -> &'a str {
        &self.passage[span.start..span.end]
    }

    pub fn locate(&mut self, phrase: &str) -> Result<Span, LocateError> {
        let cleaned = normalize_whitespace(&strip_tags(phrase));
        let mut candidates = vec![cleaned.clone()];
        let trimmed = cleaned.trim_end_matches(TRAILING_PUNCTUATION).trim_end();
        if !trimmed.is_empty() && trimmed != cleaned {
            candidates.push(trimmed.to_string());
        }

        let mut searchable = false;
        for candidate in &candidates {
            let needle = Projection::of(candidate).chars;
            if needle.is_empty() {
                continue;
            }
            searchable = true;
            for offset in [self.cursor, 0] {
                if let Some((span, end)) = self.search_projection(&needle, offset) {
                    self.claim(span, end);
                    return Ok(span);
                }
            }
        }
        if !searchable {
            self.notes.push(LocateError::Empty.to_string());
            return Err(LocateError::Empty);
        }

        if let Some(span) = self.search_word_windows(&cleaned) {
            let end = self.projection.index_at_byte(span.end);
            self.claim(span, end);
            self.notes
                .push(format!("segment \"{cleaned}\" matched by word window"));
            return Ok(span);
        }

        let error = LocateError::NotFound(cleaned);
        debug!("{error}");
        self.notes.push(error.to_string());
        Err(error)
    }

    fn search_projection(&self, needle: &[char], offset: usize) -> Option<(Span, usize)> {
        let mut from = offset;
        while from < self.projection.len() {
            let (index, len) = match self.projection.find(needle, from) {
                Some(i) => (i, needle.len()),
                None => self.projection.find_stem(needle, from)?,
            };
            let raw = Span {
                start: self.projection.map[index].0,
                end: self.projection.map[index + len - 1].1,
            };
            let span = self.expand_to_words(raw);
            if !self.is_claimed(&span) {
                return Some((span, index + len));
            }
            from = index + 1;
        }
        None
    }

    fn search_word_windows(&self, cleaned: &str) -> Option<Span> {
        let words: Vec<String> = cleaned
            .split_whitespace()
            .map(|w| w.trim_matches(TRAILING_PUNCTUATION).to_ascii_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return None;
        }
        let widest = words.len().min(MAX_WORD_WINDOW);
        let narrowest = widest.min(2);
        for window in (narrowest..=widest).rev() {
            for piece in words.windows(window).map(|w| w.join(" ")) {
                for (index, _) in self.lower.match_indices(&piece) {
                    let span = Span {
                        start: index,
                        end: index + piece.len(),
                    };
                    if self.on_word_boundaries(span) && !self.is_claimed(&span) {
                        return Some(span);
                    }
                }
            }
        }
        None
    }

    fn expand_to_words(&self, mut span: Span) -> Span {
        let text = self.passage;
        while let (Some(prev), Some(cur)) = (
            text[..span.start].chars().next_back(),
            text[span.start..].chars().next(),
        ) {
            if prev.is_ascii_alphabetic() && cur.is_ascii_alphabetic() {
                span.start -= prev.len_utf8();
            } else {
                break;
            }
        }
        while let (Some(last), Some(next)) = (
            text[..span.end].chars().next_back(),
            text[span.end..].chars().next(),
        ) {
            if last.is_ascii_alphabetic() && next.is_ascii_alphabetic() {
                span.end += next.len_utf8();
            } else {
                break;
            }
        }
        span
    }

    fn on_word_boundaries(&self, span: Span) -> bool {
        let before = self.passage[..span.start].chars().next_back();
        let after = self.passage[span.end..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphabetic())
            && !after.is_some_and(|c| c.is_ascii_alphabetic())
    }

    fn is_claimed(&self, span: &Span) -> bool {
        self.claimed.iter().any(|c| c.overlaps(span))
    }

    fn claim(&mut self, span: Span, projection_end: usize) {
        self.claimed.push(span);
        self.cursor = self.cursor.max(projection_end);
    }
}

/// Single-shot lookup of one phrase.
pub fn locate(passage: &str, phrase: &str) -> Option<Span> {
    SegmentLocator::new(passage).locate(phrase).ok()
}

// ────────────────────────────────────────────────────────────────────────────
// Emphasis reconstruction
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuiltEmphasis {
    /// Passage with five marked spans (`①<u>…</u>` … `⑤<u>…</u>`).
    pub passage: String,
    /// Span texts in passage order.
    pub segments: Vec<String>,
    /// `order[i]` is the index of the phrase that landed at passage position `i`.
    pub order: Vec<usize>,
}

/// Re-derives the five emphasis spans of a passage from the option phrases.
///
/// Existing underline markup is discarded first. Returns `None` (with the
/// reasons appended to `notes`) unless exactly five phrases are located.
pub fn rebuild_emphasis(
    passage: &str,
    phrases: &[String],
    notes: &mut Vec<String>,
) -> Option<RebuiltEmphasis> {
    let plain = strip_emphasis(passage);
    let mut locator = SegmentLocator::new(&plain);
    let mut located: Vec<(Span, usize)> = Vec::with_capacity(phrases.len());
    for (index, phrase) in phrases.iter().enumerate() {
        if let Ok(span) = locator.locate(phrase) {
            located.push((span, index));
        }
    }
    notes.extend(locator.notes().iter().cloned());
    if located.len() != 5 || phrases.len() != 5 {
        notes.push(format!(
            "located {} of {} segments",
            located.len(),
            phrases.len()
        ));
        return None;
    }
    located.sort();

    let mut out = String::with_capacity(plain.len() + 64);
    let mut segments = Vec::with_capacity(5);
    let mut last = 0;
    for (slot, (span, _)) in located.iter().enumerate() {
        out.push_str(&plain[last..span.start]);
        out.push_str(marker(slot).unwrap_or_default());
        out.push_str("<u>");
        out.push_str(&plain[span.start..span.end]);
        out.push_str("</u>");
        segments.push(plain[span.start..span.end].to_string());
        last = span.end;
    }
    out.push_str(&plain[last..]);

    Some(RebuiltEmphasis {
        passage: out,
        segments,
        order: located.iter().map(|(_, index)| *index).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSAGE: &str = "The well-known scientist argued that curiosity, not talent, \
        drives discovery. Her students, however, believed the opposite was true.";

    #[test]
    fn test_exact_substrings_round_trip() {
        for phrase in [
            "The well-known scientist",
            "curiosity",
            "drives discovery",
            "Her students, however, believed",
            "true",
        ] {
            let span = locate(PASSAGE, phrase).unwrap();
            assert_eq!(&PASSAGE[span.start..span.end], phrase);
        }
    }

    #[test]
    fn test_noise_is_tolerated() {
        let span = locate(PASSAGE, "WELL KNOWN scientist").unwrap();
        assert_eq!(&PASSAGE[span.start..span.end], "well-known scientist");

        let span = locate(PASSAGE, "curiosity not talent").unwrap();
        assert_eq!(&PASSAGE[span.start..span.end], "curiosity, not talent");

        let span = locate(PASSAGE, "  students however ").unwrap();
        assert_eq!(&PASSAGE[span.start..span.end], "students, however");
    }

    #[test]
    fn test_hits_expand_to_whole_words() {
        let span = locate(PASSAGE, "tudent").unwrap();
        assert_eq!(&PASSAGE[span.start..span.end], "students");
    }

    #[test]
    fn test_inflected_ending_is_tolerated() {
        let passage = "The committee voted to postpone the hearing.";
        let span = locate(passage, "postponing").unwrap();
        assert_eq!(&passage[span.start..span.end], "postpone");
    }

    #[test]
    fn test_claimed_ranges_are_not_reused() {
        let passage = "the cat saw the cat";
        let mut locator = SegmentLocator::new(passage);
        let first = locator.locate("the cat").unwrap();
        let second = locator.locate("the cat").unwrap();
        assert_eq!(first, Span { start: 0, end: 7 });
        assert_eq!(second, Span { start: 12, end: 19 });
        assert!(locator.locate("the cat").is_err());
    }

    #[test]
    fn test_word_window_fallback() {
        let passage = "Markets reward patience over time.";
        let mut locator = SegmentLocator::new(passage);
        let span = locator
            .locate("reward patience over the long haul")
            .unwrap();
        assert_eq!(locator.slice(span), "reward patience over");
        assert!(locator.notes().iter().any(|n| n.contains("word window")));
    }

    #[test]
    fn test_failures_are_reported() {
        let mut locator = SegmentLocator::new(PASSAGE);
        assert_eq!(locator.locate(" ... "), Err(LocateError::Empty));
        let err = locator.locate("quantum entanglement").unwrap_err();
        assert_eq!(
            err.to_string(),
            "segment \"quantum entanglement\" not found in passage"
        );
        assert_eq!(locator.notes().len(), 2);
    }

    #[test]
    fn test_rebuild_emphasis_orders_spans_left_to_right() {
        let phrases: Vec<String> = ["students", "The well-known scientist", "curiosity", "drives", "true"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut notes = Vec::new();
        let rebuilt = rebuild_emphasis(PASSAGE, &phrases, &mut notes).unwrap();
        assert_eq!(
            rebuilt.segments,
            vec!["The well-known scientist", "curiosity", "drives", "students", "true"]
        );
        assert_eq!(rebuilt.order, vec![1, 2, 3, 0, 4]);
        assert!(rebuilt.passage.starts_with("①<u>The well-known scientist</u>"));
        assert!(rebuilt.passage.contains("④<u>students</u>"));
        assert!(rebuilt.passage.ends_with("⑤<u>true</u>."));
    }

    #[test]
    fn test_rebuild_emphasis_requires_five_spans() {
        let phrases: Vec<String> = ["curiosity", "drives", "zebra", "true", "students"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut notes = Vec::new();
        assert!(rebuild_emphasis(PASSAGE, &phrases, &mut notes).is_none());
        assert!(notes.iter().any(|n| n.contains("\"zebra\" not found")));
        assert!(notes.iter().any(|n| n.contains("located 4 of 5")));
    }
}
