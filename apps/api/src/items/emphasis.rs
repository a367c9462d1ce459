//! `<u>…</u>` markup used by the span-emphasis item types, with the ordinal
//! marker written inline in front of each span (`①<u>…</u>`).

use std::sync::OnceLock;

use regex::Regex;

use crate::items::text::{marker, normalize_whitespace, strip_tags};

fn underline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<u\b[^>]*>(.*?)</u>").expect("underline regex"))
}

fn glyph_before_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[①②③④⑤⑥⑦⑧⑨⑩]\s*(<u\b)").expect("glyph regex"))
}

fn tag_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</?u\b[^>]*>").expect("u-tag regex"))
}

/// Inner text of every underlined span, tags stripped and whitespace collapsed.
pub fn underlined_segments(passage: &str) -> Vec<String> {
    underline_re()
        .captures_iter(passage)
        .map(|c| normalize_whitespace(&strip_tags(&c[1])))
        .collect()
}

pub fn underline_count(text: &str) -> usize {
    underline_re().find_iter(text).count()
}

/// Passage with underline tags and the markers in front of them removed.
pub fn strip_emphasis(passage: &str) -> String {
    let without_glyphs = glyph_before_tag_re().replace_all(passage, "$1");
    tag_only_re().replace_all(&without_glyphs, "").into_owned()
}

/// Rewrites the passage so span `i` is preceded by marker `i`, dropping any
/// stray markers that sat in front of the tags before.
pub fn with_inline_markers(passage: &str) -> String {
    let cleaned = glyph_before_tag_re().replace_all(passage, "$1");
    let mut out = String::with_capacity(cleaned.len() + 16);
    let mut last = 0;
    for (slot, m) in underline_re().find_iter(&cleaned).enumerate() {
        out.push_str(&cleaned[last..m.start()]);
        if let Some(glyph) = marker(slot) {
            out.push_str(glyph);
        }
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&cleaned[last..]);
    out
}

/// True when every span is immediately preceded by the marker of its position.
pub fn has_inline_markers(passage: &str) -> bool {
    underline_re()
        .find_iter(passage)
        .enumerate()
        .all(|(slot, m)| match marker(slot) {
            Some(glyph) => passage[..m.start()].ends_with(glyph),
            None => false,
        })
}

/// Wraps text in a single underline span unless it already carries one.
pub fn ensure_underlined(text: &str) -> String {
    if underline_count(text) > 0 {
        text.to_string()
    } else {
        format!("<u>{}</u>", text.trim())
    }
}
