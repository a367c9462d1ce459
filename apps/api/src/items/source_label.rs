//! Provenance labels shown under each item (`출처│…`).

use std::sync::OnceLock;

use regex::Regex;

pub const SOURCE_PREFIX: &str = "출처│";
const DEFAULT_SOURCE: &str = "LoE Source";

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:출처|source)\s*[:│|\-]?\s*").expect("prefix regex"))
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:기관\s*연도\s*회차.*|p\s*x+|sample.*|예시.*|기본\s*값.*|default.*)$")
            .expect("placeholder regex")
    })
}

fn body(label: &str) -> String {
    let stripped = prefix_re().replace(label.trim(), "");
    stripped
        .trim_start_matches(['│', '|', ':', '-', '~'])
        .trim()
        .to_string()
}

/// True for empty labels and for template placeholders left by the generator.
pub fn is_placeholder(label: &str) -> bool {
    let body = body(label);
    body.is_empty() || placeholder_re().is_match(&body)
}

/// Normalizes a label to the `출처│` prefix, replacing placeholders with a
/// label derived from the document title.
pub fn ensure_source_label(raw: Option<&str>, doc_title: Option<&str>) -> String {
    match raw {
        Some(label) if !is_placeholder(label) => format!("{SOURCE_PREFIX}{}", body(label)),
        _ => default_source_label(doc_title),
    }
}

pub fn default_source_label(doc_title: Option<&str>) -> String {
    match doc_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => format!("{SOURCE_PREFIX}{title}"),
        None => format!("{SOURCE_PREFIX}{DEFAULT_SOURCE}"),
    }
}

pub fn has_source_prefix(label: &str) -> bool {
    label.trim_start().starts_with(SOURCE_PREFIX)
}
