//! Grammar items compared against a reference set of known-good items.
//!
//! Purely observational: the report is attached to item metadata and never
//! affects acceptance.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::items::emphasis::underlined_segments;
use crate::items::model::{DiffReport, Item};
use crate::items::text::{normalize_whitespace, strip_leading_marker, strip_tags};

const MIN_OVERLAP: f64 = 0.7;

#[derive(Debug, Clone, Deserialize)]
struct BaselineFile {
    #[serde(default)]
    items: Vec<BaselineEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct BaselineEntry {
    order: u32,
    #[serde(default)]
    segments: Vec<BaselineSegment>,
    #[serde(default)]
    answer: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct BaselineSegment {
    #[serde(default, alias = "raw")]
    text: String,
}

#[derive(Debug, Clone, Default)]
pub struct BaselineDiff {
    label: String,
    entries: Option<HashMap<u32, BaselineEntry>>,
}

impl BaselineDiff {
    /// A reporter without a baseline; every report says so.
    pub fn disabled(label: &str) -> Self {
        Self {
            label: label.to_string(),
            entries: None,
        }
    }

    pub fn load(path: Option<&Path>, label: &str) -> Self {
        let Some(path) = path else {
            return Self::disabled(label);
        };
        let parsed = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<BaselineFile>(&raw).map_err(anyhow::Error::from));
        match parsed {
            Ok(file) => Self {
                label: label.to_string(),
                entries: Some(file.items.into_iter().map(|e| (e.order, e)).collect()),
            },
            Err(e) => {
                warn!(path = %path.display(), "Grammar baseline load failed: {e}");
                Self::disabled(label)
            }
        }
    }

    pub fn compare(&self, order: Option<u32>, item: &Item) -> DiffReport {
        let mut report = DiffReport {
            baseline: self.label.clone(),
            has_baseline: false,
            issues: Vec::new(),
        };
        let Some(entries) = &self.entries else {
            return report;
        };
        let Some(baseline) = order.and_then(|o| entries.get(&o)) else {
            let shown = order.map_or_else(|| "none".to_string(), |o| o.to_string());
            report.issues.push(format!("baseline order {shown} not found"));
            return report;
        };
        report.has_baseline = true;

        let expected: Vec<String> = baseline
            .segments
            .iter()
            .map(|s| normalize_whitespace(&s.text))
            .collect();
        let actual: Vec<String> = item.options.iter().map(|o| option_segment(o)).collect();

        if expected.len() != actual.len() {
            report.issues.push(format!(
                "segment_count mismatch: baseline {} vs candidate {}",
                expected.len(),
                actual.len()
            ));
        } else {
            for (index, (base, candidate)) in expected.iter().zip(&actual).enumerate() {
                if base.is_empty() || candidate.is_empty() {
                    continue;
                }
                let overlap = token_overlap(base, candidate);
                if overlap < MIN_OVERLAP {
                    report.issues.push(format!(
                        "segment {} low overlap ({:.1}%)",
                        index + 1,
                        overlap * 100.0
                    ));
                }
            }
        }

        if let Some(answer) = baseline.answer.as_ref().and_then(answer_text) {
            let candidate = item.answer_string();
            if answer != candidate {
                report
                    .issues
                    .push(format!("answer mismatch: baseline {answer} vs candidate {candidate}"));
            }
        }
        report
    }
}

fn option_segment(option: &str) -> String {
    let body = strip_leading_marker(option);
    underlined_segments(body)
        .into_iter()
        .next()
        .unwrap_or_else(|| normalize_whitespace(&strip_tags(body)))
}

fn answer_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(answer_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Shared distinct lowercase tokens over the larger token set.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let a = normalize_whitespace(a).to_lowercase();
    let b = normalize_whitespace(b).to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    let shared = left.intersection(&right).count();
    shared as f64 / left.len().max(right.len()).max(1) as f64
}
