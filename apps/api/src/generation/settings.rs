//! Model tiers and tunables for the generation loop.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One entry in the prioritized model list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTier {
    pub name: String,
    pub retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelTier {
    pub fn new(name: &str, retries: u32, temperature: f32, max_tokens: u32) -> Self {
        Self {
            name: name.to_string(),
            retries,
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    pub models: Vec<ModelTier>,
    /// Label written into grammar diff reports.
    pub baseline_label: String,
    /// Attempts (1-based, inclusive) that carry the grammar answer-slot hint.
    pub slot_hint_attempts: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            models: vec![
                ModelTier::new("claude-haiku-4-5", 3, 0.25, 900),
                ModelTier::new("claude-sonnet-4-5", 3, 0.2, 1100),
            ],
            baseline_label: "baseline".to_string(),
            slot_hint_attempts: 3,
        }
    }
}

impl GenerationSettings {
    /// Loads overrides from a JSON file. A missing or unreadable file leaves the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        let parsed = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<Self>(&raw).map_err(anyhow::Error::from));
        match parsed {
            Ok(settings) if !settings.models.is_empty() => settings,
            Ok(settings) => Self {
                models: Self::default().models,
                ..settings
            },
            Err(e) => {
                warn!(path = %path.display(), "Failed to load generation settings: {e}");
                Self::default()
            }
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.models.iter().map(|m| m.retries).sum()
    }
}
