//! Exposure scheduling: decides which cached items a learner should see again.
//!
//! Every decision is a pure function of the learner's exposure record, the
//! clock and an injected RNG.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::items::model::Item;

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureOutcome {
    Pending,
    Correct,
    Incorrect,
    Retired,
    #[serde(other)]
    Unknown,
}

impl ExposureOutcome {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => ExposureOutcome::Pending,
            "correct" => ExposureOutcome::Correct,
            "incorrect" => ExposureOutcome::Incorrect,
            "retired" => ExposureOutcome::Retired,
            _ => ExposureOutcome::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureOutcome::Pending => "pending",
            ExposureOutcome::Correct => "correct",
            ExposureOutcome::Incorrect => "incorrect",
            ExposureOutcome::Retired => "retired",
            ExposureOutcome::Unknown => "unknown",
        }
    }
}

/// A learner's history with one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub last_result: Option<ExposureOutcome>,
    pub correct_count: i32,
    pub incorrect_count: i32,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_answered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureDecision {
    Allow,
    Defer,
    Skip,
}

/// Tunables for re-serving previously missed items.
#[derive(Debug, Clone, Copy)]
pub struct ExposurePolicy {
    pub cooldown: Duration,
    pub base_probability: f64,
    pub bonus_per_miss: f64,
    pub max_probability: f64,
    pub fetch_multiplier: f64,
}

impl Default for ExposurePolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::minutes(20),
            base_probability: 0.45,
            bonus_per_miss: 0.12,
            max_probability: 0.92,
            fetch_multiplier: 4.0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduling
// ────────────────────────────────────────────────────────────────────────────

impl ExposurePolicy {
    /// Probability of re-serving an item missed `incorrect_count` times.
    /// Counts of zero or below are treated as one miss.
    pub fn compute_retry_probability(&self, incorrect_count: i32) -> f64 {
        let misses = incorrect_count.max(1) as f64;
        (self.base_probability + self.bonus_per_miss * (misses - 1.0)).min(self.max_probability)
    }

    /// Number of rows to sample so that filtering still leaves `requested` items.
    pub fn calculate_fetch_count(&self, requested: usize) -> usize {
        if requested == 0 {
            return 0;
        }
        let scaled = (requested as f64 * self.fetch_multiplier).ceil() as usize;
        scaled.max(requested)
    }

    pub fn decide<R: Rng + ?Sized>(
        &self,
        record: Option<&ExposureRecord>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> ExposureDecision {
        let Some(record) = record else {
            return ExposureDecision::Allow;
        };
        match &record.last_result {
            None => ExposureDecision::Allow,
            Some(ExposureOutcome::Pending) | Some(ExposureOutcome::Correct) => {
                ExposureDecision::Skip
            }
            Some(ExposureOutcome::Incorrect) => {
                if let Some(answered) = record.last_answered_at {
                    if now - answered < self.cooldown {
                        return ExposureDecision::Skip;
                    }
                }
                let probability = self.compute_retry_probability(record.incorrect_count);
                if rng.gen::<f64>() <= probability {
                    ExposureDecision::Allow
                } else {
                    ExposureDecision::Defer
                }
            }
            Some(ExposureOutcome::Retired) | Some(ExposureOutcome::Unknown) => {
                ExposureDecision::Skip
            }
        }
    }

    /// Picks up to `requested` items: every allowed item in pool order first,
    /// then deferred items to pad the result.
    pub fn schedule<R: Rng + ?Sized>(
        &self,
        pool: Vec<Item>,
        requested: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<Item> {
        let mut allowed = Vec::new();
        let mut deferred = Vec::new();
        for item in pool {
            match self.decide(item.exposure.as_ref(), now, rng) {
                ExposureDecision::Allow => allowed.push(item),
                ExposureDecision::Defer => deferred.push(item),
                ExposureDecision::Skip => {}
            }
        }
        allowed.extend(deferred);
        allowed.truncate(requested);
        allowed
    }
}
