//! Item generation. Retries across model tiers and feeds validation failures
//! back as directives. The static bank answers when every attempt fails.
//!
//! Flow per item: prompt → generate → parse (→ repair call) → validate.
//! A failure becomes directives for the next attempt; the first valid item wins.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::contracts::{self, ValidationContext};
use crate::generation::diff::BaselineDiff;
use crate::generation::directives::DirectiveSet;
use crate::generation::fallback::FallbackBank;
use crate::generation::manuals::ManualLibrary;
use crate::generation::parse::{parse_candidate, ParseFailure};
use crate::generation::prompts::{build_item_prompt, build_repair_prompt, PromptInput};
use crate::generation::settings::{GenerationSettings, ModelTier};
use crate::generation::slots::choose_answer_slot;
use crate::items::model::{GeneratorTag, Item, ItemType};
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, REPAIR_SYSTEM};
use crate::llm_client::{CompletionRequest, TextGenerator};

pub const DEADLINE_REASON: &str = "generation deadline exceeded";

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no passages supplied")]
    NoPassages,

    #[error("{kind} generation exhausted after {attempts} attempts: {reason}")]
    Exhausted {
        kind: ItemType,
        attempts: u32,
        reason: String,
    },
}

/// One item to generate from one passage.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub kind: ItemType,
    pub passage: &'a str,
    pub doc_title: Option<&'a str>,
    pub document_code: Option<&'a str>,
    pub source_label: Option<&'a str>,
    /// Position used to look up the grammar baseline.
    pub order: Option<u32>,
    pub passage_index: usize,
    /// Requested answer slot (1-based) for single-answer grammar items.
    pub desired_slot: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptLogEntry {
    pub attempt: u32,
    pub repair: bool,
    pub model: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub item: Item,
    pub used_fallback: bool,
    pub attempts: u32,
    pub attempt_log: Vec<AttemptLogEntry>,
}

/// `count` items over `passages`, round-robin.
#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub kind: ItemType,
    pub passages: &'a [String],
    /// Parallel to `passages`; missing entries mean no ingestion label.
    pub source_labels: &'a [Option<String>],
    pub doc_title: Option<&'a str>,
    pub document_code: Option<&'a str>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub items: Vec<Item>,
    pub fallback_count: usize,
    pub duplicates_dropped: usize,
    pub attempt_log: Vec<AttemptLogEntry>,
    /// Set when an item could be neither generated nor templated; the batch
    /// stops there and `items` holds what was produced before it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exhausted: Option<String>,
}

/// Threaded through every attempt of one item.
#[derive(Debug, Default)]
struct AttemptState {
    directives: DirectiveSet,
    last_failure: Option<String>,
    attempts: u32,
    log: Vec<AttemptLogEntry>,
}

impl AttemptState {
    fn fail(mut self, model: &str, failure: AttemptFailure) -> Self {
        self.directives.absorb(&failure.reason);
        self.log.push(AttemptLogEntry {
            attempt: self.attempts,
            repair: false,
            model: model.to_string(),
            error: failure.reason.clone(),
        });
        if let Some(repair_error) = failure.repair_error {
            self.directives.absorb(&repair_error);
            self.log.push(AttemptLogEntry {
                attempt: self.attempts,
                repair: true,
                model: model.to_string(),
                error: repair_error.clone(),
            });
            self.last_failure = Some(format!("{} :: repair_failed({repair_error})", failure.reason));
        } else {
            self.last_failure = Some(failure.reason);
        }
        self
    }
}

struct AttemptFailure {
    reason: String,
    repair_error: Option<String>,
}

impl AttemptFailure {
    fn new(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
            repair_error: None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ────────────────────────────────────────────────────────────────────────────

pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    settings: GenerationSettings,
    manuals: Arc<ManualLibrary>,
    fallback: FallbackBank,
    diff: BaselineDiff,
    deadline: Duration,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        settings: GenerationSettings,
        manuals: Arc<ManualLibrary>,
        fallback: FallbackBank,
        diff: BaselineDiff,
        deadline: Duration,
    ) -> Self {
        Self {
            generator,
            settings,
            manuals,
            fallback,
            diff,
            deadline,
        }
    }

    /// Generates one contract-valid item, falling back to the static bank
    /// when every attempt fails or the deadline passes.
    pub async fn generate<R: Rng + Send + ?Sized>(
        &self,
        request: &GenerationRequest<'_>,
        rng: &mut R,
    ) -> Result<GenerationOutcome, GenerationError> {
        let manual = self.manuals.excerpt(request.kind);
        let variant_tag = variant_tag(request, rng);
        let mut state = AttemptState::default();

        let result = tokio::time::timeout(
            self.deadline,
            self.run_attempts(request, &manual, &variant_tag, &mut state, rng),
        )
        .await;

        match result {
            Ok(Some((mut item, model))) => {
                let diff = matches!(request.kind, ItemType::Grammar | ItemType::GrammarMulti)
                    .then(|| self.diff.compare(request.order, &item));
                let metadata = &mut item.metadata;
                metadata.generator = Some(GeneratorTag::Model);
                metadata.model = Some(model);
                metadata.attempts = Some(state.attempts);
                metadata.diff = diff;
                info!(
                    item_type = %request.kind,
                    attempts = state.attempts,
                    "Generated item"
                );
                Ok(GenerationOutcome {
                    item,
                    used_fallback: false,
                    attempts: state.attempts,
                    attempt_log: state.log,
                })
            }
            Ok(None) => {
                let reason = state
                    .last_failure
                    .clone()
                    .unwrap_or_else(|| "no model attempts configured".to_string());
                self.fall_back(request, state, reason, rng)
            }
            Err(_) => {
                warn!(
                    item_type = %request.kind,
                    deadline_secs = self.deadline.as_secs(),
                    "Generation deadline exceeded"
                );
                self.fall_back(request, state, DEADLINE_REASON.to_string(), rng)
            }
        }
    }

    /// Runs every tier's attempts in order; the first valid item wins.
    async fn run_attempts<R: Rng + Send + ?Sized>(
        &self,
        request: &GenerationRequest<'_>,
        manual: &str,
        variant_tag: &str,
        state: &mut AttemptState,
        rng: &mut R,
    ) -> Option<(Item, String)> {
        for tier in &self.settings.models {
            for _ in 0..tier.retries {
                state.attempts += 1;
                match self
                    .attempt(request, tier, manual, variant_tag, state, rng)
                    .await
                {
                    Ok(item) => return Some((item, tier.name.clone())),
                    Err(failure) => {
                        warn!(
                            item_type = %request.kind,
                            attempt = state.attempts,
                            model = %tier.name,
                            "Attempt failed: {}",
                            failure.reason
                        );
                        *state = std::mem::take(state).fail(&tier.name, failure);
                    }
                }
            }
        }
        None
    }

    async fn attempt<R: Rng + Send + ?Sized>(
        &self,
        request: &GenerationRequest<'_>,
        tier: &ModelTier,
        manual: &str,
        variant_tag: &str,
        state: &AttemptState,
        rng: &mut R,
    ) -> Result<Item, AttemptFailure> {
        let desired_slot = match request.kind {
            ItemType::Grammar if state.attempts <= self.settings.slot_hint_attempts => {
                request.desired_slot
            }
            _ => None,
        };
        let prompt = build_item_prompt(&PromptInput {
            kind: request.kind,
            passage: request.passage,
            doc_title: request.doc_title,
            manual,
            variant_tag,
            desired_slot,
            directives: &state.directives,
            last_failure: state.last_failure.as_deref(),
        });

        let raw = self
            .generator
            .complete(&CompletionRequest {
                model: &tier.name,
                system: JSON_ONLY_SYSTEM,
                prompt: &prompt,
                temperature: tier.temperature,
                max_tokens: tier.max_tokens,
            })
            .await
            .map_err(AttemptFailure::new)?;

        let ctx = ValidationContext {
            doc_title: request.doc_title,
            document_code: request.document_code,
            source_label: request.source_label,
            desired_answer: desired_slot,
            variant_tag: Some(variant_tag),
            ..ValidationContext::new(request.passage)
        };

        let candidate = match parse_candidate(&raw) {
            Ok(candidate) => candidate,
            Err(ParseFailure::Empty) => return Err(AttemptFailure::new(ParseFailure::Empty)),
            Err(failure @ ParseFailure::Unparseable(_)) => {
                let reason = failure.to_string();
                debug!(item_type = %request.kind, "Issuing repair call: {reason}");
                return match self.repair(request.kind, tier, &raw, &reason).await {
                    Ok(candidate) => contracts::normalize(request.kind, &candidate, &ctx, rng)
                        .map_err(|e| AttemptFailure {
                            reason,
                            repair_error: Some(e.to_string()),
                        }),
                    Err(repair_error) => Err(AttemptFailure {
                        reason,
                        repair_error: Some(repair_error),
                    }),
                };
            }
        };

        contracts::normalize(request.kind, &candidate, &ctx, rng).map_err(AttemptFailure::new)
    }

    /// One out-of-band call that resubmits unparseable output.
    async fn repair(
        &self,
        kind: ItemType,
        tier: &ModelTier,
        raw: &str,
        reason: &str,
    ) -> Result<serde_json::Value, String> {
        let prompt = build_repair_prompt(kind, raw, reason);
        let repaired = self
            .generator
            .complete(&CompletionRequest {
                model: &tier.name,
                system: REPAIR_SYSTEM,
                prompt: &prompt,
                temperature: 0.0,
                max_tokens: tier.max_tokens,
            })
            .await
            .map_err(|e| e.to_string())?;
        parse_candidate(&repaired).map_err(|e| e.to_string())
    }

    fn fall_back<R: Rng + ?Sized>(
        &self,
        request: &GenerationRequest<'_>,
        state: AttemptState,
        reason: String,
        rng: &mut R,
    ) -> Result<GenerationOutcome, GenerationError> {
        let Some(mut item) = self
            .fallback
            .next(request.kind, &reason, request.doc_title, rng)
        else {
            return Err(GenerationError::Exhausted {
                kind: request.kind,
                attempts: state.attempts,
                reason,
            });
        };
        warn!(
            item_type = %request.kind,
            attempts = state.attempts,
            "Using fallback item: {reason}"
        );
        item.metadata.attempts = Some(state.attempts);
        item.metadata.document_code = request.document_code.map(str::to_string);
        Ok(GenerationOutcome {
            item,
            used_fallback: true,
            attempts: state.attempts,
            attempt_log: state.log,
        })
    }

    /// Generates `count` items sequentially over the passages, balancing
    /// grammar answer slots within the batch and dropping duplicates.
    pub async fn generate_batch<R: Rng + Send + ?Sized>(
        &self,
        batch: &BatchRequest<'_>,
        rng: &mut R,
    ) -> Result<BatchOutcome, GenerationError> {
        if batch.passages.is_empty() {
            return Err(GenerationError::NoPassages);
        }
        let mut outcome = BatchOutcome::default();
        let mut slot_history: Vec<u8> = Vec::new();
        let mut seen = HashSet::new();

        for index in 0..batch.count {
            let passage_index = index % batch.passages.len();
            let desired_slot = (batch.kind == ItemType::Grammar)
                .then(|| choose_answer_slot(&slot_history, rng));
            let request = GenerationRequest {
                kind: batch.kind,
                passage: &batch.passages[passage_index],
                doc_title: batch.doc_title,
                document_code: batch.document_code,
                source_label: batch
                    .source_labels
                    .get(passage_index)
                    .and_then(|l| l.as_deref()),
                order: Some(index as u32 + 1),
                passage_index,
                desired_slot,
            };
            let generated = match self.generate(&request, rng).await {
                Ok(generated) => generated,
                Err(e @ GenerationError::Exhausted { .. }) => {
                    warn!(
                        item_type = %batch.kind,
                        index,
                        produced = outcome.items.len(),
                        "Stopping batch: {e}"
                    );
                    outcome.exhausted = Some(e.to_string());
                    break;
                }
                Err(e) => return Err(e),
            };

            outcome.attempt_log.extend(generated.attempt_log);
            if let Some(answer) = generated.item.primary_answer() {
                slot_history.push(answer);
            }
            if !seen.insert(generated.item.content_signature()) {
                debug!(item_type = %batch.kind, index, "Dropping duplicate item");
                outcome.duplicates_dropped += 1;
                continue;
            }
            if generated.used_fallback {
                outcome.fallback_count += 1;
            }
            outcome.items.push(generated.item);
        }
        Ok(outcome)
    }
}

fn variant_tag<R: Rng + ?Sized>(request: &GenerationRequest<'_>, rng: &mut R) -> String {
    let prefix = match request.kind {
        ItemType::Blank => "B",
        ItemType::Vocabulary => "V",
        ItemType::Grammar | ItemType::GrammarMulti => "G",
        ItemType::Title => "T",
        ItemType::Topic => "P",
    };
    format!(
        "{prefix}-{}-{}-{:06x}",
        Utc::now().timestamp_millis(),
        request.passage_index,
        rng.gen_range(0..0x0100_0000u32)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::fake::{Script, ScriptedGenerator};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    const PASSAGE: &str = "Cities that plant more trees see cooler summers, cleaner air and \
        calmer residents. Urban planners now treat green space as infrastructure rather than \
        decoration.";

    fn title_candidate(first_option: &str) -> String {
        json!({
            "question": "다음 글의 제목으로 가장 적절한 것은?",
            "options": [
                first_option,
                "The Hidden Costs of Maintaining City Parks Every Year",
                "How Air Pollution Spreads Between Neighboring Countries Quickly",
                "A Brief History of Decorative Gardens in Europe",
                "Why Residents Prefer Quiet Suburbs Over Busy Cities"
            ],
            "correctAnswer": 1,
            "explanation": "글은 도시의 나무가 기온과 공기 질을 개선하여 녹지가 기반 시설로 취급된다고 설명합니다. \
                따라서 나무가 필수적인 도시 기반 시설이 되고 있다는 ①이 제목으로 가장 적절합니다."
        })
        .to_string()
    }

    fn valid_title() -> String {
        title_candidate("Why Trees Are Becoming Essential Urban Infrastructure")
    }

    fn three_option_title() -> String {
        json!({
            "question": "다음 글의 제목으로 가장 적절한 것은?",
            "options": ["One Two Three Four Five Six", "Seven Eight Nine Ten Eleven Twelve",
                        "Alpha Beta Gamma Delta Epsilon Zeta"],
            "correctAnswer": 1,
            "explanation": "짧은 해설."
        })
        .to_string()
    }

    fn orchestrator(generator: Arc<ScriptedGenerator>, fallback: FallbackBank) -> Orchestrator {
        let settings = GenerationSettings {
            models: vec![
                ModelTier::new("fast", 2, 0.25, 900),
                ModelTier::new("strong", 2, 0.2, 1100),
            ],
            ..GenerationSettings::default()
        };
        Orchestrator::new(
            generator,
            settings,
            Arc::new(ManualLibrary::new("/nonexistent/manuals")),
            fallback,
            BaselineDiff::disabled("test"),
            Duration::from_secs(30),
        )
    }

    fn request(kind: ItemType) -> GenerationRequest<'static> {
        GenerationRequest {
            kind,
            passage: PASSAGE,
            doc_title: Some("Mock Exam"),
            document_code: Some("DOC-1"),
            source_label: None,
            order: Some(1),
            passage_index: 0,
            desired_slot: None,
        }
    }

    #[tokio::test]
    async fn test_retries_with_directives_until_valid() {
        let generator = Arc::new(ScriptedGenerator::replies([
            "not json at all".to_string(),
            "still not json".to_string(),
            three_option_title(),
            valid_title(),
        ]));
        let orchestrator = orchestrator(generator.clone(), FallbackBank::builtin());
        let outcome = orchestrator
            .generate(&request(ItemType::Title), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();

        assert!(!outcome.used_fallback);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.item.metadata.generator, Some(GeneratorTag::Model));
        assert_eq!(outcome.item.metadata.model.as_deref(), Some("strong"));
        assert_eq!(outcome.item.metadata.attempts, Some(3));
        assert_eq!(outcome.item.source_label, "출처│Mock Exam");
        assert_eq!(outcome.item.metadata.document_code.as_deref(), Some("DOC-1"));

        // attempt 1 + its repair, attempt 2
        assert_eq!(outcome.attempt_log.len(), 3);
        assert!(outcome.attempt_log[0].error.starts_with("unparseable response"));
        assert!(outcome.attempt_log[1].repair);
        assert_eq!(outcome.attempt_log[2].error, "title options must contain 5 entries");

        let calls = generator.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[1].system, REPAIR_SYSTEM);
        assert!(calls[3].prompt.contains("Provide exactly five options"));
        assert!(calls[3]
            .prompt
            .contains("failed because: title options must contain 5 entries"));
        assert_eq!(calls[3].model, "strong");
    }

    #[tokio::test]
    async fn test_repair_call_can_rescue_an_attempt() {
        let generator = Arc::new(ScriptedGenerator::replies([
            "Sure! Here you go: {{{".to_string(),
            valid_title(),
        ]));
        let orchestrator = orchestrator(generator.clone(), FallbackBank::builtin());
        let outcome = orchestrator
            .generate(&request(ItemType::Title), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.attempt_log.is_empty());
        assert_eq!(generator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_responses_fall_back() {
        let generator = Arc::new(ScriptedGenerator::default());
        let orchestrator = orchestrator(generator.clone(), FallbackBank::builtin());
        let outcome = orchestrator
            .generate(&request(ItemType::Title), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();

        assert!(outcome.used_fallback);
        assert_eq!(outcome.attempts, 4);
        // Empty output never triggers a repair call.
        assert_eq!(generator.calls().len(), 4);
        assert_eq!(outcome.item.metadata.generator, Some(GeneratorTag::Fallback));
        assert_eq!(
            outcome.item.metadata.fallback_reason.as_deref(),
            Some("empty response")
        );
        assert!(contracts::check_item(&outcome.item).is_ok());
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Script::Fail(529, "overloaded".to_string()),
            Script::Reply(valid_title()),
        ]));
        let orchestrator = orchestrator(generator, FallbackBank::builtin());
        let outcome = orchestrator
            .generate(&request(ItemType::Title), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.attempt_log[0].error,
            "API error (status 529): overloaded"
        );
    }

    #[tokio::test]
    async fn test_exhausted_without_template() {
        let generator = Arc::new(ScriptedGenerator::default());
        let orchestrator = orchestrator(generator, FallbackBank::empty());
        let err = orchestrator
            .generate(&request(ItemType::Topic), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Exhausted { kind: ItemType::Topic, attempts: 4, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_uses_fallback() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Script::Hang]));
        let orchestrator = orchestrator(generator, FallbackBank::builtin());
        let outcome = orchestrator
            .generate(&request(ItemType::Grammar), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(
            outcome.item.metadata.fallback_reason.as_deref(),
            Some(DEADLINE_REASON)
        );
    }

    #[tokio::test]
    async fn test_grammar_slot_hint_only_in_early_attempts() {
        let generator = Arc::new(ScriptedGenerator::default());
        let orchestrator = orchestrator(generator.clone(), FallbackBank::builtin());
        let mut grammar = request(ItemType::Grammar);
        grammar.desired_slot = Some(2);
        orchestrator
            .generate(&grammar, &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();

        let calls = generator.calls();
        assert_eq!(calls.len(), 4);
        for call in &calls[..3] {
            assert!(call.prompt.contains("Place the single grammar error in option ②"));
        }
        assert!(!calls[3].prompt.contains("Place the single grammar error"));
    }

    #[tokio::test]
    async fn test_batch_dedupes_and_rejects_empty_input() {
        let generator = Arc::new(ScriptedGenerator::replies([
            valid_title(),
            valid_title(),
            title_candidate("Green Spaces Now Count as Vital City Infrastructure"),
        ]));
        let orchestrator = orchestrator(generator, FallbackBank::builtin());
        let passages = vec![PASSAGE.to_string()];
        let labels = vec![Some("출처│2024 Mock Exam".to_string())];
        let batch = BatchRequest {
            kind: ItemType::Title,
            passages: &passages,
            source_labels: &labels,
            doc_title: Some("Mock Exam"),
            document_code: None,
            count: 3,
        };
        let outcome = orchestrator
            .generate_batch(&batch, &mut StdRng::seed_from_u64(4))
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.duplicates_dropped, 1);
        assert_eq!(outcome.fallback_count, 0);
        assert_eq!(outcome.items[0].source_label, "출처│2024 Mock Exam");

        let empty = BatchRequest {
            passages: &[],
            ..batch
        };
        assert!(matches!(
            orchestrator
                .generate_batch(&empty, &mut StdRng::seed_from_u64(4))
                .await,
            Err(GenerationError::NoPassages)
        ));
    }

    #[tokio::test]
    async fn test_batch_keeps_items_made_before_exhaustion() {
        let generator = Arc::new(ScriptedGenerator::replies([valid_title()]));
        let orchestrator = orchestrator(generator, FallbackBank::empty());
        let passages = vec![PASSAGE.to_string()];
        let batch = BatchRequest {
            kind: ItemType::Title,
            passages: &passages,
            source_labels: &[],
            doc_title: None,
            document_code: None,
            count: 2,
        };
        let outcome = orchestrator
            .generate_batch(&batch, &mut StdRng::seed_from_u64(2))
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.fallback_count, 0);
        let reason = outcome.exhausted.unwrap();
        assert!(reason.contains("title generation exhausted after 4 attempts"));
    }
}
