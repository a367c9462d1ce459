//! Problem repository. Persists generated items and serves cached ones back
//! through the exposure scheduler.
//!
//! Every read goes through the same gate: rows are mapped into [`Item`]s
//! (malformed rows dropped) and re-checked with [`accept_cached`].

pub mod postgres;

#[cfg(test)]
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contracts::accept_cached;
use crate::exposure::{ExposureOutcome, ExposurePolicy, ExposureRecord};
use crate::items::model::{parse_answer, GeneratorTag, Item, ItemMetadata, ItemType};
use crate::items::source_label::ensure_source_label;

/// Longest retirement reason kept in metadata.
const MAX_REASON_CHARS: usize = 300;

// ────────────────────────────────────────────────────────────────────────────
// Rows
// ────────────────────────────────────────────────────────────────────────────

/// One `items` row, optionally joined with the learner's exposure columns.
#[derive(Debug, Clone, FromRow)]
pub struct ItemRow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub item_type: String,
    pub question: String,
    pub passage: String,
    pub options: String,
    pub answer: String,
    pub explanation: String,
    pub difficulty: String,
    pub source_label: Option<String>,
    pub is_active: bool,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_result: Option<String>,
    pub correct_count: Option<i32>,
    pub incorrect_count: Option<i32>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_answered_at: Option<DateTime<Utc>>,
}

/// Column values for a new `items` row.
#[derive(Debug, Clone)]
pub struct NewItemRow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub item_type: String,
    pub question: String,
    pub passage: String,
    pub options: String,
    pub answer: String,
    pub explanation: String,
    pub difficulty: String,
    pub source_label: String,
    pub is_active: bool,
    pub metadata: String,
}

impl NewItemRow {
    pub fn from_item(document_id: Uuid, item: &Item) -> Result<Self> {
        Ok(Self {
            id: item.id.unwrap_or_else(Uuid::new_v4),
            document_id,
            item_type: item.item_type.as_str().to_string(),
            question: item.question.clone(),
            passage: item.passage.clone(),
            options: serde_json::to_string(&item.options).context("serializing options")?,
            answer: item.answer_string(),
            explanation: item.explanation.clone(),
            difficulty: item.difficulty.clone(),
            source_label: item.source_label.clone(),
            is_active: item.is_active,
            metadata: serde_json::to_string(&item.metadata).context("serializing metadata")?,
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("unknown item type '{0}'")]
    UnknownType(String),

    #[error("malformed options: {0}")]
    Options(String),

    #[error("malformed answer '{0}'")]
    Answer(String),

    #[error("malformed metadata: {0}")]
    Metadata(String),

    #[error("unsupported generator")]
    Generator,
}

impl ItemRow {
    fn exposure(&self) -> Option<ExposureRecord> {
        let touched = self.last_result.is_some()
            || self.last_seen_at.is_some()
            || self.last_answered_at.is_some();
        touched.then(|| ExposureRecord {
            last_result: self.last_result.as_deref().map(ExposureOutcome::parse),
            correct_count: self.correct_count.unwrap_or(0),
            incorrect_count: self.incorrect_count.unwrap_or(0),
            last_seen_at: self.last_seen_at,
            last_answered_at: self.last_answered_at,
        })
    }

    /// Maps a stored row into an item. Rows whose metadata names a generator
    /// outside [`GeneratorTag`] fail here, as do rows with no generator at all.
    pub fn into_item(self) -> Result<Item, RowError> {
        let item_type =
            ItemType::parse(&self.item_type).ok_or_else(|| RowError::UnknownType(self.item_type.clone()))?;
        let options: Vec<String> =
            serde_json::from_str(&self.options).map_err(|e| RowError::Options(e.to_string()))?;
        let answer = parse_answer(&self.answer).ok_or_else(|| RowError::Answer(self.answer.clone()))?;
        let metadata: ItemMetadata = match self.metadata.as_deref().map(str::trim) {
            None | Some("") => ItemMetadata::default(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| RowError::Metadata(e.to_string()))?,
        };
        if metadata.generator.is_none() {
            return Err(RowError::Generator);
        }
        let exposure = self.exposure();
        Ok(Item {
            id: Some(self.id),
            item_type,
            question: self.question,
            passage: self.passage,
            options,
            answer,
            explanation: self.explanation,
            difficulty: self.difficulty,
            source_label: self.source_label.unwrap_or_default(),
            is_active: self.is_active,
            metadata,
            exposure,
        })
    }
}

/// Maps rows and drops everything that is malformed or fails its contract.
fn accept_rows(rows: Vec<ItemRow>) -> Vec<Item> {
    let total = rows.len();
    let items: Vec<Item> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id;
            match row.into_item() {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(item_id = %id, "Skipping stored item: {e}");
                    None
                }
            }
        })
        .filter(accept_cached)
        .collect();
    if items.len() < total {
        debug!(kept = items.len(), total, "Filtered cached rows");
    }
    items
}

/// Stored type tags matching `kind`, legacy aliases included.
pub fn type_tags(kind: ItemType) -> Vec<String> {
    match kind {
        ItemType::Topic => vec!["topic".to_string(), "theme".to_string()],
        other => vec![other.as_str().to_string()],
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SampleQuery {
    pub document_id: Uuid,
    pub kind: ItemType,
    pub exclude_ids: Vec<Uuid>,
    pub limit: i64,
    /// Joins this learner's exposure columns when set.
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub document_id: Option<Uuid>,
    pub kind: Option<ItemType>,
    pub include_inactive: bool,
    pub limit: i64,
}

/// Storage operations the repository needs.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn insert_item(&self, row: &NewItemRow) -> Result<Uuid>;

    /// Random sample of active rows.
    async fn sample_items(&self, query: &SampleQuery) -> Result<Vec<ItemRow>>;

    async fn mark_pending(&self, user_id: Uuid, item_ids: &[Uuid], at: DateTime<Utc>) -> Result<()>;

    async fn record_outcome(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        correct: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn count_items(&self, document_id: Uuid, kind: ItemType) -> Result<i64>;

    /// Deletes all but the newest `keep` rows; returns how many were removed.
    async fn prune_items(&self, document_id: Uuid, kind: ItemType, keep: i64) -> Result<u64>;

    async fn export_items(&self, filter: &ExportFilter) -> Result<Vec<ItemRow>>;

    /// The learner's incorrectly answered active items, most recent first.
    async fn incorrect_items(&self, user_id: Uuid, limit: i64) -> Result<Vec<ItemRow>>;

    async fn count_incorrect(&self, user_id: Uuid) -> Result<i64>;

    async fn items_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ItemRow>>;

    async fn item_by_id(&self, id: Uuid) -> Result<Option<ItemRow>>;

    /// Returns false when no row has `id`.
    async fn update_activation(&self, id: Uuid, active: bool, metadata: &str) -> Result<bool>;

    async fn retire_exposures(&self, item_id: Uuid) -> Result<u64>;
}

// ────────────────────────────────────────────────────────────────────────────
// Repository
// ────────────────────────────────────────────────────────────────────────────

/// Cached-item request for one learner.
#[derive(Debug, Clone)]
pub struct CachedRequest {
    pub document_id: Uuid,
    pub kind: ItemType,
    pub count: usize,
    pub user_id: Option<Uuid>,
    pub exclude_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueue {
    pub items: Vec<Item>,
    pub total_incorrect: i64,
}

#[derive(Debug, Clone)]
pub struct Activation<'a> {
    pub active: bool,
    pub actor: Option<Uuid>,
    pub reason: Option<&'a str>,
}

pub struct ItemRepository {
    store: Arc<dyn ItemStore>,
    policy: ExposurePolicy,
    cache_limit: usize,
}

impl ItemRepository {
    pub fn new(store: Arc<dyn ItemStore>, policy: ExposurePolicy, cache_limit: usize) -> Self {
        Self {
            store,
            policy,
            cache_limit,
        }
    }

    /// Inserts items under `document_id` and prunes each touched type down to
    /// the cache limit. Returns the saved items with their ids.
    pub async fn save_items(
        &self,
        document_id: Uuid,
        doc_title: Option<&str>,
        items: Vec<Item>,
    ) -> Result<Vec<Item>> {
        let mut saved = Vec::with_capacity(items.len());
        let mut kinds = Vec::new();
        for mut item in items {
            backfill(&mut item, doc_title);
            let row = NewItemRow::from_item(document_id, &item)?;
            let id = self.store.insert_item(&row).await?;
            item.id = Some(id);
            if !kinds.contains(&item.item_type) {
                kinds.push(item.item_type);
            }
            saved.push(item);
        }
        info!(%document_id, count = saved.len(), "Saved items");

        for kind in kinds {
            if let Err(e) = self.prune(document_id, kind).await {
                warn!(%document_id, item_type = %kind, "Cache prune failed: {e:#}");
            }
        }
        Ok(saved)
    }

    async fn prune(&self, document_id: Uuid, kind: ItemType) -> Result<()> {
        let limit = self.cache_limit as i64;
        let count = self.store.count_items(document_id, kind).await?;
        if count <= limit {
            return Ok(());
        }
        let removed = self.store.prune_items(document_id, kind, limit).await?;
        info!(%document_id, item_type = %kind, removed, "Pruned cached items");
        Ok(())
    }

    /// Samples cached items and lets the scheduler pick what the learner sees.
    pub async fn fetch_cached<R: Rng + Send + ?Sized>(
        &self,
        request: &CachedRequest,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<Item>> {
        if request.count == 0 {
            return Ok(Vec::new());
        }
        let query = SampleQuery {
            document_id: request.document_id,
            kind: request.kind,
            exclude_ids: request.exclude_ids.clone(),
            limit: self.policy.calculate_fetch_count(request.count) as i64,
            user_id: request.user_id,
        };
        let rows = self.store.sample_items(&query).await?;
        let pool = accept_rows(rows);
        let pool_size = pool.len();
        let items = self.policy.schedule(pool, request.count, now, rng);
        debug!(
            document_id = %request.document_id,
            item_type = %request.kind,
            pool_size,
            served = items.len(),
            "Scheduled cached items"
        );
        Ok(items)
    }

    /// [`fetch_cached`](Self::fetch_cached), then marks the served items pending.
    pub async fn serve_cached<R: Rng + Send + ?Sized>(
        &self,
        request: &CachedRequest,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<Item>> {
        let items = self.fetch_cached(request, now, rng).await?;
        if let Some(user_id) = request.user_id {
            let ids: Vec<Uuid> = items.iter().filter_map(|i| i.id).collect();
            if !ids.is_empty() {
                self.store.mark_pending(user_id, &ids, now).await?;
            }
        }
        Ok(items)
    }

    pub async fn list_for_export(&self, filter: &ExportFilter) -> Result<Vec<Item>> {
        Ok(accept_rows(self.store.export_items(filter).await?))
    }

    pub async fn review_queue(&self, user_id: Uuid, limit: usize) -> Result<ReviewQueue> {
        let rows = self.store.incorrect_items(user_id, limit as i64).await?;
        let total_incorrect = self.store.count_incorrect(user_id).await?;
        Ok(ReviewQueue {
            items: accept_rows(rows),
            total_incorrect,
        })
    }

    /// Valid items among `ids`, in the order requested.
    pub async fn items_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_id: HashMap<Uuid, Item> = accept_rows(self.store.items_by_ids(ids).await?)
            .into_iter()
            .filter_map(|item| item.id.map(|id| (id, item)))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Records a learner's answer. Returns false when the item does not exist.
    pub async fn record_answer(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        correct: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.store.item_by_id(item_id).await?.is_none() {
            return Ok(false);
        }
        self.store.record_outcome(user_id, item_id, correct, now).await?;
        debug!(%user_id, %item_id, correct, "Recorded answer");
        Ok(true)
    }

    /// Soft-deactivates or restores an item. Returns false when it does not exist.
    pub async fn set_active(
        &self,
        item_id: Uuid,
        change: &Activation<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(row) = self.store.item_by_id(item_id).await? else {
            return Ok(false);
        };
        let mut metadata = match row.metadata.as_deref().map(str::trim) {
            None | Some("") => Map::new(),
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => anyhow::bail!("item {item_id} has malformed metadata"),
            },
        };
        annotate_activation(&mut metadata, change, now);
        let metadata = serde_json::to_string(&metadata)?;

        if !self
            .store
            .update_activation(item_id, change.active, &metadata)
            .await?
        {
            return Ok(false);
        }
        if !change.active {
            let retired = self.store.retire_exposures(item_id).await?;
            info!(%item_id, retired_exposures = retired, "Deactivated item");
        } else {
            info!(%item_id, "Restored item");
        }
        Ok(true)
    }
}

/// Fills provenance fields a validator may have left empty.
fn backfill(item: &mut Item, doc_title: Option<&str>) {
    let metadata = &mut item.metadata;
    if metadata.document_title.is_none() {
        metadata.document_title = doc_title.map(str::to_string);
    }
    let label = Some(item.source_label.as_str()).filter(|l| !l.trim().is_empty());
    item.source_label = ensure_source_label(label, metadata.document_title.as_deref());
    metadata.source_label = Some(item.source_label.clone());
    if metadata.generator.is_none() {
        metadata.generator = Some(GeneratorTag::Model);
    }
}

fn annotate_activation(metadata: &mut Map<String, Value>, change: &Activation<'_>, now: DateTime<Utc>) {
    if change.active {
        metadata.remove("retired");
        metadata.insert("restoredAt".to_string(), Value::String(now.to_rfc3339()));
        match change.actor {
            Some(actor) => metadata.insert("restoredBy".to_string(), Value::String(actor.to_string())),
            None => metadata.remove("restoredBy"),
        };
        return;
    }
    let mut note = Map::new();
    note.insert("at".to_string(), Value::String(now.to_rfc3339()));
    if let Some(actor) = change.actor {
        note.insert("by".to_string(), Value::String(actor.to_string()));
    }
    if let Some(reason) = change.reason.map(str::trim).filter(|r| !r.is_empty()) {
        let reason: String = reason.chars().take(MAX_REASON_CHARS).collect();
        note.insert("reason".to_string(), Value::String(reason));
    }
    metadata.insert("retired".to_string(), Value::Object(note));
    metadata.remove("restoredAt");
    metadata.remove("restoredBy");
}
