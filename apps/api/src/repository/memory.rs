//! In-memory [`ItemStore`] for tests. Sampling returns rows in insertion order.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::exposure::{ExposureOutcome, ExposureRecord};
use crate::items::model::ItemType;
use crate::repository::{type_tags, ExportFilter, ItemRow, ItemStore, NewItemRow, SampleQuery};

struct StoredItem {
    row: NewItemRow,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    items: Vec<StoredItem>,
    exposures: HashMap<(Uuid, Uuid), ExposureRecord>,
}

#[derive(Default)]
pub struct MemoryItemStore {
    state: Mutex<State>,
}

impl MemoryItemStore {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn corrupt_metadata(&self, id: Uuid, metadata: &str) {
        if let Some(stored) = self.state().items.iter_mut().find(|s| s.row.id == id) {
            stored.row.metadata = metadata.to_string();
        }
    }

    pub fn corrupt_options(&self, id: Uuid, options: &str) {
        if let Some(stored) = self.state().items.iter_mut().find(|s| s.row.id == id) {
            stored.row.options = options.to_string();
        }
    }

    pub fn exposure(&self, user_id: Uuid, item_id: Uuid) -> Option<ExposureRecord> {
        self.state().exposures.get(&(user_id, item_id)).cloned()
    }
}

fn to_row(stored: &StoredItem, exposure: Option<&ExposureRecord>) -> ItemRow {
    let row = &stored.row;
    ItemRow {
        id: row.id,
        document_id: row.document_id,
        item_type: row.item_type.clone(),
        question: row.question.clone(),
        passage: row.passage.clone(),
        options: row.options.clone(),
        answer: row.answer.clone(),
        explanation: row.explanation.clone(),
        difficulty: row.difficulty.clone(),
        source_label: Some(row.source_label.clone()),
        is_active: row.is_active,
        metadata: Some(row.metadata.clone()),
        created_at: stored.created_at,
        last_result: exposure.and_then(|e| e.last_result.as_ref().map(|r| r.as_str().to_string())),
        correct_count: exposure.map(|e| e.correct_count),
        incorrect_count: exposure.map(|e| e.incorrect_count),
        last_seen_at: exposure.and_then(|e| e.last_seen_at),
        last_answered_at: exposure.and_then(|e| e.last_answered_at),
    }
}

fn matches_kind(row: &NewItemRow, kind: ItemType) -> bool {
    type_tags(kind).contains(&row.item_type)
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn insert_item(&self, row: &NewItemRow) -> Result<Uuid> {
        let mut state = self.state();
        // Strictly increasing so that pruning order is deterministic.
        let created_at = Utc::now() + Duration::microseconds(state.items.len() as i64);
        state.items.push(StoredItem {
            row: row.clone(),
            created_at,
        });
        Ok(row.id)
    }

    async fn sample_items(&self, query: &SampleQuery) -> Result<Vec<ItemRow>> {
        let state = self.state();
        Ok(state
            .items
            .iter()
            .filter(|s| {
                s.row.document_id == query.document_id
                    && s.row.is_active
                    && matches_kind(&s.row, query.kind)
                    && !query.exclude_ids.contains(&s.row.id)
            })
            .take(query.limit.max(0) as usize)
            .map(|s| {
                let exposure = query
                    .user_id
                    .and_then(|user| state.exposures.get(&(user, s.row.id)));
                to_row(s, exposure)
            })
            .collect())
    }

    async fn mark_pending(&self, user_id: Uuid, item_ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        for id in item_ids {
            let record = state.exposures.entry((user_id, *id)).or_default();
            record.last_result = Some(ExposureOutcome::Pending);
            record.last_seen_at = Some(at);
        }
        Ok(())
    }

    async fn record_outcome(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        correct: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state();
        let record = state.exposures.entry((user_id, item_id)).or_default();
        if correct {
            record.last_result = Some(ExposureOutcome::Correct);
            record.correct_count += 1;
        } else {
            record.last_result = Some(ExposureOutcome::Incorrect);
            record.incorrect_count += 1;
        }
        record.last_seen_at = Some(at);
        record.last_answered_at = Some(at);
        Ok(())
    }

    async fn count_items(&self, document_id: Uuid, kind: ItemType) -> Result<i64> {
        let state = self.state();
        Ok(state
            .items
            .iter()
            .filter(|s| s.row.document_id == document_id && matches_kind(&s.row, kind))
            .count() as i64)
    }

    async fn prune_items(&self, document_id: Uuid, kind: ItemType, keep: i64) -> Result<u64> {
        let mut state = self.state();
        let mut scoped: Vec<(DateTime<Utc>, Uuid)> = state
            .items
            .iter()
            .filter(|s| s.row.document_id == document_id && matches_kind(&s.row, kind))
            .map(|s| (s.created_at, s.row.id))
            .collect();
        scoped.sort_by(|a, b| b.0.cmp(&a.0));
        let doomed: Vec<Uuid> = scoped.into_iter().skip(keep.max(0) as usize).map(|(_, id)| id).collect();
        state.items.retain(|s| !doomed.contains(&s.row.id));
        state.exposures.retain(|(_, item), _| !doomed.contains(item));
        Ok(doomed.len() as u64)
    }

    async fn export_items(&self, filter: &ExportFilter) -> Result<Vec<ItemRow>> {
        let state = self.state();
        Ok(state
            .items
            .iter()
            .filter(|s| {
                filter.document_id.map_or(true, |d| s.row.document_id == d)
                    && filter.kind.map_or(true, |k| matches_kind(&s.row, k))
                    && (filter.include_inactive || s.row.is_active)
            })
            .take(filter.limit.max(0) as usize)
            .map(|s| to_row(s, None))
            .collect())
    }

    async fn incorrect_items(&self, user_id: Uuid, limit: i64) -> Result<Vec<ItemRow>> {
        let state = self.state();
        let mut rows: Vec<ItemRow> = state
            .items
            .iter()
            .filter(|s| s.row.is_active)
            .filter_map(|s| {
                let exposure = state.exposures.get(&(user_id, s.row.id))?;
                (exposure.last_result == Some(ExposureOutcome::Incorrect))
                    .then(|| to_row(s, Some(exposure)))
            })
            .collect();
        rows.sort_by(|a, b| b.last_answered_at.cmp(&a.last_answered_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn count_incorrect(&self, user_id: Uuid) -> Result<i64> {
        let state = self.state();
        Ok(state
            .items
            .iter()
            .filter(|s| {
                s.row.is_active
                    && state
                        .exposures
                        .get(&(user_id, s.row.id))
                        .is_some_and(|e| e.last_result == Some(ExposureOutcome::Incorrect))
            })
            .count() as i64)
    }

    async fn items_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ItemRow>> {
        let state = self.state();
        Ok(state
            .items
            .iter()
            .filter(|s| ids.contains(&s.row.id))
            .map(|s| to_row(s, None))
            .collect())
    }

    async fn item_by_id(&self, id: Uuid) -> Result<Option<ItemRow>> {
        let state = self.state();
        Ok(state
            .items
            .iter()
            .find(|s| s.row.id == id)
            .map(|s| to_row(s, None)))
    }

    async fn update_activation(&self, id: Uuid, active: bool, metadata: &str) -> Result<bool> {
        let mut state = self.state();
        let Some(stored) = state.items.iter_mut().find(|s| s.row.id == id) else {
            return Ok(false);
        };
        stored.row.is_active = active;
        stored.row.metadata = metadata.to_string();
        Ok(true)
    }

    async fn retire_exposures(&self, item_id: Uuid) -> Result<u64> {
        let mut state = self.state();
        let mut retired = 0;
        for ((_, item), record) in state.exposures.iter_mut() {
            if *item == item_id {
                record.last_result = Some(ExposureOutcome::Retired);
                retired += 1;
            }
        }
        Ok(retired)
    }
}
