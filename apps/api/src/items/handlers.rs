use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::orchestrator::{AttemptLogEntry, BatchRequest};
use crate::items::model::{Item, ItemType};
use crate::repository::{Activation, CachedRequest, ExportFilter, ReviewQueue};
use crate::state::AppState;

const MAX_BATCH: usize = 20;
const MAX_SERVE: usize = 50;
const DEFAULT_EXPORT_LIMIT: i64 = 200;
const MAX_EXPORT_LIMIT: i64 = 1000;
const DEFAULT_REVIEW_LIMIT: usize = 20;

fn default_count() -> usize {
    1
}

/// Trims passages and drops blank ones, keeping each label with its passage.
fn aligned_passages(
    passages: &[String],
    labels: &[Option<String>],
) -> (Vec<String>, Vec<Option<String>>) {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| (p.trim().to_string(), labels.get(i).cloned().flatten()))
        .filter(|(p, _)| !p.is_empty())
        .unzip()
}

/// Parses a comma-separated id list.
fn parse_ids(raw: Option<&str>) -> Result<Vec<Uuid>, AppError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s).map_err(|_| AppError::Validation(format!("invalid item id '{s}'")))
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Generation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub item_type: ItemType,
    pub passages: Vec<String>,
    /// Parallel to `passages`.
    #[serde(default)]
    pub source_labels: Vec<Option<String>>,
    pub doc_title: Option<String>,
    pub document_code: Option<String>,
    #[serde(default = "default_count")]
    pub count: usize,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub items: Vec<Item>,
    pub requested: usize,
    pub fallback_count: usize,
    pub duplicates_dropped: usize,
    pub attempt_log: Vec<AttemptLogEntry>,
    /// Why the batch stopped short of `requested`, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exhausted: Option<String>,
}

/// POST /api/v1/documents/:document_id/items/generate
pub async fn handle_generate(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    if req.count == 0 || req.count > MAX_BATCH {
        return Err(AppError::Validation(format!(
            "count must be between 1 and {MAX_BATCH}"
        )));
    }
    let (passages, source_labels) = aligned_passages(&req.passages, &req.source_labels);

    let batch = BatchRequest {
        kind: req.item_type,
        passages: &passages,
        source_labels: &source_labels,
        doc_title: req.doc_title.as_deref(),
        document_code: req.document_code.as_deref(),
        count: req.count,
    };
    let mut rng = StdRng::from_entropy();
    let outcome = state.orchestrator.generate_batch(&batch, &mut rng).await?;

    let items = state
        .repository
        .save_items(document_id, req.doc_title.as_deref(), outcome.items)
        .await?;

    Ok(Json(GenerateResponse {
        items,
        requested: req.count,
        fallback_count: outcome.fallback_count,
        duplicates_dropped: outcome.duplicates_dropped,
        attempt_log: outcome.attempt_log,
        exhausted: outcome.exhausted,
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Serving
// ────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ServeQuery {
    pub item_type: ItemType,
    #[serde(default = "default_count")]
    pub count: usize,
    pub user_id: Option<Uuid>,
    /// Comma-separated ids the learner already holds.
    pub exclude: Option<String>,
}

#[derive(Serialize)]
pub struct ItemsResponse {
    pub items: Vec<Item>,
    pub requested: usize,
}

/// GET /api/v1/documents/:document_id/items
pub async fn handle_serve_items(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Query(params): Query<ServeQuery>,
) -> Result<Json<ItemsResponse>, AppError> {
    if params.count > MAX_SERVE {
        return Err(AppError::Validation(format!(
            "count must be at most {MAX_SERVE}"
        )));
    }
    let request = CachedRequest {
        document_id,
        kind: params.item_type,
        count: params.count,
        user_id: params.user_id,
        exclude_ids: parse_ids(params.exclude.as_deref())?,
    };
    let mut rng = StdRng::from_entropy();
    let items = state
        .repository
        .serve_cached(&request, Utc::now(), &mut rng)
        .await?;
    Ok(Json(ItemsResponse {
        items,
        requested: params.count,
    }))
}

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub user_id: Uuid,
    pub correct: bool,
}

/// POST /api/v1/items/:item_id/answers
pub async fn handle_record_answer(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(req): Json<AnswerRequest>,
) -> Result<StatusCode, AppError> {
    let recorded = state
        .repository
        .record_answer(req.user_id, item_id, req.correct, Utc::now())
        .await?;
    if !recorded {
        return Err(AppError::NotFound(format!("Item {item_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ────────────────────────────────────────────────────────────────────────────
// Review and export
// ────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ActivationRequest {
    pub is_active: bool,
    pub actor_id: Option<Uuid>,
    pub reason: Option<String>,
}

/// PATCH /api/v1/items/:item_id/active
pub async fn handle_set_active(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(req): Json<ActivationRequest>,
) -> Result<StatusCode, AppError> {
    let change = Activation {
        active: req.is_active,
        actor: req.actor_id,
        reason: req.reason.as_deref(),
    };
    if !state
        .repository
        .set_active(item_id, &change, Utc::now())
        .await?
    {
        return Err(AppError::NotFound(format!("Item {item_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ReviewQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/users/:user_id/review-queue
pub async fn handle_review_queue(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<ReviewQuery>,
) -> Result<Json<ReviewQueue>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_REVIEW_LIMIT).clamp(1, MAX_SERVE);
    Ok(Json(state.repository.review_queue(user_id, limit).await?))
}

#[derive(Deserialize)]
pub struct ExportQuery {
    pub document_id: Option<Uuid>,
    pub item_type: Option<ItemType>,
    #[serde(default)]
    pub include_inactive: bool,
    pub limit: Option<i64>,
    /// Comma-separated ids; when present the other filters are ignored.
    pub ids: Option<String>,
}

/// GET /api/v1/items/export
pub async fn handle_export(
    State(state): State<AppState>,
    Query(params): Query<ExportQuery>,
) -> Result<Json<ItemsResponse>, AppError> {
    let ids = parse_ids(params.ids.as_deref())?;
    let items = if !ids.is_empty() {
        state.repository.items_by_ids(&ids).await?
    } else {
        let filter = ExportFilter {
            document_id: params.document_id,
            kind: params.item_type,
            include_inactive: params.include_inactive,
            limit: params
                .limit
                .unwrap_or(DEFAULT_EXPORT_LIMIT)
                .clamp(1, MAX_EXPORT_LIMIT),
        };
        state.repository.list_for_export(&filter).await?
    };
    let requested = items.len();
    Ok(Json(ItemsResponse { items, requested }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_passages_keep_labels_aligned() {
        let passages = vec!["".to_string(), " A ".to_string(), "B".to_string()];
        let labels = vec![
            Some("L0".to_string()),
            Some("L1".to_string()),
            Some("L2".to_string()),
        ];
        let (kept, kept_labels) = aligned_passages(&passages, &labels);
        assert_eq!(kept, vec!["A", "B"]);
        assert_eq!(kept_labels, vec![Some("L1".to_string()), Some("L2".to_string())]);
    }

    #[test]
    fn test_missing_labels_are_none() {
        let passages = vec!["A".to_string(), "   ".to_string(), "C".to_string()];
        let labels = vec![None, Some("L1".to_string())];
        let (kept, kept_labels) = aligned_passages(&passages, &labels);
        assert_eq!(kept, vec!["A", "C"]);
        assert_eq!(kept_labels, vec![None, None]);
    }

    #[test]
    fn test_parse_ids_rejects_garbage() {
        let id = Uuid::new_v4();
        assert_eq!(parse_ids(Some(&format!(" {id}, ,"))).unwrap(), vec![id]);
        assert!(parse_ids(Some("nope")).is_err());
        assert!(parse_ids(None).unwrap().is_empty());
    }
}
