use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::items::model::ItemType;
use crate::repository::{type_tags, ExportFilter, ItemRow, ItemStore, NewItemRow, SampleQuery};

const ITEM_COLUMNS: &str = "i.id, i.document_id, i.item_type, i.question, i.passage, i.options, \
     i.answer, i.explanation, i.difficulty, i.source_label, i.is_active, i.metadata, i.created_at";

const NO_EXPOSURE: &str = "NULL::text AS last_result, NULL::int4 AS correct_count, \
     NULL::int4 AS incorrect_count, NULL::timestamptz AS last_seen_at, \
     NULL::timestamptz AS last_answered_at";

const EXPOSURE_COLUMNS: &str = "e.last_result, e.correct_count, e.incorrect_count, \
     e.last_seen_at, e.last_answered_at";

/// [`ItemStore`] over the `items` and `item_exposures` tables.
#[derive(Clone)]
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn insert_item(&self, row: &NewItemRow) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO items
                (id, document_id, item_type, question, passage, options, answer,
                 explanation, difficulty, source_label, is_active, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(row.id)
        .bind(row.document_id)
        .bind(&row.item_type)
        .bind(&row.question)
        .bind(&row.passage)
        .bind(&row.options)
        .bind(&row.answer)
        .bind(&row.explanation)
        .bind(&row.difficulty)
        .bind(&row.source_label)
        .bind(row.is_active)
        .bind(&row.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn sample_items(&self, query: &SampleQuery) -> Result<Vec<ItemRow>> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS}, {EXPOSURE_COLUMNS}
            FROM items i
            LEFT JOIN item_exposures e ON e.item_id = i.id AND e.user_id = $4
            WHERE i.document_id = $1
              AND i.item_type = ANY($2)
              AND i.is_active
              AND NOT (i.id = ANY($3))
            ORDER BY random()
            LIMIT $5
            "#
        );
        Ok(sqlx::query_as::<_, ItemRow>(&sql)
            .bind(query.document_id)
            .bind(type_tags(query.kind))
            .bind(&query.exclude_ids)
            .bind(query.user_id)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn mark_pending(&self, user_id: Uuid, item_ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO item_exposures (user_id, item_id, last_result, last_seen_at)
            SELECT $1, item_id, 'pending', $3 FROM UNNEST($2::uuid[]) AS item_id
            ON CONFLICT (user_id, item_id) DO UPDATE
                SET last_result = 'pending', last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(user_id)
        .bind(item_ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_outcome(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        correct: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = if correct { "correct" } else { "incorrect" };
        sqlx::query(
            r#"
            INSERT INTO item_exposures
                (user_id, item_id, last_result, correct_count, incorrect_count,
                 last_seen_at, last_answered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (user_id, item_id) DO UPDATE
                SET last_result = EXCLUDED.last_result,
                    correct_count = item_exposures.correct_count + EXCLUDED.correct_count,
                    incorrect_count = item_exposures.incorrect_count + EXCLUDED.incorrect_count,
                    last_seen_at = EXCLUDED.last_seen_at,
                    last_answered_at = EXCLUDED.last_answered_at
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .bind(result)
        .bind(i32::from(correct))
        .bind(i32::from(!correct))
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_items(&self, document_id: Uuid, kind: ItemType) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE document_id = $1 AND item_type = ANY($2)",
        )
        .bind(document_id)
        .bind(type_tags(kind))
        .fetch_one(&self.pool)
        .await?)
    }

    async fn prune_items(&self, document_id: Uuid, kind: ItemType, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM items
            WHERE id IN (
                SELECT id FROM items
                WHERE document_id = $1 AND item_type = ANY($2)
                ORDER BY created_at DESC
                OFFSET $3
            )
            "#,
        )
        .bind(document_id)
        .bind(type_tags(kind))
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn export_items(&self, filter: &ExportFilter) -> Result<Vec<ItemRow>> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS}, {NO_EXPOSURE}
            FROM items i
            WHERE ($1::uuid IS NULL OR i.document_id = $1)
              AND ($2::text[] IS NULL OR i.item_type = ANY($2))
              AND ($3 OR i.is_active)
            ORDER BY i.created_at DESC
            LIMIT $4
            "#
        );
        Ok(sqlx::query_as::<_, ItemRow>(&sql)
            .bind(filter.document_id)
            .bind(filter.kind.map(type_tags))
            .bind(filter.include_inactive)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn incorrect_items(&self, user_id: Uuid, limit: i64) -> Result<Vec<ItemRow>> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS}, {EXPOSURE_COLUMNS}
            FROM item_exposures e
            JOIN items i ON i.id = e.item_id
            WHERE e.user_id = $1 AND e.last_result = 'incorrect' AND i.is_active
            ORDER BY e.last_answered_at DESC NULLS LAST
            LIMIT $2
            "#
        );
        Ok(sqlx::query_as::<_, ItemRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn count_incorrect(&self, user_id: Uuid) -> Result<i64> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM item_exposures e
            JOIN items i ON i.id = e.item_id
            WHERE e.user_id = $1 AND e.last_result = 'incorrect' AND i.is_active
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn items_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ItemRow>> {
        let sql = format!("SELECT {ITEM_COLUMNS}, {NO_EXPOSURE} FROM items i WHERE i.id = ANY($1)");
        Ok(sqlx::query_as::<_, ItemRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn item_by_id(&self, id: Uuid) -> Result<Option<ItemRow>> {
        let sql = format!("SELECT {ITEM_COLUMNS}, {NO_EXPOSURE} FROM items i WHERE i.id = $1");
        Ok(sqlx::query_as::<_, ItemRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_activation(&self, id: Uuid, active: bool, metadata: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE items SET is_active = $2, metadata = $3 WHERE id = $1")
            .bind(id)
            .bind(active)
            .bind(metadata)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn retire_exposures(&self, item_id: Uuid) -> Result<u64> {
        let result =
            sqlx::query("UPDATE item_exposures SET last_result = 'retired' WHERE item_id = $1")
                .bind(item_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
