//! PostgreSQL implementation of the recommendation store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::{RecommendationStore, StoredProfile};
use crate::error::Result;
use crate::types::{
    BehaviorEvent, BehaviorKind, CatalogItem, ItemId, ItemKind, RecommendationLog, UserId,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_behaviors (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        item_id BIGINT NOT NULL,
        item_type TEXT NOT NULL,
        behavior_type TEXT NOT NULL,
        score DOUBLE PRECISION,
        tags JSONB NOT NULL DEFAULT '[]',
        context JSONB NOT NULL DEFAULT 'null',
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_user_behaviors_user ON user_behaviors (user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_user_behaviors_created ON user_behaviors (created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS user_profiles (
        user_id BIGINT PRIMARY KEY,
        preferences JSONB NOT NULL,
        interests JSONB NOT NULL,
        stats JSONB NOT NULL,
        metadata JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recommendation_logs (
        id UUID PRIMARY KEY,
        user_id BIGINT NOT NULL,
        request_type TEXT NOT NULL,
        algorithm TEXT NOT NULL,
        item_ids JSONB NOT NULL,
        scores JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_recommendation_logs_created ON recommendation_logs (created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS item_tags (
        item_id BIGINT NOT NULL,
        item_type TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (item_id, item_type, tag)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_item_tags_tag ON item_tags (item_type, tag)",
];

/// Recommendation store backed by a shared connection pool
#[derive(Clone)]
pub struct PostgresRecommendationStore {
    pool: PgPool,
}

impl PostgresRecommendationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes that do not exist yet
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn window_start(hours: i64) -> DateTime<Utc> {
        Utc::now() - Duration::hours(hours)
    }

    fn row_to_event(row: &PgRow) -> Result<BehaviorEvent> {
        let item_type: String = row.try_get("item_type")?;
        let behavior_type: String = row.try_get("behavior_type")?;
        let Json(tags): Json<Vec<String>> = row.try_get("tags")?;

        Ok(BehaviorEvent {
            user_id: row.try_get("user_id")?,
            item_id: row.try_get("item_id")?,
            item_kind: item_type.parse()?,
            kind: behavior_type.parse::<BehaviorKind>()?,
            score: row.try_get("score")?,
            tags,
            context: row.try_get("context")?,
            timestamp: row.try_get("created_at")?,
        })
    }

    fn rows_to_events(rows: &[PgRow]) -> Result<Vec<BehaviorEvent>> {
        rows.iter().map(Self::row_to_event).collect()
    }
}

const BEHAVIOR_COLUMNS: &str =
    "user_id, item_id, item_type, behavior_type, score, tags, context, created_at";

#[async_trait]
impl RecommendationStore for PostgresRecommendationStore {
    #[instrument(skip(self, event), fields(user_id = event.user_id, item_id = event.item_id))]
    async fn insert_behavior(&self, event: &BehaviorEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO user_behaviors
                (user_id, item_id, item_type, behavior_type, score, tags, context, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.user_id)
        .bind(event.item_id)
        .bind(event.item_kind.as_str())
        .bind(event.kind.as_str())
        .bind(event.score)
        .bind(Json(&event.tags))
        .bind(&event.context)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;

        if !event.tags.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO item_tags (item_id, item_type, tag)
                SELECT $1, $2, UNNEST($3::TEXT[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(event.item_id)
            .bind(event.item_kind.as_str())
            .bind(&event.tags)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn behaviors_since(&self, hours: i64, limit: i64) -> Result<Vec<BehaviorEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM user_behaviors WHERE created_at >= $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2",
            BEHAVIOR_COLUMNS
        ))
        .bind(Self::window_start(hours))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), hours, "Loaded behavior window");
        Self::rows_to_events(&rows)
    }

    async fn user_behaviors(&self, user_id: UserId) -> Result<Vec<BehaviorEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM user_behaviors WHERE user_id = $1 ORDER BY created_at ASC, id ASC",
            BEHAVIOR_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_events(&rows)
    }

    async fn count_user_behaviors(&self, user_id: UserId) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_behaviors WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn active_users_since(&self, hours: i64) -> Result<Vec<UserId>> {
        let users = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT user_id FROM user_behaviors WHERE created_at >= $1 ORDER BY user_id",
        )
        .bind(Self::window_start(hours))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn load_profile(&self, user_id: UserId) -> Result<Option<StoredProfile>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, preferences, interests, stats, metadata, updated_at
            FROM user_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<StoredProfile> {
            Ok(StoredProfile {
                user_id: row.try_get("user_id")?,
                preferences: row.try_get("preferences")?,
                interests: row.try_get("interests")?,
                stats: row.try_get("stats")?,
                metadata: row.try_get("metadata")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, profile), fields(user_id = profile.user_id))]
    async fn save_profile(&self, profile: &StoredProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, preferences, interests, stats, metadata, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                preferences = EXCLUDED.preferences,
                interests = EXCLUDED.interests,
                stats = EXCLUDED.stats,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.preferences)
        .bind(&profile.interests)
        .bind(&profile.stats)
        .bind(&profile.metadata)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn popular_items(
        &self,
        kind: ItemKind,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<(ItemId, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, COUNT(*)::FLOAT8 AS score
            FROM user_behaviors
            WHERE item_type = $1 AND created_at >= $2
            GROUP BY item_id
            ORDER BY score DESC, item_id ASC
            LIMIT $3
            "#,
        )
        .bind(kind.as_str())
        .bind(Self::window_start(hours))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(ItemId, f64)> {
                Ok((row.try_get("item_id")?, row.try_get("score")?))
            })
            .collect()
    }

    async fn content_candidates(
        &self,
        kind: ItemKind,
        tag_weights: &BTreeMap<String, f64>,
        exclude: &[ItemId],
        limit: i64,
    ) -> Result<Vec<CatalogItem>> {
        if tag_weights.is_empty() {
            return Ok(Vec::new());
        }
        let (tags, weights): (Vec<String>, Vec<f64>) = tag_weights
            .iter()
            .map(|(tag, weight)| (tag.clone(), *weight))
            .unzip();

        let rows = sqlx::query(
            r#"
            SELECT it.item_id,
                   ARRAY_AGG(it.tag ORDER BY it.tag) AS tags,
                   SUM(w.weight)::FLOAT8 AS score
            FROM item_tags it
            JOIN UNNEST($2::TEXT[], $3::FLOAT8[]) AS w(tag, weight) ON w.tag = it.tag
            WHERE it.item_type = $1
              AND NOT (it.item_id = ANY($4))
            GROUP BY it.item_id
            ORDER BY score DESC, it.item_id ASC
            LIMIT $5
            "#,
        )
        .bind(kind.as_str())
        .bind(&tags)
        .bind(&weights)
        .bind(exclude)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CatalogItem> {
                Ok(CatalogItem {
                    item_id: row.try_get("item_id")?,
                    kind,
                    tags: row.try_get("tags")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    async fn item_tags(&self, item_id: ItemId, kind: ItemKind) -> Result<Vec<String>> {
        let tags = sqlx::query_scalar::<_, String>(
            "SELECT tag FROM item_tags WHERE item_id = $1 AND item_type = $2 ORDER BY tag",
        )
        .bind(item_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    async fn insert_recommendation_log(&self, log: &RecommendationLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recommendation_logs
                (id, user_id, request_type, algorithm, item_ids, scores, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(log.user_id)
        .bind(log.request_type.as_str())
        .bind(log.algorithm.as_str())
        .bind(Json(&log.item_ids))
        .bind(Json(&log.scores))
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_behaviors_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_behaviors WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_recommendation_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM recommendation_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
