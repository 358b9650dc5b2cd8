use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use scriptflow_common::{GenerationMode, ScriptRecord};

use crate::traits::ScriptRepo;
use crate::PgStore;

type ScriptRow = (
    Uuid,                 // id
    String,               // request_hash
    String,               // public_id
    String,               // subscriber_id
    String,               // reel_url
    String,               // reel_hash
    String,               // user_idea
    i32,                  // variation_index
    String,               // mode
    String,               // script_text
    serde_json::Value,    // image_urls
    Option<String>,       // script_url
    String,               // generator_version
    i64,                  // generation_ms
    Option<f32>,          // quality_score
    DateTime<Utc>,        // created_at
);

const SCRIPT_COLUMNS: &str = "id, request_hash, public_id, subscriber_id, reel_url, reel_hash, \
     user_idea, variation_index, mode, script_text, image_urls, script_url, generator_version, \
     generation_ms, quality_score, created_at";

fn row_to_script(row: ScriptRow) -> ScriptRecord {
    ScriptRecord {
        id: row.0,
        request_hash: row.1,
        public_id: row.2,
        subscriber_id: row.3,
        reel_url: row.4,
        reel_hash: row.5,
        user_idea: row.6,
        variation_index: row.7.max(0) as u32,
        mode: GenerationMode::parse(&row.8).unwrap_or_default(),
        script_text: row.9,
        image_urls: serde_json::from_value(row.10).unwrap_or_default(),
        script_url: row.11,
        generator_version: row.12,
        generation_ms: row.13,
        quality_score: row.14,
        created_at: row.15,
    }
}

#[async_trait]
impl ScriptRepo for PgStore {
    async fn find_by_request_hash(&self, request_hash: &str) -> Result<Option<ScriptRecord>> {
        let row: Option<ScriptRow> = sqlx::query_as(&format!(
            "SELECT {SCRIPT_COLUMNS} FROM scripts WHERE request_hash = $1"
        ))
        .bind(request_hash)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(row_to_script))
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<ScriptRecord>> {
        let row: Option<ScriptRow> = sqlx::query_as(&format!(
            "SELECT {SCRIPT_COLUMNS} FROM scripts WHERE public_id = $1"
        ))
        .bind(public_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(row_to_script))
    }

    async fn insert_script(&self, script: &ScriptRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scripts (id, request_hash, public_id, subscriber_id, reel_url, reel_hash,
                user_idea, variation_index, mode, script_text, image_urls, script_url,
                generator_version, generation_ms, quality_score, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(script.id)
        .bind(&script.request_hash)
        .bind(&script.public_id)
        .bind(&script.subscriber_id)
        .bind(&script.reel_url)
        .bind(&script.reel_hash)
        .bind(&script.user_idea)
        .bind(script.variation_index as i32)
        .bind(script.mode.as_str())
        .bind(&script.script_text)
        .bind(serde_json::to_value(&script.image_urls)?)
        .bind(&script.script_url)
        .bind(&script.generator_version)
        .bind(script.generation_ms)
        .bind(script.quality_score)
        .bind(script.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn public_id_exists(&self, public_id: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM scripts WHERE public_id = $1")
                .bind(public_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count > 0)
    }

    async fn recent_for_reel(&self, reel_hash: &str, limit: i64) -> Result<Vec<ScriptRecord>> {
        let rows: Vec<ScriptRow> = sqlx::query_as(&format!(
            "SELECT {SCRIPT_COLUMNS} FROM scripts WHERE reel_hash = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(reel_hash)
        .bind(limit.min(100))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(row_to_script).collect())
    }

    async fn set_quality(&self, request_hash: &str, score: f32) -> Result<bool> {
        let result = sqlx::query("UPDATE scripts SET quality_score = $2 WHERE request_hash = $1")
            .bind(request_hash)
            .bind(score)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
