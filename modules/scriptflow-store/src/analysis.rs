use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scriptflow_common::ReelAnalysisRecord;

use crate::traits::AnalysisRepo;
use crate::PgStore;

type AnalysisRow = (
    String,            // reel_hash
    String,            // canonical_url
    serde_json::Value, // analysis
    Option<String>,    // video_url
    DateTime<Utc>,     // expires_at
    DateTime<Utc>,     // created_at
);

fn row_to_record(row: AnalysisRow) -> ReelAnalysisRecord {
    ReelAnalysisRecord {
        reel_hash: row.0,
        canonical_url: row.1,
        analysis: serde_json::from_value(row.2).unwrap_or_default(),
        video_url: row.3,
        expires_at: row.4,
        created_at: row.5,
    }
}

#[async_trait]
impl AnalysisRepo for PgStore {
    async fn fresh_analysis(&self, reel_hash: &str) -> Result<Option<ReelAnalysisRecord>> {
        let row: Option<AnalysisRow> = sqlx::query_as(
            "SELECT reel_hash, canonical_url, analysis, video_url, expires_at, created_at \
             FROM reel_analysis WHERE reel_hash = $1 AND expires_at > now()",
        )
        .bind(reel_hash)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(row_to_record))
    }

    async fn upsert_analysis(&self, record: &ReelAnalysisRecord) -> Result<()> {
        // A later pass may overwrite with richer data (e.g. a transcript
        // extracted after the first frames-only analysis).
        sqlx::query(
            r#"
            INSERT INTO reel_analysis (reel_hash, canonical_url, analysis, video_url, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (reel_hash) DO UPDATE
            SET analysis = EXCLUDED.analysis,
                video_url = COALESCE(EXCLUDED.video_url, reel_analysis.video_url),
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&record.reel_hash)
        .bind(&record.canonical_url)
        .bind(serde_json::to_value(&record.analysis)?)
        .bind(&record.video_url)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn delete_expired_analysis(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reel_analysis WHERE expires_at <= now()")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
