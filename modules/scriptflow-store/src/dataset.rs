use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use scriptflow_common::DatasetRecord;

use crate::traits::{DatasetRepo, FeedbackStats, FeedbackUpdate};
use crate::PgStore;

type DatasetRow = (
    Uuid,                      // id
    String,                    // request_hash
    String,                    // subscriber_id
    i32,                       // schema_version
    serde_json::Value,         // record
    Option<i32>,               // overall_rating
    Option<serde_json::Value>, // section_feedback
    Option<String>,            // feedback_text
    Option<serde_json::Value>, // video_performance
    bool,                      // validated
    DateTime<Utc>,             // created_at
);

fn row_to_record(row: DatasetRow) -> DatasetRecord {
    DatasetRecord {
        id: row.0,
        request_hash: row.1,
        subscriber_id: row.2,
        schema_version: row.3,
        record: row.4,
        overall_rating: row.5,
        section_feedback: row.6,
        feedback_text: row.7,
        video_performance: row.8,
        validated: row.9,
        created_at: row.10,
    }
}

#[async_trait]
impl DatasetRepo for PgStore {
    async fn append_dataset(&self, record: &DatasetRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dataset_records (id, request_hash, subscriber_id, schema_version, record,
                overall_rating, section_feedback, feedback_text, video_performance, validated, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(&record.request_hash)
        .bind(&record.subscriber_id)
        .bind(record.schema_version)
        .bind(&record.record)
        .bind(record.overall_rating)
        .bind(&record.section_feedback)
        .bind(&record.feedback_text)
        .bind(&record.video_performance)
        .bind(record.validated)
        .bind(record.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn apply_feedback(&self, request_hash: &str, update: &FeedbackUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dataset_records
            SET overall_rating = COALESCE($2, overall_rating),
                section_feedback = COALESCE($3, section_feedback),
                feedback_text = COALESCE($4, feedback_text),
                video_performance = COALESCE($5, video_performance),
                validated = true
            WHERE id = (
                SELECT id FROM dataset_records WHERE request_hash = $1
                ORDER BY created_at DESC LIMIT 1
            )
            "#,
        )
        .bind(request_hash)
        .bind(update.overall_rating)
        .bind(&update.section_feedback)
        .bind(&update.feedback_text)
        .bind(&update.video_performance)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn feedback_stats(&self) -> Result<FeedbackStats> {
        let (total, rated, average): (i64, i64, Option<f64>) = sqlx::query_as(
            "SELECT count(*), count(overall_rating), avg(overall_rating::float8) \
             FROM dataset_records",
        )
        .fetch_one(self.pool())
        .await?;

        let rating_counts: Vec<(i32, i64)> = sqlx::query_as(
            "SELECT overall_rating, count(*) FROM dataset_records \
             WHERE overall_rating IS NOT NULL GROUP BY overall_rating ORDER BY overall_rating",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(FeedbackStats {
            total_records: total,
            rated_records: rated,
            average_rating: average,
            rating_counts,
        })
    }

    async fn export_dataset(
        &self,
        limit: i64,
        skip: i64,
        validated_only: bool,
    ) -> Result<Vec<DatasetRecord>> {
        let rows: Vec<DatasetRow> = if validated_only {
            sqlx::query_as(
                "SELECT id, request_hash, subscriber_id, schema_version, record, overall_rating, \
                 section_feedback, feedback_text, video_performance, validated, created_at \
                 FROM dataset_records WHERE validated = true \
                 ORDER BY created_at ASC LIMIT $1 OFFSET $2",
            )
            .bind(limit.clamp(1, 10_000))
            .bind(skip.max(0))
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as(
                "SELECT id, request_hash, subscriber_id, schema_version, record, overall_rating, \
                 section_feedback, feedback_text, video_performance, validated, created_at \
                 FROM dataset_records ORDER BY created_at ASC LIMIT $1 OFFSET $2",
            )
            .bind(limit.clamp(1, 10_000))
            .bind(skip.max(0))
            .fetch_all(self.pool())
            .await?
        };
        Ok(rows.into_iter().map(row_to_record).collect())
    }
}
