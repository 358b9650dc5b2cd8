//! Idempotent schema bootstrap, run once at boot before anything touches
//! the pool.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS scripts (
        id UUID PRIMARY KEY,
        request_hash TEXT NOT NULL UNIQUE,
        public_id TEXT NOT NULL UNIQUE,
        subscriber_id TEXT NOT NULL,
        reel_url TEXT NOT NULL,
        reel_hash TEXT NOT NULL,
        user_idea TEXT NOT NULL,
        variation_index INT NOT NULL DEFAULT 0,
        mode TEXT NOT NULL DEFAULT 'full',
        script_text TEXT NOT NULL,
        image_urls JSONB NOT NULL DEFAULT '[]'::jsonb,
        script_url TEXT,
        generator_version TEXT NOT NULL DEFAULT '',
        generation_ms BIGINT NOT NULL DEFAULT 0,
        quality_score REAL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_scripts_subscriber_created ON scripts (subscriber_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_scripts_reel_hash ON scripts (reel_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        job_id UUID PRIMARY KEY,
        subscriber_id TEXT NOT NULL,
        request_hash TEXT NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('queued', 'processing', 'completed', 'failed')),
        priority INT NOT NULL DEFAULT 0,
        attempts INT NOT NULL DEFAULT 0,
        max_attempts INT NOT NULL DEFAULT 3,
        error TEXT,
        result_script_id UUID,
        heartbeat_at TIMESTAMPTZ,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_request_hash ON jobs (request_hash)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs (status, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS users (
        subscriber_id TEXT PRIMARY KEY,
        status TEXT NOT NULL CHECK (status IN ('active', 'waitlist', 'blocked')),
        registration_number INT,
        request_count BIGINT NOT NULL DEFAULT 0,
        last_request_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_users_status_created ON users (status, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS reel_analysis (
        reel_hash TEXT PRIMARY KEY,
        canonical_url TEXT NOT NULL,
        analysis JSONB NOT NULL,
        video_url TEXT,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reel_analysis_expires ON reel_analysis (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS dataset_records (
        id UUID PRIMARY KEY,
        request_hash TEXT NOT NULL,
        subscriber_id TEXT NOT NULL,
        schema_version INT NOT NULL DEFAULT 1,
        record JSONB NOT NULL,
        overall_rating INT,
        section_feedback JSONB,
        feedback_text TEXT,
        video_performance JSONB,
        validated BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dataset_request_hash ON dataset_records (request_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS user_memory (
        subscriber_id TEXT PRIMARY KEY,
        memory JSONB NOT NULL DEFAULT '{}'::jsonb,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

pub async fn migrate(pool: &PgPool) -> Result<()> {
    for stmt in DDL {
        sqlx::query(stmt).execute(pool).await?;
    }
    info!("Durable store schema up to date");
    Ok(())
}
