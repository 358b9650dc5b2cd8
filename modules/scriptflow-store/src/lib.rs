pub mod client;
pub mod migrate;
pub mod traits;

mod analysis;
mod dataset;
mod jobs;
mod scripts;
mod user_memory;
mod users;

pub mod testutil;

pub use client::connect;
pub use traits::{
    AdmitOutcome, AnalysisRepo, DatasetRepo, DocumentStore, FeedbackStats, FeedbackUpdate,
    JobRepo, ScriptRepo, UserMemoryRepo, UserRepo,
};

use sqlx::PgPool;

/// Postgres-backed implementation of every repository trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
