use anyhow::Result;
use async_trait::async_trait;

use crate::traits::UserMemoryRepo;
use crate::PgStore;

#[async_trait]
impl UserMemoryRepo for PgStore {
    async fn user_memory(&self, subscriber_id: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT memory FROM user_memory WHERE subscriber_id = $1")
                .bind(subscriber_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(|(memory,)| memory))
    }

    async fn merge_user_memory(
        &self,
        subscriber_id: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        // JSONB || is a shallow merge; later keys win.
        sqlx::query(
            r#"
            INSERT INTO user_memory (subscriber_id, memory, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (subscriber_id) DO UPDATE
            SET memory = user_memory.memory || EXCLUDED.memory, updated_at = now()
            "#,
        )
        .bind(subscriber_id)
        .bind(&patch)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
