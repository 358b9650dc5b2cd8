use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scriptflow_common::{AccessStatus, UserRecord};

use crate::traits::{AdmitOutcome, UserRepo};
use crate::PgStore;

/// Advisory lock key serializing beta admissions and promotions so the
/// active-count invariant holds under concurrent requests.
const ADMISSION_LOCK_KEY: i64 = 0x5f_ad_b1;

type UserRow = (
    String,                // subscriber_id
    String,                // status
    Option<i32>,           // registration_number
    i64,                   // request_count
    Option<DateTime<Utc>>, // last_request_at
    DateTime<Utc>,         // created_at
);

fn row_to_user(row: UserRow) -> UserRecord {
    UserRecord {
        subscriber_id: row.0,
        status: AccessStatus::parse(&row.1).unwrap_or(AccessStatus::Waitlist),
        registration_number: row.2,
        request_count: row.3,
        last_request_at: row.4,
        created_at: row.5,
    }
}

#[async_trait]
impl UserRepo for PgStore {
    async fn find_user(&self, subscriber_id: &str) -> Result<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT subscriber_id, status, registration_number, request_count, last_request_at, \
             created_at FROM users WHERE subscriber_id = $1",
        )
        .bind(subscriber_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(row_to_user))
    }

    async fn count_users_by_status(&self, status: AccessStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM users WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    async fn admit_or_waitlist(&self, subscriber_id: &str, capacity: i64) -> Result<AdmitOutcome> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ADMISSION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let (active,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM users WHERE status = 'active'")
                .fetch_one(&mut *tx)
                .await?;

        if active < capacity {
            let (ordinal,): (i32,) = sqlx::query_as(
                "SELECT COALESCE(MAX(registration_number), 0) + 1 FROM users",
            )
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO users (subscriber_id, status, registration_number) \
                 VALUES ($1, 'active', $2) ON CONFLICT (subscriber_id) DO NOTHING",
            )
            .bind(subscriber_id)
            .bind(ordinal)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(AdmitOutcome::Admitted { ordinal })
        } else {
            sqlx::query(
                "INSERT INTO users (subscriber_id, status) VALUES ($1, 'waitlist') \
                 ON CONFLICT (subscriber_id) DO NOTHING",
            )
            .bind(subscriber_id)
            .execute(&mut *tx)
            .await?;

            let (position,): (i64,) = sqlx::query_as(
                "SELECT count(*) FROM users WHERE status = 'waitlist' AND created_at <= \
                 (SELECT created_at FROM users WHERE subscriber_id = $1)",
            )
            .bind(subscriber_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(AdmitOutcome::Waitlisted { position })
        }
    }

    async fn waitlist_position(&self, subscriber_id: &str) -> Result<Option<i64>> {
        let created: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT created_at FROM users WHERE subscriber_id = $1 AND status = 'waitlist'",
        )
        .bind(subscriber_id)
        .fetch_optional(self.pool())
        .await?;

        match created {
            None => Ok(None),
            Some((created_at,)) => {
                let (position,): (i64,) = sqlx::query_as(
                    "SELECT count(*) FROM users WHERE status = 'waitlist' AND created_at <= $1",
                )
                .bind(created_at)
                .fetch_one(self.pool())
                .await?;
                Ok(Some(position))
            }
        }
    }

    async fn promote_waitlisted(&self, capacity: i64) -> Result<Vec<String>> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ADMISSION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let mut promoted = Vec::new();
        loop {
            let (active,): (i64,) =
                sqlx::query_as("SELECT count(*) FROM users WHERE status = 'active'")
                    .fetch_one(&mut *tx)
                    .await?;
            if active >= capacity {
                break;
            }

            let oldest: Option<(String,)> = sqlx::query_as(
                "SELECT subscriber_id FROM users WHERE status = 'waitlist' \
                 ORDER BY created_at ASC LIMIT 1",
            )
            .fetch_optional(&mut *tx)
            .await?;

            let Some((subscriber_id,)) = oldest else {
                break;
            };

            // Promoted users take a fresh ordinal; vacated ones are never reused.
            sqlx::query(
                "UPDATE users SET status = 'active', registration_number = \
                 (SELECT COALESCE(MAX(registration_number), 0) + 1 FROM users) \
                 WHERE subscriber_id = $1",
            )
            .bind(&subscriber_id)
            .execute(&mut *tx)
            .await?;

            promoted.push(subscriber_id);
        }

        tx.commit().await?;
        Ok(promoted)
    }

    async fn touch_request(&self, subscriber_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE users SET request_count = request_count + 1, last_request_at = $2 \
             WHERE subscriber_id = $1",
        )
        .bind(subscriber_id)
        .bind(at)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
