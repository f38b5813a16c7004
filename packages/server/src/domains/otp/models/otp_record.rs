use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// OtpRecord - a single-use code bound to (address, code, session)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OtpRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Address exactly as the caller supplied it
    pub address: String,
    pub code: String,
    pub session_id: Uuid,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating an OTP record
#[derive(Debug, Clone)]
pub struct NewOtpRecord {
    pub tenant_id: Uuid,
    pub address: String,
    pub code: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl OtpRecord {
    /// Expiry is exclusive: a record is no longer valid at `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl OtpRecord {
    pub async fn create(input: &NewOtpRecord, pool: &PgPool) -> Result<Self> {
        let record = sqlx::query_as::<_, OtpRecord>(
            r#"
            INSERT INTO otp_records (tenant_id, address, code, session_id, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(input.tenant_id)
        .bind(&input.address)
        .bind(&input.code)
        .bind(input.session_id)
        .bind(input.expires_at)
        .fetch_one(pool)
        .await?;
        Ok(record)
    }

    /// Most recent unused record for the exact triple
    pub async fn find_latest_unused(
        address: &str,
        code: &str,
        session_id: Uuid,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let record = sqlx::query_as::<_, OtpRecord>(
            r#"
            SELECT * FROM otp_records
            WHERE address = $1 AND code = $2 AND session_id = $3 AND used = false
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(address)
        .bind(code)
        .bind(session_id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    /// Mark a record used. Only one concurrent caller can win.
    pub async fn mark_used(id: Uuid, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query("UPDATE otp_records SET used = true WHERE id = $1 AND used = false")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete every record that expired before `now`, used or not
    pub async fn delete_expired(now: DateTime<Utc>, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM otp_records WHERE expires_at < $1")
            .bind(now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
