use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Connection status of a messaging session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Initializing,
    Qr,
    Authenticated,
    Ready,
    Disconnected,
    AuthFailure,
}

impl SessionStatus {
    /// Terminal statuses end the session instance; a new lifecycle is required.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Disconnected | SessionStatus::AuthFailure)
    }

    /// Statuses during which the pairing artifact is shown to the tenant
    pub fn shows_pairing_artifact(&self) -> bool {
        matches!(self, SessionStatus::Qr | SessionStatus::Authenticated)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Initializing => write!(f, "initializing"),
            SessionStatus::Qr => write!(f, "qr"),
            SessionStatus::Authenticated => write!(f, "authenticated"),
            SessionStatus::Ready => write!(f, "ready"),
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::AuthFailure => write!(f, "auth_failure"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "initializing" => Ok(SessionStatus::Initializing),
            "qr" => Ok(SessionStatus::Qr),
            "authenticated" => Ok(SessionStatus::Authenticated),
            "ready" => Ok(SessionStatus::Ready),
            "disconnected" => Ok(SessionStatus::Disconnected),
            "auth_failure" => Ok(SessionStatus::AuthFailure),
            _ => Err(anyhow::anyhow!("Invalid session status: {}", s)),
        }
    }
}

/// MessagingSession model - durable half of a tenant's messaging session
///
/// One row per tenant. The in-memory registry entry is authoritative for
/// "can send now"; `status` here is a best-effort mirror.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessagingSession {
    /// Session identifier, stable across regenerations for the same tenant
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: SessionStatus,
    pub pairing_artifact: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for a session row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub pairing_artifact: Option<String>,
    /// Set the artifact to NULL (wins over `pairing_artifact`)
    pub clear_artifact: bool,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn touched(now: DateTime<Utc>) -> Self {
        Self {
            last_activity: Some(now),
            ..Default::default()
        }
    }

    /// Apply the update to an in-memory copy of the row
    pub fn apply_to(&self, session: &mut MessagingSession) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if self.clear_artifact {
            session.pairing_artifact = None;
        } else if let Some(artifact) = &self.pairing_artifact {
            session.pairing_artifact = Some(artifact.clone());
        }
        if let Some(at) = self.last_activity {
            session.last_activity = Some(at);
        }
        session.updated_at = Utc::now();
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl MessagingSession {
    /// Find the tenant's session
    pub async fn find_by_tenant(tenant_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, Self>(
            "SELECT * FROM messaging_sessions WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    /// Find session by identifier
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, Self>("SELECT * FROM messaging_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(session)
    }

    /// Create a session row at `initializing`
    pub async fn create(id: Uuid, tenant_id: Uuid, pool: &PgPool) -> Result<Self> {
        let session = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO messaging_sessions (id, tenant_id, status, last_activity)
            VALUES ($1, $2, 'initializing', NOW())
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;
        Ok(session)
    }

    /// Apply a partial update
    pub async fn update(id: Uuid, input: &SessionUpdate, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE messaging_sessions SET
                status = COALESCE($2, status),
                pairing_artifact = CASE WHEN $4 THEN NULL ELSE COALESCE($3, pairing_artifact) END,
                last_activity = COALESCE($5, last_activity),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(input.status)
        .bind(&input.pairing_artifact)
        .bind(input.clear_artifact)
        .bind(input.last_activity)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Delete a session row
    pub async fn delete(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM messaging_sessions WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
