/// PostgreSQL-backed refresh token store
///
/// Relies on the `refresh_tokens_token_key` unique index for token uniqueness
/// and on `DELETE ... RETURNING` for conditional deletion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::entity::RefreshToken;
use super::store::RefreshTokenStore;
use crate::error::{AppError, ValidationError};

type RefreshTokenRow = (Uuid, String, String, DateTime<Utc>);

fn from_row((id, token, identity, valid_until): RefreshTokenRow) -> RefreshToken {
    RefreshToken::from_parts(id, token, identity, valid_until)
}

#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn get(&self, token: &str) -> Result<Option<RefreshToken>, AppError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, token, identity, valid_until
            FROM refresh_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(from_row))
    }

    async fn get_last_for_identity(
        &self,
        identity: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, token, identity, valid_until
            FROM refresh_tokens
            WHERE identity = $1
            ORDER BY valid_until DESC
            LIMIT 1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(from_row))
    }

    async fn save(&self, token: &RefreshToken) -> Result<(), AppError> {
        let valid_until = token
            .valid_until()
            .ok_or_else(|| ValidationError::Missing("valid_until".to_string()))?;

        // No ON CONFLICT clause: a duplicate token must surface as 23505.
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, token, identity, valid_until, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.id())
        .bind(token.token())
        .bind(token.identity())
        .bind(valid_until)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(token_id = %token.id(), identity = %token.identity(), "Refresh token persisted");
        Ok(())
    }

    async fn delete(&self, token: &RefreshToken) -> Result<bool, AppError> {
        let deleted = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM refresh_tokens
            WHERE id = $1 AND token = $2
            RETURNING id
            "#,
        )
        .bind(token.id())
        .bind(token.token())
        .fetch_optional(&self.pool)
        .await?;

        Ok(deleted.is_some())
    }

    async fn revoke_all_expired(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, AppError> {
        let rows = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            DELETE FROM refresh_tokens
            WHERE valid_until <= $1
            RETURNING id, token, identity, valid_until
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(count = rows.len(), before = %before, "Expired refresh tokens revoked");
        Ok(rows.into_iter().map(from_row).collect())
    }
}
