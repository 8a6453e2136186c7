//! Session tokens — Postgres-backed sign-in for the auth session.
//!
//! ARCHITECTURE
//! ============
//! A session token is an opaque 64-char hex string stored in `sessions`
//! with an expiry. `sign_in_with_token` validates it and pushes the user
//! into an [`AuthSession`], which in turn re-targets every live favorites
//! signal.

use rand::Rng;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::services::auth::{AuthSession, AuthenticatedUser};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session token is unknown or expired")]
    InvalidToken,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::error::ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "E_INVALID_SESSION",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Random bytes behind each session token.
pub const SESSION_TOKEN_BYTES: usize = 32;

/// New random session token, hex encoded.
#[must_use]
pub fn new_session_token() -> String {
    hex::encode(rand::rng().random::<[u8; SESSION_TOKEN_BYTES]>())
}

/// Whether `token` has the shape [`new_session_token`] produces. Anything
/// else cannot name a session, so it is rejected without a query.
#[must_use]
pub fn is_session_token(token: &str) -> bool {
    token.len() == SESSION_TOKEN_BYTES * 2 && hex::decode(token).is_ok()
}

/// Create a user, returning its id.
pub async fn create_user(pool: &PgPool, name: &str) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query("INSERT INTO users (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(row.get("id"))
}

/// Create a session for the given user, returning the token.
pub async fn create_session(pool: &PgPool, user_id: Uuid) -> Result<String, sqlx::Error> {
    let token = new_session_token();
    sqlx::query("INSERT INTO sessions (token, user_id) VALUES ($1, $2)")
        .bind(&token)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(token)
}

/// Validate a session token and return the associated user.
pub async fn validate_session(pool: &PgPool, token: &str) -> Result<Option<AuthenticatedUser>, sqlx::Error> {
    let row = sqlx::query(
        r"SELECT u.id, u.name
          FROM sessions s
          JOIN users u ON u.id = s.user_id
          WHERE s.token = $1 AND s.expires_at > now()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| AuthenticatedUser { id: r.get("id"), name: r.get("name") }))
}

/// Delete a session by token.
pub async fn delete_session(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Validate `token` and sign its user into `session`.
///
/// # Errors
///
/// Returns `InvalidToken` if the token is malformed, unknown or expired; the
/// session is left untouched in that case.
pub async fn sign_in_with_token(
    pool: &PgPool,
    session: &AuthSession,
    token: &str,
) -> Result<AuthenticatedUser, SessionError> {
    if !is_session_token(token) {
        warn!("rejected malformed session token");
        return Err(SessionError::InvalidToken);
    }
    let Some(user) = validate_session(pool, token).await? else {
        warn!("rejected session token");
        return Err(SessionError::InvalidToken);
    };
    session.sign_in(user.clone());
    Ok(user)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
