//! Auth session — the live "current user or not signed in" signal.
//!
//! DESIGN
//! ======
//! `AuthSessionProvider` is what the favorites data source consumes: a
//! synchronous read of the present state plus a stream that yields the
//! present state first and then every change. `AuthSession` backs it with a
//! tokio `watch` channel, so slow subscribers only ever see the latest state.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("not signed in")]
    Unauthenticated,
}

impl crate::error::ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "E_UNAUTHENTICATED",
        }
    }
}

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub name: String,
}

pub type AuthState = Result<AuthenticatedUser, AuthError>;

/// Present auth state followed by every change.
pub type AuthStream = BoxStream<'static, AuthState>;

pub trait AuthSessionProvider: Send + Sync {
    fn current_user(&self) -> AuthState;

    fn user_changes(&self) -> AuthStream;
}

/// In-process auth session. Clones share the same signal.
#[derive(Clone)]
pub struct AuthSession {
    state: Arc<watch::Sender<Option<AuthenticatedUser>>>,
}

impl AuthSession {
    /// A session that starts signed out.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state: Arc::new(state) }
    }

    pub fn sign_in(&self, user: AuthenticatedUser) {
        info!(user_id = %user.id, "signed in");
        self.state.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.state.send_replace(None) {
            info!(user_id = %previous.id, "signed out");
        }
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSessionProvider for AuthSession {
    fn current_user(&self) -> AuthState {
        self.state.borrow().clone().ok_or(AuthError::Unauthenticated)
    }

    fn user_changes(&self) -> AuthStream {
        WatchStream::new(self.state.subscribe())
            .map(|user| user.ok_or(AuthError::Unauthenticated))
            .boxed()
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
