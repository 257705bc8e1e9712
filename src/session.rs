//! cookie sessions backed by an in-memory token map.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use tracing::debug;

use crate::state::AppState;
use crate::users::UserRecord;

/// identity carried by a signed-in browser
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: Option<String>,
}

impl From<&UserRecord> for SessionUser {
    fn from(record: &UserRecord) -> Self {
        Self {
            username: record.username.clone(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            profile_picture: record.profile_picture.clone(),
        }
    }
}

struct Entry {
    user: SessionUser,
    last_seen: Instant,
}

/// token to identity map; a session unused for `idle_timeout` is forgotten
///
/// expired entries are swept whenever a new session starts, so the map holds
/// at most the sessions active within one timeout.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::default(),
            idle_timeout,
        }
    }

    /// start a session and return its token
    pub fn create(&self, user: SessionUser) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);
        let expired = before - sessions.len();
        if expired > 0 {
            debug!(expired, "idle sessions dropped");
        }

        sessions.insert(
            token.clone(),
            Entry {
                user,
                last_seen: now,
            },
        );
        token
    }

    /// look up a session and mark it as used
    pub fn get(&self, token: &str) -> Option<SessionUser> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let last_seen = sessions.get(token)?.last_seen;
        if now.duration_since(last_seen) >= self.idle_timeout {
            sessions.remove(token);
            return None;
        }
        let entry = sessions.get_mut(token)?;
        entry.last_seen = now;
        Some(entry.user.clone())
    }

    /// replace the identity of a live session
    pub fn refresh(&self, token: &str, user: SessionUser) -> bool {
        match self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(token)
        {
            Some(entry) if entry.last_seen.elapsed() < self.idle_timeout => {
                entry.user = user;
                entry.last_seen = Instant::now();
                true
            }
            _ => false,
        }
    }

    pub fn destroy(&self, token: &str) -> Option<SessionUser> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .map(|entry| entry.user)
    }

    /// sessions currently held, expired ones not yet swept included
    pub fn held(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub fn session_cookie(name: &str, token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

pub fn removal_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), "")).path("/").build()
}

/// the caller's session, if any: the `current_user()` hook of the web layer
pub struct CurrentUser {
    pub token: Option<String>,
    pub user: Option<SessionUser>,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(&state.config.session.cookie_name)
            .map(|c| c.value().to_string());
        let user = token.as_deref().and_then(|t| state.sessions.get(t));

        Ok(Self { token, user })
    }
}
