//! Session cookie extraction
//!
//! Every handler runs against the caller's own session. A request without
//! a recognised `shelli_session` cookie is given a fresh session, and the
//! response sets the cookie.

use super::AppState;
use crate::session::Session;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::headers::Cookie;
use axum_extra::TypedHeader;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "shelli_session";

/// The caller's session, resolved from the request cookie
pub struct CurrentSession {
    pub session: Arc<Session>,
    pub cookie: SessionCookie,
}

/// `Set-Cookie` for a newly created session; empty for known sessions
pub struct SessionCookie(Option<HeaderValue>);

impl SessionCookie {
    fn for_new_session(id: Uuid) -> Self {
        let value = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax");
        match HeaderValue::from_str(&value) {
            Ok(value) => Self(Some(value)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to build session cookie");
                Self(None)
            }
        }
    }
}

impl IntoResponseParts for SessionCookie {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        if let Some(value) = self.0 {
            res.headers_mut().append(SET_COOKIE, value);
        }
        Ok(res)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let requested = TypedHeader::<Cookie>::from_request_parts(parts, state)
            .await
            .ok()
            .and_then(|TypedHeader(cookie)| {
                cookie
                    .get(SESSION_COOKIE)
                    .and_then(|value| Uuid::parse_str(value).ok())
            });

        let (session, created) = state.sessions.resolve(requested).await;
        let cookie = if created {
            SessionCookie::for_new_session(session.id())
        } else {
            SessionCookie(None)
        };

        Ok(Self { session, cookie })
    }
}
