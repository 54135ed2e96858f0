//! Per-browser session state
//!
//! Each session owns its own conversation and model settings, so
//! concurrent browsers never interleave into one history.

use crate::conversation::{Conversation, ModelConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Mutable state of one session
#[derive(Debug)]
pub struct SessionState {
    pub conversation: Conversation,
    pub model: ModelConfig,
}

pub struct Session {
    id: SessionId,
    state: Mutex<SessionState>,
    last_seen: StdMutex<Instant>,
}

impl Session {
    fn new(id: SessionId, state: SessionState) -> Self {
        Self {
            id,
            state: Mutex::new(state),
            last_seen: StdMutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Lock the session state. Never hold the guard across a provider call.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    fn touch(&self) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Instant::now();
        }
    }

    fn idle_since(&self) -> Instant {
        self.last_seen
            .lock()
            .map_or_else(|poisoned| *poisoned.into_inner(), |guard| *guard)
    }
}

/// All live sessions, keyed by the id carried in the session cookie
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    system_prompt: String,
    default_model: ModelConfig,
}

impl SessionStore {
    pub fn new(system_prompt: impl Into<String>, default_model: ModelConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            system_prompt: system_prompt.into(),
            default_model,
        }
    }

    /// Find the session for `id`, creating a fresh one when the id is
    /// absent or unknown. Returns the session and whether it was created.
    pub async fn resolve(&self, id: Option<SessionId>) -> (Arc<Session>, bool) {
        if let Some(id) = id {
            if let Some(session) = self.sessions.read().await.get(&id) {
                session.touch();
                return (Arc::clone(session), false);
            }
        }

        let id = Uuid::new_v4();
        let session = Arc::new(Session::new(
            id,
            SessionState {
                conversation: Conversation::new(self.system_prompt.clone()),
                model: self.default_model.clone(),
            },
        ));
        self.sessions.write().await.insert(id, Arc::clone(&session));
        tracing::debug!(session_id = %id, "Created session");
        (session, true)
    }

    #[allow(dead_code)] // Used by tests and diagnostics
    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions not seen for longer than `ttl` as of `now`.
    /// In-flight relays keep their own `Arc` and finish normally.
    pub async fn evict_idle(&self, ttl: Duration, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| now.saturating_duration_since(session.idle_since()) <= ttl);
        before - sessions.len()
    }
}
