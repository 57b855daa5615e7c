//! Per-session input state.
//!
//! Each browser session owns a [`SessionState`] holding the values to
//! pre-populate the form with. Sessions are created by the first request
//! that stashes values without a known id, touched on every request, and
//! dropped once idle for longer than the configured TTL.

use crate::types::{FeatureRecord, FeatureValue};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Stashed form defaults of one session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    values: HashMap<String, FeatureValue>,
}

impl SessionState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_seen: now,
            values: HashMap::new(),
        }
    }

    pub fn get(&self, feature: &str) -> Option<&FeatureValue> {
        self.values.get(feature)
    }

    /// Stash every field of `record`; last write wins
    pub fn stash(&mut self, record: &FeatureRecord) {
        for (name, value) in record.iter() {
            self.values.insert(name.to_string(), value.clone());
        }
    }

    /// Replace all stashed values with those of `record`.
    ///
    /// Fields absent from `record` lose their stashed value, so their
    /// inputs fall back to the defaults.
    pub fn replace(&mut self, record: &FeatureRecord) {
        self.values.clear();
        self.stash(record);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// All live sessions, keyed by session id
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionState>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64),
        }
    }

    /// Resolve the session for a request, creating one when `id` is absent
    /// or unknown. Returns the id and whether it was newly created.
    pub fn resolve(&self, id: Option<Uuid>) -> (Uuid, bool) {
        let mut sessions = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(id) = id {
            if let Some(state) = sessions.get_mut(&id) {
                state.last_seen = Utc::now();
                return (id, false);
            }
        }
        let id = Uuid::new_v4();
        sessions.insert(id, SessionState::new());
        debug!(session = %id, "Session started");
        (id, true)
    }

    /// Mark a known session as active and return a copy of its state.
    /// Unknown ids are ignored rather than creating a session.
    pub fn touch(&self, id: &Uuid) -> Option<SessionState> {
        let mut sessions = self.sessions.write().ok()?;
        let state = sessions.get_mut(id)?;
        state.last_seen = Utc::now();
        Some(state.clone())
    }

    /// Copy of a session's state
    pub fn get(&self, id: &Uuid) -> Option<SessionState> {
        self.sessions.read().ok()?.get(id).cloned()
    }

    /// Run `f` on a session's state, if it exists
    pub fn update<F: FnOnce(&mut SessionState)>(&self, id: &Uuid, f: F) -> bool {
        let Ok(mut sessions) = self.sessions.write() else {
            return false;
        };
        match sessions.get_mut(id) {
            Some(state) => {
                state.last_seen = Utc::now();
                f(state);
                true
            }
            None => false,
        }
    }

    /// Discard a session
    pub fn end(&self, id: &Uuid) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(id);
        }
    }

    /// Drop sessions idle since before `now - ttl`; returns how many
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut sessions) = self.sessions.write() else {
            return 0;
        };
        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|_, state| now - state.last_seen <= ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodically discards idle sessions
pub struct SessionSweeper {
    store: Arc<SessionStore>,
    interval_secs: u64,
}

impl SessionSweeper {
    pub fn new(store: Arc<SessionStore>, interval_secs: u64) -> Self {
        Self {
            store,
            interval_secs,
        }
    }

    pub async fn start(self) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.interval_secs.max(1)));
        loop {
            interval.tick().await;
            let removed = self.store.sweep(Utc::now());
            if removed > 0 {
                debug!(removed, live = self.store.len(), "Swept idle sessions");
            }
        }
    }
}
