//! Per-session key/value store shared by all executions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

/// Session id substituted when a request supplies none.
pub const DEFAULT_SESSION_ID: &str = "__default__";

type Sessions = HashMap<String, HashMap<String, Value>>;

/// In-memory session storage.
///
/// Sessions are created lazily on first touch and live as long as the store.
/// There is no expiry.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<Sessions>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the session id to use for a request.
    ///
    /// Missing and empty ids map to [`DEFAULT_SESSION_ID`].
    #[must_use]
    pub fn resolve_id(session_id: Option<&str>) -> &str {
        match session_id {
            Some(id) if !id.is_empty() => id,
            _ => DEFAULT_SESSION_ID,
        }
    }

    /// Read a value.
    #[must_use]
    pub fn get(&self, session_id: &str, key: &str) -> Option<Value> {
        self.with_session(session_id, |session| session.get(key).cloned())
    }

    /// Store a value, replacing any previous one.
    pub fn set(&self, session_id: &str, key: impl Into<String>, value: Value) {
        self.with_session(session_id, |session| {
            session.insert(key.into(), value);
        });
    }

    /// Remove a value, returning it if it existed.
    pub fn delete(&self, session_id: &str, key: &str) -> Option<Value> {
        self.with_session(session_id, |session| session.remove(key))
    }

    /// Remove every value in a session. The session itself stays.
    pub fn clear(&self, session_id: &str) {
        self.with_session(session_id, HashMap::clear);
    }

    /// Whether a session has been touched.
    #[must_use]
    pub fn contains_session(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Number of keys held by a session, 0 for an untouched one.
    #[must_use]
    pub fn len(&self, session_id: &str) -> usize {
        self.lock().get(session_id).map_or(0, HashMap::len)
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        op: impl FnOnce(&mut HashMap<String, Value>) -> T,
    ) -> T {
        let mut sessions = self.lock();
        let session = sessions.entry(session_id.to_owned()).or_default();
        op(session)
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A store bound to one resolved session id for the duration of an
/// execution.
#[derive(Debug, Clone)]
pub struct SessionScope {
    store: Arc<SessionStore>,
    session_id: String,
}

impl SessionScope {
    /// Bind `store` to `session_id`, substituting the default id when absent.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, session_id: Option<&str>) -> Self {
        let session_id = SessionStore::resolve_id(session_id).to_owned();
        Self { store, session_id }
    }

    /// Resolved session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Read a value from this session.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(&self.session_id, key)
    }

    /// Store a value in this session.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.store.set(&self.session_id, key, value);
    }

    /// Remove a value from this session.
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.store.delete(&self.session_id, key)
    }

    /// Remove every value in this session.
    pub fn clear(&self) {
        self.store.clear(&self.session_id);
    }
}
