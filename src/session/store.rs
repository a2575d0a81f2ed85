//! Cookie-bound, expiring session registry.
//!
//! Expiry is sliding: every successful lookup moves `last_activity` forward.
//! A session whose idle time exceeds its timeout is treated as absent and
//! removed by the lookup that notices it. [`SessionStore::purge_expired`]
//! additionally lets a periodic sweeper bound the number of sessions that are
//! never looked up again.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use uuid::Uuid;

use crate::admin::accounts::Account;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE_NAME: &str = "origin-session-id";

/// Keys of the per-session info map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// The logged-in admin account.
    Account,
    /// Time of the most recent failed login.
    LastFailedLoginAttempt,
    /// URL requested before the login page was shown.
    PreLoginUrl,
}

/// Values of the per-session info map.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    Account(Account),
    Instant(Instant),
    Text(String),
}

/// Most recent activities kept per session.
pub const MAX_SESSION_ACTIVITIES: usize = 64;

/// One request that reused a session. Recorded only in debug mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionActivity {
    pub address: String,
    pub domain: String,
    pub object_id: usize,
    pub allocation_count: u64,
    pub at: SystemTime,
}

#[derive(Debug)]
struct SessionState {
    last_activity: Instant,
    info: HashMap<SessionKey, SessionValue>,
    activities: VecDeque<SessionActivity>,
}

/// Server-side state bound to one client.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    address: String,
    created_at: SystemTime,
    timeout: Duration,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(address: &str, timeout: Duration, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.to_string(),
            created_at: SystemTime::now(),
            timeout,
            state: Mutex::new(SessionState {
                last_activity: now,
                info: HashMap::new(),
                activities: VecDeque::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote address of the client that created the session.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.lock().last_activity) > self.timeout
    }

    fn touch(&self, now: Instant) {
        let mut state = self.lock();
        if now > state.last_activity {
            state.last_activity = now;
        }
    }

    pub fn get(&self, key: SessionKey) -> Option<SessionValue> {
        self.lock().info.get(&key).cloned()
    }

    pub fn set(&self, key: SessionKey, value: SessionValue) {
        self.lock().info.insert(key, value);
    }

    pub fn remove(&self, key: SessionKey) -> Option<SessionValue> {
        self.lock().info.remove(&key)
    }

    /// Append an activity, dropping the oldest beyond [`MAX_SESSION_ACTIVITIES`].
    pub fn add_activity(&self, activity: SessionActivity) {
        let mut state = self.lock();
        if state.activities.len() == MAX_SESSION_ACTIVITIES {
            state.activities.pop_front();
        }
        state.activities.push_back(activity);
    }

    /// Recorded activities, oldest first.
    pub fn activities(&self) -> Vec<SessionActivity> {
        self.lock().activities.iter().cloned().collect()
    }

    pub fn account(&self) -> Option<Account> {
        match self.get(SessionKey::Account) {
            Some(SessionValue::Account(account)) => Some(account),
            _ => None,
        }
    }

    pub fn last_failed_login(&self) -> Option<Instant> {
        match self.get(SessionKey::LastFailedLoginAttempt) {
            Some(SessionValue::Instant(at)) => Some(at),
            _ => None,
        }
    }

    pub fn pre_login_url(&self) -> Option<String> {
        match self.get(SessionKey::PreLoginUrl) {
            Some(SessionValue::Text(url)) => Some(url),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-domain session registry.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new session.
    pub fn new_session(&self, address: &str, timeout: Duration) -> Arc<Session> {
        self.new_session_at(address, timeout, Instant::now())
    }

    pub fn new_session_at(&self, address: &str, timeout: Duration, now: Instant) -> Arc<Session> {
        let session = Arc::new(Session::new(address, timeout, now));
        self.sessions.insert(session.id, Arc::clone(&session));
        session
    }

    /// The session for `id` if it exists and has not expired. Touches it on hit.
    pub fn active_session(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.active_session_at(id, Instant::now())
    }

    pub fn active_session_at(&self, id: &Uuid, now: Instant) -> Option<Arc<Session>> {
        if self
            .sessions
            .remove_if(id, |_, session| session.is_expired_at(now))
            .is_some()
        {
            tracing::debug!(session = %id, "Session expired");
            return None;
        }

        let session = self.sessions.get(id).map(|entry| Arc::clone(entry.value()))?;
        session.touch(now);
        Some(session)
    }

    /// Remove a session explicitly. Returns true if it was present.
    pub fn expire(&self, id: &Uuid) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Remove every session that is expired at `now`. Returns how many were removed.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
