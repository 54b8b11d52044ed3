// Copyright 2020 Joyent, Inc.

//! Hub sessions and the peripheral server sessions attached to them.
//!
//! A hub session is keyed by the session key the hub issued at login. Server
//! sessions live inside their hub session record, so removing a hub session
//! drops every server session attached to it.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::GatewayError;

/// Backend key recorded for a server whose login failed.
pub const FAILED_LOGIN_SESSION_KEY: &str = "login-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    Manual,
    Relay,
    Autoconnect,
}

impl fmt::Display for LoginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginMode::Manual => "manual",
            LoginMode::Relay => "relay",
            LoginMode::Autoconnect => "autoconnect",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSession {
    pub server_id: i64,
    pub endpoint: String,
    pub session_key: String,
    pub hub_session_key: String,
}

impl ServerSession {
    pub fn new(
        server_id: i64,
        endpoint: String,
        session_key: String,
        hub_session_key: String,
    ) -> ServerSession {
        ServerSession {
            server_id,
            endpoint,
            session_key,
            hub_session_key,
        }
    }

    pub fn failed_login(
        server_id: i64,
        endpoint: String,
        hub_session_key: String,
    ) -> ServerSession {
        ServerSession::new(
            server_id,
            endpoint,
            String::from(FAILED_LOGIN_SESSION_KEY),
            hub_session_key,
        )
    }

    pub fn is_failed_login(&self) -> bool {
        self.session_key == FAILED_LOGIN_SESSION_KEY
    }
}

#[derive(Clone)]
pub struct HubSession {
    pub key: String,
    pub username: String,
    /// Only retained for relay mode, where it is replayed to servers.
    pub password: Option<String>,
    pub mode: LoginMode,
    pub server_sessions: HashMap<i64, ServerSession>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl HubSession {
    pub fn new(
        key: String,
        username: String,
        password: Option<String>,
        mode: LoginMode,
    ) -> HubSession {
        let now = Utc::now();
        HubSession {
            key,
            username,
            password,
            mode,
            server_sessions: HashMap::new(),
            created_at: now,
            last_used: now,
        }
    }
}

impl fmt::Debug for HubSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubSession")
            .field("key", &self.key)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("mode", &self.mode)
            .field("server_sessions", &self.server_sessions)
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .finish()
    }
}

/// Storage for hub sessions. Lookups of unknown (or expired) keys return
/// `None`; callers turn that into an authentication error.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: HubSession);

    fn get(&self, key: &str) -> Option<HubSession>;

    fn remove(&self, key: &str) -> Option<HubSession>;

    /// Adds or replaces server sessions of an existing hub session.
    fn save_server_sessions(
        &self,
        key: &str,
        sessions: HashMap<i64, ServerSession>,
    ) -> Result<(), GatewayError>;

    fn get_server_session(
        &self,
        key: &str,
        server_id: i64,
    ) -> Option<ServerSession>;

    fn get_all_server_sessions(
        &self,
        key: &str,
    ) -> Option<HashMap<i64, ServerSession>>;

    /// Drops expired sessions, returning how many were removed.
    fn purge_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local `SessionStore` behind a single lock, with optional idle
/// expiry.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, HubSession>>,
    ttl: Option<chrono::Duration>,
}

impl InMemorySessionStore {
    pub fn new() -> InMemorySessionStore {
        InMemorySessionStore::default()
    }

    /// Sessions idle for longer than `ttl` are treated as absent. A zero
    /// `ttl` disables expiry.
    pub fn with_ttl(ttl: Duration) -> InMemorySessionStore {
        let ttl = if ttl.is_zero() {
            None
        } else {
            chrono::Duration::from_std(ttl).ok()
        };
        InMemorySessionStore {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, session: &HubSession, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - session.last_used > ttl,
            None => false,
        }
    }

    /// Marks the session as used, evicting it instead if it has expired.
    fn touch<'a>(
        &self,
        sessions: &'a mut HashMap<String, HubSession>,
        key: &str,
    ) -> Option<&'a mut HubSession> {
        let now = Utc::now();
        let expired = self.is_expired(sessions.get(key)?, now);
        if expired {
            sessions.remove(key);
            return None;
        }
        let session = sessions.get_mut(key)?;
        session.last_used = now;
        Some(session)
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(&self, session: HubSession) {
        self.sessions.lock().insert(session.key.clone(), session);
    }

    fn get(&self, key: &str) -> Option<HubSession> {
        let mut sessions = self.sessions.lock();
        self.touch(&mut sessions, key).map(|session| session.clone())
    }

    fn remove(&self, key: &str) -> Option<HubSession> {
        self.sessions.lock().remove(key)
    }

    fn save_server_sessions(
        &self,
        key: &str,
        server_sessions: HashMap<i64, ServerSession>,
    ) -> Result<(), GatewayError> {
        let mut sessions = self.sessions.lock();
        let hub_session = self
            .touch(&mut sessions, key)
            .ok_or(GatewayError::InvalidSession)?;
        hub_session.server_sessions.extend(server_sessions);
        Ok(())
    }

    fn get_server_session(
        &self,
        key: &str,
        server_id: i64,
    ) -> Option<ServerSession> {
        let mut sessions = self.sessions.lock();
        self.touch(&mut sessions, key)?
            .server_sessions
            .get(&server_id)
            .cloned()
    }

    fn get_all_server_sessions(
        &self,
        key: &str,
    ) -> Option<HashMap<i64, ServerSession>> {
        let mut sessions = self.sessions.lock();
        self.touch(&mut sessions, key)
            .map(|session| session.server_sessions.clone())
    }

    fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        before - sessions.len()
    }

    fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}
