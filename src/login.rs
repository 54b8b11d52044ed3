// Copyright 2020 Joyent, Inc.

//! Hub login in its three modes, attaching peripheral servers to a hub
//! session, and logout.
//!
//! * manual: only the hub is logged into.
//! * relay: the caller's credentials are kept on the hub session and replayed
//!   to servers when they are attached.
//! * autoconnect: every server the user can see is attached at login.
//!
//! A server that could not be attached is still recorded against the hub
//! session, with the `login-error` key, so later calls to it fail with an
//! authentication error instead of looking unattached.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use slog::{debug, info, o, warn, Drain, Logger};

use crate::error::GatewayError;
use crate::multicast::{CallEngine, CallTarget, MulticastResult};
use crate::protocol::{Value, FAULT_INVALID_CREDENTIALS};
use crate::session::{HubSession, LoginMode, ServerSession, SessionStore};
use crate::topology::TopologyResolver;

pub const LOGIN: &str = "auth.login";
pub const LOGOUT: &str = "auth.logout";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U, P>(username: U, password: P) -> Credentials
    where
        U: Into<String>,
        P: Into<String>,
    {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    fn login_args(&self) -> Vec<Value> {
        vec![
            Value::from(self.username.as_str()),
            Value::from(self.password.as_str()),
        ]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials used to log into servers being attached.
enum ServerCredentials {
    /// The same credentials for every server.
    Shared(Credentials),
    PerServer(HashMap<i64, Credentials>),
}

impl ServerCredentials {
    fn for_server(&self, server_id: i64) -> Option<&Credentials> {
        match self {
            ServerCredentials::Shared(credentials) => Some(credentials),
            ServerCredentials::PerServer(by_server) => by_server.get(&server_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoconnectLogin {
    pub session_key: String,
    pub attach: MulticastResult,
}

pub struct LoginOrchestrator {
    hub_endpoint: String,
    engine: Arc<CallEngine>,
    topology: Arc<TopologyResolver>,
    store: Arc<dyn SessionStore>,
    log: Logger,
}

impl LoginOrchestrator {
    pub fn new(
        hub_endpoint: String,
        engine: Arc<CallEngine>,
        topology: Arc<TopologyResolver>,
        store: Arc<dyn SessionStore>,
        log: Option<&Logger>,
    ) -> LoginOrchestrator {
        let log = log
            .cloned()
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        LoginOrchestrator {
            hub_endpoint,
            engine,
            topology,
            store,
            log: log.new(o!("component" => "login")),
        }
    }

    pub async fn login(
        &self,
        credentials: &Credentials,
    ) -> Result<String, GatewayError> {
        let key = self.hub_login(credentials).await?;
        self.store.save(HubSession::new(
            key.clone(),
            credentials.username.clone(),
            None,
            LoginMode::Manual,
        ));
        info!(self.log, "hub login"; "user" => &credentials.username,
              "mode" => %LoginMode::Manual);
        Ok(key)
    }

    pub async fn login_with_relay_mode(
        &self,
        credentials: &Credentials,
    ) -> Result<String, GatewayError> {
        let key = self.hub_login(credentials).await?;
        self.store.save(HubSession::new(
            key.clone(),
            credentials.username.clone(),
            Some(credentials.password.clone()),
            LoginMode::Relay,
        ));
        info!(self.log, "hub login"; "user" => &credentials.username,
              "mode" => %LoginMode::Relay);
        Ok(key)
    }

    /// Logs into the hub and then into every server visible to the user.
    /// Only the hub login can fail the call; server discovery and attach
    /// problems are reported in the returned attach result.
    pub async fn login_with_autoconnect_mode(
        &self,
        credentials: &Credentials,
    ) -> Result<AutoconnectLogin, GatewayError> {
        let key = self.hub_login(credentials).await?;
        self.store.save(HubSession::new(
            key.clone(),
            credentials.username.clone(),
            None,
            LoginMode::Autoconnect,
        ));
        info!(self.log, "hub login"; "user" => &credentials.username,
              "mode" => %LoginMode::Autoconnect);

        let server_ids = match self
            .topology
            .list_user_server_ids(&key, &credentials.username)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(self.log, "failed to list user servers";
                      "user" => &credentials.username, "err" => %e);
                Vec::new()
            }
        };

        let attach = if server_ids.is_empty() {
            MulticastResult::default()
        } else {
            let shared = ServerCredentials::Shared(credentials.clone());
            let (result, sessions) =
                self.login_servers(&key, &server_ids, shared).await;
            if let Err(e) = self.store.save_server_sessions(&key, sessions) {
                warn!(self.log, "hub session gone before servers attached";
                      "user" => &credentials.username,
                      "err" => %e);
            }
            result
        };

        Ok(AutoconnectLogin {
            session_key: key,
            attach,
        })
    }

    /// Attaches more servers to an existing hub session. Relay sessions
    /// replay their owner's credentials to every server and ignore
    /// `credentials`.
    pub async fn attach_to_servers(
        &self,
        hub_key: &str,
        server_ids: &[i64],
        credentials: HashMap<i64, Credentials>,
    ) -> Result<MulticastResult, GatewayError> {
        let session = self
            .store
            .get(hub_key)
            .ok_or(GatewayError::InvalidSession)?;

        let credentials = match (session.mode, session.password) {
            (LoginMode::Relay, Some(password)) => ServerCredentials::Shared(
                Credentials::new(session.username, password),
            ),
            (LoginMode::Relay, None) => {
                return Err(GatewayError::Internal(String::from(
                    "relay session holds no credentials",
                )));
            }
            _ => ServerCredentials::PerServer(credentials),
        };

        self.attach(hub_key, server_ids, credentials).await
    }

    pub async fn list_server_ids(
        &self,
        hub_key: &str,
    ) -> Result<Vec<i64>, GatewayError> {
        if self.store.get(hub_key).is_none() {
            return Err(GatewayError::InvalidSession);
        }
        self.topology.list_server_ids(hub_key).await
    }

    /// Logs out of the hub and every attached server, then forgets the hub
    /// session. Backend failures are logged only.
    pub async fn logout(&self, hub_key: &str) -> Result<(), GatewayError> {
        let session = self
            .store
            .get(hub_key)
            .ok_or(GatewayError::InvalidSession)?;

        let args = vec![Value::from(hub_key)];
        if let Err(e) = self.engine.execute(&self.hub_endpoint, LOGOUT, args).await {
            warn!(self.log, "hub logout failed";
                  "user" => &session.username, "err" => %e);
        }

        let targets: Vec<CallTarget> = session
            .server_sessions
            .values()
            .filter(|server| !server.is_failed_login())
            .map(|server| CallTarget {
                server_id: server.server_id,
                endpoint: server.endpoint.clone(),
                session_key: Some(server.session_key.clone()),
                args: Vec::new(),
            })
            .collect();
        if !targets.is_empty() {
            let result = self.engine.multicast(LOGOUT, targets).await;
            for (server_id, failure) in result.failed.iter() {
                warn!(self.log, "server logout failed";
                      "server_id" => server_id, "err" => &failure.message);
            }
        }

        self.store.remove(hub_key);
        info!(self.log, "hub logout"; "user" => &session.username);
        Ok(())
    }

    /// Any fault from the hub means the credentials were refused.
    async fn hub_login(
        &self,
        credentials: &Credentials,
    ) -> Result<String, GatewayError> {
        let value = match self
            .engine
            .execute(&self.hub_endpoint, LOGIN, credentials.login_args())
            .await
        {
            Ok(value) => value,
            Err(GatewayError::Fault(fault)) => {
                warn!(self.log, "hub login refused";
                      "user" => &credentials.username, "fault" => %fault);
                return Err(FAULT_INVALID_CREDENTIALS.into());
            }
            Err(e) => return Err(e),
        };

        match value {
            Value::String(key) if !key.is_empty() => Ok(key),
            other => Err(GatewayError::MalformedResponse(format!(
                "{} returned a {} instead of a session key",
                LOGIN,
                other.type_name()
            ))),
        }
    }

    async fn attach(
        &self,
        hub_key: &str,
        server_ids: &[i64],
        credentials: ServerCredentials,
    ) -> Result<MulticastResult, GatewayError> {
        let (result, sessions) =
            self.login_servers(hub_key, server_ids, credentials).await;
        self.store.save_server_sessions(hub_key, sessions)?;
        info!(self.log, "attached servers";
              "successful" => result.successful.len(),
              "failed" => result.failed.len());
        Ok(result)
    }

    /// Logs in to each server. A failed login is recorded with the sentinel
    /// key unless the server already holds a live session.
    async fn login_servers(
        &self,
        hub_key: &str,
        server_ids: &[i64],
        credentials: ServerCredentials,
    ) -> (MulticastResult, HashMap<i64, ServerSession>) {
        let resolution = self.topology.resolve_endpoints(hub_key, server_ids).await;

        let mut result = MulticastResult::default();
        let mut targets = Vec::with_capacity(server_ids.len());
        for server_id in server_ids {
            let endpoint = match resolution.resolved.get(server_id) {
                Some(endpoint) => endpoint.clone(),
                None => {
                    let message = resolution
                        .failed
                        .get(server_id)
                        .cloned()
                        .unwrap_or_else(|| String::from("endpoint not resolved"));
                    result.record_failure(*server_id, String::new(), message);
                    continue;
                }
            };
            match credentials.for_server(*server_id) {
                Some(credentials) => targets.push(CallTarget {
                    server_id: *server_id,
                    endpoint,
                    session_key: None,
                    args: credentials.login_args(),
                }),
                None => result.record_failure(
                    *server_id,
                    endpoint,
                    format!("no credentials supplied for server {}", server_id),
                ),
            }
        }

        let logins = self.engine.multicast(LOGIN, targets).await;
        result.failed.extend(logins.failed);

        let mut sessions = HashMap::new();
        for (server_id, response) in logins.successful {
            match response.value.as_str() {
                Some(key) if !key.is_empty() => {
                    sessions.insert(
                        server_id,
                        ServerSession::new(
                            server_id,
                            response.endpoint.clone(),
                            String::from(key),
                            String::from(hub_key),
                        ),
                    );
                    result.successful.insert(server_id, response);
                }
                _ => {
                    let message = format!(
                        "{} returned a {} instead of a session key",
                        LOGIN,
                        response.value.type_name()
                    );
                    result.record_failure(server_id, response.endpoint, message);
                }
            }
        }
        for (server_id, failure) in result.failed.iter() {
            let live = self
                .store
                .get_server_session(hub_key, *server_id)
                .map_or(false, |session| !session.is_failed_login());
            if live {
                debug!(self.log, "keeping live session after failed login";
                       "server_id" => server_id);
                continue;
            }
            sessions.insert(
                *server_id,
                ServerSession::failed_login(
                    *server_id,
                    failure.endpoint.clone(),
                    String::from(hub_key),
                ),
            );
        }

        (result, sessions)
    }
}
