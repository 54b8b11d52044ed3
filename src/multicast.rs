// Copyright 2020 Joyent, Inc.

//! Fan-out of a single backend call across peripheral servers.
//!
//! `multicast` spawns one task per target and waits for all of them; each
//! target contributes exactly one outcome to the `MulticastResult`, and a
//! failing target never affects its siblings. The `*_to_server(s)` variants
//! translate a hub session into call targets first.

use std::collections::HashMap;
use std::sync::Arc;

use slog::{debug, o, warn, Drain, Logger};

use crate::client::BackendClient;
use crate::error::GatewayError;
use crate::protocol::Value;
use crate::session::SessionStore;

/// One backend invocation within a multicast.
#[derive(Debug, Clone, PartialEq)]
pub struct CallTarget {
    pub server_id: i64,
    pub endpoint: String,
    /// Prepended to `args` when present.
    pub session_key: Option<String>,
    pub args: Vec<Value>,
}

impl CallTarget {
    fn call_args(self) -> Vec<Value> {
        match self.session_key {
            Some(key) => with_session_key(key, self.args),
            None => self.args,
        }
    }
}

fn with_session_key(key: String, args: Vec<Value>) -> Vec<Value> {
    let mut call_args = Vec::with_capacity(args.len() + 1);
    call_args.push(Value::String(key));
    call_args.extend(args);
    call_args
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    pub endpoint: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerFailure {
    pub endpoint: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MulticastResult {
    pub successful: HashMap<i64, ServerResponse>,
    pub failed: HashMap<i64, ServerFailure>,
}

impl MulticastResult {
    pub fn record_success(&mut self, server_id: i64, endpoint: String, value: Value) {
        self.successful
            .insert(server_id, ServerResponse { endpoint, value });
    }

    pub fn record_failure<M: ToString>(
        &mut self,
        server_id: i64,
        endpoint: String,
        message: M,
    ) {
        let message = message.to_string();
        self.failed
            .insert(server_id, ServerFailure { endpoint, message });
    }
}

pub struct CallEngine {
    client: Arc<dyn BackendClient>,
    store: Arc<dyn SessionStore>,
    hub_endpoint: String,
    log: Logger,
}

impl CallEngine {
    pub fn new(
        client: Arc<dyn BackendClient>,
        store: Arc<dyn SessionStore>,
        hub_endpoint: String,
        log: Option<&Logger>,
    ) -> CallEngine {
        let log = log
            .cloned()
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        CallEngine {
            client,
            store,
            hub_endpoint,
            log: log.new(o!("component" => "call-engine")),
        }
    }

    /// Calls `method` with `args` as given.
    pub async fn execute(
        &self,
        endpoint: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, GatewayError> {
        self.client.execute_call(endpoint, method, args).await
    }

    pub async fn unicast(
        &self,
        endpoint: &str,
        session_key: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, GatewayError> {
        let args = with_session_key(String::from(session_key), args);
        self.execute(endpoint, method, args).await
    }

    /// Runs `method` against every target concurrently and returns once all
    /// of them have finished.
    pub async fn multicast(
        &self,
        method: &str,
        targets: Vec<CallTarget>,
    ) -> MulticastResult {
        debug!(self.log, "multicast";
               "method" => method, "targets" => targets.len());

        let tasks: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let client = Arc::clone(&self.client);
                let method = String::from(method);
                let server_id = target.server_id;
                let endpoint = target.endpoint.clone();
                let task = tokio::spawn(async move {
                    let endpoint = target.endpoint.clone();
                    client
                        .execute_call(&endpoint, &method, target.call_args())
                        .await
                });
                (server_id, endpoint, task)
            })
            .collect();

        let mut result = MulticastResult::default();
        for (server_id, endpoint, task) in tasks {
            match task.await {
                Ok(Ok(value)) => result.record_success(server_id, endpoint, value),
                Ok(Err(e)) => {
                    warn!(self.log, "multicast target failed";
                          "method" => method, "server_id" => server_id,
                          "err" => %e);
                    result.record_failure(server_id, endpoint, e);
                }
                Err(e) => {
                    warn!(self.log, "multicast task aborted";
                          "method" => method, "server_id" => server_id,
                          "err" => %e);
                    result.record_failure(server_id, endpoint, e);
                }
            }
        }
        result
    }

    /// Calls `method` on one server attached to the hub session `hub_key`.
    pub async fn unicast_to_server(
        &self,
        hub_key: &str,
        server_id: i64,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, GatewayError> {
        let sessions = self
            .store
            .get_all_server_sessions(hub_key)
            .ok_or(GatewayError::InvalidSession)?;
        let session = sessions
            .get(&server_id)
            .filter(|session| !session.is_failed_login())
            .ok_or(GatewayError::InvalidServerSession(server_id))?;

        self.unicast(&session.endpoint, &session.session_key, method, args)
            .await
    }

    /// Calls `method` on every listed server attached to the hub session
    /// `hub_key`, each with its own arguments. Every server must be attached;
    /// servers whose login failed are reported as failures without being
    /// called.
    pub async fn multicast_to_servers(
        &self,
        hub_key: &str,
        method: &str,
        server_args: Vec<(i64, Vec<Value>)>,
    ) -> Result<MulticastResult, GatewayError> {
        let sessions = self
            .store
            .get_all_server_sessions(hub_key)
            .ok_or(GatewayError::InvalidSession)?;

        let mut unattached = MulticastResult::default();
        let mut targets = Vec::with_capacity(server_args.len());
        for (server_id, args) in server_args {
            let session = sessions
                .get(&server_id)
                .ok_or(GatewayError::InvalidServerSession(server_id))?;
            if session.is_failed_login() {
                unattached.record_failure(
                    server_id,
                    session.endpoint.clone(),
                    GatewayError::InvalidServerSession(server_id),
                );
                continue;
            }
            targets.push(CallTarget {
                server_id,
                endpoint: session.endpoint.clone(),
                session_key: Some(session.session_key.clone()),
                args,
            });
        }

        let mut result = self.multicast(method, targets).await;
        result.failed.extend(unattached.failed);
        Ok(result)
    }

    /// Calls `method` on the hub with the caller's arguments untouched.
    pub async fn proxy_to_hub(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, GatewayError> {
        debug!(self.log, "proxying to hub"; "method" => method);
        self.execute(&self.hub_endpoint, method, args).await
    }
}
