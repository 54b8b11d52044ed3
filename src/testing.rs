// Copyright 2020 Joyent, Inc.

//! Scripted stand-in for the hub and its peripheral servers.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::BackendClient;
use crate::error::GatewayError;
use crate::protocol::{Fault, Value, FAULT_INVALID_CREDENTIALS};

pub const HUB_ENDPOINT: &str = "http://hub/rpc/api";
pub const HUB_SESSION_KEY: &str = "hub-key";

pub fn server_endpoint(server_id: i64) -> String {
    format!("http://server-{}.example.com/rpc/api", server_id)
}

pub fn server_session_key(server_id: i64) -> String {
    format!("server-{}-key", server_id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Default)]
struct FleetState {
    servers: Vec<i64>,
    entitled: Vec<i64>,
    user_systems: Option<Vec<i64>>,
    unresolvable: HashSet<i64>,
    failing_logins: HashSet<i64>,
    failing_calls: HashSet<i64>,
    hub_logout_fails: bool,
    calls: Vec<RecordedCall>,
}

/// A hub that accepts `admin`/`admin` and manages `servers`, each reachable
/// at `server_endpoint(id)`. Every call is recorded.
#[derive(Clone)]
pub struct Fleet {
    state: Arc<Mutex<FleetState>>,
}

impl Fleet {
    pub fn new(servers: &[i64]) -> Fleet {
        let state = FleetState {
            servers: servers.to_vec(),
            ..FleetState::default()
        };
        Fleet {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn entitled(self, ids: &[i64]) -> Fleet {
        self.state.lock().entitled = ids.to_vec();
        self
    }

    pub fn user_systems(self, ids: &[i64]) -> Fleet {
        self.state.lock().user_systems = Some(ids.to_vec());
        self
    }

    pub fn unresolvable(self, ids: &[i64]) -> Fleet {
        self.state.lock().unresolvable.extend(ids);
        self
    }

    pub fn failing_logins(self, ids: &[i64]) -> Fleet {
        self.state.lock().failing_logins.extend(ids);
        self
    }

    pub fn failing_calls(self, ids: &[i64]) -> Fleet {
        self.state.lock().failing_calls.extend(ids);
        self
    }

    pub fn hub_logout_fails(self) -> Fleet {
        self.state.lock().hub_logout_fails = true;
        self
    }

    pub fn client(&self) -> Arc<dyn BackendClient> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    fn hub_call(
        &self,
        method: &str,
        args: &[Value],
    ) -> Result<Value, GatewayError> {
        let state = self.state.lock();
        if method == "auth.login" {
            return match (args[0].as_str(), args[1].as_str()) {
                (Some("admin"), Some("admin")) => {
                    Ok(Value::from(HUB_SESSION_KEY))
                }
                _ => Err(Fault::new(2950, "Invalid credentials").into()),
            };
        }
        if args.first().and_then(Value::as_str) != Some(HUB_SESSION_KEY) {
            return Err(Fault::new(2950, "Could not find session").into());
        }

        let value = match method {
            "auth.logout" if state.hub_logout_fails => {
                return Err(GatewayError::HttpStatus(503));
            }
            "auth.logout" => Value::Int(1),
            "system.listSystems" => systems(&state.servers),
            "system.listSystemsWithEntitlement" => systems(&state.entitled),
            "system.listUserSystems" => systems(
                state.user_systems.as_ref().unwrap_or(&state.servers),
            ),
            "system.listFqdns" => {
                let id = args[1].as_i64().unwrap();
                if state.unresolvable.contains(&id) {
                    Value::Array(Vec::new())
                } else {
                    Value::Array(vec![Value::from(format!(
                        "server-{}.example.com",
                        id
                    ))])
                }
            }
            other => Value::from(format!("hub:{}", other)),
        };
        Ok(value)
    }

    fn server_call(
        &self,
        server_id: i64,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, GatewayError> {
        let state = self.state.lock();
        match method {
            "auth.login" if state.failing_logins.contains(&server_id) => {
                Err(FAULT_INVALID_CREDENTIALS.into())
            }
            "auth.login" => Ok(Value::from(server_session_key(server_id))),
            "auth.logout" => Ok(Value::Int(1)),
            _ if state.failing_calls.contains(&server_id) => {
                Err(GatewayError::HttpStatus(500))
            }
            _ => Ok(Value::Array(vec![
                Value::Int(server_id),
                Value::from(method),
                Value::Array(args),
            ])),
        }
    }
}

fn systems(ids: &[i64]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| {
                let mut system = BTreeMap::new();
                system.insert(String::from("id"), Value::Int(*id));
                system.insert(
                    String::from("name"),
                    Value::from(format!("server-{}", id)),
                );
                Value::Struct(system)
            })
            .collect(),
    )
}

fn server_id_of(endpoint: &str) -> Option<i64> {
    let host = endpoint.split("://").nth(1)?;
    host.strip_prefix("server-")?.split('.').next()?.parse().ok()
}

#[async_trait]
impl BackendClient for Fleet {
    async fn execute_call(
        &self,
        endpoint: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, GatewayError> {
        self.state.lock().calls.push(RecordedCall {
            endpoint: String::from(endpoint),
            method: String::from(method),
            args: args.clone(),
        });

        if endpoint == HUB_ENDPOINT {
            return self.hub_call(method, &args);
        }
        let server_id = server_id_of(endpoint)
            .filter(|id| self.state.lock().servers.contains(id));
        match server_id {
            Some(id) => self.server_call(id, method, args),
            None => Err(GatewayError::HttpStatus(404)),
        }
    }
}
