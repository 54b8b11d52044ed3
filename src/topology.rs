// Copyright 2020 Joyent, Inc.

//! Discovery of the peripheral servers behind the hub.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use slog::{debug, o, warn, Drain, Logger};

use crate::client::BackendClient;
use crate::error::GatewayError;
use crate::protocol::Value;

pub const LIST_SYSTEMS: &str = "system.listSystems";
pub const LIST_SYSTEMS_WITH_ENTITLEMENT: &str =
    "system.listSystemsWithEntitlement";
pub const LIST_USER_SYSTEMS: &str = "system.listUserSystems";
pub const LIST_FQDNS: &str = "system.listFqdns";

/// Outcome of resolving a batch of server IDs to API endpoints.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EndpointResolution {
    pub resolved: HashMap<i64, String>,
    /// Server ID to the reason its endpoint is unknown.
    pub failed: HashMap<i64, String>,
}

pub struct TopologyResolver {
    client: Arc<dyn BackendClient>,
    hub_endpoint: String,
    use_ssl: bool,
    entitlement: Option<String>,
    log: Logger,
}

impl TopologyResolver {
    pub fn new(
        client: Arc<dyn BackendClient>,
        hub_endpoint: String,
        use_ssl: bool,
        entitlement: Option<String>,
        log: Option<&Logger>,
    ) -> TopologyResolver {
        let log = log
            .cloned()
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        TopologyResolver {
            client,
            hub_endpoint,
            use_ssl,
            entitlement,
            log: log.new(o!("component" => "topology")),
        }
    }

    /// Every server the hub manages. When an entitlement is configured only
    /// entitled systems are listed, unless the hub returns none (or does not
    /// know the call), in which case the unfiltered list is used.
    pub async fn list_server_ids(
        &self,
        hub_key: &str,
    ) -> Result<Vec<i64>, GatewayError> {
        if let Some(entitlement) = &self.entitlement {
            let args = vec![Value::from(hub_key), Value::from(entitlement.as_str())];
            match self.list_systems(LIST_SYSTEMS_WITH_ENTITLEMENT, args).await {
                Ok(ids) if !ids.is_empty() => return Ok(ids),
                Ok(_) => {
                    debug!(self.log, "no entitled systems, listing all";
                           "entitlement" => entitlement);
                }
                Err(GatewayError::Fault(fault)) => {
                    debug!(self.log, "entitlement query rejected, listing all";
                           "entitlement" => entitlement, "fault" => %fault);
                }
                Err(e) => return Err(e),
            }
        }
        self.list_systems(LIST_SYSTEMS, vec![Value::from(hub_key)])
            .await
    }

    /// Servers visible to `username` that the hub also reports as managed,
    /// in the order the hub lists the user's systems.
    pub async fn list_user_server_ids(
        &self,
        hub_key: &str,
        username: &str,
    ) -> Result<Vec<i64>, GatewayError> {
        let args = vec![Value::from(hub_key), Value::from(username)];
        let user_ids = self.list_systems(LIST_USER_SYSTEMS, args).await?;
        let known: HashSet<i64> =
            self.list_server_ids(hub_key).await?.into_iter().collect();

        let mut seen = HashSet::new();
        Ok(user_ids
            .into_iter()
            .filter(|id| known.contains(id) && seen.insert(*id))
            .collect())
    }

    /// Looks up every server's endpoint concurrently. A failed lookup only
    /// marks its own server as failed.
    pub async fn resolve_endpoints(
        &self,
        hub_key: &str,
        server_ids: &[i64],
    ) -> EndpointResolution {
        let lookups = server_ids.iter().map(|id| async move {
            (*id, self.resolve_endpoint(hub_key, *id).await)
        });

        let mut resolution = EndpointResolution::default();
        for (id, result) in join_all(lookups).await {
            match result {
                Ok(endpoint) => {
                    resolution.resolved.insert(id, endpoint);
                }
                Err(e) => {
                    warn!(self.log, "failed to resolve server endpoint";
                          "server_id" => id, "err" => %e);
                    resolution.failed.insert(id, e.to_string());
                }
            }
        }
        resolution
    }

    async fn resolve_endpoint(
        &self,
        hub_key: &str,
        server_id: i64,
    ) -> Result<String, GatewayError> {
        let args = vec![Value::from(hub_key), Value::Int(server_id)];
        let fqdns = self
            .client
            .execute_call(&self.hub_endpoint, LIST_FQDNS, args)
            .await?;

        let fqdn = fqdns
            .as_array()
            .and_then(|fqdns| fqdns.first())
            .ok_or_else(|| {
                GatewayError::Internal(format!(
                    "no FQDN published for server {}",
                    server_id
                ))
            })?;
        let fqdn = fqdn.as_str().ok_or_else(|| {
            GatewayError::MalformedResponse(format!(
                "{} returned a {} instead of a string",
                LIST_FQDNS,
                fqdn.type_name()
            ))
        })?;

        Ok(self.endpoint_for(fqdn))
    }

    pub fn endpoint_for(&self, fqdn: &str) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}/rpc/api", scheme, fqdn)
    }

    async fn list_systems(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<i64>, GatewayError> {
        let systems = self
            .client
            .execute_call(&self.hub_endpoint, method, args)
            .await?;
        system_ids(method, &systems)
    }
}

/// Extracts the `id` member of every system struct in a listing.
fn system_ids(method: &str, systems: &Value) -> Result<Vec<i64>, GatewayError> {
    let malformed = |what: &str| {
        GatewayError::MalformedResponse(format!("{} returned {}", method, what))
    };

    systems
        .as_array()
        .ok_or_else(|| malformed(systems.type_name()))?
        .iter()
        .map(|system| {
            system
                .get("id")
                .and_then(Value::as_i64)
                .ok_or_else(|| malformed("a system without an integer id"))
        })
        .collect()
}
