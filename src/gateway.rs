// Copyright 2020 Joyent, Inc.

//! The standard method registry: the `hub.*` session operations, the
//! `multicast.*` and `unicast.*` namespaces, and pass-through of everything
//! else to the hub.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use slog::Logger;

use crate::client::BackendClient;
use crate::config::Config;
use crate::dispatch::{Dispatcher, Handler};
use crate::error::GatewayError;
use crate::login::LoginOrchestrator;
use crate::multicast::{CallEngine, MulticastResult};
use crate::parser::{
    parse_attach, parse_credentials, parse_multicast, parse_proxy,
    parse_session_key, parse_unicast, Request,
};
use crate::protocol::Value;
use crate::session::SessionStore;
use crate::topology::TopologyResolver;

pub const LOGIN: &str = "login";
pub const LOGIN_WITH_RELAY_MODE: &str = "login_with_relay_mode";
pub const LOGIN_WITH_AUTOCONNECT_MODE: &str = "login_with_autoconnect_mode";
pub const ATTACH_TO_SERVERS: &str = "attach_to_servers";
pub const LIST_SERVER_IDS: &str = "list_server_ids";
pub const LOGOUT: &str = "logout";
pub const MULTICAST: &str = "multicast";
pub const UNICAST: &str = "unicast";
pub const PROXY_TO_HUB: &str = "proxy_to_hub";

/// What the handlers operate on.
pub struct Services {
    pub login: Arc<LoginOrchestrator>,
    pub engine: Arc<CallEngine>,
}

/// Assembles the gateway components for `config` and registers them.
pub fn dispatcher(
    config: &Config,
    client: Arc<dyn BackendClient>,
    store: Arc<dyn SessionStore>,
    log: Option<&Logger>,
) -> Dispatcher {
    let hub_endpoint = config.hub.manager_api_url.clone();
    let engine = Arc::new(CallEngine::new(
        Arc::clone(&client),
        Arc::clone(&store),
        hub_endpoint.clone(),
        log,
    ));
    let topology = Arc::new(TopologyResolver::new(
        client,
        hub_endpoint.clone(),
        config.use_ssl,
        config.peripheral_entitlement.clone(),
        log,
    ));
    let login = Arc::new(LoginOrchestrator::new(
        hub_endpoint,
        Arc::clone(&engine),
        topology,
        store,
        log,
    ));

    standard_dispatcher(Services { login, engine }, log)
}

pub fn standard_dispatcher(services: Services, log: Option<&Logger>) -> Dispatcher {
    let services = Arc::new(services);
    let mut dispatcher = Dispatcher::new(log);

    dispatcher.register_method("hub.login", LOGIN);
    dispatcher.register_method("hub.loginWithAuthRelayMode", LOGIN_WITH_RELAY_MODE);
    dispatcher.register_method(
        "hub.loginWithAutoconnectMode",
        LOGIN_WITH_AUTOCONNECT_MODE,
    );
    dispatcher.register_method("hub.attachToServers", ATTACH_TO_SERVERS);
    dispatcher.register_method("hub.listServerIds", LIST_SERVER_IDS);
    dispatcher.register_method("hub.logout", LOGOUT);
    dispatcher.register_namespace_default("multicast", MULTICAST);
    dispatcher.register_namespace_default("unicast", UNICAST);
    dispatcher.register_default(PROXY_TO_HUB);

    dispatcher.register_handler(LOGIN, parse_credentials, bind(&services, login));
    dispatcher.register_handler(
        LOGIN_WITH_RELAY_MODE,
        parse_credentials,
        bind(&services, login_with_relay_mode),
    );
    dispatcher.register_handler(
        LOGIN_WITH_AUTOCONNECT_MODE,
        parse_credentials,
        bind(&services, login_with_autoconnect_mode),
    );
    dispatcher.register_handler(
        ATTACH_TO_SERVERS,
        parse_attach,
        bind(&services, attach_to_servers),
    );
    dispatcher.register_handler(
        LIST_SERVER_IDS,
        parse_session_key,
        bind(&services, list_server_ids),
    );
    dispatcher.register_handler(LOGOUT, parse_session_key, bind(&services, logout));
    dispatcher.register_handler(MULTICAST, parse_multicast, bind(&services, multicast));
    dispatcher.register_handler(UNICAST, parse_unicast, bind(&services, unicast));
    dispatcher.register_handler(
        PROXY_TO_HUB,
        parse_proxy,
        bind(&services, proxy_to_hub),
    );

    dispatcher
}

fn bind<F, Fut>(services: &Arc<Services>, handler: F) -> Handler
where
    F: Fn(Arc<Services>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, GatewayError>> + Send + 'static,
{
    let services = Arc::clone(services);
    Arc::new(move |request| handler(Arc::clone(&services), request).boxed())
}

/// A parser handed a handler the wrong kind of request.
fn unexpected(request: &Request) -> GatewayError {
    GatewayError::Internal(format!("unexpected {} request", request.kind()))
}

async fn login(services: Arc<Services>, request: Request) -> Result<Value, GatewayError> {
    match request {
        Request::Credentials(credentials) => {
            let key = services.login.login(&credentials).await?;
            Ok(Value::from(key))
        }
        other => Err(unexpected(&other)),
    }
}

async fn login_with_relay_mode(
    services: Arc<Services>,
    request: Request,
) -> Result<Value, GatewayError> {
    match request {
        Request::Credentials(credentials) => {
            let key = services.login.login_with_relay_mode(&credentials).await?;
            Ok(Value::from(key))
        }
        other => Err(unexpected(&other)),
    }
}

async fn login_with_autoconnect_mode(
    services: Arc<Services>,
    request: Request,
) -> Result<Value, GatewayError> {
    match request {
        Request::Credentials(credentials) => {
            let login = services
                .login
                .login_with_autoconnect_mode(&credentials)
                .await?;
            let mut members = multicast_result_members(&login.attach);
            members.insert(String::from("SessionKey"), Value::from(login.session_key));
            Ok(Value::Struct(members))
        }
        other => Err(unexpected(&other)),
    }
}

async fn attach_to_servers(
    services: Arc<Services>,
    request: Request,
) -> Result<Value, GatewayError> {
    match request {
        Request::AttachToServers(attach) => {
            let result = services
                .login
                .attach_to_servers(&attach.hub_key, &attach.server_ids, attach.credentials)
                .await?;
            Ok(multicast_result_value(&result))
        }
        other => Err(unexpected(&other)),
    }
}

async fn list_server_ids(
    services: Arc<Services>,
    request: Request,
) -> Result<Value, GatewayError> {
    match request {
        Request::SessionKey(key) => {
            let ids = services.login.list_server_ids(&key).await?;
            Ok(Value::Array(ids.into_iter().map(Value::Int).collect()))
        }
        other => Err(unexpected(&other)),
    }
}

async fn logout(services: Arc<Services>, request: Request) -> Result<Value, GatewayError> {
    match request {
        Request::SessionKey(key) => {
            services.login.logout(&key).await?;
            Ok(Value::Int(1))
        }
        other => Err(unexpected(&other)),
    }
}

async fn multicast(
    services: Arc<Services>,
    request: Request,
) -> Result<Value, GatewayError> {
    match request {
        Request::Multicast(multicast) => {
            let result = services
                .engine
                .multicast_to_servers(
                    &multicast.hub_key,
                    &multicast.call,
                    multicast.server_args,
                )
                .await?;
            Ok(multicast_result_value(&result))
        }
        other => Err(unexpected(&other)),
    }
}

async fn unicast(services: Arc<Services>, request: Request) -> Result<Value, GatewayError> {
    match request {
        Request::Unicast(unicast) => {
            services
                .engine
                .unicast_to_server(
                    &unicast.hub_key,
                    unicast.server_id,
                    &unicast.call,
                    unicast.args,
                )
                .await
        }
        other => Err(unexpected(&other)),
    }
}

async fn proxy_to_hub(
    services: Arc<Services>,
    request: Request,
) -> Result<Value, GatewayError> {
    match request {
        Request::ProxyToHub(proxy) => {
            services.engine.proxy_to_hub(&proxy.call, proxy.args).await
        }
        other => Err(unexpected(&other)),
    }
}

/// `{Successful: {ServerIds, Responses}, Failed: {ServerIds, Responses}}`
/// with server IDs in ascending order. Failure responses are the failure
/// messages.
pub fn multicast_result_value(result: &MulticastResult) -> Value {
    Value::Struct(multicast_result_members(result))
}

fn multicast_result_members(result: &MulticastResult) -> BTreeMap<String, Value> {
    let successful = result
        .successful
        .iter()
        .map(|(id, response)| (*id, response.value.clone()));
    let failed = result
        .failed
        .iter()
        .map(|(id, failure)| (*id, Value::from(failure.message.as_str())));

    let mut members = BTreeMap::new();
    members.insert(String::from("Successful"), outcome_value(successful));
    members.insert(String::from("Failed"), outcome_value(failed));
    members
}

fn outcome_value<I>(outcomes: I) -> Value
where
    I: Iterator<Item = (i64, Value)>,
{
    let sorted: BTreeMap<i64, Value> = outcomes.collect();
    let (ids, responses): (Vec<Value>, Vec<Value>) = sorted
        .into_iter()
        .map(|(id, value)| (Value::Int(id), value))
        .unzip();

    let mut members = BTreeMap::new();
    members.insert(String::from("ServerIds"), Value::Array(ids));
    members.insert(String::from("Responses"), Value::Array(responses));
    Value::Struct(members)
}
