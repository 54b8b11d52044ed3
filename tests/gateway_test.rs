// Copyright 2020 Joyent, Inc.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use slog::{o, Drain, Level, LevelFilter, Logger};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hub_gateway::client::{BackendClient, XmlRpcClient};
use hub_gateway::config::Config;
use hub_gateway::error::GatewayError;
use hub_gateway::gateway;
use hub_gateway::protocol::{Fault, MethodCall, MethodResponse, Value};
use hub_gateway::server;
use hub_gateway::session::InMemorySessionStore;

const API_PATH: &str = "/hub/rpc/api";

fn test_log() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            Level::Debug,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    )
}

fn success(value: Value) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/xml")
        .set_body_string(MethodResponse::Success(value).encode())
}

fn fault(code: i32, message: &'static str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/xml")
        .set_body_string(MethodResponse::Fault(Fault::new(code, message)).encode())
}

fn systems(ids: &[i64]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| {
                let mut system = BTreeMap::new();
                system.insert(String::from("id"), Value::Int(*id));
                Value::Struct(system)
            })
            .collect(),
    )
}

fn ints(ids: &[i64]) -> Value {
    Value::Array(ids.iter().map(|id| Value::Int(*id)).collect())
}

async fn rpc(server: &MockServer, call: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/rpc/api"))
        .and(body_string_contains(call))
        .respond_with(response)
        .mount(server)
        .await;
}

/// A hub managing servers 1 and 2. Server 1 accepts logins, server 2
/// refuses them.
struct Fleet {
    hub: MockServer,
    server_1: MockServer,
    server_2: MockServer,
}

impl Fleet {
    async fn start() -> Fleet {
        let hub = MockServer::start().await;
        let server_1 = MockServer::start().await;
        let server_2 = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_string_contains("auth.login"))
            .and(body_string_contains("<string>admin</string>"))
            .respond_with(success(Value::from("hub-key")))
            .mount(&hub)
            .await;
        rpc(&hub, "auth.login", fault(2950, "Invalid credentials")).await;
        rpc(&hub, "auth.logout", success(Value::Int(1))).await;
        rpc(&hub, "system.listUserSystems", success(systems(&[1, 2]))).await;
        rpc(&hub, "system.listSystems", success(systems(&[1, 2]))).await;
        for (id, peripheral) in [(1, &server_1), (2, &server_2)].iter() {
            Mock::given(method("POST"))
                .and(body_string_contains("system.listFqdns"))
                .and(body_string_contains(format!("<int>{}</int>", id)))
                .respond_with(success(Value::Array(vec![Value::from(
                    peripheral.address().to_string(),
                )])))
                .mount(&hub)
                .await;
        }
        rpc(&hub, "system.listActiveSystems", success(systems(&[1]))).await;

        rpc(&server_1, "auth.login", success(Value::from("server-1-key"))).await;
        rpc(&server_1, "auth.logout", success(Value::Int(1))).await;
        Mock::given(method("POST"))
            .and(body_string_contains("system.getName"))
            .and(body_string_contains("server-1-key"))
            .respond_with(success(Value::from("server-one")))
            .mount(&server_1)
            .await;

        rpc(&server_2, "auth.login", fault(2950, "Invalid credentials")).await;

        Fleet {
            hub,
            server_1,
            server_2,
        }
    }

    fn config(&self) -> Config {
        Config::parse(&format!(
            r#"{{"hub": {{"manager_api_url": "{}/rpc/api"}},
                "peripheral_entitlement": null}}"#,
            self.hub.uri()
        ))
        .unwrap()
    }
}

struct Gateway {
    url: String,
    http: reqwest::Client,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), std::io::Error>>,
}

impl Gateway {
    async fn start(config: Config) -> Gateway {
        let log = test_log();
        let client = XmlRpcClient::from_config(&config, Some(&log)).unwrap();
        let store = Arc::new(InMemorySessionStore::new());
        let dispatcher =
            gateway::dispatcher(&config, Arc::new(client), store, Some(&log));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server::serve(
                listener,
                API_PATH,
                Arc::new(dispatcher),
                async move {
                    stopped.await.ok();
                },
                Some(&log),
            )
            .await
        });

        Gateway {
            url: format!("http://{}{}", addr, API_PATH),
            http: reqwest::Client::new(),
            stop,
            task,
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, Fault> {
        let body = MethodCall::new(method, params).encode();
        self.post(body).await.into_result()
    }

    async fn post(&self, body: String) -> MethodResponse {
        let response = self
            .http
            .post(&self.url)
            .header("content-type", "text/xml")
            .body(body)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        MethodResponse::parse(&response.bytes().await.unwrap()).unwrap()
    }

    async fn stop(self) {
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

fn partition(value: &Value, name: &str) -> (Value, Value) {
    let partition = value.get(name).unwrap();
    (
        partition.get("ServerIds").unwrap().clone(),
        partition.get("Responses").unwrap().clone(),
    )
}

#[tokio::test]
async fn autoconnect_multicast_unicast_logout() {
    let fleet = Fleet::start().await;
    let gateway = Gateway::start(fleet.config()).await;

    let login = gateway
        .call(
            "hub.loginWithAutoconnectMode",
            vec![Value::from("admin"), Value::from("admin")],
        )
        .await
        .unwrap();
    assert_eq!(login.get("SessionKey"), Some(&Value::from("hub-key")));
    let (ids, responses) = partition(&login, "Successful");
    assert_eq!(ids, ints(&[1]));
    assert_eq!(responses, Value::Array(vec![Value::from("server-1-key")]));
    let (ids, _) = partition(&login, "Failed");
    assert_eq!(ids, ints(&[2]));

    let names = gateway
        .call(
            "multicast.system.getName",
            vec![Value::from("hub-key"), ints(&[1, 2])],
        )
        .await
        .unwrap();
    let (ids, responses) = partition(&names, "Successful");
    assert_eq!(ids, ints(&[1]));
    assert_eq!(responses, Value::Array(vec![Value::from("server-one")]));
    let (ids, responses) = partition(&names, "Failed");
    assert_eq!(ids, ints(&[2]));
    assert_eq!(
        responses,
        Value::Array(vec![Value::from(
            "Authentication error: no valid session for server 2"
        )])
    );

    let name = gateway
        .call(
            "unicast.system.getName",
            vec![Value::from("hub-key"), Value::Int(1)],
        )
        .await
        .unwrap();
    assert_eq!(name, Value::from("server-one"));

    let err = gateway
        .call(
            "unicast.system.getName",
            vec![Value::from("hub-key"), Value::Int(2)],
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, -32500);

    let proxied = gateway
        .call("system.listActiveSystems", vec![Value::from("hub-key")])
        .await
        .unwrap();
    assert_eq!(proxied, systems(&[1]));

    let logout = gateway
        .call("hub.logout", vec![Value::from("hub-key")])
        .await
        .unwrap();
    assert_eq!(logout, Value::Int(1));

    let err = gateway
        .call("hub.listServerIds", vec![Value::from("hub-key")])
        .await
        .unwrap_err();
    assert_eq!(
        err.message,
        "Application Error: Authentication error: provided session key is \
         invalid"
    );

    let server_2_calls = fleet.server_2.received_requests().await.unwrap();
    assert_eq!(server_2_calls.len(), 1);
    let server_1_calls = fleet.server_1.received_requests().await.unwrap();
    assert_eq!(server_1_calls.len(), 4);

    gateway.stop().await;
}

#[tokio::test]
async fn slow_server_fails_only_its_own_target() {
    let hub = MockServer::start().await;
    let fast = MockServer::start().await;
    let slow = MockServer::start().await;

    rpc(&hub, "auth.login", success(Value::from("hub-key"))).await;
    rpc(&hub, "system.listUserSystems", success(systems(&[1, 2]))).await;
    rpc(&hub, "system.listSystems", success(systems(&[1, 2]))).await;
    for (id, peripheral) in [(1, &fast), (2, &slow)].iter() {
        Mock::given(method("POST"))
            .and(body_string_contains("system.listFqdns"))
            .and(body_string_contains(format!("<int>{}</int>", id)))
            .respond_with(success(Value::Array(vec![Value::from(
                peripheral.address().to_string(),
            )])))
            .mount(&hub)
            .await;
    }
    rpc(&fast, "auth.login", success(Value::from("server-1-key"))).await;
    rpc(&fast, "system.getName", success(Value::from("server-one"))).await;
    rpc(&slow, "auth.login", success(Value::from("server-2-key"))).await;
    Mock::given(method("POST"))
        .and(body_string_contains("system.getName"))
        .respond_with(
            success(Value::from("server-two")).set_delay(Duration::from_secs(5)),
        )
        .mount(&slow)
        .await;

    let config = Config::parse(&format!(
        r#"{{"hub": {{"manager_api_url": "{}/rpc/api"}},
            "peripheral_entitlement": null,
            "connect_timeout": 1,
            "read_write_timeout": 1}}"#,
        hub.uri()
    ))
    .unwrap();
    let gateway = Gateway::start(config).await;

    let login = gateway
        .call(
            "hub.loginWithAutoconnectMode",
            vec![Value::from("admin"), Value::from("admin")],
        )
        .await
        .unwrap();
    let (ids, _) = partition(&login, "Successful");
    assert_eq!(ids, ints(&[1, 2]));

    let started = Instant::now();
    let names = gateway
        .call(
            "multicast.system.getName",
            vec![Value::from("hub-key"), ints(&[1, 2])],
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    let (ids, responses) = partition(&names, "Successful");
    assert_eq!(ids, ints(&[1]));
    assert_eq!(responses, Value::Array(vec![Value::from("server-one")]));
    let (ids, _) = partition(&names, "Failed");
    assert_eq!(ids, ints(&[2]));
    assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);

    gateway.stop().await;
}

#[tokio::test]
async fn rejected_login_and_bad_requests() {
    let fleet = Fleet::start().await;
    let gateway = Gateway::start(fleet.config()).await;

    let err = gateway
        .call("hub.login", vec![Value::from("x"), Value::from("y")])
        .await
        .unwrap_err();
    assert_eq!(err.code, 2950);

    let err = gateway
        .call("hub.login", vec![Value::from("admin")])
        .await
        .unwrap_err();
    assert_eq!(err.code, -32602);

    let response = gateway.post(String::from("<methodCall>")).await;
    match response {
        MethodResponse::Fault(fault) => assert_eq!(fault.code, -32700),
        other => panic!("unexpected response {:?}", other),
    }

    gateway.stop().await;
}

#[tokio::test]
async fn client_reports_transport_failures() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("nonsense"))
        .mount(&backend)
        .await;
    rpc(&backend, "auth.login", fault(2950, "Invalid credentials")).await;

    let client = XmlRpcClient::from_config(
        &Config::parse(r#"{"hub": {"manager_api_url": "http://hub/rpc/api"}}"#)
            .unwrap(),
        None,
    )
    .unwrap();

    let err = client
        .execute_call(&format!("{}/bad", backend.uri()), "api.getVersion", vec![])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "request error: bad status code - 400");

    let err = client
        .execute_call(&format!("{}/garbage", backend.uri()), "api.getVersion", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::MalformedResponse(_)));

    let err = client
        .execute_call(
            &format!("{}/rpc/api", backend.uri()),
            "auth.login",
            vec![Value::from("x"), Value::from("y")],
        )
        .await
        .unwrap_err();
    match err {
        GatewayError::Fault(fault) => assert_eq!(fault.code, 2950),
        other => panic!("unexpected error {:?}", other),
    }
}
