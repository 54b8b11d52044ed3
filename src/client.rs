// Copyright 2020 Joyent, Inc.

//! Outbound XML-RPC calls to the hub and its peripheral servers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use slog::{debug, o, Drain, Logger};

use crate::config::Config;
use crate::error::GatewayError;
use crate::protocol::{MethodCall, MethodResponse, Value};

/// Executes a single XML-RPC call against a backend endpoint.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn execute_call(
        &self,
        endpoint: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, GatewayError>;
}

/// `BackendClient` over HTTP. Each call is bounded by the connect timeout
/// and the overall request timeout.
pub struct XmlRpcClient {
    http: reqwest::Client,
    log: Logger,
}

impl XmlRpcClient {
    pub fn new(
        connect_timeout: Duration,
        request_timeout: Duration,
        insecure_skip_verify: bool,
        log: Option<&Logger>,
    ) -> Result<XmlRpcClient, GatewayError> {
        let log = log
            .cloned()
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;

        Ok(XmlRpcClient {
            http,
            log: log.new(o!("component" => "xmlrpc-client")),
        })
    }

    pub fn from_config(
        config: &Config,
        log: Option<&Logger>,
    ) -> Result<XmlRpcClient, GatewayError> {
        XmlRpcClient::new(
            config.connect_timeout(),
            config.request_timeout(),
            config.insecure_skip_verify,
            log,
        )
    }
}

#[async_trait]
impl BackendClient for XmlRpcClient {
    async fn execute_call(
        &self,
        endpoint: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, GatewayError> {
        debug!(self.log, "executing backend call";
               "method" => method, "endpoint" => endpoint);

        let body = MethodCall::new(method, args).encode();
        let response = self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!(self.log, "backend call rejected";
                   "method" => method, "status" => status.as_u16());
            return Err(GatewayError::HttpStatus(status.as_u16()));
        }

        let payload = response.bytes().await?;
        match MethodResponse::parse(&payload) {
            Ok(MethodResponse::Success(value)) => Ok(value),
            Ok(MethodResponse::Fault(fault)) => {
                debug!(self.log, "backend call returned fault";
                       "method" => method, "fault" => %fault);
                Err(GatewayError::Fault(fault))
            }
            Err(_) => Err(GatewayError::MalformedResponse(format!(
                "{} returned an unreadable {} response",
                endpoint, method
            ))),
        }
    }
}
