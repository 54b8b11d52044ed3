// Copyright 2020 Joyent, Inc.

//! Routing of inbound XML-RPC calls to handlers.
//!
//! A call's method name is resolved to a handler name by, in order: an exact
//! registration, the default handler of the method's namespace (the text
//! before the first `.`), the global default handler, and finally the method
//! name itself. The handler's parser turns the call arguments into a
//! `Request`, and the handler's outcome is encoded back into a
//! `methodResponse`.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use slog::{debug, error, o, Drain, Logger};

use crate::error::GatewayError;
use crate::parser::{Parser, Request};
use crate::protocol::{
    Fault, MethodCall, MethodResponse, Value, FAULT_INTERNAL_ERROR,
};

pub type Handler = Arc<
    dyn Fn(Request) -> BoxFuture<'static, Result<Value, GatewayError>>
        + Send
        + Sync,
>;

pub struct Dispatcher {
    methods: HashMap<String, String>,
    namespace_defaults: HashMap<String, String>,
    default_handler: Option<String>,
    parsers: HashMap<String, Parser>,
    handlers: HashMap<String, Handler>,
    log: Logger,
}

impl Dispatcher {
    pub fn new(log: Option<&Logger>) -> Dispatcher {
        let log = log
            .cloned()
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        Dispatcher {
            methods: HashMap::new(),
            namespace_defaults: HashMap::new(),
            default_handler: None,
            parsers: HashMap::new(),
            handlers: HashMap::new(),
            log: log.new(o!("component" => "dispatcher")),
        }
    }

    /// Routes the wire method `method` to `handler`.
    pub fn register_method(&mut self, method: &str, handler: &str) {
        self.methods
            .insert(String::from(method), String::from(handler));
    }

    /// Routes every method in `namespace` without an exact registration to
    /// `handler`.
    pub fn register_namespace_default(&mut self, namespace: &str, handler: &str) {
        self.namespace_defaults
            .insert(String::from(namespace), String::from(handler));
    }

    pub fn register_default(&mut self, handler: &str) {
        self.default_handler = Some(String::from(handler));
    }

    pub fn register_handler(&mut self, name: &str, parser: Parser, handler: Handler) {
        self.parsers.insert(String::from(name), parser);
        self.handlers.insert(String::from(name), handler);
    }

    /// Name of the handler serving `method`.
    pub fn resolve<'a>(&'a self, method: &'a str) -> &'a str {
        if let Some(handler) = self.methods.get(method) {
            return handler;
        }
        if let Some((namespace, _)) = method.split_once('.') {
            if let Some(handler) = self.namespace_defaults.get(namespace) {
                return handler;
            }
        }
        match &self.default_handler {
            Some(handler) => handler.as_str(),
            None => method,
        }
    }

    pub async fn dispatch(&self, call: MethodCall) -> Result<Value, Fault> {
        let name = self.resolve(&call.method);
        let (parser, handler) =
            match (self.parsers.get(name), self.handlers.get(name)) {
                (Some(parser), Some(handler)) => (parser, handler),
                _ => {
                    error!(self.log, "no handler registered";
                           "method" => &call.method, "handler" => name);
                    return Err(FAULT_INTERNAL_ERROR.with_detail(format!(
                        "no handler for {}",
                        call.method
                    )));
                }
            };

        let request = parser(&call.method, &call.params)?;
        debug!(self.log, "dispatching";
               "method" => &call.method, "handler" => name,
               "request" => request.kind());

        handler(request).await.map_err(|e| {
            let fault = Dispatcher::encode_error(e);
            debug!(self.log, "request failed";
                   "method" => &call.method, "fault" => %fault);
            fault
        })
    }

    /// Serves one request body. The returned body is always a well-formed
    /// `methodResponse`, carrying a fault if anything went wrong.
    pub async fn handle(&self, body: &[u8]) -> Vec<u8> {
        let response = match MethodCall::parse(body) {
            Ok(call) => match self.dispatch(call).await {
                Ok(value) => MethodResponse::Success(value),
                Err(fault) => MethodResponse::Fault(fault),
            },
            Err(fault) => {
                error!(self.log, "undecodable request"; "fault" => %fault);
                MethodResponse::Fault(fault)
            }
        };
        response.encode().into_bytes()
    }

    /// Faults pass through; any other error is reported as an application
    /// error carrying its text.
    pub fn encode_error(err: GatewayError) -> Fault {
        err.into_fault()
    }
}
