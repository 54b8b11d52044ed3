// Copyright 2020 Joyent, Inc.

//! HTTP listener. Request bodies posted to the API path are handed to the
//! dispatcher and its output is written back as `text/xml`.

use std::future::Future;
use std::io::Error;
use std::sync::Arc;

use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use slog::{info, o, Drain, Logger};
use tokio::net::TcpListener;

use crate::dispatch::Dispatcher;
use crate::protocol::{MethodResponse, FAULT_SYSTEM_ERROR};

pub fn router(path: &str, dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route(path, post(rpc_handler))
        .with_state(dispatcher)
}

async fn rpc_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: Result<Bytes, BytesRejection>,
) -> impl IntoResponse {
    let response = match body {
        Ok(body) => dispatcher.handle(&body).await,
        Err(e) => MethodResponse::Fault(FAULT_SYSTEM_ERROR.with_detail(e))
            .encode()
            .into_bytes(),
    };
    ([(CONTENT_TYPE, "text/xml")], response)
}

/// Serves `dispatcher` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    path: &str,
    dispatcher: Arc<Dispatcher>,
    shutdown: F,
    log: Option<&Logger>,
) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let log = log
        .cloned()
        .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
    let addr = listener.local_addr()?;
    info!(log, "listening for xml-rpc requests";
          "address" => %addr, "path" => path);

    axum::serve(listener, router(path, dispatcher))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(log, "server stopped");
    Ok(())
}
