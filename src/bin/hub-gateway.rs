// Copyright 2020 Joyent, Inc.

use std::path::Path;
use std::process;
use std::sync::{Arc, Mutex};

use clap::{crate_version, App, Arg, ArgMatches};
use slog::{error, info, o, Drain, Level, LevelFilter, Logger};
use tokio::net::TcpListener;

use hub_gateway::client::XmlRpcClient;
use hub_gateway::config::{Config, ConfigError};
use hub_gateway::gateway;
use hub_gateway::server;
use hub_gateway::session::{InMemorySessionStore, SessionStore};

static APP: &'static str = "hub-gateway";

pub fn parse_opts<'a>(app: &str) -> ArgMatches<'a> {
    App::new(app)
        .about("XML-RPC gateway to a hub and its peripheral servers")
        .version(crate_version!())
        .arg(
            Arg::with_name("config")
                .help("JSON configuration file (Default: $HUB_CONFIG_FILE)")
                .long("config")
                .short("c")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .help("Address to listen on, overriding the configuration")
                .long("listen")
                .short("l")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .help("Log debug output")
                .long("verbose")
                .short("v")
                .takes_value(false),
        )
        .get_matches()
}

fn load_config(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let mut config = match matches.value_of("config") {
        Some(path) => Config::from_file(Path::new(path))?,
        None => Config::from_env()?,
    };
    if let Some(listen) = matches.value_of("listen") {
        config.listen_address = String::from(listen);
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let matches = parse_opts(APP);

    let level = if matches.is_present("verbose") {
        Level::Debug
    } else {
        Level::Info
    };
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let root_log = Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            level,
        ))
        .fuse(),
        o!("build-id" => crate_version!()),
    );

    let config = load_config(&matches).unwrap_or_else(|e| {
        error!(root_log, "failed to load configuration"; "err" => %e);
        process::exit(1)
    });

    let client = XmlRpcClient::from_config(&config, Some(&root_log))
        .unwrap_or_else(|e| {
            error!(root_log, "failed to create backend client"; "err" => %e);
            process::exit(1)
        });
    let store = Arc::new(InMemorySessionStore::with_ttl(config.session_ttl()));
    let dispatcher = gateway::dispatcher(
        &config,
        Arc::new(client),
        store.clone(),
        Some(&root_log),
    );

    let purge_log = root_log.clone();
    let purge_store = Arc::clone(&store);
    let mut purge_interval = tokio::time::interval(config.purge_interval());
    tokio::spawn(async move {
        loop {
            purge_interval.tick().await;
            let purged = purge_store.purge_expired();
            if purged > 0 {
                info!(purge_log, "purged expired sessions";
                      "count" => purged, "remaining" => purge_store.len());
            }
        }
    });

    let listener = TcpListener::bind(config.listen_address.as_str())
        .await
        .unwrap_or_else(|e| {
            error!(root_log, "failed to bind";
                   "address" => &config.listen_address, "err" => %e);
            process::exit(1)
        });
    info!(root_log, "using hub"; "endpoint" => &config.hub.manager_api_url);

    let shutdown_log = root_log.clone();
    let shutdown = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(shutdown_log, "shutting down"),
            Err(e) => {
                error!(shutdown_log, "failed to wait for ctrl-c"; "err" => %e);
                std::future::pending::<()>().await
            }
        }
    };

    if let Err(e) = server::serve(
        listener,
        &config.api_path,
        Arc::new(dispatcher),
        shutdown,
        Some(&root_log),
    )
    .await
    {
        error!(root_log, "server error"; "err" => %e);
        process::exit(1);
    }
}
