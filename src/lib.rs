// Copyright 2020 Joyent, Inc.

//! hub-gateway: one XML-RPC endpoint in front of a hub and its servers
//!
//! A hub manages a fleet of peripheral servers, each with its own XML-RPC
//! API and its own sessions. The gateway lets a client log into the hub once
//! and then address any number of those servers through the same protocol.
//!
//! Methods are routed by namespace, the text before the first `.`:
//!
//! * `hub.*`         session administration:
//!
//!     * `hub.login(username, password)` logs into the hub only.
//!
//!     * `hub.loginWithAuthRelayMode(username, password)` also keeps the
//!       credentials so they can be replayed to servers later.
//!
//!     * `hub.loginWithAutoconnectMode(username, password)` logs into every
//!       server visible to the user as part of the login.
//!
//!     * `hub.attachToServers(key, server_ids, [usernames, passwords])` logs
//!       into more servers.
//!
//!     * `hub.listServerIds(key)` and `hub.logout(key)`.
//!
//! * `multicast.M`   calls `M` on a list of servers concurrently:
//!                   `multicast.M(key, server_ids, arg0s, arg1s, ...)`, where
//!                   each `argNs` array holds one value per server.
//!
//! * `unicast.M`     calls `M` on a single server:
//!                   `unicast.M(key, server_id, args...)`.
//!
//! * anything else is passed to the hub unchanged.
//!
//! Multicast results are structs of the form
//! `{Successful: {ServerIds, Responses}, Failed: {ServerIds, Responses}}`,
//! so a failing server never hides the responses of the others.
//!
//! Errors are returned as XML-RPC faults: -32602 for invalid parameters or a
//! wrong number of arguments, -32603 for internal errors, -32500 for
//! application errors (including authentication errors), -32400 for system
//! errors, -32700 for requests that cannot be decoded and 2950 for rejected
//! hub credentials.

#![allow(missing_docs)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod login;
pub mod multicast;
pub mod parser;
pub mod protocol;
pub mod server;
pub mod session;
pub mod topology;

#[cfg(test)]
mod testing;
