// Copyright 2020 Joyent, Inc.

//! Conversion of decoded call arguments into typed requests.
//!
//! A parser returns a fault on any mismatch: `FAULT_WRONG_ARGUMENTS_NUMBER`
//! when arguments are missing, surplus, or misaligned, and
//! `FAULT_INVALID_PARAMS` when an argument has the wrong type.

use std::collections::{HashMap, HashSet};

use crate::login::Credentials;
use crate::protocol::{
    Fault, Value, FAULT_DECODE, FAULT_INVALID_PARAMS,
    FAULT_WRONG_ARGUMENTS_NUMBER,
};

#[derive(Debug, Clone, PartialEq)]
pub struct AttachRequest {
    pub hub_key: String,
    pub server_ids: Vec<i64>,
    pub credentials: HashMap<i64, Credentials>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MulticastRequest {
    pub hub_key: String,
    /// Backend method, without the `multicast.` prefix.
    pub call: String,
    /// Each server with its own positional arguments, in request order.
    pub server_args: Vec<(i64, Vec<Value>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnicastRequest {
    pub hub_key: String,
    pub server_id: i64,
    pub call: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    pub call: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Credentials(Credentials),
    SessionKey(String),
    AttachToServers(AttachRequest),
    Multicast(MulticastRequest),
    Unicast(UnicastRequest),
    ProxyToHub(ProxyRequest),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Credentials(_) => "credentials",
            Request::SessionKey(_) => "session-key",
            Request::AttachToServers(_) => "attach",
            Request::Multicast(_) => "multicast",
            Request::Unicast(_) => "unicast",
            Request::ProxyToHub(_) => "proxy",
        }
    }
}

/// Builds a request from the wire method name and its arguments.
pub type Parser = fn(&str, &[Value]) -> Result<Request, Fault>;

/// The method name with its leading namespace removed, e.g.
/// `system.listSystems` for `multicast.system.listSystems`.
pub fn strip_namespace(method: &str) -> Result<&str, Fault> {
    match method.split_once('.') {
        Some((_, inner)) if !inner.is_empty() => Ok(inner),
        _ => Err(FAULT_DECODE.with_detail(format!(
            "{} names no backend method",
            method
        ))),
    }
}

pub fn parse_credentials(_: &str, args: &[Value]) -> Result<Request, Fault> {
    expect_count(args, 2)?;
    let username = string_arg(args, 0)?;
    let password = string_arg(args, 1)?;
    Ok(Request::Credentials(Credentials::new(username, password)))
}

pub fn parse_session_key(_: &str, args: &[Value]) -> Result<Request, Fault> {
    expect_count(args, 1)?;
    Ok(Request::SessionKey(string_arg(args, 0)?))
}

/// `[hub_key, [server_id...], ([username...], [password...])?]`
pub fn parse_attach(_: &str, args: &[Value]) -> Result<Request, Fault> {
    if args.len() != 2 && args.len() != 4 {
        return Err(wrong_count(format!(
            "expected 2 or 4 arguments, got {}",
            args.len()
        )));
    }
    let hub_key = string_arg(args, 0)?;
    let server_ids = server_ids_arg(args, 1)?;

    let mut credentials = HashMap::new();
    if args.len() == 4 {
        let usernames = aligned_array_arg(args, 2, server_ids.len())?;
        let passwords = aligned_array_arg(args, 3, server_ids.len())?;
        for (i, id) in server_ids.iter().enumerate() {
            let username = string_value(&usernames[i], 2)?;
            let password = string_value(&passwords[i], 3)?;
            credentials.insert(*id, Credentials::new(username, password));
        }
    }

    Ok(Request::AttachToServers(AttachRequest {
        hub_key,
        server_ids,
        credentials,
    }))
}

/// `[hub_key, [server_id...], [arg0 per server...], [arg1 per server...], ...]`
///
/// Argument column `i` holds the `i`th argument for each server, in server
/// order.
pub fn parse_multicast(method: &str, args: &[Value]) -> Result<Request, Fault> {
    if args.len() < 2 {
        return Err(wrong_count(format!(
            "expected at least 2 arguments, got {}",
            args.len()
        )));
    }
    let call = String::from(strip_namespace(method)?);
    let hub_key = string_arg(args, 0)?;
    let server_ids = server_ids_arg(args, 1)?;

    let columns = (2..args.len())
        .map(|position| aligned_array_arg(args, position, server_ids.len()))
        .collect::<Result<Vec<_>, Fault>>()?;
    let server_args = server_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let args = columns.iter().map(|column| column[i].clone()).collect();
            (*id, args)
        })
        .collect();

    Ok(Request::Multicast(MulticastRequest {
        hub_key,
        call,
        server_args,
    }))
}

/// `[hub_key, server_id, args...]`
pub fn parse_unicast(method: &str, args: &[Value]) -> Result<Request, Fault> {
    if args.len() < 2 {
        return Err(wrong_count(format!(
            "expected at least 2 arguments, got {}",
            args.len()
        )));
    }
    Ok(Request::Unicast(UnicastRequest {
        hub_key: string_arg(args, 0)?,
        server_id: int_value(&args[1], 1)?,
        call: String::from(strip_namespace(method)?),
        args: args[2..].to_vec(),
    }))
}

pub fn parse_proxy(method: &str, args: &[Value]) -> Result<Request, Fault> {
    Ok(Request::ProxyToHub(ProxyRequest {
        call: String::from(method),
        args: args.to_vec(),
    }))
}

fn wrong_count(detail: String) -> Fault {
    FAULT_WRONG_ARGUMENTS_NUMBER.with_detail(detail)
}

fn mismatch(position: usize, expected: &str, got: &Value) -> Fault {
    FAULT_INVALID_PARAMS.with_detail(format!(
        "argument {} must be {}, got {}",
        position,
        expected,
        got.type_name()
    ))
}

fn expect_count(args: &[Value], count: usize) -> Result<(), Fault> {
    if args.len() == count {
        Ok(())
    } else {
        Err(wrong_count(format!(
            "expected {} arguments, got {}",
            count,
            args.len()
        )))
    }
}

fn string_value(value: &Value, position: usize) -> Result<String, Fault> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| mismatch(position, "a string", value))
}

fn int_value(value: &Value, position: usize) -> Result<i64, Fault> {
    value
        .as_i64()
        .ok_or_else(|| mismatch(position, "an int", value))
}

fn string_arg(args: &[Value], position: usize) -> Result<String, Fault> {
    string_value(&args[position], position)
}

fn array_arg(args: &[Value], position: usize) -> Result<&[Value], Fault> {
    args[position]
        .as_array()
        .ok_or_else(|| mismatch(position, "an array", &args[position]))
}

fn aligned_array_arg(
    args: &[Value],
    position: usize,
    len: usize,
) -> Result<&[Value], Fault> {
    let values = array_arg(args, position)?;
    if values.len() != len {
        return Err(wrong_count(format!(
            "argument {} has {} entries for {} servers",
            position,
            values.len(),
            len
        )));
    }
    Ok(values)
}

fn server_ids_arg(args: &[Value], position: usize) -> Result<Vec<i64>, Fault> {
    let mut seen = HashSet::new();
    array_arg(args, position)?
        .iter()
        .map(|value| {
            let id = int_value(value, position)?;
            if !seen.insert(id) {
                return Err(FAULT_INVALID_PARAMS
                    .with_detail(format!("server {} is listed twice", id)));
            }
            Ok(id)
        })
        .collect()
}
