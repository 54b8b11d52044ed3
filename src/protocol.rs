// Copyright 2020 Joyent, Inc.

//! XML-RPC envelopes, values and faults.
//!
//! The gateway is both a server and a client of the same protocol, so the
//! request envelope (`methodCall`) and the response envelope
//! (`methodResponse`, carrying either one `param` or a `fault`) can each be
//! parsed and encoded.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const XML_HEADER: &str = "<?xml version=\"1.0\"?>";

/// Deepest element nesting accepted in an inbound document.
const MAX_DEPTH: usize = 256;

const FAULT_CODE_MEMBER: &str = "faultCode";
const FAULT_STRING_MEMBER: &str = "faultString";

/// A structured wire-level error: a numeric code and a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Fault {
    pub code: i32,
    pub message: Cow<'static, str>,
}

pub const FAULT_INVALID_PARAMS: Fault =
    Fault::new(-32602, "Invalid Method Parameters");
pub const FAULT_WRONG_ARGUMENTS_NUMBER: Fault =
    Fault::new(-32602, "Wrong Arguments Number");
pub const FAULT_INTERNAL_ERROR: Fault =
    Fault::new(-32603, "Internal Server Error");
pub const FAULT_APPLICATION_ERROR: Fault =
    Fault::new(-32500, "Application Error");
pub const FAULT_SYSTEM_ERROR: Fault = Fault::new(-32400, "System Error");
pub const FAULT_DECODE: Fault =
    Fault::new(-32700, "Parsing error: not well formed");
pub const FAULT_INVALID_CREDENTIALS: Fault =
    Fault::new(2950, "Either the password or username is incorrect");

impl Fault {
    pub const fn new(code: i32, message: &'static str) -> Fault {
        Fault {
            code,
            message: Cow::Borrowed(message),
        }
    }

    /// Copy of this fault with `": <detail>"` appended to the message.
    pub fn with_detail<D: fmt::Display>(&self, detail: D) -> Fault {
        Fault {
            code: self.code,
            message: Cow::Owned(format!("{}: {}", self.message, detail)),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut members = BTreeMap::new();
        members.insert(
            String::from(FAULT_CODE_MEMBER),
            Value::Int(i64::from(self.code)),
        );
        members.insert(
            String::from(FAULT_STRING_MEMBER),
            Value::String(self.message.to_string()),
        );
        Value::Struct(members)
    }

    /// Reads a fault struct received from a backend.
    pub fn from_value(value: &Value) -> Result<Fault, Fault> {
        let code = value
            .get(FAULT_CODE_MEMBER)
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .ok_or(FAULT_DECODE)?;
        let message = value
            .get(FAULT_STRING_MEMBER)
            .and_then(Value::as_str)
            .ok_or(FAULT_DECODE)?;
        Ok(Fault {
            code,
            message: Cow::Owned(message.to_string()),
        })
    }
}

/// A decoded XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    /// `dateTime.iso8601`, kept verbatim since backends disagree on format.
    DateTime(String),
    Base64(Vec<u8>),
    Struct(BTreeMap<String, Value>),
    Array(Vec<Value>),
    Nil,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Struct member lookup; `None` for non-struct values.
    pub fn get(&self, member: &str) -> Option<&Value> {
        self.as_struct().and_then(|members| members.get(member))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "boolean",
            Value::String(_) => "string",
            Value::Double(_) => "double",
            Value::DateTime(_) => "dateTime.iso8601",
            Value::Base64(_) => "base64",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
            Value::Nil => "nil",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Value {
        Value::Array(values)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(members: BTreeMap<String, Value>) -> Value {
        Value::Struct(members)
    }
}

/// An inbound or outbound `methodCall`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl MethodCall {
    pub fn new<S: Into<String>>(method: S, params: Vec<Value>) -> MethodCall {
        MethodCall {
            method: method.into(),
            params,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<MethodCall, Fault> {
        let root = Element::parse_document(buf)?;
        if root.name != "methodCall" {
            return Err(FAULT_DECODE);
        }
        let method = root
            .child("methodName")
            .map(|name| name.text.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or(FAULT_DECODE)?;
        let params = match root.child("params") {
            Some(params) => params
                .children_named("param")
                .map(|param| param.child("value").ok_or(FAULT_DECODE))
                .map(|value| value.and_then(decode_value))
                .collect::<Result<Vec<Value>, Fault>>()?,
            None => Vec::new(),
        };

        Ok(MethodCall { method, params })
    }

    pub fn encode(&self) -> String {
        let mut out = String::from(XML_HEADER);
        out.push_str("<methodCall><methodName>");
        out.push_str(&escape(self.method.as_str()));
        out.push_str("</methodName><params>");
        for param in &self.params {
            out.push_str("<param>");
            encode_value(param, &mut out);
            out.push_str("</param>");
        }
        out.push_str("</params></methodCall>");
        out
    }
}

/// A `methodResponse`: either a single result value or a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    Success(Value),
    Fault(Fault),
}

impl MethodResponse {
    pub fn parse(buf: &[u8]) -> Result<MethodResponse, Fault> {
        let root = Element::parse_document(buf)?;
        if root.name != "methodResponse" {
            return Err(FAULT_DECODE);
        }
        if let Some(fault) = root.child("fault") {
            let value = fault.child("value").ok_or(FAULT_DECODE)?;
            return Ok(MethodResponse::Fault(Fault::from_value(
                &decode_value(value)?,
            )?));
        }

        let params = root.child("params").ok_or(FAULT_DECODE)?;
        let response = match params.children_named("param").next() {
            Some(param) => {
                let value = param.child("value").ok_or(FAULT_DECODE)?;
                MethodResponse::Success(decode_value(value)?)
            }
            None => MethodResponse::Success(Value::Nil),
        };
        Ok(response)
    }

    pub fn encode(&self) -> String {
        let mut out = String::from(XML_HEADER);
        out.push_str("<methodResponse>");
        match self {
            MethodResponse::Success(value) => {
                out.push_str("<params><param>");
                encode_value(value, &mut out);
                out.push_str("</param></params>");
            }
            MethodResponse::Fault(fault) => {
                out.push_str("<fault>");
                encode_value(&fault.to_value(), &mut out);
                out.push_str("</fault>");
            }
        }
        out.push_str("</methodResponse>");
        out
    }

    pub fn into_result(self) -> Result<Value, Fault> {
        match self {
            MethodResponse::Success(value) => Ok(value),
            MethodResponse::Fault(fault) => Err(fault),
        }
    }
}

/*
 * Documents are small, so they are first read into a tree of elements and
 * then interpreted. Text is kept untrimmed because untyped and <string>
 * values are whitespace-significant.
 */
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart) -> Result<Element, Fault> {
        let name = str::from_utf8(start.local_name().as_ref())
            .map_err(|_| FAULT_DECODE)?
            .to_string();
        Ok(Element {
            name,
            ..Element::default()
        })
    }

    fn parse_document(buf: &[u8]) -> Result<Element, Fault> {
        let xml = str::from_utf8(buf).map_err(|_| FAULT_DECODE)?;
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();

        loop {
            let completed = match reader.read_event() {
                Ok(Event::Start(start)) => {
                    if stack.len() >= MAX_DEPTH {
                        return Err(FAULT_DECODE);
                    }
                    stack.push(Element::open(&start)?);
                    None
                }
                Ok(Event::Empty(start)) => Some(Element::open(&start)?),
                Ok(Event::End(_)) => Some(stack.pop().ok_or(FAULT_DECODE)?),
                Ok(Event::Text(text)) => {
                    if let Some(current) = stack.last_mut() {
                        let text = text.unescape().map_err(|_| FAULT_DECODE)?;
                        current.text.push_str(&text);
                    }
                    None
                }
                Ok(Event::CData(data)) => {
                    if let Some(current) = stack.last_mut() {
                        let data = data.into_inner();
                        let text =
                            str::from_utf8(&data).map_err(|_| FAULT_DECODE)?;
                        current.text.push_str(text);
                    }
                    None
                }
                Ok(Event::Eof) | Err(_) => return Err(FAULT_DECODE),
                Ok(_) => None,
            };

            if let Some(element) = completed {
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }
}

fn decode_value(element: &Element) -> Result<Value, Fault> {
    match element.children.as_slice() {
        [] => Ok(Value::String(element.text.clone())),
        [typed] => decode_typed(typed),
        _ => Err(FAULT_DECODE),
    }
}

fn decode_typed(element: &Element) -> Result<Value, Fault> {
    let text = element.text.trim();
    match element.name.as_str() {
        "int" | "i4" | "i8" => {
            text.parse::<i64>().map(Value::Int).map_err(|_| FAULT_DECODE)
        }
        "boolean" => match text {
            "1" | "true" => Ok(Value::Bool(true)),
            "0" | "false" => Ok(Value::Bool(false)),
            _ => Err(FAULT_DECODE),
        },
        "string" => Ok(Value::String(element.text.clone())),
        "double" => {
            text.parse::<f64>().map(Value::Double).map_err(|_| FAULT_DECODE)
        }
        "dateTime.iso8601" => Ok(Value::DateTime(text.to_string())),
        "base64" => {
            let compact: String =
                text.chars().filter(|c| !c.is_whitespace()).collect();
            BASE64
                .decode(compact)
                .map(Value::Base64)
                .map_err(|_| FAULT_DECODE)
        }
        "nil" => Ok(Value::Nil),
        "struct" => {
            let mut members = BTreeMap::new();
            for member in element.children_named("member") {
                let name = member.child("name").ok_or(FAULT_DECODE)?;
                let value = member.child("value").ok_or(FAULT_DECODE)?;
                members.insert(name.text.clone(), decode_value(value)?);
            }
            Ok(Value::Struct(members))
        }
        "array" => {
            let values = match element.child("data") {
                Some(data) => data
                    .children_named("value")
                    .map(decode_value)
                    .collect::<Result<Vec<Value>, Fault>>()?,
                None => Vec::new(),
            };
            Ok(Value::Array(values))
        }
        _ => Err(FAULT_DECODE),
    }
}

fn encode_value(value: &Value, out: &mut String) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            let tag = if i32::try_from(*i).is_ok() { "int" } else { "i8" };
            out.push_str(&format!("<{tag}>{i}</{tag}>"));
        }
        Value::Bool(b) => {
            out.push_str(if *b {
                "<boolean>1</boolean>"
            } else {
                "<boolean>0</boolean>"
            });
        }
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        Value::DateTime(dt) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&escape(dt.as_str()));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(bytes) => {
            out.push_str("<base64>");
            out.push_str(&BASE64.encode(bytes));
            out.push_str("</base64>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                encode_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Array(values) => {
            out.push_str("<array><data>");
            for v in values {
                encode_value(v, out);
            }
            out.push_str("</data></array>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}
