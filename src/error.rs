// Copyright 2020 Joyent, Inc.

use crate::protocol::{Fault, FAULT_APPLICATION_ERROR};

/// Errors produced while serving a gateway request.
///
/// Only `Fault` is meaningful to a caller as-is; every other variant is
/// reported as an application error fault carrying the variant's text.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A well-formed fault, either raised by the gateway or relayed from a
    /// backend.
    #[error(transparent)]
    Fault(#[from] Fault),

    #[error("Authentication error: provided session key is invalid")]
    InvalidSession,

    /// The server is attached but its login failed.
    #[error("Authentication error: no valid session for server {0}")]
    InvalidServerSession(i64),

    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request error: bad status code - {0}")]
    HttpStatus(u16),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn into_fault(self) -> Fault {
        match self {
            GatewayError::Fault(fault) => fault,
            other => FAULT_APPLICATION_ERROR.with_detail(other),
        }
    }
}
