// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Faults and Configuration Errors
//!
//! Two families of failure exist in the pipeline:
//!
//! | Type | Raised | Effect |
//! |------|--------|--------|
//! | [`ChainError`] | while building/sorting a chain | chain is never constructed; caller fixes the interceptor set |
//! | [`Fault`] | by an interceptor while processing a message | recorded on the exchange, reverse unwind, chain ends `Aborted` |
//!
//! Cancellation is a synthetic [`Fault`] with [`FaultCode::Cancelled`] and
//! follows the same unwind path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::interceptor::InterceptorId;

/// Configuration and lifecycle errors of chain construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Interceptor '{0}' does not declare a phase")]
    MissingPhase(String),

    #[error("Unknown phase '{0}'")]
    UnknownPhase(String),

    #[error("Phase '{0}' is already registered")]
    DuplicatePhase(String),

    #[error("Cyclic ordering constraint in phase '{phase}' between: {}", .members.join(", "))]
    CyclicConstraint { phase: String, members: Vec<String> },

    #[error("Chain is {0} and cannot be driven further")]
    Terminated(String),

    #[error("Exchange carries no {0} message")]
    NoMessage(String),

    #[error("Exchange has no active chain")]
    NoChain,
}

/// Who is to blame for a fault, in SOAP terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// The message itself was bad.
    Client,
    /// Processing failed on this side.
    Server,
    /// Synthetic fault injected by cancellation.
    Cancelled,
}

impl FaultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Processing fault raised by an interceptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("[{}] {message}", .code.as_str())]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
    /// Interceptor that raised the fault; filled in by the chain when absent.
    pub interceptor: Option<InterceptorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub raised_at: DateTime<Utc>,
}

impl Fault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            interceptor: None,
            detail: None,
            raised_at: Utc::now(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Server, message)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Client, message)
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(FaultCode::Cancelled, reason)
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_interceptor(mut self, id: impl Into<InterceptorId>) -> Self {
        self.interceptor = Some(id.into());
        self
    }

    pub fn is_cancellation(&self) -> bool {
        self.code == FaultCode::Cancelled
    }
}

impl From<ChainError> for Fault {
    /// Configuration errors surfacing mid-run (e.g. a dynamic insertion naming
    /// an unknown phase) abort the message as a server fault.
    fn from(err: ChainError) -> Self {
        Fault::server(err.to_string())
    }
}

/// Which already-executed interceptors receive the fault callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwindPolicy {
    /// Whether the interceptor that raised the fault is itself notified.
    pub include_faulting: bool,
}

impl Default for UnwindPolicy {
    fn default() -> Self {
        Self {
            include_faulting: true,
        }
    }
}
