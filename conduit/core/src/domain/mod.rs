// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value types and contracts of the pipeline.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Phases, interceptors, messages, exchanges, faults, events
//!   and configuration

pub mod phase;
pub mod interceptor;
pub mod message;
pub mod exchange;
pub mod fault;
pub mod events;
pub mod config;

pub use config::{ConfigError, PipelineConfig};
pub use exchange::{Exchange, ExchangeId};
pub use fault::{ChainError, Fault, FaultCode, UnwindPolicy};
pub use interceptor::{FaultObserver, Interceptor, InterceptorDescriptor, InterceptorId, MessageContext, Step};
pub use message::{Leg, Message, MessageId};
pub use phase::{Direction, Phase, PhaseManager, PhaseRegistry};
