// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Conduit Core
//!
//! Phase-ordered interceptor chains for message pipelines.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Phase catalogs, the interceptor contract, the phase sorter
//!   and the pausable, fault-unwinding chain engine
//!
//! ```text
//! PipelineConfig ──► PipelineRuntime ──► ChainFactory ──► InterceptorChain
//!                     (phases, cache,      (providers)      (per message)
//!                      events, unwind)
//! ```

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use application::chain::{ChainId, ChainOutcome, ChainState, InterceptorChain};
pub use application::continuation::Continuation;
pub use application::factory::{ChainFactory, InterceptorProvider, InterceptorSet};
pub use application::runtime::PipelineRuntime;
pub use application::sorter::{ChainEntry, PhaseSorter};
pub use domain::*;
