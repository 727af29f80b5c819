// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::chain::ChainId;
use crate::domain::exchange::ExchangeId;
use crate::domain::fault::Fault;
use crate::domain::interceptor::InterceptorId;
use crate::domain::message::Leg;

/// Lifecycle events of one chain run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChainEvent {
    ChainStarted {
        chain_id: ChainId,
        exchange_id: ExchangeId,
        leg: Leg,
        interceptor_count: usize,
        started_at: DateTime<Utc>,
    },
    ChainPaused {
        chain_id: ChainId,
        exchange_id: ExchangeId,
        interceptor: InterceptorId,
        cursor: usize,
        paused_at: DateTime<Utc>,
    },
    ChainResumed {
        chain_id: ChainId,
        exchange_id: ExchangeId,
        cursor: usize,
        resumed_at: DateTime<Utc>,
    },
    InterceptorsInserted {
        chain_id: ChainId,
        exchange_id: ExchangeId,
        by: InterceptorId,
        inserted: Vec<InterceptorId>,
        skipped: Vec<InterceptorId>,
        inserted_at: DateTime<Utc>,
    },
    ChainCompleted {
        chain_id: ChainId,
        exchange_id: ExchangeId,
        invoked: usize,
        completed_at: DateTime<Utc>,
    },
    ChainAborted {
        chain_id: ChainId,
        exchange_id: ExchangeId,
        fault: Fault,
        unwound: Vec<InterceptorId>,
        one_way: bool,
        aborted_at: DateTime<Utc>,
    },
}

impl ChainEvent {
    pub fn exchange_id(&self) -> ExchangeId {
        match self {
            ChainEvent::ChainStarted { exchange_id, .. }
            | ChainEvent::ChainPaused { exchange_id, .. }
            | ChainEvent::ChainResumed { exchange_id, .. }
            | ChainEvent::InterceptorsInserted { exchange_id, .. }
            | ChainEvent::ChainCompleted { exchange_id, .. }
            | ChainEvent::ChainAborted { exchange_id, .. } => *exchange_id,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        match self {
            ChainEvent::ChainStarted { chain_id, .. }
            | ChainEvent::ChainPaused { chain_id, .. }
            | ChainEvent::ChainResumed { chain_id, .. }
            | ChainEvent::InterceptorsInserted { chain_id, .. }
            | ChainEvent::ChainCompleted { chain_id, .. }
            | ChainEvent::ChainAborted { chain_id, .. } => *chain_id,
        }
    }
}
