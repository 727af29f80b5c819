// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Interceptor Chain
//!
//! The stateful executor of one sorted interceptor list over one message.
//!
//! ## State machine
//!
//! ```text
//!            ┌──────────── resume ────────────┐
//!            ▼                                │
//! ──► Running ──── Step::Pause ─────────► Paused
//!      │  │                                   │
//!      │  └── end of list ──► Complete        │ cancel
//!      │                                      ▼
//!      └── Err(Fault) / cancel ──────────► Aborted
//! ```
//!
//! `Complete` and `Aborted` are terminal. Every entry is invoked at most once
//! per chain; a resumed chain continues with the entry after the one that
//! paused.
//!
//! ## Unwind
//!
//! On a fault at position `k` the chain walks back over `[k..0]` (or
//! `[k-1..0]`, depending on [`UnwindPolicy`]) and calls `handle_fault` on
//! every entry that opted in. On cancellation nothing is in flight, so the
//! walk covers the executed prefix `[cursor-1..0]`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::continuation::Continuation;
use crate::application::factory::with_companions;
use crate::application::sorter::{ChainEntry, PhaseSorter};
use crate::domain::events::ChainEvent;
use crate::domain::exchange::{Exchange, ExchangeId};
use crate::domain::fault::{ChainError, Fault, UnwindPolicy};
use crate::domain::interceptor::{FaultObserver, Interceptor, InterceptorId, MessageContext, Step};
use crate::domain::message::{Leg, Message};
use crate::domain::phase::PhaseRegistry;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub Uuid);

impl ChainId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainState {
    Running,
    Paused,
    Aborted,
    Complete,
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Aborted | ChainState::Complete)
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Running => write!(f, "running"),
            ChainState::Paused => write!(f, "paused"),
            ChainState::Aborted => write!(f, "aborted"),
            ChainState::Complete => write!(f, "complete"),
        }
    }
}

/// What the caller of a chain run observes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Complete,
    Paused,
    /// The chain aborted and the fault is to be reported to the requestor.
    Aborted(Fault),
    /// The chain aborted on a one-way exchange. The fault is recorded on the
    /// exchange but there is nobody to report it to.
    AbortedOneWay,
}

impl ChainOutcome {
    pub fn state(&self) -> ChainState {
        match self {
            ChainOutcome::Complete => ChainState::Complete,
            ChainOutcome::Paused => ChainState::Paused,
            ChainOutcome::Aborted(_) | ChainOutcome::AbortedOneWay => ChainState::Aborted,
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            ChainOutcome::Aborted(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Why the step loop stopped.
enum Halt {
    Complete,
    Paused(InterceptorId),
    Fault {
        fault: Fault,
        unwind_from: Option<usize>,
    },
}

pub struct InterceptorChain {
    id: ChainId,
    leg: Leg,
    entries: Vec<ChainEntry>,
    cursor: usize,
    state: ChainState,
    started: bool,
    invoked: usize,
    fault: Option<Fault>,
    registry: Arc<PhaseRegistry>,
    unwind_policy: UnwindPolicy,
    cancel: CancellationToken,
    fault_observer: Option<Arc<dyn FaultObserver>>,
    events: Option<EventBus>,
}

impl InterceptorChain {
    /// Chain over already sorted entries.
    pub fn new(leg: Leg, entries: Vec<ChainEntry>, registry: Arc<PhaseRegistry>) -> Self {
        Self {
            id: ChainId::new(),
            leg,
            entries,
            cursor: 0,
            state: ChainState::Running,
            started: false,
            invoked: 0,
            fault: None,
            registry,
            unwind_policy: UnwindPolicy::default(),
            cancel: CancellationToken::new(),
            fault_observer: None,
            events: None,
        }
    }

    /// Sort `interceptors` against `registry` and wrap the result.
    pub fn build(
        leg: Leg,
        registry: Arc<PhaseRegistry>,
        interceptors: &[Arc<dyn Interceptor>],
    ) -> Result<Self, ChainError> {
        let entries = PhaseSorter::new(&registry).sort(interceptors)?;
        Ok(Self::new(leg, entries, registry))
    }

    pub fn with_unwind_policy(mut self, policy: UnwindPolicy) -> Self {
        self.unwind_policy = policy;
        self
    }

    /// Replace the cancellation token, usually with a child of a runtime-wide
    /// shutdown token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_fault_observer(mut self, observer: Arc<dyn FaultObserver>) -> Self {
        self.fault_observer = Some(observer);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn leg(&self) -> Leg {
        self.leg
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Index of the next entry to invoke.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of `handle_message` calls made so far.
    pub fn invoked(&self) -> usize {
        self.invoked
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn interceptor_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id()).collect()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the chain over the exchange's message for this chain's leg.
    ///
    /// Starts a fresh chain or resumes a paused one. Driving a terminal chain
    /// is an error; an empty chain completes immediately.
    pub async fn do_intercept(&mut self, exchange: &mut Exchange) -> Result<ChainOutcome, ChainError> {
        self.drive(exchange, None).await
    }

    pub(crate) async fn drive(
        &mut self,
        exchange: &mut Exchange,
        continuation: Option<Continuation>,
    ) -> Result<ChainOutcome, ChainError> {
        if self.state.is_terminal() {
            return Err(ChainError::Terminated(self.state.to_string()));
        }

        let mut message = exchange
            .take_message(self.leg)
            .ok_or_else(|| ChainError::NoMessage(self.leg.as_str().to_string()))?;

        if !self.started {
            self.started = true;
            debug!(
                "Chain {} started on {} leg of exchange {} with {} interceptors",
                self.id,
                self.leg.as_str(),
                exchange.id,
                self.entries.len()
            );
            self.publish(ChainEvent::ChainStarted {
                chain_id: self.id,
                exchange_id: exchange.id,
                leg: self.leg,
                interceptor_count: self.entries.len(),
                started_at: Utc::now(),
            });
        } else if self.state == ChainState::Paused {
            self.state = ChainState::Running;
            debug!("Chain {} resumed at position {}", self.id, self.cursor);
            self.publish(ChainEvent::ChainResumed {
                chain_id: self.id,
                exchange_id: exchange.id,
                cursor: self.cursor,
                resumed_at: Utc::now(),
            });
        }

        let halt = loop {
            if self.cursor >= self.entries.len() {
                break Halt::Complete;
            }
            if self.cancel.is_cancelled() {
                break Halt::Fault {
                    fault: Fault::cancelled("Chain cancelled"),
                    unwind_from: self.cursor.checked_sub(1),
                };
            }

            let entry = self.entries[self.cursor].clone();
            debug!(
                "Invoking interceptor '{}' in phase {} (position {})",
                entry.id(),
                entry.phase,
                self.cursor
            );

            let (result, inserts, removals) = {
                let mut ctx = MessageContext::new(
                    &mut message,
                    exchange,
                    self.leg,
                    entry.interceptor.descriptor(),
                    self.cancel.clone(),
                    continuation.clone(),
                );
                let result = entry.interceptor.handle_message(&mut ctx).await;
                let (inserts, removals) = ctx.into_changes();
                (result, inserts, removals)
            };
            self.invoked += 1;

            match result {
                Ok(step) => {
                    let position = self.cursor;
                    self.cursor += 1;
                    if let Err(err) = self.apply_changes(exchange.id, &entry, inserts, removals) {
                        let fault = Fault::from(err).with_interceptor(entry.id());
                        break Halt::Fault {
                            fault,
                            unwind_from: self.unwind_start(position),
                        };
                    }
                    if step == Step::Pause {
                        break Halt::Paused(entry.id().to_string());
                    }
                }
                Err(mut fault) => {
                    if fault.interceptor.is_none() {
                        fault.interceptor = Some(entry.id().to_string());
                    }
                    break Halt::Fault {
                        fault,
                        unwind_from: self.unwind_start(self.cursor),
                    };
                }
            }
        };

        let outcome = match halt {
            Halt::Complete => {
                self.state = ChainState::Complete;
                exchange.set_message(self.leg, message);
                metrics::counter!("conduit_chain_completed_total").increment(1);
                info!(
                    "Chain {} complete ({} interceptors invoked)",
                    self.id, self.invoked
                );
                self.publish(ChainEvent::ChainCompleted {
                    chain_id: self.id,
                    exchange_id: exchange.id,
                    invoked: self.invoked,
                    completed_at: Utc::now(),
                });
                ChainOutcome::Complete
            }
            Halt::Paused(by) => {
                self.state = ChainState::Paused;
                exchange.set_message(self.leg, message);
                metrics::counter!("conduit_chain_paused_total").increment(1);
                debug!("Chain {} paused by '{}'", self.id, by);
                self.publish(ChainEvent::ChainPaused {
                    chain_id: self.id,
                    exchange_id: exchange.id,
                    interceptor: by,
                    cursor: self.cursor,
                    paused_at: Utc::now(),
                });
                ChainOutcome::Paused
            }
            Halt::Fault { fault, unwind_from } => {
                self.fail(exchange, message, true, fault, unwind_from).await
            }
        };

        Ok(outcome)
    }

    /// Abort a chain that is not currently executing a step.
    ///
    /// Trips the cancellation token, unwinds the executed prefix and marks
    /// the chain `Aborted`. Returns `None` when the chain had already
    /// finished; aborting a terminal chain changes nothing.
    pub async fn abort(&mut self, exchange: &mut Exchange, fault: Fault) -> Option<ChainOutcome> {
        if self.state.is_terminal() {
            debug!("Chain {} already {}, ignoring abort", self.id, self.state);
            return None;
        }
        self.cancel.cancel();

        let unwind_from = self.cursor.checked_sub(1);
        let outcome = match exchange.take_message(self.leg) {
            Some(message) => self.fail(exchange, message, true, fault, unwind_from).await,
            None => {
                warn!(
                    "Chain {} aborted without a {} message; unwinding against an empty one",
                    self.id,
                    self.leg.as_str()
                );
                self.fail(exchange, Message::new(), false, fault, unwind_from)
                    .await
            }
        };
        Some(outcome)
    }

    /// Human-readable listing of the chain, grouped by phase. `>` marks the
    /// next entry to run.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "chain {} [{}] {} ({} interceptors)",
            self.id,
            self.leg.as_str(),
            self.state,
            self.entries.len()
        );
        let mut current_phase: Option<&str> = None;
        for (position, entry) in self.entries.iter().enumerate() {
            if current_phase != Some(entry.phase.name.as_str()) {
                current_phase = Some(entry.phase.name.as_str());
                let _ = writeln!(out, "  {}", entry.phase);
            }
            let marker = if position == self.cursor && !self.state.is_terminal() {
                '>'
            } else {
                ' '
            };
            let _ = writeln!(out, "  {} {:>3} {}", marker, position, entry.id());
        }
        out
    }

    fn unwind_start(&self, faulting: usize) -> Option<usize> {
        if self.unwind_policy.include_faulting {
            Some(faulting)
        } else {
            faulting.checked_sub(1)
        }
    }

    async fn fail(
        &mut self,
        exchange: &mut Exchange,
        mut message: Message,
        restore: bool,
        fault: Fault,
        unwind_from: Option<usize>,
    ) -> ChainOutcome {
        warn!(
            "Chain {} aborting at position {}: {}",
            self.id, self.cursor, fault
        );

        exchange.record_fault(fault.clone());
        message.set_content(fault.clone());

        let unwound = self.unwind(exchange, &mut message, unwind_from).await;

        self.state = ChainState::Aborted;
        self.fault = Some(fault.clone());
        if restore {
            exchange.set_message(self.leg, message);
        }

        let one_way = exchange.is_one_way();
        metrics::counter!("conduit_chain_aborted_total", "code" => fault.code.as_str()).increment(1);
        self.publish(ChainEvent::ChainAborted {
            chain_id: self.id,
            exchange_id: exchange.id,
            fault: fault.clone(),
            unwound,
            one_way,
            aborted_at: Utc::now(),
        });

        if let Some(observer) = &self.fault_observer {
            observer.on_fault(exchange, self.leg, &fault).await;
        }

        if one_way {
            debug!(
                "Fault on one-way exchange {} not reported: {}",
                exchange.id, fault
            );
            ChainOutcome::AbortedOneWay
        } else {
            ChainOutcome::Aborted(fault)
        }
    }

    /// Reverse walk over `[from..0]`, calling `handle_fault` where opted in.
    async fn unwind(
        &self,
        exchange: &mut Exchange,
        message: &mut Message,
        from: Option<usize>,
    ) -> Vec<InterceptorId> {
        let mut unwound = Vec::new();
        let Some(from) = from else {
            return unwound;
        };
        if self.entries.is_empty() {
            return unwound;
        }
        let from = from.min(self.entries.len() - 1);

        for entry in self.entries[..=from].iter().rev() {
            if !entry.interceptor.handles_faults() {
                continue;
            }
            debug!("Unwinding interceptor '{}'", entry.id());
            let mut ctx = MessageContext::new(
                message,
                exchange,
                self.leg,
                entry.interceptor.descriptor(),
                self.cancel.clone(),
                None,
            );
            entry.interceptor.handle_fault(&mut ctx).await;
            let (inserts, _) = ctx.into_changes();
            if !inserts.is_empty() {
                debug!(
                    "Ignoring {} interceptors added by '{}' during unwind",
                    inserts.len(),
                    entry.id()
                );
            }
            unwound.push(entry.id().to_string());
        }
        unwound
    }

    /// Apply the structural changes queued by the step that just ran.
    ///
    /// Only the unexecuted tail `[cursor..]` is touched. Insertions are
    /// validated against the registry and the tail is re-sorted with them.
    fn apply_changes(
        &mut self,
        exchange_id: ExchangeId,
        by: &ChainEntry,
        inserts: Vec<Arc<dyn Interceptor>>,
        removals: Vec<InterceptorId>,
    ) -> Result<(), ChainError> {
        if !removals.is_empty() {
            let before = self.entries.len();
            let cursor = self.cursor;
            let mut position = 0;
            self.entries.retain(|entry| {
                let keep = position < cursor || !removals.iter().any(|id| id == entry.id());
                position += 1;
                keep
            });
            debug!(
                "'{}' removed {} pending interceptors",
                by.id(),
                before - self.entries.len()
            );
        }

        if inserts.is_empty() {
            return Ok(());
        }

        let mut present: HashSet<String> = self.entries.iter().map(|e| e.id().to_string()).collect();
        let mut accepted: Vec<Arc<dyn Interceptor>> = Vec::new();
        let mut skipped = Vec::new();

        for interceptor in with_companions(inserts) {
            interceptor.descriptor().validate()?;
            let ordinal = self.registry.ordinal(interceptor.phase())?;

            if !present.insert(interceptor.id().to_string()) {
                debug!(
                    "Interceptor '{}' already in chain {}, not inserting",
                    interceptor.id(),
                    self.id
                );
                skipped.push(interceptor.id().to_string());
                continue;
            }
            if ordinal < by.phase.ordinal {
                warn!(
                    "Interceptor '{}' targets phase '{}' which chain {} has already passed; skipping",
                    interceptor.id(),
                    interceptor.phase(),
                    self.id
                );
                skipped.push(interceptor.id().to_string());
                continue;
            }
            accepted.push(interceptor);
        }

        let inserted: Vec<InterceptorId> = accepted.iter().map(|i| i.id().to_string()).collect();
        if !accepted.is_empty() {
            let mut pending: Vec<Arc<dyn Interceptor>> = self.entries[self.cursor..]
                .iter()
                .map(|e| Arc::clone(&e.interceptor))
                .collect();
            pending.extend(accepted);
            let tail = PhaseSorter::new(&self.registry).sort(&pending)?;
            self.entries.truncate(self.cursor);
            self.entries.extend(tail);
            debug!("'{}' inserted {:?} into chain {}", by.id(), inserted, self.id);
        }

        self.publish(ChainEvent::InterceptorsInserted {
            chain_id: self.id,
            exchange_id,
            by: by.id().to_string(),
            inserted,
            skipped,
            inserted_at: Utc::now(),
        });
        Ok(())
    }

    fn publish(&self, event: ChainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("id", &self.id)
            .field("leg", &self.leg)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("entries", &self.interceptor_ids())
            .finish()
    }
}
