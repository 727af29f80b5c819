// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Interceptor Contract
//!
//! An interceptor is a unit of message processing bound to one phase, with
//! optional `before`/`after` constraints naming peers in the same phase.
//!
//! Interceptor instances are typically built once per endpoint and then shared
//! by every chain running on that endpoint, concurrently. Implementations must
//! therefore be stateless or synchronise internally; all per-message state
//! belongs on the [`Message`] or the [`Exchange`].
//!
//! ## Step results
//!
//! | Result | Chain reaction |
//! |--------|----------------|
//! | `Ok(Step::Continue)` | cursor advances to the next interceptor |
//! | `Ok(Step::Pause)` | chain becomes `Paused`; a later resume starts at the next interceptor |
//! | `Err(Fault)` | fault recorded, already-run interceptors unwound in reverse, chain `Aborted` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::continuation::Continuation;
use crate::domain::exchange::Exchange;
use crate::domain::fault::{ChainError, Fault};
use crate::domain::message::{Leg, Message};

pub type InterceptorId = String;

/// Identity, phase and ordering constraints of an interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterceptorDescriptor {
    pub id: InterceptorId,
    pub phase: String,
    /// Peers (same phase) this interceptor must run before.
    #[serde(default)]
    pub before: BTreeSet<InterceptorId>,
    /// Peers (same phase) this interceptor must run after.
    #[serde(default)]
    pub after: BTreeSet<InterceptorId>,
}

impl InterceptorDescriptor {
    pub fn new(id: impl Into<InterceptorId>, phase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            before: BTreeSet::new(),
            after: BTreeSet::new(),
        }
    }

    pub fn before(mut self, peer: impl Into<InterceptorId>) -> Self {
        self.before.insert(peer.into());
        self
    }

    pub fn after(mut self, peer: impl Into<InterceptorId>) -> Self {
        self.after.insert(peer.into());
        self
    }

    /// Rejects descriptors without a phase.
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.phase.trim().is_empty() {
            return Err(ChainError::MissingPhase(self.id.clone()));
        }
        Ok(())
    }
}

/// Non-fault outcome of a processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Pause,
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    fn descriptor(&self) -> &InterceptorDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    fn phase(&self) -> &str {
        &self.descriptor().phase
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault>;

    /// Whether this interceptor wants [`handle_fault`](Self::handle_fault)
    /// during unwind.
    fn handles_faults(&self) -> bool {
        false
    }

    /// Cleanup after a later (or this) interceptor faulted. The recorded
    /// fault is available through [`MessageContext::fault`].
    async fn handle_fault(&self, _ctx: &mut MessageContext<'_>) {}

    /// Companion interceptors added to the chain together with this one.
    fn additional_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        Vec::new()
    }
}

/// Transport-side hook notified whenever a chain aborts.
#[async_trait]
pub trait FaultObserver: Send + Sync {
    async fn on_fault(&self, exchange: &mut Exchange, leg: Leg, fault: &Fault);
}

/// Everything a processing step may touch.
///
/// The chain lends the current message and its exchange for the duration of
/// one call. Structural changes to the chain (insert/remove) are queued here
/// and applied by the chain once the step returns.
pub struct MessageContext<'a> {
    message: &'a mut Message,
    exchange: &'a mut Exchange,
    leg: Leg,
    interceptor: InterceptorId,
    phase: String,
    cancel: CancellationToken,
    continuation: Option<Continuation>,
    inserts: Vec<Arc<dyn Interceptor>>,
    removals: Vec<InterceptorId>,
}

impl<'a> MessageContext<'a> {
    pub(crate) fn new(
        message: &'a mut Message,
        exchange: &'a mut Exchange,
        leg: Leg,
        descriptor: &InterceptorDescriptor,
        cancel: CancellationToken,
        continuation: Option<Continuation>,
    ) -> Self {
        Self {
            message,
            exchange,
            leg,
            interceptor: descriptor.id.clone(),
            phase: descriptor.phase.clone(),
            cancel,
            continuation,
            inserts: Vec::new(),
            removals: Vec::new(),
        }
    }

    pub fn message(&self) -> &Message {
        &*self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut *self.message
    }

    /// The exchange without this chain's message, which is held by the
    /// chain while it runs; read the current leg through [`Self::message`].
    pub fn exchange(&self) -> &Exchange {
        &*self.exchange
    }

    pub fn exchange_mut(&mut self) -> &mut Exchange {
        &mut *self.exchange
    }

    pub fn leg(&self) -> Leg {
        self.leg
    }

    /// Id of the interceptor being invoked.
    pub fn interceptor_id(&self) -> &str {
        &self.interceptor
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Message property, falling back to the exchange scope.
    pub fn contextual_property(&self, key: &str) -> Option<&Value> {
        self.message
            .property(key)
            .or_else(|| self.exchange.property(key))
    }

    /// Fault recorded on the exchange, if any. Set during unwind.
    pub fn fault(&self) -> Option<&Fault> {
        self.exchange.fault()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handle for resuming (or cancelling) this chain after a `Step::Pause`.
    ///
    /// Only available when the chain is driven through a [`Continuation`].
    /// Do not resume from inside the step itself; hand the handle to whatever
    /// completes the awaited work.
    pub fn continuation(&self) -> Option<Continuation> {
        self.continuation.clone()
    }

    /// Queue an interceptor for insertion into the not-yet-executed part of
    /// the chain.
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.inserts.push(interceptor);
    }

    /// Queue removal of a not-yet-executed interceptor.
    pub fn remove_interceptor(&mut self, id: impl Into<InterceptorId>) {
        self.removals.push(id.into());
    }

    pub(crate) fn into_changes(self) -> (Vec<Arc<dyn Interceptor>>, Vec<InterceptorId>) {
        (self.inserts, self.removals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = InterceptorDescriptor::new("soap-action", "read")
            .before("must-understand")
            .after("stax-in")
            .after("attachments-in");

        assert_eq!(descriptor.id, "soap-action");
        assert!(descriptor.before.contains("must-understand"));
        assert_eq!(descriptor.after.len(), 2);
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_descriptor_without_phase_is_rejected() {
        let descriptor = InterceptorDescriptor::new("orphan", "  ");
        assert_eq!(
            descriptor.validate(),
            Err(ChainError::MissingPhase("orphan".to_string()))
        );
    }

    #[test]
    fn test_descriptor_yaml_defaults() {
        let yaml = "id: logging\nphase: receive\n";
        let descriptor: InterceptorDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert!(descriptor.before.is_empty());
        assert!(descriptor.after.is_empty());
    }
}
