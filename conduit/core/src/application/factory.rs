// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Chain Factory
//!
//! Gathers interceptors from layered providers and turns them into a fresh
//! [`InterceptorChain`] per message.
//!
//! ```text
//! bus ─┐
//! service ─┤                    companions      sort (cached)
//! endpoint ─┼─► gathered list ─► expanded ─────► entries ─► InterceptorChain
//! binding ─┘      + extra
//! ```
//!
//! Provider order matters only as the tie-break for interceptors in the same
//! phase without constraints between them.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::application::chain::{ChainId, InterceptorChain};
use crate::application::continuation::Continuation;
use crate::application::runtime::PipelineRuntime;
use crate::application::sorter::PhaseSorter;
use crate::domain::exchange::Exchange;
use crate::domain::fault::ChainError;
use crate::domain::interceptor::{Interceptor, InterceptorId};
use crate::domain::message::Leg;

/// Source of interceptors for each leg.
pub trait InterceptorProvider: Send + Sync {
    fn in_interceptors(&self) -> Vec<Arc<dyn Interceptor>>;

    fn out_interceptors(&self) -> Vec<Arc<dyn Interceptor>>;

    fn in_fault_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        Vec::new()
    }

    fn out_fault_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        Vec::new()
    }

    fn interceptors(&self, leg: Leg) -> Vec<Arc<dyn Interceptor>> {
        match leg {
            Leg::Inbound => self.in_interceptors(),
            Leg::Outbound => self.out_interceptors(),
            Leg::InFault => self.in_fault_interceptors(),
            Leg::OutFault => self.out_fault_interceptors(),
        }
    }
}

/// Plain provider filled during setup.
#[derive(Clone, Default)]
pub struct InterceptorSet {
    lists: [Vec<Arc<dyn Interceptor>>; 4],
}

impl InterceptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, leg: Leg, interceptor: Arc<dyn Interceptor>) {
        self.lists[leg.slot()].push(interceptor);
    }

    pub fn with(mut self, leg: Leg, interceptor: Arc<dyn Interceptor>) -> Self {
        self.add(leg, interceptor);
        self
    }

    pub fn get(&self, leg: Leg) -> &[Arc<dyn Interceptor>] {
        &self.lists[leg.slot()]
    }

    pub fn remove(&mut self, leg: Leg, id: &str) -> bool {
        let list = &mut self.lists[leg.slot()];
        let before = list.len();
        list.retain(|i| i.id() != id);
        list.len() != before
    }
}

impl InterceptorProvider for InterceptorSet {
    fn in_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        self.get(Leg::Inbound).to_vec()
    }

    fn out_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        self.get(Leg::Outbound).to_vec()
    }

    fn in_fault_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        self.get(Leg::InFault).to_vec()
    }

    fn out_fault_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        self.get(Leg::OutFault).to_vec()
    }
}

/// Expand every interceptor's `additional_interceptors`, depth first, each
/// companion placed right after the interceptor that brought it. An id is
/// expanded once, so self-referencing companions terminate.
pub fn with_companions(interceptors: Vec<Arc<dyn Interceptor>>) -> Vec<Arc<dyn Interceptor>> {
    let mut expanded: HashSet<InterceptorId> = HashSet::new();
    let mut out = Vec::with_capacity(interceptors.len());
    let mut stack: Vec<Arc<dyn Interceptor>> = interceptors.into_iter().rev().collect();

    while let Some(interceptor) = stack.pop() {
        if expanded.insert(interceptor.id().to_string()) {
            stack.extend(interceptor.additional_interceptors().into_iter().rev());
        }
        out.push(interceptor);
    }
    out
}

/// Builds chains configured from a [`PipelineRuntime`].
#[derive(Clone)]
pub struct ChainFactory {
    runtime: Arc<PipelineRuntime>,
}

impl ChainFactory {
    pub fn new(runtime: Arc<PipelineRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<PipelineRuntime> {
        &self.runtime
    }

    /// Fresh chain for `leg` over the providers' interceptors plus `extra`.
    pub fn build(
        &self,
        leg: Leg,
        providers: &[&dyn InterceptorProvider],
        extra: &[Arc<dyn Interceptor>],
    ) -> Result<InterceptorChain, ChainError> {
        let mut gathered: Vec<Arc<dyn Interceptor>> = Vec::new();
        for provider in providers {
            gathered.extend(provider.interceptors(leg));
        }
        gathered.extend(extra.iter().cloned());
        let gathered = with_companions(gathered);

        let registry = self.runtime.phases().registry(leg.direction());
        let entries = match self.runtime.cache() {
            Some(cache) => cache.sorted(registry, &gathered)?,
            None => PhaseSorter::new(registry).sort(&gathered)?,
        };

        let mut chain = InterceptorChain::new(leg, entries, Arc::clone(registry))
            .with_unwind_policy(self.runtime.unwind_policy())
            .with_cancellation(self.runtime.shutdown_token().child_token())
            .with_event_bus(self.runtime.events().clone());
        if let Some(observer) = self.runtime.fault_observer() {
            chain = chain.with_fault_observer(Arc::clone(observer));
        }

        debug!(
            "Built {} chain {} with {} interceptors",
            leg.as_str(),
            chain.id(),
            chain.len()
        );
        Ok(chain)
    }

    /// Build a chain and park it in the exchange's chain slot.
    pub fn install(
        &self,
        exchange: &mut Exchange,
        leg: Leg,
        providers: &[&dyn InterceptorProvider],
        extra: &[Arc<dyn Interceptor>],
    ) -> Result<ChainId, ChainError> {
        let chain = self.build(leg, providers, extra)?;
        let id = chain.id();
        exchange.set_chain(chain);
        Ok(id)
    }

    /// Build a chain into `exchange` and hand back a continuation driving it.
    pub fn continuation(
        &self,
        mut exchange: Exchange,
        leg: Leg,
        providers: &[&dyn InterceptorProvider],
        extra: &[Arc<dyn Interceptor>],
    ) -> Result<Continuation, ChainError> {
        self.install(&mut exchange, leg, providers, extra)?;
        Continuation::new(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fault::Fault;
    use crate::domain::interceptor::{InterceptorDescriptor, MessageContext, Step};
    use async_trait::async_trait;

    struct Stage {
        descriptor: InterceptorDescriptor,
        companions: Vec<Arc<dyn Interceptor>>,
    }

    #[async_trait]
    impl Interceptor for Stage {
        fn descriptor(&self) -> &InterceptorDescriptor {
            &self.descriptor
        }

        async fn handle_message(&self, _ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
            Ok(Step::Continue)
        }

        fn additional_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
            self.companions.clone()
        }
    }

    fn stage(id: &str, phase: &str, companions: Vec<Arc<dyn Interceptor>>) -> Arc<dyn Interceptor> {
        Arc::new(Stage {
            descriptor: InterceptorDescriptor::new(id, phase),
            companions,
        })
    }

    #[test]
    fn test_companions_follow_their_owner() {
        let ending = stage("timing-ending", "send-ending", vec![]);
        let nested = stage("nested", "send", vec![]);
        let starter = stage("timing", "setup", vec![ending, nested]);
        let other = stage("other", "setup", vec![]);

        let expanded = with_companions(vec![starter, other]);
        let ids: Vec<_> = expanded.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["timing", "timing-ending", "nested", "other"]);
    }

    #[test]
    fn test_interceptor_set_by_leg() {
        let mut set = InterceptorSet::new()
            .with(Leg::Inbound, stage("a", "receive", vec![]))
            .with(Leg::OutFault, stage("b", "setup", vec![]));

        assert_eq!(set.interceptors(Leg::Inbound).len(), 1);
        assert!(set.interceptors(Leg::Outbound).is_empty());
        assert_eq!(set.out_fault_interceptors()[0].id(), "b");

        assert!(set.remove(Leg::Inbound, "a"));
        assert!(!set.remove(Leg::Inbound, "a"));
    }

    #[test]
    fn test_factory_layers_providers() {
        let runtime = Arc::new(PipelineRuntime::default());
        let factory = ChainFactory::new(runtime);

        let bus = InterceptorSet::new().with(Leg::Inbound, stage("bus", "invoke", vec![]));
        let endpoint = InterceptorSet::new().with(Leg::Inbound, stage("endpoint", "receive", vec![]));
        let extra = vec![stage("extra", "invoke", vec![])];

        let chain = factory
            .build(Leg::Inbound, &[&bus, &endpoint], &extra)
            .unwrap();
        assert_eq!(chain.interceptor_ids(), vec!["endpoint", "bus", "extra"]);

        let err = factory
            .build(Leg::Inbound, &[&bus], &[stage("odd", "marshal", vec![])])
            .unwrap_err();
        assert_eq!(err, ChainError::UnknownPhase("marshal".to_string()));
    }
}
