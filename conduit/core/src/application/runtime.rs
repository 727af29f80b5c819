// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Pipeline Runtime
//
// The process-wide configuration object: phase catalogs, sort cache, event
// bus, unwind policy and the shutdown token every chain's cancellation token
// descends from. Built once from a PipelineConfig and shared by Arc.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::factory::ChainFactory;
use crate::domain::config::{ConfigError, PipelineConfig};
use crate::domain::fault::UnwindPolicy;
use crate::domain::interceptor::FaultObserver;
use crate::domain::phase::PhaseManager;
use crate::infrastructure::chain_cache::ChainCache;
use crate::infrastructure::event_bus::EventBus;

pub struct PipelineRuntime {
    phases: PhaseManager,
    cache: Option<ChainCache>,
    events: EventBus,
    unwind_policy: UnwindPolicy,
    shutdown: CancellationToken,
    fault_observer: Option<Arc<dyn FaultObserver>>,
}

impl PipelineRuntime {
    pub fn new(phases: PhaseManager) -> Self {
        Self {
            phases,
            cache: Some(ChainCache::default()),
            events: EventBus::with_default_capacity(),
            unwind_policy: UnwindPolicy::default(),
            shutdown: CancellationToken::new(),
            fault_observer: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let phases = config.phase_manager()?;
        let cache = config
            .spec
            .cache
            .enabled
            .then(|| ChainCache::new(config.spec.cache.max_entries));

        info!(
            "Pipeline runtime '{}': {} inbound / {} outbound phases, sort cache {}",
            config.metadata.name,
            phases.inbound().len(),
            phases.outbound().len(),
            if cache.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            phases,
            cache,
            events: EventBus::new(config.spec.events.capacity),
            unwind_policy: config.unwind_policy(),
            shutdown: CancellationToken::new(),
            fault_observer: None,
        })
    }

    pub fn with_fault_observer(mut self, observer: Arc<dyn FaultObserver>) -> Self {
        self.fault_observer = Some(observer);
        self
    }

    pub fn with_unwind_policy(mut self, policy: UnwindPolicy) -> Self {
        self.unwind_policy = policy;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn phases(&self) -> &PhaseManager {
        &self.phases
    }

    pub fn cache(&self) -> Option<&ChainCache> {
        self.cache.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn unwind_policy(&self) -> UnwindPolicy {
        self.unwind_policy
    }

    pub fn fault_observer(&self) -> Option<&Arc<dyn FaultObserver>> {
        self.fault_observer.as_ref()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Cancel every chain built from this runtime. Running chains abort
    /// before their next step; paused ones abort when next driven.
    pub fn shutdown(&self) {
        info!("Pipeline runtime shutting down");
        self.shutdown.cancel();
    }

    pub fn chain_factory(self: &Arc<Self>) -> ChainFactory {
        ChainFactory::new(Arc::clone(self))
    }
}

impl Default for PipelineRuntime {
    fn default() -> Self {
        Self::new(PhaseManager::default())
    }
}
