// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scripted interceptor manifests
//!
//! A manifest lists interceptor descriptors plus a scripted behaviour for
//! each, so a chain can be planned and simulated without a transport:
//!
//! ```yaml
//! leg: inbound
//! interceptors:
//!   - id: decode
//!     phase: unmarshal
//!     action: insert
//!     insert:
//!       - id: audit
//!         phase: pre-invoke
//!   - id: service
//!     phase: invoke
//!     action: fault
//!     message: backend unavailable
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use conduit_core::{
    Fault, FaultCode, Interceptor, InterceptorDescriptor, InterceptorSet, Leg, MessageContext, Step,
};

/// What a scripted interceptor does when invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptAction {
    #[default]
    Continue,
    Pause,
    Fault,
    Insert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedSpec {
    #[serde(flatten)]
    pub descriptor: InterceptorDescriptor,

    #[serde(default)]
    pub action: ScriptAction,

    /// Receive the fault callback during unwind
    #[serde(default)]
    pub unwind: bool,

    /// Fault code for `action: fault` (default server)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FaultCode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Interceptors added to the running chain for `action: insert`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insert: Vec<ScriptedSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainManifest {
    #[serde(default = "default_leg")]
    pub leg: Leg,

    pub interceptors: Vec<ScriptedSpec>,
}

fn default_leg() -> Leg {
    Leg::Inbound
}

/// One line of a simulated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEntry {
    Invoked { id: String, phase: String },
    Unwound { id: String },
}

pub type Trace = Arc<Mutex<Vec<TraceEntry>>>;

impl ChainManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("Invalid manifest {:?}", path))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Provider carrying one scripted interceptor per manifest entry, all
    /// writing to `trace`.
    pub fn provider(&self, trace: &Trace) -> InterceptorSet {
        let mut set = InterceptorSet::new();
        for spec in &self.interceptors {
            set.add(self.leg, scripted(spec, trace));
        }
        set
    }
}

pub fn scripted(spec: &ScriptedSpec, trace: &Trace) -> Arc<dyn Interceptor> {
    Arc::new(ScriptedInterceptor {
        spec: spec.clone(),
        trace: Arc::clone(trace),
    })
}

pub struct ScriptedInterceptor {
    spec: ScriptedSpec,
    trace: Trace,
}

#[async_trait]
impl Interceptor for ScriptedInterceptor {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.spec.descriptor
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        self.trace.lock().push(TraceEntry::Invoked {
            id: self.spec.descriptor.id.clone(),
            phase: ctx.phase().to_string(),
        });

        match self.spec.action {
            ScriptAction::Continue => Ok(Step::Continue),
            ScriptAction::Pause => Ok(Step::Pause),
            ScriptAction::Fault => {
                let message = self
                    .spec
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", self.spec.descriptor.id));
                Err(Fault::new(self.spec.code.unwrap_or(FaultCode::Server), message))
            }
            ScriptAction::Insert => {
                for spec in &self.spec.insert {
                    ctx.add_interceptor(scripted(spec, &self.trace));
                }
                Ok(Step::Continue)
            }
        }
    }

    fn handles_faults(&self) -> bool {
        self.spec.unwind
    }

    async fn handle_fault(&self, _ctx: &mut MessageContext<'_>) {
        self.trace.lock().push(TraceEntry::Unwound {
            id: self.spec.descriptor.id.clone(),
        });
    }
}
