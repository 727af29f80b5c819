// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Phase Catalog
//!
//! Named, ordered stages of message processing. A [`PhaseRegistry`] assigns
//! dense ordinals in registration order; the ordinal is the only ordering
//! authority between phases. A [`PhaseManager`] holds one registry per
//! direction (inbound and outbound) and is built once at startup.
//!
//! ```text
//! receive(0) < pre-stream(1) < ... < invoke(13) < post-invoke(14)
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::fault::ChainError;

/// Well-known phase names.
pub mod names {
    pub const RECEIVE: &str = "receive";
    pub const PRE_STREAM: &str = "pre-stream";
    pub const USER_STREAM: &str = "user-stream";
    pub const POST_STREAM: &str = "post-stream";
    pub const READ: &str = "read";
    pub const PRE_PROTOCOL: &str = "pre-protocol";
    pub const USER_PROTOCOL: &str = "user-protocol";
    pub const POST_PROTOCOL: &str = "post-protocol";
    pub const UNMARSHAL: &str = "unmarshal";
    pub const PRE_LOGICAL: &str = "pre-logical";
    pub const USER_LOGICAL: &str = "user-logical";
    pub const POST_LOGICAL: &str = "post-logical";
    pub const PRE_INVOKE: &str = "pre-invoke";
    pub const INVOKE: &str = "invoke";
    pub const POST_INVOKE: &str = "post-invoke";

    pub const SETUP: &str = "setup";
    pub const PREPARE_SEND: &str = "prepare-send";
    pub const WRITE: &str = "write";
    pub const MARSHAL: &str = "marshal";
    pub const SEND: &str = "send";

    pub const SEND_ENDING: &str = "send-ending";
    pub const POST_STREAM_ENDING: &str = "post-stream-ending";
    pub const USER_STREAM_ENDING: &str = "user-stream-ending";
    pub const POST_PROTOCOL_ENDING: &str = "post-protocol-ending";
    pub const USER_PROTOCOL_ENDING: &str = "user-protocol-ending";
    pub const MARSHAL_ENDING: &str = "marshal-ending";
    pub const WRITE_ENDING: &str = "write-ending";
    pub const PRE_PROTOCOL_ENDING: &str = "pre-protocol-ending";
    pub const PRE_STREAM_ENDING: &str = "pre-stream-ending";
    pub const PREPARE_SEND_ENDING: &str = "prepare-send-ending";
    pub const POST_LOGICAL_ENDING: &str = "post-logical-ending";
    pub const USER_LOGICAL_ENDING: &str = "user-logical-ending";
    pub const PRE_LOGICAL_ENDING: &str = "pre-logical-ending";
    pub const SETUP_ENDING: &str = "setup-ending";
}

/// Default inbound catalog, in execution order.
pub const INBOUND_PHASES: &[&str] = &[
    names::RECEIVE,
    names::PRE_STREAM,
    names::USER_STREAM,
    names::POST_STREAM,
    names::READ,
    names::PRE_PROTOCOL,
    names::USER_PROTOCOL,
    names::POST_PROTOCOL,
    names::UNMARSHAL,
    names::PRE_LOGICAL,
    names::USER_LOGICAL,
    names::POST_LOGICAL,
    names::PRE_INVOKE,
    names::INVOKE,
    names::POST_INVOKE,
];

/// Default outbound catalog, in execution order. The `*-ending` phases mirror
/// the opening phases so that an interceptor can close what it opened.
pub const OUTBOUND_PHASES: &[&str] = &[
    names::SETUP,
    names::PRE_LOGICAL,
    names::USER_LOGICAL,
    names::POST_LOGICAL,
    names::PREPARE_SEND,
    names::PRE_STREAM,
    names::PRE_PROTOCOL,
    names::WRITE,
    names::MARSHAL,
    names::USER_PROTOCOL,
    names::POST_PROTOCOL,
    names::USER_STREAM,
    names::POST_STREAM,
    names::SEND,
    names::SEND_ENDING,
    names::POST_STREAM_ENDING,
    names::USER_STREAM_ENDING,
    names::POST_PROTOCOL_ENDING,
    names::USER_PROTOCOL_ENDING,
    names::MARSHAL_ENDING,
    names::WRITE_ENDING,
    names::PRE_PROTOCOL_ENDING,
    names::PRE_STREAM_ENDING,
    names::PREPARE_SEND_ENDING,
    names::POST_LOGICAL_ENDING,
    names::USER_LOGICAL_ENDING,
    names::PRE_LOGICAL_ENDING,
    names::SETUP_ENDING,
];

/// A named processing stage with its position in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub ordinal: usize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.ordinal)
    }
}

/// Ordered catalog of phases for one direction.
///
/// Built during startup and read-only afterwards; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct PhaseRegistry {
    phases: Vec<Phase>,
    by_name: HashMap<String, usize>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an ordered list of names.
    pub fn from_names<I, S>(names: I) -> Result<Self, ChainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.register(name)?;
        }
        Ok(registry)
    }

    pub fn inbound() -> Self {
        Self::from_static(INBOUND_PHASES)
    }

    pub fn outbound() -> Self {
        Self::from_static(OUTBOUND_PHASES)
    }

    fn from_static(names: &[&str]) -> Self {
        let phases: Vec<Phase> = names
            .iter()
            .enumerate()
            .map(|(ordinal, name)| Phase {
                name: (*name).to_string(),
                ordinal,
            })
            .collect();
        let by_name = phases
            .iter()
            .map(|p| (p.name.clone(), p.ordinal))
            .collect();
        Self { phases, by_name }
    }

    /// Append a phase, assigning the next ordinal.
    pub fn register(&mut self, name: impl Into<String>) -> Result<Phase, ChainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ChainError::MissingPhase("<phase registry>".to_string()));
        }
        if self.by_name.contains_key(&name) {
            return Err(ChainError::DuplicatePhase(name));
        }

        let phase = Phase {
            name: name.clone(),
            ordinal: self.phases.len(),
        };
        self.by_name.insert(name, phase.ordinal);
        self.phases.push(phase.clone());
        Ok(phase)
    }

    /// Phases in ordinal order.
    pub fn all_phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn get(&self, name: &str) -> Result<&Phase, ChainError> {
        self.by_name
            .get(name)
            .map(|&ordinal| &self.phases[ordinal])
            .ok_or_else(|| ChainError::UnknownPhase(name.to_string()))
    }

    pub fn ordinal(&self, name: &str) -> Result<usize, ChainError> {
        self.get(name).map(|p| p.ordinal)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Stable digest of the catalog, used as part of sort-cache keys.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for phase in &self.phases {
            hasher.update(phase.name.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Message flow direction a chain is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Holds the inbound and outbound catalogs.
#[derive(Debug, Clone)]
pub struct PhaseManager {
    inbound: Arc<PhaseRegistry>,
    outbound: Arc<PhaseRegistry>,
}

impl PhaseManager {
    pub fn new(inbound: PhaseRegistry, outbound: PhaseRegistry) -> Self {
        Self {
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
        }
    }

    pub fn inbound(&self) -> &PhaseRegistry {
        self.inbound.as_ref()
    }

    pub fn outbound(&self) -> &PhaseRegistry {
        self.outbound.as_ref()
    }

    /// Shared handle to the catalog for `direction`. Fault chains reuse the
    /// catalog of the direction they travel in.
    pub fn registry(&self, direction: Direction) -> &Arc<PhaseRegistry> {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }
}

impl Default for PhaseManager {
    fn default() -> Self {
        Self::new(PhaseRegistry::inbound(), PhaseRegistry::outbound())
    }
}
