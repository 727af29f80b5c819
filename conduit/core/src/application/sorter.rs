// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Phase Sorter
//!
//! Turns an unordered interceptor set into the one order a chain executes.
//!
//! ```text
//! interceptors ──► bucket by phase ordinal ──► per-bucket graph (before/after)
//!                                               └─ Kahn's algorithm, ties broken
//!                                                  by insertion order
//!              ──► concatenate buckets in phase order
//! ```
//!
//! Constraints only apply inside a bucket: a peer named in `before`/`after`
//! that is absent from the bucket (missing, or in another phase) is ignored.
//! A cycle inside a bucket is a configuration error and fails the whole sort.
//!
//! The sort is pure: the same input sequence always yields the same output,
//! which is what makes the sort cache sound.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::domain::fault::ChainError;
use crate::domain::interceptor::Interceptor;
use crate::domain::phase::{Phase, PhaseRegistry};

/// An interceptor together with its resolved phase.
#[derive(Clone)]
pub struct ChainEntry {
    pub interceptor: Arc<dyn Interceptor>,
    pub phase: Phase,
}

impl ChainEntry {
    pub fn id(&self) -> &str {
        self.interceptor.id()
    }
}

impl fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEntry")
            .field("id", &self.id())
            .field("phase", &self.phase)
            .finish()
    }
}

pub struct PhaseSorter<'a> {
    registry: &'a PhaseRegistry,
}

impl<'a> PhaseSorter<'a> {
    pub fn new(registry: &'a PhaseRegistry) -> Self {
        Self { registry }
    }

    /// Sort `interceptors` into execution order.
    ///
    /// Duplicate ids keep the first occurrence. Fails with `MissingPhase`,
    /// `UnknownPhase` or `CyclicConstraint`.
    pub fn sort(&self, interceptors: &[Arc<dyn Interceptor>]) -> Result<Vec<ChainEntry>, ChainError> {
        let mut seen = HashSet::new();
        let mut buckets: BTreeMap<usize, Vec<ChainEntry>> = BTreeMap::new();

        for interceptor in interceptors {
            let descriptor = interceptor.descriptor();
            descriptor.validate()?;

            if !seen.insert(descriptor.id.clone()) {
                debug!("Skipping duplicate interceptor '{}'", descriptor.id);
                continue;
            }

            let phase = self.registry.get(&descriptor.phase)?.clone();
            buckets.entry(phase.ordinal).or_default().push(ChainEntry {
                interceptor: Arc::clone(interceptor),
                phase,
            });
        }

        let mut sorted = Vec::with_capacity(seen.len());
        for (_, bucket) in buckets {
            sorted.extend(sort_bucket(bucket)?);
        }
        Ok(sorted)
    }
}

/// Topologically sort one phase bucket. Among nodes that are ready at the same
/// time the one inserted first wins.
fn sort_bucket(bucket: Vec<ChainEntry>) -> Result<Vec<ChainEntry>, ChainError> {
    if bucket.is_empty() {
        return Ok(bucket);
    }

    let index: HashMap<&str, usize> = bucket
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id(), i))
        .collect();

    // successors[i] = nodes that must come after i
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); bucket.len()];
    for (i, entry) in bucket.iter().enumerate() {
        let descriptor = entry.interceptor.descriptor();
        for peer in &descriptor.before {
            if let Some(&j) = index.get(peer.as_str()) {
                successors[i].insert(j);
            }
        }
        for peer in &descriptor.after {
            if let Some(&j) = index.get(peer.as_str()) {
                successors[j].insert(i);
            }
        }
    }

    let mut in_degree = vec![0usize; bucket.len()];
    for succ in &successors {
        for &j in succ {
            in_degree[j] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(bucket.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() < bucket.len() {
        let members = cycle_members(&successors, &in_degree)
            .into_iter()
            .map(|i| bucket[i].id().to_string())
            .collect();
        return Err(ChainError::CyclicConstraint {
            phase: bucket[0].phase.name.clone(),
            members,
        });
    }

    drop(index);
    let mut slots: Vec<Option<ChainEntry>> = bucket.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

/// Nodes Kahn's algorithm left behind that can reach themselves. Leftovers
/// that merely hang off a cycle are excluded.
fn cycle_members(successors: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    let leftover: Vec<bool> = in_degree.iter().map(|d| *d > 0).collect();

    let reaches_itself = |start: usize| {
        let mut visited = vec![false; successors.len()];
        let mut stack: Vec<usize> = successors[start].iter().copied().collect();
        while let Some(node) = stack.pop() {
            if node == start {
                return true;
            }
            if !leftover[node] || visited[node] {
                continue;
            }
            visited[node] = true;
            stack.extend(successors[node].iter().copied());
        }
        false
    };

    (0..successors.len())
        .filter(|&i| leftover[i] && reaches_itself(i))
        .collect()
}
