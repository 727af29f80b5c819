// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message
//!
//! A mutable bag flowing through one chain run. It carries:
//!
//! - **content**, keyed by Rust type, so the same logical payload can live as
//!   raw bytes early in the chain and as a parsed or typed value later on;
//! - **properties**, keyed by string, holding JSON values;
//! - a non-owning back-reference to its [`Exchange`](crate::domain::exchange::Exchange)
//!   in the form of an [`ExchangeId`].
//!
//! The message has no behaviour beyond storage and retrieval.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::domain::exchange::ExchangeId;
use crate::domain::phase::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which slot of the exchange a message occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Inbound,
    Outbound,
    InFault,
    OutFault,
}

impl Leg {
    /// Phase catalog used by chains processing this leg.
    pub fn direction(&self) -> Direction {
        match self {
            Leg::Inbound | Leg::InFault => Direction::Inbound,
            Leg::Outbound | Leg::OutFault => Direction::Outbound,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Inbound => "inbound",
            Leg::Outbound => "outbound",
            Leg::InFault => "in_fault",
            Leg::OutFault => "out_fault",
        }
    }

    pub(crate) fn slot(&self) -> usize {
        match self {
            Leg::Inbound => 0,
            Leg::Outbound => 1,
            Leg::InFault => 2,
            Leg::OutFault => 3,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ContentEntry {
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

pub struct Message {
    pub id: MessageId,
    exchange_id: Option<ExchangeId>,
    /// True on the side that initiated the exchange (the client).
    pub requestor: bool,
    content: HashMap<TypeId, ContentEntry>,
    properties: HashMap<String, Value>,
}

impl Message {
    pub fn new() -> Self {
        Self {
            id: MessageId::new(),
            exchange_id: None,
            requestor: false,
            content: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Message created on the requesting side of an exchange.
    pub fn requestor() -> Self {
        Self {
            requestor: true,
            ..Self::new()
        }
    }

    pub fn exchange_id(&self) -> Option<ExchangeId> {
        self.exchange_id
    }

    pub(crate) fn attach(&mut self, exchange_id: ExchangeId) {
        self.exchange_id = Some(exchange_id);
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    /// Store `value` as the content for its type, returning the previous one.
    pub fn set_content<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        let previous = self.content.insert(
            TypeId::of::<T>(),
            ContentEntry {
                type_name: type_name::<T>(),
                value: Box::new(value),
            },
        );
        previous.and_then(|entry| entry.value.downcast::<T>().ok().map(|b| *b))
    }

    pub fn content<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.content
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_ref::<T>())
    }

    pub fn content_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.content
            .get_mut(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_mut::<T>())
    }

    pub fn take_content<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.content
            .remove(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast::<T>().ok().map(|b| *b))
    }

    pub fn has_content<T: Any + Send + Sync>(&self) -> bool {
        self.content.contains_key(&TypeId::of::<T>())
    }

    /// Type names of the stored content, sorted.
    pub fn content_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.content.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(key.into(), value.into())
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    /// Boolean view of a property; absent or non-boolean values are `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("exchange_id", &self.exchange_id)
            .field("requestor", &self.requestor)
            .field("content", &self.content_types())
            .field("properties", &self.properties)
            .finish()
    }
}
