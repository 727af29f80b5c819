// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Exchange
//!
//! Correlates the legs of one logical invocation (request, response and their
//! fault counterparts) and carries exchange-scoped properties.
//!
//! Ownership is arena-style: the exchange owns its messages and the chain
//! currently processing one of them. Messages refer back to the exchange only
//! through its [`ExchangeId`], so there are no reference-count cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::application::chain::InterceptorChain;
use crate::domain::fault::Fault;
use crate::domain::message::{Leg, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(pub Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Exchange {
    pub id: ExchangeId,
    one_way: bool,
    properties: HashMap<String, Value>,
    messages: [Option<Message>; 4],
    fault: Option<Fault>,
    chain: Option<InterceptorChain>,
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new() -> Self {
        Self {
            id: ExchangeId::new(),
            one_way: false,
            properties: HashMap::new(),
            messages: [None, None, None, None],
            fault: None,
            chain: None,
            created_at: Utc::now(),
        }
    }

    /// Exchange whose request carries no response leg.
    pub fn one_way() -> Self {
        Self {
            one_way: true,
            ..Self::new()
        }
    }

    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    pub fn set_one_way(&mut self, one_way: bool) {
        self.one_way = one_way;
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Place `message` in the slot for `leg`, returning whatever was there.
    pub fn set_message(&mut self, leg: Leg, mut message: Message) -> Option<Message> {
        message.attach(self.id);
        self.messages[leg.slot()].replace(message)
    }

    pub fn with_message(mut self, leg: Leg, message: Message) -> Self {
        self.set_message(leg, message);
        self
    }

    pub fn message(&self, leg: Leg) -> Option<&Message> {
        self.messages[leg.slot()].as_ref()
    }

    pub fn message_mut(&mut self, leg: Leg) -> Option<&mut Message> {
        self.messages[leg.slot()].as_mut()
    }

    pub fn take_message(&mut self, leg: Leg) -> Option<Message> {
        self.messages[leg.slot()].take()
    }

    pub fn in_message(&self) -> Option<&Message> {
        self.message(Leg::Inbound)
    }

    pub fn out_message(&self) -> Option<&Message> {
        self.message(Leg::Outbound)
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

    /// Property lookup that prefers the message for `leg`, falling back to
    /// the exchange scope.
    pub fn contextual_property(&self, leg: Leg, key: &str) -> Option<&Value> {
        self.message(leg)
            .and_then(|m| m.property(key))
            .or_else(|| self.property(key))
    }

    // ------------------------------------------------------------------
    // Fault
    // ------------------------------------------------------------------

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Record the terminal fault. The first fault wins; later ones (raised
    /// while a fault chain runs, for instance) do not hide the original.
    pub fn record_fault(&mut self, fault: Fault) {
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    pub fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    // ------------------------------------------------------------------
    // Active chain
    // ------------------------------------------------------------------

    pub fn set_chain(&mut self, chain: InterceptorChain) -> Option<InterceptorChain> {
        self.chain.replace(chain)
    }

    pub fn chain(&self) -> Option<&InterceptorChain> {
        self.chain.as_ref()
    }

    pub fn take_chain(&mut self) -> Option<InterceptorChain> {
        self.chain.take()
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("one_way", &self.one_way)
            .field("properties", &self.properties)
            .field("in", &self.message(Leg::Inbound).map(|m| m.id))
            .field("out", &self.message(Leg::Outbound).map(|m| m.id))
            .field("fault", &self.fault)
            .field("chain", &self.chain.as_ref().map(|c| c.state()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fault::FaultCode;

    #[test]
    fn test_messages_are_attached_to_exchange() {
        let mut exchange = Exchange::new();
        exchange.set_message(Leg::Inbound, Message::new());

        let message = exchange.in_message().unwrap();
        assert_eq!(message.exchange_id(), Some(exchange.id));
        assert!(exchange.out_message().is_none());

        let taken = exchange.take_message(Leg::Inbound).unwrap();
        assert!(exchange.in_message().is_none());
        assert_eq!(taken.exchange_id(), Some(exchange.id));
    }

    #[test]
    fn test_contextual_property_prefers_message() {
        let mut message = Message::new();
        message.set_property("encoding", "utf-16");

        let mut exchange = Exchange::new().with_message(Leg::Inbound, message);
        exchange.set_property("encoding", "utf-8");
        exchange.set_property("endpoint", "quotes");

        assert_eq!(
            exchange.contextual_property(Leg::Inbound, "encoding"),
            Some(&Value::from("utf-16"))
        );
        assert_eq!(
            exchange.contextual_property(Leg::Outbound, "encoding"),
            Some(&Value::from("utf-8"))
        );
        assert_eq!(
            exchange.contextual_property(Leg::Inbound, "endpoint"),
            Some(&Value::from("quotes"))
        );
    }

    #[test]
    fn test_first_fault_is_kept() {
        let mut exchange = Exchange::one_way();
        assert!(exchange.is_one_way());

        exchange.record_fault(Fault::client("bad request"));
        exchange.record_fault(Fault::server("secondary"));

        assert_eq!(exchange.fault().unwrap().code, FaultCode::Client);
    }
}
