// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Chain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Diagnostics, the CLI and tests observe chain runs through it; publishing
// never blocks a chain, and events are dropped when nobody listens.

use crate::domain::events::ChainEvent;
use crate::domain::exchange::ExchangeId;
use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to chain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ChainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish a chain event to all subscribers
    pub fn publish(&self, event: ChainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when there are no receivers
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all chain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single exchange
    pub fn subscribe_exchange(&self, exchange_id: ExchangeId) -> ExchangeEventReceiver {
        ExchangeEventReceiver {
            receiver: self.sender.subscribe(),
            exchange_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

fn map_try_recv_error(e: broadcast::error::TryRecvError) -> EventBusError {
    match e {
        broadcast::error::TryRecvError::Empty => EventBusError::Empty,
        broadcast::error::TryRecvError::Closed => EventBusError::Closed,
        broadcast::error::TryRecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all chain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ChainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<ChainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<ChainEvent, EventBusError> {
        self.receiver.try_recv().map_err(map_try_recv_error)
    }

    /// Convert into a stream that ends when the bus closes. Lagged gaps are
    /// skipped.
    pub fn into_stream(self) -> impl Stream<Item = ChainEvent> + Send {
        stream::unfold(self.receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event stream lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

/// Receiver for the events of one exchange (filtered)
pub struct ExchangeEventReceiver {
    receiver: broadcast::Receiver<ChainEvent>,
    exchange_id: ExchangeId,
}

impl ExchangeEventReceiver {
    /// Receive the next event belonging to the subscribed exchange
    pub async fn recv(&mut self) -> Result<ChainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.exchange_id() == self.exchange_id {
                return Ok(event);
            }
        }
    }

    /// Drain buffered events of the subscribed exchange without waiting
    pub fn drain(&mut self) -> Vec<ChainEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.exchange_id() == self.exchange_id => events.push(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Event receiver lagged by {} events", n);
                    continue;
                }
                Err(_) => break,
            }
        }
        events
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
