// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Continuation
//!
//! Shared handle to an exchange whose chain can be paused and resumed from
//! another task. The exchange (with its chain parked in the chain slot) lives
//! behind an async mutex; driving the chain holds the lock for the whole run,
//! so at most one task executes a given chain at a time.
//!
//! ```text
//! task A: start() ── step returns Pause ──► lock released
//! task B:                      resume() ──► waits for lock ──► continues at k+1
//! ```
//!
//! Never call [`Continuation::resume`] or [`Continuation::cancel`] from inside
//! a step of the same chain: the lock is held and the call would wait forever.
//! Hand the continuation to a spawned task instead.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::chain::{ChainOutcome, ChainState};
use crate::domain::exchange::Exchange;
use crate::domain::fault::{ChainError, Fault};

#[derive(Clone)]
pub struct Continuation {
    exchange: Arc<Mutex<Exchange>>,
    cancel: CancellationToken,
}

impl Continuation {
    /// Wrap an exchange that already has a chain installed.
    pub fn new(exchange: Exchange) -> Result<Self, ChainError> {
        let cancel = exchange
            .chain()
            .map(|chain| chain.cancel_token())
            .ok_or(ChainError::NoChain)?;
        Ok(Self {
            exchange: Arc::new(Mutex::new(exchange)),
            cancel,
        })
    }

    /// Run the chain from the beginning.
    pub async fn start(&self) -> Result<ChainOutcome, ChainError> {
        self.run().await
    }

    /// Continue a paused chain with the entry after the one that paused.
    pub async fn resume(&self) -> Result<ChainOutcome, ChainError> {
        self.run().await
    }

    async fn run(&self) -> Result<ChainOutcome, ChainError> {
        let mut exchange = self.exchange.lock().await;
        let mut chain = exchange.take_chain().ok_or(ChainError::NoChain)?;
        let result = chain.drive(&mut exchange, Some(self.clone())).await;
        exchange.set_chain(chain);
        result
    }

    /// Cancel the chain.
    ///
    /// The token is tripped first, so a chain running on another task stops
    /// before its next step. Once the lock is available a chain that is still
    /// paused (or was never started) is aborted here with a cancellation
    /// fault. Returns `None` when the chain had already reached a terminal
    /// state; cancelling twice is harmless.
    pub async fn cancel(&self, reason: &str) -> Option<ChainOutcome> {
        self.cancel.cancel();

        let mut exchange = self.exchange.lock().await;
        let mut chain = exchange.take_chain()?;
        let outcome = chain.abort(&mut exchange, Fault::cancelled(reason)).await;
        exchange.set_chain(chain);

        if outcome.is_none() {
            debug!("Cancel on finished chain ignored");
        }
        outcome
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn state(&self) -> Option<ChainState> {
        self.exchange.lock().await.chain().map(|chain| chain.state())
    }

    pub fn exchange(&self) -> &Arc<Mutex<Exchange>> {
        &self.exchange
    }
}
