// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Stock Interceptors
//
// Small, stateless building blocks every endpoint tends to want:
// - LoggingInterceptor: one structured log line per message and phase
// - TimingInterceptor + its ending companion: wall time between two phases,
//   exported as a metrics histogram and a message property
// - LoggingFaultObserver: logs every chain abort

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::domain::exchange::Exchange;
use crate::domain::fault::Fault;
use crate::domain::interceptor::{FaultObserver, Interceptor, InterceptorDescriptor, MessageContext, Step};
use crate::domain::message::Leg;
use crate::domain::phase::names;

/// Message property holding the measured duration in microseconds
pub const ELAPSED_PROPERTY: &str = "conduit.elapsed_us";

/// Exchange property set by [`LoggingFaultObserver`]
pub const FAULT_CODE_PROPERTY: &str = "conduit.fault.code";

pub struct LoggingInterceptor {
    descriptor: InterceptorDescriptor,
}

impl LoggingInterceptor {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            descriptor: InterceptorDescriptor::new("logging", phase),
        }
    }

    /// Logs as early as possible on the inbound path.
    pub fn inbound() -> Self {
        Self::new(names::RECEIVE)
    }

    pub fn outbound() -> Self {
        Self::new(names::PRE_STREAM)
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.descriptor
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        let message = ctx.message();
        info!(
            exchange_id = %ctx.exchange().id,
            message_id = %message.id,
            leg = ctx.leg().as_str(),
            requestor = message.requestor,
            properties = message.properties().len(),
            content = ?message.content_types(),
            "Message passing phase {}",
            ctx.phase()
        );
        Ok(Step::Continue)
    }
}

/// Start timestamp, carried as message content between the two halves
#[derive(Debug, Clone, Copy)]
struct TimingStart(Instant);

/// Starts a timer; its companion stops it in a later phase.
pub struct TimingInterceptor {
    descriptor: InterceptorDescriptor,
    ending: Arc<dyn Interceptor>,
}

impl TimingInterceptor {
    pub fn new(start_phase: impl Into<String>, end_phase: impl Into<String>) -> Self {
        Self {
            descriptor: InterceptorDescriptor::new("timing", start_phase),
            ending: Arc::new(TimingEndingInterceptor {
                descriptor: InterceptorDescriptor::new("timing-ending", end_phase),
            }),
        }
    }

    pub fn inbound() -> Self {
        Self::new(names::RECEIVE, names::POST_INVOKE)
    }

    pub fn outbound() -> Self {
        Self::new(names::SETUP, names::SETUP_ENDING)
    }
}

#[async_trait]
impl Interceptor for TimingInterceptor {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.descriptor
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        ctx.message_mut().set_content(TimingStart(Instant::now()));
        Ok(Step::Continue)
    }

    fn handles_faults(&self) -> bool {
        true
    }

    /// The ending half never runs on a faulted chain; record here instead.
    async fn handle_fault(&self, ctx: &mut MessageContext<'_>) {
        record_elapsed(ctx, "fault");
    }

    fn additional_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        vec![Arc::clone(&self.ending)]
    }
}

pub struct TimingEndingInterceptor {
    descriptor: InterceptorDescriptor,
}

#[async_trait]
impl Interceptor for TimingEndingInterceptor {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.descriptor
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        record_elapsed(ctx, "complete");
        Ok(Step::Continue)
    }
}

fn record_elapsed(ctx: &mut MessageContext<'_>, outcome: &'static str) {
    let leg = ctx.leg().as_str();
    let Some(TimingStart(started)) = ctx.message_mut().take_content::<TimingStart>() else {
        return;
    };
    let elapsed = started.elapsed();
    metrics::histogram!("conduit_chain_duration_seconds", "leg" => leg, "outcome" => outcome)
        .record(elapsed.as_secs_f64());
    ctx.message_mut()
        .set_property(ELAPSED_PROPERTY, elapsed.as_micros() as u64);
}

/// Logs every abort and tags the exchange with the fault code.
#[derive(Debug, Default)]
pub struct LoggingFaultObserver;

#[async_trait]
impl FaultObserver for LoggingFaultObserver {
    async fn on_fault(&self, exchange: &mut Exchange, leg: Leg, fault: &Fault) {
        warn!(
            exchange_id = %exchange.id,
            leg = leg.as_str(),
            code = fault.code.as_str(),
            interceptor = fault.interceptor.as_deref().unwrap_or("-"),
            one_way = exchange.is_one_way(),
            "Chain aborted: {}",
            fault.message
        );
        exchange.set_property(FAULT_CODE_PROPERTY, fault.code.as_str());
    }
}
