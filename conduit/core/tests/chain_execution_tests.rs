// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end behaviour of the chain engine: ordering, unwind, pause/resume,
//! cancellation, one-way exchanges and dynamic insertion.

use async_trait::async_trait;
use conduit_core::infrastructure::event_bus::EventBus;
use conduit_core::*;
use conduit_core::domain::events::ChainEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

type Trace = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Copy)]
enum Action {
    Continue,
    Pause,
    Fault,
}

struct Scripted {
    descriptor: InterceptorDescriptor,
    trace: Trace,
    action: Action,
    unwinds: bool,
}

#[async_trait]
impl Interceptor for Scripted {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.descriptor
    }

    async fn handle_message(&self, _ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        self.trace.lock().push(self.descriptor.id.clone());
        match self.action {
            Action::Continue => Ok(Step::Continue),
            Action::Pause => Ok(Step::Pause),
            Action::Fault => Err(Fault::server(format!("{} failed", self.descriptor.id))),
        }
    }

    fn handles_faults(&self) -> bool {
        self.unwinds
    }

    async fn handle_fault(&self, _ctx: &mut MessageContext<'_>) {
        self.trace.lock().push(format!("unwind:{}", self.descriptor.id));
    }
}

fn scripted(trace: &Trace, descriptor: InterceptorDescriptor, action: Action, unwinds: bool) -> Arc<dyn Interceptor> {
    Arc::new(Scripted {
        descriptor,
        trace: Arc::clone(trace),
        action,
        unwinds,
    })
}

fn step(trace: &Trace, id: &str, phase: &str) -> Arc<dyn Interceptor> {
    scripted(trace, InterceptorDescriptor::new(id, phase), Action::Continue, true)
}

fn registry(names: &[&str]) -> Arc<PhaseRegistry> {
    Arc::new(PhaseRegistry::from_names(names.iter().copied()).unwrap())
}

fn inbound_exchange() -> Exchange {
    Exchange::new().with_message(Leg::Inbound, Message::new())
}

fn snapshot(trace: &Trace) -> Vec<String> {
    trace.lock().clone()
}

/// x, z, y, f, w with `f` faulting at index 3.
fn faulting_set(trace: &Trace, f_unwinds: bool) -> Vec<Arc<dyn Interceptor>> {
    vec![
        step(trace, "x", "A"),
        scripted(trace, InterceptorDescriptor::new("y", "B").after("x"), Action::Continue, true),
        scripted(trace, InterceptorDescriptor::new("z", "B").before("y"), Action::Continue, true),
        scripted(trace, InterceptorDescriptor::new("f", "B").after("y"), Action::Fault, f_unwinds),
        scripted(trace, InterceptorDescriptor::new("w", "B").after("f"), Action::Continue, true),
    ]
}

#[tokio::test]
async fn test_every_interceptor_invoked_once_in_sorted_order() {
    let trace = Trace::default();
    let set = vec![
        step(&trace, "x", "A"),
        scripted(&trace, InterceptorDescriptor::new("y", "B").after("x"), Action::Continue, false),
        scripted(&trace, InterceptorDescriptor::new("z", "B").before("y"), Action::Continue, false),
    ];
    let mut chain = InterceptorChain::build(Leg::Inbound, registry(&["A", "B"]), &set).unwrap();
    let mut exchange = inbound_exchange();

    let outcome = chain.do_intercept(&mut exchange).await.unwrap();

    assert_eq!(outcome, ChainOutcome::Complete);
    assert_eq!(chain.state(), ChainState::Complete);
    assert_eq!(snapshot(&trace), vec!["x", "z", "y"]);
    assert_eq!(chain.invoked(), 3);
    assert!(!exchange.has_fault());
}

#[tokio::test]
async fn test_fault_unwinds_executed_prefix_in_reverse() {
    let trace = Trace::default();
    let mut chain =
        InterceptorChain::build(Leg::Inbound, registry(&["A", "B"]), &faulting_set(&trace, true)).unwrap();
    assert_eq!(chain.interceptor_ids(), vec!["x", "z", "y", "f", "w"]);

    let mut exchange = inbound_exchange();
    let outcome = chain.do_intercept(&mut exchange).await.unwrap();

    let fault = match outcome {
        ChainOutcome::Aborted(fault) => fault,
        other => panic!("expected abort, got {other:?}"),
    };
    assert_eq!(fault.interceptor.as_deref(), Some("f"));
    assert_eq!(exchange.fault(), Some(&fault));
    assert_eq!(chain.state(), ChainState::Aborted);
    assert_eq!(
        snapshot(&trace),
        vec!["x", "z", "y", "f", "unwind:f", "unwind:y", "unwind:z", "unwind:x"]
    );
}

#[tokio::test]
async fn test_faulting_interceptor_without_unwind_interest_is_skipped() {
    let trace = Trace::default();
    let mut chain =
        InterceptorChain::build(Leg::Inbound, registry(&["A", "B"]), &faulting_set(&trace, false)).unwrap();
    let mut exchange = inbound_exchange();
    chain.do_intercept(&mut exchange).await.unwrap();

    assert_eq!(
        snapshot(&trace),
        vec!["x", "z", "y", "f", "unwind:y", "unwind:z", "unwind:x"]
    );
}

#[tokio::test]
async fn test_unwind_policy_can_exclude_faulting_interceptor() {
    let trace = Trace::default();
    let mut chain = InterceptorChain::build(Leg::Inbound, registry(&["A", "B"]), &faulting_set(&trace, true))
        .unwrap()
        .with_unwind_policy(UnwindPolicy {
            include_faulting: false,
        });
    let mut exchange = inbound_exchange();
    chain.do_intercept(&mut exchange).await.unwrap();

    assert_eq!(
        snapshot(&trace),
        vec!["x", "z", "y", "f", "unwind:y", "unwind:z", "unwind:x"]
    );
}

#[tokio::test]
async fn test_resume_continues_after_pausing_interceptor() {
    let trace = Trace::default();
    let set = vec![
        step(&trace, "a", "A"),
        scripted(&trace, InterceptorDescriptor::new("b", "A").after("a"), Action::Pause, false),
        scripted(&trace, InterceptorDescriptor::new("c", "B"), Action::Continue, false),
    ];
    let mut chain = InterceptorChain::build(Leg::Inbound, registry(&["A", "B"]), &set).unwrap();
    let mut exchange = inbound_exchange();

    assert_eq!(chain.do_intercept(&mut exchange).await.unwrap(), ChainOutcome::Paused);
    assert_eq!(chain.state(), ChainState::Paused);
    assert_eq!(chain.cursor(), 2);
    assert_eq!(snapshot(&trace), vec!["a", "b"]);
    assert!(exchange.in_message().is_some());

    assert_eq!(chain.do_intercept(&mut exchange).await.unwrap(), ChainOutcome::Complete);
    assert_eq!(snapshot(&trace), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_cancelling_paused_chain_unwinds() {
    let trace = Trace::default();
    let set = vec![
        step(&trace, "a", "A"),
        scripted(&trace, InterceptorDescriptor::new("b", "A").after("a"), Action::Pause, true),
        step(&trace, "c", "B"),
    ];
    let mut chain = InterceptorChain::build(Leg::Inbound, registry(&["A", "B"]), &set).unwrap();
    let mut exchange = inbound_exchange();
    chain.do_intercept(&mut exchange).await.unwrap();

    let outcome = chain
        .abort(&mut exchange, Fault::cancelled("timeout"))
        .await
        .unwrap();

    let fault = outcome.fault().unwrap();
    assert_eq!(fault.code, FaultCode::Cancelled);
    assert_eq!(chain.state(), ChainState::Aborted);
    assert_eq!(snapshot(&trace), vec!["a", "b", "unwind:b", "unwind:a"]);
    assert!(exchange.fault().unwrap().is_cancellation());
    assert!(matches!(
        chain.do_intercept(&mut exchange).await,
        Err(ChainError::Terminated(_))
    ));
}

#[tokio::test]
async fn test_cancelling_finished_chain_is_noop() {
    let trace = Trace::default();
    let set = vec![step(&trace, "a", "A")];
    let mut chain = InterceptorChain::build(Leg::Inbound, registry(&["A"]), &set).unwrap();
    let mut exchange = inbound_exchange();
    chain.do_intercept(&mut exchange).await.unwrap();

    assert!(chain.abort(&mut exchange, Fault::cancelled("late")).await.is_none());
    assert!(chain.abort(&mut exchange, Fault::cancelled("later")).await.is_none());
    assert_eq!(chain.state(), ChainState::Complete);
    assert!(!exchange.has_fault());
    assert_eq!(snapshot(&trace), vec!["a"]);
}

/// Trips the chain's own token mid-run, as a timeout watchdog would.
struct Tripwire {
    descriptor: InterceptorDescriptor,
    token: tokio_util::sync::CancellationToken,
}

#[async_trait]
impl Interceptor for Tripwire {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.descriptor
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        self.token.cancel();
        assert!(ctx.is_cancelled());
        Ok(Step::Continue)
    }

    fn handles_faults(&self) -> bool {
        true
    }

    async fn handle_fault(&self, ctx: &mut MessageContext<'_>) {
        ctx.exchange_mut().set_property("tripwire.unwound", true);
    }
}

#[tokio::test]
async fn test_cancellation_stops_before_next_step() {
    let trace = Trace::default();
    let runtime = Arc::new(PipelineRuntime::new(PhaseManager::new(
        PhaseRegistry::from_names(["A", "B"]).unwrap(),
        PhaseRegistry::outbound(),
    )));
    let factory = runtime.chain_factory();

    let tripwire: Arc<dyn Interceptor> = Arc::new(Tripwire {
        descriptor: InterceptorDescriptor::new("tripwire", "A"),
        token: runtime.shutdown_token().clone(),
    });
    let set = InterceptorSet::new()
        .with(Leg::Inbound, tripwire)
        .with(Leg::Inbound, step(&trace, "never", "B"));

    let mut chain = factory.build(Leg::Inbound, &[&set], &[]).unwrap();
    let mut exchange = inbound_exchange();
    let outcome = chain.do_intercept(&mut exchange).await.unwrap();

    assert!(outcome.fault().unwrap().is_cancellation());
    assert!(snapshot(&trace).is_empty());
    assert_eq!(
        exchange.property("tripwire.unwound"),
        Some(&serde_json::Value::Bool(true))
    );
}

#[tokio::test]
async fn test_one_way_outbound_fault_is_not_surfaced() {
    let trace = Trace::default();
    let set = vec![
        step(&trace, "prepare", "setup"),
        scripted(&trace, InterceptorDescriptor::new("send", "send"), Action::Fault, false),
    ];
    let registry = Arc::new(PhaseRegistry::outbound());

    let mut one_way = Exchange::one_way().with_message(Leg::Outbound, Message::requestor());
    let mut chain = InterceptorChain::build(Leg::Outbound, Arc::clone(&registry), &set).unwrap();
    let outcome = chain.do_intercept(&mut one_way).await.unwrap();
    assert_eq!(outcome, ChainOutcome::AbortedOneWay);
    assert_eq!(chain.state(), ChainState::Aborted);
    assert_eq!(one_way.fault().unwrap().interceptor.as_deref(), Some("send"));
    assert_eq!(chain.fault(), one_way.fault());

    let mut two_way = Exchange::new().with_message(Leg::Outbound, Message::requestor());
    let mut chain = InterceptorChain::build(Leg::Outbound, registry, &set).unwrap();
    assert!(matches!(
        chain.do_intercept(&mut two_way).await.unwrap(),
        ChainOutcome::Aborted(_)
    ));
}

struct CountingObserver(Mutex<Vec<(Leg, bool)>>);

#[async_trait]
impl FaultObserver for CountingObserver {
    async fn on_fault(&self, exchange: &mut Exchange, leg: Leg, _fault: &Fault) {
        self.0.lock().push((leg, exchange.is_one_way()));
    }
}

#[tokio::test]
async fn test_fault_observer_sees_one_way_faults() {
    let trace = Trace::default();
    let observer = Arc::new(CountingObserver(Mutex::new(Vec::new())));
    let set = vec![scripted(&trace, InterceptorDescriptor::new("send", "send"), Action::Fault, false)];

    let mut chain = InterceptorChain::build(Leg::Outbound, Arc::new(PhaseRegistry::outbound()), &set)
        .unwrap()
        .with_fault_observer(observer.clone());
    let mut exchange = Exchange::one_way().with_message(Leg::Outbound, Message::requestor());
    chain.do_intercept(&mut exchange).await.unwrap();

    assert_eq!(*observer.0.lock(), vec![(Leg::Outbound, true)]);
}

struct Inserter {
    descriptor: InterceptorDescriptor,
    trace: Trace,
    inserts: Vec<Arc<dyn Interceptor>>,
    removals: Vec<&'static str>,
}

#[async_trait]
impl Interceptor for Inserter {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.descriptor
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        self.trace.lock().push(self.descriptor.id.clone());
        for interceptor in &self.inserts {
            ctx.add_interceptor(Arc::clone(interceptor));
        }
        for id in &self.removals {
            ctx.remove_interceptor(*id);
        }
        Ok(Step::Continue)
    }
}

#[tokio::test]
async fn test_dynamic_insertion_merges_into_tail() {
    let trace = Trace::default();
    let bus = EventBus::new(32);
    let router: Arc<dyn Interceptor> = Arc::new(Inserter {
        descriptor: InterceptorDescriptor::new("router", "B"),
        trace: Arc::clone(&trace),
        inserts: vec![
            scripted(&trace, InterceptorDescriptor::new("late", "C").before("tail"), Action::Continue, false),
            step(&trace, "x", "B"),
            step(&trace, "past", "A"),
        ],
        removals: vec!["dropped"],
    });
    let set = vec![
        step(&trace, "x", "A"),
        router,
        step(&trace, "dropped", "B"),
        step(&trace, "tail", "C"),
    ];
    let mut chain = InterceptorChain::build(Leg::Inbound, registry(&["A", "B", "C"]), &set)
        .unwrap()
        .with_event_bus(bus.clone());
    let mut exchange = inbound_exchange();
    let mut events = bus.subscribe_exchange(exchange.id);

    assert_eq!(chain.do_intercept(&mut exchange).await.unwrap(), ChainOutcome::Complete);
    assert_eq!(snapshot(&trace), vec!["x", "router", "late", "tail"]);
    assert_eq!(chain.interceptor_ids(), vec!["x", "router", "late", "tail"]);

    let inserted = events
        .drain()
        .into_iter()
        .find_map(|event| match event {
            ChainEvent::InterceptorsInserted { by, inserted, skipped, .. } => Some((by, inserted, skipped)),
            _ => None,
        })
        .unwrap();
    assert_eq!(inserted.0, "router");
    assert_eq!(inserted.1, vec!["late"]);
    assert_eq!(inserted.2, vec!["x", "past"]);
}

#[tokio::test]
async fn test_insertion_into_unknown_phase_faults_inserter() {
    let trace = Trace::default();
    let router: Arc<dyn Interceptor> = Arc::new(Inserter {
        descriptor: InterceptorDescriptor::new("router", "A"),
        trace: Arc::clone(&trace),
        inserts: vec![step(&trace, "lost", "nowhere")],
        removals: Vec::new(),
    });
    let set = vec![router, step(&trace, "after", "B")];
    let mut chain = InterceptorChain::build(Leg::Inbound, registry(&["A", "B"]), &set).unwrap();
    let mut exchange = inbound_exchange();

    let outcome = chain.do_intercept(&mut exchange).await.unwrap();
    let fault = outcome.fault().unwrap();
    assert_eq!(fault.code, FaultCode::Server);
    assert_eq!(fault.interceptor.as_deref(), Some("router"));
    assert_eq!(snapshot(&trace), vec!["router"]);
}

/// Pauses and hands its continuation to a task that resumes the chain, the
/// way an async transport completes a pending write.
struct AsyncIo {
    descriptor: InterceptorDescriptor,
    trace: Trace,
    pending: Arc<Mutex<Option<JoinHandle<Result<ChainOutcome, ChainError>>>>>,
}

#[async_trait]
impl Interceptor for AsyncIo {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.descriptor
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        self.trace.lock().push(self.descriptor.id.clone());
        let continuation = ctx
            .continuation()
            .ok_or_else(|| Fault::server("not driven through a continuation"))?;
        let handle = tokio::spawn(async move { continuation.resume().await });
        *self.pending.lock() = Some(handle);
        Ok(Step::Pause)
    }
}

#[tokio::test]
async fn test_continuation_resumes_from_another_task() {
    let trace = Trace::default();
    let pending = Arc::new(Mutex::new(None));
    let io: Arc<dyn Interceptor> = Arc::new(AsyncIo {
        descriptor: InterceptorDescriptor::new("write", "A"),
        trace: Arc::clone(&trace),
        pending: Arc::clone(&pending),
    });
    let set = InterceptorSet::new()
        .with(Leg::Inbound, io)
        .with(Leg::Inbound, step(&trace, "done", "B"));

    let runtime = Arc::new(PipelineRuntime::new(PhaseManager::new(
        PhaseRegistry::from_names(["A", "B"]).unwrap(),
        PhaseRegistry::outbound(),
    )));
    let continuation = runtime
        .chain_factory()
        .continuation(inbound_exchange(), Leg::Inbound, &[&set], &[])
        .unwrap();

    assert_eq!(continuation.start().await.unwrap(), ChainOutcome::Paused);

    let handle = pending.lock().take().unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), ChainOutcome::Complete);
    assert_eq!(snapshot(&trace), vec!["write", "done"]);
    assert_eq!(continuation.state().await, Some(ChainState::Complete));
    assert!(continuation.cancel("too late").await.is_none());
}

#[tokio::test]
async fn test_paused_chain_cancelled_from_another_task() {
    let trace = Trace::default();
    let set = InterceptorSet::new()
        .with(Leg::Inbound, step(&trace, "a", "A"))
        .with(
            Leg::Inbound,
            scripted(&trace, InterceptorDescriptor::new("b", "A").after("a"), Action::Pause, true),
        )
        .with(Leg::Inbound, step(&trace, "c", "B"));

    let runtime = Arc::new(PipelineRuntime::new(PhaseManager::new(
        PhaseRegistry::from_names(["A", "B"]).unwrap(),
        PhaseRegistry::outbound(),
    )));
    let continuation = runtime
        .chain_factory()
        .continuation(inbound_exchange(), Leg::Inbound, &[&set], &[])
        .unwrap();

    assert_eq!(continuation.start().await.unwrap(), ChainOutcome::Paused);

    let canceller = continuation.clone();
    let outcome = tokio::spawn(async move { canceller.cancel("timeout").await })
        .await
        .unwrap()
        .unwrap();

    let fault = outcome.fault().unwrap();
    assert_eq!(fault.code, FaultCode::Cancelled);
    assert_eq!(snapshot(&trace), vec!["a", "b", "unwind:b", "unwind:a"]);
    assert!(continuation.is_cancelled());
    assert_eq!(continuation.state().await, Some(ChainState::Aborted));
    assert!(continuation.exchange().lock().await.fault().unwrap().is_cancellation());

    assert!(continuation.cancel("again").await.is_none());
    assert!(!snapshot(&trace).contains(&"c".to_string()));
}

struct LegView {
    descriptor: InterceptorDescriptor,
    seen: Arc<Mutex<Vec<(bool, Option<String>)>>>,
}

#[async_trait]
impl Interceptor for LegView {
    fn descriptor(&self) -> &InterceptorDescriptor {
        &self.descriptor
    }

    async fn handle_message(&self, ctx: &mut MessageContext<'_>) -> Result<Step, Fault> {
        let on_exchange = ctx.exchange().message(ctx.leg()).is_some();
        let encoding = ctx
            .contextual_property("encoding")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        self.seen.lock().push((on_exchange, encoding));
        Ok(Step::Continue)
    }
}

#[tokio::test]
async fn test_running_leg_message_is_reached_through_context() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let view: Arc<dyn Interceptor> = Arc::new(LegView {
        descriptor: InterceptorDescriptor::new("view", "A"),
        seen: Arc::clone(&seen),
    });
    let mut chain = InterceptorChain::build(Leg::Inbound, registry(&["A"]), &[view]).unwrap();

    let mut message = Message::new();
    message.set_property("encoding", "utf-8");
    let mut exchange = Exchange::new().with_message(Leg::Inbound, message);
    exchange.set_property("encoding", "latin-1");

    assert_eq!(chain.do_intercept(&mut exchange).await.unwrap(), ChainOutcome::Complete);
    assert_eq!(*seen.lock(), vec![(false, Some("utf-8".to_string()))]);
    assert!(exchange.in_message().is_some());
}
