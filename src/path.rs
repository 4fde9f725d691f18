// src/path.rs
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use transport_plugin::{DispatchOutcome, RawMessage};

use crate::context::Context;
use crate::message::AnyMessage;
use crate::step::{ErasedFilter, Step, StepKind};

/// Where in the walk a capability faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStage {
    Filter,
    CanDecode,
    Decode,
    CanHandle,
    Handle,
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FaultStage::Filter => "filter",
            FaultStage::CanDecode => "decode predicate",
            FaultStage::Decode => "decoder",
            FaultStage::CanHandle => "handle predicate",
            FaultStage::Handle => "handler",
        };
        f.write_str(label)
    }
}

/// An unexpected failure raised by a capability during dispatch.
///
/// Aborts that message only: the fault is reported to the failure sink and
/// the consume loop moves on. Declines are never faults.
#[derive(Debug, Error)]
#[error("{stage} `{capability}` faulted: {source}")]
pub struct RuntimeFault {
    pub stage: FaultStage,
    pub capability: String,
    #[source]
    pub source: anyhow::Error,
}

impl RuntimeFault {
    pub(crate) fn new(stage: FaultStage, capability: &str, source: anyhow::Error) -> Self {
        Self {
            stage,
            capability: capability.to_string(),
            source,
        }
    }
}

/// What the walk did with one considered step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// The step's token did not match the current value; unreachable here.
    SkippedType,
    /// The predicate declined.
    SkippedPredicate,
    /// The decode action declined; current value unchanged.
    DecodeDeclined,
    /// The decode action replaced the current value.
    Decoded,
    /// The handle action ran; carries its handled signal.
    Handled { handled: bool },
    /// The capability returned an error; the walk stopped here.
    Faulted,
}

/// One record per considered step, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub capability: String,
    pub kind: StepKind,
    pub action: StepAction,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

/// Everything the host wants to know about one dispatched message.
#[derive(Debug)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,
    pub correlation_id: String,
    /// Name of the selected path, `None` when unrouted.
    pub path: Option<String>,
    pub records: Vec<StepRecord>,
    pub fault: Option<RuntimeFault>,
    /// Total elapsed wall time.
    pub total: TimeDelta,
    /// False when the walk stopped early (fault or cancellation).
    pub finished: bool,
}

/// Outcome of one path walk, folded into a [`DispatchReport`] by the registry.
pub(crate) struct PathRun {
    pub(crate) handled: bool,
    pub(crate) records: Vec<StepRecord>,
    pub(crate) fault: Option<RuntimeFault>,
    pub(crate) finished: bool,
}

/// A compiled routing unit: one filter plus an ordered step chain.
///
/// Built once at startup, read-only afterwards, shared by all concurrent
/// dispatches.
pub struct Path<R> {
    name: String,
    filter: Arc<dyn ErasedFilter<R>>,
    steps: Vec<Step>,
}

impl<R: RawMessage> Path<R> {
    pub(crate) fn new(name: String, filter: Arc<dyn ErasedFilter<R>>, steps: Vec<Step>) -> Self {
        Self {
            name,
            filter,
            steps,
        }
    }

    /// The filter's type name; identifies the path in logs and reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) async fn accepts(&self, ctx: &Context, raw: &R) -> anyhow::Result<bool> {
        self.filter.filter(ctx, raw).await
    }

    /// Walk the step chain against one raw message.
    ///
    /// The current value starts as the raw payload; decode steps replace it,
    /// handle steps consume it. Skips never stop the walk, faults do, and
    /// cancellation is observed between steps.
    pub(crate) async fn run(&self, ctx: &mut Context, raw: R) -> PathRun {
        let mut records = Vec::new();
        let mut handled = false;
        let mut value = AnyMessage::new(raw);

        for step in &self.steps {
            if ctx.is_cancelled() {
                debug!(
                    "dispatch {} cancelled before `{}`",
                    ctx.correlation_id(),
                    step.capability()
                );
                return PathRun {
                    handled,
                    records,
                    fault: None,
                    finished: false,
                };
            }

            let started = Utc::now();
            let outcome = match step {
                Step::Decode(decode) => {
                    if decode.input != value.token() {
                        Ok(StepAction::SkippedType)
                    } else {
                        match decode.decoder.can_decode(ctx, &value).await {
                            Err(e) => {
                                Err(RuntimeFault::new(FaultStage::CanDecode, decode.capability, e))
                            }
                            Ok(false) => Ok(StepAction::SkippedPredicate),
                            Ok(true) => match decode.decoder.decode(ctx, &value).await {
                                Err(e) => {
                                    Err(RuntimeFault::new(FaultStage::Decode, decode.capability, e))
                                }
                                Ok(None) => Ok(StepAction::DecodeDeclined),
                                Ok(Some(decoded)) => {
                                    value = decoded;
                                    Ok(StepAction::Decoded)
                                }
                            },
                        }
                    }
                }
                Step::Handle(handle) => {
                    if handle.message != value.token() {
                        Ok(StepAction::SkippedType)
                    } else {
                        match handle.handler.can_handle(ctx, &value).await {
                            Err(e) => {
                                Err(RuntimeFault::new(FaultStage::CanHandle, handle.capability, e))
                            }
                            Ok(false) => Ok(StepAction::SkippedPredicate),
                            Ok(true) => match handle.handler.handle(ctx, &value).await {
                                Err(e) => {
                                    Err(RuntimeFault::new(FaultStage::Handle, handle.capability, e))
                                }
                                Ok(signal) => {
                                    handled = handled || signal;
                                    Ok(StepAction::Handled { handled: signal })
                                }
                            },
                        }
                    }
                }
            };
            let finished = Utc::now();

            match outcome {
                Ok(action) => records.push(StepRecord {
                    capability: step.capability().to_string(),
                    kind: step.kind(),
                    action,
                    started,
                    finished,
                }),
                Err(fault) => {
                    records.push(StepRecord {
                        capability: step.capability().to_string(),
                        kind: step.kind(),
                        action: StepAction::Faulted,
                        started,
                        finished,
                    });
                    return PathRun {
                        handled,
                        records,
                        fault: Some(fault),
                        finished: false,
                    };
                }
            }
        }

        PathRun {
            handled,
            records,
            fault: None,
            finished: true,
        }
    }
}

impl<R> fmt::Debug for Path<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::capability::{Decoder, Handler, PathFilter};
    use crate::step::{DecodeStep, FilterRef, HandleStep};

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        status: String,
    }

    struct AcceptAll;

    #[async_trait]
    impl PathFilter for AcceptAll {
        type Raw = String;

        async fn filter(&self, _ctx: &Context, _raw: &String) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    /// Decodes `status=<value>` strings into an Order.
    struct OrderDecoder;

    #[async_trait]
    impl Decoder for OrderDecoder {
        type Input = String;
        type Output = Order;

        async fn can_decode(&self, _ctx: &Context, input: &String) -> anyhow::Result<bool> {
            Ok(input.starts_with("status="))
        }

        async fn decode(&self, _ctx: &mut Context, input: &String) -> anyhow::Result<Option<Order>> {
            Ok(input.strip_prefix("status=").map(|status| Order {
                status: status.to_string(),
            }))
        }
    }

    /// Counts invocations; handles only `NEW` orders.
    struct NewOrderHandler {
        calls: AtomicUsize,
    }

    impl NewOrderHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Handler for NewOrderHandler {
        type Message = Order;

        async fn can_handle(&self, _ctx: &Context, message: &Order) -> anyhow::Result<bool> {
            Ok(message.status == "NEW")
        }

        async fn handle(&self, _ctx: &mut Context, _message: &Order) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    /// Handles every order it sees but reports handled=false.
    struct AuditHandler {
        calls: AtomicUsize,
    }

    impl AuditHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Handler for AuditHandler {
        type Message = Order;

        async fn can_handle(&self, _ctx: &Context, _message: &Order) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn handle(&self, _ctx: &mut Context, _message: &Order) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    /// Handles only `DONE` orders.
    struct DoneOrderHandler {
        calls: AtomicUsize,
    }

    impl DoneOrderHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Handler for DoneOrderHandler {
        type Message = Order;

        async fn can_handle(&self, _ctx: &Context, message: &Order) -> anyhow::Result<bool> {
            Ok(message.status == "DONE")
        }

        async fn handle(&self, _ctx: &mut Context, _message: &Order) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl Handler for FailingHandler {
        type Message = Order;

        async fn can_handle(&self, _ctx: &Context, _message: &Order) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn handle(&self, _ctx: &mut Context, _message: &Order) -> anyhow::Result<bool> {
            Err(anyhow!("downstream unavailable"))
        }
    }

    fn path_with(steps: Vec<Step>) -> Path<String> {
        Path::new(
            "AcceptAll".to_string(),
            Arc::new(FilterRef::new(Arc::new(AcceptAll))),
            steps,
        )
    }

    fn ctx() -> Context {
        Context::new(None, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_decode_then_handle_reports_handled() {
        let handler = NewOrderHandler::new();
        let path = path_with(vec![
            Step::Decode(DecodeStep::new(Arc::new(OrderDecoder))),
            Step::Handle(HandleStep::new(handler.clone())),
        ]);

        let run = path.run(&mut ctx(), "status=NEW".to_string()).await;
        assert!(run.handled);
        assert!(run.finished);
        assert!(run.fault.is_none());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.records[0].action, StepAction::Decoded);
        assert_eq!(run.records[1].action, StepAction::Handled { handled: true });
    }

    #[tokio::test]
    async fn test_declined_decode_leaves_value_for_later_steps() {
        // The handler expects an Order; with the decode declined the slot
        // still holds the raw String, so the handler must be type-skipped.
        let handler = NewOrderHandler::new();
        let path = path_with(vec![
            Step::Decode(DecodeStep::new(Arc::new(OrderDecoder))),
            Step::Handle(HandleStep::new(handler.clone())),
        ]);

        let run = path.run(&mut ctx(), "not an order".to_string()).await;
        assert!(!run.handled);
        assert!(run.finished);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(run.records[0].action, StepAction::SkippedPredicate);
        assert_eq!(run.records[1].action, StepAction::SkippedType);
    }

    #[tokio::test]
    async fn test_fan_out_runs_every_accepting_handler() {
        let first = AuditHandler::new();
        let second = NewOrderHandler::new();
        let third = NewOrderHandler::new();
        let path = path_with(vec![
            Step::Decode(DecodeStep::new(Arc::new(OrderDecoder))),
            Step::Handle(HandleStep::new(first.clone())),
            Step::Handle(HandleStep::new(second.clone())),
            Step::Handle(HandleStep::new(third.clone())),
        ]);

        let run = path.run(&mut ctx(), "status=NEW".to_string()).await;
        // handled=false from the audit handler does not stop the walk, and
        // handled=true from the second does not short-circuit the third.
        assert!(run.handled);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_only_the_accepting_handler_runs() {
        let new_handler = NewOrderHandler::new();
        let done_handler = DoneOrderHandler::new();
        let path = path_with(vec![
            Step::Decode(DecodeStep::new(Arc::new(OrderDecoder))),
            Step::Handle(HandleStep::new(new_handler.clone())),
            Step::Handle(HandleStep::new(done_handler.clone())),
        ]);

        let run = path.run(&mut ctx(), "status=DONE".to_string()).await;
        assert!(run.handled);
        assert_eq!(new_handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(done_handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.records[1].action, StepAction::SkippedPredicate);
    }

    #[tokio::test]
    async fn test_audit_only_walk_is_not_handled() {
        let audit = AuditHandler::new();
        let path = path_with(vec![
            Step::Decode(DecodeStep::new(Arc::new(OrderDecoder))),
            Step::Handle(HandleStep::new(audit.clone())),
        ]);

        let run = path.run(&mut ctx(), "status=DONE".to_string()).await;
        assert!(!run.handled);
        assert_eq!(audit.calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.records[1].action, StepAction::Handled { handled: false });
    }

    #[tokio::test]
    async fn test_fault_stops_the_walk_and_is_captured() {
        let later = NewOrderHandler::new();
        let path = path_with(vec![
            Step::Decode(DecodeStep::new(Arc::new(OrderDecoder))),
            Step::Handle(HandleStep::new(Arc::new(FailingHandler))),
            Step::Handle(HandleStep::new(later.clone())),
        ]);

        let run = path.run(&mut ctx(), "status=NEW".to_string()).await;
        assert!(!run.finished);
        assert_eq!(later.calls.load(Ordering::SeqCst), 0);
        let fault = run.fault.expect("fault");
        assert_eq!(fault.stage, FaultStage::Handle);
        assert!(fault.capability.ends_with("FailingHandler"));
        assert_eq!(run.records.last().expect("record").action, StepAction::Faulted);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_before_the_first_step() {
        let handler = NewOrderHandler::new();
        let path = path_with(vec![Step::Handle(HandleStep::new(handler.clone()))]);

        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = Context::new(None, token);

        let run = path.run(&mut ctx, "status=NEW".to_string()).await;
        assert!(!run.finished);
        assert!(run.records.is_empty());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
