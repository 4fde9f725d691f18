// src/registry.rs
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use transport_plugin::{Delivery, DispatchOutcome, RawMessage};

use crate::context::Context;
use crate::path::{DispatchReport, FaultStage, Path, RuntimeFault};

/// The ordered list of compiled paths and the dispatch entry point.
///
/// Finalized before the consume loop starts; afterwards it is read-only and
/// shared across workers.
pub struct PathRegistry<R> {
    paths: Vec<Path<R>>,
}

impl<R: RawMessage> PathRegistry<R> {
    pub(crate) fn new(paths: Vec<Path<R>>) -> Self {
        Self { paths }
    }

    /// Path names in registration order.
    pub fn path_names(&self) -> Vec<&str> {
        self.paths.iter().map(|path| path.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Dispatch one delivery.
    ///
    /// Creates the per-message context, selects the first path whose filter
    /// accepts the raw payload (filters see the raw message only, in
    /// registration order), walks that path, and folds everything into a
    /// [`DispatchReport`]. A filter fault abandons the message like any
    /// other capability fault; later paths are not consulted.
    pub async fn dispatch(
        &self,
        delivery: &Delivery<R>,
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let started = Utc::now();
        let mut ctx = Context::new(delivery.correlation_id.clone(), cancel.child_token());

        for path in &self.paths {
            match path.accepts(&ctx, &delivery.payload).await {
                Err(e) => {
                    return DispatchReport {
                        outcome: DispatchOutcome::Faulted,
                        correlation_id: ctx.correlation_id().to_string(),
                        path: Some(path.name().to_string()),
                        records: Vec::new(),
                        fault: Some(RuntimeFault::new(FaultStage::Filter, path.name(), e)),
                        total: Utc::now() - started,
                        finished: false,
                    };
                }
                Ok(false) => continue,
                Ok(true) => {
                    debug!(
                        "path `{}` accepted dispatch {}",
                        path.name(),
                        ctx.correlation_id()
                    );
                    let run = path.run(&mut ctx, delivery.payload.clone()).await;
                    let outcome = if run.fault.is_some() {
                        DispatchOutcome::Faulted
                    } else if run.handled {
                        DispatchOutcome::Handled
                    } else {
                        DispatchOutcome::Unhandled
                    };
                    return DispatchReport {
                        outcome,
                        correlation_id: ctx.correlation_id().to_string(),
                        path: Some(path.name().to_string()),
                        records: run.records,
                        fault: run.fault,
                        total: Utc::now() - started,
                        finished: run.finished,
                    };
                }
            }
        }

        debug!("no path accepted dispatch {}", ctx.correlation_id());
        DispatchReport {
            outcome: DispatchOutcome::Unrouted,
            correlation_id: ctx.correlation_id().to_string(),
            path: None,
            records: Vec::new(),
            fault: None,
            total: Utc::now() - started,
            finished: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;
    use crate::capability::{Handler, PathFilter};
    use crate::step::{FilterRef, HandleStep, Step};

    /// Filter with a fixed verdict that counts how often it is consulted.
    struct ProbeFilter {
        accepts: bool,
        consulted: AtomicUsize,
    }

    impl ProbeFilter {
        fn new(accepts: bool) -> Arc<Self> {
            Arc::new(Self {
                accepts,
                consulted: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PathFilter for ProbeFilter {
        type Raw = String;

        async fn filter(&self, _ctx: &Context, _raw: &String) -> anyhow::Result<bool> {
            self.consulted.fetch_add(1, Ordering::SeqCst);
            Ok(self.accepts)
        }
    }

    struct FaultyFilter;

    #[async_trait]
    impl PathFilter for FaultyFilter {
        type Raw = String;

        async fn filter(&self, _ctx: &Context, _raw: &String) -> anyhow::Result<bool> {
            Err(anyhow!("filter backend down"))
        }
    }

    struct CountingHandler {
        calls: AtomicUsize,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Handler for CountingHandler {
        type Message = String;

        async fn can_handle(&self, _ctx: &Context, _message: &String) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn handle(&self, _ctx: &mut Context, _message: &String) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn path_for(
        name: &str,
        filter: Arc<ProbeFilter>,
        handler: Arc<CountingHandler>,
    ) -> Path<String> {
        Path::new(
            name.to_string(),
            Arc::new(FilterRef::new(filter)),
            vec![Step::Handle(HandleStep::new(handler))],
        )
    }

    fn delivery(payload: &str) -> Delivery<String> {
        Delivery::new(payload.to_string())
    }

    #[tokio::test]
    async fn test_first_accepting_path_wins_and_later_paths_are_not_consulted() {
        let first_filter = ProbeFilter::new(true);
        let second_filter = ProbeFilter::new(true);
        let first_handler = CountingHandler::new();
        let second_handler = CountingHandler::new();
        let registry = PathRegistry::new(vec![
            path_for("first", first_filter.clone(), first_handler.clone()),
            path_for("second", second_filter.clone(), second_handler.clone()),
        ]);

        let report = registry
            .dispatch(&delivery("m"), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, DispatchOutcome::Handled);
        assert_eq!(report.path.as_deref(), Some("first"));
        assert_eq!(first_handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_filter.consulted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declining_paths_are_passed_over_in_order() {
        let first_filter = ProbeFilter::new(false);
        let second_filter = ProbeFilter::new(true);
        let first_handler = CountingHandler::new();
        let second_handler = CountingHandler::new();
        let registry = PathRegistry::new(vec![
            path_for("first", first_filter.clone(), first_handler.clone()),
            path_for("second", second_filter.clone(), second_handler.clone()),
        ]);

        let report = registry
            .dispatch(&delivery("m"), &CancellationToken::new())
            .await;

        assert_eq!(report.path.as_deref(), Some("second"));
        assert_eq!(first_filter.consulted.load(Ordering::SeqCst), 1);
        assert_eq!(first_handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrouted_when_no_filter_accepts() {
        let filter = ProbeFilter::new(false);
        let handler = CountingHandler::new();
        let registry = PathRegistry::new(vec![path_for("only", filter, handler.clone())]);

        let report = registry
            .dispatch(&delivery("ping"), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, DispatchOutcome::Unrouted);
        assert!(report.path.is_none());
        assert!(report.records.is_empty());
        assert!(report.finished);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filter_fault_abandons_the_message() {
        let second_filter = ProbeFilter::new(true);
        let second_handler = CountingHandler::new();
        let registry = PathRegistry::new(vec![
            Path::new(
                "faulty".to_string(),
                Arc::new(FilterRef::new(Arc::new(FaultyFilter))),
                Vec::new(),
            ),
            path_for("second", second_filter.clone(), second_handler.clone()),
        ]);

        let report = registry
            .dispatch(&delivery("m"), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, DispatchOutcome::Faulted);
        let fault = report.fault.expect("fault");
        assert_eq!(fault.stage, FaultStage::Filter);
        assert_eq!(second_filter.consulted.load(Ordering::SeqCst), 0);

        // The fault has no effect on the next message.
        let next = registry
            .dispatch(&delivery("m"), &CancellationToken::new())
            .await;
        assert_eq!(next.outcome, DispatchOutcome::Faulted);
    }

    #[tokio::test]
    async fn test_correlation_id_comes_from_the_delivery_when_present() {
        let registry: PathRegistry<String> = PathRegistry::new(Vec::new());

        let tagged = Delivery::new("m".to_string()).with_correlation_id("corr-9");
        let report = registry.dispatch(&tagged, &CancellationToken::new()).await;
        assert_eq!(report.correlation_id, "corr-9");

        let bare = registry
            .dispatch(&delivery("m"), &CancellationToken::new())
            .await;
        assert!(!bare.correlation_id.is_empty());
    }
}
