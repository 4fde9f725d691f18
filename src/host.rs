// src/host.rs
use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use transport_plugin::{DispatchOutcome, RawMessage, Transport};

use crate::builder::{BuildError, PathBuilder};
use crate::capability::PathFilter;
use crate::config::{ConfigProvider, ConfigSnapshot, MapConfigProvider};
use crate::logger::{FailureSink, LogConfig, TracingFailureSink, init_logging};
use crate::path::Path;
use crate::registry::PathRegistry;
use crate::resolver::{ResolutionError, ServiceRegistry, ServiceResolver, ServiceResolverExt};
use crate::step::FilterRef;

/// Wiring mistakes caught while `start` assembles the engine. All of them
/// are fatal: the host never begins consuming on a half-built registry.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("filter `{filter}` is not registered as a service")]
    FilterResolution {
        filter: &'static str,
        #[source]
        source: ResolutionError,
    },
    #[error("path for filter `{filter}` failed to build")]
    PathBuild {
        filter: &'static str,
        #[source]
        source: BuildError,
    },
    #[error("logger initialization failed: {0}")]
    Logging(String),
}

type ServiceHook = Box<dyn FnOnce(&ConfigSnapshot, &ServiceRegistry) + Send>;
type LoggerHook = Box<dyn FnOnce(&mut LogConfig) + Send>;

/// A deferred path: `map` records how to build it, `start` runs the recipe
/// once services are in place.
struct PathPlan<R: RawMessage> {
    filter: &'static str,
    construct: Box<dyn FnOnce(Arc<dyn ServiceResolver>) -> Result<Path<R>, ConfigurationError> + Send>,
}

/// Owns the transport, the service registry and the ordered path plans;
/// `start` turns them into a running consume loop.
pub struct Host<R: RawMessage> {
    transport: Arc<dyn Transport<R>>,
    services: Arc<ServiceRegistry>,
    config: ConfigProvider,
    log_config: LogConfig,
    service_hooks: Vec<ServiceHook>,
    logger_hooks: Vec<LoggerHook>,
    plans: Vec<PathPlan<R>>,
    failure_sink: Arc<dyn FailureSink>,
    workers: usize,
    shutdown: CancellationToken,
}

impl<R: RawMessage> Host<R> {
    pub fn new(transport: Arc<dyn Transport<R>>) -> Self {
        Self {
            transport,
            services: Arc::new(ServiceRegistry::new()),
            config: ConfigProvider(MapConfigProvider::new()),
            log_config: LogConfig::default(),
            service_hooks: Vec::new(),
            logger_hooks: Vec::new(),
            plans: Vec::new(),
            failure_sink: Arc::new(TracingFailureSink),
            workers: 1,
            shutdown: CancellationToken::new(),
        }
    }

    /// Swap the key/value source the service hooks read from.
    pub fn with_config(mut self, config: ConfigProvider) -> Self {
        self.config = config;
        self
    }

    /// Start from an existing registry instead of an empty one.
    pub fn with_services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = services;
        self
    }

    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failure_sink = sink;
        self
    }

    /// Number of concurrent consumers pulling from the transport.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Register services against the registry. Hooks run once, in
    /// registration order, at the top of `start`.
    pub fn configure_services(
        mut self,
        hook: impl FnOnce(&ConfigSnapshot, &ServiceRegistry) + Send + 'static,
    ) -> Self {
        self.service_hooks.push(Box::new(hook));
        self
    }

    /// Adjust the logging setup before the subscriber is installed.
    pub fn configure_logger(mut self, hook: impl FnOnce(&mut LogConfig) + Send + 'static) -> Self {
        self.logger_hooks.push(Box::new(hook));
        self
    }

    /// Declare a path guarded by the filter service `F`.
    ///
    /// Nothing is resolved here: services only exist once the
    /// `configure_services` hooks have run, so the path is recorded as a
    /// plan and built inside `start`. Declaration order is match order.
    pub fn map<F>(mut self, build: impl FnOnce(PathBuilder<R>) -> PathBuilder<R> + Send + 'static) -> Self
    where
        F: PathFilter<Raw = R> + 'static,
    {
        let filter = type_name::<F>();
        self.plans.push(PathPlan {
            filter,
            construct: Box::new(move |resolver: Arc<dyn ServiceResolver>| {
                let instance = resolver
                    .resolve::<F>()
                    .map_err(|source| ConfigurationError::FilterResolution { filter, source })?;
                build(PathBuilder::new(resolver))
                    .into_path(short_name(filter).to_string(), Arc::new(FilterRef::new(instance)))
                    .map_err(|source| ConfigurationError::PathBuild { filter, source })
            }),
        });
        self
    }

    /// A token that stops the consume loop when cancelled. Clone it out
    /// before calling `start`.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Apply the deferred configuration, build every path, then consume
    /// deliveries until the transport closes or shutdown is signalled.
    pub async fn start(self) -> Result<(), ConfigurationError> {
        let Host {
            transport,
            services,
            config,
            mut log_config,
            service_hooks,
            logger_hooks,
            plans,
            failure_sink,
            workers,
            shutdown,
        } = self;

        // 1) Snapshot the configuration and let the application register
        //    its services against it.
        let snapshot = config.0.snapshot().await;
        for hook in service_hooks {
            hook(&snapshot, &services);
        }

        // 2) Logger hooks, then install the subscriber and telemetry.
        for hook in logger_hooks {
            hook(&mut log_config);
        }
        let metrics =
            init_logging(&log_config).map_err(|e| ConfigurationError::Logging(e.to_string()))?;

        // 3) Build every declared path before consuming anything. The
        //    first wiring mistake aborts startup.
        let resolver: Arc<dyn ServiceResolver> = services.clone();
        let mut paths = Vec::with_capacity(plans.len());
        for plan in plans {
            debug!(filter = plan.filter, "building path");
            paths.push((plan.construct)(resolver.clone())?);
        }
        let registry = Arc::new(PathRegistry::new(paths));
        info!(paths = ?registry.path_names(), workers, "dispatch engine ready");

        // 4) Spawn the consumers. Paths are read-only from here on.
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let transport = transport.clone();
            let registry = registry.clone();
            let metrics = metrics.clone();
            let failure_sink = failure_sink.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let delivery = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = transport.next() => match next {
                            Ok(Some(delivery)) => delivery,
                            Ok(None) => {
                                debug!(worker, "transport closed; consumer stopping");
                                break;
                            }
                            Err(e) => {
                                warn!(worker, "transport receive error: {e}");
                                sleep(Duration::from_millis(200)).await;
                                continue;
                            }
                        },
                    };

                    metrics.started();
                    let report = registry.dispatch(&delivery, &shutdown).await;
                    let latency_ms = report.total.num_milliseconds() as f64;
                    metrics.finished(report.outcome, latency_ms);
                    info!(
                        target: "dispatch",
                        correlation_id = %report.correlation_id,
                        outcome = report.outcome.as_str(),
                        path = report.path.as_deref().unwrap_or("-"),
                        steps = report.records.len(),
                        latency_ms,
                        finished = report.finished,
                        "dispatch complete"
                    );

                    if let Some(fault) = &report.fault {
                        failure_sink.report(&report.correlation_id, fault);
                        if let Err(e) = transport.nack(&delivery, report.outcome).await {
                            warn!("nack failed: {e}");
                        }
                    } else {
                        if report.outcome == DispatchOutcome::Unrouted {
                            warn!(
                                correlation_id = %report.correlation_id,
                                "no path accepted the message"
                            );
                        }
                        if let Err(e) = transport.ack(&delivery, report.outcome).await {
                            warn!("ack failed: {e}");
                        }
                    }
                }
            }));
        }

        // 5) Run until the consumers finish on their own (transport closed,
        //    shutdown handle cancelled) or Ctrl-C asks us to drain.
        let mut consumers = Box::pin(join_all(handles));
        tokio::select! {
            results = &mut consumers => {
                for result in results {
                    if let Err(e) = result {
                        error!("consumer task failed: {e}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received; draining consumers");
                shutdown.cancel();
                for result in consumers.await {
                    if let Err(e) = result {
                        error!("consumer task failed: {e}");
                    }
                }
            }
        }

        info!("host stopped");
        Ok(())
    }
}

impl<R: RawMessage> fmt::Debug for Host<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("paths", &self.plans.len())
            .field("workers", &self.workers)
            .field("log_config", &self.log_config)
            .finish()
    }
}

/// Last segment of a type path, for readable path names in logs.
fn short_name(full: &'static str) -> &'static str {
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_trims_the_module_path() {
        assert_eq!(short_name("app::filters::OrderFilter"), "OrderFilter");
        assert_eq!(short_name("OrderFilter"), "OrderFilter");
    }

    #[test]
    fn test_worker_count_never_drops_to_zero() {
        struct NoTransport;
        #[async_trait::async_trait]
        impl Transport<String> for NoTransport {
            async fn next(
                &self,
            ) -> Result<Option<transport_plugin::Delivery<String>>, transport_plugin::TransportError>
            {
                Ok(None)
            }
        }

        let host = Host::<String>::new(Arc::new(NoTransport)).with_workers(0);
        assert_eq!(host.workers, 1);
    }
}
