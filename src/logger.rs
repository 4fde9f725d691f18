// src/logger.rs
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::{
    logs::SdkLoggerProvider, metrics::SdkMeterProvider, trace::SdkTracerProvider,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use transport_plugin::DispatchOutcome;

use crate::path::RuntimeFault;

/// How the host logs and where telemetry goes. Mutated by
/// `configure_logger` callbacks before anything is installed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `"info"` or `"routic=debug"`.
    pub level: String,
    /// Write rolling log files into this directory instead of stdout.
    pub log_dir: Option<PathBuf>,
    /// Export logs, traces and metrics over OTLP to this endpoint.
    pub otel_endpoint: Option<String>,
}

impl LogConfig {
    pub fn new(level: &str, log_dir: Option<PathBuf>, otel_endpoint: Option<String>) -> Self {
        Self {
            level: level.to_string(),
            log_dir,
            otel_endpoint,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            otel_endpoint: None,
        }
    }
}

/// Counters and latency for the consume loop.
///
/// Instruments come from the global meter, which is a no-op provider when
/// no OTLP endpoint is configured, so recording is always safe.
#[derive(Clone)]
pub struct DispatchMetrics {
    pub dispatches_started: Counter<u64>,
    pub dispatches_handled: Counter<u64>,
    pub dispatches_unhandled: Counter<u64>,
    pub dispatches_unrouted: Counter<u64>,
    pub dispatches_faulted: Counter<u64>,
    pub dispatch_latency_ms: Histogram<f64>,
}

impl DispatchMetrics {
    fn from_meter(meter: &Meter) -> Self {
        let dispatches_started = meter
            .u64_counter("dispatches_started")
            .with_description("Total dispatches started")
            .build();
        let dispatches_handled = meter.u64_counter("dispatches_handled").build();
        let dispatches_unhandled = meter.u64_counter("dispatches_unhandled").build();
        let dispatches_unrouted = meter.u64_counter("dispatches_unrouted").build();
        let dispatches_faulted = meter.u64_counter("dispatches_faulted").build();
        let dispatch_latency_ms = meter
            .f64_histogram("dispatch_latency_ms")
            .with_description("Latency per dispatch in ms")
            .with_unit("ms")
            .build();

        Self {
            dispatches_started,
            dispatches_handled,
            dispatches_unhandled,
            dispatches_unrouted,
            dispatches_faulted,
            dispatch_latency_ms,
        }
    }

    pub(crate) fn started(&self) {
        self.dispatches_started.add(1, &[]);
    }

    pub(crate) fn finished(&self, outcome: DispatchOutcome, latency_ms: f64) {
        match outcome {
            DispatchOutcome::Handled => self.dispatches_handled.add(1, &[]),
            DispatchOutcome::Unhandled => self.dispatches_unhandled.add(1, &[]),
            DispatchOutcome::Unrouted => self.dispatches_unrouted.add(1, &[]),
            DispatchOutcome::Faulted => self.dispatches_faulted.add(1, &[]),
        }
        self.dispatch_latency_ms.record(latency_ms, &[]);
    }
}

/// Receives every runtime fault the consume loop captures.
pub trait FailureSink: Send + Sync {
    fn report(&self, correlation_id: &str, fault: &RuntimeFault);
}

/// The default sink: structured error events through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn report(&self, correlation_id: &str, fault: &RuntimeFault) {
        error!(target: "dispatch", correlation_id, error = %fault, "dispatch fault");
    }
}

/// Install the tracing subscriber and telemetry described by `cfg`.
///
/// Three shapes: OTLP export when an endpoint is configured, rolling files
/// when a log directory is given, plain stdout otherwise. Repeat
/// initialization is tolerated so several hosts (or a test binary) can
/// share one process; later calls keep the first subscriber.
pub fn init_logging(cfg: &LogConfig) -> Result<DispatchMetrics> {
    if let Some(endpoint) = &cfg.otel_endpoint {
        return init_otel(&cfg.level, endpoint);
    }
    if let Some(dir) = &cfg.log_dir {
        return init_files(&cfg.level, dir);
    }

    let fmt_layer = fmt::layer()
        .with_thread_names(true)
        .with_filter(EnvFilter::new(cfg.level.clone()));
    let _ = Registry::default().with(fmt_layer).try_init();

    Ok(DispatchMetrics::from_meter(&global::meter("routic")))
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();
fn get_resource() -> Resource {
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name("routic").build())
        .clone()
}

/// Initialize the three OTLP-HTTP providers
fn init_logs(end_point: &str) -> Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_traces(end_point: &str) -> Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()?;
    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_metrics(end_point: &str) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()?;
    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_otel(level: &str, endpoint: &str) -> Result<DispatchMetrics> {
    // 1) bring up the three SDKs
    let logger_provider = init_logs(endpoint)?;
    let tracer_provider = init_traces(endpoint)?;
    let meter_provider = init_metrics(endpoint)?;

    // 2) the OTLP bridge for log events
    let otel_logs_layer = {
        let filter = EnvFilter::new(level)
            .add_directive("hyper=off".parse()?)
            .add_directive("tonic=off".parse()?)
            .add_directive("h2=off".parse()?)
            .add_directive("reqwest=off".parse()?);
        OpenTelemetryTracingBridge::new(&logger_provider).with_filter(filter)
    };

    // 3) a local pretty-printer so info! still reaches stdout
    let fmt_layer = fmt::layer()
        .with_thread_names(true)
        .with_filter(EnvFilter::new(level));

    // 4) install subscriber
    let _ = Registry::default()
        .with(otel_logs_layer)
        .with(fmt_layer)
        .try_init();

    // 5) register the tracer & meter globally
    global::set_tracer_provider(tracer_provider.clone());
    let meter = meter_provider.meter("routic");
    global::set_meter_provider(meter_provider.clone());

    Ok(DispatchMetrics::from_meter(&meter))
}

fn init_files(level: &str, dir: &Path) -> Result<DispatchMetrics> {
    let env_filter = EnvFilter::new(level);

    // 1) A plain-text rolling file appender for info!/error! logs
    let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, "routic.log");
    let txt_layer = fmt::Layer::default().with_writer(txt_appender).with_ansi(false);

    // 2) A JSON-formatter rolling appender for dispatch reports
    //    (picks up events with target="dispatch")
    let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, "dispatch.json");
    let json_layer = fmt::layer()
        .json()
        .with_writer(json_appender)
        .with_target(true)
        .with_filter(EnvFilter::new("dispatch=info"));

    // 3) Install subscriber
    let _ = Registry::default()
        .with(env_filter)
        .with(txt_layer)
        .with(json_layer)
        .try_init();

    // 4) The global meter is the no-op provider here; counters still
    //    compile and record.
    Ok(DispatchMetrics::from_meter(&global::meter("routic")))
}
