pub mod builder;
pub mod capability;
pub mod config;
pub mod context;
pub mod host;
pub mod logger;
pub mod message;
pub mod path;
pub mod registry;
pub mod resolver;
mod step;

pub use builder::{BuildError, PathBuilder};
pub use capability::{Decoder, Handler, PathFilter};
pub use config::{
    ConfigProvider, ConfigProviderType, ConfigSnapshot, EnvConfigProvider, MapConfigProvider,
};
pub use context::Context;
pub use host::{ConfigurationError, Host};
pub use logger::{DispatchMetrics, FailureSink, LogConfig, TracingFailureSink, init_logging};
pub use message::{AnyMessage, TypeToken};
pub use path::{DispatchReport, FaultStage, Path, RuntimeFault, StepAction, StepRecord};
pub use registry::PathRegistry;
pub use resolver::{ResolutionError, ServiceRegistry, ServiceResolver, ServiceResolverExt};
pub use step::StepKind;
pub use transport_plugin::{Delivery, DispatchOutcome, RawMessage, Transport, TransportError};
