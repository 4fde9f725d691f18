// src/builder.rs
use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use transport_plugin::RawMessage;

use crate::capability::{Decoder, Handler};
use crate::message::TypeToken;
use crate::path::Path;
use crate::resolver::{ResolutionError, ServiceResolver, ServiceResolverExt};
use crate::step::{DecodeStep, ErasedFilter, HandleStep, Step};

/// Raised when a step chain cannot be compiled into a path.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A decode step's input type is not the raw type and no earlier decode
    /// step produces it.
    #[error("decoder `{decoder}` expects `{input}`, which no earlier step produces")]
    UnreachableDecoder {
        decoder: &'static str,
        input: &'static str,
    },

    /// A handle step's message type is not the raw type and no earlier
    /// decode step produces it.
    #[error("handler `{handler}` expects `{message}`, which no earlier step produces")]
    UnreachableHandler {
        handler: &'static str,
        message: &'static str,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// Accumulates the decode and handle steps of one path.
///
/// Capabilities are resolved immediately on `add_*`; the first failure is
/// kept aside and surfaces when the path is finalized, so registration code
/// stays fluent. Type reachability is validated at finalization: every
/// step's required type must be the raw type or the output of an earlier
/// decode step.
pub struct PathBuilder<R> {
    resolver: Arc<dyn ServiceResolver>,
    steps: Vec<Step>,
    error: Option<BuildError>,
    _raw: PhantomData<R>,
}

impl<R: RawMessage> PathBuilder<R> {
    pub(crate) fn new(resolver: Arc<dyn ServiceResolver>) -> Self {
        Self {
            resolver,
            steps: Vec::new(),
            error: None,
            _raw: PhantomData,
        }
    }

    /// Resolve `D` and append a decode step. Callable multiple times to
    /// form a chain of intermediate transformations.
    pub fn add_decoder<D: Decoder + 'static>(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.resolver.resolve::<D>() {
            Ok(decoder) => self.steps.push(Step::Decode(DecodeStep::new(decoder))),
            Err(e) => self.error = Some(e.into()),
        }
        self
    }

    /// Resolve `H` and append a handle step. Several handlers may share one
    /// message type; that is what fan-out dispatch is built on.
    pub fn add_handler<H: Handler + 'static>(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.resolver.resolve::<H>() {
            Ok(handler) => self.steps.push(Step::Handle(HandleStep::new(handler))),
            Err(e) => self.error = Some(e.into()),
        }
        self
    }

    pub(crate) fn into_path(
        self,
        name: String,
        filter: Arc<dyn ErasedFilter<R>>,
    ) -> Result<Path<R>, BuildError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        // Walk the declared chain once, accumulating every type the raw
        // message can turn into. Order matters: a decoder only extends the
        // set for the steps after it.
        let mut reachable = vec![TypeToken::of::<R>()];
        for step in &self.steps {
            match step {
                Step::Decode(decode) => {
                    if !reachable.contains(&decode.input) {
                        return Err(BuildError::UnreachableDecoder {
                            decoder: decode.capability,
                            input: decode.input.name(),
                        });
                    }
                    if !reachable.contains(&decode.output) {
                        reachable.push(decode.output);
                    }
                }
                Step::Handle(handle) => {
                    if !reachable.contains(&handle.message) {
                        return Err(BuildError::UnreachableHandler {
                            handler: handle.capability,
                            message: handle.message.name(),
                        });
                    }
                }
            }
        }

        Ok(Path::new(name, filter, self.steps))
    }
}
