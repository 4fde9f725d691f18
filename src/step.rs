// src/step.rs
use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;

use crate::capability::{Decoder, Handler, PathFilter};
use crate::context::Context;
use crate::message::{AnyMessage, TypeToken};

/// Which kind of work a step performs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Decode,
    Handle,
}

/// Object-safe face of a [`Decoder`], invoked through the erased value slot.
/// The path walk checks token eligibility before calling in, so the
/// downcast only fails on an internal wiring bug, reported as an error.
#[async_trait]
pub(crate) trait ErasedDecoder: Send + Sync {
    async fn can_decode(&self, ctx: &Context, value: &AnyMessage) -> anyhow::Result<bool>;

    async fn decode(
        &self,
        ctx: &mut Context,
        value: &AnyMessage,
    ) -> anyhow::Result<Option<AnyMessage>>;
}

/// Object-safe face of a [`Handler`].
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn can_handle(&self, ctx: &Context, value: &AnyMessage) -> anyhow::Result<bool>;

    async fn handle(&self, ctx: &mut Context, value: &AnyMessage) -> anyhow::Result<bool>;
}

/// Object-safe face of a [`PathFilter`], generic only over the raw payload.
#[async_trait]
pub(crate) trait ErasedFilter<R>: Send + Sync {
    async fn filter(&self, ctx: &Context, raw: &R) -> anyhow::Result<bool>;
}

fn expect_value<T: Send + Sync + 'static>(value: &AnyMessage) -> anyhow::Result<&T> {
    value.downcast_ref::<T>().ok_or_else(|| {
        anyhow!(
            "value slot holds `{}`, expected `{}`",
            value.token(),
            type_name::<T>()
        )
    })
}

/// Capability reference for a decoder: the resolved instance bound to its
/// predicate/action pair, captured once at build time.
pub(crate) struct DecoderRef<D> {
    inner: Arc<D>,
}

impl<D> DecoderRef<D> {
    pub(crate) fn new(inner: Arc<D>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<D: Decoder> ErasedDecoder for DecoderRef<D> {
    async fn can_decode(&self, ctx: &Context, value: &AnyMessage) -> anyhow::Result<bool> {
        let input = expect_value::<D::Input>(value)?;
        self.inner.can_decode(ctx, input).await
    }

    async fn decode(
        &self,
        ctx: &mut Context,
        value: &AnyMessage,
    ) -> anyhow::Result<Option<AnyMessage>> {
        let input = expect_value::<D::Input>(value)?;
        Ok(self.inner.decode(ctx, input).await?.map(AnyMessage::new))
    }
}

/// Capability reference for a handler.
pub(crate) struct HandlerRef<H> {
    inner: Arc<H>,
}

impl<H> HandlerRef<H> {
    pub(crate) fn new(inner: Arc<H>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: Handler> ErasedHandler for HandlerRef<H> {
    async fn can_handle(&self, ctx: &Context, value: &AnyMessage) -> anyhow::Result<bool> {
        let message = expect_value::<H::Message>(value)?;
        self.inner.can_handle(ctx, message).await
    }

    async fn handle(&self, ctx: &mut Context, value: &AnyMessage) -> anyhow::Result<bool> {
        let message = expect_value::<H::Message>(value)?;
        self.inner.handle(ctx, message).await
    }
}

/// Capability reference for a path filter.
pub(crate) struct FilterRef<F> {
    inner: Arc<F>,
}

impl<F> FilterRef<F> {
    pub(crate) fn new(inner: Arc<F>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: PathFilter> ErasedFilter<F::Raw> for FilterRef<F> {
    async fn filter(&self, ctx: &Context, raw: &F::Raw) -> anyhow::Result<bool> {
        self.inner.filter(ctx, raw).await
    }
}

/// One unit in a compiled path. Immutable after construction.
pub(crate) enum Step {
    Decode(DecodeStep),
    Handle(HandleStep),
}

pub(crate) struct DecodeStep {
    pub(crate) input: TypeToken,
    pub(crate) output: TypeToken,
    pub(crate) capability: &'static str,
    pub(crate) decoder: Arc<dyn ErasedDecoder>,
}

pub(crate) struct HandleStep {
    pub(crate) message: TypeToken,
    pub(crate) capability: &'static str,
    pub(crate) handler: Arc<dyn ErasedHandler>,
}

impl DecodeStep {
    pub(crate) fn new<D: Decoder + 'static>(decoder: Arc<D>) -> Self {
        Self {
            input: TypeToken::of::<D::Input>(),
            output: TypeToken::of::<D::Output>(),
            capability: type_name::<D>(),
            decoder: Arc::new(DecoderRef::new(decoder)),
        }
    }
}

impl HandleStep {
    pub(crate) fn new<H: Handler + 'static>(handler: Arc<H>) -> Self {
        Self {
            message: TypeToken::of::<H::Message>(),
            capability: type_name::<H>(),
            handler: Arc::new(HandlerRef::new(handler)),
        }
    }
}

impl Step {
    pub(crate) fn kind(&self) -> StepKind {
        match self {
            Step::Decode(_) => StepKind::Decode,
            Step::Handle(_) => StepKind::Handle,
        }
    }

    pub(crate) fn capability(&self) -> &'static str {
        match self {
            Step::Decode(step) => step.capability,
            Step::Handle(step) => step.capability,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Decode(step) => f
                .debug_struct("DecodeStep")
                .field("input", &step.input.name())
                .field("output", &step.output.name())
                .field("capability", &step.capability)
                .finish(),
            Step::Handle(step) => f
                .debug_struct("HandleStep")
                .field("message", &step.message.name())
                .field("capability", &step.capability)
                .finish(),
        }
    }
}
