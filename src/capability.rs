// src/capability.rs
use async_trait::async_trait;

use crate::context::Context;

/// Decides whether a path should receive a raw message.
///
/// Filters are consulted in registration order, always against the
/// untransformed payload; the first accepting filter selects its path.
#[async_trait]
pub trait PathFilter: Send + Sync {
    type Raw: Send + Sync + 'static;

    async fn filter(&self, ctx: &Context, raw: &Self::Raw) -> anyhow::Result<bool>;
}

/// Transforms the current value of a path walk from `Input` to `Output`.
///
/// `can_decode` is the predicate, `decode` the action. `Ok(false)` and
/// `Ok(None)` are declines: the step is skipped and the current value is
/// left untouched. Only `Err` is a fault.
#[async_trait]
pub trait Decoder: Send + Sync {
    type Input: Send + Sync + 'static;
    type Output: Send + Sync + 'static;

    async fn can_decode(&self, ctx: &Context, input: &Self::Input) -> anyhow::Result<bool>;

    async fn decode(
        &self,
        ctx: &mut Context,
        input: &Self::Input,
    ) -> anyhow::Result<Option<Self::Output>>;
}

/// Consumes the current value of a path walk when its type matches.
///
/// `handle` returns the "handled" signal aggregated into the path result.
/// Every eligible, accepting handler in a chain runs; earlier results never
/// short-circuit later handlers.
#[async_trait]
pub trait Handler: Send + Sync {
    type Message: Send + Sync + 'static;

    async fn can_handle(&self, ctx: &Context, message: &Self::Message) -> anyhow::Result<bool>;

    async fn handle(&self, ctx: &mut Context, message: &Self::Message) -> anyhow::Result<bool>;
}
