//! Layers wrapped around every turn: timeout, quota and per-session queueing.
//!
//! A request travels down the chain (`handle_request`) to the dispatcher and
//! every fragment on its way out passes back through `handle_respond` and
//! `on_respond`. Completion hooks run after the chain, outermost first.

mod concurrency;
mod ratelimit;
mod timeout;

use std::sync::Arc;

use {async_trait::async_trait, parley_common::types::RenderedFragment, tracing::debug};

use crate::{
    error::Result,
    responder::Responder,
    turn::{Turn, TurnOutcome},
};

pub use {concurrency::ConcurrencyLimiter, ratelimit::RateLimiter, timeout::TimeoutGuard};

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pre-process a turn, then either call `next` or short-circuit.
    async fn handle_request(
        &self,
        turn: &Turn,
        responder: &Responder<'_>,
        next: Next<'_>,
    ) -> Result<TurnOutcome>;

    /// Rewrite a business fragment before it is delivered.
    fn handle_respond(&self, _turn: &Turn, fragment: RenderedFragment) -> RenderedFragment {
        fragment
    }

    /// Observe a fragment after delivery.
    async fn on_respond(&self, _turn: &Turn, _fragment: &RenderedFragment) {}

    /// Runs once per turn after the chain returns. `outcome` is `None` on error.
    async fn handle_respond_completed(
        &self,
        _turn: &Turn,
        _outcome: Option<&TurnOutcome>,
        _responder: &Responder<'_>,
    ) {
    }
}

/// The innermost step of the chain.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle(&self, turn: &Turn, responder: &Responder<'_>) -> Result<TurnOutcome>;
}

/// The remainder of the chain below the current middleware.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn TurnHandler,
}

impl<'a> Next<'a> {
    #[must_use]
    pub fn new(rest: &'a [Arc<dyn Middleware>], endpoint: &'a dyn TurnHandler) -> Self {
        Self { rest, endpoint }
    }

    pub async fn run(self, turn: &Turn, responder: &Responder<'_>) -> Result<TurnOutcome> {
        match self.rest.split_first() {
            Some((layer, rest)) => {
                let next = Next {
                    rest,
                    endpoint: self.endpoint,
                };
                layer.handle_request(turn, responder, next).await
            },
            None => self.endpoint.handle(turn, responder).await,
        }
    }
}

/// Ordered middleware, outermost first.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new(layers: Vec<Arc<dyn Middleware>>) -> Self {
        Self { layers }
    }

    /// Timeout, then quota, then queueing.
    #[must_use]
    pub fn standard(
        timeout: TimeoutGuard,
        ratelimit: RateLimiter,
        concurrency: ConcurrencyLimiter,
    ) -> Self {
        Self::new(vec![
            Arc::new(timeout),
            Arc::new(ratelimit),
            Arc::new(concurrency),
        ])
    }

    #[must_use]
    pub fn layers(&self) -> &[Arc<dyn Middleware>] {
        &self.layers
    }

    /// Run `turn` through every layer into `endpoint`, then the completion hooks.
    pub async fn run(
        &self,
        turn: &Turn,
        responder: &Responder<'_>,
        endpoint: &dyn TurnHandler,
    ) -> Result<TurnOutcome> {
        let result = Next::new(&self.layers, endpoint).run(turn, responder).await;
        for layer in &self.layers {
            layer
                .handle_respond_completed(turn, result.as_ref().ok(), responder)
                .await;
        }
        debug!(turn_id = %turn.id, ok = result.is_ok(), "middleware chain finished");
        result
    }
}
