//! Render hooks: callbacks that mutate the document after the application is
//! stable and before it is serialized.
//!
//! Factories are invoked one after another in registration order. Their
//! pending operations are then awaited together and every one of them is
//! allowed to settle, even when a sibling has already failed.

use std::future::Future;

use futures_util::future::{join_all, LocalBoxFuture};
use futures_util::FutureExt;

use crate::error::{RenderError, Result};
use crate::platform::RenderContext;

/// What a hook factory hands back once its synchronous part has run.
pub enum HookAction {
    /// All work was applied synchronously.
    Done,
    /// Work still in flight; the render waits for it before serializing.
    Pending(LocalBoxFuture<'static, anyhow::Result<()>>),
}

impl std::fmt::Debug for HookAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookAction::Done => f.write_str("Done"),
            HookAction::Pending(_) => f.write_str("Pending"),
        }
    }
}

type HookFactory = Box<dyn FnOnce(&RenderContext) -> anyhow::Result<HookAction>>;

/// Ordered set of render hooks owned by a single render.
#[derive(Default)]
pub struct RenderHooks {
    factories: Vec<HookFactory>,
}

impl RenderHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory returning a [`HookAction`].
    pub fn with<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&RenderContext) -> anyhow::Result<HookAction> + 'static,
    {
        self.factories.push(Box::new(factory));
        self
    }

    /// Register a hook that finishes before returning.
    pub fn with_sync<F>(self, hook: F) -> Self
    where
        F: FnOnce(&RenderContext) -> anyhow::Result<()> + 'static,
    {
        self.with(move |ctx| hook(ctx).map(|()| HookAction::Done))
    }

    /// Register a hook whose work completes asynchronously.
    ///
    /// The closure runs synchronously at its turn; only the returned future is
    /// deferred.
    pub fn with_async<F, Fut>(self, hook: F) -> Self
    where
        F: FnOnce(&RenderContext) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.with(move |ctx| Ok(HookAction::Pending(hook(ctx).boxed_local())))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Append every hook of `other` after the hooks already registered.
    pub fn extend(&mut self, other: RenderHooks) {
        self.factories.extend(other.factories);
    }

    /// Invoke every factory, then wait for all pending operations to settle.
    ///
    /// A factory error stops the sequence at once. Otherwise the first failure
    /// in registration order becomes the result, after every failure has been
    /// reported.
    pub(crate) async fn run(self, ctx: &RenderContext) -> Result<()> {
        let mut pending = Vec::new();

        for (index, factory) in self.factories.into_iter().enumerate() {
            match factory(ctx) {
                Ok(HookAction::Done) => {}
                Ok(HookAction::Pending(operation)) => pending.push((index, operation)),
                Err(source) => {
                    tracing::warn!(hook = index, error = %source, "Render hook failed");
                    return Err(RenderError::Hook { index, source });
                }
            }
        }

        if pending.is_empty() {
            return Ok(());
        }

        tracing::debug!(pending = pending.len(), "Waiting for render hooks to settle");

        let settled = join_all(
            pending
                .into_iter()
                .map(|(index, operation)| operation.map(move |result| (index, result))),
        )
        .await;

        let mut first_failure = None;
        for (index, result) in settled {
            if let Err(source) = result {
                tracing::warn!(hook = index, error = %source, "Render hook failed");
                first_failure.get_or_insert(RenderError::Hook { index, source });
            }
        }

        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RenderHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHooks")
            .field("len", &self.factories.len())
            .finish()
    }
}
