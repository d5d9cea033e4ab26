use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::types::{DispatchOutcome, Job};

/// Receives every due job. Each call gets its own snapshot of the job, so
/// nothing a handler does to it reaches engine state.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, job: Job) -> Result<(), HandlerError> {
        (self.0)(job).await
    }
}

/// Wrap an async closure as a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    /// Registration order.
    handlers: RwLock<Vec<(u64, Arc<dyn JobHandler>)>>,
}

/// Ordered set of due-job subscribers.
///
/// Cheap to clone; clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the dispatch order.
    pub fn subscribe(&self, handler: Arc<dyn JobHandler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        debug!(handler_id = id, "job handler subscribed");
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler once for `job`.
    ///
    /// Handlers start in registration order and run concurrently. A handler
    /// that returns an error or panics is recorded as failed and never stops
    /// the others. When several fail, the one registered last provides
    /// `last_error`, whatever order they finished in.
    pub async fn dispatch(&self, job: &Job) -> DispatchOutcome {
        // Snapshot so (un)subscribing during dispatch neither blocks nor
        // changes this round.
        let handlers: Vec<(u64, Arc<dyn JobHandler>)> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let runs: Vec<BoxFuture<'static, Result<(), String>>> = handlers
            .iter()
            .map(|(_, handler)| {
                let handler = Arc::clone(handler);
                let snapshot = job.clone();
                AssertUnwindSafe(async move { handler.handle(snapshot).await })
                    .catch_unwind()
                    .map(|res| match res {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.message),
                        Err(panic) => Err(panic_message(panic.as_ref())),
                    })
                    .boxed()
            })
            .collect();
        let results = join_all(runs).await;

        let mut outcome = DispatchOutcome::default();
        for ((handler_id, _), result) in handlers.iter().zip(results) {
            if let Err(message) = result {
                warn!(job_id = %job.id, handler_id, error = %message, "job handler failed");
                outcome.any_failed = true;
                outcome.last_error = Some(message);
            }
        }
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Handle returned by [`HandlerRegistry::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    /// Remove exactly this handler. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut handlers = inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != self.id);
        if handlers.len() < before {
            debug!(handler_id = self.id, "job handler unsubscribed");
        }
    }
}
