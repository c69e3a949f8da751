//! Listener trait and closure adapter

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::Event;

/// Receives events of the kinds it was registered for
///
/// Each invocation runs in its own task. Errors and panics are contained
/// and logged by the dispatcher.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()>;
}

/// Adapts an async closure into an `EventListener`
pub struct FnListener<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnListener<F, Fut>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> EventListener for FnListener<F, Fut>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        (self.f)(event).await
    }
}
