//! Cross-shard IDENTIFY gate
//!
//! The remote allows `max_concurrency` IDENTIFY handshakes per window
//! (5 seconds) for the whole bot. Every shard takes a slot before sending
//! IDENTIFY. A slot is not returned when the handshake finishes; it comes
//! back on its own once the window has elapsed. Waiting is cancel-safe: a
//! shard dropped while queued never held a slot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug)]
pub struct IdentifyCoordinator {
    slots: Arc<Semaphore>,
    max_concurrency: u32,
    window: Duration,
}

impl IdentifyCoordinator {
    pub fn new(max_concurrency: u32, window: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrency as usize)),
            max_concurrency,
            window,
        }
    }

    pub fn new_shared(max_concurrency: u32, window: Duration) -> Arc<Self> {
        Arc::new(Self::new(max_concurrency, window))
    }

    /// Wait for an IDENTIFY slot
    ///
    /// The slot is released `window` after this returns.
    pub async fn acquire(&self, shard_id: u32) -> GatewayResult<()> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| GatewayError::Shutdown)?;
        permit.forget();

        tracing::debug!(shard_id, "Identify slot acquired");

        let slots = Arc::clone(&self.slots);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            slots.add_permits(1);
        });

        Ok(())
    }

    /// Wake every waiter with `GatewayError::Shutdown`
    pub fn close(&self) {
        self.slots.close();
    }

    #[inline]
    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency
    }

    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
