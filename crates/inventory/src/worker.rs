//! Long-running subscription loop.

use std::time::Duration;

use domain::ProductStore;
use messaging::Broker;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConsumerConfig;
use crate::handler::StockConsumer;
use crate::{ConsumerError, Result};

/// Consumes order events until stopped, re-subscribing whenever the broker
/// connection is lost.
pub struct InventoryConsumer<B, P> {
    broker: B,
    handler: StockConsumer<P>,
    config: ConsumerConfig,
}

impl<B, P> InventoryConsumer<B, P>
where
    B: Broker + 'static,
    P: ProductStore + 'static,
{
    pub fn new(broker: B, products: P, config: ConsumerConfig) -> Self {
        let handler = StockConsumer::new(
            products,
            config.queue.clone(),
            config.dead_letter_queue.clone(),
            config.max_retries,
        );
        Self {
            broker,
            handler,
            config,
        }
    }

    /// Spawns the loop on the current runtime.
    pub fn start(self) -> ConsumerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(token).await });
        tracing::info!("inventory consumer started");
        ConsumerHandle { cancel, join }
    }

    async fn run(self, cancel: CancellationToken) {
        loop {
            match self.session(&cancel).await {
                Ok(()) => break,
                Err(e) => {
                    metrics::counter!("inventory_consumer_reconnects_total").increment(1);
                    tracing::warn!(
                        error = %e,
                        delay_ms = self.config.reconnect_delay.as_millis() as u64,
                        "consumer connection lost, reconnecting"
                    );
                    if sleep_or_cancel(self.config.reconnect_delay, &cancel).await {
                        break;
                    }
                }
            }
        }
        tracing::info!("inventory consumer stopped");
    }

    /// One connection's lifetime: declare, subscribe, process until the
    /// connection fails or `cancel` fires.
    async fn session(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let connection = self.broker.connect().await?;
        self.config.declare(connection.as_ref()).await?;
        let mut subscription = connection
            .consume(&self.config.queue, self.config.prefetch)
            .await?;
        tracing::info!(
            queue = %self.config.queue,
            prefetch = self.config.prefetch,
            "subscribed to order events"
        );

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = connection.close().await {
                        tracing::debug!(error = %e, "closing consumer connection failed");
                    }
                    return Ok(());
                }
                delivery = subscription.next() => delivery?,
            };

            self.handler
                .handle(connection.as_ref(), subscription.as_ref(), delivery)
                .await?;
        }
    }
}

/// Returns true if cancelled before `delay` elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Handle to a running [`InventoryConsumer`].
#[derive(Debug)]
pub struct ConsumerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Signals the loop to stop, closing its connection, and waits for it.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.join
            .await
            .map_err(|e| ConsumerError::Task(e.to_string()))
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
