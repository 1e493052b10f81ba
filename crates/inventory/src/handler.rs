//! Per-message processing for the inventory consumer.
//!
//! Each delivery ends in exactly one acknowledgement:
//! - not an `ORDER_CREATED` event, or unparseable: acked and dropped
//! - product missing or stock too low: acked, stock unchanged
//! - stock decremented: acked
//! - store fault: a copy with `retry_count + 1` goes to the back of the queue,
//!   or to the dead-letter queue once `max_retries` is reached, then the
//!   original is acked

use common::{OrderId, ProductId};
use domain::{DecodedEvent, OrderEvent, ProductStore, StockDecrement, StoreError};
use messaging::{
    Connection, DEATH_REASON_HEADER, Delivery, Message, ORIGINAL_QUEUE_HEADER, Subscription,
};

use crate::Result;

/// Header carrying the last processing error on a dead-lettered message.
pub const LAST_ERROR_HEADER: &str = "x-last-error";

/// Why a message was acknowledged without changing stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The body could not be parsed.
    Malformed(String),
    /// An event type this consumer does not handle.
    OtherEvent(String),
    ProductNotFound(ProductId),
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },
}

/// What processing did to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Applied {
        order_id: OrderId,
        product_id: ProductId,
        remaining: u32,
    },
    Skipped(SkipReason),
}

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Applied {
        order_id: OrderId,
        product_id: ProductId,
        remaining: u32,
    },
    Skipped(SkipReason),
    /// Sent back to the queue carrying this retry count.
    Retried { retry_count: u32 },
    /// Sent to the dead-letter queue carrying this retry count.
    DeadLettered { retry_count: u32 },
}

impl Disposition {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Applied { .. } => "applied",
            Disposition::Skipped(_) => "skipped",
            Disposition::Retried { .. } => "retried",
            Disposition::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Applies `ORDER_CREATED` events to product stock.
#[derive(Debug, Clone)]
pub struct StockConsumer<P> {
    products: P,
    queue: String,
    dead_letter_queue: String,
    max_retries: u32,
}

impl<P: ProductStore> StockConsumer<P> {
    pub fn new(
        products: P,
        queue: impl Into<String>,
        dead_letter_queue: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            products,
            queue: queue.into(),
            dead_letter_queue: dead_letter_queue.into(),
            max_retries,
        }
    }

    pub fn products(&self) -> &P {
        &self.products
    }

    /// Applies a message body to stock.
    ///
    /// Business no-ops come back as [`Effect::Skipped`]; only store faults
    /// are errors.
    pub async fn process(&self, message: &Message) -> std::result::Result<Effect, StoreError> {
        let event = match OrderEvent::decode(&message.body) {
            Ok(DecodedEvent::OrderCreated(event)) => event,
            Ok(DecodedEvent::Other(event_type)) => {
                tracing::debug!(%event_type, "ignoring event");
                return Ok(Effect::Skipped(SkipReason::OtherEvent(event_type)));
            }
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "discarding malformed message");
                return Ok(Effect::Skipped(SkipReason::Malformed(e.to_string())));
            }
        };

        match self
            .products
            .try_decrement(event.product_id, event.quantity)
            .await?
        {
            StockDecrement::Applied { remaining } => {
                tracing::info!(
                    order_id = %event.order_id,
                    product_id = %event.product_id,
                    quantity = event.quantity,
                    remaining,
                    "stock decremented"
                );
                Ok(Effect::Applied {
                    order_id: event.order_id,
                    product_id: event.product_id,
                    remaining,
                })
            }
            StockDecrement::Insufficient {
                available,
                requested,
            } => {
                tracing::warn!(
                    order_id = %event.order_id,
                    product_id = %event.product_id,
                    available,
                    requested,
                    "insufficient stock, order event dropped"
                );
                Ok(Effect::Skipped(SkipReason::InsufficientStock {
                    product_id: event.product_id,
                    available,
                    requested,
                }))
            }
            StockDecrement::NotFound => {
                tracing::warn!(
                    order_id = %event.order_id,
                    product_id = %event.product_id,
                    "product not found, order event dropped"
                );
                Ok(Effect::Skipped(SkipReason::ProductNotFound(event.product_id)))
            }
        }
    }

    /// Processes and settles one delivery.
    ///
    /// Errors only when the broker cannot take the retry copy or the ack,
    /// which means the connection is gone.
    #[tracing::instrument(
        skip(self, connection, subscription, delivery),
        fields(message_id = %delivery.message.id, retry_count = delivery.message.attempt.retry_count)
    )]
    pub async fn handle(
        &self,
        connection: &dyn Connection,
        subscription: &dyn Subscription,
        delivery: Delivery,
    ) -> Result<Disposition> {
        let disposition = match self.process(&delivery.message).await {
            Ok(Effect::Applied {
                order_id,
                product_id,
                remaining,
            }) => Disposition::Applied {
                order_id,
                product_id,
                remaining,
            },
            Ok(Effect::Skipped(reason)) => Disposition::Skipped(reason),
            Err(fault) => self.settle_fault(connection, &delivery.message, &fault).await?,
        };

        subscription.ack(delivery.tag).await?;
        metrics::counter!("inventory_messages_total", "outcome" => disposition.label()).increment(1);
        Ok(disposition)
    }

    async fn settle_fault(
        &self,
        connection: &dyn Connection,
        message: &Message,
        fault: &StoreError,
    ) -> Result<Disposition> {
        let retry_count = message.attempt.retry_count;

        if retry_count < self.max_retries {
            let retry = message.redelivery();
            let next = retry.attempt.retry_count;
            connection.send(&self.queue, retry).await?;
            tracing::warn!(
                error = %fault,
                retry_count = next,
                max_retries = self.max_retries,
                "processing failed, message requeued"
            );
            return Ok(Disposition::Retried { retry_count: next });
        }

        let dead = message
            .clone()
            .with_header(ORIGINAL_QUEUE_HEADER, self.queue.as_str())
            .with_header(DEATH_REASON_HEADER, "max_retries")
            .with_header(LAST_ERROR_HEADER, fault.to_string());
        connection.send(&self.dead_letter_queue, dead).await?;
        tracing::error!(
            error = %fault,
            retry_count,
            dead_letter_queue = %self.dead_letter_queue,
            "retries exhausted, message dead-lettered"
        );
        Ok(Disposition::DeadLettered { retry_count })
    }
}
