//! The contract every stage consumes the broker through.
//!
//! Delivery is at-least-once: a delivery is acked only after the handler
//! returns, and a failed handler leaves it unacked so the broker hands
//! it to the next worker. Ordering is FIFO per (queue, consumer); across
//! shards there is none, which is why every stateful handler dedups by
//! message id.

pub mod amqp;
pub mod inproc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

pub use amqp::AmqpBus;
pub use inproc::InProcBus;

/// One message handed to a consumer, with its pending acknowledgement.
pub struct Delivery {
    pub payload: Vec<u8>,
    pub acker: Box<dyn Acker>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Return the message to the queue for redelivery.
    async fn nack(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Declares a fanout exchange; the only kind the pipeline uses.
    async fn declare_exchange(&self, exchange: &str) -> Result<()>;

    async fn bind(&self, queue: &str, exchange: &str) -> Result<()>;

    /// Consume with prefetch 1. The stream ends when the bus stops.
    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>>;

    async fn publish(&self, exchange: &str, payload: Vec<u8>) -> Result<()>;

    /// Publish straight to a queue, bypassing exchanges (re-enqueue).
    async fn publish_to_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    /// Cancel all consumers and close the connection. Safe to call from
    /// the shutdown path while consumers are mid-poll.
    async fn stop(&self) -> Result<()>;
}
