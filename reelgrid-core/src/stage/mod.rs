//! The skeleton every stage worker runs: subscribe to the input
//! queues, decode each delivery, dispatch to the stage handler, then
//! ack. A handler error (including an injected failure) leaves the
//! delivery unacked so the broker redelivers it; an undecodable packet
//! is dropped and acked.

pub mod aggregate;
pub mod filter;
pub mod joiner;
pub mod router;
pub mod sentiment;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reelgrid_model::Packet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::error::Result;
use crate::failure::fail_with_probability;

/// One consumed queue, optionally bound to a fanout exchange first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: Option<String>,
}

impl QueueBinding {
    pub fn new(queue: impl Into<String>, exchange: Option<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange,
        }
    }

    /// Queue and exchange carry the same name, the common case for
    /// stage-to-stage edges.
    pub fn mirrored(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            exchange: Some(name.clone()),
            queue: name,
        }
    }

    pub fn from_spec(spec: &reelgrid_config::QueueSpec) -> Self {
        Self {
            queue: spec.queue.clone(),
            exchange: spec.exchange.clone(),
        }
    }
}

#[async_trait]
pub trait PacketHandler: Send {
    async fn handle(&mut self, queue: &str, packet: Packet) -> Result<()>;
}

/// Drive a stage until shutdown. Queues are multiplexed in one task, so
/// handlers see FIFO order per queue and at most one in-flight message.
pub async fn run_stage<H: PacketHandler>(
    bus: &Arc<dyn MessageBus>,
    inputs: &[QueueBinding],
    handler: &mut H,
    failure_probability: f64,
    shutdown: &CancellationToken,
) -> Result<()> {
    for input in inputs {
        bus.declare_queue(&input.queue).await?;
        if let Some(exchange) = &input.exchange {
            bus.declare_exchange(exchange).await?;
            bus.bind(&input.queue, exchange).await?;
        }
    }

    let mut streams = Vec::with_capacity(inputs.len());
    for input in inputs {
        let queue = input.queue.clone();
        let stream = bus.consume(&input.queue).await?;
        streams.push(stream.map(move |delivery| (queue.clone(), delivery)).boxed());
    }
    let mut merged = futures::stream::select_all(streams);

    loop {
        let (queue, delivery) = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = merged.next() => match next {
                Some(item) => item,
                None => break,
            },
        };

        let payload = delivery.payload;
        let acker = delivery.acker;
        let outcome = handle_payload(handler, &queue, &payload, failure_probability).await;
        match outcome {
            Ok(()) => acker.ack().await?,
            Err(e) => {
                warn!(queue = %queue, error = %e, "handler failed; message will be redelivered");
                acker.nack().await?;
            }
        }
    }
    Ok(())
}

async fn handle_payload<H: PacketHandler>(
    handler: &mut H,
    queue: &str,
    payload: &[u8],
    failure_probability: f64,
) -> Result<()> {
    fail_with_probability(failure_probability, "before handling packet")?;
    let packet = match Packet::decode(payload) {
        Ok(packet) => packet,
        Err(e) => {
            // Validation failure: drop the record, never crash the stage.
            warn!(queue = %queue, error = %e, "dropping undecodable packet");
            return Ok(());
        }
    };
    debug!(queue = %queue, kind = ?packet.kind(), client_id = %packet.client_id(), "packet received");
    handler.handle(queue, packet).await?;
    fail_with_probability(failure_probability, "after handling packet")?;
    Ok(())
}

pub(crate) async fn publish_packet(
    bus: &Arc<dyn MessageBus>,
    exchange: &str,
    packet: &Packet,
) -> Result<()> {
    bus.publish(exchange, packet.encode()?).await
}

pub(crate) async fn reenqueue_packet(
    bus: &Arc<dyn MessageBus>,
    queue: &str,
    packet: &Packet,
) -> Result<()> {
    bus.publish_to_queue(queue, packet.encode()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcBus;
    use reelgrid_model::{ClientId, Eof};

    struct Counter {
        handled: usize,
        fail_first: bool,
    }

    #[async_trait]
    impl PacketHandler for Counter {
        async fn handle(&mut self, _queue: &str, _packet: Packet) -> Result<()> {
            self.handled += 1;
            if self.fail_first && self.handled == 1 {
                return Err(crate::error::CoreError::Internal("boom".to_string()));
            }
            Ok(())
        }
    }

    async fn run_until_idle<H: PacketHandler>(
        bus: &Arc<dyn MessageBus>,
        inputs: &[QueueBinding],
        handler: &mut H,
    ) {
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            stop.cancel();
        });
        run_stage(bus, inputs, handler, 0.0, &shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn failed_handler_gets_the_message_again() {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
        let eof = Packet::from(Eof::new(ClientId::new()));
        bus.publish_to_queue("in", eof.encode().unwrap()).await.unwrap();

        let mut handler = Counter {
            handled: 0,
            fail_first: true,
        };
        run_until_idle(&bus, &[QueueBinding::new("in", None)], &mut handler).await;
        // First attempt fails and is redelivered; the retry succeeds.
        assert_eq!(handler.handled, 2);
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped() {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcBus::new());
        bus.publish_to_queue("in", vec![0xFF, 1, 2, 3]).await.unwrap();

        let mut handler = Counter {
            handled: 0,
            fail_first: false,
        };
        run_until_idle(&bus, &[QueueBinding::new("in", None)], &mut handler).await;
        assert_eq!(handler.handled, 0);
    }
}
