//! Production [`MessageBus`] over an AMQP broker.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::warn;

use super::{Acker, Delivery, MessageBus};
use crate::error::Result;

const PREFETCH_COUNT: u16 = 1;

pub struct AmqpBus {
    connection: Connection,
    channel: Channel,
}

impl std::fmt::Debug for AmqpBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpBus")
            .field("status", &self.connection.status().state())
            .finish()
    }
}

impl AmqpBus {
    pub async fn connect(uri: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;
        Ok(Self {
            connection,
            channel,
        })
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }

    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn bind(&self, queue: &str, exchange: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("{queue}-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let stream = consumer
            .filter_map(|delivery| async {
                match delivery {
                    Ok(delivery) => Some(Delivery {
                        payload: delivery.data,
                        acker: Box::new(AmqpAcker {
                            acker: delivery.acker,
                        }) as Box<dyn Acker>,
                    }),
                    Err(e) => {
                        warn!(error = %e, "dropping failed delivery");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn publish(&self, exchange: &str, payload: Vec<u8>) -> Result<()> {
        self.declare_exchange(exchange).await?;
        self.channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish_to_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue: true,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}
