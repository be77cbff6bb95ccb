//! In-process [`MessageBus`] used by the test suites.
//!
//! Semantics match the broker contract where the stages can tell:
//! fanout exchanges, FIFO queues, nack returns the message to the
//! front of its queue, and a queue with several consumers hands
//! messages out round-robin. The rotation matters: the EOF ring
//! re-enqueues its token on the shared queue and relies on the broker
//! to hand it to the other shards.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::Notify;

use super::{Acker, Delivery, MessageBus};
use crate::error::Result;

#[derive(Default)]
struct Topology {
    queues: HashMap<String, Arc<InProcQueue>>,
    bindings: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct InProcQueue {
    messages: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
    consumers: AtomicU32,
    turn: AtomicU32,
}

impl InProcQueue {
    fn push_back(&self, payload: Vec<u8>) {
        self.messages.lock().expect("queue lock").push_back(payload);
        self.notify.notify_waiters();
    }

    fn push_front(&self, payload: Vec<u8>) {
        self.messages.lock().expect("queue lock").push_front(payload);
        self.notify.notify_waiters();
    }

    fn register_consumer(&self) -> u32 {
        self.consumers.fetch_add(1, Ordering::SeqCst)
    }

    fn my_turn(&self, index: u32) -> bool {
        let consumers = self.consumers.load(Ordering::SeqCst).max(1);
        self.turn.load(Ordering::SeqCst) % consumers == index
    }

    fn pop_and_advance(&self) -> Option<Vec<u8>> {
        let popped = self.messages.lock().expect("queue lock").pop_front();
        if popped.is_some() {
            self.turn.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
        popped
    }

    fn is_empty(&self) -> bool {
        self.messages.lock().expect("queue lock").is_empty()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[derive(Default)]
pub struct InProcBus {
    topology: Mutex<Topology>,
}

impl std::fmt::Debug for InProcBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topology = self.topology.lock().expect("topology lock");
        f.debug_struct("InProcBus")
            .field("queues", &topology.queues.len())
            .field("exchanges", &topology.bindings.len())
            .finish()
    }
}

impl InProcBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Arc<InProcQueue> {
        let mut topology = self.topology.lock().expect("topology lock");
        Arc::clone(topology.queues.entry(name.to_string()).or_default())
    }

    /// Number of messages sitting in a queue; test observability.
    pub fn queue_depth(&self, name: &str) -> usize {
        self.queue(name).messages.lock().expect("queue lock").len()
    }
}

#[async_trait]
impl MessageBus for InProcBus {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.queue(queue);
        Ok(())
    }

    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        let mut topology = self.topology.lock().expect("topology lock");
        topology.bindings.entry(exchange.to_string()).or_default();
        Ok(())
    }

    async fn bind(&self, queue: &str, exchange: &str) -> Result<()> {
        let mut topology = self.topology.lock().expect("topology lock");
        topology.queues.entry(queue.to_string()).or_default();
        let bound = topology.bindings.entry(exchange.to_string()).or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>> {
        let queue = self.queue(queue);
        let index = queue.register_consumer();
        let stream = futures::stream::unfold((queue, index), |(queue, index)| async move {
            loop {
                // A re-enqueue loop (the EOF ring, join deferral) never
                // hits a pending await on this bus; yield so sibling
                // stage tasks stay runnable on a single-threaded runtime.
                tokio::task::yield_now().await;
                if queue.my_turn(index) {
                    if let Some(payload) = queue.pop_and_advance() {
                        let acker = Box::new(InProcAcker {
                            queue: Arc::clone(&queue),
                            payload: payload.clone(),
                        }) as Box<dyn Acker>;
                        return Some((Delivery { payload, acker }, (queue, index)));
                    }
                }
                if queue.closed.load(Ordering::SeqCst) && queue.is_empty() {
                    return None;
                }
                // Nothing deliverable right now. Register interest, then
                // re-check so a concurrent push, turn advance or close
                // cannot slip between the check and the await.
                let notified = queue.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if (queue.my_turn(index) && !queue.is_empty())
                    || queue.closed.load(Ordering::SeqCst)
                {
                    continue;
                }
                notified.await;
            }
        })
        .boxed();
        Ok(stream)
    }

    async fn publish(&self, exchange: &str, payload: Vec<u8>) -> Result<()> {
        let queues: Vec<Arc<InProcQueue>> = {
            let topology = self.topology.lock().expect("topology lock");
            topology
                .bindings
                .get(exchange)
                .map(|bound| {
                    bound
                        .iter()
                        .filter_map(|q| topology.queues.get(q).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };
        for queue in queues {
            queue.push_back(payload.clone());
        }
        Ok(())
    }

    async fn publish_to_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        self.queue(queue).push_back(payload);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let topology = self.topology.lock().expect("topology lock");
        for queue in topology.queues.values() {
            queue.close();
        }
        Ok(())
    }
}

struct InProcAcker {
    queue: Arc<InProcQueue>,
    payload: Vec<u8>,
}

#[async_trait]
impl Acker for InProcAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        self.queue.push_front(self.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fanout_reaches_every_bound_queue() {
        let bus = InProcBus::new();
        bus.declare_exchange("movies").await.unwrap();
        bus.bind("q1", "movies").await.unwrap();
        bus.bind("q2", "movies").await.unwrap();
        bus.publish("movies", b"payload".to_vec()).await.unwrap();
        assert_eq!(bus.queue_depth("q1"), 1);
        assert_eq!(bus.queue_depth("q2"), 1);
    }

    #[tokio::test]
    async fn consume_sees_published_messages_in_order() {
        let bus = InProcBus::new();
        bus.declare_queue("q").await.unwrap();
        bus.publish_to_queue("q", b"one".to_vec()).await.unwrap();
        bus.publish_to_queue("q", b"two".to_vec()).await.unwrap();
        let mut stream = bus.consume("q").await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.payload, b"one");
        first.acker.ack().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(second.payload, b"two");
    }

    #[tokio::test]
    async fn nack_redelivers_at_the_front() {
        let bus = InProcBus::new();
        bus.publish_to_queue("q", b"one".to_vec()).await.unwrap();
        bus.publish_to_queue("q", b"two".to_vec()).await.unwrap();
        let mut stream = bus.consume("q").await.unwrap();
        let first = stream.next().await.unwrap();
        first.acker.nack().await.unwrap();
        let redelivered = stream.next().await.unwrap();
        assert_eq!(redelivered.payload, b"one");
    }

    #[tokio::test]
    async fn competing_consumers_rotate() {
        let bus = InProcBus::new();
        bus.declare_queue("q").await.unwrap();
        let mut first = bus.consume("q").await.unwrap();
        let mut second = bus.consume("q").await.unwrap();

        bus.publish_to_queue("q", b"a".to_vec()).await.unwrap();
        bus.publish_to_queue("q", b"b".to_vec()).await.unwrap();

        let to_first = first.next().await.unwrap();
        assert_eq!(to_first.payload, b"a");
        let to_second = second.next().await.unwrap();
        assert_eq!(to_second.payload, b"b");
    }

    #[tokio::test]
    async fn publish_to_unbound_exchange_is_dropped() {
        let bus = InProcBus::new();
        bus.declare_exchange("empty").await.unwrap();
        bus.publish("empty", b"gone".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn stop_ends_consumers() {
        let bus = InProcBus::new();
        bus.declare_queue("q").await.unwrap();
        let mut stream = bus.consume("q").await.unwrap();
        bus.stop().await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
