use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Channel, Inbound, InboundMessage, PubSubError, Transport};

/// In-process broker fanning every message out to all connected transports
///
/// Publishers receive their own messages too, like transports that echo.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<InboundMessage>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a new transport and returns it with its inbound stream
    pub fn connect(&self) -> (MemoryTransport, Inbound) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);

        let transport = MemoryTransport {
            broker: self.clone(),
        };

        (transport, receiver)
    }

    fn deliver(&self, message: InboundMessage) {
        // subscribers whose receiver was dropped are forgotten
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(message.clone()).is_ok());
    }
}

/// Transport handle connected to a [`MemoryBroker`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), PubSubError> {
        self.broker.deliver(InboundMessage { channel, payload });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_includes_publisher() {
        let broker = MemoryBroker::new();
        let (publisher, mut own_inbound) = broker.connect();
        let (_other, mut other_inbound) = broker.connect();

        publisher
            .publish(Channel::Test, "hello".to_string())
            .await
            .unwrap();

        let expected = InboundMessage {
            channel: Channel::Test,
            payload: "hello".to_string(),
        };
        assert_eq!(own_inbound.recv().await, Some(expected.clone()));
        assert_eq!(other_inbound.recv().await, Some(expected));
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_forgotten() {
        let broker = MemoryBroker::new();
        let (publisher, _inbound) = broker.connect();
        let (_gone, gone_inbound) = broker.connect();
        drop(gone_inbound);

        publisher
            .publish(Channel::Blockchain, "[]".to_string())
            .await
            .unwrap();

        assert_eq!(broker.subscribers.lock().len(), 1);
    }
}
