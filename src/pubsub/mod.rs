// Publish/subscribe module
//
// Chain and transaction updates travel between nodes as JSON envelopes
// tagged with the session id of the publishing node. Transports only move
// strings; everything about envelopes lives here.

pub mod gossip;
#[cfg(test)]
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::blockchain::Block;
use crate::wallet::Transaction;

/// Errors that can occur while publishing
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Transport closed")]
    Closed,

    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Logical channels shared by every node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Diagnostic channel, messages are only logged
    Test,
    Blockchain,
    Transaction,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Test, Channel::Blockchain, Channel::Transaction];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Test => "TEST",
            Channel::Blockchain => "BLOCKCHAIN",
            Channel::Transaction => "TRANSACTION",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.name() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire format of every message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub sender_id: String,
    pub data: T,
}

/// A raw message as delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: Channel,
    pub payload: String,
}

/// Receiving end handed out by a transport when it is created
pub type Inbound = mpsc::UnboundedReceiver<InboundMessage>;

/// A decoded update from another node
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    Chain(Vec<Block>),
    Transaction(Transaction),
}

/// Publishing side of a pub/sub transport
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), PubSubError>;
}

/// Node-facing pub/sub handle
///
/// Stamps outgoing envelopes with this node's session id and drops
/// incoming envelopes that carry it.
#[derive(Clone)]
pub struct PubSub {
    session_id: String,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for PubSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSub")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl PubSub {
    /// Wraps a transport with a fresh session id
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        PubSub {
            session_id: Uuid::new_v4().to_string(),
            transport,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Publishes `data` on `channel` inside an envelope
    pub async fn publish<T>(&self, channel: Channel, data: &T) -> Result<(), PubSubError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let envelope = Envelope {
            sender_id: self.session_id.clone(),
            data,
        };
        let payload = serde_json::to_string(&envelope)?;

        self.transport.publish(channel, payload).await
    }

    pub async fn broadcast_chain(&self, chain: &[Block]) -> Result<(), PubSubError> {
        self.publish(Channel::Blockchain, chain).await
    }

    pub async fn broadcast_transaction(&self, transaction: &Transaction) -> Result<(), PubSubError> {
        self.publish(Channel::Transaction, transaction).await
    }

    /// Turns an inbound message into an update worth handling
    ///
    /// Returns None for messages published by this node, diagnostic
    /// messages, and payloads that do not parse.
    pub fn decode(&self, message: &InboundMessage) -> Option<SyncMessage> {
        let envelope: Envelope<Value> = match serde_json::from_str(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Dropping malformed message on {}: {}", message.channel, err);
                return None;
            }
        };

        if envelope.sender_id == self.session_id {
            debug!("Ignoring own message on {}", message.channel);
            return None;
        }

        let decoded = match message.channel {
            Channel::Test => {
                info!("Message received. Channel: {}. Message: {}", message.channel, envelope.data);
                return None;
            }
            Channel::Blockchain => serde_json::from_value(envelope.data).map(SyncMessage::Chain),
            Channel::Transaction => {
                serde_json::from_value(envelope.data).map(SyncMessage::Transaction)
            }
        };

        match decoded {
            Ok(update) => Some(update),
            Err(err) => {
                warn!("Dropping undecodable {} update from {}: {}", message.channel, envelope.sender_id, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBroker;
    use super::*;
    use crate::wallet::{Address, Wallet};

    #[test]
    fn test_channel_names() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_name(channel.name()), Some(channel));
        }
        assert_eq!(Channel::from_name("UNKNOWN"), None);
    }

    #[tokio::test]
    async fn test_envelope_carries_session_id() {
        let broker = MemoryBroker::new();
        let (transport, mut inbound) = broker.connect();
        let pubsub = PubSub::new(Arc::new(transport));

        pubsub.broadcast_chain(&[Block::genesis()]).await.unwrap();

        let message = inbound.recv().await.unwrap();
        assert_eq!(message.channel, Channel::Blockchain);

        let envelope: Envelope<Vec<Block>> = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(envelope.sender_id, pubsub.session_id());
        assert_eq!(envelope.data, vec![Block::genesis()]);
    }

    #[tokio::test]
    async fn test_decode_ignores_own_messages() {
        let broker = MemoryBroker::new();
        let (transport, mut inbound) = broker.connect();
        let pubsub = PubSub::new(Arc::new(transport));

        pubsub.broadcast_chain(&[Block::genesis()]).await.unwrap();
        let echoed = inbound.recv().await.unwrap();

        assert_eq!(pubsub.decode(&echoed), None);
    }

    #[tokio::test]
    async fn test_decode_peer_messages() {
        let broker = MemoryBroker::new();
        let (transport_a, _inbound_a) = broker.connect();
        let (transport_b, mut inbound_b) = broker.connect();
        let node_a = PubSub::new(Arc::new(transport_a));
        let node_b = PubSub::new(Arc::new(transport_b));

        let transaction = Wallet::new()
            .create_transaction(Address("foo".to_string()), 10, None)
            .unwrap();
        node_a.broadcast_transaction(&transaction).await.unwrap();
        node_a.broadcast_chain(&[Block::genesis()]).await.unwrap();

        let first = inbound_b.recv().await.unwrap();
        assert_eq!(node_b.decode(&first), Some(SyncMessage::Transaction(transaction)));

        let second = inbound_b.recv().await.unwrap();
        assert_eq!(node_b.decode(&second), Some(SyncMessage::Chain(vec![Block::genesis()])));
    }

    #[test]
    fn test_decode_drops_bad_payloads() {
        let broker = MemoryBroker::new();
        let (transport, _inbound) = broker.connect();
        let pubsub = PubSub::new(Arc::new(transport));

        let garbage = InboundMessage {
            channel: Channel::Blockchain,
            payload: "not json".to_string(),
        };
        assert_eq!(pubsub.decode(&garbage), None);

        let wrong_shape = InboundMessage {
            channel: Channel::Transaction,
            payload: r#"{"senderId":"someone-else","data":"not a transaction"}"#.to_string(),
        };
        assert_eq!(pubsub.decode(&wrong_shape), None);

        let diagnostic = InboundMessage {
            channel: Channel::Test,
            payload: r#"{"senderId":"someone-else","data":"hello"}"#.to_string(),
        };
        assert_eq!(pubsub.decode(&diagnostic), None);
    }
}
