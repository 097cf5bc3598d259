use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub, mdns, noise, swarm::NetworkBehaviour, swarm::SwarmEvent, tcp, yamux, Multiaddr,
    Swarm,
};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use super::{Channel, Inbound, InboundMessage, PubSubError, Transport};

/// Prefix of the gossipsub topic every channel maps to
const TOPIC_PREFIX: &str = "proof-ledger";

/// A payload to publish and where to report the outcome
type PublishCommand = (Channel, Vec<u8>, oneshot::Sender<Result<(), PubSubError>>);

#[derive(NetworkBehaviour)]
struct LedgerBehaviour {
    gossipsub: gossipsub::Behaviour,
    mdns: mdns::tokio::Behaviour,
}

fn topic(channel: Channel) -> gossipsub::IdentTopic {
    gossipsub::IdentTopic::new(format!("{}/{}", TOPIC_PREFIX, channel.name()))
}

fn channel_of(topic: &gossipsub::TopicHash) -> Option<Channel> {
    Channel::ALL
        .into_iter()
        .find(|channel| self::topic(*channel).hash() == *topic)
}

/// Gossipsub transport running its swarm on a background task
///
/// Peers on the local network are found through mDNS; additional peers can
/// be dialled explicitly.
#[derive(Debug, Clone)]
pub struct GossipTransport {
    commands: mpsc::UnboundedSender<PublishCommand>,
}

impl GossipTransport {
    /// Builds the swarm, subscribes to every channel and starts the event loop
    ///
    /// # Arguments
    ///
    /// * `port` - TCP port to listen on, 0 lets the OS pick
    /// * `peers` - Multiaddrs to dial at startup
    ///
    /// # Returns
    ///
    /// The transport and the stream of messages received from peers
    pub fn spawn(port: u16, peers: &[String]) -> anyhow::Result<(Self, Inbound)> {
        let mut swarm = build_swarm()?;

        for channel in Channel::ALL {
            swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&topic(channel))
                .map_err(|e| anyhow::anyhow!("Failed to subscribe to {}: {:?}", channel, e))?;
        }

        swarm.listen_on(format!("/ip4/0.0.0.0/tcp/{}", port).parse()?)?;

        for peer in peers {
            match peer.parse::<Multiaddr>() {
                Ok(address) => {
                    if let Err(err) = swarm.dial(address) {
                        warn!("Failed to dial {}: {}", peer, err);
                    }
                }
                Err(err) => warn!("Ignoring invalid peer address {}: {}", peer, err),
            }
        }

        info!("Gossip transport started with peer id {}", swarm.local_peer_id());

        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();

        tokio::spawn(run(swarm, command_receiver, inbound_sender));

        Ok((
            GossipTransport {
                commands: command_sender,
            },
            inbound_receiver,
        ))
    }
}

#[async_trait]
impl Transport for GossipTransport {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), PubSubError> {
        let (result_sender, result) = oneshot::channel();

        self.commands
            .send((channel, payload.into_bytes(), result_sender))
            .map_err(|_| PubSubError::Closed)?;

        result.await.map_err(|_| PubSubError::Closed)?
    }
}

fn build_swarm() -> anyhow::Result<Swarm<LedgerBehaviour>> {
    let swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| anyhow::anyhow!("Failed to build tcp transport: {:?}", e))?
        .with_behaviour(|key| {
            // identical payloads are the same message
            let message_id_fn = |message: &gossipsub::Message| {
                let mut hasher = DefaultHasher::new();
                message.data.hash(&mut hasher);
                gossipsub::MessageId::from(hasher.finish().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(10))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .message_id_fn(message_id_fn)
                .max_transmit_size(16 * 1024 * 1024)
                .build()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))?;

            let gossipsub = gossipsub::Behaviour::new(
                gossipsub::MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))?;

            let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), key.public().to_peer_id())?;

            Ok(LedgerBehaviour { gossipsub, mdns })
        })
        .map_err(|e| anyhow::anyhow!("Failed to build behaviour: {:?}", e))?
        .with_swarm_config(|config| config.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    Ok(swarm)
}

async fn run(
    mut swarm: Swarm<LedgerBehaviour>,
    mut commands: mpsc::UnboundedReceiver<PublishCommand>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some((channel, data, result)) = command else {
                    info!("Gossip transport dropped, stopping swarm");
                    return;
                };

                let outcome = swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(topic(channel), data)
                    .map(|_| ())
                    .map_err(|err| publish_error(channel, &err));

                // the publisher may have stopped waiting
                let _ = result.send(outcome);
            }
            event = swarm.select_next_some() => match event {
                SwarmEvent::Behaviour(LedgerBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                    propagation_source,
                    message,
                    ..
                })) => {
                    let Some(channel) = channel_of(&message.topic) else {
                        debug!("Message on unknown topic {}", message.topic);
                        continue;
                    };

                    match String::from_utf8(message.data) {
                        Ok(payload) => {
                            debug!("Received {} message from {}", channel, propagation_source);
                            if inbound.send(InboundMessage { channel, payload }).is_err() {
                                error!("Inbound receiver dropped, stopping swarm");
                                return;
                            }
                        }
                        Err(err) => warn!("Dropping non UTF-8 message from {}: {}", propagation_source, err),
                    }
                }
                SwarmEvent::Behaviour(LedgerBehaviourEvent::Mdns(mdns::Event::Discovered(list))) => {
                    for (peer_id, address) in list {
                        info!("Discovered peer {} at {}", peer_id, address);
                        swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    }
                }
                SwarmEvent::Behaviour(LedgerBehaviourEvent::Mdns(mdns::Event::Expired(list))) => {
                    for (peer_id, _) in list {
                        debug!("Peer {} expired", peer_id);
                        swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                    }
                }
                SwarmEvent::NewListenAddr { address, .. } => {
                    info!("Gossip transport listening on {}", address);
                }
                SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                    info!("Connected to {}", peer_id);
                    swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                }
                _ => {}
            }
        }
    }
}

fn publish_error(channel: Channel, err: &gossipsub::PublishError) -> PubSubError {
    match err {
        gossipsub::PublishError::InsufficientPeers => {
            PubSubError::PublishFailed(format!("no peers subscribed to {}", channel))
        }
        other => PubSubError::PublishFailed(format!("{} on {:?}", channel, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_map_back_to_channels() {
        for channel in Channel::ALL {
            assert_eq!(channel_of(&topic(channel).hash()), Some(channel));
        }

        let unknown = gossipsub::IdentTopic::new("other/BLOCKCHAIN");
        assert_eq!(channel_of(&unknown.hash()), None);
    }

    #[test]
    fn test_publish_errors_name_the_channel() {
        let err = publish_error(Channel::Blockchain, &gossipsub::PublishError::InsufficientPeers);
        assert!(matches!(&err, PubSubError::PublishFailed(message) if message.contains("BLOCKCHAIN")));
    }

    #[tokio::test]
    async fn test_publish_reports_swarm_outcome() {
        let (commands, mut receiver) = mpsc::unbounded_channel();
        let transport = GossipTransport { commands };

        let swarm = tokio::spawn(async move {
            let (channel, _data, result) = receiver.recv().await.unwrap();
            result
                .send(Err(publish_error(
                    channel,
                    &gossipsub::PublishError::InsufficientPeers,
                )))
                .unwrap();
        });

        let outcome = transport.publish(Channel::Transaction, "{}".to_string()).await;
        assert!(matches!(outcome, Err(PubSubError::PublishFailed(_))));
        swarm.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_after_swarm_stopped() {
        let (commands, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let transport = GossipTransport { commands };

        let outcome = transport.publish(Channel::Test, "{}".to_string()).await;
        assert!(matches!(outcome, Err(PubSubError::Closed)));
    }
}
