//! The event relay: a single task that owns the session registry and every
//! connection's outbound queue, and fans draw events out to session members.
//!
//! Connection handlers never touch the registry directly. They talk to the
//! relay through [`RelayHandle`], whose commands are processed one at a time,
//! so membership changes and broadcasts within a session are totally
//! ordered. Fan-out uses non-blocking sends; no command waits on a client.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sketchroom_shared::{ClientId, DrawEvent, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::RoutingError;
use crate::registry::{JoinOutcome, SessionRegistry};

pub const DEFAULT_COMMAND_CAPACITY: usize = 4096;

#[derive(Debug)]
enum Command {
    Register(Connection),
    Join {
        client_id: ClientId,
        session_id: String,
    },
    Leave {
        client_id: ClientId,
        session_id: String,
    },
    Publish(DrawEvent),
    Disconnect(ClientId),
    Members {
        session_id: String,
        reply: oneshot::Sender<BTreeSet<ClientId>>,
    },
    SessionCount(oneshot::Sender<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Relay state. Driven by [`spawn_relay`] in production; tests can call it
/// directly.
#[derive(Debug, Default)]
pub struct Relay {
    registry: SessionRegistry,
    connections: HashMap<ClientId, Connection>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn register(&mut self, connection: Connection) {
        self.connections.insert(connection.client_id(), connection);
    }

    pub fn join(&mut self, client_id: ClientId, session_id: &str) {
        match self.registry.join(session_id, client_id) {
            JoinOutcome::AlreadyMember => {}
            JoinOutcome::Joined => {
                self.announce(session_id, client_id, true);
            }
            JoinOutcome::Moved { previous } => {
                self.deliver(client_id, ServerMessage::Left {
                    session_id: previous.clone(),
                });
                self.announce(&previous, client_id, false);
                self.announce(session_id, client_id, true);
            }
        }
        let members = self.registry.members(session_id).into_iter().collect();
        self.deliver(client_id, ServerMessage::Joined {
            session_id: session_id.to_string(),
            members,
        });
        info!(
            session_id,
            client_id = %client_id,
            members = self.registry.members_ref(session_id).map_or(0, BTreeSet::len),
            "client joined"
        );
    }

    pub fn leave(&mut self, client_id: ClientId, session_id: &str) -> Result<(), RoutingError> {
        if self.registry.session_of(client_id) != Some(session_id) {
            return Err(RoutingError::NotAMember {
                client_id,
                session_id: session_id.to_string(),
            });
        }
        self.registry.leave(client_id);
        self.announce(session_id, client_id, false);
        self.deliver(client_id, ServerMessage::Left {
            session_id: session_id.to_string(),
        });
        info!(session_id, client_id = %client_id, "client left");
        Ok(())
    }

    /// Removes a closed connection from its session and stops all further
    /// deliveries to it.
    pub fn disconnect(&mut self, client_id: ClientId) {
        self.connections.remove(&client_id);
        if let Some(session_id) = self.registry.leave(client_id) {
            self.announce(&session_id, client_id, false);
            info!(session_id = %session_id, client_id = %client_id, "client disconnected");
        }
    }

    /// Delivers `event` to every member of its session except the origin.
    pub fn publish(&mut self, event: DrawEvent) -> Result<Delivery, RoutingError> {
        let members = self
            .registry
            .members_ref(&event.session_id)
            .ok_or_else(|| RoutingError::UnknownSession(event.session_id.clone()))?;
        if !members.contains(&event.origin_client_id) {
            return Err(RoutingError::NotAMember {
                client_id: event.origin_client_id,
                session_id: event.session_id,
            });
        }
        let mut delivery = Delivery::default();
        for member in members {
            if *member == event.origin_client_id {
                continue;
            }
            let Some(connection) = self.connections.get(member) else {
                delivery.dropped += 1;
                continue;
            };
            match connection.send(ServerMessage::Draw(event.clone())) {
                Ok(()) => delivery.delivered += 1,
                Err(error) => {
                    delivery.dropped += 1;
                    debug!(session_id = %event.session_id, %error, "dropped draw delivery");
                }
            }
        }
        Ok(delivery)
    }

    fn announce(&self, session_id: &str, subject: ClientId, joined: bool) {
        let Some(members) = self.registry.members_ref(session_id) else {
            return;
        };
        for member in members.iter().filter(|member| **member != subject) {
            let message = if joined {
                ServerMessage::PeerJoined {
                    session_id: session_id.to_string(),
                    client_id: subject,
                }
            } else {
                ServerMessage::PeerLeft {
                    session_id: session_id.to_string(),
                    client_id: subject,
                }
            };
            self.deliver(*member, message);
        }
    }

    fn deliver(&self, client_id: ClientId, message: ServerMessage) {
        let Some(connection) = self.connections.get(&client_id) else {
            return;
        };
        if let Err(error) = connection.send(message) {
            warn!(%error, "dropped control message");
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(connection) => self.register(connection),
            Command::Join {
                client_id,
                session_id,
            } => self.join(client_id, &session_id),
            Command::Leave {
                client_id,
                session_id,
            } => {
                if let Err(error) = self.leave(client_id, &session_id) {
                    debug!(%error, "ignored leave");
                }
            }
            Command::Publish(event) => {
                if let Err(error) = self.publish(event) {
                    debug!(%error, "dropped draw event");
                }
            }
            Command::Disconnect(client_id) => self.disconnect(client_id),
            Command::Members { session_id, reply } => {
                let _ = reply.send(self.registry.members(&session_id));
            }
            Command::SessionCount(reply) => {
                let _ = reply.send(self.registry.session_count());
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("relay task has stopped")]
pub struct RelayStopped;

/// Cloneable access to the relay task.
#[derive(Clone, Debug)]
pub struct RelayHandle {
    commands: mpsc::Sender<Command>,
    next_client_id: Arc<AtomicU64>,
}

pub fn spawn_relay(capacity: usize) -> RelayHandle {
    let (commands, mut receiver) = mpsc::channel::<Command>(capacity.max(1));
    tokio::spawn(async move {
        let mut relay = Relay::new();
        while let Some(command) = receiver.recv().await {
            relay.handle(command);
        }
        debug!("relay task finished");
    });
    RelayHandle {
        commands,
        next_client_id: Arc::new(AtomicU64::new(1)),
    }
}

impl RelayHandle {
    /// Allocates a fresh client id. Ids are never handed out twice.
    pub fn next_client_id(&self) -> ClientId {
        ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn register(&self, connection: Connection) -> Result<(), RelayStopped> {
        self.send(Command::Register(connection)).await
    }

    pub async fn join(&self, client_id: ClientId, session_id: String) -> Result<(), RelayStopped> {
        self.send(Command::Join {
            client_id,
            session_id,
        })
        .await
    }

    pub async fn leave(&self, client_id: ClientId, session_id: String) -> Result<(), RelayStopped> {
        self.send(Command::Leave {
            client_id,
            session_id,
        })
        .await
    }

    pub async fn publish(&self, event: DrawEvent) -> Result<(), RelayStopped> {
        self.send(Command::Publish(event)).await
    }

    pub async fn disconnect(&self, client_id: ClientId) -> Result<(), RelayStopped> {
        self.send(Command::Disconnect(client_id)).await
    }

    pub async fn members(&self, session_id: &str) -> Result<BTreeSet<ClientId>, RelayStopped> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Members {
            session_id: session_id.to_string(),
            reply,
        })
        .await?;
        response.await.map_err(|_| RelayStopped)
    }

    pub async fn session_count(&self) -> Result<usize, RelayStopped> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SessionCount(reply)).await?;
        response.await.map_err(|_| RelayStopped)
    }

    async fn send(&self, command: Command) -> Result<(), RelayStopped> {
        self.commands.send(command).await.map_err(|_| RelayStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchroom_shared::Tool;
    use tokio::sync::mpsc::Receiver;

    const A: ClientId = ClientId(1);
    const B: ClientId = ClientId(2);
    const C: ClientId = ClientId(3);

    fn event(origin: ClientId, session_id: &str, x: f64, y: f64, sequence_no: u64) -> DrawEvent {
        DrawEvent {
            origin_client_id: origin,
            session_id: session_id.into(),
            x,
            y,
            color: "#000000".into(),
            brush_size: 3.0,
            tool: Tool::Pen,
            sequence_no,
            stroke_start: sequence_no == 1,
        }
    }

    fn connect(relay: &mut Relay, client_id: ClientId) -> Receiver<ServerMessage> {
        let (connection, receiver) = Connection::open(client_id, 64);
        relay.register(connection);
        receiver
    }

    fn drain(receiver: &mut Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn draws(receiver: &mut Receiver<ServerMessage>) -> Vec<DrawEvent> {
        drain(receiver)
            .into_iter()
            .filter_map(|message| match message {
                ServerMessage::Draw(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn publish_reaches_others_but_not_origin() {
        let mut relay = Relay::new();
        let mut rx_a = connect(&mut relay, A);
        let mut rx_b = connect(&mut relay, B);
        relay.join(A, "room1");
        relay.join(B, "room1");

        let first = event(A, "room1", 10.0, 10.0, 1);
        let second = event(A, "room1", 20.0, 20.0, 2);
        relay.publish(first.clone()).unwrap();
        relay.publish(second.clone()).unwrap();

        assert_eq!(draws(&mut rx_b), vec![first, second]);
        assert!(draws(&mut rx_a).is_empty());

        let reply = event(B, "room1", 5.0, 5.0, 1);
        let delivery = relay.publish(reply.clone()).unwrap();
        assert_eq!(delivery, Delivery { delivered: 1, dropped: 0 });
        assert_eq!(draws(&mut rx_a), vec![reply]);
        assert!(draws(&mut rx_b).is_empty());
    }

    #[test]
    fn single_member_publish_is_noop() {
        let mut relay = Relay::new();
        let mut rx_a = connect(&mut relay, A);
        relay.join(A, "solo");
        drain(&mut rx_a);
        let delivery = relay.publish(event(A, "solo", 1.0, 1.0, 1)).unwrap();
        assert_eq!(delivery, Delivery::default());
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn publish_after_last_leave_is_dropped() {
        let mut relay = Relay::new();
        let _rx_a = connect(&mut relay, A);
        relay.join(A, "room1");
        relay.leave(A, "room1").unwrap();
        assert!(!relay.registry().contains_session("room1"));
        assert_eq!(
            relay.publish(event(A, "room1", 1.0, 1.0, 1)),
            Err(RoutingError::UnknownSession("room1".into()))
        );
    }

    #[test]
    fn publish_from_outside_the_session_is_dropped() {
        let mut relay = Relay::new();
        let mut rx_a = connect(&mut relay, A);
        let _rx_c = connect(&mut relay, C);
        relay.join(A, "room1");
        drain(&mut rx_a);
        assert!(matches!(
            relay.publish(event(C, "room1", 1.0, 1.0, 1)),
            Err(RoutingError::NotAMember { .. })
        ));
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let mut relay = Relay::new();
        let _rx_a = connect(&mut relay, A);
        let mut rx_b = connect(&mut relay, B);
        let mut rx_c = connect(&mut relay, C);
        relay.join(A, "room1");
        relay.join(B, "room1");
        relay.join(C, "room2");
        drain(&mut rx_c);
        relay.publish(event(A, "room1", 1.0, 1.0, 1)).unwrap();
        assert_eq!(draws(&mut rx_b).len(), 1);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn closed_recipient_does_not_abort_broadcast() {
        let mut relay = Relay::new();
        let _rx_a = connect(&mut relay, A);
        let rx_b = connect(&mut relay, B);
        let mut rx_c = connect(&mut relay, C);
        relay.join(A, "room1");
        relay.join(B, "room1");
        relay.join(C, "room1");
        drop(rx_b);
        let delivery = relay.publish(event(A, "room1", 1.0, 1.0, 1)).unwrap();
        assert_eq!(delivery, Delivery { delivered: 1, dropped: 1 });
        assert_eq!(draws(&mut rx_c).len(), 1);
    }

    #[test]
    fn membership_changes_are_announced() {
        let mut relay = Relay::new();
        let mut rx_a = connect(&mut relay, A);
        let mut rx_b = connect(&mut relay, B);
        relay.join(A, "room1");
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::Joined {
                session_id: "room1".into(),
                members: vec![A],
            }]
        );
        relay.join(B, "room1");
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::PeerJoined {
                session_id: "room1".into(),
                client_id: B,
            }]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::Joined {
                session_id: "room1".into(),
                members: vec![A, B],
            }]
        );
        relay.disconnect(B);
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::PeerLeft {
                session_id: "room1".into(),
                client_id: B,
            }]
        );
        assert_eq!(relay.registry().members("room1"), BTreeSet::from([A]));
    }

    #[test]
    fn joining_elsewhere_leaves_previous_session() {
        let mut relay = Relay::new();
        let mut rx_a = connect(&mut relay, A);
        let mut rx_b = connect(&mut relay, B);
        relay.join(A, "room1");
        relay.join(B, "room1");
        drain(&mut rx_a);
        drain(&mut rx_b);
        relay.join(A, "room2");
        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::Left {
                    session_id: "room1".into()
                },
                ServerMessage::Joined {
                    session_id: "room2".into(),
                    members: vec![A],
                },
            ]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::PeerLeft {
                session_id: "room1".into(),
                client_id: A,
            }]
        );
    }

    #[tokio::test]
    async fn handle_serializes_commands() {
        let relay = spawn_relay(16);
        let a = relay.next_client_id();
        let b = relay.next_client_id();
        assert_ne!(a, b);
        let (conn_a, _rx_a) = Connection::open(a, 16);
        let (conn_b, mut rx_b) = Connection::open(b, 16);
        relay.register(conn_a).await.unwrap();
        relay.register(conn_b).await.unwrap();
        relay.join(a, "room1".into()).await.unwrap();
        relay.join(b, "room1".into()).await.unwrap();
        for sequence_no in 1..=3 {
            relay
                .publish(event(a, "room1", sequence_no as f64, 0.0, sequence_no))
                .await
                .unwrap();
        }
        assert_eq!(relay.members("room1").await.unwrap(), BTreeSet::from([a, b]));

        let mut received = Vec::new();
        while received.len() < 3 {
            if let Some(ServerMessage::Draw(event)) = rx_b.recv().await {
                received.push(event.sequence_no);
            }
        }
        assert_eq!(received, vec![1, 2, 3]);

        relay.disconnect(a).await.unwrap();
        relay.disconnect(b).await.unwrap();
        assert_eq!(relay.session_count().await.unwrap(), 0);
    }
}
