use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use ripple_db::Database;
use ripple_types::Message;

use crate::membership::{Member, Membership};

/// History window replayed to a freshly attached connection.
pub fn scrollback_window() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

/// Outbound frame for one connection. `Close` tells the writer half to shut
/// the transport down.
#[derive(Debug, Clone)]
pub enum Frame {
    Message(Message),
    Close,
}

/// Opaque outbound handle for one connection: an id plus the sending side of
/// its outbound queue. The connection's writer task drains the other end; a
/// failed send means that task is gone and the peer is effectively dead.
///
/// All frames are produced by the hub's dispatch loop (plus the one-time
/// history replay in the connection handler) — read loops never touch it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Frame>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(Frame::Message(message))
            .map_err(|_| anyhow!("connection writer is gone"))
    }

    /// Tolerant of an already-closed peer.
    fn close(&self) {
        let _ = self.tx.send(Frame::Close);
    }
}

struct RegisterRequest {
    handle: ConnectionHandle,
    channel: String,
    username: String,
    reply: oneshot::Sender<Vec<Message>>,
}

struct PublishRequest {
    channel: String,
    username: String,
    content: String,
}

struct Client {
    handle: ConnectionHandle,
    channel: String,
    username: String,
}

/// Handle to the hub's single dispatch loop.
///
/// Register, unregister, and publish feed three queues consumed by one
/// serialized task; that task is the only thing that mutates membership or
/// writes outbound frames, which makes fan-out race-free without per-channel
/// locks and gives a total order across all hub events.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::UnboundedSender<RegisterRequest>,
    unregister_tx: mpsc::UnboundedSender<Uuid>,
    publish_tx: mpsc::UnboundedSender<PublishRequest>,
}

impl Hub {
    /// Spawn the dispatch loop. The hub owns the store reference and the
    /// membership cache for its lifetime.
    pub fn spawn(db: Arc<Database>, membership: Membership) -> Self {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch_loop(
            db,
            membership,
            register_rx,
            unregister_rx,
            publish_rx,
        ));

        Self {
            register_tx,
            unregister_tx,
            publish_tx,
        }
    }

    /// Admit a connection to a channel. Resolves once the dispatch loop has
    /// joined membership, with the scrollback to replay. A history fetch
    /// failure is logged inside the loop and surfaces here as an empty
    /// replay — the join itself still stands.
    pub async fn register(
        &self,
        handle: ConnectionHandle,
        channel: &str,
        username: &str,
    ) -> Result<Vec<Message>> {
        let (reply, rx) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest {
                handle,
                channel: channel.to_string(),
                username: username.to_string(),
                reply,
            })
            .map_err(|_| anyhow!("hub dispatch loop is gone"))?;
        rx.await.map_err(|_| anyhow!("hub dropped the register reply"))
    }

    /// Detach a connection. Idempotent: unknown ids are a no-op.
    pub fn unregister(&self, conn_id: Uuid) {
        let _ = self.unregister_tx.send(conn_id);
    }

    /// Queue a message for persistence and fan-out. The arrival timestamp is
    /// assigned by the dispatch loop, so per-channel delivery order matches
    /// store insertion order.
    pub fn publish(&self, channel: &str, username: &str, content: &str) {
        let _ = self.publish_tx.send(PublishRequest {
            channel: channel.to_string(),
            username: username.to_string(),
            content: content.to_string(),
        });
    }
}

async fn dispatch_loop(
    db: Arc<Database>,
    membership: Membership,
    mut register_rx: mpsc::UnboundedReceiver<RegisterRequest>,
    mut unregister_rx: mpsc::UnboundedReceiver<Uuid>,
    mut publish_rx: mpsc::UnboundedReceiver<PublishRequest>,
) {
    let mut clients: HashMap<Uuid, Client> = HashMap::new();

    // select! picks between ready sources at random, so none of the three
    // can starve the others.
    loop {
        tokio::select! {
            Some(req) = register_rx.recv() => {
                handle_register(&db, &membership, &mut clients, req);
            }
            Some(conn_id) = unregister_rx.recv() => {
                handle_unregister(&membership, &mut clients, conn_id);
            }
            Some(req) = publish_rx.recv() => {
                handle_publish(&db, &membership, &mut clients, req);
            }
            else => break,
        }
    }
}

fn handle_register(
    db: &Database,
    membership: &Membership,
    clients: &mut HashMap<Uuid, Client>,
    req: RegisterRequest,
) {
    let conn_id = req.handle.id();
    membership.join(
        &req.channel,
        Member {
            username: req.username.clone(),
            conn_id,
        },
    );
    clients.insert(
        conn_id,
        Client {
            handle: req.handle,
            channel: req.channel.clone(),
            username: req.username.clone(),
        },
    );
    info!("{} joined channel {}", req.username, req.channel);

    let history = match db.recent_messages(&req.channel, scrollback_window()) {
        Ok(history) => history,
        Err(e) => {
            // The join stands; the newcomer just gets no scrollback.
            warn!("History fetch for channel {} failed: {:#}", req.channel, e);
            Vec::new()
        }
    };
    let _ = req.reply.send(history);
}

fn handle_unregister(
    membership: &Membership,
    clients: &mut HashMap<Uuid, Client>,
    conn_id: Uuid,
) {
    // Unknown id: already unregistered, nothing to do.
    let Some(client) = clients.remove(&conn_id) else {
        return;
    };

    client.handle.close();
    membership.leave(
        &client.channel,
        &Member {
            username: client.username.clone(),
            conn_id,
        },
    );
    info!("{} left channel {}", client.username, client.channel);
}

fn handle_publish(
    db: &Database,
    membership: &Membership,
    clients: &mut HashMap<Uuid, Client>,
    req: PublishRequest,
) {
    let message = Message {
        channel: req.channel,
        username: req.username,
        content: req.content,
        time: Utc::now(),
    };

    // Durability and delivery are decoupled: a failed insert is logged and
    // fan-out proceeds.
    if let Err(e) = db.insert_message(
        &message.channel,
        &message.username,
        &message.content,
        message.time,
    ) {
        warn!("Persisting message failed, delivering anyway: {:#}", e);
    }

    let mut dead = Vec::new();
    for member in membership.members(&message.channel) {
        let Some(client) = clients.get(&member.conn_id) else {
            continue;
        };
        if client.handle.send(message.clone()).is_err() {
            // Implicit disconnect; drop this member, keep delivering.
            warn!(
                "Write to {} failed, dropping connection {}",
                member.username, member.conn_id
            );
            dead.push(member.conn_id);
        }
    }

    for conn_id in dead {
        handle_unregister(membership, clients, conn_id);
    }
}
