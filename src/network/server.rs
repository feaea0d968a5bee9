//! Manager Server
//!
//! Accepts wrapper sessions, answers bootstrap requests and fans list
//! announcements out to every attached wrapper.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use super::{is_disconnect, read_message, write_message, Connection, ConnectionHandler, ConnectionId};
use crate::cluster::{self, WrapperRecord};
use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::sync::{Announcement, BootstrapChannel, InboundSyncHandler};

/// Outbound channels of all attached sessions
#[derive(Default)]
pub struct SessionHub {
    sessions: DashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session, returning the receiver its writer drains
    pub fn attach(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(id, tx);
        rx
    }

    pub fn detach(&self, id: ConnectionId) {
        self.sessions.remove(&id);
    }

    /// Queue a message for one session
    pub fn send_to(&self, id: ConnectionId, message: Message) -> Result<()> {
        let sender = self
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::ChannelClosed)?;
        sender.send(message).map_err(|_| Error::ChannelClosed)
    }

    /// Queue a message for every session, returning how many received it
    pub fn broadcast(&self, message: &Message) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.sessions.iter() {
            if entry.value().send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.sessions.remove(&id);
        }
        delivered
    }

    /// Drop every session's channel, which closes the sessions
    pub fn disconnect_all(&self) {
        self.sessions.clear();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl BootstrapChannel for SessionHub {
    fn request_all_cached_objects(&self, _list_name: &str) -> Result<()> {
        Err(Error::Unsupported("the manager holds the authoritative lists"))
    }

    fn announce(&self, announcement: Announcement) -> Result<()> {
        let message = Message::ListUpdate {
            list_name: announcement.list_name,
            kind: announcement.kind,
            object: announcement.object,
        };
        let delivered = self.broadcast(&message);
        tracing::trace!("Announcement queued for {} sessions", delivered);
        Ok(())
    }
}

/// Default lifecycle handler of the manager: wrapper sessions are never
/// reconnected from this side, so their events are only logged
pub struct SessionLogger;

impl ConnectionHandler for SessionLogger {
    fn on_connection_active(&self, connection: &Connection) {
        tracing::info!("Wrapper session {} from {} established", connection.id(), connection.peer_address());
    }

    fn on_connection_inactive(&self, connection: &Connection) {
        tracing::info!("Wrapper session {} from {} closed", connection.id(), connection.peer_address());
    }

    fn on_failure(&self, connection: &Connection, error: &Error) {
        tracing::error!(
            "Wrapper session {} from {} failed: {}",
            connection.id(),
            connection.peer_address(),
            error
        );
    }
}

/// State shared by all session tasks
#[derive(Clone)]
struct SessionContext {
    manager_id: String,
    hub: Arc<SessionHub>,
    inbound: Arc<InboundSyncHandler>,
    handler: Arc<dyn ConnectionHandler>,
}

/// Manager-side listener for wrapper sessions
pub struct ManagerServer {
    /// Bind address
    bind_address: String,
    /// Shared session state
    context: SessionContext,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl ManagerServer {
    /// Create a new server
    pub fn new(
        manager_id: String,
        bind_address: String,
        hub: Arc<SessionHub>,
        inbound: Arc<InboundSyncHandler>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            bind_address,
            context: SessionContext {
                manager_id,
                hub,
                inbound,
                handler: Arc::new(SessionLogger),
            },
            shutdown: shutdown_tx,
        }
    }

    /// Replace the lifecycle handler (a [`SessionLogger`] by default)
    pub fn set_handler(&mut self, handler: Arc<dyn ConnectionHandler>) {
        self.context.handler = handler;
    }

    /// Bind the listener
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        tracing::info!("Manager listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until stopped
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept sessions on an already bound listener until stopped
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            if let Err(e) = socket.set_nodelay(true) {
                                tracing::debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                            }
                            let context = self.context.clone();
                            tokio::spawn(run_session(context, socket, addr.to_string()));
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Manager server stopped");
        Ok(())
    }

    /// Stop accepting sessions
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle one wrapper session from accept to close
async fn run_session(context: SessionContext, socket: TcpStream, peer_addr: String) {
    let connection = Connection::new(peer_addr);
    let outbound = context.hub.attach(connection.id());

    context.handler.on_connection_active(&connection);

    let mut wrapper_id = None;
    let (reader, writer) = socket.into_split();
    let result = tokio::select! {
        result = session_writer(outbound, writer) => result,
        result = session_reader(&context, &connection, reader, &mut wrapper_id) => result,
    };

    context.hub.detach(connection.id());
    if let Some(node_id) = wrapper_id {
        cluster::wrapper_disconnected(
            context.inbound.registry(),
            &node_id,
            &connection.id().to_string(),
        );
    }

    if let Err(ref e) = result {
        connection.mark_failed();
        context.handler.on_failure(&connection, e);
    }

    connection.mark_inactive();
    context.handler.on_connection_inactive(&connection);
}

async fn session_writer(mut outbound: mpsc::UnboundedReceiver<Message>, mut writer: OwnedWriteHalf) -> Result<()> {
    while let Some(message) = outbound.recv().await {
        write_message(&mut writer, &message).await?;
    }
    // hub dropped the session
    Ok(())
}

async fn session_reader(
    context: &SessionContext,
    connection: &Connection,
    mut reader: OwnedReadHalf,
    wrapper_id: &mut Option<String>,
) -> Result<()> {
    let peer = connection.peer_address();

    loop {
        let message = match read_message(&mut reader).await {
            Ok(message) => message,
            Err(e) if is_disconnect(&e) => return Ok(()),
            Err(e) => return Err(e),
        };
        tracing::trace!("Received {} from {}", message.type_name(), peer);

        match message {
            Message::Hello { node_id } => {
                cluster::wrapper_connected(
                    context.inbound.registry(),
                    WrapperRecord {
                        node_id: node_id.clone(),
                        address: peer.to_string(),
                        session_id: connection.id().to_string(),
                        connected_at: connection.established_at(),
                    },
                );
                *wrapper_id = Some(node_id);
                context.hub.send_to(
                    connection.id(),
                    Message::HelloAck {
                        manager_id: context.manager_id.clone(),
                    },
                )?;
            }
            other => {
                context
                    .inbound
                    .handle(peer, other, |reply| context.hub.send_to(connection.id(), reply))?;
            }
        }
    }
}
