//! Manager Client
//!
//! A wrapper node's primary connection to the manager. Outbound messages
//! are queued and written by whichever session is currently alive; when a
//! session ends the lifecycle handler decides whether to reconnect.

use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{
    is_disconnect, read_message, write_message, Backoff, Connection, ConnectionHandler,
    PrimaryConnection, Reconnector,
};
use crate::config::{ConfigLoader, ConnectionConfig};
use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::sync::{Announcement, BootstrapChannel, InboundSyncHandler};

/// Messages waiting to be written to the manager.
///
/// Survives reconnects: the queue belongs to the node, not to a session.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Message>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Queue a message without waiting
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::ChannelClosed)
    }

    /// Next queued message
    pub async fn recv(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }

    /// Drop everything queued, returning how many messages were discarded
    pub async fn clear(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapChannel for OutboundQueue {
    fn request_all_cached_objects(&self, list_name: &str) -> Result<()> {
        self.send(Message::GetAllCachedObjects {
            list_name: list_name.to_string(),
        })
    }

    fn announce(&self, _announcement: Announcement) -> Result<()> {
        Err(Error::Unsupported("wrapper nodes do not announce list changes"))
    }
}

/// Primary connection to the manager, with its reconnect loop
pub struct ManagerClient {
    /// Self reference for spawning the reconnect loop
    me: Weak<Self>,
    /// This node's ID, sent in `Hello`
    node_id: String,
    /// Outbound messages
    queue: OutboundQueue,
    /// Applies inbound list messages
    inbound: Arc<InboundSyncHandler>,
    /// Re-read before every retry
    config_loader: Arc<dyn ConfigLoader>,
    /// Designated primary session
    primary: Arc<PrimaryConnection>,
    /// Lifecycle event receiver
    handler: RwLock<Option<Arc<dyn ConnectionHandler>>>,
    /// Running connect/session task
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ManagerClient {
    /// Create a new client
    pub fn new(
        node_id: String,
        queue: OutboundQueue,
        inbound: Arc<InboundSyncHandler>,
        config_loader: Arc<dyn ConfigLoader>,
        primary: Arc<PrimaryConnection>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            node_id,
            queue,
            inbound,
            config_loader,
            primary,
            handler: RwLock::new(None),
            task: Mutex::new(None),
        })
    }

    /// Set the lifecycle handler
    pub fn set_handler(&self, handler: Arc<dyn ConnectionHandler>) {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub fn primary(&self) -> &Arc<PrimaryConnection> {
        &self.primary
    }

    /// Start connecting to the manager
    pub fn start(&self, config: ConnectionConfig) {
        self.spawn_loop(config, false);
    }

    /// Stop the running session or reconnect loop
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }

    /// Whether a connect loop or session is running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn spawn_loop(&self, config: ConnectionConfig, reset: bool) {
        let Some(client) = self.me.upgrade() else {
            return;
        };

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = task.take() {
            previous.abort();
        }
        *task = Some(tokio::spawn(client.run(config, reset)));
    }

    async fn run(self: Arc<Self>, mut config: ConnectionConfig, reset: bool) {
        if reset {
            let dropped = self.queue.clear().await;
            if dropped > 0 {
                tracing::debug!("Discarded {} messages queued for the previous session", dropped);
            }
        }

        let mut backoff = Backoff::new(&config.reconnect);
        let mut attempts: u32 = 0;

        loop {
            if attempts > 0 {
                tokio::time::sleep(backoff.next_delay_jittered()).await;
                match self.config_loader.load_connection_config() {
                    Ok(fresh) => {
                        if fresh.manager_address != config.manager_address {
                            tracing::info!("Manager address changed to {}", fresh.manager_address);
                        }
                        config = fresh;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to reload connection configuration, keeping previous: {}", e);
                    }
                }
            }

            attempts += 1;
            match connect(&config.manager_address, config.connect_timeout).await {
                Ok(stream) => {
                    self.run_session(stream, &config.manager_address).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "Connection attempt {} to the manager at {} failed: {}",
                        attempts,
                        config.manager_address,
                        e
                    );
                    let max_attempts = config.reconnect.max_attempts;
                    if max_attempts > 0 && attempts >= max_attempts {
                        tracing::error!("Giving up on the manager after {} attempts", attempts);
                        return;
                    }
                }
            }
        }
    }

    /// Drive one session and report its lifecycle. Nothing is awaited after
    /// the inactive event, which may replace this task.
    async fn run_session(&self, stream: TcpStream, address: &str) {
        let connection = Connection::new(address);
        self.primary.designate(connection.id());

        if let Some(handler) = self.handler() {
            handler.on_connection_active(&connection);
        }

        let result = self.drive_session(stream, &connection).await;

        if let Err(ref e) = result {
            connection.mark_failed();
            if let Some(handler) = self.handler() {
                handler.on_failure(&connection, e);
            }
        }

        connection.mark_inactive();
        if let Some(handler) = self.handler() {
            handler.on_connection_inactive(&connection);
        }
    }

    async fn drive_session(&self, stream: TcpStream, connection: &Connection) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        write_message(
            &mut writer,
            &Message::Hello {
                node_id: self.node_id.clone(),
            },
        )
        .await?;

        tokio::select! {
            result = write_loop(self.queue.clone(), writer) => result,
            result = self.read_loop(&mut reader, connection.peer_address()) => result,
        }
    }

    async fn read_loop(&self, reader: &mut OwnedReadHalf, peer: &str) -> Result<()> {
        loop {
            match read_message(reader).await {
                Ok(Message::HelloAck { manager_id }) => {
                    tracing::info!("Session accepted by manager {}", manager_id);
                }
                Ok(message) => {
                    tracing::trace!("Received {} from {}", message.type_name(), peer);
                    self.inbound.handle(peer, message, |reply| self.queue.send(reply))?;
                }
                Err(e) if is_disconnect(&e) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn handler(&self) -> Option<Arc<dyn ConnectionHandler>> {
        self.handler.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Reconnector for ManagerClient {
    fn reset_and_start_reconnect_loop(&self, config: ConnectionConfig) {
        tracing::info!("Resetting wrapper session state");
        self.spawn_loop(config, true);
    }
}

async fn write_loop(queue: OutboundQueue, mut writer: OwnedWriteHalf) -> Result<()> {
    while let Some(message) = queue.recv().await {
        tracing::trace!("Sending {} to manager", message.type_name());
        write_message(&mut writer, &message).await?;
    }
    Ok(())
}

/// Connect to an address
async fn connect(address: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let result = timeout(connect_timeout, TcpStream::connect(address)).await;

    match result {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(Error::ConnectionFailed {
            address: address.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeRole, ReconnectConfig};
    use crate::sync::{AnnounceKind, ObjectEnvelope, SyncRegistry};

    struct FixedLoader(ConnectionConfig);

    impl ConfigLoader for FixedLoader {
        fn load_connection_config(&self) -> Result<ConnectionConfig> {
            Ok(self.0.clone())
        }
    }

    fn unreachable_config(max_attempts: u32) -> ConnectionConfig {
        ConnectionConfig {
            // port 1 is reserved and refuses connections on loopback
            manager_address: "127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_millis(200),
            reconnect: ReconnectConfig {
                initial_delay_ms: 10,
                max_delay_ms: 20,
                max_attempts,
            },
        }
    }

    #[tokio::test]
    async fn test_queue_carries_bootstrap_requests() {
        let queue = OutboundQueue::new();
        queue.request_all_cached_objects("services").unwrap();

        match queue.recv().await {
            Some(Message::GetAllCachedObjects { list_name }) => assert_eq!(list_name, "services"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queue_refuses_announcements() {
        let queue = OutboundQueue::new();
        let result = queue.announce(Announcement {
            list_name: "services".into(),
            kind: AnnounceKind::Added,
            object: ObjectEnvelope { id: "a".into(), payload: vec![] },
        });
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_queue_clear() {
        let queue = OutboundQueue::new();
        queue.request_all_cached_objects("a").unwrap();
        queue.request_all_cached_objects("b").unwrap();
        assert_eq!(queue.clear().await, 2);
        assert_eq!(queue.clear().await, 0);
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let result = connect("127.0.0.1:1", Duration::from_millis(200)).await;
        assert!(matches!(
            result,
            Err(Error::ConnectionFailed { .. }) | Err(Error::ConnectionTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let config = unreachable_config(3);
        let queue = OutboundQueue::new();
        let registry = Arc::new(SyncRegistry::new(NodeRole::Client, Arc::new(queue.clone())));
        let client = ManagerClient::new(
            "wrapper-1".to_string(),
            queue,
            Arc::new(InboundSyncHandler::new(registry)),
            Arc::new(FixedLoader(config.clone())),
            Arc::new(PrimaryConnection::new()),
        );

        client.start(config);
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(client.primary().current(), None);
    }

    #[tokio::test]
    async fn test_retry_picks_up_changed_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut live = unreachable_config(0);
        live.manager_address = listener.local_addr().unwrap().to_string();

        let queue = OutboundQueue::new();
        let registry = Arc::new(SyncRegistry::new(NodeRole::Client, Arc::new(queue.clone())));
        let client = ManagerClient::new(
            "wrapper-1".to_string(),
            queue,
            Arc::new(InboundSyncHandler::new(registry)),
            Arc::new(FixedLoader(live)),
            Arc::new(PrimaryConnection::new()),
        );

        // first attempt uses the stale address, retries reload the config
        client.start(unreachable_config(0));
        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();

        match read_message(&mut stream).await.unwrap() {
            Message::Hello { node_id } => assert_eq!(node_id, "wrapper-1"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(client.primary().current().is_some());
        client.stop();
    }

    #[tokio::test]
    async fn test_stop_aborts_reconnect_loop() {
        let config = unreachable_config(0);
        let queue = OutboundQueue::new();
        let registry = Arc::new(SyncRegistry::new(NodeRole::Client, Arc::new(queue.clone())));
        let client = ManagerClient::new(
            "wrapper-1".to_string(),
            queue,
            Arc::new(InboundSyncHandler::new(registry)),
            Arc::new(FixedLoader(config.clone())),
            Arc::new(PrimaryConnection::new()),
        );

        client.start(config);
        assert!(client.is_running());
        client.stop();
        assert!(!client.is_running());
    }
}
