//! Server facade wiring sessions, namespaces and the cluster bus together
//!
//! Transport adapters (HTTP long-polling, websocket) live outside this crate.
//! They call [`SocketServer::handshake`] for a new client,
//! [`SocketServer::attach_channel`] when a known session opens another
//! channel, and [`SocketServer::on_packet`] for every decoded inbound packet.
//!
//! ```rust,no_run
//! use acton_socket::prelude::*;
//!
//! # async fn run() -> acton_socket::Result<()> {
//! let server = SocketServer::builder()
//!     .with_config(Config::load()?)
//!     .build()
//!     .await?;
//!
//! let chat = server.add_namespace("/chat");
//! chat.add_multi_event_listener("message", |client, args, _ack| {
//!     client.namespace().room_operations("lobby").send_event("message", args.to_vec());
//!     Ok(())
//! });
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::ack::AckManager;
use crate::authorize::{AllowAll, AuthorizationListener, AuthorizeHandler};
use crate::channel::{Channel, ChannelId};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::exception::{DefaultExceptionListener, ExceptionListener};
use crate::namespace::{BroadcastOperations, Namespace, NamespacesHub, DEFAULT_NAMESPACE};
use crate::protocol::{Packet, PacketType, Transport};
use crate::scheduler::{CancelableScheduler, SchedulerKey, SchedulerKind};
use crate::session::{
    ClientHead, ClientsBox, Disconnectable, HandshakeData, NamespaceClient, SessionContext, SessionId,
};
use crate::store::{
    ClusterStoreFactory, EventBus, InProcessBroker, MemoryStoreFactory, PubSubMessage, PubSubStore,
    StoreFactory,
};

/// Builder for [`SocketServer`]
#[derive(Default)]
pub struct SocketServerBuilder {
    config: Option<Config>,
    store_factory: Option<Arc<dyn StoreFactory>>,
    exception_listener: Option<Arc<dyn ExceptionListener>>,
    authorization: Option<Arc<dyn AuthorizationListener>>,
    broker: Option<InProcessBroker>,
}

impl SocketServerBuilder {
    /// Create a builder with default collaborators
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this configuration instead of the defaults
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store factory instead of the one `[cluster]` implies
    #[must_use]
    pub fn with_store_factory(mut self, factory: Arc<dyn StoreFactory>) -> Self {
        self.store_factory = Some(factory);
        self
    }

    /// Receive listener failures
    #[must_use]
    pub fn with_exception_listener(mut self, listener: Arc<dyn ExceptionListener>) -> Self {
        self.exception_listener = Some(listener);
        self
    }

    /// Gate handshakes
    #[must_use]
    pub fn with_authorization_listener<L>(mut self, listener: L) -> Self
    where
        L: AuthorizationListener + 'static,
    {
        self.authorization = Some(Arc::new(listener));
        self
    }

    /// Broker shared with other nodes in this process (in-process backend)
    #[must_use]
    pub fn with_in_process_broker(mut self, broker: InProcessBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Assemble the server and start the cluster event bus
    ///
    /// Must run inside a Tokio runtime.
    pub async fn build(self) -> Result<SocketServer> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let config = Arc::new(config);

        let scheduler = CancelableScheduler::from_current()?;
        let ack_manager = Arc::new(AckManager::new(scheduler.clone()));
        let clients = Arc::new(ClientsBox::new());

        let store_factory: Arc<dyn StoreFactory> = match (self.store_factory, &config.cluster) {
            (Some(factory), _) => factory,
            (None, Some(cluster)) => Arc::new(ClusterStoreFactory::from_config(cluster, self.broker).await?),
            (None, None) => Arc::new(MemoryStoreFactory::new()),
        };
        let pubsub = store_factory.pub_sub_store();

        let exception_listener = self
            .exception_listener
            .unwrap_or_else(|| Arc::new(DefaultExceptionListener));
        let hub = Arc::new(NamespacesHub::new(
            config.socket.ack_mode,
            Arc::clone(&pubsub),
            exception_listener,
        ));
        hub.create(DEFAULT_NAMESPACE);

        let authorize = Arc::new(AuthorizeHandler::new(
            self.authorization.unwrap_or_else(|| Arc::new(AllowAll)),
            scheduler.clone(),
        ));

        let disconnectable = Arc::new(DisconnectableHub {
            ack_manager: Arc::clone(&ack_manager),
            scheduler: scheduler.clone(),
            store_factory: Arc::clone(&store_factory),
            clients: Arc::clone(&clients),
            pubsub: Arc::clone(&pubsub),
        });
        let session_ctx = SessionContext {
            config: Arc::clone(&config),
            scheduler: scheduler.clone(),
            ack_manager: Arc::clone(&ack_manager),
            clients: Arc::clone(&clients),
            disconnectable,
        };

        let event_bus = EventBus::start(Arc::clone(&pubsub), &hub, &authorize);

        tracing::info!(
            service = %config.service.name,
            node_id = pubsub.node_id(),
            transports = ?config.socket.transports,
            ack_mode = ?config.socket.ack_mode,
            "Socket server ready"
        );

        Ok(SocketServer {
            config,
            scheduler,
            ack_manager,
            clients,
            store_factory,
            pubsub,
            hub,
            authorize,
            event_bus,
            session_ctx,
        })
    }
}

/// Final teardown of a session: ack table, timers, store, indexes
struct DisconnectableHub {
    ack_manager: Arc<AckManager>,
    scheduler: CancelableScheduler,
    store_factory: Arc<dyn StoreFactory>,
    clients: Arc<ClientsBox>,
    pubsub: Arc<dyn PubSubStore>,
}

impl Disconnectable for DisconnectableHub {
    fn on_disconnect(&self, client: &Arc<ClientHead>) {
        let session_id = client.session_id();
        self.ack_manager.on_disconnect(session_id);
        self.scheduler
            .cancel(&SchedulerKey::new(SchedulerKind::PingTimeout, session_id));
        self.scheduler
            .cancel(&SchedulerKey::new(SchedulerKind::UpgradeTimeout, session_id));
        self.store_factory.on_disconnect(session_id);
        self.clients.remove_client(client);
        self.pubsub.publish(PubSubMessage::Disconnect {
            session_id,
            namespace: DEFAULT_NAMESPACE.to_string(),
        });
        tracing::debug!(session_id = %session_id, "Session released");
    }
}

/// The socket server core
pub struct SocketServer {
    config: Arc<Config>,
    scheduler: CancelableScheduler,
    ack_manager: Arc<AckManager>,
    clients: Arc<ClientsBox>,
    store_factory: Arc<dyn StoreFactory>,
    pubsub: Arc<dyn PubSubStore>,
    hub: Arc<NamespacesHub>,
    authorize: Arc<AuthorizeHandler>,
    event_bus: EventBus,
    session_ctx: SessionContext,
}

impl SocketServer {
    /// Start building a server
    #[must_use]
    pub fn builder() -> SocketServerBuilder {
        SocketServerBuilder::new()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ack correlation shared by every session
    #[must_use]
    pub fn ack_manager(&self) -> &Arc<AckManager> {
        &self.ack_manager
    }

    /// Register a new client that arrived on `channel`
    ///
    /// Sends the `Open` packet and arms the first-data timer. The client still
    /// has to send `Connect` before it joins any namespace.
    pub fn handshake(
        &self,
        data: HandshakeData,
        channel: Arc<dyn Channel>,
        transport: Transport,
    ) -> Result<Arc<ClientHead>> {
        self.ensure_enabled(transport)?;
        self.authorize.authorize(&data)?;

        let session_id = SessionId::new();
        let store = self.store_factory.create_store(session_id);
        let client = ClientHead::new(session_id, data, transport, store, self.session_ctx.clone());
        self.clients.add_client(Arc::clone(&client));

        let socket = &self.config.socket;
        let upgrades: Vec<&str> = if transport == Transport::Polling
            && socket.is_transport_enabled(Transport::WebSocket)
        {
            vec![Transport::WebSocket.as_str()]
        } else {
            Vec::new()
        };
        let open = Packet::new(PacketType::Open).with_data(vec![json!({
            "sid": session_id,
            "upgrades": upgrades,
            "pingInterval": socket.ping_interval_ms,
            "pingTimeout": socket.ping_timeout_ms,
        })]);

        let opened = client
            .bind_channel(channel, transport)
            .and_then(|()| client.send_on(open, transport));
        if let Err(e) = opened {
            tracing::debug!(session_id = %session_id, error = %e, "Handshake response not delivered");
            client.on_channel_disconnect();
            return Err(e);
        }

        client.schedule_first_data_timeout();
        tracing::debug!(session_id = %session_id, transport = %transport, "Handshake completed");
        Ok(client)
    }

    /// Bind another channel to an existing session
    ///
    /// A websocket joining a polling session must send `Upgrade` within the
    /// upgrade timeout, otherwise it is closed.
    pub fn attach_channel(
        &self,
        session_id: SessionId,
        channel: Arc<dyn Channel>,
        transport: Transport,
    ) -> Result<Arc<ClientHead>> {
        self.ensure_enabled(transport)?;
        let client = self
            .clients
            .get(session_id)
            .ok_or(Error::SessionNotFound(session_id))?;

        let channel_id = channel.id();
        client.bind_channel(Arc::clone(&channel), transport)?;

        if transport == Transport::WebSocket && client.current_transport() == Transport::Polling {
            let weak_client = Arc::downgrade(&client);
            let weak_channel = Arc::downgrade(&channel);
            self.scheduler.schedule(
                SchedulerKey::new(SchedulerKind::UpgradeTimeout, session_id),
                self.config.socket.upgrade_timeout(),
                move || {
                    let Some(client) = weak_client.upgrade() else {
                        return;
                    };
                    if client.current_transport() == Transport::Polling
                        && client.is_transport_channel(channel_id, Transport::WebSocket)
                    {
                        tracing::debug!(session_id = %session_id, "Upgrade timed out, closing websocket");
                        if let Some(channel) = weak_channel.upgrade() {
                            channel.close();
                        }
                    }
                },
            );
        }

        Ok(client)
    }

    /// A transport adapter saw `channel_id` close
    pub fn on_channel_closed(&self, channel_id: ChannelId) {
        let Some(client) = self.clients.get_by_channel(channel_id) else {
            return;
        };
        for transport in Transport::ALL {
            if client.is_transport_channel(channel_id, transport) {
                client.on_channel_closed(channel_id, transport);
            }
        }
    }

    /// Route one inbound packet
    ///
    /// Packets from channels that are no longer indexed are dropped.
    pub fn on_packet(&self, channel_id: ChannelId, transport: Transport, packet: Packet) -> Result<()> {
        let Some(client) = self.clients.get_by_channel(channel_id) else {
            tracing::debug!(channel_id = %channel_id, packet_type = ?packet.packet_type, "Packet from unknown channel dropped");
            return Ok(());
        };

        let is_probe = packet.packet_type == PacketType::Ping
            && packet.data.first().and_then(|v| v.as_str()) == Some("probe");
        // Before the first Connect the shared timer key holds the first-data deadline
        if !is_probe && client.has_namespaces() {
            client.schedule_ping_timeout();
        }

        match packet.packet_type {
            PacketType::Ping => {
                client.send_on(Packet::new(PacketType::Pong).with_data(packet.data), transport)?;
                if is_probe {
                    client.send_on(Packet::new(PacketType::Noop), Transport::Polling)?;
                }
            }
            PacketType::Upgrade => {
                self.scheduler.cancel(&SchedulerKey::new(
                    SchedulerKind::UpgradeTimeout,
                    client.session_id(),
                ));
                client.upgrade_current_transport(transport)?;
            }
            PacketType::Close => client.on_channel_disconnect(),
            PacketType::Connect => self.connect_namespace(&client, &packet.namespace)?,
            PacketType::Disconnect => {
                if let Some(child) = client.child_client(&packet.namespace) {
                    child.on_disconnect();
                }
            }
            PacketType::Ack | PacketType::BinaryAck => {
                self.ack_manager.on_ack(client.session_id(), &packet);
            }
            PacketType::Event | PacketType::BinaryEvent => {
                let Some(child) = client.child_client(&packet.namespace) else {
                    tracing::debug!(
                        session_id = %client.session_id(),
                        namespace = %packet.namespace,
                        "Event for a namespace the client never joined"
                    );
                    return Ok(());
                };
                let namespace = Arc::clone(child.namespace());
                namespace.on_event(&child, &packet);
            }
            PacketType::Open | PacketType::Pong | PacketType::Noop | PacketType::Error => {
                tracing::trace!(packet_type = ?packet.packet_type, "Ignoring inbound packet");
            }
        }
        Ok(())
    }

    /// Connect `client` to the default namespace and start its heartbeat
    pub fn connect(&self, client: &Arc<ClientHead>) -> Result<()> {
        self.authorize.connect(client.session_id());

        let namespace = self.hub.create(DEFAULT_NAMESPACE);
        self.join_namespace(client, &namespace)?;

        client.schedule_ping_timeout();
        Ok(())
    }

    /// Connect `client` to the namespace `name`, joining the default one first
    ///
    /// An unknown namespace is answered with an `Error` packet.
    pub fn connect_namespace(&self, client: &Arc<ClientHead>, name: &str) -> Result<()> {
        if name == DEFAULT_NAMESPACE || client.child_client(DEFAULT_NAMESPACE).is_none() {
            self.connect(client)?;
        }
        if name == DEFAULT_NAMESPACE {
            return Ok(());
        }

        match self.hub.get(name) {
            Some(namespace) => self.join_namespace(client, &namespace),
            None => {
                tracing::debug!(session_id = %client.session_id(), namespace = %name, "Connect to unknown namespace");
                client.send(
                    Packet::new(PacketType::Error)
                        .with_namespace(name)
                        .with_data(vec![json!("Invalid namespace")]),
                )
            }
        }
    }

    fn join_namespace(&self, client: &Arc<ClientHead>, namespace: &Arc<Namespace>) -> Result<()> {
        if namespace.is_removed() {
            tracing::debug!(session_id = %client.session_id(), namespace = %namespace.name(), "Connect to removed namespace");
            return client.send(
                Packet::new(PacketType::Error)
                    .with_namespace(namespace.name())
                    .with_data(vec![json!("Invalid namespace")]),
            );
        }
        let Some(child) = client.add_namespace_client(namespace) else {
            return Ok(());
        };
        child.send(Packet::new(PacketType::Connect))?;
        self.pubsub.publish(PubSubMessage::Connect {
            session_id: client.session_id(),
            namespace: namespace.name().to_string(),
        });
        namespace.on_connect(&child);

        // Removal raced past the check above and may have missed this client
        if namespace.is_removed() {
            child.disconnect();
        }
        Ok(())
    }

    fn ensure_enabled(&self, transport: Transport) -> Result<()> {
        if self.config.socket.is_transport_enabled(transport) {
            Ok(())
        } else {
            Err(Error::TransportDisabled(transport))
        }
    }

    /// Namespace `name`, created if absent
    pub fn add_namespace(&self, name: &str) -> Arc<Namespace> {
        self.hub.create(name)
    }

    /// Remove `name`, disconnecting every client in it
    pub fn remove_namespace(&self, name: &str) {
        self.hub.remove(name);
    }

    /// Namespace `name`, if registered
    #[must_use]
    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.hub.get(name)
    }

    /// Every registered namespace
    #[must_use]
    pub fn namespaces(&self) -> Vec<Arc<Namespace>> {
        self.hub.all()
    }

    /// The default namespace
    #[must_use]
    pub fn default_namespace(&self) -> Arc<Namespace> {
        self.hub.create(DEFAULT_NAMESPACE)
    }

    /// Local clients in `room` across every namespace
    pub fn room_clients(&self, room: &str) -> impl Iterator<Item = Arc<NamespaceClient>> + Send + 'static {
        self.hub.room_clients(room)
    }

    /// Broadcast to every client of the default namespace
    #[must_use]
    pub fn broadcast_operations(&self) -> BroadcastOperations {
        self.default_namespace().broadcast_operations()
    }

    /// Broadcast to one room of the default namespace
    #[must_use]
    pub fn room_operations(&self, room: &str) -> BroadcastOperations {
        self.default_namespace().room_operations(room)
    }

    /// Default-namespace client by session id
    #[must_use]
    pub fn client(&self, session_id: SessionId) -> Option<Arc<NamespaceClient>> {
        self.default_namespace().client(session_id)
    }

    /// Every default-namespace client on this node
    #[must_use]
    pub fn all_clients(&self) -> Vec<Arc<NamespaceClient>> {
        self.default_namespace().clients()
    }

    /// Session by id, connected or not
    #[must_use]
    pub fn session(&self, session_id: SessionId) -> Option<Arc<ClientHead>> {
        self.clients.get(session_id)
    }

    /// Number of live sessions on this node
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.clients.len()
    }

    /// Disconnect every session and stop background work
    pub fn shutdown(&self) {
        let sessions = self.clients.all();
        let count = sessions.len();
        for client in sessions {
            client.disconnect();
        }
        self.event_bus.stop();
        self.store_factory.shutdown();
        self.scheduler.shutdown();
        tracing::info!(sessions = count, "Socket server shut down");
    }
}

impl fmt::Debug for SocketServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketServer")
            .field("service", &self.config.service.name)
            .field("node_id", &self.pubsub.node_id())
            .field("sessions", &self.clients.len())
            .field("namespaces", &self.hub.len())
            .finish_non_exhaustive()
    }
}
