//! Upstream sessions.
//!
//! A session is one connection to an IRC network, shared by every client attached to it.  It runs
//! as a single task that processes its events one after the other: lines from the network, lines
//! from clients, clients coming and going.  Sockets are handled by other tasks that only feed the
//! session inbox, see `crate::net`.

use crate::client::{Client, MessageQueue};
use crate::config::{Identity, Network};
use crate::history::MessageStore;
use crate::hooks::{Event, Hooks, MessageToClient, MessageToClients};
use crate::state::{ConnectionState, StateStore};
use kiwibnc_tokens::Message;
use slab::Slab;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

mod downstream;
mod upstream;

#[cfg(test)]
pub mod test;

/// What a session reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    /// The network socket is open.  Lines for the network go to the given queue.
    UpstreamConnected(MessageQueue),
    Upstream(Message),
    UpstreamClosed,

    /// A client attaches.  Its id is sent back.
    ClientAttached(MessageQueue, oneshot::Sender<usize>),
    Client(usize, Message),
    ClientDetached(usize),

    /// Stops the session and removes its durable state.
    Destroy,
}

/// The write end of a session inbox.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// Pushes an event to the session.  Returns false if the session has stopped.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.inbox.send(event).is_ok()
    }

    /// Attaches a client and returns its id, or `None` if the session has stopped.
    pub async fn attach(&self, queue: MessageQueue) -> Option<usize> {
        let (tx, rx) = oneshot::channel();
        if !self.send(SessionEvent::ClientAttached(queue, tx)) {
            return None;
        }
        rx.await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

/// What a session needs to know from the configuration.
#[derive(Clone, Debug)]
pub struct Settings {
    pub network: Network,
    pub identity: Identity,

    /// Account name the history is stored under.
    pub user: String,
    pub server_name: String,
    pub logging: bool,
}

pub struct Session {
    settings: Settings,
    state: ConnectionState,
    clients: Slab<Client>,
    hooks: Arc<Hooks>,
    states: Arc<dyn StateStore>,
    messages: Arc<dyn MessageStore>,

    /// Lines put here are written to the network socket.  `None` while disconnected.
    upstream: Option<MessageQueue>,

    /// Capabilities of a multi-line CAP LS reply, until the last line comes.
    cap_ls: Vec<String>,
}

impl Session {
    pub fn new(
        settings: Settings,
        hooks: Arc<Hooks>,
        states: Arc<dyn StateStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let state = ConnectionState::new(&settings.network.name);
        Self {
            settings,
            state,
            clients: Slab::new(),
            hooks,
            states,
            messages,
            upstream: None,
            cap_ls: Vec::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn client(&self, id: usize) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Spawns the session task and returns its handle.
    pub fn spawn(self) -> SessionHandle {
        let (inbox, events) = mpsc::unbounded_channel();
        tokio::spawn(self.run(events));
        SessionHandle { inbox }
    }

    /// Loads the durable state and updates it with the configuration.
    ///
    /// If the state cannot be loaded, the session starts from the configuration alone, and the
    /// stored state is merged back on the first save that manages to read it.
    pub async fn start(&mut self) {
        if !self.state.maybe_load(&*self.states).await {
            log::warn!("{}: Starting without the saved state", self.state.id);
        }

        let network = &self.settings.network;
        self.state.host = network.host.clone();
        self.state.port = network.port;
        self.state.tls = network.tls;
        self.state.logging = self.settings.logging;
        self.state.connected = false;
        self.state.net_registered = false;
        if self.state.nick.is_empty() {
            self.state.nick = self.settings.identity.nick.clone();
        }
        self.state.save(&*self.states).await;

        log::info!("{}: Session started, {} buffers", self.state.id, self.state.buffers.len());
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        self.start().await;

        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }

        events.close();
        let mut discarded = 0;
        while events.recv().await.is_some() {
            discarded += 1;
        }
        log::info!("{}: Session stopped, {} events discarded", self.state.id, discarded);
    }

    /// Processes one event.  Returns false when the session must stop.
    pub async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::UpstreamConnected(queue) => self.upstream_connected(queue).await,
            SessionEvent::Upstream(msg) => self.handle_upstream(msg).await,
            SessionEvent::UpstreamClosed => self.upstream_closed().await,
            SessionEvent::ClientAttached(queue, id_tx) => {
                let id = self.attach(queue);
                if id_tx.send(id).is_err() {
                    self.detach(id);
                }
            }
            SessionEvent::Client(id, msg) => self.handle_client(id, msg).await,
            SessionEvent::ClientDetached(id) => self.detach(id),
            SessionEvent::Destroy => {
                self.destroy().await;
                return false;
            }
        }
        true
    }

    async fn destroy(&mut self) {
        self.clients.clear();
        self.upstream = None;
        match self.state.destroy(&*self.states).await {
            Ok(()) => log::info!("{}: State destroyed", self.state.id),
            Err(err) => log::warn!("{}: Failed to destroy state: {}", self.state.id, err),
        }
    }

    /// Writes a line to the network.
    fn send_upstream(&self, msg: Message) {
        match &self.upstream {
            Some(queue) => {
                let _ = queue.send(msg);
            }
            None => log::debug!("{}: Not connected, dropping {}", self.state.id, msg),
        }
    }

    /// Sends `msg` to every registered client, through the `message_to_clients` and
    /// `message_to_client` hooks.
    async fn send_to_clients(&mut self, msg: Message) {
        self.send_to_clients_except(msg, None).await;
    }

    async fn send_to_clients_except(&mut self, msg: Message, except: Option<usize>) {
        let clients = self
            .clients
            .iter_mut()
            .map(|(_, client)| client)
            .filter(|client| client.is_registered() && !client.is_closed() && Some(client.id()) != except)
            .collect();
        let mut payload = MessageToClients {
            clients,
            message: &msg,
            halt: false,
        };
        if let Err(err) = self.hooks.emit(Event::from(&mut payload)).await {
            log::warn!("{}: message_to_clients failed on {}: {}", self.state.id, msg, err);
            return;
        }
        if payload.halt {
            return;
        }
        for client in payload.clients {
            deliver(&self.hooks, &self.state, client, msg.clone()).await;
        }
    }

    /// Sends `msg` to one client, through the `message_to_client` hook.
    async fn send_to_client(&self, id: usize, msg: Message) {
        if let Some(client) = self.clients.get(id) {
            deliver(&self.hooks, &self.state, client, msg).await;
        }
    }
}

/// Runs `message_to_client` and puts the result in the client queue.
async fn deliver(hooks: &Hooks, upstream: &ConnectionState, client: &Client, msg: Message) {
    let mut payload = MessageToClient {
        client: &client.state,
        upstream,
        message: msg,
        halt: false,
    };
    if let Err(err) = hooks.emit(Event::from(&mut payload)).await {
        log::warn!("{}: message_to_client failed: {}", upstream.id, err);
        return;
    }
    if !payload.halt {
        client.send(payload.message);
    }
}
