//! Payloads of the events that go through the hook pipeline.
//!
//! Callers own the payload, and lend it to `Hooks::emit` through an `Event`.  Once `emit`
//! returns, they read back whatever the handlers changed (`halt`, `message`, `clients`, ...).

use crate::client::{Client, ClientState};
use crate::state::ConnectionState;
use kiwibnc_tokens::Message;

/// Names of the events handlers can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    AvailableCaps,
    AvailableIsupports,
    MessageToClient,
    MessageToClients,
    MessageFromClient,
    MessageFromUpstream,
}

/// Collects the capabilities a negotiating client may request.  Handlers push to `caps`.
pub struct AvailableCaps<'a> {
    pub client: &'a ClientState,
    pub upstream: &'a ConnectionState,
    pub caps: Vec<String>,
    pub halt: bool,
}

/// Collects the ISUPPORT tokens kiwibnc adds on top of the network's.
#[derive(Default)]
pub struct AvailableIsupports {
    pub tokens: Vec<String>,
    pub halt: bool,
}

/// One outgoing message, for one client.  Handlers may rewrite `message`, or set `halt` so that
/// this client does not get it.
pub struct MessageToClient<'a> {
    pub client: &'a ClientState,
    pub upstream: &'a ConnectionState,
    pub message: Message,
    pub halt: bool,
}

/// One outgoing message, before it is copied to each client.  Handlers may narrow `clients`.
pub struct MessageToClients<'a> {
    pub clients: Vec<&'a mut Client>,
    pub message: &'a Message,
    pub halt: bool,
}

/// A message a registered client sent, before it is forwarded upstream.
pub struct MessageFromClient<'a> {
    pub client: &'a mut Client,
    pub upstream: &'a ConnectionState,
    pub message: Message,
    pub halt: bool,
    pub prevented: bool,

    /// Cleared by handlers that take care of the message themselves.
    pub passthru: bool,

    /// Lines handlers answer with.  They are sent to the client through `message_to_client`.
    pub replies: Vec<Message>,
}

/// A message the network sent, before the session state machine sees it.
pub struct MessageFromUpstream<'a> {
    pub upstream: &'a ConnectionState,
    pub message: Message,
    pub halt: bool,
    pub prevented: bool,
}

impl<'a> MessageFromClient<'a> {
    pub fn new(client: &'a mut Client, upstream: &'a ConnectionState, message: Message) -> Self {
        Self {
            client,
            upstream,
            message,
            halt: false,
            prevented: false,
            passthru: true,
            replies: Vec::new(),
        }
    }

    pub fn prevent_default(&mut self) {
        self.prevented = true;
    }

    /// Whether the message should still be forwarded upstream.
    pub fn forward(&self) -> bool {
        !self.prevented && self.passthru
    }
}

impl<'a> MessageFromUpstream<'a> {
    pub fn new(upstream: &'a ConnectionState, message: Message) -> Self {
        Self {
            upstream,
            message,
            halt: false,
            prevented: false,
        }
    }

    pub fn prevent_default(&mut self) {
        self.prevented = true;
    }
}

/// An event, lending its payload to the handlers.
pub enum Event<'e, 'a> {
    AvailableCaps(&'e mut AvailableCaps<'a>),
    AvailableIsupports(&'e mut AvailableIsupports),
    MessageToClient(&'e mut MessageToClient<'a>),
    MessageToClients(&'e mut MessageToClients<'a>),
    MessageFromClient(&'e mut MessageFromClient<'a>),
    MessageFromUpstream(&'e mut MessageFromUpstream<'a>),
}

impl Event<'_, '_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AvailableCaps(_) => EventKind::AvailableCaps,
            Self::AvailableIsupports(_) => EventKind::AvailableIsupports,
            Self::MessageToClient(_) => EventKind::MessageToClient,
            Self::MessageToClients(_) => EventKind::MessageToClients,
            Self::MessageFromClient(_) => EventKind::MessageFromClient,
            Self::MessageFromUpstream(_) => EventKind::MessageFromUpstream,
        }
    }

    pub fn halted(&self) -> bool {
        match self {
            Self::AvailableCaps(e) => e.halt,
            Self::AvailableIsupports(e) => e.halt,
            Self::MessageToClient(e) => e.halt,
            Self::MessageToClients(e) => e.halt,
            Self::MessageFromClient(e) => e.halt,
            Self::MessageFromUpstream(e) => e.halt,
        }
    }
}

macro_rules! impl_from_payload {
    ( $( $variant:ident ),* ) => {
        $(
            impl<'e, 'a> From<&'e mut $variant<'a>> for Event<'e, 'a> {
                fn from(payload: &'e mut $variant<'a>) -> Self {
                    Self::$variant(payload)
                }
            }
        )*
    };
}

impl_from_payload!(AvailableCaps, MessageToClient, MessageToClients, MessageFromClient, MessageFromUpstream);

impl<'e> From<&'e mut AvailableIsupports> for Event<'e, '_> {
    fn from(payload: &'e mut AvailableIsupports) -> Self {
        Self::AvailableIsupports(payload)
    }
}
