//! Clients attached to an upstream session.

use kiwibnc_tokens::Message;
use std::any::Any;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// The write end of a client's outgoing queue.
///
/// It is unbounded, so sending to a client never blocks the session.  The other end is drained by
/// the task that owns the client socket.
pub type MessageQueue = mpsc::UnboundedSender<Message>;

/// Per-client state that features and the reply router can read and write.
///
/// Nothing here is durable: it lives as long as the client stays attached.
#[derive(Default)]
pub struct ClientState {
    /// Capabilities this client negotiated with kiwibnc.
    pub caps: Vec<String>,

    /// Scratch space, see `ClientState::temp_get` and `ClientState::temp_set`.
    temp: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ClientState {
    pub fn has_cap(&self, cap: &str) -> bool {
        self.caps.iter().any(|c| c == cap)
    }

    /// Returns the scratch value stored under `key`, if it exists and is a `T`.
    pub fn temp_get<T: Any>(&self, key: &str) -> Option<&T> {
        self.temp.get(key).and_then(|value| value.downcast_ref())
    }

    pub fn temp_get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.temp.get_mut(key).and_then(|value| value.downcast_mut())
    }

    /// Stores `value` under `key`, or removes the entry when `value` is `None`.
    pub fn temp_set<T: Any + Send + Sync>(&mut self, key: &str, value: Option<T>) {
        match value {
            Some(value) => {
                self.temp.insert(key.to_owned(), Box::new(value));
            }
            None => {
                self.temp.remove(key);
            }
        }
    }
}

/// A client connected to kiwibnc.
pub struct Client {
    /// The slab key of the client in its session.
    id: usize,

    /// Messages put here are written to the client socket.  `None` once the client has quit.
    queue: Option<MessageQueue>,

    pub state: ClientState,

    /// The nickname the client registered with, "*" until it sends NICK.
    nick: String,

    /// Empty until the client sends USER.
    user: String,

    /// Set while the client is in a CAP LS / CAP END exchange.  Registration waits for it.
    negotiating: bool,

    /// Whether the client has been sent its welcome burst.
    registered: bool,
}

impl Client {
    pub fn new(id: usize, queue: MessageQueue) -> Self {
        Self {
            id,
            queue: Some(queue),
            state: ClientState::default(),
            nick: String::from("*"),
            user: String::new(),
            negotiating: false,
            registered: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Adds a message to the client's queue.
    pub fn send(&self, msg: Message) {
        // The receiving end is dropped when the client socket closes.  The session learns about
        // it through a ClientDetached event.
        if let Some(queue) = &self.queue {
            let _ = queue.send(msg);
        }
    }

    /// Drops the client's queue and state, which makes its socket task close the connection.
    ///
    /// The client keeps its id until the socket task reports it detached, so that the id is not
    /// given to another client while lines from this one are still in flight.
    pub fn close(&mut self) {
        self.queue = None;
        self.state = ClientState::default();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_none()
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn set_nick(&mut self, nick: &str) {
        self.nick.clear();
        self.nick.push_str(nick);
    }

    pub fn set_user(&mut self, user: &str) {
        self.user = user.to_owned();
    }

    pub fn set_negotiating(&mut self, negotiating: bool) {
        self.negotiating = negotiating;
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn set_registered(&mut self) {
        self.registered = true;
    }

    /// Whether the client has sent everything it needs to be welcomed.
    pub fn can_register(&self) -> bool {
        !self.registered
            && !self.negotiating
            && !self.is_closed()
            && self.nick != "*"
            && !self.user.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp() {
        let mut state = ClientState::default();
        assert!(state.temp_get::<u32>("count").is_none());

        state.temp_set("count", Some(3_u32));
        assert_eq!(state.temp_get::<u32>("count"), Some(&3));
        assert!(state.temp_get::<String>("count").is_none());

        *state.temp_get_mut::<u32>("count").unwrap() += 1;
        assert_eq!(state.temp_get::<u32>("count"), Some(&4));

        state.temp_set::<u32>("count", None);
        assert!(state.temp_get::<u32>("count").is_none());
    }

    #[test]
    fn test_registration() {
        let (queue, _rx) = mpsc::unbounded_channel();
        let mut client = Client::new(0, queue);
        assert!(!client.can_register());

        client.set_nick("kiwi");
        client.set_negotiating(true);
        client.set_user("kiwi");
        assert!(!client.can_register());

        client.set_negotiating(false);
        assert!(client.can_register());

        client.set_registered();
        assert!(!client.can_register());
    }

    #[test]
    fn test_close() {
        let (queue, mut rx) = mpsc::unbounded_channel();
        let mut client = Client::new(3, queue);
        client.state.caps.push("batch".to_owned());
        client.send(Message::new("PING"));

        client.close();
        client.send(Message::new("PONG"));
        assert!(client.is_closed());
        assert!(client.state.caps.is_empty());
        assert_eq!(client.id(), 3);
        assert!(rx.try_recv().unwrap().is("PING"));
        assert!(rx.try_recv().is_err());
    }
}
