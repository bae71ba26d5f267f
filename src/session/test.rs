//! Testing utilities for `kiwibnc::session`

use super::{Session, SessionEvent, Settings};
use crate::config::{Config, Identity, Network};
use crate::history::MemoryMessageStore;
use crate::hooks::Hooks;
use crate::state::{self, ConnectionState, MemoryStore, StateStore};
use async_trait::async_trait;
use kiwibnc_tokens::{assert_msg, Message};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type ClientId = usize;
pub type Queue = mpsc::UnboundedReceiver<Message>;

pub const SERVER_NAME: &str = "bnc.test";

pub fn config() -> Config {
    let mut config = Config::sample();
    config.server_name = SERVER_NAME.to_owned();
    config.identity = Identity {
        nick: "kiwi".to_owned(),
        username: "kiwi".to_owned(),
        realname: "Kiwi".to_owned(),
    };
    config.networks = vec![Network {
        name: "testnet".to_owned(),
        host: "irc.test".to_owned(),
        port: 6667,
        tls: false,
    }];
    config
}

/// A state store that is always failing, like a full disk.
pub struct FailingStore;

fn disk_full() -> state::Error {
    state::Error::Io(io::Error::new(io::ErrorKind::Other, "no space left on device"))
}

#[async_trait]
impl StateStore for FailingStore {
    async fn load(&self, _: &str) -> state::Result<Option<ConnectionState>> {
        Err(disk_full())
    }

    async fn save(&self, _: &ConnectionState) -> state::Result<()> {
        Err(disk_full())
    }

    async fn destroy(&self, _: &str) -> state::Result<()> {
        Err(disk_full())
    }
}

/// A memory store whose first loads fail.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load(&self, id: &str) -> state::Result<Option<ConnectionState>> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(disk_full());
        }
        self.inner.load(id).await
    }

    async fn save(&self, state: &ConnectionState) -> state::Result<()> {
        self.inner.save(state).await
    }

    async fn destroy(&self, id: &str) -> state::Result<()> {
        self.inner.destroy(id).await
    }
}

/// A session and the stores behind it.
pub struct Harness {
    pub session: Session,
    pub states: Arc<dyn StateStore>,
    pub messages: Arc<MemoryMessageStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_states(Arc::new(MemoryStore::default())).await
    }

    /// Starts a session on existing durable states, as after a restart.
    pub async fn with_states(states: Arc<dyn StateStore>) -> Self {
        Self::with_parts(states, |_| {}).await
    }

    /// Starts a session on `states`, with `extra_hooks` subscribed after the usual pipeline.
    pub async fn with_parts<F>(states: Arc<dyn StateStore>, extra_hooks: F) -> Self
    where
        F: FnOnce(&mut Hooks),
    {
        let config = config();
        let messages = Arc::new(MemoryMessageStore::default());
        let mut hooks = crate::pipeline(&config, messages.clone());
        extra_hooks(&mut hooks);
        let settings = Settings {
            network: config.networks[0].clone(),
            identity: config.identity.clone(),
            user: config.user.clone(),
            server_name: config.server_name.clone(),
            logging: config.logging,
        };
        let mut session = Session::new(settings, Arc::new(hooks), states.clone(), messages.clone());
        session.start().await;
        Self {
            session,
            states,
            messages,
        }
    }

    /// Simulates the upstream socket opening, and returns what the session writes to it.
    pub async fn connect(&mut self) -> Queue {
        let (msg_queue, outgoing_msgs) = mpsc::unbounded_channel();
        self.session
            .handle_event(SessionEvent::UpstreamConnected(msg_queue))
            .await;
        outgoing_msgs
    }

    /// Connects and goes through the network registration, CAP included.
    pub async fn welcomed(&mut self) -> Queue {
        let mut upstream = self.connect().await;
        self.upstream(":irc.test CAP * LS :multi-prefix server-time sasl").await;
        self.upstream(":irc.test CAP * ACK :multi-prefix server-time").await;
        self.upstream(":irc.test 001 kiwi :Welcome to the test network kiwi").await;
        self.upstream(":irc.test 002 kiwi :Your host is irc.test").await;
        self.upstream(":irc.test 004 kiwi irc.test testd-1.0 iw ov").await;
        self.upstream(":irc.test 005 kiwi CHANTYPES=# PREFIX=(ov)@+ :are supported by this server")
            .await;
        flush(&mut upstream);
        upstream
    }

    pub async fn upstream(&mut self, line: &str) {
        let msg = Message::parse(line).unwrap();
        self.session.handle_event(SessionEvent::Upstream(msg)).await;
    }

    pub async fn disconnect(&mut self) {
        self.session.handle_event(SessionEvent::UpstreamClosed).await;
    }

    pub fn add_client(&mut self) -> (ClientId, Queue) {
        let (msg_queue, outgoing_msgs) = mpsc::unbounded_channel();
        let id = self.session.attach(msg_queue);
        (id, outgoing_msgs)
    }

    pub async fn add_registered_client(&mut self, nickname: &str) -> (ClientId, Queue) {
        let (id, queue) = self.add_client();
        self.client(id, &format!("NICK :{}", nickname)).await;
        self.client(id, "USER X 0 * :X").await;
        (id, queue)
    }

    /// Same as `add_registered_client`, with capabilities requested first.
    pub async fn add_client_with_caps(&mut self, nickname: &str, caps: &str) -> (ClientId, Queue) {
        let (id, mut queue) = self.add_client();
        self.client(id, "CAP LS 302").await;
        self.client(id, &format!("CAP REQ :{}", caps)).await;
        self.client(id, &format!("NICK :{}", nickname)).await;
        self.client(id, "USER X 0 * :X").await;
        self.client(id, "CAP END").await;
        flush(&mut queue);
        (id, queue)
    }

    pub async fn client(&mut self, id: ClientId, line: &str) {
        let msg = Message::parse(line).unwrap();
        self.session.handle_event(SessionEvent::Client(id, msg)).await;
    }
}

pub fn flush(queue: &mut Queue) {
    while queue.try_recv().is_ok() {}
}

pub fn collect(queue: &mut Queue) -> Vec<Message> {
    let mut res = Vec::new();
    while let Ok(msg) = queue.try_recv() {
        res.push(msg);
    }
    res
}

type ExpectedMessage<'a> = (Option<&'a str>, &'a str, &'a [&'a str]);

pub fn assert_msgs(msgs: &[Message], expected: &[ExpectedMessage<'_>]) {
    for (i, msg) in msgs.iter().enumerate() {
        let (prefix, command, params) = match expected.get(i) {
            Some(expected) => *expected,
            None => panic!("unexpected message #{}: {:?}", i, msg),
        };
        assert_msg(msg, prefix, command, params);
    }
    assert_eq!(msgs.len(), expected.len(), "messages: {:?}", msgs);
}
