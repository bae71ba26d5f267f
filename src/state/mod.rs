//! Durable state of an upstream connection.
//!
//! A `ConnectionState` is everything kiwibnc needs to present an upstream session to a client
//! that attaches later, or to pick the session back up after a reconnect or a restart: the nick,
//! the ISUPPORT tokens, the negotiated capabilities, the registration burst, and the buffers
//! (channels and private conversations).
//!
//! The state is owned by the upstream session.  It is loaded lazily from a `StateStore` and
//! saved after each mutation.

use crate::util;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, io};

pub use self::store::{FileStore, MemoryStore, StateStore};

mod store;

const DEFAULT_CHANTYPES: &str = "#&";

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Format(serde_json::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Format(err) => Some(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(val: io::Error) -> Self { Self::Io(val) }
}

impl From<serde_json::Error> for Error {
    fn from(val: serde_json::Error) -> Self { Self::Format(val) }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::Format(err) => write!(f, "corrupted state: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What the connection is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    /// kiwibnc connecting to an IRC network.
    Outgoing,
    /// A client connecting to kiwibnc.
    Incoming,
    /// A link to another server.
    Server,
}

impl Default for ConnectionType {
    fn default() -> Self { Self::Outgoing }
}

/// A named conversation: a channel or a private query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Buffer {
    pub name: String,
    pub key: String,
    pub joined: bool,
    pub topic: Option<String>,
    pub is_channel: bool,
}

impl Buffer {
    pub fn new(name: &str, is_channel: bool) -> Self {
        Self {
            name: name.to_owned(),
            is_channel,
            ..Self::default()
        }
    }
}

/// Key used in `ConnectionState::buffers`.
///
/// Buffer lookups ignore case (rfc1459 casemapping), the original spelling is kept in
/// `Buffer::name`.
fn buffer_key(name: &str) -> String {
    util::irc_lowercase(name)
}

/// State of an upstream session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionState {
    /// Identifies the connection across restarts.
    pub id: String,

    pub host: String,
    pub port: u16,
    pub tls: bool,
    #[serde(rename = "type")]
    pub kind: ConnectionType,
    pub connected: bool,

    /// The nickname the network knows us by.
    pub nick: String,

    /// Raw ISUPPORT tokens, in the order the network sent them.
    pub isupports: Vec<String>,

    /// Capabilities the network acknowledged.
    pub caps: Vec<String>,

    pub buffers: BTreeMap<String, Buffer>,

    /// 001, 002, 004 and 005 lines, without the nick parameter.  Replayed to clients that attach
    /// after the network registration.
    pub registration_lines: Vec<(String, Vec<String>)>,

    pub net_registered: bool,

    /// Prefix of the 001 line, that is the name of the server we are connected to.
    pub server_prefix: String,

    /// Whether PRIVMSG and NOTICE go to the message history.
    pub logging: bool,

    /// Unix time in milliseconds of the last successful save.
    pub last_state_save: u64,

    #[serde(skip)]
    loaded: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            id: String::new(),
            host: String::new(),
            port: 6667,
            tls: false,
            kind: ConnectionType::Outgoing,
            connected: false,
            nick: String::new(),
            isupports: Vec::new(),
            caps: Vec::new(),
            buffers: BTreeMap::new(),
            registration_lines: Vec::new(),
            net_registered: false,
            server_prefix: String::new(),
            logging: false,
            last_state_save: 0,
            loaded: false,
        }
    }
}

impl ConnectionState {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            ..Self::default()
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Loads the state from `store` if it has not been loaded yet.  Returns whether it is loaded.
    pub async fn maybe_load(&mut self, store: &dyn StateStore) -> bool {
        if !self.loaded {
            self.load(store).await;
        }
        self.loaded
    }

    /// Replaces the in-memory state with the stored one.
    ///
    /// When nothing is stored yet, the capabilities, ISUPPORT tokens and buffers are reset.  A
    /// store failure is logged and leaves the in-memory state as it is, not loaded: it will not
    /// be saved over the stored one until a load succeeds.
    pub async fn load(&mut self, store: &dyn StateStore) -> bool {
        match store.load(&self.id).await {
            Ok(Some(saved)) => {
                let id = std::mem::take(&mut self.id);
                *self = saved;
                self.id = id;
            }
            Ok(None) => {
                self.isupports.clear();
                self.caps.clear();
                self.buffers.clear();
            }
            Err(err) => {
                log::warn!("{}: Failed to load state: {}", self.id, err);
                return false;
            }
        }
        self.loaded = true;
        true
    }

    /// Writes the state to `store`.
    ///
    /// Failures are logged only: the in-memory state stays authoritative until the next
    /// successful save.  If the state could not be loaded before, the stored one is read first
    /// and its buffers are merged in, so that they are not overwritten.
    pub async fn save(&mut self, store: &dyn StateStore) {
        if !self.loaded {
            match store.load(&self.id).await {
                Ok(saved) => {
                    if let Some(saved) = saved {
                        self.merge_buffers(saved);
                    }
                    self.loaded = true;
                }
                Err(err) => {
                    log::warn!("{}: State not loaded, not saving: {}", self.id, err);
                    return;
                }
            }
        }
        self.last_state_save = util::time_millis();
        if let Err(err) = store.save(self).await {
            log::warn!("{}: Failed to save state: {}", self.id, err);
        }
    }

    /// Takes the buffers of `saved` this state does not know about.
    fn merge_buffers(&mut self, saved: ConnectionState) {
        for (key, buffer) in saved.buffers {
            self.buffers.entry(key).or_insert(buffer);
        }
    }

    /// Removes the state from `store`, for good.
    pub async fn destroy(&self, store: &dyn StateStore) -> Result<()> {
        store.destroy(&self.id).await
    }

    /// Forgets what was learnt during the last network registration.
    ///
    /// Buffers are kept, so that joined channels can be joined again.
    pub fn reset_registration(&mut self) {
        self.net_registered = false;
        self.isupports.clear();
        self.caps.clear();
        self.registration_lines.clear();
    }

    pub fn has_cap(&self, cap: &str) -> bool {
        self.caps.iter().any(|c| c == cap)
    }

    /// Returns the value of the given ISUPPORT token.  Tokens without value map to `""`.
    ///
    /// The last occurence wins, as networks may update tokens.
    pub fn isupport(&self, name: &str) -> Option<&str> {
        self.isupports.iter().rev().find_map(|token| {
            let mut split = token.splitn(2, '=');
            if split.next()? == name {
                Some(split.next().unwrap_or(""))
            } else {
                None
            }
        })
    }

    /// Returns the prefix symbols of the PREFIX token, e.g. `~&@%+` for `PREFIX=(qaohv)~&@%+`.
    pub fn prefix_symbols(&self) -> &str {
        prefix_symbols(self.isupport("PREFIX").unwrap_or(""))
    }

    pub fn is_channel_name(&self, name: &str) -> bool {
        let chantypes = self.isupport("CHANTYPES").unwrap_or(DEFAULT_CHANTYPES);
        name.chars().next().map_or(false, |c| chantypes.contains(c))
    }

    pub fn get_buffer(&self, name: &str) -> Option<&Buffer> {
        self.buffers.get(&buffer_key(name))
    }

    pub fn get_buffer_mut(&mut self, name: &str) -> Option<&mut Buffer> {
        self.buffers.get_mut(&buffer_key(name))
    }

    /// Adds a buffer, replacing any buffer of the same name.
    pub fn add_buffer(&mut self, name: &str) -> &mut Buffer {
        let buffer = Buffer::new(name, self.is_channel_name(name));
        let key = buffer_key(name);
        self.buffers.insert(key.clone(), buffer);
        self.buffers.entry(key).or_default()
    }

    /// Returns the buffer named `name` and whether it has just been created.
    pub fn get_or_add_buffer(&mut self, name: &str) -> (&mut Buffer, bool) {
        let is_channel = self.is_channel_name(name);
        let mut created = false;
        let buffer = self.buffers.entry(buffer_key(name)).or_insert_with(|| {
            created = true;
            Buffer::new(name, is_channel)
        });
        (buffer, created)
    }

    /// Renames a buffer, keeping everything else about it.  Returns false if there is no buffer
    /// named `old`.
    pub fn rename_buffer(&mut self, old: &str, new: &str) -> bool {
        match self.buffers.remove(&buffer_key(old)) {
            Some(mut buffer) => {
                buffer.name = new.to_owned();
                self.buffers.insert(buffer_key(new), buffer);
                true
            }
            None => false,
        }
    }

    /// Channel buffers we were in, in the order they are stored.
    pub fn joined_channels(&self) -> impl Iterator<Item = &Buffer> + '_ {
        self.buffers.values().filter(|b| b.is_channel && b.joined)
    }
}

/// Extracts the prefix symbols from the value of a PREFIX token.
///
/// `(qaohv)~&@%+` gives `~&@%+`.
pub fn prefix_symbols(value: &str) -> &str {
    match value.find(')') {
        Some(i) => &value[i + 1..],
        None => value,
    }
}
