//! Message history.
//!
//! PRIVMSG and NOTICE lines, from the network and from clients, are stored per user, network and
//! buffer, so that clients can fetch what they missed through CHATHISTORY.

use crate::state::ConnectionState;
use crate::util;
use async_trait::async_trait;
use kiwibnc_tokens::Message;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug)]
pub enum Error {
    /// A stored line could not be parsed back.
    Corrupted(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted(line) => write!(f, "corrupted stored message: {:?}", line),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns the name of the buffer `msg` belongs to.
///
/// Messages sent to our own nick are filed under the sender's nick, the others under their
/// target.
pub fn buffer_name<'a>(msg: &'a Message, own_nick: &str) -> &'a str {
    let target = msg.param(0);
    if util::eq_nick(target, own_nick) {
        msg.nick()
    } else {
        target
    }
}

/// Returns the id of the message, if any.
pub fn msgid(msg: &Message) -> Option<&str> {
    msg.tag("msgid").or_else(|| msg.tag("draft/msgid"))
}

fn is_stored(msg: &Message) -> bool {
    msg.is("PRIVMSG") || msg.is("NOTICE")
}

/// Storage of messages.
///
/// Times are unix timestamps in milliseconds.  Returned messages are sorted oldest first and
/// carry a `time` tag set to the time they were stored at.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Stores `msg` if it is a PRIVMSG or a NOTICE.  Messages without prefix are ones we sent,
    /// they are stored with our nick as prefix.
    async fn store_message(&self, user: &str, network: &str, msg: &Message, upstream: &ConnectionState) -> Result<()>;

    /// Returns the `limit` most recent messages sent at or before `time`.
    async fn get_messages_before_time(&self, user: &str, network: &str, buffer: &str, time: u64, limit: usize) -> Result<Vec<Message>>;

    /// Returns the `limit` oldest messages sent at or after `time`.
    async fn get_messages_after_time(&self, user: &str, network: &str, buffer: &str, time: u64, limit: usize) -> Result<Vec<Message>>;

    /// Returns the `limit` oldest messages sent between `start` and `end`, inclusive.
    async fn get_messages_between_times(&self, user: &str, network: &str, buffer: &str, start: u64, end: u64, limit: usize) -> Result<Vec<Message>>;

    async fn get_message_by_msgid(&self, user: &str, network: &str, buffer: &str, msgid: &str) -> Result<Option<Message>>;
}

struct Row {
    user: String,
    network: String,
    buffer: String,
    ts: u64,
    msgid: Option<String>,
    line: String,
}

impl Row {
    fn is_in(&self, user: &str, network: &str, buffer: &str) -> bool {
        self.user == user && self.network == network && util::eq_nick(&self.buffer, buffer)
    }

    fn to_message(&self) -> Result<Message> {
        let mut msg = Message::parse(&self.line).ok_or_else(|| Error::Corrupted(self.line.clone()))?;
        msg.tags.insert("time".to_owned(), util::time_str_from_millis(self.ts));
        Ok(msg)
    }
}

/// Keeps messages in memory, sorted by time.
#[derive(Default)]
pub struct MemoryMessageStore {
    rows: Mutex<Vec<Row>>,

    /// Maximum number of rows per buffer, 0 for no limit.
    buffer_capacity: usize,
}

impl MemoryMessageStore {
    /// A store that forgets the oldest messages of a buffer once it holds `buffer_capacity` of
    /// them.
    pub fn with_buffer_capacity(buffer_capacity: usize) -> Self {
        Self {
            rows: Mutex::default(),
            buffer_capacity,
        }
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, Vec<Row>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts the rows of `buffer` selected by `select` into messages.
    ///
    /// `select` gets the matching rows in time order.
    fn query<F>(&self, user: &str, network: &str, buffer: &str, select: F) -> Result<Vec<Message>>
    where
        F: FnOnce(Vec<&Row>) -> Vec<&Row>,
    {
        let rows = self.rows();
        let matching = rows.iter().filter(|row| row.is_in(user, network, buffer)).collect();
        select(matching).into_iter().map(Row::to_message).collect()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn store_message(&self, user: &str, network: &str, msg: &Message, upstream: &ConnectionState) -> Result<()> {
        if !is_stored(msg) {
            return Ok(());
        }

        let mut stored = msg.clone();
        if stored.prefix.is_empty() {
            stored.prefix = upstream.nick.clone();
        }
        let ts = msg
            .tag("time")
            .and_then(util::parse_time_millis)
            .unwrap_or_else(util::time_millis);
        stored.tags.remove("time");

        let row = Row {
            user: user.to_owned(),
            network: network.to_owned(),
            buffer: buffer_name(msg, &upstream.nick).to_owned(),
            ts,
            msgid: msgid(msg).map(str::to_owned),
            line: stored.to_string(),
        };

        let mut rows = self.rows();
        let pos = rows.iter().rposition(|r| r.ts <= ts).map_or(0, |i| i + 1);
        rows.insert(pos, row);

        if self.buffer_capacity != 0 {
            let row = &rows[pos];
            let (user, network, buffer) = (row.user.clone(), row.network.clone(), row.buffer.clone());
            let count = rows.iter().filter(|r| r.is_in(&user, &network, &buffer)).count();
            if self.buffer_capacity < count {
                let mut excess = count - self.buffer_capacity;
                rows.retain(|r| {
                    if excess != 0 && r.is_in(&user, &network, &buffer) {
                        excess -= 1;
                        return false;
                    }
                    true
                });
            }
        }
        Ok(())
    }

    async fn get_messages_before_time(&self, user: &str, network: &str, buffer: &str, time: u64, limit: usize) -> Result<Vec<Message>> {
        self.query(user, network, buffer, |rows| {
            let before: Vec<_> = rows.into_iter().filter(|r| r.ts <= time).collect();
            let skip = before.len().saturating_sub(limit);
            before.into_iter().skip(skip).collect()
        })
    }

    async fn get_messages_after_time(&self, user: &str, network: &str, buffer: &str, time: u64, limit: usize) -> Result<Vec<Message>> {
        self.query(user, network, buffer, |rows| {
            rows.into_iter().filter(|r| time <= r.ts).take(limit).collect()
        })
    }

    async fn get_messages_between_times(&self, user: &str, network: &str, buffer: &str, start: u64, end: u64, limit: usize) -> Result<Vec<Message>> {
        self.query(user, network, buffer, |rows| {
            rows.into_iter()
                .filter(|r| start <= r.ts && r.ts <= end)
                .take(limit)
                .collect()
        })
    }

    async fn get_message_by_msgid(&self, user: &str, network: &str, buffer: &str, msgid: &str) -> Result<Option<Message>> {
        let rows = self.rows();
        rows.iter()
            .find(|row| row.is_in(user, network, buffer) && row.msgid.as_deref() == Some(msgid))
            .map(Row::to_message)
            .transpose()
    }
}
