//! The CHATHISTORY command.
//!
//! Clients fetch stored messages with:
//!
//! ```text
//! CHATHISTORY LATEST  <target> <* | timestamp=T | msgid=M> <count>
//! CHATHISTORY BEFORE  <target> <timestamp=T | msgid=M> <count>
//! CHATHISTORY AFTER   <target> <timestamp=T | msgid=M> <count>
//! CHATHISTORY AROUND  <target> <timestamp=T | msgid=M> <count>
//! CHATHISTORY BETWEEN <target> <timestamp=T | msgid=M> <timestamp=T | msgid=M> <count>
//! ```
//!
//! The command is answered by kiwibnc and never reaches the network.

use crate::client::Client;
use crate::features::BATCH;
use crate::hooks::{Event, EventKind, Handler, HookResult, Hooks, MessageFromClient};
use crate::history::MessageStore;
use crate::util;
use async_trait::async_trait;
use kiwibnc_tokens::Message;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};

pub const DEFAULT_LIMIT: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Subcommand {
    Latest,
    Before,
    After,
    Around,
    Between,
}

impl Subcommand {
    fn from_param(s: &str) -> Option<Self> {
        match s {
            "LATEST" => Some(Self::Latest),
            "BEFORE" => Some(Self::Before),
            "AFTER" => Some(Self::After),
            "AROUND" => Some(Self::Around),
            "BETWEEN" => Some(Self::Between),
            _ => None,
        }
    }
}

/// Parses a message count, clamped to `[-limit, limit]`.  Returns its absolute value.
fn parse_count(s: &str, limit: usize) -> usize {
    match s.parse::<i64>() {
        Ok(n) => (n.unsigned_abs() as usize).min(limit),
        Err(_) => limit,
    }
}

/// The CHATHISTORY handler.  Clones share the store and the batch id generator.
#[derive(Clone)]
pub struct ChatHistory {
    store: Arc<dyn MessageStore>,
    user: String,
    server_name: String,
    limit: usize,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn MessageStore>, user: &str, server_name: &str, limit: usize) -> Self {
        let seed = util::time_millis() ^ u64::from(std::process::id()) << 32;
        Self {
            store,
            user: user.to_owned(),
            server_name: server_name.to_owned(),
            limit,
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    pub fn register(self, hooks: &mut Hooks) {
        hooks.on(EventKind::AvailableIsupports, self.clone());
        hooks.on(EventKind::MessageFromClient, self);
    }

    fn batch_id(&self) -> String {
        let mut bytes = [0; 9];
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .fill_bytes(&mut bytes);
        base64::encode_config(&bytes, base64::URL_SAFE_NO_PAD)
    }

    /// Resolves a `*`, `timestamp=` or `msgid=` selector into unix milliseconds.
    ///
    /// Selectors that cannot be resolved give the current time.
    async fn selector_time(&self, network: &str, target: &str, selector: &str) -> HookResult<u64> {
        let mut split = selector.splitn(2, '=');
        let kind = split.next().unwrap_or("");
        let value = split.next().unwrap_or("");

        let time = match kind {
            "timestamp" => util::parse_time_millis(value),
            "msgid" => self
                .store
                .get_message_by_msgid(&self.user, network, target, value)
                .await?
                .and_then(|msg| msg.tag("time").and_then(util::parse_time_millis)),
            _ => None,
        };
        Ok(time.unwrap_or_else(util::time_millis))
    }

    async fn fetch(&self, network: &str, msg: &Message) -> HookResult<(String, Vec<Message>)> {
        let sub = Subcommand::from_param(&msg.param_upper(0));
        let target = msg.param(1);
        let time = self.selector_time(network, target, msg.param(2)).await?;

        let store = &self.store;
        let user = self.user.as_str();
        let messages = match sub {
            Some(Subcommand::Latest) | Some(Subcommand::Before) => {
                let count = parse_count(msg.param(3), self.limit);
                store.get_messages_before_time(user, network, target, time, count).await?
            }
            Some(Subcommand::After) => {
                let count = parse_count(msg.param(3), self.limit);
                store.get_messages_after_time(user, network, target, time, count).await?
            }
            Some(Subcommand::Around) => {
                let count = parse_count(msg.param(3), self.limit);
                let half = count / 2;
                let mut messages = store.get_messages_before_time(user, network, target, time, half).await?;
                let after = store
                    .get_messages_after_time(user, network, target, time.saturating_add(1), count - half)
                    .await?;
                messages.extend(after);
                messages
            }
            Some(Subcommand::Between) => {
                let end = self.selector_time(network, target, msg.param(3)).await?;
                let count = parse_count(msg.param(4), self.limit);
                let (start, end) = if time <= end { (time, end) } else { (end, time) };
                store.get_messages_between_times(user, network, target, start, end, count).await?
            }
            None => {
                log::debug!("Unknown CHATHISTORY subcommand {:?}", msg.param(0));
                Vec::new()
            }
        };
        Ok((target.to_owned(), messages))
    }

    /// Wraps `messages` in a chathistory batch if the client supports batches.
    fn batch(&self, client: &Client, target: &str, mut messages: Vec<Message>) -> Vec<Message> {
        if !client.state.has_cap(BATCH) {
            return messages;
        }

        let id = self.batch_id();
        for msg in &mut messages {
            msg.tags.insert("batch".to_owned(), id.clone());
        }
        let start = Message::new("BATCH")
            .with_prefix(self.server_name.as_str())
            .with_params(vec![format!("+{}", id), "chathistory".to_owned(), target.to_owned()]);
        let end = Message::new("BATCH")
            .with_prefix(self.server_name.as_str())
            .with_param(format!("-{}", id));
        messages.insert(0, start);
        messages.push(end);
        messages
    }

    async fn answer(&self, event: &mut MessageFromClient<'_>) -> HookResult {
        event.prevent_default();
        event.passthru = false;

        let network = event.upstream.id.clone();
        let (target, messages) = self.fetch(&network, &event.message).await?;
        log::debug!(
            "{}: CHATHISTORY {} for {}, {} messages",
            network,
            event.message.param_upper(0),
            target,
            messages.len()
        );
        let replies = self.batch(event.client, &target, messages);
        event.replies.extend(replies);
        Ok(())
    }
}

#[async_trait]
impl Handler for ChatHistory {
    async fn handle(&self, event: &mut Event<'_, '_>) -> HookResult {
        match event {
            Event::AvailableIsupports(e) => {
                e.tokens.push(format!("CHATHISTORY={}", self.limit));
            }
            Event::MessageFromClient(e) if e.message.is("CHATHISTORY") => {
                self.answer(e).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryMessageStore;
    use crate::hooks::AvailableIsupports;
    use crate::state::ConnectionState;
    use kiwibnc_tokens::assert_msg;
    use tokio::sync::mpsc;

    const BASE: u64 = 1_577_836_800_000;

    async fn setup() -> (Hooks, ConnectionState) {
        let store = Arc::new(MemoryMessageStore::default());
        let mut upstream = ConnectionState::new("libera");
        upstream.nick = "kiwi".to_owned();
        for i in 0..10 {
            let msg = Message::parse(&format!(":aji!a@host PRIVMSG #kiwi :message {}", i))
                .unwrap()
                .with_tag("time", util::time_str_from_millis(BASE + i * 1000))
                .with_tag("msgid", format!("id{}", i));
            store.store_message("alice", "libera", &msg, &upstream).await.unwrap();
        }

        let mut hooks = Hooks::default();
        ChatHistory::new(store, "alice", "bnc.test", 5).register(&mut hooks);
        (hooks, upstream)
    }

    async fn run(hooks: &Hooks, upstream: &ConnectionState, caps: &[&str], line: &str) -> Vec<Message> {
        let (queue, mut rx) = mpsc::unbounded_channel();
        let mut client = Client::new(0, queue);
        client.state.caps = caps.iter().map(|&c| c.to_owned()).collect();

        let mut payload = MessageFromClient::new(&mut client, upstream, Message::parse(line).unwrap());
        hooks.emit(Event::from(&mut payload)).await.unwrap();
        assert!(!payload.forward());
        let replies = payload.replies;
        assert!(rx.try_recv().is_err());
        replies
    }

    fn texts(msgs: &[Message]) -> Vec<&str> {
        msgs.iter().filter(|m| m.is("PRIVMSG")).map(|m| m.param(1)).collect()
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("3", 50), 3);
        assert_eq!(parse_count("-3", 50), 3);
        assert_eq!(parse_count("100", 50), 50);
        assert_eq!(parse_count("-100", 50), 50);
        assert_eq!(parse_count("lots", 50), 50);
    }

    #[tokio::test]
    async fn test_isupport() {
        let (hooks, _) = setup().await;
        let mut payload = AvailableIsupports::default();
        hooks.emit(Event::from(&mut payload)).await.unwrap();
        assert_eq!(payload.tokens, vec!["CHATHISTORY=5"]);
    }

    #[tokio::test]
    async fn test_latest_batch() {
        let (hooks, upstream) = setup().await;
        let msgs = run(&hooks, &upstream, &[BATCH], "CHATHISTORY LATEST #kiwi * 2").await;
        assert_eq!(msgs.len(), 4);
        assert_msg(&msgs[0], Some("bnc.test"), "BATCH", &["", "chathistory", "#kiwi"]);
        let id = &msgs[0].param(0)[1..];
        assert!(msgs[0].param(0).starts_with('+'));
        assert_eq!(texts(&msgs), vec!["message 8", "message 9"]);
        assert_eq!(msgs[1].tag("batch"), Some(id));
        assert_eq!(msgs[2].tag("batch"), Some(id));
        assert_msg(&msgs[3], Some("bnc.test"), "BATCH", &[&format!("-{}", id)]);
    }

    #[tokio::test]
    async fn test_no_batch_cap() {
        let (hooks, upstream) = setup().await;
        let msgs = run(&hooks, &upstream, &[], "CHATHISTORY LATEST #kiwi * 2").await;
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.tag("batch").is_none()));
    }

    #[tokio::test]
    async fn test_selectors() {
        let (hooks, upstream) = setup().await;

        let msgs = run(&hooks, &upstream, &[], "CHATHISTORY BEFORE #kiwi msgid=id4 2").await;
        assert_eq!(texts(&msgs), vec!["message 3", "message 4"]);

        let line = format!("CHATHISTORY AFTER #kiwi timestamp={} 3", util::time_str_from_millis(BASE + 6000));
        let msgs = run(&hooks, &upstream, &[], &line).await;
        assert_eq!(texts(&msgs), vec!["message 6", "message 7", "message 8"]);

        let line = format!(
            "CHATHISTORY BETWEEN #kiwi timestamp={} msgid=id3 50",
            util::time_str_from_millis(BASE + 1000)
        );
        let msgs = run(&hooks, &upstream, &[], &line).await;
        assert_eq!(texts(&msgs), vec!["message 1", "message 2", "message 3"]);

        let msgs = run(&hooks, &upstream, &[], "CHATHISTORY AROUND #kiwi msgid=id5 4").await;
        assert_eq!(texts(&msgs), vec!["message 4", "message 5", "message 6", "message 7"]);

        // Unknown msgids mean now.
        let msgs = run(&hooks, &upstream, &[], "CHATHISTORY BEFORE #kiwi msgid=nope 1").await;
        assert_eq!(texts(&msgs), vec!["message 9"]);
    }

    #[tokio::test]
    async fn test_other_commands() {
        let (hooks, upstream) = setup().await;
        let (queue, _rx) = mpsc::unbounded_channel();
        let mut client = Client::new(0, queue);
        let mut payload = MessageFromClient::new(&mut client, &upstream, Message::parse("PRIVMSG #kiwi :hi").unwrap());
        hooks.emit(Event::from(&mut payload)).await.unwrap();
        assert!(payload.forward());
        assert!(payload.replies.is_empty());
    }
}
