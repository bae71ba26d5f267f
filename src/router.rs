//! Routing of replies to the clients that asked for them.
//!
//! All clients share the upstream connection, so when the network answers a WHOIS, only the
//! client that sent it should see the answer.  When a client sends a command that has a known set
//! of replies, an expectation is queued in its `ClientState`.  Replies that some client expects
//! only go to these clients, other messages go to everyone.

use crate::client::{Client, ClientState};
use crate::hooks::{Event, EventKind, Handler, HookResult, Hooks, MessageToClients};
use crate::state::ConnectionState;
use async_trait::async_trait;
use kiwibnc_tokens::{rpl, Message};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Key of the expectation queue in the client scratch space.
pub const EXPECTING_REPLIES: &str = "expecting_replies";

/// A reply the network may send in response to a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    pub cmd: &'static str,

    /// Whether no more replies follow this one.
    pub ending: bool,
}

const fn reply(cmd: &'static str) -> Reply {
    Reply { cmd, ending: false }
}

const fn ending(cmd: &'static str) -> Reply {
    Reply { cmd, ending: true }
}

const WHOIS: &[Reply] = &[
    reply(rpl::WHOISCERTFP),
    reply(rpl::AWAY),
    reply(rpl::WHOISREGNICK),
    reply(rpl::WHOISUSER),
    reply(rpl::WHOISSERVER),
    reply(rpl::WHOISOPERATOR),
    reply(rpl::WHOISIDLE),
    reply(rpl::WHOISCHANNELS),
    reply(rpl::WHOISSPECIAL),
    reply(rpl::WHOISACCOUNT),
    reply(rpl::WHOISACTUALLY),
    reply(rpl::WHOISHOST),
    reply(rpl::WHOISMODES),
    reply(rpl::WHOISSECURE),
    reply(rpl::ERR_NOSUCHNICK),
    ending(rpl::ERR_NOSUCHSERVER),
    ending(rpl::ENDOFWHOIS),
];

const WHOWAS: &[Reply] = &[
    reply(rpl::WHOWASUSER),
    reply(rpl::WHOISSERVER),
    reply(rpl::WHOISACTUALLY),
    reply(rpl::ERR_WASNOSUCHNICK),
    ending(rpl::ENDOFWHOWAS),
];

const WHO: &[Reply] = &[reply(rpl::WHOREPLY), reply(rpl::WHOSPCRPL), ending(rpl::ENDOFWHO)];

const NAMES: &[Reply] = &[reply(rpl::NAMREPLY), ending(rpl::ENDOFNAMES)];

const LIST: &[Reply] = &[reply(rpl::LISTSTART), reply(rpl::LIST), ending(rpl::LISTEND)];

const MOTD: &[Reply] = &[
    reply(rpl::MOTDSTART),
    reply(rpl::MOTD),
    ending(rpl::ENDOFMOTD),
    ending(rpl::ERR_NOMOTD),
];

const LUSERS: &[Reply] = &[
    reply(rpl::LUSERCLIENT),
    reply(rpl::LUSEROP),
    reply(rpl::LUSERUNKNOWN),
    reply(rpl::LUSERCHANNELS),
    reply(rpl::LUSERME),
    reply(rpl::LOCALUSERS),
    ending(rpl::GLOBALUSERS),
];

const TOPIC: &[Reply] = &[
    ending(rpl::NOTOPIC),
    reply(rpl::TOPIC),
    ending(rpl::TOPICWHOTIME),
    ending(rpl::ERR_NOTONCHANNEL),
    ending(rpl::ERR_NOSUCHCHANNEL),
];

const CHANNEL_MODES: &[Reply] = &[
    ending(rpl::CHANNELMODEIS),
    reply(rpl::CREATIONTIME),
    ending(rpl::ERR_NOSUCHCHANNEL),
];

const BAN_LIST: &[Reply] = &[
    reply(rpl::BANLIST),
    ending(rpl::ENDOFBANLIST),
    ending(rpl::ERR_CHANOPRIVSNEEDED),
];

const EXCEPT_LIST: &[Reply] = &[
    reply(rpl::EXCEPTLIST),
    ending(rpl::ENDOFEXCEPTLIST),
    ending(rpl::ERR_CHANOPRIVSNEEDED),
];

const INVITE_LIST: &[Reply] = &[
    reply(rpl::INVITELIST),
    ending(rpl::ENDOFINVITELIST),
    ending(rpl::ERR_CHANOPRIVSNEEDED),
];

const ADMIN: &[Reply] = &[
    reply(rpl::ADMINME),
    reply(rpl::ADMINLOC1),
    reply(rpl::ADMINLOC2),
    ending(rpl::ADMINMAIL),
    ending(rpl::ERR_NOSUCHSERVER),
];

const INFO: &[Reply] = &[reply(rpl::INFO), ending(rpl::ENDOFINFO)];

const VERSION: &[Reply] = &[ending(rpl::VERSION), ending(rpl::ERR_NOSUCHSERVER)];

const TIME: &[Reply] = &[ending(rpl::TIME), ending(rpl::ERR_NOSUCHSERVER)];

const USERHOST: &[Reply] = &[ending(rpl::USERHOST)];

const ISON: &[Reply] = &[ending(rpl::ISON)];

/// Returns the replies the network sends back for `msg`, or `None` if they do not need routing.
///
/// `upstream` tells channel names apart from nicknames, for MODE.
pub fn expected_replies(msg: &Message, upstream: &ConnectionState) -> Option<&'static [Reply]> {
    let replies = match msg.command.as_str() {
        "WHOIS" => WHOIS,
        "WHOWAS" => WHOWAS,
        "WHO" => WHO,
        "NAMES" => NAMES,
        "LIST" => LIST,
        "MOTD" => MOTD,
        "LUSERS" => LUSERS,
        "TOPIC" if msg.params.len() == 1 => TOPIC,
        "MODE" => match msg.params.len() {
            1 if upstream.is_channel_name(msg.param(0)) => CHANNEL_MODES,
            2 => match msg.param(1).trim_start_matches('+') {
                "b" => BAN_LIST,
                "e" => EXCEPT_LIST,
                "I" => INVITE_LIST,
                _ => return None,
            },
            _ => return None,
        },
        "ADMIN" => ADMIN,
        "INFO" => INFO,
        "VERSION" => VERSION,
        "TIME" => TIME,
        "USERHOST" => USERHOST,
        "ISON" => ISON,
        _ => return None,
    };
    Some(replies)
}

/// An expectation queued for one client.
#[derive(Clone, Debug)]
pub struct Expectation {
    /// The command the client sent.
    pub command: String,
    pub replies: &'static [Reply],
    pub added_at: Instant,
}

impl Expectation {
    fn expects(&self, command: &str) -> bool {
        self.replies.iter().any(|r| r.cmd == command)
    }

    fn ends_with(&self, command: &str) -> bool {
        self.replies.iter().any(|r| r.cmd == command && r.ending)
    }
}

/// The reply router.
///
/// Expectations older than `timeout` are dropped, in case the network never sends the ending
/// reply.  A zero timeout keeps them forever.
#[derive(Clone, Copy, Debug)]
pub struct ReplyRouter {
    timeout: Duration,
}

impl ReplyRouter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Subscribes the router to `hooks`.
    pub fn register(self, hooks: &mut Hooks) {
        hooks.on(EventKind::MessageToClients, self);
        hooks.on(EventKind::MessageFromClient, self);
    }

    /// Discards the expired expectations of `client`, and returns the remaining ones.
    fn expectations<'c>(&self, client: &'c mut ClientState, now: Instant) -> Option<&'c mut Vec<Expectation>> {
        let timeout = self.timeout;
        let queue = client.temp_get_mut::<Vec<Expectation>>(EXPECTING_REPLIES)?;
        if timeout != Duration::from_secs(0) {
            queue.retain(|e| now.saturating_duration_since(e.added_at) < timeout);
        }
        if queue.is_empty() {
            client.temp_set::<Vec<Expectation>>(EXPECTING_REPLIES, None);
            return None;
        }
        client.temp_get_mut(EXPECTING_REPLIES)
    }

    /// Queues an expectation for `client` if `msg` has routed replies.
    pub fn expect(
        &self,
        client: &mut ClientState,
        upstream: &ConnectionState,
        msg: &Message,
        now: Instant,
    ) {
        let replies = match expected_replies(msg, upstream) {
            Some(replies) => replies,
            None => return,
        };
        let expectation = Expectation {
            command: msg.command.clone(),
            replies,
            added_at: now,
        };
        log::debug!(
            "Client now expecting one of {}",
            replies.iter().map(|r| r.cmd).collect::<Vec<_>>().join(" ")
        );
        match self.expectations(client, now) {
            Some(queue) => queue.push(expectation),
            None => client.temp_set(EXPECTING_REPLIES, Some(vec![expectation])),
        }
    }

    /// Narrows `clients` to those expecting `msg`, if any, and settles ended expectations.
    pub fn route(&self, clients: &mut Vec<&mut Client>, msg: &Message, now: Instant) {
        let command = msg.command.to_ascii_uppercase();

        let mut expecting = HashSet::new();
        for client in clients.iter_mut() {
            let id = client.id();
            if let Some(queue) = self.expectations(&mut client.state, now) {
                if queue.iter().any(|e| e.expects(&command)) {
                    expecting.insert(id);
                }
            }
        }
        if expecting.is_empty() {
            return;
        }

        log::debug!("Client was expecting {}", command);
        clients.retain(|client| expecting.contains(&client.id()));

        for client in clients.iter_mut() {
            let state = &mut client.state;
            let empty = match state.temp_get_mut::<Vec<Expectation>>(EXPECTING_REPLIES) {
                Some(queue) => {
                    queue.retain(|e| !e.ends_with(&command));
                    queue.is_empty()
                }
                None => true,
            };
            if empty {
                state.temp_set::<Vec<Expectation>>(EXPECTING_REPLIES, None);
            }
        }
    }

    fn route_event(&self, event: &mut MessageToClients<'_>, now: Instant) {
        self.route(&mut event.clients, event.message, now);
    }
}

#[async_trait]
impl Handler for ReplyRouter {
    async fn handle(&self, event: &mut Event<'_, '_>) -> HookResult {
        let now = Instant::now();
        match event {
            Event::MessageToClients(e) => self.route_event(e, now),
            Event::MessageFromClient(e) => {
                self.expect(&mut e.client.state, e.upstream, &e.message, now);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Number of expectations queued for `client`, expired ones included.
pub fn pending(client: &ClientState) -> usize {
    client
        .temp_get::<Vec<Expectation>>(EXPECTING_REPLIES)
        .map_or(0, Vec::len)
}
