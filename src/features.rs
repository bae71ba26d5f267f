//! Capabilities kiwibnc offers to its clients.
//!
//! The network speaks to kiwibnc with every capability kiwibnc could negotiate, but each client
//! picks its own set.  The handlers in this module advertise the capabilities during CAP LS, and
//! downgrade the messages going to a client that did not ask for them.
//!
//! Each feature subscribes on its own.  Its rewrite is a plain function of the message, the
//! client's state and the upstream state, the handler only picks the payload out of the event.

use crate::client::ClientState;
use crate::hooks::{Event, EventKind, Handler, HookResult, Hooks};
use crate::state::ConnectionState;
use crate::util;
use async_trait::async_trait;
use kiwibnc_tokens::{rpl, Message};

pub const SERVER_TIME: &str = "server-time";
pub const AWAY_NOTIFY: &str = "away-notify";
pub const ACCOUNT_NOTIFY: &str = "account-notify";
pub const ACCOUNT_TAG: &str = "account-tag";
pub const EXTENDED_JOIN: &str = "extended-join";
pub const MULTI_PREFIX: &str = "multi-prefix";
pub const USERHOST_IN_NAMES: &str = "userhost-in-names";
pub const BATCH: &str = "batch";

/// A capability kiwibnc offers to clients, subscribed to the pipeline on its own.
#[derive(Clone, Copy)]
pub struct Feature {
    pub cap: &'static str,

    /// Whether the capability can be offered on this connection.
    offered: fn(&ConnectionState) -> bool,

    /// Rewrites a message going to a client.  Returns true if the client must not get it.
    rewrite: fn(&mut Message, &ClientState, &ConnectionState) -> bool,
}

fn always(_: &ConnectionState) -> bool {
    true
}

fn upstream_extended_join(upstream: &ConnectionState) -> bool {
    upstream.has_cap(EXTENDED_JOIN)
}

fn no_rewrite(_: &mut Message, _: &ClientState, _: &ConnectionState) -> bool {
    false
}

fn rewrite_server_time(msg: &mut Message, client: &ClientState, _: &ConnectionState) -> bool {
    server_time(msg, client);
    false
}

fn rewrite_away_notify(msg: &mut Message, client: &ClientState, _: &ConnectionState) -> bool {
    hides_away(msg, client)
}

fn rewrite_account_notify(msg: &mut Message, client: &ClientState, _: &ConnectionState) -> bool {
    hides_account(msg, client)
}

fn rewrite_account_tag(msg: &mut Message, client: &ClientState, _: &ConnectionState) -> bool {
    account_tag(msg, client);
    false
}

fn rewrite_extended_join(msg: &mut Message, client: &ClientState, _: &ConnectionState) -> bool {
    extended_join(msg, client);
    false
}

fn rewrite_multi_prefix(msg: &mut Message, client: &ClientState, upstream: &ConnectionState) -> bool {
    multi_prefix(msg, client, upstream);
    false
}

fn rewrite_userhost_in_names(msg: &mut Message, client: &ClientState, upstream: &ConnectionState) -> bool {
    userhost_in_names(msg, client, upstream);
    false
}

/// Every feature, in the order they are advertised and applied.
pub const FEATURES: &[Feature] = &[
    Feature { cap: BATCH,             offered: always,                 rewrite: no_rewrite },
    Feature { cap: SERVER_TIME,       offered: always,                 rewrite: rewrite_server_time },
    Feature { cap: AWAY_NOTIFY,       offered: always,                 rewrite: rewrite_away_notify },
    Feature { cap: ACCOUNT_NOTIFY,    offered: always,                 rewrite: rewrite_account_notify },
    Feature { cap: ACCOUNT_TAG,       offered: always,                 rewrite: rewrite_account_tag },
    Feature { cap: EXTENDED_JOIN,     offered: upstream_extended_join, rewrite: rewrite_extended_join },
    Feature { cap: MULTI_PREFIX,      offered: always,                 rewrite: rewrite_multi_prefix },
    Feature { cap: USERHOST_IN_NAMES, offered: always,                 rewrite: rewrite_userhost_in_names },
];

/// Subscribes every feature to `hooks`, each with its own handlers.
///
/// A feature that halts a message stops the features subscribed after it.
pub fn register(hooks: &mut Hooks) {
    for &feature in FEATURES {
        hooks.on(EventKind::AvailableCaps, feature);
        hooks.on(EventKind::MessageToClient, feature);
    }
}

#[async_trait]
impl Handler for Feature {
    async fn handle(&self, event: &mut Event<'_, '_>) -> HookResult {
        match event {
            Event::AvailableCaps(e) => {
                if (self.offered)(e.upstream) {
                    e.caps.push(self.cap.to_owned());
                }
            }
            Event::MessageToClient(e) => {
                if (self.rewrite)(&mut e.message, e.client, e.upstream) {
                    e.halt = true;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Makes sure clients with server-time get a `time` tag, and others don't.
pub fn server_time(msg: &mut Message, client: &ClientState) {
    if client.has_cap(SERVER_TIME) {
        msg.tags
            .entry("time".to_owned())
            .or_insert_with(util::time_str);
    } else {
        msg.tags.remove("time");
    }
}

pub fn hides_away(msg: &Message, client: &ClientState) -> bool {
    !client.has_cap(AWAY_NOTIFY) && msg.is("AWAY")
}

pub fn hides_account(msg: &Message, client: &ClientState) -> bool {
    !client.has_cap(ACCOUNT_NOTIFY) && msg.is("ACCOUNT")
}

pub fn account_tag(msg: &mut Message, client: &ClientState) {
    if !client.has_cap(ACCOUNT_TAG) {
        msg.tags.remove("account");
    }
}

/// `:nick!user@host JOIN #channel account :Real Name` becomes `:nick!user@host JOIN #channel`.
pub fn extended_join(msg: &mut Message, client: &ClientState) {
    if !client.has_cap(EXTENDED_JOIN) && msg.is("JOIN") && msg.params.len() > 2 {
        msg.params.remove(1);
    }
}

/// Keeps only the highest prefix of each member in NAMES and WHO replies.
pub fn multi_prefix(msg: &mut Message, client: &ClientState, upstream: &ConnectionState) {
    if client.has_cap(MULTI_PREFIX) || !upstream.has_cap(MULTI_PREFIX) {
        return;
    }
    let symbols = upstream.prefix_symbols();

    if msg.is(rpl::NAMREPLY) {
        // :server 353 guest = #tethys :~&@%+aji &@Attila @+alyx +KindOne Argure
        if let Some(names) = msg.params.get_mut(3) {
            *names = map_names(names, |item| {
                let split = split_prefix_and_nick(symbols, item);
                let mut res = String::with_capacity(item.len());
                res.extend(split.prefixes.chars().next());
                res.push_str(split.nick);
                res
            });
        }
    } else if msg.is(rpl::WHOREPLY) {
        // :server 352 guest #test grawity broken.symlink *.chatspike.net grawity H@%+ :0 Mantas
        if let Some(status) = msg.params.get_mut(6) {
            *status = collapse_who_status(symbols, status);
        }
    }
}

/// Strips prefixes and user masks from NAMES replies, leaving bare nicknames.
pub fn userhost_in_names(msg: &mut Message, client: &ClientState, upstream: &ConnectionState) {
    if client.has_cap(USERHOST_IN_NAMES) || !msg.is(rpl::NAMREPLY) {
        return;
    }
    let symbols = upstream.prefix_symbols();
    if let Some(names) = msg.params.get_mut(3) {
        *names = map_names(names, |item| {
            let mask = split_prefix_and_nick(symbols, item).nick;
            let end = mask.find(|c| c == '!' || c == '@').unwrap_or(mask.len());
            mask[..end].to_owned()
        });
    }
}

fn map_names<F>(names: &str, f: F) -> String
where
    F: Fn(&str) -> String,
{
    names
        .split(' ')
        .filter(|item| !item.is_empty())
        .map(f)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `H*@%+` becomes `H*@`: the here/away flag, the oper flag and one prefix symbol at most.
///
/// Networks send `G` (gone) as well as `A` for away users, both are kept.
fn collapse_who_status(symbols: &str, status: &str) -> String {
    let mut res = String::new();
    let mut rest = status;

    if let Some(c) = rest.chars().next().filter(|c| matches!(*c, 'H' | 'G' | 'A')) {
        res.push(c);
        rest = &rest[c.len_utf8()..];
    }
    if rest.starts_with('*') {
        res.push('*');
        rest = &rest[1..];
    }
    res.extend(rest.chars().find(|c| symbols.contains(*c)));

    res
}

/// A member of a NAMES list, split into its prefix symbols and the rest.
#[derive(Debug, PartialEq, Eq)]
pub struct PrefixedNick<'a> {
    pub prefixes: &'a str,
    pub nick: &'a str,
}

/// Splits the leading prefix symbols off `input`.
///
/// # Example
///
/// ```rust
/// # use kiwibnc::features::split_prefix_and_nick;
/// let split = split_prefix_and_nick("~&@%+", "~&@aji");
/// assert_eq!(split.prefixes, "~&@");
/// assert_eq!(split.nick, "aji");
/// ```
pub fn split_prefix_and_nick<'a>(symbols: &str, input: &'a str) -> PrefixedNick<'a> {
    let end = input
        .char_indices()
        .find(|(_, c)| !symbols.contains(*c))
        .map_or(input.len(), |(i, _)| i);
    PrefixedNick {
        prefixes: &input[..end],
        nick: &input[end..],
    }
}
