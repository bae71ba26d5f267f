//! Lines from the network.

use super::Session;
use crate::client::MessageQueue;
use crate::history;
use crate::hooks::{Event, MessageFromUpstream};
use crate::util;
use kiwibnc_tokens::{rpl, Message};

/// Capabilities kiwibnc requests from networks.
pub const WANTED_CAPS: &[&str] = &[
    "server-time",
    "multi-prefix",
    "away-notify",
    "account-notify",
    "account-tag",
    "extended-join",
    "userhost-in-names",
];

/// Nicknames shorter than this get an underscore appended when they are already in use.
const NICK_RETRY_MAX_LEN: usize = 8;

impl Session {
    pub(super) async fn upstream_connected(&mut self, queue: MessageQueue) {
        log::info!("{}: Connected to {}:{}", self.state.id, self.state.host, self.state.port);
        self.upstream = Some(queue);
        self.cap_ls.clear();

        self.state.connected = true;
        self.state.reset_registration();
        self.state.nick = self.settings.identity.nick.clone();
        self.state.save(&*self.states).await;

        let identity = &self.settings.identity;
        self.send_upstream(Message::new("CAP").with_params(vec!["LS", "302"]));
        self.send_upstream(Message::new("NICK").with_param(identity.nick.as_str()));
        self.send_upstream(Message::new("USER").with_params(vec![
            identity.username.as_str(),
            "0",
            "*",
            identity.realname.as_str(),
        ]));
    }

    pub(super) async fn upstream_closed(&mut self) {
        log::info!("{}: Disconnected", self.state.id);
        self.upstream = None;
        self.state.connected = false;
        self.state.net_registered = false;
        self.state.save(&*self.states).await;
    }

    /// Runs `message_from_upstream`, updates the state, then passes the line to the clients
    /// unless its handler says otherwise.
    pub(super) async fn handle_upstream(&mut self, msg: Message) {
        let mut payload = MessageFromUpstream::new(&self.state, msg);
        if let Err(err) = self.hooks.emit(Event::from(&mut payload)).await {
            log::warn!("{}: message_from_upstream failed: {}", self.state.id, err);
            return;
        }
        if payload.prevented || payload.halt {
            return;
        }
        let msg = payload.message;

        if self.dispatch(&msg).await {
            self.send_to_clients(msg).await;
        }
    }

    /// Returns whether the line should be passed to clients.
    async fn dispatch(&mut self, msg: &Message) -> bool {
        match msg.command.as_str() {
            "CAP" => self.on_cap(msg).await,
            rpl::WELCOME => self.on_welcome(msg).await,
            rpl::YOURHOST | rpl::MYINFO => self.on_registration_line(msg).await,
            rpl::ISUPPORT => self.on_isupport(msg).await,
            "PING" => self.on_ping(msg),
            "JOIN" => self.on_join(msg).await,
            "PART" => self.on_part(msg).await,
            "KICK" => self.on_kick(msg).await,
            rpl::TOPIC => self.on_rpl_topic(msg).await,
            "TOPIC" => self.on_topic(msg).await,
            rpl::ERR_NICKNAMEINUSE => self.on_nick_in_use(msg).await,
            "NICK" => self.on_nick(msg).await,
            "PRIVMSG" | "NOTICE" => self.on_message(msg).await,
            _ => true,
        }
    }

    fn is_me(&self, nick: &str) -> bool {
        util::eq_nick(nick, &self.state.nick)
    }

    async fn on_cap(&mut self, msg: &Message) -> bool {
        match msg.param_upper(1).as_str() {
            // :irc.example.net CAP * LS * :invite-notify ...
            // :irc.example.net CAP * LS :server-time ...
            "LS" => {
                let (more, tokens) = if msg.param(2) == "*" {
                    (true, msg.param(3))
                } else {
                    (false, msg.param(2))
                };
                self.cap_ls.extend(tokens.split_whitespace().map(str::to_owned));
                if more {
                    return false;
                }

                let offered = std::mem::take(&mut self.cap_ls);
                let requested: Vec<&str> = offered
                    .iter()
                    .map(|token| token.splitn(2, '=').next().unwrap_or(""))
                    .filter(|cap| WANTED_CAPS.contains(cap))
                    .collect();
                if requested.is_empty() {
                    self.send_upstream(Message::new("CAP").with_param("END"));
                } else {
                    log::debug!("{}: Requesting {}", self.state.id, requested.join(" "));
                    self.send_upstream(
                        Message::new("CAP").with_params(vec!["REQ".to_owned(), requested.join(" ")]),
                    );
                }
            }
            "ACK" => {
                for cap in msg.param(2).split_whitespace() {
                    if let Some(cap) = cap.strip_prefix('-') {
                        self.state.caps.retain(|c| c != cap);
                    } else if !self.state.has_cap(cap) {
                        self.state.caps.push(cap.to_owned());
                    }
                }
                self.state.save(&*self.states).await;
                if !self.state.net_registered {
                    self.send_upstream(Message::new("CAP").with_param("END"));
                }
            }
            "NAK" => {
                log::debug!("{}: Capabilities refused: {}", self.state.id, msg.param(2));
                if !self.state.net_registered {
                    self.send_upstream(Message::new("CAP").with_param("END"));
                }
            }
            "DEL" => {
                let removed: Vec<&str> = msg.param(2).split_whitespace().collect();
                self.state.caps.retain(|c| !removed.contains(&c.as_str()));
                self.state.save(&*self.states).await;
            }
            _ => {}
        }
        false
    }

    async fn on_welcome(&mut self, msg: &Message) -> bool {
        self.state.nick = msg.param(0).to_owned();
        self.state.server_prefix = msg.prefix.clone();
        self.state.net_registered = true;
        self.state
            .registration_lines
            .push((msg.command.clone(), msg.params.iter().skip(1).cloned().collect()));
        self.state.save(&*self.states).await;
        log::info!("{}: Registered as {}", self.state.id, self.state.nick);

        let waiting: Vec<usize> = self
            .clients
            .iter()
            .filter(|(_, client)| client.can_register())
            .map(|(id, _)| id)
            .collect();
        for id in waiting {
            // The JOINs below are echoed to these clients by the network.
            self.register_client(id, false).await;
        }

        // Clients registered before a reconnect follow the nick we were welcomed with.
        let registered: Vec<usize> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_registered() && !client.is_closed())
            .map(|(id, _)| id)
            .collect();
        for id in registered {
            self.move_to_upstream_nick(id).await;
        }

        let rejoin: Vec<Message> = self
            .state
            .joined_channels()
            .map(|buffer| {
                let join = Message::new("JOIN").with_param(buffer.name.as_str());
                if buffer.key.is_empty() {
                    join
                } else {
                    join.with_param(buffer.key.as_str())
                }
            })
            .collect();
        for join in rejoin {
            self.send_upstream(join);
        }

        false
    }

    /// 002 and 004 are kept for clients that attach later.
    async fn on_registration_line(&mut self, msg: &Message) -> bool {
        self.state
            .registration_lines
            .push((msg.command.clone(), msg.params.iter().skip(1).cloned().collect()));
        self.state.save(&*self.states).await;
        true
    }

    /// `:server 005 nick CHANTYPES=# PREFIX=(ov)@+ :are supported by this server`
    async fn on_isupport(&mut self, msg: &Message) -> bool {
        let end = msg.params.len().saturating_sub(1);
        let tokens = msg.params.iter().take(end).skip(1).cloned();
        self.state.isupports.extend(tokens);
        self.state
            .registration_lines
            .push((msg.command.clone(), msg.params.iter().skip(1).cloned().collect()));
        self.state.save(&*self.states).await;
        true
    }

    fn on_ping(&self, msg: &Message) -> bool {
        self.send_upstream(Message::new("PONG").with_param(msg.param(0)));
        false
    }

    async fn on_join(&mut self, msg: &Message) -> bool {
        if !self.is_me(msg.nick()) {
            return true;
        }
        let (buffer, _) = self.state.get_or_add_buffer(msg.param(0));
        buffer.joined = true;
        self.state.save(&*self.states).await;
        true
    }

    async fn on_part(&mut self, msg: &Message) -> bool {
        if !self.is_me(msg.nick()) {
            return true;
        }
        self.leave(msg.param(0)).await;
        true
    }

    async fn on_kick(&mut self, msg: &Message) -> bool {
        if self.is_me(msg.param(1)) {
            self.leave(msg.param(0)).await;
        }
        true
    }

    async fn leave(&mut self, channel: &str) {
        if let Some(buffer) = self.state.get_buffer_mut(channel) {
            buffer.joined = false;
            self.state.save(&*self.states).await;
        }
    }

    /// `:server 332 nick #channel :topic`
    async fn on_rpl_topic(&mut self, msg: &Message) -> bool {
        let (buffer, _) = self.state.get_or_add_buffer(msg.param(1));
        buffer.topic = Some(msg.param(2).to_owned());
        self.state.save(&*self.states).await;
        true
    }

    /// `:nick!user@host TOPIC #channel :topic`
    async fn on_topic(&mut self, msg: &Message) -> bool {
        if let Some(buffer) = self.state.get_buffer_mut(msg.param(0)) {
            buffer.topic = Some(msg.param(1).to_owned());
            self.state.save(&*self.states).await;
        }
        true
    }

    async fn on_nick_in_use(&mut self, msg: &Message) -> bool {
        if self.state.net_registered {
            // Answers a client's NICK.
            return true;
        }
        if self.state.nick.len() < NICK_RETRY_MAX_LEN {
            self.state.nick.push('_');
            log::debug!("{}: {} in use, trying {}", self.state.id, msg.param(1), self.state.nick);
            self.send_upstream(Message::new("NICK").with_param(self.state.nick.as_str()));
            self.state.save(&*self.states).await;
        } else {
            log::warn!("{}: Nickname {} in use, giving up", self.state.id, self.state.nick);
        }
        false
    }

    async fn on_nick(&mut self, msg: &Message) -> bool {
        let new = msg.param(0);
        if self.is_me(msg.nick()) {
            self.state.nick = new.to_owned();
            self.state.save(&*self.states).await;
            for (_, client) in self.clients.iter_mut() {
                client.set_nick(new);
            }
        } else if self.state.rename_buffer(msg.nick(), new) {
            self.state.save(&*self.states).await;
        }
        true
    }

    async fn on_message(&mut self, msg: &Message) -> bool {
        self.log_message(msg).await;
        true
    }

    /// Stores a PRIVMSG or NOTICE in the history and makes sure its buffer exists.
    pub(super) async fn log_message(&mut self, msg: &Message) {
        if self.state.logging {
            let res = self
                .messages
                .store_message(&self.settings.user, &self.state.id, msg, &self.state)
                .await;
            if let Err(err) = res {
                log::warn!("{}: Failed to store message: {}", self.state.id, err);
            }
        }

        let name = history::buffer_name(msg, &self.state.nick);
        if name.is_empty() || name == "*" {
            return;
        }
        let (_, created) = self.state.get_or_add_buffer(name);
        if created {
            self.state.save(&*self.states).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::session::test::*;

    #[tokio::test]
    async fn test_connect() {
        let mut h = Harness::new().await;
        let mut upstream = h.connect().await;
        assert_msgs(&collect(&mut upstream), &[
            (None, "CAP", &["LS", "302"]),
            (None, "NICK", &["kiwi"]),
            (None, "USER", &["kiwi", "0", "*", "Kiwi"]),
        ]);
        assert!(h.session.state().connected);
        assert!(!h.session.state().net_registered);
    }

    #[tokio::test]
    async fn test_cap_negotiation() {
        let mut h = Harness::new().await;
        let mut upstream = h.connect().await;
        flush(&mut upstream);

        h.upstream(":irc.test CAP * LS * :multi-prefix sasl=PLAIN,EXTERNAL").await;
        assert!(collect(&mut upstream).is_empty());
        h.upstream(":irc.test CAP * LS :server-time=x away-notify batch").await;
        assert_msgs(&collect(&mut upstream), &[
            (None, "CAP", &["REQ", "multi-prefix server-time away-notify"]),
        ]);

        h.upstream(":irc.test CAP * ACK :multi-prefix server-time").await;
        assert_msgs(&collect(&mut upstream), &[(None, "CAP", &["END"])]);
        assert_eq!(h.session.state().caps, vec!["multi-prefix", "server-time"]);
    }

    #[tokio::test]
    async fn test_cap_nothing_wanted() {
        let mut h = Harness::new().await;
        let mut upstream = h.connect().await;
        flush(&mut upstream);

        h.upstream(":irc.test CAP * LS :sasl batch").await;
        assert_msgs(&collect(&mut upstream), &[(None, "CAP", &["END"])]);

        h.upstream(":irc.test CAP * LS :server-time").await;
        flush(&mut upstream);
        h.upstream(":irc.test CAP * NAK :server-time").await;
        assert_msgs(&collect(&mut upstream), &[(None, "CAP", &["END"])]);
        assert!(h.session.state().caps.is_empty());
    }

    #[tokio::test]
    async fn test_welcome() {
        let mut h = Harness::new().await;
        h.welcomed().await;

        let state = h.session.state();
        assert!(state.net_registered);
        assert_eq!(state.nick, "kiwi");
        assert_eq!(state.server_prefix, "irc.test");
        assert_eq!(state.isupports, vec!["CHANTYPES=#", "PREFIX=(ov)@+"]);
        assert_eq!(state.registration_lines.len(), 4);
        assert_eq!(state.registration_lines[3], ("005".to_owned(), vec![
            "CHANTYPES=#".to_owned(),
            "PREFIX=(ov)@+".to_owned(),
            "are supported by this server".to_owned(),
        ]));

        let saved = h.states.load("testnet").await.unwrap().unwrap();
        assert!(saved.net_registered);
        assert_eq!(saved.isupports, state.isupports);
    }

    #[tokio::test]
    async fn test_ping() {
        let mut h = Harness::new().await;
        let mut upstream = h.welcomed().await;
        let (_, mut queue) = h.add_registered_client("kiwi").await;
        flush(&mut queue);

        h.upstream("PING :1234").await;
        assert_msgs(&collect(&mut upstream), &[(None, "PONG", &["1234"])]);
        assert!(collect(&mut queue).is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_on_reconnect() {
        let mut h = Harness::new().await;
        let mut upstream = h.welcomed().await;
        h.upstream(":kiwi!k@host JOIN #kiwi").await;
        h.upstream(":kiwi!k@host JOIN #secret").await;
        h.upstream(":aji!a@host JOIN #other").await;
        assert!(h.session.state().get_buffer("#other").is_none());
        assert!(collect(&mut upstream).is_empty());

        h.disconnect().await;
        assert!(!h.session.state().connected);
        assert!(!h.session.state().net_registered);
        assert!(h.session.state().get_buffer("#kiwi").unwrap().joined);

        let mut upstream = h.connect().await;
        h.upstream(":irc.test CAP * LS :sasl").await;
        flush(&mut upstream);
        h.upstream(":irc.test 001 kiwi :Welcome back").await;
        assert_msgs(&collect(&mut upstream), &[
            (None, "JOIN", &["#kiwi"]),
            (None, "JOIN", &["#secret"]),
        ]);

        // The echo does not trigger another JOIN.
        h.upstream(":kiwi!k@host JOIN #kiwi").await;
        h.upstream(":kiwi!k@host JOIN #secret").await;
        assert!(collect(&mut upstream).is_empty());
        assert_eq!(h.session.state().registration_lines.len(), 1);
    }

    #[tokio::test]
    async fn test_part_kick() {
        let mut h = Harness::new().await;
        h.welcomed().await;
        h.upstream(":kiwi!k@host JOIN #kiwi").await;
        h.upstream(":kiwi!k@host JOIN #secret").await;

        h.upstream(":aji!a@host PART #kiwi :bye").await;
        assert!(h.session.state().get_buffer("#kiwi").unwrap().joined);

        h.upstream(":kiwi!k@host PART #kiwi :bye").await;
        assert!(!h.session.state().get_buffer("#kiwi").unwrap().joined);

        h.upstream(":op!o@host KICK #secret aji :out").await;
        assert!(h.session.state().get_buffer("#secret").unwrap().joined);
        h.upstream(":op!o@host KICK #secret KIWI :out").await;
        assert!(!h.session.state().get_buffer("#secret").unwrap().joined);

        assert_eq!(h.session.state().joined_channels().count(), 0);
    }

    #[tokio::test]
    async fn test_nick_in_use_before_welcome() {
        let mut h = Harness::new().await;
        let mut upstream = h.connect().await;
        flush(&mut upstream);

        for expected in &["kiwi_", "kiwi__", "kiwi___", "kiwi____"] {
            h.upstream(":irc.test 433 * kiwi :Nickname is already in use").await;
            assert_msgs(&collect(&mut upstream), &[(None, "NICK", &[*expected])]);
        }
        h.upstream(":irc.test 433 * kiwi____ :Nickname is already in use").await;
        assert!(collect(&mut upstream).is_empty());
        assert_eq!(h.session.state().nick, "kiwi____");
    }

    #[tokio::test]
    async fn test_reconnect_with_other_nick() {
        let mut h = Harness::new().await;
        h.welcomed().await;
        let (id, mut queue) = h.add_registered_client("kiwi").await;
        flush(&mut queue);

        h.disconnect().await;
        let mut upstream = h.connect().await;
        h.upstream(":irc.test CAP * LS :sasl").await;
        h.upstream(":irc.test 433 * kiwi :Nickname is already in use").await;
        flush(&mut upstream);
        h.upstream(":irc.test 001 kiwi_ :Welcome back").await;

        assert_eq!(h.session.state().nick, "kiwi_");
        assert_msgs(&collect(&mut queue), &[(Some("kiwi"), "NICK", &["kiwi_"])]);
        assert_eq!(h.session.client(id).unwrap().nick(), "kiwi_");

        // Welcomed again under the same nick, nothing to tell.
        h.disconnect().await;
        h.connect().await;
        h.upstream(":irc.test 001 kiwi_ :Welcome back").await;
        assert!(collect(&mut queue).is_empty());
    }

    #[tokio::test]
    async fn test_nick_in_use_after_welcome() {
        let mut h = Harness::new().await;
        let mut upstream = h.welcomed().await;
        let (_, mut queue) = h.add_registered_client("kiwi").await;
        flush(&mut queue);

        h.upstream(":irc.test 433 kiwi aji :Nickname is already in use").await;
        assert!(collect(&mut upstream).is_empty());
        assert_msgs(&collect(&mut queue), &[
            (Some("irc.test"), "433", &["kiwi", "aji", "Nickname is already in use"]),
        ]);
        assert_eq!(h.session.state().nick, "kiwi");
    }

    #[tokio::test]
    async fn test_nick() {
        let mut h = Harness::new().await;
        h.welcomed().await;
        let (id, mut queue) = h.add_registered_client("kiwi").await;
        flush(&mut queue);

        h.upstream(":kiwi!k@host NICK kiwi2").await;
        assert_eq!(h.session.state().nick, "kiwi2");
        assert_eq!(h.session.client(id).unwrap().nick(), "kiwi2");
        assert_msgs(&collect(&mut queue), &[(Some("kiwi!k@host"), "NICK", &["kiwi2"])]);

        h.upstream(":aji!a@host PRIVMSG kiwi2 :hi").await;
        assert!(h.session.state().get_buffer("aji").is_some());
        h.upstream(":aji!a@host NICK ajii").await;
        assert!(h.session.state().get_buffer("aji").is_none());
        assert_eq!(h.session.state().get_buffer("ajii").unwrap().name, "ajii");
    }

    #[tokio::test]
    async fn test_topic() {
        let mut h = Harness::new().await;
        h.welcomed().await;
        h.upstream(":kiwi!k@host JOIN #kiwi").await;

        h.upstream(":irc.test 332 kiwi #kiwi :Welcome").await;
        assert_eq!(h.session.state().get_buffer("#kiwi").unwrap().topic.as_deref(), Some("Welcome"));
        h.upstream(":aji!a@host TOPIC #kiwi :Be nice").await;
        assert_eq!(h.session.state().get_buffer("#kiwi").unwrap().topic.as_deref(), Some("Be nice"));
    }

    #[tokio::test]
    async fn test_messages_are_logged() {
        let mut h = Harness::new().await;
        h.welcomed().await;

        h.upstream(":aji!a@host PRIVMSG #kiwi :hello").await;
        h.upstream(":aji!a@host NOTICE * :server notice").await;
        h.upstream(":aji!a@host JOIN #kiwi").await;
        assert_eq!(h.messages.len(), 2);

        let buffer = h.session.state().get_buffer("#kiwi").unwrap();
        assert!(buffer.is_channel);
        assert!(!buffer.joined);
        assert!(h.session.state().get_buffer("*").is_none());
    }
}
