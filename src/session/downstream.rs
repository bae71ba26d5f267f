//! Lines from the clients.

use super::Session;
use crate::client::{Client, MessageQueue};
use crate::hooks::{AvailableCaps, AvailableIsupports, Event, MessageFromClient};
use crate::lines;
use kiwibnc_tokens::{rpl, Message};

impl Session {
    pub(super) fn attach(&mut self, queue: MessageQueue) -> usize {
        let entry = self.clients.vacant_entry();
        let id = entry.key();
        entry.insert(Client::new(id, queue));
        log::debug!("{}: Client {} attached", self.state.id, id);
        id
    }

    /// Removes a client, along with its reply expectations.  Removing it twice is fine.
    pub(super) fn detach(&mut self, id: usize) {
        if self.clients.contains(id) {
            self.clients.remove(id);
            log::debug!("{}: Client {} detached", self.state.id, id);
        }
    }

    pub(super) async fn handle_client(&mut self, id: usize, msg: Message) {
        let client = match self.clients.get_mut(id) {
            Some(client) if !client.is_closed() => client,
            _ => return,
        };
        let registered = client.is_registered();

        match msg.command.as_str() {
            "CAP" => self.on_client_cap(id, &msg).await,
            "PING" => {
                let server = self.settings.server_name.as_str();
                let pong = Message::new("PONG")
                    .with_prefix(server)
                    .with_params(vec![server, msg.param(0)]);
                self.send_to_client(id, pong).await;
            }
            "QUIT" => {
                self.send_to_client(id, Message::new("ERROR").with_param(lines::CLOSING_LINK))
                    .await;
                if let Some(client) = self.clients.get_mut(id) {
                    client.close();
                }
                log::debug!("{}: Client {} quit", self.state.id, id);
            }
            "PASS" => {}
            "USER" if registered => {}
            "NICK" if !registered => {
                if !msg.param(0).is_empty() {
                    client.set_nick(msg.param(0));
                }
                self.maybe_register(id).await;
            }
            "USER" => {
                client.set_user(msg.param(0));
                self.maybe_register(id).await;
            }
            _ if registered => self.forward_from_client(id, msg).await,
            _ => log::debug!("{}: Client {} not registered, ignoring {}", self.state.id, id, msg),
        }
    }

    async fn on_client_cap(&mut self, id: usize, msg: &Message) {
        let nick = match self.clients.get(id) {
            Some(client) => client.nick().to_owned(),
            None => return,
        };
        let server = self.settings.server_name.clone();
        let reply = |sub: &str, arg: String| {
            Message::new("CAP")
                .with_prefix(server.as_str())
                .with_params(vec![nick.clone(), sub.to_owned(), arg])
        };

        match msg.param_upper(0).as_str() {
            "LS" => {
                self.set_negotiating(id, true);
                let caps = self.available_caps(id).await;
                self.send_to_client(id, reply("LS", caps.join(" "))).await;
            }
            "LIST" => {
                let caps = self.clients.get(id).map(|c| c.state.caps.join(" ")).unwrap_or_default();
                self.send_to_client(id, reply("LIST", caps)).await;
            }
            "REQ" => {
                self.set_negotiating(id, true);
                let available = self.available_caps(id).await;
                let requested = msg.param(1);
                let acceptable = requested
                    .split_whitespace()
                    .all(|cap| available.iter().any(|a| a == cap.trim_start_matches('-')));
                if !acceptable {
                    self.send_to_client(id, reply("NAK", requested.to_owned())).await;
                    return;
                }
                if let Some(client) = self.clients.get_mut(id) {
                    let caps = &mut client.state.caps;
                    for cap in requested.split_whitespace() {
                        if let Some(cap) = cap.strip_prefix('-') {
                            caps.retain(|c| c != cap);
                        } else if !caps.iter().any(|c| c == cap) {
                            caps.push(cap.to_owned());
                        }
                    }
                }
                self.send_to_client(id, reply("ACK", requested.to_owned())).await;
            }
            "END" => {
                self.set_negotiating(id, false);
                self.maybe_register(id).await;
            }
            _ => {
                let invalid = Message::new(rpl::ERR_INVALIDCAPCMD)
                    .with_prefix(server.as_str())
                    .with_params(vec![nick.as_str(), msg.param(0), lines::INVALID_CAP_CMD]);
                self.send_to_client(id, invalid).await;
            }
        }
    }

    fn set_negotiating(&mut self, id: usize, negotiating: bool) {
        if let Some(client) = self.clients.get_mut(id) {
            if !client.is_registered() {
                client.set_negotiating(negotiating);
            }
        }
    }

    /// Runs `available_caps` for the given client.
    async fn available_caps(&self, id: usize) -> Vec<String> {
        let client = match self.clients.get(id) {
            Some(client) => client,
            None => return Vec::new(),
        };
        let mut payload = AvailableCaps {
            client: &client.state,
            upstream: &self.state,
            caps: Vec::new(),
            halt: false,
        };
        if let Err(err) = self.hooks.emit(Event::from(&mut payload)).await {
            log::warn!("{}: available_caps failed: {}", self.state.id, err);
        }
        payload.caps
    }

    /// Registers the client if it is ready and the network has welcomed us already.  Otherwise
    /// the client is registered on 001.
    async fn maybe_register(&mut self, id: usize) {
        let ready = self.clients.get(id).map_or(false, Client::can_register);
        if ready && self.state.net_registered {
            self.register_client(id, true).await;
        }
    }

    /// Sends the welcome burst to a client.
    ///
    /// With `replay_channels`, the client is also shown the channels the session is in, as if it
    /// had just joined them.
    pub(super) async fn register_client(&mut self, id: usize, replay_channels: bool) {
        let client = match self.clients.get_mut(id) {
            Some(client) => client,
            None => return,
        };
        client.set_registered();
        let client_nick = client.nick().to_owned();
        log::info!("{}: Client {} registered as {}", self.state.id, id, client_nick);

        let prefix = self.state.server_prefix.as_str();
        let welcome: Vec<Message> = self
            .state
            .registration_lines
            .iter()
            .map(|(command, params)| {
                Message::new(command.as_str())
                    .with_prefix(prefix)
                    .with_param(client_nick.as_str())
                    .with_params(params.iter().map(String::as_str))
            })
            .collect();
        for msg in welcome {
            self.send_to_client(id, msg).await;
        }

        let mut isupports = AvailableIsupports::default();
        if let Err(err) = self.hooks.emit(Event::from(&mut isupports)).await {
            log::warn!("{}: available_isupports failed: {}", self.state.id, err);
        }
        if !isupports.tokens.is_empty() {
            let msg = Message::new(rpl::ISUPPORT)
                .with_prefix(self.state.server_prefix.as_str())
                .with_param(client_nick.as_str())
                .with_params(isupports.tokens)
                .with_param(lines::ISUPPORT_TRAILING);
            self.send_to_client(id, msg).await;
        }

        self.move_to_upstream_nick(id).await;

        if replay_channels {
            self.replay_channels(id).await;
        }
    }

    /// Sends a NICK line to the client if its nickname is not the one the network knows us by.
    pub(super) async fn move_to_upstream_nick(&mut self, id: usize) {
        let client_nick = match self.clients.get(id) {
            Some(client) => client.nick().to_owned(),
            None => return,
        };
        let upstream_nick = self.state.nick.clone();
        if client_nick == upstream_nick || upstream_nick.is_empty() {
            return;
        }
        let nick = Message::new("NICK")
            .with_prefix(client_nick.as_str())
            .with_param(upstream_nick.as_str());
        self.send_to_client(id, nick).await;
        if let Some(client) = self.clients.get_mut(id) {
            client.set_nick(&upstream_nick);
        }
    }

    async fn replay_channels(&mut self, id: usize) {
        let prefix = self.state.server_prefix.as_str();
        let nick = self.state.nick.as_str();
        let channels: Vec<(Message, Option<Message>, Message)> = self
            .state
            .joined_channels()
            .map(|buffer| {
                let join = Message::new("JOIN").with_prefix(nick).with_param(buffer.name.as_str());
                let topic = buffer.topic.as_ref().map(|topic| {
                    Message::new(rpl::TOPIC)
                        .with_prefix(prefix)
                        .with_params(vec![nick, buffer.name.as_str(), topic.as_str()])
                });
                let names = Message::new("NAMES").with_param(buffer.name.as_str());
                (join, topic, names)
            })
            .collect();

        for (join, topic, names) in channels {
            self.send_to_client(id, join).await;
            if let Some(topic) = topic {
                self.send_to_client(id, topic).await;
            }
            self.forward_from_client(id, names).await;
        }
    }

    /// Runs `message_from_client`, then sends the message upstream unless a handler took care of
    /// it.
    async fn forward_from_client(&mut self, id: usize, msg: Message) {
        let client = match self.clients.get_mut(id) {
            Some(client) => client,
            None => return,
        };
        let mut payload = MessageFromClient::new(client, &self.state, msg);
        if let Err(err) = self.hooks.emit(Event::from(&mut payload)).await {
            log::warn!("{}: message_from_client failed: {}", self.state.id, err);
            return;
        }
        let forward = payload.forward();
        let MessageFromClient { message: msg, replies, .. } = payload;
        for reply in replies {
            self.send_to_client(id, reply).await;
        }
        if !forward {
            return;
        }

        if msg.is("PRIVMSG") || msg.is("NOTICE") {
            let echo = msg.clone().with_prefix(self.state.nick.as_str());
            self.log_message(&echo).await;
            self.send_upstream(msg);
            self.send_to_clients_except(echo, Some(id)).await;
        } else {
            self.send_upstream(msg);
        }
    }
}
