//! kiwibnc, an IRC bouncer for many clients.
//!
//! kiwibnc keeps one connection open to each configured IRC network, and lets any number of
//! clients share it.  Each client negotiates its own capabilities, and gets the replies to its
//! own commands.
//!
//! # Usage
//!
//! You need a configuration file, and pass its name as an argument. The git repository contains an
//! example `doc/kiwibnc.conf`, with comments describing the different options.
//!
//! During development: `cargo run -- doc/kiwibnc.conf`
//!
//! Clients pick a network by sending its name with PASS.  Without PASS, they get the first
//! network of the configuration file.

#![forbid(unsafe_code)]
#![warn(clippy::all, rust_2018_idioms)]
#![allow(clippy::shadow_unrelated, clippy::use_self)]

pub use crate::config::Config;
use crate::chathistory::ChatHistory;
use crate::history::{MemoryMessageStore, MessageStore};
use crate::hooks::Hooks;
use crate::router::ReplyRouter;
use crate::session::{Session, Settings};
use crate::state::{FileStore, StateStore};
use std::sync::Arc;
use std::time::Duration;

pub mod chathistory;
pub mod client;
pub mod config;
pub mod features;
pub mod history;
pub mod hooks;
mod lines;
pub mod net;
pub mod router;
pub mod session;
pub mod state;
pub mod util;

/// Builds the hook pipeline every session shares.
///
/// Capability features subscribe first, so that the reply router and CHATHISTORY see the
/// messages they produce.
pub fn pipeline(config: &Config, messages: Arc<dyn MessageStore>) -> Hooks {
    let mut hooks = Hooks::default();
    features::register(&mut hooks);
    ReplyRouter::new(Duration::from_millis(config.reply_timeout)).register(&mut hooks);
    ChatHistory::new(messages, &config.user, &config.server_name, config.chathistory_limit)
        .register(&mut hooks);
    hooks
}

/// Starts a session per network, the client listeners, and waits for ctrl-c.
pub async fn run(config: Config) {
    let states: Arc<dyn StateStore> = Arc::new(FileStore::new(&config.state_dir));
    let messages: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::with_buffer_capacity(config.history_size));
    let hooks = Arc::new(pipeline(&config, messages.clone()));
    let reconnect_delay = Duration::from_millis(config.reconnect_delay);

    let mut sessions = Vec::with_capacity(config.networks.len());
    for network in &config.networks {
        let settings = Settings {
            network: network.clone(),
            identity: config.identity.clone(),
            user: config.user.clone(),
            server_name: config.server_name.clone(),
            logging: config.logging,
        };
        let session = Session::new(settings, hooks.clone(), states.clone(), messages.clone());
        let handle = session.spawn();
        tokio::spawn(net::connect(network.clone(), handle.clone(), reconnect_delay));
        sessions.push((network.name.clone(), handle));
    }

    let sessions = Arc::new(sessions);
    for &address in &config.bindings {
        tokio::spawn(net::listen(address, sessions.clone()));
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutting down"),
        Err(err) => {
            log::error!("Failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
