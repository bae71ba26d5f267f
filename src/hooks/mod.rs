//! The hook pipeline.
//!
//! Every message that crosses the boundary between the network and the clients goes through
//! `Hooks::emit`.  Handlers subscribe to an `EventKind` and are called in the order they
//! subscribed, one after the other, each being awaited before the next one is called.  A handler
//! that sets the payload's `halt` flag stops the chain.
//!
//! The pipeline keeps no state of its own.  It is built once at startup and shared by all
//! sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

pub use self::events::{
    AvailableCaps, AvailableIsupports, Event, EventKind, MessageFromClient, MessageFromUpstream,
    MessageToClient, MessageToClients,
};

mod events;

/// A handler failed to process an event.
#[derive(Debug)]
pub struct Error {
    message: String,
}

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl From<crate::history::Error> for Error {
    fn from(val: crate::history::Error) -> Self {
        Self::new(format!("history: {}", val))
    }
}

pub type HookResult<T = ()> = Result<T, Error>;

/// Something that reacts to events.
///
/// Plain functions of type `fn(&mut Event<'_, '_>) -> HookResult` are handlers too.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &mut Event<'_, '_>) -> HookResult;
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&mut Event<'_, '_>) -> HookResult + Send + Sync,
{
    async fn handle(&self, event: &mut Event<'_, '_>) -> HookResult {
        self(event)
    }
}

#[derive(Default)]
pub struct Hooks {
    handlers: HashMap<EventKind, Vec<Box<dyn Handler>>>,
}

impl Hooks {
    /// Subscribes `handler` to `kind`, after the handlers already subscribed.
    pub fn on<H>(&mut self, kind: EventKind, handler: H)
    where
        H: Handler + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Runs the handlers subscribed to the event kind, in order, until one of them halts.
    ///
    /// The first handler error is returned as is, and the remaining handlers are not called.
    pub async fn emit(&self, mut event: Event<'_, '_>) -> HookResult {
        let handlers = match self.handlers.get(&event.kind()) {
            Some(handlers) => handlers,
            None => return Ok(()),
        };
        for handler in handlers {
            handler.handle(&mut event).await?;
            if event.halted() {
                break;
            }
        }
        Ok(())
    }
}
