//! Parse and build IRC lines.
//!
//! kiwibnc rewrites messages in place while they travel between the upstream network and the
//! attached clients, so this crate works with an owned, mutable `Message` instead of borrowed
//! slices of the input line.

#![forbid(unsafe_code)]
#![warn(clippy::all, rust_2018_idioms)]
#![allow(clippy::shadow_unrelated, clippy::use_self)]

pub use message::{escape_tag_value, tag_escape, unescape_tag_value, Message};

mod message;
pub mod rpl;

/// Assert all data of a message.
///
/// Empty elements in `params` will not be asserted with their equivalent in `msg.params`, but will
/// still count for the assertion of the number of parameters.
pub fn assert_msg(msg: &Message, prefix: Option<&str>, command: &str, params: &[&str]) {
    assert_eq!(msg.prefix.as_str(), prefix.unwrap_or(""), "prefix of {:?}", msg);
    assert!(msg.is(command), "command of {:?}, expected {:?}", msg, command);
    assert_eq!(
        msg.params.len(),
        params.len(),
        "number of parameters of {:?}",
        msg
    );
    for (i, (actual, expected)) in msg.params.iter().zip(params.iter()).enumerate() {
        if expected.is_empty() {
            // Some parameters change every time they are generated (timestamps, batch ids), so
            // they are skipped.
            continue;
        }
        assert_eq!(actual, expected, "parameter #{} of {:?}", i, msg);
    }
}
