use std::time;

/// Returns the current time formatted for the `time` message tag.
pub fn time_str() -> String {
    humantime::format_rfc3339_millis(time::SystemTime::now()).to_string()
}

/// Formats a unix timestamp in milliseconds for the `time` message tag.
pub fn time_str_from_millis(millis: u64) -> String {
    let t = time::UNIX_EPOCH + time::Duration::from_millis(millis);
    humantime::format_rfc3339_millis(t).to_string()
}

/// Parses a `time` tag or CHATHISTORY timestamp into unix milliseconds.
pub fn parse_time_millis(s: &str) -> Option<u64> {
    let t = humantime::parse_rfc3339_weak(s).ok()?;
    t.duration_since(time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

pub fn time_millis() -> u64 {
    match time::SystemTime::now().duration_since(time::UNIX_EPOCH) {
        Ok(unix_time) => unix_time.as_millis() as u64,
        Err(_) => {
            log::error!("Computer clock set before 01/01/1970?");
            0
        }
    }
}

/// Lowercases a character with the rfc1459 casemapping, where `[]\\~` are the uppercase
/// versions of `{}|^`.
fn irc_lowercase_char(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        c => c.to_ascii_lowercase(),
    }
}

/// Lowercases `s` with the rfc1459 casemapping.
pub fn irc_lowercase(s: &str) -> String {
    s.chars().map(irc_lowercase_char).collect()
}

/// rfc1459 case-insensitive comparison, used for nicknames and buffer names.
pub fn eq_nick(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.chars().map(irc_lowercase_char).eq(b.chars().map(irc_lowercase_char))
}
