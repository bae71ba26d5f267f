use std::collections::HashMap;
use std::fmt;

/// Returns `(word, rest)` where `word` is the first word of the given string and `rest` is the
/// substring starting at the first character of the second word.
///
/// Word boundaries here are spaces only.
fn parse_word(s: &str) -> (&str, &str) {
    let mut split = s.splitn(2, ' ').map(str::trim).filter(|s| !s.is_empty());
    (split.next().unwrap_or(""), split.next().unwrap_or(""))
}

/// If the string starts with `@`, returns `(tags, rest)` where `tags` is the tag string without
/// the `@`.
fn parse_tags(buf: &str) -> (&str, &str) {
    if buf.starts_with('@') {
        let (tags, rest) = parse_word(buf);
        (&tags[1..], rest)
    } else {
        ("", buf)
    }
}

/// If the given string starts with a prefix, returns `(Some(prefix), rest)` where `rest` starts
/// from the first word after the prefix.
///
/// Otherwise returns `(None, rest)` where `rest` is the substring starting from the first word of
/// the given string.
fn parse_prefix(buf: &str) -> (Option<&str>, &str) {
    if buf.starts_with(':') {
        let (prefix, rest) = parse_word(buf);
        (Some(&prefix[1..]), rest)
    } else {
        (None, buf.trim_start())
    }
}

/// Match a tag escape with its meaningful character.
///
/// # Example
///
/// ```rust
/// # use kiwibnc_tokens::tag_escape;
/// assert_eq!(tag_escape(':'), ';');  // "\:" is ";"
/// assert_eq!(tag_escape('b'), 'b');  // "\b" is "b"
/// ```
pub fn tag_escape(c: char) -> char {
    match c {
        ':' => ';',
        's' => ' ',
        'r' => '\r',
        'n' => '\n',
        c => c,
    }
}

/// Returns the unescaped version of a tag value.
///
/// Tag escaping is defined here: <https://ircv3.net/specs/extensions/message-tags.html> (look
/// for "Escaping values").
///
/// # Example
///
/// ```rust
/// # use kiwibnc_tokens::unescape_tag_value;
/// assert_eq!(&unescape_tag_value(r"Newline:\s\nBackslash-n:\s\\n"), "Newline: \nBackslash-n: \\n");
/// ```
pub fn unescape_tag_value(value: &str) -> String {
    let mut res = String::with_capacity(value.len());
    let mut escape = false;
    for c in value.chars() {
        if c == '\\' && !escape {
            escape = true;
        } else {
            res.push(if escape { tag_escape(c) } else { c });
            escape = false;
        }
    }
    res
}

/// The reverse of `unescape_tag_value`.
///
/// # Example
///
/// ```rust
/// # use kiwibnc_tokens::escape_tag_value;
/// assert_eq!(&escape_tag_value("a b;c"), r"a\sb\:c");
/// ```
pub fn escape_tag_value(value: &str) -> String {
    let mut res = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => res.push_str("\\:"),
            ' ' => res.push_str("\\s"),
            '\\' => res.push_str("\\\\"),
            '\r' => res.push_str("\\r"),
            '\n' => res.push_str("\\n"),
            c => res.push(c),
        }
    }
    res
}

/// An IRC message.
///
/// Unlike a wire line, a `Message` can be modified in place: kiwibnc passes it by mutable
/// reference through its hooks so that each capability can strip what the receiving client did
/// not ask for.
///
/// See the RFC 2812 for a complete description of IRC messages:
/// <https://tools.ietf.org/html/rfc2812.html#section-2.3>.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    /// The prefix of the message, or an empty string.
    pub prefix: String,

    /// Message tags, unescaped.  Tags without a value map to an empty string.
    ///
    /// Refer to the following page for more details on message tags:
    /// <https://ircv3.net/specs/extensions/message-tags>.
    pub tags: HashMap<String, String>,

    /// The command, in upper case.
    pub command: String,

    /// The parameters, the trailing one included.
    pub params: Vec<String>,
}

impl Message {
    /// Creates a message with the given command and no parameter.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use kiwibnc_tokens::Message;
    /// let msg = Message::new("privmsg").with_param("#kiwi").with_param("hello there");
    ///
    /// assert_eq!(msg.to_string(), "PRIVMSG #kiwi :hello there");
    /// ```
    pub fn new<S>(command: S) -> Self
    where
        S: Into<String>,
    {
        let mut command = command.into();
        command.make_ascii_uppercase();
        Self {
            command,
            ..Self::default()
        }
    }

    /// Parses a string and returns the IRC message it contains.
    ///
    /// Relevant source of information:
    /// <https://tools.ietf.org/html/rfc2812.html#section-2.3>.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use kiwibnc_tokens::Message;
    /// let privmsg = Message::parse("@time=2020;+draft/reply :ser PRIVMSG #fosdem :I'm Simon Sir\r\n").unwrap();
    ///
    /// assert_eq!(privmsg.prefix, "ser");
    /// assert_eq!(privmsg.command, "PRIVMSG");
    /// assert_eq!(privmsg.params, vec!["#fosdem", "I'm Simon Sir"]);
    /// assert_eq!(privmsg.tag("time"), Some("2020"));
    /// assert_eq!(privmsg.tag("+draft/reply"), Some(""));
    /// ```
    ///
    /// Commands are normalized to upper case:
    ///
    /// ```rust
    /// # use kiwibnc_tokens::Message;
    /// let unknown = Message::parse("whois arg1\r\n").unwrap();
    ///
    /// assert_eq!(unknown.command, "WHOIS");
    /// assert_eq!(unknown.param(0), "arg1");
    /// ```
    ///
    /// # Return value
    ///
    /// Returns `Some(msg)` when the message is correctly formed, `None` otherwise.  Correctly
    /// formed means the message has a command.
    ///
    /// ```rust
    /// # use kiwibnc_tokens::Message;
    /// let empty = Message::parse("  \r \n \t ");
    /// let no_command = Message::parse(":prefix");
    ///
    /// assert!(empty.is_none());
    /// assert!(no_command.is_none());
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        let mut buf = s.trim();
        if buf.is_empty() || buf.contains('\0') {
            return None;
        }

        let (tags, rest) = parse_tags(buf);
        buf = rest;
        let (prefix, rest) = parse_prefix(buf);
        buf = rest;
        let (command, rest) = parse_word(buf);
        buf = rest;

        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        while !buf.is_empty() {
            if buf.starts_with(':') {
                params.push(buf[1..].to_owned());
                break;
            }
            let (word, rest) = parse_word(buf);
            params.push(word.to_owned());
            buf = rest;
        }

        let tags = tags
            .split(';')
            .filter(|item| !item.is_empty() && !item.starts_with('=') && !item.starts_with("+="))
            .map(|item| {
                let mut split = item.splitn(2, '=');
                let key = split.next().unwrap_or("");
                let value = split.next().map(unescape_tag_value).unwrap_or_default();
                (key.to_owned(), value)
            })
            .collect();

        Some(Self {
            prefix: prefix.unwrap_or("").to_owned(),
            tags,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Sets the prefix of the message.
    pub fn with_prefix<S>(mut self, prefix: S) -> Self
    where
        S: Into<String>,
    {
        self.prefix = prefix.into();
        self
    }

    /// Appends a parameter to the message.
    pub fn with_param<S>(mut self, param: S) -> Self
    where
        S: Into<String>,
    {
        self.params.push(param.into());
        self
    }

    /// Appends several parameters to the message.
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Adds or replaces a tag.
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Returns the parameter at index `i`, or an empty string if the message has fewer
    /// parameters.
    ///
    /// IRC peers are not trusted to send every parameter a command requires, so this is the
    /// accessor to use.
    ///
    /// ```rust
    /// # use kiwibnc_tokens::Message;
    /// let kick = Message::parse("KICK #chan").unwrap();
    ///
    /// assert_eq!(kick.param(0), "#chan");
    /// assert_eq!(kick.param(1), "");
    /// ```
    pub fn param(&self, i: usize) -> &str {
        self.params.get(i).map_or("", String::as_str)
    }

    /// Same as `Message::param`, in upper case.
    pub fn param_upper(&self, i: usize) -> String {
        self.param(i).to_ascii_uppercase()
    }

    /// Returns the nickname part of the prefix, that is everything before the first `!`.
    ///
    /// ```rust
    /// # use kiwibnc_tokens::Message;
    /// let join = Message::parse(":aji!aji@example.net JOIN #tethys").unwrap();
    /// let ping = Message::parse("PING :token").unwrap();
    ///
    /// assert_eq!(join.nick(), "aji");
    /// assert_eq!(ping.nick(), "");
    /// ```
    pub fn nick(&self) -> &str {
        self.prefix.split('!').next().unwrap_or("")
    }

    /// Whether the command of the message is `command`, ignoring case.
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }

    /// Returns the value of the given tag, if set.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the wire line, CRLF included.
    pub fn to_line(&self) -> String {
        let mut line = self.to_string();
        line.push_str("\r\n");
        line
    }
}

impl fmt::Display for Message {
    /// Writes the message as an IRC line, without CRLF.
    ///
    /// Tags are written sorted by key.  The last parameter is written as a trailing parameter
    /// when needed.
    ///
    /// **Note**: It is up to the caller to make sure there is no whitespace in middle parameters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut tags: Vec<_> = self.tags.iter().collect();
            tags.sort();
            f.write_str("@")?;
            for (i, (key, value)) in tags.into_iter().enumerate() {
                if i != 0 {
                    f.write_str(";")?;
                }
                f.write_str(key)?;
                if !value.is_empty() {
                    write!(f, "={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }
        if !self.prefix.is_empty() {
            write!(f, ":{} ", self.prefix)?;
        }
        f.write_str(&self.command)?;
        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                write!(f, " {}", param)?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parse() {
        let msg = Message::parse("PING x").unwrap();
        assert!(msg.tags.is_empty());

        let msg = Message::parse("@time=12732;re PING x").unwrap();
        assert_eq!(msg.tag("time"), Some("12732"));
        assert_eq!(msg.tag("re"), Some(""));
        assert_eq!(msg.tags.len(), 2);

        let msg = Message::parse("@+time=12732;re=;+asdf=5678 PING x").unwrap();
        assert_eq!(msg.tag("+time"), Some("12732"));
        assert_eq!(msg.tag("re"), Some(""));
        assert_eq!(msg.tag("+asdf"), Some("5678"));

        let msg =
            Message::parse("@=these;time=12732;+=shouldbe;re=;asdf=5678;=ignored PING x").unwrap();
        assert_eq!(msg.tags.len(), 3);
        assert_eq!(msg.tag("time"), Some("12732"));
        assert_eq!(msg.tag("asdf"), Some("5678"));
    }

    #[test]
    fn test_unescape() {
        let tests = &[
            ["te\\n\\kst", "te\nkst"],
            ["te\\n\\kst\\", "te\nkst"],
            ["te\\\\nst", "te\\nst"],
            ["te😃st", "te😃st"],
            ["te😃\\st", "te😃 t"],
            ["test\\", "test"],
            ["te\\:st\\", "te;st"],
            ["\\\\te\\:\\st", "\\te; t"],
            ["\\", ""],
            ["", ""],
        ];

        for [test, expected] in tests {
            assert_eq!(&unescape_tag_value(test), expected);
        }
    }

    #[test]
    fn test_params() {
        let msg = Message::parse(":server.com 353 guest = #tethys :~&@%+aji &@Attila").unwrap();
        assert_eq!(msg.prefix, "server.com");
        assert_eq!(msg.command, "353");
        assert_eq!(msg.params, vec!["guest", "=", "#tethys", "~&@%+aji &@Attila"]);
        assert_eq!(msg.param(7), "");

        let msg = Message::parse("CAP * LS :").unwrap();
        assert_eq!(msg.params, vec!["*", "LS", ""]);
    }

    #[test]
    fn test_display() {
        let msg = Message::new("PRIVMSG")
            .with_prefix("aji!a@b")
            .with_tag("time", "2020-01-01T00:00:00.000Z")
            .with_tag("batch", "")
            .with_param("#chan")
            .with_param("hi");
        assert_eq!(
            msg.to_string(),
            "@batch;time=2020-01-01T00:00:00.000Z :aji!a@b PRIVMSG #chan hi"
        );

        let msg = Message::new("NOTICE").with_params(vec!["*", ":-)"]);
        assert_eq!(msg.to_line(), "NOTICE * ::-)\r\n");

        let msg = Message::new("PRIVMSG").with_tag("+note", "a b;c").with_params(vec!["x", ""]);
        let line = msg.to_string();
        assert_eq!(&line, "@+note=a\\sb\\:c PRIVMSG x :");
        assert_eq!(Message::parse(&line), Some(msg));
    }
} // mod tests
