//! Configuration parsing and structures.
//!
//! The configuration file is made of `key value` lines.  Lines starting with `#` are comments.
//! See `doc/kiwibnc.conf` on the repository for an explanation of each setting.

use self::parser::Parser;
use std::{fmt, io, net, path};
use std::ops::Range;

mod parser;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Format(Parser, Option<usize>, Range<usize>, String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Format(..) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(val: io::Error) -> Self { Self::Io(val) }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::Format(parser, lineno, col, msg) => {
                writeln!(f, "{}", msg)?;
                if let Some(lineno) = lineno {
                    writeln!(f, "     |")?;
                    parser.lines().enumerate()
                        .skip_while(|(lno, _)| lno + 3 < *lineno)
                        .take_while(|(lno, _)| lno <= lineno)
                        .try_for_each(|(lno, line)| writeln!(f, "{:4} | {}", lno + 1, line))?;
                    let start = col.start + 1;
                    let len = col.end - col.start;
                    writeln!(f, "     |{0:1$}{2:^<3$}", ' ', start, '^', len)?;
                }
                Ok(())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An IRC network kiwibnc keeps a connection to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Network {
    /// Also the id of the connection state.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// How kiwibnc presents itself to networks.
#[derive(Clone, Debug, Default)]
pub struct Identity {
    pub nick: String,
    pub username: String,
    pub realname: String,
}

/// The whole configuration.
#[derive(Debug, Default)]
pub struct Config {
    /// Addresses clients connect to.
    pub bindings: Vec<net::SocketAddr>,

    pub networks: Vec<Network>,
    pub identity: Identity,

    /// Account name the message history is stored under.
    pub user: String,

    pub state_dir: path::PathBuf,

    /// Prefix of the messages kiwibnc sends on its own behalf.
    pub server_name: String,

    pub logging: bool,
    pub chathistory_limit: usize,

    /// Messages kept in memory per buffer.  0 means no limit.
    pub history_size: usize,

    /// In milliseconds.
    pub reply_timeout: u64,
    pub reconnect_delay: u64,

    pub workers: usize,
}

impl Config {
    pub /*const*/ fn sample() -> Self {
        Self {
            bindings: vec![net::SocketAddr::from(([127, 0, 0, 1], 6667))],
            networks: vec![],
            identity: Identity {
                nick: "kiwibnc".to_owned(),
                username: "kiwibnc".to_owned(),
                realname: "kiwibnc".to_owned(),
            },
            user: "default".to_owned(),
            state_dir: path::PathBuf::from("./state"),
            server_name: default_server_name(),
            logging: true,
            chathistory_limit: 50,
            history_size: 1000,
            reply_timeout: 60_000,
            reconnect_delay: 10_000,
            workers: 0,
        }
    }

    /// Reads the configuration file at the given path.
    pub fn from_file<P>(path: P) -> Result<Self>
        where P: AsRef<path::Path>
    {
        Self::from_parser(Parser::read(path)?)
    }

    /// Reads the configuration from the contents of a file.
    pub fn parse(contents: &str) -> Result<Self> {
        Self::from_parser(Parser::parse(contents)?)
    }

    fn from_parser(parser: Parser) -> Result<Self> {
        let mut res = Self::sample();
        res.identity = Identity::default();
        let mut logging: Option<bool> = None;

        let parser = parser
            .setting("bind_to", false, |values| res.bindings = values)?
            .setting("network", true,  |values| res.networks = values)?
            .unique_setting("nick",              false, |value| res.identity.nick = value)?
            .unique_setting("username",          false, |value| res.identity.username = value)?
            .unique_setting("realname",          false, |value| res.identity.realname = value)?
            .unique_setting("user",              false, |value| res.user = value)?
            .unique_setting("state_dir",         false, |value| res.state_dir = value)?
            .unique_setting("server_name",       false, |value| res.server_name = value)?
            .unique_setting("logging",           false, |value| logging = Some(value))?
            .unique_setting("chathistory_limit", false, |value| res.chathistory_limit = value)?
            .unique_setting("history_size",      false, |value| res.history_size = value)?
            .unique_setting("reply_timeout",     false, |value| res.reply_timeout = value)?
            .unique_setting("reconnect_delay",   false, |value| res.reconnect_delay = value)?
            .unique_setting("workers",           false, |value| res.workers = value)?;

        parser.check_unknown_settings()?;

        if let Some(logging) = logging {
            res.logging = logging;
        }
        res.validate()?;
        Ok(res)
    }

    fn validate(&mut self) -> Result<()> {
        let def = Self::sample();

        if self.bindings.is_empty() { self.bindings = def.bindings; }
        if self.identity.nick.is_empty() { self.identity.nick = def.identity.nick; }
        if self.identity.username.is_empty() {
            self.identity.username = self.identity.nick.clone();
        }
        if self.identity.realname.is_empty() {
            self.identity.realname = self.identity.nick.clone();
        }
        if self.chathistory_limit == 0 { self.chathistory_limit = def.chathistory_limit; }
        if self.reconnect_delay == 0 { self.reconnect_delay = def.reconnect_delay; }
        Ok(())
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|network| network.name == name)
    }
}

fn default_server_name() -> String {
    match gethostname::gethostname().into_string() {
        Ok(name) if !name.is_empty() => name,
        _ => "kiwibnc".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal() {
        let config = Config::parse("network libera irc.libera.chat:6667\n").unwrap();
        assert_eq!(config.networks, vec![Network {
            name: "libera".to_owned(),
            host: "irc.libera.chat".to_owned(),
            port: 6667,
            tls: false,
        }]);
        assert_eq!(config.bindings, vec![net::SocketAddr::from(([127, 0, 0, 1], 6667))]);
        assert_eq!(config.identity.nick, "kiwibnc");
        assert_eq!(config.user, "default");
        assert!(config.logging);
        assert_eq!(config.chathistory_limit, 50);
        assert_eq!(config.history_size, 1000);
        assert_eq!(config.reply_timeout, 60_000);
    }

    #[test]
    fn test_full() {
        let contents = "\
# Where clients connect
bind_to 0.0.0.0:7000
bind_to [::1]:7000

network libera irc.libera.chat:6697 tls
network local 127.0.0.1:6667
nick kiwi
realname Kiwi Bird
logging false
chathistory_limit 100
history_size 0
reply_timeout 0
";
        let config = Config::parse(contents).unwrap();
        assert_eq!(config.bindings.len(), 2);
        assert_eq!(config.networks.len(), 2);
        assert!(config.network("libera").unwrap().tls);
        assert_eq!(config.network("local").unwrap().port, 6667);
        assert_eq!(config.identity.nick, "kiwi");
        assert_eq!(config.identity.username, "kiwi");
        assert_eq!(config.identity.realname, "Kiwi Bird");
        assert!(!config.logging);
        assert_eq!(config.chathistory_limit, 100);
        assert_eq!(config.history_size, 0);
        assert_eq!(config.reply_timeout, 0);
    }

    #[test]
    fn test_documented_sample() {
        let config = Config::parse(include_str!("../../doc/kiwibnc.conf")).unwrap();
        assert_eq!(config.bindings.len(), 2);
        assert_eq!(config.network("libera").unwrap().host, "irc.libera.chat");
        assert_eq!(config.identity.username, "kiwibnc");
        assert_eq!(config.reconnect_delay, 10_000);
    }

    #[test]
    fn test_errors() {
        let err = Config::parse("nick kiwi\n").unwrap_err();
        assert!(err.to_string().contains("missing setting \"network\""));

        let err = Config::parse("network libera irc.libera.chat\n").unwrap_err().to_string();
        assert!(err.contains("this setting must be following the format"));
        assert!(err.contains("   1 | network libera irc.libera.chat"));
        assert!(err.contains("^^^^^^^^^^^^^^^^^^^^^^"));

        let err = Config::parse("network a b:1\nnick a\nnick b\n").unwrap_err();
        assert!(err.to_string().contains("must not appear more than once"));

        let err = Config::parse("network a b:1\ncolor blue\n").unwrap_err();
        assert!(err.to_string().contains("unknown setting \"color\""));

        let err = Config::parse("network a b:1\nnick\n").unwrap_err();
        assert!(err.to_string().contains("this setting has no value"));
    }
}
