//! The list of IRC replies kiwibnc reads, routes or sends.
//!
//! Each reply has the client's nick as first parameter.
//!
//! Sources:
//!
//! - <https://tools.ietf.org/html/rfc2812.html#section-5>
//! - <https://modern.ircdocs.horse/#numerics>

pub const WELCOME: &str   = "001";  // :Welcome message
pub const YOURHOST: &str  = "002";  // :Your host is...
pub const MYINFO: &str    = "004";  // <servername> <version> <umodes> <chan modes> <chan modes with a parameter>
pub const ISUPPORT: &str  = "005";  // 1*13<TOKEN[=value]> :are supported by this server

pub const LUSERCLIENT: &str   = "251";  // :<int> users and <int> services on <int> servers
pub const LUSEROP: &str       = "252";  // <int> :operator(s) online
pub const LUSERUNKNOWN: &str  = "253";  // <int> :unknown connection(s)
pub const LUSERCHANNELS: &str = "254";  // <int> :channels formed
pub const LUSERME: &str       = "255";  // :I have <int> clients and <int> servers
pub const ADMINME: &str       = "256";  // <server> :Admin info
pub const ADMINLOC1: &str     = "257";  // :<info>
pub const ADMINLOC2: &str     = "258";  // :<info>
pub const ADMINMAIL: &str     = "259";  // :<info>
pub const LOCALUSERS: &str    = "265";  // [<u> <m>] :Current local users <u>, max <m>
pub const GLOBALUSERS: &str   = "266";  // [<u> <m>] :Current global users <u>, max <m>
pub const WHOISCERTFP: &str   = "276";  // <nick> :has client certificate fingerprint <fingerprint>

pub const AWAY: &str            = "301";  // <nick> :<away message>
pub const USERHOST: &str        = "302";  // :*1<reply> *( " " <reply> )
pub const ISON: &str            = "303";  // :*1<nick> *( " " <nick> )
pub const WHOISREGNICK: &str    = "307";  // <nick> :has identified for this nick
pub const WHOISUSER: &str       = "311";  // <nick> <user> <host> * :<realname>
pub const WHOISSERVER: &str     = "312";  // <nick> <server> :<server info>
pub const WHOISOPERATOR: &str   = "313";  // <nick> :is an IRC operator
pub const WHOWASUSER: &str      = "314";  // <nick> <user> <host> * :<realname>
pub const ENDOFWHO: &str        = "315";  // <name> :End of WHO list
pub const WHOISIDLE: &str       = "317";  // <nick> <integer> [<integer>] :seconds idle [, signon time]
pub const ENDOFWHOIS: &str      = "318";  // <nick> :End of WHOIS list
pub const WHOISCHANNELS: &str   = "319";  // <nick> :*( (@/+) <channel> " " )
pub const WHOISSPECIAL: &str    = "320";  // <nick> :blah blah blah
pub const LISTSTART: &str       = "321";  // Channel :Users  Name
pub const LIST: &str            = "322";  // <channel> <# of visible members> <topic>
pub const LISTEND: &str         = "323";  // :End of list
pub const CHANNELMODEIS: &str   = "324";  // <channel> <modes> <mode params>
pub const CREATIONTIME: &str    = "329";  // <channel> <creationtime>
pub const WHOISACCOUNT: &str    = "330";  // <nick> <account> :is logged in as
pub const NOTOPIC: &str         = "331";  // <channel> :No topic set
pub const TOPIC: &str           = "332";  // <channel> <topic>
pub const TOPICWHOTIME: &str    = "333";  // <channel> <nick> <setat>
pub const WHOISACTUALLY: &str   = "338";  // <nick> <host|ip> :Is actually using host
pub const INVITELIST: &str      = "346";  // <channel> <invite mask>
pub const ENDOFINVITELIST: &str = "347";  // <channel> :End of invite list
pub const EXCEPTLIST: &str      = "348";  // <channel> <exception mask>
pub const ENDOFEXCEPTLIST: &str = "349";  // <channel> :End of exception list
pub const VERSION: &str         = "351";  // <version> <servername> :<comments>
pub const WHOREPLY: &str        = "352";  // <channel> <user> <host> <server> <nick> "H"/"G" ["*"] [("@"/"+")] :<hop count> <nick>
pub const NAMREPLY: &str        = "353";  // <=/*/@> <channel> :1*(@/ /+user)
pub const WHOSPCRPL: &str       = "354";  // WHOX reply
pub const ENDOFNAMES: &str      = "366";  // <channel> :End of names list
pub const BANLIST: &str         = "367";  // <channel> <ban mask>
pub const ENDOFBANLIST: &str    = "368";  // <channel> :End of ban list
pub const ENDOFWHOWAS: &str     = "369";  // <nick> :End of WHOWAS
pub const INFO: &str            = "371";  // :<info>
pub const MOTD: &str            = "372";  // :- <text>
pub const ENDOFINFO: &str       = "374";  // :End of INFO
pub const MOTDSTART: &str       = "375";  // :- <servername> Message of the day -
pub const ENDOFMOTD: &str       = "376";  // :End of MOTD command
pub const WHOISHOST: &str       = "378";  // <nick> :is connecting from *@localhost 127.0.0.1
pub const WHOISMODES: &str      = "379";  // <nick> :is using modes +ailosw
pub const TIME: &str            = "391";  // <servername> :<time in whatever format>

pub const ERR_NOSUCHNICK: &str       = "401";  // <nick> :No such nick/channel
pub const ERR_NOSUCHSERVER: &str     = "402";  // <server> :No such server
pub const ERR_NOSUCHCHANNEL: &str    = "403";  // <channel> :No such channel
pub const ERR_WASNOSUCHNICK: &str    = "406";  // <nick> :There was no such nickname
pub const ERR_INVALIDCAPCMD: &str    = "410";  // <command> :Invalid CAP subcommand
pub const ERR_NOMOTD: &str           = "422";  // :MOTD file missing
pub const ERR_NICKNAMEINUSE: &str    = "433";  // <nick> :Nickname in use
pub const ERR_NOTONCHANNEL: &str     = "442";  // <channel> :You're not on that channel
pub const ERR_CHANOPRIVSNEEDED: &str = "482";  // <channel> :You're not an operator

pub const WHOISSECURE: &str = "671";  // <nick> :is using a secure connection
