//
// Client connections
//

pub const CONNECTION_RESET: &str = "Connection closed by peer";

pub const CLOSING_LINK: &str = "Closing link, the session stays up";

pub const REGISTRATION_TIMEOUT: &str = "Registration timed out";

pub fn unknown_network(name: &str) -> String {
    format!("Unknown network {:?}", name)
}

pub const NO_NETWORK: &str = "No network is configured";

pub const SESSION_STOPPED: &str = "The session for this network has stopped";

//
// IRC replies
//

pub const INVALID_CAP_CMD: &str = "Invalid CAP subcommand";

pub const ISUPPORT_TRAILING: &str = "are supported by this server";
