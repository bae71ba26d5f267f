//! Sockets, both ends.
//!
//! Each client socket and each upstream socket gets its own task.  These tasks only parse lines
//! and push them to the inbox of a session, and write whatever the session puts in their queue.

use crate::config::Network;
use crate::lines;
use crate::session::{SessionEvent, SessionHandle};
use kiwibnc_tokens::Message;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::{net, sync::mpsc, time};

// In milliseconds.
const REGISTRATION_TIMEOUT: u64 = 60_000;

/// Sessions clients can attach to, in configuration order.
pub type Sessions = Arc<Vec<(String, SessionHandle)>>;

/// Listens and accepts client connections.
pub async fn listen(addr: SocketAddr, sessions: Sessions) {
    let ln = net::TcpListener::bind(addr).await.unwrap_or_else(|err| {
        log::error!("Failed to listen to {}: {}", addr, err);
        process::exit(1);
    });

    log::info!("Listening on {} for plain-text connections...", addr);

    loop {
        match ln.accept().await {
            Ok((conn, peer_addr)) => {
                tokio::spawn(handle(conn, peer_addr, sessions.clone()));
            }
            Err(err) => log::warn!("Failed to accept connection: {}", err),
        }
    }
}

/// Handles a client connection, from its first line to its last.
async fn handle(conn: net::TcpStream, peer_addr: SocketAddr, sessions: Sessions) {
    let (reader, mut writer) = conn.into_split();
    let mut reader = io::BufReader::new(reader);

    let timeout = Duration::from_millis(REGISTRATION_TIMEOUT);
    let backlog = match time::timeout(timeout, read_registration(&mut reader, peer_addr)).await {
        Ok(Ok(backlog)) => backlog,
        Ok(Err(err)) => {
            log::debug!("{}: Left before registering: {}", peer_addr, err);
            return;
        }
        Err(_) => {
            let _ = write_error(&mut writer, lines::REGISTRATION_TIMEOUT).await;
            return;
        }
    };

    let (name, session) = match select_network(&sessions, &backlog) {
        Ok(selected) => selected,
        Err(reason) => {
            log::debug!("{}: {}", peer_addr, reason);
            let _ = write_error(&mut writer, &reason).await;
            return;
        }
    };

    let (msg_queue, mut outgoing_msgs) = mpsc::unbounded_channel();
    let id = match session.attach(msg_queue).await {
        Some(id) => id,
        None => {
            let _ = write_error(&mut writer, lines::SESSION_STOPPED).await;
            return;
        }
    };
    log::info!("{}: Attached to {} as client {}", peer_addr, name, id);

    for msg in backlog {
        session.send(SessionEvent::Client(id, msg));
    }

    let incoming = async {
        let mut buf = Vec::new();
        loop {
            let line = match read_line(&mut reader, &mut buf).await? {
                Some(line) => line,
                None => return Ok::<_, io::Error>(()),
            };
            log::trace!("{} >> {}", peer_addr, line.trim());
            if let Some(msg) = Message::parse(&line) {
                if !session.send(SessionEvent::Client(id, msg)) {
                    return Ok(());
                }
            }
        }
    };

    let outgoing = async {
        // The queue closes when the session drops the client.
        while let Some(msg) = outgoing_msgs.recv().await {
            log::trace!("{} << {}", peer_addr, msg);
            writer.write_all(msg.to_line().as_bytes()).await?;
        }
        Ok::<_, io::Error>(())
    };

    let res: io::Result<()> = tokio::select! {
        res = incoming => res,
        res = outgoing => res,
    };
    if let Err(err) = res {
        log::debug!("{}: Connection error: {}", peer_addr, err);
    }
    session.send(SessionEvent::ClientDetached(id));
    log::info!("{}: Detached from {}", peer_addr, name);
}

/// Reads lines until USER, and returns them.
async fn read_registration<R>(reader: &mut R, peer_addr: SocketAddr) -> io::Result<Vec<Message>>
    where R: AsyncBufRead + Unpin
{
    let mut backlog = Vec::new();
    let mut buf = Vec::new();
    loop {
        let line = match read_line(reader, &mut buf).await? {
            Some(line) => line,
            None => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, lines::CONNECTION_RESET)),
        };
        log::trace!("{} >> {}", peer_addr, line.trim());
        if let Some(msg) = Message::parse(&line) {
            let done = msg.is("USER");
            backlog.push(msg);
            if done {
                return Ok(backlog);
            }
        }
    }
}

/// Reads one line.  Invalid UTF-8 is replaced rather than rejected, since peers are free to send
/// any byte.  Returns `None` at the end of the stream.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
    where R: AsyncBufRead + Unpin
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Picks the network named by the client's PASS, or the first one.
pub fn select_network<'s, T>(networks: &'s [(String, T)], backlog: &[Message]) -> Result<(&'s str, &'s T), String> {
    let pass = backlog.iter().rev().find(|msg| msg.is("PASS")).map(|msg| msg.param(0));
    let found = match pass {
        Some(name) if !name.is_empty() => networks
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| lines::unknown_network(name))?,
        _ => networks.first().ok_or_else(|| lines::NO_NETWORK.to_owned())?,
    };
    Ok((found.0.as_str(), &found.1))
}

async fn write_error<W>(writer: &mut W, reason: &str) -> io::Result<()>
    where W: AsyncWrite + Unpin
{
    let msg = Message::new("ERROR").with_param(reason);
    writer.write_all(msg.to_line().as_bytes()).await
}

/// Keeps `session` connected to `network`, reconnecting after `reconnect_delay` each time the
/// connection drops.  Returns when the session stops.
pub async fn connect(network: Network, session: SessionHandle, reconnect_delay: Duration) {
    if network.tls {
        log::error!("{}: TLS upstream connections are not supported, not connecting", network.name);
        return;
    }

    while !session.is_closed() {
        log::debug!("{}: Connecting to {}:{}", network.name, network.host, network.port);
        match net::TcpStream::connect((network.host.as_str(), network.port)).await {
            Ok(conn) => {
                if let Err(err) = run_upstream(conn, &network.name, &session).await {
                    log::warn!("{}: Connection error: {}", network.name, err);
                }
            }
            Err(err) => {
                log::warn!("{}: Failed to connect to {}:{}: {}", network.name, network.host, network.port, err);
            }
        }
        if session.is_closed() {
            break;
        }
        time::sleep(reconnect_delay).await;
    }
}

async fn run_upstream(conn: net::TcpStream, name: &str, session: &SessionHandle) -> io::Result<()> {
    let (reader, mut writer) = conn.into_split();
    let mut reader = io::BufReader::new(reader);
    let (msg_queue, mut outgoing_msgs) = mpsc::unbounded_channel();
    if !session.send(SessionEvent::UpstreamConnected(msg_queue)) {
        return Ok(());
    }

    let incoming = async {
        let mut buf = Vec::new();
        loop {
            let line = match read_line(&mut reader, &mut buf).await? {
                Some(line) => line,
                None => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, lines::CONNECTION_RESET)),
            };
            log::trace!("{} >> {}", name, line.trim());
            if let Some(msg) = Message::parse(&line) {
                if !session.send(SessionEvent::Upstream(msg)) {
                    return Ok::<_, io::Error>(());
                }
            }
        }
    };

    let outgoing = async {
        while let Some(msg) = outgoing_msgs.recv().await {
            log::trace!("{} << {}", name, msg);
            writer.write_all(msg.to_line().as_bytes()).await?;
        }
        Ok::<_, io::Error>(())
    };

    let res: io::Result<()> = tokio::select! {
        res = incoming => res,
        res = outgoing => res,
    };
    session.send(SessionEvent::UpstreamClosed);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiwibnc_tokens::assert_msg;

    fn backlog(lines: &[&str]) -> Vec<Message> {
        lines.iter().map(|line| Message::parse(line).unwrap()).collect()
    }

    #[test]
    fn test_select_network() {
        let networks = vec![("libera".to_owned(), 1), ("oftc".to_owned(), 2)];

        let selected = select_network(&networks, &backlog(&["NICK kiwi", "USER k 0 * :K"]));
        assert_eq!(selected, Ok(("libera", &1)));

        let selected = select_network(&networks, &backlog(&["PASS oftc", "NICK kiwi", "USER k 0 * :K"]));
        assert_eq!(selected, Ok(("oftc", &2)));

        let selected = select_network(&networks, &backlog(&["PASS efnet", "USER k 0 * :K"]));
        assert_eq!(selected, Err(lines::unknown_network("efnet")));

        let none: Vec<(String, u8)> = Vec::new();
        assert_eq!(select_network(&none, &backlog(&["USER k 0 * :K"])), Err(lines::NO_NETWORK.to_owned()));
    }

    #[tokio::test]
    async fn test_read_line_invalid_utf8() {
        let input: &[u8] = b":aji!a@h PRIVMSG #kiwi :caf\xe9\r\nPING :still-here\r\n";
        let mut reader = io::BufReader::new(input);
        let mut buf = Vec::new();

        let line = read_line(&mut reader, &mut buf).await.unwrap().unwrap();
        let msg = Message::parse(&line).unwrap();
        assert_eq!(msg.param(1), "caf\u{fffd}");

        let line = read_line(&mut reader, &mut buf).await.unwrap().unwrap();
        assert_msg(&Message::parse(&line).unwrap(), None, "PING", &["still-here"]);
        assert!(read_line(&mut reader, &mut buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_registration() {
        let input: &[u8] = b"CAP LS 302\r\n\r\nNICK kiwi\r\nUSER k 0 * :Kiwi\r\nJOIN #late\r\n";
        let mut reader = io::BufReader::new(input);
        let addr = SocketAddr::from(([127, 0, 0, 1], 6667));

        let backlog = read_registration(&mut reader, addr).await.unwrap();
        let commands: Vec<&str> = backlog.iter().map(|msg| msg.command.as_str()).collect();
        assert_eq!(commands, vec!["CAP", "NICK", "USER"]);

        let mut eof = io::BufReader::new(&b"NICK kiwi\r\n"[..]);
        let err = read_registration(&mut eof, addr).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
