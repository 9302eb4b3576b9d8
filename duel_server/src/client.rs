// Blocking TCP client for the duel server.
//
// A thin synchronous wrapper over the protocol crate: each method writes one
// frame and, where the protocol answers, reads exactly one reply. A player
// normally holds two clients:
// - the primary one from `DuelClient::join`, used to select a character,
//   poll for the opponent, and submit keys;
// - a relay channel from `DuelClient::bind` naming the opponent, which
//   receives the opponent's keys via `recv_key`. A channel opened before
//   play has started polls for readiness first.
//
// Used by the integration tests; it has no server-side dependencies beyond
// the message types.

use std::io::{self, BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use duel_protocol::message::{
    BindRequest, ConnectRequest, KeyMessage, SelectRequest, SelectResponse, ServerReply,
    StatusMessage, recv_message, send_message,
};
use duel_protocol::types::{Role, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// How long a client waits for a reply before giving up.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame a client sends to ask whether the opponent is ready. The server
/// accepts any frame here.
#[derive(Serialize)]
struct ReadyPoll<'a> {
    action: &'a str,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed reply: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server refused: {}", .0.status)]
    Refused(StatusMessage),
    #[error("unexpected reply: {0:?}")]
    Unexpected(ServerReply),
}

/// Synchronous connection to the duel server.
pub struct DuelClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl DuelClient {
    /// Open a connection without sending anything.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(DEFAULT_REPLY_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
        })
    }

    /// Connect and ask for a seat. Returns the assigned role.
    pub fn join(addr: impl ToSocketAddrs, name: &str) -> Result<(Self, Role), ClientError> {
        let mut client = Self::connect(addr)?;
        client.send(&ConnectRequest { name: name.into() })?;
        match client.recv()? {
            ServerReply::Connected(resp) if resp.code == StatusCode::Success => {
                let role = if resp.left { Role::Host } else { Role::Remote };
                Ok((client, role))
            }
            ServerReply::Status(status) => Err(ClientError::Refused(status)),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Open a relay channel carrying the keys of the admitted player
    /// `player`. If the match is already under way the server streams keys
    /// at once; otherwise it waits for a `poll_ready` round first.
    pub fn bind(addr: impl ToSocketAddrs, player: &str, action: &str) -> io::Result<Self> {
        let mut client = Self::connect(addr)?;
        client.send(&BindRequest {
            player: player.into(),
            action: action.into(),
        })?;
        Ok(client)
    }

    /// Submit a character choice and return the server's status reply,
    /// whatever its code.
    pub fn select(&mut self, character: &str) -> Result<StatusMessage, ClientError> {
        self.send(&SelectRequest {
            character: character.into(),
        })?;
        match self.recv()? {
            ServerReply::Status(status) => Ok(status),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Ask whether the opponent is ready. `None` means "not yet".
    pub fn poll_ready(&mut self) -> Result<Option<SelectResponse>, ClientError> {
        self.send(&ReadyPoll { action: "sync" })?;
        match self.recv()? {
            ServerReply::Opponent(resp) => Ok(Some(resp)),
            ServerReply::Status(status) if status.code == StatusCode::NotReady => Ok(None),
            ServerReply::Status(status) => Err(ClientError::Refused(status)),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Submit one input token.
    pub fn send_key(&mut self, key: &str) -> io::Result<()> {
        self.send(&KeyMessage::new(key))
    }

    /// Receive one relayed token. An empty string means the opponent sent
    /// nothing this round.
    pub fn recv_key(&mut self) -> Result<String, ClientError> {
        match self.recv()? {
            ServerReply::Key(msg) => Ok(msg.key),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Write any message as one frame.
    pub fn send<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        send_message(&mut self.writer, msg)
    }

    /// Read and decode one reply frame.
    pub fn recv(&mut self) -> Result<ServerReply, ClientError> {
        Ok(recv_message(&mut self.reader)??)
    }
}
