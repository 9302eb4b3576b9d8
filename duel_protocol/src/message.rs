// Protocol messages for client-server communication.
//
// Each message is a flat JSON object; field names are the wire contract and
// must not be renamed. There is no type tag on the wire, so the two places
// where the receiver cannot know in advance which shape arrives use untagged
// enums that tell the shapes apart by their fields:
// - `OpeningMessage`: the first frame on a connection is either a connect
//   request (`name`) or a relay binding (`player` + `action`).
// - `ServerReply`: what a client may get back at any step. Error replies are
//   always a plain `StatusMessage`.
//
// `send_message` / `recv_message` combine JSON (de)serialization with the
// newline framing from `framing.rs`.

use std::io::{self, BufRead, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::framing::{read_message, write_message};
use crate::types::{Character, StatusCode};

/// Generic ack/error envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    pub code: StatusCode,
}

impl StatusMessage {
    pub fn new(code: StatusCode, status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            code,
        }
    }

    pub fn too_many_players() -> Self {
        Self::new(StatusCode::TooManyPlayers, "Too many players in the room")
    }

    pub fn selected() -> Self {
        Self::new(StatusCode::Success, "connection successfully")
    }

    pub fn not_ready() -> Self {
        Self::new(StatusCode::NotReady, "not ready")
    }

    pub fn internal_error() -> Self {
        Self::new(StatusCode::InternalError, "internal error")
    }
}

/// First frame of a player connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub name: String,
}

/// Reply to a successful `ConnectRequest`. `left` is true for the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub status: String,
    pub code: StatusCode,
    pub left: bool,
}

impl ConnectResponse {
    pub fn connected(left: bool) -> Self {
        Self {
            status: "Connected successfully".into(),
            code: StatusCode::Success,
            left,
        }
    }
}

/// Character selection. A missing field decodes as an empty name so that it
/// is reported as a selection error rather than a malformed frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub character: String,
}

/// Opponent description sent when the waiting phase completes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectResponse {
    pub player: String,
    pub character: String,
    pub status: String,
    pub code: StatusCode,
}

impl SelectResponse {
    pub fn opponent_ready(player: &str, character: Character) -> Self {
        Self {
            player: player.to_owned(),
            character: character.name().to_owned(),
            status: "Other player ready".into(),
            code: StatusCode::Success,
        }
    }
}

/// Opening frame of a relay connection that receives the input of the
/// already admitted player named in `player`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRequest {
    pub player: String,
    #[serde(default)]
    pub action: String,
}

/// One input token. An empty key means "no input this round".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMessage {
    #[serde(default)]
    pub key: String,
}

impl KeyMessage {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn none() -> Self {
        Self { key: String::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// The first frame on any connection. `Bind` is tried first because it
/// requires the `player` field, which a connect request never carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpeningMessage {
    Bind(BindRequest),
    Connect(ConnectRequest),
}

/// Any server-to-client frame, most specific shape first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerReply {
    Opponent(SelectResponse),
    Connected(ConnectResponse),
    Status(StatusMessage),
    Key(KeyMessage),
}

impl ServerReply {
    /// Status code of the reply, if it carries one (key frames do not).
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            ServerReply::Opponent(m) => Some(m.code),
            ServerReply::Connected(m) => Some(m.code),
            ServerReply::Status(m) => Some(m.code),
            ServerReply::Key(_) => None,
        }
    }
}

/// Serialize `msg` to JSON and write it as one newline-terminated frame.
pub fn send_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let json = serde_json::to_vec(msg).map_err(io::Error::other)?;
    write_message(writer, &json)
}

/// Read one frame and deserialize it. Framing failures surface as the outer
/// `io::Error`; a well-framed but undecodable payload as the inner
/// `serde_json::Error`, so callers can keep the connection open for the
/// latter.
pub fn recv_message<R: BufRead, T: DeserializeOwned>(
    reader: &mut R,
) -> io::Result<serde_json::Result<T>> {
    let bytes = read_message(reader)?;
    Ok(serde_json::from_slice(&bytes))
}
