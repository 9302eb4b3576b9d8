// Per-connection session state machine.
//
// One `Session` runs on its own thread for each connection that got past
// the opening frame (see `server.rs`). It owns the connection's reader and
// writer and drives one player through
//
//   Selecting -> Waiting -> Syncing -> Playing
//
// Each state has one handler that performs exactly one protocol round and
// returns an `Event`. `next_state` looks the `(state, event)` pair up in the
// `TRANSITIONS` table; the driver loop in `run` applies it. Handlers never
// touch the state tag themselves.
//
// Two modes, fixed at construction:
// - `Mode::Local`: the player's primary connection. It selects the
//   character, waits for the opponent, then pushes every received key onto
//   the player's own input queue. It is the only writer of the record's
//   `character` and `state`.
// - `Mode::Forwarding`: a relay connection that streams one player's keys
//   to the other. It runs on behalf of the receiving player and pops the
//   opponent's queue, sending one key (or an empty key plus a pause) per
//   round. It starts in `Playing` when the receiving player is already
//   playing, otherwise in `Waiting`. It keeps its state locally and never
//   writes the record.
//
// Error policy: I/O failures end the session; an oversized frame outside
// `Playing` still gets a final `InternalError` reply. Malformed frames and
// bad selections in `Selecting`/`Waiting` are answered with a status reply
// and the state is kept. In `Playing` every error ends the session, since a
// broken input stream is treated as the player leaving.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use duel_protocol::framing::read_message;
use duel_protocol::message::{
    KeyMessage, SelectRequest, SelectResponse, StatusMessage, send_message,
};
use duel_protocol::types::{Character, SelectionError, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::room::{PlayerRecord, Room};

/// Protocol state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Selecting = 1,
    Waiting = 2,
    /// Placeholder for a start barrier; currently passes straight through.
    Syncing = 3,
    Playing = 4,
}

impl SessionState {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SessionState::Selecting),
            2 => Some(SessionState::Waiting),
            3 => Some(SessionState::Syncing),
            4 => Some(SessionState::Playing),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Selecting => "selecting",
            SessionState::Waiting => "waiting",
            SessionState::Syncing => "syncing",
            SessionState::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// Which side of the input relay a session serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Local,
    Forwarding,
}

/// Outcome of one handler round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    CharacterSelected,
    NotReady,
    OpponentReady,
    Synced,
    Relayed,
}

/// `(from, event, to)`. Pairs not listed are invalid.
pub const TRANSITIONS: &[(SessionState, Event, SessionState)] = &[
    (SessionState::Selecting, Event::CharacterSelected, SessionState::Waiting),
    (SessionState::Waiting, Event::NotReady, SessionState::Waiting),
    (SessionState::Waiting, Event::OpponentReady, SessionState::Syncing),
    (SessionState::Syncing, Event::Synced, SessionState::Playing),
    (SessionState::Playing, Event::Relayed, SessionState::Playing),
];

/// Look up the state that follows `state` on `event`.
pub fn next_state(state: SessionState, event: Event) -> Option<SessionState> {
    TRANSITIONS
        .iter()
        .find(|(from, on, _)| *from == state && *on == event)
        .map(|(_, _, to)| *to)
}

/// Why a session round failed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("no transition from {state} on {event:?}")]
    InvalidTransition { state: SessionState, event: Event },
    #[error("forwarding session has no opponent")]
    NoOpponent,
}

impl SessionError {
    /// Whether the session can no longer continue regardless of its state.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Io(_)
            | SessionError::InvalidTransition { .. }
            | SessionError::NoOpponent => true,
            SessionError::Protocol(_) | SessionError::Selection(_) => false,
        }
    }

    /// The peer sent a frame the framing layer refused.
    fn is_bad_frame(&self) -> bool {
        matches!(self, SessionError::Io(e) if e.kind() == io::ErrorKind::InvalidData)
    }
}

/// Timing knobs for a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Pause after a forwarding round that found no queued input.
    pub forward_interval: Duration,
}

/// One connection's state machine.
pub struct Session<R, W> {
    reader: R,
    writer: W,
    room: Arc<Room>,
    player: Arc<PlayerRecord>,
    opponent: Option<Arc<PlayerRecord>>,
    mode: Mode,
    state: SessionState,
    options: SessionOptions,
}

impl<R: BufRead, W: Write> Session<R, W> {
    /// Session for a freshly admitted player's primary connection.
    pub fn local(
        reader: R,
        writer: W,
        room: Arc<Room>,
        player: Arc<PlayerRecord>,
        options: SessionOptions,
    ) -> Self {
        player.set_state(SessionState::Selecting);
        Self {
            reader,
            writer,
            room,
            player,
            opponent: None,
            mode: Mode::Local,
            state: SessionState::Selecting,
            options,
        }
    }

    /// Relay session on behalf of `player`: streams the keys of `player`'s
    /// opponent. If `player` is already playing against a selected opponent,
    /// keys flow immediately without a readiness round.
    pub fn forwarding(
        reader: R,
        writer: W,
        room: Arc<Room>,
        player: Arc<PlayerRecord>,
        options: SessionOptions,
    ) -> Self {
        let opponent = match player.state() {
            SessionState::Playing => room
                .find_opponent(player.identity())
                .map(|(opponent, _)| opponent),
            _ => None,
        };
        let state = if opponent.is_some() {
            SessionState::Playing
        } else {
            SessionState::Waiting
        };
        Self {
            reader,
            writer,
            room,
            player,
            opponent,
            mode: Mode::Forwarding,
            state,
            options,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Drive the state machine until the connection becomes unusable.
    /// Returns the error that ended the session.
    pub fn run(mut self) -> SessionError {
        loop {
            let event = match self.step() {
                Ok(event) => event,
                Err(err) if err.is_fatal() || self.state == SessionState::Playing => {
                    if err.is_bad_frame() && self.state != SessionState::Playing {
                        let _ = self.send(&StatusMessage::internal_error());
                    }
                    return err;
                }
                Err(err) => {
                    warn!(state = %self.state, error = %err, "recoverable session error");
                    let status = self.error_status(&err);
                    if let Err(io_err) = self.send(&status) {
                        return io_err.into();
                    }
                    continue;
                }
            };

            if let Err(err) = self.apply(event) {
                return err;
            }
        }
    }

    /// Run the handler for the current state once.
    pub fn step(&mut self) -> Result<Event, SessionError> {
        match (self.state, self.mode) {
            (SessionState::Selecting, _) => self.on_selecting(),
            (SessionState::Waiting, _) => self.on_waiting(),
            (SessionState::Syncing, _) => Ok(Event::Synced),
            (SessionState::Playing, Mode::Local) => self.on_playing_local(),
            (SessionState::Playing, Mode::Forwarding) => self.on_playing_forwarding(),
        }
    }

    fn apply(&mut self, event: Event) -> Result<(), SessionError> {
        let next = next_state(self.state, event).ok_or(SessionError::InvalidTransition {
            state: self.state,
            event,
        })?;
        if next != self.state {
            debug!(
                player = self.player.identity(),
                mode = ?self.mode,
                from = %self.state,
                to = %next,
                "state transition"
            );
            if next == SessionState::Playing {
                info!(
                    player = self.player.identity(),
                    mode = ?self.mode,
                    "entering play"
                );
            }
        }
        self.state = next;
        if self.mode == Mode::Local {
            self.player.set_state(next);
        }
        Ok(())
    }

    fn on_selecting(&mut self) -> Result<Event, SessionError> {
        let request: SelectRequest = self.recv()?;
        let character: Character = request.character.parse()?;
        if !self.player.select_character(character) {
            warn!(
                player = self.player.identity(),
                requested = %character,
                "character already selected; keeping the first choice"
            );
        }
        info!(player = self.player.identity(), %character, "character selected");
        self.send(&StatusMessage::selected())?;
        Ok(Event::CharacterSelected)
    }

    fn on_waiting(&mut self) -> Result<Event, SessionError> {
        // Any frame counts as a readiness poll.
        self.read_frame()?;

        match self.room.find_opponent(self.player.identity()) {
            Some((opponent, character)) => {
                self.send(&SelectResponse::opponent_ready(
                    opponent.identity(),
                    character,
                ))?;
                self.opponent = Some(opponent);
                Ok(Event::OpponentReady)
            }
            None => {
                self.send(&StatusMessage::not_ready())?;
                Ok(Event::NotReady)
            }
        }
    }

    fn on_playing_local(&mut self) -> Result<Event, SessionError> {
        let message: KeyMessage = self.recv()?;
        debug!(player = self.player.identity(), key = %message.key, "key pressed");
        if let Some(dropped) = self.player.inputs().push(message.key) {
            debug!(
                player = self.player.identity(),
                dropped = %dropped,
                "input queue full, dropped oldest key"
            );
        }
        Ok(Event::Relayed)
    }

    fn on_playing_forwarding(&mut self) -> Result<Event, SessionError> {
        let opponent = self.opponent.clone().ok_or(SessionError::NoOpponent)?;
        match opponent.inputs().try_pop() {
            Some(key) => self.send(&KeyMessage::new(key))?,
            None => {
                self.send(&KeyMessage::none())?;
                thread::sleep(self.options.forward_interval);
            }
        }
        Ok(Event::Relayed)
    }

    /// Status reply for a recoverable error in the current state.
    fn error_status(&self, err: &SessionError) -> StatusMessage {
        match (err, self.state) {
            (SessionError::Selection(e), _) => {
                StatusMessage::new(StatusCode::SelectError, e.to_string())
            }
            (_, SessionState::Selecting) => {
                StatusMessage::new(StatusCode::SelectError, "malformed message")
            }
            _ => StatusMessage::internal_error(),
        }
    }

    fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let bytes = read_message(&mut self.reader)?;
        debug!(
            player = self.player.identity(),
            frame = %String::from_utf8_lossy(&bytes),
            "received"
        );
        Ok(bytes)
    }

    fn recv<T: DeserializeOwned>(&mut self) -> Result<T, SessionError> {
        let bytes = self.read_frame()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn send<T: Serialize + fmt::Debug>(&mut self, msg: &T) -> io::Result<()> {
        debug!(player = self.player.identity(), message = ?msg, "sending");
        send_message(&mut self.writer, msg)
    }
}
