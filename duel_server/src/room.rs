// Room registry and player records.
//
// `Room` is the only shared mutable structure in the server: an
// insertion-ordered list of at most two `PlayerRecord`s behind one mutex.
// Every cross-record invariant lives here:
// - occupancy never exceeds `ROOM_CAPACITY`, checked and inserted in one
//   critical section;
// - role follows insertion order (first admitted is `Host`);
// - opponent readiness (room full AND opponent has a character) is observed
//   in one critical section, so a session can never see a half-selected
//   opponent as ready.
//
// Sessions get `Arc<PlayerRecord>` handles out of the room and drop the lock
// before doing any socket I/O. Records are never removed: a disconnected
// player keeps its slot until the process restarts.
//
// `PlayerRecord` fields that change after admission (`character`, `state`)
// are atomics. Each has a single writer (the owning local session) and is
// read by the opponent's sessions without the room lock; release/acquire
// ordering makes a written value visible to those readers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use duel_protocol::types::{Character, Role};
use thiserror::Error;

use crate::relay::InputQueue;
use crate::session::SessionState;

/// Number of player slots in the room.
pub const ROOM_CAPACITY: usize = 2;

/// Registry outcomes returned to the calling session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room is full")]
    Capacity,
    #[error("player name must not be empty")]
    EmptyIdentity,
    #[error("player name {0:?} is already taken")]
    DuplicateIdentity(String),
    #[error("player not found: {0}")]
    NotFound(String),
}

/// State of one admitted player.
#[derive(Debug)]
pub struct PlayerRecord {
    identity: String,
    role: Role,
    /// `Character::to_u8`, or 0 while unselected.
    character: AtomicU8,
    /// `SessionState::to_u8`.
    state: AtomicU8,
    inputs: InputQueue,
}

impl PlayerRecord {
    fn new(identity: String, role: Role, queue_capacity: usize) -> Self {
        Self {
            identity,
            role,
            character: AtomicU8::new(0),
            state: AtomicU8::new(SessionState::Selecting.to_u8()),
            inputs: InputQueue::new(queue_capacity),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn character(&self) -> Option<Character> {
        Character::from_u8(self.character.load(Ordering::Acquire))
    }

    /// Set the character if none is set yet. Returns false (and changes
    /// nothing) when a character was already chosen.
    pub fn select_character(&self, character: Character) -> bool {
        self.character
            .compare_exchange(0, character.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn state(&self) -> SessionState {
        // Only `set_state` writes this field, always with a valid tag.
        SessionState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Selecting)
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// This player's outgoing input tokens.
    pub fn inputs(&self) -> &InputQueue {
        &self.inputs
    }
}

/// The single two-player room.
#[derive(Debug)]
pub struct Room {
    slots: Mutex<Vec<Arc<PlayerRecord>>>,
    queue_capacity: usize,
}

impl Room {
    /// Create an empty room whose players get input queues of
    /// `queue_capacity` tokens.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(ROOM_CAPACITY)),
            queue_capacity,
        }
    }

    /// Admit a new player. The first admitted player becomes `Host`, the
    /// second `Remote`. Fails without creating a record when the room is
    /// full, the name is empty, or the name is already in the room.
    pub fn try_admit(&self, identity: &str) -> Result<(Arc<PlayerRecord>, Role), RoomError> {
        let mut slots = self.lock();
        if slots.len() >= ROOM_CAPACITY {
            return Err(RoomError::Capacity);
        }
        if identity.is_empty() {
            return Err(RoomError::EmptyIdentity);
        }
        if slots.iter().any(|p| p.identity == identity) {
            return Err(RoomError::DuplicateIdentity(identity.to_owned()));
        }

        let role = if slots.is_empty() {
            Role::Host
        } else {
            Role::Remote
        };
        let record = Arc::new(PlayerRecord::new(
            identity.to_owned(),
            role,
            self.queue_capacity,
        ));
        slots.push(record.clone());
        Ok((record, role))
    }

    /// Number of occupied slots.
    pub fn occupancy(&self) -> usize {
        self.lock().len()
    }

    /// The other player, if the room is full and that player has selected a
    /// character. Both conditions are checked under one lock acquisition.
    pub fn find_opponent(&self, self_identity: &str) -> Option<(Arc<PlayerRecord>, Character)> {
        let slots = self.lock();
        if slots.len() < ROOM_CAPACITY {
            return None;
        }
        let opponent = slots.iter().find(|p| p.identity != self_identity)?;
        let character = opponent.character()?;
        Some((opponent.clone(), character))
    }

    /// The player sharing the room with `identity`, whether or not they have
    /// selected yet.
    pub fn other_occupant(&self, identity: &str) -> Option<Arc<PlayerRecord>> {
        self.lock().iter().find(|p| p.identity != identity).cloned()
    }

    /// Find an admitted player by name.
    pub fn lookup(&self, identity: &str) -> Result<Arc<PlayerRecord>, RoomError> {
        self.lock()
            .iter()
            .find(|p| p.identity == identity)
            .cloned()
            .ok_or_else(|| RoomError::NotFound(identity.to_owned()))
    }

    // Holders only push to or read the list, so a poisoned guard still
    // protects a consistent list.
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<PlayerRecord>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
