// Core value types for the duel protocol.
//
// `Character` is the closed set of selectable fighters. On the wire it is a
// lowercase name (`"max"`, `"drax"`); inside the server it is also stored as
// a compact integer so a player record can keep it in an atomic, with `0`
// meaning "not selected yet". `StatusCode` is the small integer enum carried
// by every status envelope. `Role` records arrival order in the room.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Selectable character. Character identity is only a label; no game rules
/// hang off it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Character {
    Max = 1,
    Drax = 2,
}

impl Character {
    /// All selectable characters, in wire-value order.
    pub const ALL: [Character; 2] = [Character::Max, Character::Drax];

    /// Lowercase wire name.
    pub fn name(self) -> &'static str {
        match self {
            Character::Max => "max",
            Character::Drax => "drax",
        }
    }

    /// Compact integer form. Never zero.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of `to_u8`. Returns `None` for `0` (unset) and for values
    /// outside the closed set.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.to_u8() == value)
    }
}

impl fmt::Display for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a character selection was refused. The `Display` text is what the
/// client sees in the `status` field of the `SelectError` reply.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("Empty character name")]
    Empty,
    #[error("invalid character choice")]
    Unknown(String),
}

impl FromStr for Character {
    type Err = SelectionError;

    /// Case-sensitive: only the exact lowercase names are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SelectionError::Empty);
        }
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| SelectionError::Unknown(s.to_owned()))
    }
}

/// Display helper for an optional character, matching the `<unknown>` text
/// used in logs for players that have not selected yet.
pub fn character_label(character: Option<Character>) -> &'static str {
    character.map_or("<unknown>", Character::name)
}

/// Result code carried by every status envelope. Serialized as a bare JSON
/// integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatusCode {
    Success = 1,
    TooManyPlayers = 2,
    SelectError = 3,
    NotReady = 4,
    InternalError = 5,
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StatusCode::Success),
            2 => Ok(StatusCode::TooManyPlayers),
            3 => Ok(StatusCode::SelectError),
            4 => Ok(StatusCode::NotReady),
            5 => Ok(StatusCode::InternalError),
            other => Err(format!("unknown status code {other}")),
        }
    }
}

/// Seat in the room, fixed at admission. The first admitted player is the
/// host (reported to the client as `left: true`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Remote,
}

impl Role {
    pub fn is_host(self) -> bool {
        self == Role::Host
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Remote => f.write_str("remote"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_parse_is_case_sensitive() {
        assert_eq!("max".parse::<Character>(), Ok(Character::Max));
        assert_eq!("drax".parse::<Character>(), Ok(Character::Drax));
        assert_eq!(
            "Max".parse::<Character>(),
            Err(SelectionError::Unknown("Max".into()))
        );
        assert_eq!("".parse::<Character>(), Err(SelectionError::Empty));
    }

    #[test]
    fn character_u8_zero_is_unset() {
        assert_eq!(Character::from_u8(0), None);
        assert_eq!(Character::from_u8(3), None);
        for c in Character::ALL {
            assert_eq!(Character::from_u8(c.to_u8()), Some(c));
        }
        assert_eq!(character_label(None), "<unknown>");
    }

    #[test]
    fn status_code_is_a_bare_integer() {
        assert_eq!(serde_json::to_string(&StatusCode::NotReady).unwrap(), "4");
        let code: StatusCode = serde_json::from_str("2").unwrap();
        assert_eq!(code, StatusCode::TooManyPlayers);
        assert!(serde_json::from_str::<StatusCode>("9").is_err());
    }

    #[test]
    fn selection_error_texts() {
        assert_eq!(SelectionError::Empty.to_string(), "Empty character name");
        assert_eq!(
            SelectionError::Unknown("x".into()).to_string(),
            "invalid character choice"
        );
    }
}
