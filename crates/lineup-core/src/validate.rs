// Lineup validation: structural rules and squad membership.
//
// Used for both official lineups and participant predictions. Pure: takes a
// squad snapshot and a candidate, returns the typed lineup or the first
// violated rule.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    PlayerId, PlayerSlot, Position, Substitution, TeamSquad, LINEUP_SIZE, MAX_MINUTE, MAX_SUBS,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("lineup must contain exactly 11 players, got {found}")]
    WrongPlayerCount { found: usize },

    #[error("lineup entry {index} has no player id")]
    MissingPlayerId { index: usize },

    #[error("lineup entry {index} (player {player_id}) has invalid position `{position}`; allowed: gk, def, mid, fw")]
    InvalidPosition {
        index: usize,
        player_id: PlayerId,
        position: String,
    },

    #[error("player {player_id} appears more than once in the lineup")]
    DuplicatePlayer { player_id: PlayerId },

    #[error("lineup must contain exactly one gk, got {found}")]
    GoalkeeperCount { found: usize },

    #[error("player {player_id} is not in the {team} squad")]
    PlayerNotInSquad { player_id: PlayerId, team: String },

    #[error("substitute {player_id} is not in the {team} squad")]
    SubNotInSquad { player_id: PlayerId, team: String },

    #[error("man of the match {player_id} is not in the {team} squad")]
    MotmNotInSquad { player_id: PlayerId, team: String },

    #[error("substitute {player_id} is listed more than once")]
    DuplicateSub { player_id: PlayerId },

    #[error("at most 5 substitutes allowed, got {found}")]
    TooManySubs { found: usize },

    #[error("minute {minute} for player {player_id} is outside 0..=130")]
    InvalidMinute { player_id: PlayerId, minute: u32 },

    #[error("player {player_id} is in neither squad of this match")]
    NotInMatchSquads { player_id: PlayerId },

    #[error("`{field}` is required")]
    MissingField { field: &'static str },

    #[error("matchday {matchday} is outside 1..=38")]
    MatchdayOutOfRange { matchday: u8 },

    #[error("a team cannot play itself: {team}")]
    SameTeams { team: String },
}

impl ValidationError {
    /// The Player id the violation refers to, when there is one.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            ValidationError::InvalidPosition { player_id, .. }
            | ValidationError::DuplicatePlayer { player_id }
            | ValidationError::DuplicateSub { player_id }
            | ValidationError::PlayerNotInSquad { player_id, .. }
            | ValidationError::SubNotInSquad { player_id, .. }
            | ValidationError::MotmNotInSquad { player_id, .. }
            | ValidationError::InvalidMinute { player_id, .. }
            | ValidationError::NotInMatchSquads { player_id } => Some(*player_id),
            _ => None,
        }
    }
}

/// A starter as submitted, before validation. A missing id deserializes to 0
/// and a missing position to "", so both reach the validator as rule
/// violations rather than parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineupEntry {
    #[serde(default, alias = "playerId")]
    pub player_id: PlayerId,
    #[serde(default)]
    pub position: String,
}

impl LineupEntry {
    pub fn new(player_id: PlayerId, position: &str) -> Self {
        LineupEntry {
            player_id,
            position: position.to_string(),
        }
    }
}

/// A substitute as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEntry {
    #[serde(default, alias = "playerId")]
    pub player_id: PlayerId,
    #[serde(default)]
    pub minute: Option<u32>,
}

/// Everything the validator inspects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub players: &'a [LineupEntry],
    pub subs: Option<&'a [SubEntry]>,
    pub motm: Option<PlayerId>,
}

/// A lineup that passed every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLineup {
    pub players: Vec<PlayerSlot>,
    pub subs: Vec<Substitution>,
    pub motm: Option<PlayerId>,
}

/// Check `candidate` against `squad`, failing on the first violated rule.
///
/// Rule order: player count, per-entry id and position, duplicate ids,
/// goalkeeper count, squad membership (starters, then subs, then MOTM),
/// substitute count, repeated subs and minutes. Subs may repeat starters but
/// not each other.
pub fn validate(
    candidate: &Candidate<'_>,
    squad: &TeamSquad,
) -> Result<ValidatedLineup, ValidationError> {
    let entries = candidate.players;
    if entries.len() != LINEUP_SIZE {
        return Err(ValidationError::WrongPlayerCount {
            found: entries.len(),
        });
    }

    let mut players = Vec::with_capacity(LINEUP_SIZE);
    for (index, entry) in entries.iter().enumerate() {
        if entry.player_id <= 0 {
            return Err(ValidationError::MissingPlayerId { index });
        }
        let position =
            Position::from_str_pos(&entry.position).ok_or_else(|| ValidationError::InvalidPosition {
                index,
                player_id: entry.player_id,
                position: entry.position.clone(),
            })?;
        players.push(PlayerSlot {
            player: entry.player_id,
            position,
        });
    }

    let mut seen = HashSet::with_capacity(LINEUP_SIZE);
    for slot in &players {
        if !seen.insert(slot.player) {
            return Err(ValidationError::DuplicatePlayer {
                player_id: slot.player,
            });
        }
    }

    let keepers = players
        .iter()
        .filter(|s| s.position == Position::Goalkeeper)
        .count();
    if keepers != 1 {
        return Err(ValidationError::GoalkeeperCount { found: keepers });
    }

    if let Some(slot) = players.iter().find(|s| !squad.contains(s.player)) {
        return Err(ValidationError::PlayerNotInSquad {
            player_id: slot.player,
            team: squad.team.clone(),
        });
    }

    let subs = candidate.subs.unwrap_or_default();
    if let Some(sub) = subs.iter().find(|s| !squad.contains(s.player_id)) {
        return Err(ValidationError::SubNotInSquad {
            player_id: sub.player_id,
            team: squad.team.clone(),
        });
    }

    if let Some(motm) = candidate.motm {
        if !squad.contains(motm) {
            return Err(ValidationError::MotmNotInSquad {
                player_id: motm,
                team: squad.team.clone(),
            });
        }
    }

    let subs = validate_subs(subs)?;

    Ok(ValidatedLineup {
        players,
        subs,
        motm: candidate.motm,
    })
}

/// Check substitute count, repeats and minutes. Membership is checked by the
/// caller.
pub fn validate_subs(subs: &[SubEntry]) -> Result<Vec<Substitution>, ValidationError> {
    if subs.len() > MAX_SUBS {
        return Err(ValidationError::TooManySubs { found: subs.len() });
    }
    let mut seen = HashSet::with_capacity(subs.len());
    if let Some(sub) = subs.iter().find(|s| !seen.insert(s.player_id)) {
        return Err(ValidationError::DuplicateSub {
            player_id: sub.player_id,
        });
    }
    subs.iter()
        .map(|s| match s.minute {
            Some(minute) if minute > MAX_MINUTE => Err(ValidationError::InvalidMinute {
                player_id: s.player_id,
                minute,
            }),
            minute => Ok(Substitution {
                player: s.player_id,
                minute,
            }),
        })
        .collect()
}
