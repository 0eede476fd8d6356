// Shared data model: leagues, players, squads, matches and predictions.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type LeagueId = i64;
pub type PlayerId = i64;
pub type MatchId = i64;
pub type PredictionId = i64;

/// Participant identity as issued by the external identity provider.
pub type ParticipantId = String;

/// Number of starters in a lineup.
pub const LINEUP_SIZE: usize = 11;

/// Maximum number of substitutes per side.
pub const MAX_SUBS: usize = 5;

/// Latest minute accepted for substitutions and goals (extra time included).
pub const MAX_MINUTE: u32 = 130;

/// Valid matchday range within a season.
pub const MATCHDAYS: std::ops::RangeInclusive<u8> = 1..=38;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// One of the two competing teams in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    /// Parse `"home"` / `"away"` (case-insensitive).
    pub fn from_str_side(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "home" => Some(Side::Home),
            "away" => Some(Side::Away),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held once per side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerSide<T> {
    pub home: T,
    pub away: T,
}

impl<T> PerSide<T> {
    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Home => &mut self.home,
            Side::Away => &mut self.away,
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Football positions used for lineup labelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "gk")]
    Goalkeeper,
    #[serde(rename = "def")]
    Defender,
    #[serde(rename = "mid")]
    Midfielder,
    #[serde(rename = "fw")]
    Forward,
}

impl Position {
    /// Parse a position label. Case-insensitive, so roster labels such as
    /// "GK" or "DEF" are accepted alongside the lineup form "gk".
    pub fn from_str_pos(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "gk" => Some(Position::Goalkeeper),
            "def" => Some(Position::Defender),
            "mid" => Some(Position::Midfielder),
            "fw" => Some(Position::Forward),
            _ => None,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "gk",
            Position::Defender => "def",
            Position::Midfielder => "mid",
            Position::Forward => "fw",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_str())
    }
}

// ---------------------------------------------------------------------------
// League / Player / Squad
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub id: LeagueId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Cumulative per-player counters. Only the match-finalisation collaborator
/// writes these; the engine reads them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerStats {
    pub games: i64,
    pub goals: i64,
    pub assists: i64,
    pub blocks: i64,
    pub saves: i64,
    pub cleansheets: i64,
    pub goals_conceded: i64,
    pub penalty_earned: i64,
    pub penalty_missed: i64,
    pub penalty_saved: i64,
    pub yellow_cards: i64,
    pub red_cards: i64,
    pub bonus: i64,
}

impl PlayerStats {
    /// Weighted rating over the counters. Always derived, never stored.
    pub fn rating(&self) -> i64 {
        self.games * 2
            + self.goals * 4
            + self.assists * 3
            + self.cleansheets * 4
            + self.saves
            + self.blocks
            + self.penalty_earned * 2
            + self.penalty_saved * 4
            + self.bonus * 3
            - self.goals_conceded
            - self.penalty_missed * 2
            - self.yellow_cards
            - self.red_cards * 2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Team affiliation label (e.g. "LIV").
    pub team: String,
    pub league_id: LeagueId,
    pub position: Position,
    pub stats: PlayerStats,
    /// Portrait URL managed by the media collaborator; empty when unset.
    #[serde(default)]
    pub image: String,
}

impl Player {
    pub fn rating(&self) -> i64 {
        self.stats.rating()
    }

    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            id: self.id,
            name: self.name.clone(),
            rating: self.rating(),
        }
    }
}

/// Minimal display fields joined onto prediction listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub name: String,
    pub rating: i64,
}

/// Players currently eligible to be selected for a team.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSquad {
    pub team: String,
    pub players: BTreeSet<PlayerId>,
}

impl TeamSquad {
    pub fn new(team: impl Into<String>) -> Self {
        TeamSquad {
            team: team.into(),
            players: BTreeSet::new(),
        }
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.players.contains(&player)
    }
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

/// Lifecycle state of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    /// Official data editable, predictions open.
    Draft,
    /// Squads are set; predictions closed, official data still editable.
    Confirmed,
    /// Official result frozen; scoring is authoritative.
    Finished,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Draft => "draft",
            MatchStatus::Confirmed => "confirmed",
            MatchStatus::Finished => "finished",
        }
    }

    pub fn from_str_status(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(MatchStatus::Draft),
            "confirmed" => Some(MatchStatus::Confirmed),
            "finished" => Some(MatchStatus::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

/// A starter in an official lineup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineupSlot {
    pub player: PlayerId,
    pub position: Position,
    /// Minute the player took the field; starters record 0.
    #[serde(default)]
    pub from_minute: Option<u32>,
}

/// A substitute, official or predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub player: PlayerId,
    #[serde(default)]
    pub minute: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub scorer: PlayerId,
    #[serde(default)]
    pub assist: Option<PlayerId>,
    #[serde(default)]
    pub minute: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvents {
    pub goals: Vec<Goal>,
    pub motm: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub league_id: LeagueId,
    pub matchday: u8,
    pub home_team: String,
    pub away_team: String,
    pub status: MatchStatus,
    pub score: Score,
    pub lineups: PerSide<Vec<LineupSlot>>,
    pub subs_in: PerSide<Vec<Substitution>>,
    pub events: MatchEvents,
    pub played_at: DateTime<Utc>,
    /// Compare-and-swap token, bumped by the store on every write.
    pub version: i64,
}

impl Match {
    /// The team name playing on `side`, as recorded on the match itself.
    pub fn team_name(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.home_team,
            Side::Away => &self.away_team,
        }
    }
}

/// Fields needed to create a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMatch {
    pub league_id: LeagueId,
    pub matchday: u8,
    pub home_team: String,
    pub away_team: String,
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// A predicted starter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSlot {
    pub player: PlayerId,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub participant_id: ParticipantId,
    pub match_id: MatchId,
    pub side: Side,
    pub players: Vec<PlayerSlot>,
    pub subs: Vec<Substitution>,
    pub motm: Option<PlayerId>,
    /// Written only by a scoring pass.
    pub points: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The unique key a prediction is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionKey {
    pub participant_id: ParticipantId,
    pub match_id: MatchId,
    pub side: Side,
}

/// Content replaced wholesale on every resubmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionContent {
    pub players: Vec<PlayerSlot>,
    pub subs: Vec<Substitution>,
    pub motm: Option<PlayerId>,
}
