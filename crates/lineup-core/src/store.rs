// Entity store consumed by the engine.
//
// Implementations provide lookup by id and by unique key, plus the two atomic
// primitives the engine relies on: compare-and-swap on a Match and a
// status-guarded upsert of a Prediction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    League, LeagueId, Match, MatchId, MatchStatus, NewMatch, Player, PlayerId, PlayerStats,
    Position, Prediction, PredictionContent, PredictionId, PredictionKey, Side, TeamSquad,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key is already taken.
    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// A compare-and-swap lost against a concurrent writer.
    #[error("{entity} {id} was modified concurrently")]
    StaleWrite { entity: &'static str, id: i64 },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fields needed to create a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlayer {
    pub name: String,
    pub team: String,
    pub league_id: LeagueId,
    pub position: Position,
    #[serde(default)]
    pub image: String,
}

/// Outcome of a status-guarded prediction upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionUpsert {
    /// The single record now stored under the key.
    Stored(Prediction),
    MatchMissing,
    /// The match left draft before the write could commit.
    MatchClosed(MatchStatus),
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn create_league(&self, name: &str) -> StoreResult<League>;
    async fn get_league(&self, id: LeagueId) -> StoreResult<Option<League>>;

    async fn create_player(&self, player: &NewPlayer) -> StoreResult<Player>;
    async fn get_players(&self, ids: &[PlayerId]) -> StoreResult<Vec<Player>>;
    /// Replace a player's counters. Returns false if the player is unknown.
    async fn update_player_stats(&self, id: PlayerId, stats: &PlayerStats) -> StoreResult<bool>;

    async fn create_squad(&self, team: &str) -> StoreResult<TeamSquad>;
    async fn get_squad(&self, team: &str) -> StoreResult<Option<TeamSquad>>;
    async fn list_squads(&self) -> StoreResult<Vec<TeamSquad>>;
    /// Returns false if the player was already a member.
    async fn add_squad_player(&self, team: &str, player: PlayerId) -> StoreResult<bool>;
    /// Returns false if the player was not a member.
    async fn remove_squad_player(&self, team: &str, player: PlayerId) -> StoreResult<bool>;

    async fn create_match(&self, new: &NewMatch) -> StoreResult<Match>;
    async fn get_match(&self, id: MatchId) -> StoreResult<Option<Match>>;
    async fn list_matches(&self) -> StoreResult<Vec<Match>>;
    /// Persist `m` only if the stored version still equals `m.version`.
    /// Returns the stored match with its new version, or
    /// [`StoreError::StaleWrite`] if another write landed first.
    async fn compare_and_swap_match(&self, m: &Match) -> StoreResult<Match>;

    /// Create or replace the prediction under `key`, resetting its points,
    /// atomically with a check that the match is still in draft.
    async fn upsert_prediction(
        &self,
        key: &PredictionKey,
        content: &PredictionContent,
    ) -> StoreResult<PredictionUpsert>;
    /// Predictions for a match, ordered by id.
    async fn list_predictions(
        &self,
        match_id: MatchId,
        side: Option<Side>,
    ) -> StoreResult<Vec<Prediction>>;
    /// Write scoring results for one match in a single transaction.
    async fn record_points(
        &self,
        match_id: MatchId,
        points: &[(PredictionId, i64)],
    ) -> StoreResult<()>;
}
