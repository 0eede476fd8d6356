// Engine: the operations exposed to the transport layer.
//
// Each operation resolves its inputs through the injected store, applies the
// validator and lifecycle rules, and commits through the store's atomic
// primitives. Nothing here retries; a lost compare-and-swap is reported.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::Actor;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle;
use crate::model::{
    Goal, League, LineupSlot, Match, MatchId, MatchStatus, NewMatch, Player, PlayerId,
    PlayerStats, PlayerSummary, Prediction, PredictionContent, PredictionKey, Score, Side,
    TeamSquad, MATCHDAYS, MAX_MINUTE,
};
use crate::scoring::{self, ScoreResult};
use crate::store::{EntityStore, NewPlayer, PredictionUpsert};
use crate::validate::{self, Candidate, LineupEntry, SubEntry, ValidationError};

/// Deployment options that change lifecycle behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Advance `draft -> confirmed` when an official lineup is recorded.
    pub confirm_on_lineup: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            confirm_on_lineup: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPrediction {
    pub match_id: MatchId,
    /// "home" or "away"; the squad is resolved from the match, not the client.
    pub team: String,
    pub players: Vec<LineupEntry>,
    #[serde(default)]
    pub subs: Vec<SubEntry>,
    #[serde(default)]
    pub motm: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeMatch {
    pub match_id: MatchId,
    pub score: Score,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub motm: Option<PlayerId>,
}

/// Whether a scoring pass is authoritative or a preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Requires a finished match; writes points back.
    #[default]
    Authoritative,
    /// Any status; results flagged provisional unless finished; no writes.
    Preview,
}

/// A stored prediction with display fields for the players it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionView {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub player_details: Vec<PlayerSummary>,
}

/// Ranked scoring output for one side of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoreboard {
    pub match_id: MatchId,
    pub side: Side,
    pub status: MatchStatus,
    pub provisional: bool,
    /// Whether points were written back to the stored predictions.
    pub persisted: bool,
    pub results: Vec<ScoreResult>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine<S> {
    store: S,
    options: EngineOptions,
}

impl<S: EntityStore> Engine<S> {
    pub fn new(store: S, options: EngineOptions) -> Self {
        Engine { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------
    // Leagues, players, squads
    // ------------------------------------------------------------------

    pub async fn create_league(&self, actor: &Actor, name: &str) -> EngineResult<League> {
        actor.require_admin("create a league")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingField { field: "name" }.into());
        }
        let league = self.store.create_league(name).await?;
        info!("League {} created: {}", league.id, league.name);
        Ok(league)
    }

    pub async fn create_player(&self, actor: &Actor, player: NewPlayer) -> EngineResult<Player> {
        actor.require_admin("create a player")?;
        if player.name.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "name" }.into());
        }
        if player.team.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "team" }.into());
        }
        if self.store.get_league(player.league_id).await?.is_none() {
            return Err(EngineError::not_found("league", player.league_id));
        }
        let created = self.store.create_player(&player).await?;
        info!(
            "Player {} created: {} ({}, {})",
            created.id, created.name, created.team, created.position
        );
        Ok(created)
    }

    pub async fn get_player(&self, id: PlayerId) -> EngineResult<Player> {
        self.store
            .get_players(&[id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::not_found("player", id))
    }

    /// Replace a player's counters. Called by the match-finalisation
    /// collaborator; the rating follows on the next read.
    pub async fn update_player_stats(
        &self,
        actor: &Actor,
        id: PlayerId,
        stats: PlayerStats,
    ) -> EngineResult<Player> {
        actor.require_admin("update player statistics")?;
        if !self.store.update_player_stats(id, &stats).await? {
            return Err(EngineError::not_found("player", id));
        }
        debug!("Player {} stats replaced; rating now {}", id, stats.rating());
        self.get_player(id).await
    }

    pub async fn create_squad(&self, actor: &Actor, team: &str) -> EngineResult<TeamSquad> {
        actor.require_admin("create a squad")?;
        let team = team.trim();
        if team.is_empty() {
            return Err(ValidationError::MissingField { field: "team" }.into());
        }
        let squad = self.store.create_squad(team).await?;
        info!("Squad created for {}", squad.team);
        Ok(squad)
    }

    pub async fn get_squad(&self, team: &str) -> EngineResult<TeamSquad> {
        self.store
            .get_squad(team)
            .await?
            .ok_or_else(|| EngineError::not_found("squad", team))
    }

    pub async fn list_squads(&self) -> EngineResult<Vec<TeamSquad>> {
        Ok(self.store.list_squads().await?)
    }

    pub async fn add_squad_player(
        &self,
        actor: &Actor,
        team: &str,
        player: PlayerId,
    ) -> EngineResult<TeamSquad> {
        actor.require_admin("edit a squad")?;
        self.get_squad(team).await?;
        self.get_player(player).await?;
        if !self.store.add_squad_player(team, player).await? {
            return Err(EngineError::Conflict(format!(
                "player {player} is already in the {team} squad"
            )));
        }
        info!("Player {} added to {} squad", player, team);
        self.get_squad(team).await
    }

    pub async fn remove_squad_player(
        &self,
        actor: &Actor,
        team: &str,
        player: PlayerId,
    ) -> EngineResult<TeamSquad> {
        actor.require_admin("edit a squad")?;
        self.get_squad(team).await?;
        if !self.store.remove_squad_player(team, player).await? {
            return Err(EngineError::not_found(
                "squad member",
                format!("{player} in {team}"),
            ));
        }
        info!("Player {} removed from {} squad", player, team);
        self.get_squad(team).await
    }

    // ------------------------------------------------------------------
    // Matches and official data
    // ------------------------------------------------------------------

    pub async fn create_match(&self, actor: &Actor, new: NewMatch) -> EngineResult<Match> {
        actor.require_admin("create a match")?;
        let new = NewMatch {
            home_team: new.home_team.trim().to_string(),
            away_team: new.away_team.trim().to_string(),
            ..new
        };
        if new.home_team.is_empty() {
            return Err(ValidationError::MissingField { field: "home_team" }.into());
        }
        if new.away_team.is_empty() {
            return Err(ValidationError::MissingField { field: "away_team" }.into());
        }
        if new.home_team == new.away_team {
            return Err(ValidationError::SameTeams {
                team: new.home_team,
            }
            .into());
        }
        if !MATCHDAYS.contains(&new.matchday) {
            return Err(ValidationError::MatchdayOutOfRange {
                matchday: new.matchday,
            }
            .into());
        }
        if self.store.get_league(new.league_id).await?.is_none() {
            return Err(EngineError::not_found("league", new.league_id));
        }
        let m = self.store.create_match(&new).await?;
        info!(
            "Match {} created: matchday {} {} v {}",
            m.id, m.matchday, m.home_team, m.away_team
        );
        Ok(m)
    }

    pub async fn get_match(&self, id: MatchId) -> EngineResult<Match> {
        self.store
            .get_match(id)
            .await?
            .ok_or_else(|| EngineError::not_found("match", id))
    }

    /// All matches ordered by matchday.
    pub async fn list_matches(&self) -> EngineResult<Vec<Match>> {
        Ok(self.store.list_matches().await?)
    }

    /// Record the official starting eleven for one side.
    pub async fn record_official_lineup(
        &self,
        actor: &Actor,
        match_id: MatchId,
        team: &str,
        players: &[LineupEntry],
    ) -> EngineResult<Match> {
        actor.require_admin("record an official lineup")?;
        let side = parse_side(team)?;
        let mut m = self.get_match(match_id).await?;
        let next_status = lifecycle::after_official_lineup(m.status, self.options.confirm_on_lineup)?;
        let squad = self.squad_for(&m, side).await?;

        let lineup = validate::validate(
            &Candidate {
                players,
                ..Default::default()
            },
            &squad,
        )?;

        *m.lineups.get_mut(side) = lineup
            .players
            .iter()
            .map(|slot| LineupSlot {
                player: slot.player,
                position: slot.position,
                from_minute: Some(0),
            })
            .collect();
        let previous = m.status;
        m.status = next_status;

        let stored = self.store.compare_and_swap_match(&m).await?;
        info!("Official {} lineup recorded for match {}", side, match_id);
        if previous != stored.status {
            info!("Match {} moved {} -> {}", match_id, previous, stored.status);
        }
        Ok(stored)
    }

    /// Record the official substitutes for one side.
    pub async fn record_official_subs(
        &self,
        actor: &Actor,
        match_id: MatchId,
        team: &str,
        subs: &[SubEntry],
    ) -> EngineResult<Match> {
        actor.require_admin("record official substitutions")?;
        let side = parse_side(team)?;
        let mut m = self.get_match(match_id).await?;
        lifecycle::ensure_official_writable(m.status)?;
        let squad = self.squad_for(&m, side).await?;

        if let Some(sub) = subs.iter().find(|s| !squad.contains(s.player_id)) {
            return Err(ValidationError::SubNotInSquad {
                player_id: sub.player_id,
                team: squad.team.clone(),
            }
            .into());
        }
        *m.subs_in.get_mut(side) = validate::validate_subs(subs)?;

        let stored = self.store.compare_and_swap_match(&m).await?;
        info!(
            "Official {} subs recorded for match {} ({} entries)",
            side,
            match_id,
            subs.len()
        );
        Ok(stored)
    }

    /// Write score, goals and MOTM and freeze the official result.
    pub async fn finalize_match(&self, actor: &Actor, req: FinalizeMatch) -> EngineResult<Match> {
        actor.require_admin("finalize a match")?;
        let mut m = self.get_match(req.match_id).await?;
        let next_status = lifecycle::finalize(m.status)?;

        let home = self.squad_for(&m, Side::Home).await?;
        let away = self.squad_for(&m, Side::Away).await?;
        let in_match = |id: PlayerId| home.contains(id) || away.contains(id);

        for goal in &req.goals {
            for player in std::iter::once(goal.scorer).chain(goal.assist) {
                if !in_match(player) {
                    return Err(ValidationError::NotInMatchSquads { player_id: player }.into());
                }
            }
            if let Some(minute) = goal.minute.filter(|&min| min > MAX_MINUTE) {
                return Err(ValidationError::InvalidMinute {
                    player_id: goal.scorer,
                    minute,
                }
                .into());
            }
        }
        if let Some(motm) = req.motm.filter(|&id| !in_match(id)) {
            return Err(ValidationError::NotInMatchSquads { player_id: motm }.into());
        }

        let previous = m.status;
        m.score = req.score;
        m.events.goals = req.goals;
        m.events.motm = req.motm;
        m.status = next_status;

        let stored = self.store.compare_and_swap_match(&m).await?;
        info!(
            "Match {} finalized {}-{} ({} -> {})",
            stored.id, stored.score.home, stored.score.away, previous, stored.status
        );
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Predictions
    // ------------------------------------------------------------------

    /// Create or replace the caller's prediction for one side of a match.
    pub async fn submit_prediction(
        &self,
        actor: &Actor,
        req: SubmitPrediction,
    ) -> EngineResult<Prediction> {
        let m = self.get_match(req.match_id).await?;
        lifecycle::ensure_predictions_open(m.status)?;
        let side = parse_side(&req.team)?;
        let squad = self.squad_for(&m, side).await?;

        let lineup = validate::validate(
            &Candidate {
                players: &req.players,
                subs: Some(req.subs.as_slice()),
                motm: req.motm,
            },
            &squad,
        )
        .inspect_err(|e| {
            warn!(
                "Prediction rejected: participant={} match={} side={}: {}",
                actor.id, req.match_id, side, e
            )
        })?;

        let key = PredictionKey {
            participant_id: actor.id.clone(),
            match_id: m.id,
            side,
        };
        let content = PredictionContent {
            players: lineup.players,
            subs: lineup.subs,
            motm: lineup.motm,
        };

        match self.store.upsert_prediction(&key, &content).await? {
            PredictionUpsert::Stored(prediction) => {
                info!(
                    "Prediction {} saved: participant={} match={} side={}",
                    prediction.id, actor.id, m.id, side
                );
                Ok(prediction)
            }
            PredictionUpsert::MatchMissing => Err(EngineError::not_found("match", m.id)),
            PredictionUpsert::MatchClosed(status) => {
                warn!(
                    "Prediction for match {} lost race with status change to {}",
                    m.id, status
                );
                Err(lifecycle::LifecycleError::PredictionsClosed { status }.into())
            }
        }
    }

    /// Stored predictions for a match, optionally for one side, with the
    /// display fields of every player they reference.
    pub async fn list_predictions(
        &self,
        match_id: MatchId,
        team: Option<&str>,
    ) -> EngineResult<Vec<PredictionView>> {
        let side = team.map(parse_side).transpose()?;
        self.get_match(match_id).await?;
        let predictions = self.store.list_predictions(match_id, side).await?;

        let referenced: BTreeSet<PlayerId> = predictions
            .iter()
            .flat_map(|p| {
                p.players
                    .iter()
                    .map(|s| s.player)
                    .chain(p.subs.iter().map(|s| s.player))
                    .chain(p.motm)
            })
            .collect();
        let ids: Vec<PlayerId> = referenced.into_iter().collect();
        let players = self.store.get_players(&ids).await?;

        Ok(predictions
            .into_iter()
            .map(|prediction| {
                let wanted: BTreeSet<PlayerId> = prediction
                    .players
                    .iter()
                    .map(|s| s.player)
                    .chain(prediction.subs.iter().map(|s| s.player))
                    .chain(prediction.motm)
                    .collect();
                let player_details = players
                    .iter()
                    .filter(|p| wanted.contains(&p.id))
                    .map(Player::summary)
                    .collect();
                PredictionView {
                    prediction,
                    player_details,
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------

    /// Score every prediction for one side and return the ranked breakdown.
    pub async fn compare_and_score(
        &self,
        actor: &Actor,
        match_id: MatchId,
        team: &str,
        mode: ScoringMode,
    ) -> EngineResult<Scoreboard> {
        let side = parse_side(team)?;
        if mode == ScoringMode::Authoritative {
            actor.require_admin("run authoritative scoring")?;
        }
        let m = self.get_match(match_id).await?;
        if mode == ScoringMode::Authoritative && m.status != MatchStatus::Finished {
            return Err(lifecycle::LifecycleError::NotFinished { status: m.status }.into());
        }

        let predictions = self.store.list_predictions(match_id, Some(side)).await?;
        let mut results = scoring::score(&m, &predictions);

        let persisted = mode == ScoringMode::Authoritative;
        if persisted {
            let points: Vec<_> = results
                .iter()
                .map(|r| (r.prediction_id, r.total_points))
                .collect();
            self.store.record_points(match_id, &points).await?;
        }
        scoring::rank_results(&mut results);

        let provisional = m.status != MatchStatus::Finished;
        info!(
            "Scored {} {} predictions for match {} (mode={:?}, provisional={})",
            results.len(),
            side,
            match_id,
            mode,
            provisional
        );
        Ok(Scoreboard {
            match_id,
            side,
            status: m.status,
            provisional,
            persisted,
            results,
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Squad for the team playing `side`, named by the match record.
    async fn squad_for(&self, m: &Match, side: Side) -> EngineResult<TeamSquad> {
        self.get_squad(m.team_name(side)).await
    }
}

fn parse_side(team: &str) -> EngineResult<Side> {
    Side::from_str_side(team).ok_or_else(|| EngineError::InvalidTeam(team.to_string()))
}
