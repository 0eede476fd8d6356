// SQLite persistence layer for leagues, squads, matches and predictions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;

use lineup_core::model::{
    League, LeagueId, LineupSlot, Match, MatchEvents, MatchId, MatchStatus, NewMatch, PerSide,
    Player, PlayerId, PlayerStats, Position, Prediction, PredictionContent, PredictionId,
    PredictionKey, Score, Side, Substitution, TeamSquad,
};
use lineup_core::store::{EntityStore, NewPlayer, PredictionUpsert, StoreError, StoreResult};

/// SQLite-backed [`EntityStore`].
///
/// All access goes through one connection behind a mutex, so the
/// compare-and-swap and the guarded upsert cannot interleave within a process.
/// Both also run inside `IMMEDIATE` transactions for writers in other
/// processes.
pub struct Database {
    conn: Mutex<Connection>,
}

const MATCH_COLUMNS: &str = "id, league_id, matchday, home_team, away_team, status,
     score_home, score_away, lineups, subs_in, events, played_at, version";

const PREDICTION_COLUMNS: &str = "id, participant_id, match_id, side, players, subs, motm,
     points, created_at, updated_at";

const PLAYER_COLUMNS: &str = "id, name, team, league_id, position, stats, image";

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS leagues (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS players (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                name      TEXT NOT NULL,
                team      TEXT NOT NULL,
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                position  TEXT NOT NULL,
                stats     TEXT NOT NULL DEFAULT '{}',
                image     TEXT NOT NULL DEFAULT '',
                UNIQUE(name, league_id)
            );

            CREATE TABLE IF NOT EXISTS team_squads (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                team TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS squad_members (
                team      TEXT NOT NULL REFERENCES team_squads(team),
                player_id INTEGER NOT NULL REFERENCES players(id),
                PRIMARY KEY (team, player_id)
            );

            CREATE TABLE IF NOT EXISTS matches (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id  INTEGER NOT NULL REFERENCES leagues(id),
                matchday   INTEGER NOT NULL,
                home_team  TEXT NOT NULL,
                away_team  TEXT NOT NULL,
                status     TEXT NOT NULL DEFAULT 'draft',
                score_home INTEGER NOT NULL DEFAULT 0,
                score_away INTEGER NOT NULL DEFAULT 0,
                lineups    TEXT NOT NULL,
                subs_in    TEXT NOT NULL,
                events     TEXT NOT NULL,
                played_at  TEXT NOT NULL,
                version    INTEGER NOT NULL DEFAULT 0,
                UNIQUE(league_id, matchday, home_team, away_team)
            );

            CREATE TABLE IF NOT EXISTS predictions (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                participant_id TEXT NOT NULL,
                match_id       INTEGER NOT NULL REFERENCES matches(id),
                side           TEXT NOT NULL,
                players        TEXT NOT NULL,
                subs           TEXT NOT NULL,
                motm           INTEGER,
                points         INTEGER NOT NULL DEFAULT 0,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL,
                UNIQUE(participant_id, match_id, side)
            );

            CREATE INDEX IF NOT EXISTS idx_predictions_match ON predictions(match_id, side);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    fn load_match(conn: &Connection, id: MatchId) -> Result<Option<Match>> {
        let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id], MatchRow::read)
            .optional()
            .context("failed to query match")?;
        row.map(MatchRow::into_match).transpose()
    }

    fn load_squad(conn: &Connection, team: &str) -> Result<Option<TeamSquad>> {
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM team_squads WHERE team = ?1)",
                params![team],
                |row| row.get(0),
            )
            .context("failed to check squad existence")?;
        if !exists {
            return Ok(None);
        }

        let mut stmt = conn
            .prepare("SELECT player_id FROM squad_members WHERE team = ?1")
            .context("failed to prepare squad member query")?;
        let players = stmt
            .query_map(params![team], |row| row.get::<_, PlayerId>(0))
            .context("failed to query squad members")?
            .collect::<std::result::Result<BTreeSet<_>, _>>()
            .context("failed to map squad member rows")?;

        Ok(Some(TeamSquad {
            team: team.to_string(),
            players,
        }))
    }
}

#[async_trait]
impl EntityStore for Database {
    // ------------------------------------------------------------------
    // Leagues
    // ------------------------------------------------------------------

    async fn create_league(&self, name: &str) -> StoreResult<League> {
        let conn = self.conn();
        let created_at = now_text();
        let id: LeagueId = conn
            .query_row(
                "INSERT INTO leagues (name, created_at) VALUES (?1, ?2) RETURNING id",
                params![name, created_at],
                |row| row.get(0),
            )
            .map_err(|e| unique_or_backend(e, "league", name, "failed to insert league"))?;
        Ok(League {
            id,
            name: name.to_string(),
            created_at: parse_time(&created_at)?,
        })
    }

    async fn get_league(&self, id: LeagueId) -> StoreResult<Option<League>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, name, created_at FROM leagues WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, LeagueId>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query league")?;
        match row {
            Some((id, name, created_at)) => Ok(Some(League {
                id,
                name,
                created_at: parse_time(&created_at)?,
            })),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    async fn create_player(&self, player: &NewPlayer) -> StoreResult<Player> {
        let conn = self.conn();
        let stats = PlayerStats::default();
        let id: PlayerId = conn
            .query_row(
                "INSERT INTO players (name, team, league_id, position, stats, image)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 RETURNING id",
                params![
                    player.name,
                    player.team,
                    player.league_id,
                    player.position.display_str(),
                    to_json(&stats)?,
                    player.image,
                ],
                |row| row.get(0),
            )
            .map_err(|e| unique_or_backend(e, "player", &player.name, "failed to insert player"))?;
        Ok(Player {
            id,
            name: player.name.clone(),
            team: player.team.clone(),
            league_id: player.league_id,
            position: player.position,
            stats,
            image: player.image.clone(),
        })
    }

    async fn get_players(&self, ids: &[PlayerId]) -> StoreResult<Vec<Player>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE id IN ({placeholders}) ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql).context("failed to prepare player query")?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), PlayerRow::read)
            .context("failed to query players")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map player rows")?;
        Ok(rows
            .into_iter()
            .map(PlayerRow::into_player)
            .collect::<Result<_>>()?)
    }

    async fn update_player_stats(&self, id: PlayerId, stats: &PlayerStats) -> StoreResult<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE players SET stats = ?1 WHERE id = ?2",
                params![to_json(stats)?, id],
            )
            .context("failed to update player stats")?;
        Ok(changed == 1)
    }

    // ------------------------------------------------------------------
    // Squads
    // ------------------------------------------------------------------

    async fn create_squad(&self, team: &str) -> StoreResult<TeamSquad> {
        let conn = self.conn();
        conn.execute("INSERT INTO team_squads (team) VALUES (?1)", params![team])
            .map_err(|e| unique_or_backend(e, "squad", team, "failed to insert squad"))?;
        Ok(TeamSquad::new(team))
    }

    async fn get_squad(&self, team: &str) -> StoreResult<Option<TeamSquad>> {
        let conn = self.conn();
        Ok(Self::load_squad(&conn, team)?)
    }

    async fn list_squads(&self) -> StoreResult<Vec<TeamSquad>> {
        let conn = self.conn();
        let mut squads: BTreeMap<String, TeamSquad> = BTreeMap::new();

        let mut stmt = conn
            .prepare(
                "SELECT s.team, m.player_id
                 FROM team_squads s
                 LEFT JOIN squad_members m ON m.team = s.team
                 ORDER BY s.team",
            )
            .context("failed to prepare squad listing")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<PlayerId>>(1)?))
            })
            .context("failed to list squads")?;

        for row in rows {
            let (team, player) = row.context("failed to map squad row")?;
            let squad = squads
                .entry(team.clone())
                .or_insert_with(|| TeamSquad::new(team));
            if let Some(player) = player {
                squad.players.insert(player);
            }
        }
        Ok(squads.into_values().collect())
    }

    async fn add_squad_player(&self, team: &str, player: PlayerId) -> StoreResult<bool> {
        let conn = self.conn();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO squad_members (team, player_id) VALUES (?1, ?2)",
                params![team, player],
            )
            .context("failed to add squad member")?;
        Ok(inserted == 1)
    }

    async fn remove_squad_player(&self, team: &str, player: PlayerId) -> StoreResult<bool> {
        let conn = self.conn();
        let removed = conn
            .execute(
                "DELETE FROM squad_members WHERE team = ?1 AND player_id = ?2",
                params![team, player],
            )
            .context("failed to remove squad member")?;
        Ok(removed == 1)
    }

    // ------------------------------------------------------------------
    // Matches
    // ------------------------------------------------------------------

    async fn create_match(&self, new: &NewMatch) -> StoreResult<Match> {
        let conn = self.conn();
        let lineups: PerSide<Vec<LineupSlot>> = PerSide::default();
        let subs_in: PerSide<Vec<Substitution>> = PerSide::default();
        let key = format!(
            "matchday {} {} v {}",
            new.matchday, new.home_team, new.away_team
        );
        let sql = format!(
            "INSERT INTO matches
                (league_id, matchday, home_team, away_team, status, lineups, subs_in, events, played_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING {MATCH_COLUMNS}"
        );
        let row = conn
            .query_row(
                &sql,
                params![
                    new.league_id,
                    new.matchday,
                    new.home_team,
                    new.away_team,
                    MatchStatus::Draft.as_str(),
                    to_json(&lineups)?,
                    to_json(&subs_in)?,
                    to_json(&MatchEvents::default())?,
                    now_text(),
                ],
                MatchRow::read,
            )
            .map_err(|e| unique_or_backend(e, "match", &key, "failed to insert match"))?;
        Ok(row.into_match()?)
    }

    async fn get_match(&self, id: MatchId) -> StoreResult<Option<Match>> {
        let conn = self.conn();
        Ok(Self::load_match(&conn, id)?)
    }

    async fn list_matches(&self) -> StoreResult<Vec<Match>> {
        let conn = self.conn();
        let sql = format!("SELECT {MATCH_COLUMNS} FROM matches ORDER BY matchday, id");
        let mut stmt = conn.prepare(&sql).context("failed to prepare match listing")?;
        let rows = stmt
            .query_map([], MatchRow::read)
            .context("failed to list matches")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map match rows")?;
        Ok(rows
            .into_iter()
            .map(MatchRow::into_match)
            .collect::<Result<_>>()?)
    }

    async fn compare_and_swap_match(&self, m: &Match) -> StoreResult<Match> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin match transaction")?;

        let changed = tx
            .execute(
                "UPDATE matches SET
                    status     = ?1,
                    score_home = ?2,
                    score_away = ?3,
                    lineups    = ?4,
                    subs_in    = ?5,
                    events     = ?6,
                    version    = version + 1
                 WHERE id = ?7 AND version = ?8",
                params![
                    m.status.as_str(),
                    m.score.home,
                    m.score.away,
                    to_json(&m.lineups)?,
                    to_json(&m.subs_in)?,
                    to_json(&m.events)?,
                    m.id,
                    m.version,
                ],
            )
            .context("failed to update match")?;
        if changed == 0 {
            return Err(StoreError::StaleWrite {
                entity: "match",
                id: m.id,
            });
        }

        let stored = Self::load_match(&tx, m.id)?
            .ok_or_else(|| anyhow!("match {} vanished during update", m.id))?;
        tx.commit().context("failed to commit match update")?;
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Predictions
    // ------------------------------------------------------------------

    async fn upsert_prediction(
        &self,
        key: &PredictionKey,
        content: &PredictionContent,
    ) -> StoreResult<PredictionUpsert> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin prediction transaction")?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM matches WHERE id = ?1",
                params![key.match_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read match status")?;
        let Some(status) = status else {
            return Ok(PredictionUpsert::MatchMissing);
        };
        let status = parse_status(&status)?;
        if status != MatchStatus::Draft {
            return Ok(PredictionUpsert::MatchClosed(status));
        }

        let now = now_text();
        let sql = format!(
            "INSERT INTO predictions
                (participant_id, match_id, side, players, subs, motm, points, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)
             ON CONFLICT(participant_id, match_id, side) DO UPDATE SET
                players    = excluded.players,
                subs       = excluded.subs,
                motm       = excluded.motm,
                points     = 0,
                updated_at = excluded.updated_at
             RETURNING {PREDICTION_COLUMNS}"
        );
        let row = tx
            .query_row(
                &sql,
                params![
                    key.participant_id,
                    key.match_id,
                    key.side.as_str(),
                    to_json(&content.players)?,
                    to_json(&content.subs)?,
                    content.motm,
                    now,
                ],
                PredictionRow::read,
            )
            .context("failed to upsert prediction")?;
        tx.commit().context("failed to commit prediction")?;

        Ok(PredictionUpsert::Stored(row.into_prediction()?))
    }

    async fn list_predictions(
        &self,
        match_id: MatchId,
        side: Option<Side>,
    ) -> StoreResult<Vec<Prediction>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions
             WHERE match_id = ?1 AND (?2 IS NULL OR side = ?2)
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql).context("failed to prepare prediction query")?;
        let rows = stmt
            .query_map(
                params![match_id, side.map(|s| s.as_str())],
                PredictionRow::read,
            )
            .context("failed to query predictions")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map prediction rows")?;
        Ok(rows
            .into_iter()
            .map(PredictionRow::into_prediction)
            .collect::<Result<_>>()?)
    }

    async fn record_points(
        &self,
        match_id: MatchId,
        points: &[(PredictionId, i64)],
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin points transaction")?;
        for &(id, total) in points {
            tx.execute(
                "UPDATE predictions SET points = ?1 WHERE id = ?2 AND match_id = ?3",
                params![total, id, match_id],
            )
            .context("failed to write prediction points")?;
        }
        tx.commit().context("failed to commit prediction points")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Raw `matches` row; JSON and enum columns are decoded in `into_match`.
struct MatchRow {
    id: MatchId,
    league_id: LeagueId,
    matchday: u8,
    home_team: String,
    away_team: String,
    status: String,
    score_home: u32,
    score_away: u32,
    lineups: String,
    subs_in: String,
    events: String,
    played_at: String,
    version: i64,
}

impl MatchRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(MatchRow {
            id: row.get(0)?,
            league_id: row.get(1)?,
            matchday: row.get(2)?,
            home_team: row.get(3)?,
            away_team: row.get(4)?,
            status: row.get(5)?,
            score_home: row.get(6)?,
            score_away: row.get(7)?,
            lineups: row.get(8)?,
            subs_in: row.get(9)?,
            events: row.get(10)?,
            played_at: row.get(11)?,
            version: row.get(12)?,
        })
    }

    fn into_match(self) -> Result<Match> {
        Ok(Match {
            id: self.id,
            league_id: self.league_id,
            matchday: self.matchday,
            home_team: self.home_team,
            away_team: self.away_team,
            status: parse_status(&self.status)?,
            score: Score {
                home: self.score_home,
                away: self.score_away,
            },
            lineups: from_json(&self.lineups, "lineups")?,
            subs_in: from_json(&self.subs_in, "subs_in")?,
            events: from_json(&self.events, "events")?,
            played_at: parse_time(&self.played_at)?,
            version: self.version,
        })
    }
}

struct PredictionRow {
    id: PredictionId,
    participant_id: String,
    match_id: MatchId,
    side: String,
    players: String,
    subs: String,
    motm: Option<PlayerId>,
    points: i64,
    created_at: String,
    updated_at: String,
}

impl PredictionRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(PredictionRow {
            id: row.get(0)?,
            participant_id: row.get(1)?,
            match_id: row.get(2)?,
            side: row.get(3)?,
            players: row.get(4)?,
            subs: row.get(5)?,
            motm: row.get(6)?,
            points: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_prediction(self) -> Result<Prediction> {
        Ok(Prediction {
            id: self.id,
            participant_id: self.participant_id,
            match_id: self.match_id,
            side: Side::from_str_side(&self.side)
                .ok_or_else(|| anyhow!("unknown side `{}` in prediction {}", self.side, self.id))?,
            players: from_json(&self.players, "prediction players")?,
            subs: from_json(&self.subs, "prediction subs")?,
            motm: self.motm,
            points: self.points,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

struct PlayerRow {
    id: PlayerId,
    name: String,
    team: String,
    league_id: LeagueId,
    position: String,
    stats: String,
    image: String,
}

impl PlayerRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(PlayerRow {
            id: row.get(0)?,
            name: row.get(1)?,
            team: row.get(2)?,
            league_id: row.get(3)?,
            position: row.get(4)?,
            stats: row.get(5)?,
            image: row.get(6)?,
        })
    }

    fn into_player(self) -> Result<Player> {
        Ok(Player {
            position: Position::from_str_pos(&self.position)
                .ok_or_else(|| anyhow!("unknown position `{}` for player {}", self.position, self.id))?,
            stats: from_json(&self.stats, "player stats")?,
            id: self.id,
            name: self.name,
            team: self.team,
            league_id: self.league_id,
            image: self.image,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp `{s}`"))?
        .with_timezone(&Utc))
}

fn parse_status(s: &str) -> Result<MatchStatus> {
    MatchStatus::from_str_status(s).ok_or_else(|| anyhow!("unknown match status `{s}`"))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to serialize column value")
}

fn from_json<T: DeserializeOwned>(s: &str, what: &str) -> Result<T> {
    serde_json::from_str(s).with_context(|| format!("failed to deserialize {what}"))
}

/// Map a unique-constraint failure to [`StoreError::Duplicate`], anything
/// else to a backend error with `context`.
fn unique_or_backend(
    err: rusqlite::Error,
    entity: &'static str,
    key: &str,
    context: &'static str,
) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::Duplicate {
                entity,
                key: key.to_string(),
            }
        }
        _ => StoreError::Backend(anyhow::Error::new(err).context(context)),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
