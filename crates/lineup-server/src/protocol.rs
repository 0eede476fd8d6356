// JSON request/response protocol and dispatch onto the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use lineup_core::auth::Actor;
use lineup_core::engine::{Engine, FinalizeMatch, ScoringMode, SubmitPrediction};
use lineup_core::error::{EngineError, EngineResult};
use lineup_core::model::{MatchId, NewMatch, PlayerId, PlayerStats};
use lineup_core::store::{EntityStore, NewPlayer};
use lineup_core::validate::{LineupEntry, SubEntry};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One inbound frame. `id` is echoed back untouched so clients can match
/// replies to requests.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub actor: Actor,
    #[serde(flatten)]
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateLeague {
        name: String,
    },
    CreatePlayer(NewPlayer),
    GetPlayer {
        player_id: PlayerId,
    },
    UpdatePlayerStats {
        player_id: PlayerId,
        stats: PlayerStats,
    },
    CreateSquad {
        team: String,
    },
    GetSquad {
        team: String,
    },
    ListSquads,
    AddSquadPlayer {
        team: String,
        player_id: PlayerId,
    },
    RemoveSquadPlayer {
        team: String,
        player_id: PlayerId,
    },
    CreateMatch(NewMatch),
    GetMatch {
        match_id: MatchId,
    },
    ListMatches,
    RecordOfficialLineup {
        match_id: MatchId,
        team: String,
        players: Vec<LineupEntry>,
    },
    RecordOfficialSubs {
        match_id: MatchId,
        team: String,
        subs: Vec<SubEntry>,
    },
    FinalizeMatch(FinalizeMatch),
    SubmitPrediction(SubmitPrediction),
    ListPredictions {
        match_id: MatchId,
        #[serde(default)]
        team: Option<String>,
    },
    CompareAndScore {
        match_id: MatchId,
        team: String,
        #[serde(default)]
        mode: ScoringMode,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateLeague { .. } => "create_league",
            Operation::CreatePlayer(_) => "create_player",
            Operation::GetPlayer { .. } => "get_player",
            Operation::UpdatePlayerStats { .. } => "update_player_stats",
            Operation::CreateSquad { .. } => "create_squad",
            Operation::GetSquad { .. } => "get_squad",
            Operation::ListSquads => "list_squads",
            Operation::AddSquadPlayer { .. } => "add_squad_player",
            Operation::RemoveSquadPlayer { .. } => "remove_squad_player",
            Operation::CreateMatch(_) => "create_match",
            Operation::GetMatch { .. } => "get_match",
            Operation::ListMatches => "list_matches",
            Operation::RecordOfficialLineup { .. } => "record_official_lineup",
            Operation::RecordOfficialSubs { .. } => "record_official_subs",
            Operation::FinalizeMatch(_) => "finalize_match",
            Operation::SubmitPrediction(_) => "submit_prediction",
            Operation::ListPredictions { .. } => "list_predictions",
            Operation::CompareAndScore { .. } => "compare_and_score",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    /// The offending Player, for validation failures that name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: Value, data: Value) -> Self {
        Response {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: Value, kind: &str, message: impl Into<String>) -> Self {
        Response {
            id,
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
                player_id: None,
            }),
        }
    }

    pub fn bad_request(id: Value, message: impl Into<String>) -> Self {
        Self::failure(id, "bad_request", message)
    }

    /// Failure reply for an engine error.
    pub fn from_error(id: Value, err: &EngineError) -> Self {
        let mut reply = Self::failure(id, err.kind(), err.to_string());
        if let Some(body) = reply.error.as_mut() {
            body.player_id = err.player_id();
        }
        reply
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Parse one raw text frame and run it. Never fails: malformed input becomes
/// a `bad_request` reply, carrying the request id when one could be read.
pub async fn handle_text<S: EntityStore>(engine: &Engine<S>, text: &str) -> Response {
    let raw: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Malformed request frame: {}", e);
            return Response::bad_request(Value::Null, format!("malformed JSON: {e}"));
        }
    };
    let id = raw.get("id").cloned().unwrap_or(Value::Null);

    match serde_json::from_value::<Request>(raw) {
        Ok(req) => dispatch(engine, req).await,
        Err(e) => {
            warn!("Unrecognized request {}: {}", id, e);
            Response::bad_request(id, format!("invalid request: {e}"))
        }
    }
}

/// Run a decoded request against the engine.
pub async fn dispatch<S: EntityStore>(engine: &Engine<S>, req: Request) -> Response {
    let Request { id, actor, op } = req;
    let op_name = op.name();
    debug!("Dispatching {} for {} ({})", op_name, actor.id, actor.role);

    let result = match op {
        Operation::CreateLeague { name } => to_data(engine.create_league(&actor, &name).await),
        Operation::CreatePlayer(player) => to_data(engine.create_player(&actor, player).await),
        Operation::GetPlayer { player_id } => to_data(engine.get_player(player_id).await),
        Operation::UpdatePlayerStats { player_id, stats } => {
            to_data(engine.update_player_stats(&actor, player_id, stats).await)
        }
        Operation::CreateSquad { team } => to_data(engine.create_squad(&actor, &team).await),
        Operation::GetSquad { team } => to_data(engine.get_squad(&team).await),
        Operation::ListSquads => to_data(engine.list_squads().await),
        Operation::AddSquadPlayer { team, player_id } => {
            to_data(engine.add_squad_player(&actor, &team, player_id).await)
        }
        Operation::RemoveSquadPlayer { team, player_id } => {
            to_data(engine.remove_squad_player(&actor, &team, player_id).await)
        }
        Operation::CreateMatch(new) => to_data(engine.create_match(&actor, new).await),
        Operation::GetMatch { match_id } => to_data(engine.get_match(match_id).await),
        Operation::ListMatches => to_data(engine.list_matches().await),
        Operation::RecordOfficialLineup {
            match_id,
            team,
            players,
        } => to_data(
            engine
                .record_official_lineup(&actor, match_id, &team, &players)
                .await,
        ),
        Operation::RecordOfficialSubs {
            match_id,
            team,
            subs,
        } => to_data(
            engine
                .record_official_subs(&actor, match_id, &team, &subs)
                .await,
        ),
        Operation::FinalizeMatch(req) => to_data(engine.finalize_match(&actor, req).await),
        Operation::SubmitPrediction(req) => to_data(engine.submit_prediction(&actor, req).await),
        Operation::ListPredictions { match_id, team } => {
            to_data(engine.list_predictions(match_id, team.as_deref()).await)
        }
        Operation::CompareAndScore {
            match_id,
            team,
            mode,
        } => to_data(
            engine
                .compare_and_score(&actor, match_id, &team, mode)
                .await,
        ),
    };

    match result {
        Ok(data) => Response::success(id, data),
        Err(e) => {
            let kind = e.kind();
            if kind == "internal" {
                error!("{} failed: {}", op_name, e);
            } else {
                debug!("{} rejected ({}): {}", op_name, kind, e);
            }
            Response::from_error(id, &e)
        }
    }
}

fn to_data<T: Serialize>(result: EngineResult<T>) -> EngineResult<Value> {
    let value = result?;
    serde_json::to_value(value)
        .map_err(|e| EngineError::Store(anyhow::Error::new(e).context("failed to encode reply")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_decodes_flattened_operation() {
        let req: Request = serde_json::from_value(json!({
            "id": 7,
            "actor": { "id": "u1", "role": "user" },
            "op": "compare_and_score",
            "match_id": 3,
            "team": "home",
            "mode": "preview"
        }))
        .unwrap();
        assert_eq!(req.id, json!(7));
        assert_eq!(req.actor, Actor::user("u1"));
        assert_eq!(
            req.op,
            Operation::CompareAndScore {
                match_id: 3,
                team: "home".into(),
                mode: ScoringMode::Preview,
            }
        );
        assert_eq!(req.op.name(), "compare_and_score");
    }

    #[test]
    fn newtype_operations_take_fields_inline() {
        let req: Request = serde_json::from_value(json!({
            "id": "a",
            "actor": { "id": "root", "role": "admin" },
            "op": "create_match",
            "league_id": 1,
            "matchday": 4,
            "home_team": "Chelsea",
            "away_team": "Everton"
        }))
        .unwrap();
        match req.op {
            Operation::CreateMatch(new) => {
                assert_eq!(new.matchday, 4);
                assert_eq!(new.home_team, "Chelsea");
            }
            other => panic!("expected CreateMatch, got {other:?}"),
        }
    }

    #[test]
    fn scoring_mode_defaults_to_authoritative() {
        let req: Request = serde_json::from_value(json!({
            "actor": { "id": "root", "role": "admin" },
            "op": "compare_and_score",
            "match_id": 1,
            "team": "away"
        }))
        .unwrap();
        assert_eq!(req.id, Value::Null);
        assert!(matches!(
            req.op,
            Operation::CompareAndScore {
                mode: ScoringMode::Authoritative,
                ..
            }
        ));
    }

    #[test]
    fn unit_operations_need_only_the_tag() {
        let req: Request = serde_json::from_value(json!({
            "id": 1,
            "actor": { "id": "u", "role": "user" },
            "op": "list_matches"
        }))
        .unwrap();
        assert_eq!(req.op, Operation::ListMatches);
    }

    #[test]
    fn success_reply_omits_error() {
        let reply = Response::success(json!(1), json!({"x": 1}));
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({ "id": 1, "ok": true, "data": { "x": 1 } })
        );
    }

    #[test]
    fn validation_failure_names_the_player() {
        use lineup_core::validate::ValidationError;

        let err = EngineError::from(ValidationError::DuplicateSub { player_id: 14 });
        let reply = Response::from_error(json!(3), &err);
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "id": 3,
                "ok": false,
                "error": {
                    "kind": "validation",
                    "message": "validation failed: substitute 14 is listed more than once",
                    "player_id": 14
                }
            })
        );

        let reply = Response::from_error(json!(4), &EngineError::not_found("match", 9));
        assert_eq!(reply.error.and_then(|e| e.player_id), None);
    }

    #[test]
    fn failure_reply_omits_data() {
        let reply = Response::failure(json!("r1"), "lifecycle", "predictions are closed");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "id": "r1",
                "ok": false,
                "error": { "kind": "lifecycle", "message": "predictions are closed" }
            })
        );
    }
}
