// Scoring engine: compares predictions with the official result of a match.
//
// Pure and deterministic. Each prediction is scored against the official
// data for its own side, independently of every other prediction and of any
// previously stored points.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{
    Match, MatchStatus, ParticipantId, PerSide, PlayerId, Position, Prediction, PredictionId,
    Side, LINEUP_SIZE,
};

/// Points per correctly predicted starter.
pub const STARTER_POINT: i64 = 1;
/// Points per correctly predicted substitute.
pub const SUB_POINT: i64 = 1;
/// Flat bonus when all eleven starters are correct.
pub const STARTERS_BONUS: i64 = 3;
/// Flat bonus when the substitutes match the official set exactly.
pub const SUBS_BONUS: i64 = 3;
/// Points for the correct man of the match.
pub const MOTM_POINTS: i64 = 3;

/// The official data one side is scored against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfficialResult {
    pub starters: BTreeSet<PlayerId>,
    pub subs: BTreeSet<PlayerId>,
    pub motm: Option<PlayerId>,
}

impl OfficialResult {
    pub fn for_side(m: &Match, side: Side) -> Self {
        OfficialResult {
            starters: m.lineups.get(side).iter().map(|s| s.player).collect(),
            subs: m.subs_in.get(side).iter().map(|s| s.player).collect(),
            motm: m.events.motm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarterResult {
    pub player: PlayerId,
    pub position: Position,
    pub is_correct: bool,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResult {
    pub player: PlayerId,
    pub minute: Option<u32>,
    pub is_correct: bool,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartersBreakdown {
    pub players: Vec<StarterResult>,
    pub correct: usize,
    pub bonus_awarded: bool,
    pub bonus: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsBreakdown {
    pub players: Vec<SubResult>,
    pub correct: usize,
    pub bonus_awarded: bool,
    pub bonus: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotmBreakdown {
    pub predicted: Option<PlayerId>,
    pub actual: Option<PlayerId>,
    pub is_correct: bool,
    pub points: i64,
}

/// Per-prediction explanation of the awarded points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub prediction_id: PredictionId,
    pub participant_id: ParticipantId,
    pub side: Side,
    pub starters: StartersBreakdown,
    pub subs: SubsBreakdown,
    pub motm: MotmBreakdown,
    pub total_points: i64,
    /// Set when the match was not finished at scoring time.
    pub provisional: bool,
    /// 1-based standing after [`rank_results`]; 0 until ranked.
    #[serde(default)]
    pub rank: u32,
}

/// Score every prediction against `m`. One result per input, in input order.
pub fn score(m: &Match, predictions: &[Prediction]) -> Vec<ScoreResult> {
    let official = PerSide {
        home: OfficialResult::for_side(m, Side::Home),
        away: OfficialResult::for_side(m, Side::Away),
    };
    let provisional = m.status != MatchStatus::Finished;

    predictions
        .iter()
        .map(|p| {
            let mut result = score_prediction(official.get(p.side), p);
            result.provisional = provisional;
            result
        })
        .collect()
}

/// Score a single prediction. `provisional` is left false.
pub fn score_prediction(official: &OfficialResult, prediction: &Prediction) -> ScoreResult {
    let starters: Vec<StarterResult> = prediction
        .players
        .iter()
        .map(|slot| {
            let is_correct = official.starters.contains(&slot.player);
            StarterResult {
                player: slot.player,
                position: slot.position,
                is_correct,
                points: if is_correct { STARTER_POINT } else { 0 },
            }
        })
        .collect();
    let correct_starters = starters.iter().filter(|s| s.is_correct).count();
    let starters_bonus_awarded = correct_starters == LINEUP_SIZE;

    // Each official sub is credited at most once, however often it is named.
    let mut credited = BTreeSet::new();
    let subs: Vec<SubResult> = prediction
        .subs
        .iter()
        .map(|sub| {
            let is_correct = official.subs.contains(&sub.player) && credited.insert(sub.player);
            SubResult {
                player: sub.player,
                minute: sub.minute,
                is_correct,
                points: if is_correct { SUB_POINT } else { 0 },
            }
        })
        .collect();
    let correct_subs = subs.iter().filter(|s| s.is_correct).count();
    let subs_bonus_awarded = !official.subs.is_empty()
        && prediction.subs.len() == official.subs.len()
        && correct_subs == official.subs.len();

    let motm_correct = matches!(
        (official.motm, prediction.motm),
        (Some(actual), Some(predicted)) if actual == predicted
    );

    let starters = StartersBreakdown {
        correct: correct_starters,
        bonus_awarded: starters_bonus_awarded,
        bonus: if starters_bonus_awarded { STARTERS_BONUS } else { 0 },
        players: starters,
    };
    let subs = SubsBreakdown {
        correct: correct_subs,
        bonus_awarded: subs_bonus_awarded,
        bonus: if subs_bonus_awarded { SUBS_BONUS } else { 0 },
        players: subs,
    };
    let motm = MotmBreakdown {
        predicted: prediction.motm,
        actual: official.motm,
        is_correct: motm_correct,
        points: if motm_correct { MOTM_POINTS } else { 0 },
    };

    let total_points = starters.players.iter().map(|s| s.points).sum::<i64>()
        + starters.bonus
        + subs.players.iter().map(|s| s.points).sum::<i64>()
        + subs.bonus
        + motm.points;

    ScoreResult {
        prediction_id: prediction.id,
        participant_id: prediction.participant_id.clone(),
        side: prediction.side,
        starters,
        subs,
        motm,
        total_points,
        provisional: false,
        rank: 0,
    }
}

/// Order results by total points (descending), then participant id, then
/// prediction id, and assign competition ranks (1, 2, 2, 4, ...).
pub fn rank_results(results: &mut [ScoreResult]) {
    results.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.participant_id.cmp(&b.participant_id))
            .then_with(|| a.prediction_id.cmp(&b.prediction_id))
    });

    let mut previous: Option<i64> = None;
    let mut rank = 0;
    for (i, result) in results.iter_mut().enumerate() {
        if previous != Some(result.total_points) {
            rank = i as u32 + 1;
            previous = Some(result.total_points);
        }
        result.rank = rank;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        LineupSlot, MatchEvents, PlayerSlot, Score, Substitution,
    };
    use chrono::{TimeZone, Utc};

    fn ts() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 16, 15, 0, 0).unwrap()
    }

    /// Official home starters 1..=11 (1 in goal), away starters 101..=111.
    fn finished_match(subs: &[PlayerId], motm: Option<PlayerId>) -> Match {
        let lineup = |base: PlayerId| -> Vec<LineupSlot> {
            (0..11)
                .map(|i| LineupSlot {
                    player: base + i,
                    position: if i == 0 {
                        Position::Goalkeeper
                    } else {
                        Position::Midfielder
                    },
                    from_minute: Some(0),
                })
                .collect()
        };
        Match {
            id: 1,
            league_id: 1,
            matchday: 1,
            home_team: "Liverpool".into(),
            away_team: "Arsenal".into(),
            status: MatchStatus::Finished,
            score: Score { home: 2, away: 1 },
            lineups: PerSide {
                home: lineup(1),
                away: lineup(101),
            },
            subs_in: PerSide {
                home: subs
                    .iter()
                    .map(|&player| Substitution {
                        player,
                        minute: Some(70),
                    })
                    .collect(),
                away: vec![],
            },
            events: MatchEvents {
                goals: vec![],
                motm,
            },
            played_at: ts(),
            version: 3,
        }
    }

    fn prediction(
        id: PredictionId,
        participant: &str,
        starters: &[PlayerId],
        subs: &[PlayerId],
        motm: Option<PlayerId>,
    ) -> Prediction {
        Prediction {
            id,
            participant_id: participant.into(),
            match_id: 1,
            side: Side::Home,
            players: starters
                .iter()
                .enumerate()
                .map(|(i, &player)| PlayerSlot {
                    player,
                    // Labels deliberately differ from the official ones.
                    position: if i == 10 {
                        Position::Goalkeeper
                    } else {
                        Position::Forward
                    },
                })
                .collect(),
            subs: subs
                .iter()
                .map(|&player| Substitution {
                    player,
                    minute: None,
                })
                .collect(),
            motm,
            points: 0,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn ids(range: std::ops::RangeInclusive<PlayerId>) -> Vec<PlayerId> {
        range.collect()
    }

    #[test]
    fn full_starter_match_earns_bonus() {
        let m = finished_match(&[], None);
        let mut starters = ids(1..=11);
        starters.reverse();
        let r = &score(&m, &[prediction(1, "ana", &starters, &[], None)])[0];
        assert_eq!(r.starters.correct, 11);
        assert!(r.starters.bonus_awarded);
        assert_eq!(r.total_points, 14);
        assert!(!r.provisional);
    }

    #[test]
    fn partial_starter_match_no_bonus() {
        let m = finished_match(&[], None);
        let mut starters = ids(1..=8);
        starters.extend([50, 51, 52]);
        let r = &score(&m, &[prediction(1, "ana", &starters, &[], None)])[0];
        assert_eq!(r.starters.correct, 8);
        assert!(!r.starters.bonus_awarded);
        assert_eq!(r.total_points, 8);
        assert!(r.starters.players[8..].iter().all(|s| !s.is_correct && s.points == 0));
    }

    #[test]
    fn extra_predicted_sub_denies_sub_bonus() {
        let m = finished_match(&[12, 13], None);
        let r = &score(&m, &[prediction(1, "ana", &ids(1..=11), &[12, 13, 14], None)])[0];
        assert_eq!(r.subs.correct, 2);
        assert!(!r.subs.bonus_awarded);
        assert_eq!(r.total_points, 14 + 2);
    }

    #[test]
    fn exact_subs_earn_bonus() {
        let m = finished_match(&[12, 13], None);
        let r = &score(&m, &[prediction(1, "ana", &ids(1..=11), &[13, 12], None)])[0];
        assert!(r.subs.bonus_awarded);
        assert_eq!(r.subs.bonus, SUBS_BONUS);
        assert_eq!(r.total_points, 14 + 2 + 3);
    }

    #[test]
    fn no_sub_bonus_when_match_had_no_subs() {
        let m = finished_match(&[], None);
        let r = &score(&m, &[prediction(1, "ana", &ids(1..=11), &[], None)])[0];
        assert!(!r.subs.bonus_awarded);
        assert_eq!(r.subs.correct, 0);
    }

    #[test]
    fn wrong_sub_with_matching_count_denies_bonus() {
        let m = finished_match(&[12, 13], None);
        let r = &score(&m, &[prediction(1, "ana", &ids(1..=11), &[12, 20], None)])[0];
        assert_eq!(r.subs.correct, 1);
        assert!(!r.subs.bonus_awarded);
    }

    #[test]
    fn repeated_sub_is_credited_once() {
        let m = finished_match(&[12, 13], None);
        let r = &score(&m, &[prediction(1, "ana", &ids(1..=11), &[12, 12], None)])[0];
        assert_eq!(r.subs.correct, 1);
        assert!(r.subs.players[0].is_correct);
        assert!(!r.subs.players[1].is_correct);
        assert_eq!(r.subs.players[1].points, 0);
        assert!(!r.subs.bonus_awarded);
        assert_eq!(r.total_points, 14 + 1);
    }

    #[test]
    fn motm_scoring() {
        let m = finished_match(&[], Some(1));
        let hit = &score(&m, &[prediction(1, "ana", &ids(1..=11), &[], Some(1))])[0];
        assert!(hit.motm.is_correct);
        assert_eq!(hit.motm.points, 3);
        assert_eq!(hit.total_points, 17);

        let miss = &score(&m, &[prediction(2, "ben", &ids(1..=11), &[], Some(2))])[0];
        assert!(!miss.motm.is_correct);
        assert_eq!(miss.motm.points, 0);
        assert_eq!(miss.total_points, 14);

        let none = &score(&m, &[prediction(3, "cy", &ids(1..=11), &[], None)])[0];
        assert!(!none.motm.is_correct);
    }

    #[test]
    fn motm_needs_official_value() {
        let m = finished_match(&[], None);
        let r = &score(&m, &[prediction(1, "ana", &ids(1..=11), &[], Some(1))])[0];
        assert!(!r.motm.is_correct);
        assert_eq!(r.motm.actual, None);
        assert_eq!(r.motm.predicted, Some(1));
    }

    #[test]
    fn away_prediction_scored_against_away_lineup() {
        let m = finished_match(&[], None);
        let mut p = prediction(1, "ana", &ids(101..=111), &[], None);
        p.side = Side::Away;
        let r = &score(&m, &[p])[0];
        assert_eq!(r.starters.correct, 11);
        assert_eq!(r.side, Side::Away);
    }

    #[test]
    fn unfinished_match_is_provisional() {
        let mut m = finished_match(&[], None);
        m.status = MatchStatus::Confirmed;
        let r = &score(&m, &[prediction(1, "ana", &ids(1..=11), &[], None)])[0];
        assert!(r.provisional);
        assert_eq!(r.total_points, 14);
    }

    #[test]
    fn scoring_ignores_stored_points_and_is_deterministic() {
        let m = finished_match(&[12], Some(3));
        let mut a = prediction(1, "ana", &ids(1..=11), &[12], Some(3));
        a.points = 999;
        let b = prediction(2, "ben", &ids(3..=13), &[14], None);
        let first = score(&m, &[a.clone(), b.clone()]);
        let second = score(&m, &[a, b]);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first[0].total_points, 14 + 1 + 3 + 3);
    }

    #[test]
    fn results_independent_of_input_order() {
        let m = finished_match(&[12], Some(3));
        let a = prediction(1, "ana", &ids(1..=11), &[12], None);
        let b = prediction(2, "ben", &ids(2..=12), &[], Some(3));
        let forward = score(&m, &[a.clone(), b.clone()]);
        let reversed = score(&m, &[b, a]);
        assert_eq!(forward[0], reversed[1]);
        assert_eq!(forward[1], reversed[0]);
    }

    #[test]
    fn ranking_orders_by_points_with_shared_ranks() {
        let m = finished_match(&[], None);
        let mut results = score(
            &m,
            &[
                prediction(1, "cy", &ids(2..=12), &[], None),
                prediction(2, "ana", &ids(1..=11), &[], None),
                prediction(3, "ben", &ids(2..=12), &[], None),
                prediction(4, "dee", &ids(5..=15), &[], None),
            ],
        );
        rank_results(&mut results);
        let order: Vec<(&str, i64, u32)> = results
            .iter()
            .map(|r| (r.participant_id.as_str(), r.total_points, r.rank))
            .collect();
        assert_eq!(
            order,
            vec![("ana", 14, 1), ("ben", 10, 2), ("cy", 10, 2), ("dee", 7, 4)]
        );
    }
}
