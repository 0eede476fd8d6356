// Engine error taxonomy.

use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::model::PlayerId;
use crate::store::StoreError;
use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("invalid team `{0}`; expected `home` or `away`")]
    InvalidTeam(String),

    #[error("role `{role}` may not {action}")]
    Unauthorized { role: String, action: &'static str },

    #[error("conflict: {0}")]
    Conflict(String),

    /// A store operation itself failed. Not recoverable by the caller.
    #[error("store operation failed: {0:#}")]
    Store(anyhow::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable short name for the error class, used at the transport boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::Validation(_) => "validation",
            EngineError::Lifecycle(_) => "lifecycle",
            EngineError::InvalidTeam(_) => "invalid_team",
            EngineError::Unauthorized { .. } => "unauthorized",
            EngineError::Conflict(_) => "conflict",
            EngineError::Store(_) => "internal",
        }
    }

    /// The Player a validation failure points at, if any.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            EngineError::Validation(v) => v.player_id(),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { entity, key } => {
                EngineError::Conflict(format!("{entity} already exists: {key}"))
            }
            StoreError::StaleWrite { entity, id } => EngineError::Conflict(format!(
                "{entity} {id} was modified concurrently; reload and retry"
            )),
            StoreError::Backend(e) => EngineError::Store(e),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchStatus;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(EngineError::not_found("match", 7).kind(), "not_found");
        assert_eq!(
            EngineError::from(ValidationError::TooManySubs { found: 6 }).kind(),
            "validation"
        );
        assert_eq!(
            EngineError::from(LifecycleError::MatchLocked).kind(),
            "lifecycle"
        );
        assert_eq!(EngineError::InvalidTeam("x".into()).kind(), "invalid_team");
        assert_eq!(
            EngineError::from(StoreError::Backend(anyhow::anyhow!("disk"))).kind(),
            "internal"
        );
    }

    #[test]
    fn duplicate_maps_to_conflict() {
        let err = EngineError::from(StoreError::Duplicate {
            entity: "league",
            key: "Premier League".into(),
        });
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(err.to_string(), "conflict: league already exists: Premier League");
    }

    #[test]
    fn messages_carry_details() {
        let err = EngineError::from(LifecycleError::PredictionsClosed {
            status: MatchStatus::Finished,
        });
        assert_eq!(err.to_string(), "predictions are closed (match is finished)");

        let err = EngineError::from(ValidationError::PlayerNotInSquad {
            player_id: 42,
            team: "Arsenal".into(),
        });
        assert_eq!(err.to_string(), "validation failed: player 42 is not in the Arsenal squad");
        assert_eq!(err.player_id(), Some(42));

        let err = EngineError::from(ValidationError::GoalkeeperCount { found: 2 });
        assert_eq!(err.player_id(), None);
        assert_eq!(EngineError::not_found("player", 42).player_id(), None);
    }
}
