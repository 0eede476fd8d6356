// Match lifecycle: draft -> (confirmed) -> finished, forward only.
//
// Decides which writes a match accepts in its current state. The store
// applies the resulting status with a compare-and-swap, so a write that
// passed these checks cannot land on a match that moved on meanwhile.

use thiserror::Error;

use crate::model::MatchStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("predictions are closed (match is {status})")]
    PredictionsClosed { status: MatchStatus },

    #[error("match is finished; official data is locked")]
    MatchLocked,

    #[error("match is {status}; authoritative scoring requires a finished match")]
    NotFinished { status: MatchStatus },

    #[error("cannot move match from {from} to {to}")]
    InvalidTransition { from: MatchStatus, to: MatchStatus },
}

impl MatchStatus {
    /// Position in the forward-only ordering.
    fn rank(&self) -> u8 {
        match self {
            MatchStatus::Draft => 0,
            MatchStatus::Confirmed => 1,
            MatchStatus::Finished => 2,
        }
    }

    /// Whether `next` is a legal forward step (confirmed may be skipped).
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// Predictions are accepted only while the match is in draft.
pub fn ensure_predictions_open(status: MatchStatus) -> Result<(), LifecycleError> {
    match status {
        MatchStatus::Draft => Ok(()),
        status => Err(LifecycleError::PredictionsClosed { status }),
    }
}

/// Official lineups, subs and events are writable until the match finishes.
pub fn ensure_official_writable(status: MatchStatus) -> Result<(), LifecycleError> {
    match status {
        MatchStatus::Finished => Err(LifecycleError::MatchLocked),
        _ => Ok(()),
    }
}

/// Status after an official lineup was recorded. With `confirm_on_lineup`
/// a draft match advances to confirmed; otherwise the status is unchanged.
pub fn after_official_lineup(
    status: MatchStatus,
    confirm_on_lineup: bool,
) -> Result<MatchStatus, LifecycleError> {
    ensure_official_writable(status)?;
    if confirm_on_lineup && status == MatchStatus::Draft {
        Ok(MatchStatus::Confirmed)
    } else {
        Ok(status)
    }
}

/// Status after the administrator finalizes the result.
pub fn finalize(status: MatchStatus) -> Result<MatchStatus, LifecycleError> {
    if status == MatchStatus::Finished {
        return Err(LifecycleError::MatchLocked);
    }
    transition(status, MatchStatus::Finished)
}

pub fn transition(from: MatchStatus, to: MatchStatus) -> Result<MatchStatus, LifecycleError> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}
