// Actor identity supplied by the external identity provider.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::User => "user",
        })
    }
}

/// An already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ParticipantId,
    pub role: Role,
}

impl Actor {
    pub fn admin(id: impl Into<ParticipantId>) -> Self {
        Actor {
            id: id.into(),
            role: Role::Admin,
        }
    }

    pub fn user(id: impl Into<ParticipantId>) -> Self {
        Actor {
            id: id.into(),
            role: Role::User,
        }
    }

    pub fn require_admin(&self, action: &'static str) -> EngineResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            role => Err(EngineError::Unauthorized {
                role: role.to_string(),
                action,
            }),
        }
    }
}
