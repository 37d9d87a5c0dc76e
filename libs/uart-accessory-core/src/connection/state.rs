use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::AccessoryError;

/// Lifecycle of an accessory connection.
///
/// Valid edges: `Closed -> WaitingPermission`, `Closed -> Open`,
/// `WaitingPermission -> Open`, and anything `-> Closed`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Closed,
    WaitingPermission,
    Open,
}

impl ConnectionState {
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, to),
            (_, Closed) | (Closed, WaitingPermission) | (Closed, Open) | (WaitingPermission, Open)
        )
    }

    /// Validates the edge `self -> to`.
    pub fn transition(self, to: ConnectionState) -> Result<ConnectionState, AccessoryError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(AccessoryError::InvalidTransition { from: self, to })
        }
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::WaitingPermission => write!(f, "waiting permission"),
            ConnectionState::Open => write!(f, "open"),
        }
    }
}
