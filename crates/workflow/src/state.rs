//! The run state machine. One closed enum, one transition table; every
//! store and executor path refuses edges outside it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Planning,
    Validating,
    AwaitingApproval,
    Simulating,
    Executing,
    Paused,
    AnalyzingCanary,
    Promoting,
    RollingBack,
    Succeeded,
    RolledBack,
    Failed,
    Cancelled,
    Rejected,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::RolledBack | Self::Failed | Self::Cancelled | Self::Rejected
        )
    }

    /// The single transition table. A terminal state has no outgoing
    /// edges, ever.
    pub fn can_transition(self, to: RunState) -> bool {
        use RunState::*;
        match self {
            Created => matches!(to, Planning | Cancelled),
            Planning => matches!(to, Validating | Failed | Cancelled),
            Validating => {
                matches!(to, AwaitingApproval | Simulating | Executing | Failed | Cancelled)
            }
            AwaitingApproval => {
                matches!(to, Executing | Simulating | Promoting | RollingBack | Rejected | Cancelled)
            }
            Simulating => matches!(to, AwaitingApproval | Executing | Failed | Cancelled),
            Executing => matches!(
                to,
                AnalyzingCanary | Promoting | Succeeded | RollingBack | Failed | Cancelled | Paused
            ),
            Paused => matches!(to, Executing | RollingBack | Cancelled),
            AnalyzingCanary => {
                matches!(to, Promoting | AwaitingApproval | RollingBack | Failed | Cancelled)
            }
            Promoting => matches!(to, Executing | Succeeded | Cancelled),
            RollingBack => matches!(to, RolledBack | Failed),
            Succeeded | RolledBack | Failed | Cancelled | Rejected => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        f.write_str(s.trim_matches('"'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RunState::*;

    const ALL: [RunState; 15] = [
        Created,
        Planning,
        Validating,
        AwaitingApproval,
        Simulating,
        Executing,
        Paused,
        AnalyzingCanary,
        Promoting,
        RollingBack,
        Succeeded,
        RolledBack,
        Failed,
        Cancelled,
        Rejected,
    ];

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL {
            if from.is_terminal() {
                for to in ALL {
                    assert!(!from.can_transition(to), "{from} -> {to} should be refused");
                }
            }
        }
    }

    #[test]
    fn happy_path_is_walkable() {
        let path = [
            Created,
            Planning,
            Validating,
            Executing,
            AnalyzingCanary,
            Promoting,
            Executing,
            Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn approval_and_rollback_paths() {
        assert!(Validating.can_transition(AwaitingApproval));
        assert!(AwaitingApproval.can_transition(Executing));
        assert!(AwaitingApproval.can_transition(Rejected));
        assert!(AnalyzingCanary.can_transition(RollingBack));
        assert!(AnalyzingCanary.can_transition(AwaitingApproval));
        assert!(RollingBack.can_transition(RolledBack));
        assert!(RollingBack.can_transition(Failed));
    }

    #[test]
    fn illegal_edges_are_refused() {
        assert!(!Created.can_transition(Executing));
        assert!(!Executing.can_transition(Planning));
        assert!(!RollingBack.can_transition(Executing));
        assert!(!Succeeded.can_transition(RollingBack));
        assert!(!Promoting.can_transition(RollingBack));
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(AnalyzingCanary.to_string(), "analyzing_canary");
        assert_eq!(RolledBack.to_string(), "rolled_back");
    }
}
