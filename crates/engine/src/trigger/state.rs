use serde::{Deserialize, Serialize};

/// Lifecycle of one rule instance. Transitions are monotonic except
/// `Running ⇄ Throttled`, which may oscillate; `Expired` and `Faulted` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Running,
    Throttled,
    Expired,
    Faulted,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Faulted)
    }

    pub fn can_transition(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (Self::Starting, Self::Running | Self::Faulted) => true,
            (Self::Running, Self::Throttled | Self::Expired | Self::Faulted) => true,
            (Self::Throttled, Self::Running | Self::Expired | Self::Faulted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Throttled => "throttled",
            Self::Expired => "expired",
            Self::Faulted => "faulted",
        };
        write!(f, "{s}")
    }
}
