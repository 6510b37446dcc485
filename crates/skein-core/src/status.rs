use serde::{Deserialize, Serialize};
use std::fmt;

/// Decision lifecycle of a vertex or transaction.
///
/// Transitions are monotonic: once `Accepted` or `Rejected`, the status
/// never changes again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Not known to this node at all.
    Unknown,
    /// Known locally but not yet decided.
    Processing,
    /// Permanently accepted by consensus.
    Accepted,
    /// Permanently rejected by consensus.
    Rejected,
}

impl Status {
    /// Whether the item's bytes are available locally.
    pub fn fetched(self) -> bool {
        !matches!(self, Status::Unknown)
    }

    /// Whether the item has reached a final decision.
    pub fn decided(self) -> bool {
        matches!(self, Status::Accepted | Status::Rejected)
    }

    /// Whether moving from `self` to `next` respects monotonicity.
    pub fn valid_transition(self, next: Status) -> bool {
        match self {
            Status::Unknown => true,
            Status::Processing => next != Status::Unknown,
            // Decided statuses may only restate themselves.
            Status::Accepted | Status::Rejected => next == self,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Status::Unknown => 0,
            Status::Processing => 1,
            Status::Accepted => 2,
            Status::Rejected => 3,
        }
    }

    pub fn from_byte(b: u8) -> Option<Status> {
        match b {
            0 => Some(Status::Unknown),
            1 => Some(Status::Processing),
            2 => Some(Status::Accepted),
            3 => Some(Status::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Unknown => "Unknown",
            Status::Processing => "Processing",
            Status::Accepted => "Accepted",
            Status::Rejected => "Rejected",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decided_statuses_are_terminal() {
        assert!(Status::Accepted.valid_transition(Status::Accepted));
        assert!(!Status::Accepted.valid_transition(Status::Rejected));
        assert!(!Status::Rejected.valid_transition(Status::Processing));
    }

    #[test]
    fn processing_cannot_regress_to_unknown() {
        assert!(!Status::Processing.valid_transition(Status::Unknown));
        assert!(Status::Processing.valid_transition(Status::Accepted));
        assert!(Status::Processing.valid_transition(Status::Rejected));
    }

    #[test]
    fn fetched_and_decided() {
        assert!(!Status::Unknown.fetched());
        assert!(Status::Processing.fetched());
        assert!(!Status::Processing.decided());
        assert!(Status::Accepted.decided());
    }

    #[test]
    fn byte_round_trip() {
        for s in [
            Status::Unknown,
            Status::Processing,
            Status::Accepted,
            Status::Rejected,
        ] {
            assert_eq!(Status::from_byte(s.as_byte()), Some(s));
        }
        assert_eq!(Status::from_byte(9), None);
    }
}
