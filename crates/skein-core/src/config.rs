use crate::constants::{MAX_ANCESTORS_RETURNED, MAX_OUTSTANDING_FETCHES};
use serde::{Deserialize, Serialize};

/// Tuning knobs for the bootstrap fetch loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Concurrent ancestor fetches kept in flight.
    pub max_outstanding_fetches: usize,
    /// Cap on vertex blobs taken from a single `Ancestors` response.
    pub max_ancestors_received: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_outstanding_fetches: MAX_OUTSTANDING_FETCHES,
            max_ancestors_received: MAX_ANCESTORS_RETURNED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_track_protocol_limits() {
        let cfg = BootstrapConfig::default();
        assert_eq!(cfg.max_outstanding_fetches, MAX_OUTSTANDING_FETCHES);
        assert_eq!(cfg.max_ancestors_received, MAX_ANCESTORS_RETURNED);
    }
}
