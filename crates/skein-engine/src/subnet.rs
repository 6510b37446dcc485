//! Per-subnet bootstrap sequencing.
//!
//! A subnet hosts several chains, and chains other than the primary must
//! not begin bootstrapping until the subnet as a whole has caught up. The
//! tracker is the one structure shared across chain actors: a mutex-guarded
//! membership set plus a one-shot broadcast gate that any number of waiters
//! may park on.

use skein_core::ChainId;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct Subnet {
    inner: Mutex<Inner>,
    gate: watch::Sender<bool>,
}

struct Inner {
    bootstrapping: HashSet<ChainId>,
    bootstrapped: HashSet<ChainId>,
    signalled: bool,
}

impl Default for Subnet {
    fn default() -> Self {
        Subnet::new()
    }
}

impl Subnet {
    pub fn new() -> Subnet {
        let (gate, _) = watch::channel(false);
        Subnet {
            inner: Mutex::new(Inner {
                bootstrapping: HashSet::new(),
                bootstrapped: HashSet::new(),
                signalled: false,
            }),
            gate,
        }
    }

    /// Register a chain as bootstrapping. Returns false (a no-op) if the
    /// chain is already tracked or already finished.
    pub fn add_chain(&self, chain_id: ChainId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.bootstrapping.contains(&chain_id) || inner.bootstrapped.contains(&chain_id) {
            return false;
        }
        debug!(chain = %chain_id, "chain began bootstrapping");
        inner.bootstrapping.insert(chain_id);
        true
    }

    /// Move a chain from bootstrapping to bootstrapped. When the last
    /// bootstrapping chain finishes, the completion gate opens — once.
    pub fn mark_bootstrapped(&self, chain_id: ChainId) {
        let mut inner = self.inner.lock().unwrap();
        inner.bootstrapping.remove(&chain_id);
        inner.bootstrapped.insert(chain_id);
        if !inner.bootstrapping.is_empty() {
            return;
        }
        if !inner.signalled {
            inner.signalled = true;
            info!("subnet finished bootstrapping");
            self.gate.send_replace(true);
        }
    }

    /// True iff no chain is currently bootstrapping.
    pub fn is_bootstrapped(&self) -> bool {
        self.inner.lock().unwrap().bootstrapping.is_empty()
    }

    /// Park until the subnet's completion gate opens. Safe for any number
    /// of concurrent waiters; returns immediately once the gate is open.
    pub async fn wait_bootstrapped(&self) {
        let mut rx = self.gate.subscribe();
        // borrow is dropped before awaiting
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn chain(n: u8) -> ChainId {
        ChainId::from_bytes([n; 32])
    }

    #[test]
    fn add_chain_is_at_most_once() {
        let subnet = Subnet::new();
        assert!(subnet.add_chain(chain(1)));
        assert!(!subnet.add_chain(chain(1)));
        subnet.mark_bootstrapped(chain(1));
        assert!(!subnet.add_chain(chain(1)), "finished chains cannot re-register");
    }

    #[test]
    fn bootstrapped_tracks_membership() {
        let subnet = Subnet::new();
        assert!(subnet.is_bootstrapped(), "no chains means bootstrapped");
        subnet.add_chain(chain(1));
        subnet.add_chain(chain(2));
        assert!(!subnet.is_bootstrapped());
        subnet.mark_bootstrapped(chain(1));
        assert!(!subnet.is_bootstrapped());
        subnet.mark_bootstrapped(chain(2));
        assert!(subnet.is_bootstrapped());
    }

    #[test]
    fn duplicate_mark_is_idempotent() {
        let subnet = Subnet::new();
        subnet.add_chain(chain(1));
        subnet.mark_bootstrapped(chain(1));
        subnet.mark_bootstrapped(chain(1));
        assert!(subnet.is_bootstrapped());
    }

    #[tokio::test]
    async fn gate_wakes_all_waiters() {
        let subnet = Arc::new(Subnet::new());
        subnet.add_chain(chain(1));

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let subnet = Arc::clone(&subnet);
            waiters.push(tokio::spawn(async move {
                subnet.wait_bootstrapped().await;
            }));
        }

        subnet.mark_bootstrapped(chain(1));
        for waiter in waiters {
            timeout(Duration::from_secs(5), waiter)
                .await
                .expect("waiter woke")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn late_waiter_passes_straight_through() {
        let subnet = Subnet::new();
        subnet.add_chain(chain(1));
        subnet.mark_bootstrapped(chain(1));
        timeout(Duration::from_secs(5), subnet.wait_bootstrapped())
            .await
            .expect("gate already open");
    }

    #[tokio::test]
    async fn gate_stays_closed_while_a_chain_remains() {
        let subnet = Subnet::new();
        subnet.add_chain(chain(1));
        subnet.add_chain(chain(2));
        subnet.mark_bootstrapped(chain(1));
        assert!(
            timeout(Duration::from_millis(50), subnet.wait_bootstrapped())
                .await
                .is_err(),
            "gate must not open early"
        );
    }
}
