use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Length of the shared public-randomness seed distributed by the directory.
pub const SEED_LEN: usize = 16;

/// Shared randomness seed, XOR-combined across directory replicas.
pub type Seed = [u8; SEED_LEN];

/// Every inter-server RPC is subject to this per-call timeout. Expiry is
/// fatal for the round; the protocol does not retry.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How a round proves that no server dropped or substituted messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Every shuffle and re-encryption carries a NIZK verified by the
    /// other group members.
    Verifiable,
    /// No inline proofs; clients inject committed trap messages and
    /// trustees withhold the round decryption key unless every entry
    /// group's report checks out.
    Trap,
}

/// Shape of the group overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkKind {
    /// Log-depth routing: group `gid` at level `l` connects to `gid` and
    /// `gid ^ (1 << (l % log2(num_groups)))` at level `l + 1`.
    Butterfly,
    /// Full bipartite connection between consecutive levels.
    Square,
}

/// Deployment-wide parameters, distributed by the directory.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    pub mode: Mode,
    pub net: NetworkKind,

    /// Total number of servers available.
    pub num_servers: usize,
    /// Number of groups per level.
    pub num_groups: usize,
    /// Number of servers per group.
    pub per_group: usize,
    /// Number of trustees (trap mode only).
    pub num_trustees: usize,
    /// Number of levels in the overlay.
    pub num_levels: usize,

    /// Number of messages each client submits per round.
    pub num_msgs: usize,
    /// Plaintext size in bytes.
    pub msg_size: usize,

    /// Servers participating in each group's shuffle chain. When equal to
    /// `per_group` the group key is the sum of member keys and no DKG runs.
    pub threshold: usize,
}

impl SystemConfig {
    /// Number of levels implied by the network kind: `log2(num_groups)^2`
    /// for the butterfly, a fixed depth of 10 for the square network.
    pub fn default_levels(net: NetworkKind, num_groups: usize) -> usize {
        match net {
            NetworkKind::Butterfly => {
                let log = log2(num_groups);
                log * log
            }
            NetworkKind::Square => 10,
        }
    }

    /// Ciphertexts an entry group collects before shuffling. Trap mode
    /// doubles the target: half real messages, half traps.
    pub fn collect_target(&self) -> usize {
        match self.mode {
            Mode::Verifiable => self.num_msgs,
            Mode::Trap => 2 * self.num_msgs,
        }
    }

    /// Whether groups derive their key through DKG rather than summation.
    pub fn uses_threshold_keys(&self) -> bool {
        self.threshold < self.per_group
    }
}

/// Floor of log base 2.
pub fn log2(val: usize) -> usize {
    debug_assert!(val > 0);
    (usize::BITS - 1 - val.leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2_matches_powers() {
        assert_eq!(log2(1), 0);
        assert_eq!(log2(2), 1);
        assert_eq!(log2(8), 3);
        assert_eq!(log2(9), 3);
    }

    #[test]
    fn butterfly_levels_are_log_squared() {
        assert_eq!(SystemConfig::default_levels(NetworkKind::Butterfly, 8), 9);
        assert_eq!(SystemConfig::default_levels(NetworkKind::Square, 8), 10);
    }
}
