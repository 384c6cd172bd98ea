//! The directory service: bootstrap source of truth for system parameters,
//! long-term keys, group keys, per-round trustee keys and the shared
//! randomness seed. Collaborator of the core; consensus across replicas is
//! out of scope, but replicas' randomness contributions are XOR-combined.

use std::collections::HashMap;
use std::sync::Arc;

use ark_ec::CurveGroup;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::{Seed, SystemConfig};
use crate::rpc::RpcError;

const LOG_TARGET: &str = "atom::directory";

/// A consistent view of the directory once every party registered.
#[derive(Clone, Debug)]
pub struct DirectorySnapshot<C: CurveGroup> {
    pub params: SystemConfig,
    pub server_keys: Vec<C>,
    pub trustee_keys: Vec<C>,
}

struct DirectoryState<C: CurveGroup> {
    servers: Vec<Option<C>>,
    trustees: Vec<Option<C>>,
    group_keys: Vec<Vec<Option<C>>>,
    round_keys: HashMap<u32, C>,
}

/// In-process directory replica.
pub struct Directory<C: CurveGroup> {
    params: SystemConfig,
    seed: Seed,
    state: Mutex<DirectoryState<C>>,
    changed: (watch::Sender<u64>, watch::Receiver<u64>),
}

impl<C: CurveGroup> Directory<C> {
    pub fn new(params: SystemConfig, seed: Seed) -> Arc<Self> {
        Arc::new(Self {
            params,
            seed,
            state: Mutex::new(DirectoryState {
                servers: vec![None; params.num_servers],
                trustees: vec![None; params.num_trustees],
                group_keys: vec![vec![None; params.num_groups]; params.num_levels],
                round_keys: HashMap::new(),
            }),
            changed: watch::channel(0),
        })
    }

    pub fn params(&self) -> SystemConfig {
        self.params
    }

    /// This replica's contribution to the shared randomness.
    pub fn randomness(&self) -> Seed {
        self.seed
    }

    pub fn register_server(&self, id: usize, public_key: C) {
        self.state.lock().servers[id] = Some(public_key);
        self.bump();
    }

    pub fn register_trustee(&self, id: usize, public_key: C) {
        self.state.lock().trustees[id] = Some(public_key);
        self.bump();
    }

    pub fn register_group(&self, level: usize, gid: usize, group_key: C) {
        self.state.lock().group_keys[level][gid] = Some(group_key);
        self.bump();
    }

    /// Register the round key; replicas reject conflicting registrations.
    pub fn register_round(&self, round: u32, round_key: C) -> Result<(), RpcError> {
        let mut state = self.state.lock();
        match state.round_keys.get(&round) {
            Some(existing) if *existing != round_key => {
                tracing::error!(target: LOG_TARGET, round, "mismatching round key registration");
                Err(RpcError::Remote("mismatching round key registration".into()))
            }
            Some(_) => Ok(()),
            None => {
                state.round_keys.insert(round, round_key);
                drop(state);
                self.bump();
                Ok(())
            }
        }
    }

    /// Wait until every server and trustee has registered.
    pub async fn directory(&self) -> DirectorySnapshot<C> {
        let mut rx = self.changed.1.clone();
        loop {
            {
                let state = self.state.lock();
                if state.servers.iter().all(Option::is_some)
                    && state.trustees.iter().all(Option::is_some)
                {
                    return DirectorySnapshot {
                        params: self.params,
                        server_keys: state.servers.iter().flatten().copied().collect(),
                        trustee_keys: state.trustees.iter().flatten().copied().collect(),
                    };
                }
            }
            let _ = rx.changed().await;
        }
    }

    /// Wait until every `(level, gid)` group key has registered.
    pub async fn group_keys(&self) -> Vec<Vec<C>> {
        let mut rx = self.changed.1.clone();
        loop {
            {
                let state = self.state.lock();
                if state
                    .group_keys
                    .iter()
                    .all(|level| level.iter().all(Option::is_some))
                {
                    return state
                        .group_keys
                        .iter()
                        .map(|level| level.iter().flatten().copied().collect())
                        .collect();
                }
            }
            let _ = rx.changed().await;
        }
    }

    /// Wait for the round's trustee key.
    pub async fn round_key(&self, round: u32) -> C {
        let mut rx = self.changed.1.clone();
        loop {
            if let Some(key) = self.state.lock().round_keys.get(&round).copied() {
                return key;
            }
            let _ = rx.changed().await;
        }
    }

    fn bump(&self) {
        self.changed.0.send_modify(|v| *v += 1);
    }
}

/// XOR the randomness of every directory replica into the layout seed.
pub fn combined_seed<C: CurveGroup>(directories: &[Arc<Directory<C>>]) -> Seed {
    let mut seed = Seed::default();
    for directory in directories {
        for (acc, byte) in seed.iter_mut().zip(directory.randomness()) {
            *acc ^= byte;
        }
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, NetworkKind};
    use crate::crypto::{Curve, KeyPair};
    use ark_std::test_rng;

    fn small_params() -> SystemConfig {
        SystemConfig {
            mode: Mode::Trap,
            net: NetworkKind::Square,
            num_servers: 2,
            num_groups: 1,
            per_group: 2,
            num_trustees: 1,
            num_levels: 2,
            num_msgs: 4,
            msg_size: 10,
            threshold: 2,
        }
    }

    #[tokio::test]
    async fn directory_waits_for_registrations() {
        let mut rng = test_rng();
        let directory = Directory::<Curve>::new(small_params(), [0u8; 16]);
        let keys: Vec<KeyPair<Curve>> = (0..3).map(|_| KeyPair::generate(&mut rng)).collect();

        let waiter = {
            let directory = Arc::clone(&directory);
            tokio::spawn(async move { directory.directory().await })
        };

        directory.register_server(0, keys[0].public);
        directory.register_server(1, keys[1].public);
        assert!(!waiter.is_finished());
        directory.register_trustee(0, keys[2].public);

        let snapshot = waiter.await.unwrap();
        assert_eq!(snapshot.server_keys, vec![keys[0].public, keys[1].public]);
        assert_eq!(snapshot.trustee_keys, vec![keys[2].public]);
    }

    #[tokio::test]
    async fn conflicting_round_keys_are_rejected() {
        let mut rng = test_rng();
        let directory = Directory::<Curve>::new(small_params(), [0u8; 16]);
        let a = KeyPair::<Curve>::generate(&mut rng).public;
        let b = KeyPair::<Curve>::generate(&mut rng).public;

        directory.register_round(0, a).unwrap();
        directory.register_round(0, a).unwrap();
        assert!(directory.register_round(0, b).is_err());
    }

    #[test]
    fn seeds_xor_across_replicas() {
        let params = small_params();
        let a = Directory::<Curve>::new(params, [0b1100u8; 16]);
        let b = Directory::<Curve>::new(params, [0b1010u8; 16]);
        assert_eq!(combined_seed(&[a, b]), [0b0110u8; 16]);
    }
}
