//! Per-group membership state: one `Member` per `(level, gid)` a server
//! belongs to, holding the lazily-created per-round buffers the state
//! machine blocks on.

use std::sync::OnceLock;

use ark_ec::CurveGroup;
use ark_std::rand::Rng;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Notify};

use crate::config::{Mode, SystemConfig};
use crate::crypto::{
    combine_public_keys, lagrange_share, prove_shuffle, shuffle, verify_shuffle, Ciphertext,
    Commitment, CryptoError, DistKeyShare, InnerCiphertext, KeyPair, ShuffleProof,
    ThresholdSession, Trap,
};
use crate::topology::Group;

use super::error::ProtocolError;

const LOG_TARGET: &str = "atom::server::member";

/// Buffers for one `(round, uid)` pair, created on first reference and
/// coordinated condvar-style: consumers block until a buffer reaches its
/// target, producers append and signal.
pub(crate) struct RoundState<C: CurveGroup> {
    collect: Mutex<Vec<Ciphertext<C>>>,
    collect_signal: Notify,
    commits: Mutex<Vec<Commitment>>,
    commit_signal: Notify,
    shuf_ok_tx: mpsc::Sender<bool>,
    shuf_ok_rx: tokio::sync::Mutex<mpsc::Receiver<bool>>,
    reenc_ok_tx: mpsc::Sender<bool>,
    reenc_ok_rx: tokio::sync::Mutex<mpsc::Receiver<bool>>,
    driver_started: AtomicBool,
}

impl<C: CurveGroup> RoundState<C> {
    fn new(threshold: usize) -> Self {
        let (shuf_ok_tx, shuf_ok_rx) = mpsc::channel(threshold.max(1));
        let (reenc_ok_tx, reenc_ok_rx) = mpsc::channel(threshold.max(1));
        Self {
            collect: Mutex::new(Vec::new()),
            collect_signal: Notify::new(),
            commits: Mutex::new(Vec::new()),
            commit_signal: Notify::new(),
            shuf_ok_tx,
            shuf_ok_rx: tokio::sync::Mutex::new(shuf_ok_rx),
            reenc_ok_tx,
            reenc_ok_rx: tokio::sync::Mutex::new(reenc_ok_rx),
            driver_started: AtomicBool::new(false),
        }
    }
}

/// Fan-in buffers for the trap-mode finalize: one partition from each
/// last-level group.
pub(crate) struct FinalizeState<C: CurveGroup> {
    inners_tx: mpsc::Sender<Vec<InnerCiphertext<C>>>,
    inners_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<InnerCiphertext<C>>>>,
    traps_tx: mpsc::Sender<Vec<Trap>>,
    traps_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<Trap>>>,
    started: AtomicBool,
}

impl<C: CurveGroup> FinalizeState<C> {
    fn new(num_groups: usize) -> Self {
        let (inners_tx, inners_rx) = mpsc::channel(num_groups.max(1));
        let (traps_tx, traps_rx) = mpsc::channel(num_groups.max(1));
        Self {
            inners_tx,
            inners_rx: tokio::sync::Mutex::new(inners_rx),
            traps_tx,
            traps_rx: tokio::sync::Mutex::new(traps_rx),
            started: AtomicBool::new(false),
        }
    }
}

/// How a group's joint key was derived, and therefore which private
/// material a member contributes to its re-encryption step. The state
/// machine treats both variants uniformly.
pub enum GroupKeyStrategy<C: CurveGroup> {
    /// The group key is the sum of member public keys; each member uses
    /// its long-term private key.
    Additive,
    /// The group key came out of the DKG; each member uses its
    /// Lagrange-adjusted share.
    Threshold(DistKeyShare<C>),
}

/// A server's membership in one group.
pub struct Member<C: CurveGroup> {
    pub sid: usize,
    /// This server's index within the group's member list.
    pub idx: usize,
    pub group: Group<C>,
    params: SystemConfig,

    /// DKG session, present when the group key is threshold-derived.
    pub(crate) share: Option<ThresholdSession<C>>,
    strategy: OnceLock<GroupKeyStrategy<C>>,
    group_key: OnceLock<C>,

    rounds: DashMap<u32, std::sync::Arc<RoundState<C>>>,
    finalizes: DashMap<u32, std::sync::Arc<FinalizeState<C>>>,
}

impl<C: CurveGroup> Member<C> {
    pub fn new<R: Rng>(
        sid: usize,
        keypair: &KeyPair<C>,
        params: SystemConfig,
        group: Group<C>,
        rng: &mut R,
    ) -> Result<Self, ProtocolError> {
        let idx = group
            .members
            .iter()
            .position(|&m| m == sid)
            .ok_or(ProtocolError::NotAMember {
                sid,
                level: group.level,
                gid: group.gid,
            })?;

        let share = if params.uses_threshold_keys() {
            Some(ThresholdSession::new(
                idx,
                params.threshold,
                keypair.clone(),
                &group.member_keys,
                group.uid,
                rng,
            )?)
        } else {
            None
        };

        Ok(Self {
            sid,
            idx,
            group,
            params,
            share,
            strategy: OnceLock::new(),
            group_key: OnceLock::new(),
            rounds: DashMap::new(),
            finalizes: DashMap::new(),
        })
    }

    /// Derive the group key: the DKG joint key, or the plain sum of member
    /// keys when the full group participates in every chain.
    pub async fn gen_member_key(&self) -> Result<C, ProtocolError> {
        let (key, strategy) = match &self.share {
            Some(session) => {
                let share = session.finalize().await?;
                (share.public, GroupKeyStrategy::Threshold(share))
            }
            None => (
                combine_public_keys(&self.group.member_keys),
                GroupKeyStrategy::Additive,
            ),
        };
        let _ = self.strategy.set(strategy);
        let _ = self.group_key.set(key);
        tracing::debug!(
            target: LOG_TARGET,
            sid = self.sid,
            uid = self.group.uid,
            "group key established"
        );
        Ok(key)
    }

    pub fn group_key(&self) -> C {
        *self
            .group_key
            .get()
            .expect("group key is established during setup")
    }

    /// The private key used for this member's re-encryption step.
    pub fn reencrypt_key(
        &self,
        chain: &[usize],
        long_term: &C::ScalarField,
    ) -> C::ScalarField {
        match self.strategy.get() {
            Some(GroupKeyStrategy::Threshold(share)) => lagrange_share(share, chain),
            _ => *long_term,
        }
    }

    fn round(&self, round: u32) -> std::sync::Arc<RoundState<C>> {
        self.rounds
            .entry(round)
            .or_insert_with(|| std::sync::Arc::new(RoundState::new(self.params.threshold)))
            .clone()
    }

    /// Mark the round driver as claimed; only the first caller wins.
    pub fn claim_driver(&self, round: u32) -> bool {
        !self.round(round).driver_started.swap(true, Ordering::SeqCst)
    }

    pub fn collect(&self, round: u32, ciphertexts: Vec<Ciphertext<C>>) {
        let state = self.round(round);
        state.collect.lock().extend(ciphertexts);
        state.collect_signal.notify_waiters();
    }

    pub fn collect_commitments(&self, round: u32, commitments: Vec<Commitment>) {
        let state = self.round(round);
        state.commits.lock().extend(commitments);
        state.commit_signal.notify_waiters();
    }

    /// Block until the round's collect buffer reaches its target and
    /// return a snapshot of it.
    pub async fn ciphertexts(&self, round: u32) -> Vec<Ciphertext<C>> {
        let state = self.round(round);
        let target = self.params.collect_target();
        loop {
            // Register for the signal before checking, so a producer
            // appending in between cannot be missed.
            let notified = state.collect_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let buffer = state.collect.lock();
                if buffer.len() >= target {
                    return buffer.clone();
                }
            }
            notified.await;
        }
    }

    /// Block until all expected trap commitments have arrived.
    pub async fn commit_wait(&self, round: u32) {
        let state = self.round(round);
        loop {
            let notified = state.commit_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if state.commits.lock().len() >= self.params.num_msgs {
                return;
            }
            notified.await;
        }
    }

    pub fn commitments(&self, round: u32) -> Vec<Commitment> {
        self.round(round).commits.lock().clone()
    }

    pub async fn queue_shuf_ok(&self, round: u32, ok: bool) {
        let _ = self.round(round).shuf_ok_tx.send(ok).await;
    }

    pub async fn deque_shuf_ok(&self, round: u32) -> bool {
        let state = self.round(round);
        let mut rx = state.shuf_ok_rx.lock().await;
        rx.recv().await.unwrap_or(false)
    }

    pub async fn queue_reenc_ok(&self, round: u32, ok: bool) {
        let _ = self.round(round).reenc_ok_tx.send(ok).await;
    }

    pub async fn deque_reenc_ok(&self, round: u32) -> bool {
        let state = self.round(round);
        let mut rx = state.reenc_ok_rx.lock().await;
        rx.recv().await.unwrap_or(false)
    }

    pub fn shuffle<R: Rng>(&self, ciphertexts: Vec<Ciphertext<C>>, rng: &mut R) -> Vec<Ciphertext<C>> {
        shuffle(self.group_key(), ciphertexts, rng)
    }

    pub fn prove_shuffle<R: Rng>(
        &self,
        ciphertexts: &[Ciphertext<C>],
        rng: &mut R,
    ) -> Result<(Vec<Ciphertext<C>>, ShuffleProof<C>), CryptoError> {
        prove_shuffle(self.group_key(), ciphertexts, rng)
    }

    pub fn verify_shuffle(
        &self,
        old: &[Ciphertext<C>],
        new: &[Ciphertext<C>],
        proof: &ShuffleProof<C>,
    ) -> bool {
        match verify_shuffle(self.group_key(), old, new, proof) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: LOG_TARGET, uid = self.group.uid, error = %err, "incorrect shuffle proof");
                false
            }
        }
    }

    /// Split the batch into per-neighbor sub-batches. Deployments choose
    /// parameters that divide evenly; anything else is an error.
    pub fn divide(
        &self,
        ciphertexts: Vec<Ciphertext<C>>,
    ) -> Result<Vec<Vec<Ciphertext<C>>>, ProtocolError> {
        let parts = self.group.adj.len().max(1);
        if ciphertexts.len() % parts != 0 {
            return Err(ProtocolError::UnevenBatch {
                len: ciphertexts.len(),
                parts,
            });
        }
        let batch_size = ciphertexts.len() / parts;
        let mut batches = Vec::with_capacity(parts);
        let mut rest = ciphertexts;
        for _ in 0..parts {
            let tail = rest.split_off(batch_size);
            batches.push(rest);
            rest = tail;
        }
        Ok(batches)
    }

    fn finalize_state(&self, round: u32) -> std::sync::Arc<FinalizeState<C>> {
        self.finalizes
            .entry(round)
            .or_insert_with(|| {
                std::sync::Arc::new(FinalizeState::new(self.params.num_groups))
            })
            .clone()
    }

    /// Mark the finalize task as claimed; only the first caller wins.
    pub fn claim_finalize(&self, round: u32) -> bool {
        !self
            .finalize_state(round)
            .started
            .swap(true, Ordering::SeqCst)
    }

    pub async fn collect_result(
        &self,
        round: u32,
        inners: Vec<InnerCiphertext<C>>,
        traps: Vec<Trap>,
    ) {
        let state = self.finalize_state(round);
        let _ = state.inners_tx.send(inners).await;
        let _ = state.traps_tx.send(traps).await;
    }

    /// Gather the `num_groups` partitions routed to this entry group.
    pub async fn results(&self, round: u32) -> (Vec<InnerCiphertext<C>>, Vec<Trap>) {
        let state = self.finalize_state(round);
        let mut inners = Vec::new();
        let mut traps = Vec::new();
        let mut inners_rx = state.inners_rx.lock().await;
        let mut traps_rx = state.traps_rx.lock().await;
        for _ in 0..self.params.num_groups {
            if let Some(batch) = inners_rx.recv().await {
                inners.extend(batch);
            }
            if let Some(batch) = traps_rx.recv().await {
                traps.extend(batch);
            }
        }
        (inners, traps)
    }

    /// Tear down the per-round buffers once finalize completes.
    pub fn end_round(&self, round: u32) {
        self.rounds.remove(&round);
        self.finalizes.remove(&round);
    }

    pub fn uses_trap_mode(&self) -> bool {
        self.params.mode == Mode::Trap
    }
}
