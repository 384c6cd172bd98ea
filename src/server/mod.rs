//! The mix server: per-group state machines executing
//! collect -> shuffle -> (prove/verify) -> re-encrypt -> (prove/verify) ->
//! forward, with end-of-path finalization and the trap cross-check.

pub mod error;
pub mod member;
mod tasks;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use ark_ec::CurveGroup;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::{Mode, SystemConfig};
use crate::crypto::embed::{extract_inner_and_traps, extract_plaintexts, Message, PointEncoding};
use crate::crypto::rand::{crypto_rng, sha3_256};
use crate::crypto::{
    cca2, combine_private_keys, commit, null_key, prove_reencrypt_batches, reencrypt_batches,
    verify_encrypt, verify_reencrypt_batches, Commitment, InnerCiphertext, KeyPair,
};
use crate::directory::{combined_seed, Directory};
use crate::rpc::{
    call, ArgInfo, CollectArgs, CommitArgs, DbRpc, DealArgs, FinalizeArgs, LocalNetwork,
    ProofOkArgs, ReencryptArgs, ReportArgs, ResponseArgs, RpcError, ServerRpc, ShuffleArgs,
    SubmitArgs, TrusteeRpc, VerifyReencryptArgs, VerifyShuffleArgs,
};
use crate::topology::{generate_groups, Overlay};

pub use error::ProtocolError;
pub use member::{GroupKeyStrategy, Member};
use tasks::spawn_phase;

const LOG_TARGET: &str = "atom::server";

/// Route an inner ciphertext to its entry group by hash.
fn select_group<C: CurveGroup>(inner: &InnerCiphertext<C>, num_groups: usize) -> usize {
    let hash = sha3_256(&inner.c);
    let mut le = [0u8; 8];
    le.copy_from_slice(&hash[..8]);
    (u64::from_le_bytes(le) % num_groups as u64) as usize
}

fn rpc_fault(err: impl std::fmt::Display) -> RpcError {
    RpcError::Remote(err.to_string())
}

/// One mix server. Holds a `Member` for every group it belongs to across
/// all levels; the membership map is built at setup and read-only after.
pub struct Server<C: CurveGroup + PointEncoding> {
    id: usize,
    keypair: KeyPair<C>,
    params: SystemConfig,
    directories: Vec<Arc<Directory<C>>>,
    net: Arc<LocalNetwork<C>>,
    db: Arc<dyn DbRpc>,

    overlay: OnceLock<Overlay<C>>,
    part_of: OnceLock<Vec<Vec<Option<u64>>>>,
    members: OnceLock<HashMap<u64, Arc<Member<C>>>>,
    peers: OnceLock<Vec<Arc<dyn ServerRpc<C>>>>,
    trustees: OnceLock<Vec<Arc<dyn TrusteeRpc<C>>>>,
    group_keys: OnceLock<Vec<Vec<C>>>,

    connected: (watch::Sender<bool>, watch::Receiver<bool>),
    setup_done: (watch::Sender<bool>, watch::Receiver<bool>),
}

impl<C: CurveGroup + PointEncoding> Server<C> {
    pub fn new(
        id: usize,
        keypair: KeyPair<C>,
        directories: Vec<Arc<Directory<C>>>,
        net: Arc<LocalNetwork<C>>,
        db: Arc<dyn DbRpc>,
    ) -> Arc<Self> {
        let params = directories[0].params();
        Arc::new(Self {
            id,
            keypair,
            params,
            directories,
            net,
            db,
            overlay: OnceLock::new(),
            part_of: OnceLock::new(),
            members: OnceLock::new(),
            peers: OnceLock::new(),
            trustees: OnceLock::new(),
            group_keys: OnceLock::new(),
            connected: watch::channel(false),
            setup_done: watch::channel(false),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Bootstrap: register, build the overlay, connect to peers, run the
    /// per-group key generation and publish group keys.
    pub async fn setup(&self) -> Result<(), ProtocolError> {
        for directory in &self.directories {
            directory.register_server(self.id, self.keypair.public);
        }
        let snapshot = self.directories[0].directory().await;
        self.gen_groups(&snapshot.server_keys)?;
        self.connect_servers().await;
        self.gen_member_keys().await?;
        self.setup_group_keys().await;
        tracing::info!(target: LOG_TARGET, id = self.id, "server setup complete");
        Ok(())
    }

    fn gen_groups(&self, public_keys: &[C]) -> Result<(), ProtocolError> {
        let seed = combined_seed(&self.directories);
        let overlay = generate_groups(seed, &self.params, public_keys);

        let mut part_of =
            vec![vec![None; self.params.num_groups]; self.params.num_levels];
        let mut members = HashMap::new();
        let mut rng = crypto_rng();
        for level in 0..self.params.num_levels {
            for gid in 0..self.params.num_groups {
                let group = overlay.group(level, gid);
                if !group.members.contains(&self.id) {
                    continue;
                }
                part_of[level][gid] = Some(group.uid);
                let member = Member::new(
                    self.id,
                    &self.keypair,
                    self.params,
                    group.clone(),
                    &mut rng,
                )?;
                members.insert(group.uid, Arc::new(member));
            }
        }

        let _ = self.overlay.set(overlay);
        let _ = self.part_of.set(part_of);
        let _ = self.members.set(members);
        Ok(())
    }

    async fn connect_servers(&self) {
        let mut peers = Vec::with_capacity(self.params.num_servers);
        for id in 0..self.params.num_servers {
            peers.push(self.net.connect_server(id).await);
        }
        let _ = self.peers.set(peers);

        if self.params.mode == Mode::Trap {
            let mut trustees = Vec::with_capacity(self.params.num_trustees);
            for id in 0..self.params.num_trustees {
                trustees.push(self.net.connect_trustee(id).await);
            }
            let _ = self.trustees.set(trustees);
        }
        let _ = self.connected.0.send(true);
    }

    /// Drive the Pedersen DKG for every threshold group, then derive the
    /// group keys.
    async fn gen_member_keys(&self) -> Result<(), ProtocolError> {
        if self.params.uses_threshold_keys() {
            for member in self.members().values() {
                let session = member
                    .share
                    .as_ref()
                    .expect("threshold groups carry a DKG session");
                for (gidx, &other) in member.group.members.iter().enumerate() {
                    if other == self.id {
                        continue;
                    }
                    let deal = session
                        .deal_for(gidx)
                        .expect("a deal exists for every other member");
                    self.peer(other)
                        .deal(DealArgs {
                            uid: member.group.uid,
                            deal,
                        })
                        .await?;
                }
            }
        }

        for member in self.members().values() {
            member.gen_member_key().await?;
        }
        Ok(())
    }

    async fn setup_group_keys(&self) {
        for member in self.members().values() {
            // The group's first member registers on its behalf.
            if member.group.members[0] != self.id {
                continue;
            }
            for directory in &self.directories {
                directory.register_group(
                    member.group.level,
                    member.group.gid,
                    member.group_key(),
                );
            }
        }

        let matrix = self.directories[0].group_keys().await;
        let _ = self.group_keys.set(matrix);
        let _ = self.setup_done.0.send(true);
    }

    fn members(&self) -> &HashMap<u64, Arc<Member<C>>> {
        self.members.get().expect("members are built during setup")
    }

    fn peer(&self, id: usize) -> Arc<dyn ServerRpc<C>> {
        self.peers.get().expect("peers are connected during setup")[id].clone()
    }

    fn member_at(&self, level: usize, gid: usize) -> Result<Arc<Member<C>>, ProtocolError> {
        let uid = self
            .part_of
            .get()
            .and_then(|part_of| part_of[level][gid])
            .ok_or(ProtocolError::UnknownGroup { level, gid })?;
        self.member_by_uid(uid)
    }

    fn member_by_uid(&self, uid: u64) -> Result<Arc<Member<C>>, ProtocolError> {
        self.members()
            .get(&uid)
            .cloned()
            .ok_or(ProtocolError::UnknownGroup { level: 0, gid: 0 })
    }

    /// Group keys of the neighbor groups, or the null key at the last
    /// level where the final layer is stripped.
    fn neighbor_keys(&self, member: &Member<C>) -> Vec<C> {
        if member.group.adj.is_empty() {
            return vec![null_key()];
        }
        let matrix = self
            .group_keys
            .get()
            .expect("group keys are fetched during setup");
        member
            .group
            .adj
            .iter()
            .map(|&(level, gid)| matrix[level][gid])
            .collect()
    }

    async fn wait_connected(&self) {
        let mut rx = self.connected.1.clone();
        let _ = rx.wait_for(|&connected| connected).await;
    }

    async fn wait_ready(&self) {
        let mut rx = self.setup_done.1.clone();
        let _ = rx.wait_for(|&done| done).await;
    }

    // ---- DKG plumbing -------------------------------------------------

    async fn handle_deal(&self, args: DealArgs<C>) -> Result<(), ProtocolError> {
        self.wait_connected().await;
        let member = self.member_by_uid(args.uid)?;
        let session = member
            .share
            .as_ref()
            .expect("deals only target threshold groups");
        let response = session.process_deal(&args.deal, member.group.uid)?;
        for &other in &member.group.members {
            if other == self.id {
                continue;
            }
            self.peer(other)
                .response(ResponseArgs {
                    uid: args.uid,
                    response,
                })
                .await?;
        }
        Ok(())
    }

    async fn handle_response(&self, args: ResponseArgs) -> Result<(), ProtocolError> {
        self.wait_connected().await;
        let member = self.member_by_uid(args.uid)?;
        let session = member
            .share
            .as_ref()
            .expect("responses only target threshold groups");
        session.process_response(args.response).await?;
        Ok(())
    }

    // ---- round driver -------------------------------------------------

    fn spawn_round_driver(server: Arc<Server<C>>, member: Arc<Member<C>>, info: ArgInfo) {
        let name = format!("round-{}-uid-{}", info.round, member.group.uid);
        spawn_phase(name, async move {
            let ciphertexts = member.ciphertexts(info.round).await;
            if member.uses_trap_mode() && info.level == 0 {
                member.commit_wait(info.round).await;
            }
            let args = ShuffleArgs { ciphertexts, info };
            if let Err(err) = server.shuffle_phase(args).await {
                tracing::error!(target: LOG_TARGET, id = server.id, error = %err, "round driver failed");
            }
        });
    }

    // ---- shuffle ------------------------------------------------------

    async fn shuffle_phase(&self, args: ShuffleArgs<C>) -> Result<(), ProtocolError> {
        let info = args.info.clone();
        if info.gid == 0 {
            tracing::debug!(
                target: LOG_TARGET,
                id = self.id,
                round = info.round,
                level = info.level,
                cur = info.cur,
                "shuffle"
            );
        }
        let member = self.member_at(info.level, info.gid)?;

        // Later members of the chain first drain the acknowledgements for
        // the previous member's proof.
        if self.params.mode == Mode::Verifiable && info.cur != info.group[0] {
            for _ in 0..info.group.len().saturating_sub(2) {
                if !member.deque_shuf_ok(info.round).await {
                    tracing::error!(target: LOG_TARGET, id = self.id, "bad shuffle proof acknowledged");
                    return Err(ProtocolError::PeerRejected);
                }
            }
        }

        let (result, proof) = match self.params.mode {
            Mode::Trap => (member.shuffle(args.ciphertexts.clone(), &mut crypto_rng()), None),
            Mode::Verifiable => {
                let (result, proof) = member.prove_shuffle(&args.ciphertexts, &mut crypto_rng())?;
                (result, Some(proof))
            }
        };

        if let Some(proof) = &proof {
            for &idx in &info.group {
                if idx == info.cur {
                    continue;
                }
                let verify = VerifyShuffleArgs {
                    old: args.ciphertexts.clone(),
                    new: result.clone(),
                    proof: proof.clone(),
                    info: info.clone(),
                };
                call(self.peer(member.group.members[idx]).verify_shuffle(verify)).await?;
            }
        }

        let last = info.group.last() == Some(&member.idx);
        if !last {
            let pos = info
                .group
                .iter()
                .position(|&g| g == member.idx)
                .ok_or(ProtocolError::PeerRejected)?;
            let next_idx = info.group[(pos + 1) % info.group.len()];
            let mut next_info = info;
            next_info.cur = next_idx;
            let next = member.group.members[next_idx];
            call(self.peer(next).shuffle(ShuffleArgs {
                ciphertexts: result,
                info: next_info,
            }))
            .await?;
        } else {
            let batches = member.divide(result)?;
            let first_idx = info.group[0];
            let mut next_info = info;
            next_info.cur = first_idx;
            let next = member.group.members[first_idx];
            call(self.peer(next).reencrypt(ReencryptArgs {
                batches,
                info: next_info,
            }))
            .await?;
        }
        Ok(())
    }

    async fn verify_shuffle_phase(
        &self,
        args: VerifyShuffleArgs<C>,
    ) -> Result<(), ProtocolError> {
        let info = args.info.clone();
        let member = self.member_at(info.level, info.gid)?;
        let ok = member.verify_shuffle(&args.old, &args.new, &args.proof);

        let prover_pos = info
            .group
            .iter()
            .position(|&g| g == info.cur)
            .ok_or(ProtocolError::PeerRejected)?;
        let next_idx = info.group[(prover_pos + 1) % info.group.len()];

        if next_idx == member.idx {
            // This verifier shuffles next; its own check suffices.
            if !ok {
                tracing::error!(target: LOG_TARGET, id = self.id, "bad shuffle proof");
                return Err(ProtocolError::PeerRejected);
            }
            return Ok(());
        }

        let verifier = member.idx;
        call(self.peer(member.group.members[next_idx]).shuffle_ok(ProofOkArgs {
            ok,
            verifier,
            info,
        }))
        .await?;
        Ok(())
    }

    // ---- re-encryption ------------------------------------------------

    async fn reencrypt_phase(
        &self,
        args: ReencryptArgs<C>,
    ) -> Result<(), ProtocolError> {
        let info = args.info.clone();
        if info.gid == 0 {
            tracing::debug!(
                target: LOG_TARGET,
                id = self.id,
                round = info.round,
                level = info.level,
                cur = info.cur,
                "reencrypt"
            );
        }
        let member = self.member_at(info.level, info.gid)?;
        let share = member.reencrypt_key(&info.group, &self.keypair.private);

        if self.params.mode == Mode::Verifiable && info.cur != info.group[0] {
            for _ in 0..info.group.len().saturating_sub(2) {
                if !member.deque_reenc_ok(info.round).await {
                    tracing::error!(target: LOG_TARGET, id = self.id, "bad reencrypt proof acknowledged");
                    return Err(ProtocolError::PeerRejected);
                }
            }
        }

        let neighbor_keys = self.neighbor_keys(&member);
        let (result, proofs) = match self.params.mode {
            Mode::Trap => (
                reencrypt_batches(&share, &neighbor_keys, args.batches.clone()),
                None,
            ),
            Mode::Verifiable => {
                let (result, proofs) =
                    prove_reencrypt_batches(&share, &neighbor_keys, args.batches.clone());
                (result, Some(proofs))
            }
        };

        if let Some(proofs) = &proofs {
            for &idx in &info.group {
                if idx == info.cur {
                    continue;
                }
                let verify = VerifyReencryptArgs {
                    old: args.batches.clone(),
                    new: result.clone(),
                    proofs: proofs.clone(),
                    info: info.clone(),
                };
                call(self.peer(member.group.members[idx]).verify_reencrypt(verify)).await?;
            }
        }

        let last = info.group.last() == Some(&member.idx);
        if !last {
            let pos = info
                .group
                .iter()
                .position(|&g| g == member.idx)
                .ok_or(ProtocolError::PeerRejected)?;
            let next_idx = info.group[(pos + 1) % info.group.len()];
            let mut next_info = info;
            next_info.cur = next_idx;
            let next = member.group.members[next_idx];
            call(self.peer(next).reencrypt(ReencryptArgs {
                batches: result,
                info: next_info,
            }))
            .await?;
        } else if info.level == self.params.num_levels - 1 {
            self.finalize_extract(&member, &info, result).await?;
        } else {
            self.forward_to_neighbors(&member, &info, result).await?;
        }
        Ok(())
    }

    async fn verify_reencrypt_phase(
        &self,
        args: VerifyReencryptArgs<C>,
    ) -> Result<(), ProtocolError> {
        let info = args.info.clone();
        let member = self.member_at(info.level, info.gid)?;
        let neighbor_keys = self.neighbor_keys(&member);
        let ok = match verify_reencrypt_batches(&args.old, &args.new, &args.proofs, &neighbor_keys)
        {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: LOG_TARGET, id = self.id, error = %err, "incorrect reencrypt proof");
                false
            }
        };

        let prover_pos = info
            .group
            .iter()
            .position(|&g| g == info.cur)
            .ok_or(ProtocolError::PeerRejected)?;
        let next_idx = info.group[(prover_pos + 1) % info.group.len()];

        if next_idx == member.idx {
            if !ok {
                tracing::error!(target: LOG_TARGET, id = self.id, "bad reencrypt proof");
                return Err(ProtocolError::PeerRejected);
            }
            return Ok(());
        }

        let verifier = member.idx;
        call(
            self.peer(member.group.members[next_idx]).reencrypt_ok(ProofOkArgs {
                ok,
                verifier,
                info,
            }),
        )
        .await?;
        Ok(())
    }

    // ---- forwarding and finalization ---------------------------------

    async fn forward_to_neighbors(
        &self,
        member: &Arc<Member<C>>,
        info: &ArgInfo,
        result: Vec<Vec<crate::crypto::Ciphertext<C>>>,
    ) -> Result<(), ProtocolError> {
        let overlay = self.overlay.get().expect("overlay is built during setup");
        for (batch, &(nlevel, ngid)) in result.into_iter().zip(&member.group.adj) {
            // Neighbors start a fresh re-encryption chain.
            let mut batch = batch;
            for ct in &mut batch {
                ct.clear_chain();
            }
            let neighbor = overlay.group(nlevel, ngid);
            let next_info = ArgInfo {
                round: info.round,
                level: nlevel,
                gid: ngid,
                cur: 0,
                group: (0..self.params.threshold).collect(),
            };
            for idx in 0..self.params.threshold {
                if self.params.mode == Mode::Trap && idx != next_info.cur {
                    continue;
                }
                let collect = CollectArgs {
                    id: member.group.gid,
                    ciphertexts: batch.clone(),
                    info: next_info.clone(),
                };
                call(self.peer(neighbor.members[idx]).collect(collect)).await?;
            }
        }
        Ok(())
    }

    async fn finalize_extract(
        &self,
        member: &Arc<Member<C>>,
        info: &ArgInfo,
        result: Vec<Vec<crate::crypto::Ciphertext<C>>>,
    ) -> Result<(), ProtocolError> {
        let msgs: Vec<Message<C>> = result
            .into_iter()
            .next()
            .unwrap_or_default()
            .iter()
            .map(|ct| ct.c.clone())
            .collect();

        match self.params.mode {
            Mode::Verifiable => {
                let plaintexts: Vec<Vec<u8>> = extract_plaintexts(&msgs)?
                    .into_iter()
                    .map(|(bytes, _)| bytes)
                    .collect();
                let args = FinalizeArgs {
                    plaintexts,
                    inners: Vec::new(),
                    traps: Vec::new(),
                    info: info.clone(),
                };
                for &other in &member.group.members {
                    call(self.peer(other).finalize(args.clone())).await?;
                }
            }
            Mode::Trap => {
                let extracted = extract_inner_and_traps(&msgs);
                if extracted.dropped > 0 {
                    tracing::warn!(
                        target: LOG_TARGET,
                        id = self.id,
                        round = info.round,
                        dropped = extracted.dropped,
                        "undecodable messages dropped at the last level"
                    );
                }

                let num_groups = self.params.num_groups;
                let mut inner_divs: Vec<Vec<InnerCiphertext<C>>> =
                    vec![Vec::new(); num_groups];
                for inner in extracted.inners {
                    let gid = select_group(&inner, num_groups);
                    inner_divs[gid].push(inner);
                }
                let mut trap_divs: Vec<Vec<crate::crypto::Trap>> = vec![Vec::new(); num_groups];
                for trap in extracted.traps {
                    let gid = trap.gid as usize;
                    if gid < num_groups {
                        trap_divs[gid].push(trap);
                    } else {
                        tracing::warn!(target: LOG_TARGET, gid, "trap names an unknown entry group");
                    }
                }

                // Entry groups hold the commitments and run the check.
                let overlay = self.overlay.get().expect("overlay is built during setup");
                for entry in &overlay.levels[0] {
                    let args = FinalizeArgs {
                        plaintexts: Vec::new(),
                        inners: inner_divs[entry.gid].clone(),
                        traps: trap_divs[entry.gid].clone(),
                        info: ArgInfo {
                            round: info.round,
                            level: 0,
                            gid: entry.gid,
                            cur: info.cur,
                            group: info.group.clone(),
                        },
                    };
                    for &idx in &info.group {
                        call(self.peer(entry.members[idx]).finalize(args.clone())).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn finalize_publish(
        &self,
        args: FinalizeArgs<C>,
    ) -> Result<(), ProtocolError> {
        let member = self.member_at(args.info.level, args.info.gid)?;
        if args.info.group.last() == Some(&member.idx) {
            self.db
                .write(args.info.round, self.params.num_groups, args.plaintexts)
                .await?;
            tracing::info!(
                target: LOG_TARGET,
                id = self.id,
                round = args.info.round,
                gid = args.info.gid,
                "round published"
            );
        }
        member.end_round(args.info.round);
        Ok(())
    }

    /// Trap-mode finalize at an entry group: cross-check traps against the
    /// stored commitments, report to every trustee, and decrypt the inner
    /// ciphertexts once the trustees release their key shares.
    async fn finalize_trap(
        &self,
        member: Arc<Member<C>>,
        info: ArgInfo,
    ) -> Result<(), ProtocolError> {
        let round = info.round;
        let (inners, traps) = member.results(round).await;

        let num_groups = self.params.num_groups;
        let mut correct_hash = true;
        let mut no_dups = true;
        let mut seen = HashSet::new();
        for inner in &inners {
            correct_hash &= select_group(inner, num_groups) == member.group.gid;
            no_dups &= seen.insert(inner.c.clone());
        }

        let received: Vec<Commitment> = traps.iter().map(commit).collect();
        let expected = member.commitments(round);
        let mut correct_traps = expected.len() == received.len();
        for commitment in &expected {
            correct_traps &= received.contains(commitment);
        }

        let report = ReportArgs {
            round,
            sid: self.id,
            uid: member.group.uid,
            correct_hash,
            correct_traps,
            no_dups,
            num_traps: traps.len(),
            num_msgs: inners.len(),
        };

        // Trustees release their shares only once every report arrived and
        // checked out; this blocks for the whole fan-in, so no timeout.
        let trustees = self
            .trustees
            .get()
            .expect("trustees are connected in trap mode")
            .clone();
        let mut shares = Vec::with_capacity(trustees.len());
        for trustee in &trustees {
            match trustee.report(report).await {
                Ok(reply) => shares.push(reply.private),
                Err(err) => {
                    tracing::error!(
                        target: LOG_TARGET,
                        id = self.id,
                        round,
                        error = %err,
                        "trustees withheld the round key"
                    );
                    member.end_round(round);
                    return Err(ProtocolError::RoundRejected(round));
                }
            }
        }

        let round_priv = combine_private_keys::<C>(&shares);
        let round_pub = self.directories[0].round_key(round).await;
        let nonce = cca2::round_nonce(round);
        let mut plaintexts = Vec::with_capacity(inners.len());
        for inner in &inners {
            plaintexts.push(cca2::decrypt(inner, &nonce, &round_priv, &round_pub)?);
        }

        if info.group.last() == Some(&member.idx) {
            self.db.write(round, num_groups, plaintexts).await?;
            tracing::info!(
                target: LOG_TARGET,
                id = self.id,
                round,
                gid = member.group.gid,
                num_msgs = inners.len(),
                "round published"
            );
        }
        member.end_round(round);
        Ok(())
    }
}

/// RPC adapter: handlers return immediately and run the heavy phases on
/// spawned tasks.
pub struct ServerHandle<C: CurveGroup + PointEncoding>(Arc<Server<C>>);

impl<C: CurveGroup + PointEncoding> ServerHandle<C> {
    pub fn new(server: Arc<Server<C>>) -> Self {
        Self(server)
    }
}

macro_rules! spawn_handler {
    ($server:expr, $name:expr, $phase:ident, $args:expr) => {{
        let server = Arc::clone(&$server);
        let args = $args;
        spawn_phase($name, async move {
            if let Err(err) = server.$phase(args).await {
                tracing::error!(target: LOG_TARGET, id = server.id, error = %err, "phase failed");
            }
        });
        Ok(())
    }};
}

#[async_trait]
impl<C: CurveGroup + PointEncoding> ServerRpc<C> for ServerHandle<C> {
    async fn deal(&self, args: DealArgs<C>) -> Result<(), RpcError> {
        spawn_handler!(self.0, "dkg-deal", handle_deal, args)
    }

    async fn response(&self, args: ResponseArgs) -> Result<(), RpcError> {
        spawn_handler!(self.0, "dkg-response", handle_response, args)
    }

    async fn submit(&self, args: SubmitArgs<C>) -> Result<(), RpcError> {
        let server = &self.0;
        server.wait_ready().await;
        let member = server
            .member_at(args.info.level, args.info.gid)
            .map_err(rpc_fault)?;

        if args.enc_proofs.len() != args.ciphertexts.len() {
            return Err(RpcError::Remote("missing encryption proofs".into()));
        }
        for (ct, proof) in args.ciphertexts.iter().zip(&args.enc_proofs) {
            verify_encrypt(member.group_key(), ct, proof).map_err(rpc_fault)?;
        }

        if server.params.mode == Mode::Trap && member.idx != args.info.cur {
            return Ok(());
        }
        if member.idx == args.info.cur && member.claim_driver(args.info.round) {
            Server::spawn_round_driver(Arc::clone(server), member.clone(), args.info.clone());
        }
        member.collect(args.info.round, args.ciphertexts);
        Ok(())
    }

    async fn commit(&self, args: CommitArgs) -> Result<(), RpcError> {
        let server = &self.0;
        server.wait_ready().await;
        let member = server
            .member_at(args.info.level, args.info.gid)
            .map_err(rpc_fault)?;
        if member.idx == args.info.cur && member.claim_driver(args.info.round) {
            Server::spawn_round_driver(Arc::clone(server), member.clone(), args.info.clone());
        }
        member.collect_commitments(args.info.round, args.commitments);
        Ok(())
    }

    async fn collect(&self, args: CollectArgs<C>) -> Result<(), RpcError> {
        let server = &self.0;
        server.wait_ready().await;
        let member = server
            .member_at(args.info.level, args.info.gid)
            .map_err(rpc_fault)?;
        if member.idx == args.info.cur && member.claim_driver(args.info.round) {
            Server::spawn_round_driver(Arc::clone(server), member.clone(), args.info.clone());
        }
        member.collect(args.info.round, args.ciphertexts);
        Ok(())
    }

    async fn shuffle(&self, args: ShuffleArgs<C>) -> Result<(), RpcError> {
        spawn_handler!(self.0, "shuffle", shuffle_phase, args)
    }

    async fn verify_shuffle(&self, args: VerifyShuffleArgs<C>) -> Result<(), RpcError> {
        spawn_handler!(self.0, "verify-shuffle", verify_shuffle_phase, args)
    }

    async fn shuffle_ok(&self, args: ProofOkArgs) -> Result<(), RpcError> {
        let member = self
            .0
            .member_at(args.info.level, args.info.gid)
            .map_err(rpc_fault)?;
        member.queue_shuf_ok(args.info.round, args.ok).await;
        Ok(())
    }

    async fn reencrypt(&self, args: ReencryptArgs<C>) -> Result<(), RpcError> {
        spawn_handler!(self.0, "reencrypt", reencrypt_phase, args)
    }

    async fn verify_reencrypt(&self, args: VerifyReencryptArgs<C>) -> Result<(), RpcError> {
        spawn_handler!(self.0, "verify-reencrypt", verify_reencrypt_phase, args)
    }

    async fn reencrypt_ok(&self, args: ProofOkArgs) -> Result<(), RpcError> {
        let member = self
            .0
            .member_at(args.info.level, args.info.gid)
            .map_err(rpc_fault)?;
        member.queue_reenc_ok(args.info.round, args.ok).await;
        Ok(())
    }

    async fn finalize(&self, args: FinalizeArgs<C>) -> Result<(), RpcError> {
        let server = &self.0;
        let member = server
            .member_at(args.info.level, args.info.gid)
            .map_err(rpc_fault)?;

        match server.params.mode {
            Mode::Verifiable => spawn_handler!(self.0, "finalize", finalize_publish, args),
            Mode::Trap => {
                if member.claim_finalize(args.info.round) {
                    let server = Arc::clone(server);
                    let info = args.info.clone();
                    let task_member = member.clone();
                    spawn_phase("finalize-trap", async move {
                        if let Err(err) = server.finalize_trap(task_member, info).await {
                            tracing::error!(target: LOG_TARGET, id = server.id, error = %err, "finalize failed");
                        }
                    });
                }
                member
                    .collect_result(args.info.round, args.inners, args.traps)
                    .await;
                Ok(())
            }
        }
    }

    async fn ping(&self) -> Result<(), RpcError> {
        Ok(())
    }
}
