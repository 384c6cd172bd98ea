//! Clients encode plaintexts into group-element messages, encrypt them
//! under their entry group's joint key with proofs, and submit. In trap
//! mode each submission is accompanied by an equal number of committed
//! trap messages.

use std::sync::Arc;

use ark_ec::CurveGroup;
use rand::RngCore;

use crate::config::{Mode, SystemConfig};
use crate::crypto::embed::{gen_msgs, trap_to_message, Message, PointEncoding};
use crate::crypto::nizk::encryption::prove_encrypt_batch;
use crate::crypto::rand::crypto_rng;
use crate::crypto::{cca2, commit, Commitment, Trap};
use crate::directory::{combined_seed, Directory};
use crate::rpc::{call, ArgInfo, CommitArgs, DbRpc, LocalNetwork, ServerRpc, SubmitArgs};
use crate::server::ProtocolError;
use crate::topology::{generate_groups, Overlay};

const LOG_TARGET: &str = "atom::client";

pub struct Client<C: CurveGroup + PointEncoding> {
    id: usize,
    params: SystemConfig,
    directories: Vec<Arc<Directory<C>>>,
    net: Arc<LocalNetwork<C>>,
    db: Arc<dyn DbRpc>,

    overlay: Option<Overlay<C>>,
    group_keys: Vec<Vec<C>>,
}

impl<C: CurveGroup + PointEncoding> Client<C> {
    pub fn new(
        id: usize,
        directories: Vec<Arc<Directory<C>>>,
        net: Arc<LocalNetwork<C>>,
        db: Arc<dyn DbRpc>,
    ) -> Self {
        let params = directories[0].params();
        Self {
            id,
            params,
            directories,
            net,
            db,
            overlay: None,
            group_keys: Vec::new(),
        }
    }

    /// Fetch the directory, rebuild the overlay from the shared seed, and
    /// pick up the registered group keys.
    pub async fn setup(&mut self) {
        let snapshot = self.directories[0].directory().await;
        let seed = combined_seed(&self.directories);
        self.overlay = Some(generate_groups(seed, &self.params, &snapshot.server_keys));
        self.group_keys = self.directories[0].group_keys().await;
    }

    /// Random plaintexts of the configured size, one per message slot.
    pub fn gen_rand_plaintexts(&self) -> Vec<Vec<u8>> {
        let mut rng = crypto_rng();
        (0..self.params.num_msgs)
            .map(|_| {
                let mut plaintext = vec![0u8; self.params.msg_size];
                rng.fill_bytes(&mut plaintext);
                plaintext
            })
            .collect()
    }

    /// Submit one round's worth of plaintexts through entry group `gid`.
    pub async fn submit(
        &self,
        gid: usize,
        round: u32,
        plaintexts: &[Vec<u8>],
    ) -> Result<(), ProtocolError> {
        let mut rng = crypto_rng();
        let mut msgs = self.generate_messages(round, plaintexts, &mut rng).await?;

        if self.params.mode == Mode::Trap {
            let traps = self.generate_traps(gid as u32, &mut rng);
            for trap in &traps {
                msgs.push(trap_to_message(trap, self.trap_points(), &mut rng)?);
            }
            tracing::debug!(target: LOG_TARGET, id = self.id, round, "committing traps");
            let commitments: Vec<Commitment> = traps.iter().map(commit).collect();
            self.commit(gid, round, commitments).await?;
        }

        self.submit_messages(gid, round, msgs).await
    }

    /// Read back the round's published plaintexts; blocks until every
    /// entry group has contributed.
    pub async fn download_msgs(&self, round: u32) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let msgs = self.db.read(round, self.params.num_groups).await?;
        tracing::info!(
            target: LOG_TARGET,
            id = self.id,
            round,
            num_msgs = msgs.len(),
            "downloaded round"
        );
        Ok(msgs)
    }

    async fn generate_messages<R: rand::Rng>(
        &self,
        round: u32,
        plaintexts: &[Vec<u8>],
        rng: &mut R,
    ) -> Result<Vec<Message<C>>, ProtocolError> {
        match self.params.mode {
            Mode::Verifiable => Ok(gen_msgs(plaintexts, rng)?),
            Mode::Trap => {
                // Hybrid-encrypt towards the trustees' round key; the
                // mixnet only ever sees the inner ciphertexts.
                let round_key = self.directories[0].round_key(round).await;
                let nonce = cca2::round_nonce(round);
                let mut msgs = Vec::with_capacity(plaintexts.len());
                for plaintext in plaintexts {
                    let inner = cca2::encrypt(plaintext, &nonce, round_key, rng)?;
                    let mut msg = vec![inner.r];
                    msg.extend(crate::crypto::embed::gen_msg::<C, _>(&inner.c, rng)?);
                    msgs.push(msg);
                }
                Ok(msgs)
            }
        }
    }

    fn generate_traps<R: rand::Rng>(&self, gid: u32, rng: &mut R) -> Vec<Trap> {
        (0..self.params.num_msgs)
            .map(|_| Trap::generate(gid, rng))
            .collect()
    }

    fn trap_points(&self) -> usize {
        let len = C::EMBED_LEN;
        self.params.msg_size.div_ceil(len).max(1)
    }

    fn entry_info(&self, gid: usize, round: u32) -> ArgInfo {
        ArgInfo {
            round,
            level: 0,
            gid,
            cur: 0,
            group: (0..self.params.threshold).collect(),
        }
    }

    async fn submit_messages(
        &self,
        gid: usize,
        round: u32,
        msgs: Vec<Message<C>>,
    ) -> Result<(), ProtocolError> {
        let overlay = self.overlay.as_ref().expect("client setup ran");
        let group = overlay.group(0, gid);
        let group_key = self.group_keys[0][gid];

        let proven = prove_encrypt_batch(group_key, &msgs);
        let (ciphertexts, enc_proofs): (Vec<_>, Vec<_>) = proven.into_iter().unzip();

        let info = self.entry_info(gid, round);
        let args = SubmitArgs {
            id: self.id,
            ciphertexts,
            enc_proofs,
            info: info.clone(),
        };
        for &idx in &info.group {
            let server = self.net.connect_server(group.members[idx]).await;
            call(server.submit(args.clone())).await?;
        }
        Ok(())
    }

    async fn commit(
        &self,
        gid: usize,
        round: u32,
        commitments: Vec<Commitment>,
    ) -> Result<(), ProtocolError> {
        let overlay = self.overlay.as_ref().expect("client setup ran");
        let group = overlay.group(0, gid);
        let info = self.entry_info(gid, round);
        let args = CommitArgs {
            id: self.id,
            commitments,
            info: info.clone(),
        };
        for &idx in &info.group {
            let server = self.net.connect_server(group.members[idx]).await;
            call(server.commit(args.clone())).await?;
        }
        Ok(())
    }
}
