//! RPC surface of the core: argument structs mirroring the wire messages,
//! the service traits each component implements, and the in-process
//! transport used by tests and single-machine deployments. A production
//! transport (TLS with length-prefixed frames) implements the same traits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ark_ec::CurveGroup;
use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::config::DEFAULT_TIMEOUT;
use crate::crypto::{
    Ciphertext, Commitment, EncryptionProof, InnerCiphertext, ReencryptionProof, ShuffleProof,
    ThresholdDeal, ThresholdResponse, Trap,
};

#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("rpc timed out")]
    Timeout,

    #[error("peer fault: {0}")]
    Remote(String),

    #[error("round rejected by trustee")]
    RoundRejected,
}

/// Apply the protocol-wide timeout to an outbound call. Expiry is fatal
/// for the caller's round; there are no retries.
pub async fn call<T>(fut: impl Future<Output = Result<T, RpcError>>) -> Result<T, RpcError> {
    match tokio::time::timeout(DEFAULT_TIMEOUT, fut).await {
        Ok(res) => res,
        Err(_) => Err(RpcError::Timeout),
    }
}

/// Routing information carried by most calls. `cur` and `group` are
/// indices within the group, not server ids.
#[derive(Clone, Debug)]
pub struct ArgInfo {
    pub round: u32,
    pub level: usize,
    pub gid: usize,
    pub cur: usize,
    pub group: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct DealArgs<C: CurveGroup> {
    pub uid: u64,
    pub deal: ThresholdDeal<C>,
}

#[derive(Clone, Copy, Debug)]
pub struct ResponseArgs {
    pub uid: u64,
    pub response: ThresholdResponse,
}

#[derive(Clone, Debug)]
pub struct SubmitArgs<C: CurveGroup> {
    pub id: usize,
    pub ciphertexts: Vec<Ciphertext<C>>,
    pub enc_proofs: Vec<EncryptionProof<C>>,
    pub info: ArgInfo,
}

#[derive(Clone, Debug)]
pub struct CommitArgs {
    pub id: usize,
    pub commitments: Vec<Commitment>,
    pub info: ArgInfo,
}

#[derive(Clone, Debug)]
pub struct CollectArgs<C: CurveGroup> {
    pub id: usize,
    pub ciphertexts: Vec<Ciphertext<C>>,
    pub info: ArgInfo,
}

#[derive(Clone, Debug)]
pub struct ShuffleArgs<C: CurveGroup> {
    pub ciphertexts: Vec<Ciphertext<C>>,
    pub info: ArgInfo,
}

#[derive(Clone, Debug)]
pub struct VerifyShuffleArgs<C: CurveGroup> {
    pub old: Vec<Ciphertext<C>>,
    pub new: Vec<Ciphertext<C>>,
    pub proof: ShuffleProof<C>,
    pub info: ArgInfo,
}

#[derive(Clone, Debug)]
pub struct ReencryptArgs<C: CurveGroup> {
    pub batches: Vec<Vec<Ciphertext<C>>>,
    pub info: ArgInfo,
}

#[derive(Clone, Debug)]
pub struct VerifyReencryptArgs<C: CurveGroup> {
    pub old: Vec<Vec<Ciphertext<C>>>,
    pub new: Vec<Vec<Ciphertext<C>>>,
    pub proofs: Vec<Vec<ReencryptionProof<C>>>,
    pub info: ArgInfo,
}

#[derive(Clone, Debug)]
pub struct ProofOkArgs {
    pub ok: bool,
    /// Group index of the verifier that produced this acknowledgement, so
    /// a deployment can bind acknowledgements to signers.
    pub verifier: usize,
    pub info: ArgInfo,
}

#[derive(Clone, Debug)]
pub struct FinalizeArgs<C: CurveGroup> {
    /// Verifiable mode only.
    pub plaintexts: Vec<Vec<u8>>,
    /// Trap mode only.
    pub inners: Vec<InnerCiphertext<C>>,
    pub traps: Vec<Trap>,
    pub info: ArgInfo,
}

#[derive(Clone, Copy, Debug)]
pub struct ReportArgs {
    pub round: u32,
    pub sid: usize,
    pub uid: u64,
    pub correct_hash: bool,
    pub correct_traps: bool,
    pub no_dups: bool,
    pub num_traps: usize,
    pub num_msgs: usize,
}

#[derive(Clone, Debug)]
pub struct ReportReply<C: CurveGroup> {
    pub private: C::ScalarField,
}

/// The mix server's RPC surface. Handlers return immediately; heavy work
/// happens on spawned tasks.
#[async_trait]
pub trait ServerRpc<C: CurveGroup>: Send + Sync {
    async fn deal(&self, args: DealArgs<C>) -> Result<(), RpcError>;
    async fn response(&self, args: ResponseArgs) -> Result<(), RpcError>;
    async fn submit(&self, args: SubmitArgs<C>) -> Result<(), RpcError>;
    async fn commit(&self, args: CommitArgs) -> Result<(), RpcError>;
    async fn collect(&self, args: CollectArgs<C>) -> Result<(), RpcError>;
    async fn shuffle(&self, args: ShuffleArgs<C>) -> Result<(), RpcError>;
    async fn verify_shuffle(&self, args: VerifyShuffleArgs<C>) -> Result<(), RpcError>;
    async fn shuffle_ok(&self, args: ProofOkArgs) -> Result<(), RpcError>;
    async fn reencrypt(&self, args: ReencryptArgs<C>) -> Result<(), RpcError>;
    async fn verify_reencrypt(&self, args: VerifyReencryptArgs<C>) -> Result<(), RpcError>;
    async fn reencrypt_ok(&self, args: ProofOkArgs) -> Result<(), RpcError>;
    async fn finalize(&self, args: FinalizeArgs<C>) -> Result<(), RpcError>;
    async fn ping(&self) -> Result<(), RpcError>;
}

/// Trustee surface: entry groups report their trap cross-check and block
/// for the trustee's key share.
#[async_trait]
pub trait TrusteeRpc<C: CurveGroup>: Send + Sync {
    async fn report(&self, args: ReportArgs) -> Result<ReportReply<C>, RpcError>;
}

/// Append-only message sink keyed on round.
#[async_trait]
pub trait DbRpc: Send + Sync {
    async fn write(
        &self,
        round: u32,
        num_groups: usize,
        msgs: Vec<Vec<u8>>,
    ) -> Result<(), RpcError>;

    /// Blocks until `num_groups` writers have contributed to the round.
    async fn read(&self, round: u32, num_groups: usize) -> Result<Vec<Vec<u8>>, RpcError>;
}

/// In-process transport: a registry the harness populates as components
/// come online. All parties must be reachable during initial setup, so
/// connection attempts retry until the peer registers.
pub struct LocalNetwork<C: CurveGroup> {
    servers: RwLock<Vec<Option<Arc<dyn ServerRpc<C>>>>>,
    trustees: RwLock<Vec<Option<Arc<dyn TrusteeRpc<C>>>>>,
}

impl<C: CurveGroup> LocalNetwork<C> {
    pub fn new(num_servers: usize, num_trustees: usize) -> Self {
        Self {
            servers: RwLock::new(vec![None; num_servers]),
            trustees: RwLock::new(vec![None; num_trustees]),
        }
    }

    pub fn register_server(&self, id: usize, server: Arc<dyn ServerRpc<C>>) {
        self.servers.write()[id] = Some(server);
    }

    pub fn register_trustee(&self, id: usize, trustee: Arc<dyn TrusteeRpc<C>>) {
        self.trustees.write()[id] = Some(trustee);
    }

    pub async fn connect_server(&self, id: usize) -> Arc<dyn ServerRpc<C>> {
        loop {
            if let Some(server) = self.servers.read()[id].clone() {
                return server;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn connect_trustee(&self, id: usize) -> Arc<dyn TrusteeRpc<C>> {
        loop {
            if let Some(trustee) = self.trustees.read()[id].clone() {
                return trustee;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
