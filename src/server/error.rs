use thiserror::Error;

use crate::crypto::CryptoError;
use crate::rpc::RpcError;

/// Fatal per-round protocol faults. The engine trades liveness for
/// verifiability: none of these are retried.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("server {sid} is not a member of group (level {level}, gid {gid})")]
    NotAMember { sid: usize, level: usize, gid: usize },

    #[error("no group at (level {level}, gid {gid}) for this server")]
    UnknownGroup { level: usize, gid: usize },

    #[error("batch of {len} does not divide into {parts} neighbor batches")]
    UnevenBatch { len: usize, parts: usize },

    #[error("peer reported a failing proof")]
    PeerRejected,

    #[error("round {0} rejected by trustees")]
    RoundRejected(u32),
}
