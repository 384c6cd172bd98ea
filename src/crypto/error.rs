use thiserror::Error;

/// Failures surfaced by the cryptographic layer. Proof failures are fatal
/// for the round that produced them; there is no local recovery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption proof rejected")]
    EncProofInvalid,

    #[error("shuffle proof rejected: {0}")]
    ShuffleProofInvalid(&'static str),

    #[error("re-encryption proof rejected")]
    ReencProofInvalid,

    #[error("inner ciphertext failed authentication")]
    DecryptAuth,

    #[error("could not embed message bytes into a group element")]
    EmbedFailed,

    #[error("point does not carry an embedded message")]
    MalformedEmbedding,

    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    #[error("degenerate Fiat-Shamir challenge")]
    DegenerateChallenge,

    #[error("empty ciphertext batch")]
    EmptyBatch,

    #[error("ciphertexts in a proven batch must have equal chunk counts")]
    MixedChunkCounts,

    #[error("dealer {dealer} share failed the commitment check at member {verifier}")]
    DkgShareInvalid { dealer: usize, verifier: usize },

    #[error("DKG justification from member {verifier} against dealer {dealer}")]
    DkgJustification { dealer: usize, verifier: usize },

    #[error("serialization failure")]
    Serialization,
}
