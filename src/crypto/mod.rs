//! Cryptographic layer: prime-order group primitives, ElGamal with NIZK
//! proofs, CCA2 hybrid encryption, trap commitments, and threshold DKG.

pub mod cca2;
pub mod commitment;
pub mod elgamal;
pub mod embed;
pub mod error;
pub mod keys;
pub mod nizk;
pub mod rand;
pub mod shuffle;
pub mod threshold;
pub mod transcript;

pub use cca2::InnerCiphertext;
pub use commitment::{commit, verify_commitment, Commitment, Trap};
pub use elgamal::{decrypt, encrypt, reblind, reencrypt, reencrypt_batches, Ciphertext};
pub use embed::{Message, MsgKind, PointEncoding};
pub use error::CryptoError;
pub use keys::{combine_private_keys, combine_public_keys, null_key, KeyPair};
pub use nizk::{
    prove_encrypt, prove_reencrypt_batches, prove_shuffle, verify_encrypt,
    verify_reencrypt_batches, verify_shuffle, EncryptionProof, ReencryptionProof, ShuffleProof,
};
pub use shuffle::shuffle;
pub use threshold::{lagrange_share, DistKeyShare, ThresholdDeal, ThresholdResponse, ThresholdSession};

/// Canonical curve for the deployment: Edwards-25519.
pub type Curve = ark_ed25519::EdwardsProjective;

/// Scalar field of the canonical curve.
pub type Scalar = ark_ed25519::Fr;
