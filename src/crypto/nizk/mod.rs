//! Non-interactive zero-knowledge proofs for the three mix operations:
//! client encryption, group shuffles, and chained re-encryption.

pub mod encryption;
pub mod reencryption;
pub mod shuffle;

pub use encryption::{prove_encrypt, prove_encrypt_batch, verify_encrypt, EncryptionProof};
pub use reencryption::{
    prove_reencrypt, prove_reencrypt_batches, verify_reencrypt, verify_reencrypt_batches,
    ReencryptionProof,
};
pub use shuffle::{prove_shuffle, verify_shuffle, ShuffleProof};
