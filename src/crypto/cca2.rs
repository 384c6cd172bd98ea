use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_serialize::CanonicalSerialize;
use ark_std::rand::Rng;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};

use super::error::CryptoError;
use super::rand::shake128_32;

/// AEAD nonce width. Round nonces are the round number padded with zeros.
pub const CCA2_NONCE_LEN: usize = 24;

/// CCA2 hybrid ciphertext: an ephemeral public point plus a symmetric
/// ciphertext under the SHAKE-derived shared key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InnerCiphertext<C: CurveGroup> {
    pub r: C,
    pub c: Vec<u8>,
}

/// Nonce used for all inner ciphertexts of a round.
pub fn round_nonce(round: u32) -> [u8; CCA2_NONCE_LEN] {
    let mut nonce = [0u8; CCA2_NONCE_LEN];
    nonce[..4].copy_from_slice(&round.to_le_bytes());
    nonce
}

/// Seal `plaintext` for the holder of the private key behind `public_key`.
pub fn encrypt<C: CurveGroup, R: Rng>(
    plaintext: &[u8],
    nonce: &[u8],
    public_key: C,
    rng: &mut R,
) -> Result<InnerCiphertext<C>, CryptoError> {
    let r = C::ScalarField::rand(rng);
    let ephemeral = C::generator() * r;
    let shared = public_key * r;
    let key = derive_key(&public_key, &shared)?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    let c = cipher
        .encrypt(XNonce::from_slice(&pad_nonce(nonce)), plaintext)
        .map_err(|_| CryptoError::Serialization)?;
    Ok(InnerCiphertext { r: ephemeral, c })
}

/// Open an inner ciphertext. Fails with `DecryptAuth` when any bit of the
/// ciphertext or the ephemeral point was altered.
pub fn decrypt<C: CurveGroup>(
    inner: &InnerCiphertext<C>,
    nonce: &[u8],
    private_key: &C::ScalarField,
    public_key: &C,
) -> Result<Vec<u8>, CryptoError> {
    let shared = inner.r * *private_key;
    let key = derive_key(public_key, &shared)?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(XNonce::from_slice(&pad_nonce(nonce)), inner.c.as_slice())
        .map_err(|_| CryptoError::DecryptAuth)
}

/// Shared key derivation: SHAKE128 over `pub || shared`.
fn derive_key<C: CurveGroup>(public_key: &C, shared: &C) -> Result<[u8; 32], CryptoError> {
    let mut input = Vec::with_capacity(public_key.compressed_size() + shared.compressed_size());
    public_key
        .serialize_compressed(&mut input)
        .map_err(|_| CryptoError::Serialization)?;
    shared
        .serialize_compressed(&mut input)
        .map_err(|_| CryptoError::Serialization)?;
    Ok(shake128_32(&input))
}

fn pad_nonce(nonce: &[u8]) -> [u8; CCA2_NONCE_LEN] {
    let mut padded = [0u8; CCA2_NONCE_LEN];
    let take = nonce.len().min(CCA2_NONCE_LEN);
    padded[..take].copy_from_slice(&nonce[..take]);
    padded
}
