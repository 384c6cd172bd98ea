use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use rayon::prelude::*;

use super::embed::Message;
use super::rand::crypto_rng;

/// ElGamal encryption of a multi-chunk message.
///
/// `r` and `c` hold one point per chunk. `y` is empty on a fresh
/// ciphertext; the first re-encryption moves the original ephemerals into
/// `y`, where they stay to bind the re-encryption NIZK for the rest of the
/// group's chain.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Ciphertext<C: CurveGroup> {
    pub r: Vec<C>,
    pub c: Vec<C>,
    pub y: Vec<C>,
}

impl<C: CurveGroup> Ciphertext<C> {
    pub fn chunks(&self) -> usize {
        self.c.len()
    }

    /// Drop the preserved ephemerals. Done before handing a batch to a
    /// neighboring group, which starts a fresh re-encryption chain.
    pub fn clear_chain(&mut self) {
        self.y.clear();
    }
}

/// Encrypt a message under `public_key` with fresh per-chunk randomness.
pub fn encrypt<C: CurveGroup, R: Rng>(
    public_key: C,
    msg: &[C],
    rng: &mut R,
) -> Ciphertext<C> {
    let generator = C::generator();
    let mut r = Vec::with_capacity(msg.len());
    let mut c = Vec::with_capacity(msg.len());
    for chunk in msg {
        let blind = C::ScalarField::rand(rng);
        r.push(generator * blind);
        c.push(*chunk + public_key * blind);
    }
    Ciphertext { r, c, y: Vec::new() }
}

/// Decrypt a fresh ciphertext with the matching private key.
pub fn decrypt<C: CurveGroup>(private_key: &C::ScalarField, ct: &Ciphertext<C>) -> Message<C> {
    ct.c
        .iter()
        .zip(&ct.r)
        .map(|(c, r)| *c - *r * *private_key)
        .collect()
}

/// Layer fresh randomness onto a ciphertext without changing its plaintext.
pub fn reblind<C: CurveGroup, R: Rng>(
    public_key: C,
    ct: &Ciphertext<C>,
    rng: &mut R,
) -> Ciphertext<C> {
    reblind_with_factors(public_key, ct, rng).0
}

/// Reblind and return the blinding factors, which the shuffle proof needs
/// as witnesses.
pub fn reblind_with_factors<C: CurveGroup, R: Rng>(
    public_key: C,
    ct: &Ciphertext<C>,
    rng: &mut R,
) -> (Ciphertext<C>, Vec<C::ScalarField>) {
    let generator = C::generator();
    let mut out = ct.clone();
    let mut factors = Vec::with_capacity(ct.chunks());
    for idx in 0..ct.chunks() {
        let blind = C::ScalarField::rand(rng);
        out.r[idx] += generator * blind;
        out.c[idx] += public_key * blind;
        factors.push(blind);
    }
    (out, factors)
}

/// Move the ephemerals into `y` at the start of a group's re-encryption
/// chain; `r` restarts from the identity.
pub fn ensure_reencrypt_chain<C: CurveGroup>(ct: &mut Ciphertext<C>) {
    if ct.y.is_empty() {
        ct.y = std::mem::take(&mut ct.r);
        ct.r = vec![C::zero(); ct.y.len()];
    }
}

/// Strip this member's share of the current encryption layer and add a
/// fresh layer under the neighbor's key.
pub fn reencrypt<C: CurveGroup, R: Rng>(
    share: &C::ScalarField,
    neighbor_key: C,
    mut ct: Ciphertext<C>,
    rng: &mut R,
) -> Ciphertext<C> {
    ensure_reencrypt_chain(&mut ct);
    let generator = C::generator();
    for idx in 0..ct.chunks() {
        let stripped = ct.c[idx] - ct.y[idx] * *share;
        let blind = C::ScalarField::rand(rng);
        ct.r[idx] += generator * blind;
        ct.c[idx] = stripped + neighbor_key * blind;
    }
    ct
}

/// Re-encrypt neighbor-bound sub-batches in parallel, each batch under its
/// neighbor's key. The positional order of every batch is preserved.
pub fn reencrypt_batches<C: CurveGroup>(
    share: &C::ScalarField,
    neighbor_keys: &[C],
    batches: Vec<Vec<Ciphertext<C>>>,
) -> Vec<Vec<Ciphertext<C>>> {
    let shape: Vec<usize> = batches.iter().map(Vec::len).collect();
    let flat: Vec<(usize, Ciphertext<C>)> = batches
        .into_iter()
        .enumerate()
        .flat_map(|(b, cs)| cs.into_iter().map(move |ct| (b, ct)))
        .collect();

    let done: Vec<Ciphertext<C>> = flat
        .into_par_iter()
        .map(|(b, ct)| reencrypt(share, neighbor_keys[b], ct, &mut crypto_rng()))
        .collect();

    regroup(done, &shape)
}

pub(crate) fn regroup<T>(mut flat: Vec<T>, shape: &[usize]) -> Vec<Vec<T>> {
    let mut out = Vec::with_capacity(shape.len());
    for &len in shape.iter().rev() {
        let tail = flat.split_off(flat.len() - len);
        out.push(tail);
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::embed::gen_rand_msg;
    use crate::crypto::{null_key, Curve, KeyPair};
    use ark_std::test_rng;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(3, &mut rng);
        let ct = encrypt(keypair.public, &msg, &mut rng);
        assert_eq!(decrypt(&keypair.private, &ct), msg);
    }

    #[test]
    fn reblind_preserves_plaintext() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(2, &mut rng);
        let ct = encrypt(keypair.public, &msg, &mut rng);
        let blinded = reblind(keypair.public, &ct, &mut rng);
        assert_ne!(blinded, ct);
        assert_eq!(decrypt(&keypair.private, &blinded), msg);
    }

    #[test]
    fn reencrypt_to_null_key_recovers_plaintext() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(2, &mut rng);
        let ct = encrypt(keypair.public, &msg, &mut rng);
        let out = reencrypt(&keypair.private, null_key::<Curve>(), ct, &mut rng);
        assert_eq!(out.c, msg);
        assert_eq!(out.y.len(), out.c.len());
    }

    #[test]
    fn reencrypt_chain_across_two_keys() {
        let mut rng = test_rng();
        let first = KeyPair::<Curve>::generate(&mut rng);
        let second = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(1, &mut rng);

        let ct = encrypt(first.public, &msg, &mut rng);
        let mut handed_over = reencrypt(&first.private, second.public, ct, &mut rng);
        // The neighbor starts a fresh chain.
        handed_over.clear_chain();
        let out = reencrypt(&second.private, null_key::<Curve>(), handed_over, &mut rng);
        assert_eq!(out.c, msg);
    }

    #[test]
    fn batched_reencryption_preserves_order() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let neighbors: Vec<KeyPair<Curve>> =
            (0..2).map(|_| KeyPair::generate(&mut rng)).collect();
        let msgs: Vec<_> = (0..6).map(|_| gen_rand_msg::<Curve, _>(1, &mut rng)).collect();
        let batches: Vec<Vec<Ciphertext<Curve>>> = msgs
            .chunks(3)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|m| encrypt(keypair.public, m, &mut rng))
                    .collect()
            })
            .collect();

        let neighbor_keys: Vec<Curve> = neighbors.iter().map(|k| k.public).collect();
        let out = reencrypt_batches(&keypair.private, &neighbor_keys, batches);
        assert_eq!(out.len(), 2);
        for (b, batch) in out.iter().enumerate() {
            for (i, ct) in batch.iter().enumerate() {
                let mut ct = ct.clone();
                ct.clear_chain();
                let opened = reencrypt(
                    &neighbors[b].private,
                    null_key::<Curve>(),
                    ct,
                    &mut rng,
                );
                assert_eq!(opened.c, msgs[b * 3 + i]);
            }
        }
    }
}
