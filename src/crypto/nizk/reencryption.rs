use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use rayon::prelude::*;

use crate::crypto::elgamal::{ensure_reencrypt_chain, regroup, Ciphertext};
use crate::crypto::error::CryptoError;
use crate::crypto::rand::crypto_rng;
use crate::crypto::transcript::Transcript;

const DOMAIN: &[u8] = b"atom/reencrypt-proof/v1";

/// Per-chunk representation proof for one re-encryption step:
/// `C' - C = (-h) * Y + r * B`, with `Y` the preserved original ephemeral
/// and `B` the neighbor group's key. `h` is this member's key share.
#[derive(Clone, Debug, CanonicalSerialize, CanonicalDeserialize)]
pub struct ReencryptionProof<C: CurveGroup> {
    pub t: Vec<C>,
    pub z_h: Vec<C::ScalarField>,
    pub z_r: Vec<C::ScalarField>,
}

/// Re-encrypt one ciphertext and prove every chunk's step.
pub fn prove_reencrypt<C: CurveGroup, R: Rng>(
    share: &C::ScalarField,
    neighbor_key: C,
    mut ct: Ciphertext<C>,
    rng: &mut R,
) -> (Ciphertext<C>, ReencryptionProof<C>) {
    ensure_reencrypt_chain(&mut ct);
    let generator = C::generator();
    let neg_h = -*share;

    let mut proof = ReencryptionProof {
        t: Vec::with_capacity(ct.chunks()),
        z_h: Vec::with_capacity(ct.chunks()),
        z_r: Vec::with_capacity(ct.chunks()),
    };

    for idx in 0..ct.chunks() {
        let stripped = ct.c[idx] - ct.y[idx] * *share;
        let blind = C::ScalarField::rand(rng);
        let new_c = stripped + neighbor_key * blind;
        let delta = new_c - ct.c[idx];

        let w_h = C::ScalarField::rand(rng);
        let w_r = C::ScalarField::rand(rng);
        let t = ct.y[idx] * w_h + neighbor_key * w_r;
        let c = challenge(&ct.y[idx], &neighbor_key, &delta, &t);

        proof.t.push(t);
        proof.z_h.push(w_h + c * neg_h);
        proof.z_r.push(w_r + c * blind);

        ct.r[idx] += generator * blind;
        ct.c[idx] = new_c;
    }
    (ct, proof)
}

/// Verify one re-encryption step between `old` and `new`.
pub fn verify_reencrypt<C: CurveGroup>(
    neighbor_key: C,
    old: &Ciphertext<C>,
    new: &Ciphertext<C>,
    proof: &ReencryptionProof<C>,
) -> Result<(), CryptoError> {
    let m = new.chunks();
    if old.chunks() != m
        || new.y.len() != m
        || proof.t.len() != m
        || proof.z_h.len() != m
        || proof.z_r.len() != m
    {
        return Err(CryptoError::ReencProofInvalid);
    }
    for idx in 0..m {
        let delta = new.c[idx] - old.c[idx];
        let c = challenge(&new.y[idx], &neighbor_key, &delta, &proof.t[idx]);
        let lhs = new.y[idx] * proof.z_h[idx] + neighbor_key * proof.z_r[idx];
        let rhs = proof.t[idx] + delta * c;
        if lhs != rhs {
            return Err(CryptoError::ReencProofInvalid);
        }
    }
    Ok(())
}

/// Re-encrypt neighbor-bound sub-batches in parallel with proofs attached,
/// preserving positional order.
pub fn prove_reencrypt_batches<C: CurveGroup>(
    share: &C::ScalarField,
    neighbor_keys: &[C],
    batches: Vec<Vec<Ciphertext<C>>>,
) -> (Vec<Vec<Ciphertext<C>>>, Vec<Vec<ReencryptionProof<C>>>) {
    let shape: Vec<usize> = batches.iter().map(Vec::len).collect();
    let flat: Vec<(usize, Ciphertext<C>)> = batches
        .into_iter()
        .enumerate()
        .flat_map(|(b, cs)| cs.into_iter().map(move |ct| (b, ct)))
        .collect();

    let done: Vec<(Ciphertext<C>, ReencryptionProof<C>)> = flat
        .into_par_iter()
        .map(|(b, ct)| prove_reencrypt(share, neighbor_keys[b], ct, &mut crypto_rng()))
        .collect();

    let (cts, proofs): (Vec<_>, Vec<_>) = done.into_iter().unzip();
    (regroup(cts, &shape), regroup(proofs, &shape))
}

/// Verify a full set of re-encrypted sub-batches against their originals.
pub fn verify_reencrypt_batches<C: CurveGroup>(
    old: &[Vec<Ciphertext<C>>],
    new: &[Vec<Ciphertext<C>>],
    proofs: &[Vec<ReencryptionProof<C>>],
    neighbor_keys: &[C],
) -> Result<(), CryptoError> {
    if new.len() != old.len() || proofs.len() != old.len() || neighbor_keys.len() != old.len() {
        return Err(CryptoError::ReencProofInvalid);
    }
    for b in 0..new.len() {
        if new[b].len() != old[b].len() || proofs[b].len() != old[b].len() {
            return Err(CryptoError::ReencProofInvalid);
        }
        for i in 0..new[b].len() {
            verify_reencrypt(neighbor_keys[b], &old[b][i], &new[b][i], &proofs[b][i])?;
        }
    }
    Ok(())
}

fn challenge<C: CurveGroup>(y: &C, base: &C, delta: &C, t: &C) -> C::ScalarField {
    let mut tr = Transcript::new(DOMAIN);
    tr.append_point(b"y", y);
    tr.append_point(b"base", base);
    tr.append_point(b"delta", delta);
    tr.append_point(b"t", t);
    tr.challenge_scalar(b"c")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::encrypt;
    use crate::crypto::embed::gen_rand_msg;
    use crate::crypto::{null_key, Curve, KeyPair};
    use ark_ec::Group;
    use ark_std::test_rng;

    #[test]
    fn proven_reencryption_verifies_and_strips_layer() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(2, &mut rng);
        let ct = encrypt(keypair.public, &msg, &mut rng);

        let (out, proof) =
            prove_reencrypt(&keypair.private, null_key::<Curve>(), ct.clone(), &mut rng);
        // The verifier sees the original in chain form.
        let mut chained = ct;
        ensure_reencrypt_chain(&mut chained);
        verify_reencrypt(null_key::<Curve>(), &chained, &out, &proof).unwrap();
        assert_eq!(out.c, msg);
    }

    #[test]
    fn tampered_output_is_rejected() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let neighbor = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(1, &mut rng);
        let mut ct = encrypt(keypair.public, &msg, &mut rng);

        let (mut out, proof) =
            prove_reencrypt(&keypair.private, neighbor.public, ct.clone(), &mut rng);
        ensure_reencrypt_chain(&mut ct);

        out.c[0] = out.c[0].double();
        assert!(verify_reencrypt(neighbor.public, &ct, &out, &proof).is_err());
    }

    #[test]
    fn tampered_proof_is_rejected() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let neighbor = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(1, &mut rng);
        let mut ct = encrypt(keypair.public, &msg, &mut rng);

        let (out, proof) =
            prove_reencrypt(&keypair.private, neighbor.public, ct.clone(), &mut rng);
        ensure_reencrypt_chain(&mut ct);

        let mut bad = proof.clone();
        bad.z_h[0] = bad.z_h[0] + bad.z_h[0];
        assert!(verify_reencrypt(neighbor.public, &ct, &out, &bad).is_err());

        let mut bad = proof;
        bad.t[0] = bad.t[0].double();
        assert!(verify_reencrypt(neighbor.public, &ct, &out, &bad).is_err());
    }

    #[test]
    fn batch_round_trip_with_proofs() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let neighbors: Vec<KeyPair<Curve>> =
            (0..2).map(|_| KeyPair::generate(&mut rng)).collect();
        let neighbor_keys: Vec<Curve> = neighbors.iter().map(|k| k.public).collect();

        let batches: Vec<Vec<Ciphertext<Curve>>> = (0..2)
            .map(|_| {
                (0..3)
                    .map(|_| {
                        let msg = gen_rand_msg::<Curve, _>(1, &mut rng);
                        encrypt(keypair.public, &msg, &mut rng)
                    })
                    .collect()
            })
            .collect();

        let mut chained = batches.clone();
        for batch in &mut chained {
            for ct in batch.iter_mut() {
                ensure_reencrypt_chain(ct);
            }
        }

        let (out, proofs) =
            prove_reencrypt_batches(&keypair.private, &neighbor_keys, batches);
        verify_reencrypt_batches(&chained, &out, &proofs, &neighbor_keys).unwrap();
    }
}
