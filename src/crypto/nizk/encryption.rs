use ark_ec::CurveGroup;
use ark_ff::{PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use rayon::prelude::*;

use crate::crypto::elgamal::Ciphertext;
use crate::crypto::error::CryptoError;
use crate::crypto::rand::{crypto_rng, sha3_256};

/// Schnorr-style proof that each `(R_i, C_i - M_i)` shares a discrete log
/// under bases `G` and `X`. One `(S, u)` pair per message chunk.
#[derive(Clone, Debug, CanonicalSerialize, CanonicalDeserialize)]
pub struct EncryptionProof<C: CurveGroup> {
    pub s: Vec<C>,
    pub u: Vec<C::ScalarField>,
}

/// Encrypt a message and prove knowledge of the per-chunk randomness.
pub fn prove_encrypt<C: CurveGroup, R: Rng>(
    public_key: C,
    msg: &[C],
    rng: &mut R,
) -> (Ciphertext<C>, EncryptionProof<C>) {
    let generator = C::generator();
    let mut ct = Ciphertext {
        r: Vec::with_capacity(msg.len()),
        c: Vec::with_capacity(msg.len()),
        y: Vec::new(),
    };
    let mut proof = EncryptionProof {
        s: Vec::with_capacity(msg.len()),
        u: Vec::with_capacity(msg.len()),
    };

    for chunk in msg {
        let r = C::ScalarField::rand(rng);
        let big_r = generator * r;
        let big_c = *chunk + public_key * r;

        let s = C::ScalarField::rand(rng);
        let big_s = generator * s;
        let t = challenge(&big_c, &big_s, &public_key);
        let u = s + t * r;

        ct.r.push(big_r);
        ct.c.push(big_c);
        proof.s.push(big_s);
        proof.u.push(u);
    }
    (ct, proof)
}

/// Verify an encryption proof against the submitted ciphertext. The
/// verifier never sees the plaintext; the proof binds the randomness to
/// `R_i` under the fixed base.
pub fn verify_encrypt<C: CurveGroup>(
    public_key: C,
    ct: &Ciphertext<C>,
    proof: &EncryptionProof<C>,
) -> Result<(), CryptoError> {
    if proof.s.len() != ct.chunks() || proof.u.len() != ct.chunks() || ct.r.len() != ct.chunks() {
        return Err(CryptoError::EncProofInvalid);
    }
    let generator = C::generator();
    for idx in 0..ct.chunks() {
        let t = challenge(&ct.c[idx], &proof.s[idx], &public_key);
        let lhs = generator * proof.u[idx];
        let rhs = proof.s[idx] + ct.r[idx] * t;
        if lhs != rhs {
            return Err(CryptoError::EncProofInvalid);
        }
    }
    Ok(())
}

/// Encrypt-and-prove a batch in parallel, preserving order.
pub fn prove_encrypt_batch<C: CurveGroup>(
    public_key: C,
    msgs: &[Vec<C>],
) -> Vec<(Ciphertext<C>, EncryptionProof<C>)> {
    msgs.par_iter()
        .map(|msg| prove_encrypt(public_key, msg, &mut crypto_rng()))
        .collect()
}

/// Challenge scalar `t = SHA3-256(C_i || S_i || X)` over compressed point
/// encodings, interpreted little-endian modulo the group order.
fn challenge<C: CurveGroup>(c: &C, s: &C, x: &C) -> C::ScalarField {
    let mut input = Vec::with_capacity(3 * c.compressed_size());
    c.serialize_compressed(&mut input)
        .expect("point serialization into a Vec cannot fail");
    s.serialize_compressed(&mut input)
        .expect("point serialization into a Vec cannot fail");
    x.serialize_compressed(&mut input)
        .expect("point serialization into a Vec cannot fail");
    C::ScalarField::from_le_bytes_mod_order(&sha3_256(&input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::embed::gen_rand_msg;
    use crate::crypto::{decrypt, Curve, KeyPair};
    use ark_ec::Group;
    use ark_std::test_rng;

    #[test]
    fn proof_verifies_and_decrypts() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(3, &mut rng);
        let (ct, proof) = prove_encrypt(keypair.public, &msg, &mut rng);
        verify_encrypt(keypair.public, &ct, &proof).unwrap();
        assert_eq!(decrypt(&keypair.private, &ct), msg);
    }

    #[test]
    fn tampered_proof_is_rejected() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(2, &mut rng);
        let (ct, proof) = prove_encrypt(keypair.public, &msg, &mut rng);

        let mut bad = proof.clone();
        bad.s[1] = bad.s[1].double();
        assert!(verify_encrypt(keypair.public, &ct, &bad).is_err());

        let mut bad = proof.clone();
        bad.u[0] = bad.u[0] + bad.u[0];
        assert!(verify_encrypt(keypair.public, &ct, &bad).is_err());

        let mut bad_ct = ct.clone();
        bad_ct.r[0] = bad_ct.r[0].double();
        assert!(verify_encrypt(keypair.public, &bad_ct, &proof).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let other = KeyPair::<Curve>::generate(&mut rng);
        let msg = gen_rand_msg::<Curve, _>(1, &mut rng);
        let (ct, proof) = prove_encrypt(keypair.public, &msg, &mut rng);
        assert!(verify_encrypt(other.public, &ct, &proof).is_err());
    }

    #[test]
    fn batch_matches_single(){
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let msgs: Vec<_> = (0..4).map(|_| gen_rand_msg::<Curve, _>(2, &mut rng)).collect();
        let proven = prove_encrypt_batch(keypair.public, &msgs);
        assert_eq!(proven.len(), 4);
        for (i, (ct, proof)) in proven.iter().enumerate() {
            verify_encrypt(keypair.public, ct, proof).unwrap();
            assert_eq!(decrypt(&keypair.private, ct), msgs[i]);
        }
    }
}
