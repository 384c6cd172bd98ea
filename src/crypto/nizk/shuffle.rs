//! Verifiable pair shuffle.
//!
//! Proves that a batch of ElGamal ciphertexts was reblinded and permuted
//! without knowing the plaintexts. The argument composes three pieces per
//! point position, all over one Fiat-Shamir transcript:
//!
//! 1. a simple k-shuffle showing the committed vector `Y` is a
//!    gamma-scaled permutation of the public challenge vector `rho`,
//! 2. a multi-Schnorr link binding the committed scalars to the published
//!    output aggregates `Q_R`, `Q_C`,
//! 3. a representation proof tying those aggregates back to the public
//!    input aggregates and the reblinding sum under the same `(gamma, s)`.
//!
//! Soundness follows from the polynomial identity behind the simple
//! shuffle over the random `rho`, plus standard Schnorr extraction.

use ark_ec::CurveGroup;
use ark_ff::{Field, One, UniformRand, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use rayon::prelude::*;

use crate::crypto::elgamal::{reblind_with_factors, Ciphertext};
use crate::crypto::error::CryptoError;
use crate::crypto::rand::crypto_rng;
use crate::crypto::shuffle::random_permutation;
use crate::crypto::transcript::Transcript;

const DOMAIN: &[u8] = b"atom/shuffle-proof/v1";

/// Transcript of the shuffle argument for one point position.
#[derive(Clone, Debug, CanonicalSerialize, CanonicalDeserialize)]
pub struct PositionProof<C: CurveGroup> {
    gamma: C,
    y: Vec<C>,
    theta: Vec<C>,
    alpha: Vec<C::ScalarField>,
    q_r: C,
    q_c: C,
    w_g: Vec<C>,
    w_r: C,
    w_c: C,
    z: Vec<C::ScalarField>,
    t0: C,
    t1: C,
    t2: C,
    z_gamma: C::ScalarField,
    z_s: C::ScalarField,
}

/// One transcript per point position of the shuffled batch.
#[derive(Clone, Debug, CanonicalSerialize, CanonicalDeserialize)]
pub struct ShuffleProof<C: CurveGroup>(pub Vec<PositionProof<C>>);

/// Reblind, permute and prove. Returns the shuffled batch and one proof
/// transcript per point position, computed in parallel.
pub fn prove_shuffle<C: CurveGroup, R: Rng>(
    public_key: C,
    cs: &[Ciphertext<C>],
    rng: &mut R,
) -> Result<(Vec<Ciphertext<C>>, ShuffleProof<C>), CryptoError> {
    let k = cs.len();
    if k == 0 {
        return Err(CryptoError::EmptyBatch);
    }
    let m = cs[0].chunks();
    if cs.iter().any(|ct| ct.chunks() != m) {
        return Err(CryptoError::MixedChunkCounts);
    }

    let reblinded: Vec<(Ciphertext<C>, Vec<C::ScalarField>)> = cs
        .par_iter()
        .map(|ct| reblind_with_factors(public_key, ct, &mut crypto_rng()))
        .collect();

    let pi = random_permutation(k, rng);
    let outputs: Vec<Ciphertext<C>> = pi.iter().map(|&p| reblinded[p].0.clone()).collect();
    let blinds: Vec<&Vec<C::ScalarField>> = reblinded.iter().map(|(_, b)| b).collect();

    let proofs: Result<Vec<PositionProof<C>>, CryptoError> = (0..m)
        .into_par_iter()
        .map(|idx| prove_position(public_key, cs, &outputs, &pi, &blinds, idx))
        .collect();

    Ok((outputs, ShuffleProof(proofs?)))
}

/// Verify a shuffle proof against the old and new batches.
pub fn verify_shuffle<C: CurveGroup>(
    public_key: C,
    old: &[Ciphertext<C>],
    new: &[Ciphertext<C>],
    proof: &ShuffleProof<C>,
) -> Result<(), CryptoError> {
    let k = old.len();
    if k == 0 {
        return Err(CryptoError::EmptyBatch);
    }
    if new.len() != k {
        return Err(CryptoError::ShuffleProofInvalid("batch length mismatch"));
    }
    let m = old[0].chunks();
    if old.iter().chain(new).any(|ct| ct.chunks() != m) {
        return Err(CryptoError::MixedChunkCounts);
    }
    if proof.0.len() != m {
        return Err(CryptoError::ShuffleProofInvalid("missing position proofs"));
    }

    proof
        .0
        .par_iter()
        .enumerate()
        .map(|(idx, pos)| verify_position(public_key, old, new, idx, pos))
        .collect::<Result<Vec<()>, CryptoError>>()?;
    Ok(())
}

fn transcript_header<C: CurveGroup>(
    public_key: C,
    old: &[Ciphertext<C>],
    new: &[Ciphertext<C>],
    idx: usize,
) -> Transcript {
    let mut tr = Transcript::new(DOMAIN);
    tr.append_point(b"key", &public_key);
    tr.append_u64(b"position", idx as u64);
    let old_r: Vec<C> = old.iter().map(|ct| ct.r[idx]).collect();
    let old_c: Vec<C> = old.iter().map(|ct| ct.c[idx]).collect();
    let new_r: Vec<C> = new.iter().map(|ct| ct.r[idx]).collect();
    let new_c: Vec<C> = new.iter().map(|ct| ct.c[idx]).collect();
    tr.append_points(b"input-r", &old_r);
    tr.append_points(b"input-c", &old_c);
    tr.append_points(b"output-r", &new_r);
    tr.append_points(b"output-c", &new_c);
    tr
}

fn prove_position<C: CurveGroup>(
    public_key: C,
    old: &[Ciphertext<C>],
    new: &[Ciphertext<C>],
    pi: &[usize],
    blinds: &[&Vec<C::ScalarField>],
    idx: usize,
) -> Result<PositionProof<C>, CryptoError> {
    let mut rng = crypto_rng();
    let k = old.len();
    let generator = C::generator();

    let mut tr = transcript_header(public_key, old, new, idx);
    let rho: Vec<C::ScalarField> = tr.challenge_scalars(b"rho", k);

    // Committed gamma-scaled permutation of the challenge vector.
    let mut gamma = C::ScalarField::rand(&mut rng);
    while gamma.is_zero() {
        gamma = C::ScalarField::rand(&mut rng);
    }
    let y_scalars: Vec<C::ScalarField> = pi.iter().map(|&p| gamma * rho[p]).collect();
    let gamma_pt = generator * gamma;
    let y_pts: Vec<C> = y_scalars.iter().map(|y| generator * *y).collect();
    tr.append_point(b"gamma", &gamma_pt);
    tr.append_points(b"y", &y_pts);

    // Simple k-shuffle over the shifted scalars.
    let t: C::ScalarField = tr.challenge_scalar(b"shift");
    let x_hat: Vec<C::ScalarField> = rho.iter().map(|r| *r - t).collect();
    let y_hat: Vec<C::ScalarField> = y_scalars.iter().map(|y| *y - gamma * t).collect();

    let theta: Vec<C::ScalarField> = (0..2 * k - 1)
        .map(|_| C::ScalarField::rand(&mut rng))
        .collect();
    let mut theta_pts = Vec::with_capacity(2 * k);
    theta_pts.push(generator * (theta[0] * y_hat[0]));
    for i in 1..k {
        theta_pts.push(generator * (theta[i] * y_hat[i] - theta[i - 1] * x_hat[i]));
    }
    for i in k..2 * k - 1 {
        theta_pts.push(generator * (theta[i] - theta[i - 1] * gamma));
    }
    theta_pts.push(generator * (-(theta[2 * k - 2] * gamma)));
    tr.append_points(b"theta", &theta_pts);
    let c: C::ScalarField = tr.challenge_scalar(b"chain");

    let mut sigma = Vec::with_capacity(2 * k - 1);
    let mut acc = C::ScalarField::one();
    for i in 0..k {
        let inv = y_hat[i]
            .inverse()
            .ok_or(CryptoError::DegenerateChallenge)?;
        acc *= x_hat[i] * inv;
        sigma.push(acc);
    }
    for _ in k..2 * k - 1 {
        acc *= gamma;
        sigma.push(acc);
    }
    let alpha: Vec<C::ScalarField> = theta
        .iter()
        .zip(&sigma)
        .map(|(th, sg)| *th + c * *sg)
        .collect();

    // Link the committed scalars to the output aggregates.
    let out_r: Vec<C> = new.iter().map(|ct| ct.r[idx]).collect();
    let out_c: Vec<C> = new.iter().map(|ct| ct.c[idx]).collect();
    let w: Vec<C::ScalarField> = (0..k).map(|_| C::ScalarField::rand(&mut rng)).collect();
    let w_g: Vec<C> = w.iter().map(|wi| generator * *wi).collect();
    let w_r = multi_scalar(&w, &out_r);
    let w_c = multi_scalar(&w, &out_c);
    let q_r = multi_scalar(&y_scalars, &out_r);
    let q_c = multi_scalar(&y_scalars, &out_c);
    tr.append_point(b"q-r", &q_r);
    tr.append_point(b"q-c", &q_c);
    tr.append_points(b"w-g", &w_g);
    tr.append_point(b"w-r", &w_r);
    tr.append_point(b"w-c", &w_c);
    let d1: C::ScalarField = tr.challenge_scalar(b"link");
    let z: Vec<C::ScalarField> = w
        .iter()
        .zip(&y_scalars)
        .map(|(wi, yi)| *wi + d1 * *yi)
        .collect();

    // Tie the aggregates to the public input sums and the reblinding sum.
    let in_r: Vec<C> = old.iter().map(|ct| ct.r[idx]).collect();
    let in_c: Vec<C> = old.iter().map(|ct| ct.c[idx]).collect();
    let a_r = multi_scalar(&rho, &in_r);
    let a_c = multi_scalar(&rho, &in_c);
    let s: C::ScalarField = gamma
        * pi.iter()
            .map(|&p| rho[p] * blinds[p][idx])
            .fold(C::ScalarField::zero(), |acc, v| acc + v);

    let w_gamma = C::ScalarField::rand(&mut rng);
    let w_s = C::ScalarField::rand(&mut rng);
    let t0 = generator * w_gamma;
    let t1 = a_r * w_gamma + generator * w_s;
    let t2 = a_c * w_gamma + public_key * w_s;
    tr.append_point(b"t0", &t0);
    tr.append_point(b"t1", &t1);
    tr.append_point(b"t2", &t2);
    let d2: C::ScalarField = tr.challenge_scalar(b"aggregate");
    let z_gamma = w_gamma + d2 * gamma;
    let z_s = w_s + d2 * s;

    Ok(PositionProof {
        gamma: gamma_pt,
        y: y_pts,
        theta: theta_pts,
        alpha,
        q_r,
        q_c,
        w_g,
        w_r,
        w_c,
        z,
        t0,
        t1,
        t2,
        z_gamma,
        z_s,
    })
}

fn verify_position<C: CurveGroup>(
    public_key: C,
    old: &[Ciphertext<C>],
    new: &[Ciphertext<C>],
    idx: usize,
    proof: &PositionProof<C>,
) -> Result<(), CryptoError> {
    let k = old.len();
    let generator = C::generator();
    if proof.y.len() != k
        || proof.theta.len() != 2 * k
        || proof.alpha.len() != 2 * k - 1
        || proof.w_g.len() != k
        || proof.z.len() != k
    {
        return Err(CryptoError::ShuffleProofInvalid("malformed proof shape"));
    }

    let mut tr = transcript_header(public_key, old, new, idx);
    let rho: Vec<C::ScalarField> = tr.challenge_scalars(b"rho", k);
    tr.append_point(b"gamma", &proof.gamma);
    tr.append_points(b"y", &proof.y);
    let t: C::ScalarField = tr.challenge_scalar(b"shift");

    let x_hat: Vec<C::ScalarField> = rho.iter().map(|r| *r - t).collect();
    let y_hat: Vec<C> = proof.y.iter().map(|y| *y - proof.gamma * t).collect();

    tr.append_points(b"theta", &proof.theta);
    let c: C::ScalarField = tr.challenge_scalar(b"chain");

    // Telescoping chain of the simple k-shuffle.
    if y_hat[0] * proof.alpha[0] != proof.theta[0] + generator * (c * x_hat[0]) {
        return Err(CryptoError::ShuffleProofInvalid("chain head"));
    }
    for i in 1..k {
        let lhs = y_hat[i] * proof.alpha[i] - generator * (proof.alpha[i - 1] * x_hat[i]);
        if lhs != proof.theta[i] {
            return Err(CryptoError::ShuffleProofInvalid("chain link"));
        }
    }
    for i in k..2 * k - 1 {
        let lhs = generator * proof.alpha[i] - proof.gamma * proof.alpha[i - 1];
        if lhs != proof.theta[i] {
            return Err(CryptoError::ShuffleProofInvalid("gamma link"));
        }
    }
    if generator * c - proof.gamma * proof.alpha[2 * k - 2] != proof.theta[2 * k - 1] {
        return Err(CryptoError::ShuffleProofInvalid("chain tail"));
    }

    // Multi-Schnorr link to the output aggregates.
    let out_r: Vec<C> = new.iter().map(|ct| ct.r[idx]).collect();
    let out_c: Vec<C> = new.iter().map(|ct| ct.c[idx]).collect();
    tr.append_point(b"q-r", &proof.q_r);
    tr.append_point(b"q-c", &proof.q_c);
    tr.append_points(b"w-g", &proof.w_g);
    tr.append_point(b"w-r", &proof.w_r);
    tr.append_point(b"w-c", &proof.w_c);
    let d1: C::ScalarField = tr.challenge_scalar(b"link");
    for j in 0..k {
        if generator * proof.z[j] != proof.w_g[j] + proof.y[j] * d1 {
            return Err(CryptoError::ShuffleProofInvalid("link commitment"));
        }
    }
    if multi_scalar(&proof.z, &out_r) != proof.w_r + proof.q_r * d1 {
        return Err(CryptoError::ShuffleProofInvalid("link aggregate R"));
    }
    if multi_scalar(&proof.z, &out_c) != proof.w_c + proof.q_c * d1 {
        return Err(CryptoError::ShuffleProofInvalid("link aggregate C"));
    }

    // Representation proof on the input aggregates.
    let in_r: Vec<C> = old.iter().map(|ct| ct.r[idx]).collect();
    let in_c: Vec<C> = old.iter().map(|ct| ct.c[idx]).collect();
    let a_r = multi_scalar(&rho, &in_r);
    let a_c = multi_scalar(&rho, &in_c);
    tr.append_point(b"t0", &proof.t0);
    tr.append_point(b"t1", &proof.t1);
    tr.append_point(b"t2", &proof.t2);
    let d2: C::ScalarField = tr.challenge_scalar(b"aggregate");
    if generator * proof.z_gamma != proof.t0 + proof.gamma * d2 {
        return Err(CryptoError::ShuffleProofInvalid("aggregate gamma"));
    }
    if a_r * proof.z_gamma + generator * proof.z_s != proof.t1 + proof.q_r * d2 {
        return Err(CryptoError::ShuffleProofInvalid("aggregate R"));
    }
    if a_c * proof.z_gamma + public_key * proof.z_s != proof.t2 + proof.q_c * d2 {
        return Err(CryptoError::ShuffleProofInvalid("aggregate C"));
    }

    Ok(())
}

fn multi_scalar<C: CurveGroup>(scalars: &[C::ScalarField], points: &[C]) -> C {
    scalars
        .iter()
        .zip(points)
        .fold(C::zero(), |acc, (s, p)| acc + *p * *s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::{decrypt, encrypt};
    use crate::crypto::embed::gen_rand_msg;
    use crate::crypto::{Curve, KeyPair};
    use ark_ec::Group;
    use ark_std::test_rng;

    fn sample_batch(
        k: usize,
        m: usize,
        keypair: &KeyPair<Curve>,
        rng: &mut impl Rng,
    ) -> (Vec<Vec<Curve>>, Vec<Ciphertext<Curve>>) {
        let msgs: Vec<_> = (0..k).map(|_| gen_rand_msg::<Curve, _>(m, rng)).collect();
        let cts = msgs
            .iter()
            .map(|msg| encrypt(keypair.public, msg, rng))
            .collect();
        (msgs, cts)
    }

    #[test]
    fn honest_shuffle_verifies() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let (msgs, cts) = sample_batch(8, 2, &keypair, &mut rng);

        let (outputs, proof) = prove_shuffle(keypair.public, &cts, &mut rng).unwrap();
        verify_shuffle(keypair.public, &cts, &outputs, &proof).unwrap();

        // The shuffled batch still decrypts to the same multiset.
        let mut recovered: Vec<String> = outputs
            .iter()
            .map(|ct| format!("{:?}", decrypt(&keypair.private, ct).iter().map(|p| p.into_affine()).collect::<Vec<_>>()))
            .collect();
        let mut expected: Vec<String> = msgs
            .iter()
            .map(|m| format!("{:?}", m.iter().map(|p| p.into_affine()).collect::<Vec<_>>()))
            .collect();
        recovered.sort();
        expected.sort();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn single_ciphertext_shuffle_verifies() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let (_, cts) = sample_batch(1, 1, &keypair, &mut rng);
        let (outputs, proof) = prove_shuffle(keypair.public, &cts, &mut rng).unwrap();
        verify_shuffle(keypair.public, &cts, &outputs, &proof).unwrap();
    }

    #[test]
    fn unrelated_outputs_are_rejected() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let (_, cts) = sample_batch(4, 1, &keypair, &mut rng);
        let (mut outputs, proof) = prove_shuffle(keypair.public, &cts, &mut rng).unwrap();

        // Substitute one output with an unrelated encryption.
        let replacement = gen_rand_msg::<Curve, _>(1, &mut rng);
        outputs[2] = encrypt(keypair.public, &replacement, &mut rng);
        assert!(verify_shuffle(keypair.public, &cts, &outputs, &proof).is_err());
    }

    #[test]
    fn tampered_proof_is_rejected() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let (_, cts) = sample_batch(4, 1, &keypair, &mut rng);
        let (outputs, proof) = prove_shuffle(keypair.public, &cts, &mut rng).unwrap();

        let mut bad = proof.clone();
        bad.0[0].alpha[1] = bad.0[0].alpha[1] + bad.0[0].alpha[1];
        assert!(verify_shuffle(keypair.public, &cts, &outputs, &bad).is_err());

        let mut bad = proof.clone();
        bad.0[0].y[3] = bad.0[0].y[3].double();
        assert!(verify_shuffle(keypair.public, &cts, &outputs, &bad).is_err());

        let mut bad = proof.clone();
        bad.0[0].q_r = bad.0[0].q_r.double();
        assert!(verify_shuffle(keypair.public, &cts, &outputs, &bad).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let other = KeyPair::<Curve>::generate(&mut rng);
        let (_, cts) = sample_batch(4, 1, &keypair, &mut rng);
        let (outputs, proof) = prove_shuffle(keypair.public, &cts, &mut rng).unwrap();
        assert!(verify_shuffle(other.public, &cts, &outputs, &proof).is_err());
    }
}
