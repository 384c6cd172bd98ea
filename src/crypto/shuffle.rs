use ark_ec::CurveGroup;
use ark_std::rand::Rng;
use rayon::prelude::*;

use super::elgamal::{reblind, Ciphertext};
use super::rand::crypto_rng;

/// Uniformly random permutation of `0..k` by Fisher-Yates swaps.
pub fn random_permutation<R: Rng>(k: usize, rng: &mut R) -> Vec<usize> {
    let mut pi: Vec<usize> = (0..k).collect();
    for i in (1..k).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        pi.swap(i, j);
    }
    pi
}

/// Reblind every ciphertext and return the batch in a uniformly random
/// order. The trap-mode shuffle: no proof attached.
pub fn shuffle<C: CurveGroup, R: Rng>(
    public_key: C,
    cs: Vec<Ciphertext<C>>,
    rng: &mut R,
) -> Vec<Ciphertext<C>> {
    let k = cs.len();
    let reblinded: Vec<Ciphertext<C>> = cs
        .into_par_iter()
        .map(|ct| reblind(public_key, &ct, &mut crypto_rng()))
        .collect();
    let pi = random_permutation(k, rng);
    pi.into_iter().map(|p| reblinded[p].clone()).collect()
}
