//! Pedersen-style distributed key generation: every member deals a
//! Feldman-verifiable sharing of a random secret to the rest of its group;
//! the joint key is the sum of all dealt secrets. Runs once per group at
//! setup when `threshold < per_group`.

use ark_ec::CurveGroup;
use ark_ff::{Field, One, PrimeField, UniformRand, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::cca2::{self, InnerCiphertext};
use super::error::CryptoError;
use super::keys::KeyPair;

const LOG_TARGET: &str = "atom::crypto::threshold";

/// An encrypted share of one dealer's secret polynomial, with Feldman
/// commitments to the coefficients.
#[derive(Clone, Debug)]
pub struct ThresholdDeal<C: CurveGroup> {
    pub dealer: usize,
    pub recipient: usize,
    pub commitments: Vec<C>,
    pub encrypted_share: InnerCiphertext<C>,
}

/// Broadcast approval (or complaint) for one processed deal.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdResponse {
    pub dealer: usize,
    pub verifier: usize,
    pub approved: bool,
}

/// The member's final share of the joint key.
#[derive(Clone, Debug)]
pub struct DistKeyShare<C: CurveGroup> {
    pub index: usize,
    pub share: C::ScalarField,
    pub public: C,
}

struct SessionState<C: CurveGroup> {
    deal_count: usize,
    response_count: usize,
    acc_share: C::ScalarField,
    acc_public: C,
}

/// One member's view of its group's DKG run.
pub struct ThresholdSession<C: CurveGroup> {
    n: usize,
    t: usize,
    my_idx: usize,
    keypair: KeyPair<C>,
    deals: Vec<Option<ThresholdDeal<C>>>,
    state: Mutex<SessionState<C>>,
    deal_progress: (watch::Sender<usize>, watch::Receiver<usize>),
    response_progress: (watch::Sender<usize>, watch::Receiver<usize>),
}

impl<C: CurveGroup> ThresholdSession<C> {
    /// Draw the dealer polynomial and seal one share per fellow member
    /// under that member's long-term key. `session` disambiguates the AEAD
    /// nonce between the many groups a server belongs to.
    pub fn new<R: Rng>(
        my_idx: usize,
        threshold: usize,
        keypair: KeyPair<C>,
        member_keys: &[C],
        session: u64,
        rng: &mut R,
    ) -> Result<Self, CryptoError> {
        let n = member_keys.len();
        let poly: Vec<C::ScalarField> =
            (0..threshold).map(|_| C::ScalarField::rand(rng)).collect();
        let commitments: Vec<C> = poly.iter().map(|c| C::generator() * *c).collect();

        let mut deals = Vec::with_capacity(n);
        for recipient in 0..n {
            if recipient == my_idx {
                deals.push(None);
                continue;
            }
            let share = eval_poly(&poly, recipient + 1);
            let mut share_bytes = Vec::with_capacity(share.compressed_size());
            share
                .serialize_compressed(&mut share_bytes)
                .map_err(|_| CryptoError::Serialization)?;
            let encrypted_share = cca2::encrypt(
                &share_bytes,
                &deal_nonce(session, my_idx),
                member_keys[recipient],
                rng,
            )?;
            deals.push(Some(ThresholdDeal {
                dealer: my_idx,
                recipient,
                commitments: commitments.clone(),
                encrypted_share,
            }));
        }

        let own_share = eval_poly(&poly, my_idx + 1);
        let state = SessionState {
            deal_count: 0,
            response_count: 0,
            acc_share: own_share,
            acc_public: commitments[0],
        };

        Ok(Self {
            n,
            t: threshold,
            my_idx,
            keypair,
            deals,
            state: Mutex::new(state),
            deal_progress: watch::channel(0),
            response_progress: watch::channel(0),
        })
    }

    /// The deal this member prepared for `recipient`.
    pub fn deal_for(&self, recipient: usize) -> Option<ThresholdDeal<C>> {
        self.deals.get(recipient).and_then(Clone::clone)
    }

    /// Decrypt and Feldman-check an incoming deal, accumulate the share,
    /// and emit the response to broadcast. A bad share is fatal.
    pub fn process_deal(
        &self,
        deal: &ThresholdDeal<C>,
        session: u64,
    ) -> Result<ThresholdResponse, CryptoError> {
        let share_bytes = cca2::decrypt(
            &deal.encrypted_share,
            &deal_nonce(session, deal.dealer),
            &self.keypair.private,
            &self.keypair.public,
        )?;
        let share = C::ScalarField::deserialize_compressed(share_bytes.as_slice())
            .map_err(|_| CryptoError::Serialization)?;

        if deal.commitments.len() != self.t
            || !feldman_check(&share, &deal.commitments, self.my_idx + 1)
        {
            tracing::error!(
                target: LOG_TARGET,
                dealer = deal.dealer,
                verifier = self.my_idx,
                "deal share failed the commitment check"
            );
            return Err(CryptoError::DkgShareInvalid {
                dealer: deal.dealer,
                verifier: self.my_idx,
            });
        }

        let count = {
            let mut state = self.state.lock();
            state.acc_share += share;
            state.acc_public += deal.commitments[0];
            state.deal_count += 1;
            state.deal_count
        };
        let _ = self.deal_progress.0.send(count);

        Ok(ThresholdResponse {
            dealer: deal.dealer,
            verifier: self.my_idx,
            approved: true,
        })
    }

    /// Record a broadcast response. Waits until this member has processed
    /// all `n - 1` deals before counting. A complaint is an irrecoverable
    /// protocol fault.
    pub async fn process_response(
        &self,
        response: ThresholdResponse,
    ) -> Result<(), CryptoError> {
        let mut progress = self.deal_progress.1.clone();
        let expected = self.n - 1;
        progress
            .wait_for(|&count| count >= expected)
            .await
            .map_err(|_| CryptoError::Serialization)?;

        if !response.approved {
            return Err(CryptoError::DkgJustification {
                dealer: response.dealer,
                verifier: response.verifier,
            });
        }

        let count = {
            let mut state = self.state.lock();
            state.response_count += 1;
            state.response_count
        };
        let _ = self.response_progress.0.send(count);
        Ok(())
    }

    /// Wait for the `(n - 1)^2` responses and derive this member's share of
    /// the joint key.
    pub async fn finalize(&self) -> Result<DistKeyShare<C>, CryptoError> {
        let mut progress = self.response_progress.1.clone();
        let expected = (self.n - 1) * (self.n - 1);
        progress
            .wait_for(|&count| count >= expected)
            .await
            .map_err(|_| CryptoError::Serialization)?;

        let state = self.state.lock();
        Ok(DistKeyShare {
            index: self.my_idx,
            share: state.acc_share,
            public: state.acc_public,
        })
    }
}

/// Lagrange-adjusted share for reconstruction over `subset` (group
/// indices). Evaluation points are `index + 1`.
pub fn lagrange_share<C: CurveGroup>(
    share: &DistKeyShare<C>,
    subset: &[usize],
) -> C::ScalarField {
    let mut numer = C::ScalarField::one();
    let mut denom = C::ScalarField::one();
    let xi = C::ScalarField::from((share.index + 1) as u64);
    for &j in subset {
        if j == share.index {
            continue;
        }
        let xj = C::ScalarField::from((j + 1) as u64);
        numer *= xj;
        denom *= xj - xi;
    }
    share.share
        * numer
        * denom
            .inverse()
            .expect("subset evaluation points are distinct")
}

fn eval_poly<F: PrimeField>(poly: &[F], x: usize) -> F {
    let x = F::from(x as u64);
    poly.iter()
        .rev()
        .fold(F::zero(), |acc, coeff| acc * x + coeff)
}

fn feldman_check<C: CurveGroup>(share: &C::ScalarField, commitments: &[C], x: usize) -> bool {
    let x = C::ScalarField::from(x as u64);
    let mut power = C::ScalarField::one();
    let mut expected = C::zero();
    for commitment in commitments {
        expected += *commitment * power;
        power *= x;
    }
    C::generator() * *share == expected
}

fn deal_nonce(session: u64, dealer: usize) -> [u8; cca2::CCA2_NONCE_LEN] {
    let mut nonce = [0u8; cca2::CCA2_NONCE_LEN];
    nonce[..8].copy_from_slice(&session.to_le_bytes());
    nonce[8..16].copy_from_slice(&(dealer as u64).to_le_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::elgamal::{encrypt, reencrypt};
    use crate::crypto::embed::gen_rand_msg;
    use crate::crypto::{null_key, Curve};
    use ark_ec::Group;
    use ark_std::test_rng;
    use std::sync::Arc;

    async fn run_dkg(n: usize, t: usize) -> (Vec<Arc<ThresholdSession<Curve>>>, Vec<DistKeyShare<Curve>>) {
        let mut rng = test_rng();
        let keys: Vec<KeyPair<Curve>> = (0..n).map(|_| KeyPair::generate(&mut rng)).collect();
        let pubs: Vec<Curve> = keys.iter().map(|k| k.public).collect();
        let sessions: Vec<Arc<ThresholdSession<Curve>>> = (0..n)
            .map(|i| {
                Arc::new(
                    ThresholdSession::new(i, t, keys[i].clone(), &pubs, 42, &mut rng).unwrap(),
                )
            })
            .collect();

        // Deliver every deal first; responses only unblock once a member
        // has processed all of its incoming deals.
        let mut responses = Vec::new();
        for dealer in 0..n {
            for recipient in 0..n {
                if dealer == recipient {
                    continue;
                }
                let deal = sessions[dealer].deal_for(recipient).unwrap();
                responses.push((recipient, sessions[recipient].process_deal(&deal, 42).unwrap()));
            }
        }
        for (from, response) in responses {
            for (other, session) in sessions.iter().enumerate() {
                if other == from {
                    continue;
                }
                session.process_response(response).await.unwrap();
            }
        }

        let mut shares = Vec::with_capacity(n);
        for session in &sessions {
            shares.push(session.finalize().await.unwrap());
        }
        (sessions, shares)
    }

    #[tokio::test]
    async fn five_of_four_joint_decryption() {
        let (_, shares) = run_dkg(5, 4).await;
        let joint = shares[0].public;
        for share in &shares {
            assert_eq!(share.public, joint);
        }

        let mut rng = test_rng();
        let msg = gen_rand_msg::<Curve, _>(2, &mut rng);
        let mut ct = encrypt(joint, &msg, &mut rng);

        // Any four members can jointly strip the encryption.
        let subset = [0usize, 2, 3, 4];
        for &i in &subset {
            let adjusted = lagrange_share(&shares[i], &subset);
            ct = reencrypt(&adjusted, null_key::<Curve>(), ct, &mut rng);
        }
        assert_eq!(ct.c, msg);
    }

    #[tokio::test]
    async fn lagrange_subsets_reconstruct_equally() {
        let (_, shares) = run_dkg(4, 3).await;
        let joint = shares[0].public;

        for subset in [[0usize, 1, 2], [1, 2, 3], [0, 1, 3]] {
            let reconstructed: <Curve as ark_ec::Group>::ScalarField = subset
                .iter()
                .map(|&i| lagrange_share(&shares[i], &subset))
                .sum();
            assert_eq!(Curve::generator() * reconstructed, joint);
        }
    }

    #[test]
    fn bad_share_is_detected() {
        let mut rng = test_rng();
        let n = 3;
        let keys: Vec<KeyPair<Curve>> = (0..n).map(|_| KeyPair::generate(&mut rng)).collect();
        let pubs: Vec<Curve> = keys.iter().map(|k| k.public).collect();
        let dealer = ThresholdSession::<Curve>::new(0, 2, keys[0].clone(), &pubs, 1, &mut rng)
            .unwrap();
        let verifier = ThresholdSession::<Curve>::new(1, 2, keys[1].clone(), &pubs, 1, &mut rng)
            .unwrap();

        let mut deal = dealer.deal_for(1).unwrap();
        // Substitute a share that cannot match the commitments.
        let bogus = <Curve as ark_ec::Group>::ScalarField::from(99u64);
        let mut bytes = Vec::new();
        bogus.serialize_compressed(&mut bytes).unwrap();
        deal.encrypted_share =
            cca2::encrypt(&bytes, &deal_nonce(1, 0), pubs[1], &mut rng).unwrap();

        assert!(matches!(
            verifier.process_deal(&deal, 1),
            Err(CryptoError::DkgShareInvalid { dealer: 0, verifier: 1 })
        ));
    }
}
