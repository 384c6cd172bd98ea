use ark_ec::CurveGroup;
use ark_ff::PrimeField;
use ark_serialize::CanonicalSerialize;
use sha3::{
    digest::{ExtendableOutput, Update, XofReader},
    Shake128,
};

/// Labelled Fiat-Shamir transcript over SHAKE-128.
///
/// Prover and verifier absorb the same labelled data in the same order and
/// therefore squeeze identical challenges. Squeezed bytes are ratcheted
/// back into the state so successive challenges are independent.
#[derive(Clone)]
pub struct Transcript {
    state: Shake128,
}

impl Transcript {
    pub fn new(domain: &'static [u8]) -> Self {
        let mut state = Shake128::default();
        state.update(domain);
        Self { state }
    }

    pub fn append_bytes(&mut self, label: &'static [u8], bytes: &[u8]) {
        self.state.update(label);
        self.state.update(&(bytes.len() as u64).to_le_bytes());
        self.state.update(bytes);
    }

    pub fn append_u64(&mut self, label: &'static [u8], value: u64) {
        self.append_bytes(label, &value.to_le_bytes());
    }

    pub fn append_point<C: CurveGroup>(&mut self, label: &'static [u8], point: &C) {
        let mut bytes = Vec::with_capacity(point.compressed_size());
        point
            .serialize_compressed(&mut bytes)
            .expect("point serialization into a Vec cannot fail");
        self.append_bytes(label, &bytes);
    }

    pub fn append_points<C: CurveGroup>(&mut self, label: &'static [u8], points: &[C]) {
        self.state.update(label);
        self.state.update(&(points.len() as u64).to_le_bytes());
        for point in points {
            let mut bytes = Vec::with_capacity(point.compressed_size());
            point
                .serialize_compressed(&mut bytes)
                .expect("point serialization into a Vec cannot fail");
            self.state.update(&bytes);
        }
    }

    pub fn append_scalar<F: PrimeField>(&mut self, label: &'static [u8], scalar: &F) {
        let mut bytes = Vec::with_capacity(scalar.compressed_size());
        scalar
            .serialize_compressed(&mut bytes)
            .expect("scalar serialization into a Vec cannot fail");
        self.append_bytes(label, &bytes);
    }

    /// Squeeze a challenge scalar, ratcheting the transcript state.
    pub fn challenge_scalar<F: PrimeField>(&mut self, label: &'static [u8]) -> F {
        let mut wide = [0u8; 64];
        self.challenge_bytes(label, &mut wide);
        F::from_le_bytes_mod_order(&wide)
    }

    /// Squeeze `n` challenge scalars.
    pub fn challenge_scalars<F: PrimeField>(&mut self, label: &'static [u8], n: usize) -> Vec<F> {
        (0..n).map(|_| self.challenge_scalar(label)).collect()
    }

    fn challenge_bytes(&mut self, label: &'static [u8], out: &mut [u8]) {
        self.state.update(label);
        let mut reader = self.state.clone().finalize_xof();
        reader.read(out);
        self.state.update(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Curve;
    use ark_ec::Group;
    use ark_ed25519::Fr;

    #[test]
    fn identical_transcripts_agree() {
        let mut a = Transcript::new(b"test");
        let mut b = Transcript::new(b"test");
        let point = Curve::generator();
        a.append_point(b"p", &point);
        b.append_point(b"p", &point);
        let ca: Fr = a.challenge_scalar(b"c");
        let cb: Fr = b.challenge_scalar(b"c");
        assert_eq!(ca, cb);
    }

    #[test]
    fn challenges_ratchet() {
        let mut tr = Transcript::new(b"test");
        let c1: Fr = tr.challenge_scalar(b"c");
        let c2: Fr = tr.challenge_scalar(b"c");
        assert_ne!(c1, c2);
    }

    #[test]
    fn different_labels_diverge() {
        let mut a = Transcript::new(b"test");
        let mut b = Transcript::new(b"test");
        a.append_bytes(b"x", &[1, 2, 3]);
        b.append_bytes(b"y", &[1, 2, 3]);
        let ca: Fr = a.challenge_scalar(b"c");
        let cb: Fr = b.challenge_scalar(b"c");
        assert_ne!(ca, cb);
    }
}
