use std::path::Path;

use ark_ec::CurveGroup;
use ark_ff::{UniformRand, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::CryptoError;

/// Long-term keypair of a server, trustee or client.
#[derive(Clone, Debug)]
pub struct KeyPair<C: CurveGroup> {
    pub private: C::ScalarField,
    pub public: C,
}

impl<C: CurveGroup> KeyPair<C> {
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        Self::from_private(C::ScalarField::rand(rng))
    }

    pub fn from_private(private: C::ScalarField) -> Self {
        let public = C::generator() * private;
        Self { private, public }
    }
}

/// Public key under which decryption is a no-op; the last level
/// re-encrypts towards this key to strip the final ElGamal layer.
pub fn null_key<C: CurveGroup>() -> C {
    C::zero()
}

/// Combined public key for a set of nodes. Behaves as a single ElGamal key
/// whose private counterpart is the sum of the members' privates.
pub fn combine_public_keys<C: CurveGroup>(pubs: &[C]) -> C {
    pubs.iter().fold(C::zero(), |acc, p| acc + p)
}

/// Combined private key for a set of nodes.
pub fn combine_private_keys<C: CurveGroup>(privs: &[C::ScalarField]) -> C::ScalarField {
    privs
        .iter()
        .fold(C::ScalarField::zero(), |acc, s| acc + s)
}

/// Hex encoding of a keypair, the on-disk key file format.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HexKeyPair {
    pub private: String,
    pub public: String,
}

pub fn dump_key<C: CurveGroup>(keypair: &KeyPair<C>) -> Result<HexKeyPair, CryptoError> {
    let mut private = Vec::new();
    keypair
        .private
        .serialize_compressed(&mut private)
        .map_err(|_| CryptoError::Serialization)?;
    let mut public = Vec::new();
    keypair
        .public
        .serialize_compressed(&mut public)
        .map_err(|_| CryptoError::Serialization)?;
    Ok(HexKeyPair {
        private: hex::encode(private),
        public: hex::encode(public),
    })
}

pub fn load_key<C: CurveGroup>(key: &HexKeyPair) -> Result<KeyPair<C>, CryptoError> {
    let private = hex::decode(&key.private).map_err(|_| CryptoError::Serialization)?;
    let private = C::ScalarField::deserialize_compressed(private.as_slice())
        .map_err(|_| CryptoError::Serialization)?;
    let public = load_pub_key(&key.public)?;
    Ok(KeyPair { private, public })
}

pub fn load_pub_key<C: CurveGroup>(public: &str) -> Result<C, CryptoError> {
    let bytes = hex::decode(public).map_err(|_| CryptoError::Serialization)?;
    C::Affine::deserialize_compressed(bytes.as_slice())
        .map(Into::into)
        .map_err(|_| CryptoError::Serialization)
}

/// Load a JSON list of hex keypairs from disk.
pub fn read_keys(path: &Path) -> anyhow::Result<Vec<HexKeyPair>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Curve;
    use ark_ec::Group;
    use ark_std::test_rng;

    #[test]
    fn hex_round_trip() {
        let mut rng = test_rng();
        let keypair = KeyPair::<Curve>::generate(&mut rng);
        let dumped = dump_key(&keypair).unwrap();
        let loaded = load_key::<Curve>(&dumped).unwrap();
        assert_eq!(loaded.private, keypair.private);
        assert_eq!(loaded.public, keypair.public);
    }

    #[test]
    fn combined_keys_match() {
        let mut rng = test_rng();
        let keys: Vec<KeyPair<Curve>> = (0..4).map(|_| KeyPair::generate(&mut rng)).collect();
        let pubs: Vec<Curve> = keys.iter().map(|k| k.public).collect();
        let privs: Vec<_> = keys.iter().map(|k| k.private).collect();
        let joint_pub = combine_public_keys(&pubs);
        let joint_priv = combine_private_keys::<Curve>(&privs);
        assert_eq!(Curve::generator() * joint_priv, joint_pub);
    }
}
