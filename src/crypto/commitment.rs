use ark_std::rand::Rng;

use super::error::CryptoError;
use super::rand::sha3_256;

/// Length of the random trap nonce.
pub const NONCE_LEN: usize = 16;

/// Wire length of a trap marker: `u32_le(gid) || nonce`.
pub const TRAP_WIRE_LEN: usize = 4 + NONCE_LEN;

/// A trap marker: the entry group it must resurface at, plus 16 random
/// bytes binding it to the client's commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trap {
    pub gid: u32,
    pub nonce: [u8; NONCE_LEN],
}

impl Trap {
    pub fn generate<R: Rng>(gid: u32, rng: &mut R) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        Self { gid, nonce }
    }

    pub fn to_bytes(&self) -> [u8; TRAP_WIRE_LEN] {
        let mut buf = [0u8; TRAP_WIRE_LEN];
        buf[..4].copy_from_slice(&self.gid.to_le_bytes());
        buf[4..].copy_from_slice(&self.nonce);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < TRAP_WIRE_LEN {
            return Err(CryptoError::MalformedMessage("short trap encoding"));
        }
        let mut gid = [0u8; 4];
        gid.copy_from_slice(&bytes[..4]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[4..TRAP_WIRE_LEN]);
        Ok(Self {
            gid: u32::from_le_bytes(gid),
            nonce,
        })
    }
}

/// SHA3-256 commitment to a trap.
pub type Commitment = [u8; 32];

/// Commit to a trap: SHA3-256 over the zero-padded uvarint of the group id
/// followed by the nonce.
pub fn commit(trap: &Trap) -> Commitment {
    let mut input = [0u8; 8 + NONCE_LEN];
    write_uvarint(&mut input[..8], trap.gid as u64);
    input[8..].copy_from_slice(&trap.nonce);
    sha3_256(&input)
}

pub fn verify_commitment(trap: &Trap, commitment: &Commitment) -> bool {
    commit(trap) == *commitment
}

/// Unsigned varint into a zero-initialized buffer; the buffer keeps its
/// full length so the commitment preimage is fixed-width.
fn write_uvarint(buf: &mut [u8], mut value: u64) {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
}
