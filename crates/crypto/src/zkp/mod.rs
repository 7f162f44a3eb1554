// Path: crates/crypto/src/zkp/mod.rs
//! RSA-based zero-knowledge consent proof.
//!
//! The IdP proves that it holds the accessor's PKCS#1 v1.5 signature `s`
//! over `sha256(namespace:identifier)` without revealing `s`. With
//! `J = padding || sha256(namespace:identifier)` (so `s^e = J mod n`), each
//! round is a Guillou-Quisquater identification over the secret `s^-1`:
//!
//! ```text
//! IdP:       k random, T = k^e            (declared on chain)
//! verifier:  c random                      (sent off chain)
//! IdP:       z = k * (s^-1)^c             (sent off chain, hash on chain)
//! verifier:  z^e == T * (J^-1)^c  (mod n)
//! ```
//!
//! Every value travels as base64 of a big-endian integer padded to the
//! modulus length.

use crate::algorithms::hash::{b64, sha256_hex, unb64};
use crate::error::CryptoError;
use crate::sign::pkcs1::RsaPublic;
use num_bigint::BigUint;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Independent rounds per response.
pub const ROUNDS: usize = 2;
/// Size of one challenge in bytes.
pub const CHALLENGE_BYTES: usize = 16;

const DIGEST_LEN: usize = 32;
const MIN_PS_LEN: usize = 8;
/// DER prefix of a SHA-256 `DigestInfo`.
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

/// The accessor's public key in the form the proof arithmetic needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZkKey {
    n: BigUint,
    e: BigUint,
    len: usize,
}

impl ZkKey {
    /// Parses a PEM accessor public key.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        Ok(Self::from_public(&RsaPublic::from_pem(pem)?))
    }

    /// Converts a parsed public key.
    pub fn from_public(key: &RsaPublic) -> Self {
        Self {
            n: BigUint::from_bytes_be(&key.modulus_be()),
            e: BigUint::from_bytes_be(&key.exponent_be()),
            len: key.size(),
        }
    }

    /// Modulus length in bytes.
    pub fn modulus_len(&self) -> usize {
        self.len
    }

    fn decode(&self, value: &str) -> Result<BigUint, CryptoError> {
        let bytes = unb64(value)?;
        self.decode_bytes(&bytes)
    }

    fn decode_bytes(&self, bytes: &[u8]) -> Result<BigUint, CryptoError> {
        if bytes.len() != self.len {
            return Err(CryptoError::InvalidLength {
                expected: self.len,
                got: bytes.len(),
            });
        }
        let v = BigUint::from_bytes_be(bytes);
        if v >= self.n {
            return Err(CryptoError::OutOfRange);
        }
        Ok(v)
    }

    fn to_fixed(&self, v: &BigUint) -> Result<Vec<u8>, CryptoError> {
        let raw = v.to_bytes_be();
        let pad = self
            .len
            .checked_sub(raw.len())
            .ok_or(CryptoError::OutOfRange)?;
        let mut out = vec![0u8; pad];
        out.extend_from_slice(&raw);
        Ok(out)
    }

    fn encode(&self, v: &BigUint) -> Result<String, CryptoError> {
        Ok(b64(&self.to_fixed(v)?))
    }
}

/// One round's IdP-side state: the secret blinding value and its public commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Base64 `k`. Never leaves the IdP.
    pub blinding: String,
    /// Base64 `k^e mod n`, declared on chain.
    pub public_proof: String,
}

/// Draws fresh blinding values and computes their commitments.
pub fn commit(key: &ZkKey) -> Result<Vec<Commitment>, CryptoError> {
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(ROUNDS);
    // One byte shorter than the modulus keeps k < n.
    let mut buf = vec![0u8; key.len.saturating_sub(1)];
    while out.len() < ROUNDS {
        rng.fill_bytes(&mut buf);
        let k = BigUint::from_bytes_be(&buf);
        if k.bits() <= 1 {
            continue;
        }
        let t = k.modpow(&key.e, &key.n);
        out.push(Commitment {
            blinding: key.encode(&k)?,
            public_proof: key.encode(&t)?,
        });
    }
    Ok(out)
}

/// Draws one random challenge per round.
pub fn challenges() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..ROUNDS)
        .map(|_| {
            let mut c = [0u8; CHALLENGE_BYTES];
            rng.fill_bytes(&mut c);
            b64(&c)
        })
        .collect()
}

fn decode_challenge(value: &str) -> Result<BigUint, CryptoError> {
    let bytes = unb64(value)?;
    if bytes.len() != CHALLENGE_BYTES {
        return Err(CryptoError::InvalidLength {
            expected: CHALLENGE_BYTES,
            got: bytes.len(),
        });
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

fn check_rounds(got: usize) -> Result<(), CryptoError> {
    if got != ROUNDS {
        return Err(CryptoError::RoundCount {
            expected: ROUNDS,
            got,
        });
    }
    Ok(())
}

/// Checks that `padding` is the PKCS#1 v1.5 type-1 prefix of a SHA-256 signature block.
pub fn validate_padding(key: &ZkKey, padding: &[u8]) -> Result<(), CryptoError> {
    let expected = key.len.saturating_sub(DIGEST_LEN);
    if padding.len() != expected {
        return Err(CryptoError::InvalidPadding(format!(
            "expected {expected} bytes, got {}",
            padding.len()
        )));
    }
    match padding {
        [0x00, 0x01, rest @ ..] => {
            let ps_len = rest.iter().take_while(|b| **b == 0xff).count();
            if ps_len < MIN_PS_LEN {
                return Err(CryptoError::InvalidPadding("padding string too short".into()));
            }
            match rest.get(ps_len..) {
                Some([0x00, tail @ ..]) if tail.is_empty() || tail == &SHA256_DIGEST_INFO[..] => Ok(()),
                _ => Err(CryptoError::InvalidPadding("bad separator or digest info".into())),
            }
        }
        [0x00, ..] => Err(CryptoError::InvalidPadding("block type is not 1".into())),
        _ => Err(CryptoError::InvalidPadding("non-zero leading byte".into())),
    }
}

/// Validates an accessor signature over the hashed subject and returns its padding.
///
/// Fails unless `s^e mod n` is a well-formed block ending in `hashed_subject`.
pub fn extract_padding(
    key: &ZkKey,
    signed_hash: &[u8],
    hashed_subject: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let s = key.decode_bytes(signed_hash)?;
    let em = key.to_fixed(&s.modpow(&key.e, &key.n))?;
    let split = key.len.saturating_sub(DIGEST_LEN);
    let (padding, digest) = em.split_at(split.min(em.len()));
    if digest != hashed_subject.as_slice() {
        return Err(CryptoError::InvalidSignature);
    }
    validate_padding(key, padding)?;
    Ok(padding.to_vec())
}

/// Computes the private proofs `z_i = k_i * (s^-1)^c_i mod n`.
pub fn private_proofs(
    key: &ZkKey,
    commitments: &[Commitment],
    signed_hash: &[u8],
    challenges: &[String],
) -> Result<Vec<String>, CryptoError> {
    check_rounds(commitments.len())?;
    check_rounds(challenges.len())?;
    let s = key.decode_bytes(signed_hash)?;
    let s_inv = s.modinv(&key.n).ok_or(CryptoError::NotInvertible)?;
    commitments
        .iter()
        .zip(challenges)
        .map(|(round, c)| {
            let k = key.decode(&round.blinding)?;
            let c = decode_challenge(c)?;
            let z = (k * s_inv.modpow(&c, &key.n)) % &key.n;
            key.encode(&z)
        })
        .collect()
}

/// The on-chain commitment to a private proof pair: hex SHA-256 of its JSON array.
pub fn private_proof_hash(private_proofs: &[String]) -> Result<String, CryptoError> {
    let json = serde_json::to_vec(private_proofs).map_err(|e| CryptoError::Decode(e.to_string()))?;
    Ok(sha256_hex(&json))
}

/// Everything a verifier gathers for one IdP response.
#[derive(Debug, Clone, Copy)]
pub struct Transcript<'a> {
    /// Commitments read from the ledger.
    pub public_proofs: &'a [String],
    /// Challenges this verifier issued, or the RP issued.
    pub challenges: &'a [String],
    /// Private proofs relayed off chain.
    pub private_proofs: &'a [String],
    /// Padding relayed off chain.
    pub padding: &'a [u8],
    /// Hash recorded on chain with the response.
    pub private_proof_hash: &'a str,
}

/// Verifies every round of a transcript against the hashed subject.
pub fn verify(
    key: &ZkKey,
    hashed_subject: &[u8; 32],
    transcript: &Transcript<'_>,
) -> Result<(), CryptoError> {
    check_rounds(transcript.public_proofs.len())?;
    check_rounds(transcript.challenges.len())?;
    check_rounds(transcript.private_proofs.len())?;
    validate_padding(key, transcript.padding)?;
    if private_proof_hash(transcript.private_proofs)? != transcript.private_proof_hash {
        return Err(CryptoError::ProofHashMismatch);
    }

    let mut block = transcript.padding.to_vec();
    block.extend_from_slice(hashed_subject);
    let j = key.decode_bytes(&block)?;
    let j_inv = j.modinv(&key.n).ok_or(CryptoError::NotInvertible)?;

    let rounds = transcript
        .public_proofs
        .iter()
        .zip(transcript.challenges)
        .zip(transcript.private_proofs);
    for (i, ((t, c), z)) in rounds.enumerate() {
        let t = key.decode(t)?;
        let c = decode_challenge(c)?;
        let z = key.decode(z)?;
        if z.bits() == 0 {
            return Err(CryptoError::OutOfRange);
        }
        let lhs = z.modpow(&key.e, &key.n);
        let rhs = (t * j_inv.modpow(&c, &key.n)) % &key.n;
        if lhs != rhs {
            tracing::debug!(target: "zkp", round = i + 1, "proof equation does not hold");
            return Err(CryptoError::ProofMismatch(i + 1));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
