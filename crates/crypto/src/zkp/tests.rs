// Path: crates/crypto/src/zkp/tests.rs
use super::*;
use crate::algorithms::hash::hash_subject;
use crate::sign::pkcs1::sign_sha256;
use ndid_types::app::Identity;
use rsa::RsaPrivateKey;

struct Fixture {
    key: ZkKey,
    subject: [u8; 32],
    signed_hash: Vec<u8>,
}

fn fixture() -> Fixture {
    let accessor = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = RsaPublic::from_key(accessor.to_public_key());
    let identity = Identity::new("citizen_id", "1100023145268");
    let signed_hash = sign_sha256(&accessor, identity.canonical().as_bytes()).unwrap();
    Fixture {
        key: ZkKey::from_public(&public),
        subject: hash_subject(&identity),
        signed_hash,
    }
}

struct Run {
    public_proofs: Vec<String>,
    challenges: Vec<String>,
    private_proofs: Vec<String>,
    padding: Vec<u8>,
    hash: String,
}

fn run(f: &Fixture) -> Run {
    let padding = extract_padding(&f.key, &f.signed_hash, &f.subject).unwrap();
    let commitments = commit(&f.key).unwrap();
    let challenges = challenges();
    let private_proofs = private_proofs(&f.key, &commitments, &f.signed_hash, &challenges).unwrap();
    let hash = private_proof_hash(&private_proofs).unwrap();
    Run {
        public_proofs: commitments.into_iter().map(|c| c.public_proof).collect(),
        challenges,
        private_proofs,
        padding,
        hash,
    }
}

fn check(f: &Fixture, r: &Run) -> Result<(), CryptoError> {
    verify(
        &f.key,
        &f.subject,
        &Transcript {
            public_proofs: &r.public_proofs,
            challenges: &r.challenges,
            private_proofs: &r.private_proofs,
            padding: &r.padding,
            private_proof_hash: &r.hash,
        },
    )
}

fn flip_byte(value: &str, index: usize) -> String {
    let mut bytes = unb64(value).unwrap();
    bytes[index] ^= 0x01;
    b64(&bytes)
}

#[test]
fn valid_transcript_verifies() {
    let f = fixture();
    let r = run(&f);
    assert_eq!(r.padding.len(), f.key.modulus_len() - 32);
    assert_eq!(&r.padding[..2], &[0x00, 0x01]);
    check(&f, &r).unwrap();
}

#[test]
fn values_have_modulus_length() {
    let f = fixture();
    let r = run(&f);
    for v in r.public_proofs.iter().chain(&r.private_proofs) {
        assert_eq!(unb64(v).unwrap().len(), f.key.modulus_len());
    }
}

#[test]
fn flipped_private_proof_fails() {
    let f = fixture();
    let mut r = run(&f);
    r.private_proofs[1] = flip_byte(&r.private_proofs[1], 40);
    assert_eq!(check(&f, &r), Err(CryptoError::ProofHashMismatch));
    // Even with a matching on-chain hash the equation must fail.
    r.hash = private_proof_hash(&r.private_proofs).unwrap();
    assert_eq!(check(&f, &r), Err(CryptoError::ProofMismatch(2)));
}

#[test]
fn flipped_challenge_fails() {
    let f = fixture();
    let mut r = run(&f);
    r.challenges[0] = flip_byte(&r.challenges[0], 15);
    assert_eq!(check(&f, &r), Err(CryptoError::ProofMismatch(1)));
}

#[test]
fn flipped_modulus_fails() {
    let f = fixture();
    let r = run(&f);
    let mut n = f.key.n.to_bytes_be();
    let last = n.len() - 1;
    n[last] ^= 0x02;
    let tampered = Fixture {
        key: ZkKey {
            n: BigUint::from_bytes_be(&n),
            e: f.key.e.clone(),
            len: f.key.len,
        },
        subject: f.subject,
        signed_hash: f.signed_hash.clone(),
    };
    assert!(check(&tampered, &r).is_err());
}

#[test]
fn padding_with_non_zero_leading_byte_is_rejected() {
    let f = fixture();
    let mut r = run(&f);
    r.padding[0] = 0x01;
    assert!(matches!(check(&f, &r), Err(CryptoError::InvalidPadding(_))));
}

#[test]
fn padding_of_wrong_length_is_rejected() {
    let f = fixture();
    let mut r = run(&f);
    r.padding.remove(5);
    assert!(matches!(check(&f, &r), Err(CryptoError::InvalidPadding(_))));
}

#[test]
fn value_not_below_modulus_is_rejected() {
    let f = fixture();
    let mut r = run(&f);
    r.public_proofs[0] = b64(&vec![0xff; f.key.modulus_len()]);
    assert_eq!(check(&f, &r), Err(CryptoError::OutOfRange));
}

#[test]
fn short_value_is_rejected() {
    let f = fixture();
    let mut r = run(&f);
    let mut short = unb64(&r.public_proofs[0]).unwrap();
    short.remove(0);
    r.public_proofs[0] = b64(&short);
    assert!(matches!(check(&f, &r), Err(CryptoError::InvalidLength { .. })));
}

#[test]
fn secret_for_another_subject_is_rejected() {
    let f = fixture();
    let other = hash_subject(&Identity::new("citizen_id", "999"));
    assert_eq!(
        extract_padding(&f.key, &f.signed_hash, &other),
        Err(CryptoError::InvalidSignature)
    );
}

#[test]
fn single_round_transcript_is_rejected() {
    let f = fixture();
    let mut r = run(&f);
    r.challenges.pop();
    assert_eq!(
        check(&f, &r),
        Err(CryptoError::RoundCount { expected: 2, got: 1 })
    );
}
