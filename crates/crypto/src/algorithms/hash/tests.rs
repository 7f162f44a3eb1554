// Path: crates/crypto/src/algorithms/hash/tests.rs
use super::*;

#[test]
fn sha256_of_empty_input() {
    assert_eq!(
        sha256_hex(b""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn salted_hash_is_hash_of_concatenation() {
    assert_eq!(salted_hash_hex("message", "salt"), sha256_hex(b"messagesalt"));
    assert_ne!(salted_hash_hex("message", "salt"), salted_hash_hex("message", "pepper"));
}

#[test]
fn subject_hash_uses_canonical_form() {
    let id = Identity::new("citizen_id", "1234");
    assert_eq!(hash_subject(&id), sha256(b"citizen_id:1234"));
}

#[test]
fn base64_rejects_garbage() {
    assert_eq!(unb64(&b64(b"abc")).unwrap(), b"abc");
    assert!(matches!(unb64("***"), Err(CryptoError::Decode(_))));
}

#[test]
fn salts_are_fresh() {
    let a = random_salt(16);
    assert_eq!(a.len(), 32);
    assert_ne!(a, random_salt(16));
}
