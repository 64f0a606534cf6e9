use ledgersync_crypto::{generate_random_key, open, seal, CryptoError, NONCE_SIZE, TAG_SIZE};

const AAD: &[u8] = b"v1|entity|account|device-a";

#[test]
fn seal_open_roundtrip() {
    let key = generate_random_key();
    let sealed = seal(&key, b"balance: 42", AAD).unwrap();
    assert_eq!(open(&key, &sealed, AAD).unwrap(), b"balance: 42");
}

#[test]
fn seal_open_empty() {
    let key = generate_random_key();
    let sealed = seal(&key, b"", AAD).unwrap();
    assert!(sealed.is_empty());
    assert_eq!(sealed.len(), NONCE_SIZE + TAG_SIZE);
    assert_eq!(open(&key, &sealed, AAD).unwrap(), b"");
}

#[test]
fn ciphertext_is_not_plaintext() {
    let key = generate_random_key();
    let plaintext = b"very recognisable plaintext";
    let sealed = seal(&key, plaintext, AAD).unwrap();
    assert_eq!(sealed.ciphertext.len(), plaintext.len());
    assert_ne!(sealed.ciphertext.as_slice(), plaintext.as_slice());
}

#[test]
fn nonces_are_fresh() {
    let key = generate_random_key();
    let a = seal(&key, b"same", AAD).unwrap();
    let b = seal(&key, b"same", AAD).unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn wrong_key_fails() {
    let sealed = seal(&generate_random_key(), b"secret", AAD).unwrap();
    let err = open(&generate_random_key(), &sealed, AAD).unwrap_err();
    assert!(matches!(err, CryptoError::DecryptionFailed));
}

// ── Tampering ────────────────────────────────────────────────────

#[test]
fn flipped_ciphertext_bit_fails() {
    let key = generate_random_key();
    let mut sealed = seal(&key, b"secret", AAD).unwrap();
    sealed.ciphertext[0] ^= 0x01;
    assert!(matches!(
        open(&key, &sealed, AAD),
        Err(CryptoError::DecryptionFailed)
    ));
}

#[test]
fn flipped_tag_bit_fails() {
    let key = generate_random_key();
    let mut sealed = seal(&key, b"secret", AAD).unwrap();
    sealed.tag[TAG_SIZE - 1] ^= 0x80;
    assert!(matches!(
        open(&key, &sealed, AAD),
        Err(CryptoError::DecryptionFailed)
    ));
}

#[test]
fn flipped_nonce_bit_fails() {
    let key = generate_random_key();
    let mut sealed = seal(&key, b"secret", AAD).unwrap();
    sealed.nonce[3] ^= 0x10;
    assert!(matches!(
        open(&key, &sealed, AAD),
        Err(CryptoError::DecryptionFailed)
    ));
}

#[test]
fn altered_associated_data_fails() {
    let key = generate_random_key();
    let sealed = seal(&key, b"secret", AAD).unwrap();
    let err = open(&key, &sealed, b"v1|entity|account|device-b").unwrap_err();
    assert!(matches!(err, CryptoError::DecryptionFailed));
}

#[test]
fn truncated_ciphertext_fails() {
    let key = generate_random_key();
    let mut sealed = seal(&key, b"secret payload", AAD).unwrap();
    sealed.ciphertext.pop();
    assert!(open(&key, &sealed, AAD).is_err());
}

#[test]
fn decryption_error_message_carries_no_detail() {
    assert_eq!(CryptoError::DecryptionFailed.to_string(), "decryption failed");
}
