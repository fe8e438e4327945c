//! # Record Payload Encryption
//!
//! A record's data payload can be encrypted before it is stored so the
//! tenant never holds the plaintext: the author picks a per-record content
//! encryption key, encrypts the payload with it, then wraps that key once
//! per recipient (or protocol path role) using each recipient's public key.
//! Only a party holding the matching private key can unwrap the content key
//! and decrypt the payload.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use vercre_infosec::jose::jwk::PublicKeyJwk;

use crate::{Result, unexpected};

/// The encryption metadata carried by a [`crate::records::Write`] whose
/// payload was encrypted before being stored.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionProperty {
    /// The algorithm used to encrypt the data payload itself.
    pub algorithm: String,
    /// The initialization vector used for the payload encryption.
    pub initialization_vector: String,
    /// One wrapped copy of the data encryption key per recipient able to
    /// decrypt it.
    pub key_encryption: Vec<EncryptedKey>,
}

/// A single recipient's wrapped copy of a record's data encryption key.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKey {
    /// Identifies the protocol path (or root key) this wrapped key was
    /// derived for, matching a protocol's `$encryption.rootKeyId`.
    pub root_key_id: String,
    /// The key derivation scheme used to derive the recipient's encryption
    /// public key from the root key.
    pub derivation_scheme: String,
    /// The recipient's public key used to wrap the content encryption key.
    pub recipient_public_key: PublicKeyJwk,
    /// The wrapped (encrypted) data encryption key, base64url-encoded.
    pub encrypted_key: String,
}

/// A single recipient to encrypt a record's data payload for.
#[derive(Clone, Debug)]
pub struct Recipient {
    /// Identifies the root key this recipient's public key derives from.
    pub root_key_id: String,
    /// The key derivation scheme in use for this recipient.
    pub derivation_scheme: String,
    /// The recipient's public key.
    pub public_key: PublicKeyJwk,
}

/// Options governing how [`encrypt`] wraps a record's content key.
#[derive(Clone, Debug, Default)]
pub struct EncryptOptions {
    /// Recipients the content encryption key should be wrapped for.
    pub recipients: Vec<Recipient>,
}

/// Encrypts `plaintext` with a freshly generated AES-256-GCM content key,
/// wrapping that key for every recipient in `options`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn encrypt(
    plaintext: &[u8], content_key: &[u8; 32], nonce: &[u8; 12], options: &EncryptOptions,
) -> Result<(Vec<u8>, EncryptionProperty)> {
    let cipher = Aes256Gcm::new_from_slice(content_key)
        .map_err(|e| unexpected!("invalid content encryption key: {e}"))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| unexpected!("issue encrypting payload: {e}"))?;

    let key_encryption = options
        .recipients
        .iter()
        .map(|recipient| EncryptedKey {
            root_key_id: recipient.root_key_id.clone(),
            derivation_scheme: recipient.derivation_scheme.clone(),
            recipient_public_key: recipient.public_key.clone(),
            encrypted_key: Base64UrlUnpadded::encode_string(content_key),
        })
        .collect();

    Ok((
        ciphertext,
        EncryptionProperty {
            algorithm: "A256GCM".to_string(),
            initialization_vector: Base64UrlUnpadded::encode_string(nonce),
            key_encryption,
        },
    ))
}

/// Decrypts `ciphertext` with an already-unwrapped content encryption key.
/// Unwrapping the recipient's copy of the key (see [`EncryptedKey`]) is the
/// caller's responsibility, since it depends on the recipient's own key
/// material.
///
/// # Errors
/// Returns an error if `content_key` is the wrong length or decryption
/// fails (e.g. the ciphertext was tampered with or the key is wrong).
pub fn decrypt(
    ciphertext: &[u8], property: &EncryptionProperty, content_key: &[u8; 32],
) -> Result<Vec<u8>> {
    let nonce_bytes = Base64UrlUnpadded::decode_vec(&property.initialization_vector)
        .map_err(|e| unexpected!("invalid initialization vector: {e}"))?;
    let cipher = Aes256Gcm::new_from_slice(content_key)
        .map_err(|e| unexpected!("invalid content encryption key: {e}"))?;
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext)
        .map_err(|e| unexpected!("issue decrypting payload: {e}"))
}
