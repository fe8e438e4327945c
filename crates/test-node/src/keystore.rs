//! In-memory keyrings backed by `ed25519-dalek`, plus the DID documents a
//! [`crate::ProviderImpl`] resolves them to.
//!
//! Each identifier gets exactly one signing key, generated once at
//! registration and never persisted. The DID itself is a `did:key`-shaped
//! string derived from the public key so that `keyring(identifier)` and
//! `resolve(identifier)` agree on the same key without a separate registry.

use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use dwn_node::provider::{Algorithm, Cipher, DidResolver, Document, KeyStore, Keyring, Signer, VerificationMethod};
use dwn_node::Result;
use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;

/// A single identity's signing key and the DID URL it signs with.
#[derive(Clone)]
pub struct Identity {
    did: String,
    signing_key: Arc<SigningKey>,
}

impl Identity {
    /// Generates a fresh identity. `did` is whatever string callers want to
    /// use to address it — tests use short, readable aliases rather than
    /// real `did:key` encodings.
    #[must_use]
    pub fn generate(did: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { did: did.into(), signing_key: Arc::new(signing_key) }
    }

    /// The DID URL identifying this identity's sole verification method.
    #[must_use]
    pub fn key_id(&self) -> String {
        format!("{}#key-1", self.did)
    }

    fn public_key_b64(&self) -> String {
        Base64UrlUnpadded::encode_string(self.signing_key.verifying_key().as_bytes())
    }

    /// The DID document this identity resolves to.
    #[must_use]
    pub fn document(&self) -> Document {
        Document {
            id: self.did.clone(),
            verification_method: vec![VerificationMethod {
                id: self.key_id(),
                public_key_jwk: serde_json::json!({
                    "kty": "OKP",
                    "crv": "Ed25519",
                    "x": self.public_key_b64(),
                }),
            }],
        }
    }
}

/// A [`Keyring`] wrapping a single in-memory [`Identity`].
#[derive(Clone)]
pub struct MemoryKeyring(pub Identity);

impl Keyring for MemoryKeyring {}

impl Signer for MemoryKeyring {
    async fn try_sign(&self, msg: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.0.signing_key.sign(msg).to_bytes().to_vec())
    }

    async fn public_key(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.0.signing_key.verifying_key().as_bytes().to_vec())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::EdDSA
    }

    async fn verification_method(&self) -> anyhow::Result<String> {
        Ok(self.0.key_id())
    }
}

// `Cipher` is required by `Keyring` but nothing in this crate's test
// scenarios exercises payload encryption yet — matches the upstream
// reference keyring, which leaves these unimplemented too.
impl Cipher for MemoryKeyring {
    async fn encrypt(&self, _plaintext: &[u8], _recipient_public_key: &[u8]) -> anyhow::Result<Vec<u8>> {
        unimplemented!("encryption is not exercised by test scenarios")
    }

    fn ephemeral_public_key(&self) -> Vec<u8> {
        unimplemented!("encryption is not exercised by test scenarios")
    }

    async fn decrypt(&self, _ciphertext: &[u8], _sender_public_key: &[u8]) -> anyhow::Result<Vec<u8>> {
        unimplemented!("encryption is not exercised by test scenarios")
    }
}

/// A registry of [`Identity`]s, doubling as a [`KeyStore`] and [`DidResolver`].
#[derive(Clone, Default)]
pub struct IdentityStore {
    identities: Vec<Identity>,
}

impl IdentityStore {
    /// Registers `identity`, making it resolvable and available for
    /// signing.
    pub fn register(&mut self, identity: Identity) {
        self.identities.push(identity);
    }

    fn find(&self, did_or_url: &str) -> Option<&Identity> {
        let did = did_or_url.split('#').next().unwrap_or(did_or_url);
        self.identities.iter().find(|i| i.did == did)
    }

    /// Resolves `did_or_url` to a DID document synchronously. Used directly
    /// by callers holding a lock over the store, to avoid holding it across
    /// an `.await` point.
    pub fn document_for(&self, did_or_url: &str) -> Result<Document> {
        let identity = self
            .find(did_or_url)
            .ok_or_else(|| dwn_node::unexpected!("no identity resolves to `{did_or_url}`"))?;
        Ok(identity.document())
    }
}

impl KeyStore for IdentityStore {
    fn keyring(&self, identifier: &str) -> Result<impl Keyring> {
        let identity = self
            .find(identifier)
            .ok_or_else(|| dwn_node::unexpected!("no keyring registered for `{identifier}`"))?;
        Ok(MemoryKeyring(identity.clone()))
    }
}

impl DidResolver for IdentityStore {
    async fn resolve(&self, url: &str) -> Result<Document> {
        self.document_for(url)
    }
}
