//! # Signature and Structural Integrity
//!
//! Every message is authorized by a detached-payload JWS over a small
//! [`SignaturePayload`] that binds the message's descriptor (by CID) to
//! whatever else needs cryptographic protection: a delegated grant, a
//! permission grant reference, or — for `Records.Write` — the record and
//! context identifiers and any attestation/encryption block. Verifying a
//! message means recomputing that CID, reconstituting the detached payload,
//! and checking every signature against the signer's resolved DID document.

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::provider::{DidResolver, Signer};
use crate::records::DelegatedGrant;
use crate::{Result, forbidden, unexpected};

/// The claims bound by a message's authorization signature(s). Every
/// message type populates `descriptor_cid`; the rest apply only where
/// relevant (e.g. `record_id`/`context_id`/`attestation_cid` only appear on
/// `Records.Write`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePayload {
    /// CID of the message's descriptor.
    pub descriptor_cid: String,
    /// For `Records.Write`: the record identifier being bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// For `Records.Write`: the protocol-thread context identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// For `Records.Write`: CID of the attestation JWS, if attested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_cid: Option<String>,
    /// For `Records.Write`: CID of the encryption property, if encrypted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_cid: Option<String>,
    /// Id of the permission grant record invoked to authorize this
    /// message, if the author is not the owner/recipient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_grant_id: Option<String>,
    /// Id of the delegated grant record invoked, if the message is signed
    /// by a delegate rather than the logical author.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_grant_id: Option<String>,
    /// The protocol role the author invokes, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_role: Option<String>,
}

/// One signature within a [`Jws`]'s general-serialization `signatures`
/// array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwsSignature {
    /// Base64url-encoded JWS protected header (`{"alg", "kid"}`).
    pub protected: String,
    /// Base64url-encoded signature bytes.
    pub signature: String,
}

/// A detached-payload JWS in general JSON serialization: the payload is
/// carried alongside rather than embedded in each signature's compact
/// form, so multiple parties can co-sign the same bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jws {
    /// Base64url-encoded payload bytes.
    pub payload: String,
    /// One entry per signer.
    pub signatures: Vec<JwsSignature>,
}

#[derive(Serialize, Deserialize)]
struct Header<'a> {
    alg: &'a str,
    kid: String,
}

impl Jws {
    /// Builds a single-signature detached JWS over `payload` using
    /// `signer`.
    pub async fn new(payload: &impl Serialize, signer: &impl Signer) -> Result<Self> {
        let payload_bytes =
            serde_json::to_vec(payload).map_err(|e| unexpected!("issue serializing payload: {e}"))?;
        let payload_b64 = Base64UrlUnpadded::encode_string(&payload_bytes);

        let header = Header { alg: "EdDSA", kid: signer.verification_method().await.map_err(|e| unexpected!("issue fetching verification method: {e}"))? };
        let header_bytes =
            serde_json::to_vec(&header).map_err(|e| unexpected!("issue serializing header: {e}"))?;
        let protected = Base64UrlUnpadded::encode_string(&header_bytes);

        let signing_input = format!("{protected}.{payload_b64}");
        let sig = signer
            .try_sign(signing_input.as_bytes())
            .await
            .map_err(|e| unexpected!("issue signing payload: {e}"))?;
        let signature = Base64UrlUnpadded::encode_string(&sig);

        Ok(Self {
            payload: payload_b64,
            signatures: vec![JwsSignature { protected, signature }],
        })
    }

    /// Decodes and deserializes the detached payload.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let bytes = Base64UrlUnpadded::decode_vec(&self.payload)
            .map_err(|e| unexpected!("issue decoding payload: {e}"))?;
        serde_json::from_slice(&bytes).map_err(|e| unexpected!("issue deserializing payload: {e}"))
    }

    /// Returns the DID of the first signature's signer, i.e. the message's
    /// logical author (or delegate, when an `authorDelegatedGrant` is
    /// present — callers resolve the logical author from the grant).
    pub fn signer(&self) -> Result<String> {
        let signature = self.signatures.first().ok_or_else(|| unexpected!("no signatures"))?;
        let header_bytes = Base64UrlUnpadded::decode_vec(&signature.protected)
            .map_err(|e| unexpected!("issue decoding header: {e}"))?;
        let header: Header =
            serde_json::from_slice(&header_bytes).map_err(|e| unexpected!("issue deserializing header: {e}"))?;
        Ok(header.kid.split('#').next().unwrap_or(&header.kid).to_string())
    }

    /// Verifies every signature against the DID document(s) resolved for
    /// its `kid`.
    pub async fn verify(&self, resolver: &impl DidResolver) -> Result<()> {
        for signature in &self.signatures {
            let header_bytes = Base64UrlUnpadded::decode_vec(&signature.protected)
                .map_err(|e| forbidden!("issue decoding header: {e}"))?;
            let header: Header = serde_json::from_slice(&header_bytes)
                .map_err(|e| forbidden!("issue deserializing header: {e}"))?;

            let document = resolver
                .resolve(&header.kid)
                .await
                .map_err(|e| forbidden!("issue resolving signer: {e}"))?;
            let method = document
                .find(&header.kid)
                .ok_or_else(|| forbidden!("verification method `{}` not found", header.kid))?;

            let x = method.public_key_jwk.get("x").and_then(|v| v.as_str()).ok_or_else(|| {
                forbidden!("verification method `{}` has no `x` coordinate", header.kid)
            })?;
            let key_bytes = Base64UrlUnpadded::decode_vec(x)
                .map_err(|e| forbidden!("issue decoding public key: {e}"))?;
            let key_bytes: [u8; 32] = key_bytes
                .try_into()
                .map_err(|_| forbidden!("public key `{}` is not 32 bytes", header.kid))?;
            let verifying_key = VerifyingKey::from_bytes(&key_bytes)
                .map_err(|e| forbidden!("invalid public key: {e}"))?;

            let sig_bytes = Base64UrlUnpadded::decode_vec(&signature.signature)
                .map_err(|e| forbidden!("issue decoding signature: {e}"))?;
            let sig_bytes: [u8; 64] = sig_bytes
                .try_into()
                .map_err(|_| forbidden!("signature is not 64 bytes"))?;
            let sig = Signature::from_bytes(&sig_bytes);

            let signing_input = format!("{}.{}", signature.protected, self.payload);
            verifying_key
                .verify(signing_input.as_bytes(), &sig)
                .map_err(|_| forbidden!("signature verification failed for `{}`", header.kid))?;
        }
        Ok(())
    }
}

/// The authorization block carried by every message: the author's
/// signature over a [`SignaturePayload`], plus, for delegated or owner
/// co-signed messages, the supporting grant/signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// The author's (or delegate's) signature.
    pub signature: Jws,
    /// The delegated grant the signer invokes, when they are not the
    /// logical author themselves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_delegated_grant: Option<DelegatedGrant>,
    /// The tenant owner's co-signature, present when a message authored by
    /// someone else is additionally endorsed by the owner (e.g. to host
    /// third-party authored content).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_signature: Option<Jws>,
}

impl Authorization {
    /// The logical author: the delegated grant's grantor if a delegation
    /// is present, otherwise the direct signer.
    pub fn author(&self) -> Result<String> {
        if let Some(grant) = &self.author_delegated_grant {
            return grant.grantor();
        }
        self.signature.signer()
    }

    /// The DID that actually produced the primary signature (the delegate,
    /// if one signed on the logical author's behalf).
    pub fn signer(&self) -> Result<String> {
        self.signature.signer()
    }

    /// The decoded [`SignaturePayload`].
    pub fn payload(&self) -> Result<SignaturePayload> {
        self.signature.decode_payload()
    }

    /// Verifies the author's signature, the owner co-signature if present,
    /// and any embedded delegated grant's own signature.
    pub async fn verify(&self, resolver: &impl DidResolver) -> Result<()> {
        self.signature.verify(resolver).await?;
        if let Some(owner_signature) = &self.owner_signature {
            owner_signature.verify(resolver).await?;
        }
        if let Some(grant) = &self.author_delegated_grant {
            grant.verify(resolver).await?;
        }
        Ok(())
    }
}

/// Builds an [`Authorization`] for any message type: set `descriptor_cid`
/// and whichever of `permission_grant_id`/`delegated_grant`/`protocol_role`
/// apply, then `build` with the signer.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationBuilder {
    payload: SignaturePayload,
    delegated_grant: Option<DelegatedGrant>,
    owner_signer: bool,
}

impl AuthorizationBuilder {
    /// Returns a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the CID of the message descriptor being authorized.
    #[must_use]
    pub fn descriptor_cid(mut self, cid: impl Into<String>) -> Self {
        self.payload.descriptor_cid = cid.into();
        self
    }

    /// Binds a record identifier into the signed payload (`Records.Write`
    /// only).
    #[must_use]
    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.payload.record_id = Some(record_id.into());
        self
    }

    /// Binds a context identifier into the signed payload (`Records.Write`
    /// only).
    #[must_use]
    pub fn context_id(mut self, context_id: impl Into<String>) -> Self {
        self.payload.context_id = Some(context_id.into());
        self
    }

    /// Binds an attestation CID into the signed payload (`Records.Write`
    /// only).
    #[must_use]
    pub fn attestation_cid(mut self, cid: impl Into<String>) -> Self {
        self.payload.attestation_cid = Some(cid.into());
        self
    }

    /// Binds an encryption property CID into the signed payload
    /// (`Records.Write` only).
    #[must_use]
    pub fn encryption_cid(mut self, cid: impl Into<String>) -> Self {
        self.payload.encryption_cid = Some(cid.into());
        self
    }

    /// Records which permission grant authorizes this message.
    #[must_use]
    pub fn permission_grant_id(mut self, id: impl Into<String>) -> Self {
        self.payload.permission_grant_id = Some(id.into());
        self
    }

    /// Records which protocol role the author invokes.
    #[must_use]
    pub fn protocol_role(mut self, role: impl Into<String>) -> Self {
        self.payload.protocol_role = Some(role.into());
        self
    }

    /// Attaches a delegated grant; `build` signs with the delegate's
    /// signer and records the grant's id in the payload.
    #[must_use]
    pub fn delegated_grant(mut self, grant: DelegatedGrant) -> Self {
        self.payload.delegated_grant_id = grant.id().ok();
        self.delegated_grant = Some(grant);
        self
    }

    /// Marks this authorization as an owner co-signature rather than the
    /// primary author signature (used internally by
    /// [`Authorization::owner_signature`] construction paths).
    #[must_use]
    pub const fn owner_signer(mut self, yes: bool) -> Self {
        self.owner_signer = yes;
        self
    }

    /// Signs the payload with `signer` and assembles the [`Authorization`].
    pub async fn build(self, signer: &impl Signer) -> Result<Authorization> {
        let signature = Jws::new(&self.payload, signer).await?;
        Ok(Authorization {
            signature,
            author_delegated_grant: self.delegated_grant,
            owner_signature: None,
        })
    }
}
