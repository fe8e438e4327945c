//! # Endpoint
//!
//! The entry point every message passes through on its way into the node:
//! schema validation, then dispatch to the handler for its interface and
//! method.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::authorization::Authorization;
use crate::provider::Provider;
use crate::{Descriptor, Result, schema};

/// Validates `message` against its JSON schema, then dispatches it to its
/// own [`Message::handle`].
///
/// # Errors
/// Returns an error if schema validation fails or the handler rejects the
/// message.
pub async fn handle<T>(
    owner: &str, message: impl Message<Reply = T>, provider: &impl Provider,
) -> Result<Reply<T>> {
    message.validate().await?;
    message.handle(owner, provider).await
}

/// A decoded, not-yet-authorized message belonging to one of the three
/// interfaces (`records`, `protocols`, `messages`). Every concrete message
/// type implements this so [`handle`] can validate and dispatch it
/// uniformly.
#[async_trait]
pub trait Message: Serialize + Clone + Debug + Send + Sync {
    /// The reply body this message's handler produces.
    type Reply;

    /// The component of the descriptor shared by every interface: which
    /// interface, which method, and when the message was created.
    fn descriptor(&self) -> &Descriptor;

    /// The CID of this message's type-specific descriptor, the value every
    /// builder binds into the message's signed payload. Re-derived at
    /// authorization time to confirm a signature was not transplanted onto
    /// a different descriptor than the one it was produced for.
    ///
    /// # Errors
    /// Returns an error if the descriptor fails to serialize.
    fn descriptor_cid(&self) -> Result<String>;

    /// The CID of the message as a whole, used as its storage key and log
    /// entry identifier.
    ///
    /// # Errors
    /// Returns an error if the message fails to serialize.
    fn cid(&self) -> Result<String>;

    /// This message's authorization, if any. Absent only for messages that
    /// are never persisted on their own (anonymous reads of published
    /// data).
    fn authorization(&self) -> Option<&Authorization>;

    /// Authorizes and processes the message, producing its reply.
    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>>;

    /// Schema validation common to every message, run before dispatch.
    /// Handlers layer interface- and method-specific checks on top of this.
    async fn validate(&self) -> Result<()> {
        schema::validate(self)
    }
}

/// The envelope every handler's reply is wrapped in.
#[derive(Debug, Default, Deserialize, Serialize)]
#[allow(clippy::module_name_repetitions)]
pub struct Reply<T> {
    /// Outcome of handling the message.
    pub status: Status,

    /// The handler's reply body, flattened into the envelope on the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(flatten)]
    pub body: Option<T>,
}

/// An HTTP-shaped outcome for a handled message.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// The status code, following HTTP conventions (200/202/400/401/404/409).
    pub code: u16,

    /// A human-readable detail, set when the outcome was not a plain
    /// success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
