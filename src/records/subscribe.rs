//! # Records Subscribe
//!
//! `Subscribe` opens a live feed of [`Write`]/[`Delete`] events matching a
//! [`RecordsFilter`], authorized the same way a one-shot [`super::Query`]
//! would be.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::event::{SubscribeFilter, Subscriber};
use crate::grants::Grant;
use crate::provider::{EventStream, Provider, Signer};
use crate::records::{RecordsFilter, protocol};
use crate::utils::cid;
use crate::{Descriptor, Interface, Method, Result, forbidden, unexpected, utils};

/// Handle — or process — a [`Subscribe`] message.
///
/// # Errors
/// Returns an error if authorization fails or the underlying event stream
/// fails to register the subscription.
pub async fn handle(
    owner: &str, subscribe: Subscribe, provider: &impl Provider,
) -> Result<Reply<SubscribeReply>> {
    subscribe.validate()?;
    subscribe.authorize(owner, provider).await?;

    let filter = SubscribeFilter::Records(subscribe.descriptor.filter.clone());
    let subscriber = EventStream::subscribe(provider, owner, filter).await?;

    Ok(Reply {
        status: Status { code: StatusCode::OK.as_u16(), detail: None },
        body: Some(SubscribeReply { subscriber }),
    })
}

/// The [`Subscribe`] message expected by the handler.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribe {
    /// The subscribe descriptor.
    pub descriptor: SubscribeDescriptor,

    /// The message authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
}

impl Message for Subscribe {
    type Reply = SubscribeReply;

    fn cid(&self) -> Result<String> {
        cid::from_value(self)
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor.base
    }

    fn descriptor_cid(&self) -> Result<String> {
        cid::from_value(&self.descriptor)
    }

    fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref()
    }

    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>> {
        handle(owner, self, provider).await
    }
}

/// The [`Subscribe`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// Filter records the subscription should receive events for.
    pub filter: RecordsFilter,
}

/// [`SubscribeReply`] is returned by the handler in the [`Reply`] `body`
/// field.
#[derive(Debug)]
pub struct SubscribeReply {
    /// A stream of matching events as they are emitted.
    pub subscriber: Subscriber,
}

impl Subscribe {
    async fn authorize(&self, owner: &str, provider: &impl Provider) -> Result<()> {
        let Some(authzn) = &self.authorization else {
            return Err(forbidden!("missing authorization"));
        };
        if authzn.author()? == owner {
            return Ok(());
        }

        if let Some(delegated_grant) = &authzn.author_delegated_grant {
            let grant: Grant = delegated_grant.try_into()?;
            grant.verify(owner, &authzn.author()?, self.descriptor(), provider).await?;
        }

        if authzn.payload()?.protocol_role.is_some() {
            let Some(protocol) = &self.descriptor.filter.protocol else {
                return Err(unexpected!("missing protocol"));
            };
            let verifier = protocol::Authorizer::new(protocol)
                .context_id(self.descriptor.filter.context_id.as_ref());
            return verifier.permit_subscribe(owner, self, provider).await;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if let Some(protocol) = &self.descriptor.filter.protocol {
            utils::uri::validate(protocol)?;
        }
        if let Some(schema) = &self.descriptor.filter.schema {
            utils::uri::validate(schema)?;
        }
        Ok(())
    }
}

/// Builds a [`Subscribe`] message.
#[derive(Clone, Debug, Default)]
pub struct SubscribeBuilder {
    message_timestamp: Option<DateTime<Utc>>,
    filter: RecordsFilter,
    protocol_role: Option<String>,
}

impl SubscribeBuilder {
    /// Returns a new [`SubscribeBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self { message_timestamp: Some(Utc::now()), ..Self::default() }
    }

    /// Sets the filter records the subscription receives events for.
    #[must_use]
    pub fn filter(mut self, filter: RecordsFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Specify a protocol role invoked for this subscription.
    #[must_use]
    pub fn protocol_role(mut self, protocol_role: impl Into<String>) -> Self {
        self.protocol_role = Some(protocol_role.into());
        self
    }

    /// Builds and signs the subscribe message.
    ///
    /// # Errors
    /// Returns an error if the filter fails to normalize or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Subscribe> {
        let mut filter = self.filter;
        filter.normalize()?;

        let descriptor = SubscribeDescriptor {
            base: Descriptor {
                interface: Interface::Records,
                method: Method::Subscribe,
                message_timestamp: self.message_timestamp.unwrap_or_else(Utc::now),
            },
            filter,
        };

        let mut builder =
            AuthorizationBuilder::new().descriptor_cid(cid::from_value(&descriptor)?);
        if let Some(role) = self.protocol_role {
            builder = builder.protocol_role(role);
        }
        let authorization = builder.build(signer).await?;

        Ok(Subscribe { descriptor, authorization: Some(authorization) })
    }
}
