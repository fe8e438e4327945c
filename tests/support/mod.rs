//! Helpers shared by the integration tests: a couple of message types have
//! no public builder (the `messages` interface's own `Query`, and the
//! `Subscribe`-less raw event log), so these follow the same
//! descriptor/`AuthorizationBuilder` shape every other builder in the crate
//! uses.

use dwn_node::authorization::AuthorizationBuilder;
use dwn_node::messages::{
    MessagesFilter, Query as MessagesQuery, QueryDescriptor as MessagesQueryDescriptor,
    Read as MessagesRead, ReadDescriptor as MessagesReadDescriptor,
};
use dwn_node::provider::Signer;
use dwn_node::utils::cid;
use dwn_node::{Descriptor, Interface, Method, Result};

/// Builds a signed `messages::Query` over `filters` with no pagination.
pub async fn messages_query(filters: Vec<MessagesFilter>, signer: &impl Signer) -> Result<MessagesQuery> {
    let descriptor = MessagesQueryDescriptor {
        base: Descriptor {
            interface: Interface::Messages,
            method: Method::Query,
            message_timestamp: chrono::Utc::now(),
        },
        filters,
        cursor: None,
    };

    let authorization =
        AuthorizationBuilder::new().descriptor_cid(cid::from_value(&descriptor)?).build(signer).await?;

    Ok(MessagesQuery { descriptor, authorization })
}

/// Builds a signed `messages::Read` for the message with `message_cid`.
pub async fn messages_read(message_cid: impl Into<String>, signer: &impl Signer) -> Result<MessagesRead> {
    let descriptor = MessagesReadDescriptor {
        base: Descriptor {
            interface: Interface::Messages,
            method: Method::Read,
            message_timestamp: chrono::Utc::now(),
        },
        message_cid: message_cid.into(),
    };

    let authorization =
        AuthorizationBuilder::new().descriptor_cid(cid::from_value(&descriptor)?).build(signer).await?;

    Ok(MessagesRead { descriptor, authorization })
}
