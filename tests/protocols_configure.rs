//! Protocol configuration: registering a definition, superseding it with a
//! newer one, and having writes validated against its structure.

use std::collections::BTreeMap;

use dwn_node::endpoint;
use dwn_node::protocols::{ConfigureBuilder, Definition, ProtocolType, QueryBuilder};
use dwn_node::protocols::{ActionRule, Actor, Action, RuleSet};
use dwn_node::provider::KeyStore;
use dwn_node::records::{Data, WriteBuilder, WriteProtocol};
use dwn_node::Error;
use test_node::{ProviderImpl, ALICE_DID};

const PROTOCOL: &str = "https://example.com/notes";

fn definition(published: bool) -> Definition {
    let mut types = BTreeMap::new();
    types.insert("note".to_string(), ProtocolType {
        schema: None,
        data_formats: Some(vec!["text/plain".to_string()]),
    });

    let mut structure = BTreeMap::new();
    structure.insert("note".to_string(), RuleSet {
        encryption: None,
        actions: Some(vec![ActionRule {
            who: Some(Actor::Anyone),
            role: None,
            of: None,
            can: vec![Action::Create, Action::Read],
        }]),
        role: None,
        size: None,
        tags: None,
        nested: BTreeMap::new(),
    });

    Definition { protocol: PROTOCOL.to_string(), published, types, structure }
}

#[tokio::test]
async fn configure_then_query() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let configure = ConfigureBuilder::new().definition(definition(true)).build(&signer).await.unwrap();
    let reply = endpoint::handle(ALICE_DID, configure, &provider).await.unwrap();
    assert_eq!(reply.status.code, 202);

    let query = QueryBuilder::new().filter(PROTOCOL).build(&signer).await.unwrap();
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.unwrap();
    let entries = reply.body.unwrap().entries.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].descriptor.definition.protocol, PROTOCOL);
}

#[tokio::test]
async fn unpublished_definition_hidden_from_anonymous_query() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let configure = ConfigureBuilder::new().definition(definition(false)).build(&signer).await.unwrap();
    endpoint::handle(ALICE_DID, configure, &provider).await.unwrap();

    let query = QueryBuilder::new().filter(PROTOCOL).authorize(false).build(&signer).await.unwrap();
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.unwrap();
    assert!(reply.body.unwrap().entries.is_none());
}

#[tokio::test]
async fn newer_configure_supersedes_older() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let first = ConfigureBuilder::new().definition(definition(true)).build(&signer).await.unwrap();
    endpoint::handle(ALICE_DID, first, &provider).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let second = ConfigureBuilder::new().definition(definition(false)).build(&signer).await.unwrap();
    let reply = endpoint::handle(ALICE_DID, second, &provider).await.unwrap();
    assert_eq!(reply.status.code, 202);

    let query = QueryBuilder::new().filter(PROTOCOL).build(&signer).await.unwrap();
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.unwrap();
    let entries = reply.body.unwrap().entries.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].descriptor.definition.published);
}

#[tokio::test]
async fn older_configure_is_rejected() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let first = ConfigureBuilder::new().definition(definition(true)).build(&signer).await.unwrap();
    endpoint::handle(ALICE_DID, first.clone(), &provider).await.unwrap();

    let result = endpoint::handle(ALICE_DID, first, &provider).await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn write_under_protocol_is_validated_against_structure() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let configure = ConfigureBuilder::new().definition(definition(true)).build(&signer).await.unwrap();
    endpoint::handle(ALICE_DID, configure, &provider).await.unwrap();

    let write = WriteBuilder::new()
        .protocol(WriteProtocol { protocol: PROTOCOL.to_string(), protocol_path: "note".to_string() })
        .data(Data::Bytes(b"hi".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();

    let reply = endpoint::handle(ALICE_DID, write, &provider).await.unwrap();
    assert_eq!(reply.status.code, 202);
}

#[tokio::test]
async fn write_with_undeclared_data_format_is_rejected() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let configure = ConfigureBuilder::new().definition(definition(true)).build(&signer).await.unwrap();
    endpoint::handle(ALICE_DID, configure, &provider).await.unwrap();

    let write = WriteBuilder::new()
        .protocol(WriteProtocol { protocol: PROTOCOL.to_string(), protocol_path: "note".to_string() })
        .data(Data::Bytes(b"hi".to_vec()))
        .data_format("application/json")
        .build(&signer)
        .await
        .unwrap();

    let result = endpoint::handle(ALICE_DID, write, &provider).await;
    assert!(result.is_err());
}
