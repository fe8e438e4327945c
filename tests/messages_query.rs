//! Querying the raw message log: every persisted message (of any type) is
//! visible to its owner, filterable by interface/method/protocol.

mod support;

use dwn_node::endpoint;
use dwn_node::messages::MessagesFilter;
use dwn_node::provider::KeyStore;
use dwn_node::records::{Data, WriteBuilder};
use dwn_node::{Interface, Method};
use test_node::{ProviderImpl, ALICE_DID};

#[tokio::test]
async fn query_returns_logged_write() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let write = WriteBuilder::new()
        .data(Data::Bytes(b"hello".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();
    endpoint::handle(ALICE_DID, write, &provider).await.unwrap();

    let query = support::messages_query(
        vec![MessagesFilter::new().interface(Interface::Records).method(Method::Write)],
        &signer,
    )
    .await
    .unwrap();

    let reply = endpoint::handle(ALICE_DID, query, &provider).await.unwrap();
    let body = reply.body.unwrap();
    let entries = body.entries.expect("at least one logged message");
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn query_filters_out_non_matching_protocol() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let write = WriteBuilder::new()
        .data(Data::Bytes(b"hello".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();
    endpoint::handle(ALICE_DID, write, &provider).await.unwrap();

    let query = support::messages_query(
        vec![MessagesFilter::new().protocol("https://example.com/unrelated")],
        &signer,
    )
    .await
    .unwrap();

    let reply = endpoint::handle(ALICE_DID, query, &provider).await.unwrap();
    let body = reply.body.unwrap();
    assert!(body.entries.is_none());
}
