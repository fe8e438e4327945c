//! Subscribing to a records filter and receiving a matching write as an
//! event on the live stream.

use dwn_node::endpoint;
use dwn_node::provider::KeyStore;
use dwn_node::records::{Data, RecordsFilter, SubscribeBuilder, WriteBuilder};
use dwn_node::store::EntryType;
use futures::StreamExt;
use test_node::{ProviderImpl, ALICE_DID};

#[tokio::test]
async fn subscribe_receives_matching_write() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let subscribe = SubscribeBuilder::new()
        .filter(RecordsFilter::new().schema("https://example.com/schemas/note"))
        .build(&signer)
        .await
        .unwrap();

    let reply = endpoint::handle(ALICE_DID, subscribe, &provider).await.unwrap();
    let mut subscriber = reply.body.unwrap().subscriber;

    let write = WriteBuilder::new()
        .data(Data::Bytes(b"hello".to_vec()))
        .data_format("text/plain")
        .schema("https://example.com/schemas/note")
        .build(&signer)
        .await
        .unwrap();
    let record_id = write.record_id.clone();

    let reply = endpoint::handle(ALICE_DID, write, &provider).await.unwrap();
    assert_eq!(reply.status.code, 202);

    let event = subscriber.next().await.expect("event emitted");
    let EntryType::Write(received) = event.message else {
        panic!("expected a write event");
    };
    assert_eq!(received.record_id, record_id);
}

#[tokio::test]
async fn subscribe_ignores_non_matching_write() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let subscribe = SubscribeBuilder::new()
        .filter(RecordsFilter::new().schema("https://example.com/schemas/note"))
        .build(&signer)
        .await
        .unwrap();

    let reply = endpoint::handle(ALICE_DID, subscribe, &provider).await.unwrap();
    let mut subscriber = reply.body.unwrap().subscriber;

    let write = WriteBuilder::new()
        .data(Data::Bytes(b"unrelated".to_vec()))
        .data_format("text/plain")
        .schema("https://example.com/schemas/other")
        .build(&signer)
        .await
        .unwrap();
    endpoint::handle(ALICE_DID, write, &provider).await.unwrap();

    let matching = WriteBuilder::new()
        .data(Data::Bytes(b"match".to_vec()))
        .data_format("text/plain")
        .schema("https://example.com/schemas/note")
        .build(&signer)
        .await
        .unwrap();
    let record_id = matching.record_id.clone();
    endpoint::handle(ALICE_DID, matching, &provider).await.unwrap();

    let event = subscriber.next().await.expect("event emitted");
    let EntryType::Write(received) = event.message else {
        panic!("expected a write event");
    };
    assert_eq!(received.record_id, record_id);
}
