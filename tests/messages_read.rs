//! Fetching a single logged message by CID, with its data attached when the
//! message is a `RecordsWrite`.

mod support;

use dwn_node::endpoint;
use dwn_node::provider::KeyStore;
use dwn_node::records::{Data, WriteBuilder};
use dwn_node::store::EntryType;
use dwn_node::Message;
use test_node::{ProviderImpl, ALICE_DID, BOB_DID};

#[tokio::test]
async fn read_returns_the_message_and_its_data() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let write = WriteBuilder::new()
        .data(Data::Bytes(b"hello".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();
    let message_cid = write.cid().unwrap();
    endpoint::handle(ALICE_DID, write, &provider).await.unwrap();

    let read = support::messages_read(message_cid.clone(), &signer).await.unwrap();
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.unwrap();
    let entry = reply.body.unwrap().entry.expect("message found");

    assert_eq!(entry.message_cid, message_cid);
    assert!(matches!(entry.message, EntryType::Write(_)));
    assert!(entry.data.is_some());
}

#[tokio::test]
async fn read_by_non_owner_without_grant_is_rejected() {
    let provider = ProviderImpl::new();
    let alice = provider.keyring(ALICE_DID).unwrap();
    let bob = provider.keyring(BOB_DID).unwrap();

    let write = WriteBuilder::new()
        .data(Data::Bytes(b"hello".to_vec()))
        .data_format("text/plain")
        .build(&alice)
        .await
        .unwrap();
    let message_cid = write.cid().unwrap();
    endpoint::handle(ALICE_DID, write, &provider).await.unwrap();

    let read = support::messages_read(message_cid, &bob).await.unwrap();
    let result = endpoint::handle(ALICE_DID, read, &provider).await;
    assert!(result.is_err());
}
