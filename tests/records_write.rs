//! Records write/read round trips: creating a record, updating it, and
//! rejecting stale or unauthorized writes.

mod support;

use dwn_node::endpoint;
use dwn_node::provider::KeyStore;
use dwn_node::records::{Data, ReadBuilder, RecordsFilter, Write, WriteBuilder};
use dwn_node::Error;
use test_node::{ProviderImpl, ALICE_DID, BOB_DID};

#[tokio::test]
async fn write_then_read() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let write = WriteBuilder::new()
        .data(Data::Bytes(br#"{"hello":"world"}"#.to_vec()))
        .data_format("application/json")
        .build(&signer)
        .await
        .unwrap();
    let record_id = write.record_id.clone();

    let reply = endpoint::handle(ALICE_DID, write, &provider).await.unwrap();
    assert_eq!(reply.status.code, 202);

    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(record_id.as_str()))
        .build(&signer)
        .await
        .unwrap();

    let reply = endpoint::handle(ALICE_DID, read, &provider).await.unwrap();
    let entry = reply.body.unwrap().entry;
    let fetched = entry.records_write.unwrap();
    assert_eq!(fetched.record_id, record_id);
    assert!(entry.data.is_some());
}

#[tokio::test]
async fn update_overwrites_record() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let initial = WriteBuilder::new()
        .data(Data::Bytes(b"v1".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();
    let record_id = initial.record_id.clone();
    endpoint::handle(ALICE_DID, initial, &provider).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let update = WriteBuilder::new()
        .record_id(record_id.as_str())
        .data(Data::Bytes(b"v2".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();
    let reply = endpoint::handle(ALICE_DID, update, &provider).await.unwrap();
    assert_eq!(reply.status.code, 202);

    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(record_id.as_str()))
        .build(&signer)
        .await
        .unwrap();
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.unwrap();
    let entry = reply.body.unwrap().entry;
    let write = entry.records_write.unwrap();
    assert!(write.encoded_data.is_none(), "encoded data is cleared before returning");
    assert!(entry.initial_write.is_some());
}

#[tokio::test]
async fn stale_write_is_rejected() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let initial = WriteBuilder::new()
        .data(Data::Bytes(b"v1".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();
    endpoint::handle(ALICE_DID, initial.clone(), &provider).await.unwrap();

    // re-submitting the exact same message is itself an "initial write" for
    // a record id that already exists.
    let replay: Write = initial;
    let result = endpoint::handle(ALICE_DID, replay, &provider).await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn unauthorized_signer_cannot_update_someone_elses_record() {
    let provider = ProviderImpl::new();
    let alice = provider.keyring(ALICE_DID).unwrap();
    let bob = provider.keyring(BOB_DID).unwrap();

    let initial = WriteBuilder::new()
        .data(Data::Bytes(b"v1".to_vec()))
        .data_format("text/plain")
        .build(&alice)
        .await
        .unwrap();
    let record_id = initial.record_id.clone();
    endpoint::handle(ALICE_DID, initial, &provider).await.unwrap();

    let update = WriteBuilder::new()
        .record_id(record_id.as_str())
        .data(Data::Bytes(b"v2".to_vec()))
        .data_format("text/plain")
        .build(&bob)
        .await
        .unwrap();

    let result = endpoint::handle(ALICE_DID, update, &provider).await;
    assert!(result.is_err());
}
