//! Deleting a record: the tombstone replaces the latest write, reads of the
//! deleted record fail, and a stale delete is rejected.

use dwn_node::endpoint;
use dwn_node::provider::KeyStore;
use dwn_node::records::{Data, DeleteBuilder, ReadBuilder, RecordsFilter, WriteBuilder};
use test_node::{ProviderImpl, ALICE_DID};

#[tokio::test]
async fn delete_then_read_fails() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let write = WriteBuilder::new()
        .data(Data::Bytes(b"hello".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();
    let record_id = write.record_id.clone();
    endpoint::handle(ALICE_DID, write, &provider).await.unwrap();

    let delete = DeleteBuilder::new().record_id(record_id.as_str()).build(&signer).await.unwrap();
    let reply = endpoint::handle(ALICE_DID, delete, &provider).await.unwrap();
    assert_eq!(reply.status.code, 202);

    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(record_id.as_str()))
        .build(&signer)
        .await
        .unwrap();
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.unwrap();
    assert_eq!(reply.status.code, 404);

    let entry = reply.body.unwrap().entry;
    assert!(entry.records_write.is_none());
    assert!(entry.records_delete.is_some());
    assert_eq!(entry.initial_write.unwrap().record_id, record_id);
}

#[tokio::test]
async fn deleting_a_delete_without_prune_is_rejected() {
    let provider = ProviderImpl::new();
    let signer = provider.keyring(ALICE_DID).unwrap();

    let write = WriteBuilder::new()
        .data(Data::Bytes(b"hello".to_vec()))
        .data_format("text/plain")
        .build(&signer)
        .await
        .unwrap();
    let record_id = write.record_id.clone();
    endpoint::handle(ALICE_DID, write, &provider).await.unwrap();

    let delete = DeleteBuilder::new().record_id(record_id.as_str()).build(&signer).await.unwrap();
    endpoint::handle(ALICE_DID, delete, &provider).await.unwrap();

    let second = DeleteBuilder::new().record_id(record_id.as_str()).build(&signer).await.unwrap();
    let result = endpoint::handle(ALICE_DID, second, &provider).await;
    assert!(result.is_err());
}
