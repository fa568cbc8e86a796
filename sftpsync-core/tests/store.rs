use sftpsync_core::{ErrorClass, RemoteEntry, RemoteError, RemoteReader, remote_join};

#[tokio::test]
async fn reader_yields_chunks_in_order_then_ends() {
    let (tx, mut reader) = RemoteReader::channel(4);
    tx.send(Ok(b"he".to_vec())).await.unwrap();
    tx.send(Ok(b"llo".to_vec())).await.unwrap();
    drop(tx);

    let mut body = Vec::new();
    while let Some(chunk) = reader.next_chunk().await {
        body.extend(chunk.unwrap());
    }
    assert_eq!(body, b"hello");
}

#[tokio::test]
async fn reader_surfaces_producer_errors() {
    let (tx, mut reader) = RemoteReader::channel(1);
    tx.send(Err(RemoteError::NotFound("/data/a.csv".into())))
        .await
        .unwrap();

    let err = reader.next_chunk().await.unwrap().unwrap_err();
    assert_eq!(err.classification(), ErrorClass::NotFound);
}

#[tokio::test]
async fn dropping_reader_closes_the_channel() {
    let (tx, reader) = RemoteReader::channel(1);
    drop(reader);
    assert!(tx.send(Ok(vec![1])).await.is_err());
}

#[test]
fn entries_compare_by_value() {
    let a = RemoteEntry::from_unix("report_v1.csv", 100, 1);
    let b = RemoteEntry::from_unix("report_v1.csv", 100, 1);
    assert_eq!(a, b);
    assert_eq!(a.modified_at.unix_timestamp(), 1);
    assert_eq!(remote_join("/a", &a.name), "/a/report_v1.csv");
}
