//! This contains test scenarios that a given [BlobService] needs to pass.
//! We use [rstest] and [rstest_reuse] to provide all services we want to test
//! against, and then apply this template to all test functions.

use rstest::*;
use rstest_reuse::{self, *};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;

use super::BlobService;
use crate::blobservice;
use crate::fixtures::BLOB_A;
use crate::fixtures::BLOB_A_DIGEST;
use crate::fixtures::BLOB_B;
use crate::fixtures::BLOB_B_DIGEST;
use crate::Error;

/// A [blobservice::SimpleFilesystemBlobService] in a directory that outlives
/// the test.
async fn make_simplefs() -> Arc<dyn BlobService> {
    let path = tempfile::tempdir()
        .expect("must create tempdir")
        .into_path();
    blobservice::from_addr(&format!("simplefs://{}", path.display()))
        .await
        .expect("must construct")
}

/// This produces a template, which will be applied to all individual test functions.
/// See https://github.com/la10736/rstest/issues/130#issuecomment-968864832
#[template]
#[rstest]
#[case::memory(blobservice::from_addr("memory://").await.unwrap())]
#[case::simplefs(make_simplefs().await)]
pub fn blob_services(#[case] blob_service: impl BlobService) {}

/// Using [BlobService::has] on a non-existing blob should return false.
#[apply(blob_services)]
#[tokio::test]
async fn has_nonexistent_false(blob_service: impl BlobService) {
    assert!(!blob_service
        .has(&BLOB_A_DIGEST)
        .await
        .expect("must not fail"));
}

/// Trying to read a non-existing blob should return a None instead of a reader,
/// and retrieve turns that into NotFound.
#[apply(blob_services)]
#[tokio::test]
async fn not_found_read(blob_service: impl BlobService) {
    assert!(blob_service
        .open_read(&BLOB_A_DIGEST)
        .await
        .expect("must not fail")
        .is_none());

    assert!(matches!(
        blob_service.retrieve(&BLOB_A_DIGEST).await,
        Err(Error::NotFound(_))
    ));
}

/// Put a blob in the store, check has, get it back.
#[apply(blob_services)]
#[tokio::test]
async fn put_has_get(blob_service: impl BlobService) {
    for (blob_contents, blob_digest) in [(BLOB_A, *BLOB_A_DIGEST), (BLOB_B.as_slice(), *BLOB_B_DIGEST)] {
        let mut w = blob_service.open_write().await;

        let l = tokio::io::copy(&mut io::Cursor::new(blob_contents), &mut w)
            .await
            .expect("copy must succeed");
        assert_eq!(
            blob_contents.len(),
            l as usize,
            "written bytes must match blob length"
        );

        let digest = w.close().await.expect("close must succeed");

        assert_eq!(blob_digest, digest, "returned digest must be correct");

        assert!(
            blob_service.has(&blob_digest).await.expect("must not fail"),
            "blob service should now have the blob"
        );

        let mut r = blob_service
            .retrieve(&blob_digest)
            .await
            .expect("retrieve must succeed");

        let mut buf: Vec<u8> = Vec::new();
        let l = tokio::io::copy(&mut r, &mut buf)
            .await
            .expect("copy must succeed");

        assert_eq!(
            blob_contents.len(),
            l as usize,
            "read bytes must match blob length"
        );

        assert_eq!(blob_contents, &buf[..], "read blob contents must match");
    }
}

/// Storing the same contents twice only writes them once.
#[apply(blob_services)]
#[tokio::test]
async fn store_is_idempotent(blob_service: impl BlobService) {
    assert!(blob_service
        .store(&BLOB_A_DIGEST, &mut io::Cursor::new(BLOB_A))
        .await
        .expect("first store must succeed"));

    assert!(!blob_service
        .store(&BLOB_A_DIGEST, &mut io::Cursor::new(BLOB_A))
        .await
        .expect("second store must succeed"));

    let mut buf = Vec::new();
    blob_service
        .retrieve(&BLOB_A_DIGEST)
        .await
        .expect("must be present")
        .read_to_end(&mut buf)
        .await
        .expect("must read");
    assert_eq!(BLOB_A, &buf[..]);
}

/// Content that does not match the announced digest is rejected.
#[apply(blob_services)]
#[tokio::test]
async fn store_rejects_mismatch(blob_service: impl BlobService) {
    let err = blob_service
        .store(&BLOB_A_DIGEST, &mut io::Cursor::new(BLOB_B.as_slice()))
        .await
        .expect_err("must fail");
    assert_eq!(io::ErrorKind::InvalidData, err.kind());

    assert!(!blob_service.has(&BLOB_A_DIGEST).await.unwrap());
}

/// Put a blob in the store, and seek inside it a bit.
#[apply(blob_services)]
#[tokio::test]
async fn put_seek(blob_service: impl BlobService) {
    blob_service
        .store(&BLOB_B_DIGEST, &mut io::Cursor::new(BLOB_B.as_slice()))
        .await
        .expect("store must succeed");

    let mut r = blob_service
        .open_read(&BLOB_B_DIGEST)
        .await
        .expect("open_read must succeed")
        .expect("must be some");

    let mut pos: u64 = 0;

    // read the first 10 bytes, they must match the data in the fixture.
    {
        let mut buf = [0; 10];
        r.read_exact(&mut buf).await.expect("must succeed");
        assert_eq!(&BLOB_B[..10], buf, "expected first 10 bytes to match");
        pos += buf.len() as u64;
    }

    // seek by 5 bytes, using SeekFrom::Current.
    let p = r
        .seek(io::SeekFrom::Current(5))
        .await
        .expect("must not fail");
    pos += 5;
    assert_eq!(pos, p);

    {
        let mut buf = [0; 10];
        r.read_exact(&mut buf).await.expect("must succeed");
        assert_eq!(
            &BLOB_B[pos as usize..pos as usize + buf.len()],
            buf,
            "expected data to match"
        );
    }

    // seeking to the end is okay, but returns no more data.
    let p = r
        .seek(io::SeekFrom::Start(BLOB_B.len() as u64))
        .await
        .expect("must not fail");
    assert_eq!(BLOB_B.len() as u64, p);

    let mut buf: Vec<u8> = Vec::new();
    r.read_to_end(&mut buf).await.expect("must not fail");
    assert!(buf.is_empty(), "expected no more data to be read");
}
