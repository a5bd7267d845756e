//! Helpers to build tarballs in memory, and tests running real archives
//! through extraction, processing and verification code calculation.
use std::sync::Arc;

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_tar::{Builder, EntryType, Header};

use crate::extract::TarExtractor;
use crate::fixtures::{BLOB_A, BLOB_B, HELLO_CONTENTS};
use crate::processor::ArchiveProcessor;
use crate::tree::{calculate_verification_codes, EntryKind, NodeRef, VERSION_TWO_TAG};

enum TarEntryKind<'a> {
    File(&'a [u8]),
    Symlink(&'a str),
}

/// A member of a tarball built by [build_tar].
pub(crate) struct TarEntry<'a> {
    path: &'a str,
    kind: TarEntryKind<'a>,
}

impl<'a> TarEntry<'a> {
    pub fn file(path: &'a str, contents: &'a [u8]) -> Self {
        Self {
            path,
            kind: TarEntryKind::File(contents),
        }
    }

    pub fn symlink(path: &'a str, target: &'a str) -> Self {
        Self {
            path,
            kind: TarEntryKind::Symlink(target),
        }
    }
}

/// Builds an uncompressed tarball with the given members, in order.
pub(crate) async fn build_tar(entries: &[TarEntry<'_>]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());

    for entry in entries {
        let mut header = Header::new_gnu();
        header.set_mode(0o644);
        header.set_mtime(0);
        match entry.kind {
            TarEntryKind::File(contents) => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(contents.len() as u64);
                builder
                    .append_data(&mut header, entry.path, contents)
                    .await
                    .expect("must append file");
            }
            TarEntryKind::Symlink(target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                header.set_link_name(target).expect("must set link name");
                builder
                    .append_data(&mut header, entry.path, tokio::io::empty())
                    .await
                    .expect("must append symlink");
            }
        }
    }

    builder.into_inner().await.expect("must finish tarball")
}

async fn gzip(contents: &[u8]) -> Vec<u8> {
    let mut encoder = async_compression::tokio::write::GzipEncoder::new(Vec::new());
    encoder.write_all(contents).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

/// The version two code of a tree holding exactly these regular files.
fn expected_code_two(contents: &[&[u8]]) -> String {
    let mut digests: Vec<[u8; 32]> = contents
        .iter()
        .map(|c| Sha256::digest(c).into())
        .collect();
    digests.sort();

    let mut hasher = Sha256::new();
    for digest in &digests {
        hasher.update(digest);
    }

    let mut code = VERSION_TWO_TAG.to_vec();
    code.extend_from_slice(&hasher.finalize());
    HEXLOWER.encode(&code)
}

fn code_two(node: &NodeRef) -> String {
    node.read()
        .verification_code_two()
        .expect("code must be calculated")
        .to_string()
}

async fn process(name: &str, contents: &[u8]) -> NodeRef {
    let tmpdir = tempfile::tempdir().unwrap();
    let path = tmpdir.path().join(name);
    tokio::fs::write(&path, contents).await.unwrap();

    let mut processor = ArchiveProcessor::new(Arc::new(TarExtractor), tmpdir.path().join("scratch"));
    let root = processor.process_archive(&path).await.expect("must process");
    calculate_verification_codes(&root).expect("must calculate");
    root
}

#[tokio::test]
async fn nested_compressed_archive() {
    let inner = gzip(
        &build_tar(&[
            TarEntry::file("crt", &BLOB_B),
            TarEntry::file("empty", b""),
            TarEntry::symlink("symlink", "crt"),
        ])
        .await,
    )
    .await;
    let outer = build_tar(&[
        TarEntry::file("date.txt", BLOB_A),
        TarEntry::file("docs/date.txt", BLOB_A),
        TarEntry::file("sub/inner.tar.gz", &inner),
    ])
    .await;

    let root = process("outer.tar", &outer).await;

    assert_eq!(
        expected_code_two(&[BLOB_A, BLOB_A, BLOB_B.as_slice(), b""]),
        code_two(&root)
    );

    let root = root.read();
    let inner = &root.nodes()[0].node;
    assert_eq!(expected_code_two(&[BLOB_B.as_slice(), b""]), code_two(inner));

    let inner = inner.read();
    assert_eq!(3, inner.files().len());
    assert_eq!(EntryKind::Symlink, inner.files()[2].kind);
}

#[tokio::test]
async fn member_order_and_paths_do_not_matter() {
    let first = build_tar(&[
        TarEntry::file("a", BLOB_A),
        TarEntry::file("b", &BLOB_B),
        TarEntry::file("c", HELLO_CONTENTS),
    ])
    .await;
    let second = gzip(
        &build_tar(&[
            TarEntry::file("z/hello", HELLO_CONTENTS),
            TarEntry::file("y/x/blob", &BLOB_B),
            TarEntry::file("text", BLOB_A),
        ])
        .await,
    )
    .await;

    let first = process("first.tar", &first).await;
    let second = process("second.tar.gz", &second).await;

    assert_eq!(code_two(&first), code_two(&second));
    assert_ne!(
        first.read().verification_code_one(),
        None,
        "version one code must be calculated too"
    );
    assert_eq!(
        first.read().verification_code_one(),
        second.read().verification_code_one()
    );
}

#[tokio::test]
async fn wrapper_archive_collapses() {
    let inner = build_tar(&[
        TarEntry::file("a", BLOB_A),
        TarEntry::file("b", HELLO_CONTENTS),
    ])
    .await;
    let outer = gzip(&build_tar(&[TarEntry::file("release/inner.tar", &inner)]).await).await;

    let root = process("outer.tar.gz", &outer).await;

    let root = root.read();
    assert_eq!("outer.tar.gz", root.name());
    assert_eq!(
        expected_code_two(&[BLOB_A, HELLO_CONTENTS]),
        root.verification_code_two().unwrap().to_string()
    );
    assert_eq!(2, root.files().len());
    assert!(root.nodes().is_empty());
    assert_eq!(1, root.duplicates().len());
    assert_eq!("inner.tar", root.duplicates()[0].read().name());
}
