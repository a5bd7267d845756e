use std::sync::Arc;

use hex_literal::hex;
use lazy_static::lazy_static;

use crate::tree::{ArchiveIdentity, EntryKind, File, Node, NodeRef};
use crate::{DigestTriple, Sha256Digest};

pub const HELLO_CONTENTS: &[u8] = b"hello\n";
pub const BLOB_A: &[u8] = b"the quick brown fox jumps over the lazy dog\n";

// The reference archive: test.tar.bz2 holds date.txt and the nested
// tar.utf8.tar.bz2, which holds a zero-length /symlink and /crt.
pub const REFERENCE_CODE_ONE: &str = "4656433100f12e6bd501fe66041f13dab81e18ff7c83f58f0d";
pub const REFERENCE_CODE_TWO: &str =
    "4656433200ca036383b3b7394126e7311bac9987a2d80fc42258ad61f84eaa096deb003eab";
pub const SUB_ARCHIVE_CODE_TWO: &str =
    "4656433200dbd030a03e14206852eac92a2205c5577a15e69c57cd3a540eeabaea899b7fb0";

// The same tree, with /symlink recorded as an actual symlink.
pub const REFERENCE_CODE_ONE_FLAGGED: &str = "46564331006c28d899750db0a6668e54feacd8c97c23121533";
pub const REFERENCE_CODE_TWO_FLAGGED: &str =
    "46564332009f27fad6e618d4c03aa094ca04e7c8783732968e495e504b41cc7e81ddceb05b";
pub const SUB_ARCHIVE_CODE_TWO_FLAGGED: &str =
    "4656433200ed99ee92646bcb4c04f31b0c5c3b8feb01917602494f4ba13adc07fc90a30425";

lazy_static! {
    pub static ref HELLO_DIGESTS: DigestTriple = DigestTriple {
        sha256: hex!("5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03").into(),
        sha1: hex!("f572d396fae9206628714fb2ce00f72e94f2258f").into(),
        md5: hex!("b1946ac92492d2347c6235b4d2611184").into(),
    };

    /// 2 KiB of non-repeating-ish bytes.
    pub static ref BLOB_B: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();

    pub static ref BLOB_A_DIGEST: Sha256Digest = DigestTriple::from_bytes(BLOB_A).sha256;
    pub static ref BLOB_B_DIGEST: Sha256Digest = DigestTriple::from_bytes(&BLOB_B).sha256;

    pub static ref DATE_FILE: File = File {
        digests: DigestTriple {
            sha256: hex!("80f3d9f67e1e3b664e50d1e932b5489b3a3e547d0a6ea97e0d0c888864d6dec6").into(),
            sha1: hex!("ef9d9765295a3a1ec0aae05efa2d22a51819d800").into(),
            md5: hex!("679a9b342d4ce61a9df5073d14c39a07").into(),
        },
        size: 32,
    };
    pub static ref CRT_FILE: File = File {
        digests: DigestTriple {
            sha256: hex!("a33f0b33767fc513e888d765c05ca0e541c83c4908b0b1a62474ed827aa40844").into(),
            sha1: hex!("2ad82f4e421b26112b78f00983c9adedc0dea51e").into(),
            md5: hex!("087176ee8cf10810f8f68f8dbd0d6632").into(),
        },
        size: 2106,
    };

    pub static ref ROOT_ARCHIVE: ArchiveIdentity = ArchiveIdentity {
        digests: DigestTriple {
            sha256: hex!("837f0da343583b0995e51de26b6fb848103221b5fdfdd1d742746765042bd5ec").into(),
            sha1: hex!("dbf0265e662276ace37bab2917fee95edde31138").into(),
            md5: hex!("87683b1fb6e6fa1e3de887df15ac5de9").into(),
        },
        size: 920,
    };
    pub static ref SUB_ARCHIVE: ArchiveIdentity = ArchiveIdentity {
        digests: DigestTriple {
            sha256: hex!("ee87767de57b973d084c9f0bcda3266bf443b8d18803ed4588064f31f9c48069").into(),
            sha1: hex!("753f0d2905bbb73229177552a94efb8150729459").into(),
            md5: hex!("6f5f71b9112325ceab9d458ea23a85e3").into(),
        },
        size: 519,
    };
}

pub fn regular_file(contents: &[u8]) -> Arc<File> {
    Arc::new(File {
        digests: DigestTriple::from_bytes(contents),
        size: contents.len() as u64,
    })
}

pub fn archive_identity(contents: &[u8]) -> ArchiveIdentity {
    ArchiveIdentity {
        digests: DigestTriple::from_bytes(contents),
        size: contents.len() as u64,
    }
}

/// Builds the reference tree as the processor would have, with the
/// zero-length /symlink entry recorded with the given kind.
pub fn reference_tree(symlink_kind: EntryKind) -> NodeRef {
    let sub = Node::archive("tar.utf8.tar.bz2", *SUB_ARCHIVE).into_ref();
    sub.write()
        .add_file("symlink", Arc::new(File::empty()), symlink_kind);
    sub.write()
        .add_file("crt", Arc::new(CRT_FILE.clone()), EntryKind::Regular);

    let root = Node::archive("test.tar.bz2", *ROOT_ARCHIVE).into_ref();
    root.write()
        .add_file("date.txt", Arc::new(DATE_FILE.clone()), EntryKind::Regular);
    root.write().add_node("tar.utf8.tar.bz2", sub);
    root
}
