use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use data_encoding::HEXLOWER;
use digest::Digest;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use super::{Node, NodeRef};
use crate::{Error, Sha1Digest, Sha256Digest};

pub const VERSION_ONE_TAG: &[u8; 5] = b"FVC1\0";
pub const VERSION_TWO_TAG: &[u8; 5] = b"FVC2\0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Version {
    /// SHA-1 over the sorted SHA-1 digests.
    One,
    /// SHA-256 over the sorted SHA-256 digests.
    Two,
}

impl Version {
    pub fn tag(&self) -> &'static [u8; 5] {
        match self {
            Version::One => VERSION_ONE_TAG,
            Version::Two => VERSION_TWO_TAG,
        }
    }

    fn code_len(&self) -> usize {
        5 + match self {
            Version::One => crate::SHA1_LEN,
            Version::Two => crate::SHA256_LEN,
        }
    }
}

/// A verification code: a version tag followed by the hash over the sorted
/// digests of every regular file contained in a node, at any depth.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VerificationCode(Bytes);

impl VerificationCode {
    fn compute<H, D>(version: Version, mut digests: Vec<D>) -> Self
    where
        H: Digest,
        D: AsRef<[u8]> + Ord,
    {
        digests.sort_unstable();

        let mut hasher = H::new();
        for digest in &digests {
            hasher.update(digest.as_ref());
        }

        let mut code = Vec::with_capacity(version.code_len());
        code.extend_from_slice(version.tag());
        code.extend_from_slice(&hasher.finalize());
        Self(code.into())
    }

    pub fn version(&self) -> Version {
        if self.0.starts_with(VERSION_ONE_TAG) {
            Version::One
        } else {
            Version::Two
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }
}

impl TryFrom<Vec<u8>> for VerificationCode {
    type Error = crate::DigestError;

    // Accepts a tagged code of the right length for its version.
    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let version = if value.starts_with(VERSION_ONE_TAG) {
            Version::One
        } else if value.starts_with(VERSION_TWO_TAG) {
            Version::Two
        } else {
            return Err(crate::DigestError::InvalidDigestLen(value.len()));
        };
        if value.len() != version.code_len() {
            return Err(crate::DigestError::InvalidDigestLen(value.len()));
        }
        Ok(Self(value.into()))
    }
}

impl std::str::FromStr for VerificationCode {
    type Err = crate::DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(data_encoding::HEXLOWER_PERMISSIVE.decode(s.as_bytes())?)
    }
}

impl std::fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&HEXLOWER.encode(&self.0))
    }
}

impl std::fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fvc:{}", HEXLOWER.encode(&self.0))
    }
}

/// The codes of both versions. A version is `None` if some contained regular
/// file lacks the digest that version needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationCodes {
    pub one: Option<VerificationCode>,
    pub two: Option<VerificationCode>,
}

/// All digests beneath a node. Each list turns into `None` as soon as one
/// regular file is missing that digest.
#[derive(Clone)]
struct Accumulator {
    sha1: Option<Vec<Sha1Digest>>,
    sha256: Option<Vec<Sha256Digest>>,
}

impl Accumulator {
    fn from_node(node: &Node) -> Self {
        let mut acc = Self {
            sha1: Some(Vec::new()),
            sha256: Some(Vec::new()),
        };
        for sub_file in node.files().iter().filter(|f| f.is_regular()) {
            let digests = &sub_file.file.digests;
            push_valid(&mut acc.sha1, digests.sha1, Sha1Digest::is_valid);
            push_valid(&mut acc.sha256, digests.sha256, Sha256Digest::is_valid);
        }
        acc
    }

    fn extend(&mut self, other: &Accumulator) {
        extend_list(&mut self.sha1, &other.sha1);
        extend_list(&mut self.sha256, &other.sha256);
    }

    fn codes(&self) -> VerificationCodes {
        VerificationCodes {
            one: self
                .sha1
                .clone()
                .map(|digests| VerificationCode::compute::<sha1::Sha1, _>(Version::One, digests)),
            two: self.sha256.clone().map(|digests| {
                VerificationCode::compute::<sha2::Sha256, _>(Version::Two, digests)
            }),
        }
    }
}

fn push_valid<D>(list: &mut Option<Vec<D>>, digest: D, is_valid: fn(&D) -> bool) {
    if !is_valid(&digest) {
        *list = None;
    } else if let Some(list) = list {
        list.push(digest);
    }
}

fn extend_list<D: Clone>(list: &mut Option<Vec<D>>, other: &Option<Vec<D>>) {
    match (list.as_mut(), other) {
        (Some(list), Some(other)) => list.extend_from_slice(other),
        _ => *list = None,
    }
}

type NodeKey = *const RwLock<Node>;

#[derive(Default)]
struct Calculator {
    memo: HashMap<NodeKey, Accumulator>,
    in_progress: HashSet<NodeKey>,
    // nodes in post-order, each with its computed codes.
    order: Vec<(NodeRef, VerificationCodes)>,
}

impl Calculator {
    fn accumulate(&mut self, node_ref: &NodeRef) -> Result<Accumulator, Error> {
        let key = Arc::as_ptr(node_ref);
        if let Some(acc) = self.memo.get(&key) {
            return Ok(acc.clone());
        }

        let (mut acc, children, name) = {
            let node = node_ref.read();
            (
                Accumulator::from_node(&node),
                node.nodes()
                    .iter()
                    .map(|sub_node| sub_node.node.clone())
                    .collect::<Vec<_>>(),
                node.name().to_owned(),
            )
        };

        if !self.in_progress.insert(key) {
            return Err(Error::CycleDetected(name));
        }

        for child in &children {
            let child_acc = self.accumulate(child)?;
            acc.extend(&child_acc);
        }

        let codes = acc.codes();
        if codes.two.is_none() {
            debug!(node = %name, "version two code unavailable, sha256 missing");
        }

        self.in_progress.remove(&key);
        self.memo.insert(key, acc.clone());
        self.order.push((node_ref.clone(), codes));

        Ok(acc)
    }
}

/// Computes the verification codes of every node in the tree and collapses
/// single-child wrappers into their child.
///
/// Nothing in the tree is modified unless the whole computation succeeds.
/// Nodes shared by several parents are computed once.
#[instrument(skip_all, err)]
pub fn calculate_verification_codes(root: &NodeRef) -> Result<(), Error> {
    let mut calculator = Calculator::default();
    calculator.accumulate(root)?;

    for (node_ref, codes) in calculator.order {
        let mut node = node_ref.write();
        node.set_verification_codes(codes);
        if node.collapse_wrapper() {
            debug!(node = %node.name(), "collapsed wrapper node");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::{calculate_verification_codes, Version, VerificationCode};
    use crate::fixtures::{
        archive_identity, reference_tree, regular_file, BLOB_A, BLOB_B,
        HELLO_CONTENTS, REFERENCE_CODE_ONE, REFERENCE_CODE_ONE_FLAGGED, REFERENCE_CODE_TWO,
        REFERENCE_CODE_TWO_FLAGGED, SUB_ARCHIVE_CODE_TWO, SUB_ARCHIVE_CODE_TWO_FLAGGED,
    };
    use crate::tree::{EntryKind, File, Node, NodeRef};
    use crate::{DigestTriple, Error, Sha256Digest};

    fn codes_of(node: &NodeRef) -> (Option<String>, Option<String>) {
        let node = node.read();
        (
            node.verification_code_one().map(|c| c.to_string()),
            node.verification_code_two().map(|c| c.to_string()),
        )
    }

    #[rstest]
    #[case::symlink_regular(EntryKind::Regular, REFERENCE_CODE_ONE, REFERENCE_CODE_TWO, SUB_ARCHIVE_CODE_TWO)]
    #[case::symlink_flagged(EntryKind::Symlink, REFERENCE_CODE_ONE_FLAGGED, REFERENCE_CODE_TWO_FLAGGED, SUB_ARCHIVE_CODE_TWO_FLAGGED)]
    fn reference_tree_codes(
        #[case] symlink_kind: EntryKind,
        #[case] exp_one: &str,
        #[case] exp_two: &str,
        #[case] exp_sub_two: &str,
    ) {
        let root = reference_tree(symlink_kind);
        calculate_verification_codes(&root).expect("must succeed");

        assert_eq!(
            (Some(exp_one.to_string()), Some(exp_two.to_string())),
            codes_of(&root)
        );

        let sub = root.read().nodes()[0].node.clone();
        assert_eq!(Some(exp_sub_two.to_string()), codes_of(&sub).1);
    }

    #[rstest]
    #[case::one(Version::One, "4656433100da39a3ee5e6b4b0d3255bfef95601890afd80709")]
    #[case::two(
        Version::Two,
        "4656433200e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    )]
    fn empty_node(#[case] version: Version, #[case] expected: &str) {
        let root = Node::file_collection("empty").into_ref();
        calculate_verification_codes(&root).expect("must succeed");

        let code = match version {
            Version::One => root.read().verification_code_one().cloned(),
            Version::Two => root.read().verification_code_two().cloned(),
        }
        .expect("code must be set");
        assert_eq!(expected, code.to_string());
        assert_eq!(version, code.version());
    }

    /// The same files distributed differently, in a different order and under
    /// different names produce the same code.
    #[test]
    fn independent_of_structure_and_order() {
        let flat = Node::file_collection("flat").into_ref();
        for (name, contents) in [
            ("date.txt", BLOB_A),
            ("crt", BLOB_B.as_slice()),
            ("hello", HELLO_CONTENTS),
        ] {
            flat.write()
                .add_file(name, regular_file(contents), EntryKind::Regular);
        }

        let nested_leaf = Node::file_collection("leaf").into_ref();
        nested_leaf
            .write()
            .add_file("x/y/certificate.pem", regular_file(BLOB_B.as_slice()), EntryKind::Regular);
        nested_leaf
            .write()
            .add_file("greeting", regular_file(HELLO_CONTENTS), EntryKind::Regular);
        let nested = Node::archive("nested.tar", archive_identity(b"nested")).into_ref();
        nested.write().add_node("leaf", nested_leaf);
        nested
            .write()
            .add_file("other-date", regular_file(BLOB_A), EntryKind::Regular);

        calculate_verification_codes(&flat).unwrap();
        calculate_verification_codes(&nested).unwrap();

        assert_eq!(codes_of(&flat), codes_of(&nested));
    }

    #[test]
    fn different_content_different_code() {
        let a = Node::file_collection("a").into_ref();
        a.write()
            .add_file("f", regular_file(BLOB_A), EntryKind::Regular);
        let b = Node::file_collection("b").into_ref();
        b.write()
            .add_file("f", regular_file(HELLO_CONTENTS), EntryKind::Regular);

        calculate_verification_codes(&a).unwrap();
        calculate_verification_codes(&b).unwrap();

        assert_ne!(codes_of(&a), codes_of(&b));
    }

    #[test]
    fn wrapper_collapses_and_is_idempotent() {
        let inner = Node::archive("inner.tar", archive_identity(b"inner")).into_ref();
        inner
            .write()
            .add_file("date.txt", regular_file(BLOB_A), EntryKind::Regular);
        let wrapper = Node::archive("wrapper.tar.gz", archive_identity(b"wrapper")).into_ref();
        wrapper.write().add_node("inner.tar", inner.clone());

        calculate_verification_codes(&wrapper).unwrap();

        {
            let w = wrapper.read();
            assert_eq!(1, w.files().len());
            assert!(w.nodes().is_empty());
            assert_eq!(1, w.duplicates().len());
            assert!(Arc::ptr_eq(&inner, &w.duplicates()[0]));
            assert_eq!(w.verification_code_two(), inner.read().verification_code_two());
        }

        let codes_before = codes_of(&wrapper);
        calculate_verification_codes(&wrapper).unwrap();
        assert_eq!(codes_before, codes_of(&wrapper));
        assert_eq!(1, wrapper.read().duplicates().len());
    }

    /// A child shared by two parents counts twice towards the root, but is
    /// computed and collapsed only once.
    #[test]
    fn shared_child() {
        let shared = Node::file_collection("shared").into_ref();
        shared
            .write()
            .add_file("crt", regular_file(BLOB_B.as_slice()), EntryKind::Regular);

        let root = Node::file_collection("root").into_ref();
        root.write().add_node("a/shared", shared.clone());
        root.write().add_node("b/shared", shared.clone());

        let flat = Node::file_collection("flat").into_ref();
        flat.write()
            .add_file("1", regular_file(BLOB_B.as_slice()), EntryKind::Regular);
        flat.write()
            .add_file("2", regular_file(BLOB_B.as_slice()), EntryKind::Regular);

        calculate_verification_codes(&root).unwrap();
        calculate_verification_codes(&flat).unwrap();

        assert_eq!(codes_of(&flat), codes_of(&root));
        assert_eq!(2, root.read().nodes().len());
        assert!(shared.read().duplicates().is_empty());
    }

    #[test]
    fn missing_sha256_disables_version_two() {
        let mut digests = DigestTriple::from_bytes(HELLO_CONTENTS);
        digests.sha256 = Sha256Digest::unset();

        let root = Node::file_collection("root").into_ref();
        let child = Node::file_collection("child").into_ref();
        child.write().add_file(
            "hello",
            Arc::new(File { digests, size: 6 }),
            EntryKind::Regular,
        );
        root.write()
            .add_file("date.txt", regular_file(BLOB_A), EntryKind::Regular);
        root.write().add_node("child", child.clone());

        calculate_verification_codes(&root).unwrap();

        let (one, two) = codes_of(&root);
        assert!(one.is_some());
        assert_eq!(None, two);
        assert_eq!(None, codes_of(&child).1);
    }

    #[test]
    fn cycle_is_reported_and_nothing_applied() {
        let a = Node::file_collection("a").into_ref();
        let b = Node::file_collection("b").into_ref();
        a.write()
            .add_file("date.txt", regular_file(BLOB_A), EntryKind::Regular);
        b.write()
            .add_file("crt", regular_file(BLOB_B.as_slice()), EntryKind::Regular);
        a.write().add_node("b", b.clone());
        b.write().add_node("a", a.clone());

        let root = Node::file_collection("root").into_ref();
        root.write().add_node("a", a.clone());
        root.write()
            .add_file("hello", regular_file(HELLO_CONTENTS), EntryKind::Regular);

        assert!(matches!(
            calculate_verification_codes(&root),
            Err(Error::CycleDetected(_))
        ));
        for node in [&root, &a, &b] {
            assert_eq!((None, None), codes_of(node));
        }
    }

    #[test]
    fn parse_code() {
        let code: VerificationCode = REFERENCE_CODE_TWO.parse().expect("must parse");
        assert_eq!(Version::Two, code.version());
        assert_eq!(REFERENCE_CODE_TWO, code.to_string());

        assert!("4656433200ca03".parse::<VerificationCode>().is_err());
        assert!("00".repeat(37).parse::<VerificationCode>().is_err());
    }
}
