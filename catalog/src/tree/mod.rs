//! The in-memory tree built while processing one archive.
//!
//! A [Node] is either an archive (which is also a file, and therefore carries
//! its own digests) or a plain collection of files. Nodes reference their
//! contents through [SubFile] and [SubNode] edges, which carry the path the
//! entry was found at.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::DirectedGraph;
use crate::DigestTriple;

mod verification_code;

pub use verification_code::{
    calculate_verification_codes, Version, VerificationCode, VerificationCodes,
    VERSION_ONE_TAG, VERSION_TWO_TAG,
};

/// Shared handle to a [Node]. The same processed sub-archive may be attached
/// under several parents of one tree.
pub type NodeRef = Arc<RwLock<Node>>;

/// A regular file, identified by its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    pub digests: DigestTriple,
    pub size: u64,
}

impl File {
    /// A zero-length file. Also used as the identity of flagged entries.
    pub fn empty() -> Self {
        Self {
            digests: DigestTriple::empty(),
            size: 0,
        }
    }
}

/// What kind of directory entry a [SubFile] was found as.
/// Only [EntryKind::Regular] entries contribute to verification codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Regular,
    Symlink,
    /// Fifos, sockets, devices.
    Irregular,
}

#[derive(Clone, Debug)]
pub struct SubFile {
    pub path: PathBuf,
    pub file: Arc<File>,
    pub kind: EntryKind,
}

impl SubFile {
    pub fn is_regular(&self) -> bool {
        self.kind == EntryKind::Regular
    }

    /// The path as UTF-8, with ill-formed sequences replaced.
    pub fn display_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// The final path component as UTF-8, with ill-formed sequences replaced.
    pub fn name(&self) -> String {
        file_name_lossy(&self.path)
    }
}

#[derive(Clone, Debug)]
pub struct SubNode {
    pub path: PathBuf,
    pub node: NodeRef,
}

impl SubNode {
    pub fn display_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// The identity of an archive as a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArchiveIdentity {
    pub digests: DigestTriple,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Archive(ArchiveIdentity),
    FileCollection,
}

/// License information attached to a node. Empty strings are never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LicenseData {
    license: Option<String>,
    license_rationale: Option<String>,
    license_notice: Option<String>,
    automation_license: Option<String>,
    automation_license_rationale: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

impl LicenseData {
    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn set_license(&mut self, value: &str) {
        if let Some(v) = non_empty(value) {
            self.license = Some(v);
        }
    }

    pub fn license_rationale(&self) -> Option<&str> {
        self.license_rationale.as_deref()
    }

    pub fn set_license_rationale(&mut self, value: &str) {
        if let Some(v) = non_empty(value) {
            self.license_rationale = Some(v);
        }
    }

    pub fn license_notice(&self) -> Option<&str> {
        self.license_notice.as_deref()
    }

    pub fn set_license_notice(&mut self, value: &str) {
        if let Some(v) = non_empty(value) {
            self.license_notice = Some(v);
        }
    }

    pub fn automation_license(&self) -> Option<&str> {
        self.automation_license.as_deref()
    }

    pub fn set_automation_license(&mut self, value: &str) {
        if let Some(v) = non_empty(value) {
            self.automation_license = Some(v);
        }
    }

    pub fn automation_license_rationale(&self) -> Option<&str> {
        self.automation_license_rationale.as_deref()
    }

    pub fn set_automation_license_rationale(&mut self, value: &str) {
        if let Some(v) = non_empty(value) {
            self.automation_license_rationale = Some(v);
        }
    }
}

#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    name: String,
    pub license: LicenseData,
    files: Vec<SubFile>,
    nodes: Vec<SubNode>,
    codes: VerificationCodes,
    duplicates: Vec<NodeRef>,
}

impl Node {
    fn new(kind: NodeKind, name: String) -> Self {
        Self {
            kind,
            name,
            license: LicenseData::default(),
            files: Vec::new(),
            nodes: Vec::new(),
            codes: VerificationCodes::default(),
            duplicates: Vec::new(),
        }
    }

    pub fn archive(name: impl Into<String>, identity: ArchiveIdentity) -> Self {
        Self::new(NodeKind::Archive(identity), name.into())
    }

    pub fn file_collection(name: impl Into<String>) -> Self {
        Self::new(NodeKind::FileCollection, name.into())
    }

    pub fn into_ref(self) -> NodeRef {
        Arc::new(RwLock::new(self))
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The archive identity, if this node is an archive.
    pub fn identity(&self) -> Option<&ArchiveIdentity> {
        match &self.kind {
            NodeKind::Archive(identity) => Some(identity),
            NodeKind::FileCollection => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn files(&self) -> &[SubFile] {
        &self.files
    }

    pub fn nodes(&self) -> &[SubNode] {
        &self.nodes
    }

    pub fn duplicates(&self) -> &[NodeRef] {
        &self.duplicates
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>, file: Arc<File>, kind: EntryKind) {
        self.files.push(SubFile {
            path: path.into(),
            file,
            kind,
        });
    }

    pub fn add_node(&mut self, path: impl Into<PathBuf>, node: NodeRef) {
        self.nodes.push(SubNode {
            path: path.into(),
            node,
        });
    }

    pub fn verification_codes(&self) -> &VerificationCodes {
        &self.codes
    }

    pub fn verification_code_one(&self) -> Option<&VerificationCode> {
        self.codes.one.as_ref()
    }

    pub fn verification_code_two(&self) -> Option<&VerificationCode> {
        self.codes.two.as_ref()
    }

    pub(crate) fn set_verification_codes(&mut self, codes: VerificationCodes) {
        self.codes = codes;
    }

    /// Whether this node only wraps a single child and nothing else.
    pub fn is_wrapper(&self) -> bool {
        self.files.is_empty() && self.nodes.len() == 1
    }

    /// Collapses a wrapper into its only child: the child's files, nodes and
    /// codes replace this node's, and the child is remembered as a duplicate
    /// together with everything already collapsed into it.
    /// Returns false, leaving the node untouched, if it is not a wrapper.
    ///
    /// The child must not be this node itself.
    pub fn collapse_wrapper(&mut self) -> bool {
        if !self.is_wrapper() {
            return false;
        }

        let child_ref = self.nodes[0].node.clone();
        {
            let child = child_ref.read();
            self.files = child.files.clone();
            self.nodes = child.nodes.clone();
            self.codes = child.codes.clone();
            if self.license == LicenseData::default() {
                self.license = child.license.clone();
            }
            self.duplicates.extend(child.duplicates.iter().cloned());
        }
        self.duplicates.push(child_ref);
        true
    }
}

/// Returns the final component of a path as UTF-8, replacing ill-formed
/// sequences. Falls back to the whole path if there is no final component.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Builds the containment graph of a tree. Every distinct node gets a
/// numeric id in breadth-first discovery order (the root is 0), and every
/// [SubNode] edge is recorded, so a sub-archive attached twice has two
/// inbound edges.
pub fn containment_graph(root: &NodeRef) -> (DirectedGraph<u64, NodeRef>, u64) {
    let mut graph = DirectedGraph::new();
    let mut ids: HashMap<*const RwLock<Node>, u64> = HashMap::new();
    let mut pending = std::collections::VecDeque::new();

    ids.insert(Arc::as_ptr(root), 0);
    graph.insert(0, root.clone());
    pending.push_back((0u64, root.clone()));

    while let Some((id, node)) = pending.pop_front() {
        let children: Vec<NodeRef> = node.read().nodes().iter().map(|s| s.node.clone()).collect();
        for child in children {
            let next_id = ids.len() as u64;
            let child_id = *ids.entry(Arc::as_ptr(&child)).or_insert_with(|| {
                graph.insert(next_id, child.clone());
                pending.push_back((next_id, child.clone()));
                next_id
            });
            // both ids were inserted above, this cannot fail.
            let _ = graph.add_edge(&id, &child_id);
        }
    }

    (graph, 0)
}
