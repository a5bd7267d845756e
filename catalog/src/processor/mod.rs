//! Builds a [Node] tree out of an archive on disk.
//!
//! The archive is extracted into scratch space and walked. Files are hashed
//! and deduplicated by sha256 across the whole run, and every file that looks
//! like an archive is extracted and walked in turn. A package graph of all
//! archives seen in the run guards against archives that (transitively)
//! contain themselves.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, instrument, trace, warn};

use crate::blobservice::BlobService;
use crate::extract::Extractor;
use crate::graph::DirectedGraph;
use crate::tree::{self, ArchiveIdentity, EntryKind, File, Node, NodeRef};
use crate::{DigestTriple, Error, Sha256Digest};

mod queue;

use self::queue::DirectoryQueue;

/// Counters kept for one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Regular files hashed, including duplicates.
    pub files_seen: u64,
    /// Regular files whose content was already known.
    pub files_deduplicated: u64,
    pub archives_extracted: u64,
    /// Sub-archives attached again without extracting them a second time.
    pub archives_reused: u64,
    /// Sub-archives that would have contained themselves.
    pub cycles_skipped: u64,
    /// Sub-archives that could not be extracted and were kept as files.
    pub extraction_fallbacks: u64,
}

/// An archive in the package graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct PackageKey {
    sha256: Sha256Digest,
    size: u64,
}

impl From<&ArchiveIdentity> for PackageKey {
    fn from(value: &ArchiveIdentity) -> Self {
        Self {
            sha256: value.digests.sha256,
            size: value.size,
        }
    }
}

/// Computes the digests and size of a file on disk.
#[instrument(level = "trace", skip_all, fields(path = %path.display()), err)]
pub async fn identify(path: &Path) -> Result<ArchiveIdentity, Error> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    let (digests, size) = DigestTriple::from_reader(file)
        .await
        .map_err(|e| Error::io(path, e))?;

    Ok(ArchiveIdentity { digests, size })
}

/// Sum of the sizes of the entries directly below `dir`.
async fn content_size(dir: &Path) -> Result<u64, Error> {
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io(dir, e))?;

    let mut size = 0u64;
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| Error::io(dir, e))? {
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| Error::io(entry.path(), e))?;
        if metadata.is_file() {
            size = size.saturating_add(metadata.len());
        }
    }
    Ok(size)
}

fn remove_scratch(scratch: tempfile::TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!(path = %path.display(), err = %e, "unable to remove scratch directory");
    }
}

pub struct ArchiveProcessor {
    extractor: Arc<dyn Extractor>,
    blob_service: Option<Arc<dyn BlobService>>,
    scratch_dir: PathBuf,

    // Everything below is scoped to one run.
    file_map: HashMap<Sha256Digest, Arc<File>>,
    // Only holds archives whose processing has completed.
    archive_map: HashMap<Sha256Digest, NodeRef>,
    package_graph: DirectedGraph<PackageKey, String>,
    stats: ProcessorStats,
}

impl ArchiveProcessor {
    pub fn new(extractor: Arc<dyn Extractor>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            blob_service: None,
            scratch_dir: scratch_dir.into(),
            file_map: HashMap::new(),
            archive_map: HashMap::new(),
            package_graph: DirectedGraph::new(),
            stats: ProcessorStats::default(),
        }
    }

    /// Store the contents of newly discovered files and archives in the
    /// given [BlobService].
    pub fn with_blob_service(mut self, blob_service: Arc<dyn BlobService>) -> Self {
        self.blob_service = Some(blob_service);
        self
    }

    /// The counters of the last run.
    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Number of distinct files seen in the last run.
    pub fn file_count(&self) -> usize {
        self.file_map.len()
    }

    fn reset(&mut self) {
        self.file_map.clear();
        self.archive_map.clear();
        self.package_graph = DirectedGraph::new();
        self.stats = ProcessorStats::default();
    }

    /// Builds the tree of the archive at `path`.
    ///
    /// If the file at `path` can not be extracted, this fails with
    /// [Error::ExtractionFailed] and the caller decides how to treat it.
    /// Any state of a previous run is discarded first.
    #[instrument(skip(self), fields(path = %path.display()), err)]
    pub async fn process_archive(&mut self, path: &Path) -> Result<NodeRef, Error> {
        self.reset();
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| Error::io(&self.scratch_dir, e))?;

        let identity = identify(path).await?;
        let name = tree::file_name_lossy(path);
        let key = PackageKey::from(&identity);
        self.package_graph.insert(key, name.clone());

        let node = Node::archive(name, identity).into_ref();
        self.extract_and_walk(&node, key, path).await?;

        self.store_blob(path, &identity.digests.sha256).await?;
        self.archive_map.insert(identity.digests.sha256, node.clone());

        info!(
            files = self.file_map.len(),
            archives = self.archive_map.len(),
            stats = ?self.stats,
            "processed archive"
        );

        Ok(node)
    }

    /// Extracts the archive at `path` into fresh scratch space and walks it
    /// into `node`. The scratch space is removed on every path out.
    async fn extract_and_walk(
        &mut self,
        node: &NodeRef,
        key: PackageKey,
        path: &Path,
    ) -> Result<(), Error> {
        let scratch = tempfile::Builder::new()
            .prefix("extract-")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| Error::io(&self.scratch_dir, e))?;

        let result: Result<(), Error> = async {
            let root = self.extractor.extract(path, scratch.path()).await?;
            self.stats.archives_extracted += 1;
            self.walk(node, key, &root).await
        }
        .await;

        remove_scratch(scratch);
        result
    }

    /// Walks the extracted contents below `root`, smallest directories first.
    fn walk<'a>(
        &'a mut self,
        node: &'a NodeRef,
        key: PackageKey,
        root: &'a Path,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let mut queue = DirectoryQueue::default();
            queue.push(root.to_path_buf(), 0);

            while let Some(dir) = queue.pop() {
                trace!(dir = %dir.display(), pending = queue.len(), "walking directory");

                let mut read_dir = tokio::fs::read_dir(&dir)
                    .await
                    .map_err(|e| Error::io(&dir, e))?;
                let mut entries = Vec::new();
                while let Some(entry) = read_dir
                    .next_entry()
                    .await
                    .map_err(|e| Error::io(&dir, e))?
                {
                    entries.push(entry.path());
                }
                entries.sort();

                for entry_path in entries {
                    let metadata = tokio::fs::symlink_metadata(&entry_path)
                        .await
                        .map_err(|e| Error::io(&entry_path, e))?;
                    let file_type = metadata.file_type();

                    if file_type.is_dir() {
                        let size = content_size(&entry_path).await?;
                        queue.push(entry_path, size);
                        continue;
                    }

                    let rel = entry_path
                        .strip_prefix(root)
                        .unwrap_or(&entry_path)
                        .to_path_buf();

                    if file_type.is_symlink() {
                        self.add_flagged(node, rel, EntryKind::Symlink);
                    } else if !file_type.is_file() {
                        self.add_flagged(node, rel, EntryKind::Irregular);
                    } else if self
                        .extractor
                        .is_extractable(&entry_path)
                        .await
                        .map_err(|e| Error::io(&entry_path, e))?
                    {
                        self.add_nested(node, key, &entry_path, rel).await?;
                    } else {
                        self.add_file(node, &entry_path, rel).await?;
                    }
                }
            }

            Ok(())
        })
    }

    /// Attaches the archive at `path` below `parent`, extracting it unless it
    /// was already processed in this run. Falls back to a plain file if it
    /// can not be extracted or would contain itself.
    async fn add_nested(
        &mut self,
        parent: &NodeRef,
        parent_key: PackageKey,
        path: &Path,
        rel: PathBuf,
    ) -> Result<(), Error> {
        let identity = identify(path).await?;
        let sha256 = identity.digests.sha256;

        if let Some(existing) = self.archive_map.get(&sha256).cloned() {
            debug!(path = %rel.display(), %sha256, "reusing processed archive");
            self.stats.archives_reused += 1;
            parent.write().add_node(rel, existing);
            return Ok(());
        }

        let key = PackageKey::from(&identity);
        let name = tree::file_name_lossy(path);
        self.package_graph.insert(key, name.clone());
        self.package_graph.add_edge(&parent_key, &key)?;

        if self.package_graph.is_in_cycle(&key)? {
            warn!(path = %rel.display(), %sha256, "archive contains itself, keeping it as a file");
            self.stats.cycles_skipped += 1;
            return self.add_file(parent, path, rel).await;
        }

        let node = Node::archive(name, identity).into_ref();
        match self.extract_and_walk(&node, key, path).await {
            Ok(()) => {
                self.store_blob(path, &sha256).await?;
                self.archive_map.insert(sha256, node.clone());
                parent.write().add_node(rel, node);
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                debug!(path = %rel.display(), err = %e, "unable to extract, keeping it as a file");
                self.stats.extraction_fallbacks += 1;
                self.add_file(parent, path, rel).await
            }
            Err(e) => Err(e),
        }
    }

    /// Hashes the regular file at `path` and attaches it below `node`,
    /// reusing the [File] of identical content seen earlier in the run.
    async fn add_file(&mut self, node: &NodeRef, path: &Path, rel: PathBuf) -> Result<(), Error> {
        let identity = identify(path).await?;
        let sha256 = identity.digests.sha256;
        self.stats.files_seen += 1;

        let file = if let Some(existing) = self.file_map.get(&sha256).cloned() {
            self.stats.files_deduplicated += 1;
            existing
        } else {
            let file = Arc::new(File {
                digests: identity.digests,
                size: identity.size,
            });
            self.file_map.insert(sha256, file.clone());
            if identity.size > 0 {
                self.store_blob(path, &sha256).await?;
            }
            file
        };

        trace!(path = %rel.display(), %sha256, size = identity.size, "adding file");
        node.write().add_file(rel, file, EntryKind::Regular);
        Ok(())
    }

    /// Records an entry that does not contribute to verification codes.
    fn add_flagged(&mut self, node: &NodeRef, rel: PathBuf, kind: EntryKind) {
        let empty = File::empty();
        let file = self
            .file_map
            .entry(empty.digests.sha256)
            .or_insert_with(|| Arc::new(empty))
            .clone();

        trace!(path = %rel.display(), ?kind, "adding flagged entry");
        node.write().add_file(rel, file, kind);
    }

    async fn store_blob(&self, path: &Path, digest: &Sha256Digest) -> Result<(), Error> {
        let Some(blob_service) = &self.blob_service else {
            return Ok(());
        };

        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let stored = blob_service.store(digest, &mut file).await.map_err(|e| {
            Error::StorageError(format!("unable to store {}: {}", path.display(), e))
        })?;

        trace!(%digest, stored, "stored blob");
        Ok(())
    }
}
