//! Persistence of processed trees.
//!
//! A catalog keeps three kinds of records: archives (keyed by the sha256 of
//! the archive file), files (keyed by sha256) and parts. A part is the
//! deduplicated content of an archive or file collection, keyed by its
//! version two verification code, so archives with identical content share a
//! part. Names an archive or file has been seen under are kept as aliases.
use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::tree::{ArchiveIdentity, EntryKind, File, LicenseData, NodeRef, VerificationCode};
use crate::{Error, Sha256Digest};

mod memory;

pub use self::memory::MemoryCatalogService;

/// A stable identifier of a part within one catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartId(pub u64);

impl std::fmt::Display for PartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "part-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartFile {
    pub path: String,
    pub sha256: Sha256Digest,
    pub kind: EntryKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartChild {
    pub path: String,
    pub verification_code: VerificationCode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    pub id: PartId,
    pub verification_code_two: VerificationCode,
    pub verification_code_one: Option<VerificationCode>,
    pub license: LicenseData,
    pub files: Vec<PartFile>,
    pub parts: Vec<PartChild>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub identity: ArchiveIdentity,
    pub aliases: BTreeSet<String>,
    /// None until the archive has been fully processed.
    pub part_id: Option<PartId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub file: File,
    pub aliases: BTreeSet<String>,
}

#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Records that an archive has been seen under `name`, creating a
    /// minimal record if it is new.
    /// Returns the part id if the archive has already been processed.
    async fn sync_archive(
        &self,
        name: &str,
        identity: &ArchiveIdentity,
    ) -> Result<Option<PartId>, Error>;

    /// Looks up a part by its version two verification code.
    async fn get_by_verification_code(
        &self,
        code: &VerificationCode,
    ) -> Result<Option<PartId>, Error>;

    /// Upserts a tree whose verification codes have been calculated, and
    /// returns the id of the root's part. Putting the same tree twice
    /// returns the same id.
    async fn put_tree(&self, root: &NodeRef) -> Result<PartId, Error>;

    async fn get_part(&self, id: PartId) -> Result<Option<PartRecord>, Error>;

    async fn get_archive(&self, sha256: &Sha256Digest) -> Result<Option<ArchiveRecord>, Error>;

    async fn get_file(&self, sha256: &Sha256Digest) -> Result<Option<FileRecord>, Error>;
}

#[async_trait]
impl<A> CatalogService for A
where
    A: AsRef<dyn CatalogService> + Send + Sync,
{
    async fn sync_archive(
        &self,
        name: &str,
        identity: &ArchiveIdentity,
    ) -> Result<Option<PartId>, Error> {
        self.as_ref().sync_archive(name, identity).await
    }

    async fn get_by_verification_code(
        &self,
        code: &VerificationCode,
    ) -> Result<Option<PartId>, Error> {
        self.as_ref().get_by_verification_code(code).await
    }

    async fn put_tree(&self, root: &NodeRef) -> Result<PartId, Error> {
        self.as_ref().put_tree(root).await
    }

    async fn get_part(&self, id: PartId) -> Result<Option<PartRecord>, Error> {
        self.as_ref().get_part(id).await
    }

    async fn get_archive(&self, sha256: &Sha256Digest) -> Result<Option<ArchiveRecord>, Error> {
        self.as_ref().get_archive(sha256).await
    }

    async fn get_file(&self, sha256: &Sha256Digest) -> Result<Option<FileRecord>, Error> {
        self.as_ref().get_file(sha256).await
    }
}
