use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use super::{
    ArchiveRecord, CatalogService, FileRecord, PartChild, PartFile, PartId, PartRecord,
};
use crate::tree::{self, ArchiveIdentity, Node, NodeRef, VerificationCode};
use crate::{Error, Sha256Digest};

#[derive(Default)]
struct Db {
    next_part_id: u64,
    parts: HashMap<PartId, PartRecord>,
    parts_by_code: HashMap<VerificationCode, PartId>,
    archives: HashMap<Sha256Digest, ArchiveRecord>,
    files: HashMap<Sha256Digest, FileRecord>,
}

fn code_two(node: &Node) -> Result<VerificationCode, Error> {
    node.verification_code_two()
        .cloned()
        .ok_or_else(|| Error::MissingDigest(format!("verification code of {}", node.name())))
}

impl Db {
    fn upsert_archive(&mut self, name: &str, identity: &ArchiveIdentity) -> &mut ArchiveRecord {
        let record = self
            .archives
            .entry(identity.digests.sha256)
            .or_insert_with(|| ArchiveRecord {
                identity: *identity,
                aliases: BTreeSet::new(),
                part_id: None,
            });
        if !name.is_empty() {
            record.aliases.insert(name.to_owned());
        }
        record
    }

    /// Records the part of a single node, plus the archive records of the
    /// node itself and of everything collapsed into it.
    fn upsert_node(&mut self, node: &Node) -> Result<PartId, Error> {
        let code = code_two(node)?;

        let part_id = match self.parts_by_code.get(&code) {
            Some(part_id) => *part_id,
            None => {
                let parts = node
                    .nodes()
                    .iter()
                    .map(|sub_node| {
                        Ok(PartChild {
                            path: sub_node.display_path(),
                            verification_code: code_two(&sub_node.node.read())?,
                        })
                    })
                    .collect::<Result<Vec<_>, Error>>()?;

                let mut files = Vec::with_capacity(node.files().len());
                for sub_file in node.files() {
                    let sha256 = sub_file.file.digests.sha256;
                    if sub_file.is_regular() {
                        self.files
                            .entry(sha256)
                            .or_insert_with(|| FileRecord {
                                file: (*sub_file.file).clone(),
                                aliases: BTreeSet::new(),
                            })
                            .aliases
                            .insert(sub_file.name());
                    }
                    files.push(PartFile {
                        path: sub_file.display_path(),
                        sha256,
                        kind: sub_file.kind,
                    });
                }

                let part_id = PartId(self.next_part_id);
                self.next_part_id += 1;
                self.parts.insert(
                    part_id,
                    PartRecord {
                        id: part_id,
                        verification_code_two: code.clone(),
                        verification_code_one: node.verification_code_one().cloned(),
                        license: node.license.clone(),
                        files,
                        parts,
                    },
                );
                self.parts_by_code.insert(code, part_id);
                debug!(%part_id, node = %node.name(), "inserted part");
                part_id
            }
        };

        if let Some(identity) = node.identity() {
            self.upsert_archive(node.name(), identity).part_id = Some(part_id);
        }
        for duplicate in node.duplicates() {
            let duplicate = duplicate.read();
            if let Some(identity) = duplicate.identity() {
                self.upsert_archive(duplicate.name(), identity).part_id = Some(part_id);
            }
        }

        Ok(part_id)
    }
}

/// Keeps the catalog in memory. Clones share the same catalog.
#[derive(Clone, Default)]
pub struct MemoryCatalogService {
    db: Arc<RwLock<Db>>,
}

#[async_trait]
impl CatalogService for MemoryCatalogService {
    #[instrument(skip(self, identity), fields(archive.sha256 = %identity.digests.sha256), err)]
    async fn sync_archive(
        &self,
        name: &str,
        identity: &ArchiveIdentity,
    ) -> Result<Option<PartId>, Error> {
        Ok(self.db.write().upsert_archive(name, identity).part_id)
    }

    async fn get_by_verification_code(
        &self,
        code: &VerificationCode,
    ) -> Result<Option<PartId>, Error> {
        Ok(self.db.read().parts_by_code.get(code).copied())
    }

    #[instrument(skip_all, err)]
    async fn put_tree(&self, root: &NodeRef) -> Result<PartId, Error> {
        let (graph, root_id) = tree::containment_graph(root);

        // Check every node is ready before writing anything.
        graph.traverse_unique_edges(&[root_id], |_, node| -> Result<(), Error> {
            code_two(&node.read()).map(|_| ())
        })?;

        let mut db = self.db.write();
        let mut root_part_id = None;
        graph.traverse_unique_edges(&[root_id], |id, node| -> Result<(), Error> {
            let part_id = db.upsert_node(&node.read())?;
            if *id == root_id {
                root_part_id = Some(part_id);
            }
            Ok(())
        })?;

        root_part_id.ok_or_else(|| Error::StorageError("root part was not recorded".to_string()))
    }

    async fn get_part(&self, id: PartId) -> Result<Option<PartRecord>, Error> {
        Ok(self.db.read().parts.get(&id).cloned())
    }

    async fn get_archive(&self, sha256: &Sha256Digest) -> Result<Option<ArchiveRecord>, Error> {
        Ok(self.db.read().archives.get(sha256).cloned())
    }

    async fn get_file(&self, sha256: &Sha256Digest) -> Result<Option<FileRecord>, Error> {
        Ok(self.db.read().files.get(sha256).cloned())
    }
}
