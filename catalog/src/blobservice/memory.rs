use std::io::{self, Cursor};
use std::task::Poll;
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use digest::Digest;
use parking_lot::RwLock;
use tracing::instrument;

use super::{BlobReader, BlobService, BlobWriter};
use crate::Sha256Digest;

#[derive(Clone, Default)]
pub struct MemoryBlobService {
    db: Arc<RwLock<HashMap<Sha256Digest, Vec<u8>>>>,
}

impl MemoryBlobService {
    /// Number of blobs stored.
    pub fn len(&self) -> usize {
        self.db.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.read().is_empty()
    }
}

#[async_trait]
impl BlobService for MemoryBlobService {
    #[instrument(skip(self, digest), fields(blob.digest=%digest))]
    async fn has(&self, digest: &Sha256Digest) -> io::Result<bool> {
        Ok(self.db.read().contains_key(digest))
    }

    async fn open_read(&self, digest: &Sha256Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        let db = self.db.read();

        match db.get(digest).map(|x| Cursor::new(x.clone())) {
            Some(result) => Ok(Some(Box::new(result))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn open_write(&self) -> Box<dyn BlobWriter> {
        Box::new(MemoryBlobWriter::new(self.db.clone()))
    }
}

pub struct MemoryBlobWriter {
    db: Arc<RwLock<HashMap<Sha256Digest, Vec<u8>>>>,

    /// Contains the buffer Vec and hasher, or None if already closed
    writers: Option<(Vec<u8>, sha2::Sha256)>,

    /// The digest that has been returned, if we successfully closed.
    digest: Option<Sha256Digest>,
}

impl MemoryBlobWriter {
    fn new(db: Arc<RwLock<HashMap<Sha256Digest, Vec<u8>>>>) -> Self {
        Self {
            db,
            writers: Some((Vec::new(), sha2::Sha256::new())),
            digest: None,
        }
    }
}

impl tokio::io::AsyncWrite for MemoryBlobWriter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        b: &[u8],
    ) -> std::task::Poll<Result<usize, io::Error>> {
        Poll::Ready(match &mut self.writers {
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "already closed",
            )),
            Some((ref mut buf, ref mut hasher)) => {
                buf.extend_from_slice(b);
                hasher.update(b);
                Ok(b.len())
            }
        })
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), io::Error>> {
        Poll::Ready(match self.writers {
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "already closed",
            )),
            Some(_) => Ok(()),
        })
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), io::Error>> {
        // shutdown is "instantaneous", we only write to memory.
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl BlobWriter for MemoryBlobWriter {
    async fn close(&mut self) -> io::Result<Sha256Digest> {
        let Some((buf, hasher)) = self.writers.take() else {
            return self.digest.ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "previously closed with error")
            });
        };

        let digest: Sha256Digest = hasher.finalize().into();

        // Only insert if the blob doesn't already exist.
        self.db.write().entry(digest).or_insert(buf);

        self.digest = Some(digest);

        Ok(digest)
    }
}
