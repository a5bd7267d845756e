use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::{Error, Sha256Digest};

mod from_addr;
mod memory;
mod simplefs;

#[cfg(test)]
mod tests;

pub use self::from_addr::from_addr;
pub use self::memory::MemoryBlobService;
pub use self::simplefs::SimpleFilesystemBlobService;

/// The base trait all BlobService services need to implement.
/// Blobs are addressed by the sha256 digest of their contents.
/// It provides functions to check whether a given blob exists,
/// a way to read (and seek) a blob, and a method to create a blobwriter handle,
/// which will implement a writer interface, and also provides a close funtion,
/// to finalize a blob and get its digest.
#[async_trait]
pub trait BlobService: Send + Sync {
    /// Check if the service has the blob, by its content hash.
    async fn has(&self, digest: &Sha256Digest) -> io::Result<bool>;

    /// Request a blob from the store, by its content hash.
    async fn open_read(&self, digest: &Sha256Digest) -> io::Result<Option<Box<dyn BlobReader>>>;

    /// Insert a new blob into the store. Returns a [BlobWriter], which
    /// implements [tokio::io::AsyncWrite] and a [BlobWriter::close] to finalize
    /// the blob and get its digest.
    async fn open_write(&self) -> Box<dyn BlobWriter>;

    /// Stores the contents of `r`, which are announced to have the given
    /// digest.
    /// Storing a blob that is already present is a no-op and returns false.
    /// Content whose digest turns out to differ is rejected.
    async fn store(
        &self,
        digest: &Sha256Digest,
        r: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<bool> {
        if self.has(digest).await? {
            return Ok(false);
        }

        let mut writer = self.open_write().await;
        tokio::io::copy(r, &mut writer).await?;
        let written_digest = writer.close().await?;

        if written_digest != *digest {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("announced blob {} but received {}", digest, written_digest),
            ));
        }
        Ok(true)
    }

    /// Like [BlobService::open_read], but a missing blob is an error.
    async fn retrieve(&self, digest: &Sha256Digest) -> Result<Box<dyn BlobReader>, Error> {
        self.open_read(digest)
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("blob {}", digest)))
    }
}

#[async_trait]
impl<A> BlobService for A
where
    A: AsRef<dyn BlobService> + Send + Sync,
{
    async fn has(&self, digest: &Sha256Digest) -> io::Result<bool> {
        self.as_ref().has(digest).await
    }

    async fn open_read(&self, digest: &Sha256Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        self.as_ref().open_read(digest).await
    }

    async fn open_write(&self) -> Box<dyn BlobWriter> {
        self.as_ref().open_write().await
    }

    async fn store(
        &self,
        digest: &Sha256Digest,
        r: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<bool> {
        self.as_ref().store(digest, r).await
    }

    async fn retrieve(&self, digest: &Sha256Digest) -> Result<Box<dyn BlobReader>, Error> {
        self.as_ref().retrieve(digest).await
    }
}

/// A [tokio::io::AsyncWrite] that the user needs to close() afterwards for persist.
/// On success, it returns the digest of the written blob.
#[async_trait]
pub trait BlobWriter: tokio::io::AsyncWrite + Send + Unpin {
    /// Signal there's no more data to be written, and return the digest of the
    /// contents written.
    ///
    /// Closing a already-closed BlobWriter is a no-op.
    async fn close(&mut self) -> io::Result<Sha256Digest>;
}

/// BlobReader is a [tokio::io::AsyncRead] that also allows seeking.
pub trait BlobReader: tokio::io::AsyncRead + tokio::io::AsyncSeek + Send + Unpin + 'static {}

impl BlobReader for io::Cursor<Vec<u8>> {}
impl BlobReader for io::Cursor<bytes::Bytes> {}
impl BlobReader for tokio::fs::File {}
