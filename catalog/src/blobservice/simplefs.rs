use std::{
    io,
    path::{Path, PathBuf},
    pin::pin,
    task::Poll,
};

use async_trait::async_trait;
use data_encoding::HEXLOWER;
use digest::Digest;
use pin_project_lite::pin_project;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::Sha256Digest;

use super::{BlobReader, BlobService, BlobWriter};

/// A BlobService on an existing path backed by a POSIX-compliant filesystem.
///
/// It takes an existing path, builds a `tmp` directory and a `blobs` directory inside of it. All
/// blobs received are staged in that `tmp` directory, then they are moved **atomically** into
/// `blobs/SHA256[:2]/SHA256` in a sharding style, e.g. `abcdef` gets turned into `ab/abcdef`
#[derive(Clone)]
pub struct SimpleFilesystemBlobService {
    /// Where the blobs are located on a filesystem already mounted.
    path: PathBuf,
}

impl SimpleFilesystemBlobService {
    pub async fn new(path: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&path).await?;
        tokio::fs::create_dir_all(path.join("tmp")).await?;
        tokio::fs::create_dir_all(path.join("blobs")).await?;

        Ok(Self { path })
    }
}

fn derive_path(root: &Path, digest: &Sha256Digest) -> PathBuf {
    let prefix = HEXLOWER.encode(&digest.as_slice()[..1]);
    let pathname = HEXLOWER.encode(digest.as_slice());

    root.join("blobs").join(prefix).join(pathname)
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "this file is already closed")
}

#[async_trait]
impl BlobService for SimpleFilesystemBlobService {
    #[instrument(skip_all, ret, err, fields(blob.digest=%digest))]
    async fn has(&self, digest: &Sha256Digest) -> io::Result<bool> {
        tokio::fs::try_exists(derive_path(&self.path, digest)).await
    }

    #[instrument(skip_all, err, fields(blob.digest=%digest))]
    async fn open_read(&self, digest: &Sha256Digest) -> io::Result<Option<Box<dyn BlobReader>>> {
        match tokio::fs::File::open(derive_path(&self.path, digest)).await {
            Ok(file) => {
                let reader: Box<dyn BlobReader> = Box::new(file);
                Ok(Some(reader))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip_all)]
    async fn open_write(&self) -> Box<dyn BlobWriter> {
        let file = match async_tempfile::TempFile::new_in(self.path.join("tmp")).await {
            Ok(file) => Ok(file),
            Err(e) => match e {
                async_tempfile::Error::Io(io_error) => Err(io_error),
                async_tempfile::Error::InvalidFile => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "invalid or missing file specified",
                )),
                async_tempfile::Error::InvalidDirectory => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "invalid or missing directory specified",
                )),
            },
        };

        Box::new(SimpleFilesystemBlobWriter {
            root: self.path.clone(),
            file,
            digester: sha2::Sha256::new(),
            digest: None,
        })
    }
}

pin_project! {
    struct SimpleFilesystemBlobWriter {
        root: PathBuf,
        file: io::Result<async_tempfile::TempFile>,
        digester: sha2::Sha256,
        digest: Option<Sha256Digest>,
    }
}

impl tokio::io::AsyncWrite for SimpleFilesystemBlobWriter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, io::Error>> {
        let this = self.as_mut().project();
        let writer = match this.file.as_mut() {
            Ok(writer) => writer,
            Err(e) => return Poll::Ready(Err(std::mem::replace(e, closed_error()))),
        };

        match pin!(writer).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.digester.update(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), io::Error>> {
        match self.file.as_mut() {
            Ok(writer) => pin!(writer).poll_flush(cx),
            Err(e) => Poll::Ready(Err(std::mem::replace(e, closed_error()))),
        }
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), io::Error>> {
        match self.file.as_mut() {
            Ok(writer) => pin!(writer).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(std::mem::replace(e, closed_error()))),
        }
    }
}

#[async_trait]
impl BlobWriter for SimpleFilesystemBlobWriter {
    async fn close(&mut self) -> io::Result<Sha256Digest> {
        if let Some(digest) = self.digest {
            return Ok(digest);
        }

        let writer = match self.file.as_mut() {
            Ok(writer) => writer,
            Err(e) => return Err(std::mem::replace(e, closed_error())),
        };
        writer.flush().await?;
        writer.sync_all().await?;

        let digest: Sha256Digest = std::mem::take(&mut self.digester).finalize().into();
        let dst_path = derive_path(&self.root, &digest);
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(writer.file_path(), dst_path).await?;

        self.file = Err(closed_error());
        self.digest = Some(digest);

        Ok(digest)
    }
}
