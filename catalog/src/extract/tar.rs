use std::io;
use std::path::{Path, PathBuf};

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder, ZstdDecoder};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, instrument, warn};

use super::{Error, Extractor};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = *b"BZh";
const XZ_MAGIC: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const USTAR_MAGIC: [u8; 5] = *b"ustar";
const USTAR_MAGIC_OFFSET: usize = 257;

/// Enough leading bytes to recognize any supported format.
const BYTES_NEEDED: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

fn sniff(magic: &[u8]) -> Option<Compression> {
    if magic.starts_with(&GZIP_MAGIC) {
        Some(Compression::Gzip)
    } else if magic.starts_with(&BZIP2_MAGIC) {
        Some(Compression::Bzip2)
    } else if magic.starts_with(&XZ_MAGIC) {
        Some(Compression::Xz)
    } else if magic.starts_with(&ZSTD_MAGIC) {
        Some(Compression::Zstd)
    } else if magic
        .get(USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + USTAR_MAGIC.len())
        .is_some_and(|m| m == USTAR_MAGIC)
    {
        Some(Compression::None)
    } else {
        None
    }
}

async fn read_header(file: &mut tokio::fs::File) -> io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(BYTES_NEEDED);
    file.take(BYTES_NEEDED as u64).read_to_end(&mut header).await?;
    Ok(header)
}

/// Extracts tarballs, optionally compressed with gzip, bzip2, xz or zstd.
///
/// Compressed streams are assumed to contain a tarball; a compressed file
/// holding anything else fails extraction with [Error::NotAnArchive].
#[derive(Clone, Debug, Default)]
pub struct TarExtractor;

#[async_trait]
impl Extractor for TarExtractor {
    async fn is_extractable(&self, path: &Path) -> io::Result<bool> {
        let mut file = tokio::fs::File::open(path).await?;
        Ok(sniff(&read_header(&mut file).await?).is_some())
    }

    #[instrument(skip(self), fields(source = %source.display()), err)]
    async fn extract(&self, source: &Path, target: &Path) -> Result<PathBuf, Error> {
        let io_err = |source_err: io::Error| Error::Io {
            path: source.to_path_buf(),
            source: source_err,
        };

        let mut file = tokio::fs::File::open(source).await.map_err(io_err)?;
        let header = read_header(&mut file).await.map_err(io_err)?;
        let compression = sniff(&header).ok_or_else(|| Error::NotAnArchive {
            path: source.to_path_buf(),
            reason: "unknown signature".to_string(),
        })?;
        file.rewind().await.map_err(io_err)?;

        debug!(?compression, "detected format");

        let buffered = BufReader::new(file);
        let reader: Box<dyn AsyncRead + Send + Unpin> = match compression {
            Compression::None => Box::new(buffered),
            Compression::Gzip => {
                let mut decoder = GzipDecoder::new(buffered);
                decoder.multiple_members(true);
                Box::new(decoder)
            }
            Compression::Bzip2 => Box::new(BzDecoder::new(buffered)),
            Compression::Xz => Box::new(XzDecoder::new(buffered)),
            Compression::Zstd => Box::new(ZstdDecoder::new(buffered)),
        };

        let mut archive = tokio_tar::ArchiveBuilder::new(reader)
            .set_preserve_permissions(false)
            .set_preserve_mtime(false)
            .set_unpack_xattrs(false)
            .build();

        match archive.unpack(target).await {
            Ok(()) => Ok(target.to_path_buf()),
            Err(e) => {
                clear_dir(target).await;
                if is_os_error(&e) {
                    Err(Error::Io {
                        path: target.to_path_buf(),
                        source: e,
                    })
                } else {
                    Err(Error::NotAnArchive {
                        path: source.to_path_buf(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

/// Whether `e` is a failure of the environment rather than a corrupt stream.
///
/// tokio-tar wraps the errors of its file operations, sometimes keeping only
/// the kind, so both the OS error codes along the chain and the kind count.
fn is_os_error(e: &io::Error) -> bool {
    if !matches!(
        e.kind(),
        io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Other
    ) {
        return true;
    }

    let mut source = e
        .get_ref()
        .map(|inner| inner as &(dyn std::error::Error + 'static));
    while let Some(err) = source {
        if err
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.raw_os_error().is_some())
        {
            return true;
        }
        source = err.source();
    }
    e.raw_os_error().is_some()
}

/// Removes everything below `dir`, keeping `dir` itself.
async fn clear_dir(dir: &Path) {
    let result = async {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok::<(), io::Error>(())
    }
    .await;

    if let Err(e) = result {
        warn!(dir = %dir.display(), err = %e, "unable to clear partial extraction");
    }
}
