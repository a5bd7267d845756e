use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

mod tar;

pub use self::tar::TarExtractor;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The source is not something this extractor can unpack, or it is
    /// corrupt. Callers treat the source as a plain file instead.
    #[error("{path} is not a recognizable archive: {reason}")]
    NotAnArchive { path: PathBuf, reason: String },

    #[error("i/o error extracting {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Unpacks one archive into a directory.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Whether the file looks like an archive this extractor can unpack,
    /// judged by its signature.
    async fn is_extractable(&self, path: &Path) -> io::Result<bool>;

    /// Unpacks `source` into the existing directory `target` and returns the
    /// directory holding the extracted contents.
    ///
    /// On error, nothing usable must be left in `target`.
    async fn extract(&self, source: &Path, target: &Path) -> Result<PathBuf, Error>;
}

#[async_trait]
impl<A> Extractor for A
where
    A: AsRef<dyn Extractor> + Send + Sync,
{
    async fn is_extractable(&self, path: &Path) -> io::Result<bool> {
        self.as_ref().is_extractable(path).await
    }

    async fn extract(&self, source: &Path, target: &Path) -> Result<PathBuf, Error> {
        self.as_ref().extract(source, target).await
    }
}
