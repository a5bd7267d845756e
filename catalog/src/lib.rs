mod digests;
mod errors;
mod hashing_reader;

pub mod blobservice;
pub mod catalogservice;
pub mod config;
pub mod controller;
pub mod extract;
pub mod graph;
pub mod processor;
pub mod tree;

#[cfg(test)]
pub(crate) mod fixtures;

// Required by rstest_reuse's #[template]/#[apply].
#[cfg(test)]
use rstest_reuse;

pub use digests::{
    DigestTriple, Error as DigestError, Md5Digest, Sha1Digest, Sha256Digest, EMPTY_MD5,
    EMPTY_SHA1, EMPTY_SHA256, MD5_LEN, SHA1_LEN, SHA256_LEN,
};
pub use errors::Error;
pub use hashing_reader::{HashingReader, Sha256HashingReader};

#[cfg(test)]
mod tests;
