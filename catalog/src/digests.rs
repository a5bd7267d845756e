use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use digest::Digest;
use lazy_static::lazy_static;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::HashingReader;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid digest length: {0}")]
    InvalidDigestLen(usize),

    #[error("invalid hex encoding: {0}")]
    InvalidEncoding(#[from] data_encoding::DecodeError),
}

pub const SHA256_LEN: usize = 32;
pub const SHA1_LEN: usize = 20;
pub const MD5_LEN: usize = 16;

/// Declares a fixed-size digest newtype.
/// The all-zero value is reserved as the "unset" marker, see `is_valid`.
macro_rules! fixed_digest {
    ($(#[$meta:meta])* $name:ident, $len:ident, $hasher:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            /// The all-zero digest, standing in for "not computed".
            pub const fn unset() -> Self {
                Self([0; $len])
            }

            pub fn as_slice(&self) -> &[u8] {
                &self.0[..]
            }

            /// A digest is valid unless every byte is zero.
            pub fn is_valid(&self) -> bool {
                self.0.iter().any(|b| *b != 0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::unset()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.as_slice()
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(value: [u8; $len]) -> Self {
                Self(value)
            }
        }

        impl From<&[u8; $len]> for $name {
            fn from(value: &[u8; $len]) -> Self {
                Self(*value)
            }
        }

        impl From<$name> for [u8; $len] {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl From<digest::Output<$hasher>> for $name {
            fn from(value: digest::Output<$hasher>) -> Self {
                Self(Into::<[u8; $len]>::into(value))
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = Error;

            // Returns an error if the digest has the wrong length.
            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                <[u8; $len]>::try_from(value)
                    .map(Self)
                    .map_err(|_| Error::InvalidDigestLen(value.len()))
            }
        }

        impl TryFrom<Vec<u8>> for $name {
            type Error = Error;

            fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
                Self::try_from(value.as_slice())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::try_from(HEXLOWER_PERMISSIVE.decode(s.as_bytes())?)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&HEXLOWER.encode(&self.0))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}:{}", stringify!($name), HEXLOWER.encode(&self.0))
            }
        }
    };
}

fixed_digest!(
    /// A SHA-256 digest. Files and archives are keyed by it.
    Sha256Digest,
    SHA256_LEN,
    sha2::Sha256
);
fixed_digest!(
    /// A SHA-1 digest, only used for version one verification codes.
    Sha1Digest,
    SHA1_LEN,
    sha1::Sha1
);
fixed_digest!(
    /// An MD5 digest, recorded for catalog compatibility.
    Md5Digest,
    MD5_LEN,
    md5::Md5
);

lazy_static! {
    pub static ref EMPTY_SHA256: Sha256Digest = sha2::Sha256::digest(b"").into();
    pub static ref EMPTY_SHA1: Sha1Digest = sha1::Sha1::digest(b"").into();
    pub static ref EMPTY_MD5: Md5Digest = md5::Md5::digest(b"").into();
}

/// The three digests recorded for every file and archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DigestTriple {
    pub sha256: Sha256Digest,
    pub sha1: Sha1Digest,
    pub md5: Md5Digest,
}

impl DigestTriple {
    /// The digests of zero bytes of content.
    pub fn empty() -> Self {
        Self {
            sha256: *EMPTY_SHA256,
            sha1: *EMPTY_SHA1,
            md5: *EMPTY_MD5,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            sha256: sha2::Sha256::digest(data).into(),
            sha1: sha1::Sha1::digest(data).into(),
            md5: md5::Md5::digest(data).into(),
        }
    }

    /// Consumes the reader, computing all three digests in a single pass.
    /// Returns the digests and the number of bytes read.
    pub async fn from_reader<R>(r: R) -> std::io::Result<(Self, u64)>
    where
        R: AsyncRead + Unpin,
    {
        let mut hr = HashingReader::<_, md5::Md5>::from(HashingReader::<_, sha1::Sha1>::from(
            HashingReader::<_, sha2::Sha256>::from(r),
        ));

        let size = tokio::io::copy(&mut hr, &mut tokio::io::sink()).await?;

        let (inner, md5) = hr.into_parts();
        let (inner, sha1) = inner.into_parts();
        let sha256 = inner.digest();

        Ok((
            Self {
                sha256: sha256.into(),
                sha1: sha1.into(),
                md5: md5.into(),
            },
            size,
        ))
    }
}
