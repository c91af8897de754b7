use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};

pub mod local;
pub mod s3;

pub const COPY_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percent: u8,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (bytes_transferred.min(total) * 100 / total) as u8
        };
        TransferProgress {
            bytes_transferred,
            total_bytes: total,
            percent,
        }
    }
}

/// Called on the caller's thread while a transfer is in flight.
pub type ProgressFn<'a> = dyn FnMut(TransferProgress) + 'a;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub creation_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Object {
        key: String,
        size: u64,
        last_modified: DateTime<Utc>,
    },
    CommonPrefix(String),
}

pub struct ObjectStream {
    pub reader: Box<dyn Read>,
    pub content_length: u64,
    pub content_type: String,
}

/// Preset access policy applied to uploaded objects and new buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CannedAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
        }
    }
}

impl FromStr for CannedAcl {
    type Err = String;

    /// Case-insensitive, dashes optional: `public-read`, `PublicRead`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "private" => Ok(CannedAcl::Private),
            "publicread" => Ok(CannedAcl::PublicRead),
            "publicreadwrite" => Ok(CannedAcl::PublicReadWrite),
            "authenticatedread" => Ok(CannedAcl::AuthenticatedRead),
            _ => Err(format!("Unknown canned ACL: {}", s)),
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ObjectListing<'a> = Box<dyn Iterator<Item = eyre::Result<ListEntry>> + 'a>;

/// The object-storage service, as seen by the commands.
pub trait ObjectStore {
    fn create_bucket(&self, name: &str, acl: CannedAcl) -> eyre::Result<()>;
    fn create_bucket_in_region(&self, name: &str, region: &str, acl: CannedAcl)
        -> eyre::Result<()>;
    fn delete_bucket(&self, name: &str) -> eyre::Result<()>;
    fn list_buckets(&self) -> eyre::Result<Vec<BucketInfo>>;
    /// Objects and common prefixes directly under `prefix`, fetched lazily.
    fn list_objects<'a>(&'a self, bucket: &str, prefix: &str) -> ObjectListing<'a>;
    fn put_object_from_file(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
        content_type: &str,
        acl: CannedAcl,
        progress: &mut ProgressFn<'_>,
    ) -> eyre::Result<()>;
    fn put_object_from_text(
        &self,
        text: &str,
        bucket: &str,
        key: &str,
        content_type: &str,
        acl: CannedAcl,
    ) -> eyre::Result<()>;
    fn get_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: &mut ProgressFn<'_>,
    ) -> eyre::Result<()>;
    fn get_object_as_stream(&self, bucket: &str, key: &str) -> eyre::Result<ObjectStream>;
    fn delete_object(&self, bucket: &str, key: &str) -> eyre::Result<()>;
    fn pre_authorized_url(
        &self,
        bucket: &str,
        key: &str,
        expiry: DateTime<Utc>,
    ) -> eyre::Result<String>;
}

/// Copies `total` bytes, reporting progress after every chunk.
pub fn copy_with_progress<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    progress: &mut ProgressFn<'_>,
) -> std::io::Result<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read])?;
        copied += read as u64;
        progress(TransferProgress::new(copied, total));
    }
    writer.flush()?;
    Ok(copied)
}
