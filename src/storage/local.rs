use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::eyre;
use tracing::debug;
use walkdir::WalkDir;

use super::{
    copy_with_progress, BucketInfo, CannedAcl, ListEntry, ObjectListing, ObjectStore,
    ObjectStream, ProgressFn,
};
use crate::mime::DEFAULT_CONTENT_TYPE;

/// Holds content types, mirroring the bucket tree.
const META_DIR: &str = ".meta";

/// An object store kept in a local directory.
///
/// Every bucket is a subdirectory of the root and every key a file below it,
/// with `/` in keys mapped to nested directories.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> eyre::Result<PathBuf> {
        if bucket.is_empty()
            || bucket == META_DIR
            || bucket == "."
            || bucket == ".."
            || bucket.contains(|c: char| c == '/' || c == '\\')
        {
            return Err(eyre!("Invalid bucket name: {}", bucket));
        }
        Ok(self.root.join(bucket))
    }

    fn existing_bucket_dir(&self, bucket: &str) -> eyre::Result<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.is_dir() {
            return Err(eyre!("The specified bucket does not exist: {}", bucket));
        }
        Ok(dir)
    }

    fn relative_key(key: &str) -> eyre::Result<PathBuf> {
        if key.is_empty() || key.ends_with('/') {
            return Err(eyre!("Invalid object key: {}", key));
        }
        let mut relative = PathBuf::new();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(eyre!("Invalid object key: {}", key));
            }
            relative.push(segment);
        }
        Ok(relative)
    }

    fn object_path(&self, bucket: &str, key: &str) -> eyre::Result<PathBuf> {
        Ok(self
            .existing_bucket_dir(bucket)?
            .join(Self::relative_key(key)?))
    }

    fn meta_path(&self, bucket: &str, key: &str) -> eyre::Result<PathBuf> {
        Ok(self
            .root
            .join(META_DIR)
            .join(bucket)
            .join(Self::relative_key(key)?))
    }

    fn write_content_type(&self, bucket: &str, key: &str, content_type: &str) -> eyre::Result<()> {
        let meta = self.meta_path(bucket, key)?;
        create_parent(&meta)?;
        fs::write(&meta, content_type)
            .map_err(|e| eyre!("Could not record content type for {}: {}", key, e))
    }

    fn read_content_type(&self, bucket: &str, key: &str) -> String {
        self.meta_path(bucket, key)
            .ok()
            .and_then(|meta| fs::read_to_string(meta).ok())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned())
    }

    fn open_object(&self, bucket: &str, key: &str) -> eyre::Result<(File, u64)> {
        let path = self.object_path(bucket, key)?;
        let file = File::open(&path)
            .map_err(|e| eyre!("Could not read object {}/{}: {}", bucket, key, e))?;
        let len = file.metadata()?.len();
        Ok((file, len))
    }

    fn collect_entries(&self, bucket: &str, prefix: &str) -> eyre::Result<Vec<ListEntry>> {
        let dir = self.existing_bucket_dir(bucket)?;

        let mut objects = Vec::new();
        let mut prefixes = BTreeSet::new();
        for entry in WalkDir::new(&dir).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let key = object_key(entry.path().strip_prefix(&dir)?);
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };

            // Delimit on "/" the way S3 does
            if let Some(index) = rest.find('/') {
                prefixes.insert(format!("{}{}", prefix, &rest[..=index]));
                continue;
            }

            let metadata = entry.metadata()?;
            objects.push(ListEntry::Object {
                key,
                size: metadata.len(),
                last_modified: metadata.modified().map(DateTime::<Utc>::from)?,
            });
        }

        let mut entries: Vec<ListEntry> = objects
            .into_iter()
            .chain(prefixes.into_iter().map(ListEntry::CommonPrefix))
            .collect();
        entries.sort_by(|a, b| entry_name(a).cmp(entry_name(b)));
        Ok(entries)
    }
}

fn object_key(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn entry_name(entry: &ListEntry) -> &str {
    match entry {
        ListEntry::Object { key, .. } => key,
        ListEntry::CommonPrefix(prefix) => prefix,
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

impl ObjectStore for LocalStore {
    fn create_bucket(&self, name: &str, acl: CannedAcl) -> eyre::Result<()> {
        let dir = self.bucket_dir(name)?;
        if dir.exists() {
            return Err(eyre!("Bucket {} already exists", name));
        }
        fs::create_dir_all(&dir)
            .map_err(|e| eyre!("Could not create bucket {}: {}", name, e))?;
        debug!("Created bucket {} at {} ({})", name, dir.display(), acl);
        Ok(())
    }

    fn create_bucket_in_region(
        &self,
        name: &str,
        region: &str,
        acl: CannedAcl,
    ) -> eyre::Result<()> {
        debug!("Region {} has no meaning for a local store", region);
        self.create_bucket(name, acl)
    }

    fn delete_bucket(&self, name: &str) -> eyre::Result<()> {
        let dir = self.existing_bucket_dir(name)?;
        fs::remove_dir(&dir).map_err(|e| eyre!("Could not delete bucket {}: {}", name, e))?;

        let meta = self.root.join(META_DIR).join(name);
        if meta.exists() {
            fs::remove_dir_all(meta)?;
        }
        Ok(())
    }

    fn list_buckets(&self) -> eyre::Result<Vec<BucketInfo>> {
        let mut buckets = Vec::new();
        for entry in fs::read_dir(&self.root)
            .map_err(|e| eyre!("Could not list {}: {}", self.root.display(), e))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == META_DIR || !entry.file_type()?.is_dir() {
                continue;
            }
            let metadata = entry.metadata()?;
            let created = metadata.created().or_else(|_| metadata.modified())?;
            buckets.push(BucketInfo {
                name,
                creation_time: DateTime::<Utc>::from(created),
            });
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    fn list_objects<'a>(&'a self, bucket: &str, prefix: &str) -> ObjectListing<'a> {
        match self.collect_entries(bucket, prefix) {
            Ok(entries) => Box::new(entries.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn put_object_from_file(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
        content_type: &str,
        acl: CannedAcl,
        progress: &mut ProgressFn<'_>,
    ) -> eyre::Result<()> {
        let target = self.object_path(bucket, key)?;
        let mut source =
            File::open(path).map_err(|e| eyre!("Could not open {}: {}", path.display(), e))?;
        let total = source.metadata()?.len();

        create_parent(&target)?;
        let mut file = File::create(&target)
            .map_err(|e| eyre!("Could not upload file {} to {}: {}", path.display(), key, e))?;
        copy_with_progress(&mut source, &mut file, total, progress)?;

        self.write_content_type(bucket, key, content_type)?;
        debug!("Stored {} bytes as {}/{} ({})", total, bucket, key, acl);
        Ok(())
    }

    fn put_object_from_text(
        &self,
        text: &str,
        bucket: &str,
        key: &str,
        content_type: &str,
        acl: CannedAcl,
    ) -> eyre::Result<()> {
        let target = self.object_path(bucket, key)?;
        create_parent(&target)?;
        fs::write(&target, text).map_err(|e| eyre!("Could not upload text to {}: {}", key, e))?;

        self.write_content_type(bucket, key, content_type)?;
        debug!("Stored {} bytes of text as {}/{} ({})", text.len(), bucket, key, acl);
        Ok(())
    }

    fn get_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: &mut ProgressFn<'_>,
    ) -> eyre::Result<()> {
        let (mut source, total) = self.open_object(bucket, key)?;
        let mut file = File::create(path)
            .map_err(|e| eyre!("Could not create {}: {}", path.display(), e))?;
        copy_with_progress(&mut source, &mut file, total, progress)?;
        file.flush()?;
        Ok(())
    }

    fn get_object_as_stream(&self, bucket: &str, key: &str) -> eyre::Result<ObjectStream> {
        let (file, content_length) = self.open_object(bucket, key)?;
        Ok(ObjectStream {
            reader: Box::new(file),
            content_length,
            content_type: self.read_content_type(bucket, key),
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> eyre::Result<()> {
        let path = self.object_path(bucket, key)?;
        // Deleting a missing key is not an error, as with S3
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(eyre!("Could not delete {}/{}: {}", bucket, key, e)),
        }
        match fs::remove_file(self.meta_path(bucket, key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn pre_authorized_url(
        &self,
        bucket: &str,
        key: &str,
        expiry: DateTime<Utc>,
    ) -> eyre::Result<String> {
        let path = self.object_path(bucket, key)?;
        Ok(format!(
            "file://{}?expires={}",
            path.display(),
            expiry.timestamp()
        ))
    }
}
