use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use eyre::eyre;
use futures_util::stream::{self, Stream, StreamExt};
use rusoto_core::credential::{AwsCredentials, StaticProvider};
use rusoto_core::{ByteStream, HttpClient, Region};
use rusoto_s3::util::{PreSignedRequest, PreSignedRequestOption};
use rusoto_s3::{
    CreateBucketConfiguration, CreateBucketRequest, DeleteBucketRequest, DeleteObjectRequest,
    GetObjectRequest, ListObjectsV2Request, PutObjectRequest, S3Client, S3,
};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    BucketInfo, CannedAcl, ListEntry, ObjectListing, ObjectStore, ObjectStream,
    ProgressFn, TransferProgress, COPY_BUFFER_SIZE,
};
use crate::mime::DEFAULT_CONTENT_TYPE;
use crate::vault::CredentialPair;

const DELIMITER: &str = "/";

/// Amazon S3, or any service speaking its protocol.
///
/// The client is async; every call blocks on a private current-thread
/// runtime so callers stay synchronous.
pub struct S3Store {
    client: S3Client,
    region: Region,
    credentials: AwsCredentials,
    runtime: Arc<Runtime>,
}

impl S3Store {
    pub fn new(
        region_name: &str,
        endpoint: Option<&str>,
        credentials: &CredentialPair,
    ) -> eyre::Result<Self> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                name: region_name.to_owned(),
                endpoint: endpoint.to_owned(),
            },
            None => region_name
                .parse()
                .map_err(|e| eyre!("Invalid AWS region {}: {}", region_name, e))?,
        };
        debug!("Using S3 region {:?}", region);

        let provider = StaticProvider::new_minimal(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
        );
        let dispatcher =
            HttpClient::new().map_err(|e| eyre!("Could not create HTTP client: {}", e))?;
        let client = S3Client::new_with(dispatcher, provider, region.clone());

        let runtime = Builder::new_current_thread().enable_all().build()?;

        Ok(S3Store {
            client,
            region,
            credentials: AwsCredentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                None,
                None,
            ),
            runtime: Arc::new(runtime),
        })
    }

    fn create(
        &self,
        name: &str,
        configuration: Option<CreateBucketConfiguration>,
        acl: CannedAcl,
    ) -> eyre::Result<()> {
        let request = CreateBucketRequest {
            bucket: name.to_owned(),
            acl: Some(acl.as_str().to_owned()),
            create_bucket_configuration: configuration,
            ..Default::default()
        };

        self.runtime
            .block_on(self.client.create_bucket(request))
            .map_err(|e| eyre!("Could not create bucket {}: {}", name, e))?;
        Ok(())
    }

    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> eyre::Result<(Vec<ListEntry>, Option<String>)> {
        let request = ListObjectsV2Request {
            bucket: bucket.to_owned(),
            prefix: Some(prefix.to_owned()).filter(|p| !p.is_empty()),
            delimiter: Some(DELIMITER.to_owned()),
            continuation_token,
            ..Default::default()
        };

        let output = self
            .runtime
            .block_on(self.client.list_objects_v2(request))
            .map_err(|e| eyre!("Could not list objects in {}: {}", bucket, e))?;

        let mut entries = Vec::new();
        for object in output.contents.unwrap_or_default() {
            entries.push(ListEntry::Object {
                key: object.key.unwrap_or_default(),
                size: object.size.unwrap_or_default().max(0) as u64,
                last_modified: parse_timestamp(object.last_modified.as_deref())?,
            });
        }
        for common in output.common_prefixes.unwrap_or_default() {
            if let Some(prefix) = common.prefix {
                entries.push(ListEntry::CommonPrefix(prefix));
            }
        }
        entries.sort_by(|a, b| entry_name(a).cmp(entry_name(b)));

        let next = if output.is_truncated.unwrap_or(false) {
            output.next_continuation_token
        } else {
            None
        };
        debug!("Listed {} entries in {}, more: {}", entries.len(), bucket, next.is_some());
        Ok((entries, next))
    }
}

fn entry_name(entry: &ListEntry) -> &str {
    match entry {
        ListEntry::Object { key, .. } => key,
        ListEntry::CommonPrefix(prefix) => prefix,
    }
}

fn parse_timestamp(value: Option<&str>) -> eyre::Result<DateTime<Utc>> {
    let value = value.ok_or_else(|| eyre!("Service returned no timestamp"))?;
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| eyre!("Invalid timestamp {}: {}", value, e))
}

/// Reads a response body chunk by chunk, driving the runtime for each one.
struct BodyReader<S> {
    runtime: Arc<Runtime>,
    body: S,
    pending: Bytes,
}

impl<S> BodyReader<S> {
    fn new(runtime: Arc<Runtime>, body: S) -> Self {
        BodyReader {
            runtime,
            body,
            pending: Bytes::new(),
        }
    }
}

impl<S> Read for BodyReader<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.runtime.block_on(self.body.next()) {
                Some(chunk) => self.pending = chunk?,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

/// Walks a listing page by page, fetching the next page only when needed.
struct Pages<'a> {
    store: &'a S3Store,
    bucket: String,
    prefix: String,
    buffer: VecDeque<ListEntry>,
    next_token: Option<String>,
    started: bool,
}

impl Iterator for Pages<'_> {
    type Item = eyre::Result<ListEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if self.started && self.next_token.is_none() {
                return None;
            }
            self.started = true;

            match self
                .store
                .list_page(&self.bucket, &self.prefix, self.next_token.take())
            {
                Ok((entries, next)) => {
                    self.buffer.extend(entries);
                    self.next_token = next;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl ObjectStore for S3Store {
    fn create_bucket(&self, name: &str, acl: CannedAcl) -> eyre::Result<()> {
        self.create(name, None, acl)
    }

    fn create_bucket_in_region(
        &self,
        name: &str,
        region: &str,
        acl: CannedAcl,
    ) -> eyre::Result<()> {
        let configuration = CreateBucketConfiguration {
            location_constraint: Some(region.to_owned()),
            ..Default::default()
        };
        self.create(name, Some(configuration), acl)
    }

    fn delete_bucket(&self, name: &str) -> eyre::Result<()> {
        let request = DeleteBucketRequest {
            bucket: name.to_owned(),
            ..Default::default()
        };

        match self.runtime.block_on(self.client.delete_bucket(request)) {
            Ok(_) => Ok(()),
            Err(e) => Err(eyre!("Could not delete bucket {}: {}", name, e)),
        }
    }

    fn list_buckets(&self) -> eyre::Result<Vec<BucketInfo>> {
        let output = self
            .runtime
            .block_on(self.client.list_buckets())
            .map_err(|e| eyre!("Could not list buckets: {}", e))?;

        output
            .buckets
            .unwrap_or_default()
            .into_iter()
            .map(|bucket| {
                Ok(BucketInfo {
                    name: bucket.name.unwrap_or_default(),
                    creation_time: parse_timestamp(bucket.creation_date.as_deref())?,
                })
            })
            .collect()
    }

    fn list_objects<'a>(&'a self, bucket: &str, prefix: &str) -> ObjectListing<'a> {
        Box::new(Pages {
            store: self,
            bucket: bucket.to_owned(),
            prefix: prefix.to_owned(),
            buffer: VecDeque::new(),
            next_token: None,
            started: false,
        })
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
        let file =
            File::open(path).map_err(|e| eyre!("Could not open {}: {}", path.display(), e))?;
        let total = file.metadata()?.len();

        // The body reports every chunk it hands to the client
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel::<u64>();
        let chunks = stream::unfold(Some(file), move |state| {
            let sent_tx = sent_tx.clone();
            async move {
                let mut file = state?;
                let mut chunk = vec![0u8; COPY_BUFFER_SIZE];
                match file.read(&mut chunk) {
                    Ok(0) => None,
                    Ok(read) => {
                        chunk.truncate(read);
                        let _ = sent_tx.send(read as u64);
                        Some((Ok(Bytes::from(chunk)), Some(file)))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        });

        let request = PutObjectRequest {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            body: Some(ByteStream::new_with_size(chunks, total as usize)),
            content_length: Some(total as i64),
            content_type: Some(content_type.to_owned()),
            acl: Some(acl.as_str().to_owned()),
            ..Default::default()
        };

        self.runtime.block_on(async {
            let mut upload = self.client.put_object(request);
            let mut transferred = 0u64;
            loop {
                tokio::select! {
                    result = &mut upload => {
                        return result
                            .map(|_| ())
                            .map_err(|e| eyre!("Could not upload file {}: {}", path.display(), e));
                    }
                    Some(read) = sent_rx.recv() => {
                        transferred += read;
                        progress(TransferProgress::new(transferred, total));
                    }
                }
            }
        })
    }

    fn put_object_from_text(
        &self,
        text: &str,
        bucket: &str,
        key: &str,
        content_type: &str,
        acl: CannedAcl,
    ) -> eyre::Result<()> {
        let request = PutObjectRequest {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            body: Some(text.as_bytes().to_vec().into()),
            content_type: Some(content_type.to_owned()),
            acl: Some(acl.as_str().to_owned()),
            ..Default::default()
        };

        match self.runtime.block_on(self.client.put_object(request)) {
            Ok(_) => Ok(()),
            Err(e) => Err(eyre!("Could not upload text to {}: {}", key, e)),
        }
    }

    fn get_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: &mut ProgressFn<'_>,
    ) -> eyre::Result<()> {
        let request = GetObjectRequest {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            ..Default::default()
        };

        self.runtime.block_on(async {
            let output = self
                .client
                .get_object(request)
                .await
                .map_err(|e| eyre!("Could not download file {}: {}", key, e))?;
            let total = output.content_length.unwrap_or_default().max(0) as u64;
            let mut body = output.body.ok_or_else(|| eyre!("Body of file is None"))?;

            let mut file = File::create(path)
                .map_err(|e| eyre!("Could not create {}: {}", path.display(), e))?;
            let mut transferred = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk)?;
                transferred += chunk.len() as u64;
                progress(TransferProgress::new(transferred, total));
            }
            file.flush()?;
            Ok::<_, eyre::Report>(())
        })
    }

    fn get_object_as_stream(&self, bucket: &str, key: &str) -> eyre::Result<ObjectStream> {
        let request = GetObjectRequest {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            ..Default::default()
        };

        self.runtime.block_on(async {
            let output = self
                .client
                .get_object(request)
                .await
                .map_err(|e| eyre!("Could not download file {}: {}", key, e))?;
            let content_length = output.content_length.unwrap_or_default().max(0) as u64;
            let content_type = output
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());

            let reader: Box<dyn Read> = match output.body {
                Some(body) => Box::new(BodyReader::new(Arc::clone(&self.runtime), body)),
                None => Box::new(io::empty()),
            };

            Ok::<_, eyre::Report>(ObjectStream {
                reader,
                content_length,
                content_type,
            })
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> eyre::Result<()> {
        let request = DeleteObjectRequest {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            ..Default::default()
        };

        match self.runtime.block_on(self.client.delete_object(request)) {
            Ok(_) => Ok(()),
            Err(e) => Err(eyre!("Could not delete file {}: {}", key, e)),
        }
    }

    fn pre_authorized_url(
        &self,
        bucket: &str,
        key: &str,
        expiry: DateTime<Utc>,
    ) -> eyre::Result<String> {
        let expires_in = (expiry - Utc::now())
            .to_std()
            .map_err(|_| eyre!("Expiry {} is in the past", expiry))?;

        let request = GetObjectRequest {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            ..Default::default()
        };
        Ok(request.get_presigned_url(
            &self.region,
            &self.credentials,
            &PreSignedRequestOption { expires_in },
        ))
    }
}
