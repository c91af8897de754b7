use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::mime;
use crate::options::Options;
use crate::storage::{CannedAcl, ListEntry, ObjectStore};
use crate::uri::ObjectPath;
use crate::utils;

pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Region used for `mkbkt --europe`.
pub const EUROPE_REGION: &str = "EU";

/// Column where common prefixes line up with object keys in a listing.
const PREFIX_INDENT: usize = 53;

/// Runs one verb against a store, writing its output to `out`.
pub struct CommandHandler<'a> {
    store: &'a dyn ObjectStore,
    out: &'a mut dyn Write,
    input: &'a mut dyn Read,
}

impl<'a> CommandHandler<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        out: &'a mut dyn Write,
        input: &'a mut dyn Read,
    ) -> Self {
        CommandHandler { store, out, input }
    }

    pub fn handle_list(&mut self, args: Vec<String>, options: Options) -> Result<()> {
        let brief = options.flag("brief");

        let Some(uri) = args.first() else {
            for bucket in self.store.list_buckets()? {
                if brief {
                    writeln!(self.out, "{}", bucket.name)?;
                } else {
                    let created = utils::format_rfc1123(&bucket.creation_time);
                    writeln!(self.out, "{}  {}", created, bucket.name)?;
                }
            }
            return Ok(());
        };

        let path = ObjectPath::parse(uri)?;
        let prefix = path.key.as_str();
        for entry in self.store.list_objects(&path.bucket, prefix) {
            match entry? {
                ListEntry::CommonPrefix(common) if brief => writeln!(self.out, "{}", common)?,
                ListEntry::CommonPrefix(common) => {
                    writeln!(self.out, "{}{}", " ".repeat(PREFIX_INDENT), common)?
                }
                ListEntry::Object {
                    key,
                    size,
                    last_modified,
                } => {
                    let name = key.strip_prefix(prefix).unwrap_or(key.as_str());
                    if brief {
                        writeln!(self.out, "{}", name)?;
                    } else {
                        writeln!(
                            self.out,
                            "{}  {:>20}  {}",
                            utils::format_rfc1123(&last_modified),
                            utils::format_thousands(size),
                            name
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn handle_put(&mut self, args: Vec<String>, options: Options) -> Result<()> {
        let mut args = args.into_iter();
        let target = args
            .next()
            .ok_or(Error::MissingPositional("Missing target object path."))?;
        let target = ObjectPath::parse(&target)?;
        let local = PathBuf::from(
            args.next()
                .ok_or(Error::MissingPositional("Missing local file path."))?,
        );

        let file_name = local_file_name(&local)?;
        let key = if target.is_directory_style() {
            format!("{}{}", target.key, file_name)
        } else {
            target.key.clone()
        };
        let content_type = options
            .get("content-type")
            .unwrap_or_else(|| mime::content_type_for(&local))
            .to_owned();
        let acl = parse_acl(&options)?;
        let size = fs::metadata(&local)?.len();

        write!(
            self.out,
            "Uploading {} ({} bytes) as {}...",
            file_name,
            utils::format_thousands(size),
            content_type
        )?;
        self.out.flush()?;

        let pb = utils::create_progress_bar(size);
        self.store.put_object_from_file(
            &local,
            &target.bucket,
            &key,
            &content_type,
            acl,
            &mut utils::progress_reporter(&pb),
        )?;
        pb.finish_and_clear();

        writeln!(self.out, " OK")?;
        info!("Uploaded {} to s3://{}/{}", local.display(), target.bucket, key);
        Ok(())
    }

    pub fn handle_puts(&mut self, args: Vec<String>, options: Options) -> Result<()> {
        let target = object_with_key(
            args.first(),
            "Missing target object for text.",
            "Missing key for text.",
        )?;
        let acl = parse_acl(&options)?;

        let mut text = String::new();
        self.input.read_to_string(&mut text)?;

        write!(
            self.out,
            "Uploading {} characters of text...",
            utils::format_thousands(text.chars().count() as u64)
        )?;
        self.out.flush()?;

        self.store
            .put_object_from_text(&text, &target.bucket, &target.key, TEXT_CONTENT_TYPE, acl)?;

        writeln!(self.out, " OK")?;
        Ok(())
    }

    pub fn handle_get(&mut self, args: Vec<String>) -> Result<()> {
        let source = object_with_key(args.first(), "Missing source object path.", "Missing key.")?;
        let name = source.file_name().to_owned();

        let local = match args.get(1).map(PathBuf::from) {
            Some(dir) if dir.is_dir() => dir.join(&name),
            Some(path) => path,
            None => PathBuf::from(&name),
        };
        let display_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());

        write!(self.out, "Downloading {} to {}...", source.key, display_name)?;
        self.out.flush()?;

        // Length is filled in once the first chunk arrives
        let pb = utils::create_progress_bar(0);
        self.store.get_object_to_file(
            &source.bucket,
            &source.key,
            &local,
            &mut utils::progress_reporter(&pb),
        )?;
        pb.finish_and_clear();

        writeln!(self.out, " OK")?;
        info!("Downloaded {} to {}", source, local.display());
        Ok(())
    }

    pub fn handle_gets(&mut self, args: Vec<String>) -> Result<()> {
        let (_, text) = self.read_text(args)?;
        writeln!(self.out, "{}", text)?;
        Ok(())
    }

    pub fn handle_pops(&mut self, args: Vec<String>) -> Result<()> {
        let (source, text) = self.read_text(args)?;
        writeln!(self.out, "{}", text)?;
        self.store.delete_object(&source.bucket, &source.key)?;
        debug!("Removed {} after printing it", source);
        Ok(())
    }

    pub fn handle_rm(&mut self, args: Vec<String>) -> Result<()> {
        let target = object_with_key(args.first(), "Missing object path.", "Missing key.")?;
        self.store.delete_object(&target.bucket, &target.key)?;
        info!("Removed {}", target);
        Ok(())
    }

    pub fn handle_authurl(&mut self, args: Vec<String>, options: Options) -> Result<()> {
        let target = object_with_key(args.first(), "Missing object path.", "Missing key.")?;
        let expiry = match options.get("expires") {
            Some(text) => utils::parse_expiry(text)?,
            None => Utc::now() + Duration::hours(1),
        };

        let url = self
            .store
            .pre_authorized_url(&target.bucket, &target.key, expiry)?;
        writeln!(self.out, "{}", url)?;
        Ok(())
    }

    pub fn handle_mkbkt(&mut self, args: Vec<String>, options: Options) -> Result<()> {
        let name = args
            .first()
            .ok_or(Error::MissingPositional("Missing bucket name."))?;
        let acl = parse_acl(&options)?;

        let region = if options.flag("europe") {
            Some(EUROPE_REGION)
        } else {
            options.get("region")
        };

        match region {
            Some(region) => self.store.create_bucket_in_region(name, region, acl)?,
            None => self.store.create_bucket(name, acl)?,
        }
        info!("Created bucket {}", name);
        Ok(())
    }

    pub fn handle_rmbkt(&mut self, args: Vec<String>) -> Result<()> {
        let name = args
            .first()
            .ok_or(Error::MissingPositional("Missing bucket name."))?;
        self.store.delete_bucket(name)?;
        info!("Deleted bucket {}", name);
        Ok(())
    }

    /// Fetches a `text/plain` object in full.
    fn read_text(&mut self, args: Vec<String>) -> Result<(ObjectPath, String)> {
        let source = object_with_key(args.first(), "Missing source object path.", "Missing key.")?;

        let mut stream = self
            .store
            .get_object_as_stream(&source.bucket, &source.key)?;
        if stream.content_type != TEXT_CONTENT_TYPE {
            return Err(Error::NotText(stream.content_type));
        }

        let mut data = Vec::new();
        copy_exact(&mut stream.reader, &mut data, stream.content_length)?;

        Ok((source, String::from_utf8_lossy(&data).into_owned()))
    }
}

fn object_with_key(
    arg: Option<&String>,
    missing_path: &'static str,
    missing_key: &'static str,
) -> Result<ObjectPath> {
    let path = ObjectPath::parse(arg.ok_or(Error::MissingPositional(missing_path))?)?;
    if !path.has_key() {
        return Err(Error::MissingPositional(missing_key));
    }
    Ok(path)
}

fn parse_acl(options: &Options) -> Result<CannedAcl> {
    match options.get("acl") {
        Some(text) => text.parse().map_err(Error::InvalidArgument),
        None => Ok(CannedAcl::default()),
    }
}

fn local_file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidArgument(format!("Not a file path: {}", path.display())))
}

/// Copies exactly `length` bytes, failing if the source ends early.
fn copy_exact<R, W>(source: &mut R, dest: &mut W, length: u64) -> Result<()>
where
    R: Read + ?Sized,
    W: Write,
{
    let mut buffer = [0u8; 8192];
    let mut remaining = length;
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let read = source.read(&mut buffer[..want])?;
        if read == 0 {
            return Err(Error::UnexpectedEof);
        }
        dest.write_all(&buffer[..read])?;
        remaining -= read as u64;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::{BucketInfo, ObjectListing, ObjectStream, ProgressFn};
    use chrono::DateTime;
    use std::cell::Cell;

    /// Serves one text object whose reported length exceeds its body.
    struct OverstatedStore {
        content_length: u64,
        deleted: Cell<bool>,
    }

    impl ObjectStore for OverstatedStore {
        fn create_bucket(&self, _: &str, _: CannedAcl) -> eyre::Result<()> {
            unimplemented!()
        }
        fn create_bucket_in_region(&self, _: &str, _: &str, _: CannedAcl) -> eyre::Result<()> {
            unimplemented!()
        }
        fn delete_bucket(&self, _: &str) -> eyre::Result<()> {
            unimplemented!()
        }
        fn list_buckets(&self) -> eyre::Result<Vec<BucketInfo>> {
            unimplemented!()
        }
        fn list_objects<'a>(&'a self, _: &str, _: &str) -> ObjectListing<'a> {
            unimplemented!()
        }
        fn put_object_from_file(
            &self,
            _: &Path,
            _: &str,
            _: &str,
            _: &str,
            _: CannedAcl,
            _: &mut ProgressFn<'_>,
        ) -> eyre::Result<()> {
            unimplemented!()
        }
        fn put_object_from_text(&self, _: &str, _: &str, _: &str, _: &str, _: CannedAcl) -> eyre::Result<()> {
            unimplemented!()
        }
        fn get_object_to_file(
            &self,
            _: &str,
            _: &str,
            _: &Path,
            _: &mut ProgressFn<'_>,
        ) -> eyre::Result<()> {
            unimplemented!()
        }
        fn get_object_as_stream(&self, _: &str, _: &str) -> eyre::Result<ObjectStream> {
            Ok(ObjectStream {
                reader: Box::new(&b"hi"[..]),
                content_length: self.content_length,
                content_type: TEXT_CONTENT_TYPE.to_owned(),
            })
        }
        fn delete_object(&self, _: &str, _: &str) -> eyre::Result<()> {
            self.deleted.set(true);
            Ok(())
        }
        fn pre_authorized_url(&self, _: &str, _: &str, _: DateTime<Utc>) -> eyre::Result<String> {
            unimplemented!()
        }
    }

    #[test]
    fn should_report_overstated_length_as_short_stream() {
        let store = OverstatedStore {
            content_length: i64::MAX as u64,
            deleted: Cell::new(false),
        };
        let mut out = Vec::new();
        let mut input = std::io::empty();
        let mut handler = CommandHandler::new(&store, &mut out, &mut input);

        let gets = handler.handle_gets(vec!["s3://foo/a.txt".to_owned()]);
        assert!(matches!(gets, Err(Error::UnexpectedEof)));

        let pops = handler.handle_pops(vec!["s3://foo/a.txt".to_owned()]);
        assert!(matches!(pops, Err(Error::UnexpectedEof)));
        assert!(!store.deleted.get());
        assert!(out.is_empty());
    }

    #[test]
    fn should_copy_exact_length() {
        let mut out = Vec::new();
        copy_exact(&mut &b"hello world"[..], &mut out, 5).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn should_fail_on_short_stream() {
        let mut out = Vec::new();
        match copy_exact(&mut &b"abc"[..], &mut out, 10) {
            Err(Error::UnexpectedEof) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            Error::UnexpectedEof.to_string(),
            "Unexpected end of stream while copying."
        );
    }

    #[test]
    fn should_require_key_where_needed() {
        let missing = object_with_key(None, "Missing object path.", "Missing key.");
        assert_eq!(missing.unwrap_err().to_string(), "Missing object path.");

        let bucket_only = "s3://foo".to_owned();
        let no_key = object_with_key(Some(&bucket_only), "Missing object path.", "Missing key.");
        assert_eq!(no_key.unwrap_err().to_string(), "Missing key.");
    }
}
