use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::{Error, Result};

const SCHEME_SEPARATOR: &str = "://";

/// Characters escaped when printing a key back out.
const KEY_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A `scheme://bucket/key` address. The key may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub bucket: String,
    pub key: String,
}

impl ObjectPath {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("Invalid object path: {}", text));

        let (scheme, rest) = text.split_once(SCHEME_SEPARATOR).ok_or_else(invalid)?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid());
        }

        // No query or fragment in object paths
        let rest = rest.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(invalid());
        }

        let key = percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| invalid())?
            .into_owned();

        Ok(ObjectPath {
            bucket: bucket.to_owned(),
            key,
        })
    }

    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }

    /// Whether the key names a "directory" rather than an object.
    pub fn is_directory_style(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Last `/`-separated segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}", self.bucket)?;
        if self.has_key() {
            write!(f, "/{}", utf8_percent_encode(&self.key, KEY_ESCAPES))?;
        }
        Ok(())
    }
}
