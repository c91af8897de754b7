//! Persisted AWS identifiers, protected for the current user.
//!
//! A vault file holds three base64 lines:
//!
//! ```text
//! entropy              (16 random bytes, new on every save)
//! protected access id
//! protected secret key
//! ```
//!
//! Saving replaces the whole file through a temporary file and a rename, so
//! readers only ever see a complete record.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::crypto::{self, UserScope};
use crate::error::{Credential, VaultError};

pub const ENTROPY_LEN: usize = 16;

const RECORD_LINES: usize = 3;

#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl CredentialPair {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        CredentialPair {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn get(&self, which: Credential) -> &str {
        match which {
            Credential::AccessKeyId => &self.access_key_id,
            Credential::SecretAccessKey => &self.secret_access_key,
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

pub struct CredentialVault {
    scope: UserScope,
}

impl CredentialVault {
    pub fn new(scope: UserScope) -> Self {
        CredentialVault { scope }
    }

    pub fn save(&self, path: &Path, credentials: &CredentialPair) -> Result<(), VaultError> {
        let entropy: [u8; ENTROPY_LEN] = crypto::random_bytes();

        let id = self
            .scope
            .protect(credentials.access_key_id.as_bytes(), &entropy)
            .map_err(|_| VaultError::Protect)?;
        let key = self
            .scope
            .protect(credentials.secret_access_key.as_bytes(), &entropy)
            .map_err(|_| VaultError::Protect)?;

        let record = [&entropy[..], id.as_slice(), key.as_slice()]
            .iter()
            .map(|blob| STANDARD.encode(blob))
            .collect::<Vec<_>>()
            .join("\n");

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Same directory as the target so the rename cannot cross filesystems
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(record.as_bytes())?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| VaultError::Io(e.error))?;

        info!("Saved AWS identifiers to {}", path.display());
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<CredentialPair, VaultError> {
        let contents = fs::read_to_string(path)?;
        let lines: Vec<&str> = contents.lines().take(RECORD_LINES).collect();
        if lines.len() < RECORD_LINES {
            return Err(VaultError::Corrupt(format!(
                "expected {} lines, found {}",
                RECORD_LINES,
                lines.len()
            )));
        }

        let mut blobs = Vec::with_capacity(RECORD_LINES);
        for (index, line) in lines.iter().enumerate() {
            let blob = STANDARD
                .decode(line.trim())
                .map_err(|source| VaultError::Decode {
                    line: index + 1,
                    source,
                })?;
            blobs.push(blob);
        }

        let entropy = &blobs[0];
        if entropy.len() != ENTROPY_LEN {
            return Err(VaultError::Corrupt(format!(
                "entropy is {} bytes, expected {}",
                entropy.len(),
                ENTROPY_LEN
            )));
        }

        let access_key_id = self.unprotect(&blobs[1], entropy, Credential::AccessKeyId)?;
        let secret_access_key = self.unprotect(&blobs[2], entropy, Credential::SecretAccessKey)?;

        debug!("Loaded AWS identifiers from {}", path.display());
        Ok(CredentialPair {
            access_key_id,
            secret_access_key,
        })
    }

    fn unprotect(
        &self,
        blob: &[u8],
        entropy: &[u8],
        which: Credential,
    ) -> Result<String, VaultError> {
        let plaintext = self
            .scope
            .unprotect(blob, entropy)
            .map_err(|_| VaultError::Unprotect(which))?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Unprotect(which))
    }
}
