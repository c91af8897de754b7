use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use ring::aead::Aad;
use ring::aead::BoundKey;
use ring::aead::Nonce;
use ring::aead::NonceSequence;
use ring::aead::OpeningKey;
use ring::aead::SealingKey;
use ring::aead::UnboundKey;
use ring::aead::AES_256_GCM;
use ring::aead::NONCE_LEN;
use ring::error::Unspecified;
use ring::hkdf;
use tracing::debug;

use crate::error::VaultError;

pub const USER_KEY_LEN: usize = 32;

/// HKDF info label binding derived keys to this use.
const SCOPE_LABEL: &[u8] = b"s3commander user-scope protection v1";

pub struct CounterNonceSequence(pub [u8; NONCE_LEN]);

impl CounterNonceSequence {
    pub fn new(start: [u8; NONCE_LEN]) -> Self {
        CounterNonceSequence(start)
    }

    pub fn new_random() -> Self {
        let mut random_value = [0u8; NONCE_LEN];
        OsRng.fill(&mut random_value);
        CounterNonceSequence(random_value)
    }
}

impl NonceSequence for CounterNonceSequence {
    // called once for each seal/open operation
    fn advance(&mut self) -> Result<Nonce, Unspecified> {
        let nonce = Nonce::try_assume_unique_for_key(&self.0)?;

        // Never hand out the same nonce twice
        rand::thread_rng().fill(&mut self.0);

        Ok(nonce)
    }
}

/// The secret that scopes protected data to the current user.
///
/// The key lives in a file only the owning user can read. On Unix the file
/// must belong to the effective uid and must not be readable by group or
/// others, and the uid is mixed into every derived key.
pub struct UserScope {
    key: [u8; USER_KEY_LEN],
    identity: String,
}

impl UserScope {
    /// Loads the user key, failing if it does not exist.
    pub fn open(path: &Path) -> Result<Self, VaultError> {
        check_key_file(path)?;
        let bytes = fs::read(path)
            .map_err(|e| VaultError::UserKey(format!("{}: {}", path.display(), e)))?;
        let key: [u8; USER_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            VaultError::UserKey(format!(
                "{} does not hold a {}-byte key",
                path.display(),
                USER_KEY_LEN
            ))
        })?;

        Ok(UserScope {
            key,
            identity: current_identity(),
        })
    }

    /// Loads the user key, generating and storing a fresh one if needed.
    pub fn open_or_create(path: &Path) -> Result<Self, VaultError> {
        if !path.exists() {
            create_key_file(path)?;
        }
        Self::open(path)
    }

    #[cfg(test)]
    pub fn from_key(key: [u8; USER_KEY_LEN]) -> Self {
        UserScope {
            key,
            identity: current_identity(),
        }
    }

    fn derive_key(&self, entropy: &[u8]) -> Result<UnboundKey, Unspecified> {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, entropy);
        let prk = salt.extract(&self.key);
        let info = [SCOPE_LABEL, self.identity.as_bytes()];
        let okm = prk.expand(&info, &AES_256_GCM)?;
        Ok(UnboundKey::from(okm))
    }

    /// Encrypts `plaintext` so only this user scope, given the same
    /// `entropy`, can recover it. Output is `nonce || ciphertext || tag`.
    pub fn protect(&self, plaintext: &[u8], entropy: &[u8]) -> Result<Vec<u8>, Unspecified> {
        let nonce_sequence = CounterNonceSequence::new_random();
        let starting_value = nonce_sequence.0.to_vec();

        let cypher_text_with_tag =
            encrypt(plaintext.to_vec(), self.derive_key(entropy)?, nonce_sequence)?;

        // Prepend the nonce on the ciphertext
        let mut protected = starting_value;
        protected.extend_from_slice(&cypher_text_with_tag);

        Ok(protected)
    }

    pub fn unprotect(&self, protected: &[u8], entropy: &[u8]) -> Result<Vec<u8>, Unspecified> {
        if protected.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(Unspecified);
        }

        let (starting_value, cypher_text_with_tag) = protected.split_at(NONCE_LEN);
        let nonce_array: [u8; NONCE_LEN] = starting_value.try_into().map_err(|_| Unspecified)?;
        let nonce_sequence = CounterNonceSequence::new(nonce_array);

        decrypt(
            cypher_text_with_tag.to_vec(),
            self.derive_key(entropy)?,
            nonce_sequence,
        )
    }
}

fn encrypt(
    data: Vec<u8>,
    unbound_key: UnboundKey,
    nonce_sequence: CounterNonceSequence,
) -> Result<Vec<u8>, Unspecified> {
    // The SealingKey is bound to a nonce sequence, each seal advances it
    let mut sealing_key = SealingKey::new(unbound_key, nonce_sequence);

    // Encrypted in place
    let mut in_out = data;

    let tag = sealing_key.seal_in_place_separate_tag(Aad::empty(), &mut in_out)?;

    let cypher_text_with_tag = [&in_out, tag.as_ref()].concat();

    Ok(cypher_text_with_tag)
}

fn decrypt(
    mut cypher_text_with_tag: Vec<u8>,
    unbound_key: UnboundKey,
    nonce_sequence: CounterNonceSequence,
) -> Result<Vec<u8>, Unspecified> {
    let mut opening_key = OpeningKey::new(unbound_key, nonce_sequence);
    let decrypted_data = opening_key.open_in_place(Aad::empty(), &mut cypher_text_with_tag)?;
    Ok(decrypted_data.to_vec())
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn create_key_file(path: &Path) -> Result<(), VaultError> {
    let user_key_error = |e: std::io::Error| VaultError::UserKey(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(user_key_error)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(user_key_error)?;
    file.write_all(&random_bytes::<USER_KEY_LEN>())
        .map_err(user_key_error)?;
    file.sync_all().map_err(user_key_error)?;

    debug!("Created user key at {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn check_key_file(path: &Path) -> Result<(), VaultError> {
    use std::os::unix::fs::MetadataExt;

    let metadata = fs::metadata(path)
        .map_err(|e| VaultError::UserKey(format!("{}: {}", path.display(), e)))?;
    let uid = nix::unistd::Uid::effective().as_raw();

    if metadata.uid() != uid {
        return Err(VaultError::UserKey(format!(
            "{} belongs to another user",
            path.display()
        )));
    }
    if metadata.mode() & 0o077 != 0 {
        return Err(VaultError::UserKey(format!(
            "{} is accessible by other users",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_key_file(path: &Path) -> Result<(), VaultError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(VaultError::UserKey(format!("{} not found", path.display())))
    }
}

#[cfg(unix)]
fn current_identity() -> String {
    format!("uid:{}", nix::unistd::Uid::effective().as_raw())
}

#[cfg(not(unix))]
fn current_identity() -> String {
    std::env::var("USERNAME").unwrap_or_default()
}

/// Default location of the user key inside the application directory.
pub fn default_user_key_path(app_dir: &Path) -> PathBuf {
    app_dir.join("user.key")
}
