use std::cell::OnceCell;
use std::path::Path;

use tracing::debug;

use crate::error::{Credential, Error, Result, VaultError};
use crate::vault::{CredentialPair, CredentialVault};

pub const ACCESS_KEY_ID_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";

/// Placeholder meaning "look in the environment or the vault instead".
pub const DEFER: &str = "-";

impl Credential {
    pub fn env_var(&self) -> &'static str {
        match self {
            Credential::AccessKeyId => ACCESS_KEY_ID_VAR,
            Credential::SecretAccessKey => SECRET_ACCESS_KEY_VAR,
        }
    }

    pub fn option_name(&self) -> &'static str {
        match self {
            Credential::AccessKeyId => "aws-key-id",
            Credential::SecretAccessKey => "aws-secret-key",
        }
    }
}

/// A vault file that is read at most once, and only if something asks.
pub struct SavedCredentials<'a> {
    path: &'a Path,
    open: Box<dyn Fn() -> std::result::Result<CredentialVault, VaultError> + 'a>,
    loaded: OnceCell<Option<CredentialPair>>,
}

impl<'a> SavedCredentials<'a> {
    pub fn new<F>(path: &'a Path, open: F) -> Self
    where
        F: Fn() -> std::result::Result<CredentialVault, VaultError> + 'a,
    {
        SavedCredentials {
            path,
            open: Box::new(open),
            loaded: OnceCell::new(),
        }
    }

    fn get(&self) -> Result<Option<&CredentialPair>> {
        if self.loaded.get().is_none() {
            let pair = if self.path.exists() {
                let vault = (self.open)()?;
                Some(vault.load(self.path)?)
            } else {
                debug!("No saved identifiers at {}", self.path.display());
                None
            };
            let _ = self.loaded.set(pair);
        }
        Ok(self.loaded.get().and_then(Option::as_ref))
    }
}

/// Resolves one credential: explicit value, then environment, then vault.
pub fn resolve<E>(
    which: Credential,
    explicit: Option<&str>,
    env: E,
    saved: Option<&SavedCredentials<'_>>,
) -> Result<String>
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(value) = explicit.filter(|value| *value != DEFER) {
        debug!("Using {} from --{}", which, which.option_name());
        return non_empty(which, value.to_owned());
    }

    if let Some(value) = env(which.env_var()).filter(|value| !value.is_empty()) {
        debug!("Using {} from {}", which, which.env_var());
        return Ok(value);
    }

    if let Some(saved) = saved {
        if let Some(pair) = saved.get()? {
            debug!("Using {} from {}", which, saved.path.display());
            return non_empty(which, pair.get(which).to_owned());
        }
    }

    Err(Error::MissingCredential(which))
}

/// Resolves both identifiers, each through its own precedence chain.
pub fn resolve_pair<E>(
    explicit_id: Option<&str>,
    explicit_key: Option<&str>,
    env: E,
    saved: Option<&SavedCredentials<'_>>,
) -> Result<CredentialPair>
where
    E: Fn(&str) -> Option<String>,
{
    let access_key_id = resolve(Credential::AccessKeyId, explicit_id, &env, saved)?;
    let secret_access_key = resolve(Credential::SecretAccessKey, explicit_key, &env, saved)?;
    Ok(CredentialPair {
        access_key_id,
        secret_access_key,
    })
}

fn non_empty(which: Credential, value: String) -> Result<String> {
    if value.is_empty() {
        Err(Error::MissingCredential(which))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{self, UserScope};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn vault_with(dir: &Path, id: &str, key: &str) -> ([u8; crypto::USER_KEY_LEN], PathBuf) {
        let user_key = crypto::random_bytes();
        let path = dir.join("aws-ids");
        CredentialVault::new(UserScope::from_key(user_key))
            .save(&path, &CredentialPair::new(id, key))
            .unwrap();
        (user_key, path)
    }

    fn opener(
        user_key: [u8; crypto::USER_KEY_LEN],
    ) -> impl Fn() -> std::result::Result<CredentialVault, VaultError> {
        move || Ok(CredentialVault::new(UserScope::from_key(user_key)))
    }

    #[test]
    fn should_prefer_explicit_then_env_then_vault() {
        let dir = tempdir().unwrap();
        let (user_key, path) = vault_with(dir.path(), "Z", "Z");
        let saved = SavedCredentials::new(&path, opener(user_key));
        let env = env_of(&[(ACCESS_KEY_ID_VAR, "Y")]);

        let explicit = resolve(Credential::AccessKeyId, Some("X"), &env, Some(&saved)).unwrap();
        assert_eq!(explicit, "X");

        let deferred = resolve(Credential::AccessKeyId, Some("-"), &env, Some(&saved)).unwrap();
        assert_eq!(deferred, "Y");

        let absent = resolve(Credential::AccessKeyId, None, &env, Some(&saved)).unwrap();
        assert_eq!(absent, "Y");

        let from_vault = resolve(Credential::AccessKeyId, None, no_env, Some(&saved)).unwrap();
        assert_eq!(from_vault, "Z");
    }

    #[test]
    fn should_resolve_each_credential_independently() {
        let dir = tempdir().unwrap();
        let (user_key, path) = vault_with(dir.path(), "saved-id", "saved-key");
        let saved = SavedCredentials::new(&path, opener(user_key));
        let env = env_of(&[(SECRET_ACCESS_KEY_VAR, "env-key")]);

        let pair = resolve_pair(Some("-"), None, env, Some(&saved)).unwrap();
        assert_eq!(pair, CredentialPair::new("saved-id", "env-key"));
    }

    #[test]
    fn should_treat_empty_environment_as_absent() {
        let env = env_of(&[(ACCESS_KEY_ID_VAR, "")]);
        match resolve(Credential::AccessKeyId, None, env, None) {
            Err(Error::MissingCredential(Credential::AccessKeyId)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn should_name_the_missing_credential() {
        let env = env_of(&[(ACCESS_KEY_ID_VAR, "id")]);
        let err = resolve_pair(None, Some("-"), env, None).unwrap_err();
        assert_eq!(err.to_string(), "Missing AWS secret access key.");

        let err = resolve_pair(Some(""), None, no_env, None).unwrap_err();
        assert_eq!(err.to_string(), "Missing AWS access key ID.");
    }

    #[test]
    fn should_not_touch_vault_unless_needed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aws-ids");
        std::fs::write(&path, "garbage").unwrap();
        let saved = SavedCredentials::new(&path, opener(crypto::random_bytes()));

        let pair = resolve_pair(Some("id"), Some("key"), no_env, Some(&saved)).unwrap();
        assert_eq!(pair, CredentialPair::new("id", "key"));

        // Once it is needed, a corrupt vault is an error rather than a miss
        assert!(resolve(Credential::AccessKeyId, None, no_env, Some(&saved)).is_err());
    }

    #[test]
    fn should_skip_missing_vault_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent");
        let saved = SavedCredentials::new(&path, || {
            Err(VaultError::UserKey("must not be opened".to_owned()))
        });

        assert!(matches!(
            resolve(Credential::SecretAccessKey, None, no_env, Some(&saved)),
            Err(Error::MissingCredential(Credential::SecretAccessKey))
        ));
    }
}
