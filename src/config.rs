use std::path::PathBuf;

use crate::crypto;

pub const IDS_FILE_VAR: &str = "AWS_IDS_FILE";
pub const USER_KEY_VAR: &str = "S3COMMANDER_USER_KEY";
pub const LOCAL_DIR_VAR: &str = "S3COMMANDER_LOCAL_DIR";
pub const REGION_VARS: [&str; 2] = ["AWS_REGION", "AWS_DEFAULT_REGION"];
pub const ENDPOINT_VAR: &str = "AWS_ENDPOINT";

pub const DEFAULT_REGION: &str = "us-east-1";
const APP_DIR: &str = "s3commander";
const IDS_FILE_NAME: &str = "aws-ids";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub ids_file: PathBuf,
    pub user_key_file: PathBuf,
    pub aws_region_name: String,
    pub aws_endpoint: Option<String>,
    pub local_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Config {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<E>(env: E) -> Config
    where
        E: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(name).filter(|value| !value.is_empty());

        let ids_file = var(IDS_FILE_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(default_ids_file);

        // The user key stays put wherever the vault file is saved
        let user_key_file = var(USER_KEY_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| crypto::default_user_key_path(&app_dir()));

        let aws_region_name = REGION_VARS
            .iter()
            .find_map(|&name| var(name))
            .unwrap_or_else(|| DEFAULT_REGION.to_owned());

        Config {
            ids_file,
            user_key_file,
            aws_region_name,
            aws_endpoint: var(ENDPOINT_VAR),
            local_dir: var(LOCAL_DIR_VAR).map(PathBuf::from),
        }
    }
}

fn app_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_ids_file() -> PathBuf {
    app_dir().join(IDS_FILE_NAME)
}
