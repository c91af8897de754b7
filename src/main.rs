use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use dotenv::dotenv;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::args::Cli;
use crate::command_handler::CommandHandler;
use crate::config::Config;
use crate::credentials::SavedCredentials;
use crate::crypto::UserScope;
use crate::error::{Error, Result};
use crate::options::{OptionSchema, OptionSpec};
use crate::storage::local::LocalStore;
use crate::storage::s3::S3Store;
use crate::storage::ObjectStore;
use crate::vault::{CredentialPair, CredentialVault};

mod args;
mod command_handler;
mod config;
mod credentials;
mod crypto;
mod dispatch;
mod error;
mod help;
mod mime;
mod options;
mod storage;
mod uri;
mod utils;
mod vault;

/// Options every command except `help` accepts.
const GLOBAL_OPTIONS: OptionSchema = OptionSchema::new(&[
    OptionSpec::value("aws-key-id"),
    OptionSpec::value("aws-secret-key"),
]);

fn main() {
    dotenv().ok();

    let cli = Cli::parse_arguments();
    init_tracing(cli.verbose);

    let config = Config::from_env();
    debug!("{:?}", config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut input = io::stdin().lock();
    let env = |name: &str| std::env::var(name).ok();

    if let Err(e) = run(cli.args, &config, env, &mut out, &mut input) {
        let _ = out.flush();
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run<E>(
    mut args: Vec<String>,
    config: &Config,
    env: E,
    out: &mut dyn Write,
    input: &mut dyn Read,
) -> Result<()>
where
    E: Fn(&str) -> Option<String>,
{
    if args.is_empty() {
        return Err(Error::MissingCommand);
    }
    let verb = args.remove(0);

    if verb == "help" {
        return help::print_help(out, env!("CARGO_PKG_NAME"), args);
    }

    let (args, globals) = options::parse_lax(args, &GLOBAL_OPTIONS)?.into_parts();

    let saved = SavedCredentials::new(&config.ids_file, || {
        UserScope::open(&config.user_key_file).map(CredentialVault::new)
    });
    let credentials = credentials::resolve_pair(
        globals.get("aws-key-id"),
        globals.get("aws-secret-key"),
        env,
        Some(&saved),
    )?;

    if verb == "ids" {
        let path = args
            .first()
            .map(PathBuf::from)
            .unwrap_or_else(|| config.ids_file.clone());
        let saved_to = save_ids(&path, &config.user_key_file, &credentials)?;
        writeln!(out, "AWS identifiers securely saved to:")?;
        writeln!(out, "{}", saved_to.display())?;
        return Ok(());
    }

    let store = build_store(config, &credentials)?;
    let mut ctx = CommandHandler::new(store.as_ref(), out, input);
    dispatch::dispatch(&mut ctx, &verb, args)
}

fn save_ids(path: &Path, user_key_file: &Path, credentials: &CredentialPair) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let vault = CredentialVault::new(UserScope::open_or_create(user_key_file)?);
    vault.save(path, credentials)?;

    Ok(fs::canonicalize(path)?)
}

fn build_store(config: &Config, credentials: &CredentialPair) -> Result<Box<dyn ObjectStore>> {
    match &config.local_dir {
        Some(dir) => {
            info!("Using local store at {}", dir.display());
            Ok(Box::new(LocalStore::new(dir)))
        }
        None => Ok(Box::new(S3Store::new(
            &config.aws_region_name,
            config.aws_endpoint.as_deref(),
            credentials,
        )?)),
    }
}
