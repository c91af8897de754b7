use std::fmt;

use thiserror::Error;

/// Which of the two AWS identifiers is being talked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    AccessKeyId,
    SecretAccessKey,
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::AccessKeyId => write!(f, "AWS access key ID"),
            Credential::SecretAccessKey => write!(f, "AWS secret access key"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Missing argument value: {0}")]
    MissingArgumentValue(String),

    #[error("Missing required argument: {0}")]
    MissingRequiredArgument(String),

    /// A positional argument a handler needs was not given.
    #[error("{0}")]
    MissingPositional(&'static str),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Missing command. Try help.")]
    MissingCommand,

    #[error("Unknown command ({0}).")]
    UnknownCommand(String),

    #[error("Missing {0}.")]
    MissingCredential(Credential),

    #[error("Object is {0}, not text/plain.")]
    NotText(String),

    #[error("Unexpected end of stream while copying.")]
    UnexpectedEof,

    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Anything the object store reported, passed through as is.
    #[error("{0}")]
    Storage(eyre::Report),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<eyre::Report> for Error {
    fn from(report: eyre::Report) -> Self {
        Error::Storage(report)
    }
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Could not access vault file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vault line {line} is not valid base64: {source}")]
    Decode {
        line: usize,
        source: base64::DecodeError,
    },

    #[error("Vault file is corrupt: {0}")]
    Corrupt(String),

    #[error("Could not unprotect the {0} for the current user")]
    Unprotect(Credential),

    #[error("User key error: {0}")]
    UserKey(String),

    #[error("Could not protect secret for the current user")]
    Protect,
}

pub type Result<T> = std::result::Result<T, Error>;
