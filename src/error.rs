//! Error types for connecting, sessions and transfers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure turning an endpoint's credentials into something the transport can use.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("cannot read private key {}: {source}", path.display())]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse private key {}: {source}", path.display())]
    KeyInvalid {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },

    #[error("private key {} is encrypted and no passphrase is configured", path.display())]
    PassphraseRequired { path: PathBuf },

    #[error("wrong passphrase for private key {}", path.display())]
    WrongPassphrase { path: PathBuf },

    #[error("cannot determine the home directory")]
    HomeDirUnknown,

    #[error("cannot determine the executable directory: {0}")]
    ExecutableDirUnknown(#[source] io::Error),
}

/// Failure of a connect attempt or of the interactive session setup.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The server refused every offered credential.
    #[error("authentication rejected for {user}@{address}, check the password or key")]
    AuthRejected { user: String, address: String },

    #[error("cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: russh::Error,
    },

    /// A channel, pseudo-terminal or local terminal operation failed.
    #[error("session failed while {stage}: {message}")]
    Session {
        stage: &'static str,
        message: String,
    },
}

impl Error {
    pub fn session(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Session {
            stage,
            message: err.to_string(),
        }
    }

    /// True when the user should check credentials rather than the network.
    pub fn is_credential_problem(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::AuthRejected { .. })
    }
}

/// Failure of one file or directory during a copy.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("is a directory (use -r to copy directories)")]
    IsDirectory { path: String },

    #[error("no such file or directory")]
    NotFound { path: String },

    #[error("not a directory")]
    NotADirectory { path: String },

    #[error("{source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("remote: {message}")]
    Remote { path: String, message: String },

    #[error(transparent)]
    Connect(#[from] Error),
}

impl TransferError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound { .. })
    }

    pub fn io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            TransferError::NotFound {
                path: path.to_string(),
            }
        } else {
            TransferError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

/// A transfer failure tied to the path it happened on.
#[derive(Debug, Error)]
#[error("{path}: {error}")]
pub struct FileFailure {
    pub path: String,
    #[source]
    pub error: TransferError,
}

impl FileFailure {
    pub fn new(path: impl Into<String>, error: TransferError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// Rejected copy request, detected before any I/O happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("missing arguments, expected: cp [-r] <source>... <target>")]
    MissingArguments,

    #[error("{raw}: empty path")]
    EmptyPath { raw: String },

    #[error("source and target cannot both be local")]
    BothLocal,

    #[error("source and target cannot both be remote")]
    BothRemote,

    #[error("sources mix local and remote paths ({first} vs {other})")]
    MixedSources { first: String, other: String },
}
