use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::{self, PrivateKey};
use tracing::debug;

use crate::error::AuthError;
use crate::models::{AuthMethod, Endpoint};

/// One proof offered to the server during authentication.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    PrivateKey(Arc<PrivateKey>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(..)"),
            Credential::PrivateKey(key) => write!(f, "PrivateKey({})", key.algorithm()),
        }
    }
}

/// Resolve the endpoint's credentials, in the order they should be offered.
///
/// Only reads the key file; nothing touches the network.
pub fn resolve_credentials(endpoint: &Endpoint) -> Result<Vec<Credential>, AuthError> {
    match endpoint.method {
        AuthMethod::Password => Ok(vec![Credential::Password(endpoint.password.clone())]),
        AuthMethod::Key => {
            let path = resolve_key_path(endpoint.key_path())?;
            debug!("Loading private key {:?}", path);
            let key = load_key(&path, endpoint.key_passphrase())?;
            Ok(vec![Credential::PrivateKey(Arc::new(key))])
        }
    }
}

/// `~` expands to the home directory, relative paths hang off the
/// directory holding the executable.
pub fn resolve_key_path(raw: &str) -> Result<PathBuf, AuthError> {
    expand_path(raw, dirs::home_dir, executable_dir)
}

fn executable_dir() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "executable has no parent"))
}

fn expand_path(
    raw: &str,
    home: impl FnOnce() -> Option<PathBuf>,
    exe_dir: impl FnOnce() -> io::Result<PathBuf>,
) -> Result<PathBuf, AuthError> {
    if let Some(rest) = raw.strip_prefix('~') {
        let mut expanded: OsString = home().ok_or(AuthError::HomeDirUnknown)?.into_os_string();
        expanded.push(rest);
        return Ok(PathBuf::from(expanded));
    }

    let path = Path::new(raw);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let base = exe_dir().map_err(AuthError::ExecutableDirUnknown)?;
    Ok(base.join(path))
}

/// Read and decode a private key, decrypting it when it is protected.
pub fn load_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKey, AuthError> {
    let pem = std::fs::read_to_string(path).map_err(|source| AuthError::KeyUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    decode_key(path, &pem, passphrase)
}

fn decode_key(path: &Path, pem: &str, passphrase: Option<&str>) -> Result<PrivateKey, AuthError> {
    match keys::decode_secret_key(pem, None) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) => {
            let Some(passphrase) = passphrase else {
                return Err(AuthError::PassphraseRequired {
                    path: path.to_path_buf(),
                });
            };
            keys::decode_secret_key(pem, Some(passphrase)).map_err(|err| {
                debug!("Decrypting {:?} failed: {}", path, err);
                AuthError::WrongPassphrase {
                    path: path.to_path_buf(),
                }
            })
        }
        Err(source) => Err(AuthError::KeyInvalid {
            path: path.to_path_buf(),
            source,
        }),
    }
}
