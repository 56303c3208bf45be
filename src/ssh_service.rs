use std::sync::Arc;

use russh::client::{self, Handle, Handler, Msg};
use russh::keys::{self, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, Disconnect};
use tracing::{debug, info, warn};

use crate::auth::{resolve_credentials, Credential};
use crate::error::Error;
use crate::models::Endpoint;

/// Transport callbacks. Host keys are accepted unless the endpoint opts
/// into checking them against `~/.ssh/known_hosts`.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    host: String,
    port: u16,
    verify_host_key: bool,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, verify_host_key: bool) -> Self {
        Self {
            host,
            port,
            verify_host_key,
        }
    }
}

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.verify_host_key {
            return Ok(true);
        }

        match keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!("Host key for {}:{} is not in known_hosts", self.host, self.port);
                Ok(false)
            }
            Err(err) => {
                warn!("Host key check for {}:{} failed: {}", self.host, self.port, err);
                Ok(false)
            }
        }
    }
}

/// An authenticated SSH connection.
///
/// Both the interactive session and the SFTP backend start from here.
pub struct Connection {
    handle: Arc<Handle<ClientHandler>>,
    address: String,
}

impl Connection {
    /// Resolve credentials, dial `host:port` and authenticate.
    pub async fn open(endpoint: &Endpoint) -> Result<Self, Error> {
        let credentials = resolve_credentials(endpoint)?;
        let address = endpoint.address();
        info!("Connecting to {}@{}", endpoint.user, address);

        let config = Arc::new(client::Config::default());
        let handler = ClientHandler::new(
            endpoint.host.clone(),
            endpoint.port(),
            endpoint.options.verify_host_key(),
        );
        let mut handle = client::connect(config, address.as_str(), handler)
            .await
            .map_err(|source| Error::Connect {
                address: address.clone(),
                source,
            })?;

        authenticate(&mut handle, &endpoint.user, &credentials, &address).await?;
        info!("Authenticated as {} on {}", endpoint.user, address);

        Ok(Self {
            handle: Arc::new(handle),
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn open_channel(&self) -> Result<Channel<Msg>, Error> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|err| Error::session("opening a channel", err))
    }

    /// Liveness probe; the server has to answer.
    pub async fn keepalive(&self) -> Result<(), russh::Error> {
        self.handle.send_keepalive(true).await
    }

    pub async fn close(&self) -> Result<(), russh::Error> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
    }
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    credentials: &[Credential],
    address: &str,
) -> Result<(), Error> {
    let transport_error = |source| Error::Connect {
        address: address.to_string(),
        source,
    };

    for credential in credentials {
        let result = match credential {
            Credential::Password(password) => {
                handle
                    .authenticate_password(user, password.as_str())
                    .await
            }
            Credential::PrivateKey(key) => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(transport_error)?
                    .flatten();
                handle
                    .authenticate_publickey(
                        user,
                        PrivateKeyWithHashAlg::new(key.clone(), hash_alg),
                    )
                    .await
            }
        }
        .map_err(transport_error)?;

        if result.success() {
            return Ok(());
        }
        debug!("Server rejected {:?}", credential);
    }

    Err(Error::AuthRejected {
        user: user.to_string(),
        address: address.to_string(),
    })
}
