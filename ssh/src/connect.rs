use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{Config, Handle, Handler, connect_stream};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::known_hosts::{HostKeyError, KnownHostsPolicy};

#[derive(Error, Debug)]
pub enum SshConnectError {
    #[error("timed out connecting to {host}:{port} after {timeout:?}")]
    Timeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("failed to reach {host}:{port}")]
    Dial {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH handshake with {host}:{port} failed")]
    Handshake {
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },

    #[error(transparent)]
    HostKey(HostKeyError),

    #[error("SSH authentication request failed")]
    AuthRequest(#[source] russh::Error),

    #[error("SSH authentication failed for user {user}")]
    AuthFailed { user: String },
}

/// One way of proving who we are, tried in the order given.
#[derive(Clone)]
pub enum SshAuth {
    PublicKey(Arc<PrivateKey>),
    Password(String),
}

impl Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::PublicKey(key) => write!(f, "PublicKey({})", key.algorithm()),
            SshAuth::Password(_) => write!(f, "Password(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: Vec<SshAuth>,
    pub known_hosts: KnownHostsPolicy,
    pub config: Arc<Config>,
    pub timeout: Duration,
}

#[derive(Error, Debug)]
pub enum SshClientError {
    #[error(transparent)]
    Russh(#[from] russh::Error),

    #[error(transparent)]
    HostKey(#[from] HostKeyError),
}

#[derive(Debug, Clone)]
pub struct SshClient {
    host: String,
    port: u16,
    address: Option<String>,
    known_hosts: KnownHostsPolicy,
}

impl Handler for SshClient {
    type Error = SshClientError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        self.known_hosts
            .verify(&self.host, self.port, self.address.as_deref(), server_public_key)?;
        Ok(true)
    }
}

/// Dials, verifies the host key and authenticates, all within `timeout`.
pub(super) async fn connect(options: SshConnectOptions) -> Result<Handle<SshClient>, SshConnectError> {
    let SshConnectOptions {
        host,
        port,
        username,
        auth,
        known_hosts,
        config,
        timeout,
    } = options;

    let handshake = async {
        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|source| SshConnectError::Dial {
                host: host.clone(),
                port,
                source,
            })?;
        let address = stream.peer_addr().ok().map(|addr| addr.ip().to_string());
        debug!(host, port, ?address, "TCP connection established");

        let handler = SshClient {
            host: host.clone(),
            port,
            address,
            known_hosts,
        };

        connect_stream(config, stream, handler)
            .await
            .map_err(|error| match error {
                SshClientError::HostKey(error) => SshConnectError::HostKey(error),
                SshClientError::Russh(source) => SshConnectError::Handshake {
                    host: host.clone(),
                    port,
                    source,
                },
            })
    };

    let mut handle = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| SshConnectError::Timeout {
            host: host.clone(),
            port,
            timeout,
        })??;

    authenticate(&mut handle, &username, auth).await?;
    info!(host, port, user = username, "SSH session established");

    Ok(handle)
}

async fn authenticate(
    handle: &mut Handle<SshClient>,
    username: &str,
    auth: Vec<SshAuth>,
) -> Result<(), SshConnectError> {
    for method in auth {
        let result = match method {
            SshAuth::PublicKey(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
                handle
                    .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await
            }
            SshAuth::Password(password) => handle.authenticate_password(username, password).await,
        };
        let result = result.map_err(SshConnectError::AuthRequest)?;
        if result.success() {
            return Ok(());
        }
        debug!(user = username, "Authentication method rejected, trying next");
    }

    Err(SshConnectError::AuthFailed {
        user: username.to_string(),
    })
}
