use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use keel_ssh::{KnownHostsPolicy, SshAuth, SshConnectOptions, default_known_hosts_path};

use crate::error::{ConfigurationError, TransportError};
use crate::ssh::SshTransport;
use crate::transport::Transport;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Collects and validates everything an SSH transport needs. Nothing touches
/// the network until the transport is first used.
#[derive(Clone)]
pub struct SshTransportBuilder {
    host: String,
    port: u16,
    user: String,
    public_key_auth: bool,
    private_key: Vec<u8>,
    private_key_passphrase: Option<String>,
    password_auth: bool,
    password: String,
    use_known_hosts: bool,
    known_hosts_path: PathBuf,
    auto_add: bool,
    connection_timeout: Duration,
}

impl Debug for SshTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransportBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("public_key_auth", &self.public_key_auth)
            .field("password_auth", &self.password_auth)
            .field("use_known_hosts", &self.use_known_hosts)
            .field("known_hosts_path", &self.known_hosts_path)
            .field("auto_add", &self.auto_add)
            .field("connection_timeout", &self.connection_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for SshTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SshTransportBuilder {
    pub fn new() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            user: String::new(),
            public_key_auth: false,
            private_key: Vec::new(),
            private_key_passphrase: None,
            password_auth: false,
            password: String::new(),
            use_known_hosts: true,
            known_hosts_path: default_known_hosts_path().unwrap_or_default(),
            auto_add: true,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// `key` is an OpenSSH or PEM private key, unencrypted.
    pub fn public_key_auth(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.public_key_auth = true;
        self.private_key = key.into();
        self.private_key_passphrase = None;
        self
    }

    pub fn public_key_auth_with_passphrase(
        mut self,
        key: impl Into<Vec<u8>>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.public_key_auth = true;
        self.private_key = key.into();
        self.private_key_passphrase = Some(passphrase.into());
        self
    }

    pub fn no_public_key_auth(mut self) -> Self {
        self.public_key_auth = false;
        self.private_key.clear();
        self.private_key_passphrase = None;
        self
    }

    pub fn password_auth(mut self, password: impl Into<String>) -> Self {
        self.password_auth = true;
        self.password = password.into();
        self
    }

    pub fn no_password_auth(mut self) -> Self {
        self.password_auth = false;
        self.password.clear();
        self
    }

    /// Accept any host key.
    pub fn dont_use_known_hosts(mut self) -> Self {
        self.use_known_hosts = false;
        self
    }

    /// Verify host keys against `path`, recording unseen hosts when `auto_add`.
    pub fn use_known_hosts(mut self, path: impl Into<PathBuf>, auto_add: bool) -> Self {
        self.use_known_hosts = true;
        self.known_hosts_path = path.into();
        self.auto_add = auto_add;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.host.is_empty() {
            return Err(ConfigurationError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigurationError::InvalidPort);
        }
        if self.user.is_empty() {
            return Err(ConfigurationError::EmptyUser);
        }
        if self.public_key_auth && self.private_key.is_empty() {
            return Err(ConfigurationError::EmptyPrivateKey);
        }
        if self.password_auth && self.password.is_empty() {
            return Err(ConfigurationError::EmptyPassword);
        }
        if self.use_known_hosts && self.known_hosts_path.as_os_str().is_empty() {
            return Err(ConfigurationError::EmptyKnownHostsPath);
        }
        if self.connection_timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout);
        }
        if !self.public_key_auth && !self.password_auth {
            return Err(ConfigurationError::NoAuthMethod);
        }
        Ok(())
    }

    pub fn build(self) -> Result<Transport, TransportError> {
        self.validate()?;

        let mut auth = Vec::new();
        if self.public_key_auth {
            let pem = String::from_utf8_lossy(&self.private_key);
            let key = russh::keys::decode_secret_key(&pem, self.private_key_passphrase.as_deref())
                .map_err(ConfigurationError::PrivateKey)?;
            auth.push(SshAuth::PublicKey(Arc::new(key)));
        }
        if self.password_auth {
            auth.push(SshAuth::Password(self.password));
        }

        let known_hosts = match (self.use_known_hosts, self.auto_add) {
            (false, _) => KnownHostsPolicy::Insecure,
            (true, true) => KnownHostsPolicy::AutoAdd {
                path: self.known_hosts_path,
            },
            (true, false) => KnownHostsPolicy::Strict {
                path: self.known_hosts_path,
            },
        };

        let options = SshConnectOptions {
            host: self.host,
            port: self.port,
            username: self.user,
            auth,
            known_hosts,
            config: Arc::new(russh::client::Config::default()),
            timeout: self.connection_timeout,
        };
        Ok(Transport::Ssh(SshTransport::new(options)))
    }
}
