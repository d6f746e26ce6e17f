mod command;
mod connect;
mod known_hosts;
mod sftp;

pub use crate::command::SshCommandError;
pub use crate::connect::{SshAuth, SshClient, SshClientError, SshConnectError, SshConnectOptions};
pub use crate::known_hosts::{HostKeyError, KnownHostsPolicy, default_known_hosts_path};
pub use crate::sftp::SshSftpError;

pub use russh::keys::PrivateKey;
pub use russh_sftp::client::SftpSession;
pub use russh_sftp::client::error::Error as SftpError;

use keel_cmd::Process;
use russh::client::Handle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error(transparent)]
    Connect(#[from] SshConnectError),

    #[error(transparent)]
    Command(#[from] SshCommandError),

    #[error(transparent)]
    Sftp(#[from] SshSftpError),

    #[error("failed to disconnect: {error}")]
    Disconnect {
        #[source]
        error: russh::Error,
    },
}

/// An authenticated SSH connection. Each command and the SFTP session get
/// their own channel, so one `Ssh` serves any number of them concurrently.
pub struct Ssh {
    handle: Handle<SshClient>,
}

impl Ssh {
    /// Connect, verify the host key and authenticate.
    #[tracing::instrument(skip(options), fields(host = %options.host, port = options.port))]
    pub async fn connect(options: SshConnectOptions) -> Result<Self, SshError> {
        let handle = connect::connect(options).await?;
        Ok(Self { handle })
    }

    /// Start a remote command and get its process handle.
    pub async fn command(&self, command: &str) -> Result<Process, SshError> {
        command::ssh_command(&self.handle, command)
            .await
            .map_err(SshError::Command)
    }

    pub async fn sftp(&self) -> Result<SftpSession, SshError> {
        sftp::open_sftp(&self.handle)
            .await
            .map_err(SshError::Sftp)
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<(), SshError> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
            .map_err(|error| SshError::Disconnect { error })
    }
}
