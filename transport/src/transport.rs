use serde::Serialize;
use tracing::instrument;

use crate::command::{Command, CommandKind};
use crate::error::{TransportError, UnsupportedOperation};
use crate::escalation::EscalationConfig;
use crate::fs::{FileSystem, LocalFileSystem, SftpFileSystem};
use crate::local::LocalTransport;
use crate::path::PathCodec;
use crate::powershell::encode_script;
use crate::ssh::SshTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Local,
    Ssh,
    None,
}

/// A machine to run commands on and move files to or from.
#[derive(Debug, Clone)]
pub enum Transport {
    Local(LocalTransport),
    Ssh(SshTransport),
    /// Placeholder for hosts with no way in; every operation is unsupported.
    None,
}

impl Transport {
    pub fn local() -> Self {
        Transport::Local(LocalTransport::new())
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Local(_) => TransportKind::Local,
            Transport::Ssh(_) => TransportKind::Ssh,
            Transport::None => TransportKind::None,
        }
    }

    /// Establishes the session if there is one to establish. Idempotent.
    #[instrument(skip(self), fields(kind = ?self.kind()))]
    pub async fn connect(&self) -> Result<(), TransportError> {
        match self {
            Transport::Ssh(ssh) => ssh.connect().await,
            Transport::Local(_) | Transport::None => Ok(()),
        }
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        match self {
            Transport::Ssh(ssh) => ssh.close().await,
            Transport::Local(_) | Transport::None => Ok(()),
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self {
            Transport::Ssh(ssh) => ssh.is_connected().await,
            Transport::Local(_) => true,
            Transport::None => false,
        }
    }

    pub fn new_command(&self, text: impl Into<String>) -> Command {
        Command::new(self.clone(), text, CommandKind::Shell)
    }

    /// The sudo or gsudo wrapper is chosen when the command starts, once the
    /// host's platform is known.
    pub fn new_escalated_command(
        &self,
        text: impl Into<String>,
        config: EscalationConfig,
    ) -> Result<Command, TransportError> {
        match self {
            Transport::None => Err(UnsupportedOperation::NoTransport("privilege escalation").into()),
            _ => Ok(Command::new(self.clone(), text, CommandKind::Escalated(config))),
        }
    }

    /// Connects an SSH transport to learn whether the host has PowerShell.
    pub async fn new_powershell_command(
        &self,
        script: impl Into<String>,
    ) -> Result<Command, TransportError> {
        let script = script.into();
        if !self.can_run_powershell().await? {
            return Err(UnsupportedOperation::PowerShellUnavailable.into());
        }
        encode_script(&script)?;
        Ok(Command::new(self.clone(), script, CommandKind::PowerShell))
    }

    pub async fn can_run_powershell(&self) -> Result<bool, TransportError> {
        match self {
            Transport::Local(local) => Ok(local.can_run_powershell()),
            Transport::Ssh(ssh) => ssh.can_run_powershell().await,
            Transport::None => Ok(false),
        }
    }

    pub async fn path_codec(&self) -> Result<PathCodec, TransportError> {
        match self {
            Transport::Local(local) => Ok(local.path_codec()),
            Transport::Ssh(ssh) => ssh.path_codec().await,
            Transport::None => Err(UnsupportedOperation::NoTransport("path handling").into()),
        }
    }

    pub fn file_system(&self) -> FileSystem {
        match self {
            Transport::Local(_) => FileSystem::Local(LocalFileSystem),
            Transport::Ssh(ssh) => FileSystem::Sftp(SftpFileSystem::new(ssh.clone())),
            Transport::None => FileSystem::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use keel_cmd::RunContext;

    use super::*;

    #[tokio::test]
    async fn test_local_connect_and_close_are_no_ops() {
        let transport = Transport::local();
        transport.connect().await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.kind(), TransportKind::Local);
    }

    #[tokio::test]
    async fn test_none_transport() {
        let transport = Transport::None;
        transport.connect().await.unwrap();
        assert!(matches!(
            transport.new_escalated_command("id", EscalationConfig::no_password()),
            Err(TransportError::Unsupported(_))
        ));
        assert!(matches!(
            transport.new_powershell_command("Get-Date").await,
            Err(TransportError::Unsupported(_))
        ));
        assert!(matches!(transport.file_system(), FileSystem::None));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_powershell_is_unsupported_off_windows() {
        let error = Transport::local()
            .new_powershell_command("Write-Host 'hi'")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            TransportError::Unsupported(UnsupportedOperation::PowerShellUnavailable)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_escalated_command_keeps_text() {
        let command = Transport::local()
            .new_escalated_command("id -u", EscalationConfig::with_password("pw"))
            .unwrap();
        assert_eq!(command.text(), "id -u");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_path_codec_and_file_system() {
        let transport = Transport::local();
        assert_eq!(transport.path_codec().await.unwrap(), PathCodec::POSIX);
        let fs = transport.file_system();
        assert_eq!(fs.join(&["/tmp", "x"]).await.unwrap(), "/tmp/x");
        assert!(fs.stat("/").await.unwrap().unwrap().is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commands_share_one_transport() {
        let transport = Transport::local();
        let ctx = RunContext::new();
        let (a, b) = tokio::join!(
            async { transport.new_command("echo a").output(&ctx).await },
            async { transport.new_command("echo b").output(&ctx).await },
        );
        assert_eq!(a.unwrap(), b"a\n");
        assert_eq!(b.unwrap(), b"b\n");
    }
}
