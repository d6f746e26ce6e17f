use std::fmt::Debug;
use std::sync::Arc;

use keel_cmd::{Process, Prompt, RunContext, Sinks, drive};
use keel_ssh::{SftpSession, Ssh, SshConnectOptions};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};

use crate::command::CommandKind;
use crate::error::TransportError;
use crate::path::{PathCodec, Platform};
use crate::powershell::{POWERSHELL, POWERSHELL_PROBE, encoded_invocation};

/// An SSH host. Clones share one connection, which is opened on first use
/// and reopened after [`SshTransport::close`].
#[derive(Clone)]
pub struct SshTransport {
    inner: Arc<SshInner>,
}

struct SshInner {
    options: SshConnectOptions,
    connection: Mutex<Option<Arc<Connection>>>,
}

/// One live session and what was learned about the host through it.
struct Connection {
    ssh: Ssh,
    platform: Platform,
    sftp: Mutex<Option<Arc<SftpSession>>>,
    path_prefixes: OnceCell<Vec<String>>,
    temp_dir: OnceCell<String>,
}

impl Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("host", &self.inner.options.host)
            .field("port", &self.inner.options.port)
            .field("user", &self.inner.options.username)
            .finish()
    }
}

impl SshTransport {
    pub(crate) fn new(options: SshConnectOptions) -> Self {
        Self {
            inner: Arc::new(SshInner {
                options,
                connection: Mutex::new(None),
            }),
        }
    }

    pub fn host(&self) -> &str {
        &self.inner.options.host
    }

    pub fn port(&self) -> u16 {
        self.inner.options.port
    }

    pub fn options(&self) -> &SshConnectOptions {
        &self.inner.options
    }

    async fn connection(&self) -> Result<Arc<Connection>, TransportError> {
        let mut guard = self.inner.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            if !connection.ssh.is_closed() {
                return Ok(connection.clone());
            }
            debug!("Previous SSH session was closed, reconnecting");
        }

        let ssh = Ssh::connect(self.inner.options.clone()).await?;
        let platform = probe_platform(&ssh, &self.inner.options).await;
        info!(host = %self.inner.options.host, ?platform, "Connected");

        let connection = Arc::new(Connection {
            ssh,
            platform,
            sftp: Mutex::new(None),
            path_prefixes: OnceCell::new(),
            temp_dir: OnceCell::new(),
        });
        *guard = Some(connection.clone());
        Ok(connection)
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        self.connection().await.map(|_| ())
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.inner.connection.lock().await.as_ref(), Some(connection) if !connection.ssh.is_closed())
    }

    /// Drops the SFTP session, then the SSH session. A no-op when already closed.
    #[instrument(skip(self), fields(host = %self.inner.options.host))]
    pub async fn close(&self) -> Result<(), TransportError> {
        let Some(connection) = self.inner.connection.lock().await.take() else {
            return Ok(());
        };
        if let Some(sftp) = connection.sftp.lock().await.take() {
            if let Err(error) = sftp.close().await {
                warn!(%error, "Failed to close SFTP session");
            }
        }
        if connection.ssh.is_closed() {
            return Ok(());
        }
        connection.ssh.disconnect().await?;
        info!("Disconnected");
        Ok(())
    }

    pub async fn platform(&self) -> Result<Platform, TransportError> {
        Ok(self.connection().await?.platform)
    }

    pub async fn path_codec(&self) -> Result<PathCodec, TransportError> {
        Ok(self.platform().await?.codec())
    }

    pub async fn can_run_powershell(&self) -> Result<bool, TransportError> {
        Ok(self.platform().await? == Platform::Windows)
    }

    /// The SFTP session of the current connection, opened on first use.
    pub(crate) async fn sftp(&self) -> Result<Arc<SftpSession>, TransportError> {
        let connection = self.connection().await?;
        let mut guard = connection.sftp.lock().await;
        if let Some(sftp) = guard.as_ref() {
            return Ok(sftp.clone());
        }
        let sftp = Arc::new(connection.ssh.sftp().await?);
        *guard = Some(sftp.clone());
        Ok(sftp)
    }

    /// `PATH` of the remote login shell as directory prefixes, queried once
    /// per connection.
    pub(crate) async fn path_prefixes(&self) -> Result<Vec<String>, TransportError> {
        let connection = self.connection().await?;
        let prefixes = connection
            .path_prefixes
            .get_or_try_init(|| self.query_path(&connection))
            .await?;
        Ok(prefixes.clone())
    }

    pub(crate) async fn temp_dir(&self) -> Result<String, TransportError> {
        let connection = self.connection().await?;
        let dir = connection
            .temp_dir
            .get_or_try_init(|| self.query_temp_dir(&connection))
            .await?;
        Ok(dir.clone())
    }

    async fn query_path(&self, connection: &Connection) -> Result<Vec<String>, TransportError> {
        let query = match connection.platform {
            Platform::Posix => "echo $PATH".to_string(),
            Platform::Windows => encoded_invocation(POWERSHELL, "Write-Host $env:PATH")?,
        };
        let path = self.query(connection, &query).await?;
        Ok(connection.platform.codec().split_list(&path))
    }

    async fn query_temp_dir(&self, connection: &Connection) -> Result<String, TransportError> {
        match connection.platform {
            Platform::Posix => Ok("/tmp".to_string()),
            Platform::Windows => {
                let query = encoded_invocation(POWERSHELL, "Write-Host $env:TEMP")?;
                self.query(connection, &query).await
            }
        }
    }

    /// Runs a short helper command and returns its trimmed stdout.
    async fn query(&self, connection: &Connection, command: &str) -> Result<String, TransportError> {
        let process = connection.ssh.command(command).await?;
        let ctx = RunContext::with_timeout(self.inner.options.timeout);
        let capture = drive(process, Sinks::default(), None, &ctx).await?;
        if !capture.exit.success() {
            return Err(TransportError::RemoteExecution {
                command: command.to_string(),
                exit: capture.exit,
                stdout: capture.stdout,
                stderr: capture.stderr,
            });
        }
        Ok(String::from_utf8_lossy(&capture.stdout).trim().to_string())
    }

    /// Opens a channel and starts `text` in the shape `kind` asks for.
    pub(crate) async fn start(
        &self,
        text: &str,
        kind: &CommandKind,
    ) -> Result<(Process, Option<Prompt>), TransportError> {
        let connection = self.connection().await?;
        let (remote, prompt) = match kind {
            CommandKind::Shell => (text.to_string(), None),
            CommandKind::PowerShell => (encoded_invocation(POWERSHELL, text)?, None),
            CommandKind::Escalated(config) => (
                config.render(connection.platform, text),
                config.prompt(connection.platform),
            ),
        };
        let process = connection.ssh.command(&remote).await?;
        Ok((process, prompt))
    }
}

async fn probe_platform(ssh: &Ssh, options: &SshConnectOptions) -> Platform {
    let ctx = RunContext::with_timeout(options.timeout);
    let outcome = match ssh.command(POWERSHELL_PROBE).await {
        Ok(process) => drive(process, Sinks::default(), None, &ctx)
            .await
            .map(|capture| capture.exit),
        Err(error) => {
            debug!(%error, "PowerShell probe could not start");
            return Platform::Posix;
        }
    };
    match outcome {
        Ok(exit) if exit.success() => Platform::Windows,
        Ok(exit) => {
            debug!(%exit, "PowerShell probe failed, assuming POSIX shell");
            Platform::Posix
        }
        Err(error) => {
            debug!(%error, "PowerShell probe failed, assuming POSIX shell");
            Platform::Posix
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use base64ct::LineEnding;
    use keel_cmd::ExitStatus;
    use keel_ssh::{HostKeyError, KnownHostsPolicy, SshConnectError};
    use russh::keys::PrivateKey;
    use russh::keys::ssh_key::{private::Ed25519Keypair, rand_core::OsRng};

    use super::*;
    use crate::SshTransportBuilder;
    use crate::test_server::{TestServer, USER};

    fn platform_checks(server: &TestServer) -> usize {
        server
            .commands()
            .iter()
            .filter(|command| command.as_str() == POWERSHELL_PROBE)
            .count()
    }

    #[tokio::test]
    async fn test_connect_twice_checks_platform_once() {
        let server = TestServer::start().await;
        let transport = server.transport();

        transport.connect().await.unwrap();
        transport.connect().await.unwrap();

        assert!(transport.is_connected().await);
        assert_eq!(platform_checks(&server), 1);
        assert_eq!(transport.path_codec().await.unwrap(), PathCodec::POSIX);
        assert!(!transport.can_run_powershell().await.unwrap());
    }

    #[tokio::test]
    async fn test_close_then_reconnect() {
        let server = TestServer::start().await;
        let transport = server.transport();

        transport.connect().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected().await);
        transport.close().await.unwrap();

        let output = transport
            .new_command("echo again")
            .output(&RunContext::new())
            .await
            .unwrap();
        assert_eq!(output, b"again\n");
        assert_eq!(platform_checks(&server), 2);
    }

    #[tokio::test]
    async fn test_wrong_password_is_connection_error() {
        let server = TestServer::start().await;
        let transport = SshTransportBuilder::new()
            .host("127.0.0.1")
            .port(server.port())
            .user(USER)
            .password_auth("wrong")
            .dont_use_known_hosts()
            .build()
            .unwrap();

        let error = transport.connect().await.unwrap_err();
        assert!(matches!(
            error,
            TransportError::Connection(SshConnectError::AuthFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_public_key_auth() {
        let server = TestServer::start().await;
        let pem = server.client_key.to_openssh(LineEnding::LF).unwrap();
        let transport = SshTransportBuilder::new()
            .host("127.0.0.1")
            .port(server.port())
            .user(USER)
            .public_key_auth(pem.as_bytes())
            .dont_use_known_hosts()
            .build()
            .unwrap();

        transport.connect().await.unwrap();
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_auto_add_then_strict() {
        let server = TestServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");

        let error = server
            .builder(&path, false)
            .build()
            .unwrap()
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            TransportError::HostKey(HostKeyError::Unknown { .. })
        ));

        let auto_add = server.builder(&path, true).build().unwrap();
        auto_add.connect().await.unwrap();
        auto_add.close().await.unwrap();

        let recorded = std::fs::read_to_string(&path).unwrap();
        assert_eq!(recorded.lines().filter(|line| !line.is_empty()).count(), 1);
        assert!(recorded.starts_with(&format!("[127.0.0.1]:{} ", server.port())));

        server
            .builder(&path, false)
            .build()
            .unwrap()
            .connect()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_changed_host_key_is_rejected() {
        let server = TestServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");

        let other = PrivateKey::from(Ed25519Keypair::random(&mut OsRng));
        KnownHostsPolicy::AutoAdd { path: path.clone() }
            .verify("127.0.0.1", server.port(), None, other.public_key())
            .unwrap();

        let error = server
            .builder(&path, true)
            .build()
            .unwrap()
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            TransportError::HostKey(HostKeyError::Changed { .. })
        ));
    }

    #[tokio::test]
    async fn test_exec_captures_streams_and_exit() {
        let server = TestServer::start().await;
        let error = server
            .transport()
            .new_command("echo out; echo err >&2; exit 3")
            .run(&RunContext::new())
            .await
            .unwrap_err();

        match error {
            TransportError::RemoteExecution {
                exit,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(exit, ExitStatus::Code(3));
                assert_eq!(stdout, b"out\n");
                assert_eq!(stderr, b"err\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exec_timeout_interrupts_remote_process() {
        let server = TestServer::start().await;
        let transport = server.transport();
        transport.connect().await.unwrap();

        let ctx = RunContext::with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let error = transport
            .new_command("sleep 30")
            .run(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(5));

        for _ in 0..50 {
            if !server.signals().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(server.signals(), vec!["INT"]);
    }
}
