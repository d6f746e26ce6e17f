use keel_cmd::{CommandError, ExitStatus, Interrupted};
use keel_fs::FsError;
use keel_ssh::{HostKeyError, SftpError, SshConnectError, SshError};
use thiserror::Error;

use crate::powershell::ScriptError;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("host cannot be empty")]
    EmptyHost,

    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("user cannot be empty")]
    EmptyUser,

    #[error("private key cannot be empty when public key authentication is enabled")]
    EmptyPrivateKey,

    #[error("password cannot be empty when password authentication is enabled")]
    EmptyPassword,

    #[error("known hosts path cannot be empty when using known hosts")]
    EmptyKnownHostsPath,

    #[error("connection timeout must be greater than zero")]
    ZeroTimeout,

    #[error("no authentication method configured")]
    NoAuthMethod,

    #[error("failed to parse private key: {0}")]
    PrivateKey(#[source] russh::keys::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnsupportedOperation {
    #[error("no transport available for {0}")]
    NoTransport(&'static str),

    #[error("PowerShell is not available on this host")]
    PowerShellUnavailable,
}

#[derive(Error, Debug)]
pub enum FileSystemError {
    #[error("no such file or directory: {path}")]
    NotFound { path: String },

    #[error("invalid temporary name pattern '{pattern}': {reason}")]
    Pattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("could not find an unused temporary name in '{dir}'")]
    TempNamesExhausted { dir: String },

    #[error(transparent)]
    Local(FsError),

    #[error("SFTP {op} failed for '{path}'")]
    Sftp {
        op: &'static str,
        path: String,
        #[source]
        source: SftpError,
    },

    #[error("file I/O failed for '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FileSystemError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FileSystemError::NotFound { .. })
    }
}

impl From<FsError> for FileSystemError {
    fn from(error: FsError) -> Self {
        if error.is_not_found() {
            FileSystemError::NotFound {
                path: error.path().to_string_lossy().into_owned(),
            }
        } else {
            FileSystemError::Local(error)
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid SSH configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(SshConnectError),

    #[error("host key verification failed: {0}")]
    HostKey(#[from] HostKeyError),

    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperation),

    #[error("command failed with {exit}: {command}\n{}", String::from_utf8_lossy(.stderr).trim_end())]
    RemoteExecution {
        command: String,
        exit: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error("command I/O failed: {0}")]
    Io(#[source] CommandError),

    #[error("SSH channel failed: {0}")]
    Channel(#[source] SshError),

    #[error("command has already been run")]
    CommandReused,

    #[error("command was cancelled")]
    Cancelled,

    #[error("command timed out")]
    TimedOut,

    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::FileSystem(error) if error.is_not_found())
    }
}

impl From<Interrupted> for TransportError {
    fn from(reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => TransportError::Cancelled,
            Interrupted::TimedOut => TransportError::TimedOut,
        }
    }
}

impl From<CommandError> for TransportError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::Interrupted(reason) => reason.into(),
            error => TransportError::Io(error),
        }
    }
}

impl From<SshError> for TransportError {
    fn from(error: SshError) -> Self {
        match error {
            SshError::Connect(SshConnectError::HostKey(error)) => TransportError::HostKey(error),
            SshError::Connect(error) => TransportError::Connection(error),
            error => TransportError::Channel(error),
        }
    }
}

impl From<FsError> for TransportError {
    fn from(error: FsError) -> Self {
        TransportError::FileSystem(error.into())
    }
}
