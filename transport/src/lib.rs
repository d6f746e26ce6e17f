//! One way to run commands on, and move files to or from, a machine: this
//! one, one reached over SSH, or none at all.

mod builder;
mod command;
mod error;
mod escalation;
mod fs;
mod local;
mod path;
mod powershell;
mod ssh;
#[cfg(all(test, unix))]
mod test_server;
mod transport;

pub use crate::builder::{DEFAULT_CONNECTION_TIMEOUT, DEFAULT_PORT, SshTransportBuilder};
pub use crate::command::Command;
pub use crate::error::{
    ConfigurationError, FileSystemError, TransportError, UnsupportedOperation,
};
pub use crate::escalation::{EscalationConfig, GSUDO_PROMPT_MARKER, SUDO_PROMPT_MARKER};
pub use crate::fs::{File, FileInfo, FileKind, FileSystem, LocalFileSystem, SftpFileSystem};
pub use crate::local::LocalTransport;
pub use crate::path::{PathCodec, Platform};
pub use crate::powershell::{
    POWERSHELL, POWERSHELL_PROBE, ScriptError, encode_script, encoded_args, encoded_invocation,
};
pub use crate::ssh::SshTransport;
pub use crate::transport::{Transport, TransportKind};

pub use keel_cmd::{ExitStatus, RunContext, SharedBuffer, Sink};
pub use keel_ssh::{HostKeyError, KnownHostsPolicy, SshConnectError, default_known_hosts_path};
