use keel_cmd::{LocalCommand, Process, Prompt};
use tracing::debug;

use crate::command::CommandKind;
use crate::error::{TransportError, UnsupportedOperation};
use crate::path::{PathCodec, Platform};
use crate::powershell::{POWERSHELL, encoded_args};

/// The machine keel itself runs on.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    search_path: Option<String>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands, and the escalation helpers wrapping them, are looked up in
    /// `path` instead of this process's `PATH`.
    pub fn with_search_path(path: impl Into<String>) -> Self {
        Self {
            search_path: Some(path.into()),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform::local()
    }

    pub fn path_codec(&self) -> PathCodec {
        self.platform().codec()
    }

    pub fn can_run_powershell(&self) -> bool {
        self.platform() == Platform::Windows
    }

    fn shell(&self, text: &str) -> LocalCommand {
        match self.platform() {
            Platform::Posix => {
                let mut command = LocalCommand::new("/bin/sh");
                command.args(["-c", text]);
                command
            }
            Platform::Windows => {
                let mut command = LocalCommand::new("cmd.exe");
                command.args(["/C", text]);
                command
            }
        }
    }

    fn argv(argv: Vec<String>) -> LocalCommand {
        let mut argv = argv.into_iter();
        let mut command = LocalCommand::new(argv.next().unwrap_or_default());
        command.args(argv);
        command
    }

    pub(crate) fn start(
        &self,
        text: &str,
        kind: &CommandKind,
    ) -> Result<(Process, Option<Prompt>), TransportError> {
        let platform = self.platform();
        let (mut command, prompt) = match kind {
            CommandKind::Shell => (self.shell(text), None),
            CommandKind::PowerShell => {
                if !self.can_run_powershell() {
                    return Err(UnsupportedOperation::PowerShellUnavailable.into());
                }
                let mut command = LocalCommand::new(POWERSHELL);
                command.args(encoded_args(text)?);
                (command, None)
            }
            CommandKind::Escalated(config) => {
                let argv = match platform {
                    Platform::Posix => config.posix_argv(text),
                    Platform::Windows => config.windows_argv(text),
                };
                (Self::argv(argv), config.prompt(platform))
            }
        };
        if let Some(path) = &self.search_path {
            command.env("PATH", path);
        }
        debug!(%command, "Starting local command");
        Ok((command.spawn()?, prompt))
    }
}
