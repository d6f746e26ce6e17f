use std::fmt::Display;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::CommandError;

/// How a process finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Code(u32),
    Signal(String),
    Unknown,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit status {code}"),
            ExitStatus::Signal(signal) => write!(f, "killed by signal {signal}"),
            ExitStatus::Unknown => write!(f, "unknown exit status"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitStatus::Code(code as u32);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                let name = nix::sys::signal::Signal::try_from(signal)
                    .map(|signal| signal.as_str().trim_start_matches("SIG").to_string())
                    .unwrap_or_else(|_| signal.to_string());
                return ExitStatus::Signal(name);
            }
        }
        ExitStatus::Unknown
    }
}

/// A started process as seen by whoever drives it, independent of where it
/// runs. Dropping `stdin` closes the process's standard input.
#[derive(Debug)]
pub struct Process {
    pub stdin: mpsc::UnboundedSender<Vec<u8>>,
    pub stdout: mpsc::UnboundedReceiver<Vec<u8>>,
    pub stderr: mpsc::UnboundedReceiver<Vec<u8>>,
    pub exit: oneshot::Receiver<Result<ExitStatus, CommandError>>,
    pub interrupt: CancellationToken,
}

/// The backend half of a [`Process`]. Backends drop `stdout` and `stderr`
/// once the streams are exhausted and then report through `exit`.
#[derive(Debug)]
pub struct ProcessIo {
    pub stdin: mpsc::UnboundedReceiver<Vec<u8>>,
    pub stdout: mpsc::UnboundedSender<Vec<u8>>,
    pub stderr: mpsc::UnboundedSender<Vec<u8>>,
    pub exit: oneshot::Sender<Result<ExitStatus, CommandError>>,
    pub interrupt: CancellationToken,
}

impl Process {
    pub fn channel() -> (Process, ProcessIo) {
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let interrupt = CancellationToken::new();

        let process = Process {
            stdin: stdin_tx,
            stdout: stdout_rx,
            stderr: stderr_rx,
            exit: exit_rx,
            interrupt: interrupt.clone(),
        };
        let io = ProcessIo {
            stdin: stdin_rx,
            stdout: stdout_tx,
            stderr: stderr_tx,
            exit: exit_tx,
            interrupt,
        };
        (process, io)
    }
}
