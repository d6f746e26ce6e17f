use std::ffi::OsStr;
use std::fmt::Display;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command as BaseCommand};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{CommandError, ExitStatus, Process, ProcessIo};

/// Grace period between the interrupt signal and a hard kill.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// A process to start on this machine.
#[derive(Debug)]
pub struct LocalCommand {
    cmd: BaseCommand,
}

impl Display for LocalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cmd = self.cmd.as_std();
        let program = cmd.get_program().to_string_lossy();
        let args = cmd
            .get_args()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if args.is_empty() {
            write!(f, "{program}")
        } else {
            write!(f, "{program} {args}")
        }
    }
}

impl LocalCommand {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            cmd: BaseCommand::new(program),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    pub fn env<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.cmd.env(key, value);
        self
    }

    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.cmd.current_dir(dir);
        self
    }

    /// Starts the process with all three standard streams piped.
    pub fn spawn(&mut self) -> Result<Process, CommandError> {
        let command = self.to_string();
        let mut child = self
            .cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| CommandError::Spawn {
                command: command.clone(),
                error,
            })?;

        debug!(%command, pid = child.id(), "Spawned local process");

        let (process, io) = Process::channel();
        let ProcessIo {
            stdin,
            stdout,
            stderr,
            exit,
            interrupt,
        } = io;

        if let Some(child_stdin) = child.stdin.take() {
            tokio::spawn(pump_stdin(child_stdin, stdin));
        }
        let stdout_task = child.stdout.take().map(|out| tokio::spawn(pump_output(out, stdout)));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(pump_output(err, stderr)));

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = interrupt.cancelled() => interrupt_child(&mut child).await,
            };
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                let _ = task.await;
            }
            let result = status
                .map(ExitStatus::from)
                .map_err(|error| CommandError::Wait { command, error });
            let _ = exit.send(result);
        });

        Ok(process)
    }
}

async fn pump_stdin(mut child_stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if child_stdin.write_all(&bytes).await.is_err() || child_stdin.flush().await.is_err() {
            break;
        }
    }
}

async fn pump_output<R>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

async fn interrupt_child(child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                Ok(()) => {
                    if let Ok(status) = tokio::time::timeout(INTERRUPT_GRACE, child.wait()).await {
                        return status;
                    }
                    warn!(pid, "Process ignored interrupt, killing");
                }
                Err(error) => warn!(pid, %error, "Failed to send interrupt"),
            }
        }
    }
    child.start_kill()?;
    child.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_command() {
        assert_eq!(LocalCommand::new("sh").to_string(), "sh")
    }

    #[test]
    fn test_get_command_with_args() {
        assert_eq!(
            LocalCommand::new("sh").arg("-c").arg("true").to_string(),
            "sh -c true"
        )
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let error = LocalCommand::new("keel-definitely-not-a-program")
            .spawn()
            .unwrap_err();
        assert!(matches!(error, CommandError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_streams_output() {
        let mut process = LocalCommand::new("/bin/sh")
            .args(["-c", "printf out; printf err >&2; exit 3"])
            .spawn()
            .unwrap();

        let mut stdout = Vec::new();
        while let Some(chunk) = process.stdout.recv().await {
            stdout.extend(chunk);
        }
        let mut stderr = Vec::new();
        while let Some(chunk) = process.stderr.recv().await {
            stderr.extend(chunk);
        }

        assert_eq!(stdout, b"out");
        assert_eq!(stderr, b"err");
        assert_eq!(process.exit.await.unwrap().unwrap(), ExitStatus::Code(3));
    }
}
