use tracing::{debug, info};

use crate::prompt::spawn_responder;
use crate::{CommandError, ExitStatus, Process, Prompt, RunContext, Sinks};

/// Everything a finished process produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit: ExitStatus,
}

/// Drives a started process to completion on a spawned worker, racing it
/// against `ctx`.
///
/// If the context finishes first the process is asked to interrupt and the
/// call returns at once; the worker's eventual result is dropped.
pub async fn drive(
    process: Process,
    sinks: Sinks,
    prompt: Option<Prompt>,
    ctx: &RunContext,
) -> Result<Capture, CommandError> {
    let interrupt = process.interrupt.clone();
    let mut worker = tokio::spawn(collect(process, sinks, prompt));

    tokio::select! {
        joined = &mut worker => joined.map_err(|_| CommandError::WorkerLost)?,
        reason = ctx.done() => {
            info!(%reason, "Interrupting running process");
            interrupt.cancel();
            Err(CommandError::Interrupted(reason))
        }
    }
}

async fn collect(
    process: Process,
    sinks: Sinks,
    prompt: Option<Prompt>,
) -> Result<Capture, CommandError> {
    let Process {
        stdin,
        mut stdout,
        mut stderr,
        exit,
        interrupt,
    } = process;
    let Sinks {
        stdout: mut stdout_sink,
        stderr: mut stderr_sink,
    } = sinks;

    // Without a prompt nobody writes to stdin, so close it now.
    let (prompt_tx, responder) = match prompt {
        Some(prompt) => {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let responder = spawn_responder(prompt, rx, stdin, interrupt);
            (Some(tx), Some(responder))
        }
        None => {
            drop(stdin);
            (None, None)
        }
    };

    let mut captured_stdout = Vec::new();
    let mut captured_stderr = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            chunk = stdout.recv(), if stdout_open => match chunk {
                Some(chunk) => {
                    stdout_sink.write(&chunk).await.map_err(CommandError::Sink)?;
                    captured_stdout.extend_from_slice(&chunk);
                }
                None => stdout_open = false,
            },
            chunk = stderr.recv(), if stderr_open => match chunk {
                Some(chunk) => {
                    if let Some(tx) = &prompt_tx {
                        let _ = tx.send(chunk.clone());
                    }
                    stderr_sink.write(&chunk).await.map_err(CommandError::Sink)?;
                    captured_stderr.extend_from_slice(&chunk);
                }
                None => stderr_open = false,
            },
        }
    }

    drop(prompt_tx);
    if let Some(responder) = responder {
        let answered = responder.await.unwrap_or_default();
        debug!(answered, "Prompt responder finished");
    }

    let exit = exit.await.map_err(|_| CommandError::WorkerLost)??;
    debug!(%exit, "Process finished");

    Ok(Capture {
        stdout: captured_stdout,
        stderr: captured_stderr,
        exit,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::{Interrupted, LocalCommand, MAX_PROMPT_ANSWERS, SharedBuffer};

    fn sh(script: &str) -> Process {
        LocalCommand::new("/bin/sh")
            .args(["-c", script])
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_drive_captures_output() {
        let capture = drive(sh("echo hello; echo oops >&2"), Sinks::default(), None, &RunContext::new())
            .await
            .unwrap();
        assert_eq!(capture.stdout, b"hello\n");
        assert_eq!(capture.stderr, b"oops\n");
        assert!(capture.exit.success());
    }

    #[tokio::test]
    async fn test_drive_copies_into_sinks() {
        let out = SharedBuffer::new();
        let sinks = Sinks {
            stdout: out.clone().into(),
            stderr: Default::default(),
        };
        drive(sh("printf abc"), sinks, None, &RunContext::new())
            .await
            .unwrap();
        assert_eq!(out.contents(), b"abc");
    }

    #[tokio::test]
    async fn test_drive_reports_non_zero_exit() {
        let capture = drive(sh("printf partial; exit 7"), Sinks::default(), None, &RunContext::new())
            .await
            .unwrap();
        assert_eq!(capture.exit, ExitStatus::Code(7));
        assert_eq!(capture.stdout, b"partial");
    }

    #[tokio::test]
    async fn test_drive_returns_promptly_on_timeout() {
        let ctx = RunContext::with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let error = drive(sh("sleep 30"), Sinks::default(), None, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(error, CommandError::Interrupted(Interrupted::TimedOut)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_drive_returns_promptly_on_cancel() {
        let ctx = RunContext::new();
        let trigger = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let error = drive(sh("sleep 30"), Sinks::default(), None, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(error, CommandError::Interrupted(Interrupted::Cancelled)));
    }

    #[tokio::test]
    async fn test_drive_answers_prompt() {
        let script = "printf 'keel_sudo_prompt:' >&2; read secret; \
                      if [ \"$secret\" = hunter2 ]; then echo granted; else exit 1; fi";
        let capture = drive(
            sh(script),
            Sinks::default(),
            Some(Prompt::new("keel_sudo_prompt", "hunter2")),
            &RunContext::with_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();
        assert!(capture.exit.success());
        assert_eq!(capture.stdout, b"granted\n");
    }

    #[tokio::test]
    async fn test_drive_wrong_secret_fails_with_prompt_in_stderr() {
        let script = "printf 'keel_sudo_prompt:' >&2; read secret; \
                      if [ \"$secret\" = hunter2 ]; then echo granted; \
                      else echo 'Sorry, try again.' >&2; exit 1; fi";
        let capture = drive(
            sh(script),
            Sinks::default(),
            Some(Prompt::new("keel_sudo_prompt", "wrong")),
            &RunContext::with_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();
        assert_eq!(capture.exit, ExitStatus::Code(1));
        assert!(capture.stdout.is_empty());
        let stderr = String::from_utf8(capture.stderr).unwrap();
        assert!(stderr.starts_with("keel_sudo_prompt:"));
        assert!(stderr.contains("Sorry, try again."));
    }

    #[tokio::test]
    async fn test_drive_interrupts_endless_prompting() {
        let script = "n=0; while :; do printf 'keel_sudo_prompt:' >&2; \
                      read secret || exit 5; n=$((n+1)); echo \"attempt $n\"; done";
        let started = Instant::now();
        let capture = drive(
            sh(script),
            Sinks::default(),
            Some(Prompt::new("keel_sudo_prompt", "wrong")),
            &RunContext::with_timeout(Duration::from_secs(20)),
        )
        .await
        .unwrap();

        assert!(!capture.exit.success());
        assert!(started.elapsed() < Duration::from_secs(10));
        let stdout = String::from_utf8(capture.stdout).unwrap();
        assert!(stdout.contains(&format!("attempt {MAX_PROMPT_ANSWERS}")));
        assert!(!stdout.contains(&format!("attempt {}", MAX_PROMPT_ANSWERS + 1)));
    }

    #[tokio::test]
    async fn test_drive_without_prompt_is_not_an_error() {
        let capture = drive(
            sh("echo fine"),
            Sinks::default(),
            Some(Prompt::new("keel_sudo_prompt", "hunter2")),
            &RunContext::new(),
        )
        .await
        .unwrap();
        assert_eq!(capture.stdout, b"fine\n");
    }

    #[tokio::test]
    async fn test_drive_closes_stdin_without_prompt() {
        let capture = drive(sh("cat; echo done"), Sinks::default(), None, &RunContext::with_timeout(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(capture.stdout, b"done\n");
    }
}
