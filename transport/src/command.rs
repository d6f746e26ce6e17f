use std::fmt::Debug;

use keel_cmd::{Capture, Process, Prompt, RunContext, Sink, Sinks, drive};
use tracing::{info, instrument};

use crate::error::{TransportError, UnsupportedOperation};
use crate::escalation::EscalationConfig;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub(crate) enum CommandKind {
    Shell,
    PowerShell,
    Escalated(EscalationConfig),
}

/// One invocation on a transport. A command runs at most once.
pub struct Command {
    transport: Transport,
    text: String,
    kind: CommandKind,
    sinks: Option<Sinks>,
}

impl Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("transport", &self.transport.kind())
            .field("text", &self.text)
            .field("kind", &self.kind)
            .field("used", &self.sinks.is_none())
            .finish()
    }
}

impl Command {
    pub(crate) fn new(transport: Transport, text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            transport,
            text: text.into(),
            kind,
            sinks: Some(Sinks::default()),
        }
    }

    /// The command text as given, before any wrapping.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Copies stdout into `sink` as it arrives. Output is still captured.
    pub fn set_stdout(&mut self, sink: impl Into<Sink>) -> &mut Self {
        if let Some(sinks) = self.sinks.as_mut() {
            sinks.stdout = sink.into();
        }
        self
    }

    pub fn set_stderr(&mut self, sink: impl Into<Sink>) -> &mut Self {
        if let Some(sinks) = self.sinks.as_mut() {
            sinks.stderr = sink.into();
        }
        self
    }

    pub async fn run(&mut self, ctx: &RunContext) -> Result<(), TransportError> {
        self.execute(ctx).await.map(|_| ())
    }

    pub async fn output(&mut self, ctx: &RunContext) -> Result<Vec<u8>, TransportError> {
        self.execute(ctx).await.map(|capture| capture.stdout)
    }

    pub async fn output_with_error(
        &mut self,
        ctx: &RunContext,
    ) -> Result<(Vec<u8>, Vec<u8>), TransportError> {
        self.execute(ctx)
            .await
            .map(|capture| (capture.stdout, capture.stderr))
    }

    #[instrument(skip_all, fields(command = %self.text))]
    async fn execute(&mut self, ctx: &RunContext) -> Result<Capture, TransportError> {
        let sinks = self.sinks.take().ok_or(TransportError::CommandReused)?;
        if ctx.interrupted().is_some() {
            return Err(TransportError::CommandReused);
        }

        let (process, prompt) = tokio::select! {
            started = self.start() => started?,
            reason = ctx.done() => return Err(reason.into()),
        };

        let capture = drive(process, sinks, prompt, ctx).await?;
        if !capture.exit.success() {
            return Err(TransportError::RemoteExecution {
                command: self.text.clone(),
                exit: capture.exit,
                stdout: capture.stdout,
                stderr: capture.stderr,
            });
        }

        info!("Command completed");
        Ok(capture)
    }

    async fn start(&self) -> Result<(Process, Option<Prompt>), TransportError> {
        match &self.transport {
            Transport::Local(local) => local.start(&self.text, &self.kind),
            Transport::Ssh(ssh) => ssh.start(&self.text, &self.kind).await,
            Transport::None => Err(UnsupportedOperation::NoTransport("command execution").into()),
        }
    }
}
