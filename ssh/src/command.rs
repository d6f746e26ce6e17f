use keel_cmd::{CommandError, ExitStatus, Process, ProcessIo};
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Sig};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::connect::SshClient;

#[derive(Error, Debug)]
pub enum SshCommandError {
    #[error("failed to open SSH session channel: {0}")]
    ChannelOpen(#[source] russh::Error),

    #[error("failed to execute remote command `{command}`: {source}")]
    Exec {
        command: String,
        #[source]
        source: russh::Error,
    },
}

/// Opens a channel, starts `command` on it and hands the channel to a pump
/// task that bridges it to a [`Process`].
#[instrument(skip(handle))]
pub(super) async fn ssh_command(
    handle: &Handle<SshClient>,
    command: &str,
) -> Result<Process, SshCommandError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(SshCommandError::ChannelOpen)?;

    channel
        .exec(true, command)
        .await
        .map_err(|source| SshCommandError::Exec {
            command: command.to_string(),
            source,
        })?;

    info!("Executing remote command");

    let (process, io) = Process::channel();
    tokio::spawn(pump(channel, io));
    Ok(process)
}

async fn pump(mut channel: Channel<Msg>, io: ProcessIo) {
    let ProcessIo {
        mut stdin,
        stdout,
        stderr,
        exit,
        interrupt,
    } = io;

    let mut status = None;
    let mut stdin_open = true;
    let mut interrupted = false;

    let result = loop {
        tokio::select! {
            bytes = stdin.recv(), if stdin_open => match bytes {
                Some(bytes) => {
                    if let Err(error) = channel.data(&bytes[..]).await {
                        break Err(error);
                    }
                }
                None => {
                    stdin_open = false;
                    if let Err(error) = channel.eof().await {
                        debug!(%error, "Failed to send EOF on remote stdin");
                    }
                }
            },
            _ = interrupt.cancelled(), if !interrupted => {
                interrupted = true;
                if let Err(error) = channel.signal(Sig::INT).await {
                    warn!(%error, "Failed to deliver interrupt to remote command");
                }
                if let Err(error) = channel.close().await {
                    debug!(%error, "Failed to close interrupted channel");
                }
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    let _ = stdout.send(data.to_vec());
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        let _ = stderr.send(data.to_vec());
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!(exit_status, "Remote process reported exit status");
                    status = Some(ExitStatus::Code(exit_status));
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    debug!(?signal_name, "Remote process killed by signal");
                    status = Some(ExitStatus::Signal(format!("{signal_name:?}")));
                }
                Some(ChannelMsg::Close) | None => break Ok(()),
                _ => {}
            },
        }
    };

    drop(stdout);
    drop(stderr);

    let result = result
        .map(|()| status.unwrap_or(ExitStatus::Unknown))
        .map_err(|error| CommandError::Channel(Box::new(error)));
    if let Ok(exit_status) = &result {
        info!(%exit_status, "Remote command completed");
    }
    let _ = exit.send(result);
}
