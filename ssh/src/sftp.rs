use russh::client::Handle;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use thiserror::Error;
use tracing::{info, instrument};

use crate::connect::SshClient;

#[derive(Error, Debug)]
pub enum SshSftpError {
    #[error("failed to open SFTP channel: {0}")]
    ChannelOpen(#[source] russh::Error),

    #[error("server refused the SFTP subsystem: {0}")]
    Subsystem(#[source] russh::Error),

    #[error("SFTP session setup failed: {0}")]
    Session(#[source] SftpError),
}

/// Opens an SFTP client off a new "sftp" subsystem channel.
#[instrument(skip_all)]
pub(super) async fn open_sftp(handle: &Handle<SshClient>) -> Result<SftpSession, SshSftpError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(SshSftpError::ChannelOpen)?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(SshSftpError::Subsystem)?;
    let sftp = SftpSession::new(channel.into_stream())
        .await
        .map_err(SshSftpError::Session)?;
    info!("SFTP session opened");
    Ok(sftp)
}
