use std::time::{Duration, UNIX_EPOCH};

use keel_ssh::SftpError;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tracing::{debug, instrument, trace};

use super::{File, FileInfo, FileKind, TEMP_ATTEMPTS, TempPattern};
use crate::error::{FileSystemError, TransportError};
use crate::path::PathCodec;
use crate::ssh::SshTransport;

/// File operations over the transport's SFTP session.
#[derive(Debug, Clone)]
pub struct SftpFileSystem {
    transport: SshTransport,
}

fn is_not_found(error: &SftpError) -> bool {
    matches!(error, SftpError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile))
}

fn sftp_error(op: &'static str, path: &str, source: SftpError) -> TransportError {
    if is_not_found(&source) {
        FileSystemError::NotFound {
            path: path.to_string(),
        }
        .into()
    } else {
        FileSystemError::Sftp {
            op,
            path: path.to_string(),
            source,
        }
        .into()
    }
}

fn file_info(path: &str, codec: PathCodec, attrs: &FileAttributes) -> FileInfo {
    let kind = if attrs.is_dir() {
        FileKind::Directory
    } else if attrs.is_symlink() {
        FileKind::Symlink
    } else if attrs.is_regular() {
        FileKind::File
    } else {
        FileKind::Other
    };
    FileInfo {
        name: codec.file_name(path).to_string(),
        size: attrs.size.unwrap_or_default(),
        mode: attrs.permissions.unwrap_or_default(),
        modified: attrs
            .mtime
            .map(|secs| UNIX_EPOCH + Duration::from_secs(u64::from(secs))),
        kind,
    }
}

impl SftpFileSystem {
    pub(crate) fn new(transport: SshTransport) -> Self {
        Self { transport }
    }

    pub async fn codec(&self) -> Result<PathCodec, TransportError> {
        self.transport.path_codec().await
    }

    #[instrument(skip(self))]
    pub(crate) async fn stat(&self, path: &str) -> Result<Option<FileInfo>, TransportError> {
        let sftp = self.transport.sftp().await?;
        match sftp.metadata(path).await {
            Ok(attrs) => Ok(Some(file_info(path, self.codec().await?, &attrs))),
            Err(error) if is_not_found(&error) => Ok(None),
            Err(error) => Err(sftp_error("stat", path, error)),
        }
    }

    pub(crate) async fn open(&self, path: &str) -> Result<File, TransportError> {
        let sftp = self.transport.sftp().await?;
        let file = sftp
            .open(path)
            .await
            .map_err(|error| sftp_error("open", path, error))?;
        Ok(File::sftp(path.to_string(), file))
    }

    pub(crate) async fn create(&self, path: &str) -> Result<File, TransportError> {
        let sftp = self.transport.sftp().await?;
        let file = sftp
            .create(path)
            .await
            .map_err(|error| sftp_error("create", path, error))?;
        Ok(File::sftp(path.to_string(), file))
    }

    async fn is_dir(&self, path: &str) -> Result<bool, TransportError> {
        let sftp = self.transport.sftp().await?;
        Ok(matches!(sftp.metadata(path).await, Ok(attrs) if attrs.is_dir()))
    }

    #[instrument(skip(self))]
    pub(crate) async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        let sftp = self.transport.sftp().await?;
        match sftp.create_dir(path).await {
            Ok(()) => Ok(()),
            // SFTP v3 has no distinct "already exists" status.
            Err(error) => {
                if self.is_dir(path).await? {
                    trace!("Directory already exists");
                    Ok(())
                } else {
                    Err(sftp_error("mkdir", path, error))
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub(crate) async fn mkdir_all(&self, path: &str) -> Result<(), TransportError> {
        let codec = self.codec().await?;
        for ancestor in codec.ancestors(path) {
            if self.is_dir(&ancestor).await? {
                continue;
            }
            debug!(path = ancestor, "Creating remote directory");
            self.mkdir(&ancestor).await?;
        }
        Ok(())
    }

    pub(crate) async fn remove(&self, path: &str) -> Result<(), TransportError> {
        let sftp = self.transport.sftp().await?;
        let attrs = sftp
            .symlink_metadata(path)
            .await
            .map_err(|error| sftp_error("lstat", path, error))?;
        if attrs.is_dir() {
            sftp.remove_dir(path)
                .await
                .map_err(|error| sftp_error("rmdir", path, error))
        } else {
            sftp.remove_file(path)
                .await
                .map_err(|error| sftp_error("remove", path, error))
        }
    }

    /// Depth first: files go as they are found, directories deepest first.
    #[instrument(skip(self))]
    pub(crate) async fn remove_all(&self, path: &str) -> Result<(), TransportError> {
        let sftp = self.transport.sftp().await?;
        let codec = self.codec().await?;

        match sftp.symlink_metadata(path).await {
            Ok(attrs) if attrs.is_dir() => {}
            Ok(_) => {
                return sftp
                    .remove_file(path)
                    .await
                    .map_err(|error| sftp_error("remove", path, error));
            }
            Err(error) if is_not_found(&error) => return Ok(()),
            Err(error) => return Err(sftp_error("lstat", path, error)),
        }

        let mut pending = vec![path.to_string()];
        let mut dirs = Vec::new();
        while let Some(dir) = pending.pop() {
            let entries = sftp
                .read_dir(dir.as_str())
                .await
                .map_err(|error| sftp_error("readdir", &dir, error))?;
            for entry in entries {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    continue;
                }
                let child = codec.join([dir.as_str(), name.as_str()]);
                if entry.metadata().is_dir() {
                    pending.push(child);
                } else {
                    trace!(path = child, "Removing remote file");
                    sftp.remove_file(child.as_str())
                        .await
                        .map_err(|error| sftp_error("remove", &child, error))?;
                }
            }
            dirs.push(dir);
        }

        for dir in dirs.into_iter().rev() {
            sftp.remove_dir(dir.as_str())
                .await
                .map_err(|error| sftp_error("rmdir", &dir, error))?;
        }
        Ok(())
    }

    pub(crate) async fn symlink(&self, target: &str, path: &str) -> Result<(), TransportError> {
        let sftp = self.transport.sftp().await?;
        // OpenSSH reads the SYMLINK arguments as (target, link).
        sftp.symlink(target, path)
            .await
            .map_err(|error| sftp_error("symlink", path, error))
    }

    pub(crate) async fn read_link(&self, path: &str) -> Result<String, TransportError> {
        let sftp = self.transport.sftp().await?;
        let target = sftp
            .read_link(path)
            .await
            .map_err(|error| sftp_error("readlink", path, error))?;
        Ok(self.codec().await?.normalize_link_target(&target))
    }

    #[instrument(skip(self))]
    pub(crate) async fn real_path(&self, name: &str) -> Result<String, TransportError> {
        let sftp = self.transport.sftp().await?;
        let codec = self.codec().await?;
        if !codec.contains_separator(name) {
            for prefix in self.transport.path_prefixes().await?.iter() {
                let candidate = format!("{prefix}{name}");
                if sftp.metadata(candidate.as_str()).await.is_ok() {
                    debug!(candidate, "Found in remote PATH");
                    return Ok(candidate);
                }
            }
        }
        sftp.canonicalize(name)
            .await
            .map_err(|error| sftp_error("realpath", name, error))
    }

    pub(crate) async fn temp_dir(&self) -> Result<String, TransportError> {
        self.transport.temp_dir().await
    }

    async fn temp_parent(&self, dir: &str) -> Result<String, TransportError> {
        if dir.is_empty() {
            self.temp_dir().await
        } else {
            Ok(dir.to_string())
        }
    }

    pub(crate) async fn create_temp(&self, dir: &str, pattern: &str) -> Result<File, TransportError> {
        let pattern = TempPattern::parse(pattern)?;
        let dir = self.temp_parent(dir).await?;
        let codec = self.codec().await?;
        let sftp = self.transport.sftp().await?;
        let flags = OpenFlags::CREATE | OpenFlags::EXCLUDE | OpenFlags::READ | OpenFlags::WRITE;

        for _ in 0..TEMP_ATTEMPTS {
            let path = codec.join([dir.as_str(), pattern.name().as_str()]);
            match sftp.open_with_flags(path.as_str(), flags).await {
                Ok(file) => return Ok(File::sftp(path, file)),
                Err(error) => {
                    if sftp.metadata(path.as_str()).await.is_ok() {
                        continue;
                    }
                    return Err(sftp_error("create", &path, error));
                }
            }
        }
        Err(FileSystemError::TempNamesExhausted { dir }.into())
    }

    pub(crate) async fn mkdir_temp(&self, dir: &str, pattern: &str) -> Result<String, TransportError> {
        let pattern = TempPattern::parse(pattern)?;
        let dir = self.temp_parent(dir).await?;
        let codec = self.codec().await?;
        let sftp = self.transport.sftp().await?;

        for _ in 0..TEMP_ATTEMPTS {
            let path = codec.join([dir.as_str(), pattern.name().as_str()]);
            match sftp.create_dir(path.as_str()).await {
                Ok(()) => return Ok(path),
                Err(error) => {
                    if sftp.metadata(path.as_str()).await.is_ok() {
                        continue;
                    }
                    return Err(sftp_error("mkdir", &path, error));
                }
            }
        }
        Err(FileSystemError::TempNamesExhausted { dir }.into())
    }
}
