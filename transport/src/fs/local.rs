use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::{debug, instrument};

use super::{File, FileInfo, FileKind, TEMP_ATTEMPTS, TempPattern};
use crate::error::{FileSystemError, TransportError};
use crate::path::{PathCodec, Platform};

/// The file system of the machine keel runs on.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

fn file_info(path: &str, codec: PathCodec, metadata: &std::fs::Metadata) -> FileInfo {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    };

    #[cfg(unix)]
    let mode = std::os::unix::fs::PermissionsExt::mode(&metadata.permissions());
    #[cfg(not(unix))]
    let mode = if metadata.permissions().readonly() { 0o444 } else { 0o666 };

    FileInfo {
        name: codec.file_name(path).to_string(),
        size: metadata.len(),
        mode,
        modified: metadata.modified().ok().filter(|time| *time >= UNIX_EPOCH),
        kind,
    }
}

impl LocalFileSystem {
    pub fn codec(&self) -> PathCodec {
        Platform::local().codec()
    }

    pub(crate) async fn stat(&self, path: &str) -> Result<Option<FileInfo>, TransportError> {
        let metadata = keel_fs::try_metadata(path).await?;
        Ok(metadata.map(|metadata| file_info(path, self.codec(), &metadata)))
    }

    pub(crate) async fn open(&self, path: &str) -> Result<File, TransportError> {
        let file = keel_fs::open_file(path).await?;
        Ok(File::local(path.to_string(), file))
    }

    pub(crate) async fn create(&self, path: &str) -> Result<File, TransportError> {
        let file = keel_fs::create_file(path).await?;
        Ok(File::local(path.to_string(), file))
    }

    pub(crate) async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        match keel_fs::create_dir(path).await {
            Err(error) if error.is_already_exists() && is_dir(path).await => Ok(()),
            result => Ok(result?),
        }
    }

    pub(crate) async fn mkdir_all(&self, path: &str) -> Result<(), TransportError> {
        Ok(keel_fs::create_dir_all(path).await?)
    }

    pub(crate) async fn remove(&self, path: &str) -> Result<(), TransportError> {
        let metadata = keel_fs::symlink_metadata(path).await?;
        if metadata.is_dir() {
            keel_fs::remove_dir(path).await?;
        } else {
            keel_fs::remove_file(path).await?;
        }
        Ok(())
    }

    pub(crate) async fn remove_all(&self, path: &str) -> Result<(), TransportError> {
        let metadata = match keel_fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(error) if error.is_not_found() => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        if metadata.is_dir() {
            keel_fs::remove_dir_all(path).await?;
        } else {
            keel_fs::remove_file(path).await?;
        }
        Ok(())
    }

    pub(crate) async fn symlink(&self, target: &str, path: &str) -> Result<(), TransportError> {
        Ok(keel_fs::symlink(target, path).await?)
    }

    pub(crate) async fn read_link(&self, path: &str) -> Result<String, TransportError> {
        let target = keel_fs::read_link(path).await?;
        Ok(target.to_string_lossy().into_owned())
    }

    #[instrument(skip(self))]
    pub(crate) async fn real_path(&self, name: &str) -> Result<String, TransportError> {
        let path = std::env::var("PATH").unwrap_or_default();
        self.real_path_in(name, &path).await
    }

    /// Like [`LocalFileSystem::real_path`], searching the given `PATH` list.
    /// A directory that cannot be searched is skipped.
    async fn real_path_in(&self, name: &str, path: &str) -> Result<String, TransportError> {
        let codec = self.codec();
        if !codec.contains_separator(name) {
            for prefix in codec.split_list(path) {
                let candidate = format!("{prefix}{name}");
                match keel_fs::try_metadata(&candidate).await {
                    Ok(Some(_)) => {
                        debug!(candidate, "Found in PATH");
                        return Ok(candidate);
                    }
                    Ok(None) => {}
                    Err(error) => debug!(candidate, %error, "Skipping PATH entry"),
                }
            }
        }
        let resolved = keel_fs::canonicalize(name).await?;
        Ok(resolved.to_string_lossy().into_owned())
    }

    pub(crate) fn temp_dir(&self) -> String {
        std::env::temp_dir().to_string_lossy().into_owned()
    }

    fn temp_parent(&self, dir: &str) -> String {
        if dir.is_empty() {
            self.temp_dir()
        } else {
            dir.to_string()
        }
    }

    pub(crate) async fn create_temp(&self, dir: &str, pattern: &str) -> Result<File, TransportError> {
        let pattern = TempPattern::parse(pattern)?;
        let dir = self.temp_parent(dir);
        for _ in 0..TEMP_ATTEMPTS {
            let path = self.codec().join([dir.as_str(), pattern.name().as_str()]);
            match keel_fs::create_new_file(&path).await {
                Ok(file) => return Ok(File::local(path, file)),
                Err(error) if error.is_already_exists() => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Err(FileSystemError::TempNamesExhausted { dir }.into())
    }

    pub(crate) async fn mkdir_temp(&self, dir: &str, pattern: &str) -> Result<String, TransportError> {
        let pattern = TempPattern::parse(pattern)?;
        let dir = self.temp_parent(dir);
        for _ in 0..TEMP_ATTEMPTS {
            let path = self.codec().join([dir.as_str(), pattern.name().as_str()]);
            match keel_fs::create_dir(&path).await {
                Ok(()) => return Ok(path),
                Err(error) if error.is_already_exists() => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Err(FileSystemError::TempNamesExhausted { dir }.into())
    }
}

async fn is_dir(path: impl AsRef<Path>) -> bool {
    matches!(keel_fs::try_metadata(path).await, Ok(Some(metadata)) if metadata.is_dir())
}
