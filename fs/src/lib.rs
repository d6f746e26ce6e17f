use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Cannot create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot remove directory '{path}': {source}")]
    RemoveDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot read metadata '{path}': {source}")]
    Metadata {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot create file '{path}': {source}")]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot open file '{path}': {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot delete file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot create symlink '{path}' -> '{target}': {source}")]
    Symlink {
        target: PathBuf,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot read symlink '{path}': {source}")]
    ReadLink {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot resolve path '{path}': {source}")]
    Canonicalize {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FsError {
    pub fn path(&self) -> &Path {
        match self {
            FsError::CreateDir { path, .. }
            | FsError::RemoveDir { path, .. }
            | FsError::Metadata { path, .. }
            | FsError::CreateFile { path, .. }
            | FsError::OpenFile { path, .. }
            | FsError::RemoveFile { path, .. }
            | FsError::Symlink { path, .. }
            | FsError::ReadLink { path, .. }
            | FsError::Canonicalize { path, .. } => path,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::CreateDir { source, .. }
            | FsError::RemoveDir { source, .. }
            | FsError::Metadata { source, .. }
            | FsError::CreateFile { source, .. }
            | FsError::OpenFile { source, .. }
            | FsError::RemoveFile { source, .. }
            | FsError::Symlink { source, .. }
            | FsError::ReadLink { source, .. }
            | FsError::Canonicalize { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }
}

pub async fn create_dir<P: AsRef<Path>>(path: P) -> Result<(), FsError> {
    let p = path.as_ref();
    fs::create_dir(p).await.map_err(|source| FsError::CreateDir {
        path: p.to_path_buf(),
        source,
    })
}

pub async fn create_dir_all<P: AsRef<Path>>(path: P) -> Result<(), FsError> {
    let p = path.as_ref();
    fs::create_dir_all(p)
        .await
        .map_err(|source| FsError::CreateDir {
            path: p.to_path_buf(),
            source,
        })
}

pub async fn remove_dir<P: AsRef<Path>>(path: P) -> Result<(), FsError> {
    let p = path.as_ref();
    fs::remove_dir(p).await.map_err(|source| FsError::RemoveDir {
        path: p.to_path_buf(),
        source,
    })
}

pub async fn remove_dir_all<P: AsRef<Path>>(path: P) -> Result<(), FsError> {
    let p = path.as_ref();
    fs::remove_dir_all(p)
        .await
        .map_err(|source| FsError::RemoveDir {
            path: p.to_path_buf(),
            source,
        })
}

pub async fn remove_file<P: AsRef<Path>>(path: P) -> Result<(), FsError> {
    let p = path.as_ref();
    fs::remove_file(p)
        .await
        .map_err(|source| FsError::RemoveFile {
            path: p.to_path_buf(),
            source,
        })
}

/// Follows symlinks.
pub async fn metadata<P: AsRef<Path>>(path: P) -> Result<std::fs::Metadata, FsError> {
    let p = path.as_ref();
    fs::metadata(p).await.map_err(|source| FsError::Metadata {
        path: p.to_path_buf(),
        source,
    })
}

pub async fn symlink_metadata<P: AsRef<Path>>(path: P) -> Result<std::fs::Metadata, FsError> {
    let p = path.as_ref();
    fs::symlink_metadata(p)
        .await
        .map_err(|source| FsError::Metadata {
            path: p.to_path_buf(),
            source,
        })
}

/// `Ok(None)` when nothing exists at `path`.
pub async fn try_metadata<P: AsRef<Path>>(path: P) -> Result<Option<std::fs::Metadata>, FsError> {
    match metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

/// Creates or truncates, opened for reading and writing.
pub async fn create_file<P: AsRef<Path>>(path: P) -> Result<File, FsError> {
    let p = path.as_ref();
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(p)
        .await
        .map_err(|source| FsError::CreateFile {
            path: p.to_path_buf(),
            source,
        })
}

/// Fails with `AlreadyExists` rather than touching an existing file.
pub async fn create_new_file<P: AsRef<Path>>(path: P) -> Result<File, FsError> {
    let p = path.as_ref();
    OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(p)
        .await
        .map_err(|source| FsError::CreateFile {
            path: p.to_path_buf(),
            source,
        })
}

pub async fn open_file<P: AsRef<Path>>(path: P) -> Result<File, FsError> {
    let p = path.as_ref();
    File::open(p).await.map_err(|source| FsError::OpenFile {
        path: p.to_path_buf(),
        source,
    })
}

/// Creates `path` as a symlink pointing at `target`.
pub async fn symlink<T: AsRef<Path>, P: AsRef<Path>>(target: T, path: P) -> Result<(), FsError> {
    let t = target.as_ref();
    let p = path.as_ref();

    #[cfg(unix)]
    let result = fs::symlink(t, p).await;
    #[cfg(windows)]
    let result = match fs::metadata(t).await {
        Ok(meta) if meta.is_dir() => fs::symlink_dir(t, p).await,
        _ => fs::symlink_file(t, p).await,
    };

    result.map_err(|source| FsError::Symlink {
        target: t.to_path_buf(),
        path: p.to_path_buf(),
        source,
    })
}

pub async fn read_link<P: AsRef<Path>>(path: P) -> Result<PathBuf, FsError> {
    let p = path.as_ref();
    fs::read_link(p).await.map_err(|source| FsError::ReadLink {
        path: p.to_path_buf(),
        source,
    })
}

pub async fn canonicalize<P: AsRef<Path>>(path: P) -> Result<PathBuf, FsError> {
    let p = path.as_ref();
    fs::canonicalize(p)
        .await
        .map_err(|source| FsError::Canonicalize {
            path: p.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let error = open_file(&missing).await.unwrap_err();
        assert!(error.is_not_found());
        assert_eq!(error.path(), missing.as_path());
        assert!(try_metadata(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_new_file_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");

        create_new_file(&path).await.unwrap();
        let error = create_new_file(&path).await.unwrap_err();
        assert!(error.is_already_exists());
    }

    #[tokio::test]
    async fn test_create_file_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");

        create_file(&path).await.unwrap().write_all(b"hello").await.unwrap();
        create_file(&path).await.unwrap();
        assert_eq!(metadata(&path).await.unwrap().len(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");

        create_file(&target).await.unwrap();
        symlink(&target, &link).await.unwrap();
        assert_eq!(read_link(&link).await.unwrap(), target);
        assert!(symlink_metadata(&link).await.unwrap().file_type().is_symlink());
    }
}
