mod local;
mod sftp;

pub use self::local::LocalFileSystem;
pub use self::sftp::SftpFileSystem;

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::{FileSystemError, TransportError, UnsupportedOperation};

/// Attempts at finding an unused temporary name before giving up.
const TEMP_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub modified: Option<SystemTime>,
    pub kind: FileKind,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// An open file on whichever host the transport points at.
pub struct File {
    name: String,
    handle: FileHandle,
}

enum FileHandle {
    Local(tokio::fs::File),
    Sftp(russh_sftp::client::fs::File),
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").field("name", &self.name).finish()
    }
}

impl File {
    pub(crate) fn local(name: String, file: tokio::fs::File) -> Self {
        Self {
            name,
            handle: FileHandle::Local(file),
        }
    }

    pub(crate) fn sftp(name: String, file: russh_sftp::client::fs::File) -> Self {
        Self {
            name,
            handle: FileHandle::Sftp(file),
        }
    }

    /// The path this file was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flushes buffered writes and asks the host to persist them.
    pub async fn sync(&mut self) -> Result<(), TransportError> {
        self.flush().await.map_err(|source| FileSystemError::Io {
            path: self.name.clone(),
            source,
        })?;
        match &self.handle {
            FileHandle::Local(file) => file.sync_all().await.map_err(|source| FileSystemError::Io {
                path: self.name.clone(),
                source,
            })?,
            FileHandle::Sftp(file) => file.sync_all().await.map_err(|source| FileSystemError::Sftp {
                op: "fsync",
                path: self.name.clone(),
                source,
            })?,
        }
        Ok(())
    }
}

impl AsyncRead for File {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().handle {
            FileHandle::Local(file) => Pin::new(file).poll_read(cx, buf),
            FileHandle::Sftp(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for File {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut self.get_mut().handle {
            FileHandle::Local(file) => Pin::new(file).poll_write(cx, buf),
            FileHandle::Sftp(file) => Pin::new(file).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().handle {
            FileHandle::Local(file) => Pin::new(file).poll_flush(cx),
            FileHandle::Sftp(file) => Pin::new(file).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.get_mut().handle {
            FileHandle::Local(file) => Pin::new(file).poll_shutdown(cx),
            FileHandle::Sftp(file) => Pin::new(file).poll_shutdown(cx),
        }
    }
}

/// File operations on the transport's host. Every path is a string in the
/// host's own syntax.
#[derive(Debug, Clone)]
pub enum FileSystem {
    Local(LocalFileSystem),
    Sftp(SftpFileSystem),
    None,
}

fn unavailable() -> TransportError {
    UnsupportedOperation::NoTransport("file system access").into()
}

impl FileSystem {
    /// `Ok(None)` when nothing exists at `path`.
    pub async fn stat(&self, path: &str) -> Result<Option<FileInfo>, TransportError> {
        match self {
            FileSystem::Local(fs) => fs.stat(path).await,
            FileSystem::Sftp(fs) => fs.stat(path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    pub async fn open(&self, path: &str) -> Result<File, TransportError> {
        match self {
            FileSystem::Local(fs) => fs.open(path).await,
            FileSystem::Sftp(fs) => fs.open(path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    /// Creates or truncates `path` for writing.
    pub async fn create(&self, path: &str) -> Result<File, TransportError> {
        match self {
            FileSystem::Local(fs) => fs.create(path).await,
            FileSystem::Sftp(fs) => fs.create(path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        match self {
            FileSystem::Local(fs) => fs.mkdir(path).await,
            FileSystem::Sftp(fs) => fs.mkdir(path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    pub async fn mkdir_all(&self, path: &str) -> Result<(), TransportError> {
        match self {
            FileSystem::Local(fs) => fs.mkdir_all(path).await,
            FileSystem::Sftp(fs) => fs.mkdir_all(path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    /// Removes a file, symlink or empty directory.
    pub async fn remove(&self, path: &str) -> Result<(), TransportError> {
        match self {
            FileSystem::Local(fs) => fs.remove(path).await,
            FileSystem::Sftp(fs) => fs.remove(path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    /// Removes `path` and everything below it. Missing paths are not an error.
    pub async fn remove_all(&self, path: &str) -> Result<(), TransportError> {
        match self {
            FileSystem::Local(fs) => fs.remove_all(path).await,
            FileSystem::Sftp(fs) => fs.remove_all(path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    /// Creates `path` as a symlink pointing at `target`.
    pub async fn symlink(&self, target: &str, path: &str) -> Result<(), TransportError> {
        match self {
            FileSystem::Local(fs) => fs.symlink(target, path).await,
            FileSystem::Sftp(fs) => fs.symlink(target, path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    pub async fn read_link(&self, path: &str) -> Result<String, TransportError> {
        match self {
            FileSystem::Local(fs) => fs.read_link(path).await,
            FileSystem::Sftp(fs) => fs.read_link(path).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    /// Resolves `name` against the host's `PATH` first, then as a path.
    pub async fn real_path(&self, name: &str) -> Result<String, TransportError> {
        match self {
            FileSystem::Local(fs) => fs.real_path(name).await,
            FileSystem::Sftp(fs) => fs.real_path(name).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    pub async fn temp_dir(&self) -> Result<String, TransportError> {
        match self {
            FileSystem::Local(fs) => Ok(fs.temp_dir()),
            FileSystem::Sftp(fs) => fs.temp_dir().await,
            FileSystem::None => Err(unavailable()),
        }
    }

    /// Creates a new file in `dir` (the temp dir when empty) named after
    /// `pattern`, where a single `*` is replaced by a unique token.
    pub async fn create_temp(&self, dir: &str, pattern: &str) -> Result<File, TransportError> {
        match self {
            FileSystem::Local(fs) => fs.create_temp(dir, pattern).await,
            FileSystem::Sftp(fs) => fs.create_temp(dir, pattern).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    /// Directory counterpart of [`FileSystem::create_temp`], returning the path.
    pub async fn mkdir_temp(&self, dir: &str, pattern: &str) -> Result<String, TransportError> {
        match self {
            FileSystem::Local(fs) => fs.mkdir_temp(dir, pattern).await,
            FileSystem::Sftp(fs) => fs.mkdir_temp(dir, pattern).await,
            FileSystem::None => Err(unavailable()),
        }
    }

    pub async fn join(&self, elems: &[&str]) -> Result<String, TransportError> {
        match self {
            FileSystem::Local(fs) => Ok(fs.codec().join(elems)),
            FileSystem::Sftp(fs) => Ok(fs.codec().await?.join(elems)),
            FileSystem::None => Err(unavailable()),
        }
    }
}

/// `pattern` split around its `*`; without one the token goes at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TempPattern<'a> {
    prefix: &'a str,
    suffix: &'a str,
}

impl<'a> TempPattern<'a> {
    pub(crate) fn parse(pattern: &'a str) -> Result<Self, FileSystemError> {
        let invalid = |reason| FileSystemError::Pattern {
            pattern: pattern.to_string(),
            reason,
        };
        if pattern.contains('/') || pattern.contains('\\') {
            return Err(invalid("contains a path separator"));
        }
        match pattern.matches('*').count() {
            0 => Ok(Self {
                prefix: pattern,
                suffix: "",
            }),
            1 => {
                let (prefix, suffix) = pattern.split_once('*').unwrap_or((pattern, ""));
                Ok(Self { prefix, suffix })
            }
            _ => Err(invalid("contains more than one '*'")),
        }
    }

    pub(crate) fn name(&self) -> String {
        format!("{}{}{}", self.prefix, temp_token(), self.suffix)
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();
    let count = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = nanos ^ count.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    format!("{:010}", mixed % 10_000_000_000)
}
