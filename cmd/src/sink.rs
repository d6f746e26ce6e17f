use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Where a command's stdout or stderr bytes are copied to, besides capture.
#[derive(Default)]
pub enum Sink {
    #[default]
    Discard,
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    Buffer(SharedBuffer),
}

impl Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sink::Discard => write!(f, "Sink::Discard"),
            Sink::Writer(_) => write!(f, "Sink::Writer(..)"),
            Sink::Buffer(buffer) => write!(f, "Sink::Buffer({} bytes)", buffer.len()),
        }
    }
}

impl Sink {
    pub fn writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Sink::Writer(Box::new(writer))
    }

    pub(crate) async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Sink::Discard => Ok(()),
            Sink::Writer(writer) => {
                writer.write_all(bytes).await?;
                writer.flush().await
            }
            Sink::Buffer(buffer) => {
                buffer.push(bytes);
                Ok(())
            }
        }
    }
}

impl From<SharedBuffer> for Sink {
    fn from(buffer: SharedBuffer) -> Self {
        Sink::Buffer(buffer)
    }
}

/// Byte buffer readable from outside while a command is still writing to it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The pair of sinks handed to a run.
#[derive(Debug, Default)]
pub struct Sinks {
    pub stdout: Sink,
    pub stderr: Sink,
}
