//! Running processes: where they run is up to the caller, how their output is
//! collected and how they are interrupted lives here.

mod context;
mod local;
mod process;
mod prompt;
mod run;
mod sink;

pub use crate::context::{Interrupted, RunContext};
pub use crate::local::LocalCommand;
pub use crate::process::{ExitStatus, Process, ProcessIo};
pub use crate::prompt::{MAX_PROMPT_ANSWERS, Prompt, PromptScanner};
pub use crate::run::{Capture, drive};
pub use crate::sink::{SharedBuffer, Sink, Sinks};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn command: {command}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },

    #[error("failed waiting for command: {command}")]
    Wait {
        command: String,
        #[source]
        error: std::io::Error,
    },

    #[error("process channel failed: {0}")]
    Channel(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to write command output: {0}")]
    Sink(#[source] std::io::Error),

    #[error("process worker stopped without reporting a result")]
    WorkerLost,

    #[error("command {0}")]
    Interrupted(Interrupted),
}
