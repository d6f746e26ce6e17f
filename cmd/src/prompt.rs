use std::fmt::Debug;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prompts answered before the process is interrupted.
pub const MAX_PROMPT_ANSWERS: usize = 3;

const MAX_PENDING: usize = 4096;

/// A password prompt to watch for on stderr, and the secret to answer it with.
#[derive(Clone)]
pub struct Prompt {
    pub marker: String,
    pub secret: String,
}

impl Debug for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("marker", &self.marker)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Prompt {
    pub fn new(marker: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            secret: secret.into(),
        }
    }
}

/// Splits stderr on `:` and counts segments containing the marker.
///
/// Chunks may end mid-segment, so the unterminated tail is kept until the
/// next `:` arrives.
#[derive(Debug)]
pub struct PromptScanner {
    marker: Vec<u8>,
    pending: Vec<u8>,
}

impl PromptScanner {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.as_bytes().to_vec(),
            pending: Vec::new(),
        }
    }

    /// Feeds one chunk, returning how many prompts it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        let mut prompts = 0;
        for &byte in chunk {
            if byte == b':' {
                if contains(&self.pending, &self.marker) {
                    prompts += 1;
                }
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        if self.pending.len() > MAX_PENDING {
            let keep = self.marker.len().min(self.pending.len());
            let drop = self.pending.len() - keep;
            self.pending.drain(..drop);
        }
        prompts
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Answers prompts seen on `stderr` by writing the secret to `stdin`.
///
/// Stops when `stderr` closes. Past [`MAX_PROMPT_ANSWERS`] it cancels
/// `interrupt` instead of answering again.
pub fn spawn_responder(
    prompt: Prompt,
    mut stderr: mpsc::UnboundedReceiver<Vec<u8>>,
    stdin: mpsc::UnboundedSender<Vec<u8>>,
    interrupt: CancellationToken,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut scanner = PromptScanner::new(&prompt.marker);
        let mut answered = 0;
        while let Some(chunk) = stderr.recv().await {
            for _ in 0..scanner.feed(&chunk) {
                if answered >= MAX_PROMPT_ANSWERS {
                    warn!(answered, "Prompt repeated too often, interrupting process");
                    interrupt.cancel();
                    return answered;
                }
                debug!("Answering password prompt");
                let mut answer = prompt.secret.clone().into_bytes();
                answer.push(b'\n');
                if stdin.send(answer).is_err() {
                    debug!("Process stdin closed before prompt could be answered");
                    return answered;
                }
                answered += 1;
            }
        }
        answered
    })
}
