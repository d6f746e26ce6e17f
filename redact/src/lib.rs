//! Secret redaction for anything written out, logs in particular.
//!
//! A [`SecretFilter`] is an ordinary value: build one, register secrets as
//! they become known, and hand it to whatever writes output.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::{Arc, PoisonError, RwLock};

use tracing_subscriber::fmt::MakeWriter;

pub const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Default)]
pub struct SecretFilter {
    secrets: Arc<RwLock<BTreeSet<String>>>,
}

impl SecretFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty secrets are ignored.
    pub fn add(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() {
            return;
        }
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(secret);
    }

    pub fn secrets(&self) -> Vec<String> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Replaces every occurrence of every secret, longest secrets first so a
    /// secret containing another is hidden whole.
    pub fn filter(&self, input: &str) -> String {
        match String::from_utf8(self.filter_bytes(input.as_bytes())) {
            Ok(filtered) => filtered,
            Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
        }
    }

    /// [`SecretFilter::filter`] over raw bytes. Bytes outside a secret are
    /// copied through unchanged, valid UTF-8 or not.
    pub fn filter_bytes(&self, input: &[u8]) -> Vec<u8> {
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        let mut ordered: Vec<&String> = secrets.iter().collect();
        ordered.sort_by_key(|secret| std::cmp::Reverse(secret.len()));
        ordered.into_iter().fold(input.to_vec(), |out, secret| {
            replace_all(&out, secret.as_bytes(), REDACTED.as_bytes())
        })
    }

    pub fn writer<W: Write>(&self, inner: W) -> RedactingWriter<W> {
        RedactingWriter {
            filter: self.clone(),
            inner,
        }
    }

    /// Wraps a `MakeWriter` so every writer it makes redacts.
    pub fn make_writer<M>(&self, make: M) -> MakeRedactingWriter<M> {
        MakeRedactingWriter {
            filter: self.clone(),
            make,
        }
    }
}

/// Writes filtered bytes through to `inner`. Each `write` call is filtered on
/// its own, so a secret split across two calls is not caught; line-oriented
/// writers such as the tracing formatter write whole events at once.
#[derive(Debug)]
pub struct RedactingWriter<W> {
    filter: SecretFilter,
    inner: W,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let filtered = self.filter.filter_bytes(buf);
        self.inner.write_all(&filtered)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug, Clone)]
pub struct MakeRedactingWriter<M> {
    filter: SecretFilter,
    make: M,
}

impl<'a, M> MakeWriter<'a> for MakeRedactingWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        self.filter.writer(self.make.make_writer())
    }
}

fn replace_all(haystack: &[u8], needle: &[u8], with: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while !rest.is_empty() {
        if rest.starts_with(needle) {
            out.extend_from_slice(with);
            rest = &rest[needle.len()..];
        } else {
            out.push(rest[0]);
            rest = &rest[1..];
        }
    }
    out
}
