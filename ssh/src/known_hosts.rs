use std::path::{Path, PathBuf};

use russh::keys::PublicKey;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How a server's host key is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownHostsPolicy {
    /// Accept any key.
    Insecure,
    /// Accept only keys already recorded in the file.
    Strict { path: PathBuf },
    /// Like `Strict`, but record keys of hosts the file has never seen.
    AutoAdd { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum HostKeyError {
    #[error("host key for {host}:{port} is not present in known hosts file {path}")]
    Unknown {
        host: String,
        port: u16,
        path: PathBuf,
    },

    #[error("host key for {host}:{port} does not match line {line} of known hosts file {path}")]
    Changed {
        host: String,
        port: u16,
        line: usize,
        path: PathBuf,
    },

    #[error("failed to read known hosts file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },

    #[error("failed to record host key in known hosts file {path}")]
    Record {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },
}

impl KnownHostsPolicy {
    pub fn path(&self) -> Option<&Path> {
        match self {
            KnownHostsPolicy::Insecure => None,
            KnownHostsPolicy::Strict { path } | KnownHostsPolicy::AutoAdd { path } => Some(path),
        }
    }

    /// Decides whether `key` is trusted for `host:port`, recording it under
    /// `AutoAdd` when the host is new.
    ///
    /// `address` is the peer IP the name resolved to. A key recorded under
    /// either name is accepted, and `AutoAdd` records both so a later
    /// connection by address matches too.
    pub fn verify(
        &self,
        host: &str,
        port: u16,
        address: Option<&str>,
        key: &PublicKey,
    ) -> Result<(), HostKeyError> {
        let names = names(host, address);
        match self {
            KnownHostsPolicy::Insecure => {
                warn!(host, port, "Accepting host key without verification");
                Ok(())
            }
            KnownHostsPolicy::Strict { path } => {
                if is_known(&names, port, key, path)? {
                    debug!(host, port, "Host key matches known hosts");
                    Ok(())
                } else {
                    Err(HostKeyError::Unknown {
                        host: host.to_string(),
                        port,
                        path: path.clone(),
                    })
                }
            }
            KnownHostsPolicy::AutoAdd { path } => {
                if is_known(&names, port, key, path)? {
                    debug!(host, port, "Host key matches known hosts");
                    return Ok(());
                }
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|error| HostKeyError::Record {
                        path: path.clone(),
                        source: error.into(),
                    })?;
                }
                for name in &names {
                    russh::keys::known_hosts::learn_known_hosts_path(name, port, key, path).map_err(
                        |source| HostKeyError::Record {
                            path: path.clone(),
                            source,
                        },
                    )?;
                }
                info!(host, port, ?address, path = %path.display(), "Recorded new host key");
                Ok(())
            }
        }
    }
}

fn names<'a>(host: &'a str, address: Option<&'a str>) -> Vec<&'a str> {
    let mut names = vec![host];
    if let Some(address) = address.filter(|address| *address != host) {
        names.push(address);
    }
    names
}

/// A changed key under any name is an error, even if another name matches.
fn is_known(names: &[&str], port: u16, key: &PublicKey, path: &Path) -> Result<bool, HostKeyError> {
    let mut known = false;
    for name in names {
        match russh::keys::check_known_hosts_path(name, port, key, path) {
            Ok(found) => known |= found,
            Err(russh::keys::Error::KeyChanged { line }) => {
                return Err(HostKeyError::Changed {
                    host: name.to_string(),
                    port,
                    line,
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(HostKeyError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
    Ok(known)
}

/// `~/.ssh/known_hosts`, if a home directory is known.
pub fn default_known_hosts_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
    Some(PathBuf::from(home).join(".ssh").join("known_hosts"))
}
