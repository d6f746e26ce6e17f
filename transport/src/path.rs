use serde::Serialize;

/// Which family of host a transport talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn local() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }

    pub fn codec(self) -> PathCodec {
        PathCodec { platform: self }
    }
}

/// Path rules of one platform, applied to paths as plain strings so remote
/// paths never go through the local `Path` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathCodec {
    platform: Platform,
}

impl PathCodec {
    pub const POSIX: PathCodec = PathCodec {
        platform: Platform::Posix,
    };
    pub const WINDOWS: PathCodec = PathCodec {
        platform: Platform::Windows,
    };

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn separator(&self) -> char {
        match self.platform {
            Platform::Posix => '/',
            Platform::Windows => '\\',
        }
    }

    pub fn list_separator(&self) -> char {
        match self.platform {
            Platform::Posix => ':',
            Platform::Windows => ';',
        }
    }

    /// Joins non-empty elements with exactly one separator between them. A
    /// leading root on the first element is kept.
    pub fn join<I, S>(&self, elems: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sep = self.separator();
        let mut out = String::new();
        for elem in elems {
            let elem = elem.as_ref();
            if elem.is_empty() {
                continue;
            }
            if out.is_empty() {
                let head = elem.trim_end_matches(sep);
                if head.is_empty() {
                    out.push(sep);
                } else {
                    out.push_str(head);
                }
                continue;
            }
            let piece = elem.trim_matches(sep);
            if piece.is_empty() {
                continue;
            }
            if !out.ends_with(sep) {
                out.push(sep);
            }
            out.push_str(piece);
        }
        out
    }

    /// Splits a `PATH`-style list into directory prefixes, each ending in a
    /// separator so a file name can be appended directly.
    pub fn split_list(&self, list: &str) -> Vec<String> {
        let sep = self.separator();
        list.trim()
            .trim_end_matches(self.list_separator())
            .split(self.list_separator())
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                if entry.ends_with(sep) {
                    entry.to_string()
                } else {
                    format!("{entry}{sep}")
                }
            })
            .collect()
    }

    /// The last element of `path`, ignoring trailing separators.
    pub fn file_name<'a>(&self, path: &'a str) -> &'a str {
        let trimmed = path.trim_end_matches(self.separator());
        match trimmed.rfind(self.separator()) {
            Some(index) => &trimmed[index + 1..],
            None => trimmed,
        }
    }

    pub fn contains_separator(&self, name: &str) -> bool {
        name.contains(self.separator()) || name.contains('/')
    }

    /// Rewrites a link target as read back from the host into this
    /// platform's form.
    pub fn normalize_link_target(&self, target: &str) -> String {
        match self.platform {
            Platform::Posix => target.to_string(),
            Platform::Windows => target.replace('/', "\\").trim_matches('\\').to_string(),
        }
    }

    /// Every ancestor of `path` that `mkdir_all` has to ensure, shortest first.
    /// Windows drive roots such as `C:` are skipped.
    pub fn ancestors(&self, path: &str) -> Vec<String> {
        let sep = self.separator();
        let absolute = path.starts_with(sep);
        let mut current = String::new();
        let mut out = Vec::new();
        for part in path.split(sep).filter(|part| !part.is_empty()) {
            if current.is_empty() {
                if absolute {
                    current.push(sep);
                }
            } else if !current.ends_with(sep) {
                current.push(sep);
            }
            current.push_str(part);
            if self.platform == Platform::Windows && is_drive(&current) {
                continue;
            }
            out.push(current.clone());
        }
        out
    }
}

fn is_drive(path: &str) -> bool {
    let path = path.trim_start_matches('\\');
    path.len() == 2 && path.ends_with(':')
}
