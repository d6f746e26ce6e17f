use std::borrow::Cow;
use std::fmt::Debug;

use keel_cmd::Prompt;

use crate::path::Platform;

/// Marker sudo is told to print as its password prompt.
pub const SUDO_PROMPT_MARKER: &str = "keel_sudo_prompt";

/// Start of the prompt gsudo prints when it needs a password.
pub const GSUDO_PROMPT_MARKER: &str = "Password for user ";

/// Who to become and how to prove it. An empty `user` means the superuser.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EscalationConfig {
    pub user: String,
    pub password: String,
}

impl Debug for EscalationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationConfig")
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

impl EscalationConfig {
    pub fn no_password() -> Self {
        Self::default()
    }

    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            user: String::new(),
            password: password.into(),
        }
    }

    pub fn impersonate(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: String::new(),
        }
    }

    pub fn impersonate_with_password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    fn posix_user(&self) -> &str {
        if self.user.is_empty() { "root" } else { &self.user }
    }

    fn is_windows_system(&self) -> bool {
        self.user.is_empty()
            || self.user.eq_ignore_ascii_case("SYSTEM")
            || self.user.eq_ignore_ascii_case("NT AUTHORITY\\SYSTEM")
    }

    /// `sudo` argv running `text` through `/bin/sh`. Without a password sudo
    /// runs non-interactively and fails rather than prompting.
    pub fn posix_argv(&self, text: &str) -> Vec<String> {
        let mut argv = vec!["sudo".to_string()];
        if self.password.is_empty() {
            argv.push("-n".into());
        } else {
            argv.extend(["-S".into(), "-p".into(), format!("{SUDO_PROMPT_MARKER}:")]);
        }
        argv.extend([
            "-u".into(),
            self.posix_user().to_string(),
            "/bin/sh".into(),
            "-c".into(),
            text.to_string(),
        ]);
        argv
    }

    /// `gsudo` argv; the system account needs no password.
    pub fn windows_argv(&self, text: &str) -> Vec<String> {
        if self.is_windows_system() {
            vec!["gsudo".into(), "-s".into(), text.to_string()]
        } else {
            vec!["gsudo".into(), "-u".into(), self.user.clone(), text.to_string()]
        }
    }

    /// The prompt to answer while the wrapped command runs, if any.
    pub fn prompt(&self, platform: Platform) -> Option<Prompt> {
        if self.password.is_empty() {
            return None;
        }
        match platform {
            Platform::Posix => Some(Prompt::new(SUDO_PROMPT_MARKER, &self.password)),
            Platform::Windows if self.is_windows_system() => None,
            Platform::Windows => Some(Prompt::new(GSUDO_PROMPT_MARKER, &self.password)),
        }
    }

    /// The wrapped command as one line for a remote shell. The command text
    /// itself is passed through unquoted on Windows.
    pub fn render(&self, platform: Platform, text: &str) -> String {
        match platform {
            Platform::Posix => self
                .posix_argv(text)
                .into_iter()
                .map(|arg| shell_escape::unix::escape(Cow::Owned(arg)).into_owned())
                .collect::<Vec<_>>()
                .join(" "),
            Platform::Windows => {
                let mut argv = self.windows_argv(text);
                let text = argv.pop().unwrap_or_default();
                let mut line = argv
                    .into_iter()
                    .map(|arg| shell_escape::windows::escape(Cow::Owned(arg)).into_owned())
                    .collect::<Vec<_>>()
                    .join(" ");
                line.push(' ');
                line.push_str(&text);
                line
            }
        }
    }
}
