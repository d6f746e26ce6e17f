use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use keel_transport::{
    EscalationConfig, RunContext, Sink, SshTransportBuilder, Transport, TransportError,
    default_known_hosts_path,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "keel", version, about = "Run commands and read files on local or SSH hosts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long = "log", global = true, default_value = "info")]
    pub log: String,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Use this machine instead of an SSH host.
    #[arg(long, global = true)]
    pub local: bool,

    #[arg(long, env = "KEEL_HOST", global = true)]
    pub host: Option<String>,

    #[arg(long, env = "KEEL_PORT", global = true, default_value_t = 22)]
    pub port: u16,

    #[arg(long, env = "KEEL_USER", global = true)]
    pub user: Option<String>,

    #[arg(long, env = "KEEL_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Private key file for public key authentication.
    #[arg(long, env = "KEEL_IDENTITY", global = true)]
    pub identity: Option<PathBuf>,

    #[arg(long, env = "KEEL_IDENTITY_PASSPHRASE", global = true, hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Defaults to ~/.ssh/known_hosts.
    #[arg(long, env = "KEEL_KNOWN_HOSTS", global = true)]
    pub known_hosts: Option<PathBuf>,

    /// Reject hosts missing from the known hosts file instead of recording them.
    #[arg(long, global = true)]
    pub strict_host_keys: bool,

    /// Accept any host key.
    #[arg(long, global = true, conflicts_with = "strict_host_keys")]
    pub insecure: bool,

    /// Connection timeout in seconds.
    #[arg(long, env = "KEEL_TIMEOUT", global = true, default_value_t = 10)]
    pub timeout: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a shell command
    Exec {
        command: String,

        /// Run as another user through sudo (or gsudo on Windows).
        #[arg(long = "become")]
        become_: bool,

        #[arg(long)]
        become_user: Option<String>,

        #[arg(long, env = "KEEL_BECOME_PASSWORD", hide_env_values = true)]
        become_password: Option<String>,

        /// Give up after this many seconds.
        #[arg(long)]
        command_timeout: Option<u64>,
    },
    /// Run a PowerShell script
    Powershell { script: String },
    /// Print file metadata as JSON
    Stat { path: String },
    /// Resolve a program name or path on the host
    RealPath { name: String },
    /// Print a file's contents
    Read { path: String },
}

impl Cli {
    /// Values that must never show up in logs.
    pub fn secrets(&self) -> Vec<String> {
        let mut secrets = Vec::new();
        secrets.extend(self.target.password.clone());
        secrets.extend(self.target.passphrase.clone());
        if let Command::Exec {
            become_password, ..
        } = &self.command
        {
            secrets.extend(become_password.clone());
        }
        secrets
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read identity file '{path}': {source}")]
    Identity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no such file or directory: {path}")]
    NotFound { path: String },

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Output(#[source] std::io::Error),
}

pub async fn transport(target: &TargetArgs) -> Result<Transport, AppError> {
    if target.local {
        return Ok(Transport::local());
    }

    let mut builder = SshTransportBuilder::new()
        .host(target.host.clone().unwrap_or_default())
        .port(target.port)
        .user(target.user.clone().unwrap_or_default())
        .connection_timeout(Duration::from_secs(target.timeout));

    if let Some(path) = &target.identity {
        let key = tokio::fs::read(path)
            .await
            .map_err(|source| AppError::Identity {
                path: path.clone(),
                source,
            })?;
        builder = match &target.passphrase {
            Some(passphrase) => builder.public_key_auth_with_passphrase(key, passphrase.clone()),
            None => builder.public_key_auth(key),
        };
    }
    if let Some(password) = &target.password {
        builder = builder.password_auth(password.clone());
    }

    builder = if target.insecure {
        builder.dont_use_known_hosts()
    } else {
        let path = target
            .known_hosts
            .clone()
            .or_else(default_known_hosts_path)
            .unwrap_or_default();
        builder.use_known_hosts(path, !target.strict_host_keys)
    };

    Ok(builder.build()?)
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let transport = transport(&cli.target).await?;
    transport.connect().await?;
    debug!(kind = ?transport.kind(), "Transport ready");

    let result = match cli.command {
        Command::Exec {
            command,
            become_,
            become_user,
            become_password,
            command_timeout,
        } => {
            let escalation = (become_ || become_user.is_some()).then(|| EscalationConfig {
                user: become_user.unwrap_or_default(),
                password: become_password.unwrap_or_default(),
            });
            cmd_exec(&transport, command, escalation, command_timeout).await
        }
        Command::Powershell { script } => cmd_powershell(&transport, script).await,
        Command::Stat { path } => cmd_stat(&transport, path).await,
        Command::RealPath { name } => cmd_real_path(&transport, name).await,
        Command::Read { path } => cmd_read(&transport, path).await,
    };

    transport.close().await?;
    result
}

/// Cancelled on Ctrl-C, and after `timeout` seconds if given.
fn run_context(timeout: Option<u64>) -> RunContext {
    let ctx = match timeout {
        Some(secs) => RunContext::with_timeout(Duration::from_secs(secs)),
        None => RunContext::new(),
    };
    let on_interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });
    ctx
}

async fn cmd_exec(
    transport: &Transport,
    command: String,
    escalation: Option<EscalationConfig>,
    timeout: Option<u64>,
) -> Result<(), AppError> {
    let mut command = match escalation {
        Some(config) => transport.new_escalated_command(command, config)?,
        None => transport.new_command(command),
    };
    command
        .set_stdout(Sink::writer(tokio::io::stdout()))
        .set_stderr(Sink::writer(tokio::io::stderr()));
    command.run(&run_context(timeout)).await?;
    Ok(())
}

async fn cmd_powershell(transport: &Transport, script: String) -> Result<(), AppError> {
    let mut command = transport.new_powershell_command(script).await?;
    command
        .set_stdout(Sink::writer(tokio::io::stdout()))
        .set_stderr(Sink::writer(tokio::io::stderr()));
    command.run(&run_context(None)).await?;
    Ok(())
}

async fn cmd_stat(transport: &Transport, path: String) -> Result<(), AppError> {
    let info = transport
        .file_system()
        .stat(&path)
        .await?
        .ok_or(AppError::NotFound { path })?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn cmd_real_path(transport: &Transport, name: String) -> Result<(), AppError> {
    let resolved = transport.file_system().real_path(&name).await?;
    println!("{resolved}");
    Ok(())
}

async fn cmd_read(transport: &Transport, path: String) -> Result<(), AppError> {
    let mut file = transport.file_system().open(&path).await?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut file, &mut stdout)
        .await
        .map_err(AppError::Output)?;
    Ok(())
}
