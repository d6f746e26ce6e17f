use clap::Parser;
use keel::{Cli, run};
use keel_redact::SecretFilter;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let secrets = SecretFilter::new();
    for secret in cli.secrets() {
        secrets.add(secret);
    }
    install_tracing(&cli.log, &secrets);

    if let Err(err) = run(cli).await {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

pub fn install_tracing(level: &str, secrets: &SecretFilter) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(secrets.make_writer(std::io::stderr))
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .init();
}
