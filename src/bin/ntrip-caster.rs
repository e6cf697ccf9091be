//! Standalone caster entrypoint: loads configuration, wires Registry,
//! Forwarder, and CredentialStore, then runs the Acceptor until a shutdown
//! signal arrives (spec §6 "Exit codes", §10.2 configuration layering).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ntrip_caster::config::{AppConfig, Cli};
use ntrip_caster::{Acceptor, Forwarder, InMemoryCredentialStore, MountRegistry};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let caster_defaults = config.caster_defaults(&config.network.host);
    let registry = Arc::new(MountRegistry::new(caster_defaults));
    let forwarder = Arc::new(Forwarder::new(
        config.data_forwarding.ring_buffer_size,
        crate::default_outbox_capacity(),
    ));
    let credentials: Arc<dyn ntrip_caster::CredentialStore> = Arc::new(InMemoryCredentialStore::new());

    let acceptor = Arc::new(Acceptor::new(config, registry, forwarder, credentials));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    match acceptor.run(shutdown_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "acceptor exited with error");
            ExitCode::FAILURE
        }
    }
}

fn default_outbox_capacity() -> usize {
    ntrip_caster::forwarder::DEFAULT_OUTBOX_CAPACITY
}
