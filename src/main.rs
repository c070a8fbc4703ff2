// Main entry point for wishmock

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

use wishmock::config::Config;
use wishmock::world::AppState;
use wishmock::{admin, gateway};

#[derive(Debug, Parser)]
#[command(name = "wishmock", about = "Programmable mock server for protobuf-defined RPC services", version)]
struct Cli {
    /// Directory of .proto files (overrides PROTO_DIR)
    #[arg(long)]
    protos: Option<PathBuf>,

    /// Directory of rule files (overrides RULES_DIR)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Staging directory for uploaded bundles (overrides UPLOADS_DIR)
    #[arg(long)]
    uploads: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install the default crypto provider (ring) to avoid panics with rustls 0.23+
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(protos) = cli.protos {
        config.proto_dir = protos;
    }
    if let Some(rules) = cli.rules {
        config.rules_dir = rules;
    }
    if let Some(uploads) = cli.uploads {
        config.uploads_dir = uploads;
    }

    // Setup tracing
    let mut filter = if cli.verbose {
        String::from("wishmock=debug,warn")
    } else {
        String::from("wishmock=info,warn")
    };
    if config.debug_validation {
        filter.push_str(",wishmock::validation=debug");
    }

    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .event_format(wishmock::logging::CustomFormatter)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    info!("Starting wishmock v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Protos: {}, rules: {}",
        config.proto_dir.display(),
        config.rules_dir.display()
    );

    let state = AppState::new(config.clone());
    state.bootstrap().await;

    let world = state.snapshot();
    let services = world.registry.list_services();
    for service in &services {
        info!("Serving {} ({} method(s))", service.name, service.methods.len());
    }
    if services.is_empty() {
        warn!("No services loaded; upload protos via the admin surface");
    }
    for orphan in world.rules.orphan_keys() {
        warn!("Rule key {} has no matching method", orphan);
    }

    let rpc_router = gateway::rpc_router(state.clone());
    let admin_router = admin::router(state.clone());

    let mut servers = tokio::task::JoinSet::new();

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
    servers.spawn(gateway::serve(grpc_addr, rpc_router.clone(), "gRPC"));

    if let Some(tls_settings) = &config.tls {
        let acceptor = gateway::tls::build_acceptor(tls_settings)?;
        let tls_addr = SocketAddr::from(([0, 0, 0, 0], tls_settings.port));
        servers.spawn(gateway::serve_tls(
            tls_addr,
            rpc_router.clone(),
            acceptor,
            "gRPC-TLS",
        ));
    }

    if config.connect_enabled {
        let connect_addr = SocketAddr::from(([0, 0, 0, 0], config.connect_port));
        servers.spawn(gateway::serve(
            connect_addr,
            rpc_router.clone(),
            "Connect/gRPC-Web",
        ));
    }

    let admin_addr = SocketAddr::from(([0, 0, 0, 0], config.admin_port));
    servers.spawn(gateway::serve(admin_addr, admin_router, "Admin"));

    // The first server to fail takes the process down
    while let Some(result) = servers.join_next().await {
        result??;
    }

    Ok(())
}
