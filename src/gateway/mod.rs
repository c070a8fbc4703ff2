// Protocol gateway: one dispatch path served over plain TCP and TLS

pub mod frames;
pub mod handler;
pub mod protocol;
pub mod tls;

use crate::world::AppState;
use anyhow::{Context, Result};
use axum::Router;
use http::{HeaderName, HeaderValue, Method};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info};

/// Every RPC path is dynamic, so the router is a single fallback handler.
pub fn rpc_router(state: Arc<AppState>) -> Router {
    let cors_enabled = state.config.cors_enabled;
    let origins = state.config.cors_origins.clone();

    let router = Router::new()
        .fallback(handler::rpc)
        .with_state(state);

    if cors_enabled {
        router.layer(cors_layer(&origins))
    } else {
        router
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            http::header::CONTENT_TYPE,
            HeaderName::from_static("connect-protocol-version"),
            HeaderName::from_static("connect-accept-encoding"),
            HeaderName::from_static("connect-timeout-ms"),
            HeaderName::from_static("x-grpc-web"),
            HeaderName::from_static("x-user-agent"),
        ])
        .expose_headers([
            HeaderName::from_static("grpc-status"),
            HeaderName::from_static("grpc-message"),
        ]);

    if origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(list))
    }
}

/// Serve a router on a plaintext listener. hyper's auto builder (behind
/// `axum::serve`) speaks both HTTP/1.1 and prior-knowledge HTTP/2, which
/// is what native gRPC clients send.
pub async fn serve(addr: SocketAddr, router: Router, name: &'static str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {} on {}", name, addr))?;
    info!("{} listening on {}", name, addr);
    axum::serve(listener, router)
        .await
        .with_context(|| format!("{} server failed", name))
}

/// Serve a router behind a TLS acceptor (the gRPC TLS port).
pub async fn serve_tls(
    addr: SocketAddr,
    router: Router,
    acceptor: tokio_rustls::TlsAcceptor,
    name: &'static str,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {} on {}", name, addr))?;
    info!("{} listening on {} (TLS)", name, addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(router.clone());

        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let result = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                        .await;
                    if let Err(err) = result {
                        debug!("connection from {} ended with error: {}", peer, err);
                    }
                }
                Err(err) => debug!("TLS handshake with {} failed: {}", peer, err),
            }
        });
    }
}
