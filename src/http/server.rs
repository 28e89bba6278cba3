//! HTTP server hosting the admission gate.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::middleware::admit_request;
use crate::admission::AdmissionController;
use crate::error::Result;

/// HTTP server for the admission gate.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission controller instance
    controller: Arc<AdmissionController>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, controller: Arc<AdmissionController>) -> Self {
        Self { addr, controller }
    }

    /// Build the standalone router: every path passes through admission and
    /// is acknowledged, while `/healthz` stays unmetered.
    ///
    /// An embedding application would instead layer [`admit_request`] over
    /// its own routes.
    pub fn router(controller: Arc<AdmissionController>) -> Router {
        Router::new()
            .fallback(acknowledge)
            .layer(from_fn_with_state(
                controller,
                admit_request::<AdmissionController>,
            ))
            .route("/healthz", get(health))
            .layer(TraceLayer::new_for_http())
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        let app = Self::router(self.controller);

        info!(addr = %self.addr, "Starting HTTP server for admission gate");

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = Self::router(self.controller);

        info!(
            addr = %self.addr,
            "Starting HTTP server for admission gate with graceful shutdown"
        );

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await?;
        Ok(())
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn acknowledge() -> Json<Value> {
    Json(json!({ "status": "admitted" }))
}
