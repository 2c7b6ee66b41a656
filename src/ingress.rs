//! The public, bank/browser-reachable HTTP surface: the two routes a 3-D
//! Secure flow actually needs exposed over the internet.
//!
//! Everything else — creating a payment, querying a BIN, polling status — is
//! consumed directly through [`crate::Orchestrator`]'s Rust API and is
//! deliberately not wired to HTTP here. A small `Router` builder plus a
//! `run`/`run_with_shutdown` pair, with no sender IP allowlist (these routes
//! are meant for arbitrary bank ACS redirects and browsers, not a fixed set
//! of senders) and with CORS enabled, since the callback page's
//! `postMessage` result is read by an iframe-embedding page on a different
//! origin.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::error::Error;
use crate::orchestrator::Orchestrator;
use crate::types::TransactionId;

/// Configuration for the public ingress router.
#[derive(Debug, Clone, Default)]
pub struct IngressConfig {
    /// `Access-Control-Allow-Origin` value for the callback/form routes, e.g.
    /// the merchant's checkout page origin embedding the 3-D Secure iframe.
    /// Unset allows any origin, matching an unset `CORS_ORIGIN` environment
    /// variable.
    pub cors_origin: Option<String>,
}

impl IngressConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = Some(origin.into());
        self
    }
}

#[derive(Clone)]
struct IngressState {
    orchestrator: Orchestrator,
}

/// The public ingress server: `GET /payment/:id/form` and
/// `POST /payment/:id/callback`.
pub struct IngressServer {
    state: IngressState,
    config: IngressConfig,
}

impl IngressServer {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self::with_config(orchestrator, IngressConfig::default())
    }

    pub fn with_config(orchestrator: Orchestrator, config: IngressConfig) -> Self {
        Self {
            state: IngressState { orchestrator },
            config,
        }
    }

    /// Build the axum router, for embedding into a larger application.
    pub fn router(self) -> Router {
        let cors = match &self.config.cors_origin {
            Some(origin) => CorsLayer::new().allow_origin(origin.parse::<axum::http::HeaderValue>().expect("CORS_ORIGIN must be a valid header value")),
            None => CorsLayer::new().allow_origin(Any),
        };

        Router::new()
            .route("/payment/:id/form", get(get_payment_form))
            .route("/payment/:id/callback", post(post_payment_callback))
            .layer(cors)
            .with_state(Arc::new(self.state))
    }

    /// Run the server on `addr` until the process is killed.
    pub async fn run(self, addr: SocketAddr) -> std::io::Result<()> {
        let router = self.router().into_make_service();
        info!(%addr, "starting payment ingress server");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    }

    /// Run the server on `addr`, shutting down gracefully when
    /// `shutdown_signal` completes.
    pub async fn run_with_shutdown<F>(self, addr: SocketAddr, shutdown_signal: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router().into_make_service();
        info!(%addr, "starting payment ingress server (with graceful shutdown)");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await
    }
}

fn error_page(status: StatusCode, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html><html><body><h1>{}</h1><p>{}</p></body></html>",
        status.as_u16(),
        html_escape(message)
    );
    (status, Html(body)).into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Build the callback result page: a human-readable summary plus a
/// `postMessage` call so an iframe-embedding checkout page can react without
/// polling. This route never silently drops a result, so every branch below
/// — success, decline, or internal error — ends up here rather than a bare
/// HTTP error.
fn result_page(data: &serde_json::Value) -> Response {
    // Guard against the JSON payload containing a literal "</script>" closing
    // the script block early.
    let json = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string()).replace("</", "<\\/");
    let success = data.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
    let message = data.get("message").and_then(|v| v.as_str()).unwrap_or(if success { "Payment approved" } else { "Payment failed" });

    let body = format!(
        "<!DOCTYPE html><html><body>\
<p>{}</p>\
<script>window.parent.postMessage({{type: 'payment_result', data: {json}}}, '*');</script>\
</body></html>",
        html_escape(message)
    );
    Html(body).into_response()
}

async fn get_payment_form(State(state): State<Arc<IngressState>>, Path(raw_id): Path<String>) -> Response {
    let id = match TransactionId::new(raw_id) {
        Ok(id) => id,
        Err(e) => return error_page(StatusCode::BAD_REQUEST, &e),
    };

    match state.orchestrator.get_payment_form(&id).await {
        Ok(html) => Html(html).into_response(),
        Err(Error::NotFound(message)) => error_page(StatusCode::NOT_FOUND, &message),
        Err(Error::State(message)) => error_page(StatusCode::BAD_REQUEST, &message),
        Err(e) => {
            warn!(error = %e, "failed to render payment form");
            error_page(StatusCode::INTERNAL_SERVER_ERROR, "unable to render the payment form")
        }
    }
}

async fn post_payment_callback(State(state): State<Arc<IngressState>>, Path(raw_id): Path<String>, Form(fields): Form<HashMap<String, String>>) -> Response {
    let id = match TransactionId::new(raw_id) {
        Ok(id) => id,
        Err(e) => return result_page(&serde_json::json!({ "success": false, "message": e })),
    };

    match state.orchestrator.process_callback(&id, fields).await {
        Ok(public_tx) => result_page(&serde_json::to_value(public_tx.result.unwrap_or_default()).unwrap_or(serde_json::Value::Null)),
        Err(e) => {
            warn!(error = %e, transaction_id = %id, "payment callback processing failed");
            result_page(&serde_json::json!({ "success": false, "message": e.to_string() }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_page_escapes_script_closing_tag() {
        let data = serde_json::json!({ "success": false, "message": "</script><script>alert(1)</script>" });
        let response = result_page(&data);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn error_page_escapes_html() {
        let response = error_page(StatusCode::BAD_REQUEST, "<img src=x>");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
