pub mod handlers;
pub mod types;

use axum::http::{HeaderName, HeaderValue};
use axum::{routing::post, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::error::{ConfigError, WebWalletError};
use crate::wallet::{WebWallet, APPLICATION_NAME};

#[derive(Clone)]
pub struct RpcState {
    pub wallet: Arc<WebWallet>,
}

pub struct RpcServer {
    state: RpcState,
    port: u16,
    bind_addr: String,
}

impl RpcServer {
    /// Headless servers listen on every interface, otherwise only on loopback.
    pub fn new(wallet: Arc<WebWallet>, port: u16) -> Self {
        let host = if wallet.config().server.headless {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };
        Self {
            state: RpcState { wallet },
            port,
            bind_addr: format!("{}:{}", host, port),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Every response names the application so a second instance can tell
    /// who holds the port.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", post(handlers::handle_rpc_request))
            .layer(CorsLayer::permissive())
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static("application"),
                HeaderValue::from_static(APPLICATION_NAME),
            ))
            .with_state(self.state.clone())
    }

    /// Serves until the wallet asks to shut down.
    pub async fn start(self) -> Result<(), WebWalletError> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| ConfigError::Bind(self.port, e.to_string()))?;

        info!("RPC server listening on {}", self.bind_addr);
        let wallet = self.state.wallet.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { wallet.wait_for_shutdown().await })
            .await
            .map_err(|e| ConfigError::Bind(self.port, e.to_string()))?;
        info!("RPC server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::types::RpcResponse;
    use super::*;
    use crate::wallet::tests::{fixture_with, started, Fixture};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn server(f: Fixture) -> (tempfile::TempDir, RpcServer) {
        let Fixture { dir, ww, .. } = f;
        let port = ww.config().server.port;
        (dir, RpcServer::new(Arc::new(ww), port))
    }

    async fn call(router: Router, method: &str, params: Value) -> RpcResponse {
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 7});
        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_dir, server) = server(fixture_with(|_| {}));
        let resp = call(server.router(), "mintNft", Value::Null).await;
        assert_eq!(resp.id, 7);
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found: mintNft");
    }

    #[tokio::test]
    async fn test_application_header() {
        let (_dir, server) = server(fixture_with(|_| {}));
        let resp = server
            .router()
            .oneshot(Request::builder().method("GET").uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.headers().get("Application").unwrap(), APPLICATION_NAME);
    }

    #[tokio::test]
    async fn test_bind_address_follows_headless() {
        let (_dir, local) = server(fixture_with(|_| {}));
        assert!(local.bind_addr().starts_with("127.0.0.1:"));
        let (_dir, remote) = server(fixture_with(|c| c.server.headless = true));
        assert!(remote.bind_addr().starts_with("0.0.0.0:"));
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let (_dir, server) = server(started().await);
        let resp = call(server.router(), "setHistoryPage", json!({"page": "two"})).await;
        assert_eq!(resp.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_node_stage_and_progress() {
        let (_dir, server) = server(fixture_with(|c| c.node.bootstrap = true));
        let resp = call(server.router(), "getNodeStage", Value::Null).await;
        assert_eq!(
            resp.result.unwrap(),
            json!({"stage": "choose_consensus_source", "message": "Consensus set was not found"})
        );
        let resp = call(server.router(), "getBootstrapperProgress", Value::Null).await;
        assert_eq!(resp.result.unwrap(), json!({"progress": ""}));
    }

    #[tokio::test]
    async fn test_heartbeat_counts() {
        let (_dir, server) = server(fixture_with(|c| c.server.heartbeat_timeout_ms = 60_000));
        call(server.router(), "heartbeat", Value::Null).await;
        let resp = call(server.router(), "heartbeat", Value::Null).await;
        assert_eq!(resp.result.unwrap(), json!({"beat": 2, "timeout_ms": 60_000}));
    }

    #[tokio::test]
    async fn test_failed_action_renders_error_page() {
        let (_dir, server) = server(started().await);
        let resp = call(
            server.router(),
            "unlockWallet",
            json!({"wallet": "main", "password": ""}),
        )
        .await;
        let page = &resp.result.unwrap()["page"];
        assert_eq!(page["kind"], "error");
        assert_eq!(
            page["data"]["message"],
            "Unable to unlock wallet: A password must be provided."
        );
    }

    #[tokio::test]
    async fn test_csv_export_without_session_fails_softly() {
        let (_dir, server) = server(started().await);
        let resp = call(server.router(), "exportHistoryCsv", json!({"session_id": "nope"})).await;
        assert_eq!(
            resp.result.unwrap(),
            json!({"filename": "history.csv", "content": "failed"})
        );
    }
}
