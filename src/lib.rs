pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod csrf;
pub mod escalation;
pub mod jwt;
pub mod rate_limit;
pub mod sanitize;
pub mod session;
pub mod tokens;

use std::net::SocketAddr;
use std::sync::Arc;

use api::create_api_router;
use auth::{GatewayConfig, SecurityGateway, security_gateway};
use axum::{Router, middleware};
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Secret for signing tokens
    pub secret: Vec<u8>,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    pub fn build_gateway(&self) -> Arc<SecurityGateway> {
        Arc::new(SecurityGateway::new(&self.secret, self.gateway.clone()))
    }
}

/// Create the application router around an existing gateway.
pub fn create_app(gateway: Arc<SecurityGateway>) -> Router {
    Router::new()
        .nest("/api", create_api_router(gateway.clone()))
        .layer(middleware::from_fn_with_state(gateway, security_gateway))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(gateway: &Arc<SecurityGateway>) {
    cleanup::run_cleanup(gateway).await;
    cleanup::spawn_cleanup_scheduler(gateway.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(
    gateway: Arc<SecurityGateway>,
    listener: TcpListener,
) -> Result<(), std::io::Error> {
    let app = create_app(gateway);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the gateway, the task handle and the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(Arc<SecurityGateway>, tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let gateway = config.build_gateway();
    init_cleanup(&gateway).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let server = gateway.clone();
    let handle = tokio::spawn(async move {
        run_server(server, listener).await.ok();
    });

    Ok((gateway, handle, local_addr))
}
